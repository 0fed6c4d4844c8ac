//! Three-way EMAC reconciliation and missing-EMAC detection (component E).

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::money::round_half_up;
use crate::core::{
    Emac, EmacAnomaly, EmacAnomalyKind, EmacReconciliation, EmacStatus, Invoice,
    LaboratoryAgreement, MissingEmac, Severity, Tier,
};

const COHERENCE_TOLERANCE: Decimal = dec!(1.00);

/// Reconcile `emac` against the real invoices of the same period
/// (`period_invoices`, already tenant/laboratory/date filtered by the
/// caller) and the laboratory's agreement (`agreement`, if any).
///
/// `annual_cumulative` is the tenant-scoped yearly cumulative eligible
/// revenue for this laboratory up to and including this period, used only
/// to pick the applicable RFA tier — the tier's rate is then applied to
/// this period's own CA, not to the annual figure.
#[tracing::instrument(skip_all, fields(emac_id = %emac.id))]
pub fn reconcile(
    emac: &Emac,
    period_invoices: &[Invoice],
    agreement: Option<&LaboratoryAgreement>,
    annual_cumulative: Decimal,
) -> EmacReconciliation {
    let mut anomalies = Vec::new();

    let ca_reel: Decimal = period_invoices.iter().map(|i| i.brut_ht).sum();
    let nb_invoices_matched = period_invoices.len() as u32;
    check_ca_deviation(emac, ca_reel, nb_invoices_matched, &mut anomalies);

    let rfa_attendue = agreement
        .map(|a| expected_rfa(a, ca_reel, emac.declared_ca, annual_cumulative))
        .unwrap_or(Decimal::ZERO);
    let ecart_rfa = emac.declared_rfa - rfa_attendue;
    if agreement.is_some() {
        check_rfa_deviation(emac, rfa_attendue, ecart_rfa, &mut anomalies);
    }
    if let Some(agreement) = agreement {
        check_cooperation_and_escompte(emac, agreement, &mut anomalies);
    }
    check_internal_coherence(emac, &mut anomalies);

    let ecart_ca = emac.declared_ca - ca_reel;
    let ecart_ca_pct = if emac.declared_ca != Decimal::ZERO {
        (ecart_ca.abs() / emac.declared_ca * Decimal::from(100))
    } else {
        Decimal::ZERO
    };

    let statut = if anomalies.iter().any(|a| a.severity == Severity::Critical) {
        EmacStatus::Anomalie
    } else if anomalies.iter().any(|a| a.severity == Severity::Warning) {
        EmacStatus::EcartDetecte
    } else {
        EmacStatus::Conforme
    };

    let montant_recouvrable = if ecart_rfa > Decimal::ZERO {
        round_half_up(ecart_rfa, 2)
    } else {
        Decimal::ZERO
    };

    tracing::debug!(?statut, anomaly_count = anomalies.len(), "EMAC reconciliation complete");

    EmacReconciliation {
        ca_reel,
        nb_invoices_matched,
        ecart_ca,
        ecart_ca_pct: round_half_up(ecart_ca_pct, 2),
        rfa_attendue_calculee: round_half_up(rfa_attendue, 2),
        ecart_rfa: round_half_up(ecart_rfa, 2),
        anomalies,
        statut,
        montant_recouvrable,
    }
}

fn check_ca_deviation(
    emac: &Emac,
    ca_reel: Decimal,
    nb_invoices_matched: u32,
    anomalies: &mut Vec<EmacAnomaly>,
) {
    if ca_reel == Decimal::ZERO && emac.declared_ca > Decimal::ZERO {
        anomalies.push(EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::NoInvoicesFound,
            Severity::Critical,
            format!(
                "EMAC declares {} in revenue but no invoices were found in the period",
                emac.declared_ca
            ),
        ));
        return;
    }
    if nb_invoices_matched == 0 {
        return;
    }
    let ecart = emac.declared_ca - ca_reel;
    if ecart == Decimal::ZERO {
        return;
    }
    let ecart_pct = ecart.abs() / emac.declared_ca.max(ca_reel) * Decimal::from(100);
    let severity = if ecart_pct >= dec!(5) {
        Severity::Critical
    } else if ecart_pct >= dec!(1) {
        Severity::Warning
    } else {
        Severity::Info
    };
    anomalies.push(
        EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::CaDeviation,
            severity,
            format!(
                "declared CA {} vs real invoice CA {ca_reel} ({ecart_pct:.2}% deviation)",
                emac.declared_ca
            ),
        )
        .with_amount(ecart),
    );
}

/// Look up the applicable tier by `annual_cumulative` (the lab's year-to-date
/// revenue, which decides which rung of the progression applies) but apply
/// that tier's rate to `base`, the period's own CA — the two are distinct
/// figures and must not be conflated.
fn expected_rfa(
    agreement: &LaboratoryAgreement,
    ca_reel: Decimal,
    declared_ca: Decimal,
    annual_cumulative: Decimal,
) -> Decimal {
    let base = if ca_reel > Decimal::ZERO { ca_reel } else { declared_ca };
    let Some(tier) = applicable_tier(&agreement.tiers, annual_cumulative) else {
        return Decimal::ZERO;
    };
    round_half_up(base * tier.rate / Decimal::from(100), 2)
}

fn applicable_tier(tiers: &[Tier], cumulative: Decimal) -> Option<&Tier> {
    tiers
        .iter()
        .filter(|t| cumulative >= t.min)
        .max_by(|a, b| a.min.cmp(&b.min))
}

fn check_rfa_deviation(
    emac: &Emac,
    rfa_attendue: Decimal,
    ecart_rfa: Decimal,
    anomalies: &mut Vec<EmacAnomaly>,
) {
    if ecart_rfa.abs() <= COHERENCE_TOLERANCE {
        return;
    }
    let ecart_pct = if rfa_attendue != Decimal::ZERO {
        ecart_rfa.abs() / rfa_attendue * Decimal::from(100)
    } else {
        Decimal::from(100)
    };
    let severity = if ecart_pct >= dec!(5) {
        Severity::Critical
    } else if ecart_pct >= dec!(2) {
        Severity::Warning
    } else {
        Severity::Info
    };
    anomalies.push(
        EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::RfaDeviation,
            severity,
            format!(
                "declared RFA {} vs agreement-expected RFA {rfa_attendue} ({ecart_pct:.2}% deviation)",
                emac.declared_rfa
            ),
        )
        .with_amount(ecart_rfa),
    );
}

fn check_cooperation_and_escompte(
    emac: &Emac,
    agreement: &LaboratoryAgreement,
    anomalies: &mut Vec<EmacAnomaly>,
) {
    if emac.declared_cop > Decimal::ZERO {
        anomalies.push(EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::CooperationManualReview,
            Severity::Info,
            format!(
                "cooperation advantage of {} declared; no closed-form check, flagged for manual review",
                emac.declared_cop
            ),
        ));
    }

    if let Some(escompte_rate) = agreement.escompte_rate {
        if escompte_rate > Decimal::ZERO {
            let expected_escompte = round_half_up(emac.declared_ca * escompte_rate / Decimal::from(100), 2);
            if emac.other_advantages < expected_escompte * dec!(0.5) {
                anomalies.push(EmacAnomaly::new(
                    emac.id,
                    EmacAnomalyKind::EscompteOpportunity,
                    Severity::Warning,
                    format!(
                        "other_advantages {} is less than half of the expected prompt-payment discount {expected_escompte}",
                        emac.other_advantages
                    ),
                ));
            }
        }
    }
}

fn check_internal_coherence(emac: &Emac, anomalies: &mut Vec<EmacAnomaly>) {
    let sum = emac.declared_rfa + emac.declared_cop + emac.declared_differed + emac.other_advantages;
    if (sum - emac.total_declared_advantages).abs() > COHERENCE_TOLERANCE {
        anomalies.push(EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::InternalCoherence,
            Severity::Critical,
            format!(
                "rfa+cop+differed+other={sum} does not match total_declared_advantages={}",
                emac.total_declared_advantages
            ),
        ));
    }

    let expected_remaining = (emac.total_declared_advantages - emac.amount_paid).max(Decimal::ZERO);
    if (expected_remaining - emac.remaining_balance).abs() > COHERENCE_TOLERANCE {
        anomalies.push(EmacAnomaly::new(
            emac.id,
            EmacAnomalyKind::InternalCoherence,
            Severity::Critical,
            format!(
                "expected remaining balance {expected_remaining} does not match declared {}",
                emac.remaining_balance
            ),
        ));
    }
}

/// Scan every month from January through `today` for `year`, flagging any
/// month with invoices but no EMAC whose period overlaps it. Overlap with
/// any EMAC counts as "covered", even a partial one.
pub fn detect_missing(
    year: i32,
    today: NaiveDate,
    laboratory_id: crate::core::LaboratoryId,
    laboratory_name: &str,
    invoices: &[Invoice],
    emacs: &[Emac],
) -> Vec<MissingEmac> {
    let mut missing = Vec::new();
    for month in 1..=12u32 {
        let period_start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        if period_start > today {
            break;
        }
        let period_end = last_day_of_month(year, month);

        let covered = emacs
            .iter()
            .any(|e| e.period_start <= period_end && e.period_end >= period_start);
        if covered {
            continue;
        }

        let month_invoices: Vec<&Invoice> = invoices
            .iter()
            .filter(|i| i.invoice_date >= period_start && i.invoice_date <= period_end)
            .collect();
        if month_invoices.is_empty() {
            continue;
        }

        let ca: Decimal = month_invoices.iter().map(|i| i.brut_ht).sum();
        missing.push(MissingEmac {
            laboratory_id,
            laboratory_name: laboratory_name.to_string(),
            period_start,
            period_end,
            invoice_count: month_invoices.len() as u32,
            ca,
        });
    }
    missing
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)
    }
    .unwrap();
    next.pred_opt().unwrap()
}
