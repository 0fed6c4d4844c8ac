//! Seven-check invoice verifier (component B): compares an invoice against
//! its laboratory's active agreement and reports anomalies. Verification
//! itself never errs for business reasons — a missing agreement just
//! narrows which checks run.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::classify::classify_line;
use crate::core::money::{amounts_close_tol, round_half_up, AMOUNT_TOLERANCE, RATE_TOLERANCE};
use crate::core::{
    AnomalyKind, Invoice, InvoiceAnomaly, LaboratoryAgreement, Severity, Tranche,
};

const FRANCO_PROXIMITY: Decimal = dec!(0.10);
const TIER_PROXIMITY: Decimal = dec!(0.10);
const FREE_GOODS_PROXIMITY: Decimal = dec!(0.10);

/// Run all applicable checks for `invoice`. `agreement` is `None` when no
/// active agreement exists for the invoice's laboratory — in that case only
/// checks 6 and 7 (data-quality, line arithmetic) run.
///
/// `annual_cumulative` is the tenant-scoped yearly cumulative eligible
/// revenue for this laboratory, used by the RFA-progression check; callers
/// derive it from their own storage.
#[tracing::instrument(skip_all, fields(invoice_id = %invoice.id, has_agreement = agreement.is_some()))]
pub fn verify(
    invoice: &Invoice,
    agreement: Option<&LaboratoryAgreement>,
    annual_cumulative: Decimal,
) -> Vec<InvoiceAnomaly> {
    let mut anomalies = Vec::new();

    if let Some(agreement) = agreement {
        check_discount_rates(invoice, agreement, &mut anomalies);
        check_escompte_opportunity(invoice, agreement, &mut anomalies);
        check_franco_threshold(invoice, agreement, &mut anomalies);
        check_rfa_progression(invoice, agreement, annual_cumulative, &mut anomalies);
        check_missing_free_goods(invoice, agreement, &mut anomalies);
    } else {
        tracing::info!(invoice_id = %invoice.id, "no active agreement, skipping agreement-dependent checks");
    }
    check_vat_tranche_coherence(invoice, &mut anomalies);
    check_line_arithmetic(invoice, &mut anomalies);

    tracing::debug!(anomaly_count = anomalies.len(), "verification complete");
    anomalies
}

struct TrancheAgg {
    brut: Decimal,
    remise: Decimal,
}

fn tranche_aggregates(invoice: &Invoice) -> (TrancheAgg, TrancheAgg, TrancheAgg) {
    let mut a = TrancheAgg {
        brut: Decimal::ZERO,
        remise: Decimal::ZERO,
    };
    let mut b = TrancheAgg {
        brut: Decimal::ZERO,
        remise: Decimal::ZERO,
    };
    let mut otc = TrancheAgg {
        brut: Decimal::ZERO,
        remise: Decimal::ZERO,
    };
    for line in &invoice.lines {
        let target = match classify_line(line) {
            Tranche::A => &mut a,
            Tranche::B => &mut b,
            Tranche::Otc => &mut otc,
        };
        target.brut += line.montant_brut();
        target.remise += line.montant_remise();
    }
    (a, b, otc)
}

fn check_discount_rates(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    anomalies: &mut Vec<InvoiceAnomaly>,
) {
    let (a, b, _otc) = tranche_aggregates(invoice);
    for (label, agg, target) in [
        ("A", &a, agreement.target_rate_a),
        ("B", &b, agreement.target_rate_b),
    ] {
        let Some(target) = target else { continue };
        if agg.brut <= Decimal::ZERO {
            continue;
        }
        let taux_reel = agg.remise / agg.brut * Decimal::from(100);
        let ecart = taux_reel - target;
        if ecart.abs() > RATE_TOLERANCE {
            let montant = round_half_up(agg.brut * ecart.abs() / Decimal::from(100), 2);
            anomalies.push(
                InvoiceAnomaly::new(
                    invoice.id,
                    AnomalyKind::DiscountRate,
                    Severity::Critical,
                    format!(
                        "tranche {label}: actual discount rate {taux_reel:.2}% deviates from agreed {target:.2}% by {:.2}pp",
                        ecart.abs()
                    ),
                )
                .with_amount(montant),
            );
        }
    }
}

fn check_escompte_opportunity(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    anomalies: &mut Vec<InvoiceAnomaly>,
) {
    let (Some(rate), Some(max_delay)) = (agreement.escompte_rate, agreement.escompte_delay_days)
    else {
        return;
    };
    if rate <= Decimal::ZERO {
        return;
    }
    let Some(actual_delay) = invoice.payment_delay_days() else {
        return;
    };
    if actual_delay <= max_delay {
        let amount = round_half_up(invoice.net_ht * rate / Decimal::from(100), 2);
        anomalies.push(
            InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::EscompteOpportunity,
                Severity::Opportunity,
                format!(
                    "payment delay {actual_delay}d qualifies for {rate}% prompt-payment discount"
                ),
            )
            .with_amount(amount)
            .with_action("request the prompt-payment discount before settling this invoice"),
        );
    }
}

fn check_franco_threshold(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    anomalies: &mut Vec<InvoiceAnomaly>,
) {
    let Some(threshold) = agreement.franco_threshold else {
        return;
    };
    if threshold <= Decimal::ZERO {
        return;
    }
    if invoice.brut_ht < threshold {
        let mut anomaly = InvoiceAnomaly::new(
            invoice.id,
            AnomalyKind::FrancoThreshold,
            Severity::Opportunity,
            format!(
                "order total {} is below the free-shipping threshold of {threshold}",
                invoice.brut_ht
            ),
        )
        .with_action("consolidate with the next order to clear the free-shipping threshold");
        if let Some(frais_port) = agreement.franco_frais_port {
            anomaly = anomaly.with_amount(frais_port);
        }
        anomalies.push(anomaly);
    } else if (invoice.brut_ht - threshold) <= threshold * FRANCO_PROXIMITY {
        anomalies.push(InvoiceAnomaly::new(
            invoice.id,
            AnomalyKind::FrancoThreshold,
            Severity::Info,
            format!(
                "order total {} is within 10% of the free-shipping threshold of {threshold}; a return could push it under",
                invoice.brut_ht
            ),
        ));
    }
}

fn check_rfa_progression(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    annual_cumulative: Decimal,
    anomalies: &mut Vec<InvoiceAnomaly>,
) {
    if agreement.tiers.is_empty() {
        return;
    }
    let mut sorted_tiers: Vec<_> = agreement.tiers.iter().collect();
    sorted_tiers.sort_by(|a, b| a.min.cmp(&b.min));

    let current_idx = sorted_tiers
        .iter()
        .rposition(|t| annual_cumulative >= t.min);
    let Some(current_idx) = current_idx else {
        return;
    };
    let Some(next_tier) = sorted_tiers.get(current_idx + 1) else {
        return;
    };
    let remaining = next_tier.min - annual_cumulative;
    if remaining <= next_tier.min * TIER_PROXIMITY {
        let additional = round_half_up(
            annual_cumulative * (next_tier.rate - sorted_tiers[current_idx].rate) / Decimal::from(100),
            2,
        );
        anomalies.push(
            InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::RfaProgression,
                Severity::Info,
                format!(
                    "{remaining} more in cumulative revenue reaches tier '{}' at {}%",
                    next_tier.label, next_tier.rate
                ),
            )
            .with_amount(additional),
        );
    }
}

fn check_missing_free_goods(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    anomalies: &mut Vec<InvoiceAnomaly>,
) {
    let (Some(_ratio), Some(threshold)) = (agreement.free_goods_ratio, agreement.free_goods_threshold)
    else {
        return;
    };
    if threshold == 0 {
        return;
    }
    for line in &invoice.lines {
        if matches!(classify_line(line), Tranche::Otc) {
            continue;
        }
        let qty = line.quantity.trunc().to_string().parse::<u32>().unwrap_or(0);
        if qty < threshold {
            continue;
        }
        let has_companion_free_line = invoice.lines.iter().any(|other| {
            other.cip13 == line.cip13
                && !std::ptr::eq(other, line)
                && (other.pu_after_remise.is_zero() || other.remise_pct >= dec!(100))
        });
        if !has_companion_free_line {
            let expected_count = qty / threshold;
            let value = round_half_up(Decimal::from(expected_count) * line.pu_ht, 2);
            anomalies.push(
                InvoiceAnomaly::new(
                    invoice.id,
                    AnomalyKind::MissingFreeGoods,
                    Severity::Opportunity,
                    format!(
                        "line '{}' (qty {qty}) crosses the free-goods threshold of {threshold} but no companion free units were found",
                        line.designation
                    ),
                )
                .with_amount(value)
                .with_action("request the missing free units from the laboratory"),
            );
        }
    }
}

fn check_vat_tranche_coherence(invoice: &Invoice, anomalies: &mut Vec<InvoiceAnomaly>) {
    for line in &invoice.lines {
        let Some(hint) = line.tranche_hint else {
            continue;
        };
        let computed = classify_line(line);
        if hint != computed {
            anomalies.push(InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::VatTrancheCoherence,
                Severity::Critical,
                format!(
                    "line '{}': ingestion tagged tranche {hint:?} but VAT rate {} and discount {}% classify as {computed:?}",
                    line.designation, line.taux_tva, line.remise_pct
                ),
            ));
        }
    }
}

fn check_line_arithmetic(invoice: &Invoice, anomalies: &mut Vec<InvoiceAnomaly>) {
    let hundred = Decimal::from(100);
    for line in &invoice.lines {
        let expected_after_remise =
            round_half_up(line.pu_ht * (hundred - line.remise_pct) / hundred, 2);
        if !amounts_close_tol(expected_after_remise, line.pu_after_remise, AMOUNT_TOLERANCE) {
            anomalies.push(InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::LineArithmetic,
                Severity::Critical,
                format!(
                    "line '{}': pu_ht*(1-remise_pct/100)={expected_after_remise} does not match pu_after_remise={}",
                    line.designation, line.pu_after_remise
                ),
            ));
        }

        let expected_montant_ht = round_half_up(line.pu_after_remise * line.quantity, 2);
        if !amounts_close_tol(expected_montant_ht, line.montant_ht, AMOUNT_TOLERANCE) {
            anomalies.push(InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::LineArithmetic,
                Severity::Critical,
                format!(
                    "line '{}': pu_after_remise*qty={expected_montant_ht} does not match montant_ht={}",
                    line.designation, line.montant_ht
                ),
            ));
        }

        if !amounts_close_tol(line.montant_brut(), line.pu_ht * line.quantity, AMOUNT_TOLERANCE) {
            anomalies.push(InvoiceAnomaly::new(
                invoice.id,
                AnomalyKind::LineArithmetic,
                Severity::Critical,
                format!("line '{}': pu_ht*qty does not match montant_brut", line.designation),
            ));
        }
    }
}

/// Diff the previous anomaly set against the freshly computed one, splitting
/// into what to keep (resolved anomalies, preserved for history) and what to
/// insert (the fresh, currently-unresolved set) — the idempotent
/// persistence policy shared by verification and EMAC reconciliation.
pub fn partition_resolved(
    previous: Vec<InvoiceAnomaly>,
    fresh: Vec<InvoiceAnomaly>,
) -> (Vec<InvoiceAnomaly>, Vec<InvoiceAnomaly>) {
    let to_keep: Vec<_> = previous.into_iter().filter(|a| a.resolu).collect();
    (to_keep, fresh)
}

/// Return a [`crate::core::VerifyError::CrossTenantAccess`] if `entity_tenant`
/// does not match `expected_tenant` — the crate's only defense against
/// cross-tenant data since it has no storage layer of its own to filter on.
pub fn ensure_same_tenant(
    expected_tenant: crate::core::TenantId,
    entity_tenant: crate::core::TenantId,
    entity_description: &str,
) -> Result<(), crate::core::VerifyError> {
    if expected_tenant != entity_tenant {
        return Err(crate::core::VerifyError::CrossTenantAccess(format!(
            "{entity_description} belongs to tenant {entity_tenant} not {expected_tenant}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        AgreementBuilder, AgreementConfig, AgreementStatus, FreeGoodsRatio, InvoiceBuilder,
        InvoiceLineBuilder, LaboratoryId, PaymentMethod, RateType, Stage, StagedStructure,
        TenantId, Tier, TrancheConfig,
    };
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn minimal_structure() -> StagedStructure {
        StagedStructure {
            stages: vec![Stage {
                stage_id: "s1".into(),
                label: "immediate".into(),
                order: 1,
                delay_months: 0,
                rate_type: RateType::Percentage,
                payment_method: PaymentMethod::InvoiceDeduction,
                conditions: vec![],
            }],
        }
    }

    fn minimal_config() -> AgreementConfig {
        let mut stages = BTreeMap::new();
        stages.insert(
            "s1".to_string(),
            crate::core::StageRate {
                rate: Some(dec!(0.10)),
                incremental_rate: None,
                cumulative_rate: None,
                condition_threshold: None,
            },
        );
        let tranche = TrancheConfig {
            max_rebate: dec!(1.0),
            stages,
        };
        AgreementConfig {
            tranche_a: tranche.clone(),
            tranche_b: tranche,
        }
    }

    fn agreement(tenant_id: TenantId, laboratory_id: LaboratoryId) -> LaboratoryAgreement {
        AgreementBuilder::new(
            tenant_id,
            laboratory_id,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            minimal_config(),
            minimal_structure(),
        )
        .statut(AgreementStatus::Active)
        .target_rates(dec!(2.7), dec!(10.0))
        .escompte(dec!(2.0), 30)
        .franco_threshold(dec!(500))
        .franco_frais_port(dec!(12.90))
        .tiers(vec![
            Tier {
                min: dec!(0),
                max: Some(dec!(10000)),
                rate: dec!(10.0),
                label: "palier 1".into(),
            },
            Tier {
                min: dec!(10000),
                max: None,
                rate: dec!(15.0),
                label: "palier 2".into(),
            },
        ])
        .free_goods(
            FreeGoodsRatio {
                paid_quantity: 10,
                free_quantity: 1,
            },
            10,
        )
        .build()
        .unwrap()
    }

    fn invoice(tenant_id: TenantId, laboratory_id: LaboratoryId, remise_pct: Decimal) -> Invoice {
        InvoiceBuilder::new(
            "FAC-100",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            tenant_id,
            laboratory_id,
        )
        .payment_delay_text("30 jours")
        .add_line(
            InvoiceLineBuilder::new("3401000000001", "Produit A", dec!(1), dec!(1000))
                .remise_pct(remise_pct)
                .taux_tva(dec!(2.10))
                .build(),
        )
        .build()
    }

    #[test]
    fn discount_rate_deviation_is_flagged_critical() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let agreement = agreement(tenant_id, laboratory_id);
        let invoice = invoice(tenant_id, laboratory_id, dec!(2.0));
        let anomalies = verify(&invoice, Some(&agreement), dec!(0));
        assert!(anomalies
            .iter()
            .any(|a| matches!(a.kind, AnomalyKind::DiscountRate) && a.severity == Severity::Critical));
    }

    #[test]
    fn matching_discount_rate_raises_nothing() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let agreement = agreement(tenant_id, laboratory_id);
        let invoice = invoice(tenant_id, laboratory_id, dec!(2.7));
        let anomalies = verify(&invoice, Some(&agreement), dec!(0));
        assert!(!anomalies
            .iter()
            .any(|a| matches!(a.kind, AnomalyKind::DiscountRate)));
    }

    #[test]
    fn escompte_opportunity_detected_within_delay() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let agreement = agreement(tenant_id, laboratory_id);
        let invoice = invoice(tenant_id, laboratory_id, dec!(2.7));
        let anomalies = verify(&invoice, Some(&agreement), dec!(0));
        let hit = anomalies
            .iter()
            .find(|a| matches!(a.kind, AnomalyKind::EscompteOpportunity))
            .expect("expected an escompte opportunity anomaly");
        assert_eq!(hit.montant_ecart, Some(dec!(19.46)));
    }

    #[test]
    fn no_agreement_still_runs_data_quality_checks() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let invoice = invoice(tenant_id, laboratory_id, dec!(2.7));
        let anomalies = verify(&invoice, None, dec!(0));
        assert!(anomalies.is_empty());
    }

    #[test]
    fn line_arithmetic_violation_is_flagged() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let mut invoice = invoice(tenant_id, laboratory_id, dec!(2.7));
        invoice.lines[0].montant_ht = dec!(1.00);
        let anomalies = verify(&invoice, None, dec!(0));
        assert!(anomalies
            .iter()
            .any(|a| matches!(a.kind, AnomalyKind::LineArithmetic)));
    }

    #[test]
    fn partition_resolved_keeps_only_resolved_anomalies() {
        let tenant_id = TenantId::new();
        let invoice_id = crate::core::InvoiceId::new();
        let mut resolved = InvoiceAnomaly::new(
            invoice_id,
            AnomalyKind::DiscountRate,
            Severity::Critical,
            "old",
        );
        resolved.resolu = true;
        let unresolved = InvoiceAnomaly::new(
            invoice_id,
            AnomalyKind::EscompteOpportunity,
            Severity::Opportunity,
            "also old, not resolved",
        );
        let fresh = vec![InvoiceAnomaly::new(
            invoice_id,
            AnomalyKind::LineArithmetic,
            Severity::Critical,
            "new",
        )];
        let (to_keep, to_insert) = partition_resolved(vec![resolved, unresolved], fresh);
        assert_eq!(to_keep.len(), 1);
        assert!(to_keep[0].resolu);
        assert_eq!(to_insert.len(), 1);
        let _ = tenant_id;
    }

    #[test]
    fn franco_threshold_anomaly_reports_the_vendor_frais_port_estimate() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let agreement = agreement(tenant_id, laboratory_id);
        // single line at 1000 * (1 - 2.7/100) = 973.00, above the franco_threshold of 500,
        // so build a small invoice instead to land below it.
        let invoice = InvoiceBuilder::new(
            "FAC-101",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            tenant_id,
            laboratory_id,
        )
        .add_line(
            InvoiceLineBuilder::new("3401000000002", "Produit B", dec!(1), dec!(100))
                .taux_tva(dec!(2.10))
                .build(),
        )
        .build();
        let anomalies = verify(&invoice, Some(&agreement), dec!(0));
        let hit = anomalies
            .iter()
            .find(|a| matches!(a.kind, AnomalyKind::FrancoThreshold))
            .expect("expected a franco threshold anomaly");
        // Reports the agreement's flat shipping-fee estimate, not the gap to threshold.
        assert_eq!(hit.montant_ecart, Some(dec!(12.90)));
    }

    #[test]
    fn missing_free_goods_expected_count_is_bare_quotient_not_scaled_by_free_quantity() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let agreement = AgreementBuilder::new(
            tenant_id,
            laboratory_id,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            minimal_config(),
            minimal_structure(),
        )
        .statut(AgreementStatus::Active)
        .free_goods(
            FreeGoodsRatio {
                paid_quantity: 10,
                free_quantity: 2,
            },
            10,
        )
        .build()
        .unwrap();
        let invoice = InvoiceBuilder::new(
            "FAC-102",
            NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            tenant_id,
            laboratory_id,
        )
        .add_line(
            InvoiceLineBuilder::new("3401000000003", "Produit C", dec!(20), dec!(50))
                .taux_tva(dec!(2.10))
                .build(),
        )
        .build();
        let anomalies = verify(&invoice, Some(&agreement), dec!(0));
        let hit = anomalies
            .iter()
            .find(|a| matches!(a.kind, AnomalyKind::MissingFreeGoods))
            .expect("expected a missing free goods anomaly");
        // qty 20 / threshold 10 = 2 expected free units, *not* 2 * free_quantity(2) = 4.
        assert_eq!(hit.montant_ecart, Some(dec!(100.00)));
    }

    #[test]
    fn ensure_same_tenant_rejects_mismatch() {
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        assert!(ensure_same_tenant(t1, t2, "invoice").is_err());
        assert!(ensure_same_tenant(t1, t1, "invoice").is_ok());
    }
}
