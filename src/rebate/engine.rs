//! Computes the immutable staged rebate schedule for one invoice.
//!
//! The central correctness property: each tranche's rate applies to its
//! *own* base. The engine must never collapse the invoice into one
//! dominant tranche and apply a single rate to the combined base — that
//! produces a wrong, inflated or deflated, total every time the invoice
//! mixes tranche A and B lines in anything but the template's exact ratio.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::Decimal;

use crate::classify::classify_line;
use crate::core::money::round_half_up;
use crate::core::{
    AgreementConfig, EntryStatus, Invoice, InvoiceRebateSchedule, LaboratoryAgreement,
    RateType, RebateEntry, RebateError, RebateType, ScheduleId, ScheduleStatus, Tranche,
    TrancheBreakdown,
};

use super::config;

/// Add `months` calendar months to `date`, clamping the day to the last
/// valid day of the resulting month (e.g. Jan 31 + 1 month -> Feb 28).
fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    let total_months = date.month0() as i64 + months as i64;
    let year = date.year() + (total_months / 12) as i32;
    let month = (total_months % 12) as u32 + 1;
    let last_day_of_month = |y: i32, m: u32| -> u32 {
        let next = if m == 12 {
            NaiveDate::from_ymd_opt(y + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(y, m + 1, 1)
        }
        .unwrap();
        next.pred_opt().unwrap().day()
    };
    let day = date.day().min(last_day_of_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).expect("computed year/month/day is always valid")
}

struct TrancheBase {
    base: Decimal,
    expected: Decimal,
}

/// Compute the staged rebate schedule for `invoice` under `agreement`.
///
/// `annual_cumulative` is the tenant-scoped yearly cumulative eligible
/// revenue for this laboratory at the time of computation — callers supply
/// it rather than this crate deriving it, since deriving it requires
/// summing other invoices the crate has no storage access to.
#[tracing::instrument(skip_all, fields(invoice_id = %invoice.id, agreement_id = %agreement.id))]
pub fn compute_schedule(
    invoice: &Invoice,
    agreement: &LaboratoryAgreement,
    annual_cumulative: Decimal,
) -> Result<InvoiceRebateSchedule, RebateError> {
    config::validate(&agreement.agreement_config, &agreement.structure)?;

    let mut base_a = Decimal::ZERO;
    let mut base_b = Decimal::ZERO;
    for line in &invoice.lines {
        match classify_line(line) {
            Tranche::A => base_a += line.montant_ht,
            Tranche::B => base_b += line.montant_ht,
            Tranche::Otc => {}
        }
    }
    let base_eligible = base_a + base_b;

    let mut tranche_a = TrancheBase {
        base: base_a,
        expected: Decimal::ZERO,
    };
    let mut tranche_b = TrancheBase {
        base: base_b,
        expected: Decimal::ZERO,
    };

    let mut ordered_stages: Vec<_> = agreement.structure.stages.iter().collect();
    ordered_stages.sort_by_key(|s| s.order);

    let mut entries = Vec::with_capacity(ordered_stages.len());
    let mut montant_prevu = Decimal::ZERO;

    for stage in ordered_stages {
        let rate_a_cfg = agreement
            .agreement_config
            .tranche_a
            .stages
            .get(&stage.stage_id)
            .expect("validated config guarantees this entry exists");
        let rate_b_cfg = agreement
            .agreement_config
            .tranche_b
            .stages
            .get(&stage.stage_id)
            .expect("validated config guarantees this entry exists");

        let rate_a = match stage.rate_type {
            RateType::Percentage => rate_a_cfg.rate,
            RateType::IncrementalPercentage | RateType::ConditionalPercentage => {
                rate_a_cfg.incremental_rate
            }
        }
        .expect("validated config guarantees this rate is present");
        let rate_b = match stage.rate_type {
            RateType::Percentage => rate_b_cfg.rate,
            RateType::IncrementalPercentage | RateType::ConditionalPercentage => {
                rate_b_cfg.incremental_rate
            }
        }
        .expect("validated config guarantees this rate is present");

        let amount_a = round_half_up(tranche_a.base * rate_a, 2);
        let amount_b = round_half_up(tranche_b.base * rate_b, 2);
        let amount = amount_a + amount_b;

        tranche_a.expected += amount_a;
        tranche_b.expected += amount_b;
        montant_prevu += amount;

        let due_date = add_months(invoice.invoice_date, stage.delay_months);

        let status = if stage.delay_months == 0 {
            EntryStatus::Received
        } else if matches!(stage.rate_type, RateType::ConditionalPercentage) {
            let threshold = rate_a_cfg
                .condition_threshold
                .into_iter()
                .chain(rate_b_cfg.condition_threshold)
                .fold(None, |acc: Option<Decimal>, t| {
                    Some(acc.map_or(t, |a| a.max(t)))
                });
            match threshold {
                Some(t) if annual_cumulative < t => EntryStatus::Conditional,
                _ => EntryStatus::Scheduled,
            }
        } else {
            EntryStatus::Scheduled
        };

        entries.push(RebateEntry {
            stage_id: stage.stage_id.clone(),
            due_date,
            amount,
            status,
        });
    }

    let taux_applique = if base_eligible > Decimal::ZERO {
        montant_prevu / base_eligible * Decimal::from(100)
    } else {
        Decimal::ZERO
    };

    let mut tranche_breakdown = BTreeMap::new();
    tranche_breakdown.insert(
        "A".to_string(),
        TrancheBreakdown {
            base: tranche_a.base,
            expected: tranche_a.expected,
        },
    );
    tranche_breakdown.insert(
        "B".to_string(),
        TrancheBreakdown {
            base: tranche_b.base,
            expected: tranche_b.expected,
        },
    );

    let schedule = InvoiceRebateSchedule {
        id: ScheduleId::new(),
        tenant_id: invoice.tenant_id,
        agreement_id: agreement.id,
        invoice_id: invoice.id,
        rebate_type: RebateType::Rfa,
        montant_base_ht: base_eligible,
        taux_applique,
        montant_prevu,
        montant_recu: None,
        ecart: None,
        applied_config: clone_config(&agreement.agreement_config),
        tranche_breakdown,
        rebate_entries: entries,
        status: ScheduleStatus::Forecast,
        invoice_date: invoice.invoice_date,
        invoice_amount: invoice.brut_ht,
        date_echeance: None,
        date_reception: None,
        agreement_version: agreement.version,
    };
    tracing::debug!(
        montant_prevu = %schedule.montant_prevu,
        base_eligible = %base_eligible,
        "computed staged rebate schedule"
    );
    Ok(schedule)
}

/// Deep-copy an [`AgreementConfig`] for a schedule's `applied_config`
/// snapshot — never alias the live agreement, which may be edited later.
fn clone_config(config: &AgreementConfig) -> AgreementConfig {
    config.clone()
}

/// Carry a manually-entered `montant_recu`/`date_reception` forward from an
/// older schedule onto a freshly recomputed one, so a recompute never
/// silently drops a receipt that was recorded by hand.
pub fn merge_received_amount(
    old: &InvoiceRebateSchedule,
    mut new: InvoiceRebateSchedule,
) -> InvoiceRebateSchedule {
    if new.montant_recu.is_none() {
        new.montant_recu = old.montant_recu;
        new.date_reception = old.date_reception;
        if let Some(recu) = new.montant_recu {
            new.ecart = Some(round_half_up(recu - new.montant_prevu, 2));
        }
    }
    new
}
