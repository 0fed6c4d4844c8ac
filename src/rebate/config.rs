//! Validation of the staged rate table (`agreement_config`) before the
//! engine is allowed to compute against it.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use crate::core::{AgreementConfig, RateType, RebateError, StagedStructure, TrancheConfig};

const CUMULATIVE_TOLERANCE: Decimal = dec!(0.000001);

/// Validate one tranche's stage table against the structure's stage catalog.
fn validate_tranche(
    label: &str,
    tranche: &TrancheConfig,
    structure: &StagedStructure,
) -> Result<(), RebateError> {
    if tranche.max_rebate < Decimal::ZERO {
        return Err(RebateError::InvalidConfig(format!(
            "tranche {label}: max_rebate must not be negative"
        )));
    }

    let mut cumulative = Decimal::ZERO;
    for stage in &structure.stages {
        let rate = tranche.stages.get(&stage.stage_id).ok_or_else(|| {
            RebateError::InvalidConfig(format!(
                "tranche {label}: missing configuration for stage '{}'",
                stage.stage_id
            ))
        })?;

        let effective_rate = match stage.rate_type {
            RateType::Percentage => rate.rate,
            RateType::IncrementalPercentage | RateType::ConditionalPercentage => {
                rate.incremental_rate
            }
        }
        .ok_or_else(|| {
            RebateError::InvalidConfig(format!(
                "tranche {label}, stage '{}': missing rate for rate_type {:?}",
                stage.stage_id, stage.rate_type
            ))
        })?;

        if effective_rate < Decimal::ZERO || effective_rate > tranche.max_rebate {
            return Err(RebateError::InvalidConfig(format!(
                "tranche {label}, stage '{}': rate {effective_rate} outside [0, {}]",
                stage.stage_id, tranche.max_rebate
            )));
        }

        if matches!(
            stage.rate_type,
            RateType::IncrementalPercentage | RateType::ConditionalPercentage
        ) {
            cumulative += effective_rate;
            if let Some(declared_cumulative) = rate.cumulative_rate {
                if (declared_cumulative - cumulative).abs() > CUMULATIVE_TOLERANCE {
                    return Err(RebateError::InvalidConfig(format!(
                        "tranche {label}, stage '{}': declared cumulative_rate {declared_cumulative} does not match running sum {cumulative}",
                        stage.stage_id
                    )));
                }
            }
        }

        if matches!(stage.rate_type, RateType::ConditionalPercentage) && rate.condition_threshold.is_none()
        {
            return Err(RebateError::InvalidConfig(format!(
                "tranche {label}, stage '{}': conditional stage requires condition_threshold",
                stage.stage_id
            )));
        }
    }

    Ok(())
}

/// Validate an [`AgreementConfig`] against its structure's stage catalog.
///
/// Checked: every stage in `structure` has a matching entry in both tranches,
/// every rate lies in `[0, max_rebate]`, and declared `cumulative_rate`
/// values agree with the running sum of `incremental_rate` within `1e-6`.
pub fn validate(config: &AgreementConfig, structure: &StagedStructure) -> Result<(), RebateError> {
    if structure.stages.is_empty() {
        return Err(RebateError::InvalidConfig(
            "structure must declare at least one stage".into(),
        ));
    }
    validate_tranche("A", &config.tranche_a, structure)?;
    validate_tranche("B", &config.tranche_b, structure)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PaymentMethod, Stage, StageRate};
    use std::collections::BTreeMap;

    fn structure() -> StagedStructure {
        StagedStructure {
            stages: vec![
                Stage {
                    stage_id: "immediate".into(),
                    label: "Immediate".into(),
                    order: 1,
                    delay_months: 0,
                    rate_type: RateType::Percentage,
                    payment_method: PaymentMethod::InvoiceDeduction,
                    conditions: vec![],
                },
                Stage {
                    stage_id: "q2".into(),
                    label: "Q2".into(),
                    order: 2,
                    delay_months: 3,
                    rate_type: RateType::IncrementalPercentage,
                    payment_method: PaymentMethod::EmacTransfer,
                    conditions: vec![],
                },
            ],
        }
    }

    fn tranche(immediate: Decimal, q2_incremental: Decimal, q2_cumulative: Decimal) -> TrancheConfig {
        let mut stages = BTreeMap::new();
        stages.insert(
            "immediate".to_string(),
            StageRate {
                rate: Some(immediate),
                incremental_rate: None,
                cumulative_rate: None,
                condition_threshold: None,
            },
        );
        stages.insert(
            "q2".to_string(),
            StageRate {
                rate: None,
                incremental_rate: Some(q2_incremental),
                cumulative_rate: Some(q2_cumulative),
                condition_threshold: None,
            },
        );
        TrancheConfig {
            max_rebate: dec!(1.0),
            stages,
        }
    }

    #[test]
    fn valid_config_passes() {
        let structure = structure();
        let config = AgreementConfig {
            tranche_a: tranche(dec!(0.10), dec!(0.10), dec!(0.10)),
            tranche_b: tranche(dec!(0.14), dec!(0.18), dec!(0.18)),
        };
        assert!(validate(&config, &structure).is_ok());
    }

    #[test]
    fn missing_stage_is_rejected() {
        let structure = structure();
        let mut stages = BTreeMap::new();
        stages.insert(
            "immediate".to_string(),
            StageRate {
                rate: Some(dec!(0.10)),
                incremental_rate: None,
                cumulative_rate: None,
                condition_threshold: None,
            },
        );
        let config = AgreementConfig {
            tranche_a: TrancheConfig {
                max_rebate: dec!(1.0),
                stages,
            },
            tranche_b: tranche(dec!(0.14), dec!(0.18), dec!(0.18)),
        };
        assert!(matches!(
            validate(&config, &structure),
            Err(RebateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cumulative_mismatch_is_rejected() {
        let structure = structure();
        let config = AgreementConfig {
            tranche_a: tranche(dec!(0.10), dec!(0.10), dec!(0.25)),
            tranche_b: tranche(dec!(0.14), dec!(0.18), dec!(0.18)),
        };
        assert!(matches!(
            validate(&config, &structure),
            Err(RebateError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rate_above_max_rebate_is_rejected() {
        let structure = structure();
        let config = AgreementConfig {
            tranche_a: tranche(dec!(1.5), dec!(0.10), dec!(0.10)),
            tranche_b: tranche(dec!(0.14), dec!(0.18), dec!(0.18)),
        };
        assert!(matches!(
            validate(&config, &structure),
            Err(RebateError::InvalidConfig(_))
        ));
    }
}
