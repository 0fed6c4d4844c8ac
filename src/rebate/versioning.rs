//! Copy-on-write evolution of agreements: new versions, activation under
//! the single-active-agreement invariant, and history traversal.
//!
//! Every operation here is pure — it returns the rows and audit entries a
//! caller should write inside one transaction, never performs the write
//! itself.

use serde_json::json;

use crate::core::{
    AgreementAuditLog, AgreementStatus, LaboratoryAgreement, UserId, VersioningError,
};

/// The result of bumping an agreement to a new version: the archived old
/// row, the new draft row, and the audit entry describing the change.
pub struct NewVersion {
    pub archived: LaboratoryAgreement,
    pub draft: LaboratoryAgreement,
    pub audit_entry: AgreementAuditLog,
}

/// Duplicate `agreement` into a new draft version, archiving the original.
///
/// `apply_changes` mutates the cloned draft in place (e.g. updating target
/// rates or the config) before it is returned; pass a no-op closure to bump
/// the version with no field changes.
pub fn create_new_version(
    agreement: &LaboratoryAgreement,
    apply_changes: impl FnOnce(&mut LaboratoryAgreement),
    user_id: UserId,
) -> NewVersion {
    let mut archived = agreement.clone();
    archived.statut = AgreementStatus::Archived;

    let mut draft = agreement.clone();
    draft.id = crate::core::AgreementId::new();
    draft.previous_version_id = Some(agreement.id);
    draft.version = agreement.version + 1;
    draft.statut = AgreementStatus::Draft;
    apply_changes(&mut draft);

    let audit_entry = AgreementAuditLog {
        agreement_id: draft.id,
        user_id,
        action: "version_bump".to_string(),
        ancien_etat: json!({ "agreement_id": agreement.id.to_string(), "version": agreement.version }),
        nouvel_etat: json!({ "agreement_id": draft.id.to_string(), "version": draft.version }),
        description: format!(
            "created version {} from version {}",
            draft.version, agreement.version
        ),
    };

    NewVersion {
        archived,
        draft,
        audit_entry,
    }
}

/// The result of activating an agreement: the agreement itself transitioning
/// to `Active`, every sibling that must transition to `Suspended` to
/// preserve the single-active-agreement invariant, and one audit entry per
/// transitioned row.
pub struct Activation {
    pub activated: LaboratoryAgreement,
    pub suspended: Vec<LaboratoryAgreement>,
    pub audit_entries: Vec<AgreementAuditLog>,
}

/// Activate `agreement`, suspending every other active agreement found in
/// `siblings` for the same (tenant, laboratory) pair.
///
/// `siblings` must be the full set of agreements the caller holds for that
/// pair (excluding `agreement` itself) — this function cannot discover
/// siblings on its own since it has no storage access.
#[tracing::instrument(skip_all, fields(agreement_id = %agreement.id, sibling_count = siblings.len()))]
pub fn activate(
    agreement: &LaboratoryAgreement,
    siblings: &[LaboratoryAgreement],
    user_id: UserId,
) -> Result<Activation, VersioningError> {
    for sibling in siblings {
        if sibling.tenant_id != agreement.tenant_id {
            return Err(VersioningError::CrossTenantAccess(format!(
                "sibling agreement {} belongs to a different tenant than {}",
                sibling.id, agreement.id
            )));
        }
        if sibling.laboratory_id != agreement.laboratory_id {
            return Err(VersioningError::InvariantViolation(format!(
                "sibling agreement {} is for a different laboratory than {}",
                sibling.id, agreement.id
            )));
        }
    }

    let mut activated = agreement.clone();
    activated.statut = AgreementStatus::Active;

    let mut suspended = Vec::new();
    let mut audit_entries = vec![AgreementAuditLog {
        agreement_id: activated.id,
        user_id,
        action: "activate".to_string(),
        ancien_etat: json!({ "statut": format!("{:?}", agreement.statut) }),
        nouvel_etat: json!({ "statut": "active" }),
        description: format!("activated agreement {}", activated.id),
    }];

    for sibling in siblings {
        if sibling.statut == AgreementStatus::Active {
            let mut suspended_sibling = sibling.clone();
            suspended_sibling.statut = AgreementStatus::Suspended;
            audit_entries.push(AgreementAuditLog {
                agreement_id: suspended_sibling.id,
                user_id,
                action: "suspend".to_string(),
                ancien_etat: json!({ "statut": "active" }),
                nouvel_etat: json!({ "statut": "suspended" }),
                description: format!(
                    "suspended in favor of newly activated agreement {}",
                    activated.id
                ),
            });
            suspended.push(suspended_sibling);
        }
    }

    Ok(Activation {
        activated,
        suspended,
        audit_entries,
    })
}

/// Follow `previous_version_id` back to the root, given the full set of
/// versions the caller has already loaded. Returned oldest-first.
pub fn history(
    agreement: &LaboratoryAgreement,
    all_versions: &[LaboratoryAgreement],
) -> Vec<LaboratoryAgreement> {
    let mut chain = vec![agreement.clone()];
    let mut current = agreement.clone();
    while let Some(previous_id) = current.previous_version_id {
        match all_versions.iter().find(|a| a.id == previous_id) {
            Some(previous) => {
                chain.push(previous.clone());
                current = previous.clone();
            }
            None => break,
        }
    }
    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AgreementConfig, LaboratoryId, StagedStructure, TenantId, TrancheConfig};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn blank_agreement(tenant_id: TenantId, laboratory_id: LaboratoryId) -> LaboratoryAgreement {
        let empty_tranche = TrancheConfig {
            max_rebate: rust_decimal::Decimal::ZERO,
            stages: BTreeMap::new(),
        };
        LaboratoryAgreement {
            id: crate::core::AgreementId::new(),
            tenant_id,
            laboratory_id,
            template_id: None,
            template_version: None,
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            end_date: None,
            statut: AgreementStatus::Active,
            target_rate_a: None,
            target_rate_b: None,
            escompte_rate: None,
            escompte_delay_days: None,
            cooperation_rate: None,
            free_goods_ratio: None,
            free_goods_threshold: None,
            franco_threshold: None,
            annual_revenue_objective: None,
            agreement_config: AgreementConfig {
                tranche_a: empty_tranche.clone(),
                tranche_b: empty_tranche,
            },
            structure: StagedStructure { stages: vec![] },
            tiers: vec![],
            version: 1,
            previous_version_id: None,
            ca_cumulee: rust_decimal::Decimal::ZERO,
            remise_cumulee: rust_decimal::Decimal::ZERO,
            last_recompute_at: None,
        }
    }

    #[test]
    fn activating_suspends_the_previously_active_sibling() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let a1 = blank_agreement(tenant_id, laboratory_id);
        let mut a2 = blank_agreement(tenant_id, laboratory_id);
        a2.statut = AgreementStatus::Draft;

        let result = activate(&a2, &[a1.clone()], UserId::new()).unwrap();
        assert_eq!(result.activated.statut, AgreementStatus::Active);
        assert_eq!(result.suspended.len(), 1);
        assert_eq!(result.suspended[0].id, a1.id);
        assert_eq!(result.suspended[0].statut, AgreementStatus::Suspended);
        assert_eq!(result.audit_entries.len(), 2);
    }

    #[test]
    fn activating_rejects_cross_tenant_siblings() {
        let a1 = blank_agreement(TenantId::new(), LaboratoryId::new());
        let a2 = blank_agreement(TenantId::new(), a1.laboratory_id);
        assert!(matches!(
            activate(&a2, &[a1], UserId::new()),
            Err(VersioningError::CrossTenantAccess(_))
        ));
    }

    #[test]
    fn create_new_version_archives_the_old_row() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let original = blank_agreement(tenant_id, laboratory_id);
        let result = create_new_version(&original, |_| {}, UserId::new());
        assert_eq!(result.archived.statut, AgreementStatus::Archived);
        assert_eq!(result.draft.statut, AgreementStatus::Draft);
        assert_eq!(result.draft.previous_version_id, Some(original.id));
        assert_eq!(result.draft.version, 2);
    }

    #[test]
    fn history_follows_the_chain_oldest_first() {
        let tenant_id = TenantId::new();
        let laboratory_id = LaboratoryId::new();
        let v1 = blank_agreement(tenant_id, laboratory_id);
        let bump = create_new_version(&v1, |_| {}, UserId::new());
        let v2 = bump.draft;

        let chain = history(&v2, &[v1.clone(), v2.clone()]);
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].id, v1.id);
        assert_eq!(chain[1].id, v2.id);
    }
}
