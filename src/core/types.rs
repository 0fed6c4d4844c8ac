//! Domain model shared by every component: tenants, agreements, invoices,
//! rebate schedules, and the anomaly/EMAC vocabulary.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(TenantId);
newtype_id!(LaboratoryId);
newtype_id!(AgreementId);
newtype_id!(TemplateId);
newtype_id!(InvoiceId);
newtype_id!(ScheduleId);
newtype_id!(EmacId);
newtype_id!(UserId);

/// A classification tranche assigned to an invoice line (component A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tranche {
    /// Reimbursable, low headline discount (`remise_pct <= 2.5`).
    A,
    /// Reimbursable, standard headline discount.
    B,
    /// Not reimbursable (VAT rate other than 2.10%).
    Otc,
}

/// One line of an imported vendor invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceLine {
    /// 13-digit pharmaceutical product code (`^(34|36)\d{11}$`).
    pub cip13: String,
    pub designation: String,
    pub lot: Option<String>,
    pub quantity: Decimal,
    pub pu_ht: Decimal,
    pub remise_pct: Decimal,
    pub pu_after_remise: Decimal,
    pub montant_ht: Decimal,
    pub taux_tva: Decimal,
    /// Tranche tag assigned by the ingestion pipeline, if it assigns one
    /// independently of [`crate::classify::classify_line`]. Used by the
    /// VAT/tranche coherence check to catch ingestion-side drift.
    pub tranche_hint: Option<Tranche>,
}

impl InvoiceLine {
    /// `pu_ht * quantity`, rounded to 2dp — the line's gross amount before discount.
    pub fn montant_brut(&self) -> Decimal {
        crate::core::money::round_half_up(self.pu_ht * self.quantity, 2)
    }

    /// `montant_brut - montant_ht`, rounded to 2dp.
    pub fn montant_remise(&self) -> Decimal {
        crate::core::money::round_half_up(self.montant_brut() - self.montant_ht, 2)
    }
}

/// An imported vendor invoice with its lines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub tenant_id: TenantId,
    pub laboratory_id: LaboratoryId,
    pub number: String,
    pub invoice_date: NaiveDate,
    pub lines: Vec<InvoiceLine>,
    pub brut_ht: Decimal,
    pub net_ht: Decimal,
    pub ttc: Decimal,
    pub total_tva: Decimal,
    /// Free-text payment delay as captured from the document (e.g. "30 jours").
    pub payment_delay_text: Option<String>,
}

impl Invoice {
    /// Parse a leading integer out of `payment_delay_text`, if any
    /// (e.g. "30 jours" -> `Some(30)`).
    pub fn payment_delay_days(&self) -> Option<u32> {
        self.payment_delay_text.as_deref().and_then(|text| {
            text.split_whitespace().find_map(|tok| {
                tok.chars()
                    .take_while(|c| c.is_ascii_digit())
                    .collect::<String>()
                    .parse::<u32>()
                    .ok()
            })
        })
    }
}

/// RFA-family commercial advantage kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebateType {
    Rfa,
    Escompte,
    Cooperation,
    Gratuite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Semiannual,
    Annual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateScope {
    System,
    Group,
    Pharmacy,
}

/// One revenue bracket of a tiered rate grid (RFA progression, §4.B check 4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub min: Decimal,
    /// `None` means this is the open-ended top tier.
    pub max: Option<Decimal>,
    /// Percent value, e.g. `12.5` for 12.5%.
    pub rate: Decimal,
    pub label: String,
}

/// A reusable vendor-family rebate grid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebateTemplate {
    pub id: TemplateId,
    pub tenant_id: TenantId,
    pub name: String,
    pub laboratory_name: String,
    pub rebate_type: RebateType,
    pub frequency: Frequency,
    pub tiers: Vec<Tier>,
    pub structure: StagedStructure,
    pub escompte_rate: Option<Decimal>,
    pub cooperation_rate: Option<Decimal>,
    pub free_goods_ratio: Option<FreeGoodsRatio>,
    pub version: u32,
    pub scope: TemplateScope,
}

/// An "N+M" free-goods ratio (e.g. "10+1": buy 10 get 1 free).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FreeGoodsRatio {
    pub paid_quantity: u32,
    pub free_quantity: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateType {
    Percentage,
    IncrementalPercentage,
    ConditionalPercentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    InvoiceDeduction,
    EmacTransfer,
    YearEndTransfer,
}

/// Operators used by a stage's trigger conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    GreaterOrEqual,
    Greater,
    Less,
    LessOrEqual,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCondition {
    pub kind: String,
    pub operator: ConditionOperator,
    pub threshold_field: String,
    pub unit: String,
}

/// One stage of the rebate payment calendar (e.g. "immediate", "month 3", "year end").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stage {
    pub stage_id: String,
    pub label: String,
    pub order: u32,
    pub delay_months: u32,
    pub rate_type: RateType,
    pub payment_method: PaymentMethod,
    pub conditions: Vec<StageCondition>,
}

/// The ordered stage catalog carried by a template, shared by every
/// agreement derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedStructure {
    pub stages: Vec<Stage>,
}

/// A single stage's rate for one tranche, as configured on an agreement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRate {
    /// Fraction, e.g. `0.10` for 10% — mirrors the template schema, unlike
    /// every other percentage in this crate which is a percent value.
    pub rate: Option<Decimal>,
    pub incremental_rate: Option<Decimal>,
    pub cumulative_rate: Option<Decimal>,
    pub condition_threshold: Option<Decimal>,
}

/// Per-tranche configuration: a cap and one [`StageRate`] per stage id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheConfig {
    pub max_rebate: Decimal,
    pub stages: std::collections::BTreeMap<String, StageRate>,
}

/// The concrete, agreement-level rate table (`agreement_config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementConfig {
    pub tranche_a: TrancheConfig,
    pub tranche_b: TrancheConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    Draft,
    Active,
    Suspended,
    Expired,
    Archived,
}

/// The concrete contract between one tenant and one laboratory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaboratoryAgreement {
    pub id: AgreementId,
    pub tenant_id: TenantId,
    pub laboratory_id: LaboratoryId,
    pub template_id: Option<TemplateId>,
    pub template_version: Option<u32>,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
    pub statut: AgreementStatus,
    pub target_rate_a: Option<Decimal>,
    pub target_rate_b: Option<Decimal>,
    pub escompte_rate: Option<Decimal>,
    pub escompte_delay_days: Option<u32>,
    pub cooperation_rate: Option<Decimal>,
    pub free_goods_ratio: Option<FreeGoodsRatio>,
    pub free_goods_threshold: Option<u32>,
    pub franco_threshold: Option<Decimal>,
    /// Vendor's flat shipping-fee estimate charged on invoices below
    /// `franco_threshold` — distinct from the threshold itself, this is the
    /// amount [`crate::verify::verify`]'s franco check reports.
    pub franco_frais_port: Option<Decimal>,
    pub annual_revenue_objective: Option<Decimal>,
    pub agreement_config: AgreementConfig,
    pub structure: StagedStructure,
    pub tiers: Vec<Tier>,
    pub version: u32,
    pub previous_version_id: Option<AgreementId>,
    pub ca_cumulee: Decimal,
    pub remise_cumulee: Decimal,
    pub last_recompute_at: Option<NaiveDate>,
}

/// Per-tranche eligible base and applied rate recorded on a computed schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrancheBreakdown {
    pub base: Decimal,
    pub expected: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Received,
    Scheduled,
    Conditional,
}

/// One row of the payment calendar a schedule carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebateEntry {
    pub stage_id: String,
    pub due_date: NaiveDate,
    pub amount: Decimal,
    pub status: EntryStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleStatus {
    Forecast,
    Issued,
    Received,
    Discrepancy,
    Cancelled,
}

/// The immutable, computed rebate calendar for one invoice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceRebateSchedule {
    pub id: ScheduleId,
    pub tenant_id: TenantId,
    pub agreement_id: AgreementId,
    pub invoice_id: InvoiceId,
    pub rebate_type: RebateType,
    pub montant_base_ht: Decimal,
    pub taux_applique: Decimal,
    pub montant_prevu: Decimal,
    pub montant_recu: Option<Decimal>,
    pub ecart: Option<Decimal>,
    pub applied_config: AgreementConfig,
    pub tranche_breakdown: std::collections::BTreeMap<String, TrancheBreakdown>,
    pub rebate_entries: Vec<RebateEntry>,
    pub status: ScheduleStatus,
    pub invoice_date: NaiveDate,
    pub invoice_amount: Decimal,
    pub date_echeance: Option<NaiveDate>,
    pub date_reception: Option<NaiveDate>,
    pub agreement_version: u32,
}

/// An append-only record of an agreement mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgreementAuditLog {
    pub agreement_id: AgreementId,
    pub user_id: UserId,
    pub action: String,
    pub ancien_etat: serde_json::Value,
    pub nouvel_etat: serde_json::Value,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Opportunity,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    DiscountRate,
    EscompteOpportunity,
    FrancoThreshold,
    RfaProgression,
    MissingFreeGoods,
    VatTrancheCoherence,
    LineArithmetic,
}

/// One finding raised by the invoice verifier (component B).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceAnomaly {
    pub invoice_id: InvoiceId,
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    pub montant_ecart: Option<Decimal>,
    pub action_suggeree: Option<String>,
    pub resolu: bool,
    pub resolution_note: Option<String>,
}

impl InvoiceAnomaly {
    pub(crate) fn new(
        invoice_id: InvoiceId,
        kind: AnomalyKind,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            invoice_id,
            kind,
            severity,
            description: description.into(),
            montant_ecart: None,
            action_suggeree: None,
            resolu: false,
            resolution_note: None,
        }
    }

    pub(crate) fn with_amount(mut self, amount: Decimal) -> Self {
        self.montant_ecart = Some(amount);
        self
    }

    pub(crate) fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action_suggeree = Some(action.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmacAnomalyKind {
    CaDeviation,
    NoInvoicesFound,
    RfaDeviation,
    CooperationManualReview,
    EscompteOpportunity,
    InternalCoherence,
}

/// One finding raised by the EMAC reconciler (component E).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmacAnomaly {
    pub emac_id: EmacId,
    pub kind: EmacAnomalyKind,
    pub severity: Severity,
    pub description: String,
    pub montant_ecart: Option<Decimal>,
    pub resolu: bool,
    pub resolution_note: Option<String>,
}

impl EmacAnomaly {
    pub(crate) fn new(
        emac_id: EmacId,
        kind: EmacAnomalyKind,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            emac_id,
            kind,
            severity,
            description: description.into(),
            montant_ecart: None,
            resolu: false,
            resolution_note: None,
        }
    }

    pub(crate) fn with_amount(mut self, amount: Decimal) -> Self {
        self.montant_ecart = Some(amount);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmacStatus {
    NonVerifie,
    Conforme,
    EcartDetecte,
    Anomalie,
}

/// A vendor-declared monthly statement of commercial advantages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Emac {
    pub id: EmacId,
    pub tenant_id: TenantId,
    pub laboratory_id: LaboratoryId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub declared_ca: Decimal,
    pub declared_rfa: Decimal,
    pub declared_cop: Decimal,
    pub declared_differed: Decimal,
    pub other_advantages: Decimal,
    pub total_declared_advantages: Decimal,
    pub amount_paid: Decimal,
    pub remaining_balance: Decimal,
    pub statut: EmacStatus,
}

/// Result of reconciling an [`Emac`] (component E): recomputed aggregates
/// plus the anomalies found.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmacReconciliation {
    pub ca_reel: Decimal,
    pub nb_invoices_matched: u32,
    pub ecart_ca: Decimal,
    pub ecart_ca_pct: Decimal,
    pub rfa_attendue_calculee: Decimal,
    pub ecart_rfa: Decimal,
    pub anomalies: Vec<EmacAnomaly>,
    pub statut: EmacStatus,
    pub montant_recouvrable: Decimal,
}

/// A month/laboratory combination that has invoices but no covering EMAC.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingEmac {
    pub laboratory_id: LaboratoryId,
    pub laboratory_name: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub invoice_count: u32,
    pub ca: Decimal,
}
