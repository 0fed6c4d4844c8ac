use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::error::RebateError;
use super::money::round_half_up;
use super::types::*;

/// Builder for assembling a normalized [`Invoice`] out of already-parsed lines.
///
/// ```
/// use remise::core::*;
/// use rust_decimal_macros::dec;
/// use chrono::NaiveDate;
///
/// let invoice = InvoiceBuilder::new(
///     "FAC-2026-001",
///     NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
///     TenantId::new(),
///     LaboratoryId::new(),
/// )
/// .add_line(
///     InvoiceLineBuilder::new("3401234567890", "Boite de 30 cp", dec!(10), dec!(4.50))
///         .remise_pct(dec!(2.0))
///         .taux_tva(dec!(2.10))
///         .build(),
/// )
/// .build();
/// ```
pub struct InvoiceBuilder {
    number: String,
    invoice_date: NaiveDate,
    tenant_id: TenantId,
    laboratory_id: LaboratoryId,
    lines: Vec<InvoiceLine>,
    payment_delay_text: Option<String>,
}

impl InvoiceBuilder {
    pub fn new(
        number: impl Into<String>,
        invoice_date: NaiveDate,
        tenant_id: TenantId,
        laboratory_id: LaboratoryId,
    ) -> Self {
        Self {
            number: number.into(),
            invoice_date,
            tenant_id,
            laboratory_id,
            lines: Vec::new(),
            payment_delay_text: None,
        }
    }

    pub fn add_line(mut self, line: InvoiceLine) -> Self {
        self.lines.push(line);
        self
    }

    pub fn payment_delay_text(mut self, text: impl Into<String>) -> Self {
        self.payment_delay_text = Some(text.into());
        self
    }

    /// Assemble the invoice, deriving the header totals from its lines.
    pub fn build(self) -> Invoice {
        let brut_ht: Decimal = self.lines.iter().map(|l| l.montant_brut()).sum();
        let net_ht: Decimal = self.lines.iter().map(|l| l.montant_ht).sum();
        let total_tva: Decimal = self
            .lines
            .iter()
            .map(|l| round_half_up(l.montant_ht * l.taux_tva / Decimal::from(100), 2))
            .sum();
        let ttc = round_half_up(net_ht + total_tva, 2);

        Invoice {
            id: InvoiceId::new(),
            tenant_id: self.tenant_id,
            laboratory_id: self.laboratory_id,
            number: self.number,
            invoice_date: self.invoice_date,
            lines: self.lines,
            brut_ht,
            net_ht,
            ttc,
            total_tva,
            payment_delay_text: self.payment_delay_text,
        }
    }
}

/// Builder for one [`InvoiceLine`].
pub struct InvoiceLineBuilder {
    cip13: String,
    designation: String,
    quantity: Decimal,
    pu_ht: Decimal,
    remise_pct: Decimal,
    taux_tva: Decimal,
    lot: Option<String>,
    tranche_hint: Option<Tranche>,
}

impl InvoiceLineBuilder {
    pub fn new(
        cip13: impl Into<String>,
        designation: impl Into<String>,
        quantity: Decimal,
        pu_ht: Decimal,
    ) -> Self {
        Self {
            cip13: cip13.into(),
            designation: designation.into(),
            quantity,
            pu_ht,
            remise_pct: Decimal::ZERO,
            taux_tva: Decimal::ZERO,
            lot: None,
            tranche_hint: None,
        }
    }

    pub fn remise_pct(mut self, remise_pct: Decimal) -> Self {
        self.remise_pct = remise_pct;
        self
    }

    pub fn taux_tva(mut self, taux_tva: Decimal) -> Self {
        self.taux_tva = taux_tva;
        self
    }

    pub fn lot(mut self, lot: impl Into<String>) -> Self {
        self.lot = Some(lot.into());
        self
    }

    pub fn tranche_hint(mut self, tranche_hint: Tranche) -> Self {
        self.tranche_hint = Some(tranche_hint);
        self
    }

    pub fn build(self) -> InvoiceLine {
        let hundred = Decimal::from(100);
        let pu_after_remise = round_half_up(self.pu_ht * (hundred - self.remise_pct) / hundred, 2);
        let montant_ht = round_half_up(pu_after_remise * self.quantity, 2);
        InvoiceLine {
            cip13: self.cip13,
            designation: self.designation,
            lot: self.lot,
            tranche_hint: self.tranche_hint,
            quantity: self.quantity,
            pu_ht: self.pu_ht,
            remise_pct: self.remise_pct,
            pu_after_remise,
            montant_ht,
            taux_tva: self.taux_tva,
        }
    }
}

/// Builder for a [`LaboratoryAgreement`], mainly useful to assemble fixtures
/// and to stage a config before handing it to [`crate::rebate::config::validate`].
pub struct AgreementBuilder {
    tenant_id: TenantId,
    laboratory_id: LaboratoryId,
    start_date: NaiveDate,
    agreement_config: AgreementConfig,
    structure: StagedStructure,
    statut: AgreementStatus,
    template_id: Option<TemplateId>,
    template_version: Option<u32>,
    tiers: Vec<Tier>,
    target_rate_a: Option<Decimal>,
    target_rate_b: Option<Decimal>,
    escompte_rate: Option<Decimal>,
    escompte_delay_days: Option<u32>,
    cooperation_rate: Option<Decimal>,
    free_goods_ratio: Option<FreeGoodsRatio>,
    free_goods_threshold: Option<u32>,
    franco_threshold: Option<Decimal>,
    franco_frais_port: Option<Decimal>,
}

impl AgreementBuilder {
    pub fn new(
        tenant_id: TenantId,
        laboratory_id: LaboratoryId,
        start_date: NaiveDate,
        agreement_config: AgreementConfig,
        structure: StagedStructure,
    ) -> Self {
        Self {
            tenant_id,
            laboratory_id,
            start_date,
            agreement_config,
            structure,
            statut: AgreementStatus::Draft,
            template_id: None,
            template_version: None,
            tiers: Vec::new(),
            target_rate_a: None,
            target_rate_b: None,
            escompte_rate: None,
            escompte_delay_days: None,
            cooperation_rate: None,
            free_goods_ratio: None,
            free_goods_threshold: None,
            franco_threshold: None,
            franco_frais_port: None,
        }
    }

    pub fn statut(mut self, statut: AgreementStatus) -> Self {
        self.statut = statut;
        self
    }

    pub fn template(mut self, id: TemplateId, version: u32) -> Self {
        self.template_id = Some(id);
        self.template_version = Some(version);
        self
    }

    pub fn tiers(mut self, tiers: Vec<Tier>) -> Self {
        self.tiers = tiers;
        self
    }

    pub fn target_rates(mut self, rate_a: Decimal, rate_b: Decimal) -> Self {
        self.target_rate_a = Some(rate_a);
        self.target_rate_b = Some(rate_b);
        self
    }

    pub fn escompte(mut self, rate: Decimal, delay_days: u32) -> Self {
        self.escompte_rate = Some(rate);
        self.escompte_delay_days = Some(delay_days);
        self
    }

    pub fn cooperation_rate(mut self, rate: Decimal) -> Self {
        self.cooperation_rate = Some(rate);
        self
    }

    pub fn free_goods(mut self, ratio: FreeGoodsRatio, threshold: u32) -> Self {
        self.free_goods_ratio = Some(ratio);
        self.free_goods_threshold = Some(threshold);
        self
    }

    pub fn franco_threshold(mut self, threshold: Decimal) -> Self {
        self.franco_threshold = Some(threshold);
        self
    }

    pub fn franco_frais_port(mut self, amount: Decimal) -> Self {
        self.franco_frais_port = Some(amount);
        self
    }

    /// Validates the staged `agreement_config` and assembles the agreement.
    pub fn build(self) -> Result<LaboratoryAgreement, RebateError> {
        crate::rebate::config::validate(&self.agreement_config, &self.structure)?;
        Ok(LaboratoryAgreement {
            id: AgreementId::new(),
            tenant_id: self.tenant_id,
            laboratory_id: self.laboratory_id,
            template_id: self.template_id,
            template_version: self.template_version,
            start_date: self.start_date,
            end_date: None,
            statut: self.statut,
            target_rate_a: self.target_rate_a,
            target_rate_b: self.target_rate_b,
            escompte_rate: self.escompte_rate,
            escompte_delay_days: self.escompte_delay_days,
            cooperation_rate: self.cooperation_rate,
            free_goods_ratio: self.free_goods_ratio,
            free_goods_threshold: self.free_goods_threshold,
            franco_threshold: self.franco_threshold,
            franco_frais_port: self.franco_frais_port,
            annual_revenue_objective: None,
            agreement_config: self.agreement_config,
            structure: self.structure,
            tiers: self.tiers,
            version: 1,
            previous_version_id: None,
            ca_cumulee: Decimal::ZERO,
            remise_cumulee: Decimal::ZERO,
            last_recompute_at: None,
        })
    }
}
