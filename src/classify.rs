//! Assign each invoice line to a reimbursement tranche.
//!
//! Classification depends only on the line's VAT rate and headline discount;
//! it performs no I/O and is idempotent — re-classifying an already
//! classified line returns the same tranche.

use crate::core::money::{vat_rate_eligible, TRANCHE_A_MAX_REMISE};
use crate::core::{InvoiceLine, Tranche};

/// Classify one line into tranche A, B, or OTC.
///
/// - VAT rate away from 2.10% (beyond the 0.01pp tolerance) -> [`Tranche::Otc`].
/// - VAT rate at 2.10% and `remise_pct <= 2.5` -> [`Tranche::A`].
/// - VAT rate at 2.10% and `remise_pct > 2.5` -> [`Tranche::B`].
pub fn classify_line(line: &InvoiceLine) -> Tranche {
    if !vat_rate_eligible(line.taux_tva) {
        return Tranche::Otc;
    }
    if line.remise_pct <= TRANCHE_A_MAX_REMISE {
        Tranche::A
    } else {
        Tranche::B
    }
}
