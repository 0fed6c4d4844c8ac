//! Decimal arithmetic and tolerances shared by every component.
//!
//! All monetary values in this crate are [`Decimal`]; floating point never
//! appears on a money-bearing path. Rounding is half-up (away from zero) to
//! two decimal places at every boundary, matching how commercial rebate
//! amounts are conventionally quoted.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

/// Two monetary amounts are considered equal within this absolute tolerance.
pub const AMOUNT_TOLERANCE: Decimal = dec!(0.02);

/// Two percentage rates are considered equal within this tolerance (in points).
pub const RATE_TOLERANCE: Decimal = dec!(0.5);

/// Tolerance for comparing a line's declared VAT rate against [`TVA_ELIGIBLE`]
/// when classifying a line into tranche A/B/OTC — much tighter than
/// [`RATE_TOLERANCE`], since this comparison decides reimbursability rather
/// than flagging a commercial deviation.
pub const VAT_TOLERANCE: Decimal = dec!(0.01);

/// VAT rate (in percent) that marks a line as reimbursable (pharmacy tranche A/B).
pub const TVA_ELIGIBLE: Decimal = dec!(2.10);

/// Inclusive ceiling on `remise_pct` for a reimbursable line to fall in tranche A.
pub const TRANCHE_A_MAX_REMISE: Decimal = dec!(2.5);

/// Round to `dp` decimal places, half away from zero.
pub fn round_half_up(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// Two amounts are "the same" if their absolute difference is within
/// [`AMOUNT_TOLERANCE`] (defaults to the 0.02 currency-unit tolerance used
/// throughout invoice verification).
pub fn amounts_close(a: Decimal, b: Decimal) -> bool {
    amounts_close_tol(a, b, AMOUNT_TOLERANCE)
}

/// Like [`amounts_close`] but with a caller-supplied tolerance.
pub fn amounts_close_tol(a: Decimal, b: Decimal, tolerance: Decimal) -> bool {
    (a - b).abs() <= tolerance
}

/// Two rates (expressed as percent values, e.g. `10.0` for 10%) are "the
/// same" within [`RATE_TOLERANCE`] percentage points.
pub fn rates_close(a: Decimal, b: Decimal) -> bool {
    (a - b).abs() <= RATE_TOLERANCE
}

/// Is `taux_tva` close enough to [`TVA_ELIGIBLE`] to mark a line reimbursable?
/// Uses [`VAT_TOLERANCE`], not [`RATE_TOLERANCE`] — this decides eligibility,
/// not a commercial deviation, and tolerates only rounding noise from upstream
/// parsing, not real rate differences.
pub fn vat_rate_eligible(taux_tva: Decimal) -> bool {
    (taux_tva - TVA_ELIGIBLE).abs() <= VAT_TOLERANCE
}
