//! # remise
//!
//! Invoice verification and rebate-scheduling engine for pharmaceutical
//! wholesale commerce: classifies invoice lines into reimbursement
//! tranches, checks invoices against negotiated laboratory agreements,
//! computes the staged RFA payment calendar each invoice generates, and
//! reconciles laboratories' monthly EMAC statements against both.
//!
//! All monetary values use [`rust_decimal::Decimal`] — never floating
//! point. The crate is synchronous, pure, and performs no I/O: callers
//! supply already-parsed invoices and already-loaded agreements and own
//! persistence, transport, and document parsing around these calls.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use remise::core::*;
//! use remise::{classify, verify};
//! use rust_decimal_macros::dec;
//!
//! let tenant_id = TenantId::new();
//! let laboratory_id = LaboratoryId::new();
//!
//! let invoice = InvoiceBuilder::new(
//!     "FAC-2026-001",
//!     NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
//!     tenant_id,
//!     laboratory_id,
//! )
//! .add_line(
//!     InvoiceLineBuilder::new("3401234567890", "Boite de 30 cp", dec!(10), dec!(4.50))
//!         .remise_pct(dec!(2.0))
//!         .taux_tva(dec!(2.10))
//!         .build(),
//! )
//! .build();
//!
//! assert_eq!(classify::classify_line(&invoice.lines[0]), Tranche::A);
//! assert!(verify::verify(&invoice, None, dec!(0)).is_empty());
//! ```
//!
//! ## Modules
//!
//! | Module | Responsibility |
//! |--------|-----------------|
//! | [`core`] | Domain types, monetary arithmetic, error taxonomy |
//! | [`classify`] | Line Classifier — tranche A/B/OTC assignment |
//! | [`verify`] | Invoice Verifier — seven compliance checks |
//! | [`rebate`] | Rebate Engine and Agreement Versioning |
//! | [`emac`] | EMAC Reconciler — three-way crosscheck and missing-EMAC scan |

pub mod classify;
pub mod core;
pub mod emac;
pub mod rebate;
pub mod verify;

pub use crate::core::*;
