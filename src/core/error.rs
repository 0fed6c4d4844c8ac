use thiserror::Error;

/// Errors raised while checking an invoice against an agreement (component B).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VerifyError {
    /// An invoice or agreement row belongs to a different tenant than the caller.
    #[error("cross-tenant access: {0}")]
    CrossTenantAccess(String),
}

/// Errors raised while computing a staged rebate schedule (component C).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RebateError {
    /// No active agreement exists for the (tenant, laboratory) pair.
    ///
    /// Not a failure in itself — callers should treat this as "nothing to schedule",
    /// not propagate it as a user-facing error.
    #[error("no active agreement for this laboratory")]
    NoActiveAgreement,

    /// `agreement_config` failed validation (§4.C malformed-config rules).
    #[error("invalid agreement configuration: {0}")]
    InvalidConfig(String),

    /// The invoice or agreement changed while a recompute was in flight.
    #[error("stale read, retry the computation")]
    StaleReadRetry,
}

/// Errors raised while evolving an agreement (component D).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VersioningError {
    /// Activating this agreement would leave more than one active agreement
    /// for the same (tenant, laboratory) pair after applying the returned updates.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The agreement or one of its siblings belongs to a different tenant.
    #[error("cross-tenant access: {0}")]
    CrossTenantAccess(String),
}

/// Errors raised while reconciling an EMAC (component E).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum EmacError {
    /// The EMAC and the invoices/agreement it is being checked against
    /// belong to different tenants.
    #[error("cross-tenant access: {0}")]
    CrossTenantAccess(String),
}

/// Union of every error this crate can originate, for callers that want one
/// type to match on regardless of which component raised it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RfaError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error(transparent)]
    Rebate(#[from] RebateError),
    #[error(transparent)]
    Versioning(#[from] VersioningError),
    #[error(transparent)]
    Emac(#[from] EmacError),
}
