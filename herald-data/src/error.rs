use thiserror::Error;

/// Errors surfaced by `ContactStore` implementations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Transient store failure. Callers retry the operation with a fixed
    /// backoff; the agent loop keeps running.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("contact '{0}' not found")]
    NotFound(String),

    /// A contact was handed to two claimers, or a claim was written over
    /// an existing one. This is a store-contract violation and must fail
    /// loudly rather than be tolerated.
    #[error("duplicate claim on contact '{0}'")]
    DuplicateClaim(String),

    #[error("invalid status transition: cannot go from '{from}' to '{to}'")]
    InvalidTransition { from: String, to: String },

    #[error("invalid status value: {0}. Valid values: pending, claimed, contacted, skipped")]
    InvalidStatus(String),
}

/// Errors surfaced by `Channel` implementations.
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A single send failed. The sequence runner logs it and moves on to
    /// the remaining steps rather than aborting the contact outright.
    #[error("channel send failed: {0}")]
    SendFailed(String),

    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("unknown message ref '{0}'")]
    UnknownMessageRef(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;
