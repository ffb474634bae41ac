//! Engine error type.
//!
//! Protocol misuse is never an error here: those paths log and return
//! `false`. Only addressing mistakes and configuration problems surface
//! as `EngineError`.

/// Result alias used across the engine.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------
    #[error("handler needs at least one site")]
    NoSites,

    #[error("{sites} sites requested, at most {max} supported")]
    TooManySites { sites: usize, max: usize },

    #[error("wafer layout contains no dies")]
    EmptyWafer,

    #[error("sub-die layout contains no sub-die offsets")]
    EmptySubDieLayout,

    #[error("corruption period must be positive, got {period}")]
    InvalidPeriod { period: u64 },

    #[error("invalid setup: {0}")]
    InvalidSetup(String),

    // ------------------------------------------------------------------
    // Addressing
    // ------------------------------------------------------------------
    #[error("site {site} out of range (handler has {sites} sites)")]
    SiteOutOfRange { site: usize, sites: usize },

    #[error("probe {probe} out of range (needle has {probes} probes)")]
    ProbeOutOfRange { probe: usize, probes: usize },

    #[error("bin {bin} out of range (0..={max})")]
    BinOutOfRange { bin: i32, max: i32 },

    // ------------------------------------------------------------------
    // Category configuration
    // ------------------------------------------------------------------
    #[error("reprobe requested but no reprobe bin is configured")]
    ReprobeNotConfigured,

    #[error("retest requested but no retest bin is configured")]
    RetestNotConfigured,
}
