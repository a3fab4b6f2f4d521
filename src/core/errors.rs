//! FSL-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, FslError>;

/// Coarse classification used by the daemon loops to decide between
/// retrying, skipping, and surfacing a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad hash, index, or parent linkage. Never repaired silently.
    Validation,
    /// Local and remote history disagree.
    Divergence,
    /// Network or filesystem hiccup; retried on the next tick.
    Transient,
    /// Expected "skip this tick" outcome.
    Scheduling,
    /// Caller supplied something unusable; returned, not retried.
    Configuration,
    /// Invariant violation inside the daemon.
    Internal,
}

/// Top-level error type for fsledger.
#[derive(Debug, Error)]
pub enum FslError {
    #[error("[FSL-1001] invalid chain at index {index}: {reason}")]
    InvalidChain { index: u64, reason: String },

    #[error("[FSL-1002] divergent chain: local length {local_len}, remote length {remote_len}")]
    DivergentChain { local_len: u64, remote_len: u64 },

    #[error("[FSL-1003] local chain desynchronized from remote: {details}")]
    ChainDesync { details: String },

    #[error("[FSL-1004] remote rejected block {index}: {details}")]
    RemoteRejected { index: u64, details: String },

    #[error("[FSL-2001] task already scheduled: {id}")]
    TaskAlreadyScheduled { id: String },

    #[error("[FSL-2002] index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("[FSL-2003] missing local head in {dir}")]
    MissingLocalHead { dir: PathBuf },

    #[error("[FSL-2004] bad root path: {path}")]
    BadRootPath { path: PathBuf },

    #[error("[FSL-3001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[FSL-3002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[FSL-3003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[FSL-4001] remote ledger failure at {endpoint}: {details}")]
    Remote { endpoint: String, details: String },

    #[error("[FSL-4002] sync pass failed: {details}")]
    SyncFailed { details: String },

    #[error("[FSL-4101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[FSL-4201] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[FSL-4202] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[FSL-4900] runtime failure: {details}")]
    Runtime { details: String },
}

impl FslError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidChain { .. } => "FSL-1001",
            Self::DivergentChain { .. } => "FSL-1002",
            Self::ChainDesync { .. } => "FSL-1003",
            Self::RemoteRejected { .. } => "FSL-1004",
            Self::TaskAlreadyScheduled { .. } => "FSL-2001",
            Self::IndexOutOfBounds { .. } => "FSL-2002",
            Self::MissingLocalHead { .. } => "FSL-2003",
            Self::BadRootPath { .. } => "FSL-2004",
            Self::InvalidConfig { .. } => "FSL-3001",
            Self::MissingConfig { .. } => "FSL-3002",
            Self::ConfigParse { .. } => "FSL-3003",
            Self::Remote { .. } => "FSL-4001",
            Self::SyncFailed { .. } => "FSL-4002",
            Self::Serialization { .. } => "FSL-4101",
            Self::Io { .. } => "FSL-4201",
            Self::ChannelClosed { .. } => "FSL-4202",
            Self::Runtime { .. } => "FSL-4900",
        }
    }

    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidChain { .. } | Self::RemoteRejected { .. } => ErrorClass::Validation,
            Self::DivergentChain { .. } | Self::ChainDesync { .. } => ErrorClass::Divergence,
            Self::Remote { .. }
            | Self::SyncFailed { .. }
            | Self::Io { .. }
            | Self::ChannelClosed { .. } => ErrorClass::Transient,
            Self::TaskAlreadyScheduled { .. } => ErrorClass::Scheduling,
            Self::IndexOutOfBounds { .. }
            | Self::MissingLocalHead { .. }
            | Self::BadRootPath { .. }
            | Self::InvalidConfig { .. }
            | Self::MissingConfig { .. }
            | Self::ConfigParse { .. } => ErrorClass::Configuration,
            Self::Serialization { .. } | Self::Runtime { .. } => ErrorClass::Internal,
        }
    }

    /// Whether retrying on the next tick might resolve the failure.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient)
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

impl From<serde_json::Error> for FslError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for FslError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
