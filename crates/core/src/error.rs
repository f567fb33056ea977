//! Error types for the shardvec subsystem
//!
//! One unified `Error` enum is used across all crates. We use `thiserror`
//! for automatic `Display` and `Error` trait implementations.
//!
//! ## Error codes
//!
//! Every error maps onto a frozen wire code (`ErrorCode`). Callers that need
//! to branch on outcomes (the snapshot pusher tolerating `SnapshotExists`,
//! the receiver signalling `SnapshotNotNeeded`, ...) match on `code()` or on
//! the variant directly rather than parsing messages.
//!
//! | Code | Meaning |
//! |------|---------|
//! | `ERegionNotFound` | Region id is not registered |
//! | `ERegionUnavailable` | Region exists but its state rejects reads/writes |
//! | `EKeyOutOfRange` | Key or requested range falls outside the region range |
//! | `ERangeInvalid` | Range is empty or start >= end |
//! | `EIllegalParameters` | Request parameters fail validation |
//! | `ENotFound` | Entity (record, key) not found |
//! | `ERaftNotFound` | No raft node for the region |
//! | `EVectorSnapshotNotFound` | No durable snapshot for the index |
//! | `EVectorSnapshotExist` | A snapshot at >= that log id already exists |
//! | `EVectorNotNeedSnapshot` | Receiver already holds a live index |
//! | `EVectorIndexNotFound` | No published index handle for the region |
//! | `EVectorNotSupport` | Operation unsupported by this kernel / filter mode |
//! | `ESerialization` | Encoding/decoding failure |
//! | `EInternal` | Bug, invariant violation, or environment failure |

use std::io;
use thiserror::Error;

use crate::region::RegionState;

/// Result type alias for shardvec operations
pub type Result<T> = std::result::Result<T, Error>;

/// Frozen wire codes for all shardvec errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Region id is not registered
    RegionNotFound,
    /// Region state rejects the operation
    RegionUnavailable,
    /// Key outside the region range
    KeyOutOfRange,
    /// Malformed range
    RangeInvalid,
    /// Invalid request parameters
    IllegalParameters,
    /// Entity not found
    NotFound,
    /// No raft node for the region
    RaftNotFound,
    /// No durable snapshot for the index
    SnapshotNotFound,
    /// Snapshot at >= that log id already exists
    SnapshotExists,
    /// Receiver already holds a live index
    SnapshotNotNeeded,
    /// No published index handle
    VectorIndexNotFound,
    /// Unsupported operation
    Unsupported,
    /// Encoding/decoding failure
    Serialization,
    /// Bug or environment failure
    Internal,
}

impl ErrorCode {
    /// Canonical string representation for wire encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::RegionNotFound => "EREGION_NOT_FOUND",
            ErrorCode::RegionUnavailable => "EREGION_UNAVAILABLE",
            ErrorCode::KeyOutOfRange => "EKEY_OUT_OF_RANGE",
            ErrorCode::RangeInvalid => "ERANGE_INVALID",
            ErrorCode::IllegalParameters => "EILLEGAL_PARAMETERS",
            ErrorCode::NotFound => "ENOT_FOUND",
            ErrorCode::RaftNotFound => "ERAFT_NOT_FOUND",
            ErrorCode::SnapshotNotFound => "EVECTOR_SNAPSHOT_NOT_FOUND",
            ErrorCode::SnapshotExists => "EVECTOR_SNAPSHOT_EXIST",
            ErrorCode::SnapshotNotNeeded => "EVECTOR_NOT_NEED_SNAPSHOT",
            ErrorCode::VectorIndexNotFound => "EVECTOR_INDEX_NOT_FOUND",
            ErrorCode::Unsupported => "EVECTOR_NOT_SUPPORT",
            ErrorCode::Serialization => "ESERIALIZATION",
            ErrorCode::Internal => "EINTERNAL",
        }
    }

    /// Parse an error code from its string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "EREGION_NOT_FOUND" => Some(ErrorCode::RegionNotFound),
            "EREGION_UNAVAILABLE" => Some(ErrorCode::RegionUnavailable),
            "EKEY_OUT_OF_RANGE" => Some(ErrorCode::KeyOutOfRange),
            "ERANGE_INVALID" => Some(ErrorCode::RangeInvalid),
            "EILLEGAL_PARAMETERS" => Some(ErrorCode::IllegalParameters),
            "ENOT_FOUND" => Some(ErrorCode::NotFound),
            "ERAFT_NOT_FOUND" => Some(ErrorCode::RaftNotFound),
            "EVECTOR_SNAPSHOT_NOT_FOUND" => Some(ErrorCode::SnapshotNotFound),
            "EVECTOR_SNAPSHOT_EXIST" => Some(ErrorCode::SnapshotExists),
            "EVECTOR_NOT_NEED_SNAPSHOT" => Some(ErrorCode::SnapshotNotNeeded),
            "EVECTOR_INDEX_NOT_FOUND" => Some(ErrorCode::VectorIndexNotFound),
            "EVECTOR_NOT_SUPPORT" => Some(ErrorCode::Unsupported),
            "ESERIALIZATION" => Some(ErrorCode::Serialization),
            "EINTERNAL" => Some(ErrorCode::Internal),
            _ => None,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unified error type for all shardvec operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Region id is not registered in the region meta store.
    #[error("region {region_id} not found")]
    RegionNotFound {
        /// The missing region
        region_id: u64,
    },

    /// Region exists but its lifecycle state rejects reads/writes.
    #[error("region {region_id} unavailable, state {state:?}")]
    RegionUnavailable {
        /// The unavailable region
        region_id: u64,
        /// Its current lifecycle state
        state: RegionState,
    },

    /// Key or requested range outside the region range.
    #[error("key out of range: {message}")]
    KeyOutOfRange {
        /// Details including the offending key/range
        message: String,
    },

    /// Range is empty or start >= end.
    #[error("range invalid: {message}")]
    RangeInvalid {
        /// What is wrong with the range
        message: String,
    },

    /// Request parameters fail validation.
    #[error("illegal parameters: {message}")]
    IllegalParameters {
        /// What is wrong with the parameters
        message: String,
    },

    /// Entity (record, key, log entry) not found.
    #[error("not found: {message}")]
    NotFound {
        /// What was not found
        message: String,
    },

    /// No raft node registered for the region.
    #[error("raft node {region_id} not found")]
    RaftNotFound {
        /// The region without a node
        region_id: u64,
    },

    /// No durable snapshot for the index.
    #[error("vector index snapshot {vector_index_id} not found")]
    SnapshotNotFound {
        /// The index without a snapshot
        vector_index_id: u64,
    },

    /// A snapshot at >= that log id already exists.
    ///
    /// Expected and non-fatal at the snapshot pusher.
    #[error("vector index snapshot already exists, index {vector_index_id} log id {snapshot_log_id}")]
    SnapshotExists {
        /// The index
        vector_index_id: u64,
        /// The log id that was offered
        snapshot_log_id: u64,
    },

    /// The receiver already holds a live index and does not want a snapshot.
    ///
    /// Expected and non-fatal at the snapshot pusher.
    #[error("vector index {vector_index_id} does not need a snapshot")]
    SnapshotNotNeeded {
        /// The index
        vector_index_id: u64,
    },

    /// No published index handle for the region.
    #[error("vector index {vector_index_id} not found")]
    VectorIndexNotFound {
        /// The missing index
        vector_index_id: u64,
    },

    /// Operation unsupported by this kernel or filter mode.
    #[error("not support: {message}")]
    Unsupported {
        /// What is unsupported
        message: String,
    },

    /// Encoding or decoding failure.
    #[error("serialization error: {message}")]
    Serialization {
        /// What went wrong
        message: String,
    },

    /// I/O failure (filesystem, transfer).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Bug, invariant violation, or environment failure.
    #[error("internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl Error {
    /// Create a `KeyOutOfRange` error.
    pub fn key_out_of_range(message: impl Into<String>) -> Self {
        Error::KeyOutOfRange {
            message: message.into(),
        }
    }

    /// Create a `RangeInvalid` error.
    pub fn range_invalid(message: impl Into<String>) -> Self {
        Error::RangeInvalid {
            message: message.into(),
        }
    }

    /// Create an `IllegalParameters` error.
    pub fn illegal_parameters(message: impl Into<String>) -> Self {
        Error::IllegalParameters {
            message: message.into(),
        }
    }

    /// Create a `NotFound` error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    /// Create an `Unsupported` error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported {
            message: message.into(),
        }
    }

    /// Create a `Serialization` error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Error::Serialization {
            message: message.into(),
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    /// The frozen wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::RegionNotFound { .. } => ErrorCode::RegionNotFound,
            Error::RegionUnavailable { .. } => ErrorCode::RegionUnavailable,
            Error::KeyOutOfRange { .. } => ErrorCode::KeyOutOfRange,
            Error::RangeInvalid { .. } => ErrorCode::RangeInvalid,
            Error::IllegalParameters { .. } => ErrorCode::IllegalParameters,
            Error::NotFound { .. } => ErrorCode::NotFound,
            Error::RaftNotFound { .. } => ErrorCode::RaftNotFound,
            Error::SnapshotNotFound { .. } => ErrorCode::SnapshotNotFound,
            Error::SnapshotExists { .. } => ErrorCode::SnapshotExists,
            Error::SnapshotNotNeeded { .. } => ErrorCode::SnapshotNotNeeded,
            Error::VectorIndexNotFound { .. } => ErrorCode::VectorIndexNotFound,
            Error::Unsupported { .. } => ErrorCode::Unsupported,
            Error::Serialization { .. } => ErrorCode::Serialization,
            Error::Io(_) => ErrorCode::Internal,
            Error::Internal { .. } => ErrorCode::Internal,
        }
    }

    /// True for "not found" shaped errors.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotFound { .. }
                | Error::RegionNotFound { .. }
                | Error::SnapshotNotFound { .. }
                | Error::VectorIndexNotFound { .. }
        )
    }

    /// True for the two snapshot-install outcomes a pusher tolerates:
    /// the peer already has the snapshot, or does not want one.
    pub fn is_snapshot_conflict(&self) -> bool {
        matches!(
            self,
            Error::SnapshotExists { .. } | Error::SnapshotNotNeeded { .. }
        )
    }

    /// True for errors that indicate a bug or data loss rather than a
    /// recoverable condition.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal { .. } | Error::Io(_))
    }
}
