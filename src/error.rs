//! Unified error type for the checkout-store library.
//!
//! Storage failures are normally absorbed by the persistence controller and
//! surfaced through the save status and debug snapshots. [`Error`] covers
//! what remains: invalid field updates, configuration problems, and direct
//! use of the tiers.

use thiserror::Error;

use crate::config::ConfigError;
use crate::key::ParseVariantError;
use crate::record::RecordError;
use crate::tier::{FileStoreError, KvError};

/// Unified error type for all checkout-store operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Record decoding or schema validation failed.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Durable key-value tier failure.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Native file tier failure.
    #[error(transparent)]
    File(#[from] FileStoreError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Variant(#[from] ParseVariantError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A [`Result`] type alias using the unified [`Error`] type.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns `true` if this is a schema or decoding error.
    pub fn is_record(&self) -> bool {
        matches!(self, Self::Record(_))
    }

    pub fn is_kv(&self) -> bool {
        matches!(self, Self::Kv(_))
    }

    pub fn is_file(&self) -> bool {
        matches!(self, Self::File(_))
    }
}
