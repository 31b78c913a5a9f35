//! Storage keys for checkout form records.
//!
//! A form record is addressed by `(variant, work_log_id)`. On every tier the
//! pair is flattened into `"<prefix>_<variant>_<workLogId>"`; data already on
//! devices uses this format, so it must not change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Default prefix for form record keys.
pub const DEFAULT_KEY_PREFIX: &str = "checkout_form";

/// Which dashboard flow a checkout form belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Plow,
    Shovel,
}

impl Variant {
    pub const ALL: [Variant; 2] = [Variant::Plow, Variant::Shovel];

    pub fn as_str(self) -> &'static str {
        match self {
            Variant::Plow => "plow",
            Variant::Shovel => "shovel",
        }
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not a known variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown form variant '{0}' (expected 'plow' or 'shovel')")]
pub struct ParseVariantError(pub String);

impl FromStr for Variant {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plow" => Ok(Variant::Plow),
            "shovel" => Ok(Variant::Shovel),
            other => Err(ParseVariantError(other.to_string())),
        }
    }
}

/// Identifier of a work log row in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkLogId(String);

impl WorkLogId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WorkLogId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for WorkLogId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The flattened key string used on every tier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    /// Wrap a key string read back from a tier.
    pub(crate) fn from_raw(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key with every character outside `[A-Za-z0-9_-]` replaced by `_`.
    pub fn sanitized(&self) -> String {
        sanitize_path_segment(&self.0)
    }

    /// Native path of the JSON copy of this record.
    pub fn native_form_path(&self) -> String {
        format!("{}/{}.json", NATIVE_FORM_ROOT, self.sanitized())
    }

    /// Native directory holding this record's photo previews.
    pub fn native_photo_dir(&self) -> String {
        format!("{}/{}", NATIVE_PHOTO_ROOT, self.sanitized())
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Native root for JSON form records.
pub const NATIVE_FORM_ROOT: &str = "checkout-form";

/// Native root for photo preview payloads.
pub const NATIVE_PHOTO_ROOT: &str = "checkout-photo";

/// Composite identity of one in-progress checkout.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FormKey {
    pub variant: Variant,
    pub work_log_id: WorkLogId,
}

impl FormKey {
    pub fn new(variant: Variant, work_log_id: impl Into<WorkLogId>) -> Self {
        Self {
            variant,
            work_log_id: work_log_id.into(),
        }
    }

    pub fn plow(work_log_id: impl Into<WorkLogId>) -> Self {
        Self::new(Variant::Plow, work_log_id)
    }

    pub fn shovel(work_log_id: impl Into<WorkLogId>) -> Self {
        Self::new(Variant::Shovel, work_log_id)
    }

    /// Render the key under `prefix`.
    pub fn storage_key(&self, prefix: &str) -> StorageKey {
        StorageKey(format!("{}_{}_{}", prefix, self.variant, self.work_log_id))
    }

    /// Recover a `FormKey` from a stored key string.
    ///
    /// Returns `None` when the key does not carry `prefix` or names an
    /// unknown variant.
    pub fn parse(prefix: &str, key: &str) -> Option<Self> {
        let rest = strip_prefix(prefix, key)?;
        let (variant, id) = rest.split_once('_')?;
        let variant = variant.parse().ok()?;
        if id.is_empty() {
            return None;
        }
        Some(Self::new(variant, id))
    }
}

impl fmt::Display for FormKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.variant, self.work_log_id)
    }
}

/// True when `key` belongs to the form namespace under `prefix`.
pub fn has_form_prefix(prefix: &str, key: &str) -> bool {
    strip_prefix(prefix, key).is_some()
}

/// Extract the work-log id embedded in a stored key.
///
/// Works even for keys whose variant segment is unknown: everything after the
/// segment following the prefix is taken as the id.
pub fn extract_work_log_id<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    let rest = strip_prefix(prefix, key)?;
    let (_, id) = rest.split_once('_')?;
    if id.is_empty() { None } else { Some(id) }
}

fn strip_prefix<'a>(prefix: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(prefix)?.strip_prefix('_')
}

/// Map every character outside `[A-Za-z0-9_-]` to `_`.
pub fn sanitize_path_segment(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
