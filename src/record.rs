//! Form records and their per-variant schema.
//!
//! A [`FormRecord`] is the unit persisted for one in-progress checkout. On
//! every tier it is a flat JSON object with camelCase field names, plus at most
//! one of `photoPreviews` (inline encoded previews) or `photoPreviewRefs`
//! (tokens pointing at native files). Records are validated against the
//! variant schema when decoded, so a tier never hands unknown or ill-typed
//! fields to a form.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::key::Variant;
use crate::logging::warn;

/// Wire name of the inline preview array.
pub const PHOTO_PREVIEWS_FIELD: &str = "photoPreviews";

/// Wire name of the preview reference array.
pub const PHOTO_PREVIEW_REFS_FIELD: &str = "photoPreviewRefs";

/// Errors produced while decoding or mutating a record.
#[derive(Error, Debug)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("stored record is not a JSON object")]
    NotAnObject,

    #[error("field '{field}' is not part of the {variant} checkout form")]
    UnknownField { variant: Variant, field: String },

    #[error("invalid value for field '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Shape of a schema field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Decimal typed as text; partial input such as `"3."` is allowed.
    Numeric,
    /// One of a fixed set of values.
    Choice(&'static [&'static str]),
    /// Free text.
    Text,
    /// List of free-text entries.
    TextList,
}

/// One field of a variant's schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
}

const fn field(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec { name, kind }
}

const WEATHER: &[&str] = &["clear", "snow", "sleet", "freezing_rain", "rain", "wind"];

const PLOW_SCHEMA: &[FieldSpec] = &[
    field("snowDepth", FieldKind::Numeric),
    field("saltUsed", FieldKind::Numeric),
    field("weatherCondition", FieldKind::Choice(WEATHER)),
    field("serviceType", FieldKind::Choice(&["plow", "salt", "plow_salt"])),
    field("equipmentId", FieldKind::Text),
    field("notes", FieldKind::Text),
    field("checkoutLatitude", FieldKind::Numeric),
    field("checkoutLongitude", FieldKind::Numeric),
    field("checkoutAccuracy", FieldKind::Numeric),
];

const SHOVEL_SCHEMA: &[FieldSpec] = &[
    field("snowDepth", FieldKind::Numeric),
    field("iceMeltUsed", FieldKind::Numeric),
    field("weatherCondition", FieldKind::Choice(WEATHER)),
    field(
        "serviceType",
        FieldKind::Choice(&["shovel", "ice_melt", "shovel_ice_melt"]),
    ),
    field("areasCleared", FieldKind::TextList),
    field("crewSize", FieldKind::Numeric),
    field("notes", FieldKind::Text),
    field("checkoutLatitude", FieldKind::Numeric),
    field("checkoutLongitude", FieldKind::Numeric),
    field("checkoutAccuracy", FieldKind::Numeric),
];

/// Schema of the checkout form for `variant`.
pub fn schema(variant: Variant) -> &'static [FieldSpec] {
    match variant {
        Variant::Plow => PLOW_SCHEMA,
        Variant::Shovel => SHOVEL_SCHEMA,
    }
}

/// Look up one field of the schema.
pub fn field_spec(variant: Variant, name: &str) -> Option<&'static FieldSpec> {
    schema(variant).iter().find(|spec| spec.name == name)
}

/// A scalar or list value held by a form field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// Empty string or empty list.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.is_empty(),
            FieldValue::List(items) => items.is_empty(),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        Self::List(items)
    }
}

/// A self-contained encoded image preview (typically a data URL).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoPreview(String);

impl PhotoPreview {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Opaque token naming a preview held in native file storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoPreviewRef(String);

impl PhotoPreviewRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The two mutually exclusive preview representations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Photos {
    #[default]
    None,
    Inline(Vec<PhotoPreview>),
    Refs(Vec<PhotoPreviewRef>),
}

impl Photos {
    pub fn is_empty(&self) -> bool {
        match self {
            Photos::None => true,
            Photos::Inline(previews) => previews.is_empty(),
            Photos::Refs(refs) => refs.is_empty(),
        }
    }

    pub fn inline(&self) -> Option<&[PhotoPreview]> {
        match self {
            Photos::Inline(previews) => Some(previews),
            _ => None,
        }
    }

    pub fn refs(&self) -> Option<&[PhotoPreviewRef]> {
        match self {
            Photos::Refs(refs) => Some(refs),
            _ => None,
        }
    }
}

/// Persisted state of one in-progress checkout form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormRecord {
    variant: Variant,
    fields: BTreeMap<String, FieldValue>,
    photos: Photos,
}

impl FormRecord {
    pub fn empty(variant: Variant) -> Self {
        Self {
            variant,
            fields: BTreeMap::new(),
            photos: Photos::None,
        }
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of a field, or `""` when unset.
    pub fn text(&self, name: &str) -> &str {
        match self.fields.get(name) {
            Some(FieldValue::Text(s)) => s,
            _ => "",
        }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn photos(&self) -> &Photos {
        &self.photos
    }

    /// No field values and no photos.
    pub fn is_empty(&self) -> bool {
        self.fields.values().all(FieldValue::is_empty) && self.photos.is_empty()
    }

    /// Set a field after checking it against the schema.
    ///
    /// Empty values remove the field.
    pub fn set_field(&mut self, name: &str, value: FieldValue) -> Result<(), RecordError> {
        validate_field(self.variant, name, &value)?;
        if value.is_empty() {
            self.fields.remove(name);
        } else {
            self.fields.insert(name.to_string(), value);
        }
        Ok(())
    }

    /// Store previews inline, dropping any refs.
    pub fn set_inline_previews(&mut self, previews: Vec<PhotoPreview>) {
        self.photos = if previews.is_empty() {
            Photos::None
        } else {
            Photos::Inline(previews)
        };
    }

    /// Store preview refs, dropping any inline previews.
    pub fn set_preview_refs(&mut self, refs: Vec<PhotoPreviewRef>) {
        self.photos = if refs.is_empty() {
            Photos::None
        } else {
            Photos::Refs(refs)
        };
    }

    /// Serialize to the flat JSON object stored on every tier.
    pub fn encode(&self) -> Result<String, RecordError> {
        let mut map = Map::new();
        for (name, value) in &self.fields {
            map.insert(name.clone(), serde_json::to_value(value)?);
        }
        match &self.photos {
            Photos::None => {}
            Photos::Inline(previews) => {
                map.insert(PHOTO_PREVIEWS_FIELD.to_string(), serde_json::to_value(previews)?);
            }
            Photos::Refs(refs) => {
                map.insert(PHOTO_PREVIEW_REFS_FIELD.to_string(), serde_json::to_value(refs)?);
            }
        }
        Ok(serde_json::to_string(&Value::Object(map))?)
    }

    /// Parse a stored record, keeping only fields the schema accepts.
    ///
    /// Unknown fields and ill-typed values are dropped rather than failing the
    /// whole record. When both preview representations are present, non-empty
    /// refs win.
    pub fn decode(variant: Variant, raw: &str) -> Result<Self, RecordError> {
        let Value::Object(map) = serde_json::from_str::<Value>(raw)? else {
            return Err(RecordError::NotAnObject);
        };

        let mut record = Self::empty(variant);
        let mut inline = Vec::new();
        let mut refs = Vec::new();

        for (name, value) in map {
            match name.as_str() {
                PHOTO_PREVIEWS_FIELD => {
                    inline = string_array(value).into_iter().map(PhotoPreview).collect();
                }
                PHOTO_PREVIEW_REFS_FIELD => {
                    refs = string_array(value)
                        .into_iter()
                        .map(PhotoPreviewRef)
                        .collect();
                }
                _ => {
                    let Some(value) = coerce(value) else {
                        continue;
                    };
                    if let Err(e) = record.set_field(&name, value) {
                        warn!(variant = %variant, field = %name, error = %e, "dropping stored field");
                    }
                }
            }
        }

        if !refs.is_empty() {
            record.set_preview_refs(refs);
        } else {
            record.set_inline_previews(inline);
        }
        Ok(record)
    }
}

/// Check `value` against the schema entry for `name`.
pub fn validate_field(variant: Variant, name: &str, value: &FieldValue) -> Result<(), RecordError> {
    let spec = field_spec(variant, name).ok_or_else(|| RecordError::UnknownField {
        variant,
        field: name.to_string(),
    })?;

    let invalid = |reason: &str| RecordError::InvalidValue {
        field: name.to_string(),
        reason: reason.to_string(),
    };

    match (spec.kind, value) {
        (FieldKind::Numeric, FieldValue::Text(s)) => {
            if is_partial_decimal(s) {
                Ok(())
            } else {
                Err(invalid("expected a decimal number"))
            }
        }
        (FieldKind::Choice(options), FieldValue::Text(s)) => {
            if s.is_empty() || options.contains(&s.as_str()) {
                Ok(())
            } else {
                Err(invalid(&format!("expected one of {}", options.join(", "))))
            }
        }
        (FieldKind::Text, FieldValue::Text(_)) => Ok(()),
        (FieldKind::TextList, FieldValue::List(_)) => Ok(()),
        (FieldKind::TextList, FieldValue::Text(_)) => Err(invalid("expected a list")),
        (_, FieldValue::List(_)) => Err(invalid("expected a single value")),
    }
}

/// Empty, or an optionally signed run of digits with at most one `.`.
fn is_partial_decimal(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    let mut seen_dot = false;
    for c in digits.chars() {
        match c {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => return false,
        }
    }
    true
}

/// Convert a raw JSON value into a field value. Older records may carry
/// numbers where text is now expected.
fn coerce(value: Value) -> Option<FieldValue> {
    match value {
        Value::String(s) => Some(FieldValue::Text(s)),
        Value::Number(n) => Some(FieldValue::Text(n.to_string())),
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(FieldValue::List),
        _ => None,
    }
}

fn string_array(value: Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) if !s.is_empty() => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
