//! Message schema contract
//!
//! Every OCPP payload type implements `Payload`: parse from a JSON document
//! under a protocol version, serialize back, and compare structurally.
//! Request types additionally implement `Request`, naming their action and
//! response type.
//!
//! Parsing walks an explicit field list through `Fields`, which produces
//! field-qualified `SchemaError`s (`idToken.type: missing mandatory field`).
//! Serialization goes through `DocBuilder`. Vendor extension fields travel in
//! `CustomData` and are re-emitted verbatim unless an `Extensions` rewrite
//! replaces them.
//!
//! - `v16`: OCPP 1.6 schemas
//! - `v2`: OCPP 2.0.1 / 2.1 schemas

pub mod v16;
pub mod v2;

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::types::{ProtocolVersion, TextEnum};

/// Parse / serialize / structural equality contract of one OCPP payload type
pub trait Payload: Sized + Clone + fmt::Debug + PartialEq + Eq + Hash + Send + Sync + 'static {
    /// Parse a payload document; never panics on malformed input
    fn try_parse(doc: &Value, version: ProtocolVersion) -> Result<Self, SchemaError>;

    /// Serialize, applying extension rewrites to custom data
    fn to_document(&self, ext: &Extensions) -> Value;

    /// Serialize with custom data emitted verbatim
    fn to_json(&self) -> Value {
        self.to_document(&Extensions::default())
    }
}

/// A request payload bound to an action name
pub trait Request: Payload {
    const ACTION: &'static str;

    /// Protocol versions whose schema this type implements
    const VERSIONS: &'static [ProtocolVersion];

    type Response: Payload;

    fn supports(version: ProtocolVersion) -> bool {
        Self::VERSIONS.contains(&version)
    }
}

// ============================================================================
// Errors
// ============================================================================

/// Field-qualified schema violation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}{kind}", path_prefix(.path))]
pub struct SchemaError {
    /// Dotted path of the offending field, empty for the payload root
    pub path: String,
    pub kind: SchemaErrorKind,
}

fn path_prefix(path: &str) -> String {
    if path.is_empty() {
        String::new()
    } else {
        format!("{path}: ")
    }
}

/// What was wrong with a field
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaErrorKind {
    #[error("expected a JSON object")]
    NotAnObject,

    #[error("missing mandatory field")]
    Missing,

    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{0}")]
    InvalidValue(String),

    #[error("longer than {0} characters")]
    TooLong(usize),

    #[error("value {value} outside {min}..={max}")]
    OutOfRange { value: i64, min: i64, max: i64 },

    #[error("expected {min} to {max} items, found {found}")]
    Cardinality { min: usize, max: usize, found: usize },
}

impl SchemaError {
    pub fn new(path: impl Into<String>, kind: SchemaErrorKind) -> Self {
        Self {
            path: path.into(),
            kind,
        }
    }

    /// Qualify the path with the enclosing field name
    pub fn within(mut self, parent: &str) -> Self {
        self.path = if self.path.is_empty() {
            parent.to_string()
        } else if self.path.starts_with('[') {
            format!("{parent}{}", self.path)
        } else {
            format!("{parent}.{}", self.path)
        };
        self
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn wrong_type(name: &str, expected: &'static str, found: &Value) -> SchemaError {
    SchemaError::new(
        name,
        SchemaErrorKind::WrongType {
            expected,
            found: type_name(found),
        },
    )
}

// ============================================================================
// Reading
// ============================================================================

/// Field reader over one JSON object
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
    version: ProtocolVersion,
}

impl<'a> Fields<'a> {
    pub fn of(doc: &'a Value, version: ProtocolVersion) -> Result<Self, SchemaError> {
        match doc {
            Value::Object(map) => Ok(Self { map, version }),
            _ => Err(SchemaError::new("", SchemaErrorKind::NotAnObject)),
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.version
    }

    /// Present; an explicit `null` counts as present and fails the type checks
    pub fn get(&self, name: &str) -> Option<&'a Value> {
        self.map.get(name)
    }

    fn required(&self, name: &str) -> Result<&'a Value, SchemaError> {
        self.get(name)
            .ok_or_else(|| SchemaError::new(name, SchemaErrorKind::Missing))
    }

    fn string_value(name: &str, value: &Value, max_len: usize) -> Result<String, SchemaError> {
        let s = value
            .as_str()
            .ok_or_else(|| wrong_type(name, "string", value))?;
        if s.chars().count() > max_len {
            return Err(SchemaError::new(name, SchemaErrorKind::TooLong(max_len)));
        }
        Ok(s.to_string())
    }

    pub fn string(&self, name: &str, max_len: usize) -> Result<String, SchemaError> {
        Self::string_value(name, self.required(name)?, max_len)
    }

    pub fn opt_string(&self, name: &str, max_len: usize) -> Result<Option<String>, SchemaError> {
        self.get(name)
            .map(|v| Self::string_value(name, v, max_len))
            .transpose()
    }

    fn integer_value(name: &str, value: &Value) -> Result<i32, SchemaError> {
        let n = value
            .as_i64()
            .ok_or_else(|| wrong_type(name, "integer", value))?;
        i32::try_from(n).map_err(|_| {
            SchemaError::new(
                name,
                SchemaErrorKind::OutOfRange {
                    value: n,
                    min: i32::MIN as i64,
                    max: i32::MAX as i64,
                },
            )
        })
    }

    pub fn integer(&self, name: &str) -> Result<i32, SchemaError> {
        Self::integer_value(name, self.required(name)?)
    }

    pub fn opt_integer(&self, name: &str) -> Result<Option<i32>, SchemaError> {
        self.get(name)
            .map(|v| Self::integer_value(name, v))
            .transpose()
    }

    fn in_range(name: &str, n: i32, min: i32, max: i32) -> Result<i32, SchemaError> {
        if (min..=max).contains(&n) {
            Ok(n)
        } else {
            Err(SchemaError::new(
                name,
                SchemaErrorKind::OutOfRange {
                    value: n as i64,
                    min: min as i64,
                    max: max as i64,
                },
            ))
        }
    }

    /// Integer that must be zero or positive
    pub fn unsigned(&self, name: &str) -> Result<i32, SchemaError> {
        Self::in_range(name, self.integer(name)?, 0, i32::MAX)
    }

    pub fn opt_unsigned(&self, name: &str) -> Result<Option<i32>, SchemaError> {
        self.opt_integer_in(name, 0, i32::MAX)
    }

    pub fn opt_integer_in(
        &self,
        name: &str,
        min: i32,
        max: i32,
    ) -> Result<Option<i32>, SchemaError> {
        self.opt_integer(name)?
            .map(|n| Self::in_range(name, n, min, max))
            .transpose()
    }

    pub fn opt_bool(&self, name: &str) -> Result<Option<bool>, SchemaError> {
        self.get(name)
            .map(|v| v.as_bool().ok_or_else(|| wrong_type(name, "boolean", v)))
            .transpose()
    }

    fn datetime_value(name: &str, value: &Value) -> Result<DateTime<Utc>, SchemaError> {
        let s = value
            .as_str()
            .ok_or_else(|| wrong_type(name, "date-time string", value))?;
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                SchemaError::new(
                    name,
                    SchemaErrorKind::InvalidValue(format!("invalid date-time '{s}': {e}")),
                )
            })
    }

    pub fn datetime(&self, name: &str) -> Result<DateTime<Utc>, SchemaError> {
        Self::datetime_value(name, self.required(name)?)
    }

    pub fn opt_datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, SchemaError> {
        self.get(name)
            .map(|v| Self::datetime_value(name, v))
            .transpose()
    }

    fn enum_value<E: TextEnum>(name: &str, value: &Value) -> Result<E, SchemaError> {
        let s = value
            .as_str()
            .ok_or_else(|| wrong_type(name, "string", value))?;
        E::from_text_or_fallback(s).ok_or_else(|| {
            SchemaError::new(
                name,
                SchemaErrorKind::InvalidValue(format!("'{s}' is not a valid {}", E::TYPE_NAME)),
            )
        })
    }

    pub fn enumeration<E: TextEnum>(&self, name: &str) -> Result<E, SchemaError> {
        Self::enum_value(name, self.required(name)?)
    }

    pub fn opt_enumeration<E: TextEnum>(&self, name: &str) -> Result<Option<E>, SchemaError> {
        self.get(name)
            .map(|v| Self::enum_value(name, v))
            .transpose()
    }

    pub fn object<T: Payload>(&self, name: &str) -> Result<T, SchemaError> {
        T::try_parse(self.required(name)?, self.version).map_err(|e| e.within(name))
    }

    pub fn opt_object<T: Payload>(&self, name: &str) -> Result<Option<T>, SchemaError> {
        self.get(name)
            .map(|v| T::try_parse(v, self.version).map_err(|e| e.within(name)))
            .transpose()
    }

    fn elements<T>(
        &self,
        name: &str,
        min: usize,
        max: usize,
        mut parse: impl FnMut(&Value) -> Result<T, SchemaError>,
    ) -> Result<Option<Vec<T>>, SchemaError> {
        let Some(value) = self.get(name) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| wrong_type(name, "array", value))?;
        if items.len() < min || items.len() > max {
            return Err(SchemaError::new(
                name,
                SchemaErrorKind::Cardinality {
                    min,
                    max,
                    found: items.len(),
                },
            ));
        }
        items
            .iter()
            .enumerate()
            .map(|(i, item)| parse(item).map_err(|e| e.within(&format!("{name}[{i}]"))))
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Mandatory array of objects, kept in order
    pub fn list<T: Payload>(
        &self,
        name: &str,
        min: usize,
        max: usize,
    ) -> Result<Vec<T>, SchemaError> {
        let version = self.version;
        self.elements(name, min, max, |v| T::try_parse(v, version))?
            .ok_or_else(|| SchemaError::new(name, SchemaErrorKind::Missing))
    }

    /// Optional array of objects with set semantics; absent yields an empty set
    pub fn opt_set<T: Payload>(&self, name: &str, max: usize) -> Result<ValueSet<T>, SchemaError> {
        let version = self.version;
        Ok(self
            .elements(name, 1, max, |v| T::try_parse(v, version))?
            .map(ValueSet::from_iter)
            .unwrap_or_default())
    }

    /// Optional array of integers with set semantics
    pub fn opt_integer_set(&self, name: &str, max: usize) -> Result<ValueSet<i32>, SchemaError> {
        Ok(self
            .elements(name, 1, max, |v| Self::integer_value("", v))?
            .map(ValueSet::from_iter)
            .unwrap_or_default())
    }

    /// Any JSON value, kept opaque
    pub fn opaque(&self, name: &str) -> Option<Opaque> {
        self.get(name).cloned().map(Opaque)
    }

    /// The `customData` extension container, if present
    pub fn custom_data(&self) -> Result<Option<CustomData>, SchemaError> {
        self.get(CUSTOM_DATA)
            .map(|v| CustomData::parse(v).map_err(|e| e.within(CUSTOM_DATA)))
            .transpose()
    }
}

// ============================================================================
// Writing
// ============================================================================

/// Builder for a payload document
pub struct DocBuilder<'e> {
    map: Map<String, Value>,
    ext: &'e Extensions,
}

impl<'e> DocBuilder<'e> {
    pub fn new(ext: &'e Extensions) -> Self {
        Self {
            map: Map::new(),
            ext,
        }
    }

    pub fn field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.map.insert(name.to_string(), value.into());
        self
    }

    pub fn opt_field<V: Into<Value>>(self, name: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.field(name, v),
            None => self,
        }
    }

    pub fn enumeration<E: TextEnum>(self, name: &str, value: E) -> Self {
        self.field(name, value.as_str())
    }

    pub fn opt_enumeration<E: TextEnum>(self, name: &str, value: Option<E>) -> Self {
        self.opt_field(name, value.map(|v| v.as_str()))
    }

    pub fn datetime(self, name: &str, value: &DateTime<Utc>) -> Self {
        self.field(name, format_datetime(value))
    }

    pub fn opt_datetime(self, name: &str, value: Option<&DateTime<Utc>>) -> Self {
        self.opt_field(name, value.map(format_datetime))
    }

    pub fn object<T: Payload>(self, name: &str, value: &T) -> Self {
        let doc = value.to_document(self.ext);
        self.field(name, doc)
    }

    pub fn opt_object<T: Payload>(self, name: &str, value: Option<&T>) -> Self {
        match value {
            Some(v) => self.object(name, v),
            None => self,
        }
    }

    pub fn list<T: Payload>(self, name: &str, items: &[T]) -> Self {
        let docs: Vec<Value> = items.iter().map(|i| i.to_document(self.ext)).collect();
        self.field(name, docs)
    }

    /// Empty sets are omitted
    pub fn set<T: Payload>(self, name: &str, items: &ValueSet<T>) -> Self {
        if items.is_empty() {
            return self;
        }
        self.list(name, items.as_slice())
    }

    pub fn integer_set(self, name: &str, items: &ValueSet<i32>) -> Self {
        if items.is_empty() {
            return self;
        }
        self.field(name, items.as_slice().to_vec())
    }

    pub fn opaque(self, name: &str, value: Option<&Opaque>) -> Self {
        self.opt_field(name, value.map(|o| o.0.clone()))
    }

    pub fn custom_data(self, value: Option<&CustomData>) -> Self {
        let rendered = value.and_then(|cd| self.ext.render(cd));
        self.opt_field(CUSTOM_DATA, rendered)
    }

    pub fn build(self) -> Value {
        Value::Object(self.map)
    }
}

/// RFC 3339 with only as many fractional digits as needed
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

// ============================================================================
// Extension container
// ============================================================================

const CUSTOM_DATA: &str = "customData";
const VENDOR_ID: &str = "vendorId";

/// Maximum length of a `customData.vendorId`
pub const MAX_VENDOR_ID_LEN: usize = 255;

/// Vendor extension bag (`customData`)
///
/// Everything except `vendorId` is kept uninterpreted and re-emitted as is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomData {
    vendor_id: String,
    fields: Map<String, Value>,
}

impl CustomData {
    pub fn new(vendor_id: impl Into<String>) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        let name = name.into();
        if name != VENDOR_ID {
            self.fields.insert(name, value);
        }
        self
    }

    pub fn vendor_id(&self) -> &str {
        &self.vendor_id
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn parse(doc: &Value) -> Result<Self, SchemaError> {
        let map = doc
            .as_object()
            .ok_or_else(|| SchemaError::new("", SchemaErrorKind::NotAnObject))?;
        let vendor_id = map
            .get(VENDOR_ID)
            .ok_or_else(|| SchemaError::new(VENDOR_ID, SchemaErrorKind::Missing))
            .and_then(|v| Fields::string_value(VENDOR_ID, v, MAX_VENDOR_ID_LEN))?;
        let fields = map
            .iter()
            .filter(|(k, _)| k.as_str() != VENDOR_ID)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Self { vendor_id, fields })
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.fields.clone();
        map.insert(VENDOR_ID.to_string(), Value::String(self.vendor_id.clone()));
        Value::Object(map)
    }
}

impl Hash for CustomData {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.vendor_id.hash(state);
        hash_map_canonical(&self.fields, state);
    }
}

/// Rewrite applied to one vendor's custom data on serialize
pub type CustomDataRewrite = Arc<dyn Fn(&CustomData) -> Option<CustomData> + Send + Sync>;

/// Extension serializers keyed by `vendorId`
///
/// Custom data from vendors without a rewrite is emitted unchanged; a rewrite
/// returning `None` drops the container from the output.
#[derive(Clone, Default)]
pub struct Extensions {
    rewrites: HashMap<String, CustomDataRewrite>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rewrite<F>(mut self, vendor_id: impl Into<String>, rewrite: F) -> Self
    where
        F: Fn(&CustomData) -> Option<CustomData> + Send + Sync + 'static,
    {
        self.rewrites.insert(vendor_id.into(), Arc::new(rewrite));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rewrites.is_empty()
    }

    /// Document to emit for `custom`, or `None` to omit it
    pub fn render(&self, custom: &CustomData) -> Option<Value> {
        match self.rewrites.get(custom.vendor_id()) {
            Some(rewrite) => rewrite(custom).map(|cd| cd.to_value()),
            None => Some(custom.to_value()),
        }
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut vendors: Vec<&String> = self.rewrites.keys().collect();
        vendors.sort();
        f.debug_struct("Extensions").field("vendors", &vendors).finish()
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// A JSON value the schema does not interpret (e.g. DataTransfer `data`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opaque(pub Value);

impl Hash for Opaque {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_value_canonical(&self.0, state);
    }
}

fn hash_map_canonical<H: Hasher>(map: &Map<String, Value>, state: &mut H) {
    let mut entries: Vec<(&String, &Value)> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    state.write_usize(entries.len());
    for (key, value) in entries {
        key.hash(state);
        hash_value_canonical(value, state);
    }
}

/// Hash consistent with `Value` equality, independent of key order
fn hash_value_canonical<H: Hasher>(value: &Value, state: &mut H) {
    match value {
        Value::Null => state.write_u8(0),
        Value::Bool(b) => {
            state.write_u8(1);
            b.hash(state);
        }
        Value::Number(n) => {
            state.write_u8(2);
            n.to_string().hash(state);
        }
        Value::String(s) => {
            state.write_u8(3);
            s.hash(state);
        }
        Value::Array(items) => {
            state.write_u8(4);
            state.write_usize(items.len());
            for item in items {
                hash_value_canonical(item, state);
            }
        }
        Value::Object(map) => {
            state.write_u8(5);
            hash_map_canonical(map, state);
        }
    }
}

/// Collection with set semantics that keeps first-seen order for output
///
/// Duplicates are dropped on insertion; equality and hashing ignore order.
#[derive(Debug, Clone)]
pub struct ValueSet<T> {
    items: Vec<T>,
}

impl<T: PartialEq> ValueSet<T> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    /// Returns false if an equal value was already present
    pub fn insert(&mut self, value: T) -> bool {
        if self.items.contains(&value) {
            return false;
        }
        self.items.push(value);
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.items.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.items
    }
}

impl<T: PartialEq> Default for ValueSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: PartialEq> FromIterator<T> for ValueSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut set = Self::new();
        for item in iter {
            set.insert(item);
        }
        set
    }
}

impl<'a, T> IntoIterator for &'a ValueSet<T> {
    type Item = &'a T;
    type IntoIter = std::slice::Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<T: PartialEq> PartialEq for ValueSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.items.len() == other.items.len() && self.items.iter().all(|i| other.items.contains(i))
    }
}

impl<T: Eq> Eq for ValueSet<T> {}

impl<T: Hash> Hash for ValueSet<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let combined = self.items.iter().fold(0u64, |acc, item| {
            let mut hasher = DefaultHasher::new();
            item.hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        });
        state.write_usize(self.items.len());
        state.write_u64(combined);
    }
}
