// Data point module - the unit of data flowing through the runtime
//
// A collector produces DataPoints, the pipeline buffers them and backends
// receive them in batches. Points are built once with the consuming builder
// methods below and never mutated afterwards.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use thiserror::Error;

/// Reasons a data point is rejected before it enters the pipeline buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("data point name is required")]
    EmptyName,

    #[error("data point '{0}' has no fields")]
    NoFields(String),
}

/// A single measured value
///
/// Serialized untagged, so JSON output shows the bare value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    UInt(u64),
    Bool(bool),
    Str(String),
}

impl FieldValue {
    /// Formats the value the way line protocol expects it
    ///
    /// Integers carry an `i` suffix, unsigned integers a `u` suffix and
    /// strings are double-quoted.
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Int(v) => format!("{}i", v),
            FieldValue::UInt(v) => format!("{}u", v),
            FieldValue::Bool(v) => v.to_string(),
            FieldValue::Str(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
        }
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<f32> for FieldValue {
    fn from(v: f32) -> Self {
        FieldValue::Float(f64::from(v))
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int(i64::from(v))
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::UInt(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::UInt(u64::from(v))
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

/// A named, tagged, timestamped set of fields
///
/// # Example
/// ```
/// use metrics_runtime::DataPoint;
///
/// let point = DataPoint::new("temperature")
///     .tag("location", "office")
///     .field("celsius", 22.5);
/// assert!(point.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DataPoint {
    name: String,
    tags: BTreeMap<String, String>,
    fields: BTreeMap<String, FieldValue>,
    timestamp: DateTime<Utc>,
}

impl DataPoint {
    /// Creates a point with the given name, stamped with the current time
    pub fn new(name: impl Into<String>) -> Self {
        DataPoint {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    /// Adds a single tag
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Adds every tag from the iterator
    pub fn tags<K, V, I>(mut self, tags: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.tags
            .extend(tags.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Adds a single field
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Adds every field from the iterator
    pub fn fields<K, V, I>(mut self, fields: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Overrides the timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag_set(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn field_set(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Checks that the point can be delivered
    ///
    /// # Returns
    /// * `Ok(())` - Name and at least one field are present
    /// * `Err(ValidationError)` - The point must be dropped
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty() {
            return Err(ValidationError::EmptyName);
        }
        if self.fields.is_empty() {
            return Err(ValidationError::NoFields(self.name.clone()));
        }
        Ok(())
    }

    /// Encodes the point as a single line-protocol record
    ///
    /// # Format
    /// ```text
    /// name[,tag=value...] field=value[,field=value...] <unix-nanos>
    /// ```
    pub fn to_line_protocol(&self) -> String {
        let mut line = escape_key(&self.name);

        for (key, value) in &self.tags {
            let _ = write!(line, ",{}={}", escape_key(key), escape_key(value));
        }

        line.push(' ');

        let fields = self
            .fields
            .iter()
            .map(|(key, value)| format!("{}={}", escape_key(key), value.to_line_protocol()))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str(&fields);

        let nanos = self.timestamp.timestamp_nanos_opt().unwrap_or_default();
        let _ = write!(line, " {}", nanos);

        line
    }
}

// Commas, equals signs and spaces are delimiters in line protocol.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_builder_sets_all_parts() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let point = DataPoint::new("cpu")
            .tag("host", "a")
            .tags([("region", "eu")])
            .field("usage", 42.5)
            .fields([("cores", 8i64)])
            .at(ts);

        assert_eq!(point.name(), "cpu");
        assert_eq!(point.tag_set().len(), 2);
        assert_eq!(point.field_set().get("usage"), Some(&FieldValue::Float(42.5)));
        assert_eq!(point.field_set().get("cores"), Some(&FieldValue::Int(8)));
        assert_eq!(point.timestamp(), ts);
    }

    #[test]
    fn test_validate_rejects_empty_name_and_fields() {
        assert_eq!(
            DataPoint::new("").field("v", 1i64).validate(),
            Err(ValidationError::EmptyName)
        );
        assert_eq!(
            DataPoint::new("cpu").validate(),
            Err(ValidationError::NoFields("cpu".to_string()))
        );
        assert!(DataPoint::new("cpu").field("v", true).validate().is_ok());
    }

    #[test]
    fn test_line_protocol_format() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let point = DataPoint::new("temperature")
            .tag("location", "office")
            .field("celsius", 22.5)
            .at(ts);

        assert_eq!(
            point.to_line_protocol(),
            "temperature,location=office celsius=22.5 1704067200000000000"
        );
    }

    #[test]
    fn test_line_protocol_escaping_and_value_kinds() {
        let ts = Utc.timestamp_opt(0, 0).unwrap();
        let point = DataPoint::new("disk usage")
            .tag("mount", "/mnt/a b")
            .field("count", 3i64)
            .field("free", 7u64)
            .field("ok", false)
            .field("path", "say \"hi\"")
            .field("percent", 45.0)
            .at(ts);

        assert_eq!(
            point.to_line_protocol(),
            "disk\\ usage,mount=/mnt/a\\ b count=3i,free=7u,ok=false,path=\"say \\\"hi\\\"\",percent=45 0"
        );
    }
}
