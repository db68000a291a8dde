//! Flat attribute values attached to logs, events, and metrics.

use std::collections::BTreeMap;

/// A single attribute value. Sequences are homogeneous by construction —
/// each variant fixes its element type, so mixed-kind sequences cannot be
/// built without an explicit conversion.
#[derive(Clone, Debug, PartialEq)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    BoolSeq(Vec<bool>),
    IntSeq(Vec<i64>),
    FloatSeq(Vec<f64>),
    StrSeq(Vec<String>),
}

impl From<bool> for AttributeValue {
    fn from(v: bool) -> Self {
        AttributeValue::Bool(v)
    }
}
impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}
impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}
impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::Str(v.to_owned())
    }
}
impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::Str(v)
    }
}

/// An ordered set of named attributes. `Missing`/`None` values are filtered
/// out at insertion rather than carried as a sentinel, since `BTreeMap`
/// simply omits the key.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AttributeSet {
    entries: BTreeMap<&'static str, AttributeValue>,
}

impl AttributeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<AttributeValue>) -> Self {
        self.entries.insert(key, value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.entries.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &AttributeValue)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overwrites_same_key() {
        let attrs = AttributeSet::new().with("a", 1i64).with("a", 2i64);
        assert_eq!(attrs.get("a"), Some(&AttributeValue::Int(2)));
    }
}
