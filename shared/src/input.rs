use crate::schema::{FieldMap, FieldValue};
use serde::{Deserialize, Serialize};

/// Free-form controller intent, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Payload(pub FieldMap);

impl Payload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.0.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.get(name).and_then(FieldValue::as_f32)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.get(name).and_then(FieldValue::as_bool).unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One sequenced unit of input from a single source
///
/// Sequence numbers start at 1 and never repeat or go backward for a given
/// source; the server acknowledges the highest one it has applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputPackage {
    pub sequence: u32,
    pub timestamp: u64,
    pub payload: Payload,
}
