//! Per-attribute comparison rules used instead of exact equality.

use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldEquivalence {
    /// Trailing newlines are not significant (`"key\n"` equals `"key"`).
    TrimTrailingNewlines,
    /// An absent value equals the zero value of the other side's type.
    AbsentEqualsZero,
    /// An unset value equals the empty string.
    UnsetEqualsEmpty,
    /// Strings compare case-insensitively.
    CaseInsensitive,
}

impl FieldEquivalence {
    pub fn equivalent(&self, desired: &Value, observed: &Value) -> bool {
        match self {
            Self::TrimTrailingNewlines => self.normalize(desired) == self.normalize(observed),
            Self::AbsentEqualsZero => match (desired, observed) {
                (Value::Null, other) | (other, Value::Null) => is_zero(other),
                (a, b) => a == b,
            },
            Self::UnsetEqualsEmpty => match (desired, observed) {
                (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
                (a, b) => a == b,
            },
            Self::CaseInsensitive => match (desired, observed) {
                (Value::String(a), Value::String(b)) => a.eq_ignore_ascii_case(b),
                (a, b) => a == b,
            },
        }
    }

    /// Canonical form sent to the remote API.
    pub fn normalize(&self, value: &Value) -> Value {
        match (self, value) {
            (Self::TrimTrailingNewlines, Value::String(s)) => {
                Value::String(s.trim_end_matches(&['\n', '\r'][..]).to_string())
            }
            _ => value.clone(),
        }
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}
