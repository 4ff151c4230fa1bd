use std::path::PathBuf;

use serde_json::{Map, Value};

use crate::error::RpcError;

/// Named request parameters. A missing or `null` params member reads as `{}`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    pub fn from_value(value: Value) -> Result<Self, RpcError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Object(values) => Ok(Self { values }),
            other => Err(RpcError::invalid(format!(
                "params must be an object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        !matches!(self.values.get(name), None | Some(Value::Null))
    }

    fn present(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    /// A string parameter; `null` and absent both read as `None`.
    pub fn optional_str(&self, name: &str) -> Result<Option<&str>, RpcError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(other) => Err(wrong_type(name, "a string", other)),
        }
    }

    /// A non-blank string parameter.
    pub fn required_str(&self, name: &str) -> Result<&str, RpcError> {
        match self.optional_str(name)? {
            Some(s) if !s.trim().is_empty() => Ok(s),
            _ => Err(RpcError::invalid(format!("Missing required param: {name}"))),
        }
    }

    /// A non-blank string parameter read as a filesystem path.
    pub fn optional_path(&self, name: &str) -> Result<Option<PathBuf>, RpcError> {
        Ok(self
            .optional_str(name)?
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from))
    }

    pub fn optional_f32(&self, name: &str) -> Result<Option<f32>, RpcError> {
        match self.present(name) {
            None => Ok(None),
            Some(v) => match v.as_f64() {
                Some(n) if n.is_finite() => Ok(Some(n as f32)),
                _ => Err(wrong_type(name, "a number", v)),
            },
        }
    }

    pub fn optional_u32(&self, name: &str) -> Result<Option<u32>, RpcError> {
        match self.present(name) {
            None => Ok(None),
            Some(v) => v
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .map(Some)
                .ok_or_else(|| wrong_type(name, "a non-negative integer", v)),
        }
    }

    /// A boolean switch, `false` when absent.
    pub fn flag(&self, name: &str) -> Result<bool, RpcError> {
        match self.present(name) {
            None => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(other) => Err(wrong_type(name, "a boolean", other)),
        }
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

fn wrong_type(name: &str, expected: &str, got: &Value) -> RpcError {
    RpcError::invalid(format!(
        "Invalid param {name}: expected {expected}, got {}",
        type_name(got)
    ))
}
