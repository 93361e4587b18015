//! Engine parameter schemas and validation of per-request overrides.
//!
//! Each engine declares a [`ParameterSchema`]: a map from parameter name to its
//! type, default and constraint. Callers send sparse overrides as
//! [`ParamValues`]; [`ParameterSchema::validate`] either accepts all of them
//! (returning the full, defaults-merged parameter set) or rejects the request
//! without returning anything partial.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Parameter name to value. Ordered so validation and serialization are stable.
pub type ParamValues = BTreeMap<String, ParamValue>;

/// A single parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Numeric value; integers widen to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            ParamValue::Int(i) => Some(i as f64),
            ParamValue::Float(f) => Some(f),
            ParamValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Int(i) => write!(f, "{i}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Text(s) => f.write_str(s),
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<f32> for ParamValue {
    fn from(v: f32) -> Self {
        ParamValue::Float(v as f64)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Value type a parameter expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Float,
    Int,
    Text,
}

impl ParamKind {
    fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Float => "float",
            ParamKind::Int => "integer",
            ParamKind::Text => "text",
        }
    }
}

/// Allowed values of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Constraint {
    /// Inclusive numeric range.
    Range { min: f64, max: f64 },
    /// Enumerated option set.
    OneOf(Vec<String>),
}

/// Declaration of one engine parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub kind: ParamKind,
    pub default: ParamValue,
    pub constraint: Constraint,
    pub description: String,
}

/// Declared parameters of an engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterSchema {
    params: BTreeMap<String, ParameterSpec>,
}

impl ParameterSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a float parameter constrained to `[min, max]`.
    pub fn float(mut self, name: &str, default: f64, min: f64, max: f64, description: &str) -> Self {
        self.params.insert(
            name.to_string(),
            ParameterSpec {
                kind: ParamKind::Float,
                default: ParamValue::Float(default),
                constraint: Constraint::Range { min, max },
                description: description.to_string(),
            },
        );
        self
    }

    /// Declare an integer parameter constrained to `[min, max]`.
    pub fn int(mut self, name: &str, default: i64, min: i64, max: i64, description: &str) -> Self {
        self.params.insert(
            name.to_string(),
            ParameterSpec {
                kind: ParamKind::Int,
                default: ParamValue::Int(default),
                constraint: Constraint::Range {
                    min: min as f64,
                    max: max as f64,
                },
                description: description.to_string(),
            },
        );
        self
    }

    /// Declare a text parameter restricted to `options`.
    pub fn choice<S: AsRef<str>>(mut self, name: &str, default: &str, options: &[S], description: &str) -> Self {
        self.params.insert(
            name.to_string(),
            ParameterSpec {
                kind: ParamKind::Text,
                default: ParamValue::Text(default.to_string()),
                constraint: Constraint::OneOf(options.iter().map(|o| o.as_ref().to_string()).collect()),
                description: description.to_string(),
            },
        );
        self
    }

    /// Declaration of parameter `name`.
    pub fn get(&self, name: &str) -> Option<&ParameterSpec> {
        self.params.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.params.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Default value of every declared parameter.
    pub fn defaults(&self) -> ParamValues {
        self.params
            .iter()
            .map(|(k, spec)| (k.clone(), spec.default.clone()))
            .collect()
    }

    /// Check every override against the schema.
    ///
    /// All-or-nothing: on success returns the schema defaults with the
    /// (normalized) overrides applied; on the first violation returns the error
    /// and nothing else.
    pub fn validate(&self, overrides: &ParamValues) -> Result<ParamValues, ConfigurationError> {
        let mut checked = Vec::with_capacity(overrides.len());
        for (key, value) in overrides {
            let spec = self
                .params
                .get(key)
                .ok_or_else(|| ConfigurationError::UnknownParameter { key: key.clone() })?;
            checked.push((key.clone(), check_value(key, spec, value)?));
        }

        let mut resolved = self.defaults();
        resolved.extend(checked);
        Ok(resolved)
    }
}

fn check_value(key: &str, spec: &ParameterSpec, value: &ParamValue) -> Result<ParamValue, ConfigurationError> {
    let type_error = || ConfigurationError::InvalidParameterType {
        key: key.to_string(),
        expected: spec.kind.as_str(),
    };

    let normalized = match (spec.kind, value) {
        (ParamKind::Float, ParamValue::Int(i)) => ParamValue::Float(*i as f64),
        (ParamKind::Float, ParamValue::Float(f)) => ParamValue::Float(*f),
        (ParamKind::Int, ParamValue::Int(i)) => ParamValue::Int(*i),
        // Whole floats are accepted for integer parameters (e.g. 128.0).
        (ParamKind::Int, ParamValue::Float(f)) if f.fract() == 0.0 && f.is_finite() => ParamValue::Int(*f as i64),
        (ParamKind::Text, ParamValue::Text(s)) => ParamValue::Text(s.clone()),
        _ => return Err(type_error()),
    };

    match &spec.constraint {
        Constraint::Range { min, max } => {
            let v = normalized.as_f64().ok_or_else(type_error)?;
            // NaN fails both comparisons and is rejected here.
            if !(*min <= v && v <= *max) {
                return Err(ConfigurationError::ParameterOutOfRange {
                    key: key.to_string(),
                    value: v,
                    min: *min,
                    max: *max,
                });
            }
        }
        Constraint::OneOf(allowed) => {
            let v = normalized.as_str().ok_or_else(type_error)?;
            if !allowed.iter().any(|a| a == v) {
                return Err(ConfigurationError::InvalidOption {
                    key: key.to_string(),
                    value: v.to_string(),
                    allowed: allowed.clone(),
                });
            }
        }
    }

    Ok(normalized)
}
