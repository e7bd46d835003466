//! Flat key/value configuration passed through to backends.
//!
//! The core never interprets these parameters; they are handed verbatim to
//! backend constructors and to the backend-property passthrough.

use std::collections::HashMap;

/// A primitive configuration value.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl ConfigValue {
    /// String contents, if this is a string value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer contents, if this is an integer value.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            _ => None,
        }
    }

    /// Float contents; integers coerce.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Bool contents, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// Flat string-keyed parameter map for backend construction.
#[derive(Debug, Clone, Default)]
pub struct SourceConfig {
    parameters: HashMap<String, ConfigValue>,
}

impl SourceConfig {
    /// Create an empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style parameter insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Insert or replace a parameter.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<ConfigValue>) {
        self.parameters.insert(key.into(), value.into());
    }

    /// Look up a parameter.
    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.parameters.get(key)
    }

    /// Number of parameters.
    pub fn len(&self) -> usize {
        self.parameters.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty()
    }
}
