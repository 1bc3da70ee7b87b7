//! Declarative parameter schemas
//!
//! A tool declares each accepted input as a [`ParameterSchema`]. Schemas
//! travel inside tool announcements, so their serialized field names are part
//! of the wire contract with remote tool processes.

use super::value::ArgValue;
use crate::protocol::null_as_default;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Accepted value type of a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Number,
    Boolean,
    /// Element types are not checked
    #[serde(alias = "array:string", alias = "array:number", alias = "array:boolean")]
    Array,
    Object,
}

impl ParamType {
    /// Whether `value` has this type. `null` never matches.
    pub fn matches(&self, value: &ArgValue) -> bool {
        matches!(
            (self, value),
            (ParamType::String, ArgValue::String(_))
                | (ParamType::Number, ArgValue::Number(_))
                | (ParamType::Boolean, ArgValue::Bool(_))
                | (ParamType::Array, ArgValue::Array(_))
                | (ParamType::Object, ArgValue::Object(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::String => "string",
            ParamType::Number => "number",
            ParamType::Boolean => "boolean",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared tool input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    /// Canonical key; the only key under which the validated value is emitted
    pub name: String,

    /// Alternate accepted keys, matched case-insensitively
    #[serde(default, deserialize_with = "null_as_default")]
    pub aliases: Vec<String>,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "var_type")]
    pub param_type: ParamType,

    #[serde(default)]
    pub required: bool,

    /// Allowed values; only applied to string parameters
    #[serde(
        default,
        rename = "enum",
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub enum_values: Vec<String>,

    /// Substituted when the value is absent or invalid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<ArgValue>,

    /// Always wins over whatever the caller supplied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_value: Option<ArgValue>,
}

impl ParameterSchema {
    /// Create an optional parameter of the given type
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            description: String::new(),
            param_type,
            required: false,
            enum_values: Vec::new(),
            default: None,
            fixed_value: None,
        }
    }

    pub fn string(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::String)
    }

    pub fn number(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Number)
    }

    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Boolean)
    }

    pub fn array(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Array)
    }

    pub fn object(name: impl Into<String>) -> Self {
        Self::new(name, ParamType::Object)
    }

    /// Mark as required
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn with_aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_enum<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.enum_values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_default(mut self, value: impl Into<ArgValue>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn with_fixed_value(mut self, value: impl Into<ArgValue>) -> Self {
        self.fixed_value = Some(value.into());
        self
    }

    /// Lower-cased keys accepted for this parameter, canonical name first
    pub fn accepted_keys(&self) -> Vec<String> {
        std::iter::once(&self.name)
            .chain(self.aliases.iter())
            .map(|k| k.to_lowercase())
            .collect()
    }

    /// Type and enum check for a value
    pub fn check(&self, value: &ArgValue) -> Result<(), String> {
        if !self.param_type.matches(value) {
            return Err(format!(
                "expected {}, got {}",
                self.param_type,
                value.type_name()
            ));
        }
        if self.param_type == ParamType::String && !self.enum_values.is_empty() {
            if let ArgValue::String(s) = value {
                if !self.enum_values.iter().any(|allowed| allowed == s) {
                    return Err(format!(
                        "'{}' is not one of [{}]",
                        s,
                        self.enum_values.join(", ")
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Inconsistent schema declaration
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// A name or alias is claimed by more than one parameter
    #[error("key '{key}' of parameter '{parameter}' collides with parameter '{other}'")]
    KeyCollision {
        key: String,
        parameter: String,
        other: String,
    },

    /// Parameter name is empty
    #[error("parameter at position {0} has an empty name")]
    EmptyName(usize),
}

/// Check that no name or alias is shared between parameters of one tool
///
/// Keys are compared case-insensitively since matching is case-insensitive.
pub fn check_schema_set(parameters: &[ParameterSchema]) -> Result<(), SchemaError> {
    let mut owners: HashMap<String, &str> = HashMap::new();
    for (idx, param) in parameters.iter().enumerate() {
        if param.name.trim().is_empty() {
            return Err(SchemaError::EmptyName(idx));
        }
        let mut own_keys = param.accepted_keys();
        own_keys.dedup();
        for key in own_keys {
            if let Some(other) = owners.get(&key) {
                if *other != param.name {
                    return Err(SchemaError::KeyCollision {
                        key,
                        parameter: param.name.clone(),
                        other: other.to_string(),
                    });
                }
                continue;
            }
            owners.insert(key, &param.name);
        }
    }
    Ok(())
}
