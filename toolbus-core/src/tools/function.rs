//! Function-calling export
//!
//! Renders a [`ToolDescriptor`] as an OpenAI-style function definition so a
//! model can be offered the live tools directly.

use super::schema::{ParamType, ParameterSchema};
use crate::protocol::ToolDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// `{"type": "function", "function": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionTool {
    #[serde(rename = "type")]
    pub kind: String,
    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: FunctionParameters,
}

/// JSON-schema object describing the arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameters {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: BTreeMap<String, FunctionParameter>,
    pub required: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionParameter {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<FunctionItems>,
    #[serde(rename = "enum", default, skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionItems {
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&ParameterSchema> for FunctionParameter {
    fn from(param: &ParameterSchema) -> Self {
        // Element types are not declared; strings are the common case
        let items = (param.param_type == ParamType::Array).then(|| FunctionItems {
            kind: ParamType::String.as_str().to_string(),
        });
        Self {
            kind: param.param_type.as_str().to_string(),
            description: param.description.clone(),
            items,
            enum_values: param.enum_values.clone(),
        }
    }
}

impl ToolDescriptor {
    /// Argument schema as seen by a model
    ///
    /// Parameters with a fixed value are left out; whatever the model sends
    /// for them is overridden anyway.
    pub fn function_parameters(&self) -> FunctionParameters {
        let mut properties = BTreeMap::new();
        let mut required = Vec::new();
        for param in self.parameters.iter().filter(|p| p.fixed_value.is_none()) {
            properties.insert(param.name.clone(), FunctionParameter::from(param));
            if param.required {
                required.push(param.name.clone());
            }
        }
        FunctionParameters {
            kind: "object".to_string(),
            properties,
            required,
        }
    }

    pub fn function_definition(&self) -> FunctionTool {
        FunctionTool {
            kind: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.function_parameters(),
            },
        }
    }
}
