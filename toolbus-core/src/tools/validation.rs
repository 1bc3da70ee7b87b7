//! Argument coercion and validation
//!
//! Turns a caller-supplied [`ExecutionArguments`] bag into a filtered bag that
//! only contains canonical parameter names. Schemas are processed in
//! declaration order:
//!
//! 1. A parameter with a fixed value always resolves to it.
//! 2. The first accepted key (canonical name, then aliases, in declaration
//!    order) present in the input, compared case-insensitively, supplies the
//!    value.
//! 3. A missing required parameter aborts the whole validation.
//! 4. A missing optional parameter resolves to its default, or is skipped.
//! 5. A value failing the type/enum check falls back to the default; without a
//!    default it aborts for required parameters and is dropped otherwise.

use super::schema::ParameterSchema;
use super::value::{ArgValue, ExecutionArguments};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Schema violation surfaced to the caller of validation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    /// No accepted key was present for a required parameter
    #[error("missing required parameter '{name}'")]
    MissingRequired { name: String },

    /// A required parameter had a value of the wrong type or outside its enum
    #[error("invalid value for parameter '{name}': {reason}")]
    InvalidValue { name: String, reason: String },
}

impl ValidationError {
    /// Canonical name of the offending parameter
    pub fn parameter(&self) -> &str {
        match self {
            ValidationError::MissingRequired { name } => name,
            ValidationError::InvalidValue { name, .. } => name,
        }
    }
}

/// Find the caller value for a schema
///
/// Accepted keys are tried in declaration order; for each, the caller keys are
/// scanned case-insensitively and the first hit wins.
fn lookup<'a>(
    schema: &ParameterSchema,
    arguments: &'a ExecutionArguments,
) -> Option<(&'a str, &'a ArgValue)> {
    schema.accepted_keys().iter().find_map(|accepted| {
        arguments
            .iter()
            .find(|(key, _)| key.to_lowercase() == *accepted)
            .map(|(key, value)| (key.as_str(), value))
    })
}

/// Validate and canonicalize arguments against an ordered schema list
pub fn validate_arguments(
    parameters: &[ParameterSchema],
    arguments: &ExecutionArguments,
) -> Result<ExecutionArguments, ValidationError> {
    let mut output = ExecutionArguments::new();

    for schema in parameters {
        if let Some(fixed) = &schema.fixed_value {
            output.insert(schema.name.clone(), fixed.clone());
            continue;
        }

        let Some((key, value)) = lookup(schema, arguments) else {
            if schema.required {
                return Err(ValidationError::MissingRequired {
                    name: schema.name.clone(),
                });
            }
            if let Some(default) = &schema.default {
                output.insert(schema.name.clone(), default.clone());
            }
            continue;
        };

        match schema.check(value) {
            Ok(()) => {
                output.insert(schema.name.clone(), value.clone());
            }
            Err(reason) => {
                if let Some(default) = &schema.default {
                    tracing::debug!(
                        parameter = %schema.name,
                        key = %key,
                        %reason,
                        "Invalid argument replaced by default"
                    );
                    output.insert(schema.name.clone(), default.clone());
                } else if schema.required {
                    return Err(ValidationError::InvalidValue {
                        name: schema.name.clone(),
                        reason,
                    });
                } else {
                    tracing::debug!(
                        parameter = %schema.name,
                        key = %key,
                        %reason,
                        "Dropping invalid optional argument"
                    );
                }
            }
        }
    }

    Ok(output)
}
