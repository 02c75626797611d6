//! Typed step parameters

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::model::ModelRegistry;

/// A step parameter value, discriminated by `param_type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "param_type", rename_all = "snake_case")]
pub enum StepParameter {
    StaticText { value: String },
    StaticNumber { value: f64 },
    ModelReference { model_id: String },
    EnumChoice { value: String, options: Vec<String> },
}

/// Errors raised while parsing or checking step parameters
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParameterError {
    #[error("parameter '{name}' is malformed: {message}")]
    Malformed { name: String, message: String },

    #[error("parameters must be a JSON object")]
    NotAnObject,

    #[error("parameter '{name}' references unknown model '{model_id}'")]
    UnknownModel { name: String, model_id: String },

    #[error("parameter '{name}' value '{value}' is not one of {options:?}")]
    InvalidChoice {
        name: String,
        value: String,
        options: Vec<String>,
    },
}

impl StepParameter {
    pub fn text(value: impl Into<String>) -> Self {
        Self::StaticText {
            value: value.into(),
        }
    }

    pub fn number(value: f64) -> Self {
        Self::StaticNumber { value }
    }

    pub fn choice(value: impl Into<String>, options: Vec<String>) -> Self {
        Self::EnumChoice {
            value: value.into(),
            options,
        }
    }

    /// Textual value, for parameter kinds that carry one
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::StaticText { value } | Self::EnumChoice { value, .. } => Some(value),
            Self::ModelReference { model_id } => Some(model_id),
            Self::StaticNumber { .. } => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::StaticNumber { value } => Some(*value),
            _ => None,
        }
    }

    /// Render the value as it is sent to a provider
    pub fn render(&self) -> String {
        match self {
            Self::StaticNumber { value } if value.fract() == 0.0 => format!("{}", *value as i64),
            Self::StaticNumber { value } => value.to_string(),
            Self::StaticText { value } | Self::EnumChoice { value, .. } => value.clone(),
            Self::ModelReference { model_id } => model_id.clone(),
        }
    }

    /// Semantic checks that deserialization alone cannot express
    pub fn check(&self, name: &str, models: &ModelRegistry) -> Result<(), ParameterError> {
        match self {
            Self::ModelReference { model_id } if !models.contains(model_id) => {
                Err(ParameterError::UnknownModel {
                    name: name.to_string(),
                    model_id: model_id.clone(),
                })
            }
            Self::EnumChoice { value, options } if !options.contains(value) => {
                Err(ParameterError::InvalidChoice {
                    name: name.to_string(),
                    value: value.clone(),
                    options: options.clone(),
                })
            }
            Self::StaticNumber { value } if !value.is_finite() => Err(ParameterError::Malformed {
                name: name.to_string(),
                message: "number must be finite".to_string(),
            }),
            Self::StaticText { value } if value.trim().is_empty() => {
                Err(ParameterError::Malformed {
                    name: name.to_string(),
                    message: "text must not be empty".to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

/// Parse a raw JSON parameter blob into typed parameters
pub fn parse_parameters(blob: &Value) -> Result<BTreeMap<String, StepParameter>, ParameterError> {
    let object = match blob {
        Value::Object(map) => map,
        Value::Null => return Ok(BTreeMap::new()),
        _ => return Err(ParameterError::NotAnObject),
    };

    object
        .iter()
        .map(|(name, value)| {
            serde_json::from_value::<StepParameter>(value.clone())
                .map(|param| (name.clone(), param))
                .map_err(|e| ParameterError::Malformed {
                    name: name.clone(),
                    message: e.to_string(),
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ModelEntry;
    use serde_json::json;

    #[test]
    fn test_parse_parameters() {
        let params = parse_parameters(&json!({
            "instruction": {"param_type": "static_text", "value": "Tighten the prose"},
            "ratio": {"param_type": "static_number", "value": 0.5},
            "tone": {"param_type": "enum_choice", "value": "dry", "options": ["dry", "warm"]},
            "critic": {"param_type": "model_reference", "model_id": "m1"}
        }))
        .unwrap();

        assert_eq!(params.len(), 4);
        assert_eq!(params["instruction"].as_text(), Some("Tighten the prose"));
        assert_eq!(params["ratio"].as_number(), Some(0.5));
        assert_eq!(params["tone"].render(), "dry");
    }

    #[test]
    fn test_parse_parameters_rejects_bad_shapes() {
        let err = parse_parameters(&json!({"x": {"param_type": "static_text"}})).unwrap_err();
        assert!(matches!(err, ParameterError::Malformed { ref name, .. } if name == "x"));

        let err =
            parse_parameters(&json!({"x": {"param_type": "colour", "value": 1}})).unwrap_err();
        assert!(matches!(err, ParameterError::Malformed { .. }));

        assert_eq!(parse_parameters(&json!([1, 2])).unwrap_err(), ParameterError::NotAnObject);
        assert!(parse_parameters(&Value::Null).unwrap().is_empty());
    }

    #[test]
    fn test_check_parameters() {
        let models = ModelRegistry::new(vec![ModelEntry::new("m1", "openai")]);

        assert!(StepParameter::ModelReference { model_id: "m1".into() }
            .check("critic", &models)
            .is_ok());
        assert!(matches!(
            StepParameter::ModelReference { model_id: "m2".into() }.check("critic", &models),
            Err(ParameterError::UnknownModel { .. })
        ));
        assert!(matches!(
            StepParameter::choice("loud", vec!["dry".into()]).check("tone", &models),
            Err(ParameterError::InvalidChoice { .. })
        ));
        assert!(matches!(
            StepParameter::text("  ").check("instruction", &models),
            Err(ParameterError::Malformed { .. })
        ));
    }

    #[test]
    fn test_render_numbers() {
        assert_eq!(StepParameter::number(3.0).render(), "3");
        assert_eq!(StepParameter::number(0.25).render(), "0.25");
    }
}
