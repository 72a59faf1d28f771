use serde::{Deserialize, Serialize};

use crate::error::{Result, TemplateError};

/// Kind of workload a template describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    Model,
    Job,
}

/// One entry of a template's `values.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateValue {
    pub name: String,
    #[serde(default)]
    pub default: serde_json::Value,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<serde_json::Value>>,
}

/// A template's `metadata.yaml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateMetadata {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub version: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<TemplateKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_rules: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub values_rules: Option<String>,
}

/// An immutable template bundle loaded from
/// `<root>/<name>/{template.yaml, values.yaml, metadata.yaml}`.
#[derive(Debug, Clone)]
pub struct TemplateBundle {
    pub name: String,
    /// Raw manifest text with `{{placeholders}}`.
    pub manifest: String,
    pub defaults: Vec<TemplateValue>,
    pub metadata: TemplateMetadata,
}

impl TemplateBundle {
    pub fn parse(name: &str, manifest: String, values: &str, metadata: &str) -> Result<Self> {
        let defaults: Vec<TemplateValue> = serde_yaml::from_str(values)
            .map_err(|e| TemplateError::Invalid(format!("{name}/values.yaml: {e}")))?;
        let metadata: TemplateMetadata = serde_yaml::from_str(metadata)
            .map_err(|e| TemplateError::Invalid(format!("{name}/metadata.yaml: {e}")))?;
        Ok(Self {
            name: name.to_string(),
            manifest,
            defaults,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_bundle() {
        let values = r#"
- name: model_id
  default: "Qwen/Qwen3-4B"
  type: string
  description: HuggingFace model identifier
- name: id_field
  default: "model_id"
- name: replicas
  default: 1
  required: false
"#;
        let metadata = r#"
name: vllm
description: OpenAI-compatible inference server
icon: vllm.png
sources:
  - https://example.com/vllm
version: "0.2.0"
type: model
"#;
        let bundle =
            TemplateBundle::parse("vllm", "kind: Deployment".into(), values, metadata).unwrap();
        assert_eq!(bundle.defaults.len(), 3);
        assert_eq!(bundle.defaults[0].name, "model_id");
        assert_eq!(bundle.metadata.kind, Some(TemplateKind::Model));
    }

    #[test]
    fn bad_values_yaml_is_reported_with_the_file() {
        let err = TemplateBundle::parse("vllm", String::new(), "{not yaml", "name: vllm")
            .unwrap_err();
        assert!(err.to_string().contains("vllm/values.yaml"));
    }
}
