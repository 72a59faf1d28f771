use std::collections::HashMap;
use std::path::PathBuf;

use orbit_common::{Result, TemplateBundle, TemplateError, TemplateKind, TemplateValue};

/// Key in `values.yaml` whose `default` names the value the deployment id
/// is derived from.
const ID_FIELD: &str = "id_field";
/// Key injected into the merged values with the slugified id.
const DEPLOYMENT_ID: &str = "deployment_id";

/// Loads template bundles from a directory tree and renders manifests.
///
/// Pure beyond the initial file loads; no suspension points.
#[derive(Debug, Clone)]
pub struct TemplateEngine {
    root: PathBuf,
}

impl TemplateEngine {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Template names available under the root, sorted.
    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let entry = entry?;
            if entry.path().join("template.yaml").is_file() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a bundle by name, optionally filtering on its declared kind.
    pub fn fetch(&self, name: &str, kind: Option<TemplateKind>) -> Result<TemplateBundle> {
        let dir = self.root.join(name);
        if !dir.join("template.yaml").is_file() {
            return Err(TemplateError::NotFound(name.to_string()).into());
        }
        let manifest = std::fs::read_to_string(dir.join("template.yaml"))?;
        let values = std::fs::read_to_string(dir.join("values.yaml"))?;
        let metadata = std::fs::read_to_string(dir.join("metadata.yaml"))?;
        let bundle = TemplateBundle::parse(name, manifest, &values, &metadata)?;
        if let Some(kind) = kind {
            if bundle.metadata.kind != Some(kind) {
                return Err(TemplateError::NotFound(name.to_string()).into());
            }
        }
        Ok(bundle)
    }

    /// Default value records of a template, for display and validation.
    pub fn defaults(&self, name: &str) -> Result<Vec<TemplateValue>> {
        Ok(self.fetch(name, None)?.defaults)
    }

    /// Merge defaults into `values` and substitute `{{placeholders}}`.
    ///
    /// The `id_field` record is special: its `default` names the key in
    /// `values` whose slugified content becomes `deployment_id`. Every
    /// other default fills in only when the caller did not supply the key,
    /// unless `force_defaults` is set.
    pub fn render(
        &self,
        bundle: &TemplateBundle,
        values: &HashMap<String, serde_json::Value>,
        force_defaults: bool,
    ) -> Result<String> {
        let mut merged = values.clone();

        for default in &bundle.defaults {
            if default.name == ID_FIELD {
                // The id source must be caller-supplied; a template default
                // would give every deployment the same id.
                let source_key = value_to_string(&default.default);
                let source = values.get(&source_key).ok_or_else(|| {
                    TemplateError::MissingIdSource {
                        key: source_key.clone(),
                    }
                })?;
                let id = slugify(&value_to_string(source));
                merged.insert(DEPLOYMENT_ID.to_string(), serde_json::Value::String(id));
                continue;
            }
            if force_defaults || !merged.contains_key(&default.name) {
                merged.insert(default.name.clone(), default.default.clone());
            }
        }

        substitute(&bundle.manifest, &merged)
    }

    /// The deployment id this bundle would render with, if it declares an
    /// `id_field`. Same derivation as `render`, without substituting.
    pub fn deployment_id(
        &self,
        bundle: &TemplateBundle,
        values: &HashMap<String, serde_json::Value>,
    ) -> Result<Option<String>> {
        let Some(id_field) = bundle.defaults.iter().find(|d| d.name == ID_FIELD) else {
            return Ok(None);
        };
        let source_key = value_to_string(&id_field.default);
        let source = values
            .get(&source_key)
            .ok_or_else(|| TemplateError::MissingIdSource {
                key: source_key.clone(),
            })?;
        Ok(Some(slugify(&value_to_string(source))))
    }
}

/// Replace every `{{ key }}` in `manifest` with the matching merged value.
fn substitute(
    manifest: &str,
    values: &HashMap<String, serde_json::Value>,
) -> Result<String> {
    let mut out = String::with_capacity(manifest.len());
    let mut rest = manifest;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let close = after.find("}}").ok_or_else(|| TemplateError::Invalid(
            "unterminated '{{' in template".to_string(),
        ))?;
        let key = after[..close].trim();
        match values.get(key) {
            Some(value) => out.push_str(&value_to_string(value)),
            None => {
                return Err(TemplateError::Unresolved {
                    key: key.to_string(),
                }
                .into())
            }
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

/// Slugify a value for use as a deployment id: lowercase, every run of
/// characters outside `[0-9a-z]` collapsed into a single `-`.
pub fn slugify(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out
}

fn value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(root: &std::path::Path, name: &str, manifest: &str, values: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("template.yaml"), manifest).unwrap();
        std::fs::write(dir.join("values.yaml"), values).unwrap();
        std::fs::write(
            dir.join("metadata.yaml"),
            format!("name: {name}\ndescription: test bundle\ntype: model\n"),
        )
        .unwrap();
    }

    fn vllm_engine() -> (tempfile::TempDir, TemplateEngine) {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            "vllm",
            "id: {{ deployment_id }}\nmodel: {{ model_id }}\n",
            concat!(
                "- name: model_id\n",
                "  default: \"Qwen/Qwen3-4B\"\n",
                "- name: id_field\n",
                "  default: \"model_id\"\n",
            ),
        );
        let engine = TemplateEngine::new(dir.path());
        (dir, engine)
    }

    #[test]
    fn slugify_collapses_and_keeps_trailing_dash() {
        assert_eq!(slugify("My Job!"), "my-job-");
        assert_eq!(slugify("mistralai/Mistral-7B"), "mistralai-mistral-7b");
        assert_eq!(slugify("Qwen/Qwen3-4B"), "qwen-qwen3-4b");
    }

    #[test]
    fn render_derives_deployment_id() {
        let (_dir, engine) = vllm_engine();
        let bundle = engine.fetch("vllm", None).unwrap();
        let values = HashMap::from([(
            "model_id".to_string(),
            serde_json::json!("mistralai/Mistral-7B"),
        )]);
        let rendered = engine.render(&bundle, &values, false).unwrap();
        assert!(rendered.contains("id: mistralai-mistral-7b"));
        assert!(rendered.contains("model: mistralai/Mistral-7B"));
    }

    #[test]
    fn missing_id_source_key_is_a_validation_error() {
        let (_dir, engine) = vllm_engine();
        let bundle = engine.fetch("vllm", None).unwrap();
        // id_field points at model_id, which the caller did not supply.
        let err = engine.render(&bundle, &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("model_id"));
    }

    #[test]
    fn defaults_fill_only_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(
            dir.path(),
            "echo",
            "a: {{ a }}\nb: {{ b }}\n",
            "- name: a\n  default: \"1\"\n- name: b\n  default: \"2\"\n",
        );
        let engine = TemplateEngine::new(dir.path());
        let bundle = engine.fetch("echo", None).unwrap();
        let values = HashMap::from([("a".to_string(), serde_json::json!("caller"))]);

        let rendered = engine.render(&bundle, &values, false).unwrap();
        assert_eq!(rendered, "a: caller\nb: 2\n");

        let forced = engine.render(&bundle, &values, true).unwrap();
        assert_eq!(forced, "a: 1\nb: 2\n");
    }

    #[test]
    fn unresolved_placeholder_is_surfaced_with_the_key() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "broken", "x: {{ nope }}\n", "[]");
        let engine = TemplateEngine::new(dir.path());
        let bundle = engine.fetch("broken", None).unwrap();
        let err = engine.render(&bundle, &HashMap::new(), false).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn fetch_unknown_template_fails() {
        let (_dir, engine) = vllm_engine();
        assert!(engine.fetch("missing", None).is_err());
    }

    #[test]
    fn kind_filter_applies() {
        let (_dir, engine) = vllm_engine();
        assert!(engine
            .fetch("vllm", Some(orbit_common::TemplateKind::Model))
            .is_ok());
        assert!(engine
            .fetch("vllm", Some(orbit_common::TemplateKind::Job))
            .is_err());
    }

    #[test]
    fn list_returns_sorted_names() {
        let (_dir, engine) = vllm_engine();
        assert_eq!(engine.list().unwrap(), vec!["vllm".to_string()]);
    }
}
