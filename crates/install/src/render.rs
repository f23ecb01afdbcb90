use std::fs;
use std::path::{Path, PathBuf};

use minijinja::{Environment, UndefinedBehavior};
use serde_json::{json, Value};
use tracing::debug;
use yard_core::{ObjectError, ResourceBatch};

const TEMPLATE_SUFFIXES: &[&str] = &["yaml", "yml", "tpl"];

/// Release metadata handed to templates as `Release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseOptions {
    pub name: String,
    pub namespace: String,
    pub is_install: bool,
    pub is_upgrade: bool,
}

impl ReleaseOptions {
    pub fn install(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into(), is_install: true, is_upgrade: false }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("could not read {path}: {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("invalid values in {path}: {message}")]
    Values { path: PathBuf, message: String },
    #[error("could not render template {name}: {source}")]
    Template { name: String, source: minijinja::Error },
    #[error("template {name} did not produce valid objects: {source}")]
    Manifest { name: String, source: ObjectError },
}

/// Turns a chart plus values into objects. Must be deterministic: the same
/// inputs always give the same batch.
pub trait Renderer: Send + Sync {
    fn render(&self, chart: &Path, values: &Value, release: &ReleaseOptions) -> Result<ResourceBatch, RenderError>;
}

/// Renders a chart directory: `values.yaml` defaults deep-merged with the
/// caller's values, then every file under `templates/` in name order.
/// Files starting with `_` are only available to `include`/`import`.
#[derive(Debug, Clone, Default)]
pub struct ChartRenderer;

impl ChartRenderer {
    pub fn new() -> Self { Self }

    pub fn default_values(chart: &Path) -> Result<Value, RenderError> {
        let path = chart.join("values.yaml");
        if !path.exists() { return Ok(Value::Object(Default::default())); }
        let text = fs::read_to_string(&path).map_err(|source| RenderError::Io { path: path.clone(), source })?;
        let values: Value = serde_yaml::from_str(&text).map_err(|e| RenderError::Values { path: path.clone(), message: e.to_string() })?;
        match values {
            Value::Null => Ok(Value::Object(Default::default())),
            v @ Value::Object(_) => Ok(v),
            _ => Err(RenderError::Values { path, message: "top level must be a mapping".into() }),
        }
    }

    fn templates(chart: &Path) -> Result<Vec<(String, String)>, RenderError> {
        let dir = chart.join("templates");
        let entries = fs::read_dir(&dir).map_err(|source| RenderError::Io { path: dir.clone(), source })?;
        let mut out = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| RenderError::Io { path: dir.clone(), source })?.path();
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            if !path.is_file() || !TEMPLATE_SUFFIXES.contains(&ext) { continue; }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default().to_string();
            let source = fs::read_to_string(&path).map_err(|source| RenderError::Io { path: path.clone(), source })?;
            out.push((name, source));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

impl Renderer for ChartRenderer {
    fn render(&self, chart: &Path, values: &Value, release: &ReleaseOptions) -> Result<ResourceBatch, RenderError> {
        let mut merged = Self::default_values(chart)?;
        merge_values(&mut merged, values);
        let templates = Self::templates(chart)?;

        let mut env = Environment::new();
        env.set_undefined_behavior(UndefinedBehavior::Chainable);
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in &templates {
            env.add_template(name, source).map_err(|source| RenderError::Template { name: name.clone(), source })?;
        }

        let ctx = json!({
            "Values": merged,
            "Release": {
                "Name": release.name,
                "Namespace": release.namespace,
                "IsInstall": release.is_install,
                "IsUpgrade": release.is_upgrade,
            },
        });

        let mut batch = ResourceBatch::new();
        for (name, _) in templates.iter().filter(|(n, _)| !n.starts_with('_')) {
            let template = env.get_template(name).map_err(|source| RenderError::Template { name: name.clone(), source })?;
            let text = template.render(&ctx).map_err(|source| RenderError::Template { name: name.clone(), source })?;
            let objects = ResourceBatch::parse_manifest(&text).map_err(|source| RenderError::Manifest { name: name.clone(), source })?;
            debug!(chart = %chart.display(), template = %name, objects = objects.len(), "rendered");
            batch.extend(objects);
        }
        Ok(batch)
    }
}

/// Deep-merges `overrides` into `base`: mappings merge key by key, anything
/// else replaces.
pub fn merge_values(base: &mut Value, overrides: &Value) {
    match (base, overrides) {
        (Value::Object(b), Value::Object(o)) => {
            for (k, v) in o {
                match b.get_mut(k) {
                    Some(existing) => merge_values(existing, v),
                    None => { b.insert(k.clone(), v.clone()); }
                }
            }
        }
        (b, o) => *b = o.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_is_deep_for_mappings_only() {
        let mut base = json!({"web": {"enabled": true, "port": 80}, "hosts": ["a", "b"], "keep": 1});
        merge_values(&mut base, &json!({"web": {"port": 8080}, "hosts": ["c"], "new": {"x": 1}}));
        assert_eq!(base, json!({"web": {"enabled": true, "port": 8080}, "hosts": ["c"], "keep": 1, "new": {"x": 1}}));
    }

    #[test]
    fn null_override_replaces() {
        let mut base = json!({"a": {"b": 1}});
        merge_values(&mut base, &json!({"a": null}));
        assert_eq!(base, json!({"a": null}));
    }
}
