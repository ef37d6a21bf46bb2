//! Template rendering.
//!
//! Wraps `handlebars` and registers the fixed set of helpers every
//! `template-resource` can call: `exists`, `ls`, `lsdir`, `get`, `gets`,
//! `getv`, `getvs` close over the resource's current [`Snapshot`]; the rest
//! (`base64Encode`/`base64Decode`, `toUpper`/`toLower`/`replace`/`split`/
//! `join`, `add`/`sub`/`div`/`mul`/`mod`, `datetime`, `include`) are plain
//! value helpers with no snapshot dependency.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use confd_snapshot::Snapshot;
use confd_types::{ConfdError, OutputFormat};
use handlebars::{Handlebars, Helper, RenderError, RenderErrorReason, ScopedJson};
use serde_json::Value;

mod helpers;

/// Renders one resource's template against a [`Snapshot`], running on the
/// resource's own thread. Not `Sync`-shared across resources; each resource
/// thread builds its own `Renderer`.
pub struct Renderer {
    handlebars: Handlebars<'static>,
    current: Arc<Mutex<Snapshot>>,
    current_dir: Arc<Mutex<Option<PathBuf>>>,
}

impl Default for Renderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer {
    pub fn new() -> Self {
        let current = Arc::new(Mutex::new(Snapshot::default()));
        let current_dir = Arc::new(Mutex::new(None));
        let mut handlebars = Handlebars::new();
        handlebars.set_strict_mode(false);
        helpers::register_all(&mut handlebars, current.clone(), current_dir.clone());
        Self { handlebars, current, current_dir }
    }

    /// Renders the template at `src` against `snapshot`, returning the
    /// rendered body. `include` helpers inside the template resolve
    /// relative to `src`'s parent directory. If `output_format` is set, the
    /// rendered bytes are parsed as that format and malformedness is
    /// reported as `ConfdError::Format` rather than committed.
    pub fn render(
        &self,
        src: &Path,
        snapshot: &Snapshot,
        output_format: Option<OutputFormat>,
    ) -> Result<String, ConfdError> {
        *self.current.lock().expect("renderer snapshot mutex poisoned") = snapshot.clone();
        *self.current_dir.lock().expect("renderer dir mutex poisoned") =
            src.parent().map(Path::to_path_buf);

        let template = fs::read_to_string(src)
            .map_err(|e| ConfdError::Render(format!("reading template {}: {e}", src.display())))?;
        let rendered = self
            .handlebars
            .render_template(&template, &Value::Null)
            .map_err(|e| ConfdError::Render(format!("{}: {e}", src.display())))?;

        if let Some(format) = output_format {
            validate_format(&rendered, format)
                .map_err(|e| ConfdError::Format(format!("{}: {e}", src.display())))?;
        }

        Ok(rendered)
    }
}

/// Parses `body` as `format`, returning the error only for its
/// well-formedness — the parsed value itself is discarded.
fn validate_format(body: &str, format: OutputFormat) -> Result<(), String> {
    match format {
        OutputFormat::Json => serde_json::from_str::<Value>(body).map(|_| ()).map_err(|e| e.to_string()),
        OutputFormat::Yaml => {
            serde_yaml::from_str::<serde_yaml::Value>(body).map(|_| ()).map_err(|e| e.to_string())
        }
        OutputFormat::Toml => body.parse::<toml::Value>().map(|_| ()).map_err(|e| e.to_string()),
        OutputFormat::Xml => {
            let mut reader = quick_xml::Reader::from_str(body);
            loop {
                match reader.read_event() {
                    Ok(quick_xml::events::Event::Eof) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(e.to_string()),
                }
            }
        }
    }
}

fn missing_param(name: &str, index: usize) -> RenderError {
    RenderError::from(RenderErrorReason::ParamNotFoundForIndex(name, index))
}

fn string_param<'a>(h: &'a Helper, index: usize, name: &'static str) -> Result<&'a str, RenderError> {
    h.param(index)
        .and_then(|v| v.value().as_str())
        .ok_or_else(|| missing_param(name, index))
}

fn number_param(h: &Helper, index: usize, name: &'static str) -> Result<f64, RenderError> {
    h.param(index)
        .and_then(|v| v.value().as_f64())
        .ok_or_else(|| missing_param(name, index))
}

fn json_value<'a>(v: Value) -> Result<ScopedJson<'a>, RenderError> {
    Ok(ScopedJson::Derived(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use confd_types::KvSnapshot;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn snapshot(pairs: &[(&str, &str)]) -> Snapshot {
        let values: BTreeMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Snapshot::from_kv(KvSnapshot { values })
    }

    fn render_str(renderer: &Renderer, dir: &Path, name: &str, body: &str, snap: &Snapshot) -> String {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        renderer.render(&path, snap, None).unwrap()
    }

    #[test]
    fn renders_getv_with_default() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = snapshot(&[("/app/name", "demo")]);
        let out = render_str(&renderer, dir.path(), "t.tmpl", "name={{getv \"/app/name\"}}", &snap);
        assert_eq!(out, "name=demo");
        let out = render_str(&renderer, dir.path(), "t2.tmpl", "x={{getv \"/missing\" \"fallback\"}}", &snap);
        assert_eq!(out, "x=fallback");
    }

    #[test]
    fn renders_exists_conditional() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = snapshot(&[("/app/name", "demo")]);
        let out = render_str(
            &renderer,
            dir.path(),
            "t.tmpl",
            "{{#if (exists \"/app/name\")}}yes{{else}}no{{/if}}",
            &snap,
        );
        assert_eq!(out, "yes");
    }

    #[test]
    fn renders_ls_and_join() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = snapshot(&[("/app/db/host", "h"), ("/app/name", "demo")]);
        let out = render_str(
            &renderer,
            dir.path(),
            "t.tmpl",
            "{{join (ls \"/app\") \",\"}}",
            &snap,
        );
        assert_eq!(out, "db,name");
    }

    #[test]
    fn renders_math_and_case_helpers() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = Snapshot::default();
        let out = render_str(&renderer, dir.path(), "t.tmpl", "{{add 2 3}}", &snap);
        assert_eq!(out, "5");
        let out = render_str(&renderer, dir.path(), "t2.tmpl", "{{toUpper \"abc\"}}", &snap);
        assert_eq!(out, "ABC");
    }

    #[test]
    fn renders_base64_round_trip() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = Snapshot::default();
        let out = render_str(
            &renderer,
            dir.path(),
            "t.tmpl",
            "{{base64Decode (base64Encode \"hello\")}}",
            &snap,
        );
        assert_eq!(out, "hello");
    }

    #[test]
    fn include_resolves_relative_to_template_dir() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("partial.tmpl"), "included").unwrap();
        let renderer = Renderer::new();
        let snap = Snapshot::default();
        let out = render_str(&renderer, dir.path(), "main.tmpl", "{{include \"partial.tmpl\"}}", &snap);
        assert_eq!(out, "included");
    }

    #[test]
    fn get_errors_when_key_missing() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = Snapshot::default();
        let path = dir.path().join("t.tmpl");
        fs::write(&path, "{{get \"/missing\"}}").unwrap();
        assert!(renderer.render(&path, &snap, None).is_err());
    }

    #[test]
    fn output_format_rejects_malformed_json() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = Snapshot::default();
        let path = dir.path().join("t.tmpl");
        fs::write(&path, "{{getv \"/missing\" \"not json\"}}").unwrap();
        let err = renderer.render(&path, &snap, Some(OutputFormat::Json)).unwrap_err();
        assert!(matches!(err, ConfdError::Format(_)));
    }

    #[test]
    fn output_format_accepts_well_formed_json() {
        let dir = tempdir().unwrap();
        let renderer = Renderer::new();
        let snap = snapshot(&[("/app/name", "demo")]);
        let path = dir.path().join("t.tmpl");
        fs::write(&path, "{\"name\": \"{{getv \\\"/app/name\\\"}}\"}").unwrap();
        let out = renderer.render(&path, &snap, Some(OutputFormat::Json)).unwrap();
        assert_eq!(out, "{\"name\": \"demo\"}");
    }
}
