use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use confd_snapshot::Snapshot;
use handlebars::{Context, Handlebars, Helper, HelperDef, RenderContext, RenderError, RenderErrorReason, ScopedJson};
use serde_json::{json, Value};

use crate::{json_value, missing_param, number_param, string_param};

pub(crate) fn register_all(
    hb: &mut Handlebars<'static>,
    current: Arc<Mutex<Snapshot>>,
    current_dir: Arc<Mutex<Option<PathBuf>>>,
) {
    hb.register_helper("exists", Box::new(Exists(current.clone())));
    hb.register_helper("get", Box::new(Get(current.clone())));
    hb.register_helper("gets", Box::new(Gets(current.clone())));
    hb.register_helper("getv", Box::new(Getv(current.clone())));
    hb.register_helper("getvs", Box::new(Getvs(current.clone())));
    hb.register_helper("ls", Box::new(Ls(current.clone())));
    hb.register_helper("lsdir", Box::new(LsDir(current)));
    hb.register_helper("include", Box::new(Include(current_dir)));

    hb.register_helper("base64Encode", Box::new(FnHelper(base64_encode)));
    hb.register_helper("base64Decode", Box::new(FnHelper(base64_decode)));
    hb.register_helper("toUpper", Box::new(FnHelper(to_upper)));
    hb.register_helper("toLower", Box::new(FnHelper(to_lower)));
    hb.register_helper("replace", Box::new(FnHelper(replace)));
    hb.register_helper("split", Box::new(FnHelper(split)));
    hb.register_helper("join", Box::new(FnHelper(join)));
    hb.register_helper("add", Box::new(MathHelper(|a, b| a + b, "add")));
    hb.register_helper("sub", Box::new(MathHelper(|a, b| a - b, "sub")));
    hb.register_helper("mul", Box::new(MathHelper(|a, b| a * b, "mul")));
    hb.register_helper("div", Box::new(MathHelper(|a, b| a / b, "div")));
    hb.register_helper("mod", Box::new(MathHelper(|a, b| a % b, "mod")));
    hb.register_helper("datetime", Box::new(FnHelper(datetime)));
}

struct Exists(Arc<Mutex<Snapshot>>);
impl HelperDef for Exists {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let key = string_param(h, 0, "exists")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        json_value(json!(snap.exists(key)))
    }
}

struct Get(Arc<Mutex<Snapshot>>);
impl HelperDef for Get {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let key = string_param(h, 0, "get")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        let value = snap
            .get(key)
            .ok_or_else(|| RenderError::from(RenderErrorReason::Other(format!("key not found: {key}"))))?;
        json_value(json!({ "Key": key, "Value": value }))
    }
}

struct Gets(Arc<Mutex<Snapshot>>);
impl HelperDef for Gets {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let pattern = string_param(h, 0, "gets")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        let pairs: Vec<Value> = snap
            .get_all(pattern)
            .into_iter()
            .map(|(k, v)| json!({ "Key": k, "Value": v }))
            .collect();
        json_value(json!(pairs))
    }
}

struct Getv(Arc<Mutex<Snapshot>>);
impl HelperDef for Getv {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let key = string_param(h, 0, "getv")?;
        let default = h.param(1).and_then(|v| v.value().as_str());
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        match (snap.get(key), default) {
            (Some(v), _) => json_value(json!(v)),
            (None, Some(d)) => json_value(json!(d)),
            (None, None) => Err(RenderError::from(RenderErrorReason::Other(format!(
                "key not found: {key}"
            )))),
        }
    }
}

struct Getvs(Arc<Mutex<Snapshot>>);
impl HelperDef for Getvs {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let pattern = string_param(h, 0, "getvs")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        json_value(json!(snap.get_all_values(pattern)))
    }
}

struct Ls(Arc<Mutex<Snapshot>>);
impl HelperDef for Ls {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let dir = string_param(h, 0, "ls")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        json_value(json!(snap.list(dir)))
    }
}

struct LsDir(Arc<Mutex<Snapshot>>);
impl HelperDef for LsDir {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let dir = string_param(h, 0, "lsdir")?;
        let snap = self.0.lock().expect("snapshot mutex poisoned");
        json_value(json!(snap.list_dir(dir)))
    }
}

/// Resolves its argument relative to the template's own directory and
/// renders it through the same helper set, so partials see the same
/// snapshot-backed helpers as their parent.
struct Include(Arc<Mutex<Option<PathBuf>>>);
impl HelperDef for Include {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let rel = string_param(h, 0, "include")?;
        let dir = self.0.lock().expect("include dir mutex poisoned");
        let base = dir.clone().unwrap_or_else(|| PathBuf::from("."));
        let path = base.join(rel);
        let body = std::fs::read_to_string(&path).map_err(|e| {
            RenderError::from(RenderErrorReason::Other(format!(
                "include {}: {e}",
                path.display()
            )))
        })?;
        let rendered = r.render_template_with_context(&body, ctx)?;
        json_value(json!(rendered))
    }
}

/// Adapts a plain helper function into a [`HelperDef`] for stateless
/// helpers that don't need to close over any renderer state.
struct FnHelper(
    for<'reg, 'rc> fn(
        &Helper<'rc>,
        &'reg Handlebars<'reg>,
        &'rc Context,
        &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError>,
);
impl HelperDef for FnHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        (self.0)(h, r, ctx, rc)
    }
}

fn base64_encode<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    use base64::Engine;
    let input = string_param(h, 0, "base64Encode")?;
    json_value(json!(base64::engine::general_purpose::STANDARD.encode(input)))
}

fn base64_decode<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    use base64::Engine;
    let input = string_param(h, 0, "base64Decode")?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(input)
        .map_err(|e| RenderError::from(RenderErrorReason::Other(format!("base64Decode: {e}"))))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RenderError::from(RenderErrorReason::Other(format!("base64Decode: {e}"))))?;
    json_value(json!(text))
}

fn to_upper<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    json_value(json!(string_param(h, 0, "toUpper")?.to_uppercase()))
}

fn to_lower<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    json_value(json!(string_param(h, 0, "toLower")?.to_lowercase()))
}

fn replace<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    let input = string_param(h, 0, "replace")?;
    let from = string_param(h, 1, "replace")?;
    let to = string_param(h, 2, "replace")?;
    json_value(json!(input.replace(from, to)))
}

fn split<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    let input = string_param(h, 0, "split")?;
    let sep = string_param(h, 1, "split")?;
    let parts: Vec<&str> = input.split(sep).collect();
    json_value(json!(parts))
}

fn join<'reg, 'rc>(
    h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    let items = h.param(0).ok_or_else(|| missing_param("join", 0))?;
    let sep = string_param(h, 1, "join")?;
    let joined = items
        .value()
        .as_array()
        .ok_or_else(|| RenderError::from(RenderErrorReason::Other("join: first argument is not a list".to_string())))?
        .iter()
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .collect::<Vec<_>>()
        .join(sep);
    json_value(json!(joined))
}

struct MathHelper(fn(f64, f64) -> f64, &'static str);
impl HelperDef for MathHelper {
    fn call_inner<'reg: 'rc, 'rc>(
        &self,
        h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
    ) -> Result<ScopedJson<'rc>, RenderError> {
        let a = number_param(h, 0, self.1)?;
        let b = number_param(h, 1, self.1)?;
        let result = (self.0)(a, b);
        if result.fract() == 0.0 {
            json_value(json!(result as i64))
        } else {
            json_value(json!(result))
        }
    }
}

fn datetime<'reg, 'rc>(
    _h: &Helper<'rc>,
    _r: &'reg Handlebars<'reg>,
    _ctx: &'rc Context,
    _rc: &mut RenderContext<'reg, 'rc>,
) -> Result<ScopedJson<'rc>, RenderError> {
    json_value(json!(chrono::Utc::now().to_rfc3339()))
}
