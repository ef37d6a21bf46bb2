//! Global and per-resource TOML configuration loading for confd-rs.
//!
//! Two shapes of file are loaded here: the single global config (`confd.toml`,
//! or whatever `--config-file` points at) covering backend connection and
//! runtime knobs, and one `conf.d/*.toml` file per template resource.
//! Precedence across all of it is CLI flag > environment variable > TOML
//! file > built-in default, implemented as `Option`-layered merging the
//! same way `shipper-config`'s `StorageConfigInner::to_cloud_config` chains
//! `.or_else(|| std::env::var(...).ok())` over a parsed TOML value.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use confd_types::{BackendConfig, BackendKind, FailureMode, TemplateResource};

/// Top-level `confd.toml` shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfigFile {
    #[serde(default)]
    pub backend: BackendSection,
    #[serde(default)]
    pub runtime: RuntimeSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendSection {
    pub kind: Option<String>,
    #[serde(default)]
    pub nodes: Vec<String>,
    pub scheme: Option<String>,
    pub auth_token: Option<String>,
    pub client_cert: Option<PathBuf>,
    pub client_key: Option<PathBuf>,
    pub client_ca_keys: Option<PathBuf>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub srv_domain: Option<String>,
    pub srv_record: Option<String>,
    #[serde(default)]
    pub file_paths: Vec<PathBuf>,
    pub region: Option<String>,
    pub table: Option<String>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay_ms: Option<u64>,
    pub retry_max_delay_ms: Option<u64>,
    pub secretsmanager_version_stage: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSection {
    #[serde(default)]
    pub confdir: Option<PathBuf>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub watch: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub onetime: bool,
    #[serde(default)]
    pub failure_mode: FailureMode,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_interval_secs() -> u64 {
    600
}
fn default_debounce_ms() -> u64 {
    0
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Default for RuntimeSection {
    fn default() -> Self {
        Self {
            confdir: None,
            prefix: None,
            watch: false,
            interval_secs: default_interval_secs(),
            debounce_ms: default_debounce_ms(),
            onetime: false,
            failure_mode: FailureMode::default(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// CLI-flag overrides, all optional so merging can distinguish "not
/// provided" from "provided as the default value" (unlike the boolean
/// sentinel comparisons `shipper-config::Config::merge` uses against
/// hardcoded defaults, every field here is a genuine `Option`).
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub backend_kind: Option<BackendKind>,
    pub nodes: Vec<String>,
    pub confdir: Option<PathBuf>,
    pub prefix: Option<String>,
    pub watch: Option<bool>,
    pub interval: Option<Duration>,
    pub onetime: Option<bool>,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    pub retry_max_attempts: Option<u32>,
    pub retry_base_delay: Option<Duration>,
    pub retry_max_delay: Option<Duration>,
}

/// Fully resolved runtime configuration: global config file, merged with CLI
/// overrides and (for secrets) environment variable fallbacks.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub backend: BackendConfig,
    pub confdir: PathBuf,
    pub prefix: String,
    pub watch: bool,
    pub interval: Duration,
    pub debounce: Duration,
    pub onetime: bool,
    pub failure_mode: FailureMode,
    pub log_level: String,
    pub log_format: String,
}

/// Load `confd.toml` from `path`. Missing file is not an error — confd-rs
/// runs fine driven entirely by CLI flags and environment variables.
pub fn load_global_config(path: &Path) -> Result<GlobalConfigFile> {
    if !path.exists() {
        return Ok(GlobalConfigFile::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))
}

/// Merge a loaded `confd.toml` with CLI overrides and environment-variable
/// fallbacks (`CONFD_BACKEND`, `CONFD_NODE`, `CONFD_AUTH_TOKEN`, ...) into
/// one resolved configuration. CLI wins over TOML; TOML wins over env.
pub fn resolve(file: &GlobalConfigFile, cli: &CliOverrides) -> Result<ResolvedConfig> {
    let kind = cli
        .backend_kind
        .or_else(|| file.backend.kind.as_deref().and_then(|s| s.parse().ok()))
        .or_else(|| std::env::var("CONFD_BACKEND").ok().and_then(|s| s.parse().ok()));

    let nodes = if !cli.nodes.is_empty() {
        cli.nodes.clone()
    } else if !file.backend.nodes.is_empty() {
        file.backend.nodes.clone()
    } else {
        std::env::var("CONFD_NODE")
            .ok()
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    };

    let auth_token = file
        .backend
        .auth_token
        .clone()
        .or_else(|| std::env::var("CONFD_AUTH_TOKEN").ok());

    let backend = BackendConfig {
        kind,
        nodes,
        scheme: file.backend.scheme.clone(),
        auth_token,
        client_cert: file.backend.client_cert.clone(),
        client_key: file.backend.client_key.clone(),
        client_ca_keys: file.backend.client_ca_keys.clone(),
        basic_auth: match (&file.backend.username, &file.backend.password) {
            (Some(u), Some(p)) => Some((u.clone(), p.clone())),
            _ => None,
        },
        username: file.backend.username.clone(),
        password: file.backend.password.clone(),
        srv_domain: file.backend.srv_domain.clone(),
        srv_record: file.backend.srv_record.clone(),
        file_paths: file.backend.file_paths.clone(),
        region: file.backend.region.clone(),
        table: file.backend.table.clone(),
        retry_max_attempts: cli.retry_max_attempts.or(file.backend.retry_max_attempts),
        retry_base_delay: cli
            .retry_base_delay
            .or_else(|| file.backend.retry_base_delay_ms.map(Duration::from_millis)),
        retry_max_delay: cli
            .retry_max_delay
            .or_else(|| file.backend.retry_max_delay_ms.map(Duration::from_millis)),
        secretsmanager_version_stage: file.backend.secretsmanager_version_stage.clone(),
    };

    let confdir = cli
        .confdir
        .clone()
        .or_else(|| file.runtime.confdir.clone())
        .unwrap_or_else(|| PathBuf::from("/etc/confd"));

    let prefix = cli
        .prefix
        .clone()
        .or_else(|| file.runtime.prefix.clone())
        .unwrap_or_default();

    let watch = cli.watch.unwrap_or(file.runtime.watch);
    let interval = cli
        .interval
        .unwrap_or_else(|| Duration::from_secs(file.runtime.interval_secs));
    let onetime = cli.onetime.unwrap_or(file.runtime.onetime);
    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| file.runtime.log_level.clone());
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| file.runtime.log_format.clone());

    Ok(ResolvedConfig {
        backend,
        confdir,
        prefix,
        watch,
        interval,
        debounce: Duration::from_millis(file.runtime.debounce_ms),
        onetime,
        failure_mode: file.runtime.failure_mode,
        log_level,
        log_format,
    })
}

/// A `conf.d/*.toml` resource declaration, before it's promoted to a
/// [`TemplateResource`] with its name filled in from the file stem.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceFile {
    pub src: PathBuf,
    pub dest: PathBuf,
    #[serde(default)]
    pub keys: Vec<String>,
    pub mode: Option<String>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub check_cmd: Option<String>,
    pub reload_cmd: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub reload_on_no_change: bool,
    pub output_format: Option<String>,
}

/// Parses a file mode string (`"0644"`, `"0o644"`, `"644"`, `"0"`, `"0000"`)
/// as octal. Strips at most one `0o`/`0` marker rather than looping, so an
/// all-zero mode doesn't get trimmed down to an empty string.
fn parse_octal_mode(raw: &str) -> Result<u32, std::num::ParseIntError> {
    let digits = raw.strip_prefix("0o").or_else(|| raw.strip_prefix('0')).unwrap_or(raw);
    if digits.is_empty() {
        return Ok(0);
    }
    u32::from_str_radix(digits, 8)
}

/// Walk `confdir/conf.d` loading every `*.toml` resource declaration.
/// Rejects two resources that declare the same `dest` — the later one is
/// rejected at load time (spec's concurrency-model invariant).
pub fn discover_resources(confdir: &Path) -> Result<Vec<TemplateResource>> {
    let conf_d = confdir.join("conf.d");
    let mut resources = Vec::new();
    let mut seen_dest = std::collections::HashSet::new();

    if !conf_d.exists() {
        return Ok(resources);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&conf_d)
        .with_context(|| format!("failed to read conf.d: {}", conf_d.display()))?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("toml"))
        .collect();
    entries.sort();

    for path in entries {
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("resource")
            .to_string();

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read resource file: {}", path.display()))?;
        let parsed: ResourceFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse resource file: {}", path.display()))?;

        if !seen_dest.insert(parsed.dest.clone()) {
            anyhow::bail!(
                "duplicate destination {} declared by resource {name}",
                parsed.dest.display()
            );
        }

        let mode = parsed
            .mode
            .as_deref()
            .map(parse_octal_mode)
            .transpose()
            .with_context(|| format!("invalid mode in resource {name}"))?;

        let output_format: Option<confd_types::OutputFormat> = parsed
            .output_format
            .as_deref()
            .map(str::parse)
            .transpose()
            .map_err(|e: confd_types::ConfdError| anyhow::anyhow!(e.to_string()))
            .with_context(|| format!("invalid output_format in resource {name}"))?;

        resources.push(TemplateResource {
            name,
            src: parsed.src,
            dest: parsed.dest,
            keys: parsed.keys,
            mode,
            uid: parsed.uid,
            gid: parsed.gid,
            check_cmd: parsed.check_cmd,
            reload_cmd: parsed.reload_cmd,
            prefix: parsed.prefix,
            reload_on_no_change: parsed.reload_on_no_change,
            output_format,
        });
    }

    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_global_config_yields_defaults() {
        let td = tempdir().unwrap();
        let cfg = load_global_config(&td.path().join("confd.toml")).unwrap();
        assert!(cfg.backend.nodes.is_empty());
        assert_eq!(cfg.runtime.interval_secs, 600);
    }

    #[test]
    fn cli_overrides_win_over_toml() {
        let file = GlobalConfigFile {
            backend: BackendSection {
                kind: Some("etcd".into()),
                ..Default::default()
            },
            runtime: RuntimeSection::default(),
        };
        let cli = CliOverrides {
            backend_kind: Some(BackendKind::Consul),
            ..Default::default()
        };
        let resolved = resolve(&file, &cli).unwrap();
        assert_eq!(resolved.backend.kind, Some(BackendKind::Consul));
    }

    #[test]
    fn toml_wins_when_no_cli_override() {
        let file = GlobalConfigFile {
            backend: BackendSection {
                kind: Some("vault".into()),
                ..Default::default()
            },
            runtime: RuntimeSection::default(),
        };
        let resolved = resolve(&file, &CliOverrides::default()).unwrap();
        assert_eq!(resolved.backend.kind, Some(BackendKind::Vault));
    }

    #[test]
    fn discover_resources_rejects_duplicate_dest() {
        let td = tempdir().unwrap();
        let conf_d = td.path().join("conf.d");
        std::fs::create_dir_all(&conf_d).unwrap();
        std::fs::write(
            conf_d.join("a.toml"),
            r#"src = "a.tmpl"
dest = "/etc/out.conf"
keys = ["/app/a"]
"#,
        )
        .unwrap();
        std::fs::write(
            conf_d.join("b.toml"),
            r#"src = "b.tmpl"
dest = "/etc/out.conf"
keys = ["/app/b"]
"#,
        )
        .unwrap();

        let err = discover_resources(td.path()).unwrap_err();
        assert!(err.to_string().contains("duplicate destination"));
    }

    #[test]
    fn discover_resources_parses_mode() {
        let td = tempdir().unwrap();
        let conf_d = td.path().join("conf.d");
        std::fs::create_dir_all(&conf_d).unwrap();
        std::fs::write(
            conf_d.join("app.toml"),
            r#"src = "app.tmpl"
dest = "/etc/app.conf"
keys = ["/app"]
mode = "0644"
"#,
        )
        .unwrap();

        let resources = discover_resources(td.path()).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].mode, Some(0o644));
        assert_eq!(resources[0].name, "app");
    }

    #[test]
    fn missing_conf_d_yields_empty_resource_list() {
        let td = tempdir().unwrap();
        let resources = discover_resources(td.path()).unwrap();
        assert!(resources.is_empty());
    }

    #[test]
    fn discover_resources_parses_all_zero_mode() {
        let td = tempdir().unwrap();
        let conf_d = td.path().join("conf.d");
        std::fs::create_dir_all(&conf_d).unwrap();
        std::fs::write(
            conf_d.join("app.toml"),
            r#"src = "app.tmpl"
dest = "/etc/app.conf"
keys = ["/app"]
mode = "0000"
"#,
        )
        .unwrap();

        let resources = discover_resources(td.path()).unwrap();
        assert_eq!(resources[0].mode, Some(0));
    }

    #[test]
    fn discover_resources_parses_output_format() {
        let td = tempdir().unwrap();
        let conf_d = td.path().join("conf.d");
        std::fs::create_dir_all(&conf_d).unwrap();
        std::fs::write(
            conf_d.join("app.toml"),
            r#"src = "app.tmpl"
dest = "/etc/app.json"
keys = ["/app"]
output_format = "json"
"#,
        )
        .unwrap();

        let resources = discover_resources(td.path()).unwrap();
        assert_eq!(resources[0].output_format, Some(confd_types::OutputFormat::Json));
    }
}
