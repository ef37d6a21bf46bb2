//! Stage, check, swap, reload: the commit pipeline that turns a rendered
//! template body into a live file on disk.
//!
//! A render is written to a hidden sibling of the destination, optionally
//! validated by the resource's `check_cmd` (with `{{.src}}` substituted for
//! the staged path), then installed with `rename()` so readers never see a
//! partial write, and finally the resource's `reload_cmd` runs if the swap
//! happened.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use confd_types::{ConfdError, TemplateResource};

/// What `commit` actually did, so the scheduler can log and decide whether
/// to reset backoff state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommitOutcome {
    pub changed: bool,
    pub checked: bool,
    pub reloaded: bool,
    /// Set when the swap succeeded but the post-swap `reload_cmd` failed.
    /// Logged by the caller; never turned into an `Err` here, since the
    /// destination file is already correct and this isn't a commit failure.
    pub reload_error: Option<String>,
}

/// Gates on the commit pipeline's side effects, set from CLI flags.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitOptions {
    /// Render and log what would change without writing/renaming/reloading
    /// anything.
    pub noop: bool,
    /// Stage and rename, but skip `check_cmd`/`reload_cmd` entirely.
    pub sync_only: bool,
    /// Leave the staged file on disk instead of removing it when `check_cmd`
    /// fails, so an operator can inspect what would have been installed.
    pub keep_stage_file: bool,
}

/// Renders, checks, and installs `rendered` as `resource.dest`, running
/// `check_cmd`/`reload_cmd` as configured. `check_timeout` bounds how long
/// `check_cmd` may run before being killed.
pub fn commit(
    resource: &TemplateResource,
    rendered: &str,
    check_timeout: Option<Duration>,
) -> Result<CommitOutcome, ConfdError> {
    commit_with_options(resource, rendered, check_timeout, CommitOptions::default())
}

/// Like [`commit`], but with the dry-run/sync-only/keep-stage-file knobs
/// exposed for the CLI's `--noop`/`--sync-only`/`--keep-stage-file` flags.
pub fn commit_with_options(
    resource: &TemplateResource,
    rendered: &str,
    check_timeout: Option<Duration>,
    options: CommitOptions,
) -> Result<CommitOutcome, ConfdError> {
    let bytes = rendered.as_bytes();

    if !resource.reload_on_no_change && !would_change(&resource.dest, bytes, resource)? {
        return Ok(CommitOutcome::default());
    }

    if options.noop {
        log::info!(
            "resource {}: noop, would write {} bytes to {}",
            resource.name,
            bytes.len(),
            resource.dest.display()
        );
        return Ok(CommitOutcome { changed: true, ..CommitOutcome::default() });
    }

    let staged = stage(bytes, &resource.dest)?;
    let working_dir = resource
        .dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let checked = if options.sync_only {
        false
    } else if let Some(check_cmd) = &resource.check_cmd {
        let cmd = check_cmd.replace("{{.src}}", &staged.display().to_string());
        let output = confd_process::run_shell_command_with_timeout(&cmd, working_dir, check_timeout)
            .map_err(|e| ConfdError::Check(e.to_string()))?;
        if output.timed_out || output.exit_code != 0 {
            if !options.keep_stage_file {
                let _ = fs::remove_file(&staged);
            }
            return Err(ConfdError::Check(format!(
                "check_cmd `{cmd}` failed (exit {}): {}",
                output.exit_code, output.stderr
            )));
        }
        true
    } else {
        false
    };

    apply_staged(&staged, &resource.dest)?;
    apply_permissions(&resource.dest, resource)?;

    if options.sync_only {
        return Ok(CommitOutcome { changed: true, checked, reloaded: false, reload_error: None });
    }

    let (reloaded, reload_error) = if let Some(reload_cmd) = &resource.reload_cmd {
        match confd_process::run_shell_command_in_dir(reload_cmd, working_dir) {
            Ok(result) if result.success => (true, None),
            Ok(result) => (
                false,
                Some(format!("reload_cmd `{reload_cmd}` failed: {}", result.stderr)),
            ),
            Err(e) => (false, Some(format!("reload_cmd `{reload_cmd}` failed: {e}"))),
        }
    } else {
        (false, None)
    };

    if let Some(err) = &reload_error {
        log::warn!("resource {}: {err} (destination already swapped in)", resource.name);
    }

    Ok(CommitOutcome { changed: true, checked, reloaded, reload_error })
}

/// Cheap-to-expensive short-circuit: missing destination, size mismatch,
/// mode/uid/gid mismatch, then (only if everything else matches) a content
/// digest comparison.
fn would_change(dest: &Path, rendered: &[u8], resource: &TemplateResource) -> Result<bool, ConfdError> {
    let metadata = match fs::metadata(dest) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(ConfdError::Apply(format!("stat {}: {e}", dest.display())));
        }
    };

    if metadata.len() != rendered.len() as u64 {
        return Ok(true);
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        if let Some(mode) = resource.mode {
            if metadata.mode() & 0o7777 != mode {
                return Ok(true);
            }
        }
        if let Some(uid) = resource.uid {
            if metadata.uid() != uid {
                return Ok(true);
            }
        }
        if let Some(gid) = resource.gid {
            if metadata.gid() != gid {
                return Ok(true);
            }
        }
    }

    let existing = fs::read(dest).map_err(|e| ConfdError::Apply(format!("read {}: {e}", dest.display())))?;
    Ok(sha256_hex(&existing) != sha256_hex(rendered))
}

fn sha256_hex(bytes: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn stage_path(dest: &Path) -> PathBuf {
    let file_name = dest.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
    dest.with_file_name(format!(".{file_name}.confd-stage"))
}

fn stage(rendered: &[u8], dest: &Path) -> Result<PathBuf, ConfdError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| ConfdError::Apply(format!("create_dir_all {}: {e}", parent.display())))?;
    }
    let staged = stage_path(dest);
    let mut file = fs::File::create(&staged)
        .map_err(|e| ConfdError::Apply(format!("create staged file {}: {e}", staged.display())))?;
    use std::io::Write;
    file.write_all(rendered)
        .map_err(|e| ConfdError::Apply(format!("write staged file {}: {e}", staged.display())))?;
    file.sync_all().ok();
    Ok(staged)
}

fn apply_staged(staged: &Path, dest: &Path) -> Result<(), ConfdError> {
    fs::rename(staged, dest).map_err(|e| {
        ConfdError::Apply(format!("rename {} -> {}: {e}", staged.display(), dest.display()))
    })?;
    fsync_parent_dir(dest);
    Ok(())
}

/// Best-effort: not every platform supports opening a directory for sync.
fn fsync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(unix)]
fn apply_permissions(dest: &Path, resource: &TemplateResource) -> Result<(), ConfdError> {
    use std::os::unix::fs::PermissionsExt;

    if let Some(mode) = resource.mode {
        fs::set_permissions(dest, fs::Permissions::from_mode(mode))
            .map_err(|e| ConfdError::Apply(format!("chmod {}: {e}", dest.display())))?;
    }
    if resource.uid.is_some() || resource.gid.is_some() {
        let uid = resource.uid.map(nix::unistd::Uid::from_raw);
        let gid = resource.gid.map(nix::unistd::Gid::from_raw);
        nix::unistd::chown(dest, uid, gid)
            .map_err(|e| ConfdError::Apply(format!("chown {}: {e}", dest.display())))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn apply_permissions(_dest: &Path, _resource: &TemplateResource) -> Result<(), ConfdError> {
    Ok(())
}
