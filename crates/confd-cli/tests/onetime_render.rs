//! End-to-end coverage of the env-backend onetime path through the real
//! `confd` binary: config file + conf.d resource on disk, a template on
//! disk, one process invocation, assertions on the rendered destination.

use std::fs;

use assert_cmd::Command;
use serial_test::serial;
use tempfile::tempdir;

fn write_confdir(confdir: &std::path::Path, resource_toml: &str, template: &str) -> std::path::PathBuf {
    let conf_d = confdir.join("conf.d");
    fs::create_dir_all(&conf_d).unwrap();
    fs::write(conf_d.join("app.toml"), resource_toml).unwrap();

    let template_path = confdir.join("app.tmpl");
    fs::write(&template_path, template).unwrap();
    template_path
}

#[test]
#[serial]
fn env_one_shot_render_produces_expected_output() {
    let td = tempdir().unwrap();
    let confdir = td.path();
    let dest = confdir.join("out");
    let template_path = write_confdir(
        confdir,
        &format!(
            r#"src = "{src}"
dest = "{dest}"
keys = ["/foo"]
mode = "0644"
"#,
            src = confdir.join("app.tmpl").display(),
            dest = dest.display(),
        ),
        r#"x={{ getv "/foo" }}"#,
    );
    assert!(template_path.exists());

    // SAFETY: test runs serialized to avoid races on process env.
    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var("FOO", "bar");
    }

    let mut cmd = Command::cargo_bin("confd").unwrap();
    cmd.args(["env", "--onetime", "--confdir"]).arg(confdir);
    cmd.assert().success();

    let rendered = fs::read_to_string(&dest).unwrap();
    assert_eq!(rendered, "x=bar");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&dest).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o644);
    }

    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var("FOO");
    }
}

#[test]
#[serial]
fn missing_key_falls_back_to_template_default() {
    let td = tempdir().unwrap();
    let confdir = td.path();
    let dest = confdir.join("out");
    write_confdir(
        confdir,
        &format!(
            r#"src = "{src}"
dest = "{dest}"
keys = ["/missing"]
"#,
            src = confdir.join("app.tmpl").display(),
            dest = dest.display(),
        ),
        r#"x={{ getv "/missing" "fallback" }}"#,
    );

    let mut cmd = Command::cargo_bin("confd").unwrap();
    cmd.args(["env", "--onetime", "--confdir"]).arg(confdir);
    cmd.assert().success();

    let rendered = fs::read_to_string(&dest).unwrap();
    assert_eq!(rendered, "x=fallback");
}

#[test]
#[serial]
fn check_cmd_failure_vetoes_rename_and_leaves_destination_untouched() {
    let td = tempdir().unwrap();
    let confdir = td.path();
    let dest = confdir.join("out");
    fs::write(&dest, "original").unwrap();

    write_confdir(
        confdir,
        &format!(
            r#"src = "{src}"
dest = "{dest}"
keys = ["/foo"]
check_cmd = "/bin/false"
"#,
            src = confdir.join("app.tmpl").display(),
            dest = dest.display(),
        ),
        r#"x={{ getv "/foo" }}"#,
    );

    #[allow(unsafe_code)]
    unsafe {
        std::env::set_var("FOO", "changed");
    }

    let mut cmd = Command::cargo_bin("confd").unwrap();
    cmd.args(["env", "--onetime", "--confdir"]).arg(confdir);
    cmd.assert().failure();

    let contents = fs::read_to_string(&dest).unwrap();
    assert_eq!(contents, "original");

    #[allow(unsafe_code)]
    unsafe {
        std::env::remove_var("FOO");
    }
}

#[test]
#[serial]
fn check_config_mode_validates_without_touching_destination() {
    let td = tempdir().unwrap();
    let confdir = td.path();
    let dest = confdir.join("out");
    write_confdir(
        confdir,
        &format!(
            r#"src = "{src}"
dest = "{dest}"
keys = ["/foo"]
"#,
            src = confdir.join("app.tmpl").display(),
            dest = dest.display(),
        ),
        r#"x={{ getv "/foo" }}"#,
    );

    let mut cmd = Command::cargo_bin("confd").unwrap();
    cmd.args(["env", "--check-config", "--confdir"]).arg(confdir);
    cmd.assert().success();

    assert!(!dest.exists());
}
