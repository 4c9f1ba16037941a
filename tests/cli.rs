//! Binary-level tests: argument parsing, exit codes and error output.
//!
//! Only paths that need no Jenkins server and no jenkins-job-builder install
//! are exercised here.

mod common;
use common::*;

use tempfile::TempDir;

#[test]
fn help_lists_subcommands() {
    let dir = TempDir::new().unwrap();
    let out = jjm(dir.path(), &["--help"]);
    assert!(out.status.success());
    let text = stdout(&out);
    for command in ["check", "plan", "apply", "import", "login"] {
        assert!(text.contains(command), "missing {command} in:\n{text}");
    }
}

#[test]
fn check_raw_only_definitions() {
    let dir = raw_definitions(&[("legacy", H1), ("folder/nightly", H2)]);
    let out = jjm(dir.path(), &["check"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "2 job(s) OK (0 managed, 2 raw).\n");
}

#[test]
fn check_honours_targets() {
    let dir = raw_definitions(&[("legacy", H1), ("folder/nightly", H2)]);
    let out = jjm(dir.path(), &["check", "--target", "folder/*"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "1 job(s) OK (0 managed, 1 raw).\n");
}

#[test]
fn check_invalid_raw_job_exits_nonzero() {
    let dir = raw_definitions(&[("broken", "just text")]);
    let out = jjm(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stdout(&out).contains("job `broken`: configuration does not look like an XML document"));
}

#[test]
fn check_reads_definitions_path_from_config() {
    let dir = TempDir::new().unwrap();
    let jobs = raw_definitions(&[("legacy", H1)]);
    std::fs::create_dir(dir.path().join("jobs")).unwrap();
    std::fs::copy(jobs.path().join("raw.yaml"), dir.path().join("jobs/raw.yaml")).unwrap();
    std::fs::write(dir.path().join("jjm.toml"), "[definitions]\npath = \"jobs\"\n").unwrap();

    let out = jjm(dir.path(), &["check"]);
    assert!(out.status.success(), "stderr: {}", stderr(&out));
    assert_eq!(stdout(&out), "1 job(s) OK (0 managed, 1 raw).\n");
}

#[test]
fn check_metadata_violations_exit_five() {
    let dir = raw_definitions(&[("legacy", H1), ("owned", OWNED)]);
    std::fs::write(dir.path().join("jjm.toml"), "[metadata]\nrequired = [\"owner\"]\n").unwrap();

    let out = jjm(dir.path(), &["check"]);

    assert_eq!(out.status.code(), Some(5), "stderr: {}", stderr(&out));
    assert_eq!(
        stdout(&out),
        "Metadata validation errors\n  job `legacy`: missing required metadata `owner`\n"
    );
}

#[test]
fn malformed_definitions_fail_while_rendering() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("jobs.yaml"), "job: not-a-list\n").unwrap();
    let out = jjm(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(1));
    assert!(stderr(&out).contains("error: aborted while rendering"), "{}", stderr(&out));
}

#[test]
fn plan_without_url_explains_configuration() {
    let dir = raw_definitions(&[("legacy", H1)]);
    let out = jjm(dir.path(), &["plan"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("No Jenkins URL configured"), "{err}");
    assert!(err.contains("jjm.toml"), "{err}");
}

#[test]
fn invalid_config_is_reported_with_its_path() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("jjm.toml"), "[jenkins]\nconcurency = 3\n").unwrap();
    let out = jjm(dir.path(), &["check"]);
    assert_eq!(out.status.code(), Some(1));
    let err = stderr(&out);
    assert!(err.contains("jjm.toml"), "{err}");
    assert!(err.contains("concurency"), "{err}");
}

#[test]
fn unknown_output_format_is_rejected() {
    let dir = TempDir::new().unwrap();
    let out = jjm(dir.path(), &["plan", "--format", "xml"]);
    assert!(!out.status.success());
    assert!(stderr(&out).contains("Invalid format"), "{}", stderr(&out));
}
