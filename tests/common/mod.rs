//! Shared helpers for jjm integration tests.
//!
//! All tests use temp directories and the in-memory server; nothing talks to
//! a real Jenkins or needs jenkins-job-builder installed.

#![allow(dead_code)]

use std::path::Path;
use std::process::{Command, Output};

use jjm_core::{DefinitionRenderer, MetadataRules, ReconcileError, ReconcileOptions, RenderRequest, RenderedJob};
use tempfile::TempDir;

pub const H1: &str = "<project>\n  <description>one</description>\n</project>\n";
pub const H2: &str = "<project>\n  <description>two</description>\n</project>\n";
pub const OWNED: &str = "<project>\n  <description>owner: web</description>\n</project>\n";

/// Renderer double returning a fixed job list.
pub struct FixedRenderer(pub Vec<RenderedJob>);

impl FixedRenderer {
    pub fn new(jobs: &[(&str, &str)]) -> Self {
        Self(jobs.iter().map(|(n, c)| RenderedJob::new(*n, *c)).collect())
    }
}

impl DefinitionRenderer for FixedRenderer {
    fn render(&self, _: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError> {
        Ok(self.0.clone())
    }
}

/// Renderer double that always fails.
pub struct BrokenRenderer;

impl DefinitionRenderer for BrokenRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError> {
        Err(ReconcileError::render(
            request.include_path,
            "jenkins-jobs exited with status 1: unknown macro",
        ))
    }
}

/// A definitions directory with one template entry, so the renderer runs.
pub fn template_definitions() -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    std::fs::write(
        dir.path().join("jobs.yaml"),
        "- job-template:\n    name: \"{name}\"\n- project:\n    name: all\n    jobs: [\"{name}\"]\n",
    )
    .expect("failed to write jobs.yaml");
    dir
}

/// A definitions directory holding only raw jobs (no renderer needed).
pub fn raw_definitions(jobs: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().expect("failed to create temp dir");
    let mut yaml = String::new();
    for (name, config) in jobs {
        let config = serde_json::to_string(config).expect("quote config");
        yaml.push_str(&format!("- job:\n    name: {name}\n    project-type: raw\n    raw: {config}\n"));
    }
    std::fs::write(dir.path().join("raw.yaml"), yaml).expect("failed to write raw.yaml");
    dir
}

/// Sequential options so call order is deterministic.
pub fn options(dir: &Path) -> ReconcileOptions {
    let mut options = ReconcileOptions::new(dir);
    options.fetch.concurrency = 1;
    options.apply.concurrency = 1;
    options
}

/// Rules requiring an `owner:` line in every description.
pub fn owner_required() -> MetadataRules {
    MetadataRules {
        required: vec!["owner".to_owned()],
        ..MetadataRules::default()
    }
}

/// Run the jjm binary in `dir` with a clean environment.
pub fn jjm(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_jjm"))
        .arg("-C")
        .arg(dir)
        .args(args)
        .env_remove("JJM_URL")
        .env_remove("JJM_USERNAME")
        .env_remove("JJM_PASSWORD")
        .env_remove("OTEL_EXPORTER_OTLP_ENDPOINT")
        .env("NO_COLOR", "1")
        .output()
        .expect("failed to run jjm")
}

pub fn stdout(out: &Output) -> String {
    String::from_utf8_lossy(&out.stdout).into_owned()
}

pub fn stderr(out: &Output) -> String {
    String::from_utf8_lossy(&out.stderr).into_owned()
}
