//! Definition renderer adapter: local YAML definitions → desired state.
//!
//! Definitions are the `*.yml` / `*.yaml` files directly inside one
//! directory, in the Jenkins Job Builder dialect: each file is a list of
//! single-key mappings (`- job:`, `- job-template:`, `- project:`, ...).
//!
//! Two kinds of job come out of a definitions directory:
//!
//! - **raw** jobs (`project-type: raw`) carry their `config.xml` verbatim,
//!   inline or via `!include-raw: <file>`. They are handled here and never
//!   reach the external renderer.
//! - everything else is written to a scratch directory and rendered by a
//!   [`DefinitionRenderer`] (normally `jenkins-jobs test`). Whatever it emits
//!   becomes a managed job.
//!
//! A job name may only be produced once across both paths.

use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde_yaml::Value;
use serde_yaml::value::Tag;
use tracing::{debug, instrument};

use crate::error::ReconcileError;
use crate::model::{DesiredState, JobDocument, JobState};

/// `project-type` value marking a verbatim job.
pub const RAW_PROJECT_TYPE: &str = "raw";

/// YAML tag that inlines a file's contents without interpretation.
const INCLUDE_RAW_TAG: &str = "include-raw";

// ---------------------------------------------------------------------------
// Renderer seam
// ---------------------------------------------------------------------------

/// One job emitted by a [`DefinitionRenderer`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedJob {
    /// Full job name (folders joined with `/`).
    pub name: String,
    /// The rendered `config.xml`.
    pub config: String,
}

impl RenderedJob {
    /// Create a rendered job.
    pub fn new(name: impl Into<String>, config: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: config.into(),
        }
    }
}

/// What to render.
#[derive(Clone, Copy, Debug)]
pub struct RenderRequest<'a> {
    /// Directory holding the definitions to render (raw jobs removed).
    pub sources: &'a Path,
    /// Directory that `!include*` tags resolve against (the user's
    /// definitions directory).
    pub include_path: &'a Path,
}

/// Turns template-based definitions into job configs.
pub trait DefinitionRenderer {
    /// Render every job defined under `request.sources`.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Render`] if the definitions are invalid or
    /// the renderer cannot run.
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError>;
}

/// [`DefinitionRenderer`] that shells out to Jenkins Job Builder.
///
/// Runs `jenkins-jobs --conf <ini> test --config-xml -o <out> <sources>` and
/// reads back every `<out>/<job name>/config.xml`.
#[derive(Clone, Debug)]
pub struct JobBuilderRenderer {
    program: PathBuf,
}

impl Default for JobBuilderRenderer {
    fn default() -> Self {
        Self::new("jenkins-jobs")
    }
}

impl JobBuilderRenderer {
    /// Use `program` as the `jenkins-jobs` executable.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The configured executable.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }
}

impl DefinitionRenderer for JobBuilderRenderer {
    #[instrument(skip(self, request), fields(program = %self.program.display()))]
    fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError> {
        let origin = request.include_path;
        let work = tempfile::tempdir()
            .map_err(|e| ReconcileError::render(origin, format!("cannot create scratch directory: {e}")))?;

        let conf = work.path().join("jenkins_jobs.ini");
        fs::write(&conf, builder_ini(request.include_path))
            .map_err(|e| ReconcileError::render(&conf, e))?;
        let out = work.path().join("out");

        let output = Command::new(&self.program)
            .arg("--conf")
            .arg(&conf)
            .arg("test")
            .arg("--config-xml")
            .arg("-o")
            .arg(&out)
            .arg(request.sources)
            .output()
            .map_err(|e| {
                ReconcileError::render(
                    origin,
                    format!(
                        "failed to run `{}`: {e} (is jenkins-job-builder installed?)",
                        self.program.display()
                    ),
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ReconcileError::render(
                origin,
                format!("`{}` exited with {}: {}", self.program.display(), output.status, stderr.trim()),
            ));
        }

        collect_config_xml(&out)
    }
}

fn builder_ini(include_path: &Path) -> String {
    format!(
        "[job_builder]\ninclude_path = {}\nkeep_descriptions = True\nallow_duplicates = False\n",
        include_path.display()
    )
}

/// Gather `<root>/<a>/<b>/config.xml` files as jobs named `a/b`.
fn collect_config_xml(root: &Path) -> Result<Vec<RenderedJob>, ReconcileError> {
    let mut jobs = Vec::new();
    if !root.is_dir() {
        return Ok(jobs);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = fs::read_dir(&dir).map_err(|e| ReconcileError::render(&dir, e))?;
        for entry in entries {
            let path = entry.map_err(|e| ReconcileError::render(&dir, e))?.path();
            if path.is_dir() {
                pending.push(path);
            } else if path.file_name() == Some(OsStr::new("config.xml"))
                && let Some(name) = job_name_for(root, &path)
            {
                let config = fs::read_to_string(&path).map_err(|e| ReconcileError::render(&path, e))?;
                jobs.push(RenderedJob { name, config });
            }
        }
    }

    jobs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(jobs)
}

fn job_name_for(root: &Path, config_xml: &Path) -> Option<String> {
    let relative = config_xml.parent()?.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// A `project-type: raw` job read from a definition file.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawDefinition {
    /// Job name.
    pub name: String,
    /// The verbatim config.
    pub config: String,
    /// The definition file it came from.
    pub source: PathBuf,
}

/// The parsed contents of a definitions directory.
#[derive(Clone, Debug, Default)]
pub struct Definitions {
    /// Raw jobs, in file then document order.
    pub raw: Vec<RawDefinition>,
    /// Non-raw entries per source file, for the external renderer.
    managed: Vec<(PathBuf, Vec<Value>)>,
}

impl Definitions {
    /// Whether any entry needs the external renderer.
    #[must_use]
    pub fn has_managed(&self) -> bool {
        !self.managed.is_empty()
    }

    /// Number of non-raw entries (jobs, templates, projects, ...).
    #[must_use]
    pub fn managed_entries(&self) -> usize {
        self.managed.iter().map(|(_, items)| items.len()).sum()
    }

    /// Write the non-raw entries into `dir`, one file per source file.
    ///
    /// # Errors
    /// Returns [`ReconcileError::Render`] if a file cannot be written.
    pub fn write_managed(&self, dir: &Path) -> Result<(), ReconcileError> {
        for (source, items) in &self.managed {
            let file_name = source.file_name().unwrap_or_else(|| OsStr::new("definitions.yaml"));
            let target = dir.join(file_name);
            let yaml = serde_yaml::to_string(&Value::Sequence(items.clone()))
                .map_err(|e| ReconcileError::render(source, e))?;
            fs::write(&target, yaml).map_err(|e| ReconcileError::render(&target, e))?;
        }
        Ok(())
    }
}

/// Definition files directly inside `dir`, sorted by file name.
///
/// # Errors
/// Returns [`ReconcileError::Render`] if `dir` cannot be read.
pub fn definition_files(dir: &Path) -> Result<Vec<PathBuf>, ReconcileError> {
    let entries = fs::read_dir(dir).map_err(|e| ReconcileError::render(dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| ReconcileError::render(dir, e))?.path();
        let is_yaml = matches!(
            path.extension().and_then(OsStr::to_str),
            Some("yml" | "yaml")
        );
        if is_yaml && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every definition file in `dir`.
///
/// # Errors
/// Returns [`ReconcileError::Render`] for unreadable files, invalid YAML,
/// malformed entries, or raw jobs whose config cannot be resolved.
pub fn load_definitions(dir: &Path) -> Result<Definitions, ReconcileError> {
    let mut definitions = Definitions::default();
    for file in definition_files(dir)? {
        let text = fs::read_to_string(&file).map_err(|e| ReconcileError::render(&file, e))?;
        let document: Value =
            serde_yaml::from_str(&text).map_err(|e| ReconcileError::render(&file, e))?;

        let items = match document {
            Value::Null => continue,
            Value::Sequence(items) => items,
            _ => {
                return Err(ReconcileError::render(
                    &file,
                    "expected a list of definitions (`- job: ...`)",
                ));
            }
        };

        let mut managed = Vec::new();
        for item in items {
            match raw_definition(&item, &file)? {
                Some(raw) => definitions.raw.push(raw),
                None => managed.push(item),
            }
        }
        debug!(file = %file.display(), managed = managed.len(), "loaded definitions");
        if !managed.is_empty() {
            definitions.managed.push((file, managed));
        }
    }
    Ok(definitions)
}

/// If `item` is a raw job, resolve it; otherwise `None`.
fn raw_definition(item: &Value, file: &Path) -> Result<Option<RawDefinition>, ReconcileError> {
    let Some(entry) = item.as_mapping() else {
        return Err(ReconcileError::render(file, "definition entries must be mappings"));
    };
    let Some(job) = entry.get("job").and_then(Value::as_mapping) else {
        return Ok(None);
    };
    if job.get("project-type").and_then(Value::as_str) != Some(RAW_PROJECT_TYPE) {
        return Ok(None);
    }

    let name = job
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| ReconcileError::render(file, "raw job without a `name`"))?;
    let raw = job
        .get("raw")
        .ok_or_else(|| ReconcileError::render(file, format!("raw job `{name}` has no `raw` config")))?;
    if job.get("jinja").and_then(Value::as_bool) == Some(true) {
        return Err(ReconcileError::render(
            file,
            format!("raw job `{name}`: `jinja: true` templating is not supported; commit the expanded XML instead"),
        ));
    }

    Ok(Some(RawDefinition {
        name: name.to_owned(),
        config: raw_config(raw, name, file)?,
        source: file.to_path_buf(),
    }))
}

fn raw_config(raw: &Value, name: &str, file: &Path) -> Result<String, ReconcileError> {
    match raw {
        Value::String(inline) => Ok(inline.clone()),
        Value::Tagged(tagged) if is_include_raw(&tagged.tag) => {
            let relative = tagged.value.as_str().ok_or_else(|| {
                ReconcileError::render(file, format!("raw job `{name}`: `!include-raw:` needs a file name"))
            })?;
            let base = file.parent().unwrap_or_else(|| Path::new("."));
            let path = base.join(relative);
            fs::read_to_string(&path).map_err(|e| ReconcileError::render(&path, e))
        }
        _ => Err(ReconcileError::render(
            file,
            format!("raw job `{name}`: `raw` must be a string or `!include-raw: <file>`"),
        )),
    }
}

fn is_include_raw(tag: &Tag) -> bool {
    let tag = tag.to_string();
    tag.trim_start_matches('!').trim_end_matches(':') == INCLUDE_RAW_TAG
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// Build desired state from the definitions in `dir`.
///
/// # Errors
/// - [`ReconcileError::Render`] if a definition cannot be parsed or rendered.
/// - [`ReconcileError::DuplicateJob`] if two definitions produce one name.
#[instrument(skip(renderer), fields(dir = %dir.display()))]
pub fn render_desired(dir: &Path, renderer: &dyn DefinitionRenderer) -> Result<DesiredState, ReconcileError> {
    let definitions = load_definitions(dir)?;
    let mut state = JobState::new();
    let mut origins: BTreeMap<String, String> = BTreeMap::new();

    for raw in &definitions.raw {
        let origin = format!("raw job in {}", raw.source.display());
        insert_unique(&mut state, &mut origins, JobDocument::raw(raw.name.clone(), raw.config.clone()), origin)?;
    }

    if definitions.has_managed() {
        let scratch = tempfile::tempdir()
            .map_err(|e| ReconcileError::render(dir, format!("cannot create scratch directory: {e}")))?;
        definitions.write_managed(scratch.path())?;
        let rendered = renderer.render(&RenderRequest {
            sources: scratch.path(),
            include_path: dir,
        })?;
        for job in rendered {
            let origin = format!("rendered from definitions in {}", dir.display());
            insert_unique(&mut state, &mut origins, JobDocument::managed(job.name, job.config), origin)?;
        }
    }

    debug!(jobs = state.len(), "rendered desired state");
    Ok(state)
}

fn insert_unique(
    state: &mut JobState,
    origins: &mut BTreeMap<String, String>,
    doc: JobDocument,
    origin: String,
) -> Result<(), ReconcileError> {
    let name = doc.name().to_owned();
    if state.try_insert(doc).is_err() {
        return Err(ReconcileError::DuplicateJob {
            first: origins.get(&name).cloned().unwrap_or_default(),
            name,
            second: origin,
        });
    }
    origins.insert(name, origin);
    Ok(())
}

/// A rendered document that will not be accepted by the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DefinitionProblem {
    /// The job the problem belongs to.
    pub job_name: String,
    /// What is wrong.
    pub message: String,
}

/// Local sanity checks on desired state: every config must be a non-empty
/// XML-looking document.
#[must_use]
pub fn validate(desired: &DesiredState) -> Vec<DefinitionProblem> {
    let mut problems = Vec::new();
    for doc in desired.iter() {
        let content = doc.content().unwrap_or_default().trim_start();
        let message = if content.is_empty() {
            "configuration is empty"
        } else if !content.starts_with('<') {
            "configuration does not look like an XML document"
        } else {
            continue;
        };
        problems.push(DefinitionProblem {
            job_name: doc.name().to_owned(),
            message: message.to_owned(),
        });
    }
    problems
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct FakeRenderer {
        jobs: Vec<RenderedJob>,
        seen: RefCell<Vec<String>>,
    }

    impl FakeRenderer {
        fn new(jobs: &[(&str, &str)]) -> Self {
            Self {
                jobs: jobs.iter().map(|(n, c)| RenderedJob::new(*n, *c)).collect(),
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl DefinitionRenderer for FakeRenderer {
        fn render(&self, request: &RenderRequest<'_>) -> Result<Vec<RenderedJob>, ReconcileError> {
            let files = definition_files(request.sources)?;
            for file in files {
                self.seen.borrow_mut().push(fs::read_to_string(file).unwrap());
            }
            Ok(self.jobs.clone())
        }
    }

    fn write(dir: &Path, name: &str, text: &str) {
        fs::write(dir.join(name), text).unwrap();
    }

    #[test]
    fn raw_jobs_bypass_the_renderer() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "seed.xml", "<project><description>seed</description></project>\n");
        write(
            dir.path(),
            "raw.yaml",
            "- job:\n    name: seed\n    project-type: raw\n    raw: !include-raw: seed.xml\n\
             - job:\n    name: inline\n    project-type: raw\n    raw: \"<project/>\"\n",
        );
        let renderer = FakeRenderer::new(&[]);

        let desired = render_desired(dir.path(), &renderer).unwrap();

        assert_eq!(desired.names().collect::<Vec<_>>(), vec!["inline", "seed"]);
        let seed = desired.get("seed").unwrap();
        assert_eq!(seed.kind(), crate::model::JobKind::Raw);
        assert!(seed.content().unwrap().contains("<description>seed</description>"));
        assert!(renderer.seen.borrow().is_empty(), "renderer must not run without managed entries");
    }

    #[test]
    fn managed_entries_are_forwarded_without_raw_jobs() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "jobs.yml",
            "- job:\n    name: built\n    builders:\n      - shell: make\n\
             - job:\n    name: verbatim\n    project-type: raw\n    raw: \"<project/>\"\n",
        );
        let renderer = FakeRenderer::new(&[("built", "<project><builders/></project>")]);

        let desired = render_desired(dir.path(), &renderer).unwrap();

        assert_eq!(desired.len(), 2);
        assert_eq!(desired.get("built").unwrap().kind(), crate::model::JobKind::Managed);
        let seen = renderer.seen.borrow();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].contains("built"));
        assert!(!seen[0].contains("verbatim"));
    }

    #[test]
    fn duplicate_raw_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let job = "- job:\n    name: dup\n    project-type: raw\n    raw: \"<project/>\"\n";
        write(dir.path(), "a.yaml", job);
        write(dir.path(), "b.yaml", job);

        let err = render_desired(dir.path(), &FakeRenderer::new(&[])).unwrap_err();

        match err {
            ReconcileError::DuplicateJob { name, first, second } => {
                assert_eq!(name, "dup");
                assert!(first.contains("a.yaml"));
                assert!(second.contains("b.yaml"));
            }
            other => panic!("expected duplicate error, got {other}"),
        }
    }

    #[test]
    fn rendered_name_colliding_with_raw_job_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "jobs.yaml",
            "- job:\n    name: same\n    project-type: raw\n    raw: \"<project/>\"\n\
             - job-template:\n    name: \"{name}-tmpl\"\n",
        );
        let renderer = FakeRenderer::new(&[("same", "<project/>")]);

        let err = render_desired(dir.path(), &renderer).unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateJob { ref name, .. } if name == "same"));
    }

    #[test]
    fn invalid_yaml_is_a_render_error_naming_the_file() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "broken.yaml", "- job:\n  name: [unclosed\n");

        let err = render_desired(dir.path(), &FakeRenderer::new(&[])).unwrap_err();
        match err {
            ReconcileError::Render { path, .. } => assert!(path.ends_with("broken.yaml")),
            other => panic!("expected render error, got {other}"),
        }
    }

    #[test]
    fn missing_include_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "raw.yaml",
            "- job:\n    name: gone\n    project-type: raw\n    raw: !include-raw: gone.xml\n",
        );
        let err = render_desired(dir.path(), &FakeRenderer::new(&[])).unwrap_err();
        assert!(matches!(err, ReconcileError::Render { ref path, .. } if path.ends_with("gone.xml")));
    }

    #[test]
    fn jinja_raw_jobs_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "raw.yaml",
            "- job:\n    name: templated\n    project-type: raw\n    jinja: true\n    raw: \"<project>{{ data.name }}</project>\"\n",
        );
        let err = load_definitions(dir.path()).unwrap_err();
        assert!(err.to_string().contains("`jinja: true` templating is not supported"), "{err}");
    }

    #[test]
    fn non_list_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "map.yaml", "job:\n  name: x\n");
        assert!(render_desired(dir.path(), &FakeRenderer::new(&[])).is_err());
    }

    #[test]
    fn empty_files_and_other_extensions_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.yaml", "");
        write(dir.path(), "notes.txt", "- job: {}\n");
        let desired = render_desired(dir.path(), &FakeRenderer::new(&[])).unwrap();
        assert!(desired.is_empty());
    }

    #[test]
    fn collects_nested_config_xml_as_folder_paths() {
        let out = tempfile::tempdir().unwrap();
        fs::create_dir_all(out.path().join("team/build")).unwrap();
        fs::write(out.path().join("team/config.xml"), "<folder/>").unwrap();
        fs::write(out.path().join("team/build/config.xml"), "<project/>").unwrap();

        let jobs = collect_config_xml(out.path()).unwrap();
        let names: Vec<_> = jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["team", "team/build"]);
    }

    #[test]
    fn missing_renderer_binary_is_a_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = JobBuilderRenderer::new("/nonexistent/jenkins-jobs");
        let err = renderer
            .render(&RenderRequest {
                sources: dir.path(),
                include_path: dir.path(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("jenkins-job-builder"));
    }

    #[test]
    fn validate_flags_empty_and_non_xml_configs() {
        let desired: JobState = [
            JobDocument::managed("empty", "  \n"),
            JobDocument::managed("text", "hello"),
            JobDocument::managed("ok", "<project/>"),
        ]
        .into_iter()
        .collect();
        let problems = validate(&desired);
        let names: Vec<_> = problems.iter().map(|p| p.job_name.as_str()).collect();
        assert_eq!(names, vec!["empty", "text"]);
    }
}
