//! Human-readable plan text.
//!
//! Output is a pure function of the changeset and options: entries appear in
//! changeset order, Unchanged entries only count towards the summary line.

use std::fmt::Write as _;

use similar::TextDiff;

use crate::diff::{Change, ChangeKind, Changeset};

/// Shown instead of entries when nothing would change.
pub const NO_CHANGES: &str = "No changes.";

/// Preview tuning.
#[derive(Clone, Copy, Debug)]
pub struct PreviewOptions {
    /// Replace full create/delete bodies with a one-line summary.
    pub summarize: bool,
    /// Unchanged lines shown around each update hunk.
    pub context_lines: usize,
}

impl Default for PreviewOptions {
    fn default() -> Self {
        Self {
            summarize: false,
            context_lines: 3,
        }
    }
}

/// Render `changeset` as plan text ending in the summary line.
#[must_use]
pub fn render_preview(changeset: &Changeset, options: &PreviewOptions) -> String {
    let mut out = String::new();

    if changeset.has_changes() {
        for change in changeset.pending() {
            render_change(&mut out, change, options);
        }
    } else {
        out.push_str(NO_CHANGES);
        out.push('\n');
    }

    out.push('\n');
    let _ = writeln!(out, "{}", changeset.counts());
    out
}

fn render_change(out: &mut String, change: &Change, options: &PreviewOptions) {
    let _ = writeln!(out, "{} {} {}", change.kind.marker(), change.kind.verb(), change.job_name);
    if let Some(detail) = &change.detail {
        let _ = writeln!(out, "  ! {detail}");
    }

    let before = change.before.as_ref().and_then(|d| d.content());
    let after = change.after.as_ref().and_then(|d| d.content());

    // An unreadable side has no line count; the `!` detail stands in for it.
    match change.kind {
        ChangeKind::Create if options.summarize => {
            if let Some(after) = after {
                let _ = writeln!(out, "  ({} lines)", after.lines().count());
            }
        }
        ChangeKind::Delete if options.summarize => {
            if let Some(before) = before {
                let _ = writeln!(out, "  ({} lines removed)", before.lines().count());
            }
        }
        ChangeKind::Create | ChangeKind::Update | ChangeKind::Delete => {
            let (before, after) = (before.unwrap_or_default(), after.unwrap_or_default());
            out.push_str(&unified(&change.job_name, before, after, options.context_lines));
        }
        ChangeKind::Unchanged => {}
    }
}

fn unified(job_name: &str, before: &str, after: &str, context_lines: usize) -> String {
    let server = format!("{job_name} (server)");
    let local = format!("{job_name} (local)");
    TextDiff::from_lines(before, after)
        .unified_diff()
        .context_radius(context_lines)
        .header(&server, &local)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff::diff;
    use crate::model::{JobDocument, JobState};

    fn state(jobs: &[(&str, &str)]) -> JobState {
        jobs.iter().map(|(n, c)| JobDocument::raw(*n, *c)).collect()
    }

    #[test]
    fn empty_changeset_says_no_changes() {
        let text = render_preview(&diff(&JobState::new(), &JobState::new()), &PreviewOptions::default());
        assert_eq!(text, "No changes.\n\nSummary: 0 created, 0 updated, 0 deleted, 0 unchanged.\n");
    }

    #[test]
    fn unchanged_jobs_are_only_counted() {
        let both = state(&[("same", "<same/>")]);
        let text = render_preview(&diff(&both, &both), &PreviewOptions::default());
        assert!(!text.contains("same"));
        assert!(text.starts_with(NO_CHANGES));
        assert!(text.ends_with("0 deleted, 1 unchanged.\n"));
    }

    #[test]
    fn update_shows_unified_diff() {
        let desired = state(&[("a", "<project>\n  <x>2</x>\n</project>")]);
        let actual = state(&[("a", "<project>\n  <x>1</x>\n</project>")]);

        let text = render_preview(&diff(&desired, &actual), &PreviewOptions::default());

        assert!(text.starts_with("~ update a\n"));
        assert!(text.contains("--- a (server)"));
        assert!(text.contains("+++ a (local)"));
        assert!(text.contains("-  <x>1</x>"));
        assert!(text.contains("+  <x>2</x>"));
    }

    #[test]
    fn summarize_collapses_create_and_delete_bodies() {
        let desired = state(&[("new", "<project>\n<a/>\n</project>")]);
        let actual = state(&[("old", "<project/>")]);
        let options = PreviewOptions {
            summarize: true,
            ..PreviewOptions::default()
        };

        let text = render_preview(&diff(&desired, &actual), &options);

        assert!(text.contains("+ create new\n  (3 lines)\n"));
        assert!(text.contains("- delete old\n  (1 lines removed)\n"));
        assert!(!text.contains("@@"));
    }

    #[test]
    fn degraded_update_carries_detail() {
        let desired = state(&[("a", "<a/>")]);
        let actual: JobState = [JobDocument::unknown("a", "HTTP 500")].into_iter().collect();
        let text = render_preview(&diff(&desired, &actual), &PreviewOptions::default());
        assert!(text.contains("~ update a\n  ! current configuration could not be verified: HTTP 500\n"));
    }

    #[test]
    fn summarized_degraded_delete_shows_detail_not_line_count() {
        let actual: JobState = [JobDocument::unknown("gone", "HTTP 500")].into_iter().collect();
        let options = PreviewOptions {
            summarize: true,
            ..PreviewOptions::default()
        };

        let text = render_preview(&diff(&JobState::new(), &actual), &options);

        assert!(
            text.starts_with("- delete gone\n  ! current configuration could not be verified: HTTP 500\n\n"),
            "{text}"
        );
        assert!(!text.contains("lines removed"), "{text}");
    }

    #[test]
    fn entries_follow_changeset_order() {
        let desired = state(&[("b", "<b/>"), ("a", "<a/>")]);
        let actual = state(&[("c", "<c/>")]);
        let text = render_preview(&diff(&desired, &actual), &PreviewOptions::default());
        let a = text.find("+ create a").unwrap();
        let b = text.find("+ create b").unwrap();
        let c = text.find("- delete c").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn preview_is_deterministic() {
        let desired = state(&[("x", "<x>\n1\n</x>"), ("y", "<y/>")]);
        let actual = state(&[("x", "<x>\n2\n</x>"), ("z", "<z/>")]);
        let changes = diff(&desired, &actual);
        let options = PreviewOptions::default();
        assert_eq!(render_preview(&changes, &options), render_preview(&changes, &options));
    }
}
