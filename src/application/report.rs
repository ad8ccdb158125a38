//! Compile failure reporting.

use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing::warn;

/// One compile failure as shown on the diagnostic surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub message: String,
    pub source: String,
    pub diagnostics: String,
    pub reported_at: OffsetDateTime,
}

impl Diagnostic {
    pub fn new(
        message: impl Into<String>,
        source: impl Into<String>,
        diagnostics: impl Into<String>,
        reported_at: OffsetDateTime,
    ) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            diagnostics: diagnostics.into(),
            reported_at,
        }
    }

    /// Full read-only panel text: message, compiled source and compiler output.
    pub fn render(&self) -> String {
        let timestamp = self.reported_at.format(&Rfc3339).unwrap_or_default();
        let mut panel = format!("fragview compile error ({timestamp})\n{}\n", self.message);
        panel.push_str("\n--- source ---\n");
        panel.push_str(self.source.trim_end());
        panel.push_str("\n--- diagnostics ---\n");
        if self.diagnostics.trim().is_empty() {
            panel.push_str("(no diagnostic output)");
        } else {
            panel.push_str(self.diagnostics.trim_end());
        }
        panel
    }

    /// One-line user-visible notice.
    pub fn notice(&self) -> String {
        let headline = self.message.lines().next().unwrap_or_default();
        format!("fragview: compile failed: {headline} (see diagnostics)")
    }
}

/// Holds the most recent failure; each report replaces the previous one.
#[derive(Debug, Default)]
pub struct ErrorReporter {
    current: Option<Diagnostic>,
    reported: u64,
}

impl ErrorReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(
        &mut self,
        message: impl Into<String>,
        source: impl Into<String>,
        diagnostics: impl Into<String>,
    ) -> &Diagnostic {
        let diagnostic = Diagnostic::new(message, source, diagnostics, OffsetDateTime::now_utc());
        warn!(
            target = "application::report",
            op = "report::compile_failure",
            "{}",
            diagnostic.notice()
        );
        self.reported += 1;
        self.current.insert(diagnostic)
    }

    pub fn current(&self) -> Option<&Diagnostic> {
        self.current.as_ref()
    }

    /// Total failures reported since creation.
    pub fn reported(&self) -> u64 {
        self.reported
    }

    /// Close the panel. The report count is kept.
    pub fn clear(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn renders_panel_with_source_and_diagnostics() {
        let diagnostic = Diagnostic::new(
            "compiler finished (exit status: 1) without producing an artifact",
            "#set page(width: auto)\n#let k = 2\n$k + j$",
            "error: unknown variable: j\n  ┌─ input.typ:3:6\n",
            datetime!(2026-10-19 08:30:00 UTC),
        );

        insta::assert_snapshot!(diagnostic.render(), @r"
        fragview compile error (2026-10-19T08:30:00Z)
        compiler finished (exit status: 1) without producing an artifact

        --- source ---
        #set page(width: auto)
        #let k = 2
        $k + j$
        --- diagnostics ---
        error: unknown variable: j
          ┌─ input.typ:3:6
        ");
    }

    #[test]
    fn empty_diagnostics_are_called_out() {
        let diagnostic = Diagnostic::new("failed to spawn compiler", "$a$", "", OffsetDateTime::UNIX_EPOCH);
        assert!(diagnostic.render().ends_with("(no diagnostic output)"));
        assert_eq!(
            diagnostic.notice(),
            "fragview: compile failed: failed to spawn compiler (see diagnostics)"
        );
    }

    #[test]
    fn report_replaces_previous_diagnostic() {
        let mut reporter = ErrorReporter::new();
        reporter.report("first", "$a$", "");
        reporter.report("second", "$b$", "boom");

        let current = reporter.current().expect("diagnostic");
        assert_eq!(current.message, "second");
        assert_eq!(current.source, "$b$");
        assert_eq!(reporter.reported(), 2);
    }

    #[test]
    fn clear_closes_panel_but_keeps_count() {
        let mut reporter = ErrorReporter::new();
        reporter.report("first", "$a$", "");
        reporter.clear();

        assert!(reporter.current().is_none());
        assert_eq!(reporter.reported(), 1);
    }
}
