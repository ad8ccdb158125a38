//! Document-wide context harvesting.
//!
//! Global declarations (variables, imports, set rules) are collected from the
//! whole document and prepended to every fragment before it is compiled.

use tracing::debug;

use crate::domain::DocumentHost;

const DEFAULT_DIRECTIVE_PREFIX: &str = "#+TYPST:";
const DEFAULT_FENCE_OPEN: &str = "```typst";
const DEFAULT_FENCE_CLOSE: &str = "```";
const DEFAULT_DECLARATION_KEYWORDS: [&str; 5] = ["#let", "#import", "#include", "#set", "#show"];

/// Rules describing where global declarations live in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestRules {
    /// Prefix of single-line directives; the remainder of the line is harvested.
    pub directive_prefix: String,
    /// Line prefix that opens a fenced declaration block.
    pub fence_open: String,
    /// Exact (trimmed) line that closes a fenced block.
    pub fence_close: String,
    /// Keep only fenced lines that start with one of `declaration_keywords`.
    pub require_declaration_prefix: bool,
    pub declaration_keywords: Vec<String>,
}

impl Default for HarvestRules {
    fn default() -> Self {
        Self {
            directive_prefix: DEFAULT_DIRECTIVE_PREFIX.to_string(),
            fence_open: DEFAULT_FENCE_OPEN.to_string(),
            fence_close: DEFAULT_FENCE_CLOSE.to_string(),
            require_declaration_prefix: true,
            declaration_keywords: DEFAULT_DECLARATION_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
        }
    }
}

impl HarvestRules {
    fn is_declaration(&self, line: &str) -> bool {
        self.declaration_keywords
            .iter()
            .any(|keyword| line.starts_with(keyword.as_str()))
    }

    /// Extract declarations from `text` in document order, one per line.
    pub fn extract(&self, text: &str) -> String {
        let mut harvested: Vec<&str> = Vec::new();
        let mut in_fence = false;

        for line in text.lines() {
            let trimmed = line.trim_start();
            if in_fence {
                if line.trim() == self.fence_close {
                    in_fence = false;
                } else if !self.require_declaration_prefix || self.is_declaration(trimmed) {
                    harvested.push(line);
                }
                continue;
            }

            if !self.fence_open.is_empty() && trimmed.starts_with(self.fence_open.as_str()) {
                in_fence = true;
            } else if let Some(rest) = trimmed.strip_prefix(self.directive_prefix.as_str()) {
                let rest = rest.trim();
                if !rest.is_empty() {
                    harvested.push(rest);
                }
            }
        }

        let mut context = harvested.join("\n");
        if !context.is_empty() {
            context.push('\n');
        }
        context
    }
}

/// Harvested declarations tied to the document version they were read from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GlobalContext {
    pub text: String,
    pub version: u64,
}

/// Caches the harvested context per document version.
#[derive(Debug, Default)]
pub struct ContextHarvester {
    rules: HarvestRules,
    cached: Option<GlobalContext>,
    passes: u64,
}

impl ContextHarvester {
    pub fn new(rules: HarvestRules) -> Self {
        Self {
            rules,
            cached: None,
            passes: 0,
        }
    }

    pub fn rules(&self) -> &HarvestRules {
        &self.rules
    }

    /// Current context for `doc`, rescanning only when its version moved.
    pub fn harvest(&mut self, doc: &dyn DocumentHost) -> &GlobalContext {
        let version = doc.version();
        let fresh = matches!(&self.cached, Some(context) if context.version == version);

        if !fresh {
            let text = doc
                .text(doc.full_span())
                .map(|full| self.rules.extract(full))
                .unwrap_or_default();
            self.passes += 1;
            debug!(
                target = "application::context",
                op = "context::harvest",
                version,
                context_bytes = text.len(),
                "Harvested global context"
            );
            self.cached = Some(GlobalContext { text, version });
        }

        self.cached.get_or_insert_with(GlobalContext::default)
    }

    /// Number of full-document scans performed so far.
    pub fn passes(&self) -> u64 {
        self.passes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Span, TextBuffer};

    const DOC: &str = "\
#+TYPST: #let k = 2
Some prose with $k x$.

```typst
#import \"@preview/physica:0.9.3\": *
This line is prose inside the fence.
  #let v = vec(1, 2)
```

#+TYPST: #set text(fill: blue)
";

    #[test]
    fn extracts_directives_and_fenced_declarations_in_order() {
        let context = HarvestRules::default().extract(DOC);
        assert_eq!(
            context,
            "#let k = 2\n#import \"@preview/physica:0.9.3\": *\n  #let v = vec(1, 2)\n#set text(fill: blue)\n"
        );
    }

    #[test]
    fn fenced_prose_is_kept_without_prefix_requirement() {
        let rules = HarvestRules {
            require_declaration_prefix: false,
            ..Default::default()
        };
        assert!(rules.extract(DOC).contains("This line is prose inside the fence."));
    }

    #[test]
    fn document_without_declarations_yields_empty_context() {
        assert_eq!(HarvestRules::default().extract("just $x$ here\n"), "");
    }

    #[test]
    fn unterminated_fence_runs_to_end() {
        let context = HarvestRules::default().extract("```typst\n#let a = 1\n#let b = 2");
        assert_eq!(context, "#let a = 1\n#let b = 2\n");
    }

    #[test]
    fn harvest_is_cached_by_version() {
        let mut buffer = TextBuffer::new(DOC);
        let mut harvester = ContextHarvester::default();

        let first = harvester.harvest(&buffer).clone();
        let second = harvester.harvest(&buffer).clone();
        assert_eq!(first, second);
        assert_eq!(harvester.passes(), 1);

        buffer
            .replace(Span::new(18, 19), "3")
            .expect("edit the declaration");
        let updated = harvester.harvest(&buffer).clone();
        assert_eq!(harvester.passes(), 2);
        assert!(updated.text.starts_with("#let k = 3\n"));
        assert_eq!(updated.version, buffer.version());
    }
}
