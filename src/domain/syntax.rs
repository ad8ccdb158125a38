//! Fragment recognition.

use super::document::Fragment;
use super::span::Span;

/// Grammar that locates embedded fragments in document text.
pub trait FragmentSyntax: Send + Sync {
    /// Every fragment in `text` intersecting `region`, in document order.
    fn fragments(&self, text: &str, region: Span) -> Vec<Fragment>;
}

/// Inline math delimited by unescaped `$` on a single line.
///
/// Delimiters are kept in the fragment source, since the compiler needs them
/// to enter math mode.
#[derive(Debug, Clone, Copy, Default)]
pub struct DollarMath;

impl FragmentSyntax for DollarMath {
    fn fragments(&self, text: &str, region: Span) -> Vec<Fragment> {
        let bytes = text.as_bytes();
        let region = Span::new(region.start.min(bytes.len()), region.end.min(bytes.len()));

        let mut line_start = bytes[..region.start]
            .iter()
            .rposition(|b| *b == b'\n')
            .map_or(0, |pos| pos + 1);

        let mut fragments = Vec::new();
        while line_start <= bytes.len() {
            let line_end = bytes[line_start..]
                .iter()
                .position(|b| *b == b'\n')
                .map_or(bytes.len(), |pos| line_start + pos);

            collect_line(text, line_start, line_end, region, &mut fragments);

            if line_end >= region.end.max(region.start) || line_end == bytes.len() {
                break;
            }
            line_start = line_end + 1;
        }
        fragments
    }
}

fn collect_line(text: &str, start: usize, end: usize, region: Span, out: &mut Vec<Fragment>) {
    let bytes = text.as_bytes();
    let mut open: Option<usize> = None;

    for idx in start..end {
        if bytes[idx] != b'$' || is_escaped(bytes, start, idx) {
            continue;
        }
        match open.take() {
            None => open = Some(idx),
            Some(from) => {
                let span = Span::new(from, idx + 1);
                let inner = &text[from + 1..idx];
                if inner.trim().is_empty() || !intersects(&span, &region) {
                    continue;
                }
                out.push(Fragment::new(span, &text[span.start..span.end]));
            }
        }
    }
}

fn is_escaped(bytes: &[u8], line_start: usize, idx: usize) -> bool {
    let backslashes = bytes[line_start..idx]
        .iter()
        .rev()
        .take_while(|b| **b == b'\\')
        .count();
    backslashes % 2 == 1
}

fn intersects(span: &Span, region: &Span) -> bool {
    if region.is_empty() {
        return span.touches(region.start);
    }
    span.start < region.end && region.start < span.end
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sources(text: &str, region: Span) -> Vec<String> {
        DollarMath
            .fragments(text, region)
            .into_iter()
            .map(|fragment| fragment.source)
            .collect()
    }

    #[test]
    fn finds_inline_fragments_in_order() {
        let text = "a $x^2$ and $y_1$\nnext $z$";
        let found = DollarMath.fragments(text, Span::new(0, text.len()));

        assert_eq!(found.len(), 3);
        assert_eq!(found[0].source, "$x^2$");
        assert_eq!(found[0].span, Span::new(2, 7));
        assert_eq!(found[2].source, "$z$");
        assert_eq!(&text[found[2].span.start..found[2].span.end], "$z$");
    }

    #[test]
    fn skips_escaped_and_empty_delimiters() {
        let text = r"cost \$5 and $$ then $a$";
        assert_eq!(sources(text, Span::new(0, text.len())), vec!["$a$"]);
    }

    #[test]
    fn unterminated_delimiter_does_not_span_lines() {
        let text = "open $a\nclose $c$";
        assert_eq!(sources(text, Span::new(0, text.len())), vec!["$c$"]);
    }

    #[test]
    fn region_keeps_fragments_that_intersect() {
        let text = "$a$ mid $b$ end $c$";
        assert_eq!(sources(text, Span::new(9, 10)), vec!["$b$"]);
        assert_eq!(sources(text, Span::new(3, 8)), Vec::<String>::new());
    }

    #[test]
    fn region_starting_mid_line_still_pairs_from_line_start() {
        let text = "first\n$p$ x $q$";
        assert_eq!(sources(text, Span::new(10, text.len())), vec!["$q$"]);
    }
}
