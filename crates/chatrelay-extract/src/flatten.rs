//! Rendered-HTML to flat text conversion.
//!
//! Decorative substructures are dropped before conversion so they never
//! pollute the output, then `html2text` does the markup-to-text work.

use scraper::{Html, Selector};

// Wide enough that re-wrapping can never rewrite text emitted on an earlier
// tick; the diff base depends on already-flattened text staying stable.
const TEXT_WIDTH: usize = 10_000;

/// Flatten one rendered entry to plain text.
///
/// Removes nodes matching `decorative` first, trims trailing whitespace, and
/// strips a trailing fenced-code terminator: while the response is still
/// streaming, a trailing fence is presumed to be a mid-stream sentinel
/// rather than content.
pub fn flatten_rendered(html: &str, decorative: Option<&str>) -> String {
    let stripped = match decorative {
        Some(selector) => strip_decorative(html, selector),
        None => html.to_string(),
    };
    let text = html2text::from_read(stripped.as_bytes(), TEXT_WIDTH).unwrap_or_default();
    normalize(&text)
}

/// Remove every node matching `selector` from the fragment.
fn strip_decorative(html: &str, selector: &str) -> String {
    let Ok(sel) = Selector::parse(selector) else {
        tracing::debug!(selector, "invalid decorative selector, skipping strip");
        return html.to_string();
    };
    let mut doc = Html::parse_fragment(html);
    let ids: Vec<_> = doc.select(&sel).map(|el| el.id()).collect();
    if ids.is_empty() {
        return html.to_string();
    }
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
    doc.root_element().html()
}

fn normalize(text: &str) -> String {
    let trimmed = text.trim_end();
    match trimmed.strip_suffix("```") {
        Some(rest) => rest.trim_end().to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_to_text() {
        assert_eq!(flatten_rendered("<p>hello</p>", None), "hello");
    }

    #[test]
    fn trailing_whitespace_trimmed() {
        assert_eq!(flatten_rendered("<p>hello   </p>", None), "hello");
    }

    #[test]
    fn decorative_nodes_removed() {
        let html = r#"<div><div class="code-header">Copy</div><p>body text</p></div>"#;
        let text = flatten_rendered(html, Some("div.code-header"));
        assert!(text.contains("body text"));
        assert!(!text.contains("Copy"));
    }

    #[test]
    fn decorative_selector_without_match_is_noop() {
        let html = "<p>plain</p>";
        assert_eq!(flatten_rendered(html, Some("div.code-header")), "plain");
    }

    #[test]
    fn invalid_decorative_selector_is_noop() {
        assert_eq!(flatten_rendered("<p>safe</p>", Some("[[[")), "safe");
    }

    #[test]
    fn dangling_fence_stripped() {
        assert_eq!(normalize("some text\n\n```"), "some text");
        assert_eq!(normalize("some text\n\n```\n"), "some text");
    }

    #[test]
    fn interior_fences_preserved() {
        let text = "```\nlet x = 1;\n```\nmore prose";
        assert_eq!(normalize(text), text);
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(flatten_rendered("", None), "");
    }

    #[test]
    fn growing_entry_output_is_prefix_stable() {
        // The later flatten must start with the earlier flatten, otherwise
        // the diff base breaks.
        let early = flatten_rendered("<p>The quick brown fox</p>", None);
        let late = flatten_rendered("<p>The quick brown fox jumps over the lazy dog</p>", None);
        assert!(late.starts_with(&early));
    }
}
