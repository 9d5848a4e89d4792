//! Comment text → safe HTML.
//!
//! Comments are stored as the author typed them and rendered when encoded
//! for the API. No engine lets the author's own HTML through: the plain
//! engines escape everything, and Markdown turns raw HTML into text.

use std::sync::Arc;

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, html};
use serde::Deserialize;

pub trait MarkupRenderer: Send + Sync + 'static {
    fn render(&self, text: &str) -> String;
}

/// Selectable engines, named as in the `markup` configuration option.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkupEngine {
    /// CommonMark with strikethrough and tables.
    #[default]
    Markdown,
    /// Escaped text, newlines become `<br>`.
    Plain,
    /// Escaped text split into `<p>` blocks on blank lines.
    Paragraphs,
}

impl MarkupEngine {
    pub fn renderer(self) -> Arc<dyn MarkupRenderer> {
        match self {
            Self::Markdown => Arc::new(Markdown),
            Self::Plain => Arc::new(Plain),
            Self::Paragraphs => Arc::new(Paragraphs),
        }
    }
}

pub struct Markdown;

impl MarkupRenderer for Markdown {
    fn render(&self, text: &str) -> String {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);

        let events = Parser::new_ext(text, options).map(|event| match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Event::Text(raw),
            Event::Start(Tag::Link { link_type, dest_url, title, id }) => {
                Event::Start(Tag::Link { link_type, dest_url: safe_url(dest_url), title, id })
            }
            Event::Start(Tag::Image { link_type, dest_url, title, id }) => {
                Event::Start(Tag::Image { link_type, dest_url: safe_url(dest_url), title, id })
            }
            other => other,
        });

        let mut out = String::with_capacity(text.len() * 3 / 2);
        html::push_html(&mut out, events);
        out
    }
}

/// Empties link targets whose scheme runs code in the browser.
fn safe_url(url: CowStr<'_>) -> CowStr<'_> {
    let scheme = url.trim_start().split(':').next().unwrap_or_default().to_ascii_lowercase();
    let scripted = url.contains(':') && matches!(scheme.trim(), "javascript" | "vbscript" | "data");
    if scripted { CowStr::Borrowed("") } else { url }
}

pub struct Plain;

impl MarkupRenderer for Plain {
    fn render(&self, text: &str) -> String {
        line_breaks(&escape(text.trim()))
    }
}

pub struct Paragraphs;

impl MarkupRenderer for Paragraphs {
    fn render(&self, text: &str) -> String {
        let text = text.replace("\r\n", "\n");
        text.split("\n\n")
            .map(str::trim)
            .filter(|block| !block.is_empty())
            .map(|block| format!("<p>{}</p>", line_breaks(&escape(block))))
            .collect()
    }
}

fn line_breaks(escaped: &str) -> String {
    escaped.replace("\r\n", "\n").replace('\n', "<br>")
}

pub(crate) fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_renders_common_syntax() {
        assert_eq!(Markdown.render("*hi* and **bye**"), "<p><em>hi</em> and <strong>bye</strong></p>\n");
        assert_eq!(Markdown.render("~~gone~~"), "<p><del>gone</del></p>\n");

        let list = Markdown.render("# Title\n\n- a\n- b\n");
        assert!(list.starts_with("<h1>Title</h1>"), "{list}");
        assert!(list.contains("<li>a</li>") && list.contains("<li>b</li>"), "{list}");

        let link = Markdown.render("[site](https://example.org/)");
        assert_eq!(link, "<p><a href=\"https://example.org/\">site</a></p>\n");
    }

    #[test]
    fn markdown_shows_raw_html_as_text() {
        assert_eq!(Markdown.render("*hi* <b>x</b>"), "<p><em>hi</em> &lt;b&gt;x&lt;/b&gt;</p>\n");

        let block = Markdown.render("<script>alert(1)</script>\n\nafter");
        assert!(!block.contains("<script"), "{block}");
        assert!(block.contains("&lt;script&gt;alert(1)&lt;/script&gt;"), "{block}");
        assert!(block.contains("<p>after</p>"), "{block}");
    }

    #[test]
    fn markdown_drops_scripted_links() {
        for url in ["javascript:alert(1)", "JavaScript:alert(1)", "data:text/html,x", "vbscript:x"] {
            let out = Markdown.render(&format!("[click]({url}) ![img]({url})"));
            assert!(!out.to_ascii_lowercase().contains(&url.to_ascii_lowercase()[..8]), "{out}");
            assert!(out.contains("<a href=\"\">click</a>"), "{out}");
        }
    }

    #[test]
    fn plain_escapes_and_breaks_lines() {
        assert_eq!(
            Plain.render("<script>alert('x')</script>\nbye & thanks"),
            "&lt;script&gt;alert(&#x27;x&#x27;)&lt;/script&gt;<br>bye &amp; thanks"
        );
    }

    #[test]
    fn paragraphs_split_on_blank_lines() {
        assert_eq!(
            Paragraphs.render("first\nline\r\n\r\n\n\nsecond <b>"),
            "<p>first<br>line</p><p>second &lt;b&gt;</p>"
        );
        assert_eq!(Paragraphs.render("   "), "");
    }

    #[test]
    fn engines_are_selected_by_name() {
        let engine: MarkupEngine = serde_json::from_str(r#""paragraphs""#).unwrap();
        assert_eq!(engine, MarkupEngine::Paragraphs);
        assert_eq!(engine.renderer().render("a"), "<p>a</p>");

        assert_eq!(MarkupEngine::default(), MarkupEngine::Markdown);
        let engine: MarkupEngine = serde_json::from_str(r#""markdown""#).unwrap();
        assert_eq!(engine.renderer().render("_a_"), "<p><em>a</em></p>\n");
        assert!(serde_json::from_str::<MarkupEngine>(r#""textile""#).is_err());
    }
}
