//! Server-rendered page of the shell.

use crate::processing::RunOutcome;
use pulldown_cmark::{Event, Options, Parser, Tag, TagEnd, html};
use std::fmt::Write;

/// Page title shown in the header and the browser tab.
pub const PAGE_TITLE: &str = "Market Research Synthesizer";
/// Hint shown while no run has been requested.
pub const IDLE_HINT: &str = "Enter a question above and click Generate summary to start.";

/// Current values of the sidebar and question controls.
#[derive(Debug, Clone, PartialEq)]
pub struct Controls {
    /// Business question typed by the user.
    pub question: String,
    /// Sampling temperature, 0.0-1.0.
    pub temperature: f32,
    /// Chunk size in characters, 500-2000.
    pub chunk_size: usize,
    /// Chunk overlap in characters, 0-500.
    pub chunk_overlap: usize,
    /// Directory the PDFs are read from.
    pub data_dir: String,
}

/// What the main panel shows below the question field.
#[derive(Debug, Clone)]
pub enum Panel {
    /// No run requested.
    Idle,
    /// A run finished.
    Outcome(RunOutcome),
    /// A run could not start or failed.
    Notice {
        /// Error category, used as a CSS class.
        kind: &'static str,
        /// Human-readable message.
        message: String,
    },
}

/// Render the full page.
pub fn render_page(controls: &Controls, panel: &Panel) -> String {
    let mut page = String::with_capacity(4096);
    page.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    let _ = writeln!(page, "<title>{PAGE_TITLE}</title>");
    page.push_str(STYLE);
    page.push_str("</head>\n<body>\n<form method=\"post\" action=\"/generate\">\n");
    render_sidebar(&mut page, controls);
    page.push_str("<main>\n");
    let _ = writeln!(page, "<h1>{PAGE_TITLE}</h1>");
    let _ = writeln!(
        page,
        "<label for=\"question\">Business question</label>\n\
         <input type=\"text\" id=\"question\" name=\"question\" value=\"{}\" \
         placeholder=\"e.g. What&#39;s new in the European cosmetics market?\">",
        escape_html(&controls.question)
    );
    page.push_str("<button type=\"submit\">Generate summary</button>\n");
    render_panel(&mut page, panel);
    page.push_str("</main>\n</form>\n</body>\n</html>\n");
    page
}

fn render_sidebar(page: &mut String, controls: &Controls) {
    page.push_str("<aside>\n<h2>Settings</h2>\n");
    let _ = writeln!(
        page,
        "<label for=\"temperature\">LLM Temperature</label>\n\
         <input type=\"range\" id=\"temperature\" name=\"temperature\" \
         min=\"0.0\" max=\"1.0\" step=\"0.1\" value=\"{:.1}\">",
        controls.temperature
    );
    let _ = writeln!(
        page,
        "<label for=\"chunk_size\">Chunk size (chars)</label>\n\
         <input type=\"range\" id=\"chunk_size\" name=\"chunk_size\" \
         min=\"500\" max=\"2000\" step=\"100\" value=\"{}\">",
        controls.chunk_size
    );
    let _ = writeln!(
        page,
        "<label for=\"chunk_overlap\">Chunk overlap (chars)</label>\n\
         <input type=\"range\" id=\"chunk_overlap\" name=\"chunk_overlap\" \
         min=\"0\" max=\"500\" step=\"50\" value=\"{}\">",
        controls.chunk_overlap
    );
    let _ = writeln!(
        page,
        "<p class=\"note\">Data folder: <code>{}</code> (drop your PDFs here)</p>",
        escape_html(&controls.data_dir)
    );
    page.push_str("</aside>\n");
}

fn render_panel(page: &mut String, panel: &Panel) {
    match panel {
        Panel::Idle => {
            let _ = writeln!(page, "<p class=\"hint\">{IDLE_HINT}</p>");
        }
        Panel::Notice { kind, message } => {
            let _ = writeln!(
                page,
                "<p class=\"notice {kind}\">{}</p>",
                escape_html(message)
            );
        }
        Panel::Outcome(outcome) => {
            let _ = writeln!(
                page,
                "<p class=\"success\">Loaded {} chunks from {} documents.</p>",
                outcome.chunk_count, outcome.document_count
            );
            for skipped in &outcome.skipped {
                let _ = writeln!(
                    page,
                    "<p class=\"notice input\">Skipped {}: {}</p>",
                    escape_html(&skipped.source_name),
                    escape_html(&skipped.reason)
                );
            }
            if let Some(summary) = &outcome.summary {
                page.push_str("<section>\n<h2>Executive Summary with Citations</h2>\n");
                page.push_str(&render_markdown(&summary.text));
                page.push_str("</section>\n");
            }
            page.push_str("<button type=\"button\" disabled>Download PPTX (coming soon)</button>\n");
        }
    }
}

/// Render model output as HTML.
///
/// Raw HTML in the input is shown as text. Links and images whose destination is not
/// `http`, `https`, `mailto` or relative are unwrapped: their text stays, the target goes.
pub fn render_markdown(text: &str) -> String {
    let mut unwrapped = Vec::new();
    let parser = Parser::new_ext(text, Options::ENABLE_STRIKETHROUGH).filter_map(move |event| {
        match event {
            Event::Html(raw) | Event::InlineHtml(raw) => Some(Event::Text(raw)),
            Event::Start(Tag::Link { .. } | Tag::Image { .. }) => {
                let strip = !has_safe_destination(&event);
                unwrapped.push(strip);
                (!strip).then_some(event)
            }
            Event::End(TagEnd::Link | TagEnd::Image) => {
                if unwrapped.pop().unwrap_or(false) {
                    None
                } else {
                    Some(event)
                }
            }
            other => Some(other),
        }
    });
    let mut output = String::with_capacity(text.len() * 3 / 2);
    html::push_html(&mut output, parser);
    output
}

fn has_safe_destination(event: &Event<'_>) -> bool {
    match event {
        Event::Start(Tag::Link { dest_url, .. } | Tag::Image { dest_url, .. }) => {
            is_safe_url(dest_url)
        }
        _ => true,
    }
}

/// Browsers ignore whitespace and control characters inside a scheme, so they are dropped
/// before the check.
fn is_safe_url(url: &str) -> bool {
    let compact: String = url
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control())
        .collect();
    let scheme_end = compact.find(|c: char| matches!(c, ':' | '/' | '?' | '#'));
    match scheme_end {
        Some(end) if compact[end..].starts_with(':') => {
            let scheme = compact[..end].to_ascii_lowercase();
            matches!(scheme.as_str(), "http" | "https" | "mailto")
        }
        _ => true,
    }
}

/// Escape text for use in HTML content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

const STYLE: &str = "<style>
body { margin: 0; font-family: sans-serif; }
form { display: flex; min-height: 100vh; }
aside { width: 16rem; padding: 1rem; background: #f0f2f6; }
aside label, aside input { display: block; width: 100%; }
main { flex: 1; padding: 1rem 2rem; }
main input[type=text] { width: 100%; margin-bottom: 0.5rem; }
.hint { color: #555; }
.success { color: #1a7f37; }
.notice { color: #b42318; }
.note { font-size: 0.85rem; }
</style>
";
