//! Citation tag helpers.
//!
//! Tags look like `[report.pdf, p.3]`. The map stage asks the model to write them, then makes
//! sure the exact tag of the chunk is present; the reduce stage re-attaches any tag the model
//! dropped while merging.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Format the citation tag of a source page.
pub fn citation_tag(source_name: &str, page_number: u32) -> String {
    format!("[{source_name}, p.{page_number}]")
}

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\[[^\[\]\n]+?, p\.\d+\]").expect("citation pattern must compile")
    })
}

/// Extract distinct citation tags in order of first appearance.
pub fn extract_citation_tags(text: &str) -> Vec<String> {
    dedupe(tag_pattern().find_iter(text).map(|m| m.as_str().to_string()))
}

/// Make sure `text` carries `tag`, appending it when the model left it out.
pub fn ensure_citation(text: &str, tag: &str) -> String {
    let trimmed = text.trim();
    if trimmed.contains(tag) {
        return trimmed.to_string();
    }
    if trimmed.is_empty() {
        return tag.to_string();
    }
    format!("{trimmed} {tag}")
}

/// Append a `Sources:` line listing every tag that is missing from `text`.
pub fn append_missing_sources(text: &str, citations: &[String]) -> String {
    let trimmed = text.trim();
    let missing: Vec<&str> = citations
        .iter()
        .map(String::as_str)
        .filter(|tag| !trimmed.contains(tag))
        .collect();
    if missing.is_empty() {
        return trimmed.to_string();
    }
    format!("{trimmed}\n\nSources: {}", missing.join(" "))
}

/// Merge tag lists, keeping first-seen order.
pub fn merge_citations<'a, I>(lists: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a [String]>,
{
    dedupe(lists.into_iter().flatten().cloned())
}

fn dedupe(tags: impl Iterator<Item = String>) -> Vec<String> {
    let mut seen = HashSet::new();
    tags.filter(|tag| seen.insert(tag.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_tags() {
        assert_eq!(citation_tag("report.pdf", 1), "[report.pdf, p.1]");
    }

    #[test]
    fn extracts_tags_in_order_without_duplicates() {
        let text = "Growth [b.pdf, p.2] slowed [a.pdf, p.10]; see [b.pdf, p.2] and [not a tag].";
        assert_eq!(
            extract_citation_tags(text),
            vec!["[b.pdf, p.2]".to_string(), "[a.pdf, p.10]".to_string()]
        );
    }

    #[test]
    fn ensure_citation_appends_only_when_missing() {
        assert_eq!(
            ensure_citation("Sales rose. [r.pdf, p.1]", "[r.pdf, p.1]"),
            "Sales rose. [r.pdf, p.1]"
        );
        assert_eq!(
            ensure_citation("Sales rose. [R.pdf, page 1]\n", "[r.pdf, p.1]"),
            "Sales rose. [R.pdf, page 1] [r.pdf, p.1]"
        );
        assert_eq!(ensure_citation("  ", "[r.pdf, p.1]"), "[r.pdf, p.1]");
    }

    #[test]
    fn missing_sources_are_listed() {
        let tags = vec!["[a.pdf, p.1]".to_string(), "[b.pdf, p.4]".to_string()];
        assert_eq!(
            append_missing_sources("Overview [a.pdf, p.1].", &tags),
            "Overview [a.pdf, p.1].\n\nSources: [b.pdf, p.4]"
        );
        assert_eq!(
            append_missing_sources("[a.pdf, p.1] [b.pdf, p.4]", &tags),
            "[a.pdf, p.1] [b.pdf, p.4]"
        );
    }

    #[test]
    fn merges_lists_preserving_first_seen_order() {
        let first = vec!["[a.pdf, p.1]".to_string(), "[b.pdf, p.1]".to_string()];
        let second = vec!["[b.pdf, p.1]".to_string(), "[c.pdf, p.2]".to_string()];
        assert_eq!(
            merge_citations([first.as_slice(), second.as_slice()]),
            vec!["[a.pdf, p.1]", "[b.pdf, p.1]", "[c.pdf, p.2]"]
        );
    }
}
