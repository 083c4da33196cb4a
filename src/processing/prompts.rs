//! Prompt templates for the map and reduce stages.
//!
//! Templates use `{name}` placeholders. Substitution is single-pass, so placeholder-like text
//! inside a chunk or summary is never expanded again.

use super::citations::citation_tag;
use super::types::Chunk;
use serde_json::json;

/// Per-chunk summarization prompt.
pub const MAP_PROMPT_TEMPLATE: &str = "\
You are a research assistant.
Business question: {question}

Summarize the following excerpt with respect to the business question, adding a citation tag \
[SourceName, p.PageNumber] at the end. For this excerpt the tag is {citation}.

Excerpt:
{page_content}

Metadata: {metadata}
";

/// Merge prompt used for both intermediate collapses and the final summary.
pub const REDUCE_PROMPT_TEMPLATE: &str = "\
You are a head analyst.
Business question: {question}

Combine these mini-summaries into a concise executive summary that answers the business \
question, preserving citation tags.

Summaries:
{summaries}
";

/// Separator placed between summaries in the reduce prompt.
pub const SUMMARY_SEPARATOR: &str = "\n\n";

/// Stringified chunk metadata as shown to the model.
pub fn chunk_metadata(chunk: &Chunk) -> String {
    json!({
        "source": chunk.source_name,
        "page": chunk.page_number,
    })
    .to_string()
}

/// Build the map prompt for one chunk.
pub fn build_map_prompt(chunk: &Chunk, question: &str) -> String {
    let citation = citation_tag(&chunk.source_name, chunk.page_number);
    let metadata = chunk_metadata(chunk);
    render(
        MAP_PROMPT_TEMPLATE,
        &[
            ("question", question),
            ("citation", &citation),
            ("page_content", &chunk.text),
            ("metadata", &metadata),
        ],
    )
}

/// Build the reduce prompt over summaries in source order.
pub fn build_reduce_prompt<'a, I>(summaries: I, question: &str) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let joined = join_summaries(summaries);
    render(
        REDUCE_PROMPT_TEMPLATE,
        &[("question", question), ("summaries", &joined)],
    )
}

/// Concatenate summaries the way the reduce prompt presents them.
pub fn join_summaries<'a, I>(summaries: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    summaries
        .into_iter()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(SUMMARY_SEPARATOR)
}

fn render(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (close, *value))
        });
        match substituted {
            Some((close, value)) => {
                output.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                output.push('{');
                rest = after;
            }
        }
    }
    output.push_str(rest);
    output
}
