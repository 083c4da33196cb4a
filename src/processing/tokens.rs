//! Token counting for reduce-stage budgeting.
//!
//! OpenAI models are counted with their own `tiktoken-rs` encoding. Anything else, Ollama
//! models included, is counted with `cl100k_base`, which is close enough for a budget. If no
//! encoding loads at all, a whitespace counter keeps the pipeline running.

use crate::config::LlmProvider;
use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base, get_bpe_from_model};

/// Shared token counting function.
pub type TokenCounter = Arc<dyn Fn(&str) -> usize + Send + Sync>;

/// Build a token counter for the given provider/model.
pub fn build_token_counter(provider: LlmProvider, model: &str) -> TokenCounter {
    let encoding = match provider {
        LlmProvider::OpenAI => get_bpe_from_model(model.trim()).or_else(|_| cl100k_base()),
        LlmProvider::Ollama => cl100k_base(),
    };
    match encoding {
        Ok(encoding) => bpe_counter(encoding),
        Err(error) => {
            tracing::warn!(
                ?provider,
                model,
                error = %error,
                "Tokenizer unavailable; falling back to whitespace counter"
            );
            whitespace_token_counter()
        }
    }
}

fn bpe_counter(encoding: CoreBPE) -> TokenCounter {
    Arc::new(move |segment: &str| encoding.encode_ordinary(segment).len())
}

/// Counter that treats every whitespace-separated word as one token.
pub fn whitespace_token_counter() -> TokenCounter {
    Arc::new(|segment: &str| {
        let tokens = segment.split_whitespace().count();
        if tokens == 0 && !segment.is_empty() {
            1
        } else {
            tokens
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_counter_counts_words() {
        let counter = whitespace_token_counter();
        assert_eq!(counter("one two  three"), 3);
        assert_eq!(counter(""), 0);
        assert_eq!(counter("   "), 1);
    }

    #[test]
    fn unknown_models_still_get_a_tokenizer() {
        let counter = build_token_counter(LlmProvider::Ollama, "llama3.1");
        assert!(counter("The quick brown fox jumps over the lazy dog.") > 0);
    }

    #[test]
    fn unknown_openai_model_falls_back_to_cl100k() {
        let fallback = build_token_counter(LlmProvider::OpenAI, "my-finetune");
        let ollama = build_token_counter(LlmProvider::Ollama, "llama3.1");
        let text = "Revenue grew 12% in the EMEA region.";
        assert_eq!(fallback(text), ollama(text));
    }

    #[test]
    fn openai_models_use_their_encoding() {
        let counter = build_token_counter(LlmProvider::OpenAI, "gpt-4o-mini");
        let short = counter("hello");
        let long = counter("hello there, this sentence is clearly longer than one word");
        assert!(short >= 1);
        assert!(long > short);
    }
}
