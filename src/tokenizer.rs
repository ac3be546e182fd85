// src/tokenizer.rs
//! Token counting. The core does not embed a model-specific tokenizer — it
//! uses the same fast `chars/4` heuristic the rest of the corpus relies on
//! for budget estimation; precise counts, when they matter, come back from
//! the gateway alongside each `Complete`/`Embed` call.

/// Estimate token count for content (~4 chars per token).
pub fn estimate_tokens(content: &str) -> i64 {
    (content.chars().count() as f64 / 4.0).ceil() as i64
}

/// Word-truncate `text` to approximately `budget` tokens, appending an
/// ellipsis when truncated. Used by the Context Injector's compression
/// fallback (§4.9 step 5).
pub fn truncate_to_token_budget(text: &str, budget: i64) -> String {
    if budget <= 0 {
        return String::new();
    }
    if estimate_tokens(text) <= budget {
        return text.to_string();
    }
    let target_chars = (budget * 4).max(1) as usize;
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out = String::new();
    for word in &words {
        let candidate_len = out.len() + word.len() + 1;
        if candidate_len > target_chars {
            break;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out.push_str(" …");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_tokens_matches_chars_over_four() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello world"), 3);
    }

    #[test]
    fn truncate_respects_budget_and_marks_truncation() {
        let text = "one two three four five six seven eight nine ten";
        let truncated = truncate_to_token_budget(text, 4);
        assert!(estimate_tokens(&truncated) <= 4 + 1); // ellipsis allowance
        assert!(truncated.ends_with('…'));
    }

    #[test]
    fn truncate_is_noop_under_budget() {
        let text = "short text";
        assert_eq!(truncate_to_token_budget(text, 1000), text);
    }
}
