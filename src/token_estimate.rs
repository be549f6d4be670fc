//! Token estimator (A2): a coarse word-count heuristic, pulled out of the LLM
//! handler so it can be unit-tested independently of any HTTP plumbing.
//!
//! Deliberately inaccurate — exact tokenization is an explicit non-goal.

use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenEstimate {
    pub input_tokens: i64,
    pub output_tokens: i64,
}

impl TokenEstimate {
    pub fn total(&self) -> i64 {
        self.input_tokens + self.output_tokens
    }

    /// The conservative fallback used when the body can't be read or parsed.
    pub fn fallback() -> Self {
        Self { input_tokens: 1000, output_tokens: 0 }
    }
}

#[derive(Debug, Deserialize)]
struct ChatRequest {
    model: Option<String>,
    #[serde(default)]
    messages: Vec<ChatMessage>,
    max_tokens: Option<i64>,
}

/// A single parse of the request body, shared by token estimation and model
/// routing instead of parsing the JSON body twice.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub model: Option<String>,
    pub estimate: TokenEstimate,
}

pub fn parse_request(body: &[u8]) -> ParsedRequest {
    let Ok(request) = serde_json::from_slice::<ChatRequest>(body) else {
        return ParsedRequest { model: None, estimate: TokenEstimate::fallback() };
    };
    ParsedRequest { model: request.model.clone(), estimate: estimate_from(&request) }
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

/// Estimates `{input_tokens, output_tokens}` from a raw JSON request body.
///
/// Malformed or absent JSON yields [`TokenEstimate::fallback`]. Word count is
/// whitespace-delimited across all `messages[*].content` strings, divided by
/// 0.75 and rounded up. `output_tokens` comes from a positive `max_tokens` if
/// present, else half of `input_tokens`, else 1000.
pub fn estimate(body: &[u8]) -> TokenEstimate {
    let Ok(request) = serde_json::from_slice::<ChatRequest>(body) else {
        return TokenEstimate::fallback();
    };
    estimate_from(&request)
}

fn estimate_from(request: &ChatRequest) -> TokenEstimate {
    let word_count: usize = request.messages.iter().map(|m| m.content.split_whitespace().count()).sum();

    let input_tokens = ((word_count as f64) / 0.75).ceil() as i64;

    let output_tokens = match request.max_tokens {
        Some(n) if n > 0 => n,
        _ if input_tokens > 0 => input_tokens / 2,
        _ => 1000,
    };

    TokenEstimate { input_tokens, output_tokens }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimates_from_messages_and_max_tokens() {
        let body = br#"{"model":"llama","messages":[{"role":"user","content":"one two three four"}],"max_tokens":256}"#;
        let estimate = estimate(body);
        assert_eq!(estimate.input_tokens, 6); // ceil(4/0.75) = 6
        assert_eq!(estimate.output_tokens, 256);
    }

    #[test]
    fn falls_back_to_half_input_without_max_tokens() {
        let body = br#"{"messages":[{"role":"user","content":"one two three"}]}"#;
        let estimate = estimate(body);
        assert_eq!(estimate.output_tokens, estimate.input_tokens / 2);
    }

    #[test]
    fn malformed_json_yields_conservative_fallback() {
        let estimate = estimate(b"not json");
        assert_eq!(estimate, TokenEstimate::fallback());
        assert_eq!(estimate.total(), 1000);
    }

    #[test]
    fn empty_messages_falls_back_to_thousand_output() {
        let body = br#"{"messages":[]}"#;
        let estimate = estimate(body);
        assert_eq!(estimate.input_tokens, 0);
        assert_eq!(estimate.output_tokens, 1000);
    }

    #[test]
    fn negative_or_zero_max_tokens_is_ignored() {
        let body = br#"{"messages":[{"role":"user","content":"one two three four five six"}],"max_tokens":0}"#;
        let estimate = estimate(body);
        assert_eq!(estimate.output_tokens, estimate.input_tokens / 2);
    }

    #[test]
    fn parse_request_extracts_model_alongside_estimate() {
        let body = br#"{"model":"llama-3.3-70b","messages":[{"role":"user","content":"hi there"}],"max_tokens":50}"#;
        let parsed = parse_request(body);
        assert_eq!(parsed.model.as_deref(), Some("llama-3.3-70b"));
        assert_eq!(parsed.estimate.output_tokens, 50);
    }

    #[test]
    fn parse_request_malformed_json_has_no_model() {
        let parsed = parse_request(b"not json");
        assert_eq!(parsed.model, None);
        assert_eq!(parsed.estimate, TokenEstimate::fallback());
    }
}
