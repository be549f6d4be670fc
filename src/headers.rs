//! Rate-limit header parser (C3): decodes upstream quota headers into a
//! typed record. Pure and stateless.

use std::fmt;
use std::time::Duration;

pub const HEADER_LIMIT: &str = "x-ratelimit-limit-tokens-minute";
pub const HEADER_REMAINING: &str = "x-ratelimit-remaining-tokens-minute";
pub const HEADER_RESET: &str = "x-ratelimit-reset-tokens-minute";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitHeaders {
    pub tpm_limit: i64,
    pub tpm_remaining: i64,
    pub tpm_reset: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingRequiredHeaders {
    pub detail: String,
}

impl fmt::Display for MissingRequiredHeaders {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "missing required rate-limit headers: {}", self.detail)
    }
}

impl std::error::Error for MissingRequiredHeaders {}

/// Anything that can answer "what's the value of this header, by name
/// (case-insensitive)?" — lets this module stay decoupled from any specific
/// HTTP crate's header map type.
pub trait HeaderLookup {
    fn get(&self, name: &str) -> Option<&str>;
}

/// Parses the three Cerebras-style quota headers out of `headers`.
///
/// Fails with [`MissingRequiredHeaders`] unless both `limit` and `reset` are
/// present, parse as numbers, and are strictly positive. `remaining` may be
/// absent (treated as 0) or negative (clamped to 0).
pub fn parse(headers: &impl HeaderLookup) -> Result<RateLimitHeaders, MissingRequiredHeaders> {
    let limit = headers
        .get(HEADER_LIMIT)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|v| *v > 0)
        .ok_or_else(|| MissingRequiredHeaders {
            detail: format!("{HEADER_LIMIT} missing, non-numeric, or non-positive"),
        })?;

    let reset_secs = headers
        .get(HEADER_RESET)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .ok_or_else(|| MissingRequiredHeaders {
            detail: format!("{HEADER_RESET} missing, non-numeric, or non-positive"),
        })?;

    let remaining = headers
        .get(HEADER_REMAINING)
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(0)
        .max(0);

    Ok(RateLimitHeaders { tpm_limit: limit, tpm_remaining: remaining, tpm_reset: Duration::from_secs_f64(reset_secs) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct MapLookup(HashMap<String, String>);

    impl HeaderLookup for MapLookup {
        fn get(&self, name: &str) -> Option<&str> {
            self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
        }
    }

    fn headers(pairs: &[(&str, &str)]) -> MapLookup {
        MapLookup(pairs.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.to_string())).collect())
    }

    #[test]
    fn parses_full_record() {
        let h = headers(&[
            (HEADER_LIMIT, "1000"),
            (HEADER_REMAINING, "50"),
            (HEADER_RESET, "10.5"),
        ]);
        let parsed = parse(&h).unwrap();
        assert_eq!(parsed.tpm_limit, 1000);
        assert_eq!(parsed.tpm_remaining, 50);
        assert_eq!(parsed.tpm_reset, Duration::from_secs_f64(10.5));
    }

    #[test]
    fn missing_limit_fails() {
        let h = headers(&[(HEADER_RESET, "10")]);
        assert!(parse(&h).is_err());
    }

    #[test]
    fn missing_reset_fails() {
        let h = headers(&[(HEADER_LIMIT, "1000")]);
        assert!(parse(&h).is_err());
    }

    #[test]
    fn negative_remaining_clamps_to_zero() {
        let h = headers(&[(HEADER_LIMIT, "1000"), (HEADER_REMAINING, "-5"), (HEADER_RESET, "10")]);
        assert_eq!(parse(&h).unwrap().tpm_remaining, 0);
    }

    #[test]
    fn missing_remaining_defaults_to_zero() {
        let h = headers(&[(HEADER_LIMIT, "1000"), (HEADER_RESET, "10")]);
        assert_eq!(parse(&h).unwrap().tpm_remaining, 0);
    }

    #[test]
    fn zero_limit_fails() {
        let h = headers(&[(HEADER_LIMIT, "0"), (HEADER_RESET, "10")]);
        assert!(parse(&h).is_err());
    }

    #[test]
    fn round_trip_preserves_record() {
        let original = RateLimitHeaders {
            tpm_limit: 500,
            tpm_remaining: 25,
            tpm_reset: Duration::from_secs_f64(3.25),
        };
        let h = headers(&[
            (HEADER_LIMIT, "500"),
            (HEADER_REMAINING, "25"),
            (HEADER_RESET, "3.25"),
        ]);
        assert_eq!(parse(&h).unwrap(), original);
    }
}
