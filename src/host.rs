//! Host-matching helpers shared by the LLM and generic proxy handlers.
//!
//! Host comparisons strip the port and are case-insensitive; a `*.suffix`
//! pattern matches any host ending with `suffix`.

/// Lower-cases `host` and strips a trailing `:port`, if present.
///
/// IPv6 literals (`[::1]:8080`) are left alone past the closing bracket —
/// there is no port to strip past a `]`.
pub fn normalize(host: &str) -> String {
    let host = host.trim();
    let stripped = if let Some(bracket_end) = host.rfind(']') {
        &host[..=bracket_end]
    } else if let Some(colon) = host.rfind(':') {
        &host[..colon]
    } else {
        host
    };
    stripped.to_ascii_lowercase()
}

/// `true` if `configured` equals `normalized_host` exactly, or is a
/// `*.suffix` pattern that `normalized_host` ends with.
pub fn matches(normalized_host: &str, configured: &str) -> bool {
    if let Some(suffix) = configured.strip_prefix("*.") {
        normalized_host.ends_with(suffix)
    } else {
        normalized_host == configured
    }
}

pub fn matches_any<'a>(normalized_host: &str, configured: impl IntoIterator<Item = &'a String>) -> bool {
    configured.into_iter().any(|c| matches(normalized_host, c))
}
