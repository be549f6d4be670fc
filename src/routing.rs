//! Routing tables for both proxy paths: the LLM handler's model -> target_url
//! table (A3) and the generic handler's host -> target_url table (C8).
//!
//! Both are deliberately minimal — no load balancing, no health-checked node
//! pools. Those are out of scope; see SPEC_FULL.md's note on this module.

use crate::host;
use std::collections::HashMap;

pub struct ModelRouter {
    routes: HashMap<String, String>,
    default_base_url: String,
}

impl ModelRouter {
    pub fn new(routes: HashMap<String, String>, default_base_url: impl Into<String>) -> Self {
        Self { routes, default_base_url: default_base_url.into() }
    }

    /// Returns the configured override for `model`, or the default upstream
    /// base URL if no route matches (or `model` is `None`).
    pub fn resolve(&self, model: Option<&str>) -> &str {
        model
            .and_then(|m| self.routes.get(m))
            .map(String::as_str)
            .unwrap_or(&self.default_base_url)
    }
}

/// Host-keyed route table for the generic proxy handler (C8): exact match
/// first, then `*.suffix`, in configuration order. No entry means no route.
pub struct HostRouter {
    routes: Vec<(String, String)>,
}

impl HostRouter {
    pub fn new(routes: Vec<(String, String)>) -> Self {
        Self { routes }
    }

    /// Resolves `normalized_host` (already port-stripped and lower-cased) to
    /// its configured target base URL.
    pub fn resolve(&self, normalized_host: &str) -> Option<&str> {
        for (pattern, target) in &self.routes {
            if pattern == normalized_host {
                return Some(target.as_str());
            }
        }
        for (pattern, target) in &self.routes {
            if host::matches(normalized_host, pattern) {
                return Some(target.as_str());
            }
        }
        None
    }
}
