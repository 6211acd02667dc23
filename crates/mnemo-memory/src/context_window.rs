//! Model context-window resolution.
//!
//! Maps a model name to its context window in tokens. Model names drift
//! constantly (dated suffixes, provider renames, typos in configs), so
//! resolution is layered: admin overrides first, then the built-in table,
//! then longest-prefix, then a bounded edit-distance match, and finally a
//! conservative default.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for context-window resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextWindowConfig {
    /// Window returned when no resolution step matches.
    pub default_window: usize,
    /// Floor below which a model is considered too small for reliable agent
    /// operation. Consumed by callers, not enforced here.
    pub hard_minimum: usize,
    /// Maximum edit distance accepted by the fuzzy-match step.
    pub max_fuzzy_distance: usize,
}

impl Default for ContextWindowConfig {
    fn default() -> Self {
        Self {
            default_window: 8_192,
            hard_minimum: 4_096,
            max_fuzzy_distance: 5,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Built-in table
// ─────────────────────────────────────────────────────────────────────────────

/// Built-in model → context window table.
///
/// Ordered roughly by family; resolution never depends on order.
const BUILTIN_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4o", 128_000),
    ("gpt-4o-mini", 128_000),
    ("gpt-4-turbo", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("o1", 200_000),
    ("o1-mini", 128_000),
    ("claude-3-5-sonnet", 200_000),
    ("claude-3-5-haiku", 200_000),
    ("claude-3-7-sonnet", 200_000),
    ("claude-3-opus", 200_000),
    ("claude-3-sonnet", 200_000),
    ("claude-3-haiku", 200_000),
    ("gemini-1.5-pro", 1_000_000),
    ("gemini-1.5-flash", 1_000_000),
    ("mistral-large", 128_000),
    ("llama-3.1", 128_000),
];

// ─────────────────────────────────────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────────────────────────────────────

/// Resolves model names to context-window sizes.
#[derive(Debug, Clone, Default)]
pub struct ModelContextRegistry {
    config: ContextWindowConfig,
    /// Admin-configured overrides, consulted before the built-in table.
    overrides: HashMap<String, usize>,
}

impl ModelContextRegistry {
    /// Create a registry with the given configuration and no overrides.
    pub fn new(config: ContextWindowConfig) -> Self {
        Self {
            config,
            overrides: HashMap::new(),
        }
    }

    /// Set admin overrides (model-name pattern → token window).
    pub fn with_overrides(mut self, overrides: HashMap<String, usize>) -> Self {
        self.overrides = overrides;
        self
    }

    /// Resolve a model name to its context window in tokens.
    ///
    /// Resolution order, first match wins:
    /// 1. Exact match against admin overrides.
    /// 2. Exact match against the built-in table.
    /// 3. Longest-prefix match across the union (catches dated suffixes).
    /// 4. Edit-distance match within the configured bound (catches typos).
    /// 5. The conservative default.
    pub fn context_window(&self, model: &str) -> usize {
        let model = model.trim();

        if let Some(&window) = self.overrides.get(model) {
            return window;
        }

        if let Some(window) = builtin_exact(model) {
            return window;
        }

        if let Some((name, window)) = self.longest_prefix(model) {
            debug!(model, matched = name, "Context window resolved by prefix");
            return window;
        }

        if let Some((name, window)) = self.closest_fuzzy(model) {
            debug!(model, matched = name, "Context window resolved by fuzzy match");
            return window;
        }

        debug!(model, default = self.config.default_window, "Unknown model, using default window");
        self.config.default_window
    }

    /// Floor below which a model is considered too small for agent use.
    pub fn hard_minimum(&self) -> usize {
        self.config.hard_minimum
    }

    /// Longest known name that is a prefix of `model`.
    fn longest_prefix(&self, model: &str) -> Option<(String, usize)> {
        self.known_entries()
            .filter(|(name, _)| model.starts_with(name.as_str()) && name.len() < model.len())
            .max_by_key(|(name, _)| name.len())
    }

    /// Closest known name by edit distance, within the configured bound.
    fn closest_fuzzy(&self, model: &str) -> Option<(String, usize)> {
        self.known_entries()
            .map(|(name, window)| {
                let distance = levenshtein(model, &name);
                (name, window, distance)
            })
            .filter(|(_, _, distance)| *distance <= self.config.max_fuzzy_distance)
            .min_by_key(|(_, _, distance)| *distance)
            .map(|(name, window, _)| (name, window))
    }

    /// Union of overrides and built-ins.
    fn known_entries(&self) -> impl Iterator<Item = (String, usize)> + '_ {
        self.overrides
            .iter()
            .map(|(name, &window)| (name.clone(), window))
            .chain(
                BUILTIN_WINDOWS
                    .iter()
                    .map(|&(name, window)| (name.to_string(), window)),
            )
    }
}

fn builtin_exact(model: &str) -> Option<usize> {
    BUILTIN_WINDOWS
        .iter()
        .find(|(name, _)| *name == model)
        .map(|&(_, window)| window)
}

/// Levenshtein edit distance between two strings.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();

    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j + 1] + 1).min(curr[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ModelContextRegistry {
        ModelContextRegistry::new(ContextWindowConfig::default())
    }

    #[test]
    fn test_exact_builtin_match() {
        assert_eq!(registry().context_window("gpt-4o"), 128_000);
        assert_eq!(registry().context_window("claude-3-opus"), 200_000);
    }

    #[test]
    fn test_override_wins_over_builtin() {
        let mut overrides = HashMap::new();
        overrides.insert("gpt-4o".to_string(), 64_000);
        let registry = registry().with_overrides(overrides);
        assert_eq!(registry.context_window("gpt-4o"), 64_000);
    }

    #[test]
    fn test_longest_prefix_match() {
        // Dated suffix resolves to gpt-4o-mini, not the shorter gpt-4o prefix
        assert_eq!(registry().context_window("gpt-4o-mini-2024-07-18"), 128_000);
        // Dated gpt-4-turbo resolves to the turbo entry, not gpt-4
        assert_eq!(registry().context_window("gpt-4-turbo-2024-04-09"), 128_000);
        // Dated gpt-4 variant that is not a turbo model
        assert_eq!(registry().context_window("gpt-4-0613"), 8_192);
    }

    #[test]
    fn test_prefix_match_over_overrides() {
        let mut overrides = HashMap::new();
        overrides.insert("acme-mega".to_string(), 500_000);
        let registry = registry().with_overrides(overrides);
        assert_eq!(registry.context_window("acme-mega-2025-01"), 500_000);
    }

    #[test]
    fn test_fuzzy_match_within_bound() {
        // One transposition away from claude-3-opus
        assert_eq!(registry().context_window("claude-3-opsu"), 200_000);
    }

    #[test]
    fn test_unknown_model_falls_back_to_default() {
        let registry = registry();
        assert_eq!(
            registry.context_window("totally-unrelated-model-xyz"),
            8_192
        );
    }

    #[test]
    fn test_hard_minimum_exposed() {
        assert_eq!(registry().hard_minimum(), 4_096);
    }

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein("kitten", "sitting"), 3);
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("same", "same"), 0);
    }
}
