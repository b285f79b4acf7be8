//! Path-prefix rewriting and matching.
//!
//! [`PrefixRules`] holds `prefix → replacement` pairs sorted by prefix
//! length, longest first, so overlapping prefixes resolve
//! deterministically: `/api/v2` wins over `/api` for `/api/v2/users`.
//! The same ordering serves [`PrefixRules::matches`] for secondary
//! backend selection.

use std::borrow::Cow;

#[derive(Debug, Clone, Default)]
pub struct PrefixRules {
    rules: Vec<(String, String)>,
}

impl PrefixRules {
    pub fn new<I, K, V>(rules: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut rules: Vec<(String, String)> = rules
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        // Ties on length are broken lexically so the order never depends on
        // HashMap iteration.
        rules.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        rules.dedup_by(|(a, _), (b, _)| a == b);
        Self { rules }
    }

    /// Prefix-only rules, used as a match predicate.
    pub fn prefixes<I, K>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self::new(prefixes.into_iter().map(|p| (p, String::new())))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// The longest prefix of `path` with a rule, if any.
    #[must_use]
    pub fn longest_match(&self, path: &str) -> Option<(&str, &str)> {
        self.rules
            .iter()
            .find(|(prefix, _)| path.starts_with(prefix.as_str()))
            .map(|(prefix, replacement)| (prefix.as_str(), replacement.as_str()))
    }

    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        self.longest_match(path).is_some()
    }

    /// Replace the longest matching prefix once. Unmatched paths are
    /// returned unchanged.
    #[must_use]
    pub fn apply<'a>(&self, path: &'a str) -> Cow<'a, str> {
        match self.longest_match(path) {
            Some((prefix, replacement)) => {
                let rest = &path[prefix.len()..];
                let mut rewritten = String::with_capacity(replacement.len() + rest.len() + 1);
                rewritten.push_str(replacement);
                rewritten.push_str(rest);
                if !rewritten.starts_with('/') {
                    rewritten.insert(0, '/');
                }
                Cow::Owned(rewritten)
            }
            None => Cow::Borrowed(path),
        }
    }
}
