//! Hierarchical KV snapshot query operations.
//!
//! A [`Snapshot`] wraps the flat, absolute-key map a backend adapter
//! returns and layers the directory-like operations templates call through
//! their helper functions: `exists`, `get`/`getv`, `getAll`/`getvs`, `ls`,
//! `lsdir`. Keys are always `/`-separated absolute paths with the
//! resource's configured prefix already stripped by the time they reach
//! here — prefix rewriting happens at fetch time, not here.

use std::collections::{BTreeMap, BTreeSet};

use confd_types::KvSnapshot;

#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    values: BTreeMap<String, String>,
}

impl Snapshot {
    pub fn from_kv(kv: KvSnapshot) -> Self {
        Self { values: kv.values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True if `key` names an exact value, or a directory with at least one
    /// descendant key.
    pub fn exists(&self, key: &str) -> bool {
        self.values.contains_key(key) || self.has_descendant(key)
    }

    fn has_descendant(&self, key: &str) -> bool {
        let prefix = format!("{}/", key.trim_end_matches('/'));
        self.values.keys().any(|k| k.starts_with(&prefix))
    }

    /// The value at an exact key, or `None`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// The value at an exact key, or `default` if absent.
    pub fn get_value<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Every `(key, value)` pair whose key matches the glob `pattern`
    /// (`*` matches any run of characters, including none; no other
    /// wildcard syntax is supported).
    pub fn get_all(&self, pattern: &str) -> Vec<(&str, &str)> {
        self.values
            .iter()
            .filter(|(k, _)| glob_match(pattern, k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }

    /// Just the values for [`Snapshot::get_all`].
    pub fn get_all_values(&self, pattern: &str) -> Vec<&str> {
        self.get_all(pattern).into_iter().map(|(_, v)| v).collect()
    }

    /// Distinct first-path-segment children of `dir` — `ls("/app")` over
    /// keys `/app/db/host` and `/app/name` yields `["db", "name"]`.
    pub fn list(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut children = BTreeSet::new();
        for key in self.values.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let first = rest.split('/').next().unwrap_or(rest);
                if !first.is_empty() {
                    children.insert(first.to_string());
                }
            }
        }
        children.into_iter().collect()
    }

    /// Like [`Snapshot::list`], but only children that are themselves
    /// directories — i.e. have at least one further path segment beneath
    /// them, as opposed to being a leaf value.
    pub fn list_dir(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let mut dirs = BTreeSet::new();
        for key in self.values.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                if let Some((first, remainder)) = rest.split_once('/') {
                    if !first.is_empty() && !remainder.is_empty() {
                        dirs.insert(first.to_string());
                    }
                }
            }
        }
        dirs.into_iter().collect()
    }
}

/// A minimal glob matcher supporting only `*` (any run of characters).
/// Templates don't need `?`/character classes per confd's helper grammar,
/// so this stays a small hand-rolled matcher rather than pulling in a full
/// glob crate for one wildcard.
fn glob_match(pattern: &str, text: &str) -> bool {
    fn rec(pattern: &[u8], text: &[u8]) -> bool {
        match pattern.first() {
            None => text.is_empty(),
            Some(b'*') => {
                rec(&pattern[1..], text) || (!text.is_empty() && rec(pattern, &text[1..]))
            }
            Some(&c) => !text.is_empty() && text[0] == c && rec(&pattern[1..], &text[1..]),
        }
    }
    rec(pattern.as_bytes(), text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(pairs: &[(&str, &str)]) -> Snapshot {
        let values = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Snapshot::from_kv(KvSnapshot { values })
    }

    #[test]
    fn exists_true_for_exact_key() {
        let s = snap(&[("/app/name", "demo")]);
        assert!(s.exists("/app/name"));
    }

    #[test]
    fn exists_true_for_directory_with_descendants() {
        let s = snap(&[("/app/db/host", "x")]);
        assert!(s.exists("/app/db"));
        assert!(s.exists("/app"));
    }

    #[test]
    fn exists_false_for_unrelated_key() {
        let s = snap(&[("/app/name", "demo")]);
        assert!(!s.exists("/other"));
    }

    #[test]
    fn get_returns_exact_value_only() {
        let s = snap(&[("/app/db/host", "x")]);
        assert_eq!(s.get("/app/db/host"), Some("x"));
        assert_eq!(s.get("/app/db"), None);
    }

    #[test]
    fn get_value_falls_back_to_default() {
        let s = snap(&[("/app/name", "demo")]);
        assert_eq!(s.get_value("/app/missing", "fallback"), "fallback");
        assert_eq!(s.get_value("/app/name", "fallback"), "demo");
    }

    #[test]
    fn get_all_matches_glob() {
        let s = snap(&[
            ("/app/db/host", "h"),
            ("/app/db/port", "5432"),
            ("/app/cache/host", "c"),
        ]);
        let mut matched: Vec<_> = s.get_all("/app/db/*").iter().map(|(k, _)| *k).collect();
        matched.sort();
        assert_eq!(matched, vec!["/app/db/host", "/app/db/port"]);
    }

    #[test]
    fn list_returns_distinct_first_segment_children() {
        let s = snap(&[
            ("/app/db/host", "h"),
            ("/app/db/port", "5432"),
            ("/app/name", "demo"),
        ]);
        assert_eq!(s.list("/app"), vec!["db", "name"]);
    }

    #[test]
    fn list_dir_excludes_leaf_children() {
        let s = snap(&[
            ("/app/db/host", "h"),
            ("/app/name", "demo"),
        ]);
        assert_eq!(s.list_dir("/app"), vec!["db"]);
    }

    #[test]
    fn list_on_empty_directory_is_empty() {
        let s = snap(&[("/app/name", "demo")]);
        assert!(s.list("/app/name").is_empty());
        assert!(s.list_dir("/app/name").is_empty());
    }

    proptest::proptest! {
        #[test]
        fn prop_list_dir_is_subset_of_list(
            a in "[a-z]{1,4}", b in "[a-z]{1,4}", c in "[a-z]{1,4}"
        ) {
            let s = snap(&[
                (&format!("/root/{a}/{b}"), "v1"),
                (&format!("/root/{c}"), "v2"),
            ]);
            let list = s.list("/root");
            let list_dir = s.list_dir("/root");
            for d in &list_dir {
                proptest::prop_assert!(list.contains(d));
            }
        }
    }
}
