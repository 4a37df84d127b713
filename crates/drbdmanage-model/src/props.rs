//! The property bag: a generic, serializable string key/value map
//! attached to every entity in the domain model, plus the auxiliary-props
//! convention (keys prefixed `aux/` are opaque to the daemon and only ever
//! round-tripped for the caller's benefit).

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Prefix marking a property as caller-opaque auxiliary data.
pub const AUX_PROP_PREFIX: &str = "aux/";

/// An insertion-ordered string-keyed property bag.
///
/// `IndexMap` rather than a hash map or sorted map: iteration must reproduce
/// the order properties were set in, not an arbitrary or sorted order, so
/// that `list_*` queries and config rendering are stable from the caller's
/// point of view across a set of keys set one property call at a time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropsContainer(IndexMap<String, String>);

impl PropsContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merges `other` into `self`, overwriting any keys in common.
    ///
    /// This is the semantics of every mutator's `props`/`aux_props`
    /// argument in the server façade: new values replace old ones,
    /// untouched keys are left alone.
    pub fn merge(&mut self, other: &PropsContainer) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// True if `self` contains every key/value pair in `filter`
    /// (used by the `filter_props` argument of the `list_*` queries).
    pub fn is_superset_of(&self, filter: &PropsContainer) -> bool {
        filter
            .0
            .iter()
            .all(|(k, v)| self.0.get(k).is_some_and(|existing| existing == v))
    }

    /// Returns a copy restricted to the given keys (used by the `req_props`
    /// argument of the `list_*` queries); `None` means "no restriction,
    /// return everything".
    pub fn restricted_to(&self, keys: Option<&[String]>) -> Self {
        match keys {
            None => self.clone(),
            Some(keys) => Self(
                self.0
                    .iter()
                    .filter(|(k, _)| keys.iter().any(|req| req.as_str() == k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            ),
        }
    }
}

impl FromIterator<(String, String)> for PropsContainer {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_common_keys_and_keeps_others() {
        let mut base = PropsContainer::new();
        base.set("a", "1");
        base.set("b", "2");

        let mut patch = PropsContainer::new();
        patch.set("b", "20");
        patch.set("c", "3");

        base.merge(&patch);
        assert_eq!(base.get("a"), Some("1"));
        assert_eq!(base.get("b"), Some("20"));
        assert_eq!(base.get("c"), Some("3"));
    }

    #[test]
    fn is_superset_of_requires_all_filter_keys_to_match() {
        let mut props = PropsContainer::new();
        props.set("role", "primary");
        props.set("site", "east");

        let mut filter = PropsContainer::new();
        filter.set("role", "primary");
        assert!(props.is_superset_of(&filter));

        filter.set("site", "west");
        assert!(!props.is_superset_of(&filter));
    }

    #[test]
    fn restricted_to_none_returns_everything() {
        let mut props = PropsContainer::new();
        props.set("a", "1");
        assert_eq!(props.restricted_to(None), props);
    }

    #[test]
    fn restricted_to_some_filters_keys() {
        let mut props = PropsContainer::new();
        props.set("a", "1");
        props.set("b", "2");

        let restricted = props.restricted_to(Some(&["a".to_string()]));
        assert_eq!(restricted.get("a"), Some("1"));
        assert_eq!(restricted.get("b"), None);
    }
}
