//! Tag-indexed strategy table shared by the dump and storage registries.
//!
//! Built once at startup from an explicit list of strategies. Lookups are
//! case-insensitive; [`StrategyTable::tags`] reports tags in registration order.

use std::collections::HashMap;
use std::sync::Arc;

pub struct StrategyTable<S: ?Sized> {
    order: Vec<String>,
    entries: HashMap<String, Arc<S>>,
}

impl<S: ?Sized> StrategyTable<S> {
    /// Indexes `strategies` by the tag `tag_of` reports for each one. A later
    /// strategy with the same tag replaces the earlier one.
    pub fn new<F>(strategies: Vec<Arc<S>>, tag_of: F) -> Self
    where
        F: Fn(&S) -> String,
    {
        let mut order = Vec::with_capacity(strategies.len());
        let mut entries = HashMap::with_capacity(strategies.len());
        for strategy in strategies {
            let tag = tag_of(&*strategy).to_ascii_lowercase();
            if entries.insert(tag.clone(), strategy).is_some() {
                tracing::warn!(tag = %tag, "Strategy registered twice, keeping the last one");
            } else {
                order.push(tag);
            }
        }
        Self { order, entries }
    }

    pub fn get(&self, tag: &str) -> Option<Arc<S>> {
        self.entries.get(&tag.trim().to_ascii_lowercase()).cloned()
    }

    pub fn supports(&self, tag: &str) -> bool {
        self.entries.contains_key(&tag.trim().to_ascii_lowercase())
    }

    pub fn tags(&self) -> Vec<String> {
        self.order.clone()
    }
}
