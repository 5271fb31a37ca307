use std::collections::BTreeMap;

use indexmap::IndexMap;

use crate::model::{EpcCategory, Tag, TagKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Replaced,
}

#[derive(Debug, Clone, Default)]
pub struct TagStore {
    tags: IndexMap<TagKey, Tag>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: Tag) -> InsertOutcome {
        match self.tags.insert(tag.key(), tag) {
            Some(_) => InsertOutcome::Replaced,
            None => InsertOutcome::Inserted,
        }
    }

    pub fn remove(&mut self, key: &TagKey) -> Option<Tag> {
        self.tags.shift_remove(key)
    }

    pub fn contains(&self, key: &TagKey) -> bool {
        self.tags.contains_key(key)
    }

    pub fn get(&self, key: &TagKey) -> Option<&Tag> {
        self.tags.get(key)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }

    pub fn by_category(&self) -> BTreeMap<EpcCategory, usize> {
        let mut counts = BTreeMap::new();
        for tag in self.tags.values() {
            *counts.entry(tag.category()).or_insert(0) += 1;
        }
        counts
    }
}
