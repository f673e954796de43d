// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Keyed member cache.
//!
//! Runtime lookups of per-member objects (hooks, accessors) are cached by
//! owner type, member name and argument type signature.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::RwLock;

use crate::types::MethodDescription;

/// Cache key: owner type, member name and argument types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberKey {
    pub owner: String,
    pub member: String,
    pub arguments: Vec<String>,
}

impl MemberKey {
    pub fn new<I, S>(owner: impl Into<String>, member: impl Into<String>, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            owner: owner.into(),
            member: member.into(),
            arguments: arguments.into_iter().map(Into::into).collect(),
        }
    }

    /// Key of a method of the given owner.
    pub fn method(owner: &str, method: &MethodDescription) -> Self {
        Self::new(owner, method.name.as_str(), method.arguments.iter().map(String::as_str))
    }
}

/// Concurrent cache with insert-if-absent semantics.
#[derive(Debug)]
pub struct MemberCache<K = MemberKey, V = ()> {
    entries: RwLock<HashMap<K, V>>,
}

impl<K, V> Default for MemberCache<K, V> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> MemberCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    /// Return the cached value, or insert the one produced by `create`.
    ///
    /// When two threads race on the same key, both may run `create` but only
    /// the first inserted value is kept and returned to both.
    pub fn get_or_insert_with(&self, key: K, create: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = create();
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(key)
            .or_insert(value)
            .clone()
    }

    /// Like [`get_or_insert_with`](Self::get_or_insert_with); nothing is cached when `create` returns `None`.
    pub fn get_or_try_insert_with(&self, key: K, create: impl FnOnce() -> Option<V>) -> Option<V> {
        if let Some(value) = self.get(&key) {
            return Some(value);
        }
        let value = create()?;
        Some(
            self.entries
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .entry(key)
                .or_insert(value)
                .clone(),
        )
    }

    /// Replace the value of a key.
    pub fn insert(&self, key: K, value: V) {
        self.entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, value);
    }

    /// Drop every entry matching the predicate. Returns the number removed.
    pub fn invalidate(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|k, _| !predicate(k));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<V: Clone> MemberCache<MemberKey, V> {
    /// Drop all entries of one owner type.
    pub fn invalidate_owner(&self, owner: &str) -> usize {
        self.invalidate(|key| key.owner == owner)
    }
}
