//! 内存实体存储
//!
//! 以 key 索引的并发集合，所有读取都返回独立副本，
//! 修改只能通过按 key 更新或按条件批量操作完成。

use crate::downloader::{Group, Item};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;

#[derive(Debug)]
pub struct EntityStore<K, V>
where
    K: Eq + Hash,
{
    entries: DashMap<K, V>,
}

impl<K, V> Default for EntityStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }
}

impl<K, V> EntityStore<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入或覆盖，返回旧值
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    pub fn list(&self) -> Vec<V> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn filter<P>(&self, predicate: P) -> Vec<V>
    where
        P: Fn(&V) -> bool,
    {
        self.entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// 按 key 原地更新，返回更新后的副本
    ///
    /// 闭包在分片锁内执行，不要在其中访问同一个 store
    pub fn update<F, R>(&self, key: &K, f: F) -> Option<(V, R)>
    where
        F: FnOnce(&mut V) -> R,
    {
        let mut entry = self.entries.get_mut(key)?;
        let result = f(entry.value_mut());
        Some((entry.value().clone(), result))
    }

    /// key 不存在时插入，已存在则保持原值并返回 false
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.entries.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(value);
                true
            }
        }
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// 按条件批量删除，返回被删除的值
    pub fn remove_where<P>(&self, predicate: P) -> Vec<V>
    where
        P: Fn(&V) -> bool,
    {
        let keys: Vec<K> = self
            .entries
            .iter()
            .filter(|entry| predicate(entry.value()))
            .map(|entry| entry.key().clone())
            .collect();
        keys.iter().filter_map(|key| self.remove(key)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Group / Item 存储，进程内共享
#[derive(Debug, Default)]
pub struct DownloadStore {
    pub groups: EntityStore<String, Group>,
    pub items: EntityStore<String, Item>,
}

impl DownloadStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn items_of_group(&self, group_id: &str) -> Vec<Item> {
        let mut items = self.items.filter(|item| item.group_id == group_id);
        items.sort_by(|a, b| a.path_key().cmp(&b.path_key()));
        items
    }
}
