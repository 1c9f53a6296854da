/*
 * Copyright (C) 2021 The Aero Project Developers.
 *
 * This file is part of The Aero Project.
 *
 * Aero is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Aero is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Aero. If not, see <https://www.gnu.org/licenses/>.
 */

//! General implementation for file system caching. Stuff like inode needs to be cached
//! to improve performance and in this case looking up inode data from an IO device such
//! as a disk is very slow, so storing previously accessed inode data in memory makes file
//! system access much quicker.
//!
//! ## Notes
//! * <https://wiki.osdev.org/File_Systems>

use core::borrow::Borrow;
use core::fmt::Debug;
use core::hash::Hash;
use core::ops;

use alloc::sync::Arc;
use alloc::sync::Weak;

use lru::LruCache;

use crate::utils::sync::Mutex;

pub trait CacheKey: Hash + Ord + Borrow<Self> + Debug {}

impl<T> CacheKey for T where T: Hash + Ord + Borrow<Self> + Debug {}

pub trait Cacheable<K: CacheKey>: Sized {
    fn cache_key(&self) -> K;
}

/// Structure representing a cache item in the cache index. See the documentation of [CacheIndex]
/// and the fields of this struct for more information.
pub struct CacheItem<K: CacheKey, V: Cacheable<K>> {
    #[allow(unused)]
    cache: Weak<Cache<K, V>>,
    value: V,
}

impl<K: CacheKey, V: Cacheable<K>> CacheItem<K, V> {
    pub fn new(cache: &Weak<Cache<K, V>>, value: V) -> Arc<Self> {
        Arc::new(Self {
            cache: cache.clone(),
            value,
        })
    }
}

impl<K: CacheKey, V: Cacheable<K>> ops::Deref for CacheItem<K, V> {
    type Target = V;

    fn deref(&self) -> &Self::Target {
        &self.value
    }
}

unsafe impl<K: CacheKey, V: Cacheable<K>> Sync for CacheItem<K, V> {}

/// Inner implementation structure for caching. This structure basically contains the
/// LRU cache of the unused entries and a hashmap of the used entries.
struct CacheIndex<K: CacheKey, V: Cacheable<K>> {
    unused: LruCache<K, Arc<CacheItem<K, V>>>,
    used: hashbrown::HashMap<K, Weak<CacheItem<K, V>>>,
}

/// Structure representing a cache with a key of `K` and value of `V`. The cache
/// key is used to get the cache from the cache index. This structure basically contains
/// the cache index (protected by a mutex) and a weak self reference to itself.
pub struct Cache<K: CacheKey, V: Cacheable<K>> {
    index: Mutex<CacheIndex<K, V>>,

    #[allow(unused)]
    self_ref: Weak<Cache<K, V>>,
}

impl<K: CacheKey, V: Cacheable<K>> Cache<K, V> {
    /// Creates a new cache with the provided that holds at most `capacity` items.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new_cyclic(|this| Cache::<K, V> {
            index: Mutex::new(CacheIndex {
                unused: LruCache::new(capacity),
                used: hashbrown::HashMap::new(),
            }),
            self_ref: this.clone(),
        })
    }

    /// This function is responsible for clearning the used and unused.
    pub fn clear(&self) {
        let mut index_mut = self.index.lock();

        index_mut.unused.clear();
        index_mut.used.clear();
    }

    pub fn make_item_cached(&self, value: V) -> Arc<CacheItem<K, V>> {
        let item = CacheItem::<K, V>::new(&self.self_ref, value);

        self.index
            .lock()
            .used
            .insert(item.cache_key(), Arc::downgrade(&item));

        item
    }

    pub fn make_item_no_cache(&self, value: V) -> Arc<CacheItem<K, V>> {
        CacheItem::<K, V>::new(&Weak::default(), value)
    }

    pub fn get(&self, key: K) -> Option<Arc<CacheItem<K, V>>> {
        let mut index = self.index.lock();

        if let Some(entry) = index.used.get(&key) {
            return entry.clone().upgrade();
        } else if let Some(entry) = index.unused.pop(&key) {
            return Some(entry.clone());
        } else {
            None
        }
    }
}

