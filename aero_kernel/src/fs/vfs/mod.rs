/*
 * Copyright (C) 2021-2022 The Aero Project Developers.
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

//! The VFS skeleton: a node cache, a tree built out of parent-owned child
//! lists, a mount table, and path lookup that follows bonds (mounts and
//! symlinks). Concrete filesystem logic -- reading a directory off a disk,
//! populating a node's children on demand -- belongs to an out-of-core
//! driver; this module only owns the tree and the cache.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use spin::Once;

use crate::error::{KernelError, Result};
use crate::fs::cache::{Cache, CacheItem, Cacheable};
use crate::utils::sync::{Mutex, RwLock};

/// Identifies a [`VfsNode`] in the node cache. `ROOT_ID` is reserved for the
/// tree's root and always present once [`init`] has run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VfsId(u64);

pub const ROOT_ID: VfsId = VfsId(0);

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsNodeType {
    File,
    Directory,
    Symlink,
}

pub struct VfsMetadata {
    pub node_type: VfsNodeType,
    pub size: u64,
}

/// A node in the VFS tree. Tree edges are parent-owned child lists
/// (`children`), not back-pointers, matching the spec's "child lists owned
/// by the node cache" -- the cache itself is keyed by [`VfsId`] and holds no
/// separate tree structure of its own.
pub struct VfsNode {
    id: VfsId,
    ref_count: AtomicUsize,
    metadata: RwLock<VfsMetadata>,
    /// Opaque handle into a file-data cache (page cache, etc.); this
    /// skeleton never populates it, a concrete FS driver would.
    cache_handle: Mutex<Option<usize>>,
    /// Opaque driver-private data (inode number, on-disk offset, ...).
    pub driver_data: usize,
    /// The node this one is bonded to: a mount's underlying root, or a
    /// symlink's target. `None` for an ordinary node.
    bond: Mutex<Option<VfsId>>,
    children: Mutex<BTreeMap<String, VfsId>>,
}

impl VfsNode {
    fn new(id: VfsId, node_type: VfsNodeType, driver_data: usize) -> Self {
        Self {
            id,
            ref_count: AtomicUsize::new(1),
            metadata: RwLock::new(VfsMetadata { node_type, size: 0 }),
            cache_handle: Mutex::new(None),
            driver_data,
            bond: Mutex::new(None),
            children: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn id(&self) -> VfsId {
        self.id
    }

    pub fn node_type(&self) -> VfsNodeType {
        self.metadata.read().node_type
    }

    pub fn metadata(&self) -> &RwLock<VfsMetadata> {
        &self.metadata
    }
}

impl Cacheable<VfsId> for VfsNode {
    fn cache_key(&self) -> VfsId {
        self.id
    }
}

pub type VfsNodeCache = Cache<VfsId, VfsNode>;
pub type VfsNodeItem = Arc<CacheItem<VfsId, VfsNode>>;

static NODE_CACHE: Once<Arc<VfsNodeCache>> = Once::new();

/// Mount points: the mounted-on node's id maps to the mounted filesystem's
/// root node id. Consulted at every path boundary during [`vfs_lookup`].
static MOUNTS: Mutex<BTreeMap<VfsId, VfsId>> = Mutex::new(BTreeMap::new());

fn cache() -> &'static Arc<VfsNodeCache> {
    NODE_CACHE.get().expect("fs::vfs: used before init()")
}

/// Builds the node cache and seeds the root directory at [`ROOT_ID`].
pub fn init() {
    NODE_CACHE.call_once(|| VfsNodeCache::new(1024));

    let cache = cache();
    if cache.get(ROOT_ID).is_none() {
        let root = VfsNode::new(ROOT_ID, VfsNodeType::Directory, 0);
        cache.make_item_cached(root);
    }
}

fn get_node(id: VfsId) -> Result<VfsNodeItem> {
    cache().get(id).ok_or(KernelError::NotFound)
}

/// Allocates a fresh [`VfsId`] and inserts a node for it into the cache.
/// Driver data is opaque to this module -- a concrete FS driver stashes
/// whatever it needs (inode number, block offset, ...) in it.
pub fn create_node(node_type: VfsNodeType, driver_data: usize) -> VfsId {
    let id = VfsId(NEXT_ID.fetch_add(1, Ordering::Relaxed));
    cache().make_item_cached(VfsNode::new(id, node_type, driver_data));
    id
}

/// Links `child` under `parent` as `name`. `parent` must be a directory.
pub fn link_child(parent: VfsId, name: &str, child: VfsId) -> Result<()> {
    let parent_node = get_node(parent)?;

    if parent_node.node_type() != VfsNodeType::Directory {
        return Err(KernelError::InvalidArgument);
    }

    parent_node.children.lock().insert(String::from(name), child);
    Ok(())
}

/// Mounts `root` on top of `mount_point`: any lookup that reaches
/// `mount_point` is redirected to `root` before its children are consulted.
pub fn mount(mount_point: VfsId, root: VfsId) -> Result<()> {
    get_node(mount_point)?;
    get_node(root)?;
    MOUNTS.lock().insert(mount_point, root);
    Ok(())
}

pub fn unmount(mount_point: VfsId) -> Result<()> {
    MOUNTS
        .lock()
        .remove(&mount_point)
        .map(|_| ())
        .ok_or(KernelError::NotFound)
}

/// Bonds `node` (expected to be a [`VfsNodeType::Symlink`]) to `target`, so
/// [`vfs_lookup`] with `traverse_links` set resolves through it.
pub fn bond(node: VfsId, target: VfsId) -> Result<()> {
    let node = get_node(node)?;
    *node.bond.lock() = Some(target);
    Ok(())
}

fn resolve_mount(mut id: VfsId) -> VfsId {
    loop {
        match MOUNTS.lock().get(&id).copied() {
            Some(next) if next != id => id = next,
            _ => return id,
        }
    }
}

fn resolve_bond(id: VfsId) -> Result<VfsId> {
    let node = get_node(id)?;

    if node.node_type() == VfsNodeType::Symlink {
        if let Some(target) = *node.bond.lock() {
            return resolve_bond(resolve_mount(target));
        }
    }

    Ok(id)
}

/// Lookup options. `traverse_links` controls whether a [`VfsNodeType::Symlink`]
/// encountered along the path (or as the final component) is followed to
/// its bonded target.
pub struct LookupContext {
    pub traverse_links: bool,
}

impl Default for LookupContext {
    fn default() -> Self {
        Self { traverse_links: true }
    }
}

/// Walks `path` segment by segment from the root, consulting the mount
/// table at every boundary and following symlink bonds when
/// `ctx.traverse_links` is set.
pub fn vfs_lookup(path: &str, ctx: &LookupContext) -> Result<VfsId> {
    let mut current = resolve_mount(ROOT_ID);

    if ctx.traverse_links {
        current = resolve_bond(current)?;
    }

    for segment in path.split('/').filter(|s| !s.is_empty()) {
        match segment {
            // The skeleton has no parent pointers (see the module doc
            // comment); walking up is a concrete FS driver's job once one
            // exists. Treat `.`/`..` as no-ops rather than erroring.
            "." | ".." => continue,
            _ => {}
        }

        let node = get_node(current)?;

        let next = {
            let children = node.children.lock();
            *children.get(segment).ok_or(KernelError::NotFound)?
        };

        current = resolve_mount(next);

        if ctx.traverse_links {
            current = resolve_bond(current)?;
        }
    }

    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    // The node cache, mount table and id counter are module-level statics
    // (matching `fs::cache`'s own `INODE_CACHE`/`DIR_CACHE` singleton
    // pattern), so every case below runs against one shared tree in a
    // single test function rather than separate `#[test]`s -- the default
    // harness runs tests concurrently, and a `Once`-backed singleton has no
    // way to reset between them.
    #[test]
    fn tree_mount_and_symlink_lookups() {
        NODE_CACHE.call_once(|| VfsNodeCache::new(1024));
        cache().make_item_cached(VfsNode::new(ROOT_ID, VfsNodeType::Directory, 0));

        let etc = create_node(VfsNodeType::Directory, 0);
        link_child(ROOT_ID, "etc", etc).unwrap();

        let passwd = create_node(VfsNodeType::File, 0);
        link_child(etc, "passwd", passwd).unwrap();

        assert_eq!(
            vfs_lookup("/etc/passwd", &LookupContext::default()).unwrap(),
            passwd
        );

        assert_eq!(
            vfs_lookup("/etc/nope", &LookupContext::default()).unwrap_err(),
            KernelError::NotFound
        );

        let mnt = create_node(VfsNodeType::Directory, 0);
        link_child(ROOT_ID, "mnt", mnt).unwrap();

        let other_root = create_node(VfsNodeType::Directory, 0);
        let file = create_node(VfsNodeType::File, 0);
        link_child(other_root, "data", file).unwrap();

        mount(mnt, other_root).unwrap();

        assert_eq!(
            vfs_lookup("/mnt/data", &LookupContext::default()).unwrap(),
            file
        );

        let target = create_node(VfsNodeType::Directory, 0);
        let real_file = create_node(VfsNodeType::File, 0);
        link_child(target, "real", real_file).unwrap();

        let link = create_node(VfsNodeType::Symlink, 0);
        bond(link, target).unwrap();
        link_child(ROOT_ID, "link", link).unwrap();

        assert_eq!(
            vfs_lookup("/link/real", &LookupContext::default()).unwrap(),
            real_file
        );

        assert!(vfs_lookup("/link/real", &LookupContext { traverse_links: false }).is_err());
    }
}
