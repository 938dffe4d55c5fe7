// SPDX-FileCopyrightText: 2025 The proctree Authors
//
// SPDX-License-Identifier: Apache-2.0

//! The path trie. Every function here expects the caller to hold the
//! filesystem's global lock.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::node::{DIRECTORY_PERM, DirEntry, EntryKind, Leaf};

/// A registered leaf plus its access bookkeeping.
///
/// `access_count` and `pending_unlink` only change under the global lock,
/// which is why they live in the trie rather than behind the leaf's own lock.
pub(crate) struct LeafSlot {
    pub leaf: Arc<Leaf>,
    pub access_count: i64,
    pub pending_unlink: bool,
}

pub(crate) enum Node {
    Directory(Directory),
    Leaf(LeafSlot),
}

/// A structural directory. It exists only while it has children.
#[derive(Default)]
pub(crate) struct Directory {
    children: HashMap<String, Node>,
}

impl Directory {
    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn lookup(&self, segs: &[&str]) -> Option<&Node> {
        let (first, rest) = segs.split_first()?;
        let node = self.children.get(*first)?;
        if rest.is_empty() {
            return Some(node);
        }
        match node {
            Node::Directory(dir) => dir.lookup(rest),
            Node::Leaf(_) => None,
        }
    }

    pub fn lookup_slot(&mut self, segs: &[&str]) -> Option<&mut LeafSlot> {
        let (first, rest) = segs.split_first()?;
        match self.children.get_mut(*first)? {
            Node::Leaf(slot) if rest.is_empty() => Some(slot),
            Node::Directory(dir) if !rest.is_empty() => dir.lookup_slot(rest),
            _ => None,
        }
    }

    /// Inserts `leaf` at `segs`, creating intermediate directories.
    ///
    /// On failure any directory created by this call is removed again.
    pub fn insert_leaf(&mut self, segs: &[&str], leaf: Arc<Leaf>) -> Result<()> {
        let Some((first, rest)) = segs.split_first() else {
            return Err(Error::invalid_argument("empty path"));
        };

        if rest.is_empty() {
            return match self.children.get(*first) {
                Some(Node::Leaf(_)) => Err(Error::already_exists(&leaf.path)),
                Some(Node::Directory(_)) => Err(Error::wrong_kind(&leaf.path)),
                None => {
                    _ = self.children.insert(
                        first.to_string(),
                        Node::Leaf(LeafSlot {
                            leaf,
                            access_count: 0,
                            pending_unlink: false,
                        }),
                    );
                    Ok(())
                }
            };
        }

        let created = !self.children.contains_key(*first);
        let child = self
            .children
            .entry(first.to_string())
            .or_insert_with(|| Node::Directory(Directory::default()));
        let result = match child {
            Node::Directory(dir) => dir.insert_leaf(rest, leaf),
            Node::Leaf(_) => Err(Error::wrong_kind(&leaf.path)),
        };
        if result.is_err() && created {
            _ = self.children.remove(*first);
        }
        result
    }

    /// Removes the leaf at `segs` and prunes ancestors left empty.
    ///
    /// With `only` set, the leaf is removed only if it is that very leaf.
    pub fn remove_leaf(&mut self, segs: &[&str], only: Option<&Arc<Leaf>>) -> Option<Arc<Leaf>> {
        let (first, rest) = segs.split_first()?;

        if rest.is_empty() {
            match self.children.get(*first) {
                Some(Node::Leaf(slot)) if only.is_none_or(|l| Arc::ptr_eq(l, &slot.leaf)) => {}
                _ => return None,
            }
            return match self.children.remove(*first) {
                Some(Node::Leaf(slot)) => Some(slot.leaf),
                _ => None,
            };
        }

        let Some(Node::Directory(dir)) = self.children.get_mut(*first) else {
            return None;
        };
        let removed = dir.remove_leaf(rest, only);
        if removed.is_some() && dir.is_empty() {
            _ = self.children.remove(*first);
        }
        removed
    }

    /// Children visible to readers: pending leaves are left out.
    pub fn list(&self) -> Vec<DirEntry> {
        let mut entries: Vec<DirEntry> = self
            .children
            .iter()
            .filter_map(|(name, node)| match node {
                Node::Directory(_) => Some(DirEntry {
                    name: name.clone(),
                    kind: EntryKind::Directory,
                    perm: DIRECTORY_PERM,
                }),
                Node::Leaf(slot) if slot.pending_unlink => None,
                Node::Leaf(slot) => {
                    let leaf = &slot.leaf;
                    // Listings never wait on a commit in progress.
                    let perm = leaf
                        .state
                        .try_read_recursive()
                        .map_or_else(|| leaf.capability_perm(), |state| leaf.perm(&state.meta));
                    Some(DirEntry {
                        name: name.clone(),
                        kind: leaf.kind(),
                        perm,
                    })
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    /// Every registered leaf, for teardown.
    pub fn drain_leaves(&mut self, out: &mut Vec<Arc<Leaf>>) {
        for (_, node) in self.children.drain() {
            match node {
                Node::Directory(mut dir) => dir.drain_leaves(out),
                Node::Leaf(slot) => out.push(slot.leaf),
            }
        }
    }

    pub fn count_leaves(&self) -> usize {
        self.children
            .values()
            .map(|node| match node {
                Node::Directory(dir) => dir.count_leaves(),
                Node::Leaf(_) => 1,
            })
            .sum()
    }

    /// Indented rendering of the subtree, one entry per line.
    pub fn render_tree(&self, depth: usize, out: &mut String) {
        let mut names: Vec<&String> = self.children.keys().collect();
        names.sort();
        for name in names {
            let indent = "  ".repeat(depth);
            match &self.children[name] {
                Node::Directory(dir) => {
                    _ = writeln!(out, "{indent}{name}/");
                    dir.render_tree(depth + 1, out);
                }
                Node::Leaf(slot) => {
                    let kind = match slot.leaf.kind() {
                        EntryKind::TypedLeaf => "typed",
                        _ => "leaf",
                    };
                    let pending = if slot.pending_unlink {
                        " (pending unlink)"
                    } else {
                        ""
                    };
                    _ = writeln!(
                        out,
                        "{indent}{name} [{kind} {:03o} refs={}]{pending}",
                        slot.leaf.capability_perm(),
                        slot.access_count
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Callbacks;
    use crate::node::{LeafBody, LeafState, Metadata};

    fn leaf(path: &str) -> Arc<Leaf> {
        let segs: Vec<String> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        Arc::new(Leaf::new(
            path.to_string(),
            segs,
            LeafBody::Plain(Callbacks::new().on_read(|_, _, _| Ok(0))),
            LeafState {
                meta: Metadata::new(None, 0, 0),
                typed: None,
            },
        ))
    }

    #[test]
    fn test_insert_creates_directories() {
        let mut root = Directory::default();
        root.insert_leaf(&["a", "b", "c"], leaf("/a/b/c")).unwrap();
        assert!(matches!(root.lookup(&["a", "b"]), Some(Node::Directory(_))));
        assert!(matches!(root.lookup(&["a", "b", "c"]), Some(Node::Leaf(_))));
        assert_eq!(root.list()[0].name, "a");
    }

    #[test]
    fn test_failed_insert_leaves_tree_unchanged() {
        let mut root = Directory::default();
        root.insert_leaf(&["a"], leaf("/a")).unwrap();
        root.insert_leaf(&["x", "y", "z"], leaf("/x/y/z")).unwrap();

        // "a" is a leaf, so nothing can be created beneath it.
        assert!(matches!(
            root.insert_leaf(&["a", "b"], leaf("/a/b")),
            Err(Error::WrongKind(_))
        ));
        // "/x/y" is a directory and cannot become a leaf.
        assert!(matches!(
            root.insert_leaf(&["x", "y"], leaf("/x/y")),
            Err(Error::WrongKind(_))
        ));
        // A conflict deep below an existing chain.
        assert!(matches!(
            root.insert_leaf(&["x", "y", "z", "w"], leaf("/x/y/z/w")),
            Err(Error::WrongKind(_))
        ));

        assert_eq!(root.count_leaves(), 2);
        assert!(matches!(root.lookup(&["a"]), Some(Node::Leaf(_))));
        assert!(matches!(root.lookup(&["x", "y", "z"]), Some(Node::Leaf(_))));
        let names: Vec<String> = root.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a".to_string(), "x".to_string()]);
    }

    #[test]
    fn test_duplicate_leaf() {
        let mut root = Directory::default();
        root.insert_leaf(&["a"], leaf("/a")).unwrap();
        assert!(matches!(
            root.insert_leaf(&["a"], leaf("/a")),
            Err(Error::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_remove_prunes_empty_ancestors() {
        let mut root = Directory::default();
        root.insert_leaf(&["a", "b", "c"], leaf("/a/b/c")).unwrap();
        root.insert_leaf(&["a", "d"], leaf("/a/d")).unwrap();

        assert!(root.remove_leaf(&["a", "b", "c"], None).is_some());
        assert!(root.lookup(&["a", "b"]).is_none());
        assert!(root.lookup(&["a"]).is_some());

        assert!(root.remove_leaf(&["a", "d"], None).is_some());
        assert!(root.is_empty());
    }

    #[test]
    fn test_remove_only_matching_leaf() {
        let mut root = Directory::default();
        let first = leaf("/a");
        root.insert_leaf(&["a"], first.clone()).unwrap();
        let other = leaf("/a");
        assert!(root.remove_leaf(&["a"], Some(&other)).is_none());
        assert!(root.remove_leaf(&["a"], Some(&first)).is_some());
    }

    #[test]
    fn test_list_skips_pending() {
        let mut root = Directory::default();
        root.insert_leaf(&["a"], leaf("/a")).unwrap();
        root.insert_leaf(&["b"], leaf("/b")).unwrap();
        if let Some(slot) = root.lookup_slot(&["a"]) {
            slot.pending_unlink = true;
        }
        let names: Vec<String> = root.list().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[test]
    fn test_render_tree() {
        let mut root = Directory::default();
        root.insert_leaf(&["net", "port"], leaf("/net/port")).unwrap();
        let mut out = String::new();
        root.render_tree(0, &mut out);
        assert_eq!(out, "net/\n  port [leaf 444 refs=0]\n");
    }
}
