//! Duplicate group store.
//!
//! # Overview
//!
//! [`DuplicateStore`] is the in-memory result of a detection run. Both the
//! content-hash engine and the image engine build one, and the mutation
//! engine is the only code that changes it afterwards.
//!
//! Groups are keyed by [`GroupKey`]: `(size, hash)` for byte-identical
//! groups, a numeric id for similarity groups. A store only ever shrinks:
//! members are removed, and a group that falls below two members is
//! removed as a whole. Nothing is merged or added after construction.
//!
//! # Example
//!
//! ```
//! use dupehound::duplicates::{DuplicateStore, GroupKey, NoopObserver};
//! use dupehound::scanner::ScanEntry;
//! use std::ffi::OsString;
//! use std::path::PathBuf;
//!
//! let entry = |name: &str, inode| ScanEntry {
//!     root_index: 0,
//!     subpath: PathBuf::new(),
//!     file_name: OsString::from(name),
//!     modified_time_ns: 0,
//!     changed_time_ns: 0,
//!     device_id: 1,
//!     inode,
//!     size: 100,
//! };
//! let key = GroupKey::content(100, "abcd");
//! let mut store = DuplicateStore::from_groups(
//!     vec![PathBuf::from("/data")],
//!     [(key.clone(), vec![entry("a", 1), entry("b", 2)])],
//! );
//! assert_eq!(store.total_duplicate_space(), 100);
//!
//! let outcome = store.remove_members(&key, &[entry("b", 2).identity()], &mut NoopObserver);
//! assert!(outcome.group_removed);
//! assert!(store.is_empty());
//! ```

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::scanner::{FileIdentity, ScanEntry};

/// Identifier of one duplicate group.
///
/// The ordering is the display order: content groups first, largest size
/// first, then by hash; similarity groups by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GroupKey {
    /// Byte-identical files.
    Content {
        /// Size shared by every member.
        size: u64,
        /// Hex content digest.
        hash: String,
    },
    /// Perceptually or geographically close images.
    Similar {
        /// Stable group number.
        id: usize,
    },
}

impl GroupKey {
    /// Key of a content group.
    #[must_use]
    pub fn content(size: u64, hash: impl Into<String>) -> Self {
        Self::Content {
            size,
            hash: hash.into(),
        }
    }

    /// Content hash, for content groups.
    #[must_use]
    pub fn hash(&self) -> Option<&str> {
        match self {
            Self::Content { hash, .. } => Some(hash),
            Self::Similar { .. } => None,
        }
    }
}

impl Ord for GroupKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (
                Self::Content { size: a, hash: ha },
                Self::Content { size: b, hash: hb },
            ) => b.cmp(a).then_with(|| ha.cmp(hb)),
            (Self::Content { .. }, Self::Similar { .. }) => Ordering::Less,
            (Self::Similar { .. }, Self::Content { .. }) => Ordering::Greater,
            (Self::Similar { id: a }, Self::Similar { id: b }) => a.cmp(b),
        }
    }
}

impl PartialOrd for GroupKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Content { size, hash } => write!(f, "{size}:{hash}"),
            Self::Similar { id } => write!(f, "#{id}"),
        }
    }
}

/// A group of at least two files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplicateGroup {
    /// Group identifier.
    pub key: GroupKey,
    /// Members sorted by path.
    pub members: Vec<ScanEntry>,
}

impl DuplicateGroup {
    /// Number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Always false for a group held by a store.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Size of the largest member.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.members.iter().map(|m| m.size).max().unwrap_or(0)
    }

    /// Bytes that would be freed by keeping only the largest member.
    #[must_use]
    pub fn duplicate_space(&self) -> u64 {
        let total: u64 = self.members.iter().map(|m| m.size).sum();
        total.saturating_sub(self.size())
    }

    /// Member with the given identity.
    #[must_use]
    pub fn member(&self, identity: FileIdentity) -> Option<&ScanEntry> {
        self.members.iter().find(|m| m.identity() == identity)
    }
}

/// Callbacks fired while a store shrinks.
///
/// Both methods default to doing nothing.
pub trait StoreObserver {
    /// `member` was removed from the group `key`.
    fn on_member_removed(&mut self, key: &GroupKey, member: &ScanEntry) {
        let _ = (key, member);
    }

    /// The group `key` fell below two members and was removed; `remaining`
    /// holds what was left in it.
    fn on_group_removed(&mut self, key: &GroupKey, remaining: &[ScanEntry]) {
        let _ = (key, remaining);
    }
}

/// Observer that ignores every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StoreObserver for NoopObserver {}

/// Result of [`DuplicateStore::remove_members`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// Members actually removed.
    pub removed: usize,
    /// Whether the whole group was removed.
    pub group_removed: bool,
}

/// All duplicate groups of one run.
#[derive(Debug, Clone, Default)]
pub struct DuplicateStore {
    roots: Vec<PathBuf>,
    groups: BTreeMap<GroupKey, DuplicateGroup>,
}

impl DuplicateStore {
    /// An empty store over `roots`.
    #[must_use]
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            groups: BTreeMap::new(),
        }
    }

    /// Build a store from raw groups.
    ///
    /// Repeated identities inside a group are collapsed, members are sorted
    /// by path and groups with fewer than two members are discarded.
    #[must_use]
    pub fn from_groups<I>(roots: Vec<PathBuf>, groups: I) -> Self
    where
        I: IntoIterator<Item = (GroupKey, Vec<ScanEntry>)>,
    {
        let mut store = Self::new(roots);
        for (key, mut members) in groups {
            members.sort();
            let mut seen = HashSet::new();
            members.retain(|m| seen.insert(m.identity()));
            if members.len() < 2 {
                log::trace!("Pruned group {} with {} member(s)", key, members.len());
                continue;
            }
            store.groups.insert(key.clone(), DuplicateGroup { key, members });
        }
        store
    }

    /// Scan roots the member entries are relative to.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Number of groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether the store has no groups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Group by key.
    #[must_use]
    pub fn group(&self, key: &GroupKey) -> Option<&DuplicateGroup> {
        self.groups.get(key)
    }

    /// Groups in display order.
    pub fn groups(&self) -> impl Iterator<Item = &DuplicateGroup> {
        self.groups.values()
    }

    /// Total member count across groups.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.groups.values().map(DuplicateGroup::len).sum()
    }

    /// Sum of [`DuplicateGroup::duplicate_space`] over all groups.
    #[must_use]
    pub fn total_duplicate_space(&self) -> u64 {
        self.groups.values().map(DuplicateGroup::duplicate_space).sum()
    }

    /// Absolute path of a member.
    #[must_use]
    pub fn full_path(&self, entry: &ScanEntry) -> PathBuf {
        entry.full_path(&self.roots)
    }

    /// Find the member of `key` located at `path`.
    #[must_use]
    pub fn find_member(&self, key: &GroupKey, path: &Path) -> Option<&ScanEntry> {
        self.groups
            .get(key)?
            .members
            .iter()
            .find(|m| m.full_path(&self.roots) == path)
    }

    /// Remove the members of `key` whose identity is in `identities`.
    ///
    /// Unknown identities are ignored. If fewer than two members remain the
    /// group is removed and `observer` is told so after the per-member
    /// callbacks.
    pub fn remove_members(
        &mut self,
        key: &GroupKey,
        identities: &[FileIdentity],
        observer: &mut dyn StoreObserver,
    ) -> RemovalOutcome {
        let Some(group) = self.groups.get_mut(key) else {
            return RemovalOutcome::default();
        };

        let mut outcome = RemovalOutcome::default();
        let mut kept = Vec::with_capacity(group.members.len());
        for member in group.members.drain(..) {
            if identities.contains(&member.identity()) {
                observer.on_member_removed(key, &member);
                outcome.removed += 1;
            } else {
                kept.push(member);
            }
        }
        group.members = kept;

        if group.members.len() < 2 {
            if let Some(group) = self.groups.remove(key) {
                log::debug!("Group {} dissolved", key);
                observer.on_group_removed(key, &group.members);
            }
            outcome.group_removed = true;
        }
        outcome
    }

    /// Remove a whole group.
    pub fn remove_group(&mut self, key: &GroupKey, observer: &mut dyn StoreObserver) -> bool {
        match self.groups.remove(key) {
            Some(group) => {
                observer.on_group_removed(key, &group.members);
                true
            }
            None => false,
        }
    }

    /// Shortest hash prefix length that tells every content group apart.
    ///
    /// Returns 0 when there are no content groups and at least 1 otherwise.
    #[must_use]
    pub fn hash_prefix_len(&self) -> usize {
        let mut hashes: Vec<&str> = self.groups.keys().filter_map(GroupKey::hash).collect();
        if hashes.is_empty() {
            return 0;
        }
        hashes.sort_unstable();
        hashes.dedup();

        let longest_shared = hashes
            .windows(2)
            .map(|pair| common_prefix_len(pair[0], pair[1]))
            .max()
            .unwrap_or(0);
        let max_len = hashes.iter().map(|h| h.len()).max().unwrap_or(0);
        (longest_shared + 1).min(max_len.max(1))
    }
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.bytes().zip(b.bytes()).take_while(|(x, y)| x == y).count()
}
