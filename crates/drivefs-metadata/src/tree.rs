//! Entry tree - the in-memory namespace model
//!
//! Entries are indexed by resource id with a separate parent → children
//! index. Paths are never stored: [`EntryTree::path_of`] walks parent links
//! and [`EntryTree::resolve`] walks child titles from the root.
//!
//! ## Invariants
//!
//! - every non-root entry has exactly one parent, and that parent is a
//!   directory present in the tree
//! - re-parenting that would create a cycle is rejected
//! - a directory's changestamp never decreases

use std::collections::{BTreeSet, HashMap, HashSet};

use drivefs_core::domain::{
    Changestamp, DirectorySpecificInfo, DrivePath, Entry, FileError, FileResult, ResourceId,
};
use drivefs_core::ports::SearchOptions;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// Carry a directory's changestamp over to its replacement metadata
fn keep_changestamp(entry: &mut Entry, previous: Changestamp) {
    if entry.is_directory {
        entry
            .directory_info
            .get_or_insert_with(DirectorySpecificInfo::default);
        entry.bump_directory_changestamp(previous);
    }
}

/// Serializable form of an [`EntryTree`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root_id: ResourceId,
    pub largest_changestamp: Changestamp,
    pub entries: Vec<Entry>,
}

/// The namespace tree
#[derive(Debug, Clone)]
pub struct EntryTree {
    root_id: ResourceId,
    entries: HashMap<ResourceId, Entry>,
    children: HashMap<ResourceId, BTreeSet<ResourceId>>,
    largest_changestamp: Changestamp,
}

/// Path component shown for an entry
///
/// Titles may legally contain `/` on the remote side; it is replaced so the
/// derived path stays unambiguous.
fn component_name(entry: &Entry) -> String {
    if entry.title.is_empty() {
        entry.resource_id.to_string()
    } else {
        entry.title.replace('/', "_")
    }
}

impl EntryTree {
    /// Create a tree holding only the root directory
    pub fn new(root_id: ResourceId) -> Self {
        let root = Entry::new_directory(root_id.clone(), None, "");
        let mut tree = Self {
            root_id: root_id.clone(),
            entries: HashMap::new(),
            children: HashMap::new(),
            largest_changestamp: Changestamp::ZERO,
        };
        tree.children.insert(root_id.clone(), BTreeSet::new());
        tree.entries.insert(root_id, root);
        tree
    }

    pub fn root_id(&self) -> &ResourceId {
        &self.root_id
    }

    /// Number of entries, root included
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when only the root is known
    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn contains(&self, resource_id: &ResourceId) -> bool {
        self.entries.contains_key(resource_id)
    }

    pub fn get(&self, resource_id: &ResourceId) -> Option<&Entry> {
        self.entries.get(resource_id)
    }

    pub fn largest_changestamp(&self) -> Changestamp {
        self.largest_changestamp
    }

    pub fn set_largest_changestamp(&mut self, changestamp: Changestamp) {
        self.largest_changestamp = changestamp;
    }

    // ------------------------------------------------------------------
    // Path derivation
    // ------------------------------------------------------------------

    /// Derive the path of an entry by walking its parent links
    pub fn path_of(&self, resource_id: &ResourceId) -> Option<DrivePath> {
        let mut names = Vec::new();
        let mut current = self.entries.get(resource_id)?;
        while current.resource_id != self.root_id {
            if names.len() > self.entries.len() {
                return None;
            }
            names.push(component_name(current));
            let parent_id = current.parent_id.as_ref()?;
            current = self.entries.get(parent_id)?;
        }

        let mut path = DrivePath::root();
        for name in names.iter().rev() {
            path = path.join(name).ok()?;
        }
        Some(path)
    }

    /// Find the entry at `path`
    pub fn resolve(&self, path: &DrivePath) -> Option<&Entry> {
        let mut current = self.entries.get(&self.root_id)?;
        for component in path.components() {
            let child_ids = self.children.get(&current.resource_id)?;
            current = child_ids
                .iter()
                .filter_map(|id| self.entries.get(id))
                .find(|child| component_name(child) == component)?;
        }
        Some(current)
    }

    /// Direct children of a directory, sorted by title
    pub fn children(&self, resource_id: &ResourceId) -> Vec<&Entry> {
        let mut children: Vec<&Entry> = self
            .children
            .get(resource_id)
            .map(|ids| ids.iter().filter_map(|id| self.entries.get(id)).collect())
            .unwrap_or_default();
        children.sort_by(|a, b| {
            a.title
                .cmp(&b.title)
                .then_with(|| a.resource_id.cmp(&b.resource_id))
        });
        children
    }

    fn is_self_or_descendant(&self, candidate: &ResourceId, ancestor: &ResourceId) -> bool {
        let mut current = Some(candidate);
        let mut hops = 0;
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.entries.len() {
                return true;
            }
            current = self.entries.get(id).and_then(|e| e.parent_id.as_ref());
        }
        false
    }

    fn check_parent(&self, parent_id: &ResourceId) -> FileResult<()> {
        match self.entries.get(parent_id) {
            None => Err(FileError::NotFound),
            Some(parent) if !parent.is_directory => Err(FileError::NotADirectory),
            Some(_) => Ok(()),
        }
    }

    fn attach(&mut self, mut entry: Entry) {
        if entry.is_directory && entry.directory_info.is_none() {
            entry.directory_info = Some(DirectorySpecificInfo::default());
        }
        if let Some(parent_id) = &entry.parent_id {
            self.children
                .entry(parent_id.clone())
                .or_default()
                .insert(entry.resource_id.clone());
        }
        if entry.is_directory {
            self.children.entry(entry.resource_id.clone()).or_default();
        }
        self.entries.insert(entry.resource_id.clone(), entry);
    }

    // ------------------------------------------------------------------
    // Mutation
    // ------------------------------------------------------------------

    /// Insert a new entry under its (existing) parent
    pub fn insert(&mut self, entry: Entry) -> FileResult<DrivePath> {
        if self.entries.contains_key(&entry.resource_id) {
            return Err(FileError::Exists);
        }
        let parent_id = entry
            .parent_id
            .clone()
            .ok_or(FileError::InvalidOperation)?;
        self.check_parent(&parent_id)?;

        let resource_id = entry.resource_id.clone();
        self.attach(entry);
        self.path_of(&resource_id)
            .ok_or_else(|| FileError::Failed(format!("entry {resource_id} is not rooted")))
    }

    /// Replace a known entry's metadata, moving it if its parent changed
    ///
    /// # Returns
    /// The directories whose listings changed
    pub fn update(&mut self, mut entry: Entry) -> FileResult<Vec<DrivePath>> {
        let existing = self
            .entries
            .get(&entry.resource_id)
            .ok_or(FileError::NotFound)?;

        if entry.resource_id == self.root_id {
            entry.parent_id = None;
            entry.title = String::new();
            entry.is_directory = true;
            keep_changestamp(&mut entry, existing.directory_changestamp());
            self.attach(entry);
            return Ok(Vec::new());
        }

        let new_parent = entry
            .parent_id
            .clone()
            .ok_or(FileError::InvalidOperation)?;
        self.check_parent(&new_parent)?;
        if self.is_self_or_descendant(&new_parent, &entry.resource_id) {
            return Err(FileError::InvalidOperation);
        }

        let old_parent = existing.parent_id.clone();
        let was_directory = existing.is_directory;
        keep_changestamp(&mut entry, existing.directory_changestamp());

        let mut affected = Vec::new();
        if let Some(path) = old_parent.as_ref().and_then(|id| self.path_of(id)) {
            affected.push(path);
        }

        if was_directory && !entry.is_directory {
            let descendants: Vec<ResourceId> = self
                .children
                .get(&entry.resource_id)
                .map(|ids| ids.iter().cloned().collect())
                .unwrap_or_default();
            for id in descendants {
                self.remove(&id)?;
            }
            self.children.remove(&entry.resource_id);
        }
        if let Some(old_parent) = &old_parent {
            if let Some(siblings) = self.children.get_mut(old_parent) {
                siblings.remove(&entry.resource_id);
            }
        }

        trace!(resource_id = %entry.resource_id, "Updating entry");
        self.attach(entry);

        if let Some(path) = self.path_of(&new_parent) {
            if !affected.contains(&path) {
                affected.push(path);
            }
        }
        Ok(affected)
    }

    /// Apply one feed entry: delete, update/move or insert
    ///
    /// # Errors
    /// `NotFound` when the entry's parent is not in the tree yet
    pub fn apply(&mut self, entry: Entry) -> FileResult<Vec<DrivePath>> {
        if entry.deleted {
            if !self.contains(&entry.resource_id) {
                return Ok(Vec::new());
            }
            let path = self.remove(&entry.resource_id)?;
            return Ok(path.parent().into_iter().collect());
        }
        if self.contains(&entry.resource_id) {
            self.update(entry)
        } else {
            let path = self.insert(entry)?;
            Ok(path.parent().into_iter().collect())
        }
    }

    /// Remove an entry and all its descendants
    pub fn remove(&mut self, resource_id: &ResourceId) -> FileResult<DrivePath> {
        if *resource_id == self.root_id {
            return Err(FileError::InvalidOperation);
        }
        let path = self.path_of(resource_id).ok_or(FileError::NotFound)?;
        if let Some(parent_id) = self
            .entries
            .get(resource_id)
            .and_then(|e| e.parent_id.clone())
        {
            if let Some(siblings) = self.children.get_mut(&parent_id) {
                siblings.remove(resource_id);
            }
        }

        let mut stack = vec![resource_id.clone()];
        let mut removed = 0usize;
        while let Some(current) = stack.pop() {
            if let Some(child_ids) = self.children.remove(&current) {
                stack.extend(child_ids);
            }
            if self.entries.remove(&current).is_some() {
                removed += 1;
            }
        }
        debug!(path = %path, removed, "Removed entry subtree");
        Ok(path)
    }

    /// Make `children` the exact child set of a directory and stamp it
    pub fn replace_children(
        &mut self,
        directory_id: &ResourceId,
        children: Vec<Entry>,
        changestamp: Changestamp,
    ) -> FileResult<DrivePath> {
        self.check_parent(directory_id)?;

        let keep: HashSet<&ResourceId> = children
            .iter()
            .filter(|c| !c.deleted)
            .map(|c| &c.resource_id)
            .collect();
        let stale: Vec<ResourceId> = self
            .children
            .get(directory_id)
            .map(|ids| ids.iter().filter(|id| !keep.contains(id)).cloned().collect())
            .unwrap_or_default();
        for id in stale {
            self.remove(&id)?;
        }

        for mut child in children.into_iter().filter(|c| !c.deleted) {
            child.parent_id = Some(directory_id.clone());
            let resource_id = child.resource_id.clone();
            let result = if self.contains(&resource_id) {
                self.update(child).map(|_| ())
            } else {
                self.insert(child).map(|_| ())
            };
            match result {
                Ok(()) => {}
                Err(err @ (FileError::InvalidOperation | FileError::NotADirectory)) => {
                    warn!(resource_id = %resource_id, error = %err, "Skipping rejected listing entry");
                }
                Err(err) => return Err(err),
            }
        }

        self.set_directory_changestamp(directory_id, changestamp)?;
        self.path_of(directory_id).ok_or(FileError::NotFound)
    }

    /// Raise a directory's changestamp
    pub fn set_directory_changestamp(
        &mut self,
        directory_id: &ResourceId,
        changestamp: Changestamp,
    ) -> FileResult<()> {
        let entry = self
            .entries
            .get_mut(directory_id)
            .ok_or(FileError::NotFound)?;
        if !entry.is_directory {
            return Err(FileError::NotADirectory);
        }
        entry.bump_directory_changestamp(changestamp);
        Ok(())
    }

    /// Forget everything but the root
    pub fn reset(&mut self) {
        *self = Self::new(self.root_id.clone());
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Case-insensitive substring search on titles, newest first
    pub fn search(
        &self,
        query: &str,
        options: SearchOptions,
        limit: usize,
    ) -> Vec<(DrivePath, Entry)> {
        let needle = query.to_lowercase();
        let mut hits: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| e.resource_id != self.root_id)
            .filter(|e| !(options.exclude_hosted_documents && e.is_hosted_document()))
            .filter(|e| !(options.exclude_directories && e.is_directory))
            .filter(|e| e.title.to_lowercase().contains(&needle))
            .collect();
        hits.sort_by(|a, b| {
            b.modified_time
                .cmp(&a.modified_time)
                .then_with(|| a.title.cmp(&b.title))
        });
        hits.into_iter()
            .filter_map(|e| self.path_of(&e.resource_id).map(|p| (p, e.clone())))
            .take(limit)
            .collect()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn snapshot(&self) -> TreeSnapshot {
        TreeSnapshot {
            root_id: self.root_id.clone(),
            largest_changestamp: self.largest_changestamp,
            entries: self.entries.values().cloned().collect(),
        }
    }

    /// Rebuild a tree, attaching parents before children
    ///
    /// Entries that never find their parent are dropped.
    pub fn from_snapshot(snapshot: TreeSnapshot) -> Self {
        let mut tree = Self::new(snapshot.root_id);
        tree.largest_changestamp = snapshot.largest_changestamp;

        let mut pending = snapshot.entries;
        loop {
            let before = pending.len();
            let mut deferred = Vec::new();
            for entry in pending {
                let result = if entry.resource_id == tree.root_id {
                    tree.update(entry.clone()).map(|_| ())
                } else {
                    tree.insert(entry.clone()).map(|_| ())
                };
                if result.is_err() {
                    deferred.push(entry);
                }
            }
            pending = deferred;
            if pending.is_empty() || pending.len() == before {
                break;
            }
        }
        if !pending.is_empty() {
            debug!(dropped = pending.len(), "Dropped unrooted snapshot entries");
        }
        tree
    }
}
