//! Project: authoritative resource pool and consistency maintainer.
//!
//! Holds every resource record (files and groups) keyed by id. All writes to
//! the bidirectional file<->group relationship go through the methods here;
//! `resource_group_id` and `files` have no public setters anywhere else, so
//! the relationship cannot diverge behind the maintainer's back. Project is
//! the unit of serialization (`to_json` / `from_json`).
//!
//! Locking follows a single-writer, multiple-reader discipline: every
//! mutation holds the write lock for its whole multi-step update, so a
//! reader can never observe a file pointing at a group that does not yet
//! point back. Resolution and preload scheduling take the read lock and run
//! concurrently. Change events are emitted only after the write lock is
//! released.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{error, info};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::resource::{
    PreloadLevel, ResourceError, ResourceFile, ResourceGroup, ResourceItem,
};
use super::tag::{validate_tags, Tag, TagNamespace};
use crate::core::env::{self, EpisodeEnvironment, EpisodeRegistry};
use crate::core::events::{ResourceEvent, ResourceEventSender};
use crate::core::resolver::ConstraintSet;
use crate::core::{preload, resolver};

/// Opaque persistent-store contract for resource records.
///
/// External persistence layers implement this surface; the in-memory pool
/// is the reference implementation. `put` must keep the bidirectional
/// relationship intact: a write that would break it is rejected wholesale.
pub trait Repository {
    fn get(&self, id: Uuid) -> Option<ResourceItem>;
    fn list(&self) -> Vec<ResourceItem>;
    fn put(&self, item: ResourceItem) -> Result<(), ResourceError>;
}

/// Top-level project: the resource pool and the operations over it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unified resource pool: files and groups keyed by id.
    /// Thread-safe for concurrent reads from resolution/preload paths.
    #[serde(with = "arc_rwlock_hashmap")]
    pool: Arc<RwLock<HashMap<Uuid, ResourceItem>>>,

    /// Extension configuration keys excluded from managed-field propagation.
    #[serde(default)]
    non_mergeable_extensions: Vec<String>,

    /// Event sender for completed mutations (runtime-only)
    #[serde(skip)]
    #[serde(default)]
    event_sender: ResourceEventSender,

    /// Last save path for quick save (runtime-only)
    #[serde(skip)]
    last_save_path: Option<PathBuf>,
}

impl Default for Project {
    fn default() -> Self {
        Self::new()
    }
}

impl Project {
    pub fn new() -> Self {
        Self {
            pool: Arc::new(RwLock::new(HashMap::new())),
            non_mergeable_extensions: Vec::new(),
            event_sender: ResourceEventSender::dummy(),
            last_save_path: None,
        }
    }

    /// Set event sender (call after creation or deserialization).
    pub fn set_event_sender(&mut self, sender: ResourceEventSender) {
        self.event_sender = sender;
    }

    /// Declare extension configuration keys that propagation must not touch.
    pub fn set_non_mergeable_extensions(&mut self, keys: Vec<String>) {
        self.non_mergeable_extensions = keys;
    }

    fn read_pool(&self) -> RwLockReadGuard<'_, HashMap<Uuid, ResourceItem>> {
        self.pool.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_pool(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, ResourceItem>> {
        self.pool.write().unwrap_or_else(|e| e.into_inner())
    }

    // === Accessors ===

    /// Get cloned record by id.
    pub fn get(&self, id: Uuid) -> Option<ResourceItem> {
        self.read_pool().get(&id).cloned()
    }

    /// Get cloned file by id.
    pub fn get_file(&self, id: Uuid) -> Option<ResourceFile> {
        self.read_pool().get(&id).and_then(ResourceItem::as_file).cloned()
    }

    /// Get cloned group by id.
    pub fn get_group(&self, id: Uuid) -> Option<ResourceGroup> {
        self.read_pool().get(&id).and_then(ResourceItem::as_group).cloned()
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.read_pool().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.read_pool().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_pool().is_empty()
    }

    /// All records, ordered by import time then id so listings are stable.
    pub fn list(&self) -> Vec<ResourceItem> {
        let pool = self.read_pool();
        let mut items: Vec<ResourceItem> = pool.values().cloned().collect();
        items.sort_by_key(|i| (i.common().import_time(), i.id()));
        items
    }

    /// Re-check the bidirectional invariant over the whole pool.
    pub fn verify(&self) -> Result<(), ResourceError> {
        check_pool(&self.read_pool())
    }

    // === Validated construction (import) ===

    /// Import a file into the pool.
    ///
    /// References declared on the record are validated first: an unknown
    /// owning group is `GroupNotFound`, unknown `managed_by`/`redirect_to`
    /// targets are `FileNotFound`, a soft-deleted owning group is
    /// `AlreadyRemoved`. A declared owning group is back-filled so the
    /// relationship is symmetric the moment the file lands.
    pub fn import_file(&self, file: ResourceFile) -> Result<Uuid, ResourceError> {
        validate_tags(file.tags(), TagNamespace::File)?;
        let file_id = file.id();
        {
            let mut pool = self.write_pool();

            if let Some(source_id) = file.managed_by {
                if pool.get(&source_id).and_then(ResourceItem::as_file).is_none() {
                    return Err(ResourceError::FileNotFound(source_id));
                }
            }
            if let Some(target_id) = file.redirect_to {
                if pool.get(&target_id).and_then(ResourceItem::as_file).is_none() {
                    return Err(ResourceError::FileNotFound(target_id));
                }
            }
            let group_id = file.resource_group_id();
            if let Some(gid) = group_id {
                let group = pool
                    .get(&gid)
                    .and_then(ResourceItem::as_group)
                    .ok_or(ResourceError::GroupNotFound(gid))?;
                if group.common.is_removed() {
                    return Err(ResourceError::AlreadyRemoved(gid));
                }
            }

            let mut prior = vec![(file_id, pool.get(&file_id).cloned())];
            if let Some(gid) = group_id {
                prior.push((gid, pool.get(&gid).cloned()));
            }

            pool.insert(file_id, ResourceItem::File(file));
            if let Some(gid) = group_id {
                if let Some(group) = pool.get_mut(&gid).and_then(ResourceItem::as_group_mut) {
                    if !group.files.contains(&file_id) {
                        group.files.push(file_id);
                    }
                }
            }

            commit(&mut pool, prior, "import_file")?;
        }
        info!("imported file {}", file_id);
        self.event_sender.emit(ResourceEvent::ResourceImported { id: file_id });
        Ok(file_id)
    }

    /// Create a group in the pool.
    ///
    /// Every declared member must exist as a live file (`FileNotFound` /
    /// `AlreadyRemoved` otherwise). Members are back-filled to point at the
    /// new group; a member already owned by another group is moved out of
    /// it, keeping both sides symmetric.
    pub fn create_group(&self, group: ResourceGroup) -> Result<Uuid, ResourceError> {
        validate_tags(group.tags(), TagNamespace::Group)?;
        let mut group = group;
        let mut seen = HashSet::new();
        group.files.retain(|id| seen.insert(*id));

        let group_id = group.id();
        let member_ids = group.files.clone();
        {
            let mut pool = self.write_pool();

            for fid in &member_ids {
                let file = pool
                    .get(fid)
                    .and_then(ResourceItem::as_file)
                    .ok_or(ResourceError::FileNotFound(*fid))?;
                if file.common.is_removed() {
                    return Err(ResourceError::AlreadyRemoved(*fid));
                }
            }

            // Snapshot every record the move can touch before mutating any
            let mut affected: Vec<Uuid> = vec![group_id];
            affected.extend(member_ids.iter().copied());
            for fid in &member_ids {
                let old = pool
                    .get(fid)
                    .and_then(ResourceItem::as_file)
                    .and_then(|f| f.resource_group_id());
                if let Some(old_gid) = old {
                    if !affected.contains(&old_gid) {
                        affected.push(old_gid);
                    }
                }
            }
            let prior: Vec<(Uuid, Option<ResourceItem>)> =
                affected.iter().map(|id| (*id, pool.get(id).cloned())).collect();

            for fid in &member_ids {
                let old = pool
                    .get(fid)
                    .and_then(ResourceItem::as_file)
                    .and_then(|f| f.resource_group_id());
                if let Some(old_gid) = old {
                    if let Some(g) = pool.get_mut(&old_gid).and_then(ResourceItem::as_group_mut) {
                        g.files.retain(|x| x != fid);
                    }
                }
                if let Some(f) = pool.get_mut(fid).and_then(ResourceItem::as_file_mut) {
                    f.resource_group_id = Some(group_id);
                }
            }
            pool.insert(group_id, ResourceItem::Group(group));

            commit(&mut pool, prior, "create_group")?;
        }
        info!("created group {} with {} members", group_id, member_ids.len());
        self.event_sender.emit(ResourceEvent::ResourceImported { id: group_id });
        Ok(group_id)
    }

    // === Consistency maintainer ===

    /// Put a file into a group, moving it out of its previous group first.
    ///
    /// Both sides of the relationship change under one write lock; readers
    /// never see a half-applied move. Adding a file to the group it is
    /// already in is a no-op success.
    pub fn add_file_to_group(&self, file_id: Uuid, group_id: Uuid) -> Result<(), ResourceError> {
        {
            let mut pool = self.write_pool();

            let (file_removed, old_group_id) = {
                let file = pool
                    .get(&file_id)
                    .and_then(ResourceItem::as_file)
                    .ok_or(ResourceError::FileNotFound(file_id))?;
                (file.common.is_removed(), file.resource_group_id())
            };
            if file_removed {
                return Err(ResourceError::AlreadyRemoved(file_id));
            }
            let group_removed = pool
                .get(&group_id)
                .and_then(ResourceItem::as_group)
                .ok_or(ResourceError::GroupNotFound(group_id))?
                .common
                .is_removed();
            if group_removed {
                return Err(ResourceError::AlreadyRemoved(group_id));
            }
            if old_group_id == Some(group_id) {
                return Ok(());
            }

            let mut prior = vec![
                (file_id, pool.get(&file_id).cloned()),
                (group_id, pool.get(&group_id).cloned()),
            ];
            if let Some(old_gid) = old_group_id {
                prior.push((old_gid, pool.get(&old_gid).cloned()));
            }

            if let Some(old_gid) = old_group_id {
                if let Some(g) = pool.get_mut(&old_gid).and_then(ResourceItem::as_group_mut) {
                    g.files.retain(|x| *x != file_id);
                }
            }
            if let Some(f) = pool.get_mut(&file_id).and_then(ResourceItem::as_file_mut) {
                f.resource_group_id = Some(group_id);
            }
            if let Some(g) = pool.get_mut(&group_id).and_then(ResourceItem::as_group_mut) {
                if !g.files.contains(&file_id) {
                    g.files.push(file_id);
                }
            }

            commit(&mut pool, prior, "add_file_to_group")?;
        }
        info!("file {} joined group {}", file_id, group_id);
        self.event_sender
            .emit(ResourceEvent::FileAddedToGroup { file_id, group_id });
        Ok(())
    }

    /// Take a file out of its group. Idempotent: ungrouped files are a
    /// no-op success.
    pub fn remove_file_from_group(&self, file_id: Uuid) -> Result<(), ResourceError> {
        let group_id = {
            let mut pool = self.write_pool();

            let old_group_id = {
                let file = pool
                    .get(&file_id)
                    .and_then(ResourceItem::as_file)
                    .ok_or(ResourceError::FileNotFound(file_id))?;
                file.resource_group_id()
            };
            let Some(group_id) = old_group_id else {
                return Ok(());
            };

            let prior = vec![
                (file_id, pool.get(&file_id).cloned()),
                (group_id, pool.get(&group_id).cloned()),
            ];

            if let Some(f) = pool.get_mut(&file_id).and_then(ResourceItem::as_file_mut) {
                f.resource_group_id = None;
            }
            if let Some(g) = pool.get_mut(&group_id).and_then(ResourceItem::as_group_mut) {
                g.files.retain(|x| *x != file_id);
            }

            commit(&mut pool, prior, "remove_file_from_group")?;
            group_id
        };
        info!("file {} left group {}", file_id, group_id);
        self.event_sender
            .emit(ResourceEvent::FileRemovedFromGroup { file_id, group_id });
        Ok(())
    }

    /// Re-derive managed fields for every file managed by `source_file_id`.
    ///
    /// Sticky tags on targets survive untouched; the source's non-sticky
    /// tags apply and win per field over target edits; extension
    /// configurations copy except the declared non-mergeable keys; scalar
    /// managed fields copy verbatim. Running twice without a source change
    /// produces zero diffs. Returns the number of managed files visited.
    pub fn propagate_managed_fields(&self, source_file_id: Uuid) -> Result<usize, ResourceError> {
        let targets = {
            let mut pool = self.write_pool();

            let source = pool
                .get(&source_file_id)
                .and_then(ResourceItem::as_file)
                .cloned()
                .ok_or(ResourceError::FileNotFound(source_file_id))?;

            let target_ids: Vec<Uuid> = pool
                .values()
                .filter_map(ResourceItem::as_file)
                .filter(|f| f.managed_by == Some(source_file_id))
                .map(|f| f.id())
                .collect();

            let prior: Vec<(Uuid, Option<ResourceItem>)> =
                target_ids.iter().map(|id| (*id, pool.get(id).cloned())).collect();

            let non_mergeable: HashSet<&str> =
                self.non_mergeable_extensions.iter().map(String::as_str).collect();
            for id in &target_ids {
                if let Some(target) = pool.get_mut(id).and_then(ResourceItem::as_file_mut) {
                    merge_managed_fields(target, &source, &non_mergeable);
                }
            }

            commit(&mut pool, prior, "propagate_managed_fields")?;
            target_ids.len()
        };
        info!("propagated managed fields from {} to {} files", source_file_id, targets);
        self.event_sender.emit(ResourceEvent::ManagedFieldsPropagated {
            source_id: source_file_id,
            targets,
        });
        Ok(targets)
    }

    /// Soft-delete a record. The record persists forever; `removed` is the
    /// only deletion signal. Removing a group does not cascade to members.
    pub fn remove_resource(&self, id: Uuid) -> Result<(), ResourceError> {
        {
            let mut pool = self.write_pool();
            let item = pool.get_mut(&id).ok_or(ResourceError::FileNotFound(id))?;
            if item.is_removed() {
                return Err(ResourceError::AlreadyRemoved(id));
            }
            item.common_mut().mark_removed();
        }
        info!("soft-removed resource {}", id);
        self.event_sender.emit(ResourceEvent::ResourceRemoved { id });
        Ok(())
    }

    // === Field-level setters ===

    fn with_item<R>(
        &self,
        id: Uuid,
        op: impl FnOnce(&mut ResourceItem) -> Result<R, ResourceError>,
    ) -> Result<R, ResourceError> {
        let result = {
            let mut pool = self.write_pool();
            let item = pool.get_mut(&id).ok_or(ResourceError::FileNotFound(id))?;
            op(item)?
        };
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id });
        Ok(result)
    }

    fn with_file<R>(
        &self,
        id: Uuid,
        op: impl FnOnce(&mut ResourceFile) -> Result<R, ResourceError>,
    ) -> Result<R, ResourceError> {
        let result = {
            let mut pool = self.write_pool();
            let file = pool
                .get_mut(&id)
                .and_then(ResourceItem::as_file_mut)
                .ok_or(ResourceError::FileNotFound(id))?;
            op(file)?
        };
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id });
        Ok(result)
    }

    pub fn set_label(&self, id: Uuid, label: impl Into<String>) -> Result<(), ResourceError> {
        let label = label.into();
        self.with_item(id, |item| {
            item.common_mut().label = label;
            Ok(())
        })
    }

    pub fn set_thumbnail(&self, id: Uuid, src: Option<String>) -> Result<(), ResourceError> {
        self.with_item(id, |item| {
            item.common_mut().thumbnail_src = src;
            Ok(())
        })
    }

    /// Replace a file's tag set. `TagNamespaceViolation` leaves it untouched.
    pub fn set_file_tags(&self, file_id: Uuid, tags: Vec<Tag>) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| f.set_tags(tags))
    }

    pub fn add_file_tag(&self, file_id: Uuid, tag: Tag) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| f.add_tag(tag))
    }

    /// Replace a group's tag set. `TagNamespaceViolation` leaves it untouched.
    pub fn set_group_tags(&self, group_id: Uuid, tags: Vec<Tag>) -> Result<(), ResourceError> {
        let result = {
            let mut pool = self.write_pool();
            let group = pool
                .get_mut(&group_id)
                .and_then(ResourceItem::as_group_mut)
                .ok_or(ResourceError::GroupNotFound(group_id))?;
            group.set_tags(tags)
        };
        result?;
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id: group_id });
        Ok(())
    }

    /// Set one delivery channel entry on a file.
    pub fn set_url(
        &self,
        file_id: Uuid,
        channel: impl Into<String>,
        url: impl Into<String>,
    ) -> Result<(), ResourceError> {
        let (channel, url) = (channel.into(), url.into());
        self.with_file(file_id, |f| {
            f.url.insert(channel, url);
            Ok(())
        })
    }

    /// Set one integration configuration entry on a file.
    pub fn set_extension_configuration(
        &self,
        file_id: Uuid,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<(), ResourceError> {
        let (key, value) = (key.into(), value.into());
        self.with_file(file_id, |f| {
            f.extension_configurations.insert(key, value);
            Ok(())
        })
    }

    pub fn set_preload_level(&self, file_id: Uuid, level: PreloadLevel) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| {
            f.preload_level = level;
            Ok(())
        })
    }

    pub fn set_cache_to_hard_disk(&self, file_id: Uuid, cache: bool) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| {
            f.cache_to_hard_disk = cache;
            Ok(())
        })
    }

    pub fn set_episode_ids(&self, file_id: Uuid, episode_ids: Vec<Uuid>) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| {
            f.episode_ids = episode_ids;
            Ok(())
        })
    }

    pub fn set_duration(&self, file_id: Uuid, duration: Option<f64>) -> Result<(), ResourceError> {
        self.with_file(file_id, |f| {
            f.duration = duration;
            Ok(())
        })
    }

    /// Point a file at the source that manages it, or detach it.
    pub fn set_managed_by(&self, file_id: Uuid, source: Option<Uuid>) -> Result<(), ResourceError> {
        {
            let mut pool = self.write_pool();
            if let Some(source_id) = source {
                if pool.get(&source_id).and_then(ResourceItem::as_file).is_none() {
                    return Err(ResourceError::FileNotFound(source_id));
                }
            }
            let file = pool
                .get_mut(&file_id)
                .and_then(ResourceItem::as_file_mut)
                .ok_or(ResourceError::FileNotFound(file_id))?;
            file.managed_by = source;
        }
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id: file_id });
        Ok(())
    }

    /// Point a file at a published replacement, or clear the redirect.
    /// Cycles are caught at resolution time, not here.
    pub fn set_redirect_to(&self, file_id: Uuid, target: Option<Uuid>) -> Result<(), ResourceError> {
        {
            let mut pool = self.write_pool();
            if let Some(target_id) = target {
                if pool.get(&target_id).and_then(ResourceItem::as_file).is_none() {
                    return Err(ResourceError::FileNotFound(target_id));
                }
            }
            let file = pool
                .get_mut(&file_id)
                .and_then(ResourceItem::as_file_mut)
                .ok_or(ResourceError::FileNotFound(file_id))?;
            file.redirect_to = target;
        }
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id: file_id });
        Ok(())
    }

    // === Read paths (resolution, preload, environment) ===

    /// Resolve a label to exactly one concrete file. Pure read.
    pub fn resolve(
        &self,
        label: &str,
        constraints: &ConstraintSet,
    ) -> Result<ResourceFile, ResourceError> {
        resolver::resolve_label(&self.read_pool(), label, constraints)
    }

    /// Resolve directly against a known group id. Pure read.
    pub fn resolve_group(
        &self,
        group_id: Uuid,
        constraints: &ConstraintSet,
    ) -> Result<ResourceFile, ResourceError> {
        resolver::resolve_group(&self.read_pool(), group_id, constraints)
    }

    /// Files to have ready for `episode_id`, most urgent first. Pure read.
    pub fn preload_sequence(&self, episode_id: Uuid) -> Vec<ResourceFile> {
        preload::preload_sequence(&self.read_pool(), episode_id)
    }

    /// Assemble the episode environment payload and notify the bridge.
    pub fn resolve_environment(
        &self,
        registry: &dyn EpisodeRegistry,
        episode_id: Uuid,
    ) -> EpisodeEnvironment {
        let environment = env::build(self, registry, episode_id);
        self.event_sender
            .emit(ResourceEvent::EnvironmentResolved { episode_id });
        environment
    }

    // === Persistence ===

    pub fn last_save_path(&self) -> Option<PathBuf> {
        self.last_save_path.clone()
    }

    pub fn set_last_save_path(&mut self, path: Option<PathBuf>) {
        self.last_save_path = path;
    }

    /// Serialize project to JSON file.
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Serialize project error: {}", e))?;

        let path = path.as_ref();
        let path = if path.extension().and_then(|s| s.to_str()) != Some("json") {
            path.with_extension("json")
        } else {
            path.to_path_buf()
        };

        fs::write(&path, json).map_err(|e| format!("Write project error: {}", e))?;
        Ok(())
    }

    /// Load project from JSON file and re-check the relationship invariant.
    pub fn from_json<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let json =
            fs::read_to_string(path.as_ref()).map_err(|e| format!("Read project error: {}", e))?;

        let project: Project =
            serde_json::from_str(&json).map_err(|e| format!("Parse project error: {}", e))?;

        project
            .verify()
            .map_err(|e| format!("Project invariant violated: {}", e))?;
        Ok(project)
    }
}

impl Repository for Project {
    fn get(&self, id: Uuid) -> Option<ResourceItem> {
        Project::get(self, id)
    }

    fn list(&self) -> Vec<ResourceItem> {
        Project::list(self)
    }

    fn put(&self, item: ResourceItem) -> Result<(), ResourceError> {
        let id = item.id();
        {
            let mut pool = self.write_pool();
            let prior = vec![(id, pool.get(&id).cloned())];
            pool.insert(id, item);
            commit(&mut pool, prior, "put")?;
        }
        self.event_sender.emit(ResourceEvent::ResourceUpdated { id });
        Ok(())
    }
}

/// Bidirectional invariant over the whole pool: every grouped file is
/// listed by its group, every listed member points back.
fn check_pool(pool: &HashMap<Uuid, ResourceItem>) -> Result<(), ResourceError> {
    for item in pool.values() {
        match item {
            ResourceItem::File(f) => {
                if let Some(gid) = f.resource_group_id() {
                    let ok = pool
                        .get(&gid)
                        .and_then(ResourceItem::as_group)
                        .map(|g| g.files.contains(&f.id()))
                        .unwrap_or(false);
                    if !ok {
                        return Err(ResourceError::ConsistencyViolation(format!(
                            "file {} points at group {} which does not point back",
                            f.id(),
                            gid
                        )));
                    }
                }
            }
            ResourceItem::Group(g) => {
                for fid in &g.files {
                    let ok = pool
                        .get(fid)
                        .and_then(ResourceItem::as_file)
                        .map(|f| f.resource_group_id() == Some(g.id()))
                        .unwrap_or(false);
                    if !ok {
                        return Err(ResourceError::ConsistencyViolation(format!(
                            "group {} lists file {} which does not point back",
                            g.id(),
                            fid
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Verify the invariant after a staged mutation; roll the touched records
/// back and surface `ConsistencyViolation` if it broke. The violation is a
/// defect in this module, never expected input.
fn commit(
    pool: &mut HashMap<Uuid, ResourceItem>,
    prior: Vec<(Uuid, Option<ResourceItem>)>,
    op: &str,
) -> Result<(), ResourceError> {
    if let Err(err) = check_pool(pool) {
        error!("{} aborted, rolling back: {}", op, err);
        for (id, item) in prior {
            match item {
                Some(item) => {
                    pool.insert(id, item);
                }
                None => {
                    pool.remove(&id);
                }
            }
        }
        return Err(err);
    }
    Ok(())
}

/// Re-derive the managed fields of `target` from `source`.
///
/// Tag rule: (target's sticky tags) ∪ (source's non-sticky tags) ∪
/// (target's non-sticky tags whose field the source does not define).
/// Construction order is fixed, so repeated runs reproduce the same list.
fn merge_managed_fields(
    target: &mut ResourceFile,
    source: &ResourceFile,
    non_mergeable: &HashSet<&str>,
) {
    let source_fields: HashSet<&str> = source
        .tags()
        .iter()
        .filter(|t| !t.sticky)
        .map(|t| t.field.as_str())
        .collect();

    let mut merged: Vec<Tag> = Vec::new();
    let push = |merged: &mut Vec<Tag>, tag: &Tag| {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    };
    for tag in target.tags().iter().filter(|t| t.sticky) {
        push(&mut merged, tag);
    }
    for tag in source.tags().iter().filter(|t| !t.sticky) {
        push(&mut merged, tag);
    }
    for tag in target
        .tags()
        .iter()
        .filter(|t| !t.sticky && !source_fields.contains(t.field.as_str()))
    {
        push(&mut merged, tag);
    }
    target.set_tags_unchecked(merged);

    for (key, value) in &source.extension_configurations {
        if !non_mergeable.contains(key.as_str()) {
            target.extension_configurations.insert(key.clone(), value.clone());
        }
    }

    target.cache_to_hard_disk = source.cache_to_hard_disk;
    target.preload_level = source.preload_level;
    target.episode_ids = source.episode_ids.clone();
}

// Serde helper for Arc<RwLock<HashMap<Uuid, ResourceItem>>>
mod arc_rwlock_hashmap {
    use super::*;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S>(
        map: &Arc<RwLock<HashMap<Uuid, ResourceItem>>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        map.read().unwrap_or_else(|e| e.into_inner()).serialize(serializer)
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Arc<RwLock<HashMap<Uuid, ResourceItem>>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = HashMap::<Uuid, ResourceItem>::deserialize(deserializer)?;
        Ok(Arc::new(RwLock::new(map)))
    }
}
