//! Resource entities: files, groups, and the fields they share.
//!
//! A `ResourceFile` is one concrete media asset; a `ResourceGroup` collects
//! variants of the same logical asset across locales, devices and roles.
//! Records are soft-deleted only: a published episode may still reference
//! them, so the record must survive removal in the authoring tool.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tag::{validate_tags, Tag, TagNamespace};
use crate::utils::clock;

/// Errors produced by the resource model and the engines over it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    FileNotFound(Uuid),
    GroupNotFound(Uuid),
    TagNamespaceViolation(String),
    RedirectCycle(Uuid),
    NoEligibleResource(String),
    /// Internal invariant breach. Always a defect in the consistency
    /// maintainer or a bypassed write path, never user input.
    ConsistencyViolation(String),
    AlreadyRemoved(Uuid),
}

impl std::fmt::Display for ResourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceError::FileNotFound(id) => write!(f, "Resource file not found: {}", id),
            ResourceError::GroupNotFound(id) => write!(f, "Resource group not found: {}", id),
            ResourceError::TagNamespaceViolation(msg) => {
                write!(f, "Tag namespace violation: {}", msg)
            }
            ResourceError::RedirectCycle(id) => write!(f, "Redirect cycle through: {}", id),
            ResourceError::NoEligibleResource(label) => {
                write!(f, "No eligible resource for: {}", label)
            }
            ResourceError::ConsistencyViolation(msg) => {
                write!(f, "Consistency violation: {}", msg)
            }
            ResourceError::AlreadyRemoved(id) => write!(f, "Resource already removed: {}", id),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Preload urgency, ordered from least to most eager.
///
/// The asset loader consumes these through the preload sequence: higher
/// levels load first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PreloadLevel {
    #[default]
    None,
    Lazy,
    OnEpisodeStart,
    Eager,
}

/// Content identity hashes for a converted file.
///
/// xxHash is the fast path; MD5 is kept alongside for tooling that only has
/// a battery-included MD5 implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvertedHash {
    pub xx_hash: String,
    pub md5: String,
}

/// Fields shared by every resource entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceCommon {
    /// Stable identifier inside the project pool, fixed at creation.
    id: Uuid,
    /// Human-readable label; uniqueness is not enforced, but groups shadow
    /// same-labeled files during resolution.
    pub label: String,
    /// Soft-delete flag. Records are never hard-deleted.
    removed: bool,
    /// When `removed` flipped true (epoch ms); 0 while alive.
    removed_time: i64,
    /// Import timestamp (epoch ms), fixed at creation.
    import_time: i64,
    /// Authoring-tool-only preview reference; not part of the playback
    /// contract and never uploaded.
    pub thumbnail_src: Option<String>,
}

impl ResourceCommon {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            label: label.into(),
            removed: false,
            removed_time: 0,
            import_time: clock::now_ms(),
            thumbnail_src: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn import_time(&self) -> i64 {
        self.import_time
    }

    pub fn is_removed(&self) -> bool {
        self.removed
    }

    pub fn removed_time(&self) -> i64 {
        self.removed_time
    }

    /// Flip the soft-delete flag and stamp the removal time.
    /// No-op if already removed (the first stamp wins).
    pub(crate) fn mark_removed(&mut self) {
        if !self.removed {
            self.removed = true;
            self.removed_time = clock::now_ms();
        }
    }

    #[cfg(test)]
    pub(crate) fn set_import_time(&mut self, ms: i64) {
        self.import_time = ms;
    }
}

/// A single concrete media asset record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceFile {
    #[serde(flatten)]
    pub common: ResourceCommon,

    /// Resolve through this file instead of this record's own content.
    /// Only set on published online variants merged into a group.
    #[serde(default)]
    pub redirect_to: Option<Uuid>,

    /// Source file that keeps this file's managed fields in sync. While the
    /// source changes, mergeable configurations and non-sticky tags are
    /// propagated here.
    #[serde(default)]
    pub managed_by: Option<Uuid>,

    /// MIME type, with codec information for audio/video.
    pub mime_type: String,

    /// Import-time hash. Legacy, best effort only; `converted_hash` is the
    /// authoritative content identity.
    #[serde(default)]
    pub original_hash: String,

    /// Authoritative content identity of the converted file.
    #[serde(default)]
    pub converted_hash: ConvertedHash,

    /// Delivery channel -> access string. The key is the uploader identity:
    /// a CDN name, or "bundled" for package-built-in resources. Selection
    /// among channels belongs to the asset loader.
    #[serde(default)]
    pub url: IndexMap<String, String>,

    /// Whether the file must be retained in a persistent local store
    /// across sessions.
    #[serde(default)]
    pub cache_to_hard_disk: bool,

    #[serde(default)]
    pub preload_level: PreloadLevel,

    /// Legacy field, not read anywhere; kept for on-disk compatibility.
    #[serde(default)]
    pub preload_triggers: Vec<String>,

    /// Episodes that must have this file ready before they start.
    #[serde(default)]
    pub episode_ids: Vec<Uuid>,

    /// Seconds. Required for any file used as timed media.
    #[serde(default)]
    pub duration: Option<f64>,

    /// Owning group. Kept symmetric with the group's `files` by the
    /// project's consistency maintainer, the only writer of this field.
    #[serde(default)]
    pub(crate) resource_group_id: Option<Uuid>,

    /// Selection tags (file namespace). Validated on every assignment.
    #[serde(default)]
    tags: Vec<Tag>,

    /// Integration name -> opaque configuration string.
    #[serde(default)]
    pub extension_configurations: IndexMap<String, String>,
}

impl ResourceFile {
    pub fn new(label: impl Into<String>, mime_type: impl Into<String>) -> Self {
        Self {
            common: ResourceCommon::new(label),
            redirect_to: None,
            managed_by: None,
            mime_type: mime_type.into(),
            original_hash: String::new(),
            converted_hash: ConvertedHash::default(),
            url: IndexMap::new(),
            cache_to_hard_disk: false,
            preload_level: PreloadLevel::default(),
            preload_triggers: Vec::new(),
            episode_ids: Vec::new(),
            duration: None,
            resource_group_id: None,
            tags: Vec::new(),
            extension_configurations: IndexMap::new(),
        }
    }

    /// Declare the owning group before the file enters the pool. Validated
    /// and back-filled by `Project::import_file`; on a live file the
    /// grouping operations are the only writers.
    pub fn in_group(mut self, group_id: Uuid) -> Self {
        self.resource_group_id = Some(group_id);
        self
    }

    pub fn id(&self) -> Uuid {
        self.common.id()
    }

    pub fn label(&self) -> &str {
        &self.common.label
    }

    /// Owning group, if any. Writable only through the project's
    /// grouping operations.
    pub fn resource_group_id(&self) -> Option<Uuid> {
        self.resource_group_id
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Replace the tag set. Every tag must be file-namespace.
    pub fn set_tags(&mut self, tags: Vec<Tag>) -> Result<(), ResourceError> {
        validate_tags(&tags, TagNamespace::File)?;
        self.tags = tags;
        Ok(())
    }

    /// Append one tag. Must be file-namespace.
    pub fn add_tag(&mut self, tag: Tag) -> Result<(), ResourceError> {
        validate_tags(std::slice::from_ref(&tag), TagNamespace::File)?;
        self.tags.push(tag);
        Ok(())
    }

    /// Whether any tag matches the `(field, value)` pair, sticky or not.
    pub fn has_tag(&self, field: &str, value: &str) -> bool {
        self.tags.iter().any(|t| t.matches(field, value))
    }

    /// Replace the tag set without re-validation. For the consistency
    /// maintainer's propagation path, which only recombines already
    /// validated tags.
    pub(crate) fn set_tags_unchecked(&mut self, tags: Vec<Tag>) {
        self.tags = tags;
    }
}

/// A named collection of file variants for one logical asset.
///
/// A group never carries a `resource_group_id`; nesting is not a thing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroup {
    #[serde(flatten)]
    pub common: ResourceCommon,

    /// Member file ids in declaration order. Declaration order is the
    /// resolution tie-break, so it is preserved verbatim. Kept symmetric
    /// with each member's `resource_group_id` by the project's consistency
    /// maintainer, the only writer of this field.
    #[serde(default)]
    pub(crate) files: Vec<Uuid>,

    /// Category tags (group namespace, `group:*`).
    #[serde(default)]
    tags: Vec<Tag>,
}

impl ResourceGroup {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            common: ResourceCommon::new(label),
            files: Vec::new(),
            tags: Vec::new(),
        }
    }

    /// Declare initial members before the group enters the pool. Validated
    /// and back-filled by `Project::create_group`; on a live group the
    /// grouping operations are the only writers.
    pub fn with_files(mut self, files: Vec<Uuid>) -> Self {
        self.files = files;
        self
    }

    pub fn id(&self) -> Uuid {
        self.common.id()
    }

    pub fn label(&self) -> &str {
        &self.common.label
    }

    /// Member file ids in declaration order.
    pub fn files(&self) -> &[Uuid] {
        &self.files
    }

    pub fn contains(&self, file_id: Uuid) -> bool {
        self.files.contains(&file_id)
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Replace the tag set. Every tag must be group-namespace.
    pub fn set_tags(&mut self, tags: Vec<Tag>) -> Result<(), ResourceError> {
        validate_tags(&tags, TagNamespace::Group)?;
        self.tags = tags;
        Ok(())
    }

    /// Append one tag. Must be group-namespace.
    pub fn add_tag(&mut self, tag: Tag) -> Result<(), ResourceError> {
        validate_tags(std::slice::from_ref(&tag), TagNamespace::Group)?;
        self.tags.push(tag);
        Ok(())
    }
}

/// Any resource record: a concrete file or a variant group.
///
/// The discriminant is structural; no operation can flip a record between
/// variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ResourceItem {
    File(ResourceFile),
    Group(ResourceGroup),
}

impl ResourceItem {
    pub fn common(&self) -> &ResourceCommon {
        match self {
            ResourceItem::File(f) => &f.common,
            ResourceItem::Group(g) => &g.common,
        }
    }

    pub(crate) fn common_mut(&mut self) -> &mut ResourceCommon {
        match self {
            ResourceItem::File(f) => &mut f.common,
            ResourceItem::Group(g) => &mut g.common,
        }
    }

    pub fn id(&self) -> Uuid {
        self.common().id()
    }

    pub fn label(&self) -> &str {
        &self.common().label
    }

    pub fn is_removed(&self) -> bool {
        self.common().is_removed()
    }

    pub fn as_file(&self) -> Option<&ResourceFile> {
        match self {
            ResourceItem::File(f) => Some(f),
            ResourceItem::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&ResourceGroup> {
        match self {
            ResourceItem::Group(g) => Some(g),
            ResourceItem::File(_) => None,
        }
    }

    pub(crate) fn as_file_mut(&mut self) -> Option<&mut ResourceFile> {
        match self {
            ResourceItem::File(f) => Some(f),
            ResourceItem::Group(_) => None,
        }
    }

    pub(crate) fn as_group_mut(&mut self) -> Option<&mut ResourceGroup> {
        match self {
            ResourceItem::Group(g) => Some(g),
            ResourceItem::File(_) => None,
        }
    }
}
