//! Tag-based variant resolution: pick exactly one file for a playback
//! request.
//!
//! Resolution is a pure query over a snapshot of the resource pool: it never
//! mutates, never retries, and never falls back to a different entity once
//! an error is hit. Repeating a query over an unchanged pool returns the
//! identical file.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use uuid::Uuid;

use crate::entities::resource::{
    ResourceCommon, ResourceError, ResourceFile, ResourceGroup, ResourceItem,
};

/// Constraint set for a playback request: `(field, value)` pairs matched
/// against file tags (sticky or not).
///
/// # Example
/// ```ignore
/// let constraints = ConstraintSet::new().locale("en").device("mobile");
/// let file = project.resolve("intro", &constraints)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConstraintSet {
    pairs: Vec<(String, String)>,
}

impl ConstraintSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an arbitrary `field:value` constraint.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.pairs.push((field.into(), value.into()));
        self
    }

    /// Locale constraint (`lang:*` tags).
    pub fn locale(self, value: impl Into<String>) -> Self {
        self.with("lang", value)
    }

    /// Device constraint (`device:*` tags).
    pub fn device(self, value: impl Into<String>) -> Self {
        self.with("device", value)
    }

    /// Role constraint (`role:*` tags).
    pub fn role(self, value: impl Into<String>) -> Self {
        self.with("role", value)
    }

    pub fn pairs(&self) -> &[(String, String)] {
        &self.pairs
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Resolve a label to exactly one concrete file.
///
/// A group shadows a same-labeled file. Among several same-kind matches the
/// earliest import wins, so the query stays deterministic over the unordered
/// pool. Removed entities never match.
pub fn resolve_label(
    pool: &HashMap<Uuid, ResourceItem>,
    label: &str,
    constraints: &ConstraintSet,
) -> Result<ResourceFile, ResourceError> {
    let mut group: Option<&ResourceGroup> = None;
    let mut file: Option<&ResourceFile> = None;

    for item in pool.values() {
        if item.is_removed() || item.label() != label {
            continue;
        }
        match item {
            ResourceItem::Group(g) => {
                if group.map_or(true, |cur| older(&g.common, &cur.common)) {
                    group = Some(g);
                }
            }
            ResourceItem::File(f) => {
                if file.map_or(true, |cur| older(&f.common, &cur.common)) {
                    file = Some(f);
                }
            }
        }
    }

    if let Some(group) = group {
        debug!("resolve '{}' via group {}", label, group.id());
        return select_from_group(pool, group, constraints);
    }
    if let Some(file) = file {
        return follow_redirects(pool, file);
    }
    Err(ResourceError::NoEligibleResource(label.to_string()))
}

/// Resolve directly against a known group id.
pub fn resolve_group(
    pool: &HashMap<Uuid, ResourceItem>,
    group_id: Uuid,
    constraints: &ConstraintSet,
) -> Result<ResourceFile, ResourceError> {
    let group = pool
        .get(&group_id)
        .and_then(ResourceItem::as_group)
        .ok_or(ResourceError::GroupNotFound(group_id))?;
    if group.common.is_removed() {
        // A soft-deleted group has nothing eligible to offer
        return Err(ResourceError::NoEligibleResource(group.label().to_string()));
    }
    select_from_group(pool, group, constraints)
}

/// Earlier import wins; id is the final tie-break so ordering is total.
fn older(a: &ResourceCommon, b: &ResourceCommon) -> bool {
    (a.import_time(), a.id()) < (b.import_time(), b.id())
}

/// Score one member: the count of constraint pairs its tag set carries.
fn score(file: &ResourceFile, constraints: &ConstraintSet) -> usize {
    constraints
        .pairs()
        .iter()
        .filter(|(field, value)| file.has_tag(field, value))
        .count()
}

/// Pick the best-scoring eligible member of a group.
///
/// Ties (including all-zero scores) break by declaration order in the
/// group's file list: first listed wins. A zero score is a weaker match,
/// not a failure.
fn select_from_group(
    pool: &HashMap<Uuid, ResourceItem>,
    group: &ResourceGroup,
    constraints: &ConstraintSet,
) -> Result<ResourceFile, ResourceError> {
    let mut best: Option<(&ResourceFile, usize)> = None;

    for file_id in group.files() {
        let Some(file) = pool.get(file_id).and_then(ResourceItem::as_file) else {
            // Dangling member ids are a pool defect; resolution stays
            // read-only and just skips them.
            warn!("group {} lists unknown file {}", group.id(), file_id);
            continue;
        };
        if file.common.is_removed() {
            continue;
        }
        let s = score(file, constraints);
        if best.map_or(true, |(_, bs)| s > bs) {
            best = Some((file, s));
        }
    }

    match best {
        Some((file, s)) => {
            debug!(
                "resolve group '{}': {} scored {}/{}",
                group.label(),
                file.id(),
                s,
                constraints.pairs().len()
            );
            follow_redirects(pool, file)
        }
        None => Err(ResourceError::NoEligibleResource(group.label().to_string())),
    }
}

/// Follow `redirect_to` references until a file without one is reached.
///
/// A revisited id is a fatal `RedirectCycle`; a dangling reference is
/// `FileNotFound`. Neither falls back to another entity.
fn follow_redirects(
    pool: &HashMap<Uuid, ResourceItem>,
    start: &ResourceFile,
) -> Result<ResourceFile, ResourceError> {
    let mut visited = HashSet::new();
    visited.insert(start.id());

    let mut current = start;
    while let Some(next_id) = current.redirect_to {
        if !visited.insert(next_id) {
            return Err(ResourceError::RedirectCycle(next_id));
        }
        current = pool
            .get(&next_id)
            .and_then(ResourceItem::as_file)
            .ok_or(ResourceError::FileNotFound(next_id))?;
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::tag::Tag;

    fn file_with_tags(label: &str, import_time: i64, tags: Vec<Tag>) -> ResourceFile {
        let mut file = ResourceFile::new(label, "video/mp4");
        file.common.set_import_time(import_time);
        file.set_tags(tags).unwrap();
        file
    }

    fn pool_with(items: Vec<ResourceItem>) -> HashMap<Uuid, ResourceItem> {
        items.into_iter().map(|i| (i.id(), i)).collect()
    }

    fn group_of(label: &str, files: &[&ResourceFile]) -> ResourceGroup {
        ResourceGroup::new(label).with_files(files.iter().map(|f| f.id()).collect())
    }

    #[test]
    fn test_constraint_match_wins() {
        let en = file_with_tags("intro", 1, vec![Tag::new("lang", "en")]);
        let fr = file_with_tags("intro", 2, vec![Tag::new("lang", "fr")]);
        let group = group_of("intro", &[&en, &fr]);
        let fr_id = fr.id();

        let pool = pool_with(vec![
            ResourceItem::File(en),
            ResourceItem::File(fr),
            ResourceItem::Group(group),
        ]);

        let constraints = ConstraintSet::new().locale("fr");
        let resolved = resolve_label(&pool, "intro", &constraints).unwrap();
        assert_eq!(resolved.id(), fr_id);
    }

    #[test]
    fn test_highest_score_wins() {
        let weak = file_with_tags("intro", 1, vec![Tag::new("lang", "en")]);
        let strong = file_with_tags(
            "intro",
            2,
            vec![Tag::new("lang", "en"), Tag::sticky("device", "mobile")],
        );
        let group = group_of("intro", &[&weak, &strong]);
        let strong_id = strong.id();

        let pool = pool_with(vec![
            ResourceItem::File(weak),
            ResourceItem::File(strong),
            ResourceItem::Group(group),
        ]);

        // Sticky tags still count for matching
        let constraints = ConstraintSet::new().locale("en").device("mobile");
        let resolved = resolve_label(&pool, "intro", &constraints).unwrap();
        assert_eq!(resolved.id(), strong_id);
    }

    #[test]
    fn test_tie_breaks_by_declaration_order() {
        let a = file_with_tags("intro", 2, vec![Tag::new("lang", "en")]);
        let b = file_with_tags("intro", 1, vec![Tag::new("lang", "en")]);
        let group = group_of("intro", &[&a, &b]);
        let a_id = a.id();

        let pool = pool_with(vec![
            ResourceItem::File(a),
            ResourceItem::File(b),
            ResourceItem::Group(group),
        ]);

        let constraints = ConstraintSet::new().locale("en");
        assert_eq!(resolve_label(&pool, "intro", &constraints).unwrap().id(), a_id);
    }

    #[test]
    fn test_zero_score_still_succeeds() {
        let a = file_with_tags("intro", 1, vec![Tag::new("lang", "en")]);
        let b = file_with_tags("intro", 2, vec![Tag::new("lang", "fr")]);
        let group = group_of("intro", &[&a, &b]);
        let a_id = a.id();

        let pool = pool_with(vec![
            ResourceItem::File(a),
            ResourceItem::File(b),
            ResourceItem::Group(group),
        ]);

        let constraints = ConstraintSet::new().locale("ja");
        assert_eq!(resolve_label(&pool, "intro", &constraints).unwrap().id(), a_id);
    }

    #[test]
    fn test_group_shadows_same_labeled_file() {
        let loose = file_with_tags("intro", 1, vec![]);
        let member = file_with_tags("member", 2, vec![]);
        let group = group_of("intro", &[&member]);
        let member_id = member.id();

        let pool = pool_with(vec![
            ResourceItem::File(loose),
            ResourceItem::File(member),
            ResourceItem::Group(group),
        ]);

        let resolved = resolve_label(&pool, "intro", &ConstraintSet::new()).unwrap();
        assert_eq!(resolved.id(), member_id);
    }

    #[test]
    fn test_all_members_removed_fails() {
        let mut a = file_with_tags("intro", 1, vec![]);
        a.common.mark_removed();
        let group = group_of("intro", &[&a]);

        let pool = pool_with(vec![ResourceItem::File(a), ResourceItem::Group(group)]);

        let err = resolve_label(&pool, "intro", &ConstraintSet::new()).unwrap_err();
        assert!(matches!(err, ResourceError::NoEligibleResource(_)));
    }

    #[test]
    fn test_unknown_label_fails() {
        let pool = HashMap::new();
        let err = resolve_label(&pool, "nope", &ConstraintSet::new()).unwrap_err();
        assert!(matches!(err, ResourceError::NoEligibleResource(_)));
    }

    #[test]
    fn test_redirect_chain_resolves_transitively() {
        let c = file_with_tags("c", 3, vec![]);
        let mut b = file_with_tags("b", 2, vec![]);
        b.redirect_to = Some(c.id());
        let mut a = file_with_tags("a", 1, vec![]);
        a.redirect_to = Some(b.id());
        let c_id = c.id();

        let pool = pool_with(vec![
            ResourceItem::File(a),
            ResourceItem::File(b),
            ResourceItem::File(c),
        ]);

        let resolved = resolve_label(&pool, "a", &ConstraintSet::new()).unwrap();
        assert_eq!(resolved.id(), c_id);
    }

    #[test]
    fn test_redirect_cycle_is_fatal() {
        let mut a = file_with_tags("a", 1, vec![]);
        let mut b = file_with_tags("b", 2, vec![]);
        b.redirect_to = Some(a.id());
        a.redirect_to = Some(b.id());

        let pool = pool_with(vec![ResourceItem::File(a), ResourceItem::File(b)]);

        let err = resolve_label(&pool, "a", &ConstraintSet::new()).unwrap_err();
        assert!(matches!(err, ResourceError::RedirectCycle(_)));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let a = file_with_tags("intro", 5, vec![Tag::new("lang", "en")]);
        let b = file_with_tags("intro", 5, vec![Tag::new("lang", "en")]);
        let group = group_of("intro", &[&a, &b]);

        let pool = pool_with(vec![
            ResourceItem::File(a),
            ResourceItem::File(b),
            ResourceItem::Group(group),
        ]);

        let constraints = ConstraintSet::new().locale("en");
        let first = resolve_label(&pool, "intro", &constraints).unwrap();
        let second = resolve_label(&pool, "intro", &constraints).unwrap();
        assert_eq!(first.id(), second.id());
    }

    #[test]
    fn test_resolve_group_by_id() {
        let a = file_with_tags("x", 1, vec![Tag::new("lang", "en")]);
        let group = group_of("variants", &[&a]);
        let group_id = group.id();
        let a_id = a.id();

        let pool = pool_with(vec![ResourceItem::File(a), ResourceItem::Group(group)]);

        let resolved = resolve_group(&pool, group_id, &ConstraintSet::new()).unwrap();
        assert_eq!(resolved.id(), a_id);

        let err = resolve_group(&pool, Uuid::new_v4(), &ConstraintSet::new()).unwrap_err();
        assert!(matches!(err, ResourceError::GroupNotFound(_)));
    }
}
