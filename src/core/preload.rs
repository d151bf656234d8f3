//! Preload scheduling: rank an episode's files for the asset loader.
//!
//! The loader itself (fetching, bundling, cache eviction) is external; this
//! core only defines which files must be ready for an episode and in what
//! order to warm them.

use std::cmp::Reverse;
use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::entities::resource::{ResourceFile, ResourceItem};

/// Files referencing `episode_id`, most urgent first.
///
/// Order: descending preload level, then ascending import time, then id.
/// The key is total, so a fixed pool always yields the same sequence no
/// matter how the underlying map iterates. Removed files are excluded.
pub fn preload_sequence(
    pool: &HashMap<Uuid, ResourceItem>,
    episode_id: Uuid,
) -> Vec<ResourceFile> {
    let mut files: Vec<&ResourceFile> = pool
        .values()
        .filter_map(ResourceItem::as_file)
        .filter(|f| !f.common.is_removed() && f.episode_ids.contains(&episode_id))
        .collect();

    files.sort_by_key(|f| (Reverse(f.preload_level), f.common.import_time(), f.id()));

    debug!("preload sequence for episode {}: {} files", episode_id, files.len());
    files.into_iter().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::resource::PreloadLevel;

    fn episode_file(episode_id: Uuid, level: PreloadLevel, import_time: i64) -> ResourceFile {
        let mut file = ResourceFile::new("asset", "image/png");
        file.common.set_import_time(import_time);
        file.preload_level = level;
        file.episode_ids.push(episode_id);
        file
    }

    fn pool_with(files: Vec<ResourceFile>) -> HashMap<Uuid, ResourceItem> {
        files
            .into_iter()
            .map(|f| (f.id(), ResourceItem::File(f)))
            .collect()
    }

    #[test]
    fn test_orders_by_level_descending() {
        let episode = Uuid::new_v4();
        let lazy = episode_file(episode, PreloadLevel::Lazy, 10);
        let eager = episode_file(episode, PreloadLevel::Eager, 10);
        let on_start = episode_file(episode, PreloadLevel::OnEpisodeStart, 10);
        let expected = vec![eager.id(), on_start.id(), lazy.id()];

        let pool = pool_with(vec![lazy, eager, on_start]);
        let seq: Vec<Uuid> = preload_sequence(&pool, episode).iter().map(|f| f.id()).collect();
        assert_eq!(seq, expected);
    }

    #[test]
    fn test_same_level_orders_by_import_time() {
        let episode = Uuid::new_v4();
        let newer = episode_file(episode, PreloadLevel::Eager, 20);
        let older = episode_file(episode, PreloadLevel::Eager, 10);
        let expected = vec![older.id(), newer.id()];

        let pool = pool_with(vec![newer, older]);
        let seq: Vec<Uuid> = preload_sequence(&pool, episode).iter().map(|f| f.id()).collect();
        assert_eq!(seq, expected);
    }

    #[test]
    fn test_excludes_removed_and_other_episodes() {
        let episode = Uuid::new_v4();
        let mut gone = episode_file(episode, PreloadLevel::Eager, 1);
        gone.common.mark_removed();
        let other = episode_file(Uuid::new_v4(), PreloadLevel::Eager, 1);
        let kept = episode_file(episode, PreloadLevel::Lazy, 2);
        let kept_id = kept.id();

        let pool = pool_with(vec![gone, other, kept]);
        let seq = preload_sequence(&pool, episode);
        assert_eq!(seq.len(), 1);
        assert_eq!(seq[0].id(), kept_id);
    }

    #[test]
    fn test_sequence_is_stable() {
        let episode = Uuid::new_v4();
        let files: Vec<ResourceFile> = (0..8)
            .map(|i| episode_file(episode, PreloadLevel::OnEpisodeStart, 5 + (i % 3)))
            .collect();

        let pool = pool_with(files);
        let a: Vec<Uuid> = preload_sequence(&pool, episode).iter().map(|f| f.id()).collect();
        let b: Vec<Uuid> = preload_sequence(&pool, episode).iter().map(|f| f.id()).collect();
        assert_eq!(a, b);
    }
}
