//! Episode environment aggregation for the playback shell.
//!
//! Joins the external episode registry against the resource pool to build
//! the environment payload handed to the shell when an episode starts. The
//! registry itself (episode authoring, save slots) lives outside this core.

use serde::Serialize;
use uuid::Uuid;

use crate::entities::project::Project;

/// Read-only registry of episodes, maintained outside this core.
pub trait EpisodeRegistry {
    fn get(&self, id: Uuid) -> Option<EpisodeSummary>;
    fn list(&self) -> Vec<EpisodeSummary>;
}

/// One episode/save slot as the shell sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EpisodeSummary {
    pub id: Uuid,
    pub order: u32,
    pub label: String,
}

impl EpisodeSummary {
    /// Legacy shell key, an alias over the canonical field.
    #[deprecated = "legacy shell key, use `order`"]
    pub fn id_in_order(&self) -> u32 {
        self.order
    }

    /// Legacy shell key, an alias over the canonical field.
    #[deprecated = "legacy shell key, use `id`"]
    pub fn id_in_database(&self) -> Uuid {
        self.id
    }
}

/// Environment payload for one episode.
///
/// `saves` lists every known episode ordered by episode order; `asset_ids`
/// is the episode's preload sequence, most urgent first. The focused episode
/// is `None` when the registry does not know the requested id.
#[derive(Debug, Clone, Serialize)]
pub struct EpisodeEnvironment {
    pub saves: Vec<EpisodeSummary>,
    pub episode: Option<EpisodeSummary>,
    pub asset_ids: Vec<Uuid>,
}

impl EpisodeEnvironment {
    pub fn episode_id(&self) -> Option<Uuid> {
        self.episode.as_ref().map(|e| e.id)
    }

    pub fn episode_order(&self) -> Option<u32> {
        self.episode.as_ref().map(|e| e.order)
    }

    /// Legacy shell key, an alias over the canonical field.
    #[deprecated = "legacy shell key, use `episode_order`"]
    pub fn episode_id_in_order(&self) -> Option<u32> {
        self.episode_order()
    }

    /// Legacy shell key, an alias over the canonical field.
    #[deprecated = "legacy shell key, use `episode_id`"]
    pub fn episode_id_in_database(&self) -> Option<Uuid> {
        self.episode_id()
    }
}

/// Assemble the environment for `episode_id` from the registry and the
/// project's preload sequence. Pure read over both.
pub fn build(
    project: &Project,
    registry: &dyn EpisodeRegistry,
    episode_id: Uuid,
) -> EpisodeEnvironment {
    let mut saves = registry.list();
    saves.sort_by_key(|e| (e.order, e.id));

    let episode = registry.get(episode_id);
    let asset_ids = project
        .preload_sequence(episode_id)
        .into_iter()
        .map(|f| f.id())
        .collect();

    EpisodeEnvironment {
        saves,
        episode,
        asset_ids,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRegistry(Vec<EpisodeSummary>);

    impl EpisodeRegistry for FixedRegistry {
        fn get(&self, id: Uuid) -> Option<EpisodeSummary> {
            self.0.iter().find(|e| e.id == id).cloned()
        }

        fn list(&self) -> Vec<EpisodeSummary> {
            self.0.clone()
        }
    }

    fn summary(order: u32, label: &str) -> EpisodeSummary {
        EpisodeSummary {
            id: Uuid::new_v4(),
            order,
            label: label.to_string(),
        }
    }

    #[test]
    fn test_saves_sorted_by_order() {
        let registry = FixedRegistry(vec![summary(2, "two"), summary(0, "zero"), summary(1, "one")]);
        let project = Project::new();

        let env = build(&project, &registry, Uuid::new_v4());
        let orders: Vec<u32> = env.saves.iter().map(|e| e.order).collect();
        assert_eq!(orders, vec![0, 1, 2]);
        assert!(env.episode.is_none());
        assert!(env.asset_ids.is_empty());
    }

    #[test]
    fn test_focused_episode_found() {
        let target = summary(1, "one");
        let target_id = target.id;
        let registry = FixedRegistry(vec![summary(0, "zero"), target]);
        let project = Project::new();

        let env = build(&project, &registry, target_id);
        assert_eq!(env.episode_id(), Some(target_id));
        assert_eq!(env.episode_order(), Some(1));
    }

    #[test]
    #[allow(deprecated)]
    fn test_legacy_aliases_mirror_canonical_fields() {
        let target = summary(3, "three");
        let target_id = target.id;
        let registry = FixedRegistry(vec![target]);
        let project = Project::new();

        let env = build(&project, &registry, target_id);
        assert_eq!(env.episode_id_in_order(), env.episode_order());
        assert_eq!(env.episode_id_in_database(), env.episode_id());
        let save = &env.saves[0];
        assert_eq!(save.id_in_order(), save.order);
        assert_eq!(save.id_in_database(), save.id);
    }
}
