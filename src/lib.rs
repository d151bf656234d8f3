//! RESOLVA - Resource model & resolution engine for multimedia projects
//!
//! Re-exports all modules for use by authoring and playback hosts.

// Core engines (resolution, preload scheduling, events, environment)
pub mod core;

// Data model (resource records, tags, project pool)
pub mod entities;

pub mod utils;

// Re-export commonly used types from core
pub use core::env::{EpisodeEnvironment, EpisodeRegistry, EpisodeSummary};
pub use core::events::{ResourceEvent, ResourceEventSender};
pub use core::preload::preload_sequence;
pub use core::resolver::ConstraintSet;

// Re-export entities
pub use entities::{
    ConvertedHash, PreloadLevel, Project, Repository, ResourceCommon, ResourceError, ResourceFile,
    ResourceGroup, ResourceItem, Tag, TagNamespace,
};
