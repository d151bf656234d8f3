//! Entities module - resource records and the project pool that owns them.
//!
//! The model is deliberately small: files, groups, tags, and one pool. The
//! engines in `core` only ever read it; every write goes through `Project`.

pub mod project;
pub mod resource;
pub mod tag;

pub use project::{Project, Repository};
pub use resource::{
    ConvertedHash, PreloadLevel, ResourceCommon, ResourceError, ResourceFile, ResourceGroup,
    ResourceItem,
};
pub use tag::{Tag, TagNamespace};
