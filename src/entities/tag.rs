//! Resource tags: `field:value` pairs driving smart variant selection.
//!
//! Raw tag strings have the shape `field:value` or `field:value!`. They are
//! parsed into a structured form once, at ingestion; nothing downstream
//! matches on the raw string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::resource::ResourceError;

/// Field name reserved for the group tag vocabulary (`group:video`,
/// `group:audio`, `group:texture`, ...). Group tags sort resource groups in
/// the authoring tool's resource view and are never valid on files.
pub const GROUP_TAG_FIELD: &str = "group";

/// Namespace a tag belongs to. The file and group vocabularies are disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagNamespace {
    /// Selection tags on files: `lang:en`, `device:mobile`, `role:video!`,
    /// plus arbitrary custom pairs.
    File,
    /// Category tags on groups: the `group:*` vocabulary.
    Group,
}

impl fmt::Display for TagNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagNamespace::File => write!(f, "file"),
            TagNamespace::Group => write!(f, "group"),
        }
    }
}

/// Parsed resource tag.
///
/// A sticky tag (raw form ends with `!`) is pinned to its file: managed-field
/// propagation never overwrites or removes it. Stickiness is ignored when a
/// tag is matched against a resolution constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub field: String,
    pub value: String,
    pub sticky: bool,
}

impl Tag {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            sticky: false,
        }
    }

    /// Construct a sticky (`!`-suffixed) tag.
    pub fn sticky(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
            sticky: true,
        }
    }

    /// Parse the raw `field:value` / `field:value!` form.
    pub fn parse(raw: &str) -> Result<Self, ResourceError> {
        let (body, sticky) = match raw.strip_suffix('!') {
            Some(body) => (body, true),
            None => (raw, false),
        };
        let Some((field, value)) = body.split_once(':') else {
            return Err(ResourceError::TagNamespaceViolation(format!(
                "malformed tag `{raw}`, expected `field:value`"
            )));
        };
        if field.is_empty() || value.is_empty() {
            return Err(ResourceError::TagNamespaceViolation(format!(
                "malformed tag `{raw}`, empty field or value"
            )));
        }
        Ok(Self {
            field: field.to_string(),
            value: value.to_string(),
            sticky,
        })
    }

    /// Which vocabulary this tag belongs to.
    pub fn namespace(&self) -> TagNamespace {
        if self.field == GROUP_TAG_FIELD {
            TagNamespace::Group
        } else {
            TagNamespace::File
        }
    }

    /// Constraint match: field and value equal, stickiness ignored.
    pub fn matches(&self, field: &str, value: &str) -> bool {
        self.field == field && self.value == value
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}{}",
            self.field,
            self.value,
            if self.sticky { "!" } else { "" }
        )
    }
}

impl FromStr for Tag {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Tag::parse(s)
    }
}

// Tags serialize as their raw string form, matching the on-disk shape
// authoring tools exchange.
impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Tag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Tag::parse(&raw).map_err(serde::de::Error::custom)
    }
}

/// Check every tag against the namespace the entity variant expects.
pub fn validate_tags(tags: &[Tag], ns: TagNamespace) -> Result<(), ResourceError> {
    for tag in tags {
        if tag.namespace() != ns {
            return Err(ResourceError::TagNamespaceViolation(format!(
                "tag `{tag}` does not belong to the {ns} namespace"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain() {
        let tag = Tag::parse("lang:en").unwrap();
        assert_eq!(tag.field, "lang");
        assert_eq!(tag.value, "en");
        assert!(!tag.sticky);
    }

    #[test]
    fn test_parse_sticky() {
        let tag = Tag::parse("role:video!").unwrap();
        assert_eq!(tag.field, "role");
        assert_eq!(tag.value, "video");
        assert!(tag.sticky);
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(Tag::parse("no-colon").is_err());
        assert!(Tag::parse(":empty-field").is_err());
        assert!(Tag::parse("empty-value:").is_err());
    }

    #[test]
    fn test_display_round_trip() {
        for raw in ["lang:en", "role:video!", "device:mobile"] {
            assert_eq!(Tag::parse(raw).unwrap().to_string(), raw);
        }
    }

    #[test]
    fn test_namespace_split() {
        assert_eq!(Tag::parse("group:video").unwrap().namespace(), TagNamespace::Group);
        assert_eq!(Tag::parse("lang:en").unwrap().namespace(), TagNamespace::File);
        assert_eq!(Tag::parse("custom:anything").unwrap().namespace(), TagNamespace::File);
    }

    #[test]
    fn test_matches_ignores_sticky() {
        assert!(Tag::parse("role:video!").unwrap().matches("role", "video"));
        assert!(Tag::parse("role:video").unwrap().matches("role", "video"));
        assert!(!Tag::parse("role:video").unwrap().matches("role", "audio"));
    }

    #[test]
    fn test_validate_tags() {
        let file_tags = vec![Tag::new("lang", "en"), Tag::sticky("role", "video")];
        assert!(validate_tags(&file_tags, TagNamespace::File).is_ok());
        assert!(validate_tags(&file_tags, TagNamespace::Group).is_err());

        let group_tags = vec![Tag::new("group", "video")];
        assert!(validate_tags(&group_tags, TagNamespace::Group).is_ok());
        assert!(validate_tags(&group_tags, TagNamespace::File).is_err());
    }

    #[test]
    fn test_serde_as_raw_string() {
        let tag = Tag::parse("lang:en!").unwrap();
        let json = serde_json::to_string(&tag).unwrap();
        assert_eq!(json, "\"lang:en!\"");
        let back: Tag = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tag);
    }
}
