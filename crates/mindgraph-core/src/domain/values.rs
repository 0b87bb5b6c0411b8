//! Value objects shared by the graph aggregates
//!
//! Every value object validates itself on construction, so an aggregate
//! holding one never needs to re-check it. Deserialization goes through the
//! same constructors.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

use super::analysis::keywords::extract_keywords;

/// Maximum length of a user id
pub const MAX_USER_ID_LEN: usize = 128;
/// Maximum length of a node title, in characters
pub const MAX_TITLE_CHARS: usize = 200;
/// Maximum length of node content, in characters
pub const MAX_CONTENT_CHARS: usize = 20_000;
/// Maximum number of tags on a node
pub const MAX_TAGS: usize = 10;
/// Maximum length of a single tag, in characters
pub const MAX_TAG_CHARS: usize = 50;

/// Owner of a graph
///
/// User ids become part of composite store keys, so the key separator `#`
/// is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        let trimmed = id.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("user_id", "cannot be empty"));
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(Error::validation(
                "user_id",
                format!("must be {} characters or less", MAX_USER_ID_LEN),
            ));
        }
        if trimmed.contains('#') {
            return Err(Error::validation("user_id", "cannot contain '#'"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(value: UserId) -> Self {
        value.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a fresh random id
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse an id supplied by a caller
            pub fn parse(value: &str) -> Result<Self> {
                Uuid::parse_str(value.trim())
                    .map(Self)
                    .map_err(|_| Error::validation($field, format!("'{}' is not a valid id", value)))
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Self::parse(s)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(
    /// Identity of a node
    NodeId,
    "node_id"
);
uuid_id!(
    /// Identity of a category
    CategoryId,
    "category_id"
);

/// Node title; may be empty
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Title(String);

impl Title {
    pub fn new(title: impl Into<String>) -> Result<Self> {
        let title = title.into();
        let trimmed = title.trim();
        if trimmed.chars().count() > MAX_TITLE_CHARS {
            return Err(Error::validation(
                "title",
                format!("must be {} characters or less", MAX_TITLE_CHARS),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for Title {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Title> for String {
    fn from(value: Title) -> Self {
        value.0
    }
}

/// Node body text, bounded in length
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Content(String);

impl Content {
    pub fn new(content: impl Into<String>) -> Result<Self> {
        let content = content.into();
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("content", "cannot be empty"));
        }
        if trimmed.chars().count() > MAX_CONTENT_CHARS {
            return Err(Error::validation(
                "content",
                format!("must be {} characters or less", MAX_CONTENT_CHARS),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Derive the keyword set for this content
    pub fn keywords(&self) -> Keywords {
        Keywords(extract_keywords(&self.0))
    }
}

impl TryFrom<String> for Content {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Content> for String {
    fn from(value: Content) -> Self {
        value.0
    }
}

/// User-supplied labels on a node (set semantics, lowercase)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct Tags(BTreeSet<String>);

impl Tags {
    pub fn new<I, S>(tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = BTreeSet::new();
        for tag in tags {
            let tag = tag.as_ref().trim().to_lowercase();
            if tag.is_empty() {
                continue;
            }
            if tag.chars().count() > MAX_TAG_CHARS {
                return Err(Error::validation(
                    "tags",
                    format!("tag '{}' exceeds {} characters", tag, MAX_TAG_CHARS),
                ));
            }
            set.insert(tag);
        }
        if set.len() > MAX_TAGS {
            return Err(Error::validation(
                "tags",
                format!("at most {} tags are allowed, got {}", MAX_TAGS, set.len()),
            ));
        }
        Ok(Self(set))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    /// Number of tags shared with another set
    pub fn overlap(&self, other: &Tags) -> usize {
        self.0.intersection(&other.0).count()
    }
}

impl TryFrom<Vec<String>> for Tags {
    type Error = Error;

    fn try_from(value: Vec<String>) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Tags> for Vec<String> {
    fn from(value: Tags) -> Self {
        value.0.into_iter().collect()
    }
}

/// Keywords derived from content; never set directly by callers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Keywords(BTreeSet<String>);

impl Keywords {
    pub fn from_set(set: BTreeSet<String>) -> Self {
        Self(set)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.0.contains(keyword)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn as_set(&self) -> &BTreeSet<String> {
        &self.0
    }

    /// Keywords present in both sets, in sorted order
    pub fn shared_with(&self, other: &Keywords) -> Vec<String> {
        self.0.intersection(&other.0).cloned().collect()
    }

    /// Size of the union of both sets
    pub fn union_len(&self, other: &Keywords) -> usize {
        self.0.union(&other.0).count()
    }
}

/// Optimistic concurrency version; starts at 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Version(u64);

impl Version {
    pub const INITIAL: Version = Version(1);

    pub fn new(value: u64) -> Result<Self> {
        if value == 0 {
            return Err(Error::validation("version", "must be at least 1"));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Edge strength in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Weight(f64);

impl Weight {
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(Error::validation(
                "weight",
                format!("must be between 0.0 and 1.0, got {}", value),
            ));
        }
        Ok(Self(value))
    }

    /// Build a weight from a similarity score, clamping into range
    pub fn from_score(score: f64) -> Self {
        if score.is_finite() {
            Self(score.clamp(0.0, 1.0))
        } else {
            Self(0.0)
        }
    }

    pub fn value(&self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Weight {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Weight> for f64 {
    fn from(value: Weight) -> Self {
        value.0
    }
}

/// Category display color, `#RRGGBB`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color(String);

impl Color {
    pub fn new(color: impl Into<String>) -> Result<Self> {
        let color = color.into();
        let color = color.trim();
        let valid = color.len() == 7
            && color.starts_with('#')
            && color[1..].chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(Error::validation(
                "color",
                format!("'{}' is not a #RRGGBB color", color),
            ));
        }
        Ok(Self(color.to_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for Color {
    fn default() -> Self {
        Self("#808080".to_string())
    }
}

impl TryFrom<String> for Color {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Color> for String {
    fn from(value: Color) -> Self {
        value.0
    }
}
