use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const ALL_COLLECTIONS: &str = "all";

/// Names the logical database a turn is scoped to, or every collection.
///
/// Passed by value into each retrieval call. `All` never becomes a literal
/// `"all"` filter; it always maps to "no filter".
#[derive(Debug, Clone, Default, Hash, Eq, PartialEq)]
pub enum CollectionSelector {
    #[default]
    All,
    Collection(String),
}

impl CollectionSelector {
    /// Parse a selector as sent by the UI. Only the exact string `"all"`
    /// selects everything; any other value is kept verbatim.
    pub fn parse(value: &str) -> Self {
        if value == ALL_COLLECTIONS {
            Self::All
        } else {
            Self::Collection(value.to_string())
        }
    }

    pub fn from_option(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }

    /// The value to hand to the search service's collection filter.
    pub fn filter(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Collection(id) => Some(id.as_str()),
        }
    }

    /// Whether a match from `collection_id` may be returned under this selector.
    pub fn admits(&self, collection_id: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Collection(id) => collection_id == Some(id.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::All => ALL_COLLECTIONS,
            Self::Collection(id) => id.as_str(),
        }
    }
}

impl fmt::Display for CollectionSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for CollectionSelector {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for CollectionSelector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(Self::from_option(raw.as_deref()))
    }
}
