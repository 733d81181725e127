//! Identifier types
//!
//! - EntityId: stable entity identifier, never reused after deletion
//! - TraitId: trait identifier, unique within its entity
//! - OperationId: 64-bit monotonic mutation identifier
//! - Reference: pointer to an entity (and optionally one of its traits)
//! - TraitRef: internal address of one trait of one entity

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Operation identifier
///
/// Strictly increasing and never reused. Doubles as ordering key, CAS token
/// and compaction manifest key. `0` is never issued and means "no operation".
pub type OperationId = u64;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier from any string
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// View as string slice
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// True for the empty identifier
            pub fn is_empty(&self) -> bool {
                self.0.is_empty()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Stable entity identifier
    EntityId
);

string_id!(
    /// Trait identifier, unique within an entity
    TraitId
);

/// Pointer from a trait field to another entity or trait
///
/// An empty `trait_id` points at the entity as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Reference {
    /// Target entity
    pub entity_id: EntityId,
    /// Target trait, empty for the whole entity
    #[serde(default)]
    pub trait_id: TraitId,
}

impl Reference {
    /// Reference to a whole entity
    pub fn entity(entity_id: impl Into<EntityId>) -> Self {
        Reference {
            entity_id: entity_id.into(),
            trait_id: TraitId::default(),
        }
    }

    /// Reference to a specific trait
    pub fn to_trait(entity_id: impl Into<EntityId>, trait_id: impl Into<TraitId>) -> Self {
        Reference {
            entity_id: entity_id.into(),
            trait_id: trait_id.into(),
        }
    }

    /// Whether a concrete reference value satisfies this reference used as a pattern
    ///
    /// An empty pattern trait id accepts any trait of the entity.
    pub fn matches(&self, value: &Reference) -> bool {
        self.entity_id == value.entity_id
            && (self.trait_id.is_empty() || self.trait_id == value.trait_id)
    }
}

/// Address of one trait of one entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TraitRef {
    /// Owning entity
    pub entity_id: EntityId,
    /// Trait within the entity
    pub trait_id: TraitId,
}

impl TraitRef {
    /// Create a trait address
    pub fn new(entity_id: impl Into<EntityId>, trait_id: impl Into<TraitId>) -> Self {
        TraitRef {
            entity_id: entity_id.into(),
            trait_id: trait_id.into(),
        }
    }
}

impl fmt::Display for TraitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_id, self.trait_id)
    }
}
