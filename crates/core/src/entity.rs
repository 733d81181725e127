//! Entity and trait records

use crate::types::{EntityId, TraitId};
use crate::value::TraitMessage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Typed sub-record attached to an entity
///
/// `message` is `None` only in summary results, where payloads are omitted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Trait {
    /// Trait id, unique within the entity
    pub id: TraitId,
    /// Typed payload
    pub message: Option<TraitMessage>,
    /// When the trait was first written
    pub creation_date: Option<DateTime<Utc>>,
    /// When the trait was last written
    pub modification_date: Option<DateTime<Utc>>,
}

impl Trait {
    /// Create a trait with a payload and no dates
    pub fn new(id: impl Into<TraitId>, message: TraitMessage) -> Self {
        Trait {
            id: id.into(),
            message: Some(message),
            creation_date: None,
            modification_date: None,
        }
    }

    /// Builder: set the creation date
    pub fn with_creation_date(mut self, date: DateTime<Utc>) -> Self {
        self.creation_date = Some(date);
        self
    }

    /// Builder: set the modification date
    pub fn with_modification_date(mut self, date: DateTime<Utc>) -> Self {
        self.modification_date = Some(date);
        self
    }

    /// Message type name, if the payload is present
    pub fn type_name(&self) -> Option<&str> {
        self.message.as_ref().map(|m| m.type_name.as_str())
    }

    /// Copy of this trait without its payload
    pub fn summary(&self) -> Trait {
        Trait {
            id: self.id.clone(),
            message: None,
            creation_date: self.creation_date,
            modification_date: self.modification_date,
        }
    }
}

/// Addressable record composed of traits
///
/// Traits are kept sorted by trait id.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Entity {
    /// Stable entity id
    pub id: EntityId,
    /// Traits of the entity
    pub traits: Vec<Trait>,
}

impl Entity {
    /// Create an entity with no traits
    pub fn new(id: impl Into<EntityId>) -> Self {
        Entity {
            id: id.into(),
            traits: Vec::new(),
        }
    }

    /// Create an entity from traits, sorting them by id
    pub fn with_traits(id: impl Into<EntityId>, mut traits: Vec<Trait>) -> Self {
        traits.sort_by(|a, b| a.id.cmp(&b.id));
        Entity {
            id: id.into(),
            traits,
        }
    }

    /// Find a trait by id
    pub fn trait_by_id(&self, id: &str) -> Option<&Trait> {
        self.traits.iter().find(|t| t.id.as_str() == id)
    }

    /// Iterate traits whose message has the given type
    pub fn traits_of_type<'a>(&'a self, type_name: &'a str) -> impl Iterator<Item = &'a Trait> {
        self.traits
            .iter()
            .filter(move |t| t.type_name() == Some(type_name))
    }

    /// Copy of this entity with trait payloads stripped
    pub fn summary(&self) -> Entity {
        Entity {
            id: self.id.clone(),
            traits: self.traits.iter().map(Trait::summary).collect(),
        }
    }
}
