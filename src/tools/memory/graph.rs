use std::fmt;
use std::hash::{Hash, Hasher};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Entity in the knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct Entity {
    /// Unique name of the entity
    pub name: String,

    /// Type of entity (person, organization, concept, etc.)
    #[serde(rename = "entityType")]
    pub entity_type: String,

    /// Array of observations (facts) about the entity
    #[serde(default)]
    pub observations: Vec<String>,
}

/// Relation between two entities, addressed by entity name.
///
/// Two relations are equal when their `from`/`to`/`relationType` triples are;
/// the store never holds two relations with the same triple, so `id` is not
/// part of the comparison.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Relation {
    /// Store-assigned id, usable with `delete_relation`; ignored on input
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    /// Source entity name
    pub from: String,

    /// Target entity name
    pub to: String,

    /// Type of relation (works_at, knows, related_to, etc.)
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && self.relation_type == other.relation_type
    }
}

impl Eq for Relation {}

impl Hash for Relation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.from.hash(state);
        self.to.hash(state);
        self.relation_type.hash(state);
    }
}

/// Complete knowledge graph
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

/// Input for adding observations to an entity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservationInput {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub contents: Vec<String>,
}

/// Result of adding observations
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct ObservationResult {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    #[serde(rename = "addedObservations")]
    pub added_observations: Vec<String>,
}

/// Input for deleting observations from an entity
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ObservationDeletion {
    #[serde(rename = "entityName")]
    pub entity_name: String,
    pub observations: Vec<String>,
}

/// Category a type definition belongs to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum ObjectType {
    #[serde(rename = "entityType")]
    EntityType,
    #[serde(rename = "relationType")]
    RelationType,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EntityType => f.write_str("entity type"),
            Self::RelationType => f.write_str("relation type"),
        }
    }
}

/// Catalog entry describing an entity or relation type
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct TypeDefinition {
    pub name: String,
    #[serde(rename = "objectType")]
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// What `delete_type` ended up doing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum TypeDeletion {
    /// Type was unused and its definition was removed
    Deleted,
    /// Every usage was rewritten to the replacement type
    Replaced {
        #[serde(rename = "replacedCount")]
        replaced_count: usize,
        /// Relations that became identical to an existing one after the rewrite
        #[serde(rename = "mergedRelations")]
        merged_relations: usize,
    },
    /// Every usage was deleted outright
    Purged {
        #[serde(rename = "deletedEntities")]
        deleted_entities: usize,
        #[serde(rename = "deletedRelations")]
        deleted_relations: usize,
    },
}

/// Relations touching one entity
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeRelations {
    pub outgoing: Vec<Relation>,
    pub incoming: Vec<Relation>,
    #[serde(rename = "connectedEntities")]
    pub connected_entities: Vec<String>,
}

/// Counts returned by bulk entity deletion
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct DeleteSummary {
    #[serde(rename = "deletedEntities")]
    pub deleted_entities: usize,
    #[serde(rename = "deletedRelations")]
    pub deleted_relations: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TypeSortBy {
    #[default]
    Name,
    Usage,
}

/// Usage of one type name
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TypeUsage {
    pub name: String,
    pub count: usize,
    pub examples: Vec<String>,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TypeCatalog {
    #[serde(rename = "entityTypes")]
    pub entity_types: Vec<TypeUsage>,
    #[serde(rename = "relationTypes")]
    pub relation_types: Vec<TypeUsage>,
}

/// One problem found by the integrity scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IntegrityIssue {
    OrphanedRelation {
        #[serde(rename = "relationId")]
        relation_id: String,
        #[serde(rename = "missingEntityId")]
        missing_entity_id: String,
    },
    DuplicateRelation {
        #[serde(rename = "relationId")]
        relation_id: String,
        #[serde(rename = "duplicateOf")]
        duplicate_of: String,
    },
    SelfRelation {
        #[serde(rename = "relationId")]
        relation_id: String,
        entity: String,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanedRelation {
                relation_id,
                missing_entity_id,
            } => write!(
                f,
                "relation {} points at missing entity id '{}'",
                relation_id, missing_entity_id
            ),
            Self::DuplicateRelation {
                relation_id,
                duplicate_of,
            } => write!(f, "relation {} duplicates relation {}", relation_id, duplicate_of),
            Self::SelfRelation {
                relation_id,
                entity,
            } => write!(f, "relation {} links '{}' to itself", relation_id, entity),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct IntegrityReport {
    pub issues: Vec<IntegrityIssue>,
    /// Number of issues repaired; always 0 unless auto-fix was requested
    pub fixed: usize,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct GraphStats {
    pub entities: usize,
    pub relations: usize,
    #[serde(rename = "typeDefinitions")]
    pub type_definitions: usize,
    #[serde(rename = "entityTypes")]
    pub entity_types: Vec<(String, usize)>,
    #[serde(rename = "relationTypes")]
    pub relation_types: Vec<(String, usize)>,
}
