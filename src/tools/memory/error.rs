use super::graph::ObjectType;

/// Errors raised by the knowledge graph store and its facade.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Entity '{0}' already exists")]
    EntityAlreadyExists(String),

    #[error("Relation '{from}' -[{relation_type}]-> '{to}' already exists")]
    DuplicateRelation {
        from: String,
        to: String,
        relation_type: String,
    },

    #[error("Relation {relation_id} references missing entity id '{entity_id}'")]
    OrphanedRelation {
        relation_id: String,
        entity_id: String,
    },

    #[error("Relation {0} not found")]
    RelationNotFound(String),

    #[error("Entity '{0}' cannot be related to itself")]
    SelfRelation(String),

    #[error("Entity '{0}' still has relations")]
    EntityHasRelations(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{category} '{name}' not found")]
    TypeNotFound { category: ObjectType, name: String },

    #[error("{category} '{name}' already exists")]
    TypeAlreadyExists { category: ObjectType, name: String },

    #[error("{category} '{name}' is used by {usages} item(s); pass force to delete or replace it")]
    TypeInUse {
        category: ObjectType,
        name: String,
        usages: usize,
    },

    #[error("Malformed record on line {line}: {message}")]
    Corrupt { line: usize, message: String },

    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    /// True for failures caused by the caller's input or the graph's current
    /// contents, as opposed to the storage medium.
    pub fn is_user_error(&self) -> bool {
        !matches!(
            self,
            Self::Io(_) | Self::Json(_) | Self::LockPoisoned(_) | Self::Corrupt { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, GraphError>;
