//! Memory tools for knowledge graph management.
//!
//! Provides tools for creating, querying, and managing entities, relations and
//! type definitions in a persistent knowledge graph stored as line-delimited
//! JSON. Entities carry stable numeric ids on disk so renames never break
//! their relations.

mod catalog;
pub mod error;
pub mod graph;
mod ids;
mod integrity;
pub mod manager;
mod mapping;
mod state;
pub mod storage;

pub use error::GraphError;
pub use graph::{
    Entity, ObjectType, ObservationDeletion, ObservationInput, Relation, TypeSortBy,
};
pub use manager::KnowledgeGraphManager;
