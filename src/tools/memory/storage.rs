//! Line-delimited JSON storage backend for the knowledge graph.
//!
//! Every operation reloads the whole file, works on the in-memory
//! [`GraphState`], and (if it mutates) rewrites the file through a temp file
//! and a rename. A mutex serializes those cycles within the process.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use super::error::{GraphError, Result};
use super::graph::{
    DeleteSummary, Entity, GraphStats, IntegrityReport, KnowledgeGraph, NodeRelations, ObjectType,
    ObservationDeletion, ObservationInput, ObservationResult, Relation, TypeCatalog,
    TypeDefinition, TypeDeletion, TypeSortBy,
};
use super::state::GraphState;

pub struct GraphStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl GraphStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if path.is_dir() {
            return Err(GraphError::Validation(format!(
                "memory file path {} is a directory",
                path.display()
            )));
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> Result<MutexGuard<'_, ()>> {
        self.lock
            .lock()
            .map_err(|e| GraphError::LockPoisoned(e.to_string()))
    }

    fn load(&self) -> Result<GraphState> {
        match fs::read_to_string(&self.path) {
            Ok(content) => GraphState::parse(&content),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No memory file at {}; starting empty", self.path.display());
                Ok(GraphState::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    fn save(&self, state: &GraphState) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let mut tmp: OsString = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        fs::write(&tmp, state.to_jsonl()?)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn read<T>(&self, op: impl FnOnce(&GraphState) -> Result<T>) -> Result<T> {
        let _guard = self.guard()?;
        let state = self.load()?;
        op(&state)
    }

    fn mutate<T>(&self, op: impl FnOnce(&mut GraphState) -> Result<T>) -> Result<T> {
        let _guard = self.guard()?;
        let mut state = self.load()?;
        let out = op(&mut state)?;
        self.save(&state)?;
        Ok(out)
    }

    // ── Entities ────────────────────────────────────────────────────────

    pub fn create_entity(&self, entity: Entity) -> Result<Entity> {
        debug!("create_entity '{}'", entity.name);
        self.mutate(|state| state.create_entity(entity))
    }

    pub fn create_entities(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        debug!("create_entities: {} requested", entities.len());
        self.mutate(|state| Ok(state.create_entities(entities)))
    }

    pub fn rename_entity(&self, old_name: &str, new_name: &str) -> Result<Entity> {
        debug!("rename_entity '{}' -> '{}'", old_name, new_name);
        self.mutate(|state| state.rename_entity(old_name, new_name))
    }

    pub fn delete_entity(&self, name: &str, cascade: bool) -> Result<usize> {
        debug!("delete_entity '{}' (cascade: {})", name, cascade);
        self.mutate(|state| state.delete_entity(name, cascade))
    }

    pub fn delete_entities(&self, names: &[String]) -> Result<DeleteSummary> {
        debug!("delete_entities: {} requested", names.len());
        self.mutate(|state| Ok(state.delete_entities(names)))
    }

    // ── Relations ───────────────────────────────────────────────────────

    pub fn create_relation(&self, relation: Relation) -> Result<Relation> {
        debug!(
            "create_relation '{}' -[{}]-> '{}'",
            relation.from, relation.relation_type, relation.to
        );
        self.mutate(|state| state.create_relation(relation))
    }

    pub fn create_relations(&self, relations: Vec<Relation>) -> Result<Vec<Relation>> {
        debug!("create_relations: {} requested", relations.len());
        self.mutate(|state| Ok(state.create_relations(relations)))
    }

    pub fn delete_relation(&self, id: &str) -> Result<Relation> {
        debug!("delete_relation {}", id);
        self.mutate(|state| state.delete_relation(id))
    }

    pub fn delete_relations(&self, relations: &[Relation]) -> Result<usize> {
        debug!("delete_relations: {} requested", relations.len());
        self.mutate(|state| Ok(state.delete_relations(relations)))
    }

    // ── Observations ────────────────────────────────────────────────────

    pub fn add_observations(&self, inputs: Vec<ObservationInput>) -> Result<Vec<ObservationResult>> {
        self.mutate(|state| state.add_observations(inputs))
    }

    pub fn delete_observations(&self, deletions: &[ObservationDeletion]) -> Result<()> {
        self.mutate(|state| {
            state.delete_observations(deletions);
            Ok(())
        })
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn read_graph(&self) -> Result<KnowledgeGraph> {
        self.read(|state| state.read_graph())
    }

    pub fn search_graph(&self, query: &str) -> Result<KnowledgeGraph> {
        self.read(|state| Ok(state.search(query)))
    }

    pub fn open_nodes(&self, names: &[String]) -> Result<KnowledgeGraph> {
        self.read(|state| Ok(state.open_nodes(names)))
    }

    pub fn get_node_relations(&self, name: &str) -> Result<NodeRelations> {
        self.read(|state| state.get_node_relations(name))
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.read(|state| Ok(state.stats()))
    }

    // ── Types & integrity ───────────────────────────────────────────────

    pub fn create_type(
        &self,
        category: ObjectType,
        name: &str,
        description: Option<String>,
        replace: bool,
    ) -> Result<TypeDefinition> {
        debug!("create_type {} '{}' (replace: {})", category, name, replace);
        self.mutate(|state| state.create_type(category, name, description, replace))
    }

    pub fn delete_type(
        &self,
        category: ObjectType,
        name: &str,
        force: bool,
        replace_with: Option<&str>,
    ) -> Result<TypeDeletion> {
        debug!("delete_type {} '{}' (force: {})", category, name, force);
        self.mutate(|state| state.delete_type(category, name, force, replace_with))
    }

    pub fn list_types(&self, sort_by: TypeSortBy, example_limit: usize) -> Result<TypeCatalog> {
        self.read(|state| Ok(state.list_types(sort_by, example_limit)))
    }

    pub fn validate_integrity(&self, auto_fix: bool) -> Result<IntegrityReport> {
        let _guard = self.guard()?;
        let mut state = self.load()?;
        let report = state.validate_integrity(auto_fix);
        if report.fixed > 0 {
            self.save(&state)?;
        }
        Ok(report)
    }
}
