//! In-memory, id-keyed knowledge graph and its line-delimited JSON codec.
//!
//! On disk every relation stores entity *ids* in `from`/`to`; callers only ever
//! see entity *names*. `GraphState` owns the translation between the two.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{GraphError, Result};
use super::graph::{
    DeleteSummary, Entity, GraphStats, KnowledgeGraph, NodeRelations, ObjectType,
    ObservationDeletion, ObservationInput, ObservationResult, Relation,
};
use super::ids::{IdGenerator, is_numeric_id};
use super::mapping::{MappingError, NameMapping};
use crate::core::serde::id_string;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredEntity {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(rename = "entityType")]
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRelation {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    #[serde(deserialize_with = "id_string")]
    pub from: String,
    #[serde(deserialize_with = "id_string")]
    pub to: String,
    #[serde(rename = "relationType")]
    pub relation_type: String,
}

impl StoredRelation {
    fn touches(&self, entity_id: &str) -> bool {
        self.from == entity_id || self.to == entity_id
    }

    fn same_triple(&self, from: &str, to: &str, relation_type: &str) -> bool {
        self.from == from && self.to == to && self.relation_type == relation_type
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredType {
    #[serde(default, deserialize_with = "id_string")]
    pub id: String,
    pub name: String,
    #[serde(rename = "objectType")]
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum Record {
    #[serde(rename = "entity")]
    Entity(StoredEntity),
    #[serde(rename = "relation")]
    Relation(StoredRelation),
    #[serde(rename = "typeDefinition")]
    TypeDefinition(StoredType),
}

#[derive(Serialize)]
#[serde(tag = "type")]
enum RecordRef<'a> {
    #[serde(rename = "entity")]
    Entity(&'a StoredEntity),
    #[serde(rename = "relation")]
    Relation(&'a StoredRelation),
    #[serde(rename = "typeDefinition")]
    TypeDefinition(&'a StoredType),
}

/// The whole graph plus the indices rebuilt from it on every load.
#[derive(Debug, Default)]
pub struct GraphState {
    pub(super) entities: Vec<StoredEntity>,
    pub(super) relations: Vec<StoredRelation>,
    pub(super) types: Vec<StoredType>,
    pub(super) entity_names: NameMapping,
    pub(super) entity_type_names: NameMapping,
    pub(super) relation_type_names: NameMapping,
    pub(super) ids: IdGenerator,
}

impl GraphState {
    /// Parse the store file contents.
    ///
    /// Entities and type definitions are indexed first; relations are buffered
    /// and resolved afterwards because legacy records name their endpoints
    /// instead of referencing ids.
    pub fn parse(content: &str) -> Result<Self> {
        let mut entities = Vec::new();
        let mut relations = Vec::new();
        let mut types = Vec::new();

        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let record: Record = serde_json::from_str(line).map_err(|e| GraphError::Corrupt {
                line: index + 1,
                message: e.to_string(),
            })?;
            match record {
                Record::Entity(entity) => entities.push(entity),
                Record::Relation(relation) => relations.push(relation),
                Record::TypeDefinition(def) => types.push(def),
            }
        }

        let mut state = Self::default();
        state.ids.initialize_from(
            entities
                .iter()
                .map(|e| e.id.as_str())
                .chain(
                    relations
                        .iter()
                        .flat_map(|r| [r.id.as_str(), r.from.as_str(), r.to.as_str()]),
                )
                .chain(types.iter().map(|t| t.id.as_str())),
        );

        let aliases = state.index_entities(entities);
        state.index_types(types);
        for relation in relations {
            state.resolve_relation(relation, &aliases);
        }

        debug!(
            entities = state.entities.len(),
            relations = state.relations.len(),
            types = state.types.len(),
            "Loaded knowledge graph"
        );
        Ok(state)
    }

    /// Returns the ids of merged duplicate records mapped to the surviving id.
    fn index_entities(&mut self, entities: Vec<StoredEntity>) -> HashMap<String, String> {
        let mut aliases = HashMap::new();
        for mut entity in entities {
            if entity.id.is_empty() {
                entity.id = self.ids.next_id();
            } else if self.entity_names.contains_id(&entity.id) {
                let fresh = self.ids.next_id();
                warn!(
                    "Entity '{}' reuses id {}; assigning id {}",
                    entity.name, entity.id, fresh
                );
                entity.id = fresh;
            }

            if let Some(existing) = self.entity_names.get_id(&entity.name).map(str::to_string) {
                warn!(
                    "Merging duplicate entity record '{}' (id {}) into id {}",
                    entity.name, entity.id, existing
                );
                if let Some(target) = self.entities.iter_mut().find(|e| e.id == existing) {
                    for obs in entity.observations {
                        if !target.observations.contains(&obs) {
                            target.observations.push(obs);
                        }
                    }
                }
                aliases.insert(entity.id, existing);
                continue;
            }

            self.entity_names.add(entity.name.clone(), entity.id.clone());
            self.entities.push(entity);
        }
        aliases
    }

    fn index_types(&mut self, types: Vec<StoredType>) {
        for mut def in types {
            if let Some(existing) = self.type_names(def.object_type).get_id(&def.name) {
                let existing = existing.to_string();
                warn!(
                    "Duplicate {} definition '{}'; keeping the later description",
                    def.object_type, def.name
                );
                if let Some(target) = self.types.iter_mut().find(|t| t.id == existing) {
                    target.description = def.description;
                }
                continue;
            }
            if def.id.is_empty() {
                def.id = self.ids.next_id();
            }
            self.type_names_mut(def.object_type)
                .add(def.name.clone(), def.id.clone());
            self.types.push(def);
        }
    }

    fn resolve_relation(&mut self, mut relation: StoredRelation, aliases: &HashMap<String, String>) {
        // Records written before ids existed carry no id of their own and name
        // their endpoints; prefer name lookup for those.
        let legacy = relation.id.is_empty();
        relation.from = self.resolve_endpoint(&relation.from, legacy, aliases);
        relation.to = self.resolve_endpoint(&relation.to, legacy, aliases);
        if legacy {
            relation.id = self.ids.next_id();
        }
        self.relations.push(relation);
    }

    fn resolve_endpoint(
        &self,
        raw: &str,
        prefer_names: bool,
        aliases: &HashMap<String, String>,
    ) -> String {
        let by_name = || self.entity_names.get_id(raw).map(str::to_string);
        let by_id = || {
            if self.entity_names.contains_id(raw) {
                Some(raw.to_string())
            } else {
                aliases.get(raw).cloned()
            }
        };
        // A numeric endpoint on an id-carrying record is an id, never a name.
        let resolved = if prefer_names {
            by_name().or_else(by_id)
        } else if is_numeric_id(raw) {
            by_id()
        } else {
            by_id().or_else(by_name)
        };
        match resolved {
            Some(id) => {
                if id != raw {
                    debug!("Resolved relation endpoint '{}' to entity id {}", raw, id);
                }
                id
            }
            None => {
                warn!(
                    "Relation endpoint '{}' matches no entity; keeping it as an orphan",
                    raw
                );
                raw.to_string()
            }
        }
    }

    /// Serialize to the on-disk format: entities, then relations, then type
    /// definitions, one JSON object per line.
    pub fn to_jsonl(&self) -> Result<String> {
        let mut lines =
            Vec::with_capacity(self.entities.len() + self.relations.len() + self.types.len());
        for entity in &self.entities {
            lines.push(serde_json::to_string(&RecordRef::Entity(entity))?);
        }
        for relation in &self.relations {
            lines.push(serde_json::to_string(&RecordRef::Relation(relation))?);
        }
        for def in &self.types {
            lines.push(serde_json::to_string(&RecordRef::TypeDefinition(def))?);
        }
        Ok(lines.join("\n"))
    }

    pub(super) fn type_names(&self, category: ObjectType) -> &NameMapping {
        match category {
            ObjectType::EntityType => &self.entity_type_names,
            ObjectType::RelationType => &self.relation_type_names,
        }
    }

    pub(super) fn type_names_mut(&mut self, category: ObjectType) -> &mut NameMapping {
        match category {
            ObjectType::EntityType => &mut self.entity_type_names,
            ObjectType::RelationType => &mut self.relation_type_names,
        }
    }

    pub fn entity_id(&self, name: &str) -> Option<&str> {
        self.entity_names.get_id(name)
    }

    fn entity_by_id_mut(&mut self, id: &str) -> Option<&mut StoredEntity> {
        self.entities.iter_mut().find(|e| e.id == id)
    }

    // ── Projection to the name-keyed view ──────────────────────────────

    fn entity_view(entity: &StoredEntity) -> Entity {
        Entity {
            name: entity.name.clone(),
            entity_type: entity.entity_type.clone(),
            observations: entity.observations.clone(),
        }
    }

    fn endpoint_name(&self, relation: &StoredRelation, entity_id: &str) -> Result<String> {
        self.entity_names
            .get_name(entity_id)
            .map(str::to_string)
            .ok_or_else(|| GraphError::OrphanedRelation {
                relation_id: relation.id.clone(),
                entity_id: entity_id.to_string(),
            })
    }

    /// Name-keyed view of a stored relation; fails on unresolvable endpoints.
    pub(super) fn relation_view(&self, relation: &StoredRelation) -> Result<Relation> {
        Ok(Relation {
            id: relation.id.clone(),
            from: self.endpoint_name(relation, &relation.from)?,
            to: self.endpoint_name(relation, &relation.to)?,
            relation_type: relation.relation_type.clone(),
        })
    }

    /// Like `relation_view`, but unresolvable endpoints keep their raw id.
    fn relation_view_lossy(&self, relation: &StoredRelation) -> Relation {
        let name = |id: &str| {
            self.entity_names
                .get_name(id)
                .unwrap_or(id)
                .to_string()
        };
        Relation {
            id: relation.id.clone(),
            from: name(&relation.from),
            to: name(&relation.to),
            relation_type: relation.relation_type.clone(),
        }
    }

    pub fn read_graph(&self) -> Result<KnowledgeGraph> {
        let relations = self
            .relations
            .iter()
            .map(|r| self.relation_view(r))
            .collect::<Result<Vec<_>>>()?;
        Ok(KnowledgeGraph {
            entities: self.entities.iter().map(Self::entity_view).collect(),
            relations,
        })
    }

    // ── Entities ────────────────────────────────────────────────────────

    fn insert_entity(&mut self, entity: Entity) -> Entity {
        let mut observations: Vec<String> = Vec::with_capacity(entity.observations.len());
        for obs in entity.observations {
            if !observations.contains(&obs) {
                observations.push(obs);
            }
        }
        let stored = StoredEntity {
            id: self.ids.next_id(),
            name: entity.name,
            entity_type: entity.entity_type,
            observations,
        };
        self.entity_names.add(stored.name.clone(), stored.id.clone());
        let view = Self::entity_view(&stored);
        self.entities.push(stored);
        view
    }

    pub fn create_entity(&mut self, entity: Entity) -> Result<Entity> {
        if self.entity_names.contains_name(&entity.name) {
            return Err(GraphError::EntityAlreadyExists(entity.name));
        }
        Ok(self.insert_entity(entity))
    }

    /// Create every entity whose name is not taken yet; the rest are skipped.
    pub fn create_entities(&mut self, entities: Vec<Entity>) -> Vec<Entity> {
        let mut created = Vec::new();
        for entity in entities {
            if self.entity_names.contains_name(&entity.name) {
                debug!("Skipping existing entity '{}'", entity.name);
                continue;
            }
            created.push(self.insert_entity(entity));
        }
        created
    }

    pub fn rename_entity(&mut self, old_name: &str, new_name: &str) -> Result<Entity> {
        self.entity_names
            .rename(old_name, new_name)
            .map_err(|err| match err {
                MappingError::NotFound(name) => GraphError::EntityNotFound(name),
                MappingError::AlreadyMapped(name) => GraphError::EntityAlreadyExists(name),
            })?;
        let id = self
            .entity_names
            .get_id(new_name)
            .map(str::to_string)
            .ok_or_else(|| GraphError::EntityNotFound(new_name.to_string()))?;
        let entity = self
            .entity_by_id_mut(&id)
            .ok_or_else(|| GraphError::EntityNotFound(old_name.to_string()))?;
        entity.name = new_name.to_string();
        let view = Self::entity_view(entity);
        Ok(view)
    }

    /// Remove an entity and every relation touching it. Returns the number of
    /// relations removed.
    pub(super) fn remove_entity_by_id(&mut self, id: &str) -> usize {
        if let Some(pos) = self.entities.iter().position(|e| e.id == id) {
            let entity = self.entities.remove(pos);
            self.entity_names.remove(&entity.name);
        }
        let before = self.relations.len();
        self.relations.retain(|r| !r.touches(id));
        before - self.relations.len()
    }

    /// Delete one entity. With `cascade` off, an entity that still has
    /// relations is left alone and `EntityHasRelations` is returned.
    pub fn delete_entity(&mut self, name: &str, cascade: bool) -> Result<usize> {
        let id = self
            .entity_id(name)
            .map(str::to_string)
            .ok_or_else(|| GraphError::EntityNotFound(name.to_string()))?;
        if !cascade && self.relations.iter().any(|r| r.touches(&id)) {
            return Err(GraphError::EntityHasRelations(name.to_string()));
        }
        Ok(self.remove_entity_by_id(&id))
    }

    pub fn delete_entities(&mut self, names: &[String]) -> DeleteSummary {
        let mut summary = DeleteSummary::default();
        for name in names {
            let Some(id) = self.entity_id(name).map(str::to_string) else {
                continue;
            };
            summary.deleted_relations += self.remove_entity_by_id(&id);
            summary.deleted_entities += 1;
        }
        summary
    }

    // ── Relations ───────────────────────────────────────────────────────

    pub fn create_relation(&mut self, relation: Relation) -> Result<Relation> {
        let from = self
            .entity_names
            .get_id(&relation.from)
            .ok_or_else(|| GraphError::EntityNotFound(relation.from.clone()))?
            .to_string();
        let to = self
            .entity_names
            .get_id(&relation.to)
            .ok_or_else(|| GraphError::EntityNotFound(relation.to.clone()))?
            .to_string();
        if self
            .relations
            .iter()
            .any(|r| r.same_triple(&from, &to, &relation.relation_type))
        {
            return Err(GraphError::DuplicateRelation {
                from: relation.from,
                to: relation.to,
                relation_type: relation.relation_type,
            });
        }
        let id = self.ids.next_id();
        self.relations.push(StoredRelation {
            id: id.clone(),
            from,
            to,
            relation_type: relation.relation_type.clone(),
        });
        Ok(Relation { id, ..relation })
    }

    /// Create every relation whose endpoints exist and which is not a
    /// duplicate; the rest are skipped.
    pub fn create_relations(&mut self, relations: Vec<Relation>) -> Vec<Relation> {
        let mut created = Vec::new();
        for relation in relations {
            match self.create_relation(relation) {
                Ok(relation) => created.push(relation),
                Err(err) => debug!("Skipping relation: {}", err),
            }
        }
        created
    }

    pub fn delete_relation(&mut self, id: &str) -> Result<Relation> {
        let pos = self
            .relations
            .iter()
            .position(|r| r.id == id)
            .ok_or_else(|| GraphError::RelationNotFound(id.to_string()))?;
        let removed = self.relations.remove(pos);
        Ok(self.relation_view_lossy(&removed))
    }

    /// Remove relations matching the given name triples. Returns how many
    /// were removed.
    pub fn delete_relations(&mut self, relations: &[Relation]) -> usize {
        let targets: Vec<(String, String, &str)> = relations
            .iter()
            .filter_map(|rel| {
                let from = self.entity_names.get_id(&rel.from)?;
                let to = self.entity_names.get_id(&rel.to)?;
                Some((from.to_string(), to.to_string(), rel.relation_type.as_str()))
            })
            .collect();
        let before = self.relations.len();
        self.relations.retain(|r| {
            !targets
                .iter()
                .any(|(from, to, relation_type)| r.same_triple(from, to, relation_type))
        });
        before - self.relations.len()
    }

    // ── Observations ────────────────────────────────────────────────────

    pub fn add_observations(
        &mut self,
        inputs: Vec<ObservationInput>,
    ) -> Result<Vec<ObservationResult>> {
        let mut results = Vec::with_capacity(inputs.len());
        for input in inputs {
            let id = self
                .entity_names
                .get_id(&input.entity_name)
                .map(str::to_string)
                .ok_or_else(|| GraphError::EntityNotFound(input.entity_name.clone()))?;
            let entity = self
                .entity_by_id_mut(&id)
                .ok_or_else(|| GraphError::EntityNotFound(input.entity_name.clone()))?;

            let mut added = Vec::new();
            for obs in input.contents {
                if !entity.observations.contains(&obs) {
                    entity.observations.push(obs.clone());
                    added.push(obs);
                }
            }
            results.push(ObservationResult {
                entity_name: input.entity_name,
                added_observations: added,
            });
        }
        Ok(results)
    }

    pub fn delete_observations(&mut self, deletions: &[ObservationDeletion]) {
        for deletion in deletions {
            let Some(id) = self.entity_names.get_id(&deletion.entity_name).map(str::to_string)
            else {
                debug!("Skipping observations of missing entity '{}'", deletion.entity_name);
                continue;
            };
            if let Some(entity) = self.entity_by_id_mut(&id) {
                entity
                    .observations
                    .retain(|obs| !deletion.observations.contains(obs));
            }
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Relations whose endpoints are both in `ids`.
    fn relations_between(&self, ids: &HashSet<&str>) -> Vec<Relation> {
        self.relations
            .iter()
            .filter(|r| ids.contains(r.from.as_str()) && ids.contains(r.to.as_str()))
            .filter_map(|r| self.relation_view(r).ok())
            .collect()
    }

    fn subgraph<'a>(&'a self, entities: impl Iterator<Item = &'a StoredEntity>) -> KnowledgeGraph {
        let selected: Vec<&StoredEntity> = entities.collect();
        let ids: HashSet<&str> = selected.iter().map(|e| e.id.as_str()).collect();
        KnowledgeGraph {
            entities: selected.into_iter().map(Self::entity_view).collect(),
            relations: self.relations_between(&ids),
        }
    }

    /// Case-insensitive substring search over names, types and observations.
    /// A blank query matches nothing.
    pub fn search(&self, query: &str) -> KnowledgeGraph {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return KnowledgeGraph::default();
        }
        self.subgraph(self.entities.iter().filter(|e| {
            e.name.to_lowercase().contains(&needle)
                || e.entity_type.to_lowercase().contains(&needle)
                || e.observations
                    .iter()
                    .any(|obs| obs.to_lowercase().contains(&needle))
        }))
    }

    pub fn open_nodes(&self, names: &[String]) -> KnowledgeGraph {
        let wanted: HashSet<&str> = names.iter().map(String::as_str).collect();
        self.subgraph(
            self.entities
                .iter()
                .filter(|e| wanted.contains(e.name.as_str())),
        )
    }

    pub fn get_node_relations(&self, name: &str) -> Result<NodeRelations> {
        let id = self
            .entity_id(name)
            .ok_or_else(|| GraphError::EntityNotFound(name.to_string()))?;

        let mut result = NodeRelations::default();
        let mut connected = BTreeSet::new();
        for relation in self.relations.iter().filter(|r| r.touches(id)) {
            let view = match self.relation_view(relation) {
                Ok(view) => view,
                Err(err) => {
                    warn!("Skipping relation of '{}': {}", name, err);
                    continue;
                }
            };
            if relation.from == id {
                connected.insert(view.to.clone());
                result.outgoing.push(view.clone());
            }
            if relation.to == id {
                connected.insert(view.from.clone());
                result.incoming.push(view);
            }
        }
        result.connected_entities = connected.into_iter().collect();
        Ok(result)
    }

    pub fn stats(&self) -> GraphStats {
        let mut entity_types: BTreeMap<&str, usize> = BTreeMap::new();
        for entity in &self.entities {
            *entity_types.entry(entity.entity_type.as_str()).or_default() += 1;
        }
        let mut relation_types: BTreeMap<&str, usize> = BTreeMap::new();
        for relation in &self.relations {
            *relation_types
                .entry(relation.relation_type.as_str())
                .or_default() += 1;
        }
        GraphStats {
            entities: self.entities.len(),
            relations: self.relations.len(),
            type_definitions: self.types.len(),
            entity_types: entity_types
                .into_iter()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
            relation_types: relation_types
                .into_iter()
                .map(|(name, count)| (name.to_string(), count))
                .collect(),
        }
    }
}
