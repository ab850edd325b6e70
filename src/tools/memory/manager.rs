//! Facade between the MCP tool handlers and the graph store.
//!
//! Validates caller input, rejects self-relations before they reach storage,
//! and hosts the operations that span several store reads.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use tracing::debug;

use super::error::{GraphError, Result};
use super::graph::{
    DeleteSummary, Entity, GraphStats, IntegrityReport, KnowledgeGraph, NodeRelations, ObjectType,
    ObservationDeletion, ObservationInput, ObservationResult, Relation, TypeCatalog,
    TypeDefinition, TypeDeletion, TypeSortBy,
};
use super::storage::GraphStore;

// Validation constants
const MAX_NAME_LENGTH: usize = 256;
const MAX_TYPE_LENGTH: usize = 128;
const MAX_OBSERVATION_LENGTH: usize = 4096;
const MAX_DESCRIPTION_LENGTH: usize = 1024;

pub const DEFAULT_TYPE_EXAMPLES: usize = 5;

fn invalid(message: String) -> GraphError {
    GraphError::Validation(message)
}

fn validate_name(name: &str, field: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(invalid(format!("{} cannot be empty", field)));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(invalid(format!("{} too long (max {} chars)", field, MAX_NAME_LENGTH)));
    }
    if name.chars().any(|c| c.is_control()) {
        return Err(invalid(format!("{} contains invalid characters", field)));
    }
    Ok(())
}

// Type names are free strings (legacy graphs use "Team Member" and the like);
// only emptiness, length and control characters are rejected.
fn validate_type(type_str: &str, field: &str) -> Result<()> {
    if type_str.trim().is_empty() {
        return Err(invalid(format!("{} cannot be empty", field)));
    }
    if type_str.len() > MAX_TYPE_LENGTH {
        return Err(invalid(format!("{} too long (max {} chars)", field, MAX_TYPE_LENGTH)));
    }
    if type_str.chars().any(|c| c.is_control()) {
        return Err(invalid(format!("{} contains invalid characters", field)));
    }
    Ok(())
}

fn validate_observation(obs: &str) -> Result<()> {
    if obs.len() > MAX_OBSERVATION_LENGTH {
        return Err(invalid(format!(
            "Observation too long (max {} chars)",
            MAX_OBSERVATION_LENGTH
        )));
    }
    if obs.contains('\0') {
        return Err(invalid("Observation contains null bytes".to_string()));
    }
    Ok(())
}

fn validate_entity(entity: &Entity) -> Result<()> {
    validate_name(&entity.name, "Entity name")?;
    validate_type(&entity.entity_type, "Entity type")?;
    entity
        .observations
        .iter()
        .try_for_each(|obs| validate_observation(obs))
}

fn validate_relation(relation: &Relation) -> Result<()> {
    validate_name(&relation.from, "From entity")?;
    validate_name(&relation.to, "To entity")?;
    validate_type(&relation.relation_type, "Relation type")
}

pub struct KnowledgeGraphManager {
    store: GraphStore,
    type_examples: usize,
}

impl KnowledgeGraphManager {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            store: GraphStore::open(path)?,
            type_examples: DEFAULT_TYPE_EXAMPLES,
        })
    }

    pub fn with_type_examples(mut self, limit: usize) -> Self {
        self.type_examples = limit;
        self
    }

    pub fn memory_file(&self) -> &Path {
        self.store.path()
    }

    // ── Entities ────────────────────────────────────────────────────────

    pub fn create_entity(&self, entity: Entity) -> Result<Entity> {
        validate_entity(&entity)?;
        self.store.create_entity(entity)
    }

    pub fn create_entities(&self, entities: Vec<Entity>) -> Result<Vec<Entity>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        entities.iter().try_for_each(validate_entity)?;
        self.store.create_entities(entities)
    }

    pub fn rename_entity(&self, old_name: &str, new_name: &str) -> Result<Entity> {
        validate_name(old_name, "Old entity name")?;
        validate_name(new_name, "New entity name")?;
        self.store.rename_entity(old_name, new_name)
    }

    pub fn delete_entity(&self, name: &str, cascade: bool) -> Result<usize> {
        validate_name(name, "Entity name")?;
        self.store.delete_entity(name, cascade)
    }

    pub fn delete_entities(&self, names: &[String]) -> Result<DeleteSummary> {
        if names.is_empty() {
            return Ok(DeleteSummary::default());
        }
        names
            .iter()
            .try_for_each(|name| validate_name(name, "Entity name"))?;
        self.store.delete_entities(names)
    }

    // ── Relations ───────────────────────────────────────────────────────

    pub fn create_relation(&self, relation: Relation) -> Result<Relation> {
        validate_relation(&relation)?;
        if relation.from == relation.to {
            return Err(GraphError::SelfRelation(relation.from));
        }
        self.store.create_relation(relation)
    }

    /// Best-effort: self-relations, unknown endpoints and duplicates are
    /// skipped; only the created relations are returned.
    pub fn create_relations(&self, relations: Vec<Relation>) -> Result<Vec<Relation>> {
        relations.iter().try_for_each(validate_relation)?;
        let relations: Vec<Relation> = relations
            .into_iter()
            .filter(|r| {
                let keep = r.from != r.to;
                if !keep {
                    debug!("Skipping self-relation on '{}'", r.from);
                }
                keep
            })
            .collect();
        if relations.is_empty() {
            return Ok(Vec::new());
        }
        self.store.create_relations(relations)
    }

    pub fn delete_relation(&self, id: &str) -> Result<Relation> {
        if id.trim().is_empty() {
            return Err(invalid("Relation id cannot be empty".to_string()));
        }
        self.store.delete_relation(id.trim())
    }

    pub fn delete_relations(&self, relations: &[Relation]) -> Result<usize> {
        if relations.is_empty() {
            return Ok(0);
        }
        relations.iter().try_for_each(validate_relation)?;
        self.store.delete_relations(relations)
    }

    // ── Observations ────────────────────────────────────────────────────

    pub fn add_observations(&self, inputs: Vec<ObservationInput>) -> Result<Vec<ObservationResult>> {
        for input in &inputs {
            validate_name(&input.entity_name, "Entity name")?;
            input
                .contents
                .iter()
                .try_for_each(|obs| validate_observation(obs))?;
        }
        self.store.add_observations(inputs)
    }

    pub fn delete_observations(&self, deletions: &[ObservationDeletion]) -> Result<()> {
        deletions
            .iter()
            .try_for_each(|d| validate_name(&d.entity_name, "Entity name"))?;
        self.store.delete_observations(deletions)
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn read_graph(&self) -> Result<KnowledgeGraph> {
        self.store.read_graph()
    }

    pub fn search_nodes(&self, query: &str) -> Result<KnowledgeGraph> {
        self.store.search_graph(query)
    }

    pub fn open_nodes(&self, names: &[String]) -> Result<KnowledgeGraph> {
        if names.is_empty() {
            return Ok(KnowledgeGraph::default());
        }
        self.store.open_nodes(names)
    }

    pub fn get_node_relations(&self, name: &str) -> Result<NodeRelations> {
        validate_name(name, "Entity name")?;
        self.store.get_node_relations(name)
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.store.stats()
    }

    /// Mermaid flowchart of the whole graph, or of `focus` and its direct
    /// neighbours.
    pub fn export_mermaid(&self, focus: Option<&str>) -> Result<String> {
        let graph = match focus {
            Some(name) => {
                let relations = self.get_node_relations(name)?;
                let mut names = relations.connected_entities.clone();
                names.push(name.to_string());
                let mut graph = self.store.open_nodes(&names)?;
                graph.relations = relations
                    .outgoing
                    .into_iter()
                    .chain(relations.incoming)
                    .collect();
                dedup_relations(&mut graph.relations);
                graph
            }
            None => self.read_graph()?,
        };
        Ok(render_mermaid(&graph))
    }

    // ── Types & integrity ───────────────────────────────────────────────

    pub fn create_type(
        &self,
        category: ObjectType,
        name: &str,
        description: Option<String>,
        replace: bool,
    ) -> Result<TypeDefinition> {
        validate_type(name, "Type name")?;
        let description = description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        if let Some(desc) = &description
            && desc.len() > MAX_DESCRIPTION_LENGTH
        {
            return Err(invalid(format!(
                "Description too long (max {} chars)",
                MAX_DESCRIPTION_LENGTH
            )));
        }
        self.store.create_type(category, name, description, replace)
    }

    pub fn delete_type(
        &self,
        category: ObjectType,
        name: &str,
        force: bool,
        replace_with: Option<&str>,
    ) -> Result<TypeDeletion> {
        validate_type(name, "Type name")?;
        if let Some(replacement) = replace_with {
            validate_type(replacement, "Replacement type")?;
        }
        self.store.delete_type(category, name, force, replace_with)
    }

    pub fn list_types(&self, sort_by: TypeSortBy, example_limit: Option<usize>) -> Result<TypeCatalog> {
        self.store
            .list_types(sort_by, example_limit.unwrap_or(self.type_examples))
    }

    pub fn validate_integrity(&self, auto_fix: bool) -> Result<IntegrityReport> {
        self.store.validate_integrity(auto_fix)
    }
}

fn dedup_relations(relations: &mut Vec<Relation>) {
    let mut seen = HashSet::new();
    relations.retain(|r| seen.insert(r.clone()));
}

fn mermaid_id(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | '|'))
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

fn mermaid_label(text: &str) -> String {
    text.replace('"', "#quot;")
}

/// Node id per entity name. Sanitized names that collide or come out empty
/// get a numeric suffix so every node stays distinct.
fn mermaid_node_ids(graph: &KnowledgeGraph) -> HashMap<&str, String> {
    let names = graph
        .entities
        .iter()
        .map(|e| e.name.as_str())
        .chain(graph.relations.iter().flat_map(|r| [r.from.as_str(), r.to.as_str()]));
    let mut ids = HashMap::new();
    let mut taken = HashSet::new();
    for name in names {
        if ids.contains_key(name) {
            continue;
        }
        let base = match mermaid_id(name) {
            id if id.is_empty() => "node".to_string(),
            id => id,
        };
        let mut candidate = base.clone();
        let mut n = 1;
        while !taken.insert(candidate.clone()) {
            n += 1;
            candidate = format!("{}_{}", base, n);
        }
        ids.insert(name, candidate);
    }
    ids
}

pub fn render_mermaid(graph: &KnowledgeGraph) -> String {
    let ids = mermaid_node_ids(graph);
    let mut lines = vec!["graph TD".to_string()];
    for entity in &graph.entities {
        lines.push(format!(
            "    {}[\"{} ({})\"]",
            ids[entity.name.as_str()],
            mermaid_label(&entity.name),
            mermaid_label(&entity.entity_type)
        ));
    }
    for relation in &graph.relations {
        lines.push(format!(
            "    {} -->|{}| {}",
            ids[relation.from.as_str()],
            mermaid_label(&relation.relation_type).replace('|', "/"),
            ids[relation.to.as_str()]
        ));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager() -> (TempDir, KnowledgeGraphManager) {
        let temp = TempDir::new().unwrap();
        let manager = KnowledgeGraphManager::open(&temp.path().join("memory.json")).unwrap();
        (temp, manager)
    }

    fn entity(name: &str, entity_type: &str) -> Entity {
        Entity {
            name: name.to_string(),
            entity_type: entity_type.to_string(),
            observations: Vec::new(),
        }
    }

    fn relation(from: &str, relation_type: &str, to: &str) -> Relation {
        Relation {
            id: String::new(),
            from: from.to_string(),
            to: to.to_string(),
            relation_type: relation_type.to_string(),
        }
    }

    #[test]
    fn rejects_empty_names() {
        let (_temp, manager) = manager();
        assert!(matches!(
            manager.create_entities(vec![entity("", "Person")]),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(
            manager.create_entity(entity("Bob", "  ")),
            Err(GraphError::Validation(_))
        ));
        assert!(matches!(
            manager.rename_entity("Bob", ""),
            Err(GraphError::Validation(_))
        ));
    }

    #[test]
    fn accepts_types_with_spaces() {
        let (_temp, manager) = manager();
        let created = manager
            .create_entities(vec![entity("Robert", "Professional Contact")])
            .unwrap();
        assert_eq!(created.len(), 1);
    }

    #[test]
    fn self_relation_rejected_before_store() {
        let (_temp, manager) = manager();
        manager.create_entities(vec![entity("A", "T")]).unwrap();
        assert!(matches!(
            manager.create_relation(relation("A", "likes", "A")),
            Err(GraphError::SelfRelation(name)) if name == "A"
        ));
        assert!(manager
            .create_relations(vec![relation("A", "likes", "A")])
            .unwrap()
            .is_empty());
        assert!(manager.read_graph().unwrap().relations.is_empty());
    }

    #[test]
    fn bulk_relations_skip_unresolvable() {
        let (_temp, manager) = manager();
        manager
            .create_entities(vec![entity("A", "T"), entity("B", "T")])
            .unwrap();
        let created = manager
            .create_relations(vec![
                relation("A", "r", "B"),
                relation("A", "r", "Ghost"),
                relation("A", "r", "B"),
            ])
            .unwrap();
        assert_eq!(created, vec![relation("A", "r", "B")]);
    }

    #[test]
    fn list_types_uses_configured_example_limit() {
        let temp = TempDir::new().unwrap();
        let manager = KnowledgeGraphManager::open(&temp.path().join("memory.json"))
            .unwrap()
            .with_type_examples(1);
        manager
            .create_entities(vec![entity("A", "T"), entity("B", "T")])
            .unwrap();
        let catalog = manager.list_types(TypeSortBy::Name, None).unwrap();
        assert_eq!(catalog.entity_types[0].examples, vec!["A"]);
        let catalog = manager.list_types(TypeSortBy::Name, Some(5)).unwrap();
        assert_eq!(catalog.entity_types[0].examples, vec!["A", "B"]);
    }

    #[test]
    fn create_type_trims_blank_description() {
        let (_temp, manager) = manager();
        let def = manager
            .create_type(ObjectType::RelationType, "works_at", Some("   ".into()), false)
            .unwrap();
        assert_eq!(def.description, None);
    }

    #[test]
    fn mermaid_for_whole_graph() {
        let (_temp, manager) = manager();
        manager
            .create_entities(vec![entity("Robert Lockner", "Customer"), entity("Acme (EU)", "Company")])
            .unwrap();
        manager
            .create_relation(relation("Robert Lockner", "works-at", "Acme (EU)"))
            .unwrap();

        let text = manager.export_mermaid(None).unwrap();
        assert_eq!(
            text,
            concat!(
                "graph TD\n",
                "    Robert_Lockner[\"Robert Lockner (Customer)\"]\n",
                "    Acme_EU[\"Acme (EU) (Company)\"]\n",
                "    Robert_Lockner -->|works-at| Acme_EU"
            )
        );
    }

    #[test]
    fn mermaid_focus_limits_to_neighbours() {
        let (_temp, manager) = manager();
        manager
            .create_entities(vec![entity("A", "T"), entity("B", "T"), entity("C", "T")])
            .unwrap();
        manager
            .create_relations(vec![relation("A", "r", "B"), relation("B", "r", "C")])
            .unwrap();

        let text = manager.export_mermaid(Some("A")).unwrap();
        assert!(text.contains("A -->|r| B"));
        assert!(!text.contains("C"));
        assert!(manager.export_mermaid(Some("Ghost")).is_err());
    }

    #[test]
    fn mermaid_node_ids_stay_distinct() {
        let graph = KnowledgeGraph {
            entities: vec![entity("A-B", "T"), entity("A B", "T"), entity("()", "T")],
            relations: vec![relation("A-B", "r", "A B"), relation("()", "r", "A-B")],
        };
        assert_eq!(
            render_mermaid(&graph),
            concat!(
                "graph TD\n",
                "    A_B[\"A-B (T)\"]\n",
                "    A_B_2[\"A B (T)\"]\n",
                "    node[\"() (T)\"]\n",
                "    A_B -->|r| A_B_2\n",
                "    node -->|r| A_B"
            )
        );
    }
}
