//! Type definitions: an advisory catalog of entity and relation type names.
//!
//! Entities and relations may use type names that were never registered; the
//! catalog only adds descriptions and lets callers retire a type wholesale.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::error::{GraphError, Result};
use super::graph::{ObjectType, TypeCatalog, TypeDefinition, TypeDeletion, TypeSortBy, TypeUsage};
use super::state::{GraphState, StoredType};

impl GraphState {
    fn type_record(&self, category: ObjectType, name: &str) -> Option<&StoredType> {
        let id = self.type_names(category).get_id(name)?;
        self.types.iter().find(|t| t.id == id)
    }

    pub fn type_usage_count(&self, category: ObjectType, name: &str) -> usize {
        match category {
            ObjectType::EntityType => self
                .entities
                .iter()
                .filter(|e| e.entity_type == name)
                .count(),
            ObjectType::RelationType => self
                .relations
                .iter()
                .filter(|r| r.relation_type == name)
                .count(),
        }
    }

    /// Register a type. With `replace`, an existing definition keeps its id
    /// and gets the new description.
    pub fn create_type(
        &mut self,
        category: ObjectType,
        name: &str,
        description: Option<String>,
        replace: bool,
    ) -> Result<TypeDefinition> {
        if let Some(id) = self.type_names(category).get_id(name).map(str::to_string) {
            if !replace {
                return Err(GraphError::TypeAlreadyExists {
                    category,
                    name: name.to_string(),
                });
            }
            if let Some(existing) = self.types.iter_mut().find(|t| t.id == id) {
                existing.description = description.clone();
            }
        } else {
            let id = self.ids.next_id();
            self.type_names_mut(category).add(name, id.clone());
            self.types.push(StoredType {
                id,
                name: name.to_string(),
                object_type: category,
                description: description.clone(),
            });
        }
        Ok(TypeDefinition {
            name: name.to_string(),
            object_type: category,
            description,
        })
    }

    fn remove_type_record(&mut self, category: ObjectType, name: &str) {
        if let Some(id) = self.type_names_mut(category).remove(name) {
            self.types.retain(|t| t.id != id);
        }
    }

    /// Delete a type.
    ///
    /// Unused types are removed outright. A type still in use needs `force`;
    /// then every usage is either rewritten to `replace_with` or deleted
    /// (entities of a purged entity type take their relations with them).
    pub fn delete_type(
        &mut self,
        category: ObjectType,
        name: &str,
        force: bool,
        replace_with: Option<&str>,
    ) -> Result<TypeDeletion> {
        let registered = self.type_names(category).contains_name(name);
        let usages = self.type_usage_count(category, name);
        if !registered && usages == 0 {
            return Err(GraphError::TypeNotFound {
                category,
                name: name.to_string(),
            });
        }

        if usages == 0 {
            self.remove_type_record(category, name);
            return Ok(TypeDeletion::Deleted);
        }
        if !force {
            return Err(GraphError::TypeInUse {
                category,
                name: name.to_string(),
                usages,
            });
        }

        let outcome = match replace_with {
            Some(replacement) if replacement == name => {
                return Err(GraphError::Validation(format!(
                    "replacement for {} '{}' must be a different type",
                    category, name
                )));
            }
            Some(replacement) => self.rewrite_type(category, name, replacement),
            None => self.purge_type(category, name),
        };
        self.remove_type_record(category, name);
        debug!("Deleted {} '{}': {:?}", category, name, outcome);
        Ok(outcome)
    }

    fn rewrite_type(&mut self, category: ObjectType, name: &str, replacement: &str) -> TypeDeletion {
        let mut replaced_count = 0;
        let mut merged_relations = 0;
        match category {
            ObjectType::EntityType => {
                for entity in self.entities.iter_mut().filter(|e| e.entity_type == name) {
                    entity.entity_type = replacement.to_string();
                    replaced_count += 1;
                }
            }
            ObjectType::RelationType => {
                for relation in self.relations.iter_mut().filter(|r| r.relation_type == name) {
                    relation.relation_type = replacement.to_string();
                    replaced_count += 1;
                }
                // A rewritten edge may now duplicate one that already used the
                // replacement type; keep the first of each triple.
                let mut seen = HashSet::new();
                let before = self.relations.len();
                self.relations.retain(|r| {
                    r.relation_type != replacement || seen.insert((r.from.clone(), r.to.clone()))
                });
                merged_relations = before - self.relations.len();
            }
        }
        TypeDeletion::Replaced {
            replaced_count,
            merged_relations,
        }
    }

    fn purge_type(&mut self, category: ObjectType, name: &str) -> TypeDeletion {
        match category {
            ObjectType::EntityType => {
                let doomed: Vec<String> = self
                    .entities
                    .iter()
                    .filter(|e| e.entity_type == name)
                    .map(|e| e.id.clone())
                    .collect();
                let mut deleted_relations = 0;
                for id in &doomed {
                    deleted_relations += self.remove_entity_by_id(id);
                }
                TypeDeletion::Purged {
                    deleted_entities: doomed.len(),
                    deleted_relations,
                }
            }
            ObjectType::RelationType => {
                let before = self.relations.len();
                self.relations.retain(|r| r.relation_type != name);
                TypeDeletion::Purged {
                    deleted_entities: 0,
                    deleted_relations: before - self.relations.len(),
                }
            }
        }
    }

    /// Usage summary of every type in use plus every registered type.
    pub fn list_types(&self, sort_by: TypeSortBy, example_limit: usize) -> TypeCatalog {
        let mut entity_usage: BTreeMap<&str, (usize, Vec<String>)> = BTreeMap::new();
        for entity in &self.entities {
            let slot = entity_usage.entry(entity.entity_type.as_str()).or_default();
            slot.0 += 1;
            if slot.1.len() < example_limit {
                slot.1.push(entity.name.clone());
            }
        }

        let mut relation_usage: BTreeMap<&str, (usize, Vec<String>)> = BTreeMap::new();
        for relation in &self.relations {
            let slot = relation_usage
                .entry(relation.relation_type.as_str())
                .or_default();
            slot.0 += 1;
            if slot.1.len() < example_limit
                && let Some(name) = self.entity_names.get_name(&relation.from)
                && !slot.1.iter().any(|n| n == name)
            {
                slot.1.push(name.to_string());
            }
        }

        TypeCatalog {
            entity_types: self.usage_list(ObjectType::EntityType, entity_usage, sort_by),
            relation_types: self.usage_list(ObjectType::RelationType, relation_usage, sort_by),
        }
    }

    fn usage_list<'a>(
        &'a self,
        category: ObjectType,
        mut usage: BTreeMap<&'a str, (usize, Vec<String>)>,
        sort_by: TypeSortBy,
    ) -> Vec<TypeUsage> {
        for def in self.types.iter().filter(|t| t.object_type == category) {
            usage.entry(def.name.as_str()).or_default();
        }

        let mut list: Vec<TypeUsage> = usage
            .into_iter()
            .map(|(name, (count, examples))| {
                let record = self.type_record(category, name);
                TypeUsage {
                    name: name.to_string(),
                    count,
                    examples,
                    registered: record.is_some(),
                    description: record.and_then(|r| r.description.clone()),
                }
            })
            .collect();
        if sort_by == TypeSortBy::Usage {
            list.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        }
        list
    }
}
