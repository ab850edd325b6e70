use std::collections::{HashMap, HashSet};

use tracing::{info, warn};

use super::graph::{IntegrityIssue, IntegrityReport};
use super::state::GraphState;

impl GraphState {
    /// Scan relations for orphaned endpoints, duplicate triples and
    /// self-relations. With `auto_fix`, every offending relation is removed;
    /// for duplicates the first occurrence survives.
    pub fn validate_integrity(&mut self, auto_fix: bool) -> IntegrityReport {
        let mut report = IntegrityReport::default();
        let mut doomed = HashSet::new();
        let mut seen: HashMap<(&str, &str, &str), &str> = HashMap::new();

        for (index, relation) in self.relations.iter().enumerate() {
            let missing = [&relation.from, &relation.to]
                .into_iter()
                .find(|id| !self.entity_names.contains_id(id));
            if let Some(missing) = missing {
                report.issues.push(IntegrityIssue::OrphanedRelation {
                    relation_id: relation.id.clone(),
                    missing_entity_id: missing.clone(),
                });
                doomed.insert(index);
                continue;
            }

            if relation.from == relation.to {
                report.issues.push(IntegrityIssue::SelfRelation {
                    relation_id: relation.id.clone(),
                    entity: self
                        .entity_names
                        .get_name(&relation.from)
                        .unwrap_or(&relation.from)
                        .to_string(),
                });
                doomed.insert(index);
                continue;
            }

            let key = (
                relation.from.as_str(),
                relation.to.as_str(),
                relation.relation_type.as_str(),
            );
            if let Some(first) = seen.get(&key) {
                report.issues.push(IntegrityIssue::DuplicateRelation {
                    relation_id: relation.id.clone(),
                    duplicate_of: first.to_string(),
                });
                doomed.insert(index);
            } else {
                seen.insert(key, relation.id.as_str());
            }
        }

        for issue in &report.issues {
            warn!("Integrity issue: {}", issue);
        }

        if auto_fix && !doomed.is_empty() {
            let mut index = 0;
            self.relations.retain(|_| {
                let keep = !doomed.contains(&index);
                index += 1;
                keep
            });
            report.fixed = doomed.len();
            info!("Removed {} broken relation(s)", report.fixed);
        }
        report
    }
}
