//! Bidirectional name <-> id index.

use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("name '{0}' is not mapped")]
    NotFound(String),
    #[error("name '{0}' is already mapped to another id")]
    AlreadyMapped(String),
}

/// Two maps kept as exact inverses of each other.
#[derive(Debug, Default, Clone)]
pub struct NameMapping {
    by_name: HashMap<String, String>,
    by_id: HashMap<String, String>,
}

impl NameMapping {
    /// Map `name` to `id`, dropping any older mapping of either side.
    pub fn add(&mut self, name: impl Into<String>, id: impl Into<String>) {
        let name = name.into();
        let id = id.into();
        if let Some(old_id) = self.by_name.remove(&name) {
            self.by_id.remove(&old_id);
        }
        if let Some(old_name) = self.by_id.remove(&id) {
            self.by_name.remove(&old_name);
        }
        self.by_name.insert(name.clone(), id.clone());
        self.by_id.insert(id, name);
    }

    pub fn get_id(&self, name: &str) -> Option<&str> {
        self.by_name.get(name).map(String::as_str)
    }

    pub fn get_name(&self, id: &str) -> Option<&str> {
        self.by_id.get(id).map(String::as_str)
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.by_id.contains_key(id)
    }

    /// Point `new_name` at the id currently held by `old_name`.
    pub fn rename(&mut self, old_name: &str, new_name: &str) -> Result<(), MappingError> {
        let id = self
            .by_name
            .get(old_name)
            .cloned()
            .ok_or_else(|| MappingError::NotFound(old_name.to_string()))?;
        match self.by_name.get(new_name) {
            Some(existing) if *existing != id => {
                return Err(MappingError::AlreadyMapped(new_name.to_string()));
            }
            _ => {}
        }
        self.by_name.remove(old_name);
        self.by_name.insert(new_name.to_string(), id.clone());
        self.by_id.insert(id, new_name.to_string());
        Ok(())
    }

    /// Drop both directions for `name`; returns the id it held.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let id = self.by_name.remove(name)?;
        self.by_id.remove(&id);
        Some(id)
    }
}
