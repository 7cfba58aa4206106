//! Quest Registry
//!
//! All quest definitions are registered explicitly at process start and
//! validated before the server accepts a single trigger. Name collisions
//! and structural defects are startup failures, never runtime surprises.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use super::content;
use super::definition::{Difficulty, QuestDefinition};
use super::error::{QuestDefinitionError, QuestError};

/// The quest a brand-new game starts on.
pub const FIRST_QUEST_NAME: &str = content::intro::NAME;
/// Reserved quest for internal testing; hidden from players.
pub const DEBUG_QUEST_NAME: &str = content::debug::NAME;

#[derive(Debug)]
pub struct QuestRegistry {
    quests: HashMap<String, Arc<QuestDefinition>>,
    first: Arc<QuestDefinition>,
    debug: Arc<QuestDefinition>,
}

impl QuestRegistry {
    /// Register every shipped quest.
    pub fn load() -> Result<Self, QuestDefinitionError> {
        let registry = Self::with_definitions(content::all_quests()?)?;
        info!("Registered {} quest definition(s)", registry.count());
        Ok(registry)
    }

    /// Build a registry from explicit definitions. Tests use this to mix
    /// purpose-built quests in with the shipped ones.
    pub fn with_definitions(
        definitions: Vec<QuestDefinition>,
    ) -> Result<Self, QuestDefinitionError> {
        let mut quests = HashMap::new();
        for definition in definitions {
            let name = definition.name().to_string();
            if quests.insert(name.clone(), Arc::new(definition)).is_some() {
                return Err(QuestDefinitionError::DuplicateQuest(name));
            }
        }

        let first = quests
            .get(FIRST_QUEST_NAME)
            .cloned()
            .ok_or_else(|| QuestDefinitionError::MissingRequired(FIRST_QUEST_NAME.to_string()))?;
        let debug = quests
            .get(DEBUG_QUEST_NAME)
            .cloned()
            .ok_or_else(|| QuestDefinitionError::MissingRequired(DEBUG_QUEST_NAME.to_string()))?;

        Ok(Self {
            quests,
            first,
            debug,
        })
    }

    pub fn get(&self, name: &str) -> Result<Arc<QuestDefinition>, QuestError> {
        self.quests
            .get(name)
            .cloned()
            .ok_or_else(|| QuestError::UnknownQuest(name.to_string()))
    }

    /// The entry quest, instantiated when a new fork arrives.
    pub fn first(&self) -> Arc<QuestDefinition> {
        Arc::clone(&self.first)
    }

    /// The reserved debug quest.
    pub fn debug(&self) -> Arc<QuestDefinition> {
        Arc::clone(&self.debug)
    }

    pub fn count(&self) -> usize {
        self.quests.len()
    }

    /// Definitions players may discover; Reserved quests are excluded.
    pub fn visible(&self) -> Vec<Arc<QuestDefinition>> {
        let mut visible: Vec<Arc<QuestDefinition>> = self
            .quests
            .values()
            .filter(|q| q.difficulty() != Difficulty::Reserved)
            .cloned()
            .collect();
        visible.sort_by(|a, b| a.name().cmp(b.name()));
        visible
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_registers_shipped_quests() {
        let registry = QuestRegistry::load().unwrap();
        assert_eq!(registry.count(), 2);
        assert_eq!(registry.first().name(), FIRST_QUEST_NAME);
        assert_eq!(registry.debug().name(), DEBUG_QUEST_NAME);
    }

    #[test]
    fn test_lookup_unknown_quest_fails() {
        let registry = QuestRegistry::load().unwrap();
        let err = registry.get("_does not exist_").unwrap_err();
        assert!(matches!(err, QuestError::UnknownQuest(_)));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut definitions = content::all_quests().unwrap();
        definitions.push(content::debug::quest().unwrap());

        let err = QuestRegistry::with_definitions(definitions).unwrap_err();
        assert_eq!(
            err,
            QuestDefinitionError::DuplicateQuest(DEBUG_QUEST_NAME.to_string())
        );
    }

    #[test]
    fn test_missing_entry_quest_rejected() {
        let definitions = vec![content::debug::quest().unwrap()];
        let err = QuestRegistry::with_definitions(definitions).unwrap_err();
        assert_eq!(
            err,
            QuestDefinitionError::MissingRequired(FIRST_QUEST_NAME.to_string())
        );
    }

    #[test]
    fn test_reserved_quests_hidden() {
        let registry = QuestRegistry::load().unwrap();
        let visible = registry.visible();
        assert!(visible.iter().all(|q| q.name() != DEBUG_QUEST_NAME));
        assert!(visible.iter().any(|q| q.name() == FIRST_QUEST_NAME));
    }
}
