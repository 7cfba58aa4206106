//! Quest Definitions
//!
//! A definition is the immutable, versioned description of one quest: its
//! metadata, its data schema, and its named stages. Definitions are built
//! through a builder that validates the stage graph, so a structurally
//! broken quest can never reach the execution engine.

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};

use super::data::DataSchema;
use super::error::QuestDefinitionError;
use super::graph::StageGraph;
use super::stage::Stage;

/// Player-facing difficulty rating. `Reserved` marks internal quests that
/// are excluded from normal discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Reserved,
    Beginner,
    Intermediate,
    Advanced,
    Expert,
    Hacker,
}

/// A named, versioned collection of stages forming a dependency graph.
pub struct QuestDefinition {
    name: String,
    version: Version,
    difficulty: Difficulty,
    description: String,
    schema: DataSchema,
    stages: BTreeMap<String, Arc<dyn Stage>>,
}

impl QuestDefinition {
    pub fn builder(
        name: &str,
        version: Version,
        difficulty: Difficulty,
        description: &str,
    ) -> QuestDefinitionBuilder {
        QuestDefinitionBuilder {
            name: name.to_string(),
            version,
            difficulty,
            description: description.to_string(),
            schema: DataSchema::new(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn difficulty(&self) -> Difficulty {
        self.difficulty
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn schema(&self) -> &DataSchema {
        &self.schema
    }

    pub fn stage(&self, name: &str) -> Option<&Arc<dyn Stage>> {
        self.stages.get(name)
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// The stage -> children mapping the graph is built from.
    fn children_map(&self) -> BTreeMap<String, Vec<String>> {
        self.stages
            .iter()
            .map(|(name, stage)| (name.clone(), stage.children().to_vec()))
            .collect()
    }

    /// A fresh execution graph. Graphs are never persisted; every pass
    /// rebuilds one and replays completion state into it.
    pub fn graph(&self) -> Result<StageGraph, QuestDefinitionError> {
        StageGraph::build(&self.name, &self.children_map())
    }
}

impl std::fmt::Debug for QuestDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestDefinition")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("difficulty", &self.difficulty)
            .field("stages", &self.stages.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub struct QuestDefinitionBuilder {
    name: String,
    version: Version,
    difficulty: Difficulty,
    description: String,
    schema: DataSchema,
    stages: Vec<(String, Arc<dyn Stage>)>,
}

impl QuestDefinitionBuilder {
    pub fn schema(mut self, schema: DataSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn stage(mut self, name: &str, stage: impl Stage + 'static) -> Self {
        self.stages.push((name.to_string(), Arc::new(stage)));
        self
    }

    /// Validate and finish. Duplicate stage names, dangling child
    /// references and cycles are all rejected here.
    pub fn build(self) -> Result<QuestDefinition, QuestDefinitionError> {
        if self.stages.is_empty() {
            return Err(QuestDefinitionError::NoStages(self.name));
        }

        let mut stages: BTreeMap<String, Arc<dyn Stage>> = BTreeMap::new();
        for (name, stage) in self.stages {
            if stages.insert(name.clone(), stage).is_some() {
                return Err(QuestDefinitionError::DuplicateStage {
                    quest: self.name,
                    stage: name,
                });
            }
        }

        let definition = QuestDefinition {
            name: self.name,
            version: self.version,
            difficulty: self.difficulty,
            description: self.description,
            schema: self.schema,
            stages,
        };

        // surfaces dangling children and cycles before the quest exists
        definition.graph()?;

        Ok(definition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::stage::{DebugStage, FinalStage};
    use serde_json::json;

    fn builder(name: &str) -> QuestDefinitionBuilder {
        QuestDefinition::builder(
            name,
            Version::new(1, 0, 0),
            Difficulty::Reserved,
            "a quest for testing",
        )
    }

    #[test]
    fn test_build_valid_quest() {
        let definition = builder("linear")
            .schema(DataSchema::new().field("a", json!(1)))
            .stage("Start", DebugStage::new(&["First"]))
            .stage("First", DebugStage::new(&["Second"]))
            .stage("Second", FinalStage::new())
            .build()
            .unwrap();

        assert_eq!(definition.name(), "linear");
        assert_eq!(definition.stage_count(), 3);
        assert!(definition.stage("Start").is_some());
        assert!(definition.stage("Missing").is_none());
    }

    #[test]
    fn test_empty_quest_rejected() {
        let err = builder("empty").build().unwrap_err();
        assert_eq!(err, QuestDefinitionError::NoStages("empty".to_string()));
    }

    #[test]
    fn test_dangling_child_rejected() {
        let err = builder("dangling")
            .stage("Start", DebugStage::new(&["Loop"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, QuestDefinitionError::UnknownChild { .. }));
    }

    #[test]
    fn test_cycle_rejected() {
        let err = builder("cyclic")
            .stage("Start", DebugStage::new(&["Loop"]))
            .stage("Loop", DebugStage::new(&["Start"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, QuestDefinitionError::Cycle { .. }));
    }

    #[test]
    fn test_duplicate_stage_rejected() {
        let err = builder("doubled")
            .stage("Start", DebugStage::new(&[]))
            .stage("Start", DebugStage::new(&[]))
            .build()
            .unwrap_err();
        assert!(matches!(err, QuestDefinitionError::DuplicateStage { .. }));
    }
}
