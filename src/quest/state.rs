//! Quest Instance State
//!
//! The persisted, per-game progress of a quest: which stages have finished,
//! the data bag, and the overall completion flag. The serialized form
//! (`StorageRecord`) is the wire contract with the storage layer; it carries
//! the definition version that wrote it so loads can be compatibility
//! checked before the data body is touched.

use semver::Version;
use serde::{Deserialize, Serialize};

use super::data::QuestData;
use super::definition::QuestDefinition;
use super::error::{QuestError, QuestLoadError};
use super::version::semver_safe;

/// Storage key for one quest instance: one per (game, quest definition).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuestKey {
    pub game: String,
    pub quest: String,
}

impl QuestKey {
    pub fn new(game: &str, quest: &str) -> Self {
        Self {
            game: game.to_string(),
            quest: quest.to_string(),
        }
    }
}

impl std::fmt::Display for QuestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.game, self.quest)
    }
}

/// Serialized form of a quest instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageRecord {
    pub quest_name: String,
    /// Semver of the definition that wrote this record
    pub version: String,
    pub completed_stages: Vec<String>,
    /// Data bag serialized against the definition's schema
    pub serialized_data: String,
    pub complete: bool,
}

/// In-memory progress of one quest instance during an execution pass.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestProgress {
    pub quest_name: String,
    pub data: QuestData,
    completed_stages: Vec<String>,
    pub complete: bool,
}

impl QuestProgress {
    /// Fresh progress for a quest nobody has started.
    pub fn new(definition: &QuestDefinition) -> Self {
        Self {
            quest_name: definition.name().to_string(),
            data: definition.schema().instantiate(),
            completed_stages: Vec::new(),
            complete: false,
        }
    }

    /// Rehydrate progress from a stored record. The version check runs
    /// before the data body is deserialized; an unsafe version aborts the
    /// load entirely.
    pub fn from_record(
        definition: &QuestDefinition,
        record: &StorageRecord,
    ) -> Result<Self, QuestLoadError> {
        if record.quest_name != definition.name() {
            return Err(QuestLoadError::MalformedData(format!(
                "record is for quest '{}', not '{}'",
                record.quest_name,
                definition.name()
            )));
        }

        let saved = Version::parse(&record.version)
            .map_err(|e| QuestLoadError::MalformedData(format!("bad version: {}", e)))?;
        if !semver_safe(&saved, definition.version()) {
            return Err(QuestLoadError::VersionMismatch {
                saved: record.version.clone(),
                current: definition.version().to_string(),
            });
        }

        let data = definition.schema().parse(&record.serialized_data)?;

        Ok(Self {
            quest_name: record.quest_name.clone(),
            data,
            completed_stages: record.completed_stages.clone(),
            complete: record.complete,
        })
    }

    /// Serialize for storage, stamping the current definition version.
    pub fn to_record(&self, definition: &QuestDefinition) -> Result<StorageRecord, QuestError> {
        Ok(StorageRecord {
            quest_name: self.quest_name.clone(),
            version: definition.version().to_string(),
            completed_stages: self.completed_stages.clone(),
            serialized_data: self.data.to_json()?,
            complete: self.complete,
        })
    }

    pub fn completed_stages(&self) -> &[String] {
        &self.completed_stages
    }

    pub fn is_stage_complete(&self, name: &str) -> bool {
        self.completed_stages.iter().any(|s| s == name)
    }

    /// Completed stages grow monotonically; marking twice is a no-op.
    pub fn mark_stage_complete(&mut self, name: &str) {
        if !self.is_stage_complete(name) {
            self.completed_stages.push(name.to_string());
        }
    }

    /// Once complete, every later execution pass is inert.
    pub fn mark_quest_complete(&mut self) {
        self.complete = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quest::content;
    use serde_json::json;

    fn debug_quest() -> QuestDefinition {
        content::debug::quest().unwrap()
    }

    #[test]
    fn test_key_format() {
        let key = QuestKey::new("1234", "debug");
        assert_eq!(key.to_string(), "1234:debug");
    }

    #[test]
    fn test_record_round_trip() {
        let definition = debug_quest();
        let mut progress = QuestProgress::new(&definition);
        progress.data.set("a", json!(9)).unwrap();
        progress.mark_stage_complete("Start");
        progress.mark_stage_complete("First");

        let record = progress.to_record(&definition).unwrap();
        assert_eq!(record.version, definition.version().to_string());

        let loaded = QuestProgress::from_record(&definition, &record).unwrap();
        assert_eq!(loaded, progress);
    }

    #[test]
    fn test_completed_stages_monotonic() {
        let definition = debug_quest();
        let mut progress = QuestProgress::new(&definition);
        progress.mark_stage_complete("Start");
        progress.mark_stage_complete("Start");
        assert_eq!(progress.completed_stages(), ["Start"]);
    }

    #[test]
    fn test_load_version_mismatch() {
        let definition = debug_quest();
        let progress = QuestProgress::new(&definition);
        let mut record = progress.to_record(&definition).unwrap();

        let mut bumped = definition.version().clone();
        bumped.major += 1;
        record.version = bumped.to_string();

        let err = QuestProgress::from_record(&definition, &record).unwrap_err();
        assert!(matches!(err, QuestLoadError::VersionMismatch { .. }));
    }

    #[test]
    fn test_load_malformed_data() {
        let definition = debug_quest();
        let progress = QuestProgress::new(&definition);
        let mut record = progress.to_record(&definition).unwrap();
        record.serialized_data = r#"{"values":{"this":"nonsense"}}"#.to_string();

        let err = QuestProgress::from_record(&definition, &record).unwrap_err();
        assert!(matches!(err, QuestLoadError::MalformedData(_)));
    }

    #[test]
    fn test_load_wrong_quest_name() {
        let definition = debug_quest();
        let progress = QuestProgress::new(&definition);
        let mut record = progress.to_record(&definition).unwrap();
        record.quest_name = "other".to_string();

        let err = QuestProgress::from_record(&definition, &record).unwrap_err();
        assert!(matches!(err, QuestLoadError::MalformedData(_)));
    }
}
