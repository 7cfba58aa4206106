//! Quest Error Types
//!
//! Errors are split by when they can occur: load errors at the start of an
//! execution pass, definition errors at registration, and a general error
//! for everything the engine surfaces to its callers.

use thiserror::Error;

use crate::character::CharacterError;
use crate::store::StorageError;

/// Failure to load saved quest progress. Always fatal to the current
/// operation; the engine never attempts migration or partial recovery.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestLoadError {
    /// Saved data was written by an incompatible definition version
    #[error("unsafe version mismatch! {saved} -> {current}")]
    VersionMismatch { saved: String, current: String },

    /// Saved data body does not match the quest's data schema
    #[error("malformed save data: {0}")]
    MalformedData(String),
}

/// Structural defect in a quest definition. Fatal at registration; a quest
/// that fails validation never reaches the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuestDefinitionError {
    /// A stage lists a child that is not a stage of the same quest
    #[error("quest '{quest}': stage '{stage}' lists unknown child '{child}'")]
    UnknownChild {
        quest: String,
        stage: String,
        child: String,
    },

    /// The stage graph contains a cycle
    #[error("quest '{quest}': stage cycle detected at '{stage}'")]
    Cycle { quest: String, stage: String },

    /// Two stages in one quest share a name
    #[error("quest '{quest}': duplicate stage name '{stage}'")]
    DuplicateStage { quest: String, stage: String },

    /// Two registered quests share a name
    #[error("duplicate quest name '{0}'")]
    DuplicateQuest(String),

    /// A quest with no stages cannot progress or complete
    #[error("quest '{0}' has no stages")]
    NoStages(String),

    /// A stage was configured with an unusable parameter (e.g. a pattern
    /// that does not compile)
    #[error("quest '{quest}': stage '{stage}' misconfigured: {message}")]
    BadStageConfig {
        quest: String,
        stage: String,
        message: String,
    },

    /// A quest the server depends on (entry or debug) is not registered
    #[error("required quest '{0}' is not registered")]
    MissingRequired(String),
}

/// General quest error, surfaced to trigger handlers.
#[derive(Debug, Error)]
pub enum QuestError {
    /// Lookup of a quest name that is not registered
    #[error("no quest named '{0}'")]
    UnknownQuest(String),

    /// Bad access to the quest data bag (unknown field, wrong type)
    #[error("quest data error: {0}")]
    Data(String),

    #[error(transparent)]
    Load(#[from] QuestLoadError),

    #[error(transparent)]
    Definition(#[from] QuestDefinitionError),

    /// External action failures pass through unchanged so callers decide
    /// retry policy
    #[error(transparent)]
    Character(#[from] CharacterError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
