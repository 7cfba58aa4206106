//! The debug quest: a linear three-stage run with no external actions,
//! used by tests and internal tooling. Reserved, so players never see it.

use semver::Version;
use serde_json::json;

use crate::quest::data::DataSchema;
use crate::quest::definition::{Difficulty, QuestDefinition};
use crate::quest::error::QuestDefinitionError;
use crate::quest::stage::{DebugStage, FinalStage};

pub const NAME: &str = "debug";

pub fn quest() -> Result<QuestDefinition, QuestDefinitionError> {
    QuestDefinition::builder(
        NAME,
        Version::new(1, 0, 0),
        Difficulty::Reserved,
        "Exercises the quest engine end to end",
    )
    .schema(DataSchema::new().field("a", json!(1)))
    .stage("Start", DebugStage::new(&["First"]))
    .stage("First", DebugStage::new(&["Second"]))
    .stage("Second", FinalStage::new())
    .build()
}
