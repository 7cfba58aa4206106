//! Shipped Quest Definitions
//!
//! Every quest the server knows is registered here, explicitly. Adding a
//! quest means adding its module and listing its constructor in
//! [`all_quests`]; the registry validates the lot at startup.

pub mod debug;
pub mod intro;

use super::definition::QuestDefinition;
use super::error::QuestDefinitionError;

/// Construct every shipped quest definition.
pub fn all_quests() -> Result<Vec<QuestDefinition>, QuestDefinitionError> {
    Ok(vec![intro::quest()?, debug::quest()?])
}
