//! Game Entity
//!
//! One game per GitHub user, created when their fork webhook arrives. The
//! game carries everything a quest stage needs to act on the player's fork:
//! the fork's repository reference and the player's GitHub identity.

use serde::{Deserialize, Serialize};

use crate::protocol::GitHubForkHook;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    /// Stable key: the forking user's GitHub id, stringified
    pub key: String,
    pub user_login: String,
    /// Numeric GitHub id, used to attribute reply comments
    pub user_id: i64,
    /// API reference of the player's fork
    pub fork_url: String,
}

impl Game {
    /// Build a game from a verified fork webhook payload.
    pub fn from_fork(hook: &GitHubForkHook) -> Self {
        Self {
            key: hook.forkee.owner.id.to_string(),
            user_login: hook.forkee.owner.login.clone(),
            user_id: hook.forkee.owner.id,
            fork_url: hook.forkee.url.clone(),
        }
    }
}
