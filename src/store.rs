//! Persistence Ports
//!
//! The engine never talks to a database directly; it goes through these
//! traits. The SQLite implementation lives in `db`, and tests substitute an
//! in-memory store.

use async_trait::async_trait;
use thiserror::Error;

use crate::game::Game;
use crate::quest::{QuestKey, StorageRecord};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt stored record for {key}: {message}")]
    Corrupt { key: String, message: String },
}

/// Load/save/delete of quest instance records, plus the incomplete-instance
/// scan the scheduled tick uses for discovery.
#[async_trait]
pub trait QuestStore: Send + Sync {
    async fn load(&self, key: &QuestKey) -> Result<Option<StorageRecord>, StorageError>;
    async fn save(&self, key: &QuestKey, record: &StorageRecord) -> Result<(), StorageError>;
    async fn delete(&self, key: &QuestKey) -> Result<(), StorageError>;
    async fn incomplete_keys(&self) -> Result<Vec<QuestKey>, StorageError>;
}

/// Game lookup and creation.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn upsert_game(&self, game: &Game) -> Result<(), StorageError>;
    async fn get_game(&self, key: &str) -> Result<Option<Game>, StorageError>;
}
