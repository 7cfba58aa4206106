//! SQLite persistence for games and quest instances.
//!
//! Implements the storage ports in `store`. Schema migrations run at
//! startup; records are stored with their completed-stage list as a JSON
//! column, matching the wire-level `StorageRecord` shape.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::game::Game;
use crate::quest::{QuestKey, StorageRecord};
use crate::store::{GameStore, QuestStore, StorageError};

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Self::migrate(&pool).await?;

        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS games (
                key TEXT PRIMARY KEY,
                user_login TEXT NOT NULL,
                user_id INTEGER NOT NULL,
                fork_url TEXT NOT NULL,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS quest_instances (
                game_key TEXT NOT NULL,
                quest_name TEXT NOT NULL,
                version TEXT NOT NULL,
                completed_stages_json TEXT NOT NULL DEFAULT '[]',
                serialized_data TEXT NOT NULL DEFAULT '',
                complete INTEGER NOT NULL DEFAULT 0,
                created_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
                PRIMARY KEY(game_key, quest_name),
                FOREIGN KEY(game_key) REFERENCES games(key)
            )
            "#,
        )
        .execute(pool)
        .await?;

        tracing::info!("Database migrations complete");
        Ok(())
    }
}

#[async_trait]
impl QuestStore for Database {
    async fn load(&self, key: &QuestKey) -> Result<Option<StorageRecord>, StorageError> {
        let row = sqlx::query(
            r#"SELECT quest_name, version, completed_stages_json, serialized_data, complete
               FROM quest_instances WHERE game_key = ? AND quest_name = ?"#,
        )
        .bind(&key.game)
        .bind(&key.quest)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let stages_json: String = row.get("completed_stages_json");
        let completed_stages =
            serde_json::from_str(&stages_json).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(StorageRecord {
            quest_name: row.get("quest_name"),
            version: row.get("version"),
            completed_stages,
            serialized_data: row.get("serialized_data"),
            complete: row.get("complete"),
        }))
    }

    async fn save(&self, key: &QuestKey, record: &StorageRecord) -> Result<(), StorageError> {
        let stages_json =
            serde_json::to_string(&record.completed_stages).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })?;

        sqlx::query(
            r#"
            INSERT INTO quest_instances
                (game_key, quest_name, version, completed_stages_json, serialized_data, complete)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(game_key, quest_name) DO UPDATE SET
                version = excluded.version,
                completed_stages_json = excluded.completed_stages_json,
                serialized_data = excluded.serialized_data,
                complete = excluded.complete,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&key.game)
        .bind(&key.quest)
        .bind(&record.version)
        .bind(&stages_json)
        .bind(&record.serialized_data)
        .bind(record.complete)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &QuestKey) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM quest_instances WHERE game_key = ? AND quest_name = ?")
            .bind(&key.game)
            .bind(&key.quest)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn incomplete_keys(&self) -> Result<Vec<QuestKey>, StorageError> {
        let rows = sqlx::query(
            "SELECT game_key, quest_name FROM quest_instances WHERE complete = 0 ORDER BY game_key, quest_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| QuestKey {
                game: row.get("game_key"),
                quest: row.get("quest_name"),
            })
            .collect())
    }
}

#[async_trait]
impl GameStore for Database {
    async fn upsert_game(&self, game: &Game) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO games (key, user_login, user_id, fork_url)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                user_login = excluded.user_login,
                fork_url = excluded.fork_url
            "#,
        )
        .bind(&game.key)
        .bind(&game.user_login)
        .bind(game.user_id)
        .bind(&game.fork_url)
        .execute(&self.pool)
        .await?;

        tracing::debug!("Upserted game {} ({})", game.key, game.user_login);
        Ok(())
    }

    async fn get_game(&self, key: &str) -> Result<Option<Game>, StorageError> {
        let row = sqlx::query("SELECT key, user_login, user_id, fork_url FROM games WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| Game {
            key: r.get("key"),
            user_login: r.get("user_login"),
            user_id: r.get("user_id"),
            fork_url: r.get("fork_url"),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn test_db() -> (TempDir, Database) {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite:{}?mode=rwc", dir.path().join("test.db").display());
        let db = Database::new(&url).await.unwrap();
        (dir, db)
    }

    fn test_game() -> Game {
        Game {
            key: "4242".to_string(),
            user_login: "player".to_string(),
            user_id: 4242,
            fork_url: "player/sandbox".to_string(),
        }
    }

    fn test_record() -> StorageRecord {
        StorageRecord {
            quest_name: "debug".to_string(),
            version: "1.0.0".to_string(),
            completed_stages: vec!["Start".to_string()],
            serialized_data: r#"{"values":{"a":1},"stage_data":{},"last_run":null}"#.to_string(),
            complete: false,
        }
    }

    #[tokio::test]
    async fn test_game_round_trip() {
        let (_dir, db) = test_db().await;
        let game = test_game();

        assert!(db.get_game(&game.key).await.unwrap().is_none());
        db.upsert_game(&game).await.unwrap();
        assert_eq!(db.get_game(&game.key).await.unwrap(), Some(game.clone()));

        // upsert updates the fork in place
        let mut moved = game.clone();
        moved.fork_url = "player/sandbox-2".to_string();
        db.upsert_game(&moved).await.unwrap();
        assert_eq!(db.get_game(&game.key).await.unwrap(), Some(moved));
    }

    #[tokio::test]
    async fn test_quest_record_round_trip() {
        let (_dir, db) = test_db().await;
        db.upsert_game(&test_game()).await.unwrap();

        let key = QuestKey::new("4242", "debug");
        let record = test_record();

        assert!(db.load(&key).await.unwrap().is_none());
        db.save(&key, &record).await.unwrap();
        assert_eq!(db.load(&key).await.unwrap(), Some(record.clone()));

        // saving again overwrites
        let mut updated = record.clone();
        updated.completed_stages.push("First".to_string());
        updated.complete = true;
        db.save(&key, &updated).await.unwrap();
        assert_eq!(db.load(&key).await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn test_incomplete_scan_and_delete() {
        let (_dir, db) = test_db().await;
        db.upsert_game(&test_game()).await.unwrap();

        let open_key = QuestKey::new("4242", "debug");
        db.save(&open_key, &test_record()).await.unwrap();

        let done_key = QuestKey::new("4242", "intro");
        let mut done = test_record();
        done.quest_name = "intro".to_string();
        done.complete = true;
        db.save(&done_key, &done).await.unwrap();

        // only the incomplete instance shows up in the sweep
        assert_eq!(db.incomplete_keys().await.unwrap(), vec![open_key.clone()]);

        db.delete(&open_key).await.unwrap();
        assert!(db.load(&open_key).await.unwrap().is_none());
        assert!(db.incomplete_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_stage_list_surfaces() {
        let (_dir, db) = test_db().await;
        db.upsert_game(&test_game()).await.unwrap();

        let key = QuestKey::new("4242", "debug");
        db.save(&key, &test_record()).await.unwrap();

        sqlx::query("UPDATE quest_instances SET completed_stages_json = '{broken'")
            .execute(&db.pool)
            .await
            .unwrap();

        let err = db.load(&key).await.unwrap_err();
        assert!(matches!(err, StorageError::Corrupt { .. }));
    }
}
