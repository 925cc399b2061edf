//! SQLite playbook repository.
//!
//! Definitions are stored as JSON blobs alongside indexed columns for the
//! fields list/filter queries need. Saving an existing playbook bumps the
//! stored version (updates never mutate a version in place).

use chrono::Utc;
use maestro_core::repository::PlaybookRepository;
use maestro_types::error::RepositoryError;
use maestro_types::playbook::Playbook;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `PlaybookRepository`.
pub struct SqlitePlaybookRepository {
    pool: DatabasePool,
}

impl SqlitePlaybookRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

fn parse_definition(row: &sqlx::sqlite::SqliteRow) -> Result<Playbook, RepositoryError> {
    let definition: String = row
        .try_get("definition")
        .map_err(|e| RepositoryError::Query(e.to_string()))?;
    serde_json::from_str(&definition)
        .map_err(|e| RepositoryError::Query(format!("invalid playbook definition JSON: {e}")))
}

impl PlaybookRepository for SqlitePlaybookRepository {
    async fn save_playbook(&self, playbook: &Playbook) -> Result<u32, RepositoryError> {
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let existing: Option<(i64,)> =
            sqlx::query_as("SELECT version FROM playbooks WHERE id = ?")
                .bind(playbook.id.to_string())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let version = match existing {
            Some((current,)) => current as u32 + 1,
            None => playbook.version.max(1),
        };

        let mut stored = playbook.clone();
        stored.version = version;
        stored.updated_at = Utc::now();
        let definition_json = serde_json::to_string(&stored)
            .map_err(|e| RepositoryError::Query(format!("serialize definition: {e}")))?;

        sqlx::query(
            r#"INSERT INTO playbooks (id, name, owner_id, version, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 owner_id = excluded.owner_id,
                 version = excluded.version,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(stored.id.to_string())
        .bind(&stored.name)
        .bind(stored.owner_id.to_string())
        .bind(version as i64)
        .bind(&definition_json)
        .bind(stored.created_at.to_rfc3339())
        .bind(stored.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        tracing::debug!(playbook_id = %stored.id, version, "saved playbook");
        Ok(version)
    }

    async fn get_playbook(&self, id: &Uuid) -> Result<Option<Playbook>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM playbooks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        row.as_ref().map(parse_definition).transpose()
    }

    async fn list_playbooks(
        &self,
        owner_id: Option<&Uuid>,
    ) -> Result<Vec<Playbook>, RepositoryError> {
        let rows = match owner_id {
            Some(owner) => {
                sqlx::query(
                    "SELECT definition FROM playbooks WHERE owner_id = ? ORDER BY name ASC",
                )
                .bind(owner.to_string())
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query("SELECT definition FROM playbooks ORDER BY name ASC")
                    .fetch_all(&self.pool.reader)
                    .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        rows.iter().map(parse_definition).collect()
    }

    async fn delete_playbook(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM playbooks WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_types::playbook::{
        ErrorPolicy, ExtractionRule, StepConfig, StepDefinition, Visibility,
    };

    async fn repo() -> (tempfile::TempDir, SqlitePlaybookRepository) {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("t.db").display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (dir, SqlitePlaybookRepository::new(pool))
    }

    fn sample(owner_id: Uuid, name: &str) -> Playbook {
        Playbook {
            id: Uuid::now_v7(),
            name: name.to_string(),
            description: Some("test".to_string()),
            version: 1,
            owner_id,
            visibility: Visibility::Private,
            initial_inputs: vec![],
            steps: vec![StepDefinition {
                id: "s1".to_string(),
                name: "Step".to_string(),
                config: StepConfig::Prompt {
                    prompt_text: Some("hi {{doc}}".to_string()),
                    prompt_id: None,
                    model: None,
                    temperature: None,
                    max_tokens: None,
                },
                output_variable: Some("out".to_string()),
                extraction: ExtractionRule::None,
                on_error: ErrorPolicy::default(),
            }],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_roundtrip() {
        let (_dir, repo) = repo().await;
        let playbook = sample(Uuid::now_v7(), "roundtrip");

        let version = repo.save_playbook(&playbook).await.unwrap();
        assert_eq!(version, 1);

        let loaded = repo.get_playbook(&playbook.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, "roundtrip");
        assert_eq!(loaded.steps.len(), 1);
        assert_eq!(loaded.steps[0].output_variable.as_deref(), Some("out"));
    }

    #[tokio::test]
    async fn test_update_bumps_version() {
        let (_dir, repo) = repo().await;
        let mut playbook = sample(Uuid::now_v7(), "versioned");

        assert_eq!(repo.save_playbook(&playbook).await.unwrap(), 1);
        playbook.description = Some("edited".to_string());
        assert_eq!(repo.save_playbook(&playbook).await.unwrap(), 2);
        assert_eq!(repo.save_playbook(&playbook).await.unwrap(), 3);

        let loaded = repo.get_playbook(&playbook.id).await.unwrap().unwrap();
        assert_eq!(loaded.version, 3);
        assert_eq!(loaded.description.as_deref(), Some("edited"));
    }

    #[tokio::test]
    async fn test_list_by_owner() {
        let (_dir, repo) = repo().await;
        let owner = Uuid::now_v7();
        repo.save_playbook(&sample(owner, "b-mine")).await.unwrap();
        repo.save_playbook(&sample(owner, "a-mine")).await.unwrap();
        repo.save_playbook(&sample(Uuid::now_v7(), "theirs"))
            .await
            .unwrap();

        let all = repo.list_playbooks(None).await.unwrap();
        assert_eq!(all.len(), 3);

        let mine = repo.list_playbooks(Some(&owner)).await.unwrap();
        assert_eq!(mine.len(), 2);
        // Ordered by name
        assert_eq!(mine[0].name, "a-mine");
        assert_eq!(mine[1].name, "b-mine");
    }

    #[tokio::test]
    async fn test_delete() {
        let (_dir, repo) = repo().await;
        let playbook = sample(Uuid::now_v7(), "doomed");
        repo.save_playbook(&playbook).await.unwrap();

        assert!(repo.delete_playbook(&playbook.id).await.unwrap());
        assert!(!repo.delete_playbook(&playbook.id).await.unwrap());
        assert!(repo.get_playbook(&playbook.id).await.unwrap().is_none());
    }
}
