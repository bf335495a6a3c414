use chrono::Utc;
use sqlx::SqlitePool;

use super::StoreError;

/// A local user profile. Every entity write resolves its owner here first.
#[derive(Debug, Clone)]
pub struct Profile {
    pub owner_id: String,
    pub display_name: String,
}

pub struct ProfileRepository {
    pool: SqlitePool,
}

impl ProfileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the profile if it does not exist yet. Idempotent.
    pub async fn ensure(&self, owner_id: &str, display_name: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO profiles (owner_id, display_name, created_at) VALUES (?, ?, ?)
             ON CONFLICT(owner_id) DO NOTHING",
        )
        .bind(owner_id)
        .bind(display_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, owner_id: &str) -> Result<Option<Profile>, StoreError> {
        let row: Option<(String, String)> =
            sqlx::query_as("SELECT owner_id, display_name FROM profiles WHERE owner_id = ?")
                .bind(owner_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(owner_id, display_name)| Profile {
            owner_id,
            display_name,
        }))
    }

    pub async fn exists(&self, owner_id: &str) -> Result<bool, StoreError> {
        Ok(self.get(owner_id).await?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    async fn setup() -> (ProfileRepository, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let pool = init_db(Some(temp_dir.path().join("test.db"))).await.unwrap();
        (ProfileRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let (repo, _temp) = setup().await;

        repo.ensure("user1", "User One").await.unwrap();
        repo.ensure("user1", "Renamed").await.unwrap();

        let profile = repo.get("user1").await.unwrap().unwrap();
        // Second ensure does not overwrite
        assert_eq!(profile.display_name, "User One");
    }

    #[tokio::test]
    async fn test_exists() {
        let (repo, _temp) = setup().await;

        assert!(!repo.exists("user1").await.unwrap());
        repo.ensure("user1", "User One").await.unwrap();
        assert!(repo.exists("user1").await.unwrap());
    }
}
