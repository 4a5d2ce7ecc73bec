//! SOPS provider database operations

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{SopsCredential, SopsProvider};

#[derive(Debug, sqlx::FromRow)]
pub struct SopsProviderRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub sops_type: String,
    pub access_key: Option<String>,
    pub secret_access_key: Option<String>,
    pub private_key: Option<String>,
}

impl SopsProviderRow {
    pub fn to_credential(&self) -> Option<SopsCredential> {
        let provider = match self.sops_type.as_str() {
            "aws" => SopsProvider::Aws {
                access_key: self.access_key.clone()?,
                secret_access_key: self.secret_access_key.clone()?,
            },
            "pgp" => SopsProvider::Pgp {
                private_key: self.private_key.clone()?,
            },
            other => {
                tracing::warn!("Skipping SOPS provider {} with unknown type {}", self.id, other);
                return None;
            }
        };

        Some(SopsCredential {
            id: Uuid::parse_str(&self.id).ok()?,
            project_id: Uuid::parse_str(&self.project_id).ok()?,
            title: self.title.clone(),
            description: self.description.clone(),
            provider,
        })
    }
}

/// Get a SOPS provider by ID
pub async fn get_sops_provider(
    pool: &SqlitePool,
    provider_id: &Uuid,
) -> Result<Option<SopsCredential>, sqlx::Error> {
    let row = sqlx::query_as::<_, SopsProviderRow>("SELECT * FROM sops_providers WHERE id = ?")
        .bind(provider_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|r| r.to_credential()))
}

/// List the SOPS providers of a project
pub async fn list_sops_providers(
    pool: &SqlitePool,
    project_id: &Uuid,
) -> Result<Vec<SopsCredential>, sqlx::Error> {
    let rows = sqlx::query_as::<_, SopsProviderRow>(
        "SELECT * FROM sops_providers WHERE project_id = ? ORDER BY title",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.to_credential()).collect())
}

/// Create a SOPS provider for a project
pub async fn create_sops_provider(
    pool: &SqlitePool,
    project_id: &Uuid,
    title: &str,
    description: &str,
    provider: &SopsProvider,
) -> Result<SopsCredential, sqlx::Error> {
    let id = Uuid::new_v4();
    let (access_key, secret_access_key, private_key) = match provider {
        SopsProvider::Aws {
            access_key,
            secret_access_key,
        } => (Some(access_key), Some(secret_access_key), None),
        SopsProvider::Pgp { private_key } => (None, None, Some(private_key)),
    };

    sqlx::query(
        r#"
        INSERT INTO sops_providers (
            id, project_id, title, description, sops_type, access_key, secret_access_key, private_key
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(project_id.to_string())
    .bind(title)
    .bind(description)
    .bind(provider.sops_type())
    .bind(access_key)
    .bind(secret_access_key)
    .bind(private_key)
    .execute(pool)
    .await?;

    get_sops_provider(pool, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Delete a SOPS provider; environments using it lose the reference
pub async fn delete_sops_provider(
    pool: &SqlitePool,
    provider_id: &Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM sops_providers WHERE id = ?")
        .bind(provider_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
