//! Environment and helm override database operations

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Deck, Environment, EnvironmentType};

/// Row type for environments table
#[derive(Debug, sqlx::FromRow)]
pub struct EnvironmentRow {
    pub id: String,
    pub deck_id: String,
    pub title: String,
    pub description: String,
    #[sqlx(rename = "type")]
    pub env_type: String,
    pub values_path: String,
    pub values_type: Option<String>,
    pub namespace: String,
    pub sops_provider_id: Option<String>,
    pub value_schema: Option<String>,
}

impl EnvironmentRow {
    pub fn to_environment(&self) -> Option<Environment> {
        Some(Environment {
            id: Uuid::parse_str(&self.id).ok()?,
            deck_id: Uuid::parse_str(&self.deck_id).ok()?,
            title: self.title.clone(),
            description: self.description.clone(),
            env_type: self.env_type.parse().ok()?,
            values_path: self.values_path.clone(),
            values_type: self.values_type.as_ref().and_then(|s| s.parse().ok()),
            namespace: self.namespace.clone(),
            sops_provider_id: self
                .sops_provider_id
                .as_ref()
                .and_then(|s| Uuid::parse_str(s).ok()),
            value_schema: self.value_schema.clone(),
        })
    }
}

/// Get an environment by ID
pub async fn get_environment(
    pool: &SqlitePool,
    environment_id: &Uuid,
) -> Result<Option<Environment>, sqlx::Error> {
    let row = sqlx::query_as::<_, EnvironmentRow>("SELECT * FROM environments WHERE id = ?")
        .bind(environment_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.and_then(|r| r.to_environment()))
}

/// List the environments of a deck
pub async fn list_environments(
    pool: &SqlitePool,
    deck_id: &Uuid,
) -> Result<Vec<Environment>, sqlx::Error> {
    let mut conn = pool.acquire().await?;
    list_deck_environments(&mut conn, deck_id).await
}

async fn list_deck_environments(
    conn: &mut SqliteConnection,
    deck_id: &Uuid,
) -> Result<Vec<Environment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, EnvironmentRow>(
        "SELECT * FROM environments WHERE deck_id = ? ORDER BY type",
    )
    .bind(deck_id.to_string())
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.to_environment()).collect())
}

/// Insert an environment
pub async fn insert_environment(
    conn: &mut SqliteConnection,
    environment: &Environment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO environments (
            id, deck_id, title, description, type, values_path, values_type,
            namespace, sops_provider_id, value_schema
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(environment.id.to_string())
    .bind(environment.deck_id.to_string())
    .bind(&environment.title)
    .bind(&environment.description)
    .bind(environment.env_type.as_str())
    .bind(&environment.values_path)
    .bind(environment.values_type.map(|t| t.as_str()))
    .bind(&environment.namespace)
    .bind(environment.sops_provider_id.map(|id| id.to_string()))
    .bind(&environment.value_schema)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create the environment every newly discovered deck starts with
pub async fn create_initial_environment(
    conn: &mut SqliteConnection,
    deck_id: &Uuid,
) -> Result<Environment, sqlx::Error> {
    let environment = Environment::initial(*deck_id);
    insert_environment(conn, &environment).await?;
    Ok(environment)
}

/// Create an environment of the given type for a deck
pub async fn create_environment(
    pool: &SqlitePool,
    deck_id: &Uuid,
    env_type: EnvironmentType,
    title: &str,
) -> Result<Environment, sqlx::Error> {
    let environment = Environment {
        title: title.to_string(),
        env_type,
        ..Environment::initial(*deck_id)
    };
    let mut conn = pool.acquire().await?;
    insert_environment(&mut conn, &environment).await?;
    Ok(environment)
}

/// Re-validate the values paths of a deck's environments against its current
/// file information, clearing the ones that no longer exist.
///
/// Returns all environments of the deck after the update.
pub async fn revalidate_values_paths(
    conn: &mut SqliteConnection,
    deck: &Deck,
) -> Result<Vec<Environment>, sqlx::Error> {
    let mut environments = list_deck_environments(conn, &deck.id).await?;

    // Without file information there is nothing to validate against
    let Some(file_information) = deck.file_information.as_ref() else {
        return Ok(environments);
    };

    for environment in environments.iter_mut() {
        if environment.values_path.is_empty() || file_information.contains(&environment.values_path) {
            continue;
        }

        tracing::info!(
            "Clearing values path {} of environment {}, it is gone from deck {}",
            environment.values_path,
            environment.id,
            deck.id
        );

        sqlx::query("UPDATE environments SET values_path = '', values_type = NULL WHERE id = ?")
            .bind(environment.id.to_string())
            .execute(&mut *conn)
            .await?;

        environment.values_path.clear();
        environment.values_type = None;
    }

    Ok(environments)
}

/// Store every mutable field of an environment
pub async fn save_environment(
    pool: &SqlitePool,
    environment: &Environment,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE environments
        SET title = ?, description = ?, values_path = ?, values_type = ?,
            namespace = ?, sops_provider_id = ?, value_schema = ?
        WHERE id = ?
        "#,
    )
    .bind(&environment.title)
    .bind(&environment.description)
    .bind(&environment.values_path)
    .bind(environment.values_type.map(|t| t.as_str()))
    .bind(&environment.namespace)
    .bind(environment.sops_provider_id.map(|id| id.to_string()))
    .bind(&environment.value_schema)
    .bind(environment.id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Store the inferred value schema of an environment
pub async fn set_value_schema(
    pool: &SqlitePool,
    environment_id: &Uuid,
    value_schema: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE environments SET value_schema = ? WHERE id = ?")
        .bind(value_schema)
        .bind(environment_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Delete an environment
pub async fn delete_environment(
    pool: &SqlitePool,
    environment_id: &Uuid,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM environments WHERE id = ?")
        .bind(environment_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Get the helm value overrides of an environment
pub async fn get_helm_overrides(
    pool: &SqlitePool,
    environment_id: &Uuid,
) -> Result<Option<String>, sqlx::Error> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT overrides FROM helm_overrides WHERE environment_id = ?")
            .bind(environment_id.to_string())
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(overrides,)| overrides))
}

/// Set or remove the helm value overrides of an environment
pub async fn set_helm_overrides(
    pool: &SqlitePool,
    environment_id: &Uuid,
    overrides: Option<&str>,
) -> Result<(), sqlx::Error> {
    match overrides {
        Some(overrides) => {
            sqlx::query(
                r#"
                INSERT INTO helm_overrides (environment_id, overrides) VALUES (?, ?)
                ON CONFLICT(environment_id) DO UPDATE SET overrides = excluded.overrides
                "#,
            )
            .bind(environment_id.to_string())
            .bind(overrides)
            .execute(pool)
            .await?;
        }
        None => {
            sqlx::query("DELETE FROM helm_overrides WHERE environment_id = ?")
                .bind(environment_id.to_string())
                .execute(pool)
                .await?;
        }
    }

    Ok(())
}
