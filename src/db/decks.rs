//! Deck database operations

use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::domain::{Deck, DEFAULT_DECK_NAMESPACE};
use crate::repository::DeckData;

/// Row type for decks table
#[derive(Debug, sqlx::FromRow)]
pub struct DeckRow {
    pub id: String,
    pub project_id: String,
    pub title: String,
    pub description: String,
    pub dir_path: String,
    #[sqlx(rename = "type")]
    pub deck_type: String,
    pub namespace: String,
    pub file_information: Option<String>,
    pub hash: String,
}

impl DeckRow {
    pub fn to_deck(&self) -> Deck {
        Deck {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            title: self.title.clone(),
            description: self.description.clone(),
            dir_path: self.dir_path.clone(),
            deck_type: self.deck_type.clone(),
            namespace: self.namespace.clone(),
            file_information: self
                .file_information
                .as_ref()
                .and_then(|s| serde_json::from_str(s).ok()),
            hash: self.hash.clone(),
        }
    }
}

/// Get a deck by ID
pub async fn get_deck(pool: &SqlitePool, deck_id: &Uuid) -> Result<Option<Deck>, sqlx::Error> {
    let row = sqlx::query_as::<_, DeckRow>("SELECT * FROM decks WHERE id = ?")
        .bind(deck_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_deck()))
}

/// List all decks of a project
pub async fn list_decks(pool: &SqlitePool, project_id: &Uuid) -> Result<Vec<Deck>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeckRow>(
        "SELECT * FROM decks WHERE project_id = ? ORDER BY dir_path, title",
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_deck()).collect())
}

/// List the decks of a project that have at least one environment
pub async fn list_decks_with_environments(
    pool: &SqlitePool,
    project_id: &Uuid,
) -> Result<Vec<Deck>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeckRow>(
        r#"
        SELECT d.* FROM decks d
        WHERE d.project_id = ?
          AND EXISTS (SELECT 1 FROM environments e WHERE e.deck_id = d.id)
        ORDER BY d.dir_path, d.title
        "#,
    )
    .bind(project_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|r| r.to_deck()).collect())
}

/// Get the decks of a project with the given IDs, ignoring IDs of other projects
pub async fn get_decks_by_ids(
    pool: &SqlitePool,
    project_id: &Uuid,
    deck_ids: &[Uuid],
) -> Result<Vec<Deck>, sqlx::Error> {
    let decks = list_decks(pool, project_id).await?;
    Ok(decks
        .into_iter()
        .filter(|deck| deck_ids.contains(&deck.id))
        .collect())
}

/// Insert or update the deck keyed on (project, hash).
///
/// Must run inside a transaction; returns the stored deck and whether it was created.
pub async fn upsert_deck(
    conn: &mut SqliteConnection,
    project_id: &Uuid,
    data: &DeckData,
) -> Result<(Deck, bool), sqlx::Error> {
    let file_information = serde_json::to_string(&data.file_information)
        .map_err(|e| sqlx::Error::Protocol(format!("Cannot encode file information: {}", e)))?;

    let existing = sqlx::query_as::<_, DeckRow>(
        "SELECT * FROM decks WHERE project_id = ? AND hash = ?",
    )
    .bind(project_id.to_string())
    .bind(&data.hash)
    .fetch_optional(&mut *conn)
    .await?;

    let (deck_id, created) = match existing {
        Some(row) => {
            sqlx::query(
                r#"
                UPDATE decks
                SET title = ?, description = ?, dir_path = ?, type = ?, file_information = ?
                WHERE id = ?
                "#,
            )
            .bind(&data.title)
            .bind(&data.description)
            .bind(&data.dir_path)
            .bind(&data.deck_type)
            .bind(&file_information)
            .bind(&row.id)
            .execute(&mut *conn)
            .await?;
            (row.id, false)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            sqlx::query(
                r#"
                INSERT INTO decks (id, project_id, title, description, dir_path, type, namespace, file_information, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&id)
            .bind(project_id.to_string())
            .bind(&data.title)
            .bind(&data.description)
            .bind(&data.dir_path)
            .bind(&data.deck_type)
            .bind(DEFAULT_DECK_NAMESPACE)
            .bind(&file_information)
            .bind(&data.hash)
            .execute(&mut *conn)
            .await?;
            (id, true)
        }
    };

    let row = sqlx::query_as::<_, DeckRow>("SELECT * FROM decks WHERE id = ?")
        .bind(&deck_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok((row.to_deck(), created))
}

/// Delete every deck of a project whose hash is not in `keep_hashes`.
/// Returns the deleted decks.
pub async fn delete_stale_decks(
    pool: &SqlitePool,
    project_id: &Uuid,
    keep_hashes: &[String],
) -> Result<Vec<Deck>, sqlx::Error> {
    let stale: Vec<Deck> = list_decks(pool, project_id)
        .await?
        .into_iter()
        .filter(|deck| !keep_hashes.contains(&deck.hash))
        .collect();

    if stale.is_empty() {
        return Ok(stale);
    }

    let mut tx = pool.begin().await?;
    for deck in &stale {
        sqlx::query("DELETE FROM decks WHERE id = ?")
            .bind(deck.id.to_string())
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;

    Ok(stale)
}
