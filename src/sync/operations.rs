//! User initiated changes that feed back into repository updates

use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::domain::{
    ClusterSettings, Environment, RepositoryStatus, UpdateEnvironmentRequest, ValuesType,
    CLUSTER_PORT_RANGE,
};
use crate::jobs::{JobError, JobQueue, SyncJob};

/// Input rejected before anything is stored
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Values path {0} does not exist in the deck")]
    InvalidValuesPath(String),

    #[error("Port {0} is outside of the allowed range 1024-65535")]
    PortOutOfRange(i64),

    #[error("SOPS provider {0} does not belong to the project")]
    UnknownSopsProvider(Uuid),
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Could not submit repository update: {0}")]
    Submit(#[from] JobError),
}

/// Mark a project as pending and queue its repository update
pub async fn request_repository_update(
    pool: &SqlitePool,
    queue: &dyn JobQueue,
    project_id: &Uuid,
    deck_ids: Option<Vec<Uuid>>,
    render: bool,
) -> Result<(), OperationError> {
    if db::get_project(pool, project_id).await?.is_none() {
        return Err(OperationError::NotFound(format!("Project {}", project_id)));
    }

    // Committed before the job can start so readers never see a stale outcome
    db::update_repository_status(pool, project_id, RepositoryStatus::CloningPending).await?;

    queue
        .submit(SyncJob {
            project_id: *project_id,
            deck_ids,
            render,
        })
        .await?;

    Ok(())
}

/// Apply changes to an environment and re-render its deck
pub async fn update_environment(
    pool: &SqlitePool,
    queue: &dyn JobQueue,
    environment_id: &Uuid,
    changes: &UpdateEnvironmentRequest,
) -> Result<Environment, OperationError> {
    let mut environment = db::get_environment(pool, environment_id)
        .await?
        .ok_or_else(|| OperationError::NotFound(format!("Environment {}", environment_id)))?;
    let deck = db::get_deck(pool, &environment.deck_id)
        .await?
        .ok_or_else(|| OperationError::NotFound(format!("Deck {}", environment.deck_id)))?;

    if let Some(values_path) = &changes.values_path {
        if !values_path.is_empty() && !deck.has_file(values_path) {
            return Err(ValidationError::InvalidValuesPath(values_path.clone()).into());
        }
        environment.values_path = values_path.clone();
        environment.values_type = if values_path.is_empty() {
            None
        } else {
            Some(ValuesType::from_values_path(values_path))
        };
    }

    if let Some(Some(provider_id)) = changes.sops_provider_id {
        let owned = db::get_sops_provider(pool, &provider_id)
            .await?
            .map(|credential| credential.project_id == deck.project_id)
            .unwrap_or(false);
        if !owned {
            return Err(ValidationError::UnknownSopsProvider(provider_id).into());
        }
    }
    if let Some(provider_id) = changes.sops_provider_id {
        environment.sops_provider_id = provider_id;
    }

    if let Some(title) = &changes.title {
        environment.title = title.clone();
    }
    if let Some(description) = &changes.description {
        environment.description = description.clone();
    }
    if let Some(namespace) = &changes.namespace {
        environment.namespace = namespace.clone();
    }

    db::save_environment(pool, &environment).await?;
    if let Some(overrides) = &changes.helm_overrides {
        db::set_helm_overrides(pool, &environment.id, overrides.as_deref()).await?;
    }

    request_repository_update(pool, queue, &deck.project_id, Some(vec![deck.id]), true).await?;

    Ok(environment)
}

/// Change the cluster port of a project
pub async fn update_cluster_settings(
    pool: &SqlitePool,
    project_id: &Uuid,
    port: i64,
) -> Result<ClusterSettings, OperationError> {
    if !CLUSTER_PORT_RANGE.contains(&port) {
        return Err(ValidationError::PortOutOfRange(port).into());
    }

    db::update_cluster_port(pool, project_id, port)
        .await?
        .ok_or_else(|| OperationError::NotFound(format!("Cluster settings of project {}", project_id)))
}
