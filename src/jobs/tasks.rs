//! Job bodies

use uuid::Uuid;

use crate::db;
use crate::domain::RepositoryStatus;
use crate::events::Event;
use crate::sync::{ProjectUpdater, SyncError, SyncServices};

/// Refresh a project from its repository.
///
/// With `deck_ids` only those decks are updated. Without a scope, decks that
/// already have environments are rendered first so their deployments stay
/// populated, then the full discovery pass runs.
pub async fn update_repository_information(
    services: &SyncServices,
    project_id: Uuid,
    deck_ids: Option<&[Uuid]>,
    render: bool,
) -> Result<RepositoryStatus, SyncError> {
    let _guard = services.locks.lock(project_id).await;
    let pool = &services.pool;

    let mut project = db::get_project(pool, &project_id)
        .await?
        .ok_or(SyncError::NotFound(project_id))?;

    db::begin_cloning(pool, &project_id).await?;
    project.current_commit.clear();
    project.current_commit_date_time = None;
    project.repository_status = RepositoryStatus::Cloning;
    services
        .events
        .publish(Event::status_changed(project_id, RepositoryStatus::Cloning));

    let scope = match deck_ids {
        Some(ids) if !ids.is_empty() => Some(db::get_decks_by_ids(pool, &project_id, ids).await?),
        _ => None,
    };

    if scope.is_none() {
        let existing = db::list_decks_with_environments(pool, &project_id).await?;
        if !existing.is_empty() {
            tracing::debug!(
                "Rendering {} existing decks of project {} before discovery",
                existing.len(),
                project_id
            );
            ProjectUpdater::new(services, project.clone(), Some(existing), true)
                .update()
                .await?;
        }
    }

    ProjectUpdater::new(services, project, scope, render)
        .update()
        .await
}
