//! Project database operations

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::{
    ClusterSettings, CreateProjectRequest, Project, RepositoryStatus, SpecType,
    DEFAULT_CLUSTER_PORT,
};

/// Row type for projects table
#[derive(Debug, sqlx::FromRow)]
pub struct ProjectRow {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub spec_repository: String,
    pub spec_repository_branch: Option<String>,
    pub spec_type: String,
    pub access_username: String,
    pub access_token: String,
    pub organization: String,
    pub repository_status: String,
    pub current_commit: String,
    pub current_commit_date_time: Option<String>,
    pub created_at: String,
}

impl ProjectRow {
    pub fn to_project(&self) -> Project {
        Project {
            id: Uuid::parse_str(&self.id).unwrap_or_default(),
            title: self.title.clone(),
            description: self.description.clone(),
            spec_repository: self.spec_repository.clone(),
            spec_repository_branch: self.spec_repository_branch.clone(),
            spec_type: self.spec_type.parse::<SpecType>().ok(),
            access_username: self.access_username.clone(),
            access_token: self.access_token.clone(),
            organization: Uuid::parse_str(&self.organization).unwrap_or_default(),
            repository_status: self.repository_status.parse().unwrap_or_default(),
            current_commit: self.current_commit.clone(),
            current_commit_date_time: self.current_commit_date_time.as_ref().and_then(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|dt| dt.with_timezone(&Utc))
                    .ok()
            }),
            created_at: DateTime::parse_from_rfc3339(&self.created_at)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }
    }
}

/// Get a project by ID
pub async fn get_project(
    pool: &SqlitePool,
    project_id: &Uuid,
) -> Result<Option<Project>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| r.to_project()))
}

/// List all projects
pub async fn list_projects(pool: &SqlitePool) -> Result<Vec<Project>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProjectRow>("SELECT * FROM projects ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;

    Ok(rows.into_iter().map(|r| r.to_project()).collect())
}

/// Create a new project
pub async fn create_project(
    pool: &SqlitePool,
    req: &CreateProjectRequest,
) -> Result<Project, sqlx::Error> {
    let id = Uuid::new_v4();
    let organization = req.organization.unwrap_or_else(Uuid::new_v4);

    sqlx::query(
        r#"
        INSERT INTO projects (
            id, title, description, spec_repository, spec_repository_branch, spec_type,
            access_username, access_token, organization, repository_status, created_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(id.to_string())
    .bind(&req.title)
    .bind(&req.description)
    .bind(&req.spec_repository)
    .bind(&req.spec_repository_branch)
    .bind(req.spec_type.unwrap_or_default().as_str())
    .bind(req.access_username.clone().unwrap_or_default())
    .bind(req.access_token.clone().unwrap_or_default())
    .bind(organization.to_string())
    .bind(RepositoryStatus::Unknown.as_str())
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await?;

    get_project(pool, &id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Delete a project together with everything it owns
pub async fn delete_project(pool: &SqlitePool, project_id: &Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM projects WHERE id = ?")
        .bind(project_id.to_string())
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Set the repository status of a project
pub async fn update_repository_status(
    pool: &SqlitePool,
    project_id: &Uuid,
    status: RepositoryStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE projects SET repository_status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(project_id.to_string())
        .execute(pool)
        .await?;

    Ok(())
}

/// Forget the last observed commit and mark the project as cloning
pub async fn begin_cloning(pool: &SqlitePool, project_id: &Uuid) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE projects
        SET current_commit = '', current_commit_date_time = NULL, repository_status = ?
        WHERE id = ?
        "#,
    )
    .bind(RepositoryStatus::Cloning.as_str())
    .bind(project_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Persist the commit observed by a successful parse
pub async fn record_commit(
    pool: &SqlitePool,
    project_id: &Uuid,
    commit: &str,
    commit_date_time: Option<DateTime<Utc>>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE projects
        SET current_commit = ?, current_commit_date_time = ?, repository_status = ?
        WHERE id = ?
        "#,
    )
    .bind(commit)
    .bind(commit_date_time.map(|dt| dt.to_rfc3339()))
    .bind(RepositoryStatus::CloningSuccessful.as_str())
    .bind(project_id.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct ClusterSettingsRow {
    project_id: String,
    port: i64,
    provider: String,
}

impl ClusterSettingsRow {
    fn to_settings(&self) -> ClusterSettings {
        ClusterSettings {
            project_id: Uuid::parse_str(&self.project_id).unwrap_or_default(),
            port: self.port,
            provider: self.provider.clone(),
        }
    }
}

/// Get the cluster settings of a project
pub async fn get_cluster_settings(
    pool: &SqlitePool,
    project_id: &Uuid,
) -> Result<Option<ClusterSettings>, sqlx::Error> {
    let row = sqlx::query_as::<_, ClusterSettingsRow>(
        "SELECT * FROM cluster_settings WHERE project_id = ?",
    )
    .bind(project_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| r.to_settings()))
}

/// Create cluster settings for a project, picking a port that does not collide
/// with other projects of the same organization
pub async fn add_cluster_settings(
    pool: &SqlitePool,
    project: &Project,
) -> Result<ClusterSettings, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let (highest,): (Option<i64>,) = sqlx::query_as(
        r#"
        SELECT MAX(cs.port)
        FROM cluster_settings cs
        JOIN projects p ON p.id = cs.project_id
        WHERE p.organization = ?
        "#,
    )
    .bind(project.organization.to_string())
    .fetch_one(&mut *tx)
    .await?;

    let port = highest.map(|port| port + 1).unwrap_or(DEFAULT_CLUSTER_PORT);

    sqlx::query("INSERT INTO cluster_settings (project_id, port, provider) VALUES (?, ?, 'k3d')")
        .bind(project.id.to_string())
        .bind(port)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::debug!("Project {} got cluster port {}", project.id, port);

    Ok(ClusterSettings {
        project_id: project.id,
        port,
        provider: "k3d".to_string(),
    })
}

/// Change the cluster port of a project; range checks happen in the caller
pub async fn update_cluster_port(
    pool: &SqlitePool,
    project_id: &Uuid,
    port: i64,
) -> Result<Option<ClusterSettings>, sqlx::Error> {
    sqlx::query("UPDATE cluster_settings SET port = ? WHERE project_id = ?")
        .bind(port)
        .bind(project_id.to_string())
        .execute(pool)
        .await?;

    get_cluster_settings(pool, project_id).await
}
