//! K8S deployment database operations

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::K8sDeployment;

#[derive(Debug, sqlx::FromRow)]
pub struct DeploymentRow {
    pub id: String,
    pub environment_id: String,
    pub title: String,
    pub ports: String,
    pub is_switchable: i32,
}

impl DeploymentRow {
    pub fn to_deployment(&self) -> Option<K8sDeployment> {
        Some(K8sDeployment {
            id: Uuid::parse_str(&self.id).ok()?,
            environment_id: Uuid::parse_str(&self.environment_id).ok()?,
            title: self.title.clone(),
            ports: self.ports.clone(),
            is_switchable: self.is_switchable != 0,
        })
    }
}

/// A deployment derived from rendered manifests, not yet stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewDeployment {
    pub title: String,
    pub ports: Vec<String>,
}

/// List the deployments of an environment
pub async fn list_deployments(
    pool: &SqlitePool,
    environment_id: &Uuid,
) -> Result<Vec<K8sDeployment>, sqlx::Error> {
    let rows = sqlx::query_as::<_, DeploymentRow>(
        "SELECT * FROM k8s_deployments WHERE environment_id = ? ORDER BY title",
    )
    .bind(environment_id.to_string())
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().filter_map(|r| r.to_deployment()).collect())
}

/// Replace every deployment of an environment in one transaction
pub async fn replace_deployments(
    pool: &SqlitePool,
    environment_id: &Uuid,
    deployments: &[NewDeployment],
) -> Result<usize, sqlx::Error> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM k8s_deployments WHERE environment_id = ?")
        .bind(environment_id.to_string())
        .execute(&mut *tx)
        .await?;

    let mut inserted = 0;
    for deployment in deployments {
        let ports = deployment.ports.join(",");

        // A manifest set may declare the same deployment twice; keep one row per title and ports
        let (exists,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM k8s_deployments WHERE environment_id = ? AND title = ? AND ports = ?",
        )
        .bind(environment_id.to_string())
        .bind(&deployment.title)
        .bind(&ports)
        .fetch_one(&mut *tx)
        .await?;
        if exists > 0 {
            continue;
        }

        sqlx::query(
            r#"
            INSERT INTO k8s_deployments (id, environment_id, title, ports, is_switchable)
            VALUES (?, ?, ?, ?, 0)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(environment_id.to_string())
        .bind(&deployment.title)
        .bind(&ports)
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;

    Ok(inserted)
}
