//! Reconciliation of a project's stored decks with its manifest repository
//!
//! [`ProjectUpdater`] parses the repository, upserts decks keyed on their hash,
//! keeps environments consistent with the fresh file information, optionally
//! renders every (deck, environment) pair and regenerates the derived
//! deployments. The project's repository status records the outcome.

pub mod deployments;
pub mod locks;
pub mod operations;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use uuid::Uuid;

use crate::db;
use crate::domain::{Deck, Environment, Project, RepositoryStatus, SpecType};
use crate::events::{Event, EventBus};
use crate::render::{ManifestRenderer, RenderEnvironment, RenderOutcome, RenderRequest};
use crate::repository::{DeckData, RepositoryParser, RepositorySource};
use crate::value_schema;

pub use deployments::extract_deployments;
pub use locks::ProjectLocks;
pub use operations::{
    request_repository_update, update_cluster_settings, update_environment, OperationError,
    ValidationError,
};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Database error: {0}")]
    Store(#[from] sqlx::Error),

    #[error("Project not found: {0}")]
    NotFound(Uuid),

    #[error("Task join error: {0}")]
    Join(String),
}

impl SyncError {
    /// Infrastructure failures worth another attempt by the job runner
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Store(_))
    }
}

/// Collaborators shared by every update
#[derive(Clone)]
pub struct SyncServices {
    pub pool: SqlitePool,
    pub parser: Arc<dyn RepositoryParser>,
    pub renderer: Arc<dyn ManifestRenderer>,
    pub events: EventBus,
    pub locks: ProjectLocks,
}

impl SyncServices {
    pub fn new(
        pool: SqlitePool,
        parser: Arc<dyn RepositoryParser>,
        renderer: Arc<dyn ManifestRenderer>,
    ) -> Self {
        Self {
            pool,
            parser,
            renderer,
            events: EventBus::new(),
            locks: ProjectLocks::new(),
        }
    }
}

/// A stored deck together with the render inputs of its environments
#[derive(Debug, Clone)]
struct EnrichedDeck {
    data: DeckData,
    environments: Vec<RenderEnvironment>,
}

/// One update run for one project
pub struct ProjectUpdater<'a> {
    services: &'a SyncServices,
    project: Project,
    /// `Some` restricts the run to these decks and disables stale deck removal
    updating_decks: Option<Vec<Deck>>,
    render_charts: bool,
}

impl<'a> ProjectUpdater<'a> {
    pub fn new(
        services: &'a SyncServices,
        project: Project,
        updating_decks: Option<Vec<Deck>>,
        render_charts: bool,
    ) -> Self {
        Self {
            services,
            project,
            updating_decks,
            render_charts,
        }
    }

    /// Run the update and return the repository status it ended with.
    ///
    /// Failures of the repository are recorded as their status. Any other
    /// failure leaves the project `unknown`; only retryable ones are returned
    /// as errors.
    pub async fn update(&self) -> Result<RepositoryStatus, SyncError> {
        match self.run().await {
            Ok(status) => Ok(status),
            Err(e) => {
                tracing::error!(
                    "Could not update repository information for project {}: {}",
                    self.project.id,
                    e
                );
                if let Err(store_error) = self.set_status(RepositoryStatus::Unknown).await {
                    tracing::error!(
                        "Could not reset repository status of project {}: {}",
                        self.project.id,
                        store_error
                    );
                }
                if e.is_retryable() {
                    Err(e)
                } else {
                    Ok(RepositoryStatus::Unknown)
                }
            }
        }
    }

    async fn run(&self) -> Result<RepositoryStatus, SyncError> {
        let project = &self.project;
        // Nothing can be parsed, so the project must not stay `cloning`
        if project.spec_type != Some(SpecType::Helm) {
            tracing::warn!(
                "Repository spec type of project {} is not supported, skipping update",
                project.id
            );
            self.set_status(RepositoryStatus::Unknown).await?;
            return Ok(RepositoryStatus::Unknown);
        }

        let source = RepositorySource::for_project(project);
        let parsed = match self.services.parser.parse(&source).await {
            Ok(parsed) => parsed,
            Err(e) => {
                let status = e.repository_status();
                tracing::error!(
                    "Could not parse repository of project {}: {}",
                    project.id,
                    e
                );
                self.set_status(status).await?;
                return Ok(status);
            }
        };

        let data = parsed.data;
        db::record_commit(
            self.pool(),
            &project.id,
            &data.current_commit,
            data.current_commit_date_time,
        )
        .await?;
        self.services.events.publish(Event::CommitObserved {
            project_id: project.id,
            commit: data.current_commit.clone(),
            timestamp: Utc::now(),
        });
        self.services
            .events
            .publish(Event::status_changed(project.id, RepositoryStatus::CloningSuccessful));
        tracing::info!(
            "Project {} is at commit {} with {} decks",
            project.id,
            data.current_commit,
            data.decks.len()
        );

        let decks = match &self.updating_decks {
            Some(scope) => {
                let hashes: HashSet<&str> = scope.iter().map(|deck| deck.hash.as_str()).collect();
                let requested = data
                    .decks
                    .into_iter()
                    .filter(|deck| hashes.contains(deck.hash.as_str()))
                    .collect();
                self.enrich_decks(requested).await?
            }
            None => {
                let enriched = self.enrich_decks(data.decks).await?;
                self.delete_stale_decks(&enriched).await?;
                enriched
            }
        };

        if self.render_charts {
            self.render(&parsed.checkout, &decks).await?;
        }

        Ok(RepositoryStatus::CloningSuccessful)
    }

    /// Upsert every deck and collect the render inputs of its environments
    async fn enrich_decks(&self, decks: Vec<DeckData>) -> Result<Vec<EnrichedDeck>, SyncError> {
        let mut enriched = Vec::with_capacity(decks.len());

        for data in decks {
            let mut tx = self.pool().begin().await?;
            let (deck, created) = db::upsert_deck(&mut tx, &self.project.id, &data).await?;
            let environments = if created {
                tracing::info!("Discovered deck {} ({})", deck.title, deck.dir_path);
                vec![db::create_initial_environment(&mut tx, &deck.id).await?]
            } else {
                db::revalidate_values_paths(&mut tx, &deck).await?
            };
            tx.commit().await?;

            let mut render_environments = Vec::with_capacity(environments.len());
            for environment in &environments {
                render_environments.push(self.render_environment(environment).await?);
            }

            enriched.push(EnrichedDeck {
                data,
                environments: render_environments,
            });
        }

        Ok(enriched)
    }

    async fn render_environment(
        &self,
        environment: &Environment,
    ) -> Result<RenderEnvironment, SyncError> {
        let overrides = db::get_helm_overrides(self.pool(), &environment.id).await?;
        let env_vars = match environment.sops_provider_id {
            Some(provider_id) => db::get_sops_provider(self.pool(), &provider_id)
                .await?
                .map(|credential| credential.provider.to_environment_vars())
                .unwrap_or_default(),
            None => Default::default(),
        };

        Ok(RenderEnvironment {
            id: environment.id,
            values_path: environment.values_path.clone(),
            values_type: environment.values_type,
            namespace: environment.namespace.clone(),
            overrides,
            env_vars,
        })
    }

    async fn delete_stale_decks(&self, keep: &[EnrichedDeck]) -> Result<(), SyncError> {
        let hashes: Vec<String> = keep.iter().map(|deck| deck.data.hash.clone()).collect();
        let stale = db::delete_stale_decks(self.pool(), &self.project.id, &hashes).await?;

        if !stale.is_empty() {
            tracing::info!(
                "Deleted {} stale decks of project {}",
                stale.len(),
                self.project.id
            );
            self.services.events.publish(Event::DecksReaped {
                project_id: self.project.id,
                deck_hashes: stale.into_iter().map(|deck| deck.hash).collect(),
                timestamp: Utc::now(),
            });
        }

        Ok(())
    }

    /// Render every (deck, environment) pair and regenerate its deployments
    async fn render(&self, checkout: &Path, decks: &[EnrichedDeck]) -> Result<(), SyncError> {
        let requests: Vec<RenderRequest> = decks
            .iter()
            .flat_map(|enriched| {
                enriched.environments.iter().map(|environment| RenderRequest {
                    deck: enriched.data.clone(),
                    environment: environment.clone(),
                })
            })
            .collect();

        if requests.is_empty() {
            return Ok(());
        }

        tracing::info!(
            "Rendering {} environments of project {}",
            requests.len(),
            self.project.id
        );
        let outcomes = self.services.renderer.render(checkout, requests).await;
        for outcome in outcomes {
            self.store_render_outcome(outcome).await?;
        }

        Ok(())
    }

    async fn store_render_outcome(&self, outcome: RenderOutcome) -> Result<(), SyncError> {
        let rendered = match outcome.result {
            Ok(rendered) => rendered,
            Err(e) => {
                self.services.events.publish(Event::RenderFailed {
                    project_id: self.project.id,
                    environment_id: outcome.environment_id,
                    message: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Ok(());
            }
        };

        let deployments = extract_deployments(&rendered.documents);
        let stored =
            db::replace_deployments(self.pool(), &outcome.environment_id, &deployments).await?;

        let schema = rendered.values.as_deref().and_then(value_schema::infer_string);
        db::set_value_schema(self.pool(), &outcome.environment_id, schema.as_deref()).await?;

        tracing::debug!(
            "Environment {} of deck {} has {} deployments",
            outcome.environment_id,
            outcome.deck.title,
            stored
        );
        self.services.events.publish(Event::DeploymentsRendered {
            project_id: self.project.id,
            environment_id: outcome.environment_id,
            deployments: stored,
            timestamp: Utc::now(),
        });

        Ok(())
    }

    async fn set_status(&self, status: RepositoryStatus) -> Result<(), sqlx::Error> {
        db::update_repository_status(self.pool(), &self.project.id, status).await?;
        self.services
            .events
            .publish(Event::status_changed(self.project.id, status));
        Ok(())
    }

    fn pool(&self) -> &SqlitePool {
        &self.services.pool
    }
}
