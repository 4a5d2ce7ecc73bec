//! Repository updates end to end with scripted collaborators

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use decksync::db;
use decksync::domain::{CreateProjectRequest, Deck, FileInfo, FileInformation, Project, RepositoryStatus};
use decksync::events::Event;
use decksync::jobs::update_repository_information;
use decksync::render::{
    ManifestRenderer, RenderEnvironment, RenderError, RenderedDocument, RenderedEnvironment,
};
use decksync::repository::{
    DeckData, ParseError, ParsedRepository, RepositoryData, RepositoryParser, RepositorySource,
};
use decksync::sync::SyncServices;

const COMMIT: &str = "9fceb02d0ae598e95dc970b74767f19372d61af8";

/// Returns the scripted decks, or fails with the error behind a status
struct ScriptedParser {
    outcome: Mutex<Result<Vec<DeckData>, RepositoryStatus>>,
    calls: AtomicUsize,
}

impl ScriptedParser {
    fn set_decks(&self, decks: Vec<DeckData>) {
        *self.outcome.lock().unwrap() = Ok(decks);
    }

    fn fail_with(&self, status: RepositoryStatus) {
        *self.outcome.lock().unwrap() = Err(status);
    }
}

#[async_trait]
impl RepositoryParser for ScriptedParser {
    async fn parse(&self, source: &RepositorySource) -> Result<ParsedRepository, ParseError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.outcome.lock().unwrap().clone();
        let url = source.url.clone();

        match outcome {
            Ok(decks) => Ok(ParsedRepository {
                data: RepositoryData {
                    current_commit: COMMIT.to_string(),
                    current_commit_date_time: Some(Utc::now()),
                    decks,
                },
                checkout: PathBuf::from("."),
            }),
            Err(RepositoryStatus::BranchUnavailable) => Err(ParseError::BranchUnavailable {
                url,
                branch: "release".to_string(),
            }),
            Err(RepositoryStatus::AuthFailed) => Err(ParseError::AuthenticationFailed {
                url,
                message: "401 Unauthorized".to_string(),
            }),
            Err(RepositoryStatus::ParsingFailed) => {
                Err(ParseError::Parsing("invalid Chart.yaml".to_string()))
            }
            Err(_) => Err(ParseError::CloningFailed {
                url,
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// Renders one deployment per deck named `<title>-<generation>`
#[derive(Default)]
struct ScriptedRenderer {
    calls: Mutex<Vec<(String, Uuid)>>,
    failing: Mutex<Vec<String>>,
    generation: AtomicUsize,
}

impl ScriptedRenderer {
    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ManifestRenderer for ScriptedRenderer {
    async fn render_one(
        &self,
        _checkout: &Path,
        deck: &DeckData,
        environment: &RenderEnvironment,
    ) -> Result<RenderedEnvironment, RenderError> {
        self.calls
            .lock()
            .unwrap()
            .push((deck.title.clone(), environment.id));

        if self.failing.lock().unwrap().contains(&deck.title) {
            return Err(RenderError::CommandFailed {
                command: "helm template".to_string(),
                status: "exit status: 1".to_string(),
                stderr: "template: missing value".to_string(),
            });
        }

        let name = format!("{}-{}", deck.title, self.generation.load(Ordering::SeqCst));
        let content = format!(
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: {}\nspec:\n  template:\n    spec:\n      containers:\n        - name: app\n          ports:\n            - containerPort: 80\n",
            name
        );

        Ok(RenderedEnvironment {
            environment_id: environment.id,
            documents: vec![RenderedDocument {
                kind: "Deployment".to_string(),
                name,
                content,
            }],
            values: Some("replicaCount: 1\nimage:\n  tag: latest\n".to_string()),
        })
    }
}

struct Harness {
    services: SyncServices,
    parser: Arc<ScriptedParser>,
    renderer: Arc<ScriptedRenderer>,
    project: Project,
}

impl Harness {
    async fn new(decks: Vec<DeckData>) -> Self {
        let pool = db::init_database("sqlite::memory:").await.unwrap();
        let parser = Arc::new(ScriptedParser {
            outcome: Mutex::new(Ok(decks)),
            calls: AtomicUsize::new(0),
        });
        let renderer = Arc::new(ScriptedRenderer::default());
        let services = SyncServices::new(pool, parser.clone(), renderer.clone());

        let project = db::create_project(
            &services.pool,
            &CreateProjectRequest {
                title: "shop".to_string(),
                description: None,
                spec_repository: "https://git.example.com/shop/deploy.git".to_string(),
                spec_repository_branch: Some("main".to_string()),
                spec_type: None,
                access_username: None,
                access_token: None,
                organization: None,
            },
        )
        .await
        .unwrap();

        Self {
            services,
            parser,
            renderer,
            project,
        }
    }

    async fn sync(&self, deck_ids: Option<&[Uuid]>, render: bool) -> RepositoryStatus {
        update_repository_information(&self.services, self.project.id, deck_ids, render)
            .await
            .unwrap()
    }

    async fn project(&self) -> Project {
        db::get_project(&self.services.pool, &self.project.id)
            .await
            .unwrap()
            .unwrap()
    }

    async fn decks(&self) -> Vec<Deck> {
        db::list_decks(&self.services.pool, &self.project.id)
            .await
            .unwrap()
    }

    async fn deck(&self, title: &str) -> Deck {
        self.decks()
            .await
            .into_iter()
            .find(|deck| deck.title == title)
            .unwrap()
    }

    async fn only_environment(&self, deck: &Deck) -> decksync::domain::Environment {
        let mut environments = db::list_environments(&self.services.pool, &deck.id)
            .await
            .unwrap();
        assert_eq!(environments.len(), 1);
        environments.remove(0)
    }
}

fn chart(title: &str, files: &[&str]) -> DeckData {
    DeckData::new(
        title,
        format!("{} chart", title),
        format!("charts/{}", title),
        "helm",
        FileInformation::new(files.iter().map(|path| FileInfo::new(*path, false)).collect()),
    )
}

#[tokio::test]
async fn test_successful_update_stores_commit_and_decks() {
    let harness = Harness::new(vec![chart("api", &["values.yaml"]), chart("web", &[])]).await;

    let status = harness.sync(None, false).await;
    assert_eq!(status, RepositoryStatus::CloningSuccessful);

    let project = harness.project().await;
    assert_eq!(project.repository_status, RepositoryStatus::CloningSuccessful);
    assert_eq!(project.current_commit, COMMIT);
    assert!(project.current_commit_date_time.is_some());

    let decks = harness.decks().await;
    assert_eq!(decks.len(), 2);
    for deck in &decks {
        let environment = harness.only_environment(deck).await;
        assert_eq!(environment.values_path, "");
    }
    assert_eq!(harness.renderer.call_count(), 0);
}

#[tokio::test]
async fn test_parse_failures_record_status_without_decks() {
    let failures = [
        RepositoryStatus::BranchUnavailable,
        RepositoryStatus::AuthFailed,
        RepositoryStatus::CloningFailed,
        RepositoryStatus::ParsingFailed,
    ];

    for failure in failures {
        let harness = Harness::new(vec![chart("api", &["values.yaml"])]).await;
        harness.sync(None, true).await;

        let before = harness.deck("api").await;
        let mut environment = harness.only_environment(&before).await;
        environment.values_path = "values.yaml".to_string();
        db::save_environment(&harness.services.pool, &environment)
            .await
            .unwrap();
        let deployments_before = db::list_deployments(&harness.services.pool, &environment.id)
            .await
            .unwrap();
        assert_eq!(deployments_before.len(), 1);

        harness.parser.fail_with(failure);
        let status = harness.sync(None, true).await;
        assert_eq!(status, failure);

        let project = harness.project().await;
        assert_eq!(project.repository_status, failure);
        assert_eq!(project.current_commit, COMMIT);

        // Stored decks, environments and deployments are left as they were
        let decks = harness.decks().await;
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].id, before.id);
        assert_eq!(decks[0].hash, before.hash);
        assert_eq!(decks[0].file_information, before.file_information);

        let after = harness.only_environment(&decks[0]).await;
        assert_eq!(after.id, environment.id);
        assert_eq!(after.values_path, "values.yaml");
        assert_eq!(after.value_schema, environment.value_schema);
        assert_eq!(
            db::list_deployments(&harness.services.pool, &after.id)
                .await
                .unwrap(),
            deployments_before
        );
    }
}

#[tokio::test]
async fn test_repeated_update_is_idempotent() {
    let harness = Harness::new(vec![chart("api", &["values.yaml"])]).await;

    harness.sync(None, false).await;
    let first = harness.deck("api").await;
    let mut first_environment = harness.only_environment(&first).await;
    first_environment.values_path = "values.yaml".to_string();
    db::save_environment(&harness.services.pool, &first_environment)
        .await
        .unwrap();

    harness.sync(None, false).await;
    let second = harness.deck("api").await;
    let second_environment = harness.only_environment(&second).await;

    assert_eq!(harness.decks().await.len(), 1);
    assert_eq!(first.id, second.id);
    assert_eq!(first.hash, second.hash);
    assert_eq!(first.file_information, second.file_information);
    assert_eq!(first_environment.id, second_environment.id);
    // Still listed in the deck, so the selection is kept
    assert_eq!(second_environment.values_path, "values.yaml");
}

#[tokio::test]
async fn test_unsupported_spec_type_ends_in_unknown() {
    let harness = Harness::new(vec![chart("api", &[])]).await;
    sqlx::query("UPDATE projects SET spec_type = 'kustomize' WHERE id = ?")
        .bind(harness.project.id.to_string())
        .execute(&harness.services.pool)
        .await
        .unwrap();

    let status = harness.sync(None, false).await;
    assert_eq!(status, RepositoryStatus::Unknown);
    assert_eq!(harness.project().await.repository_status, RepositoryStatus::Unknown);
    assert_eq!(harness.parser.calls.load(Ordering::SeqCst), 0);
    assert!(harness.decks().await.is_empty());
}

#[tokio::test]
async fn test_full_update_deletes_stale_decks() {
    let harness = Harness::new(vec![chart("a", &[]), chart("b", &[]), chart("c", &[])]).await;
    harness.sync(None, false).await;
    let stale = harness.deck("b").await;

    let mut events = harness.services.events.subscribe();
    harness.parser.set_decks(vec![chart("a", &[]), chart("c", &[])]);
    harness.sync(None, false).await;

    let titles: Vec<String> = harness.decks().await.into_iter().map(|d| d.title).collect();
    assert_eq!(titles.len(), 2);
    assert!(titles.contains(&"a".to_string()));
    assert!(titles.contains(&"c".to_string()));

    // Environments go with their deck
    let environments = db::list_environments(&harness.services.pool, &stale.id)
        .await
        .unwrap();
    assert!(environments.is_empty());

    let mut reaped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::DecksReaped { deck_hashes, .. } = event {
            reaped.extend(deck_hashes);
        }
    }
    assert_eq!(reaped, vec![stale.hash]);
}

#[tokio::test]
async fn test_scoped_update_leaves_other_decks_alone() {
    let harness = Harness::new(vec![chart("a", &["values.yaml"]), chart("b", &["values.yaml"])]).await;
    harness.sync(None, false).await;

    let a = harness.deck("a").await;
    let b = harness.deck("b").await;
    let mut b_environment = harness.only_environment(&b).await;
    b_environment.values_path = "values.yaml".to_string();
    db::save_environment(&harness.services.pool, &b_environment)
        .await
        .unwrap();

    // The repository lost deck b, but the update only covers deck a
    harness.parser.set_decks(vec![chart("a", &["values.yaml"])]);
    let status = harness.sync(Some(&[a.id][..]), true).await;
    assert_eq!(status, RepositoryStatus::CloningSuccessful);

    let b_after = harness.deck("b").await;
    assert_eq!(b_after.id, b.id);
    let b_environment = harness.only_environment(&b_after).await;
    assert_eq!(b_environment.values_path, "values.yaml");

    let rendered: Vec<String> = harness
        .renderer
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|(title, _)| title.clone())
        .collect();
    assert_eq!(rendered, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_vanished_values_path_is_cleared() {
    let harness = Harness::new(vec![chart("api", &["values.yaml", "values-dev.yaml"])]).await;
    harness.sync(None, false).await;

    let deck = harness.deck("api").await;
    let mut environment = harness.only_environment(&deck).await;
    environment.values_path = "values-dev.yaml".to_string();
    environment.values_type = Some(decksync::domain::ValuesType::File);
    db::save_environment(&harness.services.pool, &environment)
        .await
        .unwrap();

    harness.parser.set_decks(vec![chart("api", &["values.yaml"])]);
    harness.sync(None, false).await;

    let environment = harness.only_environment(&harness.deck("api").await).await;
    assert_eq!(environment.values_path, "");
    assert_eq!(environment.values_type, None);
}

#[tokio::test]
async fn test_render_failure_is_isolated_per_deck() {
    let harness = Harness::new(vec![chart("good", &[]), chart("broken", &[])]).await;
    harness
        .renderer
        .failing
        .lock()
        .unwrap()
        .push("broken".to_string());
    let mut events = harness.services.events.subscribe();

    let status = harness.sync(None, true).await;
    assert_eq!(status, RepositoryStatus::CloningSuccessful);

    let good = harness.only_environment(&harness.deck("good").await).await;
    let broken = harness.only_environment(&harness.deck("broken").await).await;

    let good_deployments = db::list_deployments(&harness.services.pool, &good.id)
        .await
        .unwrap();
    assert_eq!(good_deployments.len(), 1);
    assert_eq!(good_deployments[0].title, "good-0");
    assert_eq!(good_deployments[0].ports, "80");
    assert!(good.value_schema.unwrap().contains("HelmValuesJsonSchema"));

    let broken_deployments = db::list_deployments(&harness.services.pool, &broken.id)
        .await
        .unwrap();
    assert!(broken_deployments.is_empty());
    assert_eq!(broken.value_schema, None);

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::RenderFailed { environment_id, .. } = event {
            failed.push(environment_id);
        }
    }
    assert_eq!(failed, vec![broken.id]);
}

#[tokio::test]
async fn test_existing_decks_are_rendered_before_discovery() {
    let harness = Harness::new(vec![chart("api", &[])]).await;
    harness.sync(None, false).await;
    assert_eq!(harness.renderer.call_count(), 0);

    // A full update without rendering still refreshes decks that have environments
    harness.sync(None, false).await;
    assert_eq!(harness.renderer.call_count(), 1);
    assert_eq!(harness.parser.calls.load(Ordering::SeqCst), 3);

    let environment = harness.only_environment(&harness.deck("api").await).await;
    let deployments = db::list_deployments(&harness.services.pool, &environment.id)
        .await
        .unwrap();
    assert_eq!(deployments.len(), 1);
}

#[tokio::test]
async fn test_deployments_are_replaced_on_render() {
    let harness = Harness::new(vec![chart("api", &[])]).await;
    harness.sync(None, true).await;

    let environment = harness.only_environment(&harness.deck("api").await).await;
    let titles = |deployments: Vec<decksync::domain::K8sDeployment>| -> Vec<String> {
        deployments.into_iter().map(|d| d.title).collect()
    };
    assert_eq!(
        titles(db::list_deployments(&harness.services.pool, &environment.id).await.unwrap()),
        vec!["api-0".to_string()]
    );

    harness.renderer.generation.store(1, Ordering::SeqCst);
    harness.sync(None, true).await;

    assert_eq!(
        titles(db::list_deployments(&harness.services.pool, &environment.id).await.unwrap()),
        vec!["api-1".to_string()]
    );
}

#[tokio::test]
async fn test_missing_project_is_reported() {
    let harness = Harness::new(Vec::new()).await;
    let result =
        update_repository_information(&harness.services, Uuid::new_v4(), None, false).await;
    assert!(matches!(result, Err(decksync::sync::SyncError::NotFound(_))));
    assert_eq!(harness.parser.calls.load(Ordering::SeqCst), 0);
}
