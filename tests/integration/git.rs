//! GitRepositoryParser against local repositories

use std::fs;
use std::path::Path;

use git2::{IndexAddOption, Oid, Repository, RepositoryInitOptions, Signature};
use tempfile::TempDir;
use uuid::Uuid;

use decksync::repository::{GitRepositoryParser, ParseError, RepositoryParser, RepositorySource};

fn init_origin(path: &Path) -> Repository {
    let mut options = RepositoryInitOptions::new();
    options.initial_head("main");
    Repository::init_opts(path, &options).unwrap()
}

fn write(root: &Path, path: &str, content: &str) {
    let path = root.join(path);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn commit_all(repo: &Repository, message: &str) -> Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"].iter(), IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();

    let signature = Signature::now("Decksync Tests", "tests@decksync.dev").unwrap();
    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let parents: Vec<&git2::Commit> = parent.iter().collect();

    repo.commit(Some("HEAD"), &signature, &signature, message, &tree, &parents)
        .unwrap()
}

fn source(origin: &Path, project_id: Uuid, branch: Option<&str>) -> RepositorySource {
    RepositorySource {
        project_id,
        url: origin.display().to_string(),
        branch: branch.map(str::to_string),
        access_username: String::new(),
        access_token: String::new(),
    }
}

#[tokio::test]
async fn test_parse_clones_and_follows_new_commits() {
    let origin_dir = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let origin = init_origin(origin_dir.path());

    write(
        origin_dir.path(),
        "charts/api/Chart.yaml",
        "apiVersion: v2\nname: api\ndescription: Public API\nversion: 0.1.0\n",
    );
    write(origin_dir.path(), "charts/api/values.yaml", "replicaCount: 1\n");
    let first = commit_all(&origin, "Add api chart");

    let parser = GitRepositoryParser::new(cache.path());
    let project_id = Uuid::new_v4();
    let parsed = parser
        .parse(&source(origin_dir.path(), project_id, Some("main")))
        .await
        .unwrap();

    assert_eq!(parsed.data.current_commit, first.to_string());
    assert!(parsed.data.current_commit_date_time.is_some());
    assert_eq!(parsed.data.decks.len(), 1);
    let api = &parsed.data.decks[0];
    assert_eq!(api.title, "api");
    assert_eq!(api.dir_path, "charts/api");
    assert!(api.file_information.contains("values.yaml"));
    assert!(parsed.checkout.join("charts/api/Chart.yaml").exists());

    write(
        origin_dir.path(),
        "charts/web/Chart.yaml",
        "apiVersion: v2\nname: web\nversion: 0.1.0\n",
    );
    let second = commit_all(&origin, "Add web chart");

    // Same project, so the existing clone is fetched and reset
    let parsed = parser
        .parse(&source(origin_dir.path(), project_id, None))
        .await
        .unwrap();
    assert_eq!(parsed.data.current_commit, second.to_string());
    let mut titles: Vec<&str> = parsed.data.decks.iter().map(|d| d.title.as_str()).collect();
    titles.sort();
    assert_eq!(titles, vec!["api", "web"]);
}

#[tokio::test]
async fn test_missing_branch_is_reported() {
    let origin_dir = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let origin = init_origin(origin_dir.path());
    write(origin_dir.path(), "Chart.yaml", "apiVersion: v2\nname: root\n");
    commit_all(&origin, "Initial chart");

    let parser = GitRepositoryParser::new(cache.path());
    let err = parser
        .parse(&source(origin_dir.path(), Uuid::new_v4(), Some("release")))
        .await
        .unwrap_err();

    match err {
        ParseError::BranchUnavailable { branch, .. } => assert_eq!(branch, "release"),
        other => panic!("unexpected error: {}", other),
    }
}

#[tokio::test]
async fn test_deleted_remote_branch_is_reported() {
    let origin_dir = TempDir::new().unwrap();
    let cache = TempDir::new().unwrap();
    let origin = init_origin(origin_dir.path());
    write(origin_dir.path(), "Chart.yaml", "apiVersion: v2\nname: root\n");
    let commit = commit_all(&origin, "Initial chart");
    origin
        .branch("feature", &origin.find_commit(commit).unwrap(), false)
        .unwrap();

    let parser = GitRepositoryParser::new(cache.path());
    let project_id = Uuid::new_v4();
    let parsed = parser
        .parse(&source(origin_dir.path(), project_id, Some("feature")))
        .await
        .unwrap();
    assert_eq!(parsed.data.current_commit, commit.to_string());

    origin
        .find_branch("feature", git2::BranchType::Local)
        .unwrap()
        .delete()
        .unwrap();

    // The cached clone still has the old remote ref until it is pruned
    let err = parser
        .parse(&source(origin_dir.path(), project_id, Some("feature")))
        .await
        .unwrap_err();
    match err {
        ParseError::BranchUnavailable { branch, .. } => assert_eq!(branch, "feature"),
        other => panic!("unexpected error: {}", other),
    }
}
