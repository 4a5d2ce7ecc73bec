//! git2 backed repository parser

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use git2::{build::RepoBuilder, Cred, CredentialType, ErrorCode, FetchOptions, RemoteCallbacks};

use super::{discover_decks, ParseError, ParsedRepository, RepositoryData, RepositoryParser, RepositorySource};

const REMOTE: &str = "origin";

/// Clones each project into its own directory under a cache root and keeps it
/// up to date with fetch + hard reset
pub struct GitRepositoryParser {
    cache_dir: PathBuf,
}

impl GitRepositoryParser {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
        }
    }

    /// Working tree used for a project
    pub fn checkout_path(&self, source: &RepositorySource) -> PathBuf {
        self.cache_dir.join(source.project_id.to_string())
    }
}

#[async_trait]
impl RepositoryParser for GitRepositoryParser {
    async fn parse(&self, source: &RepositorySource) -> Result<ParsedRepository, ParseError> {
        let checkout = self.checkout_path(source);
        let url = source.url.clone();
        let source = source.clone();

        tracing::info!(
            "Fetching {} (branch {}) into {}",
            source.url,
            source.branch.as_deref().unwrap_or("<default>"),
            checkout.display()
        );

        // Run blocking git2 operations in a blocking task
        tokio::task::spawn_blocking(move || sync_checkout(&source, &checkout))
            .await
            .map_err(|e| ParseError::CloningFailed {
                url,
                message: format!("Task join error: {}", e),
            })?
    }
}

fn sync_checkout(source: &RepositorySource, checkout: &Path) -> Result<ParsedRepository, ParseError> {
    let repo = open_or_clone(source, checkout)?;

    let commit = resolve_target(&repo, source)?
        .peel_to_commit()
        .map_err(|e| classify(&source.url, e))?;

    repo.set_head_detached(commit.id())
        .map_err(|e| classify(&source.url, e))?;
    repo.reset(commit.as_object(), git2::ResetType::Hard, None)
        .map_err(|e| classify(&source.url, e))?;

    let current_commit_date_time = Utc.timestamp_opt(commit.time().seconds(), 0).single();
    let decks = discover_decks(checkout)?;

    tracing::debug!(
        "Checked out {} at {}, {} decks",
        source.url,
        commit.id(),
        decks.len()
    );

    Ok(ParsedRepository {
        data: RepositoryData {
            current_commit: commit.id().to_string(),
            current_commit_date_time,
            decks,
        },
        checkout: checkout.to_path_buf(),
    })
}

fn open_or_clone(source: &RepositorySource, checkout: &Path) -> Result<git2::Repository, ParseError> {
    if checkout.exists() {
        match git2::Repository::open(checkout) {
            Ok(repo) => {
                fetch(&repo, source)?;
                return Ok(repo);
            }
            Err(e) => {
                tracing::warn!(
                    "Discarding unusable clone at {}: {}",
                    checkout.display(),
                    e
                );
                fs::remove_dir_all(checkout).map_err(|e| ParseError::CloningFailed {
                    url: source.url.clone(),
                    message: format!("Failed to remove {}: {}", checkout.display(), e),
                })?;
            }
        }
    }

    if let Some(parent) = checkout.parent() {
        fs::create_dir_all(parent).map_err(|e| ParseError::CloningFailed {
            url: source.url.clone(),
            message: format!("Failed to create {}: {}", parent.display(), e),
        })?;
    }

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fetch_options(source));
    builder
        .clone(&source.url, checkout)
        .map_err(|e| classify(&source.url, e))
}

fn fetch(repo: &git2::Repository, source: &RepositorySource) -> Result<(), ParseError> {
    // Credentials or the URL may have changed since the last clone
    repo.remote_set_url(REMOTE, &source.url)
        .map_err(|e| classify(&source.url, e))?;

    let mut remote = repo
        .find_remote(REMOTE)
        .map_err(|e| classify(&source.url, e))?;
    let refspec = format!("+refs/heads/*:refs/remotes/{}/*", REMOTE);
    // Branches deleted on the remote must disappear locally as well
    let mut options = fetch_options(source);
    options.prune(git2::FetchPrune::On);
    remote
        .fetch(&[refspec.as_str()], Some(&mut options), None)
        .map_err(|e| classify(&source.url, e))
}

fn resolve_target<'r>(
    repo: &'r git2::Repository,
    source: &RepositorySource,
) -> Result<git2::Reference<'r>, ParseError> {
    match source.branch.as_deref() {
        Some(branch) => repo
            .find_reference(&format!("refs/remotes/{}/{}", REMOTE, branch))
            .map_err(|e| match e.code() {
                ErrorCode::NotFound | ErrorCode::InvalidSpec => ParseError::BranchUnavailable {
                    url: source.url.clone(),
                    branch: branch.to_string(),
                },
                _ => classify(&source.url, e),
            }),
        None => repo
            .find_reference(&format!("refs/remotes/{}/HEAD", REMOTE))
            .and_then(|reference| reference.resolve())
            .or_else(|_| repo.head())
            .map_err(|e| classify(&source.url, e)),
    }
}

fn fetch_options(source: &RepositorySource) -> FetchOptions<'static> {
    let username = source.access_username.clone();
    let token = source.access_token.clone();
    let mut attempted = false;

    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, username_from_url, allowed| {
        // libgit2 keeps asking while the remote rejects what we offer
        if attempted {
            return Err(git2::Error::new(
                ErrorCode::Auth,
                git2::ErrorClass::Http,
                "credentials rejected",
            ));
        }
        attempted = true;

        if !token.is_empty() && allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let user = if username.is_empty() {
                username_from_url.unwrap_or("git")
            } else {
                username.as_str()
            };
            Cred::userpass_plaintext(user, &token)
        } else {
            Cred::default()
        }
    });

    let mut options = FetchOptions::new();
    options.remote_callbacks(callbacks);
    options
}

/// Sort a libgit2 failure into the parse error kinds
fn classify(url: &str, error: git2::Error) -> ParseError {
    let message = error.message().to_string();
    let lowered = message.to_lowercase();

    let auth = error.code() == ErrorCode::Auth
        || lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("authentication")
        || lowered.contains("credentials");

    if auth {
        ParseError::AuthenticationFailed {
            url: url.to_string(),
            message,
        }
    } else {
        ParseError::CloningFailed {
            url: url.to_string(),
            message,
        }
    }
}
