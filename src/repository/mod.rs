//! Manifest repository access: cloning, deck discovery and the parser contract

pub mod discovery;
pub mod git;

use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{FileInformation, Project, RepositoryStatus};

pub use discovery::discover_decks;
pub use git::GitRepositoryParser;

/// Failures of a repository parse, each mapped onto a repository status
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Branch {branch} is not available in {url}")]
    BranchUnavailable { url: String, branch: String },

    #[error("Authentication against {url} failed: {message}")]
    AuthenticationFailed { url: String, message: String },

    #[error("Cloning {url} failed: {message}")]
    CloningFailed { url: String, message: String },

    #[error("Repository structure could not be parsed: {0}")]
    Parsing(String),
}

impl ParseError {
    /// Status recorded on the project when a parse ends with this error
    pub fn repository_status(&self) -> RepositoryStatus {
        match self {
            ParseError::BranchUnavailable { .. } => RepositoryStatus::BranchUnavailable,
            ParseError::AuthenticationFailed { .. } => RepositoryStatus::AuthFailed,
            ParseError::CloningFailed { .. } => RepositoryStatus::CloningFailed,
            ParseError::Parsing(_) => RepositoryStatus::ParsingFailed,
        }
    }
}

/// A deck as discovered in a fresh parse, before it is stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeckData {
    pub hash: String,
    pub title: String,
    pub description: String,
    pub dir_path: String,
    #[serde(rename = "type")]
    pub deck_type: String,
    pub file_information: FileInformation,
}

impl DeckData {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        dir_path: impl Into<String>,
        deck_type: impl Into<String>,
        file_information: FileInformation,
    ) -> Self {
        let title = title.into();
        let dir_path = dir_path.into();
        let deck_type = deck_type.into();
        Self {
            hash: deck_hash(&dir_path, &title, &deck_type),
            title,
            description: description.into(),
            dir_path,
            deck_type,
            file_information,
        }
    }
}

/// Stable fingerprint of a deck within its project.
///
/// Fields are NUL separated so shifting characters between them changes the hash.
pub fn deck_hash(dir_path: &str, title: &str, deck_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dir_path.as_bytes());
    hasher.update([0u8]);
    hasher.update(title.as_bytes());
    hasher.update([0u8]);
    hasher.update(deck_type.as_bytes());
    hex::encode(hasher.finalize())
}

/// Repository level facts plus the decks found at the observed commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryData {
    pub current_commit: String,
    pub current_commit_date_time: Option<DateTime<Utc>>,
    pub decks: Vec<DeckData>,
}

/// Coordinates of a project's repository
#[derive(Debug, Clone)]
pub struct RepositorySource {
    pub project_id: Uuid,
    pub url: String,
    /// `None` selects the remote's default branch
    pub branch: Option<String>,
    pub access_username: String,
    pub access_token: String,
}

impl RepositorySource {
    pub fn for_project(project: &Project) -> Self {
        Self {
            project_id: project.id,
            url: project.spec_repository.clone(),
            branch: project.branch().map(str::to_string),
            access_username: project.access_username.clone(),
            access_token: project.access_token.clone(),
        }
    }
}

/// Result of a successful parse
#[derive(Debug, Clone)]
pub struct ParsedRepository {
    pub data: RepositoryData,
    /// Working tree the decks were discovered in; renderers read deck files from here
    pub checkout: PathBuf,
}

/// Clones or refreshes a repository and discovers its decks
#[async_trait]
pub trait RepositoryParser: Send + Sync {
    async fn parse(&self, source: &RepositorySource) -> Result<ParsedRepository, ParseError>;
}
