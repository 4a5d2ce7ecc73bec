//! Deck domain model
//!
//! A deck is one deployable unit (Helm chart or plain manifest directory)
//! discovered inside a project's repository.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Namespace applied to newly discovered decks
pub const DEFAULT_DECK_NAMESPACE: &str = "unikube";

/// A persisted deck
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub dir_path: String,
    #[serde(rename = "type")]
    pub deck_type: String,
    pub namespace: String,
    pub file_information: Option<FileInformation>,
    /// Content derived fingerprint, the natural key of a deck within its project
    pub hash: String,
}

impl Deck {
    /// Whether `path` is listed in this deck's file information
    pub fn has_file(&self, path: &str) -> bool {
        self.file_information
            .as_ref()
            .map(|info| info.contains(path))
            .unwrap_or(false)
    }
}

/// Files and directories of a deck with their SOPS encryption flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInformation {
    #[serde(default)]
    pub information: Vec<FileInfo>,
}

impl FileInformation {
    pub fn new(information: Vec<FileInfo>) -> Self {
        Self { information }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.information.iter().any(|info| info.path == path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.information.iter().map(|info| info.path.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub path: String,
    #[serde(default)]
    pub encrypted: bool,
}

impl FileInfo {
    pub fn new(path: impl Into<String>, encrypted: bool) -> Self {
        Self {
            path: path.into(),
            encrypted,
        }
    }
}
