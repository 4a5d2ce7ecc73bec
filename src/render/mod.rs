//! Manifest rendering for (deck, environment) pairs

pub mod helm;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::ValuesType;
use crate::repository::DeckData;

pub use helm::HelmRenderer;

/// Failure rendering a single (deck, environment) pair
#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Renderer binary not found: {0}")]
    BinaryNotFound(String),

    #[error("{command} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Values path {0} does not exist in the deck")]
    MissingValues(String),

    #[error("Unsupported deck type: {0}")]
    UnsupportedDeck(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Environment settings a renderer needs for one pair
#[derive(Debug, Clone, Default)]
pub struct RenderEnvironment {
    pub id: Uuid,
    /// Relative to the deck directory, empty for chart defaults
    pub values_path: String,
    pub values_type: Option<ValuesType>,
    pub namespace: String,
    /// Free-form YAML layered on top of the values files
    pub overrides: Option<String>,
    /// Decryption credentials for SOPS encrypted values
    pub env_vars: BTreeMap<String, String>,
}

/// One renderer input
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub deck: DeckData,
    pub environment: RenderEnvironment,
}

/// One manifest document of a render result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocument {
    pub kind: String,
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default)]
pub struct RenderedEnvironment {
    pub environment_id: Uuid,
    pub documents: Vec<RenderedDocument>,
    /// Raw values file text when a single values file was used
    pub values: Option<String>,
}

/// Render result of one pair; failures are kept per pair
#[derive(Debug)]
pub struct RenderOutcome {
    pub deck: DeckData,
    pub environment_id: Uuid,
    pub result: Result<RenderedEnvironment, RenderError>,
}

#[async_trait]
pub trait ManifestRenderer: Send + Sync {
    /// Render one deck for one environment from the checked out repository
    async fn render_one(
        &self,
        checkout: &Path,
        deck: &DeckData,
        environment: &RenderEnvironment,
    ) -> Result<RenderedEnvironment, RenderError>;

    /// Render a batch; a failing pair does not stop the others
    async fn render(&self, checkout: &Path, requests: Vec<RenderRequest>) -> Vec<RenderOutcome> {
        let mut outcomes = Vec::with_capacity(requests.len());
        for request in requests {
            let result = self
                .render_one(checkout, &request.deck, &request.environment)
                .await;
            if let Err(e) = &result {
                tracing::warn!(
                    "Rendering deck {} for environment {} failed: {}",
                    request.deck.title,
                    request.environment.id,
                    e
                );
            }
            outcomes.push(RenderOutcome {
                environment_id: request.environment.id,
                deck: request.deck,
                result,
            });
        }
        outcomes
    }
}

/// Split a multi-document YAML stream into documents, dropping empty ones
pub fn split_documents(stream: &str) -> Vec<RenderedDocument> {
    let chunks: Vec<&str> = match Regex::new(r"(?m)^---[ \t]*(#.*)?$").ok() {
        Some(separator) => separator.split(stream).collect(),
        None => vec![stream],
    };

    chunks
        .into_iter()
        .filter(|chunk| has_content(chunk))
        .map(|chunk| {
            let content = chunk.trim_matches('\n');
            let value = serde_yaml::Value::deserialize(serde_yaml::Deserializer::from_str(content))
                .unwrap_or(serde_yaml::Value::Null);

            let kind = value
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or_default()
                .to_string();
            let name = value
                .get("metadata")
                .and_then(|m| m.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();

            RenderedDocument {
                kind,
                name,
                content: content.to_string(),
            }
        })
        .collect()
}

/// Whether a chunk holds anything besides comments and blank lines
fn has_content(chunk: &str) -> bool {
    chunk
        .lines()
        .map(str::trim)
        .any(|line| !line.is_empty() && !line.starts_with('#'))
}
