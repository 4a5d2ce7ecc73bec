//! Environment and derived deployment models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Deployment target of a deck, unique per deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentType {
    Local,
    Remote,
}

impl EnvironmentType {
    /// All types in declaration order; the first one is used for auto-created environments
    pub const ALL: [EnvironmentType; 2] = [EnvironmentType::Local, EnvironmentType::Remote];

    pub fn as_str(&self) -> &'static str {
        match self {
            EnvironmentType::Local => "local",
            EnvironmentType::Remote => "remote",
        }
    }
}

impl fmt::Display for EnvironmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EnvironmentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "local" => Ok(EnvironmentType::Local),
            "remote" => Ok(EnvironmentType::Remote),
            _ => Err(format!("Unknown environment type: {}", s)),
        }
    }
}

/// Whether an environment's values path names a single file or a directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValuesType {
    File,
    Dir,
}

impl ValuesType {
    /// YAML files are `file`, everything else is treated as a directory
    pub fn from_values_path(path: &str) -> Self {
        if path.ends_with(".yaml") || path.ends_with(".yml") {
            ValuesType::File
        } else {
            ValuesType::Dir
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ValuesType::File => "file",
            ValuesType::Dir => "dir",
        }
    }
}

impl fmt::Display for ValuesType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ValuesType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "file" => Ok(ValuesType::File),
            "dir" => Ok(ValuesType::Dir),
            _ => Err(format!("Unknown values type: {}", s)),
        }
    }
}

/// One deployment target for a deck
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environment {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(rename = "type")]
    pub env_type: EnvironmentType,
    /// Empty when no values override is selected
    pub values_path: String,
    pub values_type: Option<ValuesType>,
    pub namespace: String,
    pub sops_provider_id: Option<Uuid>,
    pub value_schema: Option<String>,
}

impl Environment {
    /// Title given to environments created during discovery
    pub const INITIAL_TITLE: &'static str = "auto-created environment";

    /// The environment every newly discovered deck starts with
    pub fn initial(deck_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            deck_id,
            title: Self::INITIAL_TITLE.to_string(),
            description: String::new(),
            env_type: EnvironmentType::ALL[0],
            values_path: String::new(),
            values_type: None,
            namespace: "default".to_string(),
            sops_provider_id: None,
            value_schema: None,
        }
    }
}

/// Changes applied to an environment by `sync::update_environment`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateEnvironmentRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub values_path: Option<String>,
    pub namespace: Option<String>,
    /// `Some(None)` detaches the provider
    pub sops_provider_id: Option<Option<Uuid>>,
    /// `Some(None)` removes the overrides
    pub helm_overrides: Option<Option<String>>,
}

/// A deployment resource derived from an environment's rendered manifests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sDeployment {
    pub id: Uuid,
    pub environment_id: Uuid,
    pub title: String,
    /// Comma joined container ports
    pub ports: String,
    pub is_switchable: bool,
}

impl K8sDeployment {
    pub fn port_list(&self) -> Vec<&str> {
        self.ports.split(',').filter(|p| !p.is_empty()).collect()
    }
}
