//! Project domain model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Outcome of the most recent repository synchronization attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RepositoryStatus {
    #[default]
    Unknown,
    CloningPending,
    Cloning,
    CloningFailed,
    CloningSuccessful,
    BranchUnavailable,
    AuthFailed,
    ParsingFailed,
    Ok,
}

impl RepositoryStatus {
    /// Returns the database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryStatus::Unknown => "unknown",
            RepositoryStatus::CloningPending => "cloning-pending",
            RepositoryStatus::Cloning => "cloning",
            RepositoryStatus::CloningFailed => "cloning-failed",
            RepositoryStatus::CloningSuccessful => "cloning-successful",
            RepositoryStatus::BranchUnavailable => "branch-unavailable",
            RepositoryStatus::AuthFailed => "auth-failed",
            RepositoryStatus::ParsingFailed => "parsing-failed",
            RepositoryStatus::Ok => "ok",
        }
    }

    /// Human readable label
    pub fn label(&self) -> &'static str {
        match self {
            RepositoryStatus::Unknown => "Unknown",
            RepositoryStatus::CloningPending => "Cloning Pending",
            RepositoryStatus::Cloning => "Cloning",
            RepositoryStatus::CloningFailed => "Failed",
            RepositoryStatus::CloningSuccessful => "Successful",
            RepositoryStatus::BranchUnavailable => "Branch not found",
            RepositoryStatus::AuthFailed => "Authentication failed",
            RepositoryStatus::ParsingFailed => "Parsing failed",
            RepositoryStatus::Ok => "Okay",
        }
    }

    /// Whether a sync is queued or running
    pub fn is_in_progress(&self) -> bool {
        matches!(self, RepositoryStatus::CloningPending | RepositoryStatus::Cloning)
    }

    /// Whether the status reports a failed attempt
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            RepositoryStatus::CloningFailed
                | RepositoryStatus::BranchUnavailable
                | RepositoryStatus::AuthFailed
                | RepositoryStatus::ParsingFailed
        )
    }
}

impl fmt::Display for RepositoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RepositoryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(RepositoryStatus::Unknown),
            "cloning-pending" => Ok(RepositoryStatus::CloningPending),
            "cloning" => Ok(RepositoryStatus::Cloning),
            "cloning-failed" => Ok(RepositoryStatus::CloningFailed),
            "cloning-successful" => Ok(RepositoryStatus::CloningSuccessful),
            "branch-unavailable" => Ok(RepositoryStatus::BranchUnavailable),
            "auth-failed" => Ok(RepositoryStatus::AuthFailed),
            "parsing-failed" => Ok(RepositoryStatus::ParsingFailed),
            "ok" => Ok(RepositoryStatus::Ok),
            _ => Err(format!("Unknown repository status: {}", s)),
        }
    }
}

/// Kind of manifest repository backing a project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    #[default]
    Helm,
}

impl SpecType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpecType::Helm => "helm",
        }
    }
}

impl fmt::Display for SpecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SpecType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "helm" => Ok(SpecType::Helm),
            _ => Err(format!("Unsupported spec type: {}", s)),
        }
    }
}

/// A deployable application backed by one manifest repository
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub spec_repository: String,
    pub spec_repository_branch: Option<String>,
    /// `None` when the stored value is not a spec kind this build understands
    pub spec_type: Option<SpecType>,
    pub access_username: String,
    #[serde(skip_serializing, default)]
    pub access_token: String,
    pub organization: Uuid,
    pub repository_status: RepositoryStatus,
    pub current_commit: String,
    pub current_commit_date_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn new(title: String, spec_repository: String, organization: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            title,
            description: None,
            spec_repository,
            spec_repository_branch: None,
            spec_type: Some(SpecType::Helm),
            access_username: String::new(),
            access_token: String::new(),
            organization,
            repository_status: RepositoryStatus::Unknown,
            current_commit: String::new(),
            current_commit_date_time: None,
            created_at: Utc::now(),
        }
    }

    /// Branch to check out, `None` meaning the remote default
    pub fn branch(&self) -> Option<&str> {
        self.spec_repository_branch
            .as_deref()
            .filter(|branch| !branch.is_empty())
    }
}

/// Request to create a new project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub title: String,
    pub description: Option<String>,
    pub spec_repository: String,
    pub spec_repository_branch: Option<String>,
    pub spec_type: Option<SpecType>,
    pub access_username: Option<String>,
    pub access_token: Option<String>,
    pub organization: Option<Uuid>,
}

/// Port used when no other project of the organization has cluster settings.
/// Product of the char codes of "unikube" modulo 65535.
pub const DEFAULT_CLUSTER_PORT: i64 = 61335;

/// Lowest and highest port accepted for cluster settings
pub const CLUSTER_PORT_RANGE: std::ops::RangeInclusive<i64> = 1024..=65535;

/// Local cluster settings, one per project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSettings {
    pub project_id: Uuid,
    pub port: i64,
    pub provider: String,
}
