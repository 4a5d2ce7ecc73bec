//! Event bus publishing synchronization progress

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::RepositoryStatus;

/// Event types that can be published
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A project's repository status was written
    RepositoryStatusChanged {
        project_id: Uuid,
        status: RepositoryStatus,
        timestamp: DateTime<Utc>,
    },

    /// A parse succeeded and the observed commit was stored
    CommitObserved {
        project_id: Uuid,
        commit: String,
        timestamp: DateTime<Utc>,
    },

    /// Decks absent from a full parse were deleted
    DecksReaped {
        project_id: Uuid,
        deck_hashes: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An environment's deployments were regenerated from rendered manifests
    DeploymentsRendered {
        project_id: Uuid,
        environment_id: Uuid,
        deployments: usize,
        timestamp: DateTime<Utc>,
    },

    /// Rendering failed for one deck/environment pair
    RenderFailed {
        project_id: Uuid,
        environment_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl Event {
    /// Get the project ID associated with this event
    pub fn project_id(&self) -> Uuid {
        match self {
            Event::RepositoryStatusChanged { project_id, .. }
            | Event::CommitObserved { project_id, .. }
            | Event::DecksReaped { project_id, .. }
            | Event::DeploymentsRendered { project_id, .. }
            | Event::RenderFailed { project_id, .. } => *project_id,
        }
    }

    pub fn status_changed(project_id: Uuid, status: RepositoryStatus) -> Self {
        Event::RepositoryStatusChanged {
            project_id,
            status,
            timestamp: Utc::now(),
        }
    }
}

/// Event bus for pub/sub communication
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a new event bus
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self { sender }
    }

    /// Publish an event
    pub fn publish(&self, event: Event) {
        // Ignore errors if there are no receivers
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
