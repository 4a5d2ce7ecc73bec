//! SOPS credential providers used to decrypt secret values during rendering

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Key material for one SOPS backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "sopsType", rename_all = "snake_case")]
pub enum SopsProvider {
    Aws {
        #[serde(rename = "accessKey")]
        access_key: String,
        #[serde(rename = "secretAccessKey")]
        secret_access_key: String,
    },
    Pgp {
        #[serde(rename = "privateKey")]
        private_key: String,
    },
}

impl SopsProvider {
    pub fn sops_type(&self) -> &'static str {
        match self {
            SopsProvider::Aws { .. } => "aws",
            SopsProvider::Pgp { .. } => "pgp",
        }
    }

    /// Environment variables handed to the renderer process
    pub fn to_environment_vars(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        match self {
            SopsProvider::Aws {
                access_key,
                secret_access_key,
            } => {
                env.insert("AWS_SDK_LOAD_CONFIG".to_string(), "1".to_string());
                env.insert("AWS_ACCESS_KEY_ID".to_string(), access_key.clone());
                env.insert(
                    "AWS_SECRET_ACCESS_KEY".to_string(),
                    secret_access_key.clone(),
                );
            }
            SopsProvider::Pgp { private_key } => {
                env.insert("PGP_PRIVATE_KEY".to_string(), private_key.clone());
            }
        }
        env
    }
}

/// A stored provider owned by a project
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SopsCredential {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    #[serde(skip_serializing)]
    pub provider: SopsProvider,
}

impl std::fmt::Display for SopsCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} - {}",
            self.provider.sops_type(),
            self.title,
            self.description
        )
    }
}
