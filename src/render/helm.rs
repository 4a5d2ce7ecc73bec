//! Helm chart and plain manifest rendering

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{split_documents, ManifestRenderer, RenderEnvironment, RenderError, RenderedEnvironment};
use crate::domain::ValuesType;
use crate::repository::discovery::{is_regular_file, is_yaml, HELM_DECK, PLAIN_DECK};
use crate::repository::DeckData;

const DEFAULT_VALUES_FILE: &str = "values.yaml";

/// Renders helm decks with `helm template` and plain decks by concatenation
pub struct HelmRenderer {
    helm_binary: Option<PathBuf>,
    release_name: String,
}

impl HelmRenderer {
    /// `helm_binary` of `None` looks `helm` up on PATH when first needed
    pub fn new(helm_binary: Option<PathBuf>, release_name: impl Into<String>) -> Self {
        Self {
            helm_binary,
            release_name: release_name.into(),
        }
    }

    fn binary(&self) -> Result<PathBuf, RenderError> {
        match &self.helm_binary {
            Some(path) => Ok(path.clone()),
            None => which::which("helm").map_err(|e| RenderError::BinaryNotFound(e.to_string())),
        }
    }

    async fn render_chart(
        &self,
        deck_dir: &Path,
        environment: &RenderEnvironment,
    ) -> Result<RenderedEnvironment, RenderError> {
        let (values_files, values) = values_files(deck_dir, environment)?;

        let mut cmd = Command::new(self.binary()?);
        cmd.arg("template").arg(&self.release_name).arg(deck_dir);
        for file in &values_files {
            cmd.arg("-f").arg(file);
        }

        // Held until the command finishes, the file is removed on drop
        let overrides_file = match environment.overrides.as_deref() {
            Some(overrides) if !overrides.trim().is_empty() => {
                let mut file = tempfile::Builder::new()
                    .prefix("overrides-")
                    .suffix(".yaml")
                    .tempfile()?;
                file.write_all(overrides.as_bytes())?;
                cmd.arg("-f").arg(file.path());
                Some(file)
            }
            _ => None,
        };

        if !environment.namespace.is_empty() {
            cmd.arg("--namespace").arg(&environment.namespace);
        }
        cmd.envs(&environment.env_vars);
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        tracing::debug!("Running helm template for {}", deck_dir.display());
        let output = cmd.output().await?;
        drop(overrides_file);

        if !output.status.success() {
            return Err(RenderError::CommandFailed {
                command: "helm template".to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(RenderedEnvironment {
            environment_id: environment.id,
            documents: split_documents(&String::from_utf8_lossy(&output.stdout)),
            values,
        })
    }

    async fn render_plain(
        &self,
        deck_dir: &Path,
        environment: &RenderEnvironment,
    ) -> Result<RenderedEnvironment, RenderError> {
        let mut stream = String::new();
        for file in yaml_files(deck_dir)? {
            stream.push_str("---\n");
            stream.push_str(&tokio::fs::read_to_string(&file).await?);
            stream.push('\n');
        }

        Ok(RenderedEnvironment {
            environment_id: environment.id,
            documents: split_documents(&stream),
            values: None,
        })
    }
}

#[async_trait]
impl ManifestRenderer for HelmRenderer {
    async fn render_one(
        &self,
        checkout: &Path,
        deck: &DeckData,
        environment: &RenderEnvironment,
    ) -> Result<RenderedEnvironment, RenderError> {
        let deck_dir = checkout.join(&deck.dir_path);
        match deck.deck_type.as_str() {
            HELM_DECK => self.render_chart(&deck_dir, environment).await,
            PLAIN_DECK => self.render_plain(&deck_dir, environment).await,
            other => Err(RenderError::UnsupportedDeck(other.to_string())),
        }
    }
}

/// Values files passed to helm, plus the single values text used for schema inference
fn values_files(
    deck_dir: &Path,
    environment: &RenderEnvironment,
) -> Result<(Vec<PathBuf>, Option<String>), RenderError> {
    if environment.values_path.is_empty() {
        let defaults = deck_dir.join(DEFAULT_VALUES_FILE);
        let values = is_regular_file(&defaults)
            .then(|| std::fs::read_to_string(&defaults).ok())
            .flatten();
        return Ok((Vec::new(), values));
    }

    let path = deck_dir.join(&environment.values_path);
    // Missing, or a symlink that may point outside the checkout
    let unusable = std::fs::symlink_metadata(&path)
        .map(|metadata| metadata.file_type().is_symlink())
        .unwrap_or(true);
    if unusable {
        return Err(RenderError::MissingValues(environment.values_path.clone()));
    }

    let values_type = environment
        .values_type
        .unwrap_or_else(|| ValuesType::from_values_path(&environment.values_path));
    match values_type {
        ValuesType::File => {
            let values = std::fs::read_to_string(&path)?;
            Ok((vec![path], Some(values)))
        }
        ValuesType::Dir => Ok((yaml_files(&path)?, None)),
    }
}

/// YAML files directly inside `dir`, sorted by name; symlinks are skipped
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>, RenderError> {
    let mut files = std::fs::read_dir(dir)?
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_type()
                .map(|file_type| file_type.is_file())
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .filter(|path| is_yaml(path))
        .collect::<Vec<_>>();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::FileInformation;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, content).unwrap();
    }

    fn environment(values_path: &str) -> RenderEnvironment {
        RenderEnvironment {
            id: Uuid::new_v4(),
            values_path: values_path.to_string(),
            namespace: "default".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_plain_deck_concatenates_manifests() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "web/a-deployment.yaml",
            "kind: Deployment\nmetadata:\n  name: web\n",
        );
        write(
            dir.path(),
            "web/b-service.yaml",
            "kind: Service\nmetadata:\n  name: web\n---\nkind: Ingress\nmetadata:\n  name: web\n",
        );
        write(dir.path(), "web/notes.txt", "not yaml");

        let renderer = HelmRenderer::new(None, "release");
        let deck = DeckData::new("web", "", "web", PLAIN_DECK, FileInformation::default());
        let env = environment("");

        let rendered = renderer.render_one(dir.path(), &deck, &env).await.unwrap();
        let kinds: Vec<&str> = rendered.documents.iter().map(|d| d.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment", "Service", "Ingress"]);
        assert_eq!(rendered.environment_id, env.id);
    }

    #[test]
    fn test_values_files_for_file_and_dir() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "values.yaml", "replicas: 1\n");
        write(dir.path(), "env/local/b.yaml", "b: 1\n");
        write(dir.path(), "env/local/a.yaml", "a: 1\n");

        let (files, values) = values_files(dir.path(), &environment("")).unwrap();
        assert!(files.is_empty());
        assert_eq!(values.as_deref(), Some("replicas: 1\n"));

        let (files, values) = values_files(dir.path(), &environment("values.yaml")).unwrap();
        assert_eq!(files, vec![dir.path().join("values.yaml")]);
        assert!(values.is_some());

        let (files, values) = values_files(dir.path(), &environment("env/local")).unwrap();
        assert_eq!(
            files,
            vec![
                dir.path().join("env/local/a.yaml"),
                dir.path().join("env/local/b.yaml")
            ]
        );
        assert!(values.is_none());

        assert!(matches!(
            values_files(dir.path(), &environment("missing.yaml")),
            Err(RenderError::MissingValues(_))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlinked_manifests_and_values_are_ignored() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        write(outside.path(), "secret.yaml", "kind: Secret\nmetadata:\n  name: host\n");

        let dir = TempDir::new().unwrap();
        write(dir.path(), "web/deployment.yaml", "kind: Deployment\nmetadata:\n  name: web\n");
        symlink(outside.path().join("secret.yaml"), dir.path().join("web/secret.yaml")).unwrap();
        symlink(outside.path().join("secret.yaml"), dir.path().join("web/values.yaml")).unwrap();

        let renderer = HelmRenderer::new(None, "release");
        let deck = DeckData::new("web", "", "web", PLAIN_DECK, FileInformation::default());
        let rendered = renderer
            .render_one(dir.path(), &deck, &environment(""))
            .await
            .unwrap();
        let kinds: Vec<&str> = rendered.documents.iter().map(|d| d.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Deployment"]);

        let deck_dir = dir.path().join("web");
        let (_, values) = values_files(&deck_dir, &environment("")).unwrap();
        assert!(values.is_none());
        assert!(matches!(
            values_files(&deck_dir, &environment("values.yaml")),
            Err(RenderError::MissingValues(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_deck_type_is_rejected() {
        let renderer = HelmRenderer::new(None, "release");
        let deck = DeckData::new("x", "", "x", "kustomize", FileInformation::default());
        let err = renderer
            .render_one(Path::new("."), &deck, &environment(""))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::UnsupportedDeck(_)));
    }

    #[tokio::test]
    async fn test_missing_helm_binary_fails_the_pair() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "api/Chart.yaml", "name: api\n");
        let renderer = HelmRenderer::new(Some(dir.path().join("no-helm")), "release");
        let deck = DeckData::new("api", "", "api", HELM_DECK, FileInformation::default());

        let err = renderer
            .render_one(dir.path(), &deck, &environment(""))
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::Io(_)));
    }
}
