//! Deck discovery inside a checked out repository

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{DeckData, ParseError};
use crate::domain::{FileInfo, FileInformation};

pub const HELM_DECK: &str = "helm";
pub const PLAIN_DECK: &str = "plain";

const CHART_FILE: &str = "Chart.yaml";

/// Directories inside a chart that are not part of its file information
const CHART_INTERNAL_DIRS: [&str; 2] = ["templates", "charts"];

#[derive(Debug, Deserialize)]
struct ChartMetadata {
    name: String,
    #[serde(default)]
    description: Option<String>,
}

/// Walk `root` and describe every deck found below it, in path order
pub fn discover_decks(root: &Path) -> Result<Vec<DeckData>, ParseError> {
    let mut decks = Vec::new();
    visit(root, root, &mut decks)?;
    Ok(decks)
}

fn visit(root: &Path, dir: &Path, decks: &mut Vec<DeckData>) -> Result<(), ParseError> {
    let chart_file = dir.join(CHART_FILE);
    if is_regular_file(&chart_file) {
        decks.push(helm_deck(root, dir, &chart_file)?);
        // Subcharts belong to their parent chart
        return Ok(());
    }

    if contains_manifests(dir)? {
        decks.push(plain_deck(root, dir)?);
    }

    for child in sorted_entries(dir)? {
        if child.is_dir() && !is_hidden(&child) {
            visit(root, &child, decks)?;
        }
    }

    Ok(())
}

fn helm_deck(root: &Path, dir: &Path, chart_file: &Path) -> Result<DeckData, ParseError> {
    let raw = fs::read_to_string(chart_file).map_err(|e| io_error(chart_file, e))?;
    let chart: ChartMetadata = serde_yaml::from_str(&raw).map_err(|e| {
        ParseError::Parsing(format!("Invalid {}: {}", chart_file.display(), e))
    })?;

    Ok(DeckData::new(
        chart.name,
        chart.description.unwrap_or_default(),
        relative_dir(root, dir),
        HELM_DECK,
        file_information(dir)?,
    ))
}

fn plain_deck(root: &Path, dir: &Path) -> Result<DeckData, ParseError> {
    let title = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());

    Ok(DeckData::new(
        title,
        String::new(),
        relative_dir(root, dir),
        PLAIN_DECK,
        file_information(dir)?,
    ))
}

/// Whether `dir` directly holds a YAML document with a top-level `kind`
fn contains_manifests(dir: &Path) -> Result<bool, ParseError> {
    for entry in sorted_entries(dir)? {
        if !entry.is_file() || !is_yaml(&entry) {
            continue;
        }
        let Ok(raw) = fs::read_to_string(&entry) else {
            continue;
        };
        let has_kind = serde_yaml::Deserializer::from_str(&raw).any(|document| {
            serde_yaml::Value::deserialize(document)
                .map(|value| value.get("kind").is_some())
                .unwrap_or(false)
        });
        if has_kind {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Files and directories of a deck, relative and sorted
pub fn file_information(deck_dir: &Path) -> Result<FileInformation, ParseError> {
    let mut information = Vec::new();
    collect_files(deck_dir, deck_dir, &mut information)?;
    information.sort_by(|a: &FileInfo, b: &FileInfo| a.path.cmp(&b.path));
    Ok(FileInformation::new(information))
}

fn collect_files(
    deck_dir: &Path,
    dir: &Path,
    information: &mut Vec<FileInfo>,
) -> Result<(), ParseError> {
    for entry in sorted_entries(dir)? {
        if is_hidden(&entry) {
            continue;
        }
        let relative = relative_path(deck_dir, &entry);

        if entry.is_dir() {
            if dir == deck_dir && CHART_INTERNAL_DIRS.contains(&relative.as_str()) {
                continue;
            }
            information.push(FileInfo::new(relative, false));
            collect_files(deck_dir, &entry, information)?;
        } else {
            information.push(FileInfo::new(relative, is_encrypted(&entry)));
        }
    }
    Ok(())
}

/// SOPS encrypted YAML carries its metadata under a top-level `sops` key
fn is_encrypted(path: &Path) -> bool {
    if !is_yaml(path) {
        return false;
    }
    fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_yaml::from_str::<serde_yaml::Value>(&raw).ok())
        .map(|value| value.get("sops").is_some())
        .unwrap_or(false)
}

pub(crate) fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("yaml") | Some("yml")
    )
}

/// A regular file, not reached through a symlink
pub(crate) fn is_regular_file(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|metadata| metadata.file_type().is_file())
        .unwrap_or(false)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

/// Entries of `dir` sorted by name. Symlinks are left out so nothing outside
/// the checkout is ever read.
pub(crate) fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, ParseError> {
    let mut entries = fs::read_dir(dir)
        .map_err(|e| io_error(dir, e))?
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .file_type()
                .map(|file_type| !file_type.is_symlink())
                .unwrap_or(false)
        })
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();
    Ok(entries)
}

fn relative_dir(root: &Path, dir: &Path) -> String {
    let relative = relative_path(root, dir);
    if relative.is_empty() {
        ".".to_string()
    } else {
        relative
    }
}

fn relative_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

fn io_error(path: &Path, error: std::io::Error) -> ParseError {
    ParseError::Parsing(format!("Cannot read {}: {}", path.display(), error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, path: &str, content: &str) {
        let full = root.join(path);
        fs::create_dir_all(full.parent().unwrap()).unwrap();
        fs::write(full, content).unwrap();
    }

    #[test]
    fn test_discovers_helm_and_plain_decks() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "README.md", "# charts");
        write(
            root,
            "charts/api/Chart.yaml",
            "apiVersion: v2\nname: api\ndescription: The API\n",
        );
        write(root, "charts/api/values.yaml", "replicas: 1\n");
        write(root, "charts/api/templates/deployment.yaml", "kind: Deployment\n");
        write(root, "charts/api/charts/redis/Chart.yaml", "name: redis\n");
        write(
            root,
            "manifests/web/deployment.yaml",
            "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n",
        );

        let decks = discover_decks(root).unwrap();
        assert_eq!(decks.len(), 2);

        let api = &decks[0];
        assert_eq!(api.title, "api");
        assert_eq!(api.description, "The API");
        assert_eq!(api.dir_path, "charts/api");
        assert_eq!(api.deck_type, HELM_DECK);
        let paths: Vec<&str> = api.file_information.paths().collect();
        assert_eq!(paths, vec!["Chart.yaml", "values.yaml"]);

        let web = &decks[1];
        assert_eq!(web.title, "web");
        assert_eq!(web.dir_path, "manifests/web");
        assert_eq!(web.deck_type, PLAIN_DECK);
    }

    #[test]
    fn test_root_chart_uses_dot_dir_path() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Chart.yaml", "name: root\n");

        let decks = discover_decks(dir.path()).unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].dir_path, ".");
    }

    #[test]
    fn test_file_information_flags_sops_files_and_lists_dirs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "Chart.yaml", "name: app\n");
        write(root, "env/local.yaml", "password: ENC[abc]\nsops:\n  version: 3.7.0\n");
        write(root, "env/remote.yaml", "password: plain\n");

        let info = file_information(root).unwrap();
        let paths: Vec<&str> = info.paths().collect();
        assert_eq!(
            paths,
            vec!["Chart.yaml", "env", "env/local.yaml", "env/remote.yaml"]
        );
        let local = info
            .information
            .iter()
            .find(|f| f.path == "env/local.yaml")
            .unwrap();
        assert!(local.encrypted);
        assert!(!info.information.iter().any(|f| f.path == "env/remote.yaml" && f.encrypted));
    }

    #[test]
    fn test_invalid_chart_is_a_parsing_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "Chart.yaml", "description: no name here\n");

        let err = discover_decks(dir.path()).unwrap_err();
        assert!(matches!(err, ParseError::Parsing(_)));
    }

    #[test]
    fn test_hidden_directories_are_skipped() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), ".github/workflows/ci.yaml", "kind: Workflow\n");

        assert!(discover_decks(dir.path()).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        use std::os::unix::fs::symlink;

        let outside = TempDir::new().unwrap();
        write(outside.path(), "secret.yaml", "kind: Secret\nmetadata:\n  name: host\n");
        write(outside.path(), "Chart.yaml", "name: borrowed\n");

        let dir = TempDir::new().unwrap();
        let root = dir.path();
        write(root, "charts/api/Chart.yaml", "name: api\n");
        write(root, "charts/api/values.yaml", "replicas: 1\n");
        symlink(outside.path(), root.join("linked")).unwrap();
        symlink(outside.path().join("secret.yaml"), root.join("charts/api/secret.yaml")).unwrap();
        fs::create_dir_all(root.join("other")).unwrap();
        symlink(outside.path().join("Chart.yaml"), root.join("other/Chart.yaml")).unwrap();

        let decks = discover_decks(root).unwrap();
        assert_eq!(decks.len(), 1);
        assert_eq!(decks[0].title, "api");
        let paths: Vec<&str> = decks[0].file_information.paths().collect();
        assert_eq!(paths, vec!["Chart.yaml", "values.yaml"]);
    }
}
