//! Declarative-file loader.
//!
//! Accepts YAML or JSON documents (JSON is parsed through serde_yaml as a
//! YAML subset). A directory argument expands to its `*.yaml`, `*.yml` and
//! `*.json` entries, sorted by file name so that import order is stable.

use std::path::{Path, PathBuf};

use crate::error::{io_err, CoreError};
use crate::types::DesiredState;

const EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// A desired state together with the file it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedState {
    pub source: PathBuf,
    pub desired: DesiredState,
}

/// Parse one desired-state document.
///
/// Returns `CoreError::Parse` (with path + line context) for malformed input and
/// `CoreError::Invalid` when the document carries no realm name.
pub fn load_file(path: &Path) -> Result<LoadedState, CoreError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    let desired: DesiredState = serde_yaml::from_str(&contents).map_err(|e| CoreError::Parse {
        path: path.to_path_buf(),
        source: e,
    })?;
    if desired.target().as_str().trim().is_empty() {
        return Err(CoreError::Invalid {
            what: "desired state",
            path: path.to_path_buf(),
            reason: "missing `realm` name".to_string(),
        });
    }
    Ok(LoadedState {
        source: path.to_path_buf(),
        desired,
    })
}

/// Expand files and directories into the ordered list of documents to import.
pub fn load_paths(paths: &[PathBuf]) -> Result<Vec<LoadedState>, CoreError> {
    let mut loaded = Vec::new();
    for path in paths {
        if path.is_dir() {
            for file in list_documents(path)? {
                loaded.push(load_file(&file)?);
            }
        } else {
            loaded.push(load_file(path)?);
        }
    }
    Ok(loaded)
}

fn list_documents(dir: &Path) -> Result<Vec<PathBuf>, CoreError> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(|e| io_err(dir, e))?
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|e| e.path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXTENSIONS.contains(&ext))
        })
        .collect();
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn loads_json_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("realm.json");
        std::fs::write(&path, r#"{"realm":"acme","clients":[{"clientId":"c1"}]}"#).unwrap();

        let loaded = load_file(&path).unwrap();
        assert_eq!(loaded.desired.target().as_str(), "acme");
        assert_eq!(loaded.source, path);
    }

    #[test]
    fn missing_realm_is_invalid() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("realm.yaml");
        std::fs::write(&path, "enabled: true\n").unwrap();

        let err = load_file(&path).unwrap_err();
        assert!(matches!(err, CoreError::Invalid { .. }), "got: {err}");
        assert!(err.to_string().contains("realm"));
    }

    #[test]
    fn directory_expands_in_name_order_and_skips_other_files() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("02_b.yaml"), "realm: b\n").unwrap();
        std::fs::write(tmp.path().join("01_a.json"), r#"{"realm":"a"}"#).unwrap();
        std::fs::write(tmp.path().join("README.md"), "# not a realm").unwrap();

        let loaded = load_paths(&[tmp.path().to_path_buf()]).unwrap();
        let names: Vec<_> = loaded
            .iter()
            .map(|l| l.desired.target().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
