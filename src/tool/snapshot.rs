//! Workspace listing before and after a call.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use tracing::debug;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "svg"];

/// File names present in the workspace at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Snapshot {
    names: BTreeSet<String>,
}

impl Snapshot {
    /// Lists the workspace. An unreadable directory yields an empty snapshot.
    pub fn take(workspace: &Path) -> Self {
        let names = match fs::read_dir(workspace) {
            Ok(entries) => entries
                .filter_map(Result::ok)
                .filter_map(|entry| entry.file_name().into_string().ok())
                .collect(),
            Err(e) => {
                debug!("Cannot list workspace {}: {}", workspace.display(), e);
                BTreeSet::new()
            }
        };
        Self { names }
    }

    /// Image files present now that were absent in `before`, sorted.
    pub fn new_images(&self, before: &Self) -> Vec<String> {
        self.names
            .difference(&before.names)
            .filter(|name| is_image(name))
            .cloned()
            .collect()
    }
}

/// True for file names with a recognised image extension.
pub(crate) fn is_image(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_new_images_only() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("old.png"), b"").unwrap();
        fs::write(dir.path().join("data.csv"), b"").unwrap();
        let before = Snapshot::take(dir.path());

        fs::write(dir.path().join("old.png"), b"rewritten").unwrap();
        fs::write(dir.path().join("plot.PNG"), b"").unwrap();
        fs::write(dir.path().join("chart.svg"), b"").unwrap();
        fs::write(dir.path().join("report.txt"), b"").unwrap();
        let after = Snapshot::take(dir.path());

        assert_eq!(after.new_images(&before), vec!["chart.svg", "plot.PNG"]);
    }

    #[test]
    fn test_missing_workspace_is_empty() {
        let dir = tempdir().unwrap();
        let snapshot = Snapshot::take(&dir.path().join("absent"));
        assert_eq!(snapshot, Snapshot::default());
    }

    #[test]
    fn test_is_image() {
        assert!(is_image("a.jpeg"));
        assert!(is_image("b.JPG"));
        assert!(!is_image("png"));
        assert!(!is_image("notes.md"));
    }
}
