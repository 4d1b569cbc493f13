use std::collections::BTreeMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;

use crate::config::OutputConfig;
use crate::kubernetes::resource::Snapshot;
use crate::{Error, Result};

const DIR_MODE: u32 = 0o755;
const DEFAULT_FILE_MODE: u32 = 0o644;

/// Materializes resource payloads under the configured base folder.
#[derive(Debug, Clone)]
pub struct FileSink {
    folder: PathBuf,
    folder_annotation: String,
    unique_filenames: bool,
    default_file_mode: String,
}

impl FileSink {
    pub fn new(cfg: &OutputConfig) -> Self {
        Self {
            folder: cfg.folder.clone(),
            folder_annotation: cfg.folder_annotation.clone(),
            unique_filenames: cfg.unique_filenames,
            default_file_mode: cfg.default_file_mode.clone(),
        }
    }

    /// Resolves the path for one payload key. Pure: the result depends
    /// only on the sink configuration and the arguments.
    pub fn resolve_path(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
        annotations: &BTreeMap<String, String>,
    ) -> PathBuf {
        let base = match annotations.get(&self.folder_annotation) {
            Some(target) => {
                let target = Path::new(target);
                if target.is_absolute() {
                    target.to_path_buf()
                } else {
                    self.folder.join(target)
                }
            }
            None => self.folder.clone(),
        };
        if self.unique_filenames {
            base.join(namespace).join(format!("{name}-{key}"))
        } else {
            base.join(namespace).join(name).join(key)
        }
    }

    /// Writes one payload entry: parents created with mode 0755, content
    /// written to a temporary sibling and renamed into place so readers
    /// never observe a torn file.
    pub async fn write(&self, snapshot: &Snapshot, key: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.resolve_path(
            &snapshot.id.namespace,
            &snapshot.id.name,
            key,
            &snapshot.annotations,
        );
        let mode = self.file_mode()?;

        let parent = path.parent().unwrap_or_else(|| Path::new("/"));
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true).mode(DIR_MODE);
        builder.create(parent).await?;

        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or(key);
        let tmp = parent.join(format!(".{file_name}.tmp"));
        fs::write(&tmp, bytes).await?;
        fs::set_permissions(&tmp, std::fs::Permissions::from_mode(mode)).await?;
        fs::rename(&tmp, &path).await?;

        Ok(path)
    }

    /// Octal mode string from configuration, parsed at write time.
    fn file_mode(&self) -> Result<u32> {
        if self.default_file_mode.is_empty() {
            return Ok(DEFAULT_FILE_MODE);
        }
        u32::from_str_radix(&self.default_file_mode, 8).map_err(|source| Error::FileMode {
            mode: self.default_file_mode.clone(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::resource::{ResourceId, ResourceKind};
    use tempfile::TempDir;

    fn sink(folder: &Path, unique: bool, mode: &str) -> FileSink {
        FileSink {
            folder: folder.to_path_buf(),
            folder_annotation: "k8s-sidecar-target-directory".into(),
            unique_filenames: unique,
            default_file_mode: mode.into(),
        }
    }

    fn make_snapshot(annotations: &[(&str, &str)]) -> Snapshot {
        Snapshot {
            id: ResourceId {
                kind: ResourceKind::ConfigMap,
                namespace: "default".into(),
                name: "cfg".into(),
            },
            resource_version: "1".into(),
            payload: BTreeMap::new(),
            labels: BTreeMap::new(),
            annotations: annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_resolve_path_nested_layout() {
        let sink = sink(Path::new("/data"), false, "644");
        assert_eq!(
            sink.resolve_path("default", "cfg", "a.txt", &BTreeMap::new()),
            PathBuf::from("/data/default/cfg/a.txt")
        );
    }

    #[test]
    fn test_resolve_path_unique_filenames() {
        let sink = sink(Path::new("/data"), true, "644");
        assert_eq!(
            sink.resolve_path("default", "cfg", "a.txt", &BTreeMap::new()),
            PathBuf::from("/data/default/cfg-a.txt")
        );
    }

    #[test]
    fn test_absolute_annotation_replaces_base() {
        let sink = sink(Path::new("/data"), false, "644");
        let snapshot = make_snapshot(&[("k8s-sidecar-target-directory", "/other")]);
        assert_eq!(
            sink.resolve_path("default", "cfg", "a.txt", &snapshot.annotations),
            PathBuf::from("/other/default/cfg/a.txt")
        );
    }

    #[test]
    fn test_relative_annotation_joins_base() {
        let sink = sink(Path::new("/data"), false, "644");
        let snapshot = make_snapshot(&[("k8s-sidecar-target-directory", "sub/dir")]);
        assert_eq!(
            sink.resolve_path("default", "cfg", "a.txt", &snapshot.annotations),
            PathBuf::from("/data/sub/dir/default/cfg/a.txt")
        );
    }

    #[tokio::test]
    async fn test_write_roundtrip_and_default_mode() {
        let dir = TempDir::new().expect("tempdir");
        let sink = sink(dir.path(), false, "644");
        let snapshot = make_snapshot(&[]);

        let path = sink.write(&snapshot, "a.txt", b"hello").await.expect("write");
        assert_eq!(path, dir.path().join("default/cfg/a.txt"));
        assert_eq!(std::fs::read(&path).expect("read back"), b"hello");

        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[tokio::test]
    async fn test_write_applies_configured_mode() {
        let dir = TempDir::new().expect("tempdir");
        let sink = sink(dir.path(), false, "440");
        let snapshot = make_snapshot(&[]);

        let path = sink.write(&snapshot, "a.txt", b"x").await.expect("write");
        let mode = std::fs::metadata(&path).expect("metadata").permissions().mode();
        assert_eq!(mode & 0o777, 0o440);
    }

    #[tokio::test]
    async fn test_invalid_mode_surfaces_at_write_time() {
        let dir = TempDir::new().expect("tempdir");
        let sink = sink(dir.path(), false, "not-octal");
        let snapshot = make_snapshot(&[]);

        match sink.write(&snapshot, "a.txt", b"x").await {
            Err(Error::FileMode { mode, .. }) => assert_eq!(mode, "not-octal"),
            other => panic!("expected file mode error, got {other:?}"),
        }
        assert!(!dir.path().join("default/cfg/a.txt").exists());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content_without_leftovers() {
        let dir = TempDir::new().expect("tempdir");
        let sink = sink(dir.path(), false, "644");
        let snapshot = make_snapshot(&[]);

        sink.write(&snapshot, "a.txt", b"first").await.expect("write");
        let path = sink.write(&snapshot, "a.txt", b"second").await.expect("rewrite");
        assert_eq!(std::fs::read(&path).expect("read back"), b"second");

        let leftovers: Vec<_> = std::fs::read_dir(path.parent().expect("parent"))
            .expect("read dir")
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
