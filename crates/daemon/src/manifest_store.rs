// Crash-safe persistence for the sync manifest: `<rootDir>/.feishu-sync.json`.
//
// Reads and writes are plain JSON; the pure data model lives in
// `feishu_sync_common::manifest`. Writes always go through a temp file in
// the same directory, fsync, then rename, so a crash mid-write can never
// leave a torn manifest on disk.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use chrono::Utc;
use feishu_sync_common::manifest::{Manifest, MANIFEST_FILE_NAME};

use crate::security::{ensure_owner_only_file, open_private_truncate};

#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(root_dir: impl AsRef<Path>) -> Self {
        Self { path: root_dir.as_ref().join(MANIFEST_FILE_NAME) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest. Returns `None` if it has never been written *or*
    /// if the contents are malformed — a corrupt manifest is never a hard
    /// failure, since reconciliation re-derives everything it needs from a
    /// fresh pass. Callers fall back to `Manifest::empty` in either case.
    pub fn load(&self) -> Result<Option<Manifest>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to read manifest `{}`", self.path.display()))
            }
        };

        match serde_json::from_str(&contents) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(error) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %error,
                    "manifest is not valid JSON, treating as absent"
                );
                Ok(None)
            }
        }
    }

    /// Atomically overwrite the manifest: refresh `updatedAt`, write to a
    /// sibling temp file, fsync, then rename over the target. Every caller
    /// gets the refreshed timestamp for free rather than having to remember
    /// to stamp it themselves.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create manifest directory `{}`", parent.display()))?;
        }

        let mut manifest = manifest.clone();
        manifest.updated_at = Utc::now();

        let encoded = serde_json::to_vec_pretty(&manifest).context("failed to serialize manifest")?;
        let tmp_path = self.temp_path();

        let mut file = open_private_truncate(&tmp_path)
            .with_context(|| format!("failed to open temp manifest `{}`", tmp_path.display()))?;
        file.write_all(&encoded).context("failed to write manifest contents")?;
        file.sync_data().context("failed to fsync manifest file")?;
        drop(file);

        fs::rename(&tmp_path, &self.path).with_context(|| {
            format!("failed to atomically move manifest `{}` into place", self.path.display())
        })?;
        ensure_owner_only_file(&self.path)?;

        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock should be after unix epoch")
            .as_nanos();
        self.path.with_extension(format!("json.tmp.{nonce}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use feishu_sync_common::domain::FileType;
    use feishu_sync_common::manifest::ManifestEntry;
    use tempfile::TempDir;

    #[test]
    fn load_missing_manifest_returns_none() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());

        let mut manifest = Manifest::empty("space1", Utc::now());
        manifest.docs.insert(
            "doc1".into(),
            ManifestEntry {
                file: "Notes.md".into(),
                revision_id: Some("r1".into()),
                title: "Notes".into(),
                file_type: FileType::Docx,
                hash: "abc123".into(),
            },
        );

        store.save(&manifest).unwrap();
        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.space_id, manifest.space_id);
        assert_eq!(loaded.docs, manifest.docs);
    }

    #[test]
    fn save_refreshes_updated_at_even_when_caller_passes_a_stale_one() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());

        let stale = Manifest::empty("space1", "2000-01-01T00:00:00Z".parse().unwrap());
        store.save(&stale).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert!(loaded.updated_at > stale.updated_at);
    }

    #[test]
    fn save_overwrites_previous_contents() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());

        let first = Manifest::empty("space1", Utc::now());
        store.save(&first).unwrap();

        let mut second = Manifest::empty("space2", Utc::now());
        second.docs.insert(
            "doc1".into(),
            ManifestEntry {
                file: "a.md".into(),
                revision_id: None,
                title: "A".into(),
                file_type: FileType::Doc,
                hash: "h".into(),
            },
        );
        store.save(&second).unwrap();

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.space_id, second.space_id);
        assert_eq!(loaded.docs, second.docs);
    }

    #[test]
    fn save_leaves_no_temp_files_behind() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        store.save(&Manifest::empty("space1", Utc::now())).unwrap();

        let leftover: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .filter(|name| name.contains(".tmp."))
            .collect();
        assert!(leftover.is_empty(), "unexpected temp files: {leftover:?}");
    }

    #[cfg(unix)]
    #[test]
    fn manifest_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        store.save(&Manifest::empty("space1", Utc::now())).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn corrupt_json_is_treated_as_absent_rather_than_an_error() {
        let dir = TempDir::new().unwrap();
        let store = ManifestStore::new(dir.path());
        fs::write(store.path(), b"{ not json").unwrap();
        assert!(store.load().unwrap().is_none());
    }
}
