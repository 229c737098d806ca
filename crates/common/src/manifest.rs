// The manifest data model: the persisted record of every paired document.
//
// This module defines the shape only. Crash-safe reading and writing lives
// in the daemon crate, which has access to the owner-only-permission and
// atomic-rename helpers; this crate stays free of filesystem concerns so it
// can be exercised with plain in-memory property tests.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::FileType;

pub const MANIFEST_FILE_NAME: &str = ".feishu-sync.json";

/// One paired document: a local file, a remote document, and the
/// last-observed state both sides agreed on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    /// POSIX-style path relative to `rootDir`, unique across entries.
    pub file: String,
    /// Last-observed server revision. `None` before the first successful
    /// sync of a document created from a local file.
    pub revision_id: Option<String>,
    /// Last-known server title.
    pub title: String,
    pub file_type: FileType,
    /// SHA-256 (lowercase hex) of the Markdown content last known to match
    /// the server.
    pub hash: String,
}

/// The full paired-state map, persisted at `<rootDir>/.feishu-sync.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub space_id: String,
    pub updated_at: DateTime<Utc>,
    pub docs: BTreeMap<String, ManifestEntry>,
}

impl Manifest {
    /// A fresh manifest for a space, with no paired documents yet.
    pub fn empty(space_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self { space_id: space_id.into(), updated_at: now, docs: BTreeMap::new() }
    }

    /// All `file` paths currently referenced by the manifest, independent of
    /// whether the file actually exists on disk. Used to compute collision
    /// candidates for desired-filename generation.
    pub fn used_paths(&self) -> std::collections::HashSet<String> {
        self.docs.values().map(|entry| entry.file.clone()).collect()
    }

    /// Look up the manifest entry for a document id, if paired.
    pub fn entry(&self, document_id: &str) -> Option<&ManifestEntry> {
        self.docs.get(document_id)
    }

    /// Find the document id paired to a given relative file path, if any.
    pub fn document_id_for_file(&self, file: &str) -> Option<&str> {
        self.docs
            .iter()
            .find(|(_, entry)| entry.file == file)
            .map(|(document_id, _)| document_id.as_str())
    }

    /// Every `file` value in the manifest is pairwise distinct.
    pub fn has_unique_files(&self) -> bool {
        let mut seen = std::collections::HashSet::with_capacity(self.docs.len());
        self.docs.values().all(|entry| seen.insert(entry.file.as_str()))
    }
}
