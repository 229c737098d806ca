// Core domain types shared between the reconciler, the API client, and the
// change processor.

use serde::{Deserialize, Serialize};

/// Whether a remote document is a legacy `doc` or the current `docx` type.
/// The engine treats both as documents but must dispatch delete/create calls
/// to the matching endpoint family.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Doc,
    Docx,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            FileType::Doc => "doc",
            FileType::Docx => "docx",
        }
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node in the wiki tree, as produced by the wiki walker (C4). Every node
/// with `obj_type` in `{doc, docx}` is a document; other object types (e.g.
/// plain folders) are traversed but never surfaced as documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WikiNode {
    pub node_token: String,
    pub document_id: String,
    pub title: String,
    pub obj_type: FileType,
    pub has_child: bool,
}

/// A raw child-listing entry before its `obj_type` has been narrowed to a
/// document type. `obj_type` is `None` for non-document nodes (plain
/// folders, shortcuts): the walker still descends into them via `has_child`,
/// it just never reports them as documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawWikiNode {
    pub node_token: String,
    pub document_id: String,
    pub title: String,
    pub obj_type: Option<FileType>,
    pub has_child: bool,
}

impl RawWikiNode {
    /// Narrow to a document-bearing [`WikiNode`] if `obj_type` is `doc`/`docx`.
    pub fn into_document(self) -> Option<WikiNode> {
        let obj_type = self.obj_type?;
        Some(WikiNode {
            node_token: self.node_token,
            document_id: self.document_id,
            title: self.title,
            obj_type,
            has_child: self.has_child,
        })
    }
}

/// A remote document augmented with freshly fetched metadata, as produced
/// during a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDocument {
    pub document_id: String,
    pub node_token: String,
    pub title: String,
    pub revision_id: Option<String>,
    pub file_type: FileType,
}

/// A local Markdown file discovered by the local walker (C5), with its
/// content hash computed at enumeration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFileInfo {
    /// Absolute path on disk.
    pub full_path: std::path::PathBuf,
    /// POSIX-style path relative to `rootDir`.
    pub rel_path: String,
    /// Lowercase hex SHA-256 of the file's current content.
    pub hash: String,
}

/// Outcome counters for a single reconciliation pass (C6), also used by the
/// change processor (C7) to report single-document action results.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileCounts {
    pub downloaded: u32,
    pub uploaded: u32,
    pub deleted_local: u32,
    pub deleted_remote: u32,
    pub conflicts: u32,
    pub skipped: u32,
}

impl ReconcileCounts {
    pub fn total(&self) -> u32 {
        self.downloaded
            + self.uploaded
            + self.deleted_local
            + self.deleted_remote
            + self.conflicts
            + self.skipped
    }

    pub fn is_quiescent(&self) -> bool {
        self.downloaded == 0
            && self.uploaded == 0
            && self.deleted_local == 0
            && self.deleted_remote == 0
            && self.conflicts == 0
    }
}

/// The per-document decision a reconciliation pass made, reported alongside
/// the aggregate counters so callers (tests, CLI output) can inspect what
/// happened to a specific document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocOutcome {
    Downloaded { document_id: String, file: String },
    Uploaded { document_id: String, file: String },
    DeletedLocal { document_id: String, file: String },
    DeletedRemote { document_id: String, file: String },
    Conflict { document_id: String, file: String, conflict_file: String },
    Skipped { document_id: String, file: String },
}

/// Full result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub counts: ReconcileCounts,
    pub outcomes: Vec<DocOutcome>,
}
