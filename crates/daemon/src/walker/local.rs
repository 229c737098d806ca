// Local walker & hasher (C5): depth-first traversal of `rootDir`, skipping
// `.git`, `node_modules`, the manifest file, and conflict artifacts
// (`*.remote.md`). Every surviving Markdown file is hashed.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use feishu_sync_common::domain::LocalFileInfo;
use feishu_sync_common::manifest::MANIFEST_FILE_NAME;
use sha2::{Digest, Sha256};

const REMOTE_CONFLICT_SUFFIX: &str = ".remote.md";
const SKIPPED_DIR_NAMES: [&str; 2] = [".git", "node_modules"];

pub type ContentHash = String;

pub fn sha256_hex(content: &[u8]) -> ContentHash {
    let digest = Sha256::digest(content);
    hex_encode(&digest)
}

pub fn hash_file(path: &Path) -> Result<ContentHash> {
    let content = std::fs::read(path)
        .with_context(|| format!("failed to read file for hashing: {}", path.display()))?;
    Ok(sha256_hex(&content))
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Whether a directory entry should be descended into.
fn is_skipped_dir(name: &str) -> bool {
    SKIPPED_DIR_NAMES.contains(&name)
}

/// Whether a file name is eligible to be paired: `.md` but not a conflict
/// artifact and not the manifest itself.
pub fn is_pairable_markdown(name: &str) -> bool {
    if name == MANIFEST_FILE_NAME {
        return false;
    }
    if name.ends_with(REMOTE_CONFLICT_SUFFIX) {
        return false;
    }
    name.to_ascii_lowercase().ends_with(".md")
}

/// Walk `root_dir` depth-first and return every pairable Markdown file with
/// its hash. `rel_path` always uses `/` separators.
pub fn walk_local_files(root_dir: &Path) -> Result<Vec<LocalFileInfo>> {
    let mut files = Vec::new();
    walk_dir(root_dir, root_dir, &mut files)?;
    Ok(files)
}

fn walk_dir(dir: &Path, root: &Path, out: &mut Vec<LocalFileInfo>) -> Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory `{}`", dir.display()))?;

    for entry in entries {
        let entry = entry.with_context(|| format!("failed to read an entry of `{}`", dir.display()))?;
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();

        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat `{}`", path.display()))?;

        if file_type.is_dir() {
            if is_skipped_dir(&name) {
                continue;
            }
            walk_dir(&path, root, out)?;
            continue;
        }

        if !file_type.is_file() || !is_pairable_markdown(&name) {
            continue;
        }

        let rel_path = relative_posix_path(root, &path)?;
        let hash = hash_file(&path)?;
        out.push(LocalFileInfo { full_path: path, rel_path, hash });
    }

    Ok(())
}

fn relative_posix_path(root: &Path, path: &Path) -> Result<String> {
    let relative = path
        .strip_prefix(root)
        .with_context(|| format!("`{}` is not inside `{}`", path.display(), root.display()))?;
    let components: Vec<String> =
        relative.components().map(|component| component.as_os_str().to_string_lossy().into_owned()).collect();
    Ok(components.join("/"))
}
