// The reconciler (C6): a one-shot bidirectional sync pass. This is the
// decision core of the whole system — everything else either invokes it
// wholesale (startup, the poller's fallback path) or mirrors one branch of
// its state machine for a single document (the change processor, C7).
//
// See SPEC_FULL.md §4.6 for the state machine this function implements.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use feishu_sync_common::domain::{
    DocOutcome, FileType, LocalFileInfo, ReconcileReport, RemoteDocument,
};
use feishu_sync_common::manifest::{Manifest, ManifestEntry};
use feishu_sync_common::path::{sanitize_title_for_filename, unique_markdown_path};

use crate::client::{to_remote_document, ApiClient, HttpTransport};
use crate::manifest_store::ManifestStore;
use crate::sync_ops::{create_document_from_markdown, fetch_markdown, replace_document_content};
use crate::walker::local::{sha256_hex, walk_local_files};
use crate::walker::wiki::walk_wiki_space;

/// Run one full reconciliation pass and persist the resulting manifest.
///
/// `reason` is carried only for logging (e.g. `"startup"`, `"poller"`,
/// `"fallback"`) so operators can tell why a pass ran.
pub async fn reconcile<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    space_id: &str,
    root_dir: &Path,
    store: &ManifestStore,
    reason: &str,
) -> Result<ReconcileReport> {
    tracing::info!(reason, root = %root_dir.display(), "starting reconciliation pass");

    let mut manifest = store.load().context("failed to load manifest")?.unwrap_or_else(|| {
        Manifest::empty(space_id, Utc::now())
    });
    if manifest.space_id != space_id {
        tracing::warn!(
            previous_space = %manifest.space_id,
            configured_space = space_id,
            "manifest space id mismatch, starting a fresh manifest"
        );
        manifest = Manifest::empty(space_id, Utc::now());
    }

    let local_files =
        walk_local_files(root_dir).with_context(|| format!("failed to walk `{}`", root_dir.display()))?;
    let mut local_map: HashMap<String, LocalFileInfo> =
        local_files.into_iter().map(|info| (info.rel_path.clone(), info)).collect();

    let wiki_nodes =
        walk_wiki_space(client, token, space_id).await.context("failed to enumerate wiki nodes")?;
    let mut remote_map: HashMap<String, RemoteDocument> = HashMap::with_capacity(wiki_nodes.len());
    for node in &wiki_nodes {
        let meta = client
            .get_document(token, &node.document_id)
            .await
            .with_context(|| format!("failed to fetch metadata for document `{}`", node.document_id))?;
        remote_map.insert(node.document_id.clone(), to_remote_document(node, meta));
    }

    let mut used_paths: HashSet<String> = manifest.used_paths();
    used_paths.extend(local_map.keys().cloned());

    let mut report = ReconcileReport::default();

    let mut document_ids: Vec<String> = remote_map.keys().cloned().collect();
    document_ids.sort();

    for document_id in &document_ids {
        reconcile_remote_document(
            client,
            token,
            root_dir,
            &mut manifest,
            &mut local_map,
            &mut used_paths,
            &remote_map[document_id],
            &mut report,
        )
        .await
        .with_context(|| format!("failed to reconcile document `{document_id}`"))?;
    }

    // Every manifest entry whose document no longer exists remotely: the
    // server side was deleted (or trashed), so the local copy follows.
    let orphaned: Vec<String> =
        manifest.docs.keys().filter(|id| !remote_map.contains_key(*id)).cloned().collect();
    for document_id in orphaned {
        let entry = manifest.docs.remove(&document_id).expect("key just observed present");
        let full_path = root_dir.join(&entry.file);
        if full_path.exists() {
            fs::remove_file(&full_path)
                .with_context(|| format!("failed to delete local file `{}`", full_path.display()))?;
        }
        used_paths.remove(&entry.file);
        local_map.remove(&entry.file);
        report.counts.deleted_local += 1;
        report.outcomes.push(DocOutcome::DeletedLocal { document_id, file: entry.file });
    }

    // Every local file with no manifest pairing is a new document to create.
    let paired_files: HashSet<String> = manifest.used_paths();
    let mut unpaired: Vec<String> =
        local_map.keys().filter(|file| !paired_files.contains(*file)).cloned().collect();
    unpaired.sort();
    for file_rel in unpaired {
        create_remote_from_local(
            client,
            token,
            space_id,
            root_dir,
            &mut manifest,
            &local_map[&file_rel],
            &mut report,
        )
        .await
        .with_context(|| format!("failed to create remote document for `{file_rel}`"))?;
    }

    manifest.space_id = space_id.to_string();
    store.save(&manifest).context("failed to persist manifest")?;

    tracing::info!(
        reason,
        downloaded = report.counts.downloaded,
        uploaded = report.counts.uploaded,
        deleted_local = report.counts.deleted_local,
        deleted_remote = report.counts.deleted_remote,
        conflicts = report.counts.conflicts,
        skipped = report.counts.skipped,
        "reconciliation pass complete"
    );

    Ok(report)
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_remote_document<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    root_dir: &Path,
    manifest: &mut Manifest,
    local_map: &mut HashMap<String, LocalFileInfo>,
    used_paths: &mut HashSet<String>,
    doc: &RemoteDocument,
    report: &mut ReconcileReport,
) -> Result<()> {
    let document_id = &doc.document_id;
    let stem = sanitize_title_for_filename(&doc.title, document_id);

    let current_file = manifest.docs.get(document_id).map(|entry| entry.file.clone());
    let collision_candidates: HashSet<String> = match &current_file {
        Some(current) => used_paths.iter().filter(|path| *path != current).cloned().collect(),
        None => used_paths.clone(),
    };
    let desired_rel = unique_markdown_path(&stem, &collision_candidates);

    if current_file.is_none() {
        // Fresh pairing: nothing to compare against yet, just download.
        let markdown = fetch_markdown(client, token, document_id, &doc.title).await?;
        let full_path = root_dir.join(&desired_rel);
        write_file_creating_parents(&full_path, &markdown)?;
        let hash = sha256_hex(markdown.as_bytes());

        used_paths.insert(desired_rel.clone());
        local_map.insert(
            desired_rel.clone(),
            LocalFileInfo { full_path, rel_path: desired_rel.clone(), hash: hash.clone() },
        );
        manifest.docs.insert(
            document_id.clone(),
            ManifestEntry {
                file: desired_rel.clone(),
                revision_id: doc.revision_id.clone(),
                title: doc.title.clone(),
                file_type: doc.file_type,
                hash,
            },
        );
        report.counts.downloaded += 1;
        report.outcomes.push(DocOutcome::Downloaded { document_id: document_id.clone(), file: desired_rel });
        return Ok(());
    }

    // Rename-follows-title happens before any change detection so a pure
    // title change never looks like a spurious local edit.
    rename_paired_file(root_dir, manifest, local_map, used_paths, document_id, &desired_rel)?;

    let file_rel = manifest.docs[document_id].file.clone();
    let local_info = local_map.get(&file_rel).cloned();

    let Some(local_info) = local_info else {
        // The user deleted the local file since the last pass.
        let file_type = manifest.docs[document_id].file_type;
        client.delete_document(token, document_id, file_type).await?;
        manifest.docs.remove(document_id);
        used_paths.remove(&file_rel);
        report.counts.deleted_remote += 1;
        report.outcomes.push(DocOutcome::DeletedRemote { document_id: document_id.clone(), file: file_rel });
        return Ok(());
    };

    let entry = manifest.docs[document_id].clone();
    let local_changed = entry.hash != local_info.hash;
    let remote_changed = match (&entry.revision_id, &doc.revision_id) {
        (Some(a), Some(b)) => a != b,
        _ => false,
    };

    match (local_changed, remote_changed) {
        (true, true) => {
            let markdown = fetch_markdown(client, token, document_id, &doc.title).await?;
            let conflict_rel = conflict_path_for(&file_rel);
            write_file_creating_parents(&root_dir.join(&conflict_rel), &markdown)?;

            let entry = manifest.docs.get_mut(document_id).expect("entry known present");
            entry.title = doc.title.clone();
            entry.file_type = doc.file_type;

            report.counts.conflicts += 1;
            report.outcomes.push(DocOutcome::Conflict {
                document_id: document_id.clone(),
                file: file_rel,
                conflict_file: conflict_rel,
            });
        }
        (false, true) => {
            let markdown = fetch_markdown(client, token, document_id, &doc.title).await?;
            write_file_creating_parents(&root_dir.join(&file_rel), &markdown)?;
            let hash = sha256_hex(markdown.as_bytes());

            let entry = manifest.docs.get_mut(document_id).expect("entry known present");
            entry.revision_id = doc.revision_id.clone();
            entry.title = doc.title.clone();
            entry.file_type = doc.file_type;
            entry.hash = hash.clone();
            if let Some(info) = local_map.get_mut(&file_rel) {
                info.hash = hash;
            }

            report.counts.downloaded += 1;
            report.outcomes.push(DocOutcome::Downloaded { document_id: document_id.clone(), file: file_rel });
        }
        (true, false) => {
            let markdown = fs::read_to_string(&local_info.full_path)
                .with_context(|| format!("failed to read `{}`", local_info.full_path.display()))?;
            replace_document_content(client, token, document_id, &markdown).await?;
            let fresh_meta = client.get_document(token, document_id).await?;

            let entry = manifest.docs.get_mut(document_id).expect("entry known present");
            entry.revision_id = fresh_meta.revision_id;
            entry.title = fresh_meta.title;
            entry.hash = local_info.hash.clone();

            report.counts.uploaded += 1;
            report.outcomes.push(DocOutcome::Uploaded { document_id: document_id.clone(), file: file_rel });
        }
        (false, false) => {
            let entry = manifest.docs.get_mut(document_id).expect("entry known present");
            entry.title = doc.title.clone();
            entry.revision_id = doc.revision_id.clone();
            entry.file_type = doc.file_type;

            report.counts.skipped += 1;
            report.outcomes.push(DocOutcome::Skipped { document_id: document_id.clone(), file: file_rel });
        }
    }

    Ok(())
}

fn rename_paired_file(
    root_dir: &Path,
    manifest: &mut Manifest,
    local_map: &mut HashMap<String, LocalFileInfo>,
    used_paths: &mut HashSet<String>,
    document_id: &str,
    desired_rel: &str,
) -> Result<()> {
    let entry = manifest.docs.get_mut(document_id).expect("caller guarantees entry exists");
    if entry.file == desired_rel {
        return Ok(());
    }

    let old_rel = entry.file.clone();
    let old_full = root_dir.join(&old_rel);
    let new_full = root_dir.join(desired_rel);

    if old_full.exists() {
        if let Some(parent) = new_full.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory `{}`", parent.display()))?;
        }
        fs::rename(&old_full, &new_full)
            .with_context(|| format!("failed to rename `{}` to `{}`", old_full.display(), new_full.display()))?;
        if let Some(mut info) = local_map.remove(&old_rel) {
            info.full_path = new_full;
            info.rel_path = desired_rel.to_string();
            local_map.insert(desired_rel.to_string(), info);
        }
    }

    used_paths.remove(&old_rel);
    used_paths.insert(desired_rel.to_string());
    entry.file = desired_rel.to_string();
    Ok(())
}

async fn create_remote_from_local<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    space_id: &str,
    root_dir: &Path,
    manifest: &mut Manifest,
    local_info: &LocalFileInfo,
    report: &mut ReconcileReport,
) -> Result<()> {
    let markdown = fs::read_to_string(&local_info.full_path)
        .with_context(|| format!("failed to read `{}`", local_info.full_path.display()))?;

    let document_id = create_document_from_markdown(client, token, &markdown).await?;
    client.move_docs_to_wiki(token, space_id, FileType::Docx, &document_id).await?;
    let meta = client.get_document(token, &document_id).await?;

    manifest.docs.insert(
        document_id.clone(),
        ManifestEntry {
            file: local_info.rel_path.clone(),
            revision_id: meta.revision_id,
            title: meta.title,
            file_type: FileType::Docx,
            hash: local_info.hash.clone(),
        },
    );

    let _ = root_dir; // kept for symmetry with sibling helpers; no write needed here.
    report.counts.uploaded += 1;
    report.outcomes.push(DocOutcome::Uploaded { document_id, file: local_info.rel_path.clone() });
    Ok(())
}

/// Turns `notes/hello.md` into `notes/hello.remote.md`.
fn conflict_path_for(file_rel: &str) -> String {
    match file_rel.strip_suffix(".md") {
        Some(stem) => format!("{stem}.remote.md"),
        None => format!("{file_rel}.remote.md"),
    }
}

fn write_file_creating_parents(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory `{}`", parent.display()))?;
    }
    fs::write(path, contents).with_context(|| format!("failed to write `{}`", path.display()))
}
