// Shared download/upload primitives for a single document. The reconciler
// (C6) and the change processor's single-document actions (C7) must behave
// identically for the same document, so there is exactly one implementation
// of "replace this document's content" and "fetch this document as
// Markdown" rather than one per caller.

use feishu_sync_common::markdown::{
    blocks_to_markdown, markdown_to_blocks, Block, DocumentMetadata, InlineSpan,
};
use serde_json::Value;

use crate::client::blocks::{block_to_json, json_to_block};
use crate::client::{ApiClient, ApiError, HttpTransport};

/// Fetch a document's blocks and render them to Markdown, prefixed with its
/// title per the codec's contract.
pub async fn fetch_markdown<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    document_id: &str,
    title: &str,
) -> Result<String, ApiError> {
    let raw_blocks = client.get_all_document_blocks(token, document_id).await?;
    let blocks: Vec<Block> = raw_blocks
        .iter()
        .filter(|value| value.get("block_id").and_then(Value::as_str) != Some(document_id))
        .map(json_to_block)
        .collect();
    let metadata = DocumentMetadata {
        title: if title.is_empty() { None } else { Some(title.to_string()) },
    };
    Ok(blocks_to_markdown(&metadata, &blocks))
}

/// Number of direct children currently under the document's root block, used
/// to size the delete-all-children call before a wholesale content replace.
fn root_child_count(blocks: &[Value], document_id: &str) -> usize {
    blocks
        .iter()
        .find(|value| value.get("block_id").and_then(Value::as_str) == Some(document_id))
        .and_then(|value| value.get("children"))
        .and_then(Value::as_array)
        .map(Vec::len)
        .unwrap_or_else(|| blocks.len().saturating_sub(1))
}

/// Replace a document's content wholesale: delete every existing child, then
/// append the blocks parsed from `markdown`. Used both by the reconciler's
/// "only local changed" branch and by the change processor's single-document
/// upload.
pub async fn replace_document_content<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    document_id: &str,
    markdown: &str,
) -> Result<(), ApiError> {
    let existing = client.get_all_document_blocks(token, document_id).await?;
    let existing_count = root_child_count(&existing, document_id);
    if existing_count > 0 {
        client.delete_all_children(token, document_id, document_id, existing_count).await?;
    }

    let parsed = markdown_to_blocks(markdown);
    append_blocks(client, token, document_id, &parsed.blocks).await
}

/// Append `blocks` to the document's root, in order, starting at index 0.
/// Tables go through the two-step skeleton-then-populate path; every other
/// block type is appended directly.
pub async fn append_blocks<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    document_id: &str,
    blocks: &[Block],
) -> Result<(), ApiError> {
    for (index, block) in blocks.iter().enumerate() {
        match block {
            Block::Table { rows } => append_table(client, token, document_id, index, rows).await?,
            other => {
                let json = block_to_json(other);
                client.append_block_children(token, document_id, document_id, index, &[json]).await?;
            }
        }
    }
    Ok(())
}

/// Creates the table skeleton (the API allocates cell ids only at creation
/// time), then populates each non-empty cell by appending a text paragraph
/// into the cell's returned block id.
async fn append_table<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    document_id: &str,
    index: usize,
    rows: &[Vec<String>],
) -> Result<(), ApiError> {
    let row_count = rows.len();
    let column_count = rows.iter().map(Vec::len).max().unwrap_or(0);
    if row_count == 0 || column_count == 0 {
        return Ok(());
    }

    let table = client
        .create_table_block(token, document_id, document_id, index, row_count, column_count, true)
        .await?;

    for (cell_index, cell_id) in table.cell_ids.iter().enumerate() {
        let row = cell_index / column_count;
        let column = cell_index % column_count;
        let Some(text) = rows.get(row).and_then(|r| r.get(column)) else { continue };
        if text.is_empty() {
            continue;
        }
        let paragraph = block_to_json(&Block::Paragraph { spans: vec![InlineSpan::Text(text.clone())] });
        client.append_block_children(token, document_id, cell_id, 0, &[paragraph]).await?;
    }

    Ok(())
}

/// Create a fresh remote document from local Markdown: creates the document
/// (using the codec-extracted title, if any), appends the body blocks, and
/// returns the new `documentId`. Does not move the document into the wiki
/// space — the caller is responsible for that follow-up call.
pub async fn create_document_from_markdown<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    markdown: &str,
) -> Result<String, ApiError> {
    let parsed = markdown_to_blocks(markdown);
    let title = if parsed.title.is_empty() { None } else { Some(parsed.title.as_str()) };
    let document_id = client.create_document(token, title).await?;
    append_blocks(client, token, &document_id, &parsed.blocks).await?;
    Ok(document_id)
}
