// Wiki walker (C4): flattens a wiki space's node tree into every descendant
// document. Depth-first; children are fetched only when a node reports
// `hasChild`. Order is not observable to callers.

use feishu_sync_common::domain::{RawWikiNode, WikiNode};

use crate::client::{ApiClient, ApiError, HttpTransport};

pub async fn walk_wiki_space<T: HttpTransport>(
    client: &ApiClient<T>,
    token: &str,
    space_id: &str,
) -> Result<Vec<WikiNode>, ApiError> {
    let mut documents = Vec::new();
    let mut stack = vec![None::<String>];

    while let Some(parent_node_token) = stack.pop() {
        let mut page_token = None;
        loop {
            let page = client
                .list_space_nodes_page(token, space_id, parent_node_token.as_deref(), page_token.as_deref())
                .await?;

            for node in &page.nodes {
                if node.has_child {
                    stack.push(Some(node.node_token.clone()));
                }
            }
            documents.extend(page.nodes.into_iter().filter_map(RawWikiNode::into_document));

            if !page.has_more {
                break;
            }
            page_token = page.next_page_token;
            if page_token.as_deref().is_none_or(str::is_empty) {
                break;
            }
        }
    }

    Ok(documents)
}
