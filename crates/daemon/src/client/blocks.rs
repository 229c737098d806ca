// Adapter between the shared `Block` model (feishu_sync_common::markdown)
// and the block-creation/fetch JSON shape used by the remote document API.
//
// The wire schema is inferred from the child-append/fetch contract described
// in this codebase's API surface, not pinned to a byte-exact upstream spec;
// like the event-payload adapters elsewhere, this stays tolerant on read
// (unrecognized block types degrade to a plain-text paragraph) and only
// emits the subset it knows how to build on write.

use feishu_sync_common::markdown::{Block, InlineSpan};
use serde_json::{json, Value};

pub fn block_to_json(block: &Block) -> Value {
    match block {
        Block::Heading { level, text } => json!({
            "block_type": format!("heading{}", (*level).clamp(1, 6)),
            "text": { "elements": [{ "text_run": { "content": text } }] },
        }),
        Block::Paragraph { spans } => json!({
            "block_type": "text",
            "text": { "elements": spans.iter().map(span_to_json).collect::<Vec<_>>() },
        }),
        Block::CodeBlock { language, text } => json!({
            "block_type": "code",
            "code": { "language": language, "elements": [{ "text_run": { "content": text } }] },
        }),
        Block::BulletList { items } => json!({
            "block_type": "bullet",
            "items": items.iter().map(|spans| spans.iter().map(span_to_json).collect::<Vec<_>>()).collect::<Vec<_>>(),
        }),
        Block::OrderedList { items } => json!({
            "block_type": "ordered",
            "items": items.iter().map(|spans| spans.iter().map(span_to_json).collect::<Vec<_>>()).collect::<Vec<_>>(),
        }),
        Block::Table { rows } => json!({
            "block_type": "table",
            "table": { "rows": rows },
        }),
    }
}

fn span_to_json(span: &InlineSpan) -> Value {
    match span {
        InlineSpan::Text(text) => json!({ "text_run": { "content": text } }),
        InlineSpan::Bold(text) => json!({ "text_run": { "content": text, "style": { "bold": true } } }),
        InlineSpan::Italic(text) => json!({ "text_run": { "content": text, "style": { "italic": true } } }),
        InlineSpan::Code(text) => json!({ "text_run": { "content": text, "style": { "inline_code": true } } }),
        InlineSpan::Link { text, url } => {
            json!({ "text_run": { "content": text, "style": { "link": { "url": url } } } })
        }
    }
}

pub fn json_to_block(value: &Value) -> Block {
    let block_type = value.get("block_type").and_then(Value::as_str).unwrap_or("");

    if let Some(level) = block_type.strip_prefix("heading").and_then(|n| n.parse::<u8>().ok()) {
        return Block::Heading { level, text: extract_plain_text(value.get("text")) };
    }

    match block_type {
        "code" => Block::CodeBlock {
            language: value.get("code").and_then(|c| c.get("language")).and_then(Value::as_str).map(str::to_string),
            text: extract_plain_text(value.get("code")),
        },
        "bullet" => Block::BulletList { items: extract_list_items(value) },
        "ordered" => Block::OrderedList { items: extract_list_items(value) },
        "table" => Block::Table {
            rows: value
                .get("table")
                .and_then(|t| t.get("rows"))
                .and_then(Value::as_array)
                .map(|rows| {
                    rows.iter()
                        .filter_map(Value::as_array)
                        .map(|row| row.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .collect()
                })
                .unwrap_or_default(),
        },
        _ => Block::Paragraph { spans: vec![InlineSpan::Text(extract_plain_text(value.get("text")))] },
    }
}

fn extract_list_items(value: &Value) -> Vec<Vec<InlineSpan>> {
    value
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .map(|item| vec![InlineSpan::Text(elements_to_plain_text(item))])
                .collect()
        })
        .unwrap_or_default()
}

fn extract_plain_text(container: Option<&Value>) -> String {
    container.map(elements_to_plain_text).unwrap_or_default()
}

fn elements_to_plain_text(container: &Value) -> String {
    container
        .get("elements")
        .and_then(Value::as_array)
        .map(|elements| {
            elements
                .iter()
                .filter_map(|element| element.get("text_run")?.get("content")?.as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paragraph_round_trips_plain_text() {
        let block = Block::Paragraph { spans: vec![InlineSpan::Text("hello".to_string())] };
        let json = block_to_json(&block);
        let restored = json_to_block(&json);
        assert_eq!(restored, Block::Paragraph { spans: vec![InlineSpan::Text("hello".to_string())] });
    }

    #[test]
    fn heading_round_trips_level_and_text() {
        let block = Block::Heading { level: 2, text: "Section".to_string() };
        let json = block_to_json(&block);
        assert_eq!(json_to_block(&json), block);
    }

    #[test]
    fn code_block_round_trips_language_and_text() {
        let block = Block::CodeBlock { language: Some("rust".to_string()), text: "fn main() {}".to_string() };
        let json = block_to_json(&block);
        assert_eq!(json_to_block(&json), block);
    }

    #[test]
    fn table_round_trips_rows() {
        let block = Block::Table { rows: vec![vec!["a".to_string(), "b".to_string()]] };
        let json = block_to_json(&block);
        assert_eq!(json_to_block(&json), block);
    }

    #[test]
    fn unknown_block_type_degrades_to_plain_text_paragraph() {
        let json = json!({ "block_type": "image", "text": { "elements": [] } });
        assert_eq!(json_to_block(&json), Block::Paragraph { spans: vec![InlineSpan::Text(String::new())] });
    }
}
