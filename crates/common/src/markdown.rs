// Markdown <-> block-tree conversion.
//
// The block tree models the subset of the remote document API's block kinds
// the engine actually round-trips: headings, paragraphs, code blocks, lists,
// and tables, each carrying a small set of inline styles (bold, italic,
// code, links). This is a contract-level converter, not a full CommonMark
// implementation — anything outside the supported subset degrades to plain
// text rather than erroring.

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};

/// Document-level metadata threaded through the converter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentMetadata {
    pub title: Option<String>,
}

/// An inline styled run within a paragraph or list item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineSpan {
    Text(String),
    Bold(String),
    Italic(String),
    Code(String),
    Link { text: String, url: String },
}

impl InlineSpan {
    fn render(&self) -> String {
        match self {
            InlineSpan::Text(text) => text.clone(),
            InlineSpan::Bold(text) => format!("**{text}**"),
            InlineSpan::Italic(text) => format!("*{text}*"),
            InlineSpan::Code(text) => format!("`{text}`"),
            InlineSpan::Link { text, url } => format!("[{text}]({url})"),
        }
    }
}

fn render_spans(spans: &[InlineSpan]) -> String {
    spans.iter().map(InlineSpan::render).collect::<Vec<_>>().join("")
}

/// A single block in the remote document's block tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Heading { level: u8, text: String },
    Paragraph { spans: Vec<InlineSpan> },
    CodeBlock { language: Option<String>, text: String },
    BulletList { items: Vec<Vec<InlineSpan>> },
    OrderedList { items: Vec<Vec<InlineSpan>> },
    /// `rows` includes the header row as `rows[0]` so the uploader can
    /// create the table skeleton from `row_size`/`column_size` and then
    /// populate each cell by index, matching the two-step table API.
    Table { rows: Vec<Vec<String>> },
}

/// Result of parsing Markdown into the block tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub title: String,
    pub blocks: Vec<Block>,
}

/// Parse Markdown into `{ title, blocks }`. The first top-level (H1) heading
/// is extracted as `title` and omitted from the body; if the document does
/// not begin with an H1, `title` is empty and every heading stays in the
/// body.
pub fn markdown_to_blocks(markdown: &str) -> ParsedDocument {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let parser = Parser::new_ext(markdown, options);
    let mut blocks = Vec::new();
    let mut title = String::new();
    let mut first_block_seen = false;

    let mut current_spans: Vec<InlineSpan> = Vec::new();
    let mut pending_text = String::new();
    let mut bold_depth = 0u32;
    let mut italic_depth = 0u32;
    let mut link_url: Option<String> = None;
    let mut in_code_span = false;

    let mut heading_level: Option<u8> = None;
    let mut in_code_block = false;
    let mut code_block_lang: Option<String> = None;
    let mut code_block_text = String::new();

    let mut list_items: Vec<Vec<InlineSpan>> = Vec::new();
    let mut list_ordered = false;
    let mut list_depth = 0u32;

    let mut table_rows: Vec<Vec<String>> = Vec::new();
    let mut table_row: Vec<String> = Vec::new();
    let mut in_table = false;

    macro_rules! flush_text {
        () => {
            if !pending_text.is_empty() {
                let text = std::mem::take(&mut pending_text);
                current_spans.push(if in_code_span {
                    InlineSpan::Code(text)
                } else if let Some(url) = link_url.clone() {
                    InlineSpan::Link { text, url }
                } else if bold_depth > 0 {
                    InlineSpan::Bold(text)
                } else if italic_depth > 0 {
                    InlineSpan::Italic(text)
                } else {
                    InlineSpan::Text(text)
                });
            }
        };
    }

    for event in parser {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                heading_level = Some(heading_level_to_u8(level));
                pending_text.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                let text = std::mem::take(&mut pending_text);
                let is_top_level = heading_level_to_u8(level) == 1;
                if !first_block_seen && is_top_level && title.is_empty() {
                    title = text;
                } else {
                    blocks.push(Block::Heading { level: heading_level_to_u8(level), text });
                }
                first_block_seen = true;
                heading_level = None;
            }
            Event::Start(Tag::Paragraph) => {
                current_spans = Vec::new();
            }
            Event::End(TagEnd::Paragraph) => {
                flush_text!();
                if in_table {
                    table_row.push(render_spans(&current_spans));
                } else if list_depth > 0 {
                    list_items.push(std::mem::take(&mut current_spans));
                } else {
                    blocks.push(Block::Paragraph { spans: std::mem::take(&mut current_spans) });
                    first_block_seen = true;
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                in_code_block = true;
                code_block_text.clear();
                code_block_lang = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
            }
            Event::End(TagEnd::CodeBlock) => {
                in_code_block = false;
                blocks.push(Block::CodeBlock {
                    language: code_block_lang.take(),
                    text: code_block_text.trim_end_matches('\n').to_string(),
                });
                first_block_seen = true;
            }
            Event::Start(Tag::List(ordinal)) => {
                if list_depth == 0 {
                    list_items = Vec::new();
                    list_ordered = ordinal.is_some();
                }
                list_depth += 1;
            }
            Event::End(TagEnd::List(_)) => {
                list_depth -= 1;
                if list_depth == 0 {
                    let items = std::mem::take(&mut list_items);
                    blocks.push(if list_ordered {
                        Block::OrderedList { items }
                    } else {
                        Block::BulletList { items }
                    });
                    first_block_seen = true;
                }
            }
            Event::Start(Tag::Item) => {
                current_spans = Vec::new();
            }
            Event::End(TagEnd::Item) => {
                flush_text!();
                if !current_spans.is_empty() {
                    list_items.push(std::mem::take(&mut current_spans));
                }
            }
            Event::Start(Tag::Table(_)) => {
                in_table = true;
                table_rows = Vec::new();
            }
            Event::End(TagEnd::Table) => {
                in_table = false;
                blocks.push(Block::Table { rows: std::mem::take(&mut table_rows) });
                first_block_seen = true;
            }
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => {
                table_row = Vec::new();
            }
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                table_rows.push(std::mem::take(&mut table_row));
            }
            Event::Start(Tag::TableCell) => {
                current_spans = Vec::new();
            }
            Event::End(TagEnd::TableCell) => {
                flush_text!();
                table_row.push(render_spans(&current_spans));
                current_spans = Vec::new();
            }
            Event::Start(Tag::Strong) => bold_depth += 1,
            Event::End(TagEnd::Strong) => bold_depth = bold_depth.saturating_sub(1),
            Event::Start(Tag::Emphasis) => italic_depth += 1,
            Event::End(TagEnd::Emphasis) => italic_depth = italic_depth.saturating_sub(1),
            Event::Start(Tag::Link { dest_url, .. }) => {
                flush_text!();
                link_url = Some(dest_url.to_string());
            }
            Event::End(TagEnd::Link) => {
                flush_text!();
                link_url = None;
            }
            Event::Code(text) => {
                flush_text!();
                current_spans.push(InlineSpan::Code(text.to_string()));
            }
            Event::Text(text) => {
                if in_code_block {
                    code_block_text.push_str(&text);
                } else if heading_level.is_some() {
                    pending_text.push_str(&text);
                } else {
                    pending_text.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                flush_text!();
                pending_text.push(' ');
            }
            _ => {}
        }
    }

    ParsedDocument { title, blocks }
}

fn heading_level_to_u8(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

/// Render `{ metadata, blocks }` back to Markdown text. Deterministic: the
/// same input always produces byte-identical output.
pub fn blocks_to_markdown(metadata: &DocumentMetadata, blocks: &[Block]) -> String {
    let mut out = String::new();

    if let Some(title) = &metadata.title {
        let first_is_matching_heading =
            matches!(blocks.first(), Some(Block::Heading { level: 1, text }) if text == title);
        if !first_is_matching_heading {
            out.push_str("# ");
            out.push_str(title);
            out.push_str("\n\n");
        }
    }

    for (index, block) in blocks.iter().enumerate() {
        if index > 0 {
            out.push('\n');
        }
        render_block(block, &mut out);
        out.push('\n');
    }

    out
}

fn render_block(block: &Block, out: &mut String) {
    match block {
        Block::Heading { level, text } => {
            out.push_str(&"#".repeat((*level).clamp(1, 6) as usize));
            out.push(' ');
            out.push_str(text);
            out.push('\n');
        }
        Block::Paragraph { spans } => {
            out.push_str(&render_spans(spans));
            out.push('\n');
        }
        Block::CodeBlock { language, text } => {
            out.push_str("```");
            if let Some(lang) = language {
                out.push_str(lang);
            }
            out.push('\n');
            out.push_str(text);
            out.push_str("\n```\n");
        }
        Block::BulletList { items } => {
            for item in items {
                out.push_str("- ");
                out.push_str(&render_spans(item));
                out.push('\n');
            }
        }
        Block::OrderedList { items } => {
            for (index, item) in items.iter().enumerate() {
                out.push_str(&format!("{}. ", index + 1));
                out.push_str(&render_spans(item));
                out.push('\n');
            }
        }
        Block::Table { rows } => {
            let Some(header) = rows.first() else { return };
            out.push_str("| ");
            out.push_str(&header.join(" | "));
            out.push_str(" |\n|");
            out.push_str(&" --- |".repeat(header.len()));
            out.push('\n');
            for row in rows.iter().skip(1) {
                out.push_str("| ");
                out.push_str(&row.join(" | "));
                out.push_str(" |\n");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_leading_h1_as_title() {
        let parsed = markdown_to_blocks("# Hello\n\nSome text.\n");
        assert_eq!(parsed.title, "Hello");
        assert_eq!(parsed.blocks, vec![Block::Paragraph {
            spans: vec![InlineSpan::Text("Some text.".to_string())]
        }]);
    }

    #[test]
    fn no_leading_h1_means_empty_title() {
        let parsed = markdown_to_blocks("Some text.\n\n# Later Heading\n");
        assert_eq!(parsed.title, "");
        assert_eq!(parsed.blocks.len(), 2);
        assert!(matches!(parsed.blocks[1], Block::Heading { level: 1, .. }));
    }

    #[test]
    fn parses_inline_styles() {
        let parsed = markdown_to_blocks("**bold** and *italic* and `code` and [link](https://x)");
        let Block::Paragraph { spans } = &parsed.blocks[0] else { panic!("expected paragraph") };
        assert_eq!(
            spans,
            &vec![
                InlineSpan::Bold("bold".to_string()),
                InlineSpan::Text(" and ".to_string()),
                InlineSpan::Italic("italic".to_string()),
                InlineSpan::Text(" and ".to_string()),
                InlineSpan::Code("code".to_string()),
                InlineSpan::Text(" and ".to_string()),
                InlineSpan::Link { text: "link".to_string(), url: "https://x".to_string() },
            ]
        );
    }

    #[test]
    fn parses_code_block_with_language() {
        let parsed = markdown_to_blocks("```rust\nfn main() {}\n```\n");
        assert_eq!(
            parsed.blocks,
            vec![Block::CodeBlock {
                language: Some("rust".to_string()),
                text: "fn main() {}".to_string()
            }]
        );
    }

    #[test]
    fn parses_bullet_list() {
        let parsed = markdown_to_blocks("- one\n- two\n");
        assert_eq!(
            parsed.blocks,
            vec![Block::BulletList {
                items: vec![
                    vec![InlineSpan::Text("one".to_string())],
                    vec![InlineSpan::Text("two".to_string())],
                ]
            }]
        );
    }

    #[test]
    fn parses_table_with_header_and_rows() {
        let parsed = markdown_to_blocks("| a | b |\n| --- | --- |\n| 1 | 2 |\n");
        assert_eq!(
            parsed.blocks,
            vec![Block::Table {
                rows: vec![
                    vec!["a".to_string(), "b".to_string()],
                    vec!["1".to_string(), "2".to_string()],
                ]
            }]
        );
    }

    #[test]
    fn blocks_to_markdown_prepends_title_heading() {
        let metadata = DocumentMetadata { title: Some("Hello".to_string()) };
        let blocks =
            vec![Block::Paragraph { spans: vec![InlineSpan::Text("Body.".to_string())] }];
        let markdown = blocks_to_markdown(&metadata, &blocks);
        assert!(markdown.starts_with("# Hello\n\n"));
        assert!(markdown.contains("Body."));
    }

    #[test]
    fn blocks_to_markdown_skips_duplicate_title_heading() {
        let metadata = DocumentMetadata { title: Some("Hello".to_string()) };
        let blocks = vec![Block::Heading { level: 1, text: "Hello".to_string() }];
        let markdown = blocks_to_markdown(&metadata, &blocks);
        assert_eq!(markdown.matches("Hello").count(), 1);
    }

    #[test]
    fn blocks_to_markdown_is_deterministic() {
        let metadata = DocumentMetadata { title: None };
        let blocks = vec![
            Block::Heading { level: 2, text: "Section".to_string() },
            Block::Paragraph { spans: vec![InlineSpan::Bold("strong".to_string())] },
        ];
        assert_eq!(blocks_to_markdown(&metadata, &blocks), blocks_to_markdown(&metadata, &blocks));
    }

    #[test]
    fn round_trip_preserves_paragraph_semantics() {
        let markdown = "# Title\n\nHello **world**.\n";
        let parsed = markdown_to_blocks(markdown);
        let metadata = DocumentMetadata { title: Some(parsed.title.clone()) };
        let rendered = blocks_to_markdown(&metadata, &parsed.blocks);
        let reparsed = markdown_to_blocks(&rendered);
        assert_eq!(reparsed.title, parsed.title);
        assert_eq!(reparsed.blocks, parsed.blocks);
    }
}
