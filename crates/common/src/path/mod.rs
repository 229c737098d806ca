// Path normalization and desired-filename computation shared by the local
// walker and the reconciler.

pub mod normalize;

pub use normalize::{normalize_path, PathError};

/// Turn a remote document title into a safe, POSIX-style relative filename.
///
/// Strips characters that are invalid (or merely awkward) in filenames on
/// common filesystems, collapses whitespace, and falls back to `fallback`
/// (typically the document id) when the title sanitizes to nothing.
pub fn sanitize_title_for_filename(title: &str, fallback: &str) -> String {
    let mut sanitized = String::with_capacity(title.len());
    for ch in title.trim().chars() {
        match ch {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => sanitized.push('-'),
            c if c.is_control() => {}
            c => sanitized.push(c),
        }
    }

    let collapsed =
        sanitized.split_whitespace().collect::<Vec<_>>().join(" ").trim().to_string();

    if collapsed.is_empty() {
        fallback.to_string()
    } else {
        collapsed
    }
}

/// Compute a unique `.md` relative path for a document, given the set of
/// paths already in use (excluding the document's own current path, if any).
///
/// Appends `-2`, `-3`, … before the extension until the candidate is free of
/// collisions. `used_paths` must already exclude the entry's current `file`
/// so renaming a document back to its own desired name never collides with
/// itself.
pub fn unique_markdown_path(stem: &str, used_paths: &std::collections::HashSet<String>) -> String {
    let candidate = format!("{stem}.md");
    if !used_paths.contains(&candidate) {
        return candidate;
    }

    let mut suffix = 2usize;
    loop {
        let candidate = format!("{stem}-{suffix}.md");
        if !used_paths.contains(&candidate) {
            return candidate;
        }
        suffix += 1;
    }
}
