//! Content processing.
//!
//! A processor turns a scanned file and its bytes into the payload stored
//! for it. The default processor does no extraction beyond a markdown title.

use serde_json::Map;

use crate::errors::{StrataError, StrataResult};
use crate::payload::{FilePayload, NotePayload, Payload};
use crate::scanner::{FileEntry, FileKind};

/// Turns raw file bytes into a payload.
pub trait ContentProcessor: Send + Sync {
    /// Process one file.
    ///
    /// # Errors
    ///
    /// Implementations return an error for content they cannot handle; sync
    /// records it against the file and moves on.
    fn process(&self, entry: &FileEntry, bytes: &[u8]) -> StrataResult<Payload>;
}

/// Notes become `{title, body, path}`, files become
/// `{path, name, size, contentId}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultProcessor;

impl ContentProcessor for DefaultProcessor {
    fn process(&self, entry: &FileEntry, bytes: &[u8]) -> StrataResult<Payload> {
        match entry.kind {
            FileKind::Note => {
                let body = std::str::from_utf8(bytes).map_err(|e| {
                    StrataError::validation(format!("{} is not valid UTF-8: {e}", entry.rel_path))
                })?;
                let title = markdown_title(body).unwrap_or_else(|| file_stem(&entry.rel_path));
                Ok(Payload::Note(NotePayload {
                    title,
                    body: body.to_string(),
                    path: Some(entry.rel_path.clone()),
                    extra: Map::new(),
                }))
            }
            FileKind::File => Ok(Payload::File(FilePayload {
                path: entry.rel_path.clone(),
                name: file_name(&entry.rel_path),
                size: bytes.len() as u64,
                content_id: entry.content_id.clone(),
                extra: Map::new(),
            })),
        }
    }
}

/// Text of the first ATX heading (`#` to `######`).
pub fn markdown_title(text: &str) -> Option<String> {
    text.lines().find_map(|line| {
        let line = line.trim_start();
        let hashes = line.chars().take_while(|c| *c == '#').count();
        if hashes == 0 || hashes > 6 {
            return None;
        }
        let rest = &line[hashes..];
        if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
            return None;
        }
        let title = rest.trim().trim_end_matches('#').trim();
        (!title.is_empty()).then(|| title.to_string())
    })
}

fn file_name(rel_path: &str) -> String {
    rel_path.rsplit('/').next().unwrap_or(rel_path).to_string()
}

fn file_stem(rel_path: &str) -> String {
    let name = file_name(rel_path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::hash_bytes;
    use serde_json::json;
    use std::path::PathBuf;

    fn entry(path: &str, kind: FileKind, bytes: &[u8]) -> FileEntry {
        FileEntry {
            rel_path: path.to_string(),
            abs_path: PathBuf::from(path),
            kind,
            content_id: hash_bytes(bytes),
            size: bytes.len() as u64,
            mtime: 0,
        }
    }

    #[test]
    fn test_markdown_title() {
        assert_eq!(markdown_title("intro\n## Setup ##\nbody").as_deref(), Some("Setup"));
        assert_eq!(markdown_title("#hashtag\n# Real"), Some("Real".to_string()));
        assert_eq!(markdown_title("####### too deep"), None);
        assert_eq!(markdown_title("plain text"), None);
    }

    #[test]
    fn test_note_payload() {
        let bytes = b"# Meeting\nnotes here";
        let payload = DefaultProcessor
            .process(&entry("docs/meeting.md", FileKind::Note, bytes), bytes)
            .unwrap();
        assert_eq!(
            payload.to_content(),
            json!({"title": "Meeting", "body": "# Meeting\nnotes here", "path": "docs/meeting.md"})
        );

        let bytes = b"no heading";
        let payload = DefaultProcessor
            .process(&entry("docs/todo.txt", FileKind::Note, bytes), bytes)
            .unwrap();
        assert_eq!(payload.to_content()["title"], "todo");
    }

    #[test]
    fn test_file_payload() {
        let bytes = b"%PDF-1.7";
        let e = entry("papers/a.pdf", FileKind::File, bytes);
        let payload = DefaultProcessor.process(&e, bytes).unwrap();
        assert_eq!(
            payload.to_content(),
            json!({"path": "papers/a.pdf", "name": "a.pdf", "size": 8, "contentId": e.content_id})
        );
    }

    #[test]
    fn test_invalid_utf8_note_fails() {
        let bytes = [0xff, 0xfe, 0x00];
        let err = DefaultProcessor
            .process(&entry("bad.md", FileKind::Note, &bytes), &bytes)
            .unwrap_err();
        assert!(matches!(err, StrataError::Validation(_)));
    }
}
