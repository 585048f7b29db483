//! Content utilities: private-block stripping, normalized hashing, chunking
//!
//! Everything in this module is pure text manipulation; nothing here touches
//! the database or the embedding provider.

use sha2::{Digest, Sha256};

/// Remove every region enclosed by case-insensitive `<private>...</private>`
/// delimiters, then collapse runs of three or more newlines into two and trim
/// surrounding whitespace.
///
/// Scanning is a single left-to-right pass: an opening tag with no closing
/// tag strips to the end of the input, and nested openers are absorbed by the
/// outermost region. Private content must never reach hashing, embedding, or
/// the index.
pub fn strip_private_blocks(content: &str) -> String {
    const OPEN: &str = "<private>";
    const CLOSE: &str = "</private>";

    let lower = content.to_lowercase();
    let mut out = String::with_capacity(content.len());
    let mut pos = 0;

    while let Some(start) = lower[pos..].find(OPEN) {
        let start = pos + start;
        out.push_str(&content[pos..start]);
        match lower[start + OPEN.len()..].find(CLOSE) {
            Some(end) => {
                pos = start + OPEN.len() + end + CLOSE.len();
            }
            None => {
                // Unterminated block strips to end of input
                pos = content.len();
                break;
            }
        }
    }
    out.push_str(&content[pos..]);

    collapse_blank_runs(&out).trim().to_string()
}

/// Collapse runs of 3+ newlines (ignoring interleaved spaces/tabs) into two
fn collapse_blank_runs(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0usize;
    let mut pending_ws = String::new();

    for c in text.chars() {
        match c {
            '\n' => {
                newlines += 1;
                pending_ws.clear();
            }
            ' ' | '\t' | '\r' if newlines > 0 => {
                pending_ws.push(c);
            }
            _ => {
                if newlines > 0 {
                    out.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
                    out.push_str(&pending_ws);
                    pending_ws.clear();
                    newlines = 0;
                }
                out.push(c);
            }
        }
    }
    if newlines > 0 {
        out.push_str(if newlines >= 2 { "\n\n" } else { "\n" });
    }
    out
}

/// Compute the SHA256 hex digest of normalized content for deduplication.
///
/// Normalization: lowercase, collapse whitespace runs to single spaces, strip
/// trailing punctuation. Deterministic across processes and platforms.
pub fn content_hash(content: &str) -> String {
    let collapsed = content
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    let normalized = collapsed.trim_end_matches(|c: char| c.is_ascii_punctuation());

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

/// Split long content into chunks of approximately `target_size` characters.
///
/// Split points prefer paragraph boundaries, then sentence boundaries, then
/// whitespace. Every chunk is non-empty, and the chunks concatenated
/// reconstruct the input modulo whitespace collapsing at the seams.
pub fn chunk_text(content: &str, target_size: usize) -> Vec<String> {
    let target = target_size.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();

    for paragraph in content.split("\n\n") {
        let paragraph = paragraph.trim_matches('\n');
        if paragraph.trim().is_empty() {
            continue;
        }

        if current.chars().count() + paragraph.chars().count() > target && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        if paragraph.chars().count() > target {
            // Paragraph alone exceeds target: fall back to sentence splits
            for piece in split_oversized(paragraph, target) {
                if current.chars().count() + piece.chars().count() > target
                    && !current.is_empty()
                {
                    chunks.push(std::mem::take(&mut current));
                }
                push_piece(&mut current, &piece);
            }
        } else {
            push_piece(&mut current, paragraph);
        }
    }

    if !current.trim().is_empty() {
        chunks.push(current);
    }

    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn push_piece(current: &mut String, piece: &str) {
    if !current.is_empty() {
        current.push_str("\n\n");
    }
    current.push_str(piece);
}

/// Split an oversized paragraph at sentence boundaries, then whitespace
fn split_oversized(paragraph: &str, target: usize) -> Vec<String> {
    let sentences = split_sentences(paragraph);
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences {
        if sentence.chars().count() > target {
            if !current.trim().is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_on_whitespace(&sentence, target));
            continue;
        }
        if current.chars().count() + sentence.chars().count() > target && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence.trim());
    }
    if !current.trim().is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Split text into sentences on `.`/`!`/`?` followed by whitespace
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            if chars.peek().map(|n| n.is_whitespace()).unwrap_or(true) {
                sentences.push(std::mem::take(&mut current));
            }
        }
    }
    if !current.trim().is_empty() {
        sentences.push(current);
    }
    sentences
}

/// Last-resort split on whitespace into <= target-sized pieces
fn split_on_whitespace(text: &str, target: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        if current.chars().count() + word.chars().count() + 1 > target && !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_removes_private_blocks() {
        let s = strip_private_blocks("keep <private>secret</private> this");
        assert_eq!(s, "keep  this".trim());
        assert!(!s.contains("secret"));
    }

    #[test]
    fn test_strip_case_insensitive_tags() {
        let s = strip_private_blocks("a <PRIVATE>hidden</Private> b");
        assert!(!s.contains("hidden"));
        assert!(s.contains('a') && s.contains('b'));
    }

    #[test]
    fn test_strip_unterminated_block_strips_to_end() {
        let s = strip_private_blocks("visible <private>never closed");
        assert_eq!(s, "visible");
    }

    #[test]
    fn test_strip_nested_openers_absorbed() {
        let s = strip_private_blocks("x <private>a <private>b</private> y");
        // Outermost region ends at the first close tag; the tail survives
        assert!(!s.contains('a'));
        assert!(!s.contains('b'));
        assert!(s.contains('y'));
    }

    #[test]
    fn test_strip_entirely_private_yields_empty() {
        assert!(strip_private_blocks("<private>all of it</private>").is_empty());
    }

    #[test]
    fn test_strip_collapses_blank_runs() {
        let s = strip_private_blocks("a\n\n\n\n\nb");
        assert_eq!(s, "a\n\nb");
    }

    #[test]
    fn test_hash_is_normalization_stable() {
        let a = content_hash("Exocortex uses SQLite for storage.");
        let b = content_hash("exocortex   uses sqlite\tfor storage");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_hash_differs_on_content() {
        assert_ne!(content_hash("one thing"), content_hash("another thing"));
    }

    #[test]
    fn test_chunk_short_content_single_chunk() {
        let chunks = chunk_text("short paragraph", 500);
        assert_eq!(chunks, vec!["short paragraph".to_string()]);
    }

    #[test]
    fn test_chunk_prefers_paragraph_boundaries() {
        let p1 = "First paragraph. ".repeat(10);
        let p2 = "Second paragraph here. ".repeat(10);
        let text = format!("{}\n\n{}", p1.trim(), p2.trim());
        let chunks = chunk_text(&text, 200);
        assert!(chunks.len() >= 2);
        for c in &chunks {
            assert!(!c.trim().is_empty());
        }
    }

    #[test]
    fn test_chunk_reconstructs_content_modulo_whitespace() {
        let text = "Alpha beta gamma. Delta epsilon zeta. Eta theta iota.\n\nKappa lambda mu. Nu xi omicron.";
        let chunks = chunk_text(text, 40);
        let rejoined: String = chunks.join(" ");
        let norm = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
        assert_eq!(norm(&rejoined), norm(text));
    }

    #[test]
    fn test_chunk_oversized_sentence_splits_on_whitespace() {
        let long = "word ".repeat(300);
        let chunks = chunk_text(long.trim(), 100);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 120);
        }
    }

    #[test]
    fn test_chunk_sizes_near_target() {
        let text = "A sensible sentence of moderate length appears here. ".repeat(40);
        let chunks = chunk_text(text.trim(), 500);
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.chars().count() <= 600, "chunk too large: {}", c.len());
        }
    }
}
