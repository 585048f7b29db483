//! Session transcript digestion
//!
//! Produces a deterministic summary plus a list of extracted facts from a
//! conversation transcript. Facts are sentences carrying decision,
//! preference, or state-change markers; no LLM is involved here.

use crate::intelligence::keywords::generate_keywords;

/// Digest of a session transcript
#[derive(Debug, Clone, serde::Serialize)]
pub struct SessionDigest {
    pub summary: String,
    pub facts: Vec<String>,
}

/// Markers that promote a sentence to a fact
static FACT_MARKERS: &[&str] = &[
    "decided",
    "decision",
    "agreed",
    "will use",
    "going to use",
    "prefers",
    "prefer",
    "switched to",
    "migrated to",
    "chose",
    "must",
    "always",
    "never",
    "learned",
    "renamed",
    "deprecated",
];

/// Maximum facts extracted per transcript
const MAX_FACTS: usize = 10;

/// Digest a transcript into a summary and extracted facts
pub fn digest_transcript(transcript: &str) -> SessionDigest {
    let transcript = transcript.trim();
    if transcript.is_empty() {
        return SessionDigest {
            summary: String::new(),
            facts: Vec::new(),
        };
    }

    let exchanges = transcript
        .lines()
        .filter(|l| !l.trim().is_empty())
        .count();

    let mut facts: Vec<String> = Vec::new();
    for sentence in split_sentences(transcript) {
        let lower = sentence.to_lowercase();
        if FACT_MARKERS.iter().any(|m| lower.contains(m)) {
            let cleaned = sentence.trim().to_string();
            if !facts.contains(&cleaned) {
                facts.push(cleaned);
            }
            if facts.len() >= MAX_FACTS {
                break;
            }
        }
    }

    let keyword_line = generate_keywords(transcript, &[], &[])
        .split(' ')
        .take(8)
        .collect::<Vec<_>>()
        .join(", ");

    let summary = format!(
        "Session digest: {} lines, {} notable facts. Topics: {}.",
        exchanges,
        facts.len(),
        if keyword_line.is_empty() {
            "none".to_string()
        } else {
            keyword_line
        }
    );

    SessionDigest { summary, facts }
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let s = current.trim().to_string();
            if !s.is_empty() {
                out.push(s);
            }
            current.clear();
        }
    }
    let s = current.trim().to_string();
    if !s.is_empty() {
        out.push(s);
    }
    out
}
