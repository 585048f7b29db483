//! Keyword distillation
//!
//! Derives the `keywords` text that feeds the lexical index: the most
//! frequent non-stopword content tokens merged with the tag set and linked
//! entity names. English-biased whitespace tokenization.

use std::collections::HashMap;

/// Tokens never worth indexing as keywords
static STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "if", "then", "else", "for", "to", "of", "in", "on",
    "at", "by", "with", "from", "as", "is", "are", "was", "were", "be", "been", "being", "it",
    "its", "this", "that", "these", "those", "we", "our", "they", "their", "you", "your", "i",
    "me", "my", "he", "she", "his", "her", "will", "would", "can", "could", "should", "shall",
    "have", "has", "had", "do", "does", "did", "not", "no", "so", "than", "too", "very", "just",
    "about", "into", "over", "after", "before", "between", "out", "up", "down", "off", "again",
    "more", "most", "some", "such", "only", "own", "same", "also", "there", "here", "when",
    "where", "why", "how", "all", "any", "both", "each", "few", "other", "what", "which", "who",
    "whom", "going", "get", "got", "use", "using", "used", "new", "one", "two",
];

/// Number of frequency-ranked content tokens to keep
const MAX_CONTENT_KEYWORDS: usize = 15;

/// Generate the keyword string for a memory
pub fn generate_keywords(content: &str, tags: &[String], entity_names: &[String]) -> String {
    let mut freq: HashMap<String, usize> = HashMap::new();
    for token in tokenize(content) {
        *freq.entry(token).or_insert(0) += 1;
    }

    let mut ranked: Vec<(String, usize)> = freq.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    let mut keywords: Vec<String> = Vec::new();
    for (token, _) in ranked.into_iter().take(MAX_CONTENT_KEYWORDS) {
        push_unique(&mut keywords, token);
    }
    for tag in tags {
        push_unique(&mut keywords, tag.to_lowercase());
    }
    for name in entity_names {
        for token in tokenize(name) {
            push_unique(&mut keywords, token);
        }
    }

    keywords.join(" ")
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2 && !STOPWORDS.contains(t))
        .map(String::from)
        .collect::<Vec<_>>()
        .into_iter()
}

fn push_unique(keywords: &mut Vec<String>, token: String) {
    if !token.is_empty() && !keywords.contains(&token) {
        keywords.push(token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merges_content_tags_and_entities() {
        let kw = generate_keywords(
            "The metrics backend migrated to Postgres for faster aggregation queries.",
            &["decision".into()],
            &["Postgres".into(), "Atlas Project".into()],
        );
        assert!(kw.contains("metrics"));
        assert!(kw.contains("postgres"));
        assert!(kw.contains("decision"));
        assert!(kw.contains("atlas"));
        // stopwords dropped
        assert!(!kw.split(' ').any(|t| t == "the" || t == "for"));
    }

    #[test]
    fn test_no_duplicates() {
        let kw = generate_keywords(
            "postgres postgres postgres",
            &["postgres".into()],
            &["Postgres".into()],
        );
        assert_eq!(kw.split(' ').filter(|t| *t == "postgres").count(), 1);
    }

    #[test]
    fn test_frequency_ranking() {
        let kw = generate_keywords(
            "alpha alpha alpha beta beta gamma",
            &[],
            &[],
        );
        let tokens: Vec<&str> = kw.split(' ').collect();
        assert_eq!(tokens[0], "alpha");
        assert_eq!(tokens[1], "beta");
    }

    #[test]
    fn test_empty_content() {
        assert!(generate_keywords("", &[], &[]).is_empty());
    }
}
