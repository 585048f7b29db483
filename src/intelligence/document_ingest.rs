//! Markdown document ingestion
//!
//! Splits an external markdown file into sections at H2 headers; each section
//! becomes one memory. A document with no H2 headers yields a single section
//! titled by its H1 (or the provided fallback).

use pulldown_cmark::{Event, HeadingLevel, Parser, Tag, TagEnd};

/// A section of an ingested document
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSection {
    pub title: String,
    pub body: String,
}

/// Split markdown into H2-delimited sections
pub fn split_markdown(markdown: &str, fallback_title: &str) -> Vec<DocumentSection> {
    let parser = Parser::new(markdown);

    let mut sections: Vec<DocumentSection> = Vec::new();
    let mut doc_title: Option<String> = None;
    let mut current_title: Option<String> = None;
    let mut current_body = String::new();
    let mut in_heading = false;
    let mut heading_text = String::new();

    for event in parser {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                in_heading = true;
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                in_heading = false;
                match level {
                    HeadingLevel::H1 => {
                        if doc_title.is_none() {
                            doc_title = Some(heading_text.clone());
                        }
                    }
                    HeadingLevel::H2 => {
                        flush_section(
                            current_title.take(),
                            &mut current_body,
                            &mut sections,
                            &doc_title,
                            fallback_title,
                        );
                        current_title = Some(heading_text.clone());
                    }
                    _ => {
                        // Deeper headings stay inside the current section
                        current_body.push_str(&heading_text);
                        current_body.push('\n');
                    }
                }
            }
            Event::Text(text) | Event::Code(text) => {
                if in_heading {
                    heading_text.push_str(&text);
                } else {
                    current_body.push_str(&text);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if !in_heading {
                    current_body.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph) | Event::End(TagEnd::Item) => {
                current_body.push('\n');
            }
            _ => {}
        }
    }
    flush_section(
        current_title.take(),
        &mut current_body,
        &mut sections,
        &doc_title,
        fallback_title,
    );

    sections
}

fn flush_section(
    title: Option<String>,
    body: &mut String,
    sections: &mut Vec<DocumentSection>,
    doc_title: &Option<String>,
    fallback_title: &str,
) {
    let text = body.trim().to_string();
    body.clear();
    if text.is_empty() {
        return;
    }
    let title = title
        .or_else(|| doc_title.clone())
        .unwrap_or_else(|| fallback_title.to_string());
    sections.push(DocumentSection { title, body: text });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_splits_on_h2() {
        let md = "# Doc\n\nintro text\n\n## First\n\nbody one\n\n## Second\n\nbody two\n";
        let sections = split_markdown(md, "file.md");

        assert_eq!(sections.len(), 3);
        assert_eq!(sections[0].title, "Doc");
        assert!(sections[0].body.contains("intro text"));
        assert_eq!(sections[1].title, "First");
        assert!(sections[1].body.contains("body one"));
        assert_eq!(sections[2].title, "Second");
    }

    #[test]
    fn test_no_headers_single_section() {
        let sections = split_markdown("just a plain paragraph", "notes.md");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "notes.md");
    }

    #[test]
    fn test_h3_stays_in_section() {
        let md = "## Parent\n\ntext\n\n### Child\n\nnested text\n";
        let sections = split_markdown(md, "f");
        assert_eq!(sections.len(), 1);
        assert!(sections[0].body.contains("nested text"));
        assert!(sections[0].body.contains("Child"));
    }

    #[test]
    fn test_empty_document() {
        assert!(split_markdown("", "f").is_empty());
    }
}
