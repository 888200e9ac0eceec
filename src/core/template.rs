//! Message templates with named placeholders.
//!
//! A template is plain text with `{field}` placeholders. `{{` and `}}` produce
//! literal braces. Every placeholder must resolve against the candidate or
//! rendering fails; a partially filled message is never returned.

use thiserror::Error;

use super::candidate::Candidate;
use super::types::Platform;

/// Errors produced while parsing or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    /// One or more placeholders had no value for this candidate.
    #[error("unresolved placeholders: {}", .0.join(", "))]
    Unresolved(Vec<String>),

    /// The template text is malformed.
    #[error("malformed template at byte {position}: {message}")]
    Malformed { position: usize, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(String),
}

/// A parsed message template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl MessageTemplate {
    /// Parse template text.
    pub fn parse(source: &str) -> Result<Self, RenderError> {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if matches!(chars.peek(), Some((_, '{'))) => {
                    chars.next();
                    text.push('{');
                }
                '}' if matches!(chars.peek(), Some((_, '}'))) => {
                    chars.next();
                    text.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, c) in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(RenderError::Malformed {
                            position: pos,
                            message: "unclosed placeholder".into(),
                        });
                    }
                    let name = name.trim();
                    if name.is_empty() || !name.chars().all(is_field_char) {
                        return Err(RenderError::Malformed {
                            position: pos,
                            message: format!("invalid placeholder name '{}'", name),
                        });
                    }
                    if !text.is_empty() {
                        segments.push(Segment::Text(std::mem::take(&mut text)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => {
                    return Err(RenderError::Malformed {
                        position: pos,
                        message: "unmatched '}'".into(),
                    });
                }
                c => text.push(c),
            }
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    /// The original template text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !names.contains(&name.as_str()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Substitute every placeholder with the candidate's field.
    pub fn render(&self, candidate: &Candidate, platform: Platform) -> Result<String, RenderError> {
        let mut out = String::with_capacity(self.source.len());
        let mut missing: Vec<String> = Vec::new();

        for segment in &self.segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Field(name) => match candidate.field(name, platform) {
                    Some(value) => out.push_str(&value),
                    None => {
                        if !missing.contains(name) {
                            missing.push(name.clone());
                        }
                    }
                },
            }
        }

        if missing.is_empty() {
            Ok(out)
        } else {
            Err(RenderError::Unresolved(missing))
        }
    }
}

fn is_field_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
