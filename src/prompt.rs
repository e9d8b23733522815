//! Prompt templates and conversation-aware prompt formatting.
//!
//! Templates use `{field}` placeholders resolved against the
//! [`ExecutionInput`]. `{{` and `}}` produce literal braces. Templates are
//! parsed once, when a turn is built, so malformed templates fail at
//! construction rather than mid-execution.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{Error, ExecutionInput, Result};

/// Marker opening a human turn.
pub const HUMAN_PROMPT: &str = "\n\nHuman:";
/// Marker opening the assistant's reply.
pub const AI_PROMPT: &str = "\n\nAssistant:";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Field(String),
}

/// A parsed prompt template.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{ExecutionInput, PromptTemplate};
///
/// let template = PromptTemplate::parse("Write a 1-2 sentence summary for the book {novel}.").unwrap();
/// assert_eq!(template.fields(), vec!["novel"]);
///
/// let input = ExecutionInput::new().with("novel", "Dune");
/// assert_eq!(
///     template.render(&input).unwrap(),
///     "Write a 1-2 sentence summary for the book Dune."
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    source: String,
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Parse `source`, rejecting unbalanced braces and empty placeholders.
    pub fn parse(source: impl Into<String>) -> Result<Self> {
        let source = source.into();
        let mut segments = Vec::new();
        let mut literal = String::new();
        let mut chars = source.char_indices().peekable();

        while let Some((pos, c)) = chars.next() {
            match c {
                '{' if chars.peek().map(|&(_, n)| n) == Some('{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek().map(|&(_, n)| n) == Some('}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for (_, n) in chars.by_ref() {
                        if n == '}' {
                            closed = true;
                            break;
                        }
                        name.push(n);
                    }
                    if !closed {
                        return Err(Error::Template(format!(
                            "unclosed '{{' at byte {pos} in {source:?}"
                        )));
                    }
                    let name = name.trim();
                    if name.is_empty() || name.contains('{') {
                        return Err(Error::Template(format!(
                            "invalid placeholder at byte {pos} in {source:?}"
                        )));
                    }
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(name.to_string()));
                }
                '}' => {
                    return Err(Error::Template(format!(
                        "unmatched '}}' at byte {pos} in {source:?}"
                    )));
                }
                other => literal.push(other),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }

        Ok(Self { source, segments })
    }

    /// The template text as written.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Names of the input fields referenced, in order of first use.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields: Vec<&str> = Vec::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                if !fields.contains(&name.as_str()) {
                    fields.push(name.as_str());
                }
            }
        }
        fields
    }

    /// Substitute every placeholder from `input`.
    pub fn render(&self, input: &ExecutionInput) -> Result<String> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Field(name) => {
                    let value = input
                        .get_text(name)
                        .ok_or_else(|| Error::MissingInput(name.clone()))?;
                    out.push_str(&value);
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

impl Serialize for PromptTemplate {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for PromptTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        PromptTemplate::parse(source).map_err(serde::de::Error::custom)
    }
}

/// Render one human turn, optionally prefixed by the conversation so far.
///
/// With `previous = Some(conversation)` the result is
/// `conversation + HUMAN_PROMPT + rendered + AI_PROMPT`; with `None` the
/// conversation prefix is omitted.
///
/// # Example
///
/// ```rust
/// use prompt_chain::{format_prompt, ExecutionInput, PromptTemplate};
///
/// let template = PromptTemplate::parse("Write a 1-2 sentence summary for the book {novel}.").unwrap();
/// let input = ExecutionInput::new().with("novel", "Dune");
///
/// let prompt = format_prompt(&template, &input, None).unwrap();
/// assert_eq!(
///     prompt,
///     "\n\nHuman:Write a 1-2 sentence summary for the book Dune.\n\nAssistant:"
/// );
/// ```
pub fn format_prompt(
    template: &PromptTemplate,
    input: &ExecutionInput,
    previous: Option<&str>,
) -> Result<String> {
    let rendered = template.render(input)?;
    let prefix = previous.unwrap_or_default();
    let mut prompt =
        String::with_capacity(prefix.len() + HUMAN_PROMPT.len() + rendered.len() + AI_PROMPT.len());
    prompt.push_str(prefix);
    prompt.push_str(HUMAN_PROMPT);
    prompt.push_str(&rendered);
    prompt.push_str(AI_PROMPT);
    Ok(prompt)
}
