//! Script parsing: recovers argument names and types from transaction source.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A declared parameter of a transaction or script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub identifier: String,
    #[serde(rename = "type")]
    pub type_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedInteraction {
    pub parameters: Vec<Parameter>,
}

/// Result of parsing a script. A parser may return partial metadata alongside
/// an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub interaction: Option<ParsedInteraction>,
    pub error: Option<String>,
}

impl ParseOutcome {
    pub fn ok(interaction: ParsedInteraction) -> Self {
        Self {
            interaction: Some(interaction),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            interaction: None,
            error: Some(error.into()),
        }
    }
}

/// Extracts interaction metadata from script source.
#[async_trait]
pub trait ScriptParser: Send + Sync {
    async fn parse(&self, source: &str) -> ParseOutcome;
}

/// Parser that reads the parameter list of the `transaction(...)` or
/// `fun main(...)` declaration.
pub struct SignatureParser {
    transaction_params: Regex,
    transaction_bare: Regex,
    main_params: Regex,
}

impl SignatureParser {
    pub fn new() -> Self {
        Self {
            transaction_params: Regex::new(r"(?s)\btransaction\s*\((.*?)\)\s*(?:\{|prepare|execute)")
                .expect("static regex"),
            transaction_bare: Regex::new(r"\btransaction\s*\{").expect("static regex"),
            main_params: Regex::new(r"(?s)\bfun\s+main\s*\((.*?)\)\s*(?::|\{)")
                .expect("static regex"),
        }
    }

    fn parameter_list<'a>(&self, source: &'a str) -> Option<&'a str> {
        if let Some(c) = self.transaction_params.captures(source) {
            return c.get(1).map(|m| m.as_str());
        }
        if self.transaction_bare.is_match(source) {
            return Some("");
        }
        self.main_params
            .captures(source)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str())
    }
}

impl Default for SignatureParser {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScriptParser for SignatureParser {
    async fn parse(&self, source: &str) -> ParseOutcome {
        let Some(list) = self.parameter_list(source) else {
            return ParseOutcome::failed("no transaction or main declaration found");
        };
        let mut parameters = Vec::new();
        for raw in split_top_level(list) {
            match parse_parameter(raw) {
                Some(p) => parameters.push(p),
                None => {
                    return ParseOutcome {
                        interaction: Some(ParsedInteraction { parameters }),
                        error: Some(format!("malformed parameter: `{}`", raw.trim())),
                    }
                }
            }
        }
        ParseOutcome::ok(ParsedInteraction { parameters })
    }
}

/// Split on commas that are not nested inside `{}`, `[]`, `()` or `<>`.
fn split_top_level(list: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in list.char_indices() {
        match c {
            '{' | '[' | '(' | '<' => depth += 1,
            '}' | ']' | ')' | '>' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&list[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&list[start..]);
    parts.into_iter().filter(|p| !p.trim().is_empty()).collect()
}

fn parse_parameter(raw: &str) -> Option<Parameter> {
    let (label, type_name) = raw.split_once(':')?;
    // Argument labels (`_ amount: UFix64`) precede the identifier.
    let identifier = label.split_whitespace().last()?;
    let type_name = type_name.trim();
    if type_name.is_empty() {
        return None;
    }
    Some(Parameter {
        identifier: identifier.to_string(),
        type_name: type_name.to_string(),
    })
}
