use chumsky::error::{Simple, SimpleReason};
use otterc_span::Span;
use otterc_utils::errors::Diagnostic;
use std::error::Error;
use std::fmt::Display;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn to_diagnostic(&self, source_id: &str) -> Diagnostic {
        let diag = Diagnostic::error(source_id, self.span, self.message.clone());

        if self.message.contains("unexpected end of input") {
            diag.with_label("input ends here")
                .with_help("Check for a missing operand or an unclosed parenthesis or quote.")
        } else if self.message.contains("unclosed") {
            diag.with_label("opened here")
                .with_help("Every `(` needs a matching `)`.")
        } else {
            diag.with_label("not expected here")
        }
    }
}

impl From<Simple<char>> for ParseError {
    fn from(value: Simple<char>) -> Self {
        let span = Span::from(value.span());
        let message = match value.reason() {
            SimpleReason::Custom(message) => message.clone(),
            SimpleReason::Unclosed { delimiter, .. } => {
                format!("unclosed delimiter `{delimiter}`")
            }
            SimpleReason::Unexpected => match value.found() {
                Some(found) => format!("unexpected character `{found}`{}", expected_suffix(&value)),
                None => format!("unexpected end of input{}", expected_suffix(&value)),
            },
        };
        Self { message, span }
    }
}

fn expected_suffix(error: &Simple<char>) -> String {
    let mut expected: Vec<String> = error
        .expected()
        .filter_map(|item| item.as_ref().map(|ch| format!("`{ch}`")))
        .collect();
    if expected.is_empty() {
        return String::new();
    }
    expected.sort();
    expected.dedup();
    format!(", expected one of {}", expected.join(", "))
}

impl Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ParseError at {}: {}", self.span, self.message)
    }
}

impl Error for ParseError {}
