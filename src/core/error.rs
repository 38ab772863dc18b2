use crate::core::firewall::Field;
use std::fmt;
use thiserror::Error;

/// Core error types for fwrule
#[derive(Debug, Error)]
pub enum Error {
    /// Input the lexer could not match
    #[error("Error at character {position}: '{upcoming}', found: unexpected text")]
    UnexpectedText { position: usize, upcoming: String },

    /// Quoted string with no closing quote
    #[error("Error at character {position}: unterminated string")]
    UnterminatedString { position: usize },

    /// Backslash escape not understood inside a quoted string
    #[error("Error at character {position}: invalid escape sequence \"{sequence}\"")]
    InvalidEscape { position: usize, sequence: String },

    /// Rule text was empty
    #[error("Error at character 0: '', expected: 'FROM', found: empty string")]
    EmptyRule,

    /// Token not allowed at this point of the grammar
    #[error(
        "Error at character {position}: '{text}', expected: {}, found: {found}",
        quote_all(.expected)
    )]
    UnexpectedToken {
        position: usize,
        text: String,
        expected: Vec<&'static str>,
        found: &'static str,
    },

    /// A payload field or rule value failed validation
    #[error("{message}")]
    InvalidParam { field: Field, message: String },

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn quote_all(names: &[&str]) -> String {
    names
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl Error {
    /// Validation error attributed to a payload field
    pub fn invalid(field: Field, message: impl Into<String>) -> Self {
        Error::InvalidParam {
            field,
            message: message.into(),
        }
    }

    /// Payload field the error is attributed to.
    ///
    /// Lexer and grammar errors belong to the rule text. Config loading
    /// errors aren't attributed to a payload field.
    pub fn field(&self) -> Option<Field> {
        match self {
            Error::InvalidParam { field, .. } => Some(*field),
            Error::Io(_) | Error::Serialization(_) => None,
            _ => Some(Field::Rule),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Every problem found while building a rule.
///
/// Never empty. Displays as the lone message when there is one error, and
/// as `first of N errors: <message>` otherwise.
#[derive(Debug)]
pub struct ValidationErrors {
    errors: Vec<Error>,
}

impl ValidationErrors {
    /// Wraps a list of errors, returning `None` if the list is empty
    pub fn from_vec(errors: Vec<Error>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self { errors })
        }
    }

    pub fn first(&self) -> &Error {
        &self.errors[0]
    }

    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// Always `false`; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    pub fn into_vec(self) -> Vec<Error> {
        self.errors
    }
}

impl From<Error> for ValidationErrors {
    fn from(error: Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl<'a> IntoIterator for &'a ValidationErrors {
    type Item = &'a Error;
    type IntoIter = std::slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.errors.len() == 1 {
            self.first().fmt(f)
        } else {
            write!(f, "first of {} errors: {}", self.errors.len(), self.first())
        }
    }
}

impl std::error::Error for ValidationErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.first())
    }
}
