// ABOUTME: Typed errors raised while reading and writing dump files
// ABOUTME: Every format error carries the 1-based line it was detected on

use thiserror::Error;

/// Errors produced by the dump format layer.
///
/// Command code wraps these in `anyhow` with context; the import controller
/// downcasts to [`DumpError::EncodingMismatch`] to decide whether a file is
/// worth reopening.
#[derive(Debug, Error)]
pub enum DumpError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("line {line}: expected '{expected}' but got {}", describe_found(.found))]
    Expected {
        line: usize,
        expected: char,
        found: Option<char>,
    },

    #[error("line {line}: unexpected end of file")]
    UnexpectedEof { line: usize },

    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    #[error("line {line}: unknown type '{name}'")]
    UnknownType { line: usize, name: String },

    #[error("line {line}: no 'meta' clause before data")]
    NoMetadata { line: usize },

    #[error("line {line}: 'meta' clause found before 'dump-version'")]
    MissingVersion { line: usize },

    #[error("incompatible dump version {found}; this build reads up to version {supported}")]
    UnsupportedVersion { found: i64, supported: i64 },

    #[error("file encoding mismatch: file declares '{declared}'")]
    EncodingMismatch { declared: String },

    #[error("unsupported file encoding '{0}'")]
    UnsupportedEncoding(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_found(found: &Option<char>) -> String {
    match found {
        Some(c) => format!("'{}'", c),
        None => "end of file".to_string(),
    }
}

impl DumpError {
    pub fn syntax(line: usize, message: impl Into<String>) -> Self {
        DumpError::Syntax {
            line,
            message: message.into(),
        }
    }
}

pub type DumpResult<T> = std::result::Result<T, DumpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_line_numbers() {
        let err = DumpError::Expected {
            line: 7,
            expected: ')',
            found: Some(','),
        };
        assert_eq!(err.to_string(), "line 7: expected ')' but got ','");

        let err = DumpError::Expected {
            line: 3,
            expected: '(',
            found: None,
        };
        assert_eq!(err.to_string(), "line 3: expected '(' but got end of file");

        let err = DumpError::syntax(12, "data row too long");
        assert_eq!(err.to_string(), "line 12: data row too long");
    }
}
