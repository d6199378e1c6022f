// ABOUTME: Streaming tokenizer for the dump format
// ABOUTME: Reads tokens, quoted strings, NULL and punctuation with line-tagged errors

use crate::dump::encoding::{CharSource, FileEncoding};
use crate::error::{DumpError, DumpResult};
use std::io::BufRead;

pub const NULL_TOKEN: &str = "NULL";

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ';' | ',' | '(' | ')')
}

/// Tokenizer over a decoded character stream.
///
/// Nothing is buffered beyond one character of lookahead, so arbitrarily
/// large dumps are read in constant memory.
pub struct Lexer<R> {
    source: CharSource<R>,
}

impl<R: BufRead> Lexer<R> {
    pub fn new(reader: R, encoding: FileEncoding) -> Self {
        Self {
            source: CharSource::new(reader, encoding),
        }
    }

    pub fn line(&self) -> usize {
        self.source.line()
    }

    pub fn encoding(&self) -> FileEncoding {
        self.source.encoding()
    }

    pub fn peek(&mut self) -> DumpResult<Option<char>> {
        self.source.peek()
    }

    pub fn next_char(&mut self) -> DumpResult<Option<char>> {
        self.source.next_char()
    }

    /// Skip whitespace; returns `false` if the end of input was reached.
    pub fn skip_whitespace(&mut self) -> DumpResult<bool> {
        loop {
            match self.source.peek()? {
                Some(c) if c.is_whitespace() => {
                    self.source.next_char()?;
                }
                Some(_) => return Ok(true),
                None => return Ok(false),
            }
        }
    }

    /// Read a bare token up to the next whitespace or `;` `,` `(` `)`.
    ///
    /// The delimiter itself is left in the stream. Returns an empty string
    /// when positioned directly on a delimiter.
    pub fn read_token(&mut self) -> DumpResult<String> {
        self.skip_whitespace()?;
        let mut token = String::new();
        while let Some(c) = self.source.peek()? {
            if is_delimiter(c) {
                break;
            }
            token.push(c);
            self.source.next_char()?;
        }
        Ok(token)
    }

    /// Read a quoted string or an unquoted `NULL` (any case).
    ///
    /// Inside quotes a backslash escapes the following character, so `\'`
    /// and `\\` stand for a quote and a backslash.
    pub fn read_string(&mut self) -> DumpResult<Option<String>> {
        if !self.skip_whitespace()? {
            return Err(DumpError::UnexpectedEof { line: self.line() });
        }
        if self.source.peek()? != Some('\'') {
            let token = self.read_token()?;
            if token.eq_ignore_ascii_case(NULL_TOKEN) {
                return Ok(None);
            }
            return Err(DumpError::syntax(
                self.line(),
                format!("expected quoted string or NULL but got '{}'", token),
            ));
        }
        self.source.next_char()?;

        let mut value = String::new();
        loop {
            match self.source.next_char()? {
                Some('\\') => match self.source.next_char()? {
                    Some(escaped) => value.push(escaped),
                    None => return Err(DumpError::UnexpectedEof { line: self.line() }),
                },
                Some('\'') => return Ok(Some(value)),
                Some(c) => value.push(c),
                None => return Err(DumpError::UnexpectedEof { line: self.line() }),
            }
        }
    }

    /// Skip whitespace and consume `expected`, failing with the character found instead.
    pub fn expect(&mut self, expected: char) -> DumpResult<()> {
        self.skip_whitespace()?;
        let line = self.line();
        match self.source.next_char()? {
            Some(c) if c == expected => Ok(()),
            found => Err(DumpError::Expected {
                line,
                expected,
                found,
            }),
        }
    }

    /// Consume `c` if it is the next non-whitespace character.
    pub fn accept(&mut self, c: char) -> DumpResult<bool> {
        self.skip_whitespace()?;
        if self.source.peek()? == Some(c) {
            self.source.next_char()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Read a possibly signed number token.
    ///
    /// A sign separated from its digits by whitespace is joined with the
    /// following token.
    pub fn read_number_token(&mut self) -> DumpResult<String> {
        let mut token = self.read_token()?;
        if token == "-" || token == "+" {
            let rest = self.read_token()?;
            token.push_str(&rest);
        }
        if token.is_empty() {
            let found = self.peek()?;
            return Err(match found {
                Some(c) => DumpError::syntax(
                    self.line(),
                    format!("expected number but got '{}'", c),
                ),
                None => DumpError::UnexpectedEof { line: self.line() },
            });
        }
        Ok(token)
    }

    /// Read an integral token such as a version or row count.
    pub fn read_integer(&mut self) -> DumpResult<i64> {
        let token = self.read_number_token()?;
        token.parse::<i64>().map_err(|_| DumpError::InvalidNumber {
            line: self.line(),
            token,
        })
    }

    /// Skip the remainder of a clause through its closing paren.
    ///
    /// Nested parens and quoted strings are honored, so clauses added by a
    /// newer producer can be passed over without understanding them.
    pub fn skip_balanced(&mut self) -> DumpResult<()> {
        let mut depth = 1usize;
        loop {
            match self.source.next_char()? {
                Some('(') => depth += 1,
                Some(')') => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(());
                    }
                }
                Some('\'') => loop {
                    match self.source.next_char()? {
                        Some('\\') => {
                            self.source.next_char()?;
                        }
                        Some('\'') => break,
                        Some(_) => {}
                        None => return Err(DumpError::UnexpectedEof { line: self.line() }),
                    }
                },
                Some(_) => {}
                None => return Err(DumpError::UnexpectedEof { line: self.line() }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer(input: &str) -> Lexer<&[u8]> {
        Lexer::new(input.as_bytes(), FileEncoding::Utf8)
    }

    #[test]
    fn test_read_token_stops_at_delimiters() {
        let mut lex = lexer("  tabledump 'x'");
        assert_eq!(lex.read_token().unwrap(), "tabledump");
        assert_eq!(lex.read_string().unwrap(), Some("x".to_string()));

        let mut lex = lexer("42,17)");
        assert_eq!(lex.read_token().unwrap(), "42");
        lex.expect(',').unwrap();
        assert_eq!(lex.read_token().unwrap(), "17");
        lex.expect(')').unwrap();
    }

    #[test]
    fn test_read_string_escapes() {
        let mut lex = lexer(r"'O\'Brien\\Co'");
        assert_eq!(lex.read_string().unwrap(), Some(r"O'Brien\Co".to_string()));
    }

    #[test]
    fn test_read_string_null_any_case() {
        let mut lex = lexer("NULL, null ,Null)");
        assert_eq!(lex.read_string().unwrap(), None);
        lex.expect(',').unwrap();
        assert_eq!(lex.read_string().unwrap(), None);
        lex.expect(',').unwrap();
        assert_eq!(lex.read_string().unwrap(), None);
    }

    #[test]
    fn test_read_string_rejects_bare_words() {
        let err = lexer("hello").read_string().unwrap_err();
        assert!(matches!(err, DumpError::Syntax { line: 1, .. }));
    }

    #[test]
    fn test_unterminated_string_is_error() {
        let err = lexer("'never closed\n").read_string().unwrap_err();
        assert!(matches!(err, DumpError::UnexpectedEof { line: 2 }));
    }

    #[test]
    fn test_expect_reports_line_and_found() {
        let mut lex = lexer("\n\n  ,");
        match lex.expect('(').unwrap_err() {
            DumpError::Expected {
                line,
                expected,
                found,
            } => {
                assert_eq!(line, 3);
                assert_eq!(expected, '(');
                assert_eq!(found, Some(','));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_number_with_separated_sign() {
        let mut lex = lexer("- 42,+7");
        assert_eq!(lex.read_number_token().unwrap(), "-42");
        lex.expect(',').unwrap();
        assert_eq!(lex.read_number_token().unwrap(), "+7");
    }

    #[test]
    fn test_skip_balanced_honors_quotes() {
        let mut lex = lexer("'a)(b' (nested 'x\\'') more) rest");
        lex.skip_balanced().unwrap();
        assert_eq!(lex.read_token().unwrap(), "rest");
    }
}
