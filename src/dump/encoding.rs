// ABOUTME: Character encodings supported for dump files
// ABOUTME: Decodes input bytes into a line-counting char stream and encodes output text

use crate::error::{DumpError, DumpResult};
use std::fmt;
use std::io::BufRead;
use std::str::FromStr;

/// Encoding of a dump file's bytes.
///
/// The encoding a dump is written in is recorded in its `file-encoding`
/// clause. A reader opened with a different encoding detects the mismatch
/// when it reaches that clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileEncoding {
    #[default]
    Utf8,
    Latin1,
    Ascii,
}

impl FileEncoding {
    pub fn name(self) -> &'static str {
        match self {
            FileEncoding::Utf8 => "UTF-8",
            FileEncoding::Latin1 => "ISO-8859-1",
            FileEncoding::Ascii => "US-ASCII",
        }
    }

    /// Encode `text` into `out`; characters the encoding cannot represent become `?`
    pub fn encode_into(self, text: &str, out: &mut Vec<u8>) {
        match self {
            FileEncoding::Utf8 => out.extend_from_slice(text.as_bytes()),
            FileEncoding::Latin1 => {
                out.extend(text.chars().map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?')))
            }
            FileEncoding::Ascii => out.extend(
                text.chars()
                    .map(|c| if c.is_ascii() { c as u8 } else { b'?' }),
            ),
        }
    }
}

impl fmt::Display for FileEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FileEncoding {
    type Err = DumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "utf8" => Ok(FileEncoding::Utf8),
            "iso88591" | "latin1" | "l1" | "iso8859" | "cp819" => Ok(FileEncoding::Latin1),
            "usascii" | "ascii" | "ansix3.41968" => Ok(FileEncoding::Ascii),
            _ => Err(DumpError::UnsupportedEncoding(s.to_string())),
        }
    }
}

/// Decoded character stream over a byte reader.
///
/// Keeps one character of lookahead and counts lines (1-based) so the lexer
/// can attach positions to every error.
pub struct CharSource<R> {
    inner: R,
    encoding: FileEncoding,
    peeked: Option<Option<char>>,
    line: usize,
}

impl<R: BufRead> CharSource<R> {
    pub fn new(inner: R, encoding: FileEncoding) -> Self {
        Self {
            inner,
            encoding,
            peeked: None,
            line: 1,
        }
    }

    pub fn encoding(&self) -> FileEncoding {
        self.encoding
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn peek(&mut self) -> DumpResult<Option<char>> {
        if let Some(c) = self.peeked {
            return Ok(c);
        }
        let c = self.decode()?;
        self.peeked = Some(c);
        Ok(c)
    }

    pub fn next_char(&mut self) -> DumpResult<Option<char>> {
        let c = match self.peeked.take() {
            Some(c) => c,
            None => self.decode()?,
        };
        if c == Some('\n') {
            self.line += 1;
        }
        Ok(c)
    }

    fn next_byte(&mut self) -> DumpResult<Option<u8>> {
        let buf = self.inner.fill_buf()?;
        match buf.first().copied() {
            Some(b) => {
                self.inner.consume(1);
                Ok(Some(b))
            }
            None => Ok(None),
        }
    }

    fn peek_byte(&mut self) -> DumpResult<Option<u8>> {
        Ok(self.inner.fill_buf()?.first().copied())
    }

    fn decode(&mut self) -> DumpResult<Option<char>> {
        let Some(first) = self.next_byte()? else {
            return Ok(None);
        };
        match self.encoding {
            FileEncoding::Latin1 => Ok(Some(char::from(first))),
            FileEncoding::Ascii if first.is_ascii() => Ok(Some(char::from(first))),
            FileEncoding::Ascii => Ok(Some(char::REPLACEMENT_CHARACTER)),
            FileEncoding::Utf8 => self.decode_utf8(first).map(Some),
        }
    }

    fn decode_utf8(&mut self, first: u8) -> DumpResult<char> {
        let width = match first {
            0x00..=0x7f => return Ok(char::from(first)),
            0xc2..=0xdf => 2,
            0xe0..=0xef => 3,
            0xf0..=0xf4 => 4,
            _ => return Ok(char::REPLACEMENT_CHARACTER),
        };
        let mut bytes = [first, 0, 0, 0];
        for slot in bytes.iter_mut().take(width).skip(1) {
            // continuation bytes are only consumed when they fit the sequence
            match self.peek_byte()? {
                Some(b) if b & 0xc0 == 0x80 => {
                    self.inner.consume(1);
                    *slot = b;
                }
                _ => return Ok(char::REPLACEMENT_CHARACTER),
            }
        }
        Ok(std::str::from_utf8(&bytes[..width])
            .ok()
            .and_then(|s| s.chars().next())
            .unwrap_or(char::REPLACEMENT_CHARACTER))
    }
}
