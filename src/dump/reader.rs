// ABOUTME: Pull parser for dump files producing typed rows one at a time
// ABOUTME: Validates version, encoding and metadata before any row is handed out

use crate::dump::lexer::{Lexer, NULL_TOKEN};
use crate::dump::types::{ColumnDescriptor, TypeKind};
use crate::dump::{DumpHeader, FileEncoding, DUMP_VERSION};
use crate::error::{DumpError, DumpResult};
use std::io::BufRead;

/// A typed cell read from a dump.
///
/// Integral values widen with their digit count: fewer than 10 digits is an
/// `Int`, fewer than 19 a `Long`, anything longer stays an exact `Decimal`.
/// Temporal values are kept as the canonical strings found in the file and
/// handed to the driver for conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Decimal(String),
    Double(f64),
    Text(String),
    Date(String),
    Time(String),
    Timestamp(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Textual form suitable for binding as a string parameter
    pub fn to_text(&self) -> Option<String> {
        match self {
            Value::Null => None,
            Value::Int(v) => Some(v.to_string()),
            Value::Long(v) => Some(v.to_string()),
            Value::Double(v) => Some(v.to_string()),
            Value::Decimal(s)
            | Value::Text(s)
            | Value::Date(s)
            | Value::Time(s)
            | Value::Timestamp(s) => Some(s.clone()),
        }
    }
}

/// Header and column layout of the table the reader is positioned in.
#[derive(Debug, Clone)]
pub struct TableDump {
    pub header: DumpHeader,
    pub columns: Vec<ColumnDescriptor>,
}

/// Clauses found after the data of a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableTrailer {
    pub declared_rows: Option<u64>,
    pub dump_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BetweenTables,
    InData,
    AfterData,
    Closed,
}

/// Reads the tables of a dump file in order.
///
/// Usage is `next_table`, then `next_row` until it yields `None`, then
/// `finish_table`. The next table can only be started after the current
/// one was finished.
pub struct DumpReader<R> {
    lex: Lexer<R>,
    state: State,
    rows_read: u64,
}

impl<R: BufRead> DumpReader<R> {
    pub fn new(reader: R, encoding: FileEncoding) -> Self {
        Self {
            lex: Lexer::new(reader, encoding),
            state: State::BetweenTables,
            rows_read: 0,
        }
    }

    pub fn line(&self) -> usize {
        self.lex.line()
    }

    /// Rows read so far in the current table
    pub fn rows_read(&self) -> u64 {
        self.rows_read
    }

    /// Read the next table's header and metadata, stopping at its data.
    ///
    /// Returns `Ok(None)` at a clean end of file.
    ///
    /// # Errors
    ///
    /// - [`DumpError::EncodingMismatch`] when the `file-encoding` clause names
    ///   a different encoding than the one the file was opened with
    /// - [`DumpError::UnsupportedVersion`] for dumps newer than this build
    /// - [`DumpError::MissingVersion`] when `meta` precedes `dump-version`
    /// - [`DumpError::NoMetadata`] when `data` precedes `meta`
    /// - syntax errors for anything malformed
    pub fn next_table(&mut self) -> DumpResult<Option<TableDump>> {
        if self.state != State::BetweenTables {
            return Err(DumpError::syntax(
                self.line(),
                "previous table was not finished",
            ));
        }
        if !self.lex.skip_whitespace()? {
            return Ok(None);
        }

        self.lex.expect('(')?;
        let keyword = self.lex.read_token()?;
        if keyword != "tabledump" {
            return Err(DumpError::syntax(
                self.line(),
                format!("expected 'tabledump' but got '{}'", keyword),
            ));
        }
        let name = self.required_string("table name")?;
        let mut header = DumpHeader::unread(name, self.lex.encoding());
        let mut columns: Option<Vec<ColumnDescriptor>> = None;
        self.rows_read = 0;

        loop {
            if self.lex.accept(')')? {
                // a table without a data clause
                self.state = State::Closed;
                return Ok(Some(TableDump {
                    header,
                    columns: columns.unwrap_or_default(),
                }));
            }
            self.lex.expect('(')?;
            let clause = self.lex.read_token()?;
            match clause.as_str() {
                "dump-version" => {
                    let version = self.lex.read_integer()?;
                    let compatible = self.lex.read_integer()?;
                    check_supported(compatible)?;
                    header.dump_version = version;
                    header.min_compatible_version = compatible;
                    self.lex.expect(')')?;
                }
                "file-encoding" => {
                    let declared = self.required_string("file encoding")?;
                    let encoding: FileEncoding = declared.parse()?;
                    if encoding != self.lex.encoding() {
                        return Err(DumpError::EncodingMismatch { declared });
                    }
                    header.file_encoding = encoding;
                    self.lex.expect(')')?;
                }
                "henplus-version" => {
                    header.producer_version = self.lex.read_string()?.unwrap_or_default();
                    self.lex.expect(')')?;
                }
                "time" => {
                    header.creation_time = self.lex.read_string()?.unwrap_or_default();
                    self.lex.expect(')')?;
                }
                "database-info" => {
                    header.database_info = self.lex.read_string()?.unwrap_or_default();
                    self.lex.expect(')')?;
                }
                "where-clause" => {
                    header.where_clause = self.lex.read_string()?;
                    self.lex.expect(')')?;
                }
                "estimated-rows" => {
                    header.estimated_rows = self.read_estimate()?;
                    self.lex.expect(')')?;
                }
                "meta" => {
                    if header.min_compatible_version == 0 {
                        return Err(DumpError::MissingVersion { line: self.line() });
                    }
                    columns = Some(self.read_meta()?);
                    self.lex.expect(')')?;
                }
                "data" => {
                    let Some(columns) = columns else {
                        return Err(DumpError::NoMetadata { line: self.line() });
                    };
                    self.state = State::InData;
                    return Ok(Some(TableDump { header, columns }));
                }
                other => {
                    tracing::warn!(
                        "⚠ line {}: skipping unknown clause '{}' in table '{}'",
                        self.line(),
                        other,
                        header.table_name
                    );
                    self.lex.skip_balanced()?;
                }
            }
        }
    }

    /// Read the next row of the current table, typed by `columns`.
    ///
    /// Updates each column's `max_length` with the width of the value read.
    /// Returns `Ok(None)` once the data clause is exhausted.
    pub fn next_row(
        &mut self,
        columns: &mut [ColumnDescriptor],
    ) -> DumpResult<Option<Vec<Value>>> {
        if self.state != State::InData {
            return Ok(None);
        }
        if !self.lex.skip_whitespace()? {
            return Err(DumpError::UnexpectedEof { line: self.line() });
        }
        if self.lex.accept(')')? {
            self.state = State::AfterData;
            return Ok(None);
        }

        self.lex.expect('(')?;
        let mut row = Vec::with_capacity(columns.len());
        for (i, column) in columns.iter_mut().enumerate() {
            if i > 0 {
                self.lex.expect(',')?;
            }
            let (value, width) = self.read_value(column.kind)?;
            if let Some(width) = width {
                column.observe_length(width);
            }
            row.push(value);
        }
        self.lex.expect(')')?;
        self.rows_read += 1;
        Ok(Some(row))
    }

    /// Read the trailing clauses of the current table through its closing paren.
    ///
    /// Rows not yet consumed are skipped.
    pub fn finish_table(&mut self) -> DumpResult<TableTrailer> {
        let mut trailer = TableTrailer::default();
        if self.state == State::BetweenTables {
            return Ok(trailer);
        }

        while self.state == State::InData {
            if self.lex.accept(')')? {
                self.state = State::AfterData;
            } else {
                self.lex.expect('(')?;
                self.lex.skip_balanced()?;
            }
        }

        if self.state == State::AfterData {
            loop {
                if self.lex.accept(')')? {
                    break;
                }
                self.lex.expect('(')?;
                let clause = self.lex.read_token()?;
                match clause.as_str() {
                    "rows" => {
                        let rows = self.lex.read_integer()?;
                        trailer.declared_rows = u64::try_from(rows).ok();
                        self.lex.expect(')')?;
                    }
                    "dump-error" => {
                        trailer.dump_error = self.lex.read_string()?;
                        self.lex.expect(')')?;
                    }
                    other => {
                        tracing::warn!(
                            "⚠ line {}: skipping unknown clause '{}'",
                            self.line(),
                            other
                        );
                        self.lex.skip_balanced()?;
                    }
                }
            }
        }

        self.state = State::BetweenTables;
        Ok(trailer)
    }

    fn required_string(&mut self, what: &str) -> DumpResult<String> {
        self.lex.read_string()?.ok_or_else(|| {
            DumpError::syntax(self.lex.line(), format!("{} must not be NULL", what))
        })
    }

    fn read_estimate(&mut self) -> DumpResult<Option<u64>> {
        self.lex.skip_whitespace()?;
        let estimate = if self.lex.peek()? == Some('\'') {
            let text = self.required_string("estimated rows")?;
            text.trim()
                .parse::<i64>()
                .map_err(|_| DumpError::InvalidNumber {
                    line: self.line(),
                    token: text,
                })?
        } else {
            self.lex.read_integer()?
        };
        Ok(u64::try_from(estimate).ok())
    }

    fn read_meta(&mut self) -> DumpResult<Vec<ColumnDescriptor>> {
        let names = self.read_string_list()?;
        let line = self.line();
        let kinds = self
            .read_string_list()?
            .iter()
            .map(|name| TypeKind::parse(name, line))
            .collect::<DumpResult<Vec<_>>>()?;
        if names.len() != kinds.len() {
            return Err(DumpError::syntax(
                self.line(),
                format!(
                    "meta lists {} field names but {} types",
                    names.len(),
                    kinds.len()
                ),
            ));
        }
        if names.is_empty() {
            return Err(DumpError::syntax(self.line(), "meta clause without fields"));
        }
        Ok(names
            .into_iter()
            .zip(kinds)
            .map(|(name, kind)| ColumnDescriptor::new(name, kind))
            .collect())
    }

    fn read_string_list(&mut self) -> DumpResult<Vec<String>> {
        self.lex.expect('(')?;
        let mut items = Vec::new();
        if self.lex.accept(')')? {
            return Ok(items);
        }
        loop {
            items.push(self.required_string("meta entry")?);
            if !self.lex.accept(',')? {
                self.lex.expect(')')?;
                return Ok(items);
            }
        }
    }

    /// Read one value; also returns the textual width used for `max_length`.
    fn read_value(&mut self, kind: TypeKind) -> DumpResult<(Value, Option<usize>)> {
        if !kind.is_numeric() {
            let Some(text) = self.lex.read_string()? else {
                return Ok((Value::Null, None));
            };
            let width = Some(text.chars().count());
            let value = match kind {
                TypeKind::Date => Value::Date(text),
                TypeKind::Time => Value::Time(text),
                TypeKind::Timestamp => Value::Timestamp(text),
                _ => Value::Text(text),
            };
            return Ok((value, width));
        }

        self.lex.skip_whitespace()?;
        let token = if self.lex.peek()? == Some('\'') {
            // tolerate producers that quote numbers
            self.required_string("number")?.trim().to_string()
        } else {
            let token = self.lex.read_number_token()?;
            if token.eq_ignore_ascii_case(NULL_TOKEN) {
                return Ok((Value::Null, None));
            }
            token
        };
        let width = Some(token.chars().count());
        Ok((parse_number(&token, kind, self.line())?, width))
    }
}

fn check_supported(version: i64) -> DumpResult<()> {
    if version <= 0 || version > DUMP_VERSION {
        return Err(DumpError::UnsupportedVersion {
            found: version,
            supported: DUMP_VERSION,
        });
    }
    Ok(())
}

fn parse_number(token: &str, kind: TypeKind, line: usize) -> DumpResult<Value> {
    let invalid = || DumpError::InvalidNumber {
        line,
        token: token.to_string(),
    };

    if kind == TypeKind::Double {
        return token.parse::<f64>().map(Value::Double).map_err(|_| invalid());
    }

    if token.contains(['.', 'e', 'E']) {
        // exact decimal: keep the text, but only if it is a number
        token.parse::<f64>().map_err(|_| invalid())?;
        if token.chars().any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E') {
            return Err(invalid());
        }
        return Ok(Value::Decimal(token.to_string()));
    }

    let digits = token.strip_prefix(['-', '+']).unwrap_or(token);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if digits.len() < 10 {
        token.parse::<i32>().map(Value::Int).map_err(|_| invalid())
    } else if digits.len() < 19 {
        token.parse::<i64>().map(Value::Long).map_err(|_| invalid())
    } else {
        Ok(Value::Decimal(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "(tabledump 'people'\n\
        \x20 (file-encoding 'UTF-8')\n\
        \x20 (dump-version 1 1)\n\
        \x20 (henplus-version 'tabledump test')\n\
        \x20 (time '2026-01-02 03:04:05.000')\n\
        \x20 (database-info 'SQLite 3')\n\
        \x20 (estimated-rows '2')\n\
        \x20 (meta ('id'     , 'name'  , 'score')\n\
        \t('INTEGER', 'STRING', 'DOUBLE'))\n\
        \x20 (data (1,'O\\'Brien\\\\Co',1.5)\n\
        \t(- 2,NULL,NULL))\n\
        \x20 (rows 2))\n\n";

    fn reader(text: &str) -> DumpReader<&[u8]> {
        DumpReader::new(text.as_bytes(), FileEncoding::Utf8)
    }

    #[test]
    fn test_reads_header_meta_rows_and_trailer() {
        let mut reader = reader(SAMPLE);
        let TableDump {
            header,
            mut columns,
        } = reader.next_table().unwrap().unwrap();
        assert_eq!(header.table_name, "people");
        assert_eq!(header.dump_version, 1);
        assert_eq!(header.database_info, "SQLite 3");
        assert_eq!(header.estimated_rows, Some(2));
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[2].kind, TypeKind::Double);

        let row = reader.next_row(&mut columns).unwrap().unwrap();
        assert_eq!(
            row,
            vec![
                Value::Int(1),
                Value::Text(r"O'Brien\Co".to_string()),
                Value::Double(1.5)
            ]
        );
        let row = reader.next_row(&mut columns).unwrap().unwrap();
        assert_eq!(row, vec![Value::Int(-2), Value::Null, Value::Null]);
        assert!(reader.next_row(&mut columns).unwrap().is_none());

        let trailer = reader.finish_table().unwrap();
        assert_eq!(trailer.declared_rows, Some(2));
        assert_eq!(columns[1].max_length, Some(10));
        assert!(reader.next_table().unwrap().is_none());
    }

    #[test]
    fn test_quoted_null_in_numeric_column_is_not_null() {
        let text = SAMPLE.replace("(- 2,NULL,NULL)", "(null,NULL,'NULL')");
        let mut quoted = reader(&text);
        let mut columns = quoted.next_table().unwrap().unwrap().columns;
        quoted.next_row(&mut columns).unwrap();
        assert!(matches!(
            quoted.next_row(&mut columns),
            Err(DumpError::InvalidNumber { ref token, .. }) if token == "NULL"
        ));

        let text = SAMPLE.replace("(- 2,NULL,NULL)", "(null,NULL,'7')");
        let mut numeric = reader(&text);
        let mut columns = numeric.next_table().unwrap().unwrap().columns;
        numeric.next_row(&mut columns).unwrap();
        let row = numeric.next_row(&mut columns).unwrap().unwrap();
        assert_eq!(row, vec![Value::Null, Value::Null, Value::Double(7.0)]);
    }

    #[test]
    fn test_newer_version_is_rejected_before_rows() {
        let text = SAMPLE.replace("(dump-version 1 1)", "(dump-version 2 2)");
        let err = reader(&text).next_table().unwrap_err();
        assert!(matches!(
            err,
            DumpError::UnsupportedVersion {
                found: 2,
                supported: 1
            }
        ));
    }

    #[test]
    fn test_newer_writer_with_compatible_minimum_is_accepted() {
        let text = SAMPLE.replace("(dump-version 1 1)", "(dump-version 3 1)");
        let table = reader(&text).next_table().unwrap().unwrap();
        assert_eq!(table.header.dump_version, 3);
    }

    #[test]
    fn test_meta_before_version_is_rejected() {
        let text = SAMPLE.replace("  (dump-version 1 1)\n", "");
        let err = reader(&text).next_table().unwrap_err();
        assert!(matches!(err, DumpError::MissingVersion { .. }));
    }

    #[test]
    fn test_data_without_meta_is_rejected() {
        let text = "(tabledump 't' (dump-version 1 1) (data (1)) (rows 1))";
        let err = reader(text).next_table().unwrap_err();
        assert!(matches!(err, DumpError::NoMetadata { line: 1 }));
    }

    #[test]
    fn test_encoding_mismatch_is_detected() {
        let text = SAMPLE.replace("'UTF-8'", "'ISO-8859-1'");
        match reader(&text).next_table().unwrap_err() {
            DumpError::EncodingMismatch { declared } => assert_eq!(declared, "ISO-8859-1"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_unknown_clauses_are_skipped() {
        let text = SAMPLE
            .replace(
                "  (time",
                "  (checksum 'abc' (nested 'x)')) (time",
            )
            .replace("  (rows 2))", "  (dump-error 'lost connection')\n  (rows 2))");
        let mut reader = reader(&text);
        let mut table = reader.next_table().unwrap().unwrap();
        while reader.next_row(&mut table.columns).unwrap().is_some() {}
        let trailer = reader.finish_table().unwrap();
        assert_eq!(trailer.dump_error.as_deref(), Some("lost connection"));
        assert_eq!(trailer.declared_rows, Some(2));
    }

    #[test]
    fn test_finish_skips_unread_rows() {
        let text = format!("{SAMPLE}{SAMPLE}");
        let mut reader = reader(&text);
        let mut table = reader.next_table().unwrap().unwrap();
        assert!(reader.next_row(&mut table.columns).unwrap().is_some());
        assert_eq!(reader.finish_table().unwrap().declared_rows, Some(2));
        assert!(reader.next_table().unwrap().is_some());
    }

    #[test]
    fn test_bare_estimate_is_accepted() {
        let text = SAMPLE.replace("(estimated-rows '2')", "(estimated-rows 2)");
        let table = reader(&text).next_table().unwrap().unwrap();
        assert_eq!(table.header.estimated_rows, Some(2));

        let text = SAMPLE.replace("(estimated-rows '2')", "(estimated-rows '-1')");
        let table = reader(&text).next_table().unwrap().unwrap();
        assert_eq!(table.header.estimated_rows, None);
    }

    #[test]
    fn test_number_widening() {
        assert_eq!(parse_number("123456789", TypeKind::Integer, 1).unwrap(), Value::Int(123456789));
        assert_eq!(
            parse_number("1234567890", TypeKind::Numeric, 1).unwrap(),
            Value::Long(1234567890)
        );
        assert_eq!(
            parse_number("12345678901234567890", TypeKind::Numeric, 1).unwrap(),
            Value::Decimal("12345678901234567890".to_string())
        );
        assert_eq!(
            parse_number("12.50", TypeKind::Numeric, 1).unwrap(),
            Value::Decimal("12.50".to_string())
        );
        assert_eq!(parse_number("2.5", TypeKind::Double, 1).unwrap(), Value::Double(2.5));
        assert!(matches!(
            parse_number("12abc", TypeKind::Integer, 9),
            Err(DumpError::InvalidNumber { line: 9, .. })
        ));
        assert!(parse_number("NaN", TypeKind::Numeric, 1).is_err());
    }

    #[test]
    fn test_errors_carry_line_numbers() {
        let text = SAMPLE.replace("(- 2,NULL,NULL)", "(- 2,NULL NULL)");
        let mut reader = reader(&text);
        let mut table = reader.next_table().unwrap().unwrap();
        reader.next_row(&mut table.columns).unwrap();
        let err = reader.next_row(&mut table.columns).unwrap_err();
        assert!(matches!(err, DumpError::Expected { line: 11, expected: ',', .. }));
    }
}
