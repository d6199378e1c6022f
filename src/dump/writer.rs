// ABOUTME: Serializes table headers, metadata and rows into the dump format
// ABOUTME: Quotes textual kinds, writes numeric kinds bare and validates them first

use crate::dump::types::{ColumnDescriptor, TypeKind};
use crate::dump::{DumpHeader, FileEncoding};
use crate::error::{DumpError, DumpResult};
use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    InData,
}

/// Writes one or more table dumps into a byte sink.
///
/// Each table is written as `begin_table`, any number of `write_row`
/// calls and `end_table` (or `abort_table` when the source failed halfway).
/// Output is encoded with the encoding given at construction; characters it
/// cannot represent become `?`.
pub struct DumpWriter<W: Write> {
    out: W,
    encoding: FileEncoding,
    columns: Vec<ColumnDescriptor>,
    rows: u64,
    line: usize,
    state: State,
    buf: Vec<u8>,
}

impl<W: Write> DumpWriter<W> {
    pub fn new(out: W, encoding: FileEncoding) -> Self {
        Self {
            out,
            encoding,
            columns: Vec::new(),
            rows: 0,
            line: 1,
            state: State::Idle,
            buf: Vec::with_capacity(4096),
        }
    }

    pub fn encoding(&self) -> FileEncoding {
        self.encoding
    }

    /// Rows written for the table currently open
    pub fn rows(&self) -> u64 {
        self.rows
    }

    /// Write the header and `meta` clause and open the `data` clause.
    ///
    /// # Errors
    ///
    /// Fails when a table is still open, when `columns` is empty, or on I/O
    /// errors from the sink.
    pub fn begin_table(
        &mut self,
        header: &DumpHeader,
        columns: &[ColumnDescriptor],
    ) -> DumpResult<()> {
        if self.state != State::Idle {
            return Err(DumpError::syntax(
                self.line,
                "begin_table called while another table is open",
            ));
        }
        if columns.is_empty() {
            return Err(DumpError::syntax(
                self.line,
                format!("table '{}' has no columns", header.table_name),
            ));
        }

        self.text("(tabledump ");
        self.quoted(&header.table_name);
        self.text("\n  (file-encoding ");
        self.quoted(self.encoding.name());
        self.text(&format!(
            ")\n  (dump-version {} {})\n",
            header.dump_version, header.min_compatible_version
        ));
        self.text("  (henplus-version ");
        self.quoted(&header.producer_version);
        self.text(")\n  (time ");
        self.quoted(&header.creation_time);
        self.text(")\n  (database-info ");
        self.quoted(&header.database_info);
        self.text(")\n");
        if let Some(where_clause) = &header.where_clause {
            self.text("  (where-clause ");
            self.quoted(where_clause);
            self.text(")\n");
        }
        let estimate = header
            .estimated_rows
            .map_or_else(|| "-1".to_string(), |n| n.to_string());
        self.text("  (estimated-rows ");
        self.quoted(&estimate);
        self.text(")\n");

        self.text("  (meta (");
        for (i, column) in columns.iter().enumerate() {
            self.padded(&column.field_name, column.render_width(), i != 0);
        }
        self.text(")\n\t(");
        for (i, column) in columns.iter().enumerate() {
            self.padded(column.kind.name(), column.render_width(), i != 0);
        }
        self.text("))\n  (data ");
        self.flush_buf()?;

        self.columns = columns.to_vec();
        self.rows = 0;
        self.state = State::InData;
        Ok(())
    }

    /// Write one row given in the driver's textual form; `None` is NULL.
    pub fn write_row(&mut self, cells: &[Option<String>]) -> DumpResult<()> {
        if self.state != State::InData {
            return Err(DumpError::syntax(self.line, "write_row outside of a table"));
        }
        if cells.len() != self.columns.len() {
            return Err(DumpError::syntax(
                self.line,
                format!(
                    "row has {} values but the table has {} columns",
                    cells.len(),
                    self.columns.len()
                ),
            ));
        }

        for (cell, column) in cells.iter().zip(&self.columns) {
            if let Some(value) = cell {
                if column.kind.is_numeric() && !is_number(value, column.kind) {
                    return Err(DumpError::InvalidNumber {
                        line: self.line,
                        token: value.clone(),
                    });
                }
            }
        }

        if self.rows > 0 {
            self.text("\n\t");
        }
        self.text("(");
        for (i, cell) in cells.iter().enumerate() {
            if i > 0 {
                self.text(",");
            }
            match cell {
                None => self.text("NULL"),
                Some(value) if self.columns[i].kind.is_numeric() => self.text(value.trim()),
                Some(value) => self.quoted(value),
            }
        }
        self.text(")");
        self.flush_buf()?;
        self.rows += 1;
        Ok(())
    }

    /// Close the data clause and write the row count trailer.
    pub fn end_table(&mut self) -> DumpResult<u64> {
        if self.state != State::InData {
            return Err(DumpError::syntax(self.line, "end_table without begin_table"));
        }
        self.text(&format!(")\n  (rows {}))\n\n", self.rows));
        self.flush_buf()?;
        self.state = State::Idle;
        Ok(self.rows)
    }

    /// Close a table whose source failed after rows were written.
    ///
    /// Writes a `dump-error` clause and the partial row count so the file
    /// stays readable; readers skip the clause with a warning.
    pub fn abort_table(&mut self, message: &str) -> DumpResult<u64> {
        if self.state != State::InData {
            return Ok(0);
        }
        self.text(")\n  (dump-error ");
        self.quoted(message);
        self.text(&format!(")\n  (rows {}))\n\n", self.rows));
        self.flush_buf()?;
        self.state = State::Idle;
        Ok(self.rows)
    }

    pub fn flush(&mut self) -> DumpResult<()> {
        self.flush_buf()?;
        self.out.flush()?;
        Ok(())
    }

    /// Flush and hand back the sink
    pub fn into_inner(mut self) -> DumpResult<W> {
        self.flush()?;
        Ok(self.out)
    }

    fn text(&mut self, s: &str) {
        self.line += s.matches('\n').count();
        self.encoding.encode_into(s, &mut self.buf);
    }

    fn quoted(&mut self, s: &str) {
        let mut escaped = String::with_capacity(s.len() + 2);
        escaped.push('\'');
        for c in s.chars() {
            if c == '\'' || c == '\\' {
                escaped.push('\\');
            }
            escaped.push(c);
        }
        escaped.push('\'');
        self.text(&escaped);
    }

    fn padded(&mut self, s: &str, width: usize, comma: bool) {
        if comma {
            self.text(", ");
        }
        self.quoted(s);
        let pad = width.saturating_sub(s.chars().count());
        self.text(&" ".repeat(pad));
    }

    fn flush_buf(&mut self) -> DumpResult<()> {
        if !self.buf.is_empty() {
            self.out.write_all(&self.buf)?;
            self.buf.clear();
        }
        Ok(())
    }
}

/// Whether `value` can be written bare and read back as a number of `kind`.
fn is_number(value: &str, kind: TypeKind) -> bool {
    let value = value.trim();
    if kind == TypeKind::Double && value.parse::<f64>().is_ok() {
        return !value.contains(|c: char| c.is_whitespace() || ",;()'".contains(c));
    }

    let body = value.strip_prefix(['-', '+']).unwrap_or(value);
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(pos) => (&body[..pos], Some(&body[pos + 1..])),
        None => (body, None),
    };
    let mut parts = mantissa.splitn(2, '.');
    let int_part = parts.next().unwrap_or("");
    let frac_part = parts.next().unwrap_or("");
    let digits_ok = (!int_part.is_empty() || !frac_part.is_empty())
        && int_part.bytes().all(|b| b.is_ascii_digit())
        && frac_part.bytes().all(|b| b.is_ascii_digit());
    let exponent_ok = exponent.map_or(true, |e| {
        let e = e.strip_prefix(['-', '+']).unwrap_or(e);
        !e.is_empty() && e.bytes().all(|b| b.is_ascii_digit())
    });
    digits_ok && exponent_ok
}
