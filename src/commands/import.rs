// ABOUTME: Import commands replaying a dump into a database or only verifying it
// ABOUTME: Retries once with the file's declared encoding and isolates row failures

use super::{millis, progress_sink, TableReport, TransferReport};
use crate::dump::io::open_input;
use crate::dump::problems::ProblemLog;
use crate::dump::{DumpReader, FileEncoding, TableDump, Value};
use crate::error::DumpError;
use crate::progress::ProgressSink;
use crate::session::{Session, TableName};
use crate::utils::{format_elapsed, format_per_row};
use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ImportOptions {
    /// Encoding the file is opened with first
    pub encoding: FileEncoding,
    /// Commit after this many rows; 0 imports each table in one transaction
    pub commit_interval: u64,
    pub progress: bool,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            encoding: FileEncoding::Utf8,
            commit_interval: 0,
            progress: true,
        }
    }
}

/// Where the rows of a dump go.
#[allow(async_fn_in_trait)]
pub trait ImportTarget {
    /// Whether rows reach a database
    fn is_live(&self) -> bool;

    /// Open a transaction and prepare the insert for `table`
    async fn start_table(&mut self, table: &TableDump) -> Result<()>;

    /// Insert one row; an error affects only this row
    async fn insert(&mut self, row: &[Value]) -> Result<()>;

    /// Commit the rows inserted so far and keep the table open
    async fn commit(&mut self) -> Result<()>;

    /// Commit (or roll back) the remaining rows and release the insert
    async fn finish_table(&mut self, commit: bool) -> Result<()>;
}

/// Inserts into a live database through a [`Session`].
pub struct HotImport<'a, S: Session> {
    session: &'a mut S,
}

impl<'a, S: Session> HotImport<'a, S> {
    pub fn new(session: &'a mut S) -> Self {
        Self { session }
    }
}

impl<S: Session> ImportTarget for HotImport<'_, S> {
    fn is_live(&self) -> bool {
        true
    }

    async fn start_table(&mut self, table: &TableDump) -> Result<()> {
        let name = TableName::parse(&table.header.table_name);
        let columns: Vec<String> = table.columns.iter().map(|c| c.field_name.clone()).collect();
        self.session.begin().await?;
        if let Err(e) = self.session.prepare_insert(&name, &columns).await {
            if let Err(rollback) = self.session.rollback().await {
                tracing::warn!("⚠ Rollback failed: {:#}", rollback);
            }
            return Err(e);
        }
        Ok(())
    }

    async fn insert(&mut self, row: &[Value]) -> Result<()> {
        self.session.insert_row(row).await
    }

    async fn commit(&mut self) -> Result<()> {
        self.session.commit().await?;
        self.session.begin().await
    }

    async fn finish_table(&mut self, commit: bool) -> Result<()> {
        let released = self.session.release_insert().await;
        if commit {
            self.session.commit().await?;
        } else {
            self.session.rollback().await?;
        }
        released
    }
}

/// Parses rows without touching any database.
#[derive(Debug, Default, Clone, Copy)]
pub struct VerifyOnly;

impl ImportTarget for VerifyOnly {
    fn is_live(&self) -> bool {
        false
    }

    async fn start_table(&mut self, _table: &TableDump) -> Result<()> {
        Ok(())
    }

    async fn insert(&mut self, _row: &[Value]) -> Result<()> {
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn finish_table(&mut self, _commit: bool) -> Result<()> {
        Ok(())
    }
}

/// Read every table of `file` into the database behind `session`.
pub async fn dump_in<S: Session>(
    session: &mut S,
    file: &Path,
    options: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    let mut target = HotImport::new(session);
    read_dump("dump-in", &mut target, file, options, cancel).await
}

/// Parse `file` completely without a database and report its contents.
pub async fn verify_dump(
    file: &Path,
    options: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    read_dump("verify-dump", &mut VerifyOnly, file, options, cancel).await
}

/// Read a dump into `target`, reopening it once if its declared encoding differs.
///
/// The retry only happens while no table has been processed; a mismatch
/// declared by a later table, or a second mismatch, is fatal.
pub async fn read_dump<T: ImportTarget>(
    command: &'static str,
    target: &mut T,
    file: &Path,
    options: &ImportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    let started = Instant::now();
    let mut encoding = options.encoding;
    let mut retried = false;

    loop {
        let mut report = TransferReport::new(command, file);
        let input = open_input(file)?;
        match read_tables(target, input, encoding, options, cancel, &mut report).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                report.elapsed_ms = millis(elapsed);
                if report.tables.len() > 1 {
                    tracing::info!(
                        "✓ {} tables, {} rows read from {} in {}",
                        report.tables.len(),
                        report.total_rows(),
                        file.display(),
                        format_elapsed(elapsed)
                    );
                }
                if report.interrupted {
                    tracing::warn!(
                        "⚠ interrupted, {} rows processed",
                        report.total_rows()
                    );
                }
                return Ok(report);
            }
            Err(e) => {
                let declared = match e.downcast_ref::<DumpError>() {
                    Some(DumpError::EncodingMismatch { declared }) => Some(declared.clone()),
                    _ => None,
                };
                match declared {
                    Some(declared) if !retried && report.tables.is_empty() => {
                        encoding = declared.parse()?;
                        retried = true;
                        tracing::info!("got a different encoding; retry with {}", encoding);
                    }
                    Some(_) if retried => {
                        return Err(e.context("got file encoding problem twice"));
                    }
                    _ => return Err(e),
                }
            }
        }
    }
}

async fn read_tables<T: ImportTarget, R: BufRead>(
    target: &mut T,
    input: R,
    encoding: FileEncoding,
    options: &ImportOptions,
    cancel: &CancellationToken,
    report: &mut TransferReport,
) -> Result<()> {
    let mut reader = DumpReader::new(input, encoding);
    let mut progress = progress_sink(options.progress);

    loop {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        let Some(table) = reader.next_table()? else {
            break;
        };
        let result = import_table(target, &mut reader, table, options, progress.as_mut(), cancel)
            .await?;
        let interrupted = result.interrupted;
        report.tables.push(result);
        if interrupted {
            report.interrupted = true;
            break;
        }
    }
    Ok(())
}

async fn import_table<T: ImportTarget, R: BufRead>(
    target: &mut T,
    reader: &mut DumpReader<R>,
    mut table: TableDump,
    options: &ImportOptions,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<TableReport> {
    let started = Instant::now();
    let mut report = TableReport::new(table.header.table_name.clone());
    report.expected_rows = table.header.estimated_rows;

    if table.columns.is_empty() {
        tracing::warn!("⚠ table '{}' has no data in this dump", report.table);
        reader.finish_table()?;
        return Ok(report);
    }

    if target.is_live() {
        tracing::info!("reading '{}' into the database", report.table);
    } else {
        tracing::info!("verifying '{}'", report.table);
    }
    target
        .start_table(&table)
        .await
        .with_context(|| format!("Failed to prepare import into '{}'", report.table))?;

    let mut problems = ProblemLog::new();
    progress.start(&report.table, table.header.estimated_rows);
    let read = read_rows(
        target,
        reader,
        &mut table,
        options.commit_interval,
        &mut problems,
        progress,
        cancel,
    )
    .await;
    progress.finish();

    let (rows, interrupted) = match read {
        Ok(done) => done,
        Err(e) => {
            if let Err(rollback) = target.finish_table(false).await {
                tracing::warn!("⚠ Rollback failed: {:#}", rollback);
            }
            return Err(e.context(format!(
                "Failed to read table '{}' near line {}",
                report.table,
                reader.line()
            )));
        }
    };

    report.rows = rows;
    report.interrupted = interrupted;
    report.failed_rows = problems.total();
    report.problems = problems.take_entries();

    if interrupted {
        // rows after the last commit interval are not kept
        target.finish_table(false).await?;
        report.elapsed_ms = millis(started.elapsed());
        return Ok(report);
    }

    let trailer = reader
        .finish_table()
        .with_context(|| format!("Failed to read the end of table '{}'", report.table))?;
    target
        .finish_table(true)
        .await
        .with_context(|| format!("Failed to commit '{}'", report.table))?;

    if let Some(declared) = trailer.declared_rows {
        report.expected_rows = Some(declared);
    }
    if let Some(message) = trailer.dump_error {
        tracing::warn!(
            "⚠ the dump of '{}' was aborted while it was written: {}",
            report.table,
            message
        );
        report.dump_error = Some(message);
    }
    if !target.is_live() {
        report.columns = table.columns;
        log_columns(&report);
    }

    let elapsed = started.elapsed();
    report.elapsed_ms = millis(elapsed);
    if report.count_mismatch() {
        tracing::warn!(
            "⚠ expected {} but got {} rows",
            report.expected_rows.unwrap_or_default(),
            report.rows
        );
    }
    if target.is_live() {
        tracing::info!(
            "✓ '{}': ({} rows total / {} with errors; {} total; {} / row)",
            report.table,
            report.rows,
            report.failed_rows,
            format_elapsed(elapsed),
            format_per_row(elapsed, report.rows)
        );
    } else {
        tracing::info!(
            "✓ '{}': ({} rows total; {} total; {} / row)",
            report.table,
            report.rows,
            format_elapsed(elapsed),
            format_per_row(elapsed, report.rows)
        );
    }
    Ok(report)
}

/// Feed rows to the target until the data clause ends or `cancel` fires.
///
/// Returns the number of rows read and whether reading was interrupted.
async fn read_rows<T: ImportTarget, R: BufRead>(
    target: &mut T,
    reader: &mut DumpReader<R>,
    table: &mut TableDump,
    commit_interval: u64,
    problems: &mut ProblemLog,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<(u64, bool)> {
    let mut rows = 0u64;
    loop {
        if cancel.is_cancelled() {
            return Ok((rows, true));
        }
        let Some(row) = reader.next_row(&mut table.columns)? else {
            return Ok((rows, false));
        };
        rows += 1;
        if let Err(e) = target.insert(&row).await {
            problems.record(format!("{:#}", e).trim().to_string());
        }
        if commit_interval > 0 && rows % commit_interval == 0 {
            target.commit().await?;
        }
        progress.update(rows);
    }
}

/// Print the column layout of a verified table with the widest values seen
fn log_columns(report: &TableReport) {
    let name_width = report
        .columns
        .iter()
        .map(|c| c.field_name.chars().count())
        .chain(std::iter::once("field".len()))
        .max()
        .unwrap_or(0);
    tracing::info!("  {:<name_width$}  {:<9}  max length found", "field", "type");
    for column in &report.columns {
        let max = column
            .max_length
            .map_or_else(|| "-".to_string(), |n| n.to_string());
        tracing::info!(
            "  {:<name_width$}  {:<9}  {}",
            column.field_name,
            column.kind.name(),
            max
        );
    }
}
