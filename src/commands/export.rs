// ABOUTME: Export commands writing tables or query results into a dump file
// ABOUTME: Orders multi-table dumps by foreign keys and keeps going past failed tables

use super::{millis, progress_sink, TableReport, TransferReport};
use crate::dump::io::DumpOutput;
use crate::dump::{DumpHeader, DumpWriter, FileEncoding};
use crate::filters::{correct_table_name, resolve_tables, TablePattern};
use crate::ordering::{format_cycle, order_tables, TopologicalResolver};
use crate::progress::ProgressSink;
use crate::session::{Session, TableName};
use crate::source::DumpSource;
use crate::utils::{format_elapsed, format_per_row, rows_per_second};
use anyhow::{bail, Context, Result};
use std::io::Write;
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub struct ExportOptions {
    pub encoding: FileEncoding,
    pub progress: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            encoding: FileEncoding::Utf8,
            progress: true,
        }
    }
}

/// Dump the tables matching `patterns` into `file`.
///
/// More than one table is ordered so that referenced tables come first;
/// foreign key cycles are reported and the affected tables are dumped in
/// their requested order.
pub async fn dump_out<S: Session>(
    session: &mut S,
    file: &Path,
    patterns: &[TablePattern],
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    let mut report = TransferReport::new("dump-out", file);
    let catalog = session
        .list_tables()
        .await
        .context("Failed to list tables")?;
    let mut tables = resolve_tables(patterns, &catalog);
    if tables.is_empty() {
        bail!("No tables to dump");
    }

    if tables.len() > 1 {
        let resolution = order_tables(session, &tables, &TopologicalResolver)
            .await
            .context("Failed to read foreign keys")?;
        if !resolution.cycles.is_empty() {
            tracing::warn!(
                "⚠ Cyclic foreign key dependencies found; the dump cannot be \
                 imported in an order satisfying all constraints:"
            );
            for (i, cycle) in resolution.cycles.iter().enumerate() {
                let rendered = format_cycle(cycle);
                tracing::warn!("  Cycle {}: {}", i + 1, rendered);
                report.cycles.push(rendered);
            }
        }
        tables = resolution.ordered;
    }

    let sources = tables
        .into_iter()
        .map(|table| DumpSource::table(table, None))
        .collect();
    export_sources(session, file, sources, options, cancel, report).await
}

/// Dump one table, optionally restricted by a WHERE condition.
pub async fn dump_conditional<S: Session>(
    session: &mut S,
    file: &Path,
    table: &str,
    where_clause: Option<&str>,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    let report = TransferReport::new("dump-conditional", file);
    let requested = TableName::parse(table);
    let catalog = session
        .list_tables()
        .await
        .context("Failed to list tables")?;
    let table = match correct_table_name(&requested, &catalog) {
        Some(corrected) if corrected.name != requested.name => {
            tracing::info!("dumping table: '{}' (corrected name)", corrected);
            corrected
        }
        Some(corrected) => corrected,
        None => requested,
    };
    let source = DumpSource::table(table, where_clause);
    export_sources(session, file, vec![source], options, cancel, report).await
}

/// Dump the result of a SELECT statement under `exported_name`.
pub async fn dump_select<S: Session>(
    session: &mut S,
    file: &Path,
    exported_name: &str,
    sql: &str,
    options: &ExportOptions,
    cancel: &CancellationToken,
) -> Result<TransferReport> {
    let report = TransferReport::new("dump-select", file);
    let source = DumpSource::query(exported_name, sql)?;
    export_sources(session, file, vec![source], options, cancel, report).await
}

async fn export_sources<S: Session>(
    session: &mut S,
    file: &Path,
    sources: Vec<DumpSource>,
    options: &ExportOptions,
    cancel: &CancellationToken,
    mut report: TransferReport,
) -> Result<TransferReport> {
    let started = Instant::now();
    let database_info = session
        .database_info()
        .await
        .context("Failed to read database version")?;
    let output = DumpOutput::create(file)?;
    let mut writer = DumpWriter::new(output, options.encoding);
    let mut progress = progress_sink(options.progress);
    let single = sources.len() == 1;
    let mut fatal = None;

    for source in &sources {
        if cancel.is_cancelled() {
            report.interrupted = true;
            break;
        }
        match export_table(
            session,
            &mut writer,
            source,
            &database_info,
            progress.as_mut(),
            cancel,
        )
        .await
        {
            Ok(table) => {
                let interrupted = table.interrupted;
                report.tables.push(table);
                if interrupted {
                    report.interrupted = true;
                    break;
                }
            }
            Err(e) if single => {
                fatal = Some(e);
                break;
            }
            Err(e) => {
                tracing::error!("⚠ Failed to dump {}: {:#}", source.description(), e);
                report.failed = true;
                let mut table = TableReport::new(source.table_name());
                table.error = Some(format!("{:#}", e));
                report.tables.push(table);
            }
        }
    }

    writer
        .into_inner()?
        .finish()
        .with_context(|| format!("Failed to finish dump file {}", file.display()))?;
    if let Some(e) = fatal {
        return Err(e);
    }

    let elapsed = started.elapsed();
    report.elapsed_ms = millis(elapsed);
    if sources.len() > 1 {
        tracing::info!(
            "✓ Dumped {} of {} tables ({} rows) to {} in {}",
            report.tables.iter().filter(|t| t.error.is_none()).count(),
            sources.len(),
            report.total_rows(),
            file.display(),
            format_elapsed(elapsed)
        );
    }
    Ok(report)
}

/// Write one source as a table dump.
///
/// A scan failure after the data clause was opened is recorded in the file
/// with a `dump-error` clause before the error is returned, so the file
/// stays readable for the tables around it.
async fn export_table<S: Session, W: Write>(
    session: &mut S,
    writer: &mut DumpWriter<W>,
    source: &DumpSource,
    database_info: &str,
    progress: &mut dyn ProgressSink,
    cancel: &CancellationToken,
) -> Result<TableReport> {
    let started = Instant::now();
    let columns = source.metadata(session).await?;
    if columns.is_empty() {
        bail!("No fields in {} found.", source.description());
    }
    let expected = source
        .expected_rows(session)
        .await
        .with_context(|| format!("Failed to count rows of {}", source.description()))?;

    let mut header = DumpHeader::new(source.table_name(), writer.encoding());
    header.database_info = database_info.to_string();
    header.estimated_rows = expected;
    header.where_clause = source.where_clause().map(str::to_string);

    tracing::info!("dump {}", source.description());
    writer.begin_table(&header, &columns)?;

    let sql = source.select_sql(session, &columns);
    tracing::debug!("Scanning: {}", sql);
    progress.start(&header.table_name, expected);
    let scanned = {
        let mut on_row = |row: Vec<Option<String>>| -> Result<()> {
            writer.write_row(&row)?;
            progress.update(writer.rows());
            Ok(())
        };
        session.scan(&sql, cancel, &mut on_row).await
    };
    progress.finish();

    let outcome = match scanned {
        Ok(outcome) => outcome,
        Err(e) => {
            writer.abort_table(&format!("{:#}", e))?;
            return Err(e.context(format!("Failed to dump {}", source.description())));
        }
    };
    let rows = writer.end_table()?;
    let elapsed = started.elapsed();

    let mut table = TableReport::new(header.table_name);
    table.rows = rows;
    table.expected_rows = expected;
    table.interrupted = outcome.cancelled;
    table.elapsed_ms = millis(elapsed);

    tracing::info!(
        "✓ dumping '{}' took {} total; {} / row ({} rows, {} rows/s)",
        table.table,
        format_elapsed(elapsed),
        format_per_row(elapsed, rows),
        rows,
        rows_per_second(elapsed, rows)
    );
    if table.count_mismatch() {
        tracing::warn!(
            " == Warning: 'select count(*)' in the beginning resulted in {} \
             but the dump exported {} rows == ",
            expected.unwrap_or_default(),
            rows
        );
    }
    if table.interrupted {
        tracing::warn!("⚠ interrupted, {} rows of '{}' dumped", rows, table.table);
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::sqlite::SqliteSession;
    use rusqlite::Connection;
    use tempfile::TempDir;

    fn session() -> SqliteSession {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE customers (id INTEGER PRIMARY KEY, name VARCHAR(40));
             CREATE TABLE orders (id INTEGER PRIMARY KEY,
                                  customer_id INTEGER REFERENCES customers(id),
                                  total NUMERIC(10,2));
             INSERT INTO customers VALUES (1, 'Ada'), (2, 'O''Brien');
             INSERT INTO orders VALUES (10, 1, 9.50), (11, 2, 12.00), (12, 2, NULL);",
        )
        .unwrap();
        SqliteSession::from_connection(conn)
    }

    fn quiet() -> ExportOptions {
        ExportOptions {
            progress: false,
            ..ExportOptions::default()
        }
    }

    #[tokio::test]
    async fn test_dump_out_orders_referenced_tables_first() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("all.dump");
        let mut session = session();
        let patterns = vec![TablePattern::All];

        let report = dump_out(&mut session, &file, &patterns, &quiet(), &CancellationToken::new())
            .await
            .unwrap();

        let order: Vec<&str> = report.tables.iter().map(|t| t.table.as_str()).collect();
        assert_eq!(order, vec!["customers", "orders"]);
        assert_eq!(report.total_rows(), 5);
        assert!(report.succeeded());

        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.starts_with("(tabledump 'customers'"));
        assert!(text.contains("'O\\'Brien'"));
        assert!(text.contains("(rows 3))"));
    }

    #[tokio::test]
    async fn test_dump_conditional_corrects_name_and_keeps_where() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("cond.dump");
        let mut session = session();

        let report = dump_conditional(
            &mut session,
            &file,
            "ORDERS",
            Some("where total > 10"),
            &quiet(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(report.tables[0].table, "orders");
        assert_eq!(report.tables[0].rows, 1);
        assert_eq!(report.tables[0].expected_rows, Some(1));
        let text = std::fs::read_to_string(&file).unwrap();
        assert!(text.contains("(where-clause 'total > 10')"));
    }

    #[tokio::test]
    async fn test_dump_select_rejects_non_select() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        let err = dump_select(
            &mut session,
            &dir.path().join("q.dump"),
            "x",
            "update orders set total = 0",
            &quiet(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("only SELECT"));
    }

    #[tokio::test]
    async fn test_missing_table_fails_single_dump() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        let err = dump_out(
            &mut session,
            &dir.path().join("none.dump"),
            &[TablePattern::parse("nosuchtable").unwrap()],
            &quiet(),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("No fields in table 'nosuchtable' found."));
    }

    #[tokio::test]
    async fn test_multi_table_dump_continues_past_failed_table() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("partial.dump");
        let mut session = session();
        let patterns = vec![
            TablePattern::parse("nosuchtable").unwrap(),
            TablePattern::parse("customers").unwrap(),
        ];

        let report = dump_out(&mut session, &file, &patterns, &quiet(), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.failed);
        assert_eq!(report.tables.len(), 2);
        let failed: Vec<&TableReport> = report.tables.iter().filter(|t| t.error.is_some()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].table, "nosuchtable");
        assert_eq!(report.total_rows(), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_dumps_nothing() {
        let dir = TempDir::new().unwrap();
        let mut session = session();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = dump_out(
            &mut session,
            &dir.path().join("c.dump"),
            &[TablePattern::All],
            &quiet(),
            &cancel,
        )
        .await
        .unwrap();
        assert!(report.interrupted);
        assert!(report.tables.is_empty());
    }
}
