// ABOUTME: What an export reads from: a whole or filtered table, or an ad hoc query
// ABOUTME: Supplies column metadata, the SELECT to scan, and the expected row count

use crate::dump::ColumnDescriptor;
use crate::session::{Session, TableName};
use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSource {
    pub table: TableName,
    pub where_clause: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySource {
    pub exported_name: String,
    pub sql: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpSource {
    Table(TableSource),
    Query(QuerySource),
}

/// Drop a leading `WHERE` keyword and surrounding blanks from a condition
///
/// # Examples
///
/// ```
/// # use tabledump::source::strip_where;
/// assert_eq!(strip_where("  WHERE id > 3 "), Some("id > 3".to_string()));
/// assert_eq!(strip_where("id > 3"), Some("id > 3".to_string()));
/// assert_eq!(strip_where("where"), None);
/// ```
pub fn strip_where(clause: &str) -> Option<String> {
    let trimmed = clause.trim();
    let rest = match trimmed.get(..5) {
        Some(head) if head.eq_ignore_ascii_case("where") => {
            let tail = &trimmed[5..];
            if tail.is_empty() || tail.starts_with(char::is_whitespace) {
                tail.trim()
            } else {
                trimmed
            }
        }
        _ => trimmed,
    };
    (!rest.is_empty()).then(|| rest.to_string())
}

impl DumpSource {
    pub fn table(table: TableName, where_clause: Option<&str>) -> Self {
        DumpSource::Table(TableSource {
            table,
            where_clause: where_clause.and_then(strip_where),
        })
    }

    /// An ad hoc query; it must be a SELECT statement
    pub fn query(exported_name: impl Into<String>, sql: impl Into<String>) -> Result<Self> {
        let sql = sql.into();
        let first = sql.split_whitespace().next().unwrap_or("");
        if !first.eq_ignore_ascii_case("select") {
            bail!("only SELECT statements can be dumped, got '{}'", first);
        }
        Ok(DumpSource::Query(QuerySource {
            exported_name: exported_name.into(),
            sql,
        }))
    }

    /// Name written into the dump header
    pub fn table_name(&self) -> String {
        match self {
            DumpSource::Table(t) => t.table.to_string(),
            DumpSource::Query(q) => q.exported_name.clone(),
        }
    }

    pub fn where_clause(&self) -> Option<&str> {
        match self {
            DumpSource::Table(t) => t.where_clause.as_deref(),
            DumpSource::Query(_) => None,
        }
    }

    pub fn description(&self) -> String {
        match self {
            DumpSource::Table(t) => format!("table '{}'", t.table),
            DumpSource::Query(q) => format!("select '{}'", q.sql),
        }
    }

    /// Columns of the source with their dump kinds
    pub async fn metadata<S: Session>(&self, session: &mut S) -> Result<Vec<ColumnDescriptor>> {
        let columns = match self {
            DumpSource::Table(t) => session.table_columns(&t.table).await?,
            DumpSource::Query(q) => session.describe_query(&q.sql).await?,
        };
        Ok(columns
            .into_iter()
            .map(|c| {
                let kind = session.column_kind(&c.type_name);
                ColumnDescriptor::new(c.name, kind)
            })
            .collect())
    }

    /// Statement whose rows make up the dump
    pub fn select_sql<S: Session>(&self, session: &S, columns: &[ColumnDescriptor]) -> String {
        match self {
            DumpSource::Table(t) => {
                let list = columns
                    .iter()
                    .map(|c| session.quote_ident(&c.field_name))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut sql = format!("SELECT {} FROM {}", list, session.qualified(&t.table));
                if let Some(where_clause) = &t.where_clause {
                    sql.push_str(" WHERE ");
                    sql.push_str(where_clause);
                }
                sql
            }
            DumpSource::Query(q) => q.sql.trim().trim_end_matches(';').to_string(),
        }
    }

    /// Row count estimate taken before scanning; unknown for ad hoc queries
    pub async fn expected_rows<S: Session>(&self, session: &mut S) -> Result<Option<u64>> {
        match self {
            DumpSource::Table(t) => {
                let mut sql = format!("SELECT count(*) FROM {}", session.qualified(&t.table));
                if let Some(where_clause) = &t.where_clause {
                    sql.push_str(" WHERE ");
                    sql.push_str(where_clause);
                }
                Ok(Some(session.count_rows(&sql).await?))
            }
            DumpSource::Query(_) => Ok(None),
        }
    }
}
