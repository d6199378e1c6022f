// ABOUTME: Resolves table arguments (names, prefix* patterns, *) against the catalog
// ABOUTME: Corrects the spelling of unquoted names and drops duplicate selections

use crate::session::TableName;
use anyhow::{bail, Result};

/// One table argument of `dump-out`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TablePattern {
    /// `*`: every table of the catalog
    All,
    /// `prefix*`: every table whose name starts with the prefix
    Prefix(TableName),
    Exact(TableName),
}

impl TablePattern {
    pub fn parse(arg: &str) -> Result<Self> {
        let arg = arg.trim();
        if arg.is_empty() {
            bail!("Empty table name");
        }
        if arg == "*" {
            return Ok(TablePattern::All);
        }
        if let Some(prefix) = arg.strip_suffix('*') {
            return Ok(TablePattern::Prefix(TableName::parse(prefix)));
        }
        Ok(TablePattern::Exact(TableName::parse(arg)))
    }
}

fn same_schema(a: &TableName, b: &TableName) -> bool {
    match (&a.schema, &b.schema) {
        (None, None) => true,
        (Some(x), Some(y)) => x.eq_ignore_ascii_case(y),
        _ => false,
    }
}

fn starts_with_ignore_case(name: &str, prefix: &str) -> bool {
    name.len() >= prefix.len()
        && name
            .get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// Find the catalog spelling of an unquoted table name
///
/// A case-insensitive exact match wins. Failing that, a single catalog table
/// that starts with the requested name is taken. Quoted (case-sensitive)
/// names are never corrected.
///
/// # Returns
///
/// The catalog's table name, or `None` when nothing matches unambiguously
pub fn correct_table_name(requested: &TableName, catalog: &[TableName]) -> Option<TableName> {
    if requested.case_sensitive {
        return None;
    }
    let in_schema: Vec<&TableName> = catalog
        .iter()
        .filter(|t| same_schema(t, requested))
        .collect();

    if let Some(exact) = in_schema
        .iter()
        .find(|t| t.name.eq_ignore_ascii_case(&requested.name))
    {
        return Some((*exact).clone());
    }

    let mut candidates = in_schema
        .iter()
        .filter(|t| starts_with_ignore_case(&t.name, &requested.name));
    match (candidates.next(), candidates.next()) {
        (Some(only), None) => Some((*only).clone()),
        _ => None,
    }
}

fn add(table: TableName, selected: &mut Vec<TableName>) {
    if selected.iter().any(|t| t.same_table(&table)) {
        tracing::debug!("Table '{}' selected more than once, dumping it once", table);
    } else {
        selected.push(table);
    }
}

/// Expand table arguments into the ordered, duplicate-free list of tables to dump
pub fn resolve_tables(patterns: &[TablePattern], catalog: &[TableName]) -> Vec<TableName> {
    let mut selected: Vec<TableName> = Vec::new();

    for pattern in patterns {
        match pattern {
            TablePattern::All => {
                for table in catalog {
                    add(table.clone(), &mut selected);
                }
            }
            TablePattern::Prefix(prefix) => {
                let matches: Vec<&TableName> = catalog
                    .iter()
                    .filter(|t| same_schema(t, prefix))
                    .filter(|t| {
                        if prefix.case_sensitive {
                            t.name.starts_with(&prefix.name)
                        } else {
                            starts_with_ignore_case(&t.name, &prefix.name)
                        }
                    })
                    .collect();
                if matches.is_empty() {
                    tracing::warn!("⚠ No tables match '{}*'", prefix);
                }
                for table in matches {
                    add(table.clone(), &mut selected);
                }
            }
            TablePattern::Exact(requested) => {
                let table = match correct_table_name(requested, catalog) {
                    Some(corrected) if corrected.name != requested.name => {
                        tracing::info!("dumping table: '{}' (corrected name)", corrected);
                        corrected
                    }
                    Some(corrected) => corrected,
                    None => requested.clone(),
                };
                add(table, &mut selected);
            }
        }
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Vec<TableName> {
        ["Customers", "order_items", "orders", "products"]
            .iter()
            .map(|n| TableName::new(*n))
            .chain(std::iter::once(TableName::with_schema(
                Some("audit".to_string()),
                "events",
            )))
            .collect()
    }

    fn names(tables: &[TableName]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_parse_patterns() {
        assert_eq!(TablePattern::parse("*").unwrap(), TablePattern::All);
        assert_eq!(
            TablePattern::parse("ord*").unwrap(),
            TablePattern::Prefix(TableName::new("ord"))
        );
        assert_eq!(
            TablePattern::parse("orders").unwrap(),
            TablePattern::Exact(TableName::new("orders"))
        );
        assert!(TablePattern::parse("  ").is_err());
    }

    #[test]
    fn test_case_correction() {
        let corrected = correct_table_name(&TableName::parse("CUSTOMERS"), &catalog()).unwrap();
        assert_eq!(corrected.name, "Customers");

        // unique prefix
        let corrected = correct_table_name(&TableName::parse("prod"), &catalog()).unwrap();
        assert_eq!(corrected.name, "products");

        // ambiguous prefix and quoted names stay uncorrected
        assert!(correct_table_name(&TableName::parse("ord"), &catalog()).is_none());
        assert!(correct_table_name(&TableName::parse("\"customers\""), &catalog()).is_none());
    }

    #[test]
    fn test_resolve_patterns_in_order_without_duplicates() {
        let patterns = vec![
            TablePattern::parse("orders").unwrap(),
            TablePattern::parse("ord*").unwrap(),
            TablePattern::parse("ORDERS").unwrap(),
            TablePattern::parse("audit.events").unwrap(),
        ];
        let tables = resolve_tables(&patterns, &catalog());
        assert_eq!(names(&tables), vec!["orders", "order_items", "audit.events"]);
    }

    #[test]
    fn test_resolve_all_and_unknown() {
        let tables = resolve_tables(&[TablePattern::All], &catalog());
        assert_eq!(tables.len(), 5);

        let tables = resolve_tables(&[TablePattern::parse("missing").unwrap()], &catalog());
        assert_eq!(names(&tables), vec!["missing"]);
    }
}
