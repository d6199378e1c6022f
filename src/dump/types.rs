// ABOUTME: Portable column type kinds and vendor type canonicalization
// ABOUTME: Maps PostgreSQL, MySQL, SQLite and ANSI type names onto nine dump kinds

use crate::error::{DumpError, DumpResult};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// The nine type kinds a dump file knows about.
///
/// Every column of a dump is tagged with exactly one kind. The writer picks
/// the kind once per column from the vendor type; the reader takes it from
/// the `meta` clause and applies it to every row of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TypeKind {
    String,
    Integer,
    Numeric,
    Double,
    Date,
    Time,
    Timestamp,
    Blob,
    Clob,
}

impl TypeKind {
    pub const ALL: [TypeKind; 9] = [
        TypeKind::String,
        TypeKind::Integer,
        TypeKind::Numeric,
        TypeKind::Double,
        TypeKind::Date,
        TypeKind::Time,
        TypeKind::Timestamp,
        TypeKind::Blob,
        TypeKind::Clob,
    ];

    /// Name used in the `meta` clause of a dump file
    pub fn name(self) -> &'static str {
        match self {
            TypeKind::String => "STRING",
            TypeKind::Integer => "INTEGER",
            TypeKind::Numeric => "NUMERIC",
            TypeKind::Double => "DOUBLE",
            TypeKind::Date => "DATE",
            TypeKind::Time => "TIME",
            TypeKind::Timestamp => "TIMESTAMP",
            TypeKind::Blob => "BLOB",
            TypeKind::Clob => "CLOB",
        }
    }

    /// Numeric kinds are written unquoted.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            TypeKind::Integer | TypeKind::Numeric | TypeKind::Double
        )
    }

    /// Parse a kind name as found in a dump file's `meta` clause.
    ///
    /// Matching is case-insensitive. `line` is only used for the error.
    pub fn parse(name: &str, line: usize) -> DumpResult<TypeKind> {
        TypeKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name.trim()))
            .ok_or_else(|| DumpError::UnknownType {
                line,
                name: name.to_string(),
            })
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

fn vendor_types() -> &'static HashMap<&'static str, TypeKind> {
    static TYPES: OnceLock<HashMap<&'static str, TypeKind>> = OnceLock::new();
    TYPES.get_or_init(|| {
        use TypeKind::*;
        let entries: &[(&str, TypeKind)] = &[
            // character data
            ("char", String),
            ("character", String),
            ("nchar", String),
            ("varchar", String),
            ("character varying", String),
            ("nvarchar", String),
            ("varchar2", String),
            ("bpchar", String),
            ("name", String),
            ("text", String),
            ("tinytext", String),
            ("mediumtext", String),
            ("citext", String),
            ("enum", String),
            ("set", String),
            ("json", String),
            ("jsonb", String),
            ("xml", String),
            ("uuid", String),
            ("inet", String),
            ("cidr", String),
            ("macaddr", String),
            ("interval", String),
            ("varbit", String),
            ("bit varying", String),
            ("other", String),
            ("year", String),
            ("longvarchar", String),
            // locale formatted, e.g. $1,234.50
            ("money", String),
            // large character objects
            ("clob", Clob),
            ("nclob", Clob),
            ("longtext", Clob),
            ("long", Clob),
            // small integers
            ("tinyint", Integer),
            ("smallint", Integer),
            ("mediumint", Integer),
            ("int", Integer),
            ("integer", Integer),
            ("int2", Integer),
            ("int4", Integer),
            ("serial", Integer),
            ("smallserial", Integer),
            ("serial4", Integer),
            ("oid", Integer),
            // wide or exact numbers
            ("bigint", Numeric),
            ("big int", Numeric),
            ("int8", Numeric),
            ("bigserial", Numeric),
            ("serial8", Numeric),
            ("numeric", Numeric),
            ("decimal", Numeric),
            ("dec", Numeric),
            ("number", Numeric),
            ("boolean", Numeric),
            ("bool", Numeric),
            ("bit", Numeric),
            // approximate numbers
            ("float", Double),
            ("float4", Double),
            ("float8", Double),
            ("real", Double),
            ("double", Double),
            ("double precision", Double),
            // temporal
            ("date", Date),
            ("time", Time),
            ("timetz", Time),
            ("time with time zone", Time),
            ("time without time zone", Time),
            ("timestamp", Timestamp),
            ("timestamptz", Timestamp),
            ("timestamp with time zone", Timestamp),
            ("timestamp without time zone", Timestamp),
            ("datetime", Timestamp),
            // binary
            ("blob", Blob),
            ("tinyblob", Blob),
            ("mediumblob", Blob),
            ("longblob", Blob),
            ("bytea", Blob),
            ("binary", Blob),
            ("varbinary", Blob),
            ("longvarbinary", Blob),
        ];
        entries.iter().copied().collect()
    })
}

/// Strip parameters, array markers and modifiers from a vendor type name.
///
/// `VARCHAR(20)` becomes `varchar`, `int(10) unsigned` becomes `int`,
/// `_int4` (PostgreSQL's array type name) and `text[]` keep their element
/// type so the array falls back to STRING later.
fn normalize(vendor_type: &str) -> (String, bool) {
    let lower = vendor_type.trim().to_ascii_lowercase();
    let is_array = lower.ends_with("[]") || lower.starts_with('_');

    let mut base = match lower.find('(') {
        Some(open) => {
            let close = lower[open..].find(')').map(|c| open + c + 1);
            let mut without = lower[..open].to_string();
            if let Some(close) = close {
                without.push_str(&lower[close..]);
            }
            without
        }
        None => lower,
    };

    for modifier in ["unsigned", "signed", "zerofill"] {
        base = base.replace(modifier, " ");
    }
    let base = base.trim_end_matches("[]").trim_start_matches('_');
    let collapsed = base.split_whitespace().collect::<Vec<_>>().join(" ");
    (collapsed, is_array)
}

/// SQLite resolves arbitrary declared types through column affinity.
fn affinity(base: &str) -> Option<TypeKind> {
    if base.contains("int") {
        Some(TypeKind::Integer)
    } else if base.contains("char") || base.contains("clob") || base.contains("text") {
        Some(TypeKind::String)
    } else if base.contains("blob") {
        Some(TypeKind::Blob)
    } else if base.contains("real") || base.contains("floa") || base.contains("doub") {
        Some(TypeKind::Double)
    } else {
        None
    }
}

/// Map a vendor type name onto a dump type kind
///
/// The mapping is total. Names not in the built-in table fall back to
/// STRING, which round-trips any textual value, and a warning is logged.
/// SQLite declared types go through [`canonicalize_sqlite`] instead.
///
/// # Arguments
///
/// * `vendor_type` - Type name as reported by the driver or catalog
///
/// # Examples
///
/// ```
/// # use tabledump::dump::types::{canonicalize, TypeKind};
/// assert_eq!(canonicalize("VARCHAR(20)"), TypeKind::String);
/// assert_eq!(canonicalize("int4"), TypeKind::Integer);
/// assert_eq!(canonicalize("numeric(10,2)"), TypeKind::Numeric);
/// ```
pub fn canonicalize(vendor_type: &str) -> TypeKind {
    let (base, is_array) = normalize(vendor_type);
    if is_array {
        return TypeKind::String;
    }
    if let Some(kind) = vendor_types().get(base.as_str()) {
        return *kind;
    }
    unknown(vendor_type)
}

/// Map a SQLite declared type, resolving unlisted names through affinity
///
/// ```
/// # use tabledump::dump::types::{canonicalize_sqlite, TypeKind};
/// assert_eq!(canonicalize_sqlite("MEDIUMINTEGER"), TypeKind::Integer);
/// ```
pub fn canonicalize_sqlite(declared: &str) -> TypeKind {
    let (base, is_array) = normalize(declared);
    if is_array {
        return TypeKind::String;
    }
    if let Some(kind) = vendor_types().get(base.as_str()) {
        return *kind;
    }
    if let Some(kind) = affinity(&base) {
        return kind;
    }
    if base.is_empty() {
        // columns without a declared type hold anything
        return TypeKind::String;
    }
    unknown(declared)
}

fn unknown(vendor_type: &str) -> TypeKind {
    tracing::warn!(
        "⚠ Unknown column type '{}', dumping it as STRING",
        vendor_type
    );
    TypeKind::String
}

/// One column of a dump: its field name, kind, and the widest value seen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDescriptor {
    pub field_name: String,
    pub kind: TypeKind,
    pub max_length: Option<usize>,
}

impl ColumnDescriptor {
    pub fn new(field_name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            field_name: field_name.into(),
            kind,
            max_length: None,
        }
    }

    /// Record the textual length of a value read for this column
    pub fn observe_length(&mut self, len: usize) {
        self.max_length = Some(self.max_length.map_or(len, |seen| seen.max(len)));
    }

    /// Width used to align the name and type rows of the `meta` clause
    pub fn render_width(&self) -> usize {
        self.field_name.chars().count().max(self.kind.name().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_postgres_names() {
        assert_eq!(canonicalize("int2"), TypeKind::Integer);
        assert_eq!(canonicalize("int4"), TypeKind::Integer);
        assert_eq!(canonicalize("int8"), TypeKind::Numeric);
        assert_eq!(canonicalize("bool"), TypeKind::Numeric);
        assert_eq!(canonicalize("float8"), TypeKind::Double);
        assert_eq!(canonicalize("timestamptz"), TypeKind::Timestamp);
        assert_eq!(canonicalize("timestamp with time zone"), TypeKind::Timestamp);
        assert_eq!(canonicalize("character varying(255)"), TypeKind::String);
        assert_eq!(canonicalize("bytea"), TypeKind::Blob);
        assert_eq!(canonicalize("_int4"), TypeKind::String);
        assert_eq!(canonicalize("text[]"), TypeKind::String);
    }

    #[test]
    fn test_canonicalize_mysql_names() {
        assert_eq!(canonicalize("INT(10) UNSIGNED"), TypeKind::Integer);
        assert_eq!(canonicalize("tinyint(1)"), TypeKind::Integer);
        assert_eq!(canonicalize("DECIMAL(10,2)"), TypeKind::Numeric);
        assert_eq!(canonicalize("DATETIME"), TypeKind::Timestamp);
        assert_eq!(canonicalize("longtext"), TypeKind::Clob);
        assert_eq!(canonicalize("mediumblob"), TypeKind::Blob);
        // MySQL sessions hand BIT values over as integers
        assert_eq!(canonicalize("bit"), TypeKind::Numeric);
    }

    #[test]
    fn test_canonicalize_sqlite_affinity() {
        assert_eq!(canonicalize_sqlite("UNSIGNED BIG INT"), TypeKind::Numeric);
        assert_eq!(canonicalize_sqlite("NATIVE CHARACTER(70)"), TypeKind::String);
        assert_eq!(canonicalize_sqlite("MEDIUMINTEGER"), TypeKind::Integer);
        assert_eq!(canonicalize_sqlite("DOUBLE PRECISION"), TypeKind::Double);
        assert_eq!(canonicalize_sqlite("VARYING CHARACTER(9)"), TypeKind::String);
        assert_eq!(canonicalize_sqlite(""), TypeKind::String);
    }

    #[test]
    fn test_unknown_type_falls_back_to_string() {
        assert_eq!(canonicalize("geometry"), TypeKind::String);
        assert_eq!(canonicalize("tsvector"), TypeKind::String);
    }

    #[test]
    fn test_affinity_does_not_apply_to_other_vendors() {
        for name in ["point", "int4range", "int8range", "int2vector", "interval", "tinterval"] {
            assert_eq!(canonicalize(name), TypeKind::String, "{}", name);
        }
        assert_eq!(canonicalize("MEDIUMINTEGER"), TypeKind::String);
        assert_eq!(canonicalize("varbit"), TypeKind::String);
        assert_eq!(canonicalize("bit varying(8)"), TypeKind::String);
    }

    #[test]
    fn test_parse_kind_names() {
        for kind in TypeKind::ALL {
            assert_eq!(TypeKind::parse(kind.name(), 1).unwrap(), kind);
        }
        assert_eq!(TypeKind::parse("integer", 1).unwrap(), TypeKind::Integer);

        let err = TypeKind::parse("VARCHAR", 4).unwrap_err();
        assert!(matches!(err, DumpError::UnknownType { line: 4, .. }));
    }

    #[test]
    fn test_max_length_tracks_widest_value() {
        let mut column = ColumnDescriptor::new("name", TypeKind::String);
        assert_eq!(column.max_length, None);
        column.observe_length(3);
        column.observe_length(11);
        column.observe_length(5);
        assert_eq!(column.max_length, Some(11));
        assert_eq!(column.render_width(), 6);
    }
}
