// ABOUTME: Dump file format: header model, writer, reader and supporting codecs
// ABOUTME: Exposes the pieces shared by the export and import commands

pub mod encoding;
pub mod io;
pub mod lexer;
pub mod problems;
pub mod reader;
pub mod types;
pub mod writer;

pub use encoding::FileEncoding;
pub use reader::{DumpReader, TableDump, TableTrailer, Value};
pub use types::{canonicalize, ColumnDescriptor, TypeKind};
pub use writer::DumpWriter;

/// Format version written by this build and the newest one it reads
pub const DUMP_VERSION: i64 = 1;

/// Descriptive header written before the metadata of every table.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpHeader {
    pub table_name: String,
    pub dump_version: i64,
    pub min_compatible_version: i64,
    pub file_encoding: FileEncoding,
    pub producer_version: String,
    pub creation_time: String,
    pub database_info: String,
    pub estimated_rows: Option<u64>,
    pub where_clause: Option<String>,
}

impl DumpHeader {
    /// Header for a table dumped now by this build
    pub fn new(table_name: impl Into<String>, file_encoding: FileEncoding) -> Self {
        Self {
            table_name: table_name.into(),
            dump_version: DUMP_VERSION,
            min_compatible_version: DUMP_VERSION,
            file_encoding,
            producer_version: producer_version(),
            creation_time: chrono::Local::now()
                .format("%Y-%m-%d %H:%M:%S%.3f")
                .to_string(),
            database_info: String::new(),
            estimated_rows: None,
            where_clause: None,
        }
    }

    /// Empty header filled in clause by clause while reading
    pub(crate) fn unread(table_name: String, file_encoding: FileEncoding) -> Self {
        Self {
            table_name,
            dump_version: 0,
            min_compatible_version: 0,
            file_encoding,
            producer_version: String::new(),
            creation_time: String::new(),
            database_info: String::new(),
            estimated_rows: None,
            where_clause: None,
        }
    }
}

pub fn producer_version() -> String {
    format!("tabledump {}", env!("CARGO_PKG_VERSION"))
}
