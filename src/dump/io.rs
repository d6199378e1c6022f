// ABOUTME: Opens dump files for reading and writing
// ABOUTME: Files ending in .gz are compressed and decompressed transparently

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub const GZIP_SUFFIX: &str = ".gz";

pub fn is_gzip(path: &Path) -> bool {
    path.to_string_lossy().ends_with(GZIP_SUFFIX)
}

/// Open a dump for reading, decompressing `.gz` files
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open dump file {}", path.display()))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Output sink of a dump; gzip output has to be finished explicitly.
pub enum DumpOutput {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<BufWriter<File>>),
}

impl DumpOutput {
    /// Create (or truncate) a dump file, compressing `.gz` files
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create dump file {}", path.display()))?;
        let writer = BufWriter::new(file);
        if is_gzip(path) {
            Ok(DumpOutput::Gzip(GzEncoder::new(writer, Compression::default())))
        } else {
            Ok(DumpOutput::Plain(writer))
        }
    }

    /// Flush all buffered data and write the gzip trailer if any
    pub fn finish(self) -> Result<()> {
        match self {
            DumpOutput::Plain(mut writer) => writer.flush().context("Failed to flush dump file"),
            DumpOutput::Gzip(encoder) => {
                let mut writer = encoder.finish().context("Failed to finish gzip stream")?;
                writer.flush().context("Failed to flush dump file")
            }
        }
    }
}

impl Write for DumpOutput {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            DumpOutput::Plain(w) => w.write(buf),
            DumpOutput::Gzip(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self {
            DumpOutput::Plain(w) => w.flush(),
            DumpOutput::Gzip(w) => w.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_gzip_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.tbl.gz");

        let mut out = DumpOutput::create(&path).unwrap();
        out.write_all(b"(tabledump 'x')\n").unwrap();
        out.finish().unwrap();

        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]);

        let mut text = String::new();
        open_input(&path).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "(tabledump 'x')\n");
    }

    #[test]
    fn test_plain_file_is_not_compressed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dump.tbl");
        let mut out = DumpOutput::create(&path).unwrap();
        out.write_all(b"plain").unwrap();
        out.finish().unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"plain");
        assert!(!is_gzip(&path));
    }

    #[test]
    fn test_missing_file_has_context() {
        let err = match open_input(Path::new("/nonexistent/dir/dump.tbl")) {
            Err(e) => e,
            Ok(_) => panic!("opening a missing file should fail"),
        };
        assert!(err.to_string().contains("Failed to open dump file"));
    }
}
