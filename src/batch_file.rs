//! Batch interchange files
//!
//! A flush renders the buffered records of one stream into a row-delimited
//! file (optionally gzip framed) that is handed to the staging transport.
//! The file lives as long as its [`BatchFile`] handle.

use crate::error::SinkResult;
use crate::flatten::{FlatRecord, FlatSchema};
use crate::record::record_to_line;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Batch file compression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchCompression {
    None,
    Gzip,
}

impl BatchCompression {
    fn suffix(&self) -> &'static str {
        match self {
            BatchCompression::None => ".csv",
            BatchCompression::Gzip => ".csv.gz",
        }
    }
}

/// A written batch file; removed from disk when dropped
#[derive(Debug)]
pub struct BatchFile {
    file: NamedTempFile,
    rows: usize,
    size_bytes: u64,
}

impl BatchFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }
}

/// Write one line per record, in `schema` column order, to a new temp file
pub fn write_batch<'a, I>(
    records: I,
    schema: &FlatSchema,
    compression: BatchCompression,
    dest_dir: Option<&Path>,
) -> SinkResult<BatchFile>
where
    I: IntoIterator<Item = &'a FlatRecord>,
{
    let dir: PathBuf = match dest_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            dir.to_path_buf()
        }
        None => std::env::temp_dir(),
    };

    let file = tempfile::Builder::new()
        .prefix("batch_")
        .suffix(compression.suffix())
        .tempfile_in(&dir)?;

    let handle = file.reopen()?;
    let rows = match compression {
        BatchCompression::None => {
            let mut writer = BufWriter::new(handle);
            let rows = write_lines(&mut writer, records, schema)?;
            writer.flush()?;
            rows
        }
        BatchCompression::Gzip => {
            let mut encoder = GzEncoder::new(BufWriter::new(handle), Compression::default());
            let rows = write_lines(&mut encoder, records, schema)?;
            encoder.finish()?.flush()?;
            rows
        }
    };

    let size_bytes = std::fs::metadata(file.path())?.len();
    Ok(BatchFile {
        file,
        rows,
        size_bytes,
    })
}

fn write_lines<'a, W, I>(writer: &mut W, records: I, schema: &FlatSchema) -> SinkResult<usize>
where
    W: Write,
    I: IntoIterator<Item = &'a FlatRecord>,
{
    let mut rows = 0;
    for record in records {
        let line = record_to_line(record, schema)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        rows += 1;
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use serde_json::{json, Value};
    use std::io::Read;
    use tempfile::TempDir;

    fn schema() -> FlatSchema {
        let mut schema = FlatSchema::new();
        schema.insert("id".to_string(), json!({"type": ["integer"]}));
        schema.insert("name".to_string(), json!({"type": ["null", "string"]}));
        schema
    }

    fn records() -> Vec<FlatRecord> {
        vec![
            [("id".to_string(), json!(1)), ("name".to_string(), json!("a"))]
                .into_iter()
                .collect(),
            [("id".to_string(), json!(2))].into_iter().collect::<FlatRecord>(),
        ]
    }

    #[test]
    fn test_write_uncompressed_batch() {
        let dir = TempDir::new().unwrap();
        let records = records();
        let batch = write_batch(&records, &schema(), BatchCompression::None, Some(dir.path())).unwrap();

        assert_eq!(batch.rows(), 2);
        assert!(batch.path().to_string_lossy().ends_with(".csv"));
        let contents = std::fs::read_to_string(batch.path()).unwrap();
        assert_eq!(contents, "1,\"a\"\n2,\n");
        assert_eq!(batch.size_bytes(), contents.len() as u64);
    }

    #[test]
    fn test_write_compressed_batch() {
        let dir = TempDir::new().unwrap();
        let records = records();
        let batch = write_batch(&records, &schema(), BatchCompression::Gzip, Some(dir.path())).unwrap();
        assert!(batch.path().to_string_lossy().ends_with(".csv.gz"));

        let mut decoded = String::new();
        GzDecoder::new(std::fs::File::open(batch.path()).unwrap())
            .read_to_string(&mut decoded)
            .unwrap();
        assert_eq!(decoded, "1,\"a\"\n2,\n");
    }

    #[test]
    fn test_batch_file_removed_on_drop() {
        let dir = TempDir::new().unwrap();
        let records = records();
        let batch = write_batch(&records, &schema(), BatchCompression::None, Some(dir.path())).unwrap();
        let path = batch.path().to_path_buf();
        assert!(path.exists());
        drop(batch);
        assert!(!path.exists());
    }

    #[test]
    fn test_failed_render_leaves_no_file() {
        let dir = TempDir::new().unwrap();
        let mut schema = FlatSchema::new();
        schema.insert(
            "ts".to_string(),
            json!({"type": ["string"], "format": "date-time"}),
        );
        let bad: Vec<FlatRecord> = vec![[("ts".to_string(), Value::from("garbage"))]
            .into_iter()
            .collect()];

        assert!(write_batch(&bad, &schema, BatchCompression::Gzip, Some(dir.path())).is_err());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
