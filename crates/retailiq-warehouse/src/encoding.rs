// Parquet encoding for warehouse data files
//
// Serializes Arrow RecordBatches to Parquet bytes in memory while computing a
// Blake3 content hash, so the checksum recorded in the metastore is taken from
// exactly the bytes that land on disk.

use std::io::{self, Write};

use arrow::array::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::{EnabledStatistics, WriterProperties};
use parquet::format::KeyValue;

use crate::error::Result;

pub const DEFAULT_ROW_GROUP_SIZE: usize = 32 * 1024;

struct HashingBuffer {
    buffer: Vec<u8>,
    hasher: blake3::Hasher,
}

impl HashingBuffer {
    fn new() -> Self {
        Self {
            buffer: Vec::new(),
            hasher: blake3::Hasher::new(),
        }
    }

    fn finish(self) -> EncodedFile {
        let hash = self.hasher.finalize();
        EncodedFile {
            bytes: self.buffer,
            blake3: hex::encode(hash.as_bytes()),
        }
    }
}

impl Write for HashingBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Parquet bytes plus their hex-encoded Blake3 hash
#[derive(Debug, Clone)]
pub struct EncodedFile {
    pub bytes: Vec<u8>,
    pub blake3: String,
}

/// Writer properties for warehouse data files
///
/// - Snappy compression
/// - Dictionary encoding enabled
/// - Page-level statistics
/// - Table and partition recorded as key/value metadata
pub fn writer_properties(table: &str, partition: &str, row_group_size: usize) -> WriterProperties {
    let metadata = vec![
        KeyValue {
            key: "retailiq.version".to_string(),
            value: Some(env!("CARGO_PKG_VERSION").to_string()),
        },
        KeyValue {
            key: "retailiq.table".to_string(),
            value: Some(table.to_string()),
        },
        KeyValue {
            key: "retailiq.partition".to_string(),
            value: Some(partition.to_string()),
        },
    ];

    let row_group_size = if row_group_size == 0 {
        DEFAULT_ROW_GROUP_SIZE
    } else {
        row_group_size
    };

    WriterProperties::builder()
        .set_dictionary_enabled(true)
        .set_statistics_enabled(EnabledStatistics::Page)
        .set_compression(Compression::SNAPPY)
        .set_data_page_size_limit(256 * 1024)
        .set_write_batch_size(32 * 1024)
        .set_max_row_group_size(row_group_size)
        .set_dictionary_page_size_limit(128 * 1024)
        .set_key_value_metadata(Some(metadata))
        .build()
}

/// Encode one batch as a Parquet file, hashing while encoding (no second pass)
pub fn encode_batch(batch: &RecordBatch, props: WriterProperties) -> Result<EncodedFile> {
    let mut sink = HashingBuffer::new();
    {
        let mut writer = ArrowWriter::try_new(&mut sink, batch.schema(), Some(props))?;
        writer.write(batch)?;
        writer.close()?;
    }
    Ok(sink.finish())
}
