//! Row decoding for the three inventory container formats.
//!
//! All three readers are cursor-style: they hand out bounded batches of
//! [`InventoryRecord`]s and never materialize a whole file's rows. The
//! columnar formats carry their own column names; delimited text takes its
//! column order from the manifest's `fileSchema`.

use std::collections::HashMap;

use arrow::array::{
    Array, BooleanArray, Int32Array, Int64Array, LargeStringArray, RecordBatch, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;

use stratus_core::{Error, Result};

/// One decoded inventory row, before projection into an event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryRecord {
    /// Bucket column, when present.
    pub bucket: Option<String>,
    /// Object key (still percent-encoded).
    pub key: Option<String>,
    /// Version identifier.
    pub version_id: Option<String>,
    /// Object size in bytes.
    pub size: Option<i64>,
    /// Last-modified timestamp.
    pub last_modified: Option<DateTime<Utc>>,
    /// eTag.
    pub e_tag: Option<String>,
    /// Storage class in the store's wire form.
    pub storage_class: Option<String>,
    /// Whether the row describes a delete marker.
    pub is_delete_marker: bool,
    /// Restore status column, when the inventory carries one.
    pub restore_status: Option<String>,
}

/// The container format of one data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// Gzip-compressed delimited text.
    Csv,
    /// Columnar row-group format.
    Orc,
    /// Columnar block-structured format.
    Parquet,
}

impl FileFormat {
    /// Determines the format from the manifest's `fileFormat` field,
    /// falling back to the data file's extension.
    #[must_use]
    pub fn detect(declared: Option<&str>, key: &str) -> Option<Self> {
        if let Some(declared) = declared {
            return match declared.to_ascii_lowercase().as_str() {
                "csv" => Some(Self::Csv),
                "orc" => Some(Self::Orc),
                "parquet" => Some(Self::Parquet),
                _ => None,
            };
        }
        let key = key.to_ascii_lowercase();
        if key.ends_with(".csv.gz") || key.ends_with(".csv") {
            Some(Self::Csv)
        } else if key.ends_with(".orc") {
            Some(Self::Orc)
        } else if key.ends_with(".parquet") {
            Some(Self::Parquet)
        } else {
            None
        }
    }
}

/// Normalizes a column name for matching: `LastModifiedDate`,
/// `last_modified_date` and `lastmodifieddate` are the same column.
fn normalize(column: &str) -> String {
    column
        .chars()
        .filter(|c| *c != '_')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// A cursor over one data file, yielding bounded record batches.
pub enum FormatReader {
    /// Streaming gzip-CSV reader.
    Csv {
        /// Underlying CSV reader over the decompression stream.
        reader: csv::Reader<GzDecoder<std::io::Cursor<Vec<u8>>>>,
        /// Normalized column name per position.
        columns: Vec<String>,
        /// Rows per batch.
        batch_size: usize,
    },
    /// Arrow-based columnar reader (Parquet or ORC).
    Columnar {
        /// Record-batch source.
        batches: Box<dyn Iterator<Item = std::result::Result<RecordBatch, arrow::error::ArrowError>> + Send>,
    },
}

impl FormatReader {
    /// Opens a data file for reading.
    ///
    /// # Errors
    ///
    /// Returns an error if the container cannot be opened.
    pub fn open(
        format: FileFormat,
        file: &str,
        data: Vec<u8>,
        schema: &[String],
        batch_size: usize,
    ) -> Result<Self> {
        match format {
            FileFormat::Csv => {
                let reader = csv::ReaderBuilder::new()
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(GzDecoder::new(std::io::Cursor::new(data)));
                Ok(Self::Csv {
                    reader,
                    columns: schema.iter().map(|c| normalize(c)).collect(),
                    batch_size,
                })
            }
            FileFormat::Parquet => {
                let batches = parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder::try_new(
                    Bytes::from(data),
                )
                .map_err(|e| Error::inventory(file, format!("opening parquet: {e}")))?
                .with_batch_size(batch_size)
                .build()
                .map_err(|e| Error::inventory(file, format!("reading parquet: {e}")))?;
                Ok(Self::Columnar {
                    batches: Box::new(batches),
                })
            }
            FileFormat::Orc => {
                let batches = orc_rust::ArrowReaderBuilder::try_new(Bytes::from(data))
                    .map_err(|e| Error::inventory(file, format!("opening orc: {e}")))?
                    .with_batch_size(batch_size)
                    .build();
                Ok(Self::Columnar {
                    batches: Box::new(batches),
                })
            }
        }
    }

    /// The next bounded batch of records, or `None` at end of file.
    ///
    /// # Errors
    ///
    /// Returns an error if decoding fails mid-file.
    pub fn next_batch(&mut self) -> Result<Option<Vec<InventoryRecord>>> {
        match self {
            Self::Csv {
                reader,
                columns,
                batch_size,
            } => {
                let mut records = Vec::with_capacity(*batch_size);
                for row in reader.records().take(*batch_size) {
                    let row = row
                        .map_err(|e| Error::inventory("csv", format!("malformed row: {e}")))?;
                    records.push(csv_record(&row, columns));
                }
                Ok((!records.is_empty()).then_some(records))
            }
            Self::Columnar { batches } => match batches.next() {
                None => Ok(None),
                Some(Err(e)) => Err(Error::inventory("columnar", e.to_string())),
                Some(Ok(batch)) => Ok(Some(records_from_batch(&batch)?)),
            },
        }
    }
}

fn csv_record(row: &csv::StringRecord, columns: &[String]) -> InventoryRecord {
    let mut record = InventoryRecord::default();
    for (index, column) in columns.iter().enumerate() {
        let Some(value) = row.get(index).filter(|value| !value.is_empty()) else {
            continue;
        };
        assign(&mut record, column, value.to_string());
    }
    record
}

fn assign(record: &mut InventoryRecord, column: &str, value: String) {
    match column {
        "bucket" => record.bucket = Some(value),
        "key" => record.key = Some(value),
        "versionid" => record.version_id = Some(value),
        "size" => record.size = value.parse().ok(),
        "lastmodifieddate" => {
            record.last_modified = DateTime::parse_from_rfc3339(&value)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc));
        }
        "etag" => record.e_tag = Some(value),
        "storageclass" => record.storage_class = Some(value),
        "isdeletemarker" => record.is_delete_marker = value.eq_ignore_ascii_case("true"),
        "restorestatus" => record.restore_status = Some(value),
        // Columns the projection does not use (IsLatest, encryption
        // status, ...) are ignored.
        _ => {}
    }
}

fn records_from_batch(batch: &RecordBatch) -> Result<Vec<InventoryRecord>> {
    let by_name: HashMap<String, usize> = batch
        .schema()
        .fields()
        .iter()
        .enumerate()
        .map(|(index, field)| (normalize(field.name()), index))
        .collect();

    let mut records = vec![InventoryRecord::default(); batch.num_rows()];
    for (column, &index) in &by_name {
        let array = batch.column(index);
        for (row, record) in records.iter_mut().enumerate() {
            if array.is_null(row) {
                continue;
            }
            match column.as_str() {
                "size" => record.size = int_at(array.as_ref(), row),
                "lastmodifieddate" => record.last_modified = timestamp_at(array.as_ref(), row),
                "isdeletemarker" => {
                    record.is_delete_marker = bool_at(array.as_ref(), row).unwrap_or(false);
                }
                other => {
                    if let Some(value) = string_at(array.as_ref(), row) {
                        assign(record, other, value);
                    }
                }
            }
        }
    }
    Ok(records)
}

fn string_at(array: &dyn Array, row: usize) -> Option<String> {
    match array.data_type() {
        DataType::Utf8 => array
            .as_any()
            .downcast_ref::<StringArray>()
            .map(|a| a.value(row).to_string()),
        DataType::LargeUtf8 => array
            .as_any()
            .downcast_ref::<LargeStringArray>()
            .map(|a| a.value(row).to_string()),
        DataType::Boolean => bool_at(array, row).map(|b| b.to_string()),
        _ => None,
    }
}

fn int_at(array: &dyn Array, row: usize) -> Option<i64> {
    match array.data_type() {
        DataType::Int64 => array
            .as_any()
            .downcast_ref::<Int64Array>()
            .map(|a| a.value(row)),
        DataType::Int32 => array
            .as_any()
            .downcast_ref::<Int32Array>()
            .map(|a| i64::from(a.value(row))),
        DataType::Utf8 => string_at(array, row).and_then(|v| v.parse().ok()),
        _ => None,
    }
}

fn bool_at(array: &dyn Array, row: usize) -> Option<bool> {
    match array.data_type() {
        DataType::Boolean => array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .map(|a| a.value(row)),
        DataType::Utf8 => {
            string_at(array, row).map(|v| v.eq_ignore_ascii_case("true"))
        }
        _ => None,
    }
}

fn timestamp_at(array: &dyn Array, row: usize) -> Option<DateTime<Utc>> {
    match array.data_type() {
        DataType::Timestamp(TimeUnit::Millisecond, _) => array
            .as_any()
            .downcast_ref::<TimestampMillisecondArray>()
            .and_then(|a| DateTime::from_timestamp_millis(a.value(row))),
        DataType::Timestamp(TimeUnit::Microsecond, _) => array
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .and_then(|a| DateTime::from_timestamp_micros(a.value(row))),
        DataType::Timestamp(TimeUnit::Nanosecond, _) => array
            .as_any()
            .downcast_ref::<TimestampNanosecondArray>()
            .map(|a| DateTime::from_timestamp_nanos(a.value(row))),
        DataType::Utf8 => string_at(array, row).and_then(|v| {
            DateTime::parse_from_rfc3339(&v)
                .ok()
                .map(|parsed| parsed.with_timezone(&Utc))
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::Write;
    use std::sync::Arc;

    fn gzip(content: &str) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap()
    }

    fn schema() -> Vec<String> {
        ["Bucket", "Key", "VersionId", "Size", "LastModifiedDate", "ETag", "StorageClass"]
            .into_iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn format_detection_prefers_declared_format() {
        assert_eq!(FileFormat::detect(Some("Parquet"), "x.csv.gz"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::detect(None, "data/part-0.csv.gz"), Some(FileFormat::Csv));
        assert_eq!(FileFormat::detect(None, "data/part-0.orc"), Some(FileFormat::Orc));
        assert_eq!(FileFormat::detect(None, "data/part-0.parquet"), Some(FileFormat::Parquet));
        assert_eq!(FileFormat::detect(None, "data/part-0.bin"), None);
    }

    #[test]
    fn csv_rows_project_by_schema_position() {
        let data = gzip(concat!(
            "\"data\",\"key%20one\",\"v1\",\"10\",\"2024-05-22T01:30:00.000Z\",\"abc\",\"STANDARD\"\n",
            "\"data\",\"key2\",\"v2\",\"20\",\"2024-05-22T02:30:00.000Z\",\"def\",\"GLACIER\"\n",
        ));
        let mut reader =
            FormatReader::open(FileFormat::Csv, "f.csv.gz", data, &schema(), 10).unwrap();

        let batch = reader.next_batch().unwrap().unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].bucket.as_deref(), Some("data"));
        assert_eq!(batch[0].key.as_deref(), Some("key%20one"));
        assert_eq!(batch[0].size, Some(10));
        assert!(batch[0].last_modified.is_some());
        assert_eq!(batch[1].storage_class.as_deref(), Some("GLACIER"));
        assert!(reader.next_batch().unwrap().is_none());
    }

    #[test]
    fn csv_batches_are_bounded() {
        let rows: String = (0..25)
            .map(|i| format!("\"data\",\"key{i}\",\"v\",\"1\",\"2024-05-22T01:30:00.000Z\",\"e\",\"STANDARD\"\n"))
            .collect();
        let mut reader =
            FormatReader::open(FileFormat::Csv, "f.csv.gz", gzip(&rows), &schema(), 10).unwrap();

        let mut sizes = Vec::new();
        while let Some(batch) = reader.next_batch().unwrap() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn parquet_round_trips_by_column_name() {
        use arrow::datatypes::{Field, Schema};
        use parquet::arrow::ArrowWriter;

        let arrow_schema = Arc::new(Schema::new(vec![
            Field::new("bucket", DataType::Utf8, false),
            Field::new("key", DataType::Utf8, false),
            Field::new("version_id", DataType::Utf8, true),
            Field::new("size", DataType::Int64, true),
            Field::new("is_delete_marker", DataType::Boolean, true),
        ]));
        let batch = RecordBatch::try_new(
            arrow_schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["data", "data"])),
                Arc::new(StringArray::from(vec!["a", "b"])),
                Arc::new(StringArray::from(vec![Some("v1"), None])),
                Arc::new(Int64Array::from(vec![Some(5), Some(7)])),
                Arc::new(BooleanArray::from(vec![Some(false), Some(true)])),
            ],
        )
        .unwrap();

        let mut buffer = Vec::new();
        let mut writer = ArrowWriter::try_new(&mut buffer, arrow_schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let mut reader =
            FormatReader::open(FileFormat::Parquet, "f.parquet", buffer, &[], 100).unwrap();
        let records = reader.next_batch().unwrap().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].key.as_deref(), Some("a"));
        assert_eq!(records[0].version_id.as_deref(), Some("v1"));
        assert_eq!(records[0].size, Some(5));
        assert!(records[1].version_id.is_none());
        assert!(records[1].is_delete_marker);
    }

    #[test]
    fn corrupt_gzip_fails_cleanly() {
        let mut reader = FormatReader::open(
            FileFormat::Csv,
            "f.csv.gz",
            b"not gzip at all".to_vec(),
            &schema(),
            10,
        )
        .unwrap();
        assert!(reader.next_batch().is_err());
    }
}
