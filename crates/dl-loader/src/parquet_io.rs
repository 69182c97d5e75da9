//! Parquet read/write shared by table export and the durable cache store.

use std::fs::File;
use std::path::Path;

use arrow::compute::concat_batches;
use arrow::record_batch::{RecordBatch, RecordBatchReader};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use dl_core::Result;

fn default_compression() -> Compression {
    // `parquet/zstd` needs zstd at build time; Snappy is always available.
    #[cfg(feature = "store-zstd")]
    {
        Compression::ZSTD(Default::default())
    }
    #[cfg(not(feature = "store-zstd"))]
    {
        Compression::SNAPPY
    }
}

/// Write one batch to a Parquet file, schema metadata included.
pub(crate) fn write_batch(path: &Path, batch: &RecordBatch) -> Result<()> {
    let props = WriterProperties::builder().set_compression(default_compression()).build();
    let file = File::create(path)?;
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
    writer.write(batch)?;
    writer.close()?;
    Ok(())
}

/// Read a whole Parquet file back as one batch.
pub(crate) fn read_batch(path: &Path) -> Result<RecordBatch> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
    let schema = reader.schema();
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(concat_batches(&schema, &batches)?)
}
