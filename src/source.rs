use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Float64Type};
use thiserror::Error;
use tracing::debug;

use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error reading source: {0}")]
    Io(#[from] std::io::Error),

    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("row group {index} out of range (source has {total})")]
    GroupOutOfRange { index: usize, total: usize },
}

/// A table that can be traversed row group by row group, any number of
/// times, with per-read column projection. Each traversal is independent
/// of the last; the streaming passes re-read the source from group 0 with
/// constants computed by the previous pass.
pub trait RowGroupSource: Sync {
    fn num_row_groups(&self) -> usize;

    /// Read group `index` restricted to `columns`. Cells are numeric with
    /// explicit missing markers; a cell that cannot be represented as a
    /// number is missing, never an error. Row order within a group is
    /// arbitrary but consistent across reads.
    fn read_row_group(&self, index: usize, columns: &[String]) -> Result<Frame, SourceError>;
}

/// Row-group reader over a meta-table Parquet file. Holds only the path
/// and group count; every read opens the file fresh so the source stays
/// shareable across parallel estimator runs.
pub struct ParquetSource {
    path: PathBuf,
    num_groups: usize,
}

impl ParquetSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path.as_ref())?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let num_groups = builder.metadata().num_row_groups();
        debug!(
            "opened {} with {} row groups",
            path.as_ref().display(),
            num_groups
        );
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            num_groups,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RowGroupSource for ParquetSource {
    fn num_row_groups(&self) -> usize {
        self.num_groups
    }

    fn read_row_group(&self, index: usize, columns: &[String]) -> Result<Frame, SourceError> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
        use parquet::arrow::ProjectionMask;

        if index >= self.num_groups {
            return Err(SourceError::GroupOutOfRange {
                index,
                total: self.num_groups,
            });
        }

        let file = File::open(&self.path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

        // Project to the requested columns that actually exist in the file;
        // columns the file lacks are simply absent from the frame.
        let present: Vec<&str> = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().as_str())
            .filter(|name| columns.iter().any(|c| c == name))
            .collect();
        let mask = ProjectionMask::columns(builder.parquet_schema(), present.iter().copied());

        let reader = builder
            .with_row_groups(vec![index])
            .with_projection(mask)
            .build()?;

        let mut names: Vec<String> = Vec::new();
        let mut cells: Vec<Vec<Option<f64>>> = Vec::new();

        for batch in reader {
            let batch = batch?;
            if names.is_empty() {
                names = batch
                    .schema()
                    .fields()
                    .iter()
                    .map(|f| f.name().clone())
                    .collect();
                cells = vec![Vec::with_capacity(batch.num_rows()); names.len()];
            }
            for (col, out) in batch.columns().iter().zip(cells.iter_mut()) {
                // Safe cast: cells that do not parse as numbers become null,
                // mirroring coerce-to-missing semantics downstream.
                let numeric = cast(col, &DataType::Float64)?;
                let values = numeric.as_primitive::<Float64Type>();
                for i in 0..values.len() {
                    out.push(if values.is_null(i) {
                        None
                    } else {
                        Some(values.value(i))
                    });
                }
            }
        }

        let mut frame = Frame::new();
        for (name, col) in names.into_iter().zip(cells) {
            frame.push_column(name, col);
        }
        Ok(frame)
    }
}

/// In-memory source: a fixed sequence of frames, one per row group.
/// Used by tests and by any caller that already holds its data.
pub struct VecSource {
    groups: Vec<Frame>,
}

impl VecSource {
    pub fn new(groups: Vec<Frame>) -> Self {
        Self { groups }
    }
}

impl RowGroupSource for VecSource {
    fn num_row_groups(&self) -> usize {
        self.groups.len()
    }

    fn read_row_group(&self, index: usize, columns: &[String]) -> Result<Frame, SourceError> {
        let group = self
            .groups
            .get(index)
            .ok_or(SourceError::GroupOutOfRange {
                index,
                total: self.groups.len(),
            })?;
        Ok(group.project(columns))
    }
}
