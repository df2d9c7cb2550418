use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum TableError {
    #[error("cannot reconfigure a table holding {entries} entries")]
    NotEmpty { entries: usize },
    #[error("low threshold {low} exceeds high threshold {high}")]
    InvalidThresholds { low: f32, high: f32 },
    #[error("allocator could not provide {bytes} bytes")]
    AllocFailed { bytes: usize },
    #[error("composite key used on a table without a schema")]
    MissingSchema,
}

pub type Result<T> = std::result::Result<T, TableError>;
