use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E {
    #[error("{op} is not implemented")]
    NotImplemented { op: &'static str },

    #[error("read of {length} bytes at offset {offset} is out of range for file of size {size}")]
    OutOfRange { offset: u64, length: u64, size: u64 },

    #[error("{op} failed: {source}")]
    IoError {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("file already exists: {}", path.display())]
    AlreadyExists { path: PathBuf },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file is closed: {name}")]
    FileClosed { name: String },

    #[error("async read was dropped by the executor before completion")]
    AsyncReadAborted,
}

impl E {
    pub fn not_implemented(op: &'static str) -> Self {
        E::NotImplemented { op }
    }

    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        E::IoError { op, source }
    }
}

pub type R<T> = Result<T, E>;

/// `[offset, offset + length)` 超出文件大小时返回 OutOfRange
pub(crate) fn check_range(offset: u64, length: u64, size: u64) -> R<()> {
    match offset.checked_add(length) {
        Some(end) if end <= size => Ok(()),
        _ => Err(E::OutOfRange { offset, length, size }),
    }
}
