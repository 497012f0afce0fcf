//! 与存储介质无关的文件读写抽象。
//!
//! - [`fio::ReadFile`]：单区间、多区间、批量和异步读
//! - [`fio::WriteFile`]：追加、定位写、截断、属性
//! - 内存实现 [`fio::memory`] 和本地磁盘实现 [`fio::file_io`]

pub mod error;
pub mod executor;
pub mod fio;
pub mod options;
pub mod region;
pub mod stats;

pub use error::{E, R};
pub use executor::{Executor, Task};
pub use fio::file_io::{Attributes, LocalReadFile, LocalWriteFile};
pub use fio::memory::{InMemoryReadFile, InMemoryWriteFile};
pub use fio::{OwnedSegment, ReadCounter, ReadFile, ReadFuture, Segment, VectoredRead, WriteFile};
pub use options::{ReadOptions, WriteOptions};
pub use region::Region;
pub use stats::IoStats;
