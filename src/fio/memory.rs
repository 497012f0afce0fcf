use std::borrow::Cow;

use bytes::Bytes;

use crate::error::{check_range, R};
use crate::fio::{record_read, to_usize, ReadCounter, ReadFile, WriteFile};
use crate::stats::IoStats;

/// 内存中的只读文件，数据可以是借用的也可以是自有的
pub struct InMemoryReadFile<'a> {
    file: Cow<'a, [u8]>,
    should_coalesce: bool,
    counter: ReadCounter,
}

impl<'a> InMemoryReadFile<'a> {
    pub fn new(file: impl Into<Cow<'a, [u8]>>) -> Self {
        Self {
            file: file.into(),
            should_coalesce: false,
            counter: ReadCounter::new(),
        }
    }

    /// 内存数据合并读没有意义，主要给测试用
    pub fn set_should_coalesce(&mut self, should_coalesce: bool) {
        self.should_coalesce = should_coalesce;
    }

    fn slice(&self, offset: u64, length: u64) -> R<&[u8]> {
        check_range(offset, length, self.size())?;
        let start = to_usize(offset)?;
        Ok(&self.file[start..start + to_usize(length)?])
    }
}

impl ReadFile for InMemoryReadFile<'_> {
    fn read_at<'b>(&self, offset: u64, buf: &'b mut [u8], stats: Option<&dyn IoStats>) -> R<&'b [u8]> {
        let length = buf.len() as u64;
        buf.copy_from_slice(self.slice(offset, length)?);
        record_read(stats, length);
        Ok(&*buf)
    }

    fn pread(&self, offset: u64, length: u64, stats: Option<&dyn IoStats>) -> R<Vec<u8>> {
        self.counter.add(length);
        let data = self.slice(offset, length)?.to_vec();
        record_read(stats, length);
        Ok(data)
    }

    fn should_coalesce(&self) -> bool {
        self.should_coalesce
    }

    fn size(&self) -> u64 {
        self.file.len() as u64
    }

    fn memory_usage(&self) -> u64 {
        self.size()
    }

    fn name(&self) -> String {
        "<InMemoryReadFile>".to_string()
    }

    fn natural_read_size(&self) -> u64 {
        1024
    }

    fn counter(&self) -> &ReadCounter {
        &self.counter
    }
}

/// 追加写到调用方持有的 Vec 中
pub struct InMemoryWriteFile<'a> {
    file: &'a mut Vec<u8>,
}

impl<'a> InMemoryWriteFile<'a> {
    pub fn new(file: &'a mut Vec<u8>) -> Self {
        Self { file }
    }
}

impl WriteFile for InMemoryWriteFile<'_> {
    fn append(&mut self, data: &[u8]) -> R<()> {
        self.file.extend_from_slice(data);
        Ok(())
    }

    fn append_bytes(&mut self, data: Bytes) -> R<()> {
        self.file.extend_from_slice(&data);
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> R<()> {
        self.file.resize(to_usize(new_size)?, 0);
        Ok(())
    }

    fn flush(&mut self) -> R<()> {
        Ok(())
    }

    fn close(&mut self) -> R<()> {
        Ok(())
    }

    fn size(&self) -> u64 {
        self.file.len() as u64
    }

    fn has_append_bytes(&self) -> bool {
        true
    }

    fn has_truncate(&self) -> bool {
        true
    }
}
