pub mod file_io;
pub mod memory;

use std::collections::HashMap;
use std::io::IoSlice;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{self, BoxFuture};

use crate::error::{E, R};
use crate::region::{coalesce, Region, DEFAULT_COALESCE_DISTANCE};
use crate::stats::IoStats;

/// preadv 的一段目标缓冲区，Skip 只消耗源字节不拷贝
#[derive(Debug)]
pub enum Segment<'a> {
    Data(&'a mut [u8]),
    Skip(usize),
}

impl Segment<'_> {
    pub fn len(&self) -> usize {
        match self {
            Segment::Data(buf) => buf.len(),
            Segment::Skip(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 异步 preadv 使用的自有缓冲区，读完后随结果一起交还给调用方
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OwnedSegment {
    Data(Vec<u8>),
    Skip(usize),
}

impl OwnedSegment {
    /// 长度为 len 的零初始化缓冲区
    pub fn zeroed(len: usize) -> Self {
        OwnedSegment::Data(vec![0; len])
    }

    pub fn len(&self) -> usize {
        match self {
            OwnedSegment::Data(buf) => buf.len(),
            OwnedSegment::Skip(n) => *n,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_segment(&mut self) -> Segment<'_> {
        match self {
            OwnedSegment::Data(buf) => Segment::Data(buf.as_mut_slice()),
            OwnedSegment::Skip(n) => Segment::Skip(*n),
        }
    }

    pub fn data(&self) -> Option<&[u8]> {
        match self {
            OwnedSegment::Data(buf) => Some(buf),
            OwnedSegment::Skip(_) => None,
        }
    }
}

/// preadv_async 的结果
#[derive(Debug)]
pub struct VectoredRead {
    pub bytes_read: u64,
    pub segments: Vec<OwnedSegment>,
}

pub type ReadFuture = BoxFuture<'static, R<VectoredRead>>;

/// 请求读取的字节总数。读路径上唯一可变的状态，允许并发累加
#[derive(Debug, Default)]
pub struct ReadCounter(AtomicU64);

impl ReadCounter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// 只读文件接口。
///
/// 实现方只需提供 read_at 这一单区间原语，批量读和异步读都有默认实现：
/// 批量读拆成多次单区间读，异步读同步计算后返回一个已完成的 future。
/// 需要更高吞吐的后端可以覆盖这些入口。
///
/// 所有方法都不修改文件内容，可以在同一实例上并发调用。
pub trait ReadFile: Send + Sync {
    /// 读取 [offset, offset + buf.len()) 到 buf，不更新计数器
    fn read_at<'b>(&self, offset: u64, buf: &'b mut [u8], stats: Option<&dyn IoStats>) -> R<&'b [u8]>;

    /// 读取 [offset, offset + buf.len()) 到 buf，返回写入部分的视图
    fn pread_into<'b>(&self, offset: u64, buf: &'b mut [u8], stats: Option<&dyn IoStats>) -> R<&'b [u8]> {
        self.counter().add(buf.len() as u64);
        self.read_at(offset, buf, stats)
    }

    /// 同 pread_into，返回自有数据
    fn pread(&self, offset: u64, length: u64, stats: Option<&dyn IoStats>) -> R<Vec<u8>> {
        let mut buf = vec![0; to_usize(length)?];
        self.pread_into(offset, &mut buf, stats)?;
        Ok(buf)
    }

    /// 从 offset 开始依次填充 segments，所有 segment 视为一段连续的目标。
    /// 返回消耗的源字节数（包含 Skip）。
    ///
    /// 默认实现先整段读到临时缓冲区再分发。
    fn preadv(&self, offset: u64, segments: &mut [Segment<'_>], stats: Option<&dyn IoStats>) -> R<u64> {
        let total: usize = segments.iter().map(Segment::len).sum();
        let data = self.pread(offset, total as u64, stats)?;
        let mut pos = 0;
        for segment in segments.iter_mut() {
            match segment {
                Segment::Data(buf) => {
                    let n = buf.len();
                    buf.copy_from_slice(&data[pos..pos + n]);
                    pos += n;
                }
                Segment::Skip(n) => {
                    record_skip(stats, *n as u64);
                    pos += *n;
                }
            }
        }
        Ok(total as u64)
    }

    /// 批量读：outputs[i] 得到 regions[i] 的内容，regions 可以无序、可以重叠。
    ///
    /// 返回交付给 outputs 的字节总数。should_coalesce 为 true 时相近的 region
    /// 合并成一次物理读，outputs 是合并结果的切片，物理读量记入 stats。
    /// 两种情况下计数器都只累加各 region 的 length。
    fn preadv_regions(&self, regions: &[Region], outputs: &mut [Bytes], stats: Option<&dyn IoStats>) -> R<u64> {
        if regions.len() != outputs.len() {
            return Err(E::InvalidArgument(format!(
                "{} regions but {} outputs",
                regions.len(),
                outputs.len()
            )));
        }

        let mut total = 0;
        if !self.should_coalesce() {
            for (region, output) in regions.iter().zip(outputs.iter_mut()) {
                *output = Bytes::from(self.pread(region.offset, region.length, stats)?);
                total += region.length;
            }
            return Ok(total);
        }

        let reads = coalesce(regions, self.coalesce_distance());
        if let Some(stats) = stats {
            stats.record_coalesced(regions.len() as u64, reads.len() as u64);
        }
        for read in reads {
            let mut buf = vec![0; to_usize(read.length)?];
            self.read_at(read.offset, &mut buf, stats)?;
            let data = Bytes::from(buf);
            for idx in read.members {
                let region = regions[idx];
                let start = to_usize(region.offset - read.offset)?;
                outputs[idx] = data.slice(start..start + to_usize(region.length)?);
                self.counter().add(region.length);
                total += region.length;
            }
        }
        Ok(total)
    }

    /// 与 preadv 语义相同，但可能在其他线程执行。
    /// 任何错误都通过 future 返回，不会同步抛出。
    fn preadv_async(&self, offset: u64, segments: Vec<OwnedSegment>, stats: Option<Arc<dyn IoStats>>) -> ReadFuture {
        preadv_ready(self, offset, segments, stats.as_deref())
    }

    /// preadv_async 是否真正异步
    fn has_preadv_async(&self) -> bool {
        false
    }

    /// 远端存储返回 true，内存返回 false
    fn should_coalesce(&self) -> bool;

    /// 合并时允许的最大空隙
    fn coalesce_distance(&self) -> u64 {
        DEFAULT_COALESCE_DISTANCE
    }

    fn size(&self) -> u64;

    /// 该实例占用内存的估计值
    fn memory_usage(&self) -> u64;

    fn name(&self) -> String;

    /// 后端认为高效的单次读大小，只供调用方参考
    fn natural_read_size(&self) -> u64;

    fn counter(&self) -> &ReadCounter;

    /// 自创建或上次 reset 以来请求读取的字节数（按请求长度累加，不是实际读到的）
    fn bytes_read(&self) -> u64 {
        self.counter().get()
    }

    fn reset_bytes_read(&self) {
        self.counter().reset()
    }
}

/// 同步执行 preadv，把结果包装成已完成的 future
pub fn preadv_ready<F: ReadFile + ?Sized>(
    file: &F,
    offset: u64,
    mut segments: Vec<OwnedSegment>,
    stats: Option<&dyn IoStats>,
) -> ReadFuture {
    let result = {
        let mut borrowed: Vec<Segment<'_>> = segments.iter_mut().map(OwnedSegment::as_segment).collect();
        file.preadv(offset, &mut borrowed, stats)
    };
    Box::pin(future::ready(result.map(|bytes_read| VectoredRead { bytes_read, segments })))
}

/// 只写文件接口。可选能力默认返回 NotImplemented，用 has_* 探测。
///
/// 写入的数据在 close 之前不保证能被读到。
pub trait WriteFile: Send {
    /// 追加到文件末尾
    fn append(&mut self, data: &[u8]) -> R<()>;

    /// 追加一个自有缓冲区
    fn append_bytes(&mut self, _data: Bytes) -> R<()> {
        Err(E::not_implemented("append_bytes"))
    }

    /// 在 offset 处写入 iovecs，总长度必须等于 length。可以覆盖已写入的数据
    fn write(&mut self, _iovecs: &[IoSlice<'_>], _offset: u64, _length: u64) -> R<()> {
        Err(E::not_implemented("write"))
    }

    /// 截断或扩展到 new_size，扩展出的部分读出为 0
    fn truncate(&mut self, _new_size: u64) -> R<()> {
        Err(E::not_implemented("truncate"))
    }

    /// 保证之前的写入对之后打开同一路径的读者可见
    fn flush(&mut self) -> R<()>;

    fn set_attributes(&mut self, _attributes: &HashMap<String, String>) -> R<()> {
        Err(E::not_implemented("set_attributes"))
    }

    fn attributes(&self) -> R<HashMap<String, String>> {
        Err(E::not_implemented("attributes"))
    }

    fn close(&mut self) -> R<()>;

    /// 当前逻辑大小，不需要 flush，close 之后也可以调用
    fn size(&self) -> u64;

    fn name(&self) -> R<&str> {
        Err(E::not_implemented("name"))
    }

    fn has_append_bytes(&self) -> bool {
        false
    }

    fn has_write(&self) -> bool {
        false
    }

    fn has_truncate(&self) -> bool {
        false
    }

    fn has_attributes(&self) -> bool {
        false
    }
}

pub(crate) fn to_usize(n: u64) -> R<usize> {
    usize::try_from(n).map_err(|_| E::InvalidArgument(format!("length {} does not fit in memory", n)))
}

pub(crate) fn record_read(stats: Option<&dyn IoStats>, bytes: u64) {
    if let Some(stats) = stats {
        stats.record_read(bytes);
    }
}

pub(crate) fn record_skip(stats: Option<&dyn IoStats>, bytes: u64) {
    if let Some(stats) = stats {
        stats.record_skip(bytes);
    }
}

/// iovecs 的总长度必须等于 length
pub(crate) fn check_iovecs(iovecs: &[IoSlice<'_>], length: u64) -> R<()> {
    let total: u64 = iovecs.iter().map(|s| s.len() as u64).sum();
    if total != length {
        return Err(E::InvalidArgument(format!(
            "iovecs hold {} bytes but length is {}",
            total, length
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 只实现 read_at 的最小后端，其余全部走默认实现
    struct Minimal {
        data: Vec<u8>,
        coalesce: bool,
        counter: ReadCounter,
    }

    impl Minimal {
        fn new(data: &[u8], coalesce: bool) -> Self {
            Self { data: data.to_vec(), coalesce, counter: ReadCounter::new() }
        }
    }

    impl ReadFile for Minimal {
        fn read_at<'b>(&self, offset: u64, buf: &'b mut [u8], _stats: Option<&dyn IoStats>) -> R<&'b [u8]> {
            crate::error::check_range(offset, buf.len() as u64, self.size())?;
            let start = offset as usize;
            buf.copy_from_slice(&self.data[start..start + buf.len()]);
            Ok(&*buf)
        }

        fn should_coalesce(&self) -> bool {
            self.coalesce
        }

        fn size(&self) -> u64 {
            self.data.len() as u64
        }

        fn memory_usage(&self) -> u64 {
            self.data.len() as u64
        }

        fn name(&self) -> String {
            "<Minimal>".to_string()
        }

        fn natural_read_size(&self) -> u64 {
            1
        }

        fn counter(&self) -> &ReadCounter {
            &self.counter
        }
    }

    struct Sink;

    impl WriteFile for Sink {
        fn append(&mut self, _data: &[u8]) -> R<()> {
            Ok(())
        }

        fn flush(&mut self) -> R<()> {
            Ok(())
        }

        fn close(&mut self) -> R<()> {
            Ok(())
        }

        fn size(&self) -> u64 {
            0
        }
    }

    #[test]
    fn test_default_pread() {
        let file = Minimal::new(b"hello world", false);
        assert_eq!(file.pread(6, 5, None).unwrap(), b"world");
        assert_eq!(file.bytes_read(), 5);
        assert!(matches!(file.pread(6, 6, None), Err(E::OutOfRange { .. })));
        assert_eq!(file.bytes_read(), 11);
    }

    #[test]
    fn test_default_preadv_with_skip() {
        let file = Minimal::new(b"hello world", false);
        let mut a = [0u8; 2];
        let mut b = [0u8; 3];
        let mut segments = [Segment::Data(&mut a), Segment::Skip(4), Segment::Data(&mut b)];
        assert_eq!(file.preadv(1, &mut segments, None).unwrap(), 9);
        assert_eq!(&a, b"el");
        assert_eq!(&b, b"orl");
        assert_eq!(file.bytes_read(), 9);
    }

    #[test]
    fn test_default_preadv_regions() {
        for coalesce in [false, true] {
            let file = Minimal::new(b"hello world", coalesce);
            let regions = [Region::new(6, 5), Region::new(0, 5), Region::new(4, 3)];
            let mut outputs = vec![Bytes::new(); 3];
            assert_eq!(file.preadv_regions(&regions, &mut outputs, None).unwrap(), 13);
            assert_eq!(outputs[0], "world");
            assert_eq!(outputs[1], "hello");
            assert_eq!(outputs[2], "o w");
            assert_eq!(file.bytes_read(), 13);
        }
    }

    #[test]
    fn test_coalesced_counter_counts_requested_lengths() {
        let data = vec![7u8; 4096];
        let regions = [Region::new(0, 10), Region::new(4000, 10)];
        let mut counts = Vec::new();
        for coalesce in [false, true] {
            let file = Minimal::new(&data, coalesce);
            let mut outputs = vec![Bytes::new(); 2];
            assert_eq!(file.preadv_regions(&regions, &mut outputs, None).unwrap(), 20);
            counts.push(file.bytes_read());
        }
        assert_eq!(counts, vec![20, 20]);
    }

    #[test]
    fn test_preadv_regions_mismatch() {
        let file = Minimal::new(b"hello world", false);
        let mut outputs = vec![Bytes::new(); 1];
        let res = file.preadv_regions(&[Region::new(0, 1), Region::new(1, 1)], &mut outputs, None);
        assert!(matches!(res, Err(E::InvalidArgument(_))));
    }

    #[test]
    fn test_default_preadv_async_is_ready() {
        let file = Minimal::new(b"hello world", false);
        assert!(!file.has_preadv_async());

        let segments = vec![OwnedSegment::zeroed(5), OwnedSegment::Skip(1), OwnedSegment::zeroed(5)];
        let read = futures::executor::block_on(file.preadv_async(0, segments, None)).unwrap();
        assert_eq!(read.bytes_read, 11);
        assert_eq!(read.segments[0].data(), Some(&b"hello"[..]));
        assert_eq!(read.segments[1].data(), None);
        assert_eq!(read.segments[2].data(), Some(&b"world"[..]));
    }

    #[test]
    fn test_default_preadv_async_error_is_deferred() {
        let file = Minimal::new(b"hello world", false);
        let fut = file.preadv_async(10, vec![OwnedSegment::zeroed(5)], None);
        assert!(matches!(futures::executor::block_on(fut), Err(E::OutOfRange { .. })));
    }

    #[test]
    fn test_counter_reset() {
        let file = Minimal::new(b"hello world", false);
        file.pread(0, 4, None).unwrap();
        file.reset_bytes_read();
        assert_eq!(file.bytes_read(), 0);
        file.pread(0, 2, None).unwrap();
        assert_eq!(file.bytes_read(), 2);
    }

    #[test]
    fn test_write_file_defaults() {
        let mut sink = Sink;
        assert!(!sink.has_append_bytes());
        assert!(!sink.has_write());
        assert!(!sink.has_truncate());
        assert!(!sink.has_attributes());
        assert!(matches!(sink.append_bytes(Bytes::from_static(b"x")), Err(E::NotImplemented { op: "append_bytes" })));
        assert!(matches!(sink.write(&[IoSlice::new(b"x")], 0, 1), Err(E::NotImplemented { op: "write" })));
        assert!(matches!(sink.truncate(0), Err(E::NotImplemented { op: "truncate" })));
        assert!(matches!(sink.set_attributes(&HashMap::new()), Err(E::NotImplemented { .. })));
        assert!(matches!(sink.attributes(), Err(E::NotImplemented { .. })));
        assert!(matches!(sink.name(), Err(E::NotImplemented { op: "name" })));
    }

    #[test]
    fn test_check_iovecs() {
        let iovecs = [IoSlice::new(b"ab"), IoSlice::new(b"cde")];
        assert!(check_iovecs(&iovecs, 5).is_ok());
        assert!(matches!(check_iovecs(&iovecs, 4), Err(E::InvalidArgument(_))));
    }
}
