use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, IoSlice};
use std::path::Path;
use std::sync::Arc;

use futures::channel::oneshot;
use futures::FutureExt;
use log::{debug, error, warn};

use crate::error::{check_range, E, R};
use crate::executor::Executor;
use crate::fio::{
    check_iovecs, preadv_ready, record_read, record_skip, OwnedSegment, ReadCounter, ReadFile, ReadFuture, Segment,
    VectoredRead, WriteFile,
};
use crate::options::{ReadOptions, WriteOptions};
use crate::stats::IoStats;

/// 本地磁盘上的只读文件。
///
/// 构造时带了 executor 的话，preadv_async 会把读提交给 executor 执行。
pub struct LocalReadFile {
    executor: Option<Arc<dyn Executor>>,
    path: String,
    /// file descriptor，异步读任务通过 Arc 共享
    fd: Arc<File>,
    size: u64,
    counter: ReadCounter,
}

impl LocalReadFile {
    pub fn open(path: impl AsRef<Path>, executor: Option<Arc<dyn Executor>>, options: ReadOptions) -> R<Self> {
        let path = path.as_ref();
        let mut open_options = OpenOptions::new();
        open_options.read(true);
        set_direct_io(&mut open_options, options.buffered_io);

        let file = match open_options.open(path) {
            Ok(file) => file,
            Err(e) => {
                error!("failed to open {} for read: {}", path.display(), e);
                return Err(E::io("open", e));
            }
        };

        let mut read_file = Self::from_file(file, executor)?;
        read_file.path = path.to_string_lossy().into_owned();
        debug!("opened {} for read, size {}", read_file.path, read_file.size);
        Ok(read_file)
    }

    /// 包装一个已经打开的文件
    pub fn from_file(file: File, executor: Option<Arc<dyn Executor>>) -> R<Self> {
        let size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("failed to stat file: {}", e);
                return Err(E::io("stat", e));
            }
        };
        Ok(Self {
            executor,
            path: String::new(),
            fd: Arc::new(file),
            size,
            counter: ReadCounter::new(),
        })
    }
}

impl ReadFile for LocalReadFile {
    fn read_at<'b>(&self, offset: u64, buf: &'b mut [u8], stats: Option<&dyn IoStats>) -> R<&'b [u8]> {
        let length = buf.len() as u64;
        check_range(offset, length, self.size)?;
        if let Err(e) = read_exact_at(&self.fd, buf, offset) {
            error!("read {} bytes at {} from {} err: {}", length, offset, self.name(), e);
            return Err(E::io("pread", e));
        }
        record_read(stats, length);
        Ok(&*buf)
    }

    /// 直接读到每个 segment 中，不经过临时缓冲区
    fn preadv(&self, offset: u64, segments: &mut [Segment<'_>], stats: Option<&dyn IoStats>) -> R<u64> {
        self.counter.add(segments_len(segments.iter().map(Segment::len)));
        preadv_file(&self.fd, self.size, offset, segments, stats)
    }

    fn preadv_async(&self, offset: u64, segments: Vec<OwnedSegment>, stats: Option<Arc<dyn IoStats>>) -> ReadFuture {
        let Some(executor) = self.executor.as_ref() else {
            return preadv_ready(self, offset, segments, stats.as_deref());
        };

        self.counter.add(segments_len(segments.iter().map(OwnedSegment::len)));
        let (tx, rx) = oneshot::channel();
        let fd = Arc::clone(&self.fd);
        let size = self.size;
        executor.execute(Box::new(move || {
            let mut segments = segments;
            let result = {
                let mut borrowed: Vec<Segment<'_>> = segments.iter_mut().map(OwnedSegment::as_segment).collect();
                preadv_file(&fd, size, offset, &mut borrowed, stats.as_deref())
            };
            // 调用方丢弃 future 后结果直接作废
            let _ = tx.send(result.map(|bytes_read| VectoredRead { bytes_read, segments }));
        }));
        Box::pin(rx.map(|received| received.unwrap_or_else(|_| Err(E::AsyncReadAborted))))
    }

    fn has_preadv_async(&self) -> bool {
        self.executor.is_some()
    }

    fn should_coalesce(&self) -> bool {
        false
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn memory_usage(&self) -> u64 {
        std::mem::size_of::<Self>() as u64 + self.path.capacity() as u64
    }

    fn name(&self) -> String {
        if self.path.is_empty() {
            return "<LocalReadFile>".to_string();
        }
        self.path.clone()
    }

    fn natural_read_size(&self) -> u64 {
        10 << 20
    }

    fn counter(&self) -> &ReadCounter {
        &self.counter
    }
}

fn segments_len(lens: impl Iterator<Item = usize>) -> u64 {
    lens.map(|n| n as u64).sum()
}

/// 同步和异步 preadv 共用的读逻辑，不更新计数器
fn preadv_file(fd: &File, size: u64, offset: u64, segments: &mut [Segment<'_>], stats: Option<&dyn IoStats>) -> R<u64> {
    let total = segments_len(segments.iter().map(Segment::len));
    check_range(offset, total, size)?;

    let mut pos = offset;
    for segment in segments.iter_mut() {
        match segment {
            Segment::Data(buf) => {
                let n = buf.len() as u64;
                if let Err(e) = read_exact_at(fd, buf, pos) {
                    error!("preadv {} bytes at {} err: {}", n, pos, e);
                    return Err(E::io("preadv", e));
                }
                record_read(stats, n);
                pos += n;
            }
            Segment::Skip(n) => {
                record_skip(stats, *n as u64);
                pos += *n as u64;
            }
        }
    }
    Ok(total)
}

/// LocalWriteFile 认识的属性
pub struct Attributes;

impl Attributes {
    /// 为 true 时关闭文件的 copy-on-write，只对 Btrfs 这类支持 COW 的文件系统有效
    pub const NO_COW: &'static str = "write-on-copy-disabled";
    pub const DEFAULT_NO_COW: bool = false;

    pub fn cow_disabled(attributes: &HashMap<String, String>) -> R<bool> {
        match attributes.get(Self::NO_COW) {
            None => Ok(Self::DEFAULT_NO_COW),
            Some(value) => value.parse::<bool>().map_err(|_| {
                E::InvalidArgument(format!("attribute {} expects true or false, got {:?}", Self::NO_COW, value))
            }),
        }
    }
}

/// 本地磁盘上的写文件。
///
/// 逻辑大小由自己维护，每次成功的 append/write/truncate 后立即更新。
/// append 总是写在逻辑大小处，因此 truncate 之后的 append 紧接着新的末尾。
pub struct LocalWriteFile {
    /// file descriptor，close 之后为 None
    fd: Option<File>,
    path: String,
    size: u64,
    attributes: HashMap<String, String>,
}

impl LocalWriteFile {
    /// 文件已存在时，fail_if_exists 为 true 则报 AlreadyExists，
    /// 否则打开已有文件并从它的末尾继续写
    pub fn create(path: impl AsRef<Path>, options: WriteOptions) -> R<Self> {
        let path = path.as_ref();
        if options.create_parent_directories {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = fs::create_dir_all(parent) {
                    error!("failed to create parent directories of {}: {}", path.display(), e);
                    return Err(E::io("create_dir_all", e));
                }
            }
        }

        let mut open_options = OpenOptions::new();
        open_options.write(true);
        if options.fail_if_exists {
            open_options.create_new(true);
        } else {
            open_options.create(true);
        }
        set_direct_io(&mut open_options, options.buffered_io);

        let file = match open_options.open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(E::AlreadyExists { path: path.to_path_buf() });
            }
            Err(e) => {
                error!("failed to open {} for write: {}", path.display(), e);
                return Err(E::io("open", e));
            }
        };
        let size = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(e) => {
                error!("failed to stat {}: {}", path.display(), e);
                return Err(E::io("stat", e));
            }
        };

        debug!("opened {} for write, size {}", path.display(), size);
        Ok(Self {
            fd: Some(file),
            path: path.to_string_lossy().into_owned(),
            size,
            attributes: HashMap::new(),
        })
    }

    fn fd(&self) -> R<&File> {
        self.fd.as_ref().ok_or_else(|| E::FileClosed { name: self.path.clone() })
    }

    fn write_at(&self, data: &[u8], offset: u64) -> R<()> {
        if let Err(e) = write_all_at(self.fd()?, data, offset) {
            error!("write {} bytes at {} to {} err: {}", data.len(), offset, self.path, e);
            return Err(E::io("write", e));
        }
        Ok(())
    }
}

impl WriteFile for LocalWriteFile {
    fn append(&mut self, data: &[u8]) -> R<()> {
        self.write_at(data, self.size)?;
        self.size += data.len() as u64;
        Ok(())
    }

    fn append_bytes(&mut self, data: bytes::Bytes) -> R<()> {
        self.append(&data)
    }

    fn write(&mut self, iovecs: &[IoSlice<'_>], offset: u64, length: u64) -> R<()> {
        check_iovecs(iovecs, length)?;
        let mut pos = offset;
        for iovec in iovecs {
            self.write_at(iovec, pos)?;
            pos += iovec.len() as u64;
        }
        // 长度为 0 的写不会让文件变长
        if length > 0 {
            self.size = self.size.max(offset + length);
        }
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> R<()> {
        if let Err(e) = self.fd()?.set_len(new_size) {
            error!("failed to truncate {} to {}: {}", self.path, new_size, e);
            return Err(E::io("truncate", e));
        }
        debug!("truncated {} from {} to {}", self.path, self.size, new_size);
        self.size = new_size;
        Ok(())
    }

    fn flush(&mut self) -> R<()> {
        if let Err(e) = self.fd()?.sync_all() {
            error!("failed to sync {}: {}", self.path, e);
            return Err(E::io("flush", e));
        }
        Ok(())
    }

    fn set_attributes(&mut self, attributes: &HashMap<String, String>) -> R<()> {
        let fd = self.fd()?;
        if Attributes::cow_disabled(attributes)? {
            if let Err(e) = disable_cow(fd) {
                error!("failed to disable copy-on-write for {}: {}", self.path, e);
                return Err(E::io("set_attributes", e));
            }
            debug!("disabled copy-on-write for {}", self.path);
        }
        self.attributes = attributes.clone();
        Ok(())
    }

    fn attributes(&self) -> R<HashMap<String, String>> {
        Ok(self.attributes.clone())
    }

    /// 重复调用无副作用
    fn close(&mut self) -> R<()> {
        let Some(fd) = self.fd.take() else {
            return Ok(());
        };
        if let Err(e) = fd.sync_all() {
            error!("failed to sync {} on close: {}", self.path, e);
            return Err(E::io("close", e));
        }
        debug!("closed {}, size {}", self.path, self.size);
        Ok(())
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn name(&self) -> R<&str> {
        Ok(&self.path)
    }

    fn has_append_bytes(&self) -> bool {
        true
    }

    fn has_write(&self) -> bool {
        true
    }

    fn has_truncate(&self) -> bool {
        true
    }

    fn has_attributes(&self) -> bool {
        true
    }
}

impl Drop for LocalWriteFile {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("failed to close {} on drop: {}", self.path, e);
        }
    }
}

/// buffered_io 为 false 时在 Linux 上加 O_DIRECT，调用方负责缓冲区对齐
fn set_direct_io(open_options: &mut OpenOptions, buffered_io: bool) {
    #[cfg(target_os = "linux")]
    if !buffered_io {
        use std::os::unix::fs::OpenOptionsExt;
        open_options.custom_flags(libc::O_DIRECT);
    }

    #[cfg(not(target_os = "linux"))]
    let _ = (open_options, buffered_io);
}

#[cfg(target_os = "linux")]
fn disable_cow(fd: &File) -> io::Result<()> {
    use std::os::unix::io::AsRawFd;

    const FS_NOCOW_FL: libc::c_int = 0x0080_0000;

    let raw = fd.as_raw_fd();
    let mut flags: libc::c_int = 0;
    // SAFETY: raw 在 fd 存活期间有效，flags 是栈上的 int
    if unsafe { libc::ioctl(raw, libc::FS_IOC_GETFLAGS, &mut flags as *mut libc::c_int) } == -1 {
        return Err(io::Error::last_os_error());
    }
    flags |= FS_NOCOW_FL;
    // SAFETY: 同上
    if unsafe { libc::ioctl(raw, libc::FS_IOC_SETFLAGS, &flags as *const libc::c_int) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn disable_cow(_fd: &File) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn read_exact_at(fd: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    fd.read_exact_at(buf, offset)
}

#[cfg(windows)]
fn read_exact_at(fd: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match fd.seek_read(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn write_all_at(fd: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    fd.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(fd: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match fd.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
