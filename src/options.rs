/// 本地读文件的构造参数
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReadOptions {
    /// false 时绕过 page cache（Linux 上为 O_DIRECT）
    pub buffered_io: bool,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self { buffered_io: true }
    }
}

/// 本地写文件的构造参数
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct WriteOptions {
    /// 父目录不存在时自动创建
    pub create_parent_directories: bool,

    /// 目标文件已存在时报 AlreadyExists，否则保留已有内容并从末尾继续写
    pub fail_if_exists: bool,

    /// false 时绕过 page cache（Linux 上为 O_DIRECT）
    pub buffered_io: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            create_parent_directories: false,
            fail_if_exists: true,
            buffered_io: true,
        }
    }
}
