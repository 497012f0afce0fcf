/// 读路径的统计接收器，由调用方提供。
/// 这里只负责写入，从不读取；所有方法默认为空实现。
pub trait IoStats: Send + Sync {
    /// 一次物理读的字节数
    fn record_read(&self, _bytes: u64) {}

    /// 被跳过、未拷贝给调用方的字节数
    fn record_skip(&self, _bytes: u64) {}

    /// regions 个请求被合并成 reads 次物理读
    fn record_coalesced(&self, _regions: u64, _reads: u64) {}
}
