/// 提交给执行器的任务
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// 异步读使用的任务执行器，线程池由调用方实现。
/// 执行器可以丢弃任务，此时对应的 future 以 AsyncReadAborted 失败。
pub trait Executor: Send + Sync {
    fn execute(&self, task: Task);
}
