//! 任务调度：单步内的有界并发扇出
//!
//! 步进循环本身严格串行；单步内的多条搜索查询与多个 URL 抓取通过 Semaphore 限制并发，
//! 逐项收集成功/失败，不因单项错误中止整批。每次外部调用后施加固定的协作式休眠以尊重上游限流。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::Semaphore;

/// 任务调度器：持有并发许可与调用间隔
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    semaphore: Arc<Semaphore>,
    call_sleep: Duration,
}

impl TaskScheduler {
    pub fn new(max_concurrency: usize, call_sleep_ms: u64) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
            call_sleep: Duration::from_millis(call_sleep_ms),
        }
    }

    pub fn call_sleep(&self) -> Duration {
        self.call_sleep
    }

    /// 并发执行一批任务（最多 max_concurrency 个同时进行），结果按输入顺序返回。
    /// 每个任务完成后在持有许可的情况下休眠 call_sleep，相当于对同一上游的调用节流。
    pub async fn run_bounded<I, F, Fut, T>(&self, items: I, f: F) -> Vec<T>
    where
        I: IntoIterator,
        F: Fn(I::Item) -> Fut,
        Fut: Future<Output = T>,
    {
        let futures = items.into_iter().map(|item| {
            let semaphore = self.semaphore.clone();
            let sleep = self.call_sleep;
            let fut = f(item);
            async move {
                // 信号量只在调度器销毁时关闭，这里拿不到许可时退化为不限流执行
                let _permit = semaphore.acquire_owned().await.ok();
                let out = fut.await;
                if !sleep.is_zero() {
                    tokio::time::sleep(sleep).await;
                }
                out
            }
        });
        join_all(futures).await
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(3, 0)
    }
}
