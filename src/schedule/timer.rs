//! 定时器抽象
//!
//! 调度器只依赖 `CadenceTimer` 接口，真实时钟与测试用的手动时钟可以互换

use crate::error::ScheduleError;
use crate::schedule::cadence::CadenceSpec;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// 定时触发时执行的回调
pub type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// 注册句柄
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// 句柄编号
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// 周期定时器接口
#[async_trait]
pub trait CadenceTimer: Send + Sync {
    /// 注册周期回调，注册后处于定时器当前的启停状态
    ///
    /// # 参数
    /// * `cadence` - 调度频率
    /// * `callback` - 触发时执行的回调
    ///
    /// # 返回
    /// * `Result<TimerHandle, ScheduleError>` - 注册句柄
    async fn register(
        &self,
        cadence: CadenceSpec,
        callback: TimerCallback,
    ) -> Result<TimerHandle, ScheduleError>;

    /// 注销回调
    async fn unregister(&self, handle: TimerHandle);

    /// 激活所有已注册的回调
    async fn start(&self);

    /// 暂停所有已注册的回调，不销毁注册
    async fn stop(&self);

    /// 是否处于激活状态
    fn is_active(&self) -> bool;
}

/// 基于 tokio 的真实时钟定时器
///
/// 每个注册对应一个后台任务：按本地时间解析当前生效的表达式，睡眠到下一次触发点，
/// 触发时把回调派生为独立任务，因此同一时刻不同数据源的采集可以并发执行
pub struct TokioCadenceTimer {
    active: watch::Sender<bool>,
    next_id: AtomicU64,
    jobs: Mutex<HashMap<TimerHandle, JoinHandle<()>>>,
}

impl TokioCadenceTimer {
    /// 创建处于停止状态的定时器
    pub fn new() -> Self {
        let (active, _) = watch::channel(false);
        Self {
            active,
            next_id: AtomicU64::new(1),
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// 已注册的回调数量
    pub async fn registered(&self) -> usize {
        self.jobs.lock().await.len()
    }

    async fn run_job(
        handle: TimerHandle,
        cadence: CadenceSpec,
        callback: TimerCallback,
        mut active_rx: watch::Receiver<bool>,
    ) {
        let mut last_fired: Option<DateTime<Local>> = None;

        loop {
            if active_rx.wait_for(|active| *active).await.is_err() {
                break;
            }

            let now = Local::now();
            let reference = match last_fired {
                Some(last) if last >= now => last,
                _ => now,
            };
            let Some(next) = cadence.next_fire(&reference) else {
                warn!("调度表达式没有下一次触发时间，停止定时任务 #{}", handle.id());
                break;
            };
            let wait = (next - now).to_std().unwrap_or_default();

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    if *active_rx.borrow() {
                        debug!("定时任务 #{} 触发", handle.id());
                        last_fired = Some(next);
                        tokio::spawn(callback());
                    }
                }
                changed = active_rx.changed() => {
                    // 启停状态变化后重新计算
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
    }
}

impl Default for TokioCadenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CadenceTimer for TokioCadenceTimer {
    async fn register(
        &self,
        cadence: CadenceSpec,
        callback: TimerCallback,
    ) -> Result<TimerHandle, ScheduleError> {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        let active_rx = self.active.subscribe();
        let job = tokio::spawn(Self::run_job(handle, cadence, callback, active_rx));

        self.jobs.lock().await.insert(handle, job);
        Ok(handle)
    }

    async fn unregister(&self, handle: TimerHandle) {
        if let Some(job) = self.jobs.lock().await.remove(&handle) {
            job.abort();
        }
    }

    async fn start(&self) {
        self.active.send_replace(true);
    }

    async fn stop(&self) {
        self.active.send_replace(false);
    }

    fn is_active(&self) -> bool {
        *self.active.borrow()
    }
}

impl Drop for TokioCadenceTimer {
    fn drop(&mut self) {
        for (_, job) in self.jobs.get_mut().drain() {
            job.abort();
        }
    }
}

/// 手动驱动的定时器
///
/// 不依赖真实时钟，由调用方决定何时触发，适用于测试和嵌入到外部事件循环
pub struct ManualCadenceTimer {
    active: AtomicBool,
    next_id: AtomicU64,
    entries: Mutex<HashMap<TimerHandle, (CadenceSpec, TimerCallback)>>,
}

impl ManualCadenceTimer {
    /// 创建处于停止状态的手动定时器
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// 触发全部已注册回调并等待完成，未激活时不触发
    ///
    /// # 返回
    /// * `usize` - 实际触发的回调数量
    pub async fn fire_all(&self) -> usize {
        if !self.is_active() {
            return 0;
        }

        let callbacks: Vec<TimerCallback> = {
            let entries = self.entries.lock().await;
            entries.values().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        let count = callbacks.len();
        futures::future::join_all(callbacks.iter().map(|cb| cb())).await;
        count
    }

    /// 触发单个回调并等待完成
    pub async fn fire(&self, handle: TimerHandle) -> bool {
        if !self.is_active() {
            return false;
        }

        let callback = {
            let entries = self.entries.lock().await;
            entries.get(&handle).map(|(_, cb)| Arc::clone(cb))
        };
        match callback {
            Some(cb) => {
                cb().await;
                true
            }
            None => false,
        }
    }

    /// 已注册的回调数量
    pub async fn registered(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// 查看某个注册的调度频率
    pub async fn cadence_of(&self, handle: TimerHandle) -> Option<CadenceSpec> {
        let entries = self.entries.lock().await;
        entries.get(&handle).map(|(cadence, _)| cadence.clone())
    }
}

impl Default for ManualCadenceTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CadenceTimer for ManualCadenceTimer {
    async fn register(
        &self,
        cadence: CadenceSpec,
        callback: TimerCallback,
    ) -> Result<TimerHandle, ScheduleError> {
        let handle = TimerHandle(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.entries.lock().await.insert(handle, (cadence, callback));
        Ok(handle)
    }

    async fn unregister(&self, handle: TimerHandle) {
        self.entries.lock().await.remove(&handle);
    }

    async fn start(&self) {
        self.active.store(true, Ordering::SeqCst);
    }

    async fn stop(&self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
