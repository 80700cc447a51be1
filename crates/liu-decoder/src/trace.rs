//! 可注入的观测接口.
//!
//! 解码器不持有任何进程级的计数器; 需要性能分析时通过
//! [`crate::DecoderBuilder::trace`] 注入一个 [`DecodeTrace`] 实现.
//! 它由解码器在创建时 `init`, 在关闭时 `shutdown`.

use std::sync::atomic::{AtomicU64, Ordering};

/// 流水线事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// 图像重建开始 (所有参考图像已就绪)
    PictureStart { poc: i32 },
    /// 图像重建完成
    PictureDone { poc: i32 },
    /// 图像收尾 (输出与参考标记更新)
    PictureFinish { poc: i32 },
    /// 提交一幅图像的重建任务
    SchedulingTasks { poc: i32, tasks: usize },
    /// 等待一幅图像的重建任务
    WaitForTasks { poc: i32 },
    /// 生成丢失图像的占位重建
    LostPicture { poc: i32 },
}

/// 观测接口
///
/// 事件可能在任意工作线程上产生, 实现应避免阻塞.
pub trait DecodeTrace: Send + Sync {
    /// 解码器创建时调用
    fn init(&self) {}

    /// 解码器关闭时调用
    fn shutdown(&self) {}

    /// 记录一个事件
    fn on_event(&self, event: TraceEvent);
}

/// 不记录任何内容 (默认)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrace;

impl DecodeTrace for NoopTrace {
    #[inline(always)]
    fn on_event(&self, _event: TraceEvent) {}
}

/// 原子计数实现
#[derive(Debug, Default)]
pub struct CountingTrace {
    started: AtomicU64,
    done: AtomicU64,
    finished: AtomicU64,
    scheduled_tasks: AtomicU64,
    waits: AtomicU64,
    lost: AtomicU64,
    active: AtomicU64,
}

/// [`CountingTrace`] 的快照
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TraceCounts {
    /// 开始重建的图像数
    pub started: u64,
    /// 完成重建的图像数
    pub done: u64,
    /// 收尾的图像数 (帧计数)
    pub finished: u64,
    /// 提交的任务总数
    pub scheduled_tasks: u64,
    /// 等待次数
    pub waits: u64,
    /// 丢失图像数
    pub lost: u64,
}

impl CountingTrace {
    /// 创建计数器
    pub fn new() -> Self {
        Self::default()
    }

    /// 读取当前计数
    pub fn counts(&self) -> TraceCounts {
        TraceCounts {
            started: self.started.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            finished: self.finished.load(Ordering::Relaxed),
            scheduled_tasks: self.scheduled_tasks.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            lost: self.lost.load(Ordering::Relaxed),
        }
    }

    /// 是否处于 `init` 与 `shutdown` 之间
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed) > 0
    }
}

impl DecodeTrace for CountingTrace {
    fn init(&self) {
        self.active.fetch_add(1, Ordering::Relaxed);
    }

    fn shutdown(&self) {
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    fn on_event(&self, event: TraceEvent) {
        let counter = match event {
            TraceEvent::PictureStart { .. } => &self.started,
            TraceEvent::PictureDone { .. } => &self.done,
            TraceEvent::PictureFinish { .. } => &self.finished,
            TraceEvent::SchedulingTasks { tasks, .. } => {
                self.scheduled_tasks.fetch_add(tasks as u64, Ordering::Relaxed);
                return;
            }
            TraceEvent::WaitForTasks { .. } => &self.waits,
            TraceEvent::LostPicture { .. } => &self.lost,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
