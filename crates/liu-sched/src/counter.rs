//! 完成计数器.
//!
//! 生产者提交 N 个任务时计数加 N, 每个任务成功完成时减一.
//! 生产者可以查询是否归零, 也可以阻塞等待归零, 无需逐个轮询任务.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// 原子完成计数器
#[derive(Debug, Default)]
pub struct WaitCounter {
    count: AtomicUsize,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl WaitCounter {
    /// 创建计数为 0 的计数器
    pub fn new() -> Self {
        Self::default()
    }

    /// 计数加一 (提交任务时调用)
    #[inline]
    pub fn increment(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    /// 计数减一 (任务完成时调用), 归零时唤醒等待者
    pub fn decrement(&self) {
        let prev = self.count.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "WaitCounter 减到负数, 任务完成次数多于提交次数");
        if prev == 1 {
            let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            self.cvar.notify_all();
        }
    }

    /// 当前计数
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// 是否已归零
    #[inline]
    pub fn is_zero(&self) -> bool {
        self.count() == 0
    }

    /// 阻塞直到计数归零
    pub fn wait(&self) {
        if self.is_zero() {
            return;
        }
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while !self.is_zero() {
            guard = self
                .cvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
