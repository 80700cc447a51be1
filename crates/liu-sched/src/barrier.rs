//! 一次性完成闸门.
//!
//! `Barrier` 创建时处于阻塞态, 由唯一的生产者打开一次, 之后永远保持打开.
//! 任意多个任务可以并发读取状态; 调用方线程也可以阻塞等待它打开.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};

/// 一次性、单调的完成闸门
#[derive(Debug, Default)]
pub struct Barrier {
    open: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Barrier {
    /// 创建处于阻塞态的闸门
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建已经打开的闸门
    pub fn new_open() -> Self {
        let barrier = Self::new();
        barrier.open.store(true, Ordering::Release);
        barrier
    }

    /// 是否仍处于阻塞态
    #[inline]
    pub fn is_blocked(&self) -> bool {
        !self.open.load(Ordering::Acquire)
    }

    /// 是否已经打开
    #[inline]
    pub fn is_open(&self) -> bool {
        !self.is_blocked()
    }

    /// 打开闸门并唤醒所有等待者
    ///
    /// 打开之前的所有写入对观察到 "已打开" 的线程可见.
    pub fn open(&self) {
        self.open.store(true, Ordering::Release);
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.cvar.notify_all();
    }

    /// 阻塞当前线程直到闸门打开
    pub fn wait(&self) {
        if self.is_open() {
            return;
        }
        let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        while self.is_blocked() {
            guard = self
                .cvar
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
