//! 无分配工作线程池.
//!
//! 线程池持有定长任务槽环和一组工作线程. 工作线程轮询槽环寻找可执行任务,
//! 被闸门或就绪检查挡住的任务回到等待态, 不在单个任务上自旋.
//! 提交和调度路径都不分配内存.
//!
//! 线程数为 0 时不创建工作线程, 由调用方通过
//! [`ThreadPool::process_tasks_on_main_thread`] 在自己的线程上驱动槽环.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;
use log::{debug, warn};

use crate::slot::{SlotIndex, SlotState, Task, TaskSlot};

/// 线程池构建参数
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// 工作线程数, 0 表示由调用方驱动
    pub num_threads: usize,
    /// 任务槽环容量
    pub capacity: usize,
    /// 空闲线程阻塞前的自旋预算
    pub busy_wait: Duration,
    /// 工作线程名前缀, 实际名称为 `{前缀}{线程 id}`
    pub thread_name: String,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            num_threads: 0,
            capacity: 1024,
            busy_wait: Duration::from_millis(1),
            thread_name: "DecThread".to_string(),
        }
    }
}

/// 调用线程上一轮调度的结果
#[derive(Debug, Clone, Copy, Default)]
struct RoundOutcome {
    /// 有任务完成
    completed: bool,
    /// 有任务通过闸门和就绪检查, 其工作函数被调用过
    attempted: bool,
}

/// 线程间共享的调度状态
struct PoolShared<P> {
    slots: Box<[TaskSlot<P>]>,
    exit_threads: AtomicBool,
    waiting_threads: AtomicUsize,
    idle_lock: Mutex<()>,
    busy_wait: Duration,
    /// 下一次提交开始搜索空闲槽的位置
    submit_cursor: AtomicUsize,
}

/// 依赖驱动的工作线程池
pub struct ThreadPool<P: Send + Sync + 'static> {
    shared: Arc<PoolShared<P>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    num_threads: usize,
}

impl<P: Send + Sync + 'static> ThreadPool<P> {
    /// 创建线程池并启动工作线程
    pub fn new(options: PoolOptions) -> std::io::Result<Self> {
        assert!(options.capacity > 0, "任务槽环容量必须大于 0");
        let slots: Box<[TaskSlot<P>]> =
            (0..options.capacity).map(|_| TaskSlot::default()).collect();
        let shared = Arc::new(PoolShared {
            slots,
            exit_threads: AtomicBool::new(false),
            waiting_threads: AtomicUsize::new(0),
            idle_lock: Mutex::new(()),
            busy_wait: options.busy_wait,
            submit_cursor: AtomicUsize::new(0),
        });

        let mut workers = Vec::with_capacity(options.num_threads);
        for tid in 0..options.num_threads {
            let worker_shared = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}{tid}", options.thread_name))
                .spawn(move || worker_shared.thread_proc(tid));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    shared.exit_threads.store(true, Ordering::Release);
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err);
                }
            }
        }
        debug!(
            "线程池已启动: 线程数={}, 槽容量={}, 自旋预算={:?}",
            options.num_threads, options.capacity, options.busy_wait
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
            num_threads: options.num_threads,
        })
    }

    /// 工作线程数
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// 槽环容量
    pub fn capacity(&self) -> usize {
        self.shared.slots.len()
    }

    /// 当前未释放的槽个数
    pub fn pending_tasks(&self) -> usize {
        self.shared
            .slots
            .iter()
            .filter(|slot| slot.state() != SlotState::Free)
            .count()
    }

    /// 是否已经关闭
    pub fn is_shut_down(&self) -> bool {
        self.shared.exit_threads.load(Ordering::Acquire)
    }

    /// 提交任务
    ///
    /// 提交时递增任务的完成计数器. 槽环已满时:
    /// 有工作线程则退避等待槽释放; 没有工作线程则在当前线程上推进任务,
    /// 仍无法释放任何槽说明任务图无法前进, 视为结构性错误.
    /// 调用方需保证一组互相依赖的任务能同时驻留在槽环中.
    pub fn add_task(&self, task: Task<P>) {
        assert!(!self.is_shut_down(), "线程池关闭后不能再提交任务");

        let shared = &*self.shared;
        let capacity = shared.slots.len();
        let backoff = Backoff::new();
        let idx = loop {
            if let Some(idx) = shared.claim_free_slot() {
                break idx;
            }
            if self.num_threads == 0 {
                shared.drive_main_thread();
                assert!(
                    shared.has_free_slot(),
                    "任务槽环已满 (容量 {capacity}) 且没有任务能够完成"
                );
            } else if backoff.is_completed() {
                thread::yield_now();
            } else {
                backoff.snooze();
            }
        };

        if let Some(counter) = &task.counter {
            counter.increment();
        }
        let slot = &shared.slots[idx];
        // SAFETY: claim_free_slot 通过 CAS 取得了该槽的 Allocated 状态.
        unsafe {
            *slot.task_mut() = Some(task);
        }
        slot.set_state(SlotState::Waiting);
    }

    /// 在调用线程上驱动槽环 (仅限无工作线程的线程池)
    ///
    /// 反复调度直到全部槽空闲, 或一整轮中没有任何任务能够执行.
    /// 工作函数返回 `false` 的协作式重试算作进展, 任务会在下一轮再次执行,
    /// 因此工作函数必须在依赖满足后有限次内完成.
    /// 返回 `true` 表示全部完成; `false` 表示剩余任务都被未打开的闸门或
    /// 就绪检查挡住, 这不是错误, 外部输入可能稍后满足它.
    pub fn process_tasks_on_main_thread(&self) -> bool {
        assert_eq!(self.num_threads, 0, "有工作线程时不能在调用线程上驱动槽环");
        self.shared.drive_main_thread();
        self.shared.all_free()
    }

    /// 关闭线程池
    ///
    /// 设置退出标志; `block` 为 `true` 时等待所有工作线程退出.
    /// 已经在执行的任务会执行完毕, 之后不再认领新任务.
    pub fn shutdown(&self, block: bool) {
        if !self.shared.exit_threads.swap(true, Ordering::AcqRel) {
            debug!("线程池关闭, 剩余未完成槽 {}", self.pending_tasks());
        }
        if block {
            let handles: Vec<_> = self
                .workers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .drain(..)
                .collect();
            for handle in handles {
                if handle.join().is_err() {
                    warn!("工作线程异常退出");
                }
            }
        }
    }
}

impl<P: Send + Sync + 'static> Drop for ThreadPool<P> {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl<P: Send + Sync> PoolShared<P> {
    #[inline]
    fn should_exit(&self) -> bool {
        self.exit_threads.load(Ordering::Acquire)
    }

    fn claim_free_slot(&self) -> Option<usize> {
        let capacity = self.slots.len();
        let start = self.submit_cursor.load(Ordering::Relaxed) % capacity;
        for offset in 0..capacity {
            let idx = (start + offset) % capacity;
            if self.slots[idx].try_transition(SlotState::Free, SlotState::Allocated) {
                self.submit_cursor.store((idx + 1) % capacity, Ordering::Relaxed);
                return Some(idx);
            }
        }
        None
    }

    fn has_free_slot(&self) -> bool {
        self.slots.iter().any(|slot| slot.state() == SlotState::Free)
    }

    fn all_free(&self) -> bool {
        self.slots.iter().all(|slot| slot.state() == SlotState::Free)
    }

    /// 从 `start` 开始轮询, 认领第一个闸门已打开且就绪检查通过的任务
    fn find_next_task(&self, worker: usize, start: SlotIndex) -> Option<usize> {
        let capacity = self.slots.len();
        let start = start.get().filter(|&idx| idx < capacity).unwrap_or(0);
        for offset in 0..capacity {
            if self.should_exit() {
                return None;
            }
            let idx = (start + offset) % capacity;
            let slot = &self.slots[idx];
            if !slot.try_transition(SlotState::Waiting, SlotState::Running) {
                continue;
            }
            // SAFETY: 刚通过 CAS 取得 Running 状态.
            let Some(task) = (unsafe { slot.task_mut() }).as_mut() else {
                unreachable!("等待态的槽没有任务描述");
            };
            if !task.barriers.is_empty() {
                if task.barriers.any_blocked() {
                    slot.set_state(SlotState::Waiting);
                    continue;
                }
                task.barriers.clear();
            }
            let ready = task.ready_check.is_none_or(|check| check(worker, &task.param));
            if !ready {
                slot.set_state(SlotState::Waiting);
                continue;
            }
            return Some(idx);
        }
        None
    }

    /// 执行已认领的任务, 返回是否完成
    fn process_task(&self, worker: usize, idx: usize) -> bool {
        let slot = &self.slots[idx];
        // SAFETY: 调用方通过 find_next_task 持有该槽的 Running 状态.
        let cell = unsafe { slot.task_mut() };
        let Some(task) = cell.as_ref() else {
            unreachable!("运行态的槽没有任务描述");
        };
        if !(task.work)(worker, &task.param) {
            slot.set_state(SlotState::Waiting);
            return false;
        }

        if let Some(task) = cell.take() {
            if let Some(done) = &task.done {
                done.open();
            }
            if let Some(counter) = &task.counter {
                counter.decrement();
            }
        }
        slot.set_state(SlotState::Free);
        true
    }

    /// 反复执行调度轮, 直到全部空闲或某一轮没有任何任务能够执行
    ///
    /// 返回期间是否有任务完成.
    fn drive_main_thread(&self) -> bool {
        let mut completed = false;
        loop {
            let round = self.run_main_thread_round();
            completed |= round.completed;
            if !round.attempted || self.all_free() {
                return completed;
            }
        }
    }

    /// 调用线程上的一轮调度: 直到全部空闲, 或首个失败的任务再次失败且期间无进展
    fn run_main_thread_round(&self) -> RoundOutcome {
        let capacity = self.slots.len();
        let mut outcome = RoundOutcome::default();
        let mut progress = false;
        let mut first_failed: Option<usize> = None;
        let mut cursor = self.find_next_task(0, SlotIndex::new(0));
        while let Some(idx) = cursor {
            outcome.attempted = true;
            let success = self.process_task(0, idx);
            progress |= success;
            outcome.completed |= success;

            if first_failed == Some(idx) {
                if success {
                    first_failed = None;
                } else if progress {
                    progress = false;
                } else {
                    break;
                }
            } else if !success && first_failed.is_none() {
                first_failed = Some(idx);
            }
            cursor = self.find_next_task(0, SlotIndex::new(idx).wrapping_next(capacity));
        }
        outcome
    }

    fn thread_proc(&self, worker: usize) {
        let capacity = self.slots.len();
        let mut next = SlotIndex::new(0);
        while !self.should_exit() {
            let mut found = self.find_next_task(worker, next);
            if found.is_none() {
                found = self.idle_wait(worker, next);
            }
            let Some(idx) = found else {
                continue;
            };
            if self.should_exit() {
                // 已认领但不再执行, 放回等待态
                self.slots[idx].set_state(SlotState::Waiting);
                return;
            }
            self.process_task(worker, idx);
            next = SlotIndex::new(idx).wrapping_next(capacity);
        }
    }

    /// 空闲等待: 先自旋; 多个线程同时空闲且自旋预算耗尽后, 其余线程阻塞在空闲锁上,
    /// 只留持锁线程继续轮询, 它找到任务释放锁后下一个线程接替.
    fn idle_wait(&self, worker: usize, next: SlotIndex) -> Option<usize> {
        self.waiting_threads.fetch_add(1, Ordering::Relaxed);
        let start_wait = Instant::now();
        let backoff = Backoff::new();
        let mut idle_guard: Option<MutexGuard<'_, ()>> = None;
        let mut found = None;
        while !self.should_exit() {
            found = self.find_next_task(worker, next);
            if found.is_some() || self.should_exit() {
                break;
            }
            if idle_guard.is_none()
                && self.waiting_threads.load(Ordering::Relaxed) > 1
                && (self.busy_wait.is_zero() || start_wait.elapsed() > self.busy_wait)
                && !self.should_exit()
            {
                idle_guard = Some(self.idle_lock.lock().unwrap_or_else(PoisonError::into_inner));
            } else if backoff.is_completed() {
                thread::yield_now();
            } else {
                backoff.snooze();
            }
        }
        drop(idle_guard);
        self.waiting_threads.fetch_sub(1, Ordering::Relaxed);
        found
    }
}
