//! 任务槽表.
//!
//! 固定容量的任务描述符环, 启动后不再分配内存. 每个槽的状态机:
//!
//! ```text
//! Free ──(提交方 CAS)──> Allocated ──(写入描述符)──> Waiting
//! Waiting ──(工作线程 CAS)──> Running ──(未完成)──> Waiting
//!                                   └──(完成)────> Free
//! ```
//!
//! 描述符数据只由把状态从 `Free`/`Waiting` 迁出的那一方访问,
//! 因此描述符本身不需要额外的锁.

use std::cell::UnsafeCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use crossbeam_utils::CachePadded;

use crate::barrier::Barrier;
use crate::counter::WaitCounter;

/// 单个任务可以引用的最大闸门数
pub const MAX_TASK_BARRIERS: usize = 32;

/// 任务函数: (工作线程 id, 参数) -> 是否完成
///
/// 返回 `false` 表示协作式重试, 任务会回到等待态稍后再执行.
pub type TaskFn<P> = fn(usize, &P) -> bool;

/// 槽状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// 空闲, 可以被提交方占用
    Free = 0,
    /// 提交方已占用, 正在写入描述符
    Allocated = 1,
    /// 已提交, 等待被工作线程认领
    Waiting = 2,
    /// 已被某个工作线程认领
    Running = 3,
}

impl SlotState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Free,
            1 => Self::Allocated,
            2 => Self::Waiting,
            3 => Self::Running,
            _ => unreachable!("非法槽状态值 {v}"),
        }
    }
}

/// 槽环下标, 带 "无效" 哨兵值和环绕递增
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotIndex(u32);

impl SlotIndex {
    /// 无效下标
    pub const INVALID: Self = Self(u32::MAX);

    /// 由槽位置创建下标
    pub fn new(index: usize) -> Self {
        let Ok(index) = u32::try_from(index) else {
            return Self::INVALID;
        };
        Self(index)
    }

    /// 是否有效
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    /// 取出槽位置
    #[inline]
    pub fn get(self) -> Option<usize> {
        self.is_valid().then_some(self.0 as usize)
    }

    /// 环绕递增; 无效下标递增后回到 0
    #[inline]
    pub fn wrapping_next(self, capacity: usize) -> Self {
        match self.get() {
            Some(idx) if idx + 1 < capacity => Self::new(idx + 1),
            _ => Self::new(0),
        }
    }
}

/// 定长闸门列表
pub struct BarrierList {
    items: [Option<Arc<Barrier>>; MAX_TASK_BARRIERS],
    len: usize,
}

impl Default for BarrierList {
    fn default() -> Self {
        Self {
            items: std::array::from_fn(|_| None),
            len: 0,
        }
    }
}

impl BarrierList {
    /// 追加一个闸门, 超出容量属于结构性错误
    pub fn push(&mut self, barrier: Arc<Barrier>) {
        assert!(
            self.len < MAX_TASK_BARRIERS,
            "任务引用的闸门数超过上限 {MAX_TASK_BARRIERS}"
        );
        self.items[self.len] = Some(barrier);
        self.len += 1;
    }

    /// 闸门个数
    pub fn len(&self) -> usize {
        self.len
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 是否有任一闸门仍处于阻塞态
    pub fn any_blocked(&self) -> bool {
        self.items[..self.len]
            .iter()
            .flatten()
            .any(|barrier| barrier.is_blocked())
    }

    /// 清空 (闸门只会单向打开, 通过一次后无需再检查)
    pub fn clear(&mut self) {
        for item in &mut self.items[..self.len] {
            *item = None;
        }
        self.len = 0;
    }
}

/// 待提交的任务描述
pub struct Task<P> {
    pub(crate) work: TaskFn<P>,
    pub(crate) param: P,
    pub(crate) ready_check: Option<TaskFn<P>>,
    pub(crate) barriers: BarrierList,
    pub(crate) done: Option<Arc<Barrier>>,
    pub(crate) counter: Option<Arc<WaitCounter>>,
}

impl<P> Task<P> {
    /// 创建任务
    pub fn new(work: TaskFn<P>, param: P) -> Self {
        Self {
            work,
            param,
            ready_check: None,
            barriers: BarrierList::default(),
            done: None,
            counter: None,
        }
    }

    /// 附加就绪检查, 每次调度尝试时求值
    pub fn with_ready_check(mut self, check: TaskFn<P>) -> Self {
        self.ready_check = Some(check);
        self
    }

    /// 附加一个前置闸门
    pub fn with_barrier(mut self, barrier: Arc<Barrier>) -> Self {
        self.barriers.push(barrier);
        self
    }

    /// 附加多个前置闸门
    pub fn with_barriers(mut self, barriers: impl IntoIterator<Item = Arc<Barrier>>) -> Self {
        for barrier in barriers {
            self.barriers.push(barrier);
        }
        self
    }

    /// 完成时打开的闸门
    pub fn with_done(mut self, done: Arc<Barrier>) -> Self {
        self.done = Some(done);
        self
    }

    /// 完成时递减的计数器 (提交时递增)
    pub fn with_counter(mut self, counter: Arc<WaitCounter>) -> Self {
        self.counter = Some(counter);
        self
    }
}

/// 任务槽
pub(crate) struct TaskSlot<P> {
    state: CachePadded<AtomicU8>,
    task: UnsafeCell<Option<Task<P>>>,
}

// SAFETY: `task` 只被当前持有 Allocated/Running 状态的线程访问,
// 状态迁移通过 CAS 保证同一时刻至多一个持有者, Release/Acquire 建立先行关系.
unsafe impl<P: Send + Sync> Sync for TaskSlot<P> {}

impl<P> Default for TaskSlot<P> {
    fn default() -> Self {
        Self {
            state: CachePadded::new(AtomicU8::new(SlotState::Free as u8)),
            task: UnsafeCell::new(None),
        }
    }
}

impl<P> TaskSlot<P> {
    #[inline]
    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u8(self.state.load(Ordering::Acquire))
    }

    #[inline]
    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// 尝试把状态从 `from` 迁移到 `to`, 只有一个线程能成功
    #[inline]
    pub(crate) fn try_transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state.load(Ordering::Relaxed) == from as u8
            && self
                .state
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
    }

    /// 访问槽内任务
    ///
    /// # Safety
    /// 调用方必须通过 CAS 持有该槽的 `Allocated` 或 `Running` 状态.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn task_mut(&self) -> &mut Option<Task<P>> {
        // SAFETY: 由调用方保证独占.
        unsafe { &mut *self.task.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: usize, _: &()) -> bool {
        true
    }

    #[test]
    fn test_slot_index_wraps() {
        let idx = SlotIndex::new(2);
        assert_eq!(idx.wrapping_next(3), SlotIndex::new(0));
        assert_eq!(SlotIndex::new(0).wrapping_next(3), SlotIndex::new(1));
        assert_eq!(SlotIndex::INVALID.wrapping_next(3), SlotIndex::new(0));
        assert_eq!(SlotIndex::INVALID.get(), None);
    }

    #[test]
    fn test_barrier_list_tracks_blocked() {
        let a = Arc::new(Barrier::new());
        let b = Arc::new(Barrier::new_open());
        let task = Task::new(noop, ()).with_barriers([Arc::clone(&a), b]);
        assert_eq!(task.barriers.len(), 2);
        assert!(task.barriers.any_blocked());
        a.open();
        assert!(!task.barriers.any_blocked());
    }

    #[test]
    #[should_panic(expected = "闸门数超过上限")]
    fn test_barrier_list_overflow_is_a_defect() {
        let mut list = BarrierList::default();
        for _ in 0..=MAX_TASK_BARRIERS {
            list.push(Arc::new(Barrier::new()));
        }
    }

    #[test]
    fn test_slot_cas_has_single_winner() {
        let slot = TaskSlot::<()>::default();
        slot.set_state(SlotState::Waiting);
        assert!(slot.try_transition(SlotState::Waiting, SlotState::Running));
        assert!(!slot.try_transition(SlotState::Waiting, SlotState::Running));
        assert_eq!(slot.state(), SlotState::Running);
    }
}
