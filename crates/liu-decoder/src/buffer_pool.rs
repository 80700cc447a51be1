//! 可复用缓冲池.
//!
//! 每次借出得到一个独占句柄 [`Pooled`], 句柄离开作用域时缓冲自动归还.
//! 池中只保存当前没有被借出的缓冲, 因此借出操作不会与持有者冲突.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

struct PoolInner<T> {
    free: Mutex<Vec<T>>,
    max_cached: usize,
    allocated: AtomicUsize,
}

impl<T> PoolInner<T> {
    fn give_back(&self, item: T) {
        let mut free = self.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < self.max_cached {
            free.push(item);
        }
    }
}

/// 缓冲池
pub struct BufferPool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for BufferPool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> BufferPool<T> {
    /// 创建缓冲池, 最多缓存 `max_cached` 个空闲缓冲
    pub fn new(max_cached: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(Vec::with_capacity(max_cached)),
                max_cached,
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    /// 借出一个缓冲
    ///
    /// 有空闲缓冲时先用 `reuse` 检查并重置它, 返回 `false` 的缓冲被丢弃;
    /// 没有可用缓冲时用 `create` 新建.
    pub fn checkout_with(
        &self,
        create: impl FnOnce() -> T,
        mut reuse: impl FnMut(&mut T) -> bool,
    ) -> Pooled<T> {
        let recycled = {
            let mut free = self.inner.free.lock().unwrap_or_else(PoisonError::into_inner);
            let mut found = None;
            while let Some(mut item) = free.pop() {
                if reuse(&mut item) {
                    found = Some(item);
                    break;
                }
            }
            found
        };
        let item = recycled.unwrap_or_else(|| {
            self.inner.allocated.fetch_add(1, Ordering::Relaxed);
            create()
        });
        Pooled {
            item: Some(item),
            pool: Arc::clone(&self.inner),
        }
    }

    /// 当前空闲的缓冲个数
    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// 累计新建的缓冲个数
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

/// 借出的独占缓冲, 析构时归还
pub struct Pooled<T> {
    item: Option<T>,
    pool: Arc<PoolInner<T>>,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.item {
            Some(item) => item,
            None => unreachable!("缓冲已归还"),
        }
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.item {
            Some(item) => item,
            None => unreachable!("缓冲已归还"),
        }
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.give_back(item);
        }
    }
}

// ============================================================
// CTU 进度数组
// ============================================================

/// 每个 CTU 一个原子进度值
pub type CtuStates = Box<[AtomicU8]>;

/// CTU 进度数组池
pub type CtuStatePool = BufferPool<CtuStates>;

/// 借出长度为 `len`、全部清零的进度数组
pub fn checkout_ctu_states(pool: &CtuStatePool, len: usize) -> Pooled<CtuStates> {
    pool.checkout_with(
        || (0..len).map(|_| AtomicU8::new(0)).collect(),
        |states| {
            if states.len() != len {
                return false;
            }
            for state in states.iter() {
                state.store(0, Ordering::Relaxed);
            }
            true
        },
    )
}
