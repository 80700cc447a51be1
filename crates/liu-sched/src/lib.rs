//! # liu-sched
//!
//! 依赖驱动的无分配任务调度器.
//!
//! - [`Barrier`]: 一次性完成闸门, 任务声明依赖的前置工作
//! - [`WaitCounter`]: 完成计数器, 生产者等待 N 个任务而无需逐个轮询
//! - [`Task`]: 任务描述 (工作函数、参数、闸门、就绪检查、完成信号)
//! - [`ThreadPool`]: 定长槽环加工作线程组, 调度时不分配内存

pub mod barrier;
pub mod counter;
pub mod pool;
pub mod slot;

pub use barrier::Barrier;
pub use counter::WaitCounter;
pub use pool::{PoolOptions, ThreadPool};
pub use slot::{MAX_TASK_BARRIERS, SlotIndex, SlotState, Task, TaskFn};
