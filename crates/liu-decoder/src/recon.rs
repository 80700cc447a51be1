//! 图像重建任务图.
//!
//! 每幅图像提交三类任务:
//! 1. 开始任务: 闸门为所有参考图像的完成闸门, 完成后打开本图像的开始闸门
//! 2. 每个 CTU 一个任务: 等待开始闸门; 就绪检查实现波前依赖
//!    (左侧与右上 CTU 已预测), 先预测, 所有相邻 CTU 都预测后再做环路滤波
//! 3. 收尾任务: 就绪检查等待 CTU 完成计数归零, 标记已重建并打开图像完成闸门
//!
//! 像素运算由 [`Reconstructor`] 完成, 本模块只负责依赖关系.

use std::sync::atomic::Ordering;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use liu_core::{LiuError, LiuResult};
use liu_sched::{Barrier, Task, ThreadPool, WaitCounter};
use log::trace;

use crate::buffer_pool::{CtuStatePool, CtuStates, Pooled, checkout_ctu_states};
use crate::picture::Picture;
use crate::trace::{DecodeTrace, TraceEvent};

/// 重建协作者
///
/// 两个方法都可以返回 `false` 表示暂时无法完成, 调度器稍后重试.
pub trait Reconstructor: Send + Sync {
    /// 预测 CTU 并写入预测块
    ///
    /// 调用时左侧、上方和右上 CTU 的预测块已写入, 所有参考图像已重建完成.
    fn predict_ctu(
        &self,
        worker: usize,
        pic: &Picture,
        refs: &[Vec<Arc<Picture>>; 2],
        ctu: usize,
    ) -> bool;

    /// 对 CTU 做环路滤波并写入重建块
    ///
    /// 调用时上下左右相邻 CTU 的预测块都已写入.
    fn filter_ctu(&self, worker: usize, pic: &Picture, ctu: usize) -> bool;
}

const CTU_PENDING: u8 = 0;
const CTU_PREDICTED: u8 = 1;
const CTU_DONE: u8 = 2;

/// 一幅图像的重建上下文, 由该图像的所有任务共享
pub struct ReconContext {
    pic: Arc<Picture>,
    refs: [Vec<Arc<Picture>>; 2],
    reconstructor: Arc<dyn Reconstructor>,
    trace: Arc<dyn DecodeTrace>,
    ctu_states: Pooled<CtuStates>,
    ctu_counter: Arc<WaitCounter>,
    started_at: OnceLock<Instant>,
}

impl ReconContext {
    fn width(&self) -> usize {
        self.pic.buffer.width_ctus() as usize
    }

    fn height(&self) -> usize {
        self.pic.buffer.height_ctus() as usize
    }

    fn state(&self, ctu: usize) -> u8 {
        self.ctu_states[ctu].load(Ordering::Acquire)
    }

    fn is_predicted(&self, x: usize, y: usize) -> bool {
        self.state(y * self.width() + x) >= CTU_PREDICTED
    }

    /// 波前依赖: 左侧与右上 (最右列为正上方) 已预测
    fn wavefront_ready(&self, ctu: usize) -> bool {
        let (w, x, y) = (self.width(), ctu % self.width(), ctu / self.width());
        if x > 0 && !self.is_predicted(x - 1, y) {
            return false;
        }
        if y > 0 {
            let above_x = if x + 1 < w { x + 1 } else { x };
            if !self.is_predicted(above_x, y - 1) {
                return false;
            }
        }
        true
    }

    /// 滤波依赖: 上下左右都已预测
    fn neighbours_predicted(&self, ctu: usize) -> bool {
        let (w, h) = (self.width(), self.height());
        let (x, y) = (ctu % w, ctu / w);
        (x == 0 || self.is_predicted(x - 1, y))
            && (x + 1 == w || self.is_predicted(x + 1, y))
            && (y == 0 || self.is_predicted(x, y - 1))
            && (y + 1 == h || self.is_predicted(x, y + 1))
    }
}

/// 重建任务参数
pub struct ReconParam {
    ctx: Arc<ReconContext>,
    ctu: usize,
}

fn start_task(_worker: usize, param: &ReconParam) -> bool {
    let ctx = &param.ctx;
    assert!(
        ctx.refs.iter().flatten().all(|r| r.is_reconstructed()),
        "POC {} 的参考图像尚未重建完成就开始重建",
        ctx.pic.poc()
    );
    let _ = ctx.started_at.set(Instant::now());
    ctx.trace.on_event(TraceEvent::PictureStart { poc: ctx.pic.poc() });
    true
}

fn ctu_ready(_worker: usize, param: &ReconParam) -> bool {
    let ctx = &param.ctx;
    match ctx.state(param.ctu) {
        CTU_PENDING => ctx.wavefront_ready(param.ctu),
        CTU_PREDICTED => ctx.neighbours_predicted(param.ctu),
        _ => true,
    }
}

fn ctu_task(worker: usize, param: &ReconParam) -> bool {
    let ctx = &param.ctx;
    let ctu = param.ctu;
    if ctx.state(ctu) == CTU_PENDING {
        if !ctx.reconstructor.predict_ctu(worker, &ctx.pic, &ctx.refs, ctu) {
            return false;
        }
        ctx.ctu_states[ctu].store(CTU_PREDICTED, Ordering::Release);
    }
    if !ctx.neighbours_predicted(ctu) {
        return false;
    }
    if !ctx.reconstructor.filter_ctu(worker, &ctx.pic, ctu) {
        return false;
    }
    ctx.ctu_states[ctu].store(CTU_DONE, Ordering::Release);
    true
}

fn finish_ready(_worker: usize, param: &ReconParam) -> bool {
    param.ctx.ctu_counter.is_zero()
}

fn finish_task(_worker: usize, param: &ReconParam) -> bool {
    let ctx = &param.ctx;
    if let Some(started) = ctx.started_at.get() {
        ctx.pic.set_processing_time(started.elapsed());
    }
    ctx.pic.mark_reconstructed();
    ctx.trace.on_event(TraceEvent::PictureDone { poc: ctx.pic.poc() });
    true
}

/// 一幅图像提交的任务数: 开始任务, 每个 CTU 一个任务, 收尾任务
///
/// 波前与滤波依赖要求同一幅图像的任务能同时驻留在任务环中.
pub fn tasks_per_picture(num_ctus: usize) -> usize {
    num_ctus + 2
}

/// 等待图像重建完成
///
/// 没有工作线程时在调用线程上驱动任务环, 协作式重试的任务会被反复执行;
/// 剩余任务全部被闸门或就绪检查挡住而图像仍未完成时返回 [`LiuError::Stalled`].
pub fn wait_for_picture(pool: &ThreadPool<ReconParam>, pic: &Picture) -> LiuResult<()> {
    if pic.done.is_open() {
        return Ok(());
    }
    if pool.num_threads() > 0 {
        pic.done.wait();
        return Ok(());
    }
    pool.process_tasks_on_main_thread();
    if pic.done.is_blocked() {
        return Err(LiuError::Stalled(format!(
            "POC {} 的重建任务无法继续, 剩余任务 {}",
            pic.poc(),
            pool.pending_tasks()
        )));
    }
    Ok(())
}

/// 重建实例, 同一时刻只负责一幅图像
///
/// CTU 完成计数器和参考闸门列表在相继的图像之间复用.
pub struct ReconInstance {
    id: usize,
    current: Option<Arc<Picture>>,
    ctu_pool: CtuStatePool,
    ctu_counter: Arc<WaitCounter>,
    ref_barriers: Vec<Arc<Barrier>>,
}

impl ReconInstance {
    /// 创建实例
    pub fn new(id: usize, ctu_pool: CtuStatePool) -> Self {
        Self {
            id,
            current: None,
            ctu_pool,
            ctu_counter: Arc::new(WaitCounter::new()),
            ref_barriers: Vec::new(),
        }
    }

    /// 实例编号
    pub fn id(&self) -> usize {
        self.id
    }

    /// 正在重建的图像
    pub fn in_flight(&self) -> Option<&Arc<Picture>> {
        self.current.as_ref()
    }

    /// 等待上一幅图像重建完成并交还它
    pub fn wait_for_prev_decompressed_pic(
        &mut self,
        pool: &ThreadPool<ReconParam>,
        trace: &dyn DecodeTrace,
    ) -> LiuResult<Option<Arc<Picture>>> {
        let Some(pic) = self.current.as_ref() else {
            return Ok(None);
        };
        if pic.done.is_blocked() {
            trace.on_event(TraceEvent::WaitForTasks { poc: pic.poc() });
        }
        wait_for_picture(pool, pic)?;
        Ok(self.current.take())
    }

    /// 提交一幅图像的重建任务
    pub fn decompress_picture(
        &mut self,
        pool: &ThreadPool<ReconParam>,
        pic: Arc<Picture>,
        reconstructor: &Arc<dyn Reconstructor>,
        trace: &Arc<dyn DecodeTrace>,
    ) {
        assert!(self.current.is_none(), "重建实例 {} 仍有未完成的图像", self.id);
        assert!(pic.is_parsed(), "POC {} 尚未解析完成就提交重建", pic.poc());
        assert!(self.ctu_counter.is_zero(), "重建实例 {} 的 CTU 计数未归零", self.id);
        let num_ctus = pic.buffer.num_ctus();
        let refs = pic.references();

        self.ref_barriers.clear();
        for r in refs.iter().flatten() {
            if !self.ref_barriers.iter().any(|b| Arc::ptr_eq(b, &r.done)) {
                self.ref_barriers.push(Arc::clone(&r.done));
            }
        }

        let ctx = Arc::new(ReconContext {
            pic: Arc::clone(&pic),
            refs,
            reconstructor: Arc::clone(reconstructor),
            trace: Arc::clone(trace),
            ctu_states: checkout_ctu_states(&self.ctu_pool, num_ctus),
            ctu_counter: Arc::clone(&self.ctu_counter),
            started_at: OnceLock::new(),
        });
        let started = Arc::new(Barrier::new());

        trace.on_event(TraceEvent::SchedulingTasks {
            poc: pic.poc(),
            tasks: tasks_per_picture(num_ctus),
        });
        trace!(
            "实例 {} 提交 POC {}: {} 个 CTU, {} 个参考闸门",
            self.id,
            pic.poc(),
            num_ctus,
            self.ref_barriers.len()
        );

        pool.add_task(
            Task::new(
                start_task,
                ReconParam {
                    ctx: Arc::clone(&ctx),
                    ctu: 0,
                },
            )
            .with_barriers(self.ref_barriers.drain(..))
            .with_done(Arc::clone(&started)),
        );
        for ctu in 0..num_ctus {
            pool.add_task(
                Task::new(
                    ctu_task,
                    ReconParam {
                        ctx: Arc::clone(&ctx),
                        ctu,
                    },
                )
                .with_ready_check(ctu_ready)
                .with_barrier(Arc::clone(&started))
                .with_counter(Arc::clone(&ctx.ctu_counter)),
            );
        }
        pool.add_task(
            Task::new(finish_task, ReconParam { ctx, ctu: 0 })
                .with_ready_check(finish_ready)
                .with_barrier(started)
                .with_done(Arc::clone(&pic.done)),
        );

        self.current = Some(pic);
    }
}
