//! 解码图像.
//!
//! [`Picture`] 由解析阶段创建, 以 `Arc` 在图像列表、重建任务和调用方之间共享.
//! 生命周期标志都是原子量: 重建任务在工作线程上置位, 编排器在收尾点读取.
//! 参考列表在创建时确定, 收尾后释放, 避免参考链把历史图像一直留在内存中.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::Duration;

use liu_sched::Barrier;

use crate::kernels::SampleKernels;
use crate::nal::NalUnitType;
use crate::syntax::{SeqParams, SliceType};

// ============================================================
// 样本存储
// ============================================================

/// 按 CTU 划分的样本存储
///
/// 每个 CTU 有预测块和重建块两份, 各自只写一次:
/// 预测块写入后供同一图像的相邻 CTU 读取, 重建块写入后供后续图像参考.
pub struct PictureBuffer {
    width_ctus: u32,
    height_ctus: u32,
    ctu_size: u32,
    bit_depth: u8,
    pred: Box<[OnceLock<Box<[u16]>>]>,
    recon: Box<[OnceLock<Box<[u16]>>]>,
}

impl PictureBuffer {
    /// 按序列参数创建空存储
    pub fn new(seq: &SeqParams) -> Self {
        let blocks = seq.num_ctus();
        Self {
            width_ctus: seq.width_ctus,
            height_ctus: seq.height_ctus,
            ctu_size: seq.ctu_size,
            bit_depth: seq.bit_depth,
            pred: (0..blocks).map(|_| OnceLock::new()).collect(),
            recon: (0..blocks).map(|_| OnceLock::new()).collect(),
        }
    }

    /// 水平 CTU 个数
    pub fn width_ctus(&self) -> u32 {
        self.width_ctus
    }

    /// 垂直 CTU 个数
    pub fn height_ctus(&self) -> u32 {
        self.height_ctus
    }

    /// CTU 边长
    pub fn ctu_size(&self) -> u32 {
        self.ctu_size
    }

    /// 样本位深
    pub fn bit_depth(&self) -> u8 {
        self.bit_depth
    }

    /// CTU 总数
    pub fn num_ctus(&self) -> usize {
        self.pred.len()
    }

    /// 每个 CTU 的样本数
    pub fn ctu_samples(&self) -> usize {
        (self.ctu_size * self.ctu_size) as usize
    }

    /// 预测块 (尚未写入时为 `None`)
    pub fn pred_block(&self, ctu: usize) -> Option<&[u16]> {
        self.pred.get(ctu)?.get().map(|block| &**block)
    }

    /// 重建块 (尚未写入时为 `None`)
    pub fn recon_block(&self, ctu: usize) -> Option<&[u16]> {
        self.recon.get(ctu)?.get().map(|block| &**block)
    }

    /// 写入预测块, 重复写入属于结构性错误
    pub fn set_pred_block(&self, ctu: usize, block: Box<[u16]>) {
        assert!(self.pred[ctu].set(block).is_ok(), "CTU {ctu} 的预测块被重复写入");
    }

    /// 写入重建块, 重复写入属于结构性错误
    pub fn set_recon_block(&self, ctu: usize, block: Box<[u16]>) {
        assert!(self.recon[ctu].set(block).is_ok(), "CTU {ctu} 的重建块被重复写入");
    }

    /// 所有重建块是否都已写入
    pub fn is_complete(&self) -> bool {
        self.recon.iter().all(|block| block.get().is_some())
    }

    /// 拼出光栅顺序的重建平面, 未写入的块按 0 处理
    pub fn to_plane(&self) -> Vec<u16> {
        let size = self.ctu_size as usize;
        let width = self.width_ctus as usize * size;
        let height = self.height_ctus as usize * size;
        let mut plane = vec![0u16; width * height];
        for ctu in 0..self.num_ctus() {
            let Some(block) = self.recon_block(ctu) else {
                continue;
            };
            let x0 = (ctu % self.width_ctus as usize) * size;
            let y0 = (ctu / self.width_ctus as usize) * size;
            for (row, src) in block.chunks(size).enumerate() {
                let start = (y0 + row) * width + x0;
                plane[start..start + size].copy_from_slice(src);
            }
        }
        plane
    }

    /// 重建平面的校验和
    pub fn checksum(&self, kernels: &dyn SampleKernels) -> u32 {
        let width = (self.width_ctus * self.ctu_size) as usize;
        kernels.checksum(&self.to_plane(), width, self.bit_depth)
    }
}

// ============================================================
// 图像
// ============================================================

/// 创建图像所需的标识与图像头信息
#[derive(Debug, Clone)]
pub struct PictureDesc {
    /// 图像顺序号
    pub poc: i32,
    /// 层 id
    pub layer_id: u8,
    /// 时域子层 id
    pub temporal_id: u8,
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// 条带类型
    pub slice_type: SliceType,
    /// 条带 QP
    pub qp: i32,
    /// 残差种子
    pub residual_seed: u32,
    /// 码流携带的校验和
    pub picture_hash: Option<u32>,
    /// 所属编码层视频序列 (CLVS) 序号
    pub clvs: u32,
    /// 解码顺序号
    pub decode_index: u64,
}

/// 一幅编码图像
pub struct Picture {
    desc: PictureDesc,
    seq: Arc<SeqParams>,
    ref_pocs: [Vec<i32>; 2],
    refs: Mutex<[Vec<Arc<Picture>>; 2]>,

    parsed: AtomicBool,
    reconstructed: AtomicBool,
    referenced: AtomicBool,
    dpb_reference_mark: AtomicBool,
    needed_for_output: AtomicBool,
    long_term: AtomicBool,
    was_lost: AtomicBool,
    finished: AtomicBool,

    /// 重建完成闸门, 打开之前的样本写入对所有观察者可见
    pub done: Arc<Barrier>,
    processing_time_us: AtomicU64,
    /// 样本存储
    pub buffer: PictureBuffer,
}

impl Picture {
    /// 创建图像, 由解析阶段在参考列表解析完成后标记为已解析
    ///
    /// 新图像是参考图像 (`referenced` 与 `dpb_reference_mark` 置位),
    /// 之后由参考图像集标记和收尾时的参考标记更新.
    pub fn new(
        desc: PictureDesc,
        seq: Arc<SeqParams>,
        refs: [Vec<Arc<Picture>>; 2],
        needed_for_output: bool,
    ) -> Self {
        let ref_pocs = [
            refs[0].iter().map(|p| p.poc()).collect(),
            refs[1].iter().map(|p| p.poc()).collect(),
        ];
        let buffer = PictureBuffer::new(&seq);
        Self {
            desc,
            seq,
            ref_pocs,
            refs: Mutex::new(refs),
            parsed: AtomicBool::new(false),
            reconstructed: AtomicBool::new(false),
            referenced: AtomicBool::new(true),
            dpb_reference_mark: AtomicBool::new(true),
            needed_for_output: AtomicBool::new(needed_for_output),
            long_term: AtomicBool::new(false),
            was_lost: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            done: Arc::new(Barrier::new()),
            processing_time_us: AtomicU64::new(0),
            buffer,
        }
    }

    /// 创建丢失图像的占位
    ///
    /// 占位图像不输出, 由 [`crate::ParseStage::recreate_lost_picture`] 填充样本.
    /// 样本来源记在 L0 中, 收尾之前一直持有它.
    pub fn lost(desc: PictureDesc, seq: Arc<SeqParams>, source: Option<Arc<Picture>>) -> Self {
        let pic = Self::new(desc, seq, [source.into_iter().collect(), Vec::new()], false);
        pic.was_lost.store(true, Ordering::Release);
        pic
    }

    /// 图像顺序号
    pub fn poc(&self) -> i32 {
        self.desc.poc
    }

    /// 层 id
    pub fn layer_id(&self) -> u8 {
        self.desc.layer_id
    }

    /// 时域子层 id
    pub fn temporal_id(&self) -> u8 {
        self.desc.temporal_id
    }

    /// NAL 类型
    pub fn nal_type(&self) -> NalUnitType {
        self.desc.nal_type
    }

    /// 条带类型
    pub fn slice_type(&self) -> SliceType {
        self.desc.slice_type
    }

    /// 条带 QP
    pub fn qp(&self) -> i32 {
        self.desc.qp
    }

    /// 残差种子
    pub fn residual_seed(&self) -> u32 {
        self.desc.residual_seed
    }

    /// 码流携带的校验和
    pub fn picture_hash(&self) -> Option<u32> {
        self.desc.picture_hash
    }

    /// 所属 CLVS 序号
    pub fn clvs(&self) -> u32 {
        self.desc.clvs
    }

    /// 解码顺序号
    pub fn decode_index(&self) -> u64 {
        self.desc.decode_index
    }

    /// 输出顺序键: 先按 CLVS, 再按 POC
    pub fn output_key(&self) -> (u32, i32) {
        (self.desc.clvs, self.desc.poc)
    }

    /// 序列参数
    pub fn seq(&self) -> &Arc<SeqParams> {
        &self.seq
    }

    /// 参考列表中的 POC (收尾后仍可用)
    pub fn ref_pocs(&self, list: usize) -> &[i32] {
        &self.ref_pocs[list]
    }

    /// 参考列表的快照 (收尾后为空)
    pub fn references(&self) -> [Vec<Arc<Picture>>; 2] {
        self.refs.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 是否直接参考 `other`
    pub fn refers_to(&self, other: &Picture) -> bool {
        let refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        refs.iter()
            .flatten()
            .any(|r| std::ptr::eq(Arc::as_ptr(r), other))
    }

    /// 释放对参考图像的持有
    pub fn release_references(&self) {
        let mut refs = self.refs.lock().unwrap_or_else(PoisonError::into_inner);
        refs[0].clear();
        refs[1].clear();
    }

    /// 是否已解析; 丢失占位在填充样本后才算解析完成
    pub fn is_parsed(&self) -> bool {
        self.parsed.load(Ordering::Acquire)
    }

    /// 标记已解析
    pub fn mark_parsed(&self) {
        self.parsed.store(true, Ordering::Release);
    }

    /// 是否已重建
    pub fn is_reconstructed(&self) -> bool {
        self.reconstructed.load(Ordering::Acquire)
    }

    /// 标记已重建, 重复标记属于结构性错误
    pub fn mark_reconstructed(&self) {
        let was = self.reconstructed.swap(true, Ordering::AcqRel);
        assert!(!was, "POC {} 被重建了两次", self.poc());
    }

    /// 是否仍被参考
    pub fn is_referenced(&self) -> bool {
        self.referenced.load(Ordering::Acquire)
    }

    /// 设置参考状态
    pub fn set_referenced(&self, referenced: bool) {
        self.referenced.store(referenced, Ordering::Release);
    }

    /// 解析时的参考图像集标记
    pub fn dpb_reference_mark(&self) -> bool {
        self.dpb_reference_mark.load(Ordering::Acquire)
    }

    /// 设置参考图像集标记
    pub fn set_dpb_reference_mark(&self, mark: bool) {
        self.dpb_reference_mark.store(mark, Ordering::Release);
    }

    /// 是否等待输出
    pub fn is_needed_for_output(&self) -> bool {
        self.needed_for_output.load(Ordering::Acquire)
    }

    /// 设置输出状态
    pub fn set_needed_for_output(&self, needed: bool) {
        self.needed_for_output.store(needed, Ordering::Release);
    }

    /// 是否为长期参考
    pub fn is_long_term(&self) -> bool {
        self.long_term.load(Ordering::Acquire)
    }

    /// 设置长期参考状态
    pub fn set_long_term(&self, long_term: bool) {
        self.long_term.store(long_term, Ordering::Release);
    }

    /// 是否为丢失图像的占位
    pub fn was_lost(&self) -> bool {
        self.was_lost.load(Ordering::Acquire)
    }

    /// 是否已完成收尾
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// 标记已完成收尾
    pub fn mark_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }

    /// 重建耗时
    pub fn processing_time(&self) -> Duration {
        Duration::from_micros(self.processing_time_us.load(Ordering::Relaxed))
    }

    /// 记录重建耗时
    pub fn set_processing_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_time_us.store(micros, Ordering::Relaxed);
    }

    /// 重建平面的校验和
    pub fn checksum(&self, kernels: &dyn SampleKernels) -> u32 {
        self.buffer.checksum(kernels)
    }

    /// 收尾日志行
    pub fn log_line(&self) -> String {
        if self.was_lost() {
            return format!("POC {:4} TId: {:1} LOST", self.poc(), self.temporal_id());
        }
        let mut letter = self.slice_type().letter();
        if !self.is_referenced() {
            letter = letter.to_ascii_lowercase();
        }
        let mut line = format!(
            "POC {:4} LId: {:2} TId: {:1} ( {}-SLICE, QP{:3}{} ) [DT {:6.3}] ",
            self.poc(),
            self.layer_id(),
            self.temporal_id(),
            letter,
            self.qp(),
            if self.is_long_term() { " [LT]" } else { "     " },
            self.processing_time().as_secs_f64(),
        );
        for (list, pocs) in self.ref_pocs.iter().enumerate() {
            line.push_str(&format!("[L{list} "));
            for poc in pocs {
                line.push_str(&format!("{poc} "));
            }
            line.push_str("] ");
        }
        line.trim_end().to_string()
    }
}

impl fmt::Debug for Picture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Picture")
            .field("poc", &self.poc())
            .field("clvs", &self.clvs())
            .field("tid", &self.temporal_id())
            .field("nal_type", &self.nal_type())
            .field("reconstructed", &self.is_reconstructed())
            .field("referenced", &self.is_referenced())
            .field("needed_for_output", &self.is_needed_for_output())
            .field("was_lost", &self.was_lost())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kernels::ScalarKernels;

    pub(crate) fn test_seq() -> Arc<SeqParams> {
        Arc::new(SeqParams {
            width_ctus: 2,
            height_ctus: 2,
            ctu_size: 2,
            bit_depth: 8,
            max_sub_layers: 1,
            num_reorder_pics: [0; 7],
            max_dec_pic_buffering: [4; 7],
        })
    }

    pub(crate) fn desc(poc: i32, decode_index: u64) -> PictureDesc {
        PictureDesc {
            poc,
            layer_id: 0,
            temporal_id: 0,
            nal_type: NalUnitType::Trail,
            slice_type: SliceType::P,
            qp: 32,
            residual_seed: 0,
            picture_hash: None,
            clvs: 0,
            decode_index,
        }
    }

    #[test]
    fn test_new_picture_flags() {
        let pic = Picture::new(desc(4, 0), test_seq(), [Vec::new(), Vec::new()], true);
        assert!(!pic.is_parsed());
        pic.mark_parsed();
        assert!(pic.is_parsed());
        assert!(pic.is_referenced());
        assert!(pic.dpb_reference_mark());
        assert!(pic.is_needed_for_output());
        assert!(!pic.is_reconstructed());
        assert!(pic.done.is_blocked());

        let lost = Picture::lost(desc(3, 1), test_seq(), None);
        assert!(lost.was_lost());
        assert!(!lost.is_parsed());
        assert!(!lost.is_needed_for_output(), "丢失占位不输出");
    }

    #[test]
    #[should_panic(expected = "被重建了两次")]
    fn test_double_reconstruct_is_a_defect() {
        let pic = Picture::new(desc(0, 0), test_seq(), [Vec::new(), Vec::new()], true);
        pic.mark_reconstructed();
        pic.mark_reconstructed();
    }

    #[test]
    fn test_references_are_released() {
        let base = Arc::new(Picture::new(desc(0, 0), test_seq(), [Vec::new(), Vec::new()], true));
        let pic = Picture::new(
            desc(1, 1),
            test_seq(),
            [vec![Arc::clone(&base)], Vec::new()],
            true,
        );
        assert!(pic.refers_to(&base));
        assert_eq!(Arc::strong_count(&base), 2);
        pic.release_references();
        assert!(!pic.refers_to(&base));
        assert_eq!(Arc::strong_count(&base), 1, "收尾后不应继续持有参考图像");
        assert_eq!(pic.ref_pocs(0), &[0], "参考 POC 在释放后仍可用于日志");
    }

    #[test]
    fn test_plane_assembly_and_checksum() {
        let pic = Picture::new(desc(0, 0), test_seq(), [Vec::new(), Vec::new()], true);
        for ctu in 0..4 {
            pic.buffer
                .set_recon_block(ctu, vec![ctu as u16; 4].into_boxed_slice());
        }
        assert!(pic.buffer.is_complete());
        let plane = pic.buffer.to_plane();
        assert_eq!(plane, vec![0, 0, 1, 1, 0, 0, 1, 1, 2, 2, 3, 3, 2, 2, 3, 3]);
        assert_eq!(pic.checksum(&ScalarKernels), ScalarKernels.checksum(&plane, 4, 8));
    }

    #[test]
    fn test_log_line_lowercases_non_reference() {
        let pic = Picture::new(desc(8, 0), test_seq(), [Vec::new(), Vec::new()], true);
        assert!(pic.log_line().contains("P-SLICE"));
        pic.set_referenced(false);
        let line = pic.log_line();
        assert!(line.starts_with("POC    8 LId:  0 TId: 0 ( p-SLICE, QP 32      )"), "{line}");
        assert!(line.ends_with("[L0 ] [L1 ]"), "{line}");

        let lost = Picture::lost(desc(5, 1), test_seq(), None);
        assert_eq!(lost.log_line(), "POC    5 TId: 0 LOST");
    }
}
