//! 解析阶段.
//!
//! 在 [`SyntaxReader`] 之上完成流水线需要的解析侧簿记:
//! - 为每幅图像分配 [`Picture`] 并加入图像列表
//! - 按解码顺序应用参考图像集 (RPS) 标记
//! - 发现缺失的参考图像时在引用它的图像之前插入丢失占位
//! - 维护解析超前队列, 队列长度超过解析延迟时交出最早的图像
//! - 跟踪 CLVS 边界, 跳过以 CRA 开始的 CLVS 中的 RASL 图像

use std::collections::VecDeque;
use std::sync::Arc;

use log::{debug, info, warn};

use crate::kernels::SampleKernels;
use crate::nal::{NalUnitHeader, NalUnitType};
use crate::pic_list::PicListManager;
use crate::picture::{Picture, PictureDesc};
use crate::syntax::{PictureHeader, SeqParams, SliceType, SyntaxReader, UnitSyntax};
use crate::unit::DecodeUnit;

/// 解析阶段
pub struct ParseStage {
    reader: Box<dyn SyntaxReader>,
    kernels: &'static dyn SampleKernels,
    parse_delay: usize,
    seq: Option<Arc<SeqParams>>,
    queue: VecDeque<Arc<Picture>>,
    clvs: u32,
    next_clvs: u32,
    new_clvs_pending: bool,
    skip_rasl: bool,
    parsed_new_picture: bool,
    decode_counter: u64,
}

impl ParseStage {
    /// 创建解析阶段
    pub fn new(
        reader: Box<dyn SyntaxReader>,
        kernels: &'static dyn SampleKernels,
        parse_delay: usize,
    ) -> Self {
        Self {
            reader,
            kernels,
            parse_delay,
            seq: None,
            queue: VecDeque::with_capacity(parse_delay + 1),
            clvs: 0,
            next_clvs: 0,
            new_clvs_pending: true,
            skip_rasl: false,
            parsed_new_picture: false,
            decode_counter: 0,
        }
    }

    /// 当前序列参数
    pub fn seq_params(&self) -> Option<&Arc<SeqParams>> {
        self.seq.as_ref()
    }

    /// 上一个单元是否完成了一幅新图像
    pub fn parsed_new_picture(&self) -> bool {
        self.parsed_new_picture
    }

    /// 超前队列中的图像数
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// 解析一个单元
    ///
    /// 返回超出解析延迟、需要开始重建的图像. 损坏的单元记录警告后丢弃.
    pub fn parse_unit(
        &mut self,
        header: &NalUnitHeader,
        unit: &DecodeUnit,
        pic_list: &mut PicListManager,
    ) -> Option<Arc<Picture>> {
        self.parsed_new_picture = false;

        let syntax = match self.reader.read_unit(header, &unit.payload()) {
            Ok(syntax) => syntax,
            Err(err) => {
                warn!("{} 单元解析失败 (偏移 {}), 已丢弃: {err}", header.nal_type.name(), unit.pos);
                return None;
            }
        };

        match syntax {
            UnitSyntax::SequenceParams(seq) => {
                if self.seq.as_deref() != Some(&seq) {
                    debug!(
                        "序列参数: {}x{} CTU, CTU {} 样本, {} 比特, {} 个子层",
                        seq.width_ctus,
                        seq.height_ctus,
                        seq.ctu_size,
                        seq.bit_depth,
                        seq.max_sub_layers
                    );
                    pic_list.set_seq_params(&seq);
                    self.seq = Some(Arc::new(seq));
                }
                None
            }
            UnitSyntax::EndOfSequence => {
                self.new_clvs_pending = true;
                None
            }
            UnitSyntax::Other => None,
            UnitSyntax::Picture(ph) => {
                self.start_picture(header, ph, pic_list);
                self.pop_if_delay_exceeded()
            }
        }
    }

    /// 取出超前队列中最早的图像 (刷新和丢失图像处理时使用)
    pub fn next_parsed_picture(&mut self) -> Option<Arc<Picture>> {
        self.queue.pop_front()
    }

    /// 丢失占位的样本来源 (创建占位时已选定)
    pub fn lost_picture_source(&self, lost: &Picture) -> Option<Arc<Picture>> {
        lost.references()[0].first().cloned()
    }

    /// 重建丢失图像: 复制来源图像的样本, 没有来源时填充中间灰
    ///
    /// 来源图像必须已经完成重建.
    pub fn recreate_lost_picture(&self, lost: &Picture, source: Option<&Picture>) {
        assert!(lost.was_lost(), "POC {} 不是丢失占位", lost.poc());
        let buffer = &lost.buffer;
        let mid = 1u16 << (buffer.bit_depth() - 1);
        for ctu in 0..buffer.num_ctus() {
            let mut block = vec![0u16; buffer.ctu_samples()].into_boxed_slice();
            match source.and_then(|src| src.buffer.recon_block(ctu)) {
                Some(src) => self.kernels.copy_block(&mut block, src),
                None => self.kernels.fill_block(&mut block, mid),
            }
            buffer.set_recon_block(ctu, block);
        }
        lost.mark_parsed();
        lost.mark_reconstructed();
        lost.done.open();
    }

    /// 重置解析状态 (刷新结束后调用)
    pub fn reset(&mut self) {
        self.queue.clear();
        self.new_clvs_pending = true;
        self.skip_rasl = false;
        self.parsed_new_picture = false;
        self.reader.reset();
    }

    fn pop_if_delay_exceeded(&mut self) -> Option<Arc<Picture>> {
        if self.queue.len() > self.parse_delay {
            self.queue.pop_front()
        } else {
            None
        }
    }

    fn next_decode_index(&mut self) -> u64 {
        let index = self.decode_counter;
        self.decode_counter += 1;
        index
    }

    fn start_picture(
        &mut self,
        header: &NalUnitHeader,
        ph: PictureHeader,
        pic_list: &mut PicListManager,
    ) {
        let Some(seq) = self.seq.clone() else {
            warn!("POC {} 之前没有序列参数, 已丢弃", ph.poc);
            return;
        };
        let nal_type = header.nal_type;

        if self.new_clvs_pending && !nal_type.is_irap() && nal_type != NalUnitType::Gdr {
            warn!("POC {} ({}) 之前没有随机接入点, 已丢弃", ph.poc, nal_type.name());
            return;
        }
        if nal_type == NalUnitType::Rasl && self.skip_rasl {
            debug!("跳过 RASL 图像 POC {}", ph.poc);
            return;
        }

        if nal_type.is_idr() || self.new_clvs_pending {
            self.clvs = self.next_clvs;
            self.next_clvs += 1;
            self.skip_rasl = nal_type == NalUnitType::Cra && self.new_clvs_pending;
            self.new_clvs_pending = false;
            pic_list.clear_reference_marks();
            info!("CLVS {} 开始于 POC {} ({})", self.clvs, ph.poc, nal_type.name());
        } else if nal_type.is_irap() {
            self.skip_rasl = false;
        }

        self.apply_rps(header, &ph, pic_list);

        let mut refs: [Vec<Arc<Picture>>; 2] = [Vec::new(), Vec::new()];
        for (list, entries) in ph.ref_lists.iter().enumerate() {
            for entry in entries {
                let pic = match pic_list.find_reference(self.clvs, header.layer_id, entry.poc) {
                    Some(pic) => Arc::clone(pic),
                    None => self.insert_lost_picture(header, entry.poc, &seq, pic_list),
                };
                if entry.long_term {
                    pic.set_long_term(true);
                }
                refs[list].push(pic);
            }
        }

        let desc = PictureDesc {
            poc: ph.poc,
            layer_id: header.layer_id,
            temporal_id: header.temporal_id,
            nal_type,
            slice_type: ph.slice_type,
            qp: ph.qp,
            residual_seed: ph.residual_seed,
            picture_hash: ph.picture_hash,
            clvs: self.clvs,
            decode_index: self.next_decode_index(),
        };
        let pic = Arc::new(Picture::new(desc, seq, refs, ph.output_flag));
        pic.mark_parsed();
        pic_list.insert(Arc::clone(&pic));
        self.queue.push_back(pic);
        self.parsed_new_picture = true;
    }

    /// 只保留参考图像集列出的和本图像直接参考的图像
    fn apply_rps(&self, header: &NalUnitHeader, ph: &PictureHeader, pic_list: &PicListManager) {
        for pic in pic_list.iter() {
            if !pic.dpb_reference_mark() || pic.layer_id() != header.layer_id {
                continue;
            }
            let keep = pic.clvs() == self.clvs
                && (ph.rps.contains(&pic.poc())
                    || ph.ref_lists.iter().flatten().any(|e| e.poc == pic.poc()));
            if !keep {
                pic.set_dpb_reference_mark(false);
            }
        }
    }

    fn insert_lost_picture(
        &mut self,
        header: &NalUnitHeader,
        poc: i32,
        seq: &Arc<SeqParams>,
        pic_list: &mut PicListManager,
    ) -> Arc<Picture> {
        warn!("参考图像 POC {poc} 缺失, 插入丢失占位");
        // 来源: 同一 CLVS 中仍被参考图像集标记、POC 最近的图像, 距离相同时取较小 POC
        let source = pic_list
            .iter()
            .filter(|p| {
                p.clvs() == self.clvs
                    && p.layer_id() == header.layer_id
                    && p.dpb_reference_mark()
            })
            .min_by_key(|p| ((p.poc() - poc).unsigned_abs(), p.poc()))
            .cloned();
        let desc = PictureDesc {
            poc,
            layer_id: header.layer_id,
            temporal_id: 0,
            nal_type: NalUnitType::Trail,
            slice_type: SliceType::P,
            qp: 0,
            residual_seed: 0,
            picture_hash: None,
            clvs: self.clvs,
            decode_index: self.next_decode_index(),
        };
        let lost = Arc::new(Picture::lost(desc, Arc::clone(seq), source));
        pic_list.insert(Arc::clone(&lost));
        self.queue.push_back(Arc::clone(&lost));
        lost
    }
}
