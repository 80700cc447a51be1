//! 合成协作者.
//!
//! 一套自洽的语法读取器、码流生成器和重建器, 供测试、基准和命令行使用.
//!
//! 载荷格式 (NAL 头之后, 大端):
//! - SPS: `u16 宽 (CTU)`, `u16 高 (CTU)`, `u8 CTU 边长`, `u8 位深`, `u8 子层数`,
//!   每个子层 `u8 重排序数`, `u8 缓冲大小`
//! - 条带: `i32 POC`, `u8 条带类型`, `i8 QP`, `u8 标志`, `u32 残差种子`,
//!   `u8 RPS 个数` + `i32` 列表, 两个参考列表各 `u8 个数` + (`i32 POC`, `u8 长期`),
//!   标志含哈希时末尾 `u32 图像哈希`
//!
//! 重建器只依赖写一次的预测块和参考图像的重建块, 任意线程数下结果逐位相同.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt};
use bytes::BufMut;
use liu_core::{LiuError, LiuResult};

use crate::kernels::SampleKernels;
use crate::nal::{NalUnitHeader, NalUnitType, write_annex_b};
use crate::picture::{Picture, PictureBuffer};
use crate::recon::Reconstructor;
use crate::syntax::{
    MAX_SUB_LAYERS, PictureHeader, RefEntry, SeqParams, SliceType, SyntaxReader, UnitSyntax,
};

const FLAG_OUTPUT: u8 = 0x01;
const FLAG_HASH: u8 = 0x02;

// ============================================================
// 载荷编解码
// ============================================================

fn truncated(err: io::Error) -> LiuError {
    LiuError::InvalidData(format!("合成载荷被截断: {err}"))
}

fn slice_type_code(slice_type: SliceType) -> u8 {
    match slice_type {
        SliceType::B => 0,
        SliceType::P => 1,
        SliceType::I => 2,
    }
}

fn slice_type_from_code(code: u8) -> LiuResult<SliceType> {
    match code {
        0 => Ok(SliceType::B),
        1 => Ok(SliceType::P),
        2 => Ok(SliceType::I),
        _ => Err(LiuError::InvalidData(format!("未知条带类型: {code}"))),
    }
}

/// 编码序列参数载荷
pub fn encode_seq_params(seq: &SeqParams) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_u16(seq.width_ctus as u16);
    out.put_u16(seq.height_ctus as u16);
    out.put_u8(seq.ctu_size as u8);
    out.put_u8(seq.bit_depth);
    out.put_u8(seq.max_sub_layers);
    for layer in 0..usize::from(seq.max_sub_layers) {
        out.put_u8(seq.num_reorder_pics[layer] as u8);
        out.put_u8(seq.max_dec_pic_buffering[layer] as u8);
    }
    out
}

fn read_seq_params(mut data: &[u8]) -> LiuResult<SeqParams> {
    let width_ctus = u32::from(data.read_u16::<BigEndian>().map_err(truncated)?);
    let height_ctus = u32::from(data.read_u16::<BigEndian>().map_err(truncated)?);
    let ctu_size = u32::from(data.read_u8().map_err(truncated)?);
    let bit_depth = data.read_u8().map_err(truncated)?;
    let max_sub_layers = data.read_u8().map_err(truncated)?;

    if width_ctus == 0 || height_ctus == 0 || ctu_size == 0 {
        return Err(LiuError::InvalidData("图像尺寸不能为 0".into()));
    }
    if !(8..=16).contains(&bit_depth) {
        return Err(LiuError::InvalidData(format!("不支持的位深: {bit_depth}")));
    }
    if max_sub_layers == 0 || usize::from(max_sub_layers) > MAX_SUB_LAYERS {
        return Err(LiuError::InvalidData(format!("子层数超出范围: {max_sub_layers}")));
    }

    let mut num_reorder_pics = [0u32; MAX_SUB_LAYERS];
    let mut max_dec_pic_buffering = [1u32; MAX_SUB_LAYERS];
    let layers = usize::from(max_sub_layers);
    for layer in 0..layers {
        num_reorder_pics[layer] = u32::from(data.read_u8().map_err(truncated)?);
        max_dec_pic_buffering[layer] = u32::from(data.read_u8().map_err(truncated)?);
    }
    for layer in layers..MAX_SUB_LAYERS {
        num_reorder_pics[layer] = num_reorder_pics[layers - 1];
        max_dec_pic_buffering[layer] = max_dec_pic_buffering[layers - 1];
    }

    Ok(SeqParams {
        width_ctus,
        height_ctus,
        ctu_size,
        bit_depth,
        max_sub_layers,
        num_reorder_pics,
        max_dec_pic_buffering,
    })
}

/// 编码图像头载荷
pub fn encode_picture_header(ph: &PictureHeader) -> Vec<u8> {
    let mut out = Vec::new();
    out.put_i32(ph.poc);
    out.put_u8(slice_type_code(ph.slice_type));
    out.put_i8(ph.qp as i8);
    let mut flags = 0;
    if ph.output_flag {
        flags |= FLAG_OUTPUT;
    }
    if ph.picture_hash.is_some() {
        flags |= FLAG_HASH;
    }
    out.put_u8(flags);
    out.put_u32(ph.residual_seed);
    out.put_u8(ph.rps.len() as u8);
    for &poc in &ph.rps {
        out.put_i32(poc);
    }
    for list in &ph.ref_lists {
        out.put_u8(list.len() as u8);
        for entry in list {
            out.put_i32(entry.poc);
            out.put_u8(u8::from(entry.long_term));
        }
    }
    if let Some(hash) = ph.picture_hash {
        out.put_u32(hash);
    }
    out
}

fn read_picture_header(mut data: &[u8]) -> LiuResult<PictureHeader> {
    let poc = data.read_i32::<BigEndian>().map_err(truncated)?;
    let slice_type = slice_type_from_code(data.read_u8().map_err(truncated)?)?;
    let qp = i32::from(data.read_i8().map_err(truncated)?);
    let flags = data.read_u8().map_err(truncated)?;
    let residual_seed = data.read_u32::<BigEndian>().map_err(truncated)?;

    let rps_len = data.read_u8().map_err(truncated)?;
    let mut rps = Vec::with_capacity(usize::from(rps_len));
    for _ in 0..rps_len {
        rps.push(data.read_i32::<BigEndian>().map_err(truncated)?);
    }

    let mut ref_lists: [Vec<RefEntry>; 2] = [Vec::new(), Vec::new()];
    for list in &mut ref_lists {
        let count = data.read_u8().map_err(truncated)?;
        for _ in 0..count {
            let poc = data.read_i32::<BigEndian>().map_err(truncated)?;
            let long_term = data.read_u8().map_err(truncated)? != 0;
            list.push(RefEntry { poc, long_term });
        }
    }
    if slice_type != SliceType::I && ref_lists[0].is_empty() {
        return Err(LiuError::InvalidData(format!("POC {poc} 的 L0 为空")));
    }

    let picture_hash = if flags & FLAG_HASH != 0 {
        Some(data.read_u32::<BigEndian>().map_err(truncated)?)
    } else {
        None
    };

    Ok(PictureHeader {
        poc,
        slice_type,
        qp,
        output_flag: flags & FLAG_OUTPUT != 0,
        rps,
        ref_lists,
        residual_seed,
        picture_hash,
    })
}

// ============================================================
// 语法读取器
// ============================================================

/// 合成语法读取器
#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticReader;

impl SyntheticReader {
    /// 创建读取器
    pub fn new() -> Self {
        Self
    }
}

impl SyntaxReader for SyntheticReader {
    fn read_unit(&mut self, header: &NalUnitHeader, payload: &[u8]) -> LiuResult<UnitSyntax> {
        match header.nal_type {
            NalUnitType::Sps => read_seq_params(payload).map(UnitSyntax::SequenceParams),
            NalUnitType::Eos => Ok(UnitSyntax::EndOfSequence),
            nal_type if nal_type.is_slice() => {
                read_picture_header(payload).map(UnitSyntax::Picture)
            }
            _ => Ok(UnitSyntax::Other),
        }
    }
}

// ============================================================
// 码流生成
// ============================================================

/// 解码顺序中的一幅编码图像
#[derive(Debug, Clone)]
struct CodedPicture {
    /// 段内的显示序号
    index: usize,
    temporal_id: u8,
    slice_type: SliceType,
    refs: [Vec<usize>; 2],
}

/// 按解码顺序排列一段分层 GOP
fn segment_order(len: usize, gop: usize) -> Vec<CodedPicture> {
    fn bisect(lo: usize, hi: usize, depth: u8, order: &mut Vec<CodedPicture>) {
        if hi - lo < 2 {
            return;
        }
        let mid = (lo + hi) / 2;
        order.push(CodedPicture {
            index: mid,
            temporal_id: depth.min(6),
            slice_type: SliceType::B,
            refs: [vec![lo], vec![hi]],
        });
        bisect(lo, mid, depth + 1, order);
        bisect(mid, hi, depth + 1, order);
    }

    let mut order = vec![CodedPicture {
        index: 0,
        temporal_id: 0,
        slice_type: SliceType::I,
        refs: [Vec::new(), Vec::new()],
    }];
    let mut anchor = 0;
    while anchor + 1 < len {
        let end = (anchor + gop).min(len - 1);
        order.push(CodedPicture {
            index: end,
            temporal_id: 0,
            slice_type: SliceType::P,
            refs: [vec![anchor], Vec::new()],
        });
        bisect(anchor, end, 1, &mut order);
        anchor = end;
    }
    order
}

/// 第 `pos` 幅图像解码时仍需保留的参考图像 (只统计子层不高于 `max_tid` 的图像)
fn rps_at(order: &[CodedPicture], pos: usize, max_tid: u8) -> Vec<usize> {
    order[..pos]
        .iter()
        .filter(|earlier| earlier.temporal_id <= max_tid)
        .filter(|earlier| {
            order[pos..]
                .iter()
                .filter(|later| later.temporal_id <= max_tid)
                .any(|later| later.refs.iter().flatten().any(|&r| r == earlier.index))
        })
        .map(|earlier| earlier.index)
        .collect()
}

/// 每个子层的 (重排序数, 缓冲大小)
fn layer_limits(order: &[CodedPicture], max_tid: u8) -> (u32, u32) {
    let mut num_reorder = 0usize;
    let mut max_rps = 0usize;
    for (pos, pic) in order.iter().enumerate() {
        if pic.temporal_id > max_tid {
            continue;
        }
        let ahead = order[..pos]
            .iter()
            .filter(|earlier| earlier.temporal_id <= max_tid && earlier.index > pic.index)
            .count();
        num_reorder = num_reorder.max(ahead);
        max_rps = max_rps.max(rps_at(order, pos, max_tid).len());
    }
    (num_reorder as u32, (max_rps + num_reorder + 2) as u32)
}

/// rbsp 停止位所在字节, 保证单元不以 0x00 结尾
const RBSP_STOP_BYTE: u8 = 0x80;

fn nal_unit(nal_type: NalUnitType, temporal_id: u8, payload: &[u8]) -> Vec<u8> {
    let header = NalUnitHeader {
        nal_type,
        layer_id: 0,
        temporal_id,
    };
    let mut unit = header.to_bytes().to_vec();
    unit.extend_from_slice(payload);
    unit.put_u8(RBSP_STOP_BYTE);
    unit
}

/// 合成码流生成器
///
/// 图像按显示顺序编号为帧序号 `0..frames`; 丢弃、损坏和哈希都按帧序号指定.
#[derive(Debug, Clone)]
pub struct SyntheticStreamWriter {
    frames: usize,
    gop: usize,
    width_ctus: u32,
    height_ctus: u32,
    ctu_size: u32,
    bit_depth: u8,
    idr_period: Option<usize>,
    leading_pictures: usize,
    dropped: BTreeSet<usize>,
    corrupted: BTreeSet<usize>,
    hashes: HashMap<usize, u32>,
}

impl SyntheticStreamWriter {
    /// `frames` 幅图像, GOP 长度 `gop`
    pub fn new(frames: usize, gop: usize) -> Self {
        Self {
            frames: frames.max(1),
            gop: gop.max(1),
            width_ctus: 4,
            height_ctus: 3,
            ctu_size: 4,
            bit_depth: 8,
            idr_period: None,
            leading_pictures: 0,
            dropped: BTreeSet::new(),
            corrupted: BTreeSet::new(),
            hashes: HashMap::new(),
        }
    }

    /// 图像尺寸
    pub fn dimensions(mut self, width_ctus: u32, height_ctus: u32, ctu_size: u32) -> Self {
        self.width_ctus = width_ctus.max(1);
        self.height_ctus = height_ctus.max(1);
        self.ctu_size = ctu_size.max(1);
        self
    }

    /// 样本位深
    pub fn bit_depth(mut self, bit_depth: u8) -> Self {
        self.bit_depth = bit_depth.clamp(8, 16);
        self
    }

    /// 每 `period` 帧插入一个 IDR, 开始新的 CLVS
    pub fn idr_period(mut self, period: usize) -> Self {
        self.idr_period = Some(period.max(1));
        self
    }

    /// 以 CRA 开始, 其后跟 `count` 幅引用更早图像的 RASL 图像
    pub fn leading_pictures(mut self, count: usize) -> Self {
        self.leading_pictures = count;
        self
    }

    /// 不写出某一帧
    pub fn drop_frame(mut self, frame: usize) -> Self {
        self.dropped.insert(frame);
        self
    }

    /// 把某一帧的载荷截断
    pub fn corrupt_frame(mut self, frame: usize) -> Self {
        self.corrupted.insert(frame);
        self
    }

    /// 为指定帧写入图像哈希
    pub fn picture_hashes(mut self, hashes: impl IntoIterator<Item = (usize, u32)>) -> Self {
        self.hashes.extend(hashes);
        self
    }

    fn segments(&self) -> Vec<usize> {
        let period = self.idr_period.unwrap_or(self.frames);
        let mut segments = Vec::new();
        let mut left = self.frames;
        while left > 0 {
            let len = left.min(period);
            segments.push(len);
            left -= len;
        }
        segments
    }

    fn poc_offset(&self, segment: usize) -> i32 {
        if segment == 0 { self.leading_pictures as i32 } else { 0 }
    }

    /// 码流声明的序列参数
    pub fn seq_params(&self) -> SeqParams {
        let orders: Vec<Vec<CodedPicture>> = self
            .segments()
            .into_iter()
            .map(|len| segment_order(len, self.gop))
            .collect();
        let max_tid = orders
            .iter()
            .flatten()
            .map(|pic| pic.temporal_id)
            .max()
            .unwrap_or(0);

        let mut num_reorder_pics = [0u32; MAX_SUB_LAYERS];
        let mut max_dec_pic_buffering = [1u32; MAX_SUB_LAYERS];
        for tid in 0..=max_tid {
            let layer = usize::from(tid);
            for order in &orders {
                let (reorder, max_dec) = layer_limits(order, tid);
                num_reorder_pics[layer] = num_reorder_pics[layer].max(reorder);
                max_dec_pic_buffering[layer] = max_dec_pic_buffering[layer].max(max_dec);
            }
        }
        for layer in usize::from(max_tid) + 1..MAX_SUB_LAYERS {
            num_reorder_pics[layer] = num_reorder_pics[usize::from(max_tid)];
            max_dec_pic_buffering[layer] = max_dec_pic_buffering[usize::from(max_tid)];
        }
        if self.leading_pictures > 0 {
            // 前置图像在 CRA 之后解码, 显示在它之前
            for layer in 0..MAX_SUB_LAYERS {
                num_reorder_pics[layer] += self.leading_pictures as u32;
                max_dec_pic_buffering[layer] += self.leading_pictures as u32;
            }
        }

        SeqParams {
            width_ctus: self.width_ctus,
            height_ctus: self.height_ctus,
            ctu_size: self.ctu_size,
            bit_depth: self.bit_depth,
            max_sub_layers: max_tid + 1,
            num_reorder_pics,
            max_dec_pic_buffering,
        }
    }

    /// 按解码顺序生成所有 NAL 单元 (不含起始码)
    pub fn units(&self) -> Vec<Vec<u8>> {
        let seq = self.seq_params();
        let mut units = vec![nal_unit(NalUnitType::Sps, 0, &encode_seq_params(&seq))];

        let mut first_frame = 0;
        for (segment, len) in self.segments().into_iter().enumerate() {
            if segment > 0 {
                units.push(nal_unit(NalUnitType::Eos, 0, &[]));
            }
            let offset = self.poc_offset(segment);
            let order = segment_order(len, self.gop);
            for (pos, coded) in order.iter().enumerate() {
                let frame = first_frame + coded.index;
                let nal_type = match (pos, segment, self.leading_pictures) {
                    (0, 0, leading) if leading > 0 => NalUnitType::Cra,
                    (0, 0, _) => NalUnitType::IdrNLp,
                    (0, _, _) => NalUnitType::IdrWRadl,
                    _ => NalUnitType::Trail,
                };
                if !self.dropped.contains(&frame) {
                    let rps = rps_at(&order, pos, u8::MAX);
                    let ph = self.picture_header(coded, frame, offset, &rps);
                    let mut payload = encode_picture_header(&ph);
                    if self.corrupted.contains(&frame) {
                        payload.truncate(3);
                    }
                    units.push(nal_unit(nal_type, coded.temporal_id, &payload));
                }
                if pos == 0 && segment == 0 {
                    self.push_leading_pictures(&mut units, offset);
                }
            }
            first_frame += len;
        }
        units
    }

    fn picture_header(
        &self,
        coded: &CodedPicture,
        frame: usize,
        offset: i32,
        rps: &[usize],
    ) -> PictureHeader {
        let to_poc = |index: usize| index as i32 + offset;
        let to_refs = |list: &[usize]| -> Vec<RefEntry> {
            list.iter()
                .map(|&r| RefEntry {
                    poc: to_poc(r),
                    long_term: false,
                })
                .collect()
        };
        PictureHeader {
            poc: to_poc(coded.index),
            slice_type: coded.slice_type,
            qp: 30 + i32::from(coded.temporal_id),
            output_flag: true,
            rps: rps.iter().map(|&index| to_poc(index)).collect(),
            ref_lists: [to_refs(&coded.refs[0]), to_refs(&coded.refs[1])],
            residual_seed: (frame as u32).wrapping_mul(0x9E37_79B9) ^ 0x5BD1_E995,
            picture_hash: self.hashes.get(&frame).copied(),
        }
    }

    /// RASL 图像: 参考 CRA 之前一幅从未写出的图像
    fn push_leading_pictures(&self, units: &mut Vec<Vec<u8>>, cra_poc: i32) {
        for i in 0..self.leading_pictures {
            let ph = PictureHeader {
                poc: i as i32,
                slice_type: SliceType::B,
                qp: 31,
                output_flag: true,
                rps: vec![-1, cra_poc],
                ref_lists: [
                    vec![RefEntry { poc: -1, long_term: false }],
                    vec![RefEntry { poc: cra_poc, long_term: false }],
                ],
                residual_seed: i as u32,
                picture_hash: None,
            };
            units.push(nal_unit(NalUnitType::Rasl, 1, &encode_picture_header(&ph)));
        }
    }

    /// 写成 Annex B 字节流
    pub fn build(&self) -> Vec<u8> {
        let units = self.units();
        write_annex_b(units.iter().map(Vec::as_slice))
    }

    /// 预期的输出: 按输出顺序的 (段序号, POC), 不含丢弃和损坏的帧
    pub fn expected_output(&self) -> Vec<(usize, i32)> {
        let mut out = Vec::new();
        let mut first_frame = 0;
        for (segment, len) in self.segments().into_iter().enumerate() {
            let offset = self.poc_offset(segment);
            for index in 0..len {
                let frame = first_frame + index;
                if !self.dropped.contains(&frame) && !self.corrupted.contains(&frame) {
                    out.push((segment, index as i32 + offset));
                }
            }
            first_frame += len;
        }
        out
    }
}

// ============================================================
// 重建器
// ============================================================

fn residual(seed: u32, ctu: usize, len: usize) -> Vec<i16> {
    let mut state = (seed ^ (ctu as u32).wrapping_mul(0x85EB_CA6B)) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 17) as i16 - 8
        })
        .collect()
}

/// 相邻 CTU 的预测块: 不存在的邻居为 `Some(None)`, 尚未预测为 `None`
fn neighbour_pred(buffer: &PictureBuffer, present: bool, index: usize) -> Option<Option<&[u16]>> {
    if !present {
        return Some(None);
    }
    buffer.pred_block(index).map(Some)
}

#[inline]
fn average(a: u16, b: u16) -> u16 {
    ((u32::from(a) + u32::from(b) + 1) >> 1) as u16
}

/// 合成重建器
///
/// 预测: I 图像用左侧 (或上方) CTU 预测块的一个样本作直流值, P 图像复制 L0,
/// B 图像平均 L0 与 L1; 之后叠加按种子生成的残差. 滤波把边界样本与相邻 CTU
/// 预测块的边界样本平均.
pub struct SyntheticReconstructor {
    kernels: &'static dyn SampleKernels,
}

impl SyntheticReconstructor {
    /// 使用给定内核创建
    pub fn new(kernels: &'static dyn SampleKernels) -> Self {
        Self { kernels }
    }

    fn intra_dc(&self, pic: &Picture, ctu: usize) -> Option<u16> {
        let buffer = &pic.buffer;
        let width = buffer.width_ctus() as usize;
        let size = buffer.ctu_size() as usize;
        if ctu % width > 0 {
            buffer.pred_block(ctu - 1).map(|left| left[size - 1])
        } else if ctu >= width {
            buffer.pred_block(ctu - width).map(|above| above[above.len() - 1])
        } else {
            Some(1 << (buffer.bit_depth() - 1))
        }
    }
}

impl Reconstructor for SyntheticReconstructor {
    fn predict_ctu(
        &self,
        _worker: usize,
        pic: &Picture,
        refs: &[Vec<Arc<Picture>>; 2],
        ctu: usize,
    ) -> bool {
        let buffer = &pic.buffer;
        let mut block = vec![0u16; buffer.ctu_samples()].into_boxed_slice();
        let l0 = refs[0].first().and_then(|r| r.buffer.recon_block(ctu));
        let l1 = refs[1].first().and_then(|r| r.buffer.recon_block(ctu));

        match (pic.slice_type(), l0, l1) {
            (SliceType::B, Some(a), Some(b)) => self.kernels.average_block(&mut block, a, b),
            (SliceType::B | SliceType::P, Some(a), _) => self.kernels.copy_block(&mut block, a),
            _ => {
                let Some(dc) = self.intra_dc(pic, ctu) else {
                    return false;
                };
                self.kernels.fill_block(&mut block, dc);
            }
        }

        let residual = residual(pic.residual_seed(), ctu, block.len());
        self.kernels
            .add_residual_clip(&mut block, &residual, buffer.bit_depth());
        buffer.set_pred_block(ctu, block);
        true
    }

    fn filter_ctu(&self, _worker: usize, pic: &Picture, ctu: usize) -> bool {
        let buffer = &pic.buffer;
        let width = buffer.width_ctus() as usize;
        let height = buffer.height_ctus() as usize;
        let size = buffer.ctu_size() as usize;
        let (x, y) = (ctu % width, ctu / width);

        let Some(own) = buffer.pred_block(ctu) else {
            return false;
        };
        let (Some(left), Some(right), Some(above), Some(below)) = (
            neighbour_pred(buffer, x > 0, ctu.wrapping_sub(1)),
            neighbour_pred(buffer, x + 1 < width, ctu + 1),
            neighbour_pred(buffer, y > 0, ctu.wrapping_sub(width)),
            neighbour_pred(buffer, y + 1 < height, ctu + width),
        ) else {
            return false;
        };

        let mut out = vec![0u16; own.len()].into_boxed_slice();
        self.kernels.copy_block(&mut out, own);
        for i in 0..size {
            if let Some(left) = left {
                out[i * size] = average(own[i * size], left[i * size + size - 1]);
            }
            if let Some(right) = right {
                out[i * size + size - 1] = average(own[i * size + size - 1], right[i * size]);
            }
            if let Some(above) = above {
                out[i] = average(own[i], above[(size - 1) * size + i]);
            }
            if let Some(below) = below {
                out[(size - 1) * size + i] = average(own[(size - 1) * size + i], below[i]);
            }
        }
        buffer.set_recon_block(ctu, out);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ScalarKernels;
    use crate::nal::split_annex_b;
    use bytes::Bytes;

    fn header(nal_type: NalUnitType) -> NalUnitHeader {
        NalUnitHeader {
            nal_type,
            layer_id: 0,
            temporal_id: 0,
        }
    }

    #[test]
    fn test_segment_decode_order() {
        let order: Vec<(usize, u8)> = segment_order(9, 4)
            .iter()
            .map(|p| (p.index, p.temporal_id))
            .collect();
        assert_eq!(
            order,
            vec![(0, 0), (4, 0), (2, 1), (1, 2), (3, 2), (8, 0), (6, 1), (5, 2), (7, 2)]
        );
    }

    #[test]
    fn test_layer_limits() {
        let order = segment_order(9, 4);
        assert_eq!(layer_limits(&order, 0).0, 0, "只有锚点时不需要重排序");
        assert_eq!(layer_limits(&order, 1).0, 1);
        assert_eq!(layer_limits(&order, 2).0, 2);
        // POC 1 解码时仍需保留 0, 4, 2
        assert_eq!(rps_at(&order, 3, u8::MAX), vec![0, 4, 2]);
    }

    #[test]
    fn test_reader_parses_writer_output() {
        let writer = SyntheticStreamWriter::new(5, 2).picture_hashes([(3, 0xDEAD_BEEF)]);
        let units = split_annex_b(&Bytes::from(writer.build()));
        let mut reader = SyntheticReader::new();
        let mut pictures = Vec::new();
        for unit in &units {
            let header = unit.header().expect("单元头应合法");
            match reader.read_unit(&header, &unit.payload()).expect("载荷应合法") {
                UnitSyntax::SequenceParams(seq) => assert_eq!(seq, writer.seq_params()),
                UnitSyntax::Picture(ph) => pictures.push(ph),
                other => panic!("意外的单元: {other:?}"),
            }
        }
        let pocs: Vec<i32> = pictures.iter().map(|ph| ph.poc).collect();
        assert_eq!(pocs, vec![0, 2, 1, 4, 3]);
        assert_eq!(pictures[4].picture_hash, Some(0xDEAD_BEEF));
        assert_eq!(pictures[2].slice_type, SliceType::B);
        assert_eq!(pictures[2].ref_lists[1][0].poc, 2);
    }

    #[test]
    fn test_every_unit_survives_annex_b() {
        // POC 1 的 i32 编码是 00 00 00 01, L1 为空时载荷以 0x00 结尾
        let writer = SyntheticStreamWriter::new(17, 4).idr_period(9).picture_hashes([(1, 0)]);
        let expected = writer.units();
        let units = split_annex_b(&Bytes::from(writer.build()));
        assert_eq!(units.len(), expected.len());
        for (unit, raw) in units.iter().zip(&expected) {
            assert_eq!(unit.data.as_ref()[..2], raw[..2]);
            assert_eq!(unit.payload().as_ref(), &raw[2..]);
            assert_eq!(unit.payload().last(), Some(&RBSP_STOP_BYTE));
        }
    }

    #[test]
    fn test_truncated_payload_is_invalid_data() {
        let mut reader = SyntheticReader::new();
        let err = reader.read_unit(&header(NalUnitType::Trail), &[0, 0, 1]);
        assert!(matches!(err, Err(LiuError::InvalidData(_))));
        let err = reader.read_unit(&header(NalUnitType::Sps), &[0, 0, 0, 0, 4, 8, 1]);
        assert!(matches!(err, Err(LiuError::InvalidData(_))), "尺寸为 0 应被拒绝");
    }

    #[test]
    fn test_dropped_and_corrupted_frames() {
        let writer = SyntheticStreamWriter::new(6, 2).drop_frame(2).corrupt_frame(3);
        let all = SyntheticStreamWriter::new(6, 2).units().len();
        assert_eq!(writer.units().len(), all - 1, "丢弃的帧不写出, 损坏的帧仍写出");
        let pocs: Vec<i32> = writer.expected_output().iter().map(|&(_, poc)| poc).collect();
        assert_eq!(pocs, vec![0, 1, 4, 5]);
    }

    #[test]
    fn test_idr_period_and_leading_pictures() {
        let writer = SyntheticStreamWriter::new(5, 2).idr_period(3);
        assert_eq!(writer.expected_output(), vec![(0, 0), (0, 1), (0, 2), (1, 0), (1, 1)]);
        let eos = writer
            .units()
            .iter()
            .filter(|u| matches!(NalUnitHeader::parse(u), Ok(h) if h.nal_type == NalUnitType::Eos))
            .count();
        assert_eq!(eos, 1);

        let writer = SyntheticStreamWriter::new(3, 2).leading_pictures(2);
        let types: Vec<NalUnitType> = writer
            .units()
            .iter()
            .filter_map(|u| NalUnitHeader::parse(u).ok())
            .map(|h| h.nal_type)
            .collect();
        assert_eq!(
            types,
            vec![
                NalUnitType::Sps,
                NalUnitType::Cra,
                NalUnitType::Rasl,
                NalUnitType::Rasl,
                NalUnitType::Trail,
                NalUnitType::Trail
            ]
        );
        assert_eq!(writer.expected_output(), vec![(0, 2), (0, 3), (0, 4)]);
    }

    #[test]
    fn test_filter_waits_for_neighbours() {
        static SCALAR: ScalarKernels = ScalarKernels;
        let writer = SyntheticStreamWriter::new(1, 1).dimensions(2, 1, 2);
        let seq = Arc::new(writer.seq_params());
        let pic = Picture::new(
            crate::picture::tests::desc(0, 0),
            seq,
            [Vec::new(), Vec::new()],
            true,
        );
        let recon = SyntheticReconstructor::new(&SCALAR);
        let refs = [Vec::new(), Vec::new()];
        assert!(recon.predict_ctu(0, &pic, &refs, 0), "P 图像没有参考时按帧内处理");
        assert!(!recon.filter_ctu(0, &pic, 0), "右侧 CTU 未预测时不能滤波");
        assert!(recon.predict_ctu(0, &pic, &refs, 1));
        assert!(recon.filter_ctu(0, &pic, 0));
        assert!(recon.filter_ctu(0, &pic, 1));
        assert!(pic.buffer.is_complete());
    }
}
