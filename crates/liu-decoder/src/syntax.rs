//! 高层语法接口.
//!
//! 比特级符号解析属于外部协作者, 通过 [`SyntaxReader`] 接入.
//! 流水线只需要本模块定义的语法结果: 序列参数、图像头、序列结束.

use liu_core::LiuResult;

use crate::nal::NalUnitHeader;

/// 最大时域子层数
pub const MAX_SUB_LAYERS: usize = 7;

/// 序列参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeqParams {
    /// 水平 CTU 个数
    pub width_ctus: u32,
    /// 垂直 CTU 个数
    pub height_ctus: u32,
    /// CTU 边长 (样本)
    pub ctu_size: u32,
    /// 样本位深
    pub bit_depth: u8,
    /// 时域子层数 (1..=7)
    pub max_sub_layers: u8,
    /// 每个子层的最大重排序图像数
    pub num_reorder_pics: [u32; MAX_SUB_LAYERS],
    /// 每个子层的最大解码图像缓冲大小
    pub max_dec_pic_buffering: [u32; MAX_SUB_LAYERS],
}

impl SeqParams {
    /// 图像宽度 (样本)
    pub fn width(&self) -> usize {
        (self.width_ctus * self.ctu_size) as usize
    }

    /// 图像高度 (样本)
    pub fn height(&self) -> usize {
        (self.height_ctus * self.ctu_size) as usize
    }

    /// CTU 总数
    pub fn num_ctus(&self) -> usize {
        (self.width_ctus * self.height_ctus) as usize
    }

    /// 每个 CTU 的样本数
    pub fn ctu_samples(&self) -> usize {
        (self.ctu_size * self.ctu_size) as usize
    }

    /// 按解码子层上限取 (重排序数, 缓冲大小)
    ///
    /// `max_temporal_layer` 为 `None` 或不小于子层数时取最高子层.
    pub fn output_limits(&self, max_temporal_layer: Option<u8>) -> (u32, u32) {
        let highest = usize::from(self.max_sub_layers.clamp(1, MAX_SUB_LAYERS as u8)) - 1;
        let layer = match max_temporal_layer {
            Some(tid) if usize::from(tid) < highest => usize::from(tid),
            _ => highest,
        };
        (self.num_reorder_pics[layer], self.max_dec_pic_buffering[layer])
    }
}

/// 条带类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    /// 双向预测
    B,
    /// 单向预测
    P,
    /// 帧内
    I,
}

impl SliceType {
    /// 日志中使用的字母
    pub fn letter(&self) -> char {
        match self {
            Self::B => 'B',
            Self::P => 'P',
            Self::I => 'I',
        }
    }
}

/// 参考图像列表项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefEntry {
    /// 参考图像 POC
    pub poc: i32,
    /// 是否为长期参考
    pub long_term: bool,
}

/// 图像头
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureHeader {
    /// 图像顺序号
    pub poc: i32,
    /// 条带类型
    pub slice_type: SliceType,
    /// 条带 QP
    pub qp: i32,
    /// 是否输出
    pub output_flag: bool,
    /// 参考图像集: 解码本图像后仍需保留为参考的 POC (不含本图像)
    pub rps: Vec<i32>,
    /// 参考图像列表 L0/L1
    pub ref_lists: [Vec<RefEntry>; 2],
    /// 残差生成种子 (由重建协作者解释)
    pub residual_seed: u32,
    /// 码流携带的图像校验和
    pub picture_hash: Option<u32>,
}

/// 单个解码单元的语法结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitSyntax {
    /// 序列参数集
    SequenceParams(SeqParams),
    /// 一幅图像的全部条带已解析
    Picture(PictureHeader),
    /// 序列结束
    EndOfSequence,
    /// 与流水线无关的单元
    Other,
}

/// 高层语法读取器
///
/// 错误表示单元损坏; 流水线记录警告并丢弃该单元, 之后对它的引用产生丢失图像.
pub trait SyntaxReader: Send {
    /// 解析一个单元
    fn read_unit(&mut self, header: &NalUnitHeader, payload: &[u8]) -> LiuResult<UnitSyntax>;

    /// 重置内部状态 (刷新结束后调用)
    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sps(max_sub_layers: u8) -> SeqParams {
        SeqParams {
            width_ctus: 4,
            height_ctus: 3,
            ctu_size: 8,
            bit_depth: 10,
            max_sub_layers,
            num_reorder_pics: [0, 1, 2, 3, 3, 3, 3],
            max_dec_pic_buffering: [1, 2, 4, 6, 6, 6, 6],
        }
    }

    #[test]
    fn test_output_limits_follow_layer() {
        let params = sps(4);
        assert_eq!(params.output_limits(None), (3, 6), "不限制时取最高子层");
        assert_eq!(params.output_limits(Some(1)), (1, 2));
        assert_eq!(params.output_limits(Some(6)), (3, 6), "超过子层数时取最高子层");
    }

    #[test]
    fn test_geometry() {
        let params = sps(1);
        assert_eq!(params.width(), 32);
        assert_eq!(params.height(), 24);
        assert_eq!(params.num_ctus(), 12);
        assert_eq!(params.ctu_samples(), 64);
        assert_eq!(params.output_limits(None), (0, 1));
    }
}
