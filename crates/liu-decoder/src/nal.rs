//! NAL (Network Abstraction Layer) 单元头解析与 Annex B 分割.
//!
//! NAL 头部为 2 字节:
//! - forbidden_zero_bit (1 bit)
//! - nuh_reserved_zero_bit (1 bit)
//! - nuh_layer_id (6 bits)
//! - nal_unit_type (5 bits)
//! - nuh_temporal_id_plus1 (3 bits)

use bytes::Bytes;
use liu_core::{LiuError, LiuResult};

use crate::unit::DecodeUnit;

/// NAL 单元类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NalUnitType {
    /// TRAIL_NUT (尾随图像)
    Trail,
    /// STSA_NUT (逐步时域子层切换)
    Stsa,
    /// RADL_NUT (可解码前置图像)
    Radl,
    /// RASL_NUT (跳过前置图像)
    Rasl,
    /// IDR_W_RADL (Instantaneous Decoding Refresh)
    IdrWRadl,
    /// IDR_N_LP
    IdrNLp,
    /// CRA_NUT (Clean Random Access)
    Cra,
    /// GDR_NUT (Gradual Decoding Refresh)
    Gdr,
    /// OPI_NUT
    Opi,
    /// DCI_NUT
    Dci,
    /// VPS_NUT
    Vps,
    /// SPS_NUT
    Sps,
    /// PPS_NUT
    Pps,
    /// PREFIX_APS_NUT
    PrefixAps,
    /// SUFFIX_APS_NUT
    SuffixAps,
    /// PH_NUT (图像头)
    PictureHeader,
    /// AUD_NUT (Access Unit Delimiter)
    Aud,
    /// EOS_NUT (End of Sequence)
    Eos,
    /// EOB_NUT (End of Bitstream)
    Eob,
    /// PREFIX_SEI_NUT
    PrefixSei,
    /// SUFFIX_SEI_NUT
    SuffixSei,
    /// FD_NUT (Filler Data)
    FillerData,
    /// 保留或未定义类型
    Reserved(u8),
}

impl NalUnitType {
    /// 从类型编号创建
    pub fn from_type_id(id: u8) -> Self {
        match id {
            0 => Self::Trail,
            1 => Self::Stsa,
            2 => Self::Radl,
            3 => Self::Rasl,
            7 => Self::IdrWRadl,
            8 => Self::IdrNLp,
            9 => Self::Cra,
            10 => Self::Gdr,
            12 => Self::Opi,
            13 => Self::Dci,
            14 => Self::Vps,
            15 => Self::Sps,
            16 => Self::Pps,
            17 => Self::PrefixAps,
            18 => Self::SuffixAps,
            19 => Self::PictureHeader,
            20 => Self::Aud,
            21 => Self::Eos,
            22 => Self::Eob,
            23 => Self::PrefixSei,
            24 => Self::SuffixSei,
            25 => Self::FillerData,
            _ => Self::Reserved(id),
        }
    }

    /// 获取类型编号
    pub fn type_id(&self) -> u8 {
        match self {
            Self::Trail => 0,
            Self::Stsa => 1,
            Self::Radl => 2,
            Self::Rasl => 3,
            Self::IdrWRadl => 7,
            Self::IdrNLp => 8,
            Self::Cra => 9,
            Self::Gdr => 10,
            Self::Opi => 12,
            Self::Dci => 13,
            Self::Vps => 14,
            Self::Sps => 15,
            Self::Pps => 16,
            Self::PrefixAps => 17,
            Self::SuffixAps => 18,
            Self::PictureHeader => 19,
            Self::Aud => 20,
            Self::Eos => 21,
            Self::Eob => 22,
            Self::PrefixSei => 23,
            Self::SuffixSei => 24,
            Self::FillerData => 25,
            Self::Reserved(id) => *id,
        }
    }

    /// 是否为 VCL (Video Coding Layer) NAL, 即携带条带数据
    pub fn is_slice(&self) -> bool {
        self.type_id() < 12
    }

    /// 是否为 IRAP (Intra Random Access Point)
    pub fn is_irap(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp | Self::Cra)
    }

    /// 是否为 IDR
    pub fn is_idr(&self) -> bool {
        matches!(self, Self::IdrWRadl | Self::IdrNLp)
    }

    /// 类型名称 (用于日志)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Trail => "TRAIL",
            Self::Stsa => "STSA",
            Self::Radl => "RADL",
            Self::Rasl => "RASL",
            Self::IdrWRadl => "IDR_W_RADL",
            Self::IdrNLp => "IDR_N_LP",
            Self::Cra => "CRA",
            Self::Gdr => "GDR",
            Self::Opi => "OPI",
            Self::Dci => "DCI",
            Self::Vps => "VPS",
            Self::Sps => "SPS",
            Self::Pps => "PPS",
            Self::PrefixAps => "PREFIX_APS",
            Self::SuffixAps => "SUFFIX_APS",
            Self::PictureHeader => "PH",
            Self::Aud => "AUD",
            Self::Eos => "EOS",
            Self::Eob => "EOB",
            Self::PrefixSei => "PREFIX_SEI",
            Self::SuffixSei => "SUFFIX_SEI",
            Self::FillerData => "FD",
            Self::Reserved(_) => "RSV",
        }
    }
}

/// NAL 单元头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnitHeader {
    /// NAL 类型
    pub nal_type: NalUnitType,
    /// nuh_layer_id
    pub layer_id: u8,
    /// 时域子层 id (nuh_temporal_id_plus1 - 1)
    pub temporal_id: u8,
}

/// NAL 头字节数
pub const NAL_HEADER_SIZE: usize = 2;

impl NalUnitHeader {
    /// 从 NAL 数据 (含 2 字节头) 解析
    pub fn parse(data: &[u8]) -> LiuResult<Self> {
        if data.len() < NAL_HEADER_SIZE {
            return Err(LiuError::InvalidData("NAL 数据太短".into()));
        }
        if data[0] & 0x80 != 0 {
            return Err(LiuError::InvalidData("forbidden_zero_bit 不为 0".into()));
        }
        let layer_id = data[0] & 0x3F;
        let nal_type = NalUnitType::from_type_id(data[1] >> 3);
        let temporal_id_plus1 = data[1] & 0x07;
        if temporal_id_plus1 == 0 {
            return Err(LiuError::InvalidData(
                "nuh_temporal_id_plus1 不能为 0".into(),
            ));
        }
        Ok(Self {
            nal_type,
            layer_id,
            temporal_id: temporal_id_plus1 - 1,
        })
    }

    /// 编码为 2 字节头
    pub fn to_bytes(&self) -> [u8; NAL_HEADER_SIZE] {
        [
            self.layer_id & 0x3F,
            (self.nal_type.type_id() << 3) | ((self.temporal_id + 1) & 0x07),
        ]
    }
}

// ============================================================
// Annex B 分割
// ============================================================

/// 查找所有起始码位置
fn find_start_codes(data: &[u8]) -> Vec<usize> {
    let mut positions = Vec::new();
    let mut i = 0;
    while i + 2 < data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                positions.push(i);
                i += 3;
                continue;
            } else if i + 3 < data.len() && data[i + 2] == 0 && data[i + 3] == 1 {
                positions.push(i);
                i += 4;
                continue;
            }
        }
        i += 1;
    }
    positions
}

/// 跳过起始码, 返回 NAL 数据起始位置
fn skip_start_code(data: &[u8], pos: usize) -> usize {
    if data[pos..].starts_with(&[0, 0, 0, 1]) {
        pos + 4
    } else {
        pos + 3
    }
}

/// 从 Annex B 字节流分割解码单元
///
/// 单元之间共享 `data` 的底层缓冲区, 不复制负载. 尾随零字节被去除,
/// 字节流中的偏移记录在 [`DecodeUnit::pos`].
pub fn split_annex_b(data: &Bytes) -> Vec<DecodeUnit> {
    let offsets = find_start_codes(data);
    let mut units = Vec::with_capacity(offsets.len());

    for (i, &start) in offsets.iter().enumerate() {
        let end = offsets.get(i + 1).copied().unwrap_or(data.len());
        let nal_start = skip_start_code(data, start);
        let mut nal_end = end;
        while nal_end > nal_start && data[nal_end - 1] == 0x00 {
            nal_end -= 1;
        }
        if nal_end > nal_start {
            let mut unit = DecodeUnit::from_data(data.slice(nal_start..nal_end));
            unit.pos = start as i64;
            units.push(unit);
        }
    }
    units
}

/// 把若干 NAL 单元写成 Annex B 字节流 (4 字节起始码)
///
/// 单元内容按需插入 emulation prevention 字节.
pub fn write_annex_b<'a>(units: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&[0, 0, 0, 1]);
        insert_emulation_prevention(unit, &mut out);
    }
    out
}

// ============================================================
// Emulation prevention
// ============================================================

/// 插入 emulation prevention 字节 (0x00 0x00 0x0X → 0x00 0x00 0x03 0x0X)
fn insert_emulation_prevention(data: &[u8], out: &mut Vec<u8>) {
    let mut zeros = 0;
    for &byte in data {
        if zeros >= 2 && byte <= 3 {
            out.push(3);
            zeros = 0;
        }
        out.push(byte);
        zeros = if byte == 0 { zeros + 1 } else { 0 };
    }
}

/// 是否含有 emulation prevention 字节
pub(crate) fn has_emulation_prevention(data: &[u8]) -> bool {
    data.windows(3).any(|w| w == [0, 0, 3])
}

/// 移除 emulation prevention 字节 (0x00 0x00 0x03 → 0x00 0x00)
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if i + 2 < data.len() && data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 3 {
            out.push(0);
            out.push(0);
            i += 3; // 跳过 0x03
        } else {
            out.push(data[i]);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_parse() {
        // layer 0, CRA (9), tid 2
        let header = NalUnitHeader::parse(&[0x00, (9 << 3) | 3]).expect("解析失败");
        assert_eq!(header.nal_type, NalUnitType::Cra);
        assert_eq!(header.layer_id, 0);
        assert_eq!(header.temporal_id, 2);
        assert!(header.nal_type.is_irap());
        assert!(header.nal_type.is_slice());
        assert_eq!(header.to_bytes(), [0x00, (9 << 3) | 3]);
    }

    #[test]
    fn test_header_rejects_bad_bits() {
        assert!(NalUnitHeader::parse(&[0x80, 0x01]).is_err());
        assert!(NalUnitHeader::parse(&[0x00, 0x08]).is_err(), "tid_plus1 为 0 应报错");
        assert!(NalUnitHeader::parse(&[0x00]).is_err());
    }

    #[test]
    fn test_type_id_roundtrip_for_known_types() {
        for id in 0..32u8 {
            assert_eq!(NalUnitType::from_type_id(id).type_id(), id);
        }
        assert!(!NalUnitType::Sps.is_slice());
        assert!(NalUnitType::Rasl.is_slice());
        assert!(!NalUnitType::Cra.is_idr());
    }

    #[test]
    fn test_split_annex_b() {
        let stream = Bytes::from(vec![
            0, 0, 0, 1, 0x00, 0x79, 0xAA, // SPS
            0, 0, 1, 0x00, 0x39, 0xBB, 0x00, // IDR_W_RADL, 尾随零
            0, 0, 0, 1, 0x00, 0xA9, // EOS
        ]);
        let units = split_annex_b(&stream);
        assert_eq!(units.len(), 3);
        assert_eq!(units[0].data.as_ref(), &[0x00, 0x79, 0xAA]);
        assert_eq!(units[1].data.as_ref(), &[0x00, 0x39, 0xBB], "尾随零应被去除");
        assert_eq!(units[1].pos, 7);
        let header = units[2].header().expect("解析失败");
        assert_eq!(header.nal_type, NalUnitType::Eos);
    }

    #[test]
    fn test_emulation_prevention_remove() {
        let data = [0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00, 0x05];
        assert_eq!(
            remove_emulation_prevention(&data),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05]
        );
        assert_eq!(remove_emulation_prevention(&[0x00, 0x03]), vec![0x00, 0x03]);
    }

    #[test]
    fn test_emulation_prevention_insert() {
        let mut out = Vec::new();
        insert_emulation_prevention(&[0, 0, 0, 0, 1, 0, 0, 4, 0, 0], &mut out);
        assert_eq!(out, vec![0, 0, 3, 0, 0, 3, 1, 0, 0, 4, 0, 0]);
        assert!(has_emulation_prevention(&out));
    }

    #[test]
    fn test_start_code_like_payload_roundtrip() {
        // 负载中含起始码样式的字节和尾随零, 末尾是 rbsp 停止字节
        let a: &[u8] = &[0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x02, 0x00, 0x80];
        let b: &[u8] = &[0x00, 0x11, 0x00, 0x00, 0x03, 0x00, 0x00, 0x80];
        let stream = Bytes::from(write_annex_b([a, b]));
        let units = split_annex_b(&stream);
        assert_eq!(units.len(), 2, "负载中的 00 00 01 不能被当作起始码");
        assert_eq!(units[0].header().expect("解析失败").nal_type, NalUnitType::Trail);
        assert_eq!(units[0].payload().as_ref(), &a[2..]);
        assert_eq!(units[1].payload().as_ref(), &b[2..]);
    }

    #[test]
    fn test_write_then_split() {
        let a: &[u8] = &[0x00, 0x01, 1, 2, 3];
        let b: &[u8] = &[0x00, 0x11, 4];
        let stream = Bytes::from(write_annex_b([a, b]));
        let units = split_annex_b(&stream);
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].payload().as_ref(), &[4]);
    }
}
