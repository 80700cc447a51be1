//! 解码单元 (DecodeUnit).
//!
//! 一个解码单元对应码流中的一个 NAL 单元, 是送入解码器的最小输入.

use bytes::Bytes;
use liu_core::LiuResult;

use crate::nal::{
    NAL_HEADER_SIZE, NalUnitHeader, has_emulation_prevention, remove_emulation_prevention,
};

/// 未知时间戳
pub const NOPTS_VALUE: i64 = i64::MIN;

/// 解码单元
#[derive(Debug, Clone)]
pub struct DecodeUnit {
    /// NAL 数据 (含 2 字节 NAL 头)
    pub data: Bytes,
    /// 显示时间戳 (PTS)
    pub pts: i64,
    /// 解码时间戳 (DTS)
    pub dts: i64,
    /// 在字节流中的偏移量 (-1 表示未知)
    pub pos: i64,
}

impl DecodeUnit {
    /// 创建空单元
    pub fn empty() -> Self {
        Self {
            data: Bytes::new(),
            pts: NOPTS_VALUE,
            dts: NOPTS_VALUE,
            pos: -1,
        }
    }

    /// 从数据创建单元
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            ..Self::empty()
        }
    }

    /// 数据大小 (字节)
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// 是否为空单元
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 解析 NAL 头
    pub fn header(&self) -> LiuResult<NalUnitHeader> {
        NalUnitHeader::parse(&self.data)
    }

    /// NAL 头之后的负载, 已移除 emulation prevention 字节
    ///
    /// 没有需要移除的字节时与 `data` 共享缓冲区.
    pub fn payload(&self) -> Bytes {
        if self.data.len() <= NAL_HEADER_SIZE {
            return Bytes::new();
        }
        let payload = self.data.slice(NAL_HEADER_SIZE..);
        if has_emulation_prevention(&payload) {
            Bytes::from(remove_emulation_prevention(&payload))
        } else {
            payload
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_unit() {
        let unit = DecodeUnit::empty();
        assert!(unit.is_empty());
        assert_eq!(unit.pts, NOPTS_VALUE);
        assert!(unit.header().is_err());
        assert!(unit.payload().is_empty());
    }

    #[test]
    fn test_payload_skips_header() {
        let unit = DecodeUnit::from_data(vec![0x00, 0x01, 7, 8]);
        assert_eq!(unit.size(), 4);
        assert_eq!(unit.payload().as_ref(), &[7, 8]);
    }

    #[test]
    fn test_payload_strips_emulation_prevention() {
        let unit = DecodeUnit::from_data(vec![0x00, 0x01, 0x00, 0x00, 0x03, 0x01, 0x80]);
        assert_eq!(unit.payload().as_ref(), &[0x00, 0x00, 0x01, 0x80]);
    }
}
