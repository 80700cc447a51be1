//! # liu-decoder
//!
//! Liu 视频解码流水线: 在 [`liu_sched`] 调度器之上编排解析与重建.
//!
//! 解析阶段按解码顺序分配图像并维护参考图像集, 重建阶段把每幅图像拆成
//! 一张任务图交给调度器, 图像列表管理器决定输出顺序和缓冲回收.
//! 语法解析与像素运算是外部协作者, 通过 [`SyntaxReader`] 和 [`Reconstructor`] 注入.
//!
//! ## 使用示例
//!
//! ```rust
//! use std::sync::Arc;
//! use bytes::Bytes;
//! use liu_core::DecoderConfig;
//! use liu_decoder::{Decoder, SyntheticReader, SyntheticReconstructor, SyntheticStreamWriter};
//!
//! let stream = SyntheticStreamWriter::new(8, 4).build();
//! let mut decoder = Decoder::builder(DecoderConfig::with_threads(2, -1))
//!     .reader(SyntheticReader::new())
//!     .reconstructor(Arc::new(SyntheticReconstructor::new(liu_decoder::kernels::active())))
//!     .build()
//!     .unwrap();
//!
//! let mut pocs = Vec::new();
//! for unit in liu_decoder::split_annex_b(&Bytes::from(stream)) {
//!     if let Some(pic) = decoder.decode(&unit).unwrap() {
//!         pocs.push(pic.poc());
//!     }
//! }
//! while let Some(pic) = decoder.flush().unwrap() {
//!     pocs.push(pic.poc());
//! }
//! assert_eq!(pocs, (0..8).collect::<Vec<_>>());
//! ```

pub mod buffer_pool;
pub mod decoder;
pub mod kernels;
pub mod nal;
pub mod parse_stage;
pub mod pic_list;
pub mod picture;
pub mod recon;
pub mod synthetic;
pub mod syntax;
pub mod trace;
pub mod unit;

// 重导出常用类型
pub use buffer_pool::{BufferPool, Pooled};
pub use decoder::{Decoder, DecoderBuilder};
pub use kernels::SampleKernels;
pub use nal::{NalUnitHeader, NalUnitType, split_annex_b, write_annex_b};
pub use parse_stage::ParseStage;
pub use pic_list::PicListManager;
pub use picture::{Picture, PictureBuffer, PictureDesc};
pub use recon::{ReconInstance, Reconstructor};
pub use synthetic::{SyntheticReader, SyntheticReconstructor, SyntheticStreamWriter};
pub use syntax::{PictureHeader, RefEntry, SeqParams, SliceType, SyntaxReader, UnitSyntax};
pub use trace::{CountingTrace, DecodeTrace, NoopTrace, TraceCounts, TraceEvent};
pub use unit::DecodeUnit;
