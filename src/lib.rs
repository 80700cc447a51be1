//! # Liu (流)
//!
//! 纯 Rust 实现的视频解码任务调度与流水线编排框架.
//!
//! Liu 把一幅图像的解码拆成依赖驱动的小任务:
//! - **调度器**: 固定容量的任务槽, 屏障与计数器表达依赖, 工作线程与调用线程都能执行任务
//! - **流水线**: 解析阶段在前, 多个重建实例在后, 按解码顺序提交, 按输出顺序交付
//! - **图像列表**: 有界的图像缓冲复用, 参考标记, 输出重排, 丢失图像补偿
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use liu::core::DecoderConfig;
//!
//! let stream = liu::decoder::SyntheticStreamWriter::new(16, 4).build();
//! let mut decoder = liu::synthetic_decoder(DecoderConfig::with_threads(4, -1)).unwrap();
//! for unit in liu::decoder::split_annex_b(&stream.into()) {
//!     if let Some(pic) = decoder.decode(&unit).unwrap() {
//!         println!("{}", pic.log_line());
//!     }
//! }
//! ```
//!
//! # Crate 结构
//!
//! | Crate | 功能 |
//! |-------|------|
//! | `liu-core` | 错误类型、解码器配置、CPU 能力检测 |
//! | `liu-sched` | 依赖驱动任务调度器 |
//! | `liu-decoder` | 解码流水线编排 |

use std::sync::Arc;

use liu_core::{DecoderConfig, LiuResult};
use liu_decoder::{Decoder, SyntheticReader, SyntheticReconstructor, kernels};

pub mod logging;

/// 核心类型与工具
pub use liu_core as core;

/// 依赖驱动任务调度器
pub use liu_sched as sched;

/// 解码流水线编排
pub use liu_decoder as decoder;

/// 获取 Liu 版本号
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// 创建使用合成语法与合成重建器的解码器
///
/// 用于命令行工具、基准测试和集成测试.
pub fn synthetic_decoder(config: DecoderConfig) -> LiuResult<Decoder> {
    Decoder::builder(config)
        .reader(SyntheticReader::new())
        .reconstructor(Arc::new(SyntheticReconstructor::new(kernels::active())))
        .build()
}
