//! # liu-core
//!
//! Liu 解码框架核心库, 提供错误类型、解码器配置和 CPU 能力检测.
//!
//! 其余 crate (调度器、解码流水线) 都依赖本 crate 提供的基础设施.

pub mod config;
pub mod cpu;
pub mod error;

// 重导出常用类型
pub use config::DecoderConfig;
pub use cpu::{SimdLevel, detect_simd_level};
pub use error::{LiuError, LiuResult};
