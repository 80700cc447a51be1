//! CPU 能力检测.
//!
//! 进程启动后只检测一次, 结果在整个进程生命周期内不变.
//! 检测结果只影响数值内核的选择, 与调度正确性无关.

use std::fmt;
use std::sync::OnceLock;

/// SIMD 能力等级, 按从低到高排序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SimdLevel {
    /// 纯标量
    #[default]
    Scalar,
    /// SSE4.1
    Sse41,
    /// AVX2
    Avx2,
}

impl SimdLevel {
    /// 等级名称
    pub fn name(&self) -> &'static str {
        match self {
            Self::Scalar => "SCALAR",
            Self::Sse41 => "SSE41",
            Self::Avx2 => "AVX2",
        }
    }
}

impl fmt::Display for SimdLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static DETECTED: OnceLock<SimdLevel> = OnceLock::new();

/// 检测当前 CPU 支持的最高 SIMD 等级 (缓存结果)
pub fn detect_simd_level() -> SimdLevel {
    *DETECTED.get_or_init(query_cpu)
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn query_cpu() -> SimdLevel {
    if std::arch::is_x86_feature_detected!("avx2") {
        SimdLevel::Avx2
    } else if std::arch::is_x86_feature_detected!("sse4.1") {
        SimdLevel::Sse41
    } else {
        SimdLevel::Scalar
    }
}

#[cfg(not(any(target_arch = "x86", target_arch = "x86_64")))]
fn query_cpu() -> SimdLevel {
    SimdLevel::Scalar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_is_stable() {
        let first = detect_simd_level();
        let second = detect_simd_level();
        assert_eq!(first, second, "能力检测结果在进程内不应变化");
    }

    #[test]
    fn test_level_order() {
        assert!(SimdLevel::Scalar < SimdLevel::Sse41);
        assert!(SimdLevel::Sse41 < SimdLevel::Avx2);
        assert_eq!(SimdLevel::Avx2.to_string(), "AVX2");
    }
}
