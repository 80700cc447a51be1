//! 样本处理内核.
//!
//! 所有内核实现同一个 [`SampleKernels`] 接口. 进程内第一次调用 [`active`] 时
//! 按检测到的 CPU 能力选定一个实现, 之后不再改变.
//! 内核选择只影响速度, 各实现的输出逐位相同.

mod scalar;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86;

use std::sync::OnceLock;

use liu_core::{SimdLevel, detect_simd_level};
use log::debug;

pub use scalar::ScalarKernels;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86::{Avx2Kernels, Sse41Kernels};

/// 样本块运算接口
///
/// 块以连续切片表示, 长度不一致时按较短的一方处理.
pub trait SampleKernels: Send + Sync {
    /// 实现对应的能力等级
    fn level(&self) -> SimdLevel;

    /// 复制样本块
    fn copy_block(&self, dst: &mut [u16], src: &[u16]);

    /// 用常量填充样本块
    fn fill_block(&self, dst: &mut [u16], value: u16);

    /// 两个块的四舍五入平均
    fn average_block(&self, dst: &mut [u16], a: &[u16], b: &[u16]);

    /// 叠加残差并裁剪到位深范围
    fn add_residual_clip(&self, dst: &mut [u16], residual: &[i16], bit_depth: u8);

    /// 计算平面校验和, `width` 为行宽
    fn checksum(&self, plane: &[u16], width: usize, bit_depth: u8) -> u32;
}

static ACTIVE: OnceLock<&'static dyn SampleKernels> = OnceLock::new();

/// 进程内选定的内核实现
pub fn active() -> &'static dyn SampleKernels {
    *ACTIVE.get_or_init(|| {
        let kernels = for_level(detect_simd_level());
        debug!("样本内核已选定: {}", kernels.level());
        kernels
    })
}

/// 取不高于 `level` 的最佳可用实现
pub fn for_level(level: SimdLevel) -> &'static dyn SampleKernels {
    static SCALAR: ScalarKernels = ScalarKernels;

    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        static AVX2: OnceLock<Option<Avx2Kernels>> = OnceLock::new();
        static SSE41: OnceLock<Option<Sse41Kernels>> = OnceLock::new();

        if level >= SimdLevel::Avx2 {
            if let Some(kernels) = AVX2.get_or_init(Avx2Kernels::new) {
                return kernels;
            }
        }
        if level >= SimdLevel::Sse41 {
            if let Some(kernels) = SSE41.get_or_init(Sse41Kernels::new) {
                return kernels;
            }
        }
    }

    let _ = level;
    &SCALAR
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_is_stable() {
        let first = active().level();
        assert_eq!(first, active().level(), "内核选择在进程内不应变化");
        assert!(first <= detect_simd_level());
    }

    #[test]
    fn test_scalar_level_always_available() {
        assert_eq!(for_level(SimdLevel::Scalar).level(), SimdLevel::Scalar);
    }

    #[test]
    fn test_copy_and_fill() {
        let kernels = active();
        let mut dst = [0u16; 4];
        kernels.fill_block(&mut dst, 512);
        assert_eq!(dst, [512; 4]);
        kernels.copy_block(&mut dst[..2], &[1, 2, 3]);
        assert_eq!(dst, [1, 2, 512, 512], "长度不一致时按较短的一方处理");
    }
}
