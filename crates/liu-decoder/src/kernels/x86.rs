//! x86 内核变体.
//!
//! 与标量实现共享函数体, 只在启用对应目标特性的函数中实例化,
//! 让编译器为 SSE4.1 / AVX2 生成向量化代码.

use liu_core::SimdLevel;

use super::{SampleKernels, scalar};

macro_rules! x86_kernels {
    ($name:ident, $level:expr, $feature:tt, $module:ident) => {
        mod $module {
            use super::scalar;

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn copy_block(dst: &mut [u16], src: &[u16]) {
                scalar::copy_block(dst, src);
            }

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn fill_block(dst: &mut [u16], value: u16) {
                scalar::fill_block(dst, value);
            }

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn average_block(dst: &mut [u16], a: &[u16], b: &[u16]) {
                scalar::average_block(dst, a, b);
            }

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn add_residual_clip(dst: &mut [u16], residual: &[i16], bit_depth: u8) {
                scalar::add_residual_clip(dst, residual, bit_depth);
            }

            #[target_feature(enable = $feature)]
            pub(super) unsafe fn checksum(plane: &[u16], width: usize, bit_depth: u8) -> u32 {
                scalar::checksum(plane, width, bit_depth)
            }
        }

        /// 只能在 CPU 支持对应特性时构造, 见 [`super::for_level`]
        #[derive(Debug)]
        pub struct $name {
            _detected: (),
        }

        impl $name {
            /// 运行时检测到特性后才返回实例
            pub fn new() -> Option<Self> {
                std::arch::is_x86_feature_detected!($feature).then_some(Self { _detected: () })
            }
        }

        impl SampleKernels for $name {
            fn level(&self) -> SimdLevel {
                $level
            }

            fn copy_block(&self, dst: &mut [u16], src: &[u16]) {
                // SAFETY: 实例只在检测到特性后构造.
                unsafe { $module::copy_block(dst, src) }
            }

            fn fill_block(&self, dst: &mut [u16], value: u16) {
                // SAFETY: 同上.
                unsafe { $module::fill_block(dst, value) }
            }

            fn average_block(&self, dst: &mut [u16], a: &[u16], b: &[u16]) {
                // SAFETY: 同上.
                unsafe { $module::average_block(dst, a, b) }
            }

            fn add_residual_clip(&self, dst: &mut [u16], residual: &[i16], bit_depth: u8) {
                // SAFETY: 同上.
                unsafe { $module::add_residual_clip(dst, residual, bit_depth) }
            }

            fn checksum(&self, plane: &[u16], width: usize, bit_depth: u8) -> u32 {
                // SAFETY: 同上.
                unsafe { $module::checksum(plane, width, bit_depth) }
            }
        }
    };
}

x86_kernels!(Sse41Kernels, SimdLevel::Sse41, "sse4.1", sse41);
x86_kernels!(Avx2Kernels, SimdLevel::Avx2, "avx2", avx2);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernels::ScalarKernels;

    fn check_matches_scalar(kernels: &dyn SampleKernels) {
        let scalar = ScalarKernels;
        let a: Vec<u16> = (0..67).map(|i| (i * 37 % 1024) as u16).collect();
        let b: Vec<u16> = (0..67).map(|i| (i * 91 % 1024) as u16).collect();
        let residual: Vec<i16> = (0..67).map(|i| (i as i16 - 33) * 9).collect();

        let mut expect = vec![0u16; 67];
        let mut actual = vec![0u16; 67];
        scalar.average_block(&mut expect, &a, &b);
        kernels.average_block(&mut actual, &a, &b);
        assert_eq!(expect, actual);

        scalar.add_residual_clip(&mut expect, &residual, 10);
        kernels.add_residual_clip(&mut actual, &residual, 10);
        assert_eq!(expect, actual);

        assert_eq!(scalar.checksum(&expect, 7, 10), kernels.checksum(&actual, 7, 10));
    }

    #[test]
    fn test_x86_variants_match_scalar() {
        if let Some(kernels) = Sse41Kernels::new() {
            check_matches_scalar(&kernels);
        }
        if let Some(kernels) = Avx2Kernels::new() {
            check_matches_scalar(&kernels);
        }
    }
}
