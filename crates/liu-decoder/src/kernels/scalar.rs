//! 标量内核实现.
//!
//! 这里的函数体也是 x86 变体的实现基础: x86 变体在启用目标特性的上下文中
//! 内联这些函数, 由编译器自动向量化.

use liu_core::SimdLevel;

use super::SampleKernels;

#[inline(always)]
pub(crate) fn copy_block(dst: &mut [u16], src: &[u16]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d = *s;
    }
}

#[inline(always)]
pub(crate) fn fill_block(dst: &mut [u16], value: u16) {
    for d in dst.iter_mut() {
        *d = value;
    }
}

#[inline(always)]
pub(crate) fn average_block(dst: &mut [u16], a: &[u16], b: &[u16]) {
    for ((d, x), y) in dst.iter_mut().zip(a).zip(b) {
        *d = ((u32::from(*x) + u32::from(*y) + 1) >> 1) as u16;
    }
}

#[inline(always)]
pub(crate) fn add_residual_clip(dst: &mut [u16], residual: &[i16], bit_depth: u8) {
    let max = (1i32 << bit_depth) - 1;
    for (d, r) in dst.iter_mut().zip(residual) {
        *d = (i32::from(*d) + i32::from(*r)).clamp(0, max) as u16;
    }
}

/// 图像校验和: 每个样本与位置相关的异或掩码混合后累加, 高位深时高字节单独累加
#[inline(always)]
pub(crate) fn checksum(plane: &[u16], width: usize, bit_depth: u8) -> u32 {
    if width == 0 {
        return 0;
    }
    let mut sum = 0u32;
    for (y, row) in plane.chunks(width).enumerate() {
        for (x, &sample) in row.iter().enumerate() {
            let xor_mask = ((x & 0xFF) ^ (y & 0xFF) ^ (x >> 8) ^ (y >> 8)) as u32;
            let sample = u32::from(sample);
            sum = sum.wrapping_add((sample & 0xFF) ^ xor_mask);
            if bit_depth > 8 {
                sum = sum.wrapping_add((sample >> 8) ^ xor_mask);
            }
        }
    }
    sum
}

/// 纯标量内核
#[derive(Debug, Default, Clone, Copy)]
pub struct ScalarKernels;

impl SampleKernels for ScalarKernels {
    fn level(&self) -> SimdLevel {
        SimdLevel::Scalar
    }

    fn copy_block(&self, dst: &mut [u16], src: &[u16]) {
        copy_block(dst, src);
    }

    fn fill_block(&self, dst: &mut [u16], value: u16) {
        fill_block(dst, value);
    }

    fn average_block(&self, dst: &mut [u16], a: &[u16], b: &[u16]) {
        average_block(dst, a, b);
    }

    fn add_residual_clip(&self, dst: &mut [u16], residual: &[i16], bit_depth: u8) {
        add_residual_clip(dst, residual, bit_depth);
    }

    fn checksum(&self, plane: &[u16], width: usize, bit_depth: u8) -> u32 {
        checksum(plane, width, bit_depth)
    }
}
