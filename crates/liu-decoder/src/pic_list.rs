//! 图像列表管理.
//!
//! 持有所有在途图像 (已解析、重建中、已重建、仍被参考、等待输出),
//! 决定下一幅输出图像, 并维护解码图像缓冲 (DPB) 的参考标记.
//!
//! 输出规则: 候选为所有等待输出图像中输出键 `(clvs, poc)` 最小的一幅.
//! 非刷新模式下, 只有已收尾的等待输出图像数超过重排序深度,
//! 或已收尾的 DPB 占用超过缓冲上限时才输出, 且候选必须已收尾.
//! 收尾按解码顺序进行, 已收尾图像总是解码顺序的前缀,
//! 所以按码流重排序约束, 触发输出时最小候选一定已经收尾.

use std::sync::Arc;

use log::{debug, trace};

use crate::picture::Picture;
use crate::syntax::SeqParams;

/// 图像列表管理器
pub struct PicListManager {
    pics: Vec<Arc<Picture>>,
    parse_delay: usize,
    instances: usize,
    max_pics: usize,
}

impl PicListManager {
    /// 创建管理器
    pub fn new(parse_delay: usize, instances: usize) -> Self {
        Self {
            pics: Vec::new(),
            parse_delay,
            instances,
            max_pics: 0,
        }
    }

    /// 按序列参数更新列表容量上限
    ///
    /// 上限 = 2 × 最大缓冲 + 解析延迟 + 重建实例数 + 1:
    /// DPB 中的参考图像与等待输出图像、解析超前队列、重建中的图像以及当前图像.
    pub fn set_seq_params(&mut self, seq: &SeqParams) {
        let max_dec = seq
            .max_dec_pic_buffering
            .iter()
            .take(usize::from(seq.max_sub_layers.max(1)))
            .copied()
            .max()
            .unwrap_or(1) as usize;
        self.max_pics = 2 * max_dec + self.parse_delay + self.instances + 1;
        debug!("图像列表上限: {}", self.max_pics);
    }

    /// 列表容量上限
    pub fn max_pics(&self) -> usize {
        self.max_pics
    }

    /// 加入新图像, 超出上限属于结构性错误
    pub fn insert(&mut self, pic: Arc<Picture>) {
        assert!(
            self.pics.len() < self.max_pics,
            "图像列表超出上限 {} (POC {})",
            self.max_pics,
            pic.poc()
        );
        self.pics.push(pic);
    }

    /// 在途图像个数
    pub fn len(&self) -> usize {
        self.pics.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.pics.is_empty()
    }

    /// 最早加入的图像
    pub fn front_pic(&self) -> Option<&Arc<Picture>> {
        self.pics.first()
    }

    /// 遍历在途图像
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Picture>> {
        self.pics.iter()
    }

    /// 在当前 CLVS 的参考图像中按 POC 查找
    pub fn find_reference(&self, clvs: u32, layer_id: u8, poc: i32) -> Option<&Arc<Picture>> {
        self.pics.iter().find(|p| {
            p.clvs() == clvs && p.layer_id() == layer_id && p.poc() == poc && p.dpb_reference_mark()
        })
    }

    /// 取下一幅输出图像
    ///
    /// `flush` 为 `true` 时不检查重排序与缓冲约束, 按输出键依次排空.
    pub fn get_next_output_pic(
        &mut self,
        num_reorder_pics: u32,
        max_dec_pic_buffering: u32,
        flush: bool,
    ) -> Option<Arc<Picture>> {
        let candidate = self
            .pics
            .iter()
            .filter(|p| p.is_needed_for_output())
            .min_by_key(|p| p.output_key())?;
        if !candidate.is_finished() {
            return None;
        }

        if !flush {
            let mut not_displayed = 0u32;
            let mut fullness = 0u32;
            for pic in self.pics.iter().filter(|p| p.is_finished()) {
                if pic.is_needed_for_output() {
                    not_displayed += 1;
                }
                if pic.is_needed_for_output() || pic.is_referenced() {
                    fullness += 1;
                }
            }
            if not_displayed <= num_reorder_pics && fullness <= max_dec_pic_buffering {
                return None;
            }
        }

        let out = Arc::clone(candidate);
        assert!(out.done.is_open(), "输出图像 POC {} 尚未重建完成", out.poc());
        out.set_needed_for_output(false);
        trace!("输出 POC {} (clvs {})", out.poc(), out.clvs());
        self.evict_unused();
        Some(out)
    }

    /// 收尾后的参考标记
    ///
    /// 参考图像集已不再标记、且没有任何尚未重建的图像参考它的图像, 清除 `referenced`.
    pub fn apply_done_reference_picture_marking(&mut self) {
        for pic in &self.pics {
            if !pic.is_referenced() || pic.dpb_reference_mark() {
                continue;
            }
            let still_needed = self
                .pics
                .iter()
                .any(|other| !other.is_reconstructed() && other.refers_to(pic));
            if !still_needed {
                pic.set_referenced(false);
            }
        }
        self.evict_unused();
    }

    /// 移除已收尾、不再参考且不再等待输出的图像
    pub fn evict_unused(&mut self) {
        self.pics.retain(|p| !p.is_finished() || p.is_referenced() || p.is_needed_for_output());
    }

    /// 清空参考图像集标记 (新 CLVS 开始)
    pub fn clear_reference_marks(&mut self) {
        for pic in &self.pics {
            pic.set_dpb_reference_mark(false);
        }
    }

    /// 清空列表
    pub fn clear(&mut self) {
        self.pics.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::picture::tests::{desc, test_seq};

    fn finished_pic(poc: i32, decode_index: u64) -> Arc<Picture> {
        let pic = Arc::new(Picture::new(
            desc(poc, decode_index),
            test_seq(),
            [Vec::new(), Vec::new()],
            true,
        ));
        pic.mark_reconstructed();
        pic.done.open();
        pic.mark_finished();
        pic
    }

    fn manager() -> PicListManager {
        let mut list = PicListManager::new(0, 1);
        list.set_seq_params(&test_seq());
        list
    }

    #[test]
    fn test_reorder_depth_gates_output() {
        let mut list = manager();
        list.insert(finished_pic(4, 0));
        assert!(list.get_next_output_pic(1, 16, false).is_none(), "一幅图像不超过重排序深度 1");
        list.insert(finished_pic(2, 1));
        let out = list.get_next_output_pic(1, 16, false).expect("应输出");
        assert_eq!(out.poc(), 2, "应输出最小 POC");
        assert!(!out.is_needed_for_output());
    }

    #[test]
    fn test_flush_drains_in_order() {
        let mut list = manager();
        for (i, poc) in [8, 4, 2, 6].into_iter().enumerate() {
            list.insert(finished_pic(poc, i as u64));
        }
        let mut order = Vec::new();
        while let Some(pic) = list.get_next_output_pic(16, 16, true) {
            order.push(pic.poc());
        }
        assert_eq!(order, vec![2, 4, 6, 8]);
    }

    #[test]
    fn test_unfinished_candidate_blocks_output() {
        let mut list = manager();
        list.insert(finished_pic(4, 0));
        list.insert(finished_pic(6, 1));
        let pending = Arc::new(Picture::new(
            desc(2, 2),
            test_seq(),
            [Vec::new(), Vec::new()],
            true,
        ));
        list.insert(Arc::clone(&pending));
        assert!(
            list.get_next_output_pic(0, 16, false).is_none(),
            "更小 POC 尚未收尾时不能越过它输出"
        );
    }

    #[test]
    fn test_dpb_fullness_forces_output() {
        let mut list = manager();
        list.insert(finished_pic(0, 0));
        list.insert(finished_pic(1, 1));
        list.insert(finished_pic(2, 2));
        let out = list.get_next_output_pic(8, 2, false).expect("缓冲已满应输出");
        assert_eq!(out.poc(), 0);
    }

    #[test]
    fn test_reference_marking_waits_for_readers() {
        let mut list = manager();
        let base = finished_pic(0, 0);
        list.insert(Arc::clone(&base));
        let reader = Arc::new(Picture::new(
            desc(1, 1),
            test_seq(),
            [vec![Arc::clone(&base)], Vec::new()],
            true,
        ));
        list.insert(Arc::clone(&reader));

        base.set_dpb_reference_mark(false);
        list.apply_done_reference_picture_marking();
        assert!(base.is_referenced(), "尚未重建的图像仍在参考它");

        reader.mark_reconstructed();
        list.apply_done_reference_picture_marking();
        assert!(!base.is_referenced());
        assert_eq!(list.len(), 2, "仍等待输出的图像不能被移除");

        base.set_needed_for_output(false);
        list.evict_unused();
        assert_eq!(list.len(), 1);
    }

    #[test]
    #[should_panic(expected = "图像列表超出上限")]
    fn test_list_bound_is_asserted() {
        let mut list = manager();
        for i in 0..=list.max_pics() {
            list.insert(finished_pic(i as i32, i as u64));
        }
    }
}
