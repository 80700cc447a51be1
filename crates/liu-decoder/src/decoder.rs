//! 解码流水线编排器.
//!
//! [`Decoder`] 把解码单元依次交给解析阶段, 把解析完成的图像作为重建任务图
//! 提交给调度器, 在重建实例交还图像时完成收尾, 并按输出规则交出图像.
//!
//! 解码流程:
//! 1. 调用 `decode()` 送入一个单元, 可能得到一幅输出图像
//! 2. 码流结束后反复调用 `flush()` 直到返回 `None`
//! 3. `flush()` 返回 `None` 后解析状态已重置, 可以继续送入新的码流

use std::sync::Arc;
use std::time::Duration;

use liu_core::{DecoderConfig, LiuError, LiuResult};
use liu_sched::{PoolOptions, ThreadPool};
use log::{Level, debug, info, log, warn};

use crate::buffer_pool::CtuStatePool;
use crate::kernels::{self, SampleKernels};
use crate::pic_list::PicListManager;
use crate::parse_stage::ParseStage;
use crate::picture::Picture;
use crate::recon::{
    ReconInstance, ReconParam, Reconstructor, tasks_per_picture, wait_for_picture,
};
use crate::syntax::SyntaxReader;
use crate::trace::{DecodeTrace, NoopTrace, TraceEvent};
use crate::unit::DecodeUnit;

/// 解码器构建器
pub struct DecoderBuilder {
    config: DecoderConfig,
    reader: Option<Box<dyn SyntaxReader>>,
    reconstructor: Option<Arc<dyn Reconstructor>>,
    trace: Arc<dyn DecodeTrace>,
    kernels: Option<&'static dyn SampleKernels>,
    finish_log_level: Level,
}

impl DecoderBuilder {
    /// 以给定配置开始构建
    pub fn new(config: DecoderConfig) -> Self {
        Self {
            config,
            reader: None,
            reconstructor: None,
            trace: Arc::new(NoopTrace),
            kernels: None,
            finish_log_level: Level::Info,
        }
    }

    /// 高层语法读取器 (必需)
    pub fn reader(mut self, reader: impl SyntaxReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// 重建协作者 (必需)
    pub fn reconstructor(mut self, reconstructor: Arc<dyn Reconstructor>) -> Self {
        self.reconstructor = Some(reconstructor);
        self
    }

    /// 观测接口, 默认不记录
    pub fn trace(mut self, trace: Arc<dyn DecodeTrace>) -> Self {
        self.trace = trace;
        self
    }

    /// 指定样本内核, 默认按 CPU 能力选定
    pub fn kernels(mut self, kernels: &'static dyn SampleKernels) -> Self {
        self.kernels = Some(kernels);
        self
    }

    /// 图像收尾日志的级别
    pub fn finish_log_level(mut self, level: Level) -> Self {
        self.finish_log_level = level;
        self
    }

    /// 创建解码器并启动工作线程
    pub fn build(self) -> LiuResult<Decoder> {
        self.config.validate()?;
        let reader = self
            .reader
            .ok_or_else(|| LiuError::InvalidArgument("缺少语法读取器".into()))?;
        let reconstructor = self
            .reconstructor
            .ok_or_else(|| LiuError::InvalidArgument("缺少重建协作者".into()))?;
        let kernels = self.kernels.unwrap_or_else(kernels::active);

        let threads = self.config.effective_threads();
        let parse_delay = self.config.effective_parse_delay();
        let num_instances = self.config.recon_instances();

        let pool = ThreadPool::new(PoolOptions {
            num_threads: threads,
            capacity: self.config.task_slots,
            busy_wait: Duration::from_micros(self.config.busy_wait_us),
            thread_name: self.config.thread_name.clone(),
        })?;
        let ctu_pool = CtuStatePool::new(num_instances);
        let instances = (0..num_instances)
            .map(|id| ReconInstance::new(id, ctu_pool.clone()))
            .collect();

        let capabilities = format!(
            "THREADS={threads}; PARSE_DELAY={parse_delay}; SIMD={}",
            kernels.level()
        );
        info!("[{capabilities}]");
        self.trace.init();

        Ok(Decoder {
            max_temporal_layer: self.config.temporal_layer_limit(),
            check_picture_hash: self.config.check_picture_hash,
            pool,
            parser: ParseStage::new(reader, kernels, parse_delay),
            pic_list: PicListManager::new(parse_delay, num_instances),
            instances,
            next_instance: 0,
            reconstructor,
            trace: self.trace,
            kernels,
            finish_log_level: self.finish_log_level,
            check_missing_output: false,
            checksum_errors: 0,
            capabilities,
            closed: false,
        })
    }
}

/// 解码流水线
pub struct Decoder {
    max_temporal_layer: Option<u8>,
    check_picture_hash: bool,
    pool: ThreadPool<ReconParam>,
    parser: ParseStage,
    pic_list: PicListManager,
    instances: Vec<ReconInstance>,
    next_instance: usize,
    reconstructor: Arc<dyn Reconstructor>,
    trace: Arc<dyn DecodeTrace>,
    kernels: &'static dyn SampleKernels,
    finish_log_level: Level,
    check_missing_output: bool,
    checksum_errors: usize,
    capabilities: String,
    closed: bool,
}

impl Decoder {
    /// 开始构建解码器
    pub fn builder(config: DecoderConfig) -> DecoderBuilder {
        DecoderBuilder::new(config)
    }

    /// 能力描述, 例如 `THREADS=4; PARSE_DELAY=4; SIMD=AVX2`
    pub fn capabilities(&self) -> &str {
        &self.capabilities
    }

    /// 图像哈希校验失败的次数
    pub fn checksum_errors(&self) -> usize {
        self.checksum_errors
    }

    /// 图像列表中的在途图像数
    pub fn pictures_in_flight(&self) -> usize {
        self.pic_list.len()
    }

    /// 图像列表容量上限
    pub fn max_pictures(&self) -> usize {
        self.pic_list.max_pics()
    }

    /// 送入一个解码单元
    ///
    /// 返回按输出顺序可以交出的下一幅图像. 损坏的单元只记录警告.
    pub fn decode(&mut self, unit: &DecodeUnit) -> LiuResult<Option<Arc<Picture>>> {
        self.ensure_open()?;
        let header = match unit.header() {
            Ok(header) => header,
            Err(err) => {
                warn!("单元头解析失败 (偏移 {}), 已丢弃: {err}", unit.pos);
                return Ok(None);
            }
        };
        if self
            .max_temporal_layer
            .is_some_and(|max| header.temporal_id > max)
        {
            return Ok(None);
        }

        if let Some(pic) = self.parser.parse_unit(&header, unit, &mut self.pic_list) {
            self.decompress_picture(pic)?;
        }

        if !self.parser.parsed_new_picture() {
            return Ok(None);
        }
        let out = self.get_next_output_pic(false)?;
        if out.is_some() {
            self.check_missing_output = true;
        } else if self.check_missing_output {
            warn!("缺少输出图像");
        }
        Ok(out)
    }

    /// 排空流水线
    ///
    /// 每次调用最多交出一幅图像; 返回 `None` 时所有图像都已交出,
    /// 解析状态已重置.
    pub fn flush(&mut self) -> LiuResult<Option<Arc<Picture>>> {
        self.ensure_open()?;
        while let Some(pic) = self.parser.next_parsed_picture() {
            self.decompress_picture(pic)?;
            if let Some(out) = self.get_next_output_pic(false)? {
                return Ok(Some(out));
            }
        }

        // 先尝试不等待重建
        if let Some(out) = self.get_next_output_pic(false)? {
            return Ok(Some(out));
        }
        if let Some(out) = self.get_next_output_pic(true)? {
            return Ok(Some(out));
        }

        self.parser.reset();
        self.pic_list.clear_reference_marks();
        self.pic_list.apply_done_reference_picture_marking();
        self.check_missing_output = false;
        debug!("刷新完成, 剩余 {} 幅图像", self.pic_list.len());
        Ok(None)
    }

    /// 关闭工作线程, 之后的调用返回 [`LiuError::Closed`]
    pub fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pool.shutdown(true);
        self.trace.shutdown();
        debug!("解码器已关闭");
    }

    fn ensure_open(&self) -> LiuResult<()> {
        if self.closed {
            Err(LiuError::Closed)
        } else {
            Ok(())
        }
    }

    fn decompress_picture(&mut self, mut pic: Arc<Picture>) -> LiuResult<()> {
        let idx = self.next_instance;
        self.next_instance = (idx + 1) % self.instances.len();

        while pic.was_lost() {
            if let Some(done) =
                self.instances[idx].wait_for_prev_decompressed_pic(&self.pool, self.trace.as_ref())?
            {
                self.finish_picture(&done);
            }

            let source = self.parser.lost_picture_source(&pic);
            if let Some(source) = &source {
                wait_for_picture(&self.pool, source)?;
            }
            self.trace.on_event(TraceEvent::LostPicture { poc: pic.poc() });
            self.parser.recreate_lost_picture(&pic, source.as_deref());
            self.finish_picture(&pic);

            match self.parser.next_parsed_picture() {
                Some(next) => pic = next,
                None => {
                    warn!("丢失图像 POC {} 已填充, 但后面没有可解码的图像", pic.poc());
                    return Ok(());
                }
            }
        }

        self.check_task_capacity(&pic)?;
        let done =
            self.instances[idx].wait_for_prev_decompressed_pic(&self.pool, self.trace.as_ref())?;
        self.instances[idx].decompress_picture(&self.pool, pic, &self.reconstructor, &self.trace);
        if let Some(done) = done {
            self.finish_picture(&done);
        }
        Ok(())
    }

    /// 一幅图像的全部任务必须能同时放进任务环, 否则波前依赖无法前进
    fn check_task_capacity(&self, pic: &Picture) -> LiuResult<()> {
        let tasks = tasks_per_picture(pic.buffer.num_ctus());
        if tasks > self.pool.capacity() {
            return Err(LiuError::InvalidArgument(format!(
                "task_slots={} 小于 POC {} 的任务数 {tasks} ({}x{} CTU)",
                self.pool.capacity(),
                pic.poc(),
                pic.buffer.width_ctus(),
                pic.buffer.height_ctus()
            )));
        }
        Ok(())
    }

    fn finish_picture(&mut self, pic: &Picture) {
        log!(self.finish_log_level, "{}", pic.log_line());
        pic.mark_finished();
        pic.release_references();
        self.pic_list.apply_done_reference_picture_marking();

        if self.check_picture_hash && !pic.was_lost() {
            self.check_picture_hash(pic);
        }
        self.trace.on_event(TraceEvent::PictureFinish { poc: pic.poc() });
    }

    fn check_picture_hash(&mut self, pic: &Picture) {
        assert!(pic.is_reconstructed(), "POC {} 尚未重建就校验哈希", pic.poc());
        let Some(expected) = pic.picture_hash() else {
            warn!("POC {} 缺少图像哈希", pic.poc());
            return;
        };
        let actual = pic.checksum(self.kernels);
        if actual == expected {
            debug!("POC {} 哈希一致: {actual:08x}", pic.poc());
        } else {
            self.checksum_errors += 1;
            warn!(
                "POC {} 哈希不一致: 期望 {expected:08x}, 实际 {actual:08x}",
                pic.poc()
            );
        }
    }

    fn get_next_output_pic(&mut self, flush: bool) -> LiuResult<Option<Arc<Picture>>> {
        if flush {
            let mut done = Vec::new();
            for instance in &mut self.instances {
                if let Some(pic) =
                    instance.wait_for_prev_decompressed_pic(&self.pool, self.trace.as_ref())?
                {
                    done.push(pic);
                }
            }
            done.sort_by_key(|pic| pic.decode_index());
            for pic in &done {
                self.finish_picture(pic);
            }
        }

        let Some(front) = self.pic_list.front_pic() else {
            return Ok(None);
        };
        let (num_reorder, max_dec) = front.seq().output_limits(self.max_temporal_layer);
        Ok(self.pic_list.get_next_output_pic(num_reorder, max_dec, flush))
    }
}

impl Drop for Decoder {
    fn drop(&mut self) {
        self.shutdown();
    }
}
