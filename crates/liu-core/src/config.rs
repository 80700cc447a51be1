//! 解码器配置.
//!
//! 所有字段都有默认值, 可以直接从 JSON 等格式反序列化部分字段.
//! `-1` 作为哨兵值表示 "自动推导".

use serde::{Deserialize, Serialize};

use crate::error::{LiuError, LiuResult};

/// 解码器配置
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DecoderConfig {
    /// 工作线程数 (-1 = 硬件并发数, 0 = 不创建工作线程, 由调用线程驱动任务环)
    #[serde(default = "default_auto")]
    pub threads: i32,
    /// 解析超前延迟, 单位为帧 (-1 = 与线程数相同)
    #[serde(default = "default_auto")]
    pub parse_delay: i32,
    /// 任务槽环容量
    #[serde(default = "default_task_slots")]
    pub task_slots: usize,
    /// 空闲工作线程阻塞前的自旋预算 (微秒)
    #[serde(default = "default_busy_wait_us")]
    pub busy_wait_us: u64,
    /// 最高解码时域子层 (-1 = 全部子层)
    #[serde(default = "default_auto")]
    pub max_temporal_layer: i32,
    /// 工作线程名前缀
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// 是否校验码流携带的图像哈希
    #[serde(default)]
    pub check_picture_hash: bool,
}

fn default_auto() -> i32 {
    -1
}

fn default_task_slots() -> usize {
    1024
}

fn default_busy_wait_us() -> u64 {
    1000
}

fn default_thread_name() -> String {
    "DecThread".to_string()
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            threads: default_auto(),
            parse_delay: default_auto(),
            task_slots: default_task_slots(),
            busy_wait_us: default_busy_wait_us(),
            max_temporal_layer: default_auto(),
            thread_name: default_thread_name(),
            check_picture_hash: false,
        }
    }
}

impl DecoderConfig {
    /// 指定线程数和解析延迟创建配置, 其余字段取默认值
    pub fn with_threads(threads: i32, parse_delay: i32) -> Self {
        Self {
            threads,
            parse_delay,
            ..Self::default()
        }
    }

    /// 校验配置
    pub fn validate(&self) -> LiuResult<()> {
        if self.threads < -1 {
            return Err(LiuError::InvalidArgument(format!(
                "threads 不能小于 -1, 实际为 {}",
                self.threads
            )));
        }
        if self.parse_delay < -1 {
            return Err(LiuError::InvalidArgument(format!(
                "parse_delay 不能小于 -1, 实际为 {}",
                self.parse_delay
            )));
        }
        if self.task_slots == 0 {
            return Err(LiuError::InvalidArgument("task_slots 必须大于 0".into()));
        }
        if self.max_temporal_layer < -1 || self.max_temporal_layer > 6 {
            return Err(LiuError::InvalidArgument(format!(
                "max_temporal_layer 超出范围 [-1, 6]: {}",
                self.max_temporal_layer
            )));
        }
        Ok(())
    }

    /// 实际工作线程数
    pub fn effective_threads(&self) -> usize {
        if self.threads < 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.threads as usize
        }
    }

    /// 实际解析超前延迟
    pub fn effective_parse_delay(&self) -> usize {
        if self.parse_delay < 0 {
            self.effective_threads()
        } else {
            self.parse_delay as usize
        }
    }

    /// 重建实例个数, 每个实例同时只持有一帧
    pub fn recon_instances(&self) -> usize {
        self.effective_threads().max(1)
    }

    /// 最高解码子层, `None` 表示不限制
    pub fn temporal_layer_limit(&self) -> Option<u8> {
        u8::try_from(self.max_temporal_layer).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = DecoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.task_slots, 1024);
        assert_eq!(config.temporal_layer_limit(), None);
    }

    #[test]
    fn test_parse_delay_follows_threads() {
        let config = DecoderConfig::with_threads(3, -1);
        assert_eq!(config.effective_threads(), 3);
        assert_eq!(config.effective_parse_delay(), 3, "-1 时解析延迟应跟随线程数");
        assert_eq!(config.recon_instances(), 3);

        let config = DecoderConfig::with_threads(0, 2);
        assert_eq!(config.effective_parse_delay(), 2);
        assert_eq!(config.recon_instances(), 1, "无工作线程时仍需一个重建实例");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = DecoderConfig::with_threads(-2, 0);
        assert!(config.validate().is_err());

        let config = DecoderConfig {
            task_slots: 0,
            ..DecoderConfig::default()
        };
        assert!(config.validate().is_err());

        let config = DecoderConfig {
            parse_delay: -5,
            ..DecoderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{"threads": 2, "max_temporal_layer": 1}"#)
                .expect("反序列化配置失败");
        assert_eq!(config.threads, 2);
        assert_eq!(config.parse_delay, -1);
        assert_eq!(config.thread_name, "DecThread");
        assert_eq!(config.temporal_layer_limit(), Some(1));
    }
}
