// 该文件是 Kanjian （看见） 项目的一部分。
// src/config.rs - 流水线配置
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::model::{OutputDecoder, Suppressor};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] toml::de::Error),
  #[error("配置项无效: {0}")]
  Invalid(String),
}

/// 流水线参数，可由 TOML 文件提供，缺省项取默认值
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub max_detections: Option<usize>,
  pub fps_window_ms: u64,
  /// 在帧报告中保留转换后的 RGB 图像，供记录输出使用
  pub keep_snapshot: bool,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      confidence_threshold: OutputDecoder::DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: Suppressor::DEFAULT_IOU_THRESHOLD,
      max_detections: None,
      fps_window_ms: 1000,
      keep_snapshot: false,
    }
  }
}

impl PipelineConfig {
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: Self = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    debug!("读取配置文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&self.confidence_threshold) {
      return Err(ConfigError::Invalid(format!(
        "confidence_threshold 必须在 [0, 1] 内: {}",
        self.confidence_threshold
      )));
    }
    if !(0.0..=1.0).contains(&self.iou_threshold) {
      return Err(ConfigError::Invalid(format!(
        "iou_threshold 必须在 [0, 1] 内: {}",
        self.iou_threshold
      )));
    }
    if self.max_detections == Some(0) {
      return Err(ConfigError::Invalid("max_detections 不能为 0".to_string()));
    }
    if self.fps_window_ms == 0 {
      return Err(ConfigError::Invalid("fps_window_ms 不能为 0".to_string()));
    }
    Ok(())
  }

  pub fn fps_window(&self) -> Duration {
    Duration::from_millis(self.fps_window_ms)
  }
}
