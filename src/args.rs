// 该文件是 Kanjian （看见） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use kanjian::{config::PipelineConfig, overlay::ViewSize};
use url::Url;

/// Kanjian 检测叠加层
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型，例如 yolo:///models/yolov8n.onnx?labels=/models/coco.txt
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 输入来源
  /// - 图片: image:///photo.jpg?rotation=90&repeat=10
  /// - NV21 转储: nv21:///dump.yuv?width=1920&height=1080&rotation=90
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,

  /// 输出
  /// - 叠加层图像: image:///tmp/overlay.png?font=/path/to/font.ttf
  /// - 目录记录: folder:///records?always&snapshot
  /// - 日志: log:
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  /// TOML 配置文件
  #[arg(long, value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// 置信度阈值，覆盖配置文件
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<f32>,

  /// NMS IoU 阈值，覆盖配置文件
  #[arg(long = "iou", value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 每帧最多保留的检测数
  #[arg(long, value_name = "COUNT")]
  pub max_detections: Option<usize>,

  /// 显示视图尺寸
  #[arg(long, value_name = "WxH", default_value = "1080x1920")]
  pub view: ViewSize,

  /// 读取指定帧数后停止，0 表示不限制
  #[arg(long, value_name = "FRAME_NUMBER", default_value_t = 0)]
  pub frame_number: usize,

  /// 输入帧间隔（毫秒），模拟相机帧率
  #[arg(long, value_name = "MILLIS")]
  pub frame_interval: Option<u64>,
}

impl Args {
  /// 命令行参数覆盖配置文件
  pub fn apply_overrides(&self, config: &mut PipelineConfig) {
    if let Some(confidence) = self.confidence {
      config.confidence_threshold = confidence;
    }
    if let Some(iou) = self.iou_threshold {
      config.iou_threshold = iou;
    }
    if self.max_detections.is_some() {
      config.max_detections = self.max_detections;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn flags_override_config() {
    let args = Args::parse_from([
      "kanjian",
      "--model",
      "yolo:///m.onnx",
      "--input",
      "image:///a.png",
      "--output",
      "log:",
      "--iou",
      "0.6",
      "--view",
      "720x1280",
    ]);
    let mut config = PipelineConfig::default();
    args.apply_overrides(&mut config);
    assert_eq!(config.iou_threshold, 0.6);
    assert_eq!(config.confidence_threshold, PipelineConfig::default().confidence_threshold);
    assert_eq!(args.view, ViewSize::new(720, 1280));
    assert_eq!(args.frame_number, 0);
  }
}
