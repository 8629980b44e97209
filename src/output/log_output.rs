// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::convert::Infallible;

use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{OutputError, Render},
  overlay::DisplayFrame,
  pipeline::FrameReport,
};

/// 把显示坐标下的检测结果写到日志，`log:`
#[derive(Debug, Default)]
pub struct LogOutput;

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(LogOutput)
  }
}

impl Render<FrameReport, DisplayFrame> for LogOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &FrameReport, result: &DisplayFrame) -> Result<(), Self::Error> {
    if let Some(error) = &frame.error {
      info!("第 {} 帧: 错误 {}", result.frame_index, error);
    }
    for detection in result.detections.iter() {
      info!(
        "第 {} 帧: {} {:.2} {:?}",
        result.frame_index, detection.label, detection.confidence, detection.bbox
      );
    }
    Ok(())
  }
}
