// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::{
  FromUrl, FromUrlWithScheme,
  geometry::Detection,
  output::Render,
  overlay::DisplayFrame,
  pipeline::FrameReport,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct BoxRecord<'a> {
  class_id: usize,
  label: &'a str,
  confidence: f32,
  bbox: [f32; 4],
}

impl<'a, S> From<&'a Detection<S>> for BoxRecord<'a> {
  fn from(detection: &'a Detection<S>) -> Self {
    Self {
      class_id: detection.class_id,
      label: &detection.label,
      confidence: detection.confidence,
      bbox: detection.bbox.edges(),
    }
  }
}

#[derive(Debug, Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  timestamp: String,
  width: u32,
  height: u32,
  rotation: u32,
  /// [x, y, width, height]
  crop: Option<[u32; 4]>,
  model_input: Option<[u32; 2]>,
  fps: f32,
  error: Option<&'a str>,
  /// 模型输入坐标
  detections: Vec<BoxRecord<'a>>,
  /// 显示坐标
  display: Vec<BoxRecord<'a>>,
}

/// 按 `年/月/日` 目录保存每帧的 JSON 记录，可选保存帧快照，
/// 例如 `folder:///data/records?always&snapshot`。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  always: bool,
  snapshot: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let snapshot = uri.query_pairs().any(|(k, _)| k == "snapshot");

    Ok(Self::new(uri.path(), always, snapshot))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>, always: bool, snapshot: bool) -> Self {
    Self {
      directory: directory.into(),
      frame_counter: Mutex::new(0),
      always,
      snapshot,
    }
  }

  /// 是否需要流水线保留转换后的帧图像
  pub fn wants_snapshot(&self) -> bool {
    self.snapshot
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_base(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn write_record(
    &self,
    base: &Path,
    now: DateTime<Utc>,
    report: &FrameReport,
    display: &DisplayFrame,
  ) -> Result<(), DirectoryRecordOutputError> {
    let record = FrameRecord {
      frame: report.frame.index,
      timestamp: now.to_rfc3339(),
      width: report.frame.width,
      height: report.frame.height,
      rotation: report.frame.rotation.degrees(),
      crop: report.crop.map(|c| [c.x, c.y, c.width, c.height]),
      model_input: report.input_size.map(|(w, h)| [w, h]),
      fps: report.fps,
      error: report.error.as_deref(),
      detections: report.detections.iter().map(BoxRecord::from).collect(),
      display: display.detections.iter().map(BoxRecord::from).collect(),
    };
    let json = base.with_extension("json");
    std::fs::write(&json, serde_json::to_vec_pretty(&record)?)?;

    if self.snapshot
      && let Some(image) = &report.snapshot
    {
      image.save(base.with_extension("png"))?;
    }

    debug!("记录第 {} 帧到 {}", report.frame.index, json.display());
    Ok(())
  }
}

impl Render<FrameReport, DisplayFrame> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &FrameReport, result: &DisplayFrame) -> Result<(), Self::Error> {
    if !self.always && frame.detections.is_empty() {
      return Ok(());
    }
    let now = Utc::now();
    let base = self.frame_base(now)?;
    self.write_record(&base, now, frame, result)
  }
}
