// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/raw_plane_file.rs - NV21 原始平面文件输入
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

use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelPlanes},
  input::{ReleaseCounter, SourceOptionError, SourceOptions},
};

#[derive(Error, Debug)]
pub enum RawPlaneFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("缺少参数: {0}")]
  MissingParameter(&'static str),
  #[error("参数无效: {0}={1}")]
  InvalidParameter(&'static str, String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("输入参数错误: {0}")]
  OptionError(#[from] SourceOptionError),
}

const RAW_PLANE_FILE_SCHEME: &str = "nv21";

/// 从相机转储的 NV21 数据构造帧，例如
/// `nv21:///tmp/frame.yuv?width=1920&height=1080&rotation=90`。
///
/// 平面长度不在这里校验，由帧转换在流水线中报告。
pub struct RawPlaneFileInput {
  width: u32,
  height: u32,
  data: Vec<u8>,
  options: SourceOptions,
  delivered: usize,
  releases: ReleaseCounter,
}

impl FromUrlWithScheme for RawPlaneFileInput {
  const SCHEME: &'static str = RAW_PLANE_FILE_SCHEME;
}

fn dimension(url: &Url, key: &'static str) -> Result<u32, RawPlaneFileInputError> {
  let value = crate::query_value(url, key).ok_or(RawPlaneFileInputError::MissingParameter(key))?;
  value
    .parse::<u32>()
    .map_err(|_| RawPlaneFileInputError::InvalidParameter(key, value))
}

impl FromUrl for RawPlaneFileInput {
  type Error = RawPlaneFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(RawPlaneFileInputError::SchemeMismatch);
    }

    let width = dimension(url, "width")?;
    let height = dimension(url, "height")?;
    let options = SourceOptions::from_url(url)?;
    let data = std::fs::read(url.path())?;
    info!(
      "读取 NV21 数据 {}: {}x{}, {} 字节, 旋转 {}",
      url.path(),
      width,
      height,
      data.len(),
      options.rotation
    );
    Ok(Self::new(width, height, data, options))
  }
}

impl RawPlaneFileInput {
  pub fn new(width: u32, height: u32, data: Vec<u8>, options: SourceOptions) -> Self {
    let expected = nv21_len(width, height);
    if data.len() != expected {
      warn!("NV21 数据长度为 {}, 期望 {}", data.len(), expected);
    }
    Self {
      width,
      height,
      data,
      options,
      delivered: 0,
      releases: ReleaseCounter::default(),
    }
  }

  pub fn release_counter(&self) -> ReleaseCounter {
    self.releases.clone()
  }
}

fn nv21_len(width: u32, height: u32) -> usize {
  let (w, h) = (width as usize, height as usize);
  w * h + w.div_ceil(2) * h.div_ceil(2) * 2
}

impl Iterator for RawPlaneFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.delivered >= self.options.repeat {
      return None;
    }
    self.delivered += 1;

    let luma_len = (self.width as usize * self.height as usize).min(self.data.len());
    let (y, vu) = self.data.split_at(luma_len);
    let frame = Frame::new(
      self.width,
      self.height,
      self.options.rotation,
      PixelPlanes::Nv21 {
        y: y.to_vec(),
        vu: vu.to_vec(),
      },
    );
    Some(self.releases.attach(frame, self.delivered as u64))
  }
}
