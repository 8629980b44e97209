// 该文件是 Kanjian （看见） 项目的一部分。
// src/input.rs - 帧输入
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

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use thiserror::Error;
use tracing::trace;
use url::Url;

use crate::{
  FromUrl,
  frame::{Frame, FrameError, Rotation},
};

#[cfg(feature = "read_image_file")]
mod read_image_file;
#[cfg(feature = "read_image_file")]
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[cfg(feature = "raw_plane_file")]
mod raw_plane_file;
#[cfg(feature = "raw_plane_file")]
pub use self::raw_plane_file::{RawPlaneFileInput, RawPlaneFileInputError};

#[derive(Error, Debug)]
pub enum InputError {
  #[cfg(feature = "read_image_file")]
  #[error("图像文件输入错误: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "raw_plane_file")]
  #[error("原始平面文件输入错误: {0}")]
  RawPlaneFileInputError(#[from] RawPlaneFileInputError),
  #[error("不支持的输入方案: {0}")]
  SchemeMismatch(String),
}

/// 输入 URL 公共查询参数的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceOptionError {
  #[error("查询参数无效: {0}={1}")]
  InvalidQuery(&'static str, String),
  #[error("{0}")]
  UnsupportedRotation(#[from] FrameError),
}

/// 输入 URL 上的公共查询参数：`rotation` 与 `repeat`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
  pub rotation: Rotation,
  pub repeat: usize,
}

impl Default for SourceOptions {
  fn default() -> Self {
    Self {
      rotation: Rotation::Deg0,
      repeat: 1,
    }
  }
}

impl SourceOptions {
  pub fn from_url(url: &Url) -> Result<Self, SourceOptionError> {
    let mut options = Self::default();
    if let Some(value) = crate::query_value(url, "rotation") {
      let degrees = value
        .parse::<u32>()
        .map_err(|_| SourceOptionError::InvalidQuery("rotation", value))?;
      options.rotation = Rotation::try_from(degrees)?;
    }
    if let Some(value) = crate::query_value(url, "repeat") {
      options.repeat = value
        .parse::<usize>()
        .map_err(|_| SourceOptionError::InvalidQuery("repeat", value))?;
    }
    Ok(options)
  }
}

/// 已交付但尚未释放的帧计数
#[derive(Debug, Clone, Default)]
pub struct ReleaseCounter {
  released: Arc<AtomicU64>,
}

impl ReleaseCounter {
  pub fn released(&self) -> u64 {
    self.released.load(Ordering::SeqCst)
  }

  pub(crate) fn attach(&self, frame: Frame, index: u64) -> Frame {
    let released = self.released.clone();
    frame.with_release(move || {
      released.fetch_add(1, Ordering::SeqCst);
      trace!("第 {} 帧已释放", index);
    })
  }
}

pub enum InputWrapper {
  #[cfg(feature = "read_image_file")]
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "raw_plane_file")]
  RawPlaneFile(RawPlaneFileInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    #[cfg(feature = "read_image_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == ImageFileInput::SCHEME {
        let input = ImageFileInput::from_url(url)?;
        return Ok(InputWrapper::ReadImageFile(input));
      }
    }
    #[cfg(feature = "raw_plane_file")]
    {
      use crate::FromUrlWithScheme;

      if url.scheme() == RawPlaneFileInput::SCHEME {
        let input = RawPlaneFileInput::from_url(url)?;
        return Ok(InputWrapper::RawPlaneFile(input));
      }
    }

    Err(InputError::SchemeMismatch(url.scheme().to_string()))
  }
}

impl InputWrapper {
  pub fn release_counter(&self) -> ReleaseCounter {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.release_counter(),
      #[cfg(feature = "raw_plane_file")]
      InputWrapper::RawPlaneFile(input) => input.release_counter(),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      #[cfg(feature = "read_image_file")]
      InputWrapper::ReadImageFile(input) => input.next(),
      #[cfg(feature = "raw_plane_file")]
      InputWrapper::RawPlaneFile(input) => input.next(),
    }
  }
}
