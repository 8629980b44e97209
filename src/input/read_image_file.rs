// 该文件是 Kanjian （看见） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, PixelPlanes},
  input::{ReleaseCounter, SourceOptionError, SourceOptions},
};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("输入参数错误: {0}")]
  OptionError(#[from] SourceOptionError),
}

const READ_IMAGE_FILE_SCHEME: &str = "image";

/// 把一张静态图片当作相机帧重复交付 `repeat` 次
pub struct ImageFileInput {
  image: RgbImage,
  options: SourceOptions,
  delivered: usize,
  releases: ReleaseCounter,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = READ_IMAGE_FILE_SCHEME;
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch);
    }

    let options = SourceOptions::from_url(url)?;
    let image = ImageReader::open(url.path())?.decode()?.into_rgb8();
    info!(
      "读取图像 {}: {}x{}, 旋转 {}",
      url.path(),
      image.width(),
      image.height(),
      options.rotation
    );
    Ok(Self::new(image, options))
  }
}

impl ImageFileInput {
  pub fn new(image: RgbImage, options: SourceOptions) -> Self {
    Self {
      image,
      options,
      delivered: 0,
      releases: ReleaseCounter::default(),
    }
  }

  pub fn release_counter(&self) -> ReleaseCounter {
    self.releases.clone()
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    if self.delivered >= self.options.repeat {
      return None;
    }
    self.delivered += 1;

    let frame = Frame::new(
      self.image.width(),
      self.image.height(),
      self.options.rotation,
      PixelPlanes::Rgb8(self.image.as_raw().clone()),
    );
    Some(self.releases.attach(frame, self.delivered as u64))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Rotation;

  #[test]
  fn repeats_then_ends_and_counts_releases() {
    let options = SourceOptions {
      rotation: Rotation::Deg90,
      repeat: 3,
    };
    let mut input = ImageFileInput::new(RgbImage::new(8, 4), options);
    let releases = input.release_counter();

    let frames: Vec<Frame> = input.by_ref().collect();
    assert_eq!(frames.len(), 3);
    assert!(input.next().is_none());
    assert!(
      frames
        .iter()
        .all(|f| f.rotation() == Rotation::Deg90 && f.width() == 8)
    );

    assert_eq!(releases.released(), 0);
    drop(frames);
    assert_eq!(releases.released(), 3);
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("nv21:///tmp/frame.yuv").expect("有效的 URL");
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch)
    ));
  }
}
