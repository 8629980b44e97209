// 该文件是 Kanjian （看见） 项目的一部分。
// src/preprocess.rs - 中心裁剪与缩放
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

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use tracing::debug;

use crate::{frame::FrameError, tensor::Tensor};

/// 在源图像中居中、宽高比与目标一致的最大矩形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CropGeometry {
  pub width: u32,
  pub height: u32,
  pub x: u32,
  pub y: u32,
}

impl CropGeometry {
  pub fn center(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, FrameError> {
    if source_width == 0 || source_height == 0 {
      return Err(FrameError::InvalidDimensions {
        width: source_width,
        height: source_height,
      });
    }
    if target_width == 0 || target_height == 0 {
      return Err(FrameError::InvalidDimensions {
        width: target_width,
        height: target_height,
      });
    }

    let source_ratio = f64::from(source_width) / f64::from(source_height);
    let target_ratio = f64::from(target_width) / f64::from(target_height);

    let (width, height) = if source_ratio > target_ratio {
      // 源图像更宽，保留全部高度
      let width = (f64::from(source_height) * target_ratio).round() as u32;
      (width.clamp(1, source_width), source_height)
    } else {
      let height = (f64::from(source_width) / target_ratio).round() as u32;
      (source_width, height.clamp(1, source_height))
    };

    Ok(Self {
      width,
      height,
      x: (source_width - width) / 2,
      y: (source_height - height) / 2,
    })
  }

  pub fn right(&self) -> u32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> u32 {
    self.y + self.height
  }
}

/// 裁剪缩放后的模型输入
#[derive(Debug, Clone)]
pub struct ScaledInput {
  pub crop: CropGeometry,
  pub tensor: Tensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropScaler {
  input_width: u32,
  input_height: u32,
}

impl CropScaler {
  pub fn new(input_width: u32, input_height: u32) -> Self {
    Self {
      input_width,
      input_height,
    }
  }

  pub fn crop_and_scale(&self, image: &RgbImage) -> Result<ScaledInput, FrameError> {
    let crop = CropGeometry::center(
      image.width(),
      image.height(),
      self.input_width,
      self.input_height,
    )?;
    debug!(
      "中心裁剪 {}x{} -> {}x{} @ ({}, {})",
      image.width(),
      image.height(),
      crop.width,
      crop.height,
      crop.x,
      crop.y
    );

    let region = imageops::crop_imm(image, crop.x, crop.y, crop.width, crop.height).to_image();
    let resized = imageops::resize(
      &region,
      self.input_width,
      self.input_height,
      FilterType::Triangle,
    );

    Ok(ScaledInput {
      crop,
      tensor: Tensor::from_rgb_image(&resized),
    })
  }
}
