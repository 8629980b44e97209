// 该文件是 Kanjian （看见） 项目的一部分。
// src/tensor.rs - 推理输入输出张量
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

use image::RgbImage;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  ShapeMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 行优先排列的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn new(shape: &[usize], data: Vec<f32>) -> Result<Self, TensorError> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(TensorError::ShapeMismatch {
        shape: shape.to_vec(),
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      shape: shape.into(),
      data: data.into_boxed_slice(),
    })
  }

  pub fn zeros(shape: &[usize]) -> Self {
    let size = shape.iter().product::<usize>();
    Self {
      shape: shape.into(),
      data: vec![0.0; size].into_boxed_slice(),
    }
  }

  /// 形状为 `1 x H x W x 3` 的张量，像素值除以 255
  pub fn from_rgb_image(image: &RgbImage) -> Self {
    let shape = [1, image.height() as usize, image.width() as usize, 3];
    let data = image
      .as_raw()
      .iter()
      .map(|&v| f32::from(v) / 255.0)
      .collect::<Vec<_>>();
    Self {
      shape: shape.into(),
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn as_mut_slice(&mut self) -> &mut [f32] {
    &mut self.data
  }
}
