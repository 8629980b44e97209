// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/decode.rs - YOLOv8 输出解码
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
use tracing::debug;

use crate::{
  geometry::{BoundingBox, Detection, ModelSpace},
  model::LabelSet,
  tensor::Tensor,
};

const BOX_ROWS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("输出张量没有类别行 (第 1 维为 {0}, 至少需要 5)")]
  NoClasses(usize),
  #[error("输出张量形状无效: {0:?}, 期望 [1, 4 + C, N]")]
  InvalidShape(Vec<usize>),
}

/// 通过置信度阈值、尚未抑制的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BoundingBox<ModelSpace>,
}

impl Candidate {
  pub fn into_detection(self, labels: &LabelSet) -> Detection<ModelSpace> {
    Detection {
      class_id: self.class_id,
      label: labels.name(self.class_id),
      confidence: self.confidence,
      bbox: self.bbox,
    }
  }
}

/// 解码 `1 x (4 + C) x N` 的输出张量。
///
/// 前四行是归一化的 cx, cy, w, h，其余 C 行是类别分数。
/// 每个候选框取分数最高的类别（并列时取下标最小者），
/// 分数严格大于阈值才保留，坐标乘以模型输入尺寸。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputDecoder {
  input_width: f32,
  input_height: f32,
  confidence_threshold: f32,
}

impl OutputDecoder {
  pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.1;

  pub fn new(input_width: u32, input_height: u32) -> Self {
    Self {
      input_width: input_width as f32,
      input_height: input_height as f32,
      confidence_threshold: Self::DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }

  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn decode(&self, output: &Tensor) -> Result<Vec<Candidate>, DecodeError> {
    let (rows, anchors) = match output.shape() {
      &[1, rows, _] if rows <= BOX_ROWS => return Err(DecodeError::NoClasses(rows)),
      &[1, rows, anchors] => (rows, anchors),
      other => return Err(DecodeError::InvalidShape(other.to_vec())),
    };

    let data = output.as_slice();
    let row = |r: usize| &data[r * anchors..(r + 1) * anchors];
    let (cx, cy, w, h) = (row(0), row(1), row(2), row(3));

    let mut candidates = Vec::new();
    for i in 0..anchors {
      let mut best_class = 0;
      let mut best_score = f32::MIN;
      for class_id in 0..rows - BOX_ROWS {
        let score = data[(BOX_ROWS + class_id) * anchors + i];
        if score > best_score {
          best_score = score;
          best_class = class_id;
        }
      }

      if best_score > self.confidence_threshold {
        candidates.push(Candidate {
          class_id: best_class,
          confidence: best_score,
          bbox: BoundingBox::from_center(
            cx[i] * self.input_width,
            cy[i] * self.input_height,
            w[i] * self.input_width,
            h[i] * self.input_height,
          ),
        });
      }
    }

    debug!("解码 {} 个候选框, 保留 {} 个", anchors, candidates.len());
    Ok(candidates)
  }
}
