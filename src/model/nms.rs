// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use tracing::debug;

use crate::model::Candidate;

/// 贪心、与类别无关的非极大值抑制
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Suppressor {
  iou_threshold: f32,
  max_detections: Option<usize>,
}

impl Default for Suppressor {
  fn default() -> Self {
    Self::new(Self::DEFAULT_IOU_THRESHOLD)
  }
}

impl Suppressor {
  pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;

  pub fn new(iou_threshold: f32) -> Self {
    Self {
      iou_threshold,
      max_detections: None,
    }
  }

  pub fn with_max_detections(mut self, max_detections: Option<usize>) -> Self {
    self.max_detections = max_detections;
    self
  }

  pub fn suppress(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    let total = candidates.len();
    // 稳定排序：置信度相同的候选框保持解码顺序
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let limit = self.max_detections.unwrap_or(usize::MAX);
    let mut kept: Vec<Candidate> = Vec::new();
    for candidate in candidates {
      if kept.len() >= limit {
        break;
      }
      let overlaps = kept
        .iter()
        .any(|k| k.bbox.iou(&candidate.bbox) > self.iou_threshold);
      if !overlaps {
        kept.push(candidate);
      }
    }

    debug!("非极大值抑制: {} -> {}", total, kept.len());
    kept
  }
}
