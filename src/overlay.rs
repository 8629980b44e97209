// 该文件是 Kanjian （看见） 项目的一部分。
// src/overlay.rs - 检测框到显示坐标的映射
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

//! 模型坐标到显示坐标的变换链：
//!
//! 0. 模型坐标还原到捕获帧坐标（按裁剪区域缩放并平移）
//! 1. 转为相对裁剪区域的坐标并做垂直翻转
//! 2. 按传感器旋转角度校正
//! 3. 缩放到预览矩形
//! 4. 在预览矩形内沿两个轴镜像，再平移到视图坐标
//!
//! 90° 与 270° 校正后宽高互换，预览矩形按校正后的宽高比（[`Rotation::oriented`]）计算，
//! 裁剪区域的边界因此正好落在预览矩形的边界上。

use std::fmt;
use std::str::FromStr;

use tracing::info;

use crate::{
  frame::{FrameError, Rotation},
  geometry::{BoundingBox, Detection, DisplaySpace, FrameSpace, ModelSpace},
  preprocess::CropGeometry,
};

/// 显示视图尺寸，命令行写作 `WxH`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewSize {
  pub width: u32,
  pub height: u32,
}

impl ViewSize {
  pub fn new(width: u32, height: u32) -> Self {
    Self { width, height }
  }
}

impl fmt::Display for ViewSize {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}", self.width, self.height)
  }
}

impl FromStr for ViewSize {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let (w, h) = s
      .split_once(['x', 'X'])
      .ok_or_else(|| format!("视图尺寸格式应为 WxH: {}", s))?;
    let width = w.trim().parse::<u32>().map_err(|e| format!("宽度无效: {}", e))?;
    let height = h.trim().parse::<u32>().map_err(|e| format!("高度无效: {}", e))?;
    if width == 0 || height == 0 {
      return Err(format!("视图尺寸必须为正: {}", s));
    }
    Ok(Self { width, height })
  }
}

/// 视图中实际显示模型输入内容的矩形
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreviewRect {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl PreviewRect {
  /// 视图中居中、宽高比与内容一致的最大矩形
  pub fn fit(view: ViewSize, content_width: u32, content_height: u32) -> Result<Self, FrameError> {
    let crop = CropGeometry::center(view.width, view.height, content_width, content_height)?;
    Ok(Self {
      left: crop.x as f32,
      top: crop.y as f32,
      right: crop.right() as f32,
      bottom: crop.bottom() as f32,
    })
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn edges(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }
}

/// 只在视图尺寸或内容尺寸变化时重新计算预览矩形
#[derive(Debug, Default)]
pub struct PreviewTracker {
  key: Option<(ViewSize, u32, u32)>,
  rect: Option<PreviewRect>,
}

impl PreviewTracker {
  pub fn update(
    &mut self,
    view: ViewSize,
    content_width: u32,
    content_height: u32,
  ) -> Result<PreviewRect, FrameError> {
    let key = (view, content_width, content_height);
    if let (Some(current), Some(rect)) = (self.key, self.rect)
      && current == key
    {
      return Ok(rect);
    }

    let rect = PreviewRect::fit(view, content_width, content_height)?;
    info!(
      "预览矩形更新: 视图 {}, 内容 {}x{} -> ({:.0}, {:.0}, {:.0}, {:.0})",
      view, content_width, content_height, rect.left, rect.top, rect.right, rect.bottom
    );
    self.key = Some(key);
    self.rect = Some(rect);
    Ok(rect)
  }

  pub fn current(&self) -> Option<PreviewRect> {
    self.rect
  }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateMapper {
  crop: CropGeometry,
  rotation: Rotation,
  preview: PreviewRect,
  input_width: u32,
  input_height: u32,
}

impl CoordinateMapper {
  pub fn new(
    crop: CropGeometry,
    rotation: Rotation,
    preview: PreviewRect,
    (input_width, input_height): (u32, u32),
  ) -> Self {
    Self {
      crop,
      rotation,
      preview,
      input_width,
      input_height,
    }
  }

  pub fn preview(&self) -> PreviewRect {
    self.preview
  }

  /// 第 0 步：模型坐标还原到捕获帧
  pub fn to_frame(&self, bbox: BoundingBox<ModelSpace>) -> BoundingBox<FrameSpace> {
    let sx = self.crop.width as f32 / self.input_width as f32;
    let sy = self.crop.height as f32 / self.input_height as f32;
    let (ox, oy) = (self.crop.x as f32, self.crop.y as f32);
    BoundingBox::new(
      bbox.left * sx + ox,
      bbox.top * sy + oy,
      bbox.right * sx + ox,
      bbox.bottom * sy + oy,
    )
  }

  pub fn to_display(&self, bbox: BoundingBox<FrameSpace>) -> BoundingBox<DisplaySpace> {
    let (w, h) = (self.crop.width as f32, self.crop.height as f32);
    let (ox, oy) = (self.crop.x as f32, self.crop.y as f32);

    // 1. 相对裁剪区域，垂直翻转
    let (l, t, r, b) = (
      bbox.left - ox,
      h - (bbox.bottom - oy),
      bbox.right - ox,
      h - (bbox.top - oy),
    );

    // 2. 旋转校正
    let (l, t, r, b) = match self.rotation {
      Rotation::Deg0 => (l, t, r, b),
      Rotation::Deg90 => (t, w - r, b, w - l),
      Rotation::Deg180 => (w - r, h - b, w - l, h - t),
      Rotation::Deg270 => (h - b, l, h - t, r),
    };
    let (ew, eh) = self.rotation.oriented(self.crop.width, self.crop.height);

    // 3. 缩放到预览矩形
    let sx = self.preview.width() / ew as f32;
    let sy = self.preview.height() / eh as f32;
    let (l, t, r, b) = (l * sx, t * sy, r * sx, b * sy);

    // 4. 在预览矩形内镜像两个轴，再平移
    let (pw, ph) = (self.preview.width(), self.preview.height());
    BoundingBox::new(
      pw - r + self.preview.left,
      ph - b + self.preview.top,
      pw - l + self.preview.left,
      ph - t + self.preview.top,
    )
  }

  pub fn map_box(&self, bbox: BoundingBox<ModelSpace>) -> BoundingBox<DisplaySpace> {
    self.to_display(self.to_frame(bbox))
  }

  pub fn map(&self, detection: &Detection<ModelSpace>) -> Detection<DisplaySpace> {
    Detection {
      class_id: detection.class_id,
      label: detection.label.clone(),
      confidence: detection.confidence,
      bbox: self.map_box(detection.bbox),
    }
  }
}

/// 界面线程上一次渲染所需的全部内容
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayFrame {
  pub frame_index: u64,
  pub view: ViewSize,
  pub preview: Option<PreviewRect>,
  pub detections: Vec<Detection<DisplaySpace>>,
  pub debug_text: String,
}
