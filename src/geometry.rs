// 该文件是 Kanjian （看见） 项目的一部分。
// src/geometry.rs - 检测框与坐标空间
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

//! 检测框携带所在坐标空间的类型标记，不同空间的框不能混用。

use std::fmt;
use std::marker::PhantomData;

/// 模型输入像素坐标（例如 640x640）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModelSpace;

/// 捕获帧（未旋转）像素坐标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSpace;

/// 显示视图像素坐标
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplaySpace;

#[derive(Clone, Copy, PartialEq)]
pub struct BoundingBox<S> {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
  space: PhantomData<S>,
}

impl<S> BoundingBox<S> {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
      space: PhantomData,
    }
  }

  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    Self::new(
      cx - width / 2.0,
      cy - height / 2.0,
      cx + width / 2.0,
      cy + height / 2.0,
    )
  }

  pub fn from_edges([left, top, right, bottom]: [f32; 4]) -> Self {
    Self::new(left, top, right, bottom)
  }

  /// [left, top, right, bottom]
  pub fn edges(&self) -> [f32; 4] {
    [self.left, self.top, self.right, self.bottom]
  }

  pub fn width(&self) -> f32 {
    self.right - self.left
  }

  pub fn height(&self) -> f32 {
    self.bottom - self.top
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn intersection_area(&self, other: &Self) -> f32 {
    let w = self.right.min(other.right) - self.left.max(other.left);
    let h = self.bottom.min(other.bottom) - self.top.max(other.top);
    w.max(0.0) * h.max(0.0)
  }

  /// 交并比；并集面积不为正时为 0
  pub fn iou(&self, other: &Self) -> f32 {
    let inter = self.intersection_area(other);
    let union = self.area() + other.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
  }

  pub(crate) fn into_space<T>(self) -> BoundingBox<T> {
    BoundingBox::new(self.left, self.top, self.right, self.bottom)
  }
}

impl<S> fmt::Debug for BoundingBox<S> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let space = std::any::type_name::<S>().rsplit("::").next().unwrap_or("?");
    write!(
      f,
      "BoundingBox<{}>({:.1}, {:.1}, {:.1}, {:.1})",
      space, self.left, self.top, self.right, self.bottom
    )
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection<S> {
  pub class_id: usize,
  pub label: String,
  pub confidence: f32,
  pub bbox: BoundingBox<S>,
}
