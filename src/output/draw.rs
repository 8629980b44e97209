// 该文件是 Kanjian （看见） 项目的一部分。
// src/output/draw.rs - 叠加层绘制
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::info;

use crate::{
  geometry::{BoundingBox, DisplaySpace},
  overlay::DisplayFrame,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;
const DEBUG_TEXT_MARGIN: i32 = 8;

const BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);
const PREVIEW_COLOR: Rgb<u8> = Rgb([64, 64, 64]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件: {0}")]
  InvalidFont(String),
}

/// 按类别区分的框颜色，色相按黄金角步进
pub fn class_color(class_id: usize) -> Rgb<u8> {
  let hue = (class_id as f32 * 137.508) % 360.0;
  let (s, v) = (0.85f32, 0.95f32);
  let c = v * s;
  let x = c * (1.0 - ((hue / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;
  let (r, g, b) = match (hue / 60.0) as u32 {
    0 => (c, x, 0.0),
    1 => (x, c, 0.0),
    2 => (0.0, c, x),
    3 => (0.0, x, c),
    4 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };
  let channel = |value: f32| ((value + m) * 255.0).round().clamp(0.0, 255.0) as u8;
  Rgb([channel(r), channel(g), channel(b)])
}

/// 把显示坐标框转换成画布上的整数矩形，完全在画布外时返回 `None`
fn pixel_rect(canvas: &RgbImage, bbox: &BoundingBox<DisplaySpace>) -> Option<(i32, i32, i32, i32)> {
  let (w, h) = (canvas.width() as i32, canvas.height() as i32);
  if w == 0 || h == 0 {
    return None;
  }
  let x_min = (bbox.left.floor() as i32).clamp(0, w - 1);
  let y_min = (bbox.top.floor() as i32).clamp(0, h - 1);
  let x_max = (bbox.right.ceil() as i32).clamp(0, w - 1);
  let y_max = (bbox.bottom.ceil() as i32).clamp(0, h - 1);
  (x_min < x_max && y_min < y_max).then_some((x_min, y_min, x_max, y_max))
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
    }
  }
}

impl Draw {
  /// 使用字体文件绘制标签与调试文本；没有字体时只画框
  pub fn with_font_file(path: impl AsRef<Path>) -> Result<Self, DrawError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    info!("加载字体: {}", path.display());
    Ok(Self {
      font: Some(font),
      ..Self::default()
    })
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 在视图大小的画布上绘制预览区域、检测框、标签与调试文本
  pub fn render(&self, display: &DisplayFrame) -> RgbImage {
    let mut canvas = RgbImage::from_pixel(display.view.width, display.view.height, BACKGROUND);

    if let Some(preview) = display.preview {
      let bbox = BoundingBox::<DisplaySpace>::from_edges(preview.edges());
      if let Some((x_min, y_min, x_max, y_max)) = pixel_rect(&canvas, &bbox) {
        let rect = Rect::at(x_min, y_min).of_size((x_max - x_min + 1) as u32, (y_max - y_min + 1) as u32);
        draw_hollow_rect_mut(&mut canvas, rect, PREVIEW_COLOR);
      }
    }

    for detection in display.detections.iter() {
      let label = format!("{} {:.2}", detection.label, detection.confidence);
      self.draw_bbox_with_label(&mut canvas, &detection.bbox, &label, class_color(detection.class_id));
    }

    self.draw_debug_text(&mut canvas, &display.debug_text);
    canvas
  }

  fn draw_bbox_with_label(
    &self,
    canvas: &mut RgbImage,
    bbox: &BoundingBox<DisplaySpace>,
    label: &str,
    color: Rgb<u8>,
  ) {
    let Some((x_min, y_min, x_max, y_max)) = pixel_rect(canvas, bbox) else {
      return;
    };

    // 边框加粗为 2 像素
    for thickness in 0..BOX_THICKNESS {
      let width = x_max - x_min + 1 - 2 * thickness;
      let height = y_max - y_min + 1 - 2 * thickness;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + thickness, y_min + thickness).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(canvas, rect, color);
    }

    let Some(font) = &self.font else {
      return;
    };

    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(canvas.width() as i32 - label_x);
    if label_width <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, self.label_text_height as u32);
    draw_filled_rect_mut(canvas, rect, color);
    draw_text_mut(
      canvas,
      TEXT_COLOR,
      label_x,
      label_y + self.label_text_vertical_padding,
      PxScale::from(self.font_size),
      font,
      label,
    );
  }

  fn draw_debug_text(&self, canvas: &mut RgbImage, text: &str) {
    let Some(font) = &self.font else {
      return;
    };
    let scale = PxScale::from(self.font_size);
    for (row, line) in text.lines().enumerate() {
      let y = DEBUG_TEXT_MARGIN + row as i32 * self.label_text_height;
      draw_text_mut(canvas, TEXT_COLOR, DEBUG_TEXT_MARGIN, y, scale, font, line);
    }
  }
}
