// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame.rs - 相机帧定义
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

use std::fmt;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸无效: {width}x{height}")]
  InvalidDimensions { width: u32, height: u32 },
  #[error("像素平面数据无效: {0}")]
  MalformedPlane(String),
  #[error("不支持的旋转角度: {0}°")]
  UnsupportedRotation(u32),
}

/// 传感器相对显示方向的旋转角度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Rotation {
  #[default]
  Deg0,
  Deg90,
  Deg180,
  Deg270,
}

impl Rotation {
  pub fn degrees(self) -> u32 {
    match self {
      Rotation::Deg0 => 0,
      Rotation::Deg90 => 90,
      Rotation::Deg180 => 180,
      Rotation::Deg270 => 270,
    }
  }

  /// 旋转校正后内容的宽高，90° 与 270° 交换两轴
  pub fn oriented(self, width: u32, height: u32) -> (u32, u32) {
    match self {
      Rotation::Deg0 | Rotation::Deg180 => (width, height),
      Rotation::Deg90 | Rotation::Deg270 => (height, width),
    }
  }
}

impl TryFrom<u32> for Rotation {
  type Error = FrameError;

  fn try_from(degrees: u32) -> Result<Self, Self::Error> {
    match degrees {
      0 => Ok(Rotation::Deg0),
      90 => Ok(Rotation::Deg90),
      180 => Ok(Rotation::Deg180),
      270 => Ok(Rotation::Deg270),
      other => Err(FrameError::UnsupportedRotation(other)),
    }
  }
}

impl fmt::Display for Rotation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}°", self.degrees())
  }
}

/// 单个像素平面，带行跨度与像素跨度
#[derive(Debug, Clone)]
pub struct Plane {
  pub data: Vec<u8>,
  pub row_stride: usize,
  pub pixel_stride: usize,
}

impl Plane {
  pub fn new(data: Vec<u8>, row_stride: usize, pixel_stride: usize) -> Self {
    Self {
      data,
      row_stride,
      pixel_stride,
    }
  }

  /// 覆盖 `cols` x `rows` 个采样点所需的最小字节数
  pub(crate) fn required_len(&self, cols: usize, rows: usize) -> usize {
    if cols == 0 || rows == 0 {
      return 0;
    }
    (rows - 1) * self.row_stride + (cols - 1) * self.pixel_stride + 1
  }

  #[inline]
  pub(crate) fn sample(&self, col: usize, row: usize) -> u8 {
    self.data[row * self.row_stride + col * self.pixel_stride]
  }
}

#[derive(Debug, Clone)]
pub enum PixelPlanes {
  /// 三平面 YUV 4:2:0，色度平面可以是交错的（像素跨度为 2）
  Yuv420 { y: Plane, u: Plane, v: Plane },
  /// NV21：完整 Y 平面后接交错的 VU 平面
  Nv21 { y: Vec<u8>, vu: Vec<u8> },
  /// 紧密排列的 RGB
  Rgb8(Vec<u8>),
}

impl PixelPlanes {
  pub fn format_name(&self) -> &'static str {
    match self {
      PixelPlanes::Yuv420 { .. } => "YUV_420_888",
      PixelPlanes::Nv21 { .. } => "NV21",
      PixelPlanes::Rgb8(_) => "RGB8",
    }
  }
}

type ReleaseHook = Box<dyn FnOnce() + Send>;

/// 相机捕获的一帧。
///
/// 帧被丢弃时执行释放回调，向相机源归还缓冲区，且只执行一次。
/// 无论检测成功、失败还是帧在队列中被新帧替换，都会走到这一步。
pub struct Frame {
  width: u32,
  height: u32,
  rotation: Rotation,
  planes: PixelPlanes,
  release: Option<ReleaseHook>,
}

impl Frame {
  pub fn new(width: u32, height: u32, rotation: Rotation, planes: PixelPlanes) -> Self {
    Self {
      width,
      height,
      rotation,
      planes,
      release: None,
    }
  }

  pub fn with_release<F>(mut self, release: F) -> Self
  where
    F: FnOnce() + Send + 'static,
  {
    self.release = Some(Box::new(release));
    self
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn rotation(&self) -> Rotation {
    self.rotation
  }

  pub fn planes(&self) -> &PixelPlanes {
    &self.planes
  }
}

impl fmt::Debug for Frame {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Frame")
      .field("width", &self.width)
      .field("height", &self.height)
      .field("rotation", &self.rotation)
      .field("format", &self.planes.format_name())
      .field("has_release", &self.release.is_some())
      .finish()
  }
}

impl Drop for Frame {
  fn drop(&mut self) {
    if let Some(release) = self.release.take() {
      release();
    }
  }
}

mod convert;
pub use self::convert::FrameConverter;
