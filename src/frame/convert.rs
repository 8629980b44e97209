// 该文件是 Kanjian （看见） 项目的一部分。
// src/frame/convert.rs - 相机帧到 RGB 图像的转换
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

use image::{ImageBuffer, Rgb, RgbImage};
use tracing::trace;

use super::{Frame, FrameError, PixelPlanes, Plane};

const RGB_CHANNELS: usize = 3;

/// 把相机帧转换为未旋转的 RGB 图像。
///
/// 旋转留给坐标映射处理，这里保持传感器方向。
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameConverter;

impl FrameConverter {
  pub fn convert(&self, frame: &Frame) -> Result<RgbImage, FrameError> {
    let (width, height) = (frame.width(), frame.height());
    if width == 0 || height == 0 {
      return Err(FrameError::InvalidDimensions { width, height });
    }
    trace!(
      "转换 {} 帧: {}x{}",
      frame.planes().format_name(),
      width,
      height
    );

    match frame.planes() {
      PixelPlanes::Rgb8(data) => Self::from_rgb(data, width, height),
      PixelPlanes::Nv21 { y, vu } => Self::from_nv21(y, vu, width, height),
      PixelPlanes::Yuv420 { y, u, v } => Self::from_yuv420(y, u, v, width, height),
    }
  }

  fn from_rgb(data: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() < expected {
      return Err(FrameError::MalformedPlane(format!(
        "RGB 数据长度不足: 期望 {}, 实际 {}",
        expected,
        data.len()
      )));
    }
    RgbImage::from_raw(width, height, data[..expected].to_vec())
      .ok_or_else(|| FrameError::MalformedPlane("无法构造 RGB 图像".to_string()))
  }

  fn from_nv21(y: &[u8], vu: &[u8], width: u32, height: u32) -> Result<RgbImage, FrameError> {
    let (w, h) = (width as usize, height as usize);
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);
    let vu_stride = chroma_w * 2;

    if y.len() < w * h {
      return Err(FrameError::MalformedPlane(format!(
        "NV21 Y 平面长度不足: 期望 {}, 实际 {}",
        w * h,
        y.len()
      )));
    }
    if vu.len() < vu_stride * chroma_h {
      return Err(FrameError::MalformedPlane(format!(
        "NV21 VU 平面长度不足: 期望 {}, 实际 {}",
        vu_stride * chroma_h,
        vu.len()
      )));
    }

    Ok(ImageBuffer::from_fn(width, height, |x, row| {
      let (x, row) = (x as usize, row as usize);
      let luma = y[row * w + x];
      let idx = (row / 2) * vu_stride + (x / 2) * 2;
      yuv_to_rgb(luma, vu[idx + 1], vu[idx])
    }))
  }

  fn from_yuv420(
    y: &Plane,
    u: &Plane,
    v: &Plane,
    width: u32,
    height: u32,
  ) -> Result<RgbImage, FrameError> {
    let (w, h) = (width as usize, height as usize);
    let (chroma_w, chroma_h) = (w.div_ceil(2), h.div_ceil(2));

    for (name, plane, cols, rows) in [
      ("Y", y, w, h),
      ("U", u, chroma_w, chroma_h),
      ("V", v, chroma_w, chroma_h),
    ] {
      if plane.pixel_stride == 0 {
        return Err(FrameError::MalformedPlane(format!("{} 平面像素跨度为 0", name)));
      }
      let required = plane.required_len(cols, rows);
      if plane.data.len() < required {
        return Err(FrameError::MalformedPlane(format!(
          "{} 平面长度不足: 期望至少 {}, 实际 {}",
          name,
          required,
          plane.data.len()
        )));
      }
    }

    Ok(ImageBuffer::from_fn(width, height, |x, row| {
      let (x, row) = (x as usize, row as usize);
      yuv_to_rgb(
        y.sample(x, row),
        u.sample(x / 2, row / 2),
        v.sample(x / 2, row / 2),
      )
    }))
  }
}

/// 全范围 BT.601（JFIF）YUV 到 RGB
fn yuv_to_rgb(y: u8, u: u8, v: u8) -> Rgb<u8> {
  let y = f32::from(y);
  let u = f32::from(u) - 128.0;
  let v = f32::from(v) - 128.0;

  let r = y + 1.402 * v;
  let g = y - 0.344_136 * u - 0.714_136 * v;
  let b = y + 1.772 * u;
  Rgb([clamp_channel(r), clamp_channel(g), clamp_channel(b)])
}

#[inline]
fn clamp_channel(value: f32) -> u8 {
  value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::Rotation;

  fn nv21_frame(width: u32, height: u32, luma: u8, v: u8, u: u8) -> Frame {
    let (w, h) = (width as usize, height as usize);
    let y = vec![luma; w * h];
    let vu = [v, u].repeat(w.div_ceil(2) * h.div_ceil(2));
    Frame::new(width, height, Rotation::Deg0, PixelPlanes::Nv21 { y, vu })
  }

  #[test]
  fn neutral_chroma_yields_grey() {
    let image = FrameConverter
      .convert(&nv21_frame(4, 4, 128, 128, 128))
      .expect("有效的 NV21 帧");
    assert_eq!(image.dimensions(), (4, 4));
    assert!(image.pixels().all(|p| *p == Rgb([128, 128, 128])));
  }

  #[test]
  fn nv21_reads_v_before_u() {
    let image = FrameConverter
      .convert(&nv21_frame(2, 2, 128, 255, 128))
      .expect("有效的 NV21 帧");
    // V 偏高：红色通道饱和，绿色下降，蓝色不变
    assert_eq!(*image.get_pixel(0, 0), Rgb([255, 37, 128]));
  }

  #[test]
  fn strided_yuv420_matches_nv21() {
    let (w, h) = (4usize, 2usize);
    let luma: Vec<u8> = (0..(w * h) as u8).map(|i| i * 20).collect();
    // 交错的 VU 平面，U/V 两个视图共享同一缓冲区布局
    let vu = vec![200u8, 60, 90, 170];
    let u_plane = Plane::new(vu[1..].to_vec(), w, 2);
    let v_plane = Plane::new(vu.clone(), w, 2);

    let yuv = Frame::new(
      w as u32,
      h as u32,
      Rotation::Deg0,
      PixelPlanes::Yuv420 {
        y: Plane::new(luma.clone(), w, 1),
        u: u_plane,
        v: v_plane,
      },
    );
    let nv21 = Frame::new(
      w as u32,
      h as u32,
      Rotation::Deg0,
      PixelPlanes::Nv21 { y: luma, vu },
    );

    let a = FrameConverter.convert(&yuv).expect("有效的 YUV 帧");
    let b = FrameConverter.convert(&nv21).expect("有效的 NV21 帧");
    assert_eq!(a, b);
  }

  #[test]
  fn rgb_frames_pass_through() {
    let data = vec![10, 20, 30, 40, 50, 60];
    let frame = Frame::new(2, 1, Rotation::Deg90, PixelPlanes::Rgb8(data.clone()));
    let image = FrameConverter.convert(&frame).expect("有效的 RGB 帧");
    assert_eq!(image.into_raw(), data);
  }

  #[test]
  fn zero_sized_frame_is_rejected() {
    let frame = Frame::new(0, 480, Rotation::Deg0, PixelPlanes::Rgb8(vec![]));
    assert_eq!(
      FrameConverter.convert(&frame),
      Err(FrameError::InvalidDimensions {
        width: 0,
        height: 480
      })
    );
  }

  #[test]
  fn short_planes_are_rejected() {
    let frame = Frame::new(
      4,
      4,
      Rotation::Deg0,
      PixelPlanes::Nv21 {
        y: vec![0; 16],
        vu: vec![0; 3],
      },
    );
    assert!(matches!(
      FrameConverter.convert(&frame),
      Err(FrameError::MalformedPlane(_))
    ));

    let frame = Frame::new(4, 4, Rotation::Deg0, PixelPlanes::Rgb8(vec![0; 10]));
    assert!(matches!(
      FrameConverter.convert(&frame),
      Err(FrameError::MalformedPlane(_))
    ));
  }
}
