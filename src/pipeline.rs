// 该文件是 Kanjian （看见） 项目的一部分。
// src/pipeline.rs - 检测流水线
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

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::PipelineConfig,
  frame::{Frame, FrameConverter, FrameError, Rotation},
  geometry::{Detection, ModelSpace},
  model::{
    DecodeError, DetectionModel, DetectionModelBuilder, ModelError, OutputDecoder, RuntimeError,
    Suppressor,
  },
  overlay::{CoordinateMapper, DisplayFrame, PreviewRect, ViewSize},
  preprocess::{CropGeometry, CropScaler},
};

mod fps;
pub use self::fps::FpsCounter;

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("无效帧: {0}")]
  InvalidFrame(#[from] FrameError),
  #[error("模型未加载")]
  ModelNotLoaded,
  #[error("模型加载失败: {0}")]
  ModelLoad(#[from] ModelError),
  #[error("输出解码失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("推理失败: {0}")]
  Runtime(#[from] RuntimeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
  pub index: u64,
  pub width: u32,
  pub height: u32,
  pub rotation: Rotation,
}

impl FrameInfo {
  pub fn of(frame: &Frame, index: u64) -> Self {
    Self {
      index,
      width: frame.width(),
      height: frame.height(),
      rotation: frame.rotation(),
    }
  }
}

/// 单帧检测结果，坐标仍在模型空间
#[derive(Debug, Clone, Default)]
pub struct Detections {
  pub crop: Option<CropGeometry>,
  pub input_size: Option<(u32, u32)>,
  pub items: Vec<Detection<ModelSpace>>,
}

/// 一帧处理完后交给界面线程的报告
#[derive(Debug, Clone)]
pub struct FrameReport {
  pub frame: FrameInfo,
  pub crop: Option<CropGeometry>,
  pub input_size: Option<(u32, u32)>,
  pub detections: Vec<Detection<ModelSpace>>,
  pub fps: f32,
  pub error: Option<String>,
  pub snapshot: Option<Arc<RgbImage>>,
}

impl FrameReport {
  pub fn failed(frame: FrameInfo, fps: f32, error: impl Into<String>) -> Self {
    Self {
      frame,
      crop: None,
      input_size: None,
      detections: Vec::new(),
      fps,
      error: Some(error.into()),
      snapshot: None,
    }
  }

  pub fn mapper(&self, preview: PreviewRect) -> Option<CoordinateMapper> {
    let crop = self.crop?;
    let input_size = self.input_size?;
    Some(CoordinateMapper::new(
      crop,
      self.frame.rotation,
      preview,
      input_size,
    ))
  }

  pub fn debug_text(&self, view: ViewSize) -> String {
    let model_input = match self.input_size {
      Some((w, h)) => format!("{}x{}", w, h),
      None => "-".to_string(),
    };
    let mut lines = vec![
      format!("FPS: {:.1}", self.fps),
      format!("View: {}", view),
      format!("Image: {}x{}", self.frame.width, self.frame.height),
      format!("Model Input: {}", model_input),
      format!("Rotation: {}", self.frame.rotation),
      format!("Detections: {}", self.detections.len()),
    ];
    if let Some(error) = &self.error {
      lines.push(format!("Error: {}", error));
    }
    lines.join("\n")
  }

  /// 映射到显示坐标；没有裁剪信息时只给出调试文本
  pub fn to_display(&self, view: ViewSize, preview: Option<PreviewRect>) -> DisplayFrame {
    let detections = match preview.and_then(|p| self.mapper(p)) {
      Some(mapper) => self.detections.iter().map(|d| mapper.map(d)).collect(),
      None => Vec::new(),
    };
    DisplayFrame {
      frame_index: self.frame.index,
      view,
      preview,
      detections,
      debug_text: self.debug_text(view),
    }
  }
}

/// 按顺序执行 帧转换 -> 裁剪缩放 -> 推理 -> 解码 -> 抑制
pub struct DetectionPipeline {
  config: PipelineConfig,
  model: Option<Arc<DetectionModel>>,
  converter: FrameConverter,
  fps: FpsCounter,
  frames: u64,
}

impl DetectionPipeline {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      fps: FpsCounter::new(config.fps_window()),
      config,
      model: None,
      converter: FrameConverter,
      frames: 0,
    }
  }

  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  pub fn model(&self) -> Option<&Arc<DetectionModel>> {
    self.model.as_ref()
  }

  pub fn is_model_loaded(&self) -> bool {
    self.model.is_some()
  }

  pub fn frames_processed(&self) -> u64 {
    self.frames
  }

  pub fn fps(&self) -> f32 {
    self.fps.fps()
  }

  pub fn load_model(&mut self, builder: DetectionModelBuilder) -> Result<(), ModelError> {
    self.install_model(builder.build())
  }

  /// 安装新模型；加载失败时保留当前模型
  pub fn install_model(
    &mut self,
    candidate: Result<DetectionModel, ModelError>,
  ) -> Result<(), ModelError> {
    match candidate {
      Ok(model) => {
        info!("检测模型已就绪: {:?}", model);
        self.model = Some(Arc::new(model));
        Ok(())
      }
      Err(e) => {
        if self.model.is_some() {
          warn!("模型重新加载失败, 继续使用当前模型: {}", e);
        } else {
          error!("模型加载失败: {}", e);
        }
        Err(e)
      }
    }
  }

  /// 对一张 RGB 图像执行检测；模型未加载时返回空结果
  pub fn detect(&self, image: &RgbImage) -> Result<Detections, PipelineError> {
    let Some(model) = &self.model else {
      debug!("{}, 跳过检测", PipelineError::ModelNotLoaded);
      return Ok(Detections::default());
    };

    let (input_width, input_height) = model.input_size();
    let scaled = CropScaler::new(input_width, input_height).crop_and_scale(image)?;

    let started = Instant::now();
    let output = model.infer(&scaled.tensor)?;
    debug!("推理耗时: {:.2?}", started.elapsed());

    let candidates = OutputDecoder::new(input_width, input_height)
      .with_confidence_threshold(self.config.confidence_threshold)
      .decode(&output)?;
    let items = Suppressor::new(self.config.iou_threshold)
      .with_max_detections(self.config.max_detections)
      .suppress(candidates)
      .into_iter()
      .map(|c| c.into_detection(model.labels()))
      .collect();

    Ok(Detections {
      crop: Some(scaled.crop),
      input_size: Some((input_width, input_height)),
      items,
    })
  }

  /// 处理一帧。任何错误都在这里截住，转成带诊断信息的空结果。
  pub fn process(&mut self, frame: Frame) -> FrameReport {
    self.frames += 1;
    let info = FrameInfo::of(&frame, self.frames);
    let fps = self.fps.tick(Instant::now());

    let result = self.converter.convert(&frame).map(|image| {
      let snapshot = self.config.keep_snapshot.then(|| Arc::new(image.clone()));
      (image, snapshot)
    });
    // 像素已转换完毕，尽早归还相机缓冲区
    drop(frame);

    let report = result
      .map_err(PipelineError::from)
      .and_then(|(image, snapshot)| {
        let detections = self.detect(&image)?;
        Ok(FrameReport {
          frame: info,
          crop: detections.crop,
          input_size: detections.input_size,
          detections: detections.items,
          fps,
          error: None,
          snapshot,
        })
      });

    match report {
      Ok(report) => {
        debug!(
          "第 {} 帧: {} 个检测结果",
          info.index,
          report.detections.len()
        );
        report
      }
      Err(e) => {
        warn!("第 {} 帧处理失败, 已跳过: {}", info.index, e);
        FrameReport::failed(info, fps, e.to_string())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::frame::PixelPlanes;
  use crate::model::testing::{FixedRuntime, yolo_output};
  use crate::model::{InferenceRuntime, LabelSet};
  use crate::tensor::Tensor;
  use std::sync::atomic::{AtomicUsize, Ordering};

  fn rgb_frame(width: u32, height: u32) -> Frame {
    Frame::new(
      width,
      height,
      Rotation::Deg0,
      PixelPlanes::Rgb8(vec![90; (width * height * 3) as usize]),
    )
  }

  fn counted(frame: Frame, counter: &Arc<AtomicUsize>) -> Frame {
    let counter = counter.clone();
    frame.with_release(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    })
  }

  fn model_with(output: Tensor) -> DetectionModel {
    DetectionModel::new(Box::new(FixedRuntime::new(64, 64, output)), None).expect("形状有效")
  }

  fn two_overlapping_boxes() -> Tensor {
    yolo_output(
      2,
      &[
        ([0.5, 0.5, 0.5, 0.5], vec![(0, 0.9)]),
        ([0.52, 0.5, 0.5, 0.5], vec![(1, 0.8)]),
        ([0.1, 0.1, 0.1, 0.1], vec![(1, 0.05)]),
      ],
    )
  }

  #[test]
  fn detect_without_model_is_empty() {
    let pipeline = DetectionPipeline::new(PipelineConfig::default());
    let detections = pipeline
      .detect(&RgbImage::new(32, 32))
      .expect("没有模型时不报错");
    assert!(detections.items.is_empty());
    assert!(detections.crop.is_none());
  }

  #[test]
  fn full_run_decodes_and_suppresses() {
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");

    let report = pipeline.process(rgb_frame(128, 96));
    assert!(report.error.is_none());
    assert_eq!(report.detections.len(), 1);
    assert_eq!(report.detections[0].label, "class_0");
    assert_eq!(
      report.crop,
      Some(CropGeometry {
        width: 96,
        height: 96,
        x: 16,
        y: 0
      })
    );
    assert_eq!(report.input_size, Some((64, 64)));
    assert!(report.snapshot.is_none());
  }

  #[test]
  fn release_hook_runs_once_on_success_and_failure() {
    let released = Arc::new(AtomicUsize::new(0));
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");

    pipeline.process(counted(rgb_frame(64, 64), &released));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let bad = Frame::new(64, 64, Rotation::Deg0, PixelPlanes::Rgb8(vec![0; 5]));
    let report = pipeline.process(counted(bad, &released));
    assert_eq!(released.load(Ordering::SeqCst), 2);
    assert!(report.detections.is_empty());
    assert!(report.error.is_some());
  }

  #[test]
  fn invalid_frame_is_skipped_and_pipeline_continues() {
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");

    let report = pipeline.process(Frame::new(
      0,
      10,
      Rotation::Deg0,
      PixelPlanes::Rgb8(vec![]),
    ));
    assert!(report.error.as_deref().is_some_and(|e| e.contains("0x10")));

    let report = pipeline.process(rgb_frame(64, 64));
    assert!(report.error.is_none());
    assert_eq!(report.frame.index, 2);
  }

  struct NoClassRuntime {
    input: Vec<usize>,
    declared: Vec<usize>,
  }

  impl InferenceRuntime for NoClassRuntime {
    fn input_shape(&self) -> &[usize] {
      &self.input
    }

    fn output_shape(&self) -> &[usize] {
      &self.declared
    }

    fn run(&mut self, _input: &Tensor) -> Result<Tensor, RuntimeError> {
      // 声明的形状与实际输出不一致
      Ok(Tensor::zeros(&[1, 4, 16]))
    }
  }

  #[test]
  fn decode_error_is_reported_in_frame() {
    let runtime = NoClassRuntime {
      input: vec![1, 32, 32, 3],
      declared: vec![1, 6, 16],
    };
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(DetectionModel::new(Box::new(runtime), None))
      .expect("声明的形状有效");
    let report = pipeline.process(rgb_frame(32, 32));
    assert!(report.detections.is_empty());
    assert!(report.error.is_some());
  }

  #[test]
  fn failed_reload_keeps_previous_model() {
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");
    let err = pipeline.load_model(DetectionModelBuilder::new("/nonexistent/kanjian.onnx"));
    assert!(matches!(err, Err(ModelError::ModelNotFound(_))));
    assert!(pipeline.is_model_loaded());
    assert_eq!(pipeline.process(rgb_frame(64, 64)).detections.len(), 1);
  }

  #[test]
  fn snapshot_is_kept_when_configured() {
    let config = PipelineConfig {
      keep_snapshot: true,
      ..PipelineConfig::default()
    };
    let mut pipeline = DetectionPipeline::new(config);
    let report = pipeline.process(rgb_frame(40, 20));
    let snapshot = report.snapshot.expect("配置了快照");
    assert_eq!(snapshot.dimensions(), (40, 20));
    assert!(report.crop.is_none());
  }

  #[test]
  fn debug_text_lists_frame_facts() {
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");
    let report = pipeline.process(rgb_frame(128, 96));
    let text = report.debug_text(ViewSize::new(1080, 1920));
    assert!(text.contains("View: 1080x1920"));
    assert!(text.contains("Image: 128x96"));
    assert!(text.contains("Model Input: 64x64"));
    assert!(text.contains("Rotation: 0°"));
    assert!(text.contains("Detections: 1"));
  }

  #[test]
  fn debug_text_is_one_fact_per_line() {
    let info = FrameInfo {
      index: 3,
      width: 64,
      height: 48,
      rotation: Rotation::Deg270,
    };
    let report = FrameReport::failed(info, 12.5, "无效帧");
    let text = report.debug_text(ViewSize::new(720, 1280));
    assert_eq!(
      text.lines().collect::<Vec<_>>(),
      [
        "FPS: 12.5",
        "View: 720x1280",
        "Image: 64x48",
        "Model Input: -",
        "Rotation: 270°",
        "Detections: 0",
        "Error: 无效帧",
      ]
    );
  }

  #[test]
  fn report_maps_to_display() {
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(Ok(model_with(two_overlapping_boxes())))
      .expect("模型有效");
    let report = pipeline.process(rgb_frame(64, 64));
    let view = ViewSize::new(640, 640);
    let preview = PreviewRect::fit(view, 64, 64).expect("有效的尺寸");
    let display = report.to_display(view, Some(preview));
    assert_eq!(display.detections.len(), 1);
    let bbox = display.detections[0].bbox;
    // 居中的框在双轴镜像后仍然居中
    assert!((bbox.left - 160.0).abs() < 1e-3);
    assert!((bbox.right - 480.0).abs() < 1e-3);
    assert!((bbox.top - 160.0).abs() < 1e-3);
    assert!((bbox.bottom - 480.0).abs() < 1e-3);
  }

  #[test]
  fn custom_labels_flow_into_detections() {
    let runtime = FixedRuntime::new(64, 64, two_overlapping_boxes());
    let model = DetectionModel::new(Box::new(runtime), Some(vec!["person".into(), "cup".into()]))
      .expect("形状有效");
    assert_eq!(model.labels(), &LabelSet::new(Some(vec!["person".into(), "cup".into()]), 2));
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline.install_model(Ok(model)).expect("模型有效");
    let report = pipeline.process(rgb_frame(64, 64));
    assert_eq!(report.detections[0].label, "person");
  }
}
