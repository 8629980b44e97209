// 该文件是 Kanjian （看见） 项目的一部分。
// src/model.rs - 检测模型
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

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  tensor::{Tensor, TensorError},
};

mod decode;
mod labels;
mod nms;
#[cfg(feature = "onnx")]
mod onnx;

pub use self::decode::{Candidate, DecodeError, OutputDecoder};
pub use self::labels::LabelSet;
pub use self::nms::Suppressor;
#[cfg(feature = "onnx")]
pub use self::onnx::OnnxRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("推理输出无效: {0}")]
  Tensor(#[from] TensorError),
}

/// 推理后端。输入为 `1 x H x W x 3` 的 f32 张量，输出为 `1 x (4 + C) x N`。
pub trait InferenceRuntime: Send {
  fn input_shape(&self) -> &[usize];
  fn output_shape(&self) -> &[usize];
  fn run(&mut self, input: &Tensor) -> Result<Tensor, RuntimeError>;
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  ModelNotFound(PathBuf),
  #[error("模型加载错误: {0}")]
  ModelLoadError(#[from] std::io::Error),
  #[error("模型被推理后端拒绝: {0}")]
  ModelRejected(String),
  #[error("模型输入形状不兼容: {0:?}, 期望 [1, H, W, 3]")]
  IncompatibleInput(Vec<usize>),
  #[error("模型输出形状不兼容: {0:?}, 期望 [1, 4 + C, N] 且 C >= 1")]
  IncompatibleOutput(Vec<usize>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("没有可用的推理后端, 无法加载 {0}")]
  NoBackend(PathBuf),
}

/// 已加载并校验过形状的检测模型
pub struct DetectionModel {
  runtime: Mutex<Box<dyn InferenceRuntime>>,
  labels: LabelSet,
  input_width: u32,
  input_height: u32,
  num_anchors: usize,
}

impl DetectionModel {
  pub fn new(
    runtime: Box<dyn InferenceRuntime>,
    custom_labels: Option<Vec<String>>,
  ) -> Result<Self, ModelError> {
    let (input_height, input_width) = match runtime.input_shape() {
      &[1, h, w, 3] if h > 0 && w > 0 => (h, w),
      other => {
        error!("模型输入形状不兼容: {:?}", other);
        return Err(ModelError::IncompatibleInput(other.to_vec()));
      }
    };

    let (num_classes, num_anchors) = match runtime.output_shape() {
      &[1, rows, anchors] if rows > 4 => (rows - 4, anchors),
      other => {
        error!("模型输出形状不兼容: {:?}", other);
        return Err(ModelError::IncompatibleOutput(other.to_vec()));
      }
    };

    let (Ok(input_width), Ok(input_height)) =
      (u32::try_from(input_width), u32::try_from(input_height))
    else {
      return Err(ModelError::IncompatibleInput(runtime.input_shape().to_vec()));
    };

    let labels = LabelSet::new(custom_labels, num_classes);
    info!(
      "模型输入 {}x{}, 类别数 {}, 候选框数 {}",
      input_width, input_height, num_classes, num_anchors
    );

    Ok(Self {
      runtime: Mutex::new(runtime),
      labels,
      input_width,
      input_height,
      num_anchors,
    })
  }

  pub fn input_size(&self) -> (u32, u32) {
    (self.input_width, self.input_height)
  }

  pub fn num_classes(&self) -> usize {
    self.labels.len()
  }

  pub fn num_anchors(&self) -> usize {
    self.num_anchors
  }

  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn infer(&self, input: &Tensor) -> Result<Tensor, RuntimeError> {
    // 后端 panic 后锁会中毒，运行时本身仍可继续使用
    let mut runtime = self.runtime.lock().unwrap_or_else(PoisonError::into_inner);
    runtime.run(input)
  }
}

impl std::fmt::Debug for DetectionModel {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DetectionModel")
      .field("input_width", &self.input_width)
      .field("input_height", &self.input_height)
      .field("num_classes", &self.labels.len())
      .field("num_anchors", &self.num_anchors)
      .finish()
  }
}

const DETECTION_MODEL_SCHEME: &str = "yolo";

#[derive(Debug, Clone)]
pub struct DetectionModelBuilder {
  model_path: PathBuf,
  labels_path: Option<PathBuf>,
}

impl FromUrlWithScheme for DetectionModelBuilder {
  const SCHEME: &'static str = DETECTION_MODEL_SCHEME;
}

impl FromUrl for DetectionModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    if url.path().is_empty() {
      return Err(ModelError::ModelPathError("模型路径为空".to_string()));
    }

    Ok(DetectionModelBuilder {
      model_path: PathBuf::from(url.path()),
      labels_path: crate::query_value(url, "labels").map(PathBuf::from),
    })
  }
}

impl DetectionModelBuilder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      labels_path: None,
    }
  }

  pub fn labels(mut self, labels_path: impl Into<PathBuf>) -> Self {
    self.labels_path = Some(labels_path.into());
    self
  }

  pub fn model_path(&self) -> &Path {
    &self.model_path
  }

  /// 用内置后端打开模型文件
  pub fn build(self) -> Result<DetectionModel, ModelError> {
    info!("加载模型文件: {}", self.model_path.display());
    if !self.model_path.exists() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(ModelError::ModelNotFound(self.model_path));
    }
    let runtime = open_runtime(&self.model_path)?;
    self.build_with(runtime)
  }

  /// 使用调用者提供的后端
  pub fn build_with(self, runtime: Box<dyn InferenceRuntime>) -> Result<DetectionModel, ModelError> {
    let labels = match &self.labels_path {
      Some(path) => Some(LabelSet::read_label_file(path)?),
      None => None,
    };
    if let Some(labels) = &labels {
      debug!("读取到 {} 个自定义标签", labels.len());
    }
    let model = DetectionModel::new(runtime, labels)?;
    info!("模型加载完成");
    Ok(model)
  }
}

#[cfg(feature = "onnx")]
fn open_runtime(path: &Path) -> Result<Box<dyn InferenceRuntime>, ModelError> {
  Ok(Box::new(OnnxRuntime::load(path)?))
}

#[cfg(not(feature = "onnx"))]
fn open_runtime(path: &Path) -> Result<Box<dyn InferenceRuntime>, ModelError> {
  error!("未启用任何推理后端, 请使用 onnx 特性编译");
  Err(ModelError::NoBackend(path.to_path_buf()))
}


#[cfg(test)]
mod tests {
  use super::testing::*;
  use super::*;

  #[test]
  fn model_discovers_sizes_and_synthesizes_labels() {
    let runtime = FixedRuntime::new(640, 640, Tensor::zeros(&[1, 84, 8400]));
    let model = DetectionModel::new(Box::new(runtime), None).expect("形状有效");
    assert_eq!(model.input_size(), (640, 640));
    assert_eq!(model.num_classes(), 80);
    assert_eq!(model.num_anchors(), 8400);
    assert_eq!(model.labels().name(5), "class_5");
  }

  #[test]
  fn custom_labels_are_truncated_to_class_count() {
    let runtime = FixedRuntime::new(320, 320, Tensor::zeros(&[1, 6, 10]));
    let labels = vec!["cat".to_string(), "dog".to_string(), "bird".to_string()];
    let model = DetectionModel::new(Box::new(runtime), Some(labels)).expect("形状有效");
    assert_eq!(model.num_classes(), 2);
    assert_eq!(model.labels().name(0), "cat");
    assert_eq!(model.labels().name(1), "dog");
  }

  #[test]
  fn output_without_classes_is_rejected() {
    let runtime = FixedRuntime::new(640, 640, Tensor::zeros(&[1, 4, 8400]));
    assert!(matches!(
      DetectionModel::new(Box::new(runtime), None),
      Err(ModelError::IncompatibleOutput(_))
    ));
  }

  #[test]
  fn channels_first_input_is_rejected() {
    let mut runtime = FixedRuntime::new(640, 640, Tensor::zeros(&[1, 84, 8400]));
    runtime.input_shape = vec![1, 3, 640, 640];
    assert!(matches!(
      DetectionModel::new(Box::new(runtime), None),
      Err(ModelError::IncompatibleInput(_))
    ));
  }

  #[test]
  fn builder_parses_url() {
    let url = Url::parse("yolo:///models/yolov8n.onnx?labels=/models/coco.txt").expect("有效的 URL");
    let builder = DetectionModelBuilder::from_url(&url).expect("方案正确");
    assert_eq!(builder.model_path(), Path::new("/models/yolov8n.onnx"));
    assert_eq!(builder.labels_path, Some(PathBuf::from("/models/coco.txt")));

    let url = Url::parse("rknn:///models/yolov8n.rknn").expect("有效的 URL");
    assert!(matches!(
      DetectionModelBuilder::from_url(&url),
      Err(ModelError::ModelPathError(_))
    ));
  }

  #[test]
  fn missing_model_file_is_reported() {
    let builder = DetectionModelBuilder::new("/nonexistent/kanjian/model.onnx");
    assert!(matches!(
      builder.build(),
      Err(ModelError::ModelNotFound(_))
    ));
  }
}
