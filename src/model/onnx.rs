// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use ort::session::Session;
use ort::value::{Tensor as OrtTensor, ValueType};
use tracing::{debug, info};

use crate::{
  model::{InferenceRuntime, ModelError, RuntimeError},
  tensor::Tensor,
};

/// ONNX 模型。导出的 YOLOv8 通常是 NCHW 输入，这里对外统一表现为 NHWC。
pub struct OnnxRuntime {
  session: Session,
  input_name: String,
  output_name: String,
  channels_first: bool,
  input_shape: Vec<usize>,
  output_shape: Vec<usize>,
}

fn rejected(e: impl std::fmt::Display) -> ModelError {
  ModelError::ModelRejected(e.to_string())
}

fn backend(e: impl std::fmt::Display) -> RuntimeError {
  RuntimeError::Backend(e.to_string())
}

fn static_dims(value_type: &ValueType) -> Option<Vec<usize>> {
  match value_type {
    ValueType::Tensor { shape, .. } => shape
      .iter()
      .map(|&d| usize::try_from(d).ok().filter(|&d| d > 0))
      .collect(),
    _ => None,
  }
}

impl OnnxRuntime {
  pub fn load(path: &Path) -> Result<Self, ModelError> {
    info!("创建 ONNX Runtime 会话: {}", path.display());
    let session = Session::builder()
      .and_then(|b| b.with_intra_threads(1))
      .and_then(|b| b.commit_from_file(path))
      .map_err(rejected)?;

    if session.inputs.len() != 1 || session.outputs.is_empty() {
      return Err(rejected(format!(
        "预期 1 个输入和至少 1 个输出, 实际为 {} / {}",
        session.inputs.len(),
        session.outputs.len()
      )));
    }

    let input = &session.inputs[0];
    let output = &session.outputs[0];
    let model_input = static_dims(&input.input_type)
      .ok_or_else(|| rejected(format!("输入 {} 不是静态形状的张量", input.name)))?;
    let output_shape = static_dims(&output.output_type)
      .ok_or_else(|| rejected(format!("输出 {} 不是静态形状的张量", output.name)))?;

    let (channels_first, input_shape) = match model_input.as_slice() {
      &[1, 3, h, w] => (true, vec![1, h, w, 3]),
      &[1, h, w, 3] => (false, vec![1, h, w, 3]),
      _ => return Err(ModelError::IncompatibleInput(model_input)),
    };
    debug!(
      "ONNX 输入 {} {:?} (NCHW: {}), 输出 {} {:?}",
      input.name, model_input, channels_first, output.name, output_shape
    );

    Ok(Self {
      input_name: input.name.clone(),
      output_name: output.name.clone(),
      session,
      channels_first,
      input_shape,
      output_shape,
    })
  }
}

impl InferenceRuntime for OnnxRuntime {
  fn input_shape(&self) -> &[usize] {
    &self.input_shape
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn run(&mut self, input: &Tensor) -> Result<Tensor, RuntimeError> {
    let (h, w) = (self.input_shape[1], self.input_shape[2]);
    let value = if self.channels_first {
      let plane = h * w;
      let mut data = vec![0.0f32; plane * 3];
      for (i, pixel) in input.as_slice().chunks_exact(3).enumerate() {
        data[i] = pixel[0];
        data[plane + i] = pixel[1];
        data[2 * plane + i] = pixel[2];
      }
      OrtTensor::from_array(([1usize, 3, h, w], data.into_boxed_slice()))
    } else {
      OrtTensor::from_array(([1usize, h, w, 3], input.as_slice().to_vec().into_boxed_slice()))
    }
    .map_err(backend)?;

    let outputs = self
      .session
      .run(ort::inputs![self.input_name.as_str() => value.into_dyn()])
      .map_err(backend)?;
    let (shape, data) = outputs[self.output_name.as_str()]
      .try_extract_tensor::<f32>()
      .map_err(backend)?;
    let dims = shape.iter().map(|&d| d.max(0) as usize).collect::<Vec<_>>();
    Ok(Tensor::new(&dims, data.to_vec())?)
  }
}
