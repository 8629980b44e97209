// 该文件是 Kanjian （看见） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use kanjian::{
  FromUrl,
  config::PipelineConfig,
  input::InputWrapper,
  model::DetectionModelBuilder,
  output::OutputWrapper,
  pipeline::DetectionPipeline,
  task::{ContinuousTask, Task},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出: {}", args.output);
  info!("视图尺寸: {}", args.view);

  let mut config = match &args.config {
    Some(path) => PipelineConfig::load(path)
      .with_context(|| format!("无法读取配置文件 {}", path.display()))?,
    None => PipelineConfig::default(),
  };
  args.apply_overrides(&mut config);

  let output = OutputWrapper::from_url(&args.output).context("无法创建输出")?;
  config.keep_snapshot |= output.wants_snapshot();
  config.validate().context("配置无效")?;
  info!("流水线配置: {:?}", config);

  let mut pipeline = DetectionPipeline::new(config);
  pipeline
    .load_model(DetectionModelBuilder::from_url(&args.model)?)
    .context("无法加载模型")?;

  let input = InputWrapper::from_url(&args.input).context("无法打开输入")?;
  let releases = input.release_counter();

  ContinuousTask::new(pipeline, args.view)
    .with_frame_number((args.frame_number > 0).then_some(args.frame_number))
    .with_frame_interval(args.frame_interval.map(Duration::from_millis))
    .run_task(input, output)?;

  info!("已释放 {} 帧", releases.released());
  Ok(())
}
