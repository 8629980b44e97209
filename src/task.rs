// 该文件是 Kanjian （看见） 项目的一部分。
// src/task.rs - 检测任务与线程模型
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

//! 输入线程把帧放进只保留最新一帧的槽，单个检测线程逐帧处理，
//! 结果经通道回到调用线程（界面线程），由 [`DisplayState`] 以最后写入为准。

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, anyhow};
use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  output::Render,
  overlay::{DisplayFrame, PreviewTracker, ViewSize},
  pipeline::{DetectionPipeline, FrameInfo, FrameReport},
};

pub trait Task<I, O>: Sized {
  type Error;
  fn run_task(self, input: I, output: O) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
  Accepted,
  /// 替换了尚未处理的旧帧，旧帧已释放
  Replaced,
  /// 槽已关闭，帧直接释放
  Closed,
}

#[derive(Default)]
struct SlotState {
  frame: Option<Frame>,
  closed: bool,
  replaced: u64,
}

/// 只保留最新一帧的交付槽
#[derive(Default)]
pub struct LatestFrameSlot {
  state: Mutex<SlotState>,
  ready: Condvar,
}

impl LatestFrameSlot {
  pub fn new() -> Self {
    Self::default()
  }

  fn lock(&self) -> MutexGuard<'_, SlotState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn offer(&self, frame: Frame) -> Offer {
    let (stale, offer) = {
      let mut state = self.lock();
      if state.closed {
        (Some(frame), Offer::Closed)
      } else {
        match state.frame.replace(frame) {
          Some(stale) => {
            state.replaced += 1;
            (Some(stale), Offer::Replaced)
          }
          None => (None, Offer::Accepted),
        }
      }
    };
    if offer != Offer::Closed {
      self.ready.notify_one();
    }
    // 在锁外执行释放回调
    drop(stale);
    offer
  }

  /// 阻塞直到有帧可取；槽关闭且为空时返回 `None`
  pub fn take(&self) -> Option<Frame> {
    let mut state = self.lock();
    loop {
      if let Some(frame) = state.frame.take() {
        return Some(frame);
      }
      if state.closed {
        return None;
      }
      state = self
        .ready
        .wait(state)
        .unwrap_or_else(PoisonError::into_inner);
    }
  }

  pub fn close(&self) {
    self.lock().closed = true;
    self.ready.notify_all();
  }

  pub fn is_closed(&self) -> bool {
    self.lock().closed
  }

  pub fn replaced(&self) -> u64 {
    self.lock().replaced
  }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
  payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_else(|| "未知错误".to_string())
}

/// 处理一帧，推理后端 panic 也只影响这一帧
pub fn process_guarded(pipeline: &mut DetectionPipeline, frame: Frame) -> FrameReport {
  let info = FrameInfo::of(&frame, pipeline.frames_processed() + 1);
  match panic::catch_unwind(AssertUnwindSafe(|| pipeline.process(frame))) {
    Ok(report) => report,
    Err(payload) => {
      let message = panic_message(payload.as_ref());
      error!("第 {} 帧处理时发生 panic: {}", info.index, message);
      FrameReport::failed(info, pipeline.fps(), format!("panic: {}", message))
    }
  }
}

/// 启动唯一的检测线程；槽关闭或结果通道断开时退出并交还流水线
pub fn spawn_worker(
  mut pipeline: DetectionPipeline,
  slot: Arc<LatestFrameSlot>,
  results: Sender<FrameReport>,
) -> std::io::Result<JoinHandle<DetectionPipeline>> {
  thread::Builder::new()
    .name("kanjian-detect".to_string())
    .spawn(move || {
      while let Some(frame) = slot.take() {
        let report = process_guarded(&mut pipeline, frame);
        if results.send(report).is_err() {
          debug!("结果通道已关闭, 检测线程退出");
          break;
        }
      }
      pipeline
    })
}

/// 界面侧状态，最后到达的结果覆盖之前的结果
#[derive(Debug)]
pub struct DisplayState {
  view: ViewSize,
  tracker: PreviewTracker,
  current: Option<DisplayFrame>,
}

impl DisplayState {
  pub fn new(view: ViewSize) -> Self {
    Self {
      view,
      tracker: PreviewTracker::default(),
      current: None,
    }
  }

  pub fn view(&self) -> ViewSize {
    self.view
  }

  pub fn resize(&mut self, view: ViewSize) {
    self.view = view;
  }

  pub fn apply(&mut self, report: &FrameReport) -> &DisplayFrame {
    let preview = match report.crop {
      Some(crop) => {
        let (width, height) = report.frame.rotation.oriented(crop.width, crop.height);
        match self.tracker.update(self.view, width, height) {
          Ok(rect) => Some(rect),
          Err(e) => {
            warn!("无法计算预览矩形: {}", e);
            None
          }
        }
      }
      None => self.tracker.current(),
    };
    self.current.insert(report.to_display(self.view, preview))
  }

  pub fn current(&self) -> Option<&DisplayFrame> {
    self.current.as_ref()
  }
}

static INTERRUPTED: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Ctrl-C 处理器在进程内只能注册一次
fn interrupt_flag() -> Arc<AtomicBool> {
  INTERRUPTED
    .get_or_init(|| {
      let flag = Arc::new(AtomicBool::new(false));
      let handler_flag = flag.clone();
      if let Err(e) = ctrlc::set_handler(move || {
        info!("收到中断信号，准备退出...");
        handler_flag.store(true, Ordering::SeqCst);
        thread::spawn(|| {
          thread::sleep(Duration::from_secs(30));
          warn!("强制退出程序");
          std::process::exit(1);
        });
      }) {
        warn!("无法注册 Ctrl-C 处理器: {}", e);
      }
      flag
    })
    .clone()
}

pub struct ContinuousTask {
  pipeline: DetectionPipeline,
  view: ViewSize,
  frame_number: Option<usize>,
  frame_interval: Option<Duration>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn new(pipeline: DetectionPipeline, view: ViewSize) -> Self {
    Self {
      pipeline,
      view,
      frame_number: None,
      frame_interval: None,
      handle_interrupt: true,
    }
  }

  /// 读取指定数量的输入帧后停止
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  /// 输入帧之间的间隔，模拟相机帧率
  pub fn with_frame_interval(mut self, frame_interval: Option<Duration>) -> Self {
    self.frame_interval = frame_interval;
    self
  }

  pub fn with_interrupt_handler(mut self, enabled: bool) -> Self {
    self.handle_interrupt = enabled;
    self
  }
}

impl<I, O, RE> Task<I, O> for ContinuousTask
where
  I: Iterator<Item = Frame> + Send + 'static,
  O: Render<FrameReport, DisplayFrame, Error = RE>,
  RE: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let stop = if self.handle_interrupt {
      let flag = interrupt_flag();
      flag.store(false, Ordering::SeqCst);
      flag
    } else {
      Arc::new(AtomicBool::new(false))
    };

    let slot = Arc::new(LatestFrameSlot::new());
    let (tx, rx) = mpsc::channel();
    let worker = spawn_worker(self.pipeline, slot.clone(), tx).context("无法启动检测线程")?;

    let producer = {
      let slot = slot.clone();
      let stop = stop.clone();
      let frame_number = self.frame_number;
      let frame_interval = self.frame_interval;
      thread::Builder::new()
        .name("kanjian-source".to_string())
        .spawn(move || {
          let mut delivered = 0usize;
          for frame in input {
            if stop.load(Ordering::SeqCst) {
              warn!("中断信号接收，停止读取输入");
              break;
            }
            delivered += 1;
            match slot.offer(frame) {
              Offer::Replaced => debug!("第 {} 帧到达时上一帧尚未处理, 已丢弃旧帧", delivered),
              Offer::Closed => break,
              Offer::Accepted => {}
            }
            if frame_number.is_some_and(|n| delivered >= n) {
              info!("达到指定帧数 {}, 停止读取输入", delivered);
              break;
            }
            if let Some(interval) = frame_interval {
              thread::sleep(interval);
            }
          }
          slot.close();
          delivered
        })
        .context("无法启动输入线程")?
    };

    let mut state = DisplayState::new(self.view);
    let mut render_error = None;
    for report in rx {
      let display = state.apply(&report);
      if let Err(e) = output.render_result(&report, display) {
        error!("渲染第 {} 帧失败: {}", report.frame.index, e);
        render_error = Some(e);
        stop.store(true, Ordering::SeqCst);
        slot.close();
        break;
      }
    }

    let delivered = producer
      .join()
      .map_err(|_| anyhow!("输入线程异常退出"))?;
    let pipeline = worker.join().map_err(|_| anyhow!("检测线程异常退出"))?;
    info!(
      "任务完成: 读取 {} 帧, 处理 {} 帧, 丢弃 {} 帧",
      delivered,
      pipeline.frames_processed(),
      slot.replaced()
    );

    match render_error {
      Some(e) => Err(anyhow::Error::new(e).context("渲染输出失败")),
      None => Ok(()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::PipelineConfig;
  use crate::frame::{PixelPlanes, Rotation};
  use crate::model::testing::{FixedRuntime, yolo_output};
  use crate::model::{DetectionModel, InferenceRuntime, RuntimeError};
  use crate::tensor::Tensor;
  use std::sync::atomic::AtomicUsize;

  fn counted_frame(width: u32, counter: &Arc<AtomicUsize>) -> Frame {
    let counter = counter.clone();
    Frame::new(
      width,
      width,
      Rotation::Deg0,
      PixelPlanes::Rgb8(vec![100; (width * width * 3) as usize]),
    )
    .with_release(move || {
      counter.fetch_add(1, Ordering::SeqCst);
    })
  }

  fn detecting_pipeline() -> DetectionPipeline {
    let output = yolo_output(1, &[([0.5, 0.5, 0.25, 0.25], vec![(0, 0.9)])]);
    let model = DetectionModel::new(Box::new(FixedRuntime::new(32, 32, output)), None)
      .expect("形状有效");
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline.install_model(Ok(model)).expect("模型有效");
    pipeline
  }

  #[test]
  fn newer_frame_replaces_and_releases_waiting_frame() {
    let released = Arc::new(AtomicUsize::new(0));
    let slot = LatestFrameSlot::new();
    assert_eq!(slot.offer(counted_frame(2, &released)), Offer::Accepted);
    assert_eq!(slot.offer(counted_frame(4, &released)), Offer::Replaced);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(slot.replaced(), 1);

    let frame = slot.take().expect("槽中有帧");
    assert_eq!(frame.width(), 4);
    drop(frame);
    assert_eq!(released.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn closed_slot_drains_then_ends() {
    let released = Arc::new(AtomicUsize::new(0));
    let slot = LatestFrameSlot::new();
    slot.offer(counted_frame(2, &released));
    slot.close();
    assert!(slot.is_closed());
    assert!(slot.take().is_some());
    assert!(slot.take().is_none());

    assert_eq!(slot.offer(counted_frame(2, &released)), Offer::Closed);
    assert_eq!(released.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn close_wakes_blocked_consumer() {
    let slot = Arc::new(LatestFrameSlot::new());
    let consumer = {
      let slot = slot.clone();
      thread::spawn(move || slot.take().is_none())
    };
    thread::sleep(Duration::from_millis(20));
    slot.close();
    assert!(consumer.join().expect("消费线程正常退出"));
  }

  #[test]
  fn worker_processes_until_closed() {
    let released = Arc::new(AtomicUsize::new(0));
    let slot = Arc::new(LatestFrameSlot::new());
    let (tx, rx) = mpsc::channel();
    let worker = spawn_worker(detecting_pipeline(), slot.clone(), tx).expect("线程启动");

    slot.offer(counted_frame(64, &released));
    let report = rx
      .recv_timeout(Duration::from_secs(5))
      .expect("收到第一帧结果");
    assert_eq!(report.detections.len(), 1);

    slot.close();
    let pipeline = worker.join().expect("检测线程正常退出");
    assert_eq!(pipeline.frames_processed(), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
  }

  struct PanicOnce {
    panicked: bool,
    inner: FixedRuntime,
  }

  impl InferenceRuntime for PanicOnce {
    fn input_shape(&self) -> &[usize] {
      self.inner.input_shape()
    }

    fn output_shape(&self) -> &[usize] {
      self.inner.output_shape()
    }

    fn run(&mut self, input: &Tensor) -> Result<Tensor, RuntimeError> {
      if !self.panicked {
        self.panicked = true;
        panic!("后端崩溃");
      }
      self.inner.run(input)
    }
  }

  #[test]
  fn runtime_panic_only_costs_one_frame() {
    let output = yolo_output(1, &[([0.5, 0.5, 0.25, 0.25], vec![(0, 0.9)])]);
    let runtime = PanicOnce {
      panicked: false,
      inner: FixedRuntime::new(32, 32, output),
    };
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline
      .install_model(DetectionModel::new(Box::new(runtime), None))
      .expect("形状有效");

    let released = Arc::new(AtomicUsize::new(0));
    let first = process_guarded(&mut pipeline, counted_frame(32, &released));
    assert!(first.error.as_deref().is_some_and(|e| e.contains("后端崩溃")));
    assert_eq!(released.load(Ordering::SeqCst), 1);

    let second = process_guarded(&mut pipeline, counted_frame(32, &released));
    assert!(second.error.is_none());
    assert_eq!(second.detections.len(), 1);
    assert_eq!(second.frame.index, 2);
  }

  #[test]
  fn display_state_is_last_write_wins() {
    let mut pipeline = detecting_pipeline();
    let released = Arc::new(AtomicUsize::new(0));
    let first = pipeline.process(counted_frame(64, &released));
    let second = pipeline.process(counted_frame(64, &released));

    let mut state = DisplayState::new(ViewSize::new(640, 480));
    state.apply(&first);
    let display = state.apply(&second).clone();
    assert_eq!(display.frame_index, 2);
    assert_eq!(state.current(), Some(&display));
    assert_eq!(
      display.preview.map(|p| p.edges()),
      Some([80.0, 0.0, 560.0, 480.0])
    );
    assert_eq!(display.detections.len(), 1);
  }

  #[test]
  fn rotated_wide_frame_fits_preview_to_upright_aspect() {
    let output = yolo_output(1, &[([0.5, 0.5, 0.5, 0.5], vec![(0, 0.9)])]);
    let model = DetectionModel::new(Box::new(FixedRuntime::new(32, 24, output)), None)
      .expect("形状有效");
    let mut pipeline = DetectionPipeline::new(PipelineConfig::default());
    pipeline.install_model(Ok(model)).expect("模型有效");
    let report = pipeline.process(Frame::new(
      64,
      48,
      Rotation::Deg90,
      PixelPlanes::Rgb8(vec![100; 64 * 48 * 3]),
    ));

    let mut state = DisplayState::new(ViewSize::new(480, 640));
    let display = state.apply(&report);
    let preview = display.preview.expect("有裁剪信息");
    assert_eq!(preview.edges(), [0.0, 0.0, 480.0, 640.0]);
    assert_eq!(display.detections.len(), 1);
    let bbox = display.detections[0].bbox;
    assert!(bbox.left >= preview.left && bbox.right <= preview.right);
    assert!(bbox.top >= preview.top && bbox.bottom <= preview.bottom);
  }

  #[test]
  fn failed_frame_keeps_last_preview() {
    let mut pipeline = detecting_pipeline();
    let released = Arc::new(AtomicUsize::new(0));
    let good = pipeline.process(counted_frame(64, &released));
    let bad = pipeline.process(Frame::new(
      8,
      8,
      Rotation::Deg0,
      PixelPlanes::Rgb8(vec![]),
    ));

    let mut state = DisplayState::new(ViewSize::new(100, 100));
    let preview = state.apply(&good).preview;
    let display = state.apply(&bad);
    assert_eq!(display.preview, preview);
    assert!(display.detections.is_empty());
    assert!(display.debug_text.contains("Error"));
  }

  #[derive(Clone, Default)]
  struct Collect(Arc<Mutex<Vec<DisplayFrame>>>);

  impl Render<FrameReport, DisplayFrame> for Collect {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &FrameReport, result: &DisplayFrame) -> Result<(), Self::Error> {
      self
        .0
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .push(result.clone());
      Ok(())
    }
  }

  struct Broken;

  impl Render<FrameReport, DisplayFrame> for Broken {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &FrameReport, _result: &DisplayFrame) -> Result<(), Self::Error> {
      Err(std::io::Error::other("显示设备不可用"))
    }
  }

  fn frames(count: usize, released: &Arc<AtomicUsize>) -> impl Iterator<Item = Frame> + Send + 'static {
    let released = released.clone();
    (0..count).map(move |_| counted_frame(48, &released))
  }

  #[test]
  fn continuous_task_renders_and_releases_every_frame() {
    let released = Arc::new(AtomicUsize::new(0));
    let output = Collect::default();
    ContinuousTask::new(detecting_pipeline(), ViewSize::new(480, 640))
      .with_interrupt_handler(false)
      .run_task(frames(4, &released), output.clone())
      .expect("任务成功");

    let rendered = output.0.lock().unwrap_or_else(PoisonError::into_inner);
    assert!(!rendered.is_empty() && rendered.len() <= 4);
    assert!(rendered.iter().all(|d| d.detections.len() == 1));
    assert_eq!(released.load(Ordering::SeqCst), 4);
  }

  #[test]
  fn continuous_task_honours_frame_number() {
    let released = Arc::new(AtomicUsize::new(0));
    let output = Collect::default();
    ContinuousTask::new(detecting_pipeline(), ViewSize::new(480, 640))
      .with_interrupt_handler(false)
      .with_frame_number(Some(2))
      .run_task(frames(10, &released), output.clone())
      .expect("任务成功");

    let rendered = output.0.lock().unwrap_or_else(PoisonError::into_inner);
    assert!(!rendered.is_empty() && rendered.len() <= 2);
    assert_eq!(released.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn render_failure_stops_task() {
    let released = Arc::new(AtomicUsize::new(0));
    let result = ContinuousTask::new(detecting_pipeline(), ViewSize::new(480, 640))
      .with_interrupt_handler(false)
      .with_frame_interval(Some(Duration::from_millis(5)))
      .run_task(frames(50, &released), Broken);
    assert!(result.is_err());
  }
}
