// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/task.rs - 批处理任务编排
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 DenteScope contributors

//! 批处理编排：逐项执行 检测 → 测量，单项失败只记录不中断。
//!
//! `workers == 1` 时按输入顺序串行处理；`workers > 1` 时使用有界线程池，
//! 结果由收集线程按工作项序号插回 [`BatchResult`]，汇总统计始终在全部结果
//! 收集完成后才进行。

use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, mpsc};
use std::{thread, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  batch::{BatchResult, FailureKind, ItemError, ItemOutcome, PendingItem, RunInfo},
  detector::{Detect, DetectError, Detection},
  input::WorkItem,
  measure::{Calibration, DEFAULT_CALIBRATION_FACTOR, MeasureError, MeasureTarget, SubjectRule},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("Invalid configuration: {0}")]
  InvalidCalibration(#[from] MeasureError),
  #[error("Worker count must be at least 1")]
  NoWorkers,
}

/// 每记录一个结果后被调用，用于中间结果持久化等
pub trait Progress {
  fn on_outcome(&mut self, batch: &BatchResult, outcome: &ItemOutcome);
}

impl<F: FnMut(&BatchResult, &ItemOutcome)> Progress for F {
  fn on_outcome(&mut self, batch: &BatchResult, outcome: &ItemOutcome) {
    self(batch, outcome)
  }
}

pub struct NoProgress;

impl Progress for NoProgress {
  fn on_outcome(&mut self, _batch: &BatchResult, _outcome: &ItemOutcome) {}
}

/// 由调用方触发的整体取消：停止派发新工作项，已派发的照常结束
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }

  /// 收到 Ctrl-C 后取消运行；30 秒内仍未退出则强制结束进程
  pub fn install_ctrlc(&self) -> Result<(), ctrlc::Error> {
    let flag = self.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，停止派发新的工作项...");
      flag.cancel();
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
  }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
  pub calibration_factor: f64,
  /// 仅记录在运行元数据中，过滤由检测适配器完成
  pub confidence_threshold: Option<f32>,
  pub subject_rule: SubjectRule,
  pub workers: usize,
  /// 单项检测的最长等待时间
  pub item_timeout: Option<Duration>,
  pub source: String,
}

impl Default for BatchOptions {
  fn default() -> Self {
    Self {
      calibration_factor: DEFAULT_CALIBRATION_FACTOR,
      confidence_threshold: None,
      subject_rule: SubjectRule::default(),
      workers: 1,
      item_timeout: None,
      source: "unknown".to_string(),
    }
  }
}

pub struct BatchTask<D> {
  detector: Arc<D>,
  calibration: Calibration,
  options: BatchOptions,
  cancel: CancelFlag,
}

impl<D: Detect + 'static> BatchTask<D> {
  /// 配置错误在处理任何工作项之前报告
  pub fn new(detector: D, options: BatchOptions) -> Result<Self, TaskError> {
    let calibration = Calibration::new(options.calibration_factor)?;
    if options.workers == 0 {
      return Err(TaskError::NoWorkers);
    }
    Ok(Self {
      detector: Arc::new(detector),
      calibration,
      options,
      cancel: CancelFlag::new(),
    })
  }

  pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancel_flag(&self) -> &CancelFlag {
    &self.cancel
  }

  fn run_info(&self, declared_total: usize) -> RunInfo {
    RunInfo {
      confidence_threshold: self.options.confidence_threshold,
      ..RunInfo::new(
        self.options.source.clone(),
        self.calibration.factor(),
        declared_total,
      )
    }
  }

  pub fn run<P: Progress>(&self, items: Vec<WorkItem>, progress: &mut P) -> BatchResult {
    info!("开始批处理，共 {} 个工作项", items.len());
    let batch = BatchResult::new(self.run_info(items.len()));
    self.execute(batch, items, progress)
  }

  /// 在上一次运行的基础上继续，已有最终结果的工作项不再处理
  pub fn resume<P: Progress>(
    &self,
    previous: BatchResult,
    items: Vec<WorkItem>,
    progress: &mut P,
  ) -> BatchResult {
    let index_of: HashMap<&str, usize> = items
      .iter()
      .map(|item| (item.id.as_str(), item.index))
      .collect();

    let mut batch = BatchResult::new(RunInfo {
      started_at: previous.run.started_at,
      ..self.run_info(items.len())
    });
    for mut outcome in previous.take_outcomes() {
      match index_of.get(outcome.item_id.as_str()) {
        Some(&index) => {
          outcome.index = index;
          batch.insert(outcome);
        }
        None => warn!("历史结果 {} 不在当前输入中，已忽略", outcome.item_id),
      }
    }

    let done = batch.completed_ids();
    let remaining: Vec<WorkItem> = items
      .into_iter()
      .filter(|item| !done.contains(&item.id))
      .collect();
    info!(
      "恢复运行：已完成 {} 个，剩余 {} 个",
      batch.len(),
      remaining.len()
    );
    self.execute(batch, remaining, progress)
  }

  fn execute<P: Progress>(
    &self,
    mut batch: BatchResult,
    items: Vec<WorkItem>,
    progress: &mut P,
  ) -> BatchResult {
    if self.options.workers <= 1 || items.len() <= 1 {
      self.run_sequential(&mut batch, &items, progress);
    } else {
      self.run_pooled(&mut batch, &items, progress);
    }

    let stopped_early = self.cancel.is_cancelled() && batch.len() < batch.run.declared_total;
    batch.finish(stopped_early);

    if stopped_early {
      warn!(
        "运行被取消：完成 {}/{} 个工作项",
        batch.len(),
        batch.run.declared_total
      );
    }
    info!(
      "批处理结束：成功 {}，失败 {}，共 {}",
      batch.success_count(),
      batch.failed_count(),
      batch.len()
    );
    batch
  }

  fn run_sequential<P: Progress>(
    &self,
    batch: &mut BatchResult,
    items: &[WorkItem],
    progress: &mut P,
  ) {
    for item in items {
      if self.cancel.is_cancelled() {
        break;
      }
      info!(
        "[{}/{}] 正在处理: {}",
        batch.len() + 1,
        batch.run.declared_total,
        item.id
      );
      let outcome = self.process(item);
      Self::record(batch, outcome, progress);
    }
  }

  fn run_pooled<P: Progress>(&self, batch: &mut BatchResult, items: &[WorkItem], progress: &mut P) {
    let workers = self.options.workers.min(items.len());
    let cursor = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel();
    debug!("启动 {} 个工作线程", workers);

    thread::scope(|scope| {
      for _ in 0..workers {
        let tx = tx.clone();
        let cursor = &cursor;
        scope.spawn(move || {
          loop {
            if self.cancel.is_cancelled() {
              break;
            }
            let Some(item) = items.get(cursor.fetch_add(1, Ordering::SeqCst)) else {
              break;
            };
            debug!("工作线程开始处理: {}", item.id);
            if tx.send(self.process(item)).is_err() {
              break;
            }
          }
        });
      }
      drop(tx);

      // 只有收集线程写入 batch
      for outcome in rx {
        Self::record(batch, outcome, progress);
      }
    });
  }

  fn record<P: Progress>(batch: &mut BatchResult, outcome: ItemOutcome, progress: &mut P) {
    let position = batch.len() + 1;
    let total = batch.run.declared_total;
    match &outcome.error {
      None => info!(
        "[{}/{}] {} 成功：{} 个测量，耗时 {:.2}s",
        position,
        total,
        outcome.item_id,
        outcome.measurements.len(),
        outcome.duration_secs
      ),
      Some(error) => warn!(
        "[{}/{}] {} 失败 ({}): {}",
        position, total, outcome.item_id, error.kind, error.message
      ),
    }

    let recorded = outcome.clone();
    if batch.insert(outcome) {
      progress.on_outcome(batch, &recorded);
    }
  }

  fn process(&self, item: &WorkItem) -> ItemOutcome {
    let pending = PendingItem::start(item, self.options.subject_rule.key_for(item));

    let detections = match self.detect(item) {
      Ok(detections) => detections,
      Err(error) => return pending.fail(error),
    };
    if detections.is_empty() {
      debug!("{}: 未检测到目标", item.id);
    }

    let target = MeasureTarget {
      image: &item.id,
      subject: pending.subject(),
      measured_at: pending.started_at(),
    };
    match self.calibration.measure(&detections, &target) {
      Ok(measurements) => pending.succeed(measurements),
      Err(degenerate) => {
        warn!(
          "{}: 检测器输出退化框 #{} ({:.2}, {:.2}, {:.2}, {:.2})",
          item.id, degenerate.index, degenerate.x1, degenerate.y1, degenerate.x2, degenerate.y2
        );
        pending.fail(degenerate.into())
      }
    }
  }

  fn detect(&self, item: &WorkItem) -> Result<Vec<Detection>, ItemError> {
    let Some(timeout) = self.options.item_timeout else {
      return detect_guarded(self.detector.as_ref(), item).map_err(ItemError::from);
    };

    // 超时的检测线程不会被强行终止，其结果被丢弃
    let (tx, rx) = mpsc::sync_channel(1);
    let detector = Arc::clone(&self.detector);
    let owned = item.clone();
    thread::Builder::new()
      .name(format!("detect-{}", item.index))
      .spawn(move || {
        let _ = tx.send(detect_guarded(detector.as_ref(), &owned));
      })
      .map_err(|e| ItemError {
        kind: FailureKind::DetectionUnavailable,
        message: format!("Cannot spawn detection thread: {}", e),
      })?;

    match rx.recv_timeout(timeout) {
      Ok(result) => result.map_err(ItemError::from),
      Err(mpsc::RecvTimeoutError::Timeout) => Err(ItemError::timeout(timeout)),
      Err(mpsc::RecvTimeoutError::Disconnected) => Err(ItemError::from(detector_panicked())),
    }
  }
}

/// 检测器内部的 panic 只影响当前工作项
fn detect_guarded<D: Detect + ?Sized>(detector: &D, item: &WorkItem) -> Result<Vec<Detection>, DetectError> {
  panic::catch_unwind(AssertUnwindSafe(|| detector.detect(item))).unwrap_or_else(|payload| {
    warn!("{}: 检测器崩溃: {}", item.id, panic_message(payload.as_ref()));
    Err(detector_panicked())
  })
}

fn detector_panicked() -> DetectError {
  DetectError::DetectionUnavailable("detector panicked".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(message) = payload.downcast_ref::<&str>() {
    message
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message
  } else {
    "unknown panic"
  }
}
