// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/main.rs - 批量测量主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use dentescope::{
  FromUrl,
  batch::{BatchResult, ItemOutcome},
  detector::DetectionAdapter,
  input::retain_ids,
  model::SidecarModel,
  output::{ReportDirectory, ReportFormat, StructuredRecord},
  summary::summarize_with,
  task::{BatchTask, CancelFlag},
};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("输入目录: {}", args.input);
  info!("输出目录: {}", args.output.display());
  info!("检测记录来源: {}", args.detector);
  info!("标定系数: {} mm/px", args.calibration);
  info!("置信度阈值: {}", args.confidence);

  // 配置错误都在处理任何影像之前报告
  let input = args.input_directory()?;
  let mut items = input.work_items()?;
  let options = args.batch_options(&input)?;

  if let Some(path) = &args.retry_failed {
    let failed = StructuredRecord::load(path)?.into_batch().failed_ids();
    items = retain_ids(items, &failed);
    info!("重新处理 {} 个失败的影像", items.len());
  }
  let previous = match &args.resume {
    Some(path) => Some(StructuredRecord::load(path)?.into_batch()),
    None => None,
  };

  let model = SidecarModel::from_url(&args.detector)?;
  let detector = DetectionAdapter::new(model, args.confidence);

  let cancel = CancelFlag::new();
  cancel.install_ctrlc()?;
  let task = BatchTask::new(detector, options)?.with_cancel_flag(cancel);

  #[cfg(feature = "save_image_file")]
  let annotated = args
    .save_images
    .then(|| dentescope::output::AnnotatedImageOutput::new(args.output.join("images")));

  #[cfg_attr(not(feature = "save_image_file"), allow(unused_variables))]
  let mut progress = |batch: &BatchResult, outcome: &ItemOutcome| {
    #[cfg(feature = "save_image_file")]
    if let Some(output) = &annotated
      && let Err(e) = output.render_outcome(outcome)
    {
      warn!("保存标注影像失败 {}: {}", outcome.item_id, e);
    }

    if args.persist_intermediate
      && let Err(e) =
        ReportDirectory::for_batch(&args.output, batch).and_then(|reports| reports.save_intermediate(batch))
    {
      error!("保存中间结果失败: {}", e);
    }
  };

  let batch = match previous {
    Some(previous) => task.resume(previous, items, &mut progress),
    None => task.run(items, &mut progress),
  };

  let summary = summarize_with(&batch, args.median);
  let reports = ReportDirectory::for_batch(&args.output, &batch)?;
  for path in reports.write_all(&batch, &summary, &args.thresholds())? {
    info!("产物: {}", path.display());
  }

  info!(
    "成功率: {}/{} ({:.1}%)，平均耗时 {:.2}s",
    summary.success, summary.total, summary.success_rate, summary.average_duration_secs
  );
  if summary.failed > 0 {
    warn!("{} 张影像处理失败", summary.failed);
  }
  if batch.run.cancelled {
    warn!(
      "运行未完成，可使用 --resume {} 继续",
      reports.path_for(ReportFormat::Structured).display()
    );
  }

  Ok(())
}
