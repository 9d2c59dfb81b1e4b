// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/output/directory_record.rs - 报告产物目录
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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::{
  batch::BatchResult,
  output::{NarrativeThresholds, OutputError, ReportFormat, render},
  summary::{Summary, summarize},
};

const ARTIFACT_PREFIX: &str = "batch_results_";

/// 一次运行的产物目录，文件名由运行开始时间决定
#[derive(Debug, Clone)]
pub struct ReportDirectory {
  directory: PathBuf,
  stamp: String,
}

impl ReportDirectory {
  pub fn new(directory: impl Into<PathBuf>, started_at: DateTime<Utc>) -> Result<Self, OutputError> {
    let directory = directory.into();
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }
    Ok(Self {
      directory,
      stamp: started_at.format("%Y%m%d_%H%M%S").to_string(),
    })
  }

  pub fn for_batch(directory: impl Into<PathBuf>, batch: &BatchResult) -> Result<Self, OutputError> {
    Self::new(directory, batch.run.started_at)
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  pub fn path_for(&self, format: ReportFormat) -> PathBuf {
    self.directory.join(format!(
      "{}{}{}",
      ARTIFACT_PREFIX,
      self.stamp,
      format.file_suffix()
    ))
  }

  /// 运行过程中只重写本次运行的结构化记录
  pub fn save_intermediate(&self, batch: &BatchResult) -> Result<PathBuf, OutputError> {
    let summary = summarize(batch);
    let report = render(
      batch,
      &summary,
      ReportFormat::Structured,
      &NarrativeThresholds::default(),
    )?;
    let path = self.path_for(ReportFormat::Structured);
    write_atomic(&path, &report.content)?;
    debug!("中间结果已保存: {} 项", batch.len());
    Ok(path)
  }

  pub fn write_all(
    &self,
    batch: &BatchResult,
    summary: &Summary,
    thresholds: &NarrativeThresholds,
  ) -> Result<Vec<PathBuf>, OutputError> {
    ReportFormat::ALL
      .iter()
      .map(|&format| {
        let report = render(batch, summary, format, thresholds)?;
        let path = self.path_for(format);
        write_atomic(&path, &report.content)?;
        info!("保存报告到文件: {}", path.display());
        Ok(path)
      })
      .collect()
  }
}

/// 先写临时文件再改名，中断时不会留下半个文件
fn write_atomic(path: &Path, content: &str) -> Result<(), OutputError> {
  let mut staging = path.as_os_str().to_owned();
  staging.push(".tmp");
  let staging = PathBuf::from(staging);
  std::fs::write(&staging, content)?;
  std::fs::rename(&staging, path)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::batch::{PendingItem, RunInfo};
  use crate::input::WorkItem;
  use crate::output::StructuredRecord;

  fn started_at() -> DateTime<Utc> {
    DateTime::from_timestamp(1_730_289_600, 0).unwrap()
  }

  #[test]
  fn artifact_names_follow_run_start() {
    let dir = tempfile::tempdir().unwrap();
    let reports = ReportDirectory::new(dir.path().join("out"), started_at()).unwrap();
    assert!(reports.directory().is_dir());
    assert_eq!(
      reports.path_for(ReportFormat::Structured),
      dir.path().join("out/batch_results_20241030_120000.json")
    );
    assert_eq!(
      reports.path_for(ReportFormat::Tabular),
      dir.path().join("out/batch_results_20241030_120000.csv")
    );
    assert_eq!(
      reports.path_for(ReportFormat::Narrative),
      dir.path().join("out/batch_results_20241030_120000_report.md")
    );
  }

  #[test]
  fn intermediate_saves_rewrite_the_structured_record() {
    let dir = tempfile::tempdir().unwrap();
    let mut batch = BatchResult::new(RunInfo {
      started_at: started_at(),
      ..RunInfo::new("test", 0.1, 2)
    });
    let reports = ReportDirectory::for_batch(dir.path(), &batch).unwrap();

    let first = WorkItem::new(0, "/xrays/a.png");
    batch.insert(PendingItem::start(&first, "a".into()).succeed(Vec::new()));
    let path = reports.save_intermediate(&batch).unwrap();
    assert_eq!(StructuredRecord::load(&path).unwrap().outcomes.len(), 1);

    let second = WorkItem::new(1, "/xrays/b.png");
    batch.insert(PendingItem::start(&second, "b".into()).succeed(Vec::new()));
    reports.save_intermediate(&batch).unwrap();
    assert_eq!(StructuredRecord::load(&path).unwrap().outcomes.len(), 2);

    let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(files.len(), 1);
  }

  #[test]
  fn write_all_produces_three_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let mut batch = BatchResult::new(RunInfo {
      started_at: started_at(),
      ..RunInfo::new("test", 0.1, 0)
    });
    batch.finish(false);
    let reports = ReportDirectory::for_batch(dir.path(), &batch).unwrap();

    let paths = reports
      .write_all(&batch, &summarize(&batch), &NarrativeThresholds::default())
      .unwrap();
    assert_eq!(paths.len(), 3);
    assert!(paths.iter().all(|p| p.is_file()));
  }
}
