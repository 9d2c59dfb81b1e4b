// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/model/sidecar.rs - 检测记录文件
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

//! 读取检测器为每张影像写出的记录文件 `<stem>.txt`。
//!
//! 每行一个目标：`label, score, x_min, y_min, x_max, y_max`，坐标为归一化值。
//! 空行与 `#` 开头的行被忽略。

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{DetectItem, DetectResult, ImageFrame, Model},
};

const RECORD_FIELDS: usize = 6;

#[derive(Error, Debug)]
pub enum SidecarError {
  #[error("URI scheme mismatch: expected 'record', found '{0}'")]
  SchemeMismatch(String),
  /// 路径只保留在字段中，信息文本对所有影像相同
  #[error("Detection record not found")]
  Missing(PathBuf),
  #[error("Malformed detection record: {reason}")]
  Malformed {
    path: PathBuf,
    line: usize,
    reason: String,
  },
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// `record:` 读取影像旁的记录文件，`record:///dir` 从指定目录读取
#[derive(Debug, Clone, Default)]
pub struct SidecarModel {
  directory: Option<PathBuf>,
}

impl FromUrlWithScheme for SidecarModel {
  const SCHEME: &'static str = "record";
}

impl FromUrl for SidecarModel {
  type Error = SidecarError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SidecarError::SchemeMismatch(url.scheme().to_string()));
    }

    let directory = match url.path() {
      "" | "/" => None,
      path => Some(PathBuf::from(path)),
    };
    Ok(SidecarModel { directory })
  }
}

impl SidecarModel {
  fn record_path(&self, frame: &ImageFrame) -> PathBuf {
    match &self.directory {
      Some(directory) => directory.join(format!("{}.txt", frame.stem)),
      None => frame.path.with_extension("txt"),
    }
  }
}

impl Model for SidecarModel {
  type Input = ImageFrame;
  type Output = DetectResult;
  type Error = SidecarError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let path = self.record_path(input);
    debug!("读取检测记录: {}", path.display());
    let text = match std::fs::read_to_string(&path) {
      Ok(text) => text,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        debug!("检测记录不存在: {}", path.display());
        return Err(SidecarError::Missing(path));
      }
      Err(e) => return Err(e.into()),
    };
    parse_record(&text, &path).inspect_err(|e| {
      if let SidecarError::Malformed { path, line, reason } = e {
        warn!("检测记录格式错误 {}:{}: {}", path.display(), line, reason);
      }
    })
  }
}

pub fn parse_record(text: &str, path: &Path) -> Result<DetectResult, SidecarError> {
  let malformed = |line: usize, reason: String| SidecarError::Malformed {
    path: path.to_path_buf(),
    line,
    reason,
  };

  let mut items = Vec::new();
  for (number, line) in text.lines().enumerate() {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
      continue;
    }

    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != RECORD_FIELDS {
      return Err(malformed(
        number + 1,
        format!("expected {} fields per line", RECORD_FIELDS),
      ));
    }

    let mut values = [0f32; RECORD_FIELDS - 1];
    for (slot, field) in values.iter_mut().zip(&fields[1..]) {
      *slot = field
        .parse()
        .map_err(|_| malformed(number + 1, "score and coordinates must be numbers".to_string()))?;
    }

    items.push(DetectItem {
      label: fields[0].to_string(),
      score: values[0],
      bbox: [values[1], values[2], values[3], values[4]],
    });
  }

  Ok(DetectResult {
    items: items.into_boxed_slice(),
  })
}
