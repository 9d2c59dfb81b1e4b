// 该文件是 DenteScope （齿镜） 项目的一部分。
// src/input.rs - 影像目录输入
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

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 可识别的影像文件扩展名（不区分大小写）
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "tif", "tiff", "bmp"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("URI scheme mismatch: expected '{expected}', found '{found}'")]
  SchemeMismatch {
    expected: &'static str,
    found: String,
  },
  #[error("Input is not a directory: {0}")]
  NotADirectory(PathBuf),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
}

/// 一个待处理的工作项（通常是一张影像）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
  /// 在输入序列中的位置，也是结果排序的依据
  pub index: usize,
  /// 文件名
  pub id: String,
  pub path: PathBuf,
}

impl WorkItem {
  pub fn new(index: usize, path: impl Into<PathBuf>) -> Self {
    let path = path.into();
    let id = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_else(|| path.display().to_string());
    Self { index, id, path }
  }

  /// 不带扩展名的文件名
  pub fn stem(&self) -> &str {
    Path::new(&self.id)
      .file_stem()
      .and_then(|stem| stem.to_str())
      .unwrap_or(&self.id)
  }
}

pub fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      IMAGE_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

/// 按文件名排序枚举目录中的影像
#[derive(Debug, Clone)]
pub struct ImageDirectory {
  directory: PathBuf,
}

impl FromUrlWithScheme for ImageDirectory {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirectory {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(InputError::SchemeMismatch {
        expected: Self::SCHEME,
        found: url.scheme().to_string(),
      });
    }

    Ok(ImageDirectory::new(url.path()))
  }
}

impl ImageDirectory {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn directory(&self) -> &Path {
    &self.directory
  }

  /// 枚举所有影像文件，顺序稳定（按文件名升序）
  pub fn work_items(&self) -> Result<Vec<WorkItem>, InputError> {
    if !self.directory.is_dir() {
      return Err(InputError::NotADirectory(self.directory.clone()));
    }

    let mut paths = Vec::new();
    for entry in std::fs::read_dir(&self.directory)? {
      let path = entry?.path();
      if path.is_file() && is_image_file(&path) {
        paths.push(path);
      } else {
        debug!("跳过非影像文件: {}", path.display());
      }
    }
    paths.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    info!(
      "在 {} 中找到 {} 张影像",
      self.directory.display(),
      paths.len()
    );

    Ok(
      paths
        .into_iter()
        .enumerate()
        .map(|(index, path)| WorkItem::new(index, path))
        .collect(),
    )
  }
}

/// 只保留指定文件名的工作项，并重新编号
pub fn retain_ids(items: Vec<WorkItem>, ids: &HashSet<String>) -> Vec<WorkItem> {
  items
    .into_iter()
    .filter(|item| ids.contains(&item.id))
    .enumerate()
    .map(|(index, item)| WorkItem { index, ..item })
    .collect()
}
