// 该文件是 Kanjian （看见） 项目的一部分。
// src/model/labels.rs - 类别标签
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

use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  names: Vec<String>,
}

impl LabelSet {
  /// 长度恰为 `num_classes`：自定义标签截断，不足的部分补 `class_i`
  pub fn new(custom: Option<Vec<String>>, num_classes: usize) -> Self {
    let mut names = custom.unwrap_or_default();
    if names.len() > num_classes {
      names.truncate(num_classes);
    } else if !names.is_empty() && names.len() < num_classes {
      warn!(
        "自定义标签数量 {} 少于模型类别数 {}, 其余类别使用默认名称",
        names.len(),
        num_classes
      );
    }
    let provided = names.len();
    names.extend((provided..num_classes).map(synthesized));
    Self { names }
  }

  /// 每行一个标签，忽略空行
  pub fn read_label_file(path: &Path) -> std::io::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect(),
    )
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn name(&self, class_id: usize) -> String {
    self
      .get(class_id)
      .map(str::to_string)
      .unwrap_or_else(|| synthesized(class_id))
  }
}

fn synthesized(class_id: usize) -> String {
  format!("class_{}", class_id)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn short_custom_list_is_padded() {
    let labels = LabelSet::new(Some(vec!["person".to_string()]), 3);
    assert_eq!(labels.len(), 3);
    assert_eq!(labels.get(0), Some("person"));
    assert_eq!(labels.get(2), Some("class_2"));
    assert_eq!(labels.name(7), "class_7");
  }

  #[test]
  fn label_file_skips_blank_lines() {
    let path = std::env::temp_dir().join(format!("kanjian-labels-{}.txt", std::process::id()));
    std::fs::write(&path, "person\n\n  bicycle \ncar\n").expect("可写临时目录");
    let names = LabelSet::read_label_file(&path).expect("文件存在");
    std::fs::remove_file(&path).ok();
    assert_eq!(names, vec!["person", "bicycle", "car"]);
  }
}
