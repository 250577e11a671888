//! 成绩差异计算 - 业务能力层
//!
//! 只关心"往前走"的变化：首次出现、从不可见变为可见、可见分数变化。
//! 成绩消失、重新被隐藏、一直不可见都不产生通知，这是产品层面的选择。

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::models::{Class, Score, ScorePath};

/// 变化类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// 之前不存在，现在可见
    FirstAppearance,
    /// 之前存在但不可见，现在可见
    Revealed,
    /// 之前可见，现在分数不同
    Updated,
}

/// 需要通知的一项成绩
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub path: ScorePath,
    pub score: Score,
    pub kind: ChangeKind,
}

/// 按课程显示名称分组的变化
pub type ClassDiff = BTreeMap<String, Vec<ScoreChange>>;

/// 比较新旧快照
///
/// 旧快照按课程 ID 匹配；没有变化的课程不会出现在结果里
pub fn diff(old: &[Class], new: &[Class]) -> ClassDiff {
    let old_by_id: HashMap<&str, &Class> = old.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut out = ClassDiff::new();

    for class in new {
        let previous = old_by_id.get(class.id.as_str()).copied();
        let changes = diff_class(previous, class);
        if !changes.is_empty() {
            out.entry(class.name.clone()).or_default().extend(changes);
        }
    }

    out
}

fn diff_class(previous: Option<&Class>, current: &Class) -> Vec<ScoreChange> {
    current
        .scores
        .iter()
        .filter_map(|(path, score)| {
            let before = previous.and_then(|c| c.scores.get(path));
            classify(before, score).map(|kind| ScoreChange {
                path: path.clone(),
                score: *score,
                kind,
            })
        })
        .collect()
}

/// 单项成绩的变化分类
///
/// 分数比较使用精确的浮点相等：数值来自同一份十进制文本，重复渲染结果稳定
pub fn classify(before: Option<&Score>, after: &Score) -> Option<ChangeKind> {
    let actual = after.actual()?;

    match before.map(Score::actual) {
        None => Some(ChangeKind::FirstAppearance),
        Some(None) => Some(ChangeKind::Revealed),
        Some(Some(old)) if old != actual => Some(ChangeKind::Updated),
        Some(Some(_)) => None,
    }
}

/// 生成一门课程的通知文本
///
/// 第一行是课程名称，之后每行 `路径: actual/max`
pub fn render_notification(class_name: &str, changes: &[ScoreChange]) -> String {
    let mut lines = Vec::with_capacity(changes.len() + 1);
    lines.push(format!("{}:", class_name));
    for change in changes {
        lines.push(format!("{}: {}", change.path, change.score));
    }
    lines.join("\n")
}
