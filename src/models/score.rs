//! 成绩模型
//!
//! 成绩有三种状态：可见、被隐藏、尚未评分

use serde::{Deserialize, Serialize};
use std::fmt;

/// 定性成绩（没有数值上限）时使用的上限哨兵值
pub const NO_CEILING: f64 = -1.0;

/// 成绩路径
///
/// 由分类名按从根到叶的顺序以 `/` 连接，例如 `Egzamin/Termin I/Zadanie 3`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScorePath(String);

impl ScorePath {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ScorePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ScorePath {
    fn from(path: &str) -> Self {
        Self(path.to_string())
    }
}

impl From<String> for ScorePath {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// 单项成绩
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Score {
    /// 已公布
    Visible { actual: f64, max: f64 },
    /// 教师隐藏了具体分数
    Hidden { max: f64 },
    /// 尚未评分
    Unknown { max: f64 },
}

impl Score {
    pub fn max(&self) -> f64 {
        match *self {
            Score::Visible { max, .. } | Score::Hidden { max } | Score::Unknown { max } => max,
        }
    }

    /// 只有可见的成绩才有实际分数
    pub fn actual(&self) -> Option<f64> {
        match *self {
            Score::Visible { actual, .. } => Some(actual),
            Score::Hidden { .. } | Score::Unknown { .. } => None,
        }
    }

    /// 上限是否为定性成绩的哨兵值
    pub fn has_ceiling(&self) -> bool {
        self.max() != NO_CEILING
    }
}

impl fmt::Display for Score {
    /// 通知里使用的格式：`actual/max`，没有上限时只显示 `actual`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = match *self {
            Score::Visible { actual, .. } => actual.to_string(),
            Score::Hidden { .. } => "hidden".to_string(),
            Score::Unknown { .. } => "?".to_string(),
        };
        if self.has_ceiling() {
            write!(f, "{}/{}", shown, self.max())
        } else {
            f.write_str(&shown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_visibility_rule() {
        assert_eq!(Score::Visible { actual: 1.0, max: 2.0 }.actual(), Some(1.0));
        assert_eq!(Score::Hidden { max: 2.0 }.actual(), None);
        assert_eq!(Score::Unknown { max: 2.0 }.actual(), None);
    }

    #[test]
    fn test_display_with_and_without_ceiling() {
        assert_eq!(Score::Visible { actual: 9.3, max: 10.0 }.to_string(), "9.3/10");
        assert_eq!(
            Score::Visible {
                actual: 4.5,
                max: NO_CEILING
            }
            .to_string(),
            "4.5"
        );
    }

    #[test]
    fn test_serde_keeps_variant_and_sentinel() {
        let score = Score::Unknown { max: NO_CEILING };
        let json = serde_json::to_string(&score).unwrap();
        assert_eq!(json, r#"{"state":"unknown","max":-1.0}"#);
        let back: Score = serde_json::from_str(&json).unwrap();
        assert_eq!(back, score);
        assert!(!back.has_ceiling());
    }
}
