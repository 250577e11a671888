use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::score::{Score, ScorePath};

/// 用户 ID（由外部凭证服务分配）
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 课程头信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHeader {
    /// 教务网站分配的课程 ID
    pub id: String,
    /// 课程显示名称
    pub name: String,
}

impl ClassHeader {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// 课程成绩快照
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Class {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub scores: BTreeMap<ScorePath, Score>,
}

impl Class {
    pub fn new(header: &ClassHeader, scores: BTreeMap<ScorePath, Score>) -> Self {
        Self {
            id: header.id.clone(),
            name: header.name.clone(),
            scores,
        }
    }

    pub fn header(&self) -> ClassHeader {
        ClassHeader::new(&self.id, &self.name)
    }
}

/// 持久化的用户记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(default)]
    pub available_classes: Vec<ClassHeader>,
    #[serde(default)]
    pub observed_classes: Vec<ClassHeader>,
    /// 只保存已订阅课程的最近一次快照，与 `observed_classes` 按 ID 对应
    #[serde(default)]
    pub classes: Vec<Class>,
    pub next_check: DateTime<Utc>,
}

impl User {
    /// 新注册的用户：只有可选课程，立即到期
    pub fn new(available_classes: Vec<ClassHeader>, next_check: DateTime<Utc>) -> Self {
        Self {
            available_classes,
            observed_classes: Vec::new(),
            classes: Vec::new(),
            next_check,
        }
    }

    pub fn class(&self, class_id: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.id == class_id)
    }

    pub fn is_observed(&self, class_id: &str) -> bool {
        self.observed_classes.iter().any(|c| c.id == class_id)
    }

    pub fn available_class(&self, class_id: &str) -> Option<&ClassHeader> {
        self.available_classes.iter().find(|c| c.id == class_id)
    }

    /// 记录在 `now` 时是否到期
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_check < now
    }

    /// 添加订阅及其快照，快照按课程 ID 排序
    pub fn observe(&mut self, class: Class) {
        if !self.is_observed(&class.id) {
            self.observed_classes.push(class.header());
        }
        self.classes.retain(|c| c.id != class.id);
        self.classes.push(class);
        self.classes.sort_by(|a, b| a.id.cmp(&b.id));
    }

    /// 取消订阅，返回是否确实订阅过
    pub fn unobserve(&mut self, class_id: &str) -> bool {
        let before = self.observed_classes.len();
        self.observed_classes.retain(|c| c.id != class_id);
        self.classes.retain(|c| c.id != class_id);
        before != self.observed_classes.len()
    }

    /// 用新快照替换课程列表，其余字段保持不变
    pub fn with_classes(&self, classes: Vec<Class>) -> Self {
        Self {
            available_classes: self.available_classes.clone(),
            observed_classes: self.observed_classes.clone(),
            classes,
            next_check: self.next_check,
        }
    }
}
