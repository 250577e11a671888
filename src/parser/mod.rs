//! 页面解析
//!
//! - `scores`  - 成绩树 → `路径 -> 成绩`
//! - `classes` - 首页 → 可订阅课程列表
//! - `shape`   - 子节点形状分类

pub mod classes;
pub mod scores;
pub mod shape;

pub use classes::parse_class_list;
pub use scores::{parse_scores, parse_scores_page};
