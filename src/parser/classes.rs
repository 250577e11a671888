//! 课程列表解析
//!
//! 首页上每门课的"sprawdziany"链接都带有课程 ID

use regex::Regex;
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::shape::full_text;
use crate::error::{ParseError, ParseResult};
use crate::models::ClassHeader;

/// 成绩页链接中的 action 片段
pub const SCORES_ACTION: &str = "dla_stud/studia/sprawdziany/pokaz";

static CLASS_ID_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"wez_id=([0-9]+)").expect("class id regex is valid"));
static DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+").expect("digits regex is valid"));

/// 解析可订阅的课程列表，按 ID 去重并排序
pub fn parse_class_list(html: &str) -> ParseResult<Vec<ClassHeader>> {
    let document = Html::parse_document(html);
    let links = Selector::parse(&format!("a[href*='{}']", SCORES_ACTION))
        .map_err(|e| ParseError::malformed(format!("无效的选择器: {}", e)))?;

    let mut classes = BTreeMap::new();
    for link in document.select(&links) {
        let href = link.value().attr("href").unwrap_or_default();
        let id = class_id_from_href(href)
            .ok_or_else(|| ParseError::malformed(format!("链接中没有课程 ID: {}", href)))?;

        let name = full_text(link);
        if name.is_empty() {
            return Err(ParseError::malformed(format!("课程 {} 没有名称", id)));
        }

        classes.entry(id.clone()).or_insert(ClassHeader::new(id, name));
    }

    Ok(classes.into_values().collect())
}

fn class_id_from_href(href: &str) -> Option<String> {
    if let Some(caps) = CLASS_ID_PARAM.captures(href) {
        return Some(caps[1].to_string());
    }
    DIGITS.find_iter(href).last().map(|m| m.as_str().to_string())
}
