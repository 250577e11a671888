//! 成绩树解析
//!
//! 递归下降：遇到分类子树就带着扩展后的前缀递归，
//! 同层没有分类时把每张表格当作一项成绩。

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;

use super::shape::{element_children, full_text, leading_text, NodeShape, CATEGORY_ID_PREFIX};
use crate::error::{ParseError, ParseResult};
use crate::models::{Score, ScorePath, NO_CEILING};

/// 尚未评分
pub const NO_RESULT_YET: &str = "brak wyniku";
/// 尚未给出成绩
pub const NO_GRADE_YET: &str = "brak oceny";
/// 成绩被隐藏
pub const RESULT_HIDDEN: &str = "wynik jest ukryty";

static MAX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[0-9]+(?:[.,][0-9]+)?").expect("max regex is valid"));

/// 解析整张成绩页面
///
/// 从文档中第一个 `id^="childrenof"` 的节点开始
pub fn parse_scores_page(html: &str) -> ParseResult<BTreeMap<ScorePath, Score>> {
    let document = Html::parse_document(html);
    let root_selector = selector(&format!("[id^='{}']", CATEGORY_ID_PREFIX))?;
    let root = document
        .select(&root_selector)
        .next()
        .ok_or_else(|| ParseError::malformed("找不到顶层 childrenof 节点"))?;

    parse_scores(root)
}

/// 从子树根节点解析出 `路径 -> 成绩`
pub fn parse_scores(root: ElementRef<'_>) -> ParseResult<BTreeMap<ScorePath, Score>> {
    let mut scores = BTreeMap::new();
    collect_scores(root, "", &mut scores)?;
    Ok(scores)
}

fn collect_scores(
    node: ElementRef<'_>,
    prefix: &str,
    scores: &mut BTreeMap<ScorePath, Score>,
) -> ParseResult<()> {
    let children = element_children(node);
    if children.is_empty() {
        return Err(ParseError::malformed(format!(
            "节点没有子元素 (前缀: \"{}\")",
            prefix
        )));
    }

    let shapes: Vec<NodeShape<'_>> = children.iter().copied().map(NodeShape::classify).collect();
    let mut found_subtree = false;

    for (i, shape) in shapes.iter().enumerate() {
        let NodeShape::CategoryTree(tree) = shape else {
            continue;
        };
        found_subtree = true;

        let label = match i.checked_sub(1) {
            Some(label_index) => children[label_index],
            None => {
                return Err(ParseError::MissingCategoryName {
                    prefix: prefix.to_string(),
                })
            }
        };
        let category = category_name(label, prefix)?;
        collect_scores(*tree, &format!("{}{}/", prefix, category), scores)?;
    }

    if found_subtree {
        return Ok(());
    }

    for shape in &shapes {
        let NodeShape::LeafTable(table) = shape else {
            continue;
        };
        let (name, score) = extract_leaf(*table)?;
        let path = ScorePath::new(format!("{}{}", prefix, name));
        if scores.contains_key(&path) {
            return Err(ParseError::DuplicateScoreName {
                path: path.to_string(),
            });
        }
        scores.insert(path, score);
    }

    Ok(())
}

/// 分类名称：标签节点中唯一的 `.strong` 元素
fn category_name(label: ElementRef<'_>, prefix: &str) -> ParseResult<String> {
    let strong = selector(".strong")?;
    let found: Vec<ElementRef<'_>> = label.select(&strong).collect();
    if found.len() != 1 {
        return Err(ParseError::AmbiguousCategoryLabel {
            prefix: prefix.to_string(),
            found: found.len(),
        });
    }

    // 名称后面常跟着 <i>(waga 2)</i> 之类的说明，只取开头的文本
    let name = leading_text(found[0]).unwrap_or_else(|| full_text(found[0]));
    if name.is_empty() {
        return Err(ParseError::malformed(format!(
            "分类名称为空 (前缀: \"{}\")",
            prefix
        )));
    }
    Ok(name)
}

/// 叶子成绩表
///
/// 第一行至少三列：第二列是名称和上限说明，第三列是成绩状态
fn extract_leaf(table: ElementRef<'_>) -> ParseResult<(String, Score)> {
    let row_selector = selector("tr")?;
    let row = table
        .select(&row_selector)
        .next()
        .ok_or_else(|| ParseError::malformed("成绩表中没有 <tr>"))?;

    let cells = element_children(row);
    if cells.len() < 3 {
        return Err(ParseError::malformed(format!(
            "成绩行只有 {} 列，至少需要 3 列",
            cells.len()
        )));
    }

    let name = leading_text(cells[1]).ok_or_else(|| ParseError::malformed("成绩名称为空"))?;

    let max_text = element_children(cells[1])
        .first()
        .map(|e| full_text(*e))
        .unwrap_or_default();
    let max = parse_max(&max_text)?;

    let status_text = element_children(cells[2])
        .first()
        .map(|e| full_text(*e))
        .unwrap_or_else(|| full_text(cells[2]));

    Ok((name, classify_score(&status_text, max)?))
}

/// 提取上限，没有数字时说明是定性成绩，返回哨兵值
pub fn parse_max(text: &str) -> ParseResult<f64> {
    match MAX_REGEX.find(text) {
        Some(m) => parse_decimal(m.as_str()),
        None => Ok(NO_CEILING),
    }
}

/// 按状态文本确定成绩的三种状态
pub fn classify_score(text: &str, max: f64) -> ParseResult<Score> {
    match text.trim() {
        NO_RESULT_YET | NO_GRADE_YET => Ok(Score::Unknown { max }),
        RESULT_HIDDEN => Ok(Score::Hidden { max }),
        other => Ok(Score::Visible {
            actual: parse_decimal(other)?,
            max,
        }),
    }
}

/// 本地化小数（逗号作小数点）
fn parse_decimal(text: &str) -> ParseResult<f64> {
    let normalized: String = text
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    match normalized.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ParseError::InvalidScoreValue {
            text: text.to_string(),
        }),
    }
}

fn selector(css: &str) -> ParseResult<Selector> {
    Selector::parse(css).map_err(|e| ParseError::malformed(format!("无效的选择器 {}: {}", css, e)))
}
