//! 节点形状
//!
//! 成绩页面只有少数几种有意义的节点：分类子树、叶子成绩表、其他（通常是分类名称）。
//! 先把子元素归类成这几种形状，再对形状做模式匹配。

use scraper::ElementRef;

/// 分类子树容器的 id 前缀
pub const CATEGORY_ID_PREFIX: &str = "childrenof";

/// 子元素的形状
#[derive(Debug, Clone, Copy)]
pub enum NodeShape<'a> {
    /// `<div id="childrenof…">`：嵌套分类，名称在前一个兄弟节点里
    CategoryTree(ElementRef<'a>),
    /// `<table>`：恰好一项成绩
    LeafTable(ElementRef<'a>),
    /// 其他节点，可能是分类名称
    Other(ElementRef<'a>),
}

impl<'a> NodeShape<'a> {
    pub fn classify(element: ElementRef<'a>) -> Self {
        let value = element.value();
        match value.name() {
            "div" if value.id().is_some_and(|id| id.starts_with(CATEGORY_ID_PREFIX)) => {
                NodeShape::CategoryTree(element)
            }
            "table" => NodeShape::LeafTable(element),
            _ => NodeShape::Other(element),
        }
    }
}

/// 按文档顺序返回元素类型的直接子节点
pub fn element_children<'a>(element: ElementRef<'a>) -> Vec<ElementRef<'a>> {
    element.children().filter_map(ElementRef::wrap).collect()
}

/// 第一个非空的直接文本子节点
pub fn leading_text(element: ElementRef<'_>) -> Option<String> {
    element
        .children()
        .filter_map(|node| node.value().as_text().map(|t| t.trim().to_string()))
        .find(|t| !t.is_empty())
}

/// 元素内全部文本，去掉首尾空白
pub fn full_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}
