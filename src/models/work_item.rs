//! 输入数据模型：语料 → 组 → 工作项

use std::fmt;

use serde::{Deserialize, Serialize};

/// 组 ID（一个目标查询），在四个阶段之间保持不变
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub usize);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 工作项的数值元数据
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemMetrics {
    /// 从正文统计的词数
    pub word_count: usize,
    /// 输入文件声明的词数
    pub declared_word_count: u64,
    pub authority_score: f64,
}

/// 一个可分析单元（一篇竞品文章），加载后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// 形如 `query_{group}_position_{position}`
    pub id: String,
    pub group_id: GroupId,
    pub position: u32,
    pub url: String,
    pub title: String,
    pub text: String,
    pub metrics: ItemMetrics,
}

impl WorkItem {
    pub fn make_id(group_id: GroupId, position: u32) -> String {
        format!("query_{}_position_{}", group_id, position)
    }
}

/// 一个组：目标查询及其工作项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    pub query: String,
    pub items: Vec<WorkItem>,
}

/// 整份语料
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    /// 主查询（来自文件名）
    pub main_query: String,
    pub groups: Vec<Group>,
}

impl Corpus {
    pub fn item_count(&self) -> usize {
        self.groups.iter().map(|g| g.items.len()).sum()
    }
}
