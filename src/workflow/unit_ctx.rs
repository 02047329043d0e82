//! 单元处理上下文
//!
//! 封装"我正在处理哪个阶段、哪个组的哪个单元"这一信息

use std::fmt::Display;

use crate::models::stage_result::Stage;
use crate::models::work_item::GroupId;

/// 单元处理上下文
#[derive(Debug, Clone)]
pub struct UnitCtx {
    pub stage: Stage,

    pub group_id: GroupId,

    /// 工作项 ID（分析阶段）或 `group_{id}`（组级阶段）
    pub unit_key: String,
}

impl UnitCtx {
    pub fn new(stage: Stage, group_id: GroupId, unit_key: impl Into<String>) -> Self {
        Self {
            stage,
            group_id,
            unit_key: unit_key.into(),
        }
    }
}

impl Display for UnitCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[组 {} {} 单元 {}]",
            self.group_id,
            self.stage.label(),
            self.unit_key
        )
    }
}
