//! 阶段结果模型
//!
//! 每个阶段有自己的结果类型，都带一个 `Payload`：
//! 要么是解析成功的对象，要么是带 `parsing_error: true` 的回退载荷。
//! 回退载荷总是包含该阶段的必需键，下游永远不会看到缺失的键。

use std::fmt;

use chrono::{DateTime, Local};
use serde_json::{json, Value};

use crate::models::work_item::{GroupId, WorkItem};
use crate::services::repair::JsonObject;

/// 四个阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Analysis,
    Synthesis,
    AngleSelection,
    DocumentGeneration,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Analysis,
        Stage::Synthesis,
        Stage::AngleSelection,
        Stage::DocumentGeneration,
    ];

    /// 机器可读名称（写入输出）
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Analysis => "analysis",
            Stage::Synthesis => "synthesis",
            Stage::AngleSelection => "angle_selection",
            Stage::DocumentGeneration => "document_generation",
        }
    }

    /// 日志显示名称
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Analysis => "文章分析",
            Stage::Synthesis => "战略综合",
            Stage::AngleSelection => "角度选择",
            Stage::DocumentGeneration => "文档生成",
        }
    }

    /// 该阶段的中性默认字段
    fn neutral_fields(&self) -> Value {
        match self {
            Stage::Analysis => json!({
                "pertinence_requete": { "score": 0.5, "justification": "Parsing failed" }
            }),
            Stage::Synthesis => json!({
                "analyse_angles_concurrentiels": { "angles_dominants": [], "angles_emergents": [] }
            }),
            Stage::AngleSelection => json!({
                "angle_recommande": "",
                "score_total": 0,
                "justification": "Parsing failed"
            }),
            Stage::DocumentGeneration => json!({
                "sections": [],
                "donnees_a_collecter": []
            }),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// 为什么使用了回退载荷
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    /// 模型输出无法修复
    MalformedOutput,
    /// 单元本身失败（重试耗尽、超时、panic）
    UnitFailure(String),
}

impl FallbackReason {
    pub fn code(&self) -> &'static str {
        match self {
            FallbackReason::MalformedOutput => "malformed_output",
            FallbackReason::UnitFailure(_) => "unit_failure",
        }
    }
}

/// 阶段载荷：成功 / 回退 判别
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Parsed(JsonObject),
    Fallback {
        body: JsonObject,
        reason: FallbackReason,
    },
}

impl Payload {
    /// 构建该阶段的回退载荷
    pub fn fallback(stage: Stage, reason: FallbackReason) -> Self {
        let mut body = match stage.neutral_fields() {
            Value::Object(map) => map,
            _ => JsonObject::new(),
        };
        body.insert("parsing_error".into(), Value::Bool(true));
        body.insert("fallback_reason".into(), json!(reason.code()));
        if let FallbackReason::UnitFailure(message) = &reason {
            body.insert("error".into(), json!(message));
        }
        Payload::Fallback { body, reason }
    }

    pub fn is_parsed(&self) -> bool {
        matches!(self, Payload::Parsed(_))
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match self {
            Payload::Parsed(_) => None,
            Payload::Fallback { reason, .. } => Some(reason),
        }
    }

    pub fn body(&self) -> &JsonObject {
        match self {
            Payload::Parsed(object) => object,
            Payload::Fallback { body, .. } => body,
        }
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.body().clone())
    }
}

/// 所有阶段结果的共同接口
pub trait StageOutput {
    fn payload(&self) -> &Payload;
}

/// 单篇文章的分析结果
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub item_id: String,
    pub group_id: GroupId,
    pub position: u32,
    pub payload: Payload,
    pub analyzed_at: DateTime<Local>,
}

impl AnalysisResult {
    pub fn new(item: &WorkItem, payload: Payload) -> Self {
        Self {
            item_id: item.id.clone(),
            group_id: item.group_id,
            position: item.position,
            payload,
            analyzed_at: Local::now(),
        }
    }

    pub fn fallback(item: &WorkItem, reason: FallbackReason) -> Self {
        Self::new(item, Payload::fallback(Stage::Analysis, reason))
    }

    /// 输出形态：载荷 + article_id + timestamp + validation_report
    pub fn to_value(&self) -> Value {
        let parsed = self.payload.is_parsed();
        let mut object = self.payload.body().clone();
        object.insert("article_id".into(), json!(self.item_id));
        object.insert("timestamp".into(), json!(self.analyzed_at.to_rfc3339()));
        object.insert(
            "validation_report".into(),
            json!({
                "validated": parsed,
                "quality_score": if parsed { 1.0 } else { 0.5 },
                "parsing_successful": parsed,
            }),
        );
        Value::Object(object)
    }
}

/// 组级综合结果
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub group_id: GroupId,
    pub payload: Payload,
}

impl SynthesisResult {
    pub fn fallback(group_id: GroupId, reason: FallbackReason) -> Self {
        Self {
            group_id,
            payload: Payload::fallback(Stage::Synthesis, reason),
        }
    }
}

/// 组级角度选择结果
#[derive(Debug, Clone, PartialEq)]
pub struct AngleResult {
    pub group_id: GroupId,
    pub payload: Payload,
}

impl AngleResult {
    pub fn fallback(group_id: GroupId, reason: FallbackReason) -> Self {
        Self {
            group_id,
            payload: Payload::fallback(Stage::AngleSelection, reason),
        }
    }
}

/// 组级文档（searchbase）生成结果
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentResult {
    pub group_id: GroupId,
    pub payload: Payload,
}

impl DocumentResult {
    pub fn fallback(group_id: GroupId, reason: FallbackReason) -> Self {
        Self {
            group_id,
            payload: Payload::fallback(Stage::DocumentGeneration, reason),
        }
    }
}

impl StageOutput for AnalysisResult {
    fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl StageOutput for SynthesisResult {
    fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl StageOutput for AngleResult {
    fn payload(&self) -> &Payload {
        &self.payload
    }
}

impl StageOutput for DocumentResult {
    fn payload(&self) -> &Payload {
        &self.payload
    }
}
