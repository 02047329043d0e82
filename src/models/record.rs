//! 每组的最终记录
//!
//! ```text
//! { meta, analyses_individuelles: [...], synthese_strategique_analysis_<group_id>: {...},
//!   angle_select: {...}, searchbase_data: {...} }
//! ```

use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::models::stage_result::{
    AngleResult, AnalysisResult, DocumentResult, Payload, Stage, SynthesisResult,
};
use crate::models::work_item::{Group, GroupId};

pub const AGENT_VERSION: &str = "v2.2-with-angle-selector";

/// 一次回退替换（供审计）
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Substitution {
    /// 工作项 ID 或 `group_{id}`
    pub unit: String,
    pub stage: &'static str,
    pub reason: &'static str,
}

/// 记录元信息
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordMeta {
    pub requete_cible: String,
    pub requete_principale: String,
    pub analysis_group_id: GroupId,
    pub date_analyse: String,
    pub articles_analyses: usize,
    pub articles_reussis: usize,
    pub agent_version: &'static str,
    pub language: &'static str,
    pub mode: &'static str,
    pub substitutions: Vec<Substitution>,
}

/// 一个组的完整记录
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    pub meta: RecordMeta,
    pub analyses: Vec<AnalysisResult>,
    pub synthesis: SynthesisResult,
    pub angle: AngleResult,
    pub document: DocumentResult,
}

impl GroupRecord {
    /// 组装记录；回退替换在这里统一收集到 `meta.substitutions`
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        group: &Group,
        main_query: &str,
        started_at: DateTime<Local>,
        mode: &'static str,
        analyses: Vec<AnalysisResult>,
        synthesis: SynthesisResult,
        angle: AngleResult,
        document: DocumentResult,
    ) -> Self {
        let group_unit = group_unit_key(group.id);

        let mut substitutions: Vec<Substitution> = analyses
            .iter()
            .filter_map(|a| substitution(&a.item_id, Stage::Analysis, &a.payload))
            .collect();
        substitutions.extend(
            [
                (Stage::Synthesis, &synthesis.payload),
                (Stage::AngleSelection, &angle.payload),
                (Stage::DocumentGeneration, &document.payload),
            ]
            .into_iter()
            .filter_map(|(stage, payload)| substitution(&group_unit, stage, payload)),
        );

        let meta = RecordMeta {
            requete_cible: group.query.clone(),
            requete_principale: main_query.to_string(),
            analysis_group_id: group.id,
            date_analyse: started_at.to_rfc3339(),
            articles_analyses: group.items.len(),
            articles_reussis: analyses.iter().filter(|a| a.payload.is_parsed()).count(),
            agent_version: AGENT_VERSION,
            language: "fr",
            mode,
            substitutions,
        };

        Self {
            meta,
            analyses,
            synthesis,
            angle,
            document,
        }
    }

    pub fn group_id(&self) -> GroupId {
        self.meta.analysis_group_id
    }

    /// 下游按 `synthese_strategique_` 前缀切分，剩下的 `analysis_<id>` 作为组标识
    pub fn synthesis_key(&self) -> String {
        format!("synthese_strategique_analysis_{}", self.group_id())
    }

    /// 完整输出
    pub fn to_value(&self) -> Value {
        let mut record = Map::new();
        record.insert("meta".into(), self.meta_value());
        record.insert(
            "analyses_individuelles".into(),
            Value::Array(self.analyses.iter().map(AnalysisResult::to_value).collect()),
        );
        record.insert(self.synthesis_key(), self.synthesis.payload.to_value());
        record.insert("angle_select".into(), self.angle.payload.to_value());
        record.insert("searchbase_data".into(), self.document.payload.to_value());
        Value::Object(record)
    }

    /// 精简投影：只保留 meta、综合和角度
    pub fn simplified(&self) -> Value {
        let mut syntheses = Map::new();
        syntheses.insert(self.synthesis_key(), self.synthesis.payload.to_value());
        json!({
            "meta": self.meta_value(),
            "syntheses_strategiques": syntheses,
            "angle_select": self.angle.payload.to_value(),
        })
    }

    fn meta_value(&self) -> Value {
        serde_json::to_value(&self.meta).unwrap_or(Value::Null)
    }
}

pub fn group_unit_key(group_id: GroupId) -> String {
    format!("group_{}", group_id)
}

fn substitution(unit: &str, stage: Stage, payload: &Payload) -> Option<Substitution> {
    payload.fallback_reason().map(|reason| Substitution {
        unit: unit.to_string(),
        stage: stage.name(),
        reason: reason.code(),
    })
}
