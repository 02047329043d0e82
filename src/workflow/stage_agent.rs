//! 阶段单元 - 流程层
//!
//! 核心职责：定义"一个单元"的完整处理流程
//!
//! 流程顺序：
//! 1. 构建提示词（services::prompts）
//! 2. 调用补全客户端（重试 / 超时在客户端内部）
//! 3. 修复结构化输出（services::repair）
//! 4. 无法修复 → 该阶段的回退载荷
//!
//! 补全调用彻底失败时返回 `Err`，由编排层转换成回退载荷并记录。

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::clients::completion::{CompletionClient, SamplingParams, Usage};
use crate::error::CompletionError;
use crate::models::record::group_unit_key;
use crate::models::stage_result::{
    AngleResult, AnalysisResult, DocumentResult, FallbackReason, Payload, Stage, SynthesisResult,
};
use crate::models::work_item::{GroupId, WorkItem};
use crate::services::{prompts, repair};
use crate::workflow::unit_ctx::UnitCtx;

/// 单元结果：阶段结果 + 本次调用的用量
pub type UnitResult<T> = Result<(T, Usage), CompletionError>;

/// 各阶段的采样参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageParams {
    pub analysis: SamplingParams,
    pub synthesis: SamplingParams,
    pub angle: SamplingParams,
    pub document: SamplingParams,
}

impl Default for StageParams {
    fn default() -> Self {
        let base = SamplingParams::default();
        Self {
            analysis: base,
            synthesis: base,
            angle: SamplingParams {
                temperature: 0.7,
                max_tokens: 2000,
                ..base
            },
            document: SamplingParams {
                temperature: 0.3,
                max_tokens: 3000,
                ..base
            },
        }
    }
}

impl StageParams {
    /// 所有阶段使用同一个单次调用超时
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.analysis.timeout = timeout;
        self.synthesis.timeout = timeout;
        self.angle.timeout = timeout;
        self.document.timeout = timeout;
        self
    }

    pub fn for_stage(&self, stage: Stage) -> SamplingParams {
        match stage {
            Stage::Analysis => self.analysis,
            Stage::Synthesis => self.synthesis,
            Stage::AngleSelection => self.angle,
            Stage::DocumentGeneration => self.document,
        }
    }
}

/// 阶段单元执行器
///
/// - 每个方法处理一个单元（一篇文章或一个组）
/// - 不持有 Vec<Group>，不关心并发和顺序
/// - 只依赖补全客户端和业务能力（prompts / repair）
pub struct StageAgent {
    client: CompletionClient,
    params: StageParams,
    verbose_logging: bool,
}

impl StageAgent {
    pub fn new(client: CompletionClient, params: StageParams) -> Self {
        Self {
            client,
            params,
            verbose_logging: false,
        }
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }

    /// 分析单篇文章
    pub async fn analyze(&self, item: &WorkItem) -> UnitResult<AnalysisResult> {
        let ctx = UnitCtx::new(Stage::Analysis, item.group_id, item.id.as_str());
        let messages = prompts::analysis_messages(item);

        let (payload, usage) = self.call(&ctx, messages).await?;
        Ok((AnalysisResult::new(item, payload), usage))
    }

    /// 组级战略综合：输入为该组全部分析（包括回退载荷）
    pub async fn synthesize(
        &self,
        group_id: GroupId,
        query: &str,
        analyses: &[AnalysisResult],
    ) -> UnitResult<SynthesisResult> {
        let ctx = UnitCtx::new(Stage::Synthesis, group_id, group_unit_key(group_id));
        let values: Vec<_> = analyses.iter().map(AnalysisResult::to_value).collect();
        let messages = prompts::synthesis_messages(query, &values);

        let (payload, usage) = self.call(&ctx, messages).await?;
        Ok((SynthesisResult { group_id, payload }, usage))
    }

    /// 组级角度选择
    pub async fn select_angle(
        &self,
        group_id: GroupId,
        query: &str,
        synthesis: &SynthesisResult,
    ) -> UnitResult<AngleResult> {
        let ctx = UnitCtx::new(Stage::AngleSelection, group_id, group_unit_key(group_id));
        let messages = prompts::angle_messages(query, synthesis.payload.body());

        let (payload, usage) = self.call(&ctx, messages).await?;
        Ok((AngleResult { group_id, payload }, usage))
    }

    /// 组级文档（searchbase）生成
    pub async fn generate_document(
        &self,
        group_id: GroupId,
        query: &str,
        synthesis: &SynthesisResult,
        angle: &AngleResult,
    ) -> UnitResult<DocumentResult> {
        let ctx = UnitCtx::new(
            Stage::DocumentGeneration,
            group_id,
            group_unit_key(group_id),
        );
        let messages =
            prompts::document_messages(query, synthesis.payload.body(), angle.payload.body());

        let (payload, usage) = self.call(&ctx, messages).await?;
        Ok((DocumentResult { group_id, payload }, usage))
    }

    /// 一次调用 + 修复；无法修复时返回该阶段的回退载荷
    async fn call(
        &self,
        ctx: &UnitCtx,
        (system, user): (String, String),
    ) -> Result<(Payload, Usage), CompletionError> {
        debug!("{} 发送请求 ({} 字符)", ctx, user.chars().count());

        let completion = self
            .client
            .send(&system, &user, self.params.for_stage(ctx.stage))
            .await?;

        if self.verbose_logging {
            info!(
                "{} 模型输出: {}",
                ctx,
                crate::utils::logging::truncate_text(&completion.text, 200)
            );
        }

        let payload = match repair::repair(&completion.text) {
            Some(repaired) => {
                debug!("{} ✓ 输出解析成功 ({:?})", ctx, repaired.step);
                Payload::Parsed(repaired.object)
            }
            None => {
                warn!("{} ⚠️ 输出无法解析为 JSON 对象，使用回退载荷", ctx);
                Payload::fallback(ctx.stage, FallbackReason::MalformedOutput)
            }
        };

        Ok((payload, completion.usage))
    }
}
