//! 阶段流水线编排器 - 编排层
//!
//! ## 职责
//!
//! 按顺序驱动四个阶段：
//!
//! ```text
//! 分析（每篇文章） → 综合（每组） → 角度选择（每组） → 文档生成（每组）
//! ```
//!
//! 每个阶段是一次有界扇出批次（`fan_out`），批次结束就是阶段屏障。
//! 单元失败在这里被转换成回退载荷，并计入阶段统计；没有阶段级重试。
//!
//! ## 调度策略
//!
//! - `Parallel`：每个阶段一次覆盖所有组
//! - `SequentialPerGroup`：一个组跑完四个阶段后再处理下一组
//!
//! 两种策略复用同一组阶段函数，输出的记录结构完全相同。

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{error, info};

use crate::clients::completion::{CompletionClient, Usage};
use crate::config::{Config, SchedulingPolicy};
use crate::models::record::{group_unit_key, GroupRecord};
use crate::models::stage_result::{
    AngleResult, AnalysisResult, DocumentResult, FallbackReason, Payload, Stage, StageOutput,
    SynthesisResult,
};
use crate::models::work_item::{Corpus, Group, GroupId};
use crate::orchestrator::fan_out::{fan_out, UnitOutcome};
use crate::orchestrator::grouping::{complete_groups, Grouped};
use crate::utils::logging::{log_stage_complete, log_stage_start};
use crate::workflow::stage_agent::StageAgent;

/// 各阶段并发上限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageLimits {
    pub analysis: usize,
    pub synthesis: usize,
    pub angle: usize,
    pub document: usize,
}

impl Default for StageLimits {
    fn default() -> Self {
        Self {
            analysis: 100,
            synthesis: 100,
            angle: 10,
            document: 10,
        }
    }
}

impl StageLimits {
    pub fn for_stage(&self, stage: Stage) -> usize {
        match stage {
            Stage::Analysis => self.analysis,
            Stage::Synthesis => self.synthesis,
            Stage::AngleSelection => self.angle,
            Stage::DocumentGeneration => self.document,
        }
    }
}

/// 单个阶段的统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageSummary {
    #[serde(serialize_with = "serialize_stage")]
    pub stage: Stage,
    /// 解析成功
    pub succeeded: usize,
    /// 输出无法修复，使用了回退载荷
    pub fallbacks: usize,
    /// 单元失败（重试耗尽 / 超时 / panic），使用了回退载荷
    pub failed: usize,
    /// 失败单元的键
    pub failed_keys: Vec<String>,
}

fn serialize_stage<S: serde::Serializer>(stage: &Stage, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(stage.name())
}

impl StageSummary {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            succeeded: 0,
            fallbacks: 0,
            failed: 0,
            failed_keys: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.fallbacks + self.failed
    }

    /// 合并另一批次的统计（逐组策略）
    pub fn merge(&mut self, other: StageSummary) {
        self.succeeded += other.succeeded;
        self.fallbacks += other.fallbacks;
        self.failed += other.failed;
        self.failed_keys.extend(other.failed_keys);
    }

    fn record(&mut self, payload: &Payload) {
        match payload.fallback_reason() {
            None => self.succeeded += 1,
            Some(FallbackReason::MalformedOutput) => self.fallbacks += 1,
            // 失败单元在 settle 中单独计数
            Some(FallbackReason::UnitFailure(_)) => {}
        }
    }
}

/// 一次运行的统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub policy: &'static str,
    pub groups: usize,
    pub items: usize,
    pub stages: Vec<StageSummary>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

/// 一次运行的结果（只存在于内存中）
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub records: Vec<GroupRecord>,
    pub summary: RunSummary,
    pub usage: Usage,
}

/// 一组组经过四个阶段后的中间结果
struct Batch {
    records: Vec<GroupRecord>,
    stages: Vec<StageSummary>,
    usage: Usage,
}

/// 阶段流水线
pub struct Pipeline {
    agent: Arc<StageAgent>,
    limits: StageLimits,
}

impl Pipeline {
    pub fn new(agent: StageAgent, limits: StageLimits) -> Self {
        Self {
            agent: Arc::new(agent),
            limits,
        }
    }

    /// 从配置构建（采样参数、并发上限、详细日志）
    pub fn from_config(client: CompletionClient, config: &Config) -> Self {
        let agent = StageAgent::new(client, config.stage_params())
            .with_verbose_logging(config.verbose_logging);
        Self::new(agent, config.stage_limits())
    }

    /// 运行完整流水线
    pub async fn run(&self, corpus: &Corpus, policy: SchedulingPolicy) -> PipelineOutput {
        let started = Instant::now();
        let started_at = Local::now();
        let mode = policy.name();

        info!(
            "🔄 流水线启动: {} 个组，{} 篇文章 ({})",
            corpus.groups.len(),
            corpus.item_count(),
            mode
        );

        let batch = match policy {
            SchedulingPolicy::Parallel => {
                self.run_groups(&corpus.groups, &corpus.main_query, started_at, mode)
                    .await
            }
            SchedulingPolicy::SequentialPerGroup => {
                let mut merged = Batch {
                    records: Vec::with_capacity(corpus.groups.len()),
                    stages: Stage::ALL.iter().map(|&s| StageSummary::new(s)).collect(),
                    usage: Usage::default(),
                };
                for (idx, group) in corpus.groups.iter().enumerate() {
                    info!(
                        "[组 {}] ▶ 逐组处理 {}/{}: {}",
                        group.id,
                        idx + 1,
                        corpus.groups.len(),
                        group.query
                    );
                    let batch = self
                        .run_groups(
                            std::slice::from_ref(group),
                            &corpus.main_query,
                            started_at,
                            mode,
                        )
                        .await;
                    merged.records.extend(batch.records);
                    merged.usage.absorb(&batch.usage);
                    for (total, stage) in merged.stages.iter_mut().zip(batch.stages) {
                        total.merge(stage);
                    }
                }
                merged
            }
        };

        let summary = RunSummary {
            policy: mode,
            groups: corpus.groups.len(),
            items: corpus.item_count(),
            stages: batch.stages,
            elapsed: started.elapsed(),
        };

        PipelineOutput {
            records: batch.records,
            summary,
            usage: batch.usage,
        }
    }

    /// 对给定的组依次执行四个阶段，每个阶段一个批次
    async fn run_groups(
        &self,
        groups: &[Group],
        main_query: &str,
        started_at: DateTime<Local>,
        mode: &'static str,
    ) -> Batch {
        let mut usage = Usage::default();
        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();

        let (mut analyses, analysis_summary) = self.analysis_stage(groups, &mut usage).await;
        let (syntheses, synthesis_summary) =
            self.synthesis_stage(groups, &analyses, &mut usage).await;
        let syntheses = complete_groups(&ids, syntheses, |id| {
            SynthesisResult::fallback(id, FallbackReason::UnitFailure("missing synthesis".into()))
        });
        let (angles, angle_summary) = self.angle_stage(groups, &syntheses, &mut usage).await;
        let angles = complete_groups(&ids, angles, |id| {
            AngleResult::fallback(id, FallbackReason::UnitFailure("missing angle".into()))
        });
        let (documents, document_summary) = self
            .document_stage(groups, &syntheses, &angles, &mut usage)
            .await;
        let documents = complete_groups(&ids, documents, |id| {
            DocumentResult::fallback(id, FallbackReason::UnitFailure("missing document".into()))
        });

        let records = groups
            .iter()
            .zip(syntheses)
            .zip(angles)
            .zip(documents)
            .map(|(((group, (_, synthesis)), (_, angle)), (_, document))| {
                GroupRecord::assemble(
                    group,
                    main_query,
                    started_at,
                    mode,
                    analyses.take(group.id),
                    synthesis,
                    angle,
                    document,
                )
            })
            .collect();

        Batch {
            records,
            stages: vec![
                analysis_summary,
                synthesis_summary,
                angle_summary,
                document_summary,
            ],
            usage,
        }
    }

    /// 分析阶段：所有文章一个批次，结果按组归并（空组保留）
    async fn analysis_stage(
        &self,
        groups: &[Group],
        usage: &mut Usage,
    ) -> (Grouped<AnalysisResult>, StageSummary) {
        let items: Vec<_> = groups.iter().flat_map(|g| g.items.iter().cloned()).collect();
        let limit = self.limits.for_stage(Stage::Analysis);
        let started = Instant::now();
        log_stage_start(Stage::Analysis, items.len(), limit);

        let agent = self.agent.clone();
        let outcomes = fan_out(items.clone(), limit, move |item| {
            let agent = agent.clone();
            async move { agent.analyze(&item).await }
        })
        .await;

        let keys: Vec<String> = items.iter().map(|i| i.id.clone()).collect();
        let (results, summary) = settle(Stage::Analysis, &keys, outcomes, usage, |idx, reason| {
            AnalysisResult::fallback(&items[idx], reason)
        });
        log_stage_complete(&summary, started.elapsed());

        let mut grouped = Grouped::seeded(groups.iter().map(|g| g.id));
        for result in results {
            grouped.push(result.group_id, result);
        }
        (grouped, summary)
    }

    /// 综合阶段：每组一个单元，输入为该组全部分析
    async fn synthesis_stage(
        &self,
        groups: &[Group],
        analyses: &Grouped<AnalysisResult>,
        usage: &mut Usage,
    ) -> (Vec<(GroupId, SynthesisResult)>, StageSummary) {
        let inputs: Vec<_> = groups
            .iter()
            .map(|g| {
                let group_analyses = analyses.get(g.id).map(<[_]>::to_vec).unwrap_or_default();
                (g.id, g.query.clone(), group_analyses)
            })
            .collect();
        let limit = self.limits.for_stage(Stage::Synthesis);
        let started = Instant::now();
        log_stage_start(Stage::Synthesis, inputs.len(), limit);

        let agent = self.agent.clone();
        let outcomes = fan_out(inputs, limit, move |(id, query, group_analyses)| {
            let agent = agent.clone();
            async move { agent.synthesize(id, &query, &group_analyses).await }
        })
        .await;

        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        let (results, summary) =
            settle(Stage::Synthesis, &group_keys(&ids), outcomes, usage, |idx, reason| {
                SynthesisResult::fallback(ids[idx], reason)
            });
        log_stage_complete(&summary, started.elapsed());

        (results.into_iter().map(|r| (r.group_id, r)).collect(), summary)
    }

    /// 角度选择阶段：每组一个单元，输入为该组综合
    async fn angle_stage(
        &self,
        groups: &[Group],
        syntheses: &[(GroupId, SynthesisResult)],
        usage: &mut Usage,
    ) -> (Vec<(GroupId, AngleResult)>, StageSummary) {
        let inputs: Vec<_> = groups
            .iter()
            .zip(syntheses)
            .map(|(g, (_, synthesis))| (g.id, g.query.clone(), synthesis.clone()))
            .collect();
        let limit = self.limits.for_stage(Stage::AngleSelection);
        let started = Instant::now();
        log_stage_start(Stage::AngleSelection, inputs.len(), limit);

        let agent = self.agent.clone();
        let outcomes = fan_out(inputs, limit, move |(id, query, synthesis)| {
            let agent = agent.clone();
            async move { agent.select_angle(id, &query, &synthesis).await }
        })
        .await;

        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        let (results, summary) =
            settle(Stage::AngleSelection, &group_keys(&ids), outcomes, usage, |idx, reason| {
                AngleResult::fallback(ids[idx], reason)
            });
        log_stage_complete(&summary, started.elapsed());

        (results.into_iter().map(|r| (r.group_id, r)).collect(), summary)
    }

    /// 文档生成阶段：每组一个单元，输入为综合 + 角度
    async fn document_stage(
        &self,
        groups: &[Group],
        syntheses: &[(GroupId, SynthesisResult)],
        angles: &[(GroupId, AngleResult)],
        usage: &mut Usage,
    ) -> (Vec<(GroupId, DocumentResult)>, StageSummary) {
        let inputs: Vec<_> = groups
            .iter()
            .zip(syntheses)
            .zip(angles)
            .map(|((g, (_, synthesis)), (_, angle))| {
                (g.id, g.query.clone(), synthesis.clone(), angle.clone())
            })
            .collect();
        let limit = self.limits.for_stage(Stage::DocumentGeneration);
        let started = Instant::now();
        log_stage_start(Stage::DocumentGeneration, inputs.len(), limit);

        let agent = self.agent.clone();
        let outcomes = fan_out(inputs, limit, move |(id, query, synthesis, angle)| {
            let agent = agent.clone();
            async move {
                agent
                    .generate_document(id, &query, &synthesis, &angle)
                    .await
            }
        })
        .await;

        let ids: Vec<GroupId> = groups.iter().map(|g| g.id).collect();
        let (results, summary) =
            settle(Stage::DocumentGeneration, &group_keys(&ids), outcomes, usage, |idx, reason| {
                DocumentResult::fallback(ids[idx], reason)
            });
        log_stage_complete(&summary, started.elapsed());

        (results.into_iter().map(|r| (r.group_id, r)).collect(), summary)
    }
}

fn group_keys(ids: &[GroupId]) -> Vec<String> {
    ids.iter().map(|&id| group_unit_key(id)).collect()
}

/// 批次收尾：折叠用量、统计、把失败单元替换成回退结果
///
/// `keys[i]` 是第 i 个单元的键（用于日志和统计）。
fn settle<T, F>(
    stage: Stage,
    keys: &[String],
    outcomes: Vec<UnitOutcome<(T, Usage)>>,
    usage: &mut Usage,
    fallback: F,
) -> (Vec<T>, StageSummary)
where
    T: StageOutput,
    F: Fn(usize, FallbackReason) -> T,
{
    let mut summary = StageSummary::new(stage);

    let results = outcomes
        .into_iter()
        .enumerate()
        .map(|(idx, outcome)| match outcome {
            UnitOutcome::Completed((result, unit_usage)) => {
                usage.absorb(&unit_usage);
                summary.record(result.payload());
                result
            }
            UnitOutcome::Failed(failure) => {
                let key = keys.get(idx).cloned().unwrap_or_else(|| idx.to_string());
                error!("[{}] ❌ {} 单元失败: {}", key, stage.label(), failure);
                summary.failed += 1;
                summary.failed_keys.push(key);
                // 失败单元没有 token 用量，但请求已经发出
                usage.requests += failure.requests;
                fallback(idx, FallbackReason::UnitFailure(failure.message))
            }
        })
        .collect();

    (results, summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::completion::RetryPolicy;
    use crate::clients::mock::{MockReply, MockService};
    use crate::models::work_item::{ItemMetrics, WorkItem};

    fn corpus(sizes: &[u32]) -> Corpus {
        let groups = sizes
            .iter()
            .enumerate()
            .map(|(g, &n)| Group {
                id: GroupId(g),
                query: format!("requête {g}"),
                items: (1..=n)
                    .map(|p| WorkItem {
                        id: WorkItem::make_id(GroupId(g), p),
                        group_id: GroupId(g),
                        position: p,
                        url: String::new(),
                        title: format!("Article {g}-{p}"),
                        text: "Contenu".into(),
                        metrics: ItemMetrics::default(),
                    })
                    .collect(),
            })
            .collect();
        Corpus {
            main_query: "test".into(),
            groups,
        }
    }

    fn pipeline(service: MockService) -> Pipeline {
        let client = CompletionClient::new(
            Arc::new(service),
            RetryPolicy {
                max_attempts: 1,
                base_delay: Duration::from_millis(1),
            },
        );
        Pipeline::new(
            StageAgent::new(client, Default::default()),
            StageLimits {
                analysis: 4,
                synthesis: 2,
                angle: 2,
                document: 2,
            },
        )
    }

    #[test]
    fn test_stage_summary_merge() {
        let mut a = StageSummary::new(Stage::Analysis);
        a.succeeded = 2;
        let mut b = StageSummary::new(Stage::Analysis);
        b.failed = 1;
        b.failed_keys.push("query_1_position_1".into());
        a.merge(b);
        assert_eq!(a.total(), 3);
        assert_eq!(a.failed_keys, vec!["query_1_position_1".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_group_still_gets_record() {
        let output = pipeline(MockService::always(MockReply::Text("{\"ok\": true}".into())))
            .run(&corpus(&[2, 0]), SchedulingPolicy::Parallel)
            .await;

        assert_eq!(output.records.len(), 2);
        assert!(output.records[1].analyses.is_empty());
        assert_eq!(output.records[1].group_id(), GroupId(1));
        // 2 次分析 + 2 组 × 3 个组级阶段
        assert_eq!(output.usage.requests, 8);
        assert_eq!(output.summary.stage(Stage::Analysis).unwrap().succeeded, 2);
    }

    #[tokio::test]
    async fn test_rejected_units_become_failures() {
        let service = MockService::responder(|request| {
            if request.user.contains("Article 0-2") {
                MockReply::Rejected("invalid request".into())
            } else {
                MockReply::Text("{\"ok\": true}".into())
            }
        });
        let output = pipeline(service)
            .run(&corpus(&[3]), SchedulingPolicy::SequentialPerGroup)
            .await;

        let analysis = output.summary.stage(Stage::Analysis).unwrap();
        assert_eq!(analysis.succeeded, 2);
        assert_eq!(analysis.failed, 1);
        assert_eq!(analysis.failed_keys, vec!["query_0_position_2".to_string()]);
        assert_eq!(output.summary.total_failed(), 1);

        let record = &output.records[0];
        assert_eq!(record.analyses.len(), 3);
        assert!(!record.analyses[1].payload.is_parsed());
        assert!(record.synthesis.payload.is_parsed());
        assert_eq!(record.meta.mode, "sequential");
        // 被拒绝的请求也计入请求数
        assert_eq!(output.usage.requests, 3 + 3);
    }

    #[tokio::test]
    async fn test_exhausted_units_still_count_requests() {
        let service = Arc::new(MockService::always(MockReply::Transient("503".into())));
        let client = CompletionClient::new(
            service.clone(),
            RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            },
        );
        let pipeline = Pipeline::new(
            StageAgent::new(client, Default::default()),
            StageLimits::default(),
        );
        let output = pipeline
            .run(&corpus(&[1]), SchedulingPolicy::Parallel)
            .await;

        assert_eq!(output.summary.total_failed(), 4);
        assert_eq!(service.calls(), 12);
        assert_eq!(output.usage.requests, 12);
        assert_eq!(output.usage.total_tokens, 0);
    }
}
