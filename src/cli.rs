//! 命令行参数

use std::path::PathBuf;

use clap::Parser;

use crate::config::SchedulingPolicy;

/// SEO 内容流水线：分析 → 综合 → 角度选择 → 文档生成
#[derive(Debug, Clone, Default, Parser)]
#[command(name = "seo-pipeline", version, about)]
pub struct Cli {
    /// TOML 配置文件
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// 调度策略
    #[arg(long, value_enum)]
    pub mode: Option<SchedulingPolicy>,

    /// 语料文件路径
    #[arg(long, value_name = "PATH", conflicts_with = "query")]
    pub file: Option<PathBuf>,

    /// 主查询名，读取 static/consignesrun/consignes_<QUERY>.json
    #[arg(long)]
    pub query: Option<String>,

    /// 分析阶段并发上限
    #[arg(long, value_name = "N")]
    pub analysis_limit: Option<usize>,

    /// 综合阶段并发上限
    #[arg(long, value_name = "N")]
    pub synthesis_limit: Option<usize>,

    /// 角度选择阶段并发上限
    #[arg(long, value_name = "N")]
    pub angle_limit: Option<usize>,

    /// 文档生成阶段并发上限
    #[arg(long, value_name = "N")]
    pub document_limit: Option<usize>,

    /// 只输出 meta、综合和角度
    #[arg(long)]
    pub simplified: bool,

    /// 详细日志
    #[arg(short, long)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_and_query_conflict() {
        let result = Cli::try_parse_from(["seo-pipeline", "--file", "a.json", "--query", "velo"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_mode_values() {
        let cli = Cli::parse_from(["seo-pipeline", "--mode", "parallel"]);
        assert_eq!(cli.mode, Some(SchedulingPolicy::Parallel));
        assert!(Cli::try_parse_from(["seo-pipeline", "--mode", "turbo"]).is_err());
    }
}
