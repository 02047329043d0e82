use crate::error::{AppError, AppResult};
use crate::models::work_item::{Corpus, Group, GroupId, ItemMetrics, WorkItem};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs;

/// 语料文件名前缀
pub const CORPUS_PREFIX: &str = "consignes_";

/// 少于该字符数的内容块被忽略
const MIN_BLOCK_CHARS: usize = 10;

#[derive(Debug, Default, Deserialize)]
struct ConsignesFile {
    #[serde(default)]
    queries: Vec<QueryEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct QueryEntry {
    #[serde(default)]
    text: String,
    #[serde(default)]
    serp_data: SerpData,
}

#[derive(Debug, Default, Deserialize)]
struct SerpData {
    #[serde(default)]
    position_data: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PositionInfo {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: Map<String, Value>,
    #[serde(default)]
    words_count: Value,
    #[serde(default)]
    domain_authority: DomainAuthority,
}

#[derive(Debug, Default, Deserialize)]
struct DomainAuthority {
    #[serde(default)]
    authority_score: Value,
}

/// 从语料文件加载 Corpus
///
/// 文件不存在 / 无法读取 / 格式错误都是致命错误，在任何阶段开始前返回。
pub async fn load_corpus(path: &Path) -> AppResult<Corpus> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| AppError::CorpusUnreadable {
            path: path.to_path_buf(),
            source,
        })?;

    let corpus = parse_corpus(&content, &main_query_from_path(path)).map_err(|source| {
        AppError::CorpusInvalid {
            path: path.to_path_buf(),
            source,
        }
    })?;

    tracing::info!(
        "✓ {} 篇文章已加载，共 {} 个组",
        corpus.item_count(),
        corpus.groups.len()
    );

    Ok(corpus)
}

/// 解析语料 JSON
pub fn parse_corpus(json: &str, main_query: &str) -> Result<Corpus, serde_json::Error> {
    let file: ConsignesFile = serde_json::from_str(json)?;

    let groups = file
        .queries
        .into_iter()
        .enumerate()
        .map(|(idx, entry)| build_group(GroupId(idx), entry))
        .collect();

    Ok(Corpus {
        main_query: main_query.to_string(),
        groups,
    })
}

fn build_group(group_id: GroupId, entry: QueryEntry) -> Group {
    let query = entry.text.trim().to_string();

    let mut positions: Vec<(u32, Value)> = entry
        .serp_data
        .position_data
        .into_iter()
        .filter_map(|(key, value)| match parse_position_key(&key) {
            Some(position) => Some((position, value)),
            None => {
                tracing::warn!("[组 {}] 无法识别的位置键: {}", group_id, key);
                None
            }
        })
        .collect();
    positions.sort_by_key(|(position, _)| *position);

    let items = positions
        .into_iter()
        .filter_map(|(position, value)| {
            match serde_json::from_value::<PositionInfo>(value) {
                Ok(info) => Some(build_item(group_id, position, info)),
                Err(e) => {
                    tracing::warn!("[组 {}] 位置 {} 数据无效: {}", group_id, position, e);
                    None
                }
            }
        })
        .collect();

    Group {
        id: group_id,
        query,
        items,
    }
}

fn build_item(group_id: GroupId, position: u32, info: PositionInfo) -> WorkItem {
    let text = build_content(&info.content);
    let word_count = text.split_whitespace().count();

    WorkItem {
        id: WorkItem::make_id(group_id, position),
        group_id,
        position,
        url: info.url.trim().to_string(),
        title: info.title.trim().to_string(),
        text,
        metrics: ItemMetrics {
            word_count,
            declared_word_count: as_f64(&info.words_count).max(0.0) as u64,
            authority_score: as_f64(&info.domain_authority.authority_score),
        },
    }
}

/// 把 h1 / h2_n / p_n 等内容块拼成带标题标记的正文
pub fn build_content(content: &Map<String, Value>) -> String {
    let mut parts = Vec::new();

    if let Some(h1) = content.get("h1").map(value_text) {
        if !h1.is_empty() {
            parts.push(format!("# {}", h1));
        }
    }

    let mut keys: Vec<&String> = content.keys().collect();
    keys.sort_by(|a, b| (block_index(a), a.as_str()).cmp(&(block_index(b), b.as_str())));

    for key in keys {
        let value = value_text(&content[key.as_str()]);
        if value.chars().count() < MIN_BLOCK_CHARS || key.starts_with("h1") {
            continue;
        }

        if key.starts_with("h2") {
            parts.push(format!("\n## {}", value));
        } else if key.starts_with("h3") {
            parts.push(format!("\n### {}", value));
        } else if key.starts_with("h4") {
            parts.push(format!("\n#### {}", value));
        } else if key.starts_with('p') {
            parts.push(value);
        }
    }

    parts.join("\n\n")
}

/// `h2_3` → 3；没有数字后缀的排在最后
fn block_index(key: &str) -> u32 {
    key.split('_')
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(9999)
}

fn parse_position_key(key: &str) -> Option<u32> {
    key.split('_').nth(1)?.parse().ok()
}

fn value_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn as_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// 从文件名推导主查询：`consignes_<query>.json` → `<query>`
pub fn main_query_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    stem.strip_prefix(CORPUS_PREFIX)
        .map(str::to_string)
        .unwrap_or(stem)
}

/// 定位语料文件
///
/// - 指定查询：`<dir>/consignes_<query>.json`
/// - 未指定：目录中排序后的第一个 `consignes_*.json`
pub async fn find_corpus_file(dir: &Path, query: Option<&str>) -> AppResult<PathBuf> {
    if let Some(query) = query {
        let path = dir.join(format!("{}{}.json", CORPUS_PREFIX, query));
        return if fs::try_exists(&path).await.unwrap_or(false) {
            Ok(path)
        } else {
            Err(AppError::CorpusNotFound(path.display().to_string()))
        };
    }

    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|_| AppError::CorpusNotFound(dir.display().to_string()))?;

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let path = entry.path();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if name.starts_with(CORPUS_PREFIX) && name.ends_with(".json") {
            candidates.push(path);
        }
    }

    candidates.sort();
    candidates
        .into_iter()
        .next()
        .ok_or_else(|| AppError::CorpusNotFound(dir.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const SAMPLE: &str = r#"{
        "queries": [
            {
                "text": "  vélo électrique pliant ",
                "serp_data": { "position_data": {
                    "position_10": { "url": "https://b.fr", "title": "B", "content": { "p_1": "Paragraphe numéro dix assez long." } },
                    "position_2": {
                        "url": " https://a.fr ",
                        "title": " Guide complet ",
                        "content": {
                            "h1": "Choisir son vélo",
                            "p_2": "Second paragraphe suffisamment long.",
                            "h2_1": "Les critères essentiels",
                            "p_1": "Premier paragraphe suffisamment long.",
                            "h3_3": "court"
                        },
                        "words_count": "1200",
                        "domain_authority": { "authority_score": 42 }
                    }
                } }
            },
            { "text": "trottinette", "serp_data": { "position_data": {} } }
        ]
    }"#;

    #[test]
    fn test_parse_corpus_groups_and_order() {
        let corpus = parse_corpus(SAMPLE, "velo").unwrap();
        assert_eq!(corpus.main_query, "velo");
        assert_eq!(corpus.groups.len(), 2);
        assert_eq!(corpus.item_count(), 2);

        let first = &corpus.groups[0];
        assert_eq!(first.query, "vélo électrique pliant");
        let positions: Vec<u32> = first.items.iter().map(|i| i.position).collect();
        assert_eq!(positions, vec![2, 10]);

        let item = &first.items[0];
        assert_eq!(item.id, "query_0_position_2");
        assert_eq!(item.url, "https://a.fr");
        assert_eq!(item.title, "Guide complet");
        assert_eq!(item.metrics.declared_word_count, 1200);
        assert_eq!(item.metrics.authority_score, 42.0);
        assert!(item.metrics.word_count > 0);

        assert!(corpus.groups[1].items.is_empty());
        assert_eq!(corpus.groups[1].id, GroupId(1));
    }

    #[test]
    fn test_build_content_orders_blocks() {
        let content = json!({
            "h1": "Titre principal",
            "p_2": "Second paragraphe suffisamment long.",
            "h2_1": "Les critères essentiels",
            "p_1": "Premier paragraphe suffisamment long.",
            "h3_3": "court"
        });
        let text = build_content(content.as_object().unwrap());
        assert_eq!(
            text,
            "# Titre principal\n\n\n## Les critères essentiels\n\nPremier paragraphe suffisamment long.\n\nSecond paragraphe suffisamment long."
        );
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(parse_corpus("not json", "x").is_err());
    }

    #[test]
    fn test_main_query_from_path() {
        assert_eq!(
            main_query_from_path(Path::new("static/consignesrun/consignes_velo.json")),
            "velo"
        );
        assert_eq!(main_query_from_path(Path::new("data.json")), "data");
    }

    #[tokio::test]
    async fn test_missing_corpus_is_fatal() {
        let err = load_corpus(Path::new("/nonexistent/consignes_x.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::CorpusUnreadable { .. }));
    }
}
