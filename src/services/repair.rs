//! 结构化输出修复 - 业务能力层
//!
//! 模型返回的文本"应该"是一个 JSON 对象，但经常带有代码围栏、控制字符
//! 或中文/法文排版引号。这里按顺序尝试一组纯函数（变换后解析），
//! 第一次成功即返回；全部失败返回 `None`，永不 panic。
//!
//! 顺序：
//! 1. 去掉首尾代码围栏（在链之前执行一次）
//! 2. 严格解析
//! 3. 去控制字符 + 引号规范化，再严格解析
//! 4. 截取第一个 `{` 到最后一个 `}` 之间的内容解析

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

/// JSON 对象
pub type JsonObject = Map<String, Value>;

/// 控制字符 0x00–0x1F、0x7F–0x9F
static CONTROL_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\x00-\x1F\x7F-\x{9F}]").expect("valid control-char regex"));

static SINGLE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[\u{2018}\u{2019}]").expect("valid quote regex"));

static DOUBLE_QUOTES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[\u{201C}\u{201D}]").expect("valid quote regex"));

/// 成功的修复步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairStep {
    Strict,
    Sanitized,
    BraceSlice,
}

/// 修复结果
#[derive(Debug, Clone, PartialEq)]
pub struct Repaired {
    pub object: JsonObject,
    /// 在哪一步成功（用于日志）
    pub step: RepairStep,
}

type Transform = fn(&str) -> Option<String>;

/// 修复链：每一步在上一步的变换结果上继续变换
const CHAIN: &[(RepairStep, Transform)] = &[
    (RepairStep::Strict, unchanged),
    (RepairStep::Sanitized, sanitized),
    (RepairStep::BraceSlice, brace_slice),
];

/// 尝试从模型输出中恢复一个 JSON 对象
pub fn repair(raw: &str) -> Option<Repaired> {
    let mut current = strip_code_fences(raw).to_string();

    for (step, transform) in CHAIN {
        current = transform(&current)?;
        if let Some(object) = parse_object(&current) {
            return Some(Repaired {
                object,
                step: *step,
            });
        }
    }

    None
}

/// 去掉首尾的 ``` / ```json 围栏
pub fn strip_code_fences(text: &str) -> &str {
    let mut text = text.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // 跳过语言标记（json / JSON / 空）
        let lang_len = rest
            .find(|c: char| !c.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        text = &rest[lang_len..];
    }
    if let Some(rest) = text.trim_end().strip_suffix("```") {
        text = rest;
    }

    text.trim()
}

fn unchanged(text: &str) -> Option<String> {
    Some(text.to_string())
}

fn sanitized(text: &str) -> Option<String> {
    Some(sanitize(text))
}

/// 去控制字符，把排版引号换成 ASCII 引号
pub fn sanitize(text: &str) -> String {
    let cleaned = CONTROL_CHARS.replace_all(text.trim(), "");
    let cleaned = SINGLE_QUOTES.replace_all(&cleaned, "'");
    DOUBLE_QUOTES.replace_all(&cleaned, "\"").into_owned()
}

/// 截取第一个 `{` 到最后一个 `}`（含）
pub fn brace_slice(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| text[start..=end].to_string())
}

fn parse_object(text: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> JsonObject {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_valid_object_is_returned_unchanged_at_strict_step() {
        let raw = r#"{"pertinence_requete": {"score": 0.8, "justification": "ok"}, "tags": [1, 2]}"#;
        let first = repair(raw).unwrap();
        assert_eq!(first.step, RepairStep::Strict);

        let again_text = serde_json::to_string(&first.object).unwrap();
        let second = repair(&again_text).unwrap();
        assert_eq!(second.step, RepairStep::Strict);
        assert_eq!(first.object, second.object);
    }

    #[test]
    fn test_fenced_dirty_text_matches_clean_text() {
        let clean = r#"{"titre": "Guide", "score": 0.9}"#;
        let dirty = "```json\n{\u{201C}titre\u{201D}: \u{201C}Guide\u{201D},\u{0007} \"score\": 0.9}\n```";

        let expected = repair(clean).unwrap().object;
        let recovered = repair(dirty).unwrap();
        assert_eq!(recovered.object, expected);
        assert_eq!(recovered.step, RepairStep::Sanitized);
    }

    #[test]
    fn test_fence_only_needs_strict_step() {
        let raw = "```\n{\"a\": 1}\n```";
        let repaired = repair(raw).unwrap();
        assert_eq!(repaired.step, RepairStep::Strict);
        assert_eq!(repaired.object, object(json!({"a": 1})));
    }

    #[test]
    fn test_surrounding_prose_uses_brace_slice() {
        let raw = "Voici l'analyse demandée : {\"angle\": \"comparatif\"} J'espère que cela aide.";
        let repaired = repair(raw).unwrap();
        assert_eq!(repaired.step, RepairStep::BraceSlice);
        assert_eq!(repaired.object, object(json!({"angle": "comparatif"})));
    }

    #[test]
    fn test_no_braces_returns_none() {
        assert!(repair("Désolé, je ne peux pas répondre.").is_none());
        assert!(repair("").is_none());
        assert!(repair("} reversed {").is_none());
    }

    #[test]
    fn test_unbalanced_object_returns_none() {
        assert!(repair("{\"a\": [1, 2}").is_none());
    }

    #[test]
    fn test_non_object_json_is_not_accepted() {
        assert!(repair("[1, 2, 3]").is_none());
        assert!(repair("\"just a string\"").is_none());
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("```JSON {} ```"), "{}");
        assert_eq!(strip_code_fences("  {}  "), "{}");
    }

    #[test]
    fn test_sanitize_removes_control_chars_and_quotes() {
        let text = "a\u{0000}b\u{009F}c\u{2018}d\u{2019}e\u{201C}f\u{201D}";
        assert_eq!(sanitize(text), "abc'd'e\"f\"");
    }

    #[test]
    fn test_brace_slice() {
        assert_eq!(brace_slice("xx{a}yy{b}zz").as_deref(), Some("{a}yy{b}"));
        assert_eq!(brace_slice("no braces"), None);
    }
}
