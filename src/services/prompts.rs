//! 提示词构建 - 业务能力层
//!
//! 每个阶段返回 (system_message, user_message)。
//! 只负责拼接文本，不调用模型，也不关心并发。

use serde_json::Value;

use crate::models::work_item::WorkItem;
use crate::services::repair::JsonObject;

/// 文章正文在提示词中的最大字符数
pub const MAX_ARTICLE_CHARS: usize = 15_000;

/// 序列化后的分析结果在提示词中的最大字符数
pub const MAX_ANALYSES_CHARS: usize = 20_000;

const JSON_ONLY: &str =
    "IMPORTANT: Your response MUST be in valid JSON format only, no additional text or markdown.";

/// 文章分析提示词
pub fn analysis_messages(item: &WorkItem) -> (String, String) {
    let system = format!(
        "You are an expert SEO content analyst. Always respond in valid JSON format.\n\n{}",
        JSON_ONLY
    );

    let user = format!(
        r#"Analyser l'article concurrent ci-dessous et produire un objet JSON contenant au minimum :
- "pertinence_requete": {{ "score": nombre entre 0 et 1, "justification": texte }}
- "angle_editorial": l'angle principal de l'article
- "structure": les sections principales (h2/h3)
- "points_forts" et "points_faibles": listes

Variables d'entrée pour l'analyse :
- Position: {}
- Titre: {}
- URL: {}
- Nombre de mots: {}
- Contenu: {}

Analyser maintenant cet article."#,
        item.position,
        item.title,
        item.url,
        item.metrics.word_count,
        truncate_chars(&item.text, MAX_ARTICLE_CHARS),
    );

    (system, user)
}

/// 战略综合提示词：组内所有分析（含回退）+ 目标查询
pub fn synthesis_messages(query: &str, analyses: &[Value]) -> (String, String) {
    let system = format!(
        "You are an expert SEO strategist. Always respond in valid JSON format.\n\n{}",
        JSON_ONLY
    );

    let analyses_text = serde_json::to_string_pretty(analyses).unwrap_or_default();
    let user = format!(
        r#"Produire une synthèse stratégique des articles concurrents sous forme d'objet JSON contenant au minimum :
- "analyse_angles_concurrentiels": {{ "angles_dominants": [...], "angles_emergents": [...] }}
- "lacunes_contenu": les sujets peu ou pas couverts
- "recommandations": liste de recommandations éditoriales

Variables d'entrée pour la synthèse :
- Requête cible: {}
- Nombre d'analyses: {}
- Analyses des articles concurrents: {}

Effectuer maintenant la synthèse stratégique."#,
        query,
        analyses.len(),
        truncate_chars(&analyses_text, MAX_ANALYSES_CHARS),
    );

    (system, user)
}

/// 角度选择提示词
pub fn angle_messages(query: &str, synthesis: &JsonObject) -> (String, String) {
    let system = format!(
        "Tu es un stratège éditorial SEO. Tu choisis l'angle le plus différenciant pour un nouvel article.\n\n{}",
        JSON_ONLY
    );

    let user = format!(
        r#"À partir de la synthèse stratégique ci-dessous, choisir UN angle éditorial et répondre avec un objet JSON :
- "angle_recommande": texte de l'angle retenu
- "score_total": note globale de l'angle sur 100
- "justification": texte

Requête cible: {}

Synthèse stratégique:
{}"#,
        query,
        pretty(synthesis),
    );

    (system, user)
}

/// 文档（searchbase）生成提示词
pub fn document_messages(
    query: &str,
    synthesis: &JsonObject,
    angle: &JsonObject,
) -> (String, String) {
    let system = format!(
        "Tu es un rédacteur SEO senior. Tu prépares le plan documentaire d'un article.\n\n{}",
        JSON_ONLY
    );

    let user = format!(
        r#"Préparer la base documentaire de l'article pour l'angle retenu. Répondre avec un objet JSON :
- "sections": liste de {{ "titre": texte, "objectif": texte }}
- "donnees_a_collecter": liste des chiffres, sources et exemples à rechercher

Requête cible: {}

Angle retenu:
{}

Synthèse stratégique:
{}"#,
        query,
        pretty(angle),
        truncate_chars(&pretty(synthesis), MAX_ANALYSES_CHARS),
    );

    (system, user)
}

/// 按字符（而不是字节）截断
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => &text[..byte_index],
        None => text,
    }
}

fn pretty(object: &JsonObject) -> String {
    serde_json::to_string_pretty(object).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::work_item::{GroupId, ItemMetrics};
    use serde_json::json;

    fn item(text: String) -> WorkItem {
        WorkItem {
            id: WorkItem::make_id(GroupId(0), 1),
            group_id: GroupId(0),
            position: 1,
            url: "https://exemple.fr/guide".into(),
            title: "Guide du vélo".into(),
            text,
            metrics: ItemMetrics::default(),
        }
    }

    #[test]
    fn test_truncate_chars_respects_char_boundaries() {
        assert_eq!(truncate_chars("éléphant", 3), "élé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 0), "");
    }

    #[test]
    fn test_analysis_prompt_truncates_article() {
        let long = "é".repeat(MAX_ARTICLE_CHARS + 500);
        let (system, user) = analysis_messages(&item(long));
        assert!(system.contains("valid JSON"));
        assert!(user.contains("Guide du vélo"));
        assert!(user.contains(&"é".repeat(MAX_ARTICLE_CHARS)));
        assert!(!user.contains(&"é".repeat(MAX_ARTICLE_CHARS + 1)));
    }

    #[test]
    fn test_synthesis_prompt_contains_query_and_count() {
        let analyses = vec![json!({"a": 1}), json!({"parsing_error": true})];
        let (_, user) = synthesis_messages("vélo pliant", &analyses);
        assert!(user.contains("Requête cible: vélo pliant"));
        assert!(user.contains("Nombre d'analyses: 2"));
        assert!(user.contains("parsing_error"));
    }

    #[test]
    fn test_angle_prompt_asks_for_recommended_angle() {
        let synthesis = json!({"analyse_angles_concurrentiels": {"angles_emergents": ["budget"]}});
        let (_, user) = angle_messages("vélo pliant", synthesis.as_object().unwrap());
        assert!(user.contains("choisir UN angle"));
        assert!(user.contains("\"angle_recommande\""));
        assert!(user.contains("\"score_total\""));
        assert!(user.contains("angles_emergents"));
    }

    #[test]
    fn test_document_prompt_embeds_angle() {
        let synthesis = json!({"recommandations": ["x"]});
        let angle = json!({"angle_recommande": "Comparatif 2024", "score_total": 82});
        let (_, user) = document_messages(
            "vélo",
            synthesis.as_object().unwrap(),
            angle.as_object().unwrap(),
        );
        assert!(user.contains("Comparatif 2024"));
        assert!(user.contains("recommandations"));
    }
}
