use rand::Rng;
use std::ops::RangeInclusive;

use crate::catalog::{fertilizer_suggestions, AnalysisRequest};
use crate::completion::CompletionClient;
use crate::error::AssistantError;
use crate::models::{AnalysisResult, AnalysisSource};
use crate::prompt::build_analysis_prompt;
use crate::telemetry;

/// Score used when no keyword matches.
pub const DEFAULT_COMPATIBILITY: u8 = 85;
pub const FALLBACK_RANGE: RangeInclusive<u8> = 80..=100;

/// Keyword groups in priority order; the first group with a hit picks the range.
const KEYWORD_RANGES: [(&[&str], RangeInclusive<u8>); 3] = [
    (&["excellent", "ideal"], 90..=100),
    (&["good", "suitable"], 80..=95),
    (&["moderate", "average"], 70..=85),
];

/**
 * \brief 按关键词挑选分数区间（不区分大小写），未命中返回 None。
 */
pub fn keyword_range(response_text: &str) -> Option<RangeInclusive<u8>> {
    let lower = response_text.to_lowercase();
    KEYWORD_RANGES
        .iter()
        .find(|(words, _)| words.iter().any(|w| lower.contains(w)))
        .map(|(_, range)| range.clone())
}

/**
 * \brief 从模型回复推导兼容度。
 * \details 区间内均匀随机取值，同一文本多次调用结果可能不同。
 */
pub fn score_compatibility<R: Rng>(response_text: &str, rng: &mut R) -> u8 {
    match keyword_range(response_text) {
        Some(range) => rng.gen_range(range),
        None => DEFAULT_COMPATIBILITY,
    }
}

/**
 * \brief 远端不可用或未配置时的兜底分析。
 */
pub fn build_fallback_analysis<R: Rng>(
    request: &AnalysisRequest,
    cause: &AssistantError,
    rng: &mut R,
) -> AnalysisResult {
    let closing = match cause {
        AssistantError::NotInitialized => {
            "This analysis provides general guidelines. For personalized recommendations, please configure your Gemini API key."
        }
        _ => {
            "Note: This is a fallback analysis. For AI-powered recommendations, please check your internet connection and API key configuration."
        }
    };
    let recommendation_text = format!(
        "Based on {plant} and {soil} soil combination:

🌱 **Primary Fertilizer Recommendations:**
- Use balanced NPK fertilizer (10-10-10) for optimal growth
- Apply organic compost to improve soil structure
- Consider phosphorus-rich fertilizer during flowering phase

📊 **Application Schedule:**
- Weekly liquid fertilizer during growing season
- Bi-weekly applications during dormant periods
- Adjust based on plant response and soil conditions

⚠️ **Important Notes:**
- Always test soil pH before application
- Monitor plant response and adjust accordingly
- Consider environmental factors like rainfall and temperature

{closing}",
        plant = request.plant_type,
        soil = request.soil_type,
    );
    AnalysisResult {
        compatibility_percent: rng.gen_range(FALLBACK_RANGE),
        recommendation_text,
        fertilizer_suggestions: fertilizer_suggestions(),
        source: AnalysisSource::Fallback,
    }
}

/**
 * \brief 完整分析流程：构造 prompt → 远端补全 → 打分；任一失败路径降级为兜底结果。
 */
pub async fn analyze_plant(
    client: &CompletionClient,
    request: &AnalysisRequest,
) -> AnalysisResult {
    let prompt = build_analysis_prompt(request.plant_type, request.soil_type);
    let outcome = client.complete(&prompt).await;
    interpret(request, outcome, &mut rand::thread_rng())
}

/**
 * \brief 将补全结果解释为分析结果（不含 I/O，便于测试）。
 */
pub fn interpret<R: Rng>(
    request: &AnalysisRequest,
    outcome: Result<String, AssistantError>,
    rng: &mut R,
) -> AnalysisResult {
    match outcome {
        Ok(text) => {
            let compatibility_percent = score_compatibility(&text, rng);
            telemetry::log_event(
                "analysis",
                &format!(
                    "remote plant={} soil={} score={}",
                    request.plant_type, request.soil_type, compatibility_percent
                ),
            );
            AnalysisResult {
                compatibility_percent,
                recommendation_text: text,
                fertilizer_suggestions: fertilizer_suggestions(),
                source: AnalysisSource::Remote,
            }
        }
        Err(cause) => {
            telemetry::log_event(
                "analysis",
                &format!(
                    "fallback plant={} soil={} cause={}",
                    request.plant_type, request.soil_type, cause
                ),
            );
            build_fallback_analysis(request, &cause, rng)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{PlantType, SoilType};
    use crate::completion::testing::{client_with, ScriptedService};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn req(plant: &str, soil: &str) -> AnalysisRequest {
        AnalysisRequest::new(plant, soil).expect("valid request")
    }

    #[test]
    fn test_keyword_priority_order() {
        assert_eq!(keyword_range("An IDEAL match"), Some(90..=100));
        assert_eq!(keyword_range("good but only moderate yield"), Some(80..=95));
        assert_eq!(keyword_range("Average drainage"), Some(70..=85));
        assert_eq!(keyword_range("excellent, and also suitable"), Some(90..=100));
        assert_eq!(keyword_range("no signal here"), None);
    }

    #[test]
    fn test_score_stays_inside_selected_range() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            let s = score_compatibility("Excellent choice", &mut rng);
            assert!((90..=100).contains(&s));
            let s = score_compatibility("suitable", &mut rng);
            assert!((80..=95).contains(&s));
            let s = score_compatibility("moderate", &mut rng);
            assert!((70..=85).contains(&s));
        }
        assert_eq!(score_compatibility("plain text", &mut rng), DEFAULT_COMPATIBILITY);
    }

    #[test]
    fn test_fallback_mentions_inputs_and_cause() {
        let mut rng = StdRng::seed_from_u64(1);
        let r = build_fallback_analysis(
            &req("tomato", "sandy"),
            &AssistantError::NotInitialized,
            &mut rng,
        );
        assert!(r.recommendation_text.contains("tomato"));
        assert!(r.recommendation_text.contains("sandy"));
        assert!(r.recommendation_text.contains("configure your Gemini API key"));
        assert!(FALLBACK_RANGE.contains(&r.compatibility_percent));
        assert_eq!(r.source, AnalysisSource::Fallback);
        assert_eq!(r.fertilizer_suggestions.len(), 2);

        let r = build_fallback_analysis(
            &req("rice", "clay"),
            &AssistantError::transport("timeout"),
            &mut rng,
        );
        assert!(r.recommendation_text.contains("check your internet connection"));
    }

    #[tokio::test]
    async fn test_analyze_without_credential_uses_fallback() {
        let client = CompletionClient::uninitialized();
        assert!(!client.is_ready());
        let r = analyze_plant(&client, &req("tomato", "sandy")).await;
        assert_eq!(r.source, AnalysisSource::Fallback);
        assert!(r.recommendation_text.contains("tomato"));
        assert!(r.recommendation_text.contains("sandy"));
        assert!((80..=100).contains(&r.compatibility_percent));
    }

    #[tokio::test]
    async fn test_analyze_transport_failure_degrades() {
        let client = client_with(ScriptedService::failing("503 Service Unavailable"));
        let r = analyze_plant(&client, &req("wheat", "loamy")).await;
        assert_eq!(r.source, AnalysisSource::Fallback);
        assert!(!r.recommendation_text.is_empty());
        assert!((80..=100).contains(&r.compatibility_percent));
    }

    #[tokio::test]
    async fn test_analyze_remote_success_scores_text() {
        let service = ScriptedService::replying("Loamy soil is ideal for wheat.");
        let client = client_with(service.clone());
        let r = analyze_plant(&client, &req("wheat", "loamy")).await;
        assert_eq!(r.source, AnalysisSource::Remote);
        assert_eq!(r.recommendation_text, "Loamy soil is ideal for wheat.");
        assert!((90..=100).contains(&r.compatibility_percent));

        let prompts = service.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Plant Type: wheat"));
    }

    #[tokio::test]
    async fn test_every_catalog_pair_scores_within_bounds() {
        let clients = [
            CompletionClient::uninitialized(),
            client_with(ScriptedService::replying("moderate")),
            client_with(ScriptedService::failing("down")),
        ];
        for plant in PlantType::ALL {
            for soil in SoilType::ALL {
                let request = AnalysisRequest {
                    plant_type: plant,
                    soil_type: soil,
                };
                for client in &clients {
                    let r = analyze_plant(client, &request).await;
                    assert!(r.compatibility_percent <= 100);
                }
            }
        }
    }
}
