use crate::catalog::{PlantType, SoilType};
use crate::models::Message;

/// Number of prior messages serialized into a chat prompt.
pub const HISTORY_WINDOW: usize = 10;

const ASSISTANT_FRAMING: &str = "\
You are an expert AI Agricultural Assistant specializing in:
- Fertilizer recommendations
- Soil management
- Plant care and nutrition
- Sustainable farming practices
- Crop diseases and pest management
- Irrigation and water management
- Organic farming methods

Please provide helpful, accurate, and practical advice. Keep responses informative but conversational.
Be specific with recommendations and always consider environmental sustainability.";

/**
 * \brief 构造植物/土壤分析 prompt，要求模型按五个小节输出。
 */
pub fn build_analysis_prompt(plant: PlantType, soil: SoilType) -> String {
    let (ph_min, ph_max) = soil.ph_range();
    format!(
        "As an expert agricultural consultant, provide detailed fertilizer recommendations for:

Plant Type: {plant}
Soil Type: {soil} (typical pH {ph_min:.1}-{ph_max:.1})

Please provide a comprehensive analysis including:

1. **Primary Fertilizer Recommendations:**
   - Specific NPK ratio for this plant-soil combination
   - Application amounts and timing
   - Best fertilizer types (organic/synthetic)

2. **Application Schedule:**
   - Seasonal application timing
   - Frequency of applications
   - Growth stage considerations

3. **Soil Optimization:**
   - pH adjustment recommendations
   - Soil amendment suggestions
   - Drainage and aeration tips

4. **Expected Results:**
   - Yield improvement expectations
   - Growth timeline
   - Quality improvements

5. **Important Notes:**
   - Environmental considerations
   - Safety precautions
   - Cost-effective alternatives

Format your response with clear sections using emojis and bullet points.
Be specific with measurements, timing, and application methods.
Focus on sustainable and environmentally friendly practices.
"
    )
}

/**
 * \brief 构造聊天 prompt：固定人设 + 最近 10 条历史（"role: content"）+ 新消息。
 * \details 纯函数，相同输入产生逐字节相同的输出。
 */
pub fn build_chat_prompt(message: &str, history: &[Message]) -> String {
    let start = history.len().saturating_sub(HISTORY_WINDOW);
    let mut prompt = String::with_capacity(ASSISTANT_FRAMING.len() + message.len() + 256);
    prompt.push_str(ASSISTANT_FRAMING);
    prompt.push_str("\n\nConversation history:\n");
    for msg in &history[start..] {
        prompt.push_str(msg.origin.as_str());
        prompt.push_str(": ");
        prompt.push_str(&msg.text);
        prompt.push('\n');
    }
    prompt.push_str("\nUser: ");
    prompt.push_str(message);
    prompt.push_str("\nAssistant:");
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Origin;

    fn msg(id: u64, origin: Origin, text: &str) -> Message {
        Message {
            id,
            text: text.to_string(),
            origin,
            timestamp: format!("2024-05-01T10:00:{:02}Z", id),
        }
    }

    fn history(n: u64) -> Vec<Message> {
        (1..=n)
            .map(|i| {
                let origin = if i % 2 == 0 { Origin::User } else { Origin::Assistant };
                msg(i, origin, &format!("entry-{:02}", i))
            })
            .collect()
    }

    #[test]
    fn test_analysis_prompt_embeds_both_fields() {
        let p = build_analysis_prompt(PlantType::Tomato, SoilType::Sandy);
        assert!(p.contains("Plant Type: tomato"));
        assert!(p.contains("Soil Type: sandy (typical pH 6.0-7.5)"));
        for section in [
            "Primary Fertilizer Recommendations",
            "Application Schedule",
            "Soil Optimization",
            "Expected Results",
            "Important Notes",
        ] {
            assert!(p.contains(section), "missing section {}", section);
        }
    }

    #[test]
    fn test_chat_prompt_is_deterministic_by_value() {
        let a = history(4);
        let b = a.clone();
        assert_eq!(
            build_chat_prompt("How much nitrogen?", &a),
            build_chat_prompt("How much nitrogen?", &b)
        );
    }

    #[test]
    fn test_chat_prompt_keeps_only_last_ten() {
        let h = history(12);
        let p = build_chat_prompt("next", &h);
        assert!(!p.contains("entry-01"));
        assert!(!p.contains("entry-02"));
        for i in 3..=12 {
            assert!(p.contains(&format!("entry-{:02}", i)), "entry {} missing", i);
        }
        let block = p
            .split("Conversation history:\n")
            .nth(1)
            .and_then(|rest| rest.split("\nUser: ").next())
            .expect("history block");
        assert_eq!(block.lines().count(), HISTORY_WINDOW);
    }

    #[test]
    fn test_chat_prompt_layout() {
        let h = vec![msg(1, Origin::Assistant, "Hello!")];
        let p = build_chat_prompt("Is compost enough?", &h);
        assert!(p.starts_with("You are an expert AI Agricultural Assistant"));
        assert!(p.contains("assistant: Hello!\n"));
        assert!(p.ends_with("\nUser: Is compost enough?\nAssistant:"));
    }

    #[test]
    fn test_chat_prompt_with_empty_history() {
        let p = build_chat_prompt("hi", &[]);
        assert!(p.contains("Conversation history:\n\nUser: hi"));
    }
}
