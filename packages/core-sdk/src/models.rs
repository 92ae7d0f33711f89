use serde::{Deserialize, Serialize};

pub const DEFAULT_GEMINI_BASE: &str = "https://generativelanguage.googleapis.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";
pub const DEFAULT_OPENAI_BASE: &str = "https://api.openai.com";
pub const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_CLAUDE_BASE: &str = "https://api.anthropic.com";
pub const DEFAULT_CLAUDE_MODEL: &str = "claude-3-5-haiku-latest";

/**
 * \brief 远端补全服务类型。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAI,
    Claude,
}

impl ProviderKind {
    /** \brief 宽松解析，未知类型按 OpenAI 兼容接口处理。 */
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => ProviderKind::Gemini,
            "claude" | "anthropic" => ProviderKind::Claude,
            _ => ProviderKind::OpenAI,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAI => "openai",
            ProviderKind::Claude => "claude",
        }
    }
}

/**
 * \brief Provider 连接配置（不含密钥）。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /** \brief Provider 类型 */
    pub kind: ProviderKind,
    /** \brief API 基地址 */
    pub api_base: String,
    /** \brief 模型名 */
    pub model: String,
}

impl ProviderSettings {
    /** \brief 指定类型的默认基地址与模型。 */
    pub fn for_kind(kind: ProviderKind) -> Self {
        let (api_base, model) = match kind {
            ProviderKind::Gemini => (DEFAULT_GEMINI_BASE, DEFAULT_GEMINI_MODEL),
            ProviderKind::OpenAI => (DEFAULT_OPENAI_BASE, DEFAULT_OPENAI_MODEL),
            ProviderKind::Claude => (DEFAULT_CLAUDE_BASE, DEFAULT_CLAUDE_MODEL),
        };
        Self {
            kind,
            api_base: api_base.to_string(),
            model: model.to_string(),
        }
    }

    /**
     * \brief 在当前配置上叠加覆盖项；切换类型时未指定的字段取新类型默认值。
     */
    pub fn overridden(
        &self,
        provider: Option<&str>,
        api_base: Option<&str>,
        model: Option<&str>,
    ) -> Self {
        let mut next = match provider.map(ProviderKind::parse) {
            Some(kind) if kind != self.kind => Self::for_kind(kind),
            _ => self.clone(),
        };
        if let Some(base) = api_base.map(str::trim).filter(|s| !s.is_empty()) {
            next.api_base = base.to_string();
        }
        if let Some(model) = model.map(str::trim).filter(|s| !s.is_empty()) {
            next.model = model.to_string();
        }
        next
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self::for_kind(ProviderKind::Gemini)
    }
}

/**
 * \brief 消息来源。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    User,
    Assistant,
}

impl Origin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Origin::User => "user",
            Origin::Assistant => "assistant",
        }
    }
}

/**
 * \brief 会话中的一条消息，创建后不可变。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /** \brief 会话内自增编号 */
    pub id: u64,
    /** \brief 正文 */
    pub text: String,
    /** \brief 来源 */
    pub origin: Origin,
    /** \brief RFC 3339 时间戳 */
    pub timestamp: String,
}

/**
 * \brief 购买渠道。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorLink {
    pub name: String,
    pub link: String,
}

/**
 * \brief 推荐肥料条目。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FertilizerSuggestion {
    pub name: String,
    pub description: String,
    pub price: String,
    pub vendors: Vec<VendorLink>,
}

/**
 * \brief 分析结果来源：远端模型或本地兜底模板。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Remote,
    Fallback,
}

/**
 * \brief 植物/土壤分析结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /** \brief 兼容度，取值 [0, 100] */
    pub compatibility_percent: u8,
    /** \brief 推荐正文 */
    pub recommendation_text: String,
    /** \brief 推荐肥料 */
    pub fertilizer_suggestions: Vec<FertilizerSuggestion>,
    pub source: AnalysisSource,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_kind_parse_aliases() {
        assert_eq!(ProviderKind::parse("Google"), ProviderKind::Gemini);
        assert_eq!(ProviderKind::parse(" anthropic "), ProviderKind::Claude);
        assert_eq!(ProviderKind::parse("openai"), ProviderKind::OpenAI);
        assert_eq!(ProviderKind::parse("something-else"), ProviderKind::OpenAI);
    }

    #[test]
    fn test_default_settings_target_gemini() {
        let s = ProviderSettings::default();
        assert_eq!(s.kind, ProviderKind::Gemini);
        assert_eq!(s.model, "gemini-pro");
    }

    #[test]
    fn test_overridden_switches_kind_defaults() {
        let base = ProviderSettings::default();
        let same = base.overridden(None, None, Some("gemini-1.5-flash"));
        assert_eq!(same.kind, ProviderKind::Gemini);
        assert_eq!(same.model, "gemini-1.5-flash");

        let claude = base.overridden(Some("anthropic"), None, None);
        assert_eq!(claude, ProviderSettings::for_kind(ProviderKind::Claude));

        let local = base.overridden(Some("openai"), Some("http://localhost:8080 "), Some(""));
        assert_eq!(local.api_base, "http://localhost:8080");
        assert_eq!(local.model, DEFAULT_OPENAI_MODEL);
    }

    #[test]
    fn test_analysis_result_serializes_lowercase_source() {
        let r = AnalysisResult {
            compatibility_percent: 90,
            recommendation_text: "ok".into(),
            fertilizer_suggestions: vec![],
            source: AnalysisSource::Fallback,
        };
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["source"], "fallback");
        assert_eq!(v["compatibility_percent"], 90);
    }
}
