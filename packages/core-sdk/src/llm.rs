use anyhow::{anyhow, Result};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::{json, Value};

use crate::models::{ProviderKind, ProviderSettings};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const CLAUDE_MAX_TOKENS: u32 = 2048;
const GEMINI_KEY_HEADER: &str = "x-goog-api-key";

/**
 * \brief 单次文本补全：提交 prompt，返回模型输出的完整文本。
 * \details 不做重试、不设超时；非 2xx 状态或空输出均视为失败。
 */
pub async fn generate(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
    prompt: &str,
) -> Result<String> {
    let text = match settings.kind {
        ProviderKind::Gemini => generate_gemini(http, settings, api_key, prompt).await?,
        ProviderKind::OpenAI => generate_openai(http, settings, api_key, prompt).await?,
        ProviderKind::Claude => generate_claude(http, settings, api_key, prompt).await?,
    };
    if text.trim().is_empty() {
        return Err(anyhow!("{} returned an empty completion", settings.kind.as_str()));
    }
    Ok(text)
}

/**
 * \brief 列出当前 Provider 可用模型列表（用于健康检查）。
 */
pub async fn list_models(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
) -> Result<Vec<String>> {
    match settings.kind {
        ProviderKind::Gemini => list_models_gemini(http, settings, api_key).await,
        ProviderKind::OpenAI => list_models_openai(http, settings, api_key).await,
        ProviderKind::Claude => list_models_claude(http, settings, api_key).await,
    }
}

async fn generate_gemini(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
    prompt: &str,
) -> Result<String> {
    let base = normalize_gemini_base(&settings.api_base);
    let url = format!("{}/models/{}:generateContent", base, settings.model);
    let body = json!({
        "contents": [{
            "role": "user",
            "parts": [{"text": prompt}]
        }]
    });

    let resp = http
        .post(url)
        .header(GEMINI_KEY_HEADER, api_key)
        .json(&body)
        .send()
        .await
        .map_err(redact)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("gemini request failed: {} -> {}", status, text));
    }
    let v: Value = resp.json().await.map_err(redact)?;
    Ok(extract_gemini_content(&v))
}

async fn generate_openai(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!(
        "{}/v1/chat/completions",
        settings.api_base.trim_end_matches('/')
    );
    let body = json!({
        "model": settings.model,
        "messages": [{"role": "user", "content": prompt}],
        "stream": false
    });

    let resp = http
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .header(AUTHORIZATION, format!("Bearer {}", api_key))
        .json(&body)
        .send()
        .await
        .map_err(redact)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("request failed: {} -> {}", status, text));
    }
    let v: Value = resp.json().await.map_err(redact)?;
    Ok(extract_openai_content(&v))
}

async fn generate_claude(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
    prompt: &str,
) -> Result<String> {
    let url = format!("{}/v1/messages", settings.api_base.trim_end_matches('/'));
    let body = json!({
        "model": settings.model,
        "max_tokens": CLAUDE_MAX_TOKENS,
        "messages": [{
            "role": "user",
            "content": [{"type": "text", "text": prompt}]
        }],
    });

    let resp = http
        .post(url)
        .headers(anthropic_headers(api_key)?)
        .json(&body)
        .send()
        .await
        .map_err(redact)?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("claude request failed: {} -> {}", status, text));
    }
    let v: Value = resp.json().await.map_err(redact)?;
    Ok(extract_anthropic_content(&v))
}

/** \brief 去掉错误中的请求地址，避免泄露查询参数。 */
fn redact(e: reqwest::Error) -> anyhow::Error {
    anyhow!(e.without_url())
}

fn anthropic_headers(api_key: &str) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
    headers.insert(
        "anthropic-version",
        HeaderValue::from_static(ANTHROPIC_VERSION),
    );
    Ok(headers)
}

async fn list_models_gemini(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
) -> Result<Vec<String>> {
    let url = format!("{}/models", normalize_gemini_base(&settings.api_base));
    let resp = http
        .get(url)
        .header(GEMINI_KEY_HEADER, api_key)
        .send()
        .await
        .map_err(redact)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("gemini list models failed: {} -> {}", status, text));
    }
    parse_gemini_model_list(resp.json().await.map_err(redact)?)
}

async fn list_models_openai(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
) -> Result<Vec<String>> {
    let url = format!("{}/v1/models", settings.api_base.trim_end_matches('/'));
    let resp = http
        .get(url)
        .header(AUTHORIZATION, format!("Bearer {}", api_key))
        .send()
        .await
        .map_err(redact)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("list models failed: {} -> {}", status, text));
    }
    parse_model_list(resp.json().await.map_err(redact)?)
}

async fn list_models_claude(
    http: &Client,
    settings: &ProviderSettings,
    api_key: &str,
) -> Result<Vec<String>> {
    let url = format!("{}/v1/models", settings.api_base.trim_end_matches('/'));
    let resp = http
        .get(url)
        .headers(anthropic_headers(api_key)?)
        .send()
        .await
        .map_err(redact)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(anyhow!("claude list models failed: {} -> {}", status, text));
    }
    parse_model_list(resp.json().await.map_err(redact)?)
}

fn extract_openai_content(v: &Value) -> String {
    v.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .unwrap_or("")
        .to_string()
}

fn extract_anthropic_content(v: &Value) -> String {
    v.get("content")
        .and_then(|arr| arr.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn extract_gemini_content(v: &Value) -> String {
    v.get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|first| first.get("content"))
        .and_then(|content| content.get("parts"))
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

fn parse_model_list(v: Value) -> Result<Vec<String>> {
    let arr = v
        .get("data")
        .and_then(|x| x.as_array())
        .ok_or_else(|| anyhow!("unexpected models payload: {}", v))?;
    Ok(arr
        .iter()
        .filter_map(|item| item.get("id").and_then(|s| s.as_str()))
        .map(|s| s.to_string())
        .collect())
}

fn parse_gemini_model_list(v: Value) -> Result<Vec<String>> {
    let arr = v
        .get("models")
        .and_then(|x| x.as_array())
        .ok_or_else(|| anyhow!("unexpected gemini models payload: {}", v))?;
    Ok(arr
        .iter()
        .filter_map(|item| item.get("name").and_then(|s| s.as_str()))
        .map(|s| s.to_string())
        .collect())
}

fn normalize_gemini_base(api_base: &str) -> String {
    let trimmed = api_base.trim_end_matches('/');
    if trimmed.ends_with("/v1")
        || trimmed.ends_with("/v1beta")
        || trimmed.contains("/v1/")
        || trimmed.contains("/v1beta/")
    {
        trimmed.to_string()
    } else {
        format!("{}/v1beta", trimmed)
    }
}
