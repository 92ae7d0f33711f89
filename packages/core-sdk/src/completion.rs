use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;

use crate::error::AssistantError;
use crate::llm;
use crate::models::ProviderSettings;
use crate::telemetry;

/**
 * \brief 远端文本补全能力：提交 prompt，取回补全文本。
 * \details 具体协议由实现者负责，调用方只依赖此接口。
 */
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String>;

    /** \brief 可用模型列表，默认不支持。 */
    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    /** \brief 用于日志的简短描述（不得包含密钥）。 */
    fn describe(&self) -> String;
}

/**
 * \brief 基于 reqwest 的远端 Provider。
 */
pub struct RemoteProvider {
    http: Client,
    settings: ProviderSettings,
    api_key: String,
}

impl RemoteProvider {
    /**
     * \brief 构造 Provider 句柄，HTTP 客户端初始化失败时返回错误。
     */
    pub fn connect(settings: &ProviderSettings, api_key: &str) -> Result<Self> {
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            settings: settings.clone(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl CompletionService for RemoteProvider {
    async fn generate(&self, prompt: &str) -> Result<String> {
        llm::generate(&self.http, &self.settings, &self.api_key, prompt).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        llm::list_models(&self.http, &self.settings, &self.api_key).await
    }

    fn describe(&self) -> String {
        format!(
            "{} base={} model={}",
            self.settings.kind.as_str(),
            self.settings.api_base,
            self.settings.model
        )
    }
}

/**
 * \brief 补全客户端：系统唯一的 I/O 边界。
 * \details 由凭据存储显式派生并注入给需要的组件，不存在全局句柄。
 */
#[derive(Clone, Default)]
pub struct CompletionClient {
    handle: Option<Arc<dyn CompletionService>>,
}

impl CompletionClient {
    pub fn new(handle: Option<Arc<dyn CompletionService>>) -> Self {
        Self { handle }
    }

    /** \brief 未配置凭据的客户端，所有调用均返回 NotInitialized。 */
    pub fn uninitialized() -> Self {
        Self { handle: None }
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    /**
     * \brief 发送 prompt 并返回补全文本。
     * \details 单次尽力调用：无重试、无超时。
     */
    pub async fn complete(&self, prompt: &str) -> Result<String, AssistantError> {
        let handle = self.handle.as_ref().ok_or(AssistantError::NotInitialized)?;
        telemetry::log_event(
            "completion",
            &format!("request -> {} prompt_len={}", handle.describe(), prompt.len()),
        );
        match handle.generate(prompt).await {
            Ok(text) => Ok(text),
            Err(e) => {
                telemetry::log_error(
                    "completion",
                    &format!("{} failed: {:#}", handle.describe(), e),
                );
                Err(AssistantError::transport(format!("{:#}", e)))
            }
        }
    }

    /** \brief 健康检查用：列出可用模型。 */
    pub async fn list_models(&self) -> Result<Vec<String>, AssistantError> {
        let handle = self.handle.as_ref().ok_or(AssistantError::NotInitialized)?;
        handle
            .list_models()
            .await
            .map_err(|e| AssistantError::transport(format!("{:#}", e)))
    }
}
