use thiserror::Error;

/**
 * \brief 助手流程中的领域错误。
 * \details 远端失败最终都会降级为兜底内容，不会阻塞用户。
 */
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AssistantError {
    /** \brief 输入的 API Key 为空（去除空白后）。 */
    #[error("API key cannot be empty")]
    InvalidCredential,

    /** \brief 尚未配置凭据，补全客户端不可用。 */
    #[error("completion client not initialized, please provide an API key")]
    NotInitialized,

    /** \brief 网络或服务端失败。 */
    #[error("transport error: {0}")]
    Transport(String),

    /** \brief 请求参数不合法（缺失或不在目录中）。 */
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AssistantError {
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AssistantError::InvalidCredential.to_string(),
            "API key cannot be empty"
        );
        assert_eq!(
            AssistantError::transport("503").to_string(),
            "transport error: 503"
        );
    }
}
