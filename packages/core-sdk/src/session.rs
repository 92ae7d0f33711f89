use serde::Serialize;
use std::time::Duration;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tokio::time::Instant;

use crate::completion::CompletionClient;
use crate::error::AssistantError;
use crate::models::{Message, Origin};
use crate::prompt::build_chat_prompt;
use crate::telemetry;

pub const GREETING: &str = "Hello! I'm your AI Agricultural Assistant. I'm here to help you with all your farming, fertilizer, and plant care questions. How can I assist you today?";

pub const CANNED_REPLY: &str = "I apologize, but I'm having trouble connecting right now. Here's some general advice: For most plants, use balanced fertilizer (10-10-10) during growing season, apply organic compost regularly, and always test soil pH before fertilizing. Please try asking your question again in a moment.";

/// Minimum time between a submission and the visible reply.
pub const DEFAULT_PACING: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    AwaitingResponse,
}

/**
 * \brief 已提交、等待回复的一轮对话。
 */
#[derive(Debug)]
pub struct PendingTurn {
    /** \brief 发送给远端的完整 prompt */
    pub prompt: String,
    /** \brief 对应的用户消息编号 */
    pub user_message_id: u64,
    reply_not_before: Instant,
}

impl PendingTurn {
    /** \brief 等待至提交后至少 `pacing` 时长，不持有会话。 */
    pub async fn wait_for_pacing(&self) {
        tokio::time::sleep_until(self.reply_not_before).await;
    }
}

/**
 * \brief 对话会话：只追加的消息日志，驱动聊天界面。
 * \details 状态机 Idle → AwaitingResponse → Idle。是否允许并发提交由调用方根据
 *          `is_awaiting()` 自行判断，会话本身不拒绝。
 */
#[derive(Debug, Clone)]
pub struct ConversationSession {
    messages: Vec<Message>,
    state: SessionState,
    next_id: u64,
    pacing: Duration,
}

impl Default for ConversationSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationSession {
    /** \brief 新会话，始终以助手问候语开头。 */
    pub fn new() -> Self {
        let mut session = Self {
            messages: Vec::new(),
            state: SessionState::Idle,
            next_id: 1,
            pacing: DEFAULT_PACING,
        };
        session.push(Origin::Assistant, GREETING.to_string());
        session
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_awaiting(&self) -> bool {
        self.state == SessionState::AwaitingResponse
    }

    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    fn push(&mut self, origin: Origin, text: String) -> &Message {
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.messages.push(Message {
            id: self.next_id,
            text,
            origin,
            timestamp,
        });
        self.next_id += 1;
        &self.messages[self.messages.len() - 1]
    }

    /**
     * \brief 提交用户消息：立即追加（乐观显示）并进入 AwaitingResponse。
     * \return 需要发送的 prompt；空白消息返回 InvalidRequest 且不修改会话。
     */
    pub fn begin_turn(&mut self, text: &str) -> Result<PendingTurn, AssistantError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(AssistantError::invalid_request("message cannot be empty"));
        }
        // 历史不含本轮用户消息
        let prompt = build_chat_prompt(text, &self.messages);
        let user_message_id = self.push(Origin::User, text.to_string()).id;
        self.state = SessionState::AwaitingResponse;
        Ok(PendingTurn {
            prompt,
            user_message_id,
            reply_not_before: Instant::now() + self.pacing,
        })
    }

    /**
     * \brief 结束一轮：成功则追加助手回复，失败则追加固定的兜底建议，回到 Idle。
     */
    pub fn finish_turn(
        &mut self,
        turn: PendingTurn,
        outcome: Result<String, AssistantError>,
    ) -> &Message {
        let text = match outcome {
            Ok(text) => text,
            Err(e) => {
                telemetry::log_error(
                    "session",
                    &format!("reply to message {} degraded: {}", turn.user_message_id, e),
                );
                CANNED_REPLY.to_string()
            }
        };
        self.state = SessionState::Idle;
        self.push(Origin::Assistant, text)
    }

    /**
     * \brief 完整的一轮：提交 → 远端补全 → 节奏延迟 → 追加回复。
     */
    pub async fn send_message(
        &mut self,
        client: &CompletionClient,
        text: &str,
    ) -> Result<&Message, AssistantError> {
        let turn = self.begin_turn(text)?;
        let outcome = client.complete(&turn.prompt).await;
        turn.wait_for_pacing().await;
        Ok(self.finish_turn(turn, outcome))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::{client_with, ScriptedService};

    fn quick() -> ConversationSession {
        ConversationSession::new().with_pacing(Duration::ZERO)
    }

    #[test]
    fn test_new_session_starts_with_greeting() {
        let s = ConversationSession::new();
        assert_eq!(s.len(), 1);
        assert_eq!(s.messages()[0].origin, Origin::Assistant);
        assert_eq!(s.messages()[0].text, GREETING);
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.pacing(), DEFAULT_PACING);
    }

    #[test]
    fn test_begin_turn_appends_user_message_immediately() {
        let mut s = quick();
        let turn = s.begin_turn("x").expect("begin");
        assert_eq!(s.len(), 2);
        assert!(s.is_awaiting());
        assert_eq!(s.messages()[1].origin, Origin::User);
        assert_eq!(turn.user_message_id, s.messages()[1].id);
        // 本轮消息只出现在结尾，不在历史块中
        assert!(turn.prompt.ends_with("\nUser: x\nAssistant:"));
        assert!(!turn.prompt.contains("user: x"));
    }

    #[test]
    fn test_blank_message_leaves_session_untouched() {
        let mut s = quick();
        assert!(matches!(
            s.begin_turn("  \n "),
            Err(AssistantError::InvalidRequest(_))
        ));
        assert_eq!(s.len(), 1);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_send_message_adds_exactly_two() {
        let mut s = quick();
        let client = client_with(ScriptedService::replying("Use 10-10-10."));
        let reply = s.send_message(&client, "x").await.expect("send").clone();
        assert_eq!(reply.origin, Origin::Assistant);
        assert_eq!(reply.text, "Use 10-10-10.");
        assert_eq!(s.len(), 3);
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_failure_appends_canned_reply() {
        let mut s = quick();
        let reply = s
            .send_message(&CompletionClient::uninitialized(), "help")
            .await
            .expect("send")
            .clone();
        assert_eq!(reply.text, CANNED_REPLY);
        assert_eq!(s.len(), 3);

        let client = client_with(ScriptedService::failing("dns"));
        s.send_message(&client, "again").await.expect("send");
        assert_eq!(s.len(), 5);
        assert_eq!(s.messages()[4].text, CANNED_REPLY);
    }

    #[tokio::test]
    async fn test_ids_increase_and_duplicates_allowed() {
        let mut s = quick();
        let client = client_with(ScriptedService::replying("same"));
        s.send_message(&client, "same").await.expect("send");
        s.send_message(&client, "same").await.expect("send");
        let ids: Vec<u64> = s.messages().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(s.messages()[1].text, s.messages()[3].text);
    }

    #[tokio::test]
    async fn test_history_window_excludes_older_messages() {
        let mut s = quick();
        let service = ScriptedService::replying("ok");
        let client = client_with(service.clone());
        for i in 0..7 {
            s.send_message(&client, &format!("question-{}", i))
                .await
                .expect("send");
        }
        // 问候 + 7 轮 = 15 条；最后一次 prompt 只带此前最近 10 条
        assert_eq!(s.len(), 15);
        let prompts = service.prompts.lock().unwrap();
        let last = prompts.last().expect("prompt");
        assert!(!last.contains(GREETING));
        assert!(!last.contains("user: question-0"));
        assert!(last.contains("user: question-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_is_paced() {
        let mut s = ConversationSession::new();
        let client = client_with(ScriptedService::replying("ok"));
        let started = Instant::now();
        s.send_message(&client, "x").await.expect("send");
        assert!(started.elapsed() >= DEFAULT_PACING);
    }
}
