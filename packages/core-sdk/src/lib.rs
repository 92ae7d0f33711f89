pub mod analysis;
pub mod catalog;
pub mod completion;
pub mod credential;
pub mod db;
pub mod error;
pub mod llm;
pub mod models;
pub mod prompt;
pub mod server;
pub mod session;
pub mod telemetry;

/**
 * \brief SDK 预导入集合，方便外部引用常用模块。
 */
pub mod prelude {
    pub use crate::analysis;
    pub use crate::catalog;
    pub use crate::credential::CredentialStore;
    pub use crate::db;
    pub use crate::error::AssistantError;
    pub use crate::models;
    pub use crate::server;
    pub use crate::session::ConversationSession;
    pub use crate::telemetry;
}
