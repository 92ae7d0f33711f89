use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;

use crate::completion::{CompletionClient, CompletionService, RemoteProvider};
use crate::db;
use crate::error::AssistantError;
use crate::models::ProviderSettings;
use crate::telemetry;

/**
 * \brief 由配置与密钥构造补全句柄的工厂。
 */
pub type ClientFactory =
    Arc<dyn Fn(&ProviderSettings, &str) -> Result<Arc<dyn CompletionService>> + Send + Sync>;

/** \brief 默认工厂：构造基于 reqwest 的远端 Provider。 */
pub fn remote_factory() -> ClientFactory {
    Arc::new(
        |settings: &ProviderSettings, api_key: &str| -> Result<Arc<dyn CompletionService>> {
            let provider = RemoteProvider::connect(settings, api_key)?;
            Ok(Arc::new(provider))
        },
    )
}

/**
 * \brief 凭据存储：持有唯一的 API Key 及其派生的补全句柄。
 * \details 仅在显式录入时更新；若配置了数据库路径，则密钥只写入本地 SQLite。
 */
pub struct CredentialStore {
    settings: ProviderSettings,
    handle: Option<Arc<dyn CompletionService>>,
    factory: ClientFactory,
    db_path: Option<PathBuf>,
}

impl CredentialStore {
    /** \brief 纯内存存储，不做持久化。 */
    pub fn new(settings: ProviderSettings) -> Self {
        Self::with_factory(settings, remote_factory())
    }

    pub fn with_factory(settings: ProviderSettings, factory: ClientFactory) -> Self {
        Self {
            settings,
            handle: None,
            factory,
            db_path: None,
        }
    }

    /**
     * \brief 从本地数据库恢复：读取 Provider 配置与已保存的密钥。
     * \details 已保存的密钥若无法构造句柄，仅记录日志，存储保持未就绪。
     */
    pub fn open(db_path: &Path, factory: ClientFactory) -> Result<Self> {
        let conn = db::open_db(db_path)?;
        db::migrate(&conn)?;
        let settings = db::get_provider_settings(&conn)?;
        let mut store = Self::with_factory(settings, factory);
        store.db_path = Some(db_path.to_path_buf());
        if let Some(key) = db::get_api_key(&conn)? {
            match (store.factory)(&store.settings, &key) {
                Ok(handle) => store.handle = Some(handle),
                Err(e) => telemetry::log_error(
                    "credential",
                    &format!("restore failed: {:#}", e),
                ),
            }
        }
        Ok(store)
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    /**
     * \brief 录入密钥，沿用当前 Provider 配置。
     * \return 空白输入返回 InvalidCredential；否则尝试构造句柄，成功为 true，失败为 false（保留旧句柄）。
     */
    pub fn set_credential(&mut self, raw: &str) -> Result<bool, AssistantError> {
        let settings = self.settings.clone();
        self.configure(settings, raw)
    }

    /**
     * \brief 以新的 Provider 配置录入密钥。
     * \details 先用新配置构造句柄；仅在成功时一并提交配置、句柄与密钥，失败时存储保持原样。
     */
    pub fn configure(
        &mut self,
        settings: ProviderSettings,
        raw: &str,
    ) -> Result<bool, AssistantError> {
        let key = raw.trim();
        if key.is_empty() {
            return Err(AssistantError::InvalidCredential);
        }
        let handle = match (self.factory)(&settings, key) {
            Ok(handle) => handle,
            Err(e) => {
                telemetry::log_error(
                    "credential",
                    &format!(
                        "client construction failed for {}: {:#}",
                        settings.kind.as_str(),
                        e
                    ),
                );
                return Ok(false);
            }
        };
        if let Some(path) = &self.db_path {
            if let Err(e) = persist(path, &settings, key) {
                telemetry::log_error("credential", &format!("persist failed: {:#}", e));
            }
        }
        self.settings = settings;
        self.handle = Some(handle);
        telemetry::log_event(
            "credential",
            &format!("configured provider={}", self.settings.kind.as_str()),
        );
        Ok(true)
    }

    pub fn is_ready(&self) -> bool {
        self.handle.is_some()
    }

    /** \brief 忘记密钥（内存句柄与本地保存值）。 */
    pub fn clear(&mut self) -> Result<()> {
        self.handle = None;
        if let Some(path) = &self.db_path {
            let conn = db::open_db(path)?;
            db::clear_api_key(&conn)?;
        }
        telemetry::log_event("credential", "cleared");
        Ok(())
    }

    /** \brief 派生注入用的补全客户端。 */
    pub fn client(&self) -> CompletionClient {
        CompletionClient::new(self.handle.clone())
    }
}

fn persist(path: &Path, settings: &ProviderSettings, key: &str) -> Result<()> {
    let conn = db::open_db(path)?;
    db::migrate(&conn)?;
    db::set_provider_settings(&conn, settings)?;
    db::set_api_key(&conn, key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion::testing::ScriptedService;
    use crate::models::ProviderKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn scripted_factory() -> ClientFactory {
        Arc::new(|_: &ProviderSettings, _: &str| -> Result<Arc<dyn CompletionService>> {
            Ok(ScriptedService::replying("ok") as Arc<dyn CompletionService>)
        })
    }

    fn failing_factory() -> ClientFactory {
        Arc::new(|_: &ProviderSettings, _: &str| -> Result<Arc<dyn CompletionService>> {
            Err(anyhow::anyhow!("tls backend unavailable"))
        })
    }

    #[test]
    fn test_blank_credentials_are_rejected() {
        let mut store =
            CredentialStore::with_factory(ProviderSettings::default(), scripted_factory());
        assert_eq!(store.set_credential(""), Err(AssistantError::InvalidCredential));
        assert_eq!(store.set_credential("   "), Err(AssistantError::InvalidCredential));
        assert!(!store.is_ready());
    }

    #[test]
    fn test_set_credential_makes_store_ready() {
        let mut store =
            CredentialStore::with_factory(ProviderSettings::default(), scripted_factory());
        assert_eq!(store.set_credential("abc"), Ok(true));
        assert!(store.is_ready());
        assert!(store.client().is_ready());
    }

    #[test]
    fn test_default_factory_builds_remote_handle() {
        let mut store = CredentialStore::new(ProviderSettings::default());
        assert_eq!(store.set_credential("abc"), Ok(true));
        assert!(store.is_ready());
    }

    #[test]
    fn test_factory_failure_returns_false() {
        let mut store =
            CredentialStore::with_factory(ProviderSettings::default(), failing_factory());
        assert_eq!(store.set_credential("abc"), Ok(false));
        assert!(!store.is_ready());
    }

    #[test]
    fn test_persisted_key_is_restored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");

        let mut store = CredentialStore::open(&path, scripted_factory()).expect("open");
        assert!(!store.is_ready());
        assert_eq!(store.set_credential("  key-1  "), Ok(true));

        let conn = db::open_db(&path).expect("open db");
        assert_eq!(db::get_api_key(&conn).expect("get").as_deref(), Some("key-1"));

        let reopened = CredentialStore::open(&path, scripted_factory()).expect("reopen");
        assert!(reopened.is_ready());
    }

    #[test]
    fn test_clear_forgets_persisted_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");

        let mut store = CredentialStore::open(&path, scripted_factory()).expect("open");
        store.set_credential("key-1").expect("set");
        store.clear().expect("clear");
        assert!(!store.is_ready());

        let reopened = CredentialStore::open(&path, scripted_factory()).expect("reopen");
        assert!(!reopened.is_ready());
    }

    #[test]
    fn test_configure_switches_provider_and_persists() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");

        let mut store = CredentialStore::open(&path, scripted_factory()).expect("open");
        let openai = ProviderSettings::for_kind(ProviderKind::OpenAI);
        assert_eq!(store.configure(openai.clone(), "key-1"), Ok(true));
        assert!(store.is_ready());
        assert_eq!(store.settings(), &openai);

        let reopened = CredentialStore::open(&path, scripted_factory()).expect("reopen");
        assert_eq!(reopened.settings(), &openai);
        assert!(reopened.is_ready());
    }

    #[test]
    fn test_failed_configure_keeps_previous_credential() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.db");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let factory: ClientFactory = Arc::new(
            move |_: &ProviderSettings, _: &str| -> Result<Arc<dyn CompletionService>> {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Ok(ScriptedService::replying("ok") as Arc<dyn CompletionService>)
                } else {
                    Err(anyhow::anyhow!("tls backend unavailable"))
                }
            },
        );

        let mut store = CredentialStore::open(&path, factory).expect("open");
        assert_eq!(store.set_credential("key-1"), Ok(true));
        let other = ProviderSettings::default().overridden(None, None, Some("other"));
        assert_eq!(store.configure(other, "key-2"), Ok(false));
        assert!(store.is_ready());
        assert_eq!(store.settings(), &ProviderSettings::default());

        let conn = db::open_db(&path).expect("open db");
        assert_eq!(db::get_api_key(&conn).expect("get").as_deref(), Some("key-1"));
        assert_eq!(
            db::get_provider_settings(&conn).expect("settings"),
            ProviderSettings::default()
        );
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_configure_rejects_blank_key_before_building() {
        let mut store =
            CredentialStore::with_factory(ProviderSettings::default(), failing_factory());
        assert_eq!(
            store.configure(ProviderSettings::default(), "  "),
            Err(AssistantError::InvalidCredential)
        );
    }
}
