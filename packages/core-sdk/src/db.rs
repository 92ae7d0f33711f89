use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use crate::models::{ProviderKind, ProviderSettings};

const DB_PATH_ENV: &str = "SMART_FERTILIZER_DB";
const DEFAULT_DB_FILE: &str = "smart-fertilizer.db";

const KEY_API_KEY: &str = "api_key";
const KEY_PROVIDER_TYPE: &str = "provider_type";
const KEY_API_BASE: &str = "api_base";
const KEY_MODEL: &str = "model";
const KEY_TELEMETRY: &str = "telemetry_enabled";

/**
 * \brief 默认数据库路径：环境变量 SMART_FERTILIZER_DB，否则为当前目录下的 smart-fertilizer.db。
 */
pub fn default_db_path() -> PathBuf {
    std::env::var(DB_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_FILE))
}

/**
 * \brief 打开数据库文件并设置忙等待。
 */
pub fn open_db(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

fn delete_config(conn: &Connection, key: &str) -> Result<()> {
    retry_on_locked(|| conn.execute("DELETE FROM app_config WHERE key=?1", params![key]))?;
    Ok(())
}

/**
 * \brief 读取已保存的 API Key（空值视为不存在）。
 */
pub fn get_api_key(conn: &Connection) -> Result<Option<String>> {
    Ok(get_config(conn, KEY_API_KEY)?.filter(|k| !k.trim().is_empty()))
}

pub fn set_api_key(conn: &Connection, api_key: &str) -> Result<()> {
    set_config(conn, KEY_API_KEY, api_key)
}

pub fn clear_api_key(conn: &Connection) -> Result<()> {
    delete_config(conn, KEY_API_KEY)
}

/**
 * \brief 读取 Provider 配置，缺失字段使用默认值（Gemini）。
 */
pub fn get_provider_settings(conn: &Connection) -> Result<ProviderSettings> {
    let defaults = ProviderSettings::default();
    let kind = get_config(conn, KEY_PROVIDER_TYPE)?
        .map(|s| ProviderKind::parse(&s))
        .unwrap_or(defaults.kind);
    let api_base = get_config(conn, KEY_API_BASE)?.unwrap_or(defaults.api_base);
    let model = get_config(conn, KEY_MODEL)?.unwrap_or(defaults.model);
    Ok(ProviderSettings {
        kind,
        api_base,
        model,
    })
}

pub fn set_provider_settings(conn: &Connection, settings: &ProviderSettings) -> Result<()> {
    set_config(conn, KEY_PROVIDER_TYPE, settings.kind.as_str())?;
    set_config(conn, KEY_API_BASE, &settings.api_base)?;
    set_config(conn, KEY_MODEL, &settings.model)?;
    Ok(())
}

pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    Ok(get_config(conn, KEY_TELEMETRY)?
        .map(|s| s == "1")
        .unwrap_or(false))
}

pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_config(conn, KEY_TELEMETRY, if enabled { "1" } else { "0" })
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并线性退避，最多尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    let mut attempt = 0;
    loop {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                attempt += 1;
                thread::sleep(Duration::from_millis(200 * attempt as u64));
            }
            Err(e) => return Err(e.into()),
        }
    }
}
