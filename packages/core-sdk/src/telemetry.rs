use std::{fs::OpenOptions, io::Write, path::PathBuf};

use anyhow::Result;
use once_cell::sync::Lazy;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

const LOG_FILE: &str = "smart-fertilizer.log";
const LOG_DIR_ENV: &str = "SMART_FERTILIZER_LOG_DIR";

static TELEMETRY_ENABLED: Lazy<std::sync::RwLock<bool>> =
    Lazy::new(|| std::sync::RwLock::new(false));

/**
 * \brief 更新诊断日志开关。
 */
pub fn set_enabled(enabled: bool) {
    if let Ok(mut guard) = TELEMETRY_ENABLED.write() {
        *guard = enabled;
    }
}

/**
 * \brief 查询当前诊断日志开关。
 */
pub fn is_enabled() -> bool {
    TELEMETRY_ENABLED.read().map(|g| *g).unwrap_or(false)
}

/**
 * \brief 记录常规事件。
 */
pub fn log_event(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("INFO", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/**
 * \brief 记录错误事件（远端失败、降级等）。
 */
pub fn log_error(category: &str, message: &str) {
    if !is_enabled() {
        return;
    }
    if let Err(err) = write_line("ERROR", category, message) {
        eprintln!("telemetry write failed: {}", err);
    }
}

/** \brief 日志目录，可由环境变量覆盖。 */
pub fn log_dir() -> PathBuf {
    std::env::var(LOG_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("logs"))
}

fn format_line(timestamp: &str, level: &str, category: &str, message: &str) -> String {
    // 单行记录，换行会破坏按行解析
    let message = message.replace(['\r', '\n'], " ");
    format!("{} [{}] {} - {}", timestamp, level, category, message)
}

fn write_line(level: &str, category: &str, message: &str) -> Result<()> {
    let dir = log_dir();
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    let timestamp = OffsetDateTime::now_utc().format(&Rfc3339)?;
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(dir.join(LOG_FILE))?;
    writeln!(file, "{}", format_line(&timestamp, level, category, message))?;
    Ok(())
}
