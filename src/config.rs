use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "MARKS_CONFIG";

/// 程序配置
///
/// 优先级：环境变量 > 配置文件 > 默认值
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// 并发 worker 数量
    pub worker_count: usize,
    /// 租约时长（秒）
    pub lease_duration_secs: u64,
    /// 没有到期用户时的等待时间（秒）
    pub idle_backoff_secs: u64,
    /// 存储出错后的等待时间（秒）
    pub error_backoff_secs: u64,
    /// 单次外部调用的超时（秒）
    pub fetch_timeout_secs: u64,
    /// 教务网站地址
    pub base_url: String,
    /// 用户记录目录
    pub data_dir: String,
    /// 会话表文件
    pub sessions_file: String,
    // --- 通知 ---
    /// 设置后通过 webhook 发送通知
    pub webhook_url: Option<String>,
    /// 没有 webhook 时把通知追加到这个文件，都没有则只写日志
    pub notifications_file: Option<String>,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_count: 4,
            lease_duration_secs: 15 * 60,
            idle_backoff_secs: 60,
            error_backoff_secs: 10,
            fetch_timeout_secs: 30,
            base_url: "https://usosweb.mimuw.edu.pl".to_string(),
            data_dir: "data/users".to_string(),
            sessions_file: "sessions.toml".to_string(),
            webhook_url: None,
            notifications_file: None,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 环境变量
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// 从 TOML 文件读取，缺省字段使用默认值
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("无法读取配置文件: {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("无法解析配置文件: {}", path.display()))
    }

    /// 先读 `MARKS_CONFIG` 指向的文件（如果有），再叠加环境变量
    pub fn load() -> Result<Self> {
        let base = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_toml_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.parse().ok())
        }

        Self {
            worker_count: parsed(&lookup, "WORKER_COUNT").unwrap_or(self.worker_count),
            lease_duration_secs: parsed(&lookup, "LEASE_DURATION_SECS").unwrap_or(self.lease_duration_secs),
            idle_backoff_secs: parsed(&lookup, "IDLE_BACKOFF_SECS").unwrap_or(self.idle_backoff_secs),
            error_backoff_secs: parsed(&lookup, "ERROR_BACKOFF_SECS").unwrap_or(self.error_backoff_secs),
            fetch_timeout_secs: parsed(&lookup, "FETCH_TIMEOUT_SECS").unwrap_or(self.fetch_timeout_secs),
            base_url: lookup("BASE_URL").unwrap_or(self.base_url),
            data_dir: lookup("DATA_DIR").unwrap_or(self.data_dir),
            sessions_file: lookup("SESSIONS_FILE").unwrap_or(self.sessions_file),
            webhook_url: lookup("WEBHOOK_URL").or(self.webhook_url),
            notifications_file: lookup("NOTIFICATIONS_FILE").or(self.notifications_file),
            verbose_logging: parsed(&lookup, "VERBOSE_LOGGING").unwrap_or(self.verbose_logging),
        }
    }

    pub fn lease_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.lease_duration_secs as i64)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_secs(self.idle_backoff_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}
