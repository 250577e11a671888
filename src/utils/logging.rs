/// 日志工具模块
///
/// 提供日志初始化和输出格式的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化全局日志
///
/// 级别由 `RUST_LOG` 控制，未设置时 `verbose` 决定 info / debug。
/// 重复调用是安全的，只有第一次生效。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 成绩同步模式");
    info!("👷 worker 数量: {}", config.worker_count);
    info!("⏱️ 租约时长: {} 秒", config.lease_duration_secs);
    info!("🌐 教务网站: {}", config.base_url);
    info!("📁 数据目录: {}", config.data_dir);
    info!("{}", "=".repeat(60));
}

/// 打印退出时的统计信息
pub fn print_final_stats(cycles: usize, failed: usize, notified: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📊 运行统计");
    info!(
        "结束时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 完成同步: {}", cycles);
    info!("❌ 失败同步: {}", failed);
    info!("📬 发送通知: {}", notified);
    info!("{}", "=".repeat(60));
}

/// 截断长文本用于日志显示
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
