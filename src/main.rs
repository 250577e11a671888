use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;

use marks_sync::utils::logging;
use marks_sync::{App, Config, UserId};

#[derive(Parser)]
#[command(name = "marks-sync")]
#[command(about = "Watches the student portal for new scores and notifies users", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the worker pool until Ctrl-C (default)
    Run,
    /// Register a user and send them the list of their classes
    Register { user_id: String },
    /// Subscribe a user to a class
    Subscribe { user_id: String, class_id: String },
    /// Unsubscribe a user from a class
    Unsubscribe { user_id: String, class_id: String },
    /// Print the classes of a user
    List { user_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load()?;

    // 初始化日志
    logging::init(config.verbose_logging);

    let app = App::initialize(config).await?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            app.run().await?;
        }
        Commands::Register { user_id } => {
            let user_id = UserId::new(user_id);
            if app.subscriptions().register_user(&user_id, Utc::now()).await? {
                info!("✓ 用户 {} 注册完成", user_id);
            } else {
                info!("用户 {} 已存在", user_id);
            }
        }
        Commands::Subscribe { user_id, class_id } => {
            let reply = app
                .subscriptions()
                .subscribe(&UserId::new(user_id), &class_id)
                .await?;
            println!("{}", reply);
        }
        Commands::Unsubscribe { user_id, class_id } => {
            let reply = app
                .subscriptions()
                .unsubscribe(&UserId::new(user_id), &class_id)
                .await?;
            println!("{}", reply);
        }
        Commands::List { user_id } => {
            let reply = app.subscriptions().list_classes(&UserId::new(user_id)).await?;
            println!("{}", reply);
        }
    }

    Ok(())
}
