//! 业务能力层
//!
//! 每个服务只做一件事：取会话、取页面、发通知、比较快照、管理订阅

pub mod diff;
pub mod markup_fetcher;
pub mod notifier;
pub mod session;
pub mod subscriptions;

pub use diff::{diff, render_notification, ChangeKind, ClassDiff, ScoreChange};
pub use markup_fetcher::{HttpMarkupFetcher, MarkupFetcher};
pub use notifier::{FileDispatcher, LogDispatcher, NotificationDispatcher, WebhookDispatcher};
pub use session::{SessionProvider, StaticSessionProvider};
pub use subscriptions::SubscriptionService;
