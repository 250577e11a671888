//! 订阅管理 - 业务能力层
//!
//! 处理用户的注册、订阅、取消订阅和课程列表请求，返回给用户的回复文本

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{StoreError, SyncError, SyncResult};
use crate::infrastructure::UserRecordStore;
use crate::models::{Class, ClassHeader, SessionToken, User, UserId};
use crate::parser::{parse_class_list, parse_scores_page};
use crate::services::markup_fetcher::MarkupFetcher;
use crate::services::notifier::NotificationDispatcher;
use crate::services::session::SessionProvider;

/// 解析课程列表失败时使用的标识
const CLASS_LIST_ID: &str = "class-list";

pub const ALREADY_SUBSCRIBED: &str = "You're already subscribed to this class.";
pub const NO_SUCH_CLASS: &str = "No class with this ID is available.";
pub const NOT_SUBSCRIBED: &str = "It seems like you've not been subscribed to this class.";
pub const UNSUBSCRIBED: &str = "Successfully unsubscribed.";
pub const CLASS_LIST_HEADER: &str = "These are your classes (* for subscribed):";

/// 订阅管理服务
pub struct SubscriptionService {
    sessions: Arc<dyn SessionProvider>,
    fetcher: Arc<dyn MarkupFetcher>,
    dispatcher: Arc<dyn NotificationDispatcher>,
    store: Arc<dyn UserRecordStore>,
}

impl SubscriptionService {
    pub fn new(
        sessions: Arc<dyn SessionProvider>,
        fetcher: Arc<dyn MarkupFetcher>,
        dispatcher: Arc<dyn NotificationDispatcher>,
        store: Arc<dyn UserRecordStore>,
    ) -> Self {
        Self {
            sessions,
            fetcher,
            dispatcher,
            store,
        }
    }

    /// 注册新用户
    ///
    /// 已存在的记录保持不变，返回 `false`
    pub async fn register_user(&self, user_id: &UserId, now: DateTime<Utc>) -> SyncResult<bool> {
        match self.store.get(user_id).await {
            Ok(_) => {
                debug!("[用户 {}] 已注册，跳过", user_id);
                return Ok(false);
            }
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => return Err(e.into()),
        }

        let session = self.sessions.get_session(user_id).await?;
        let available = self.fetch_available(&session).await?;
        info!("[用户 {}] 注册完成，可选课程 {} 门", user_id, available.len());

        // 先回复再保存：回复失败时不留下记录，重试仍会走注册流程
        let user = User::new(available, now);
        let reply = render_class_list(&user);
        self.dispatcher.notify(user_id, &reply).await?;

        self.store.set(user_id, &user).await?;
        Ok(true)
    }

    /// 订阅一门课程，返回回复文本
    pub async fn subscribe(&self, user_id: &UserId, class_id: &str) -> SyncResult<String> {
        let mut user = self.store.get(user_id).await?;
        if user.is_observed(class_id) {
            return Ok(ALREADY_SUBSCRIBED.to_string());
        }

        let session = self.sessions.get_session(user_id).await?;

        // 可能是新开的课，刷新一次课程列表再判断
        if user.available_class(class_id).is_none() {
            user.available_classes = self.fetch_available(&session).await?;
            if user.available_class(class_id).is_none() {
                self.save_available(user_id, &user.available_classes).await?;
                return Ok(NO_SUCH_CLASS.to_string());
            }
        }
        let Some(header) = user.available_class(class_id).cloned() else {
            return Ok(NO_SUCH_CLASS.to_string());
        };

        let html = self.fetcher.fetch_scores(&session, &header.id).await?;
        let scores = parse_scores_page(&html).map_err(|e| SyncError::parse(&header.id, e))?;
        let class = Class::new(&header, scores);

        let mut tx = self.store.begin(user_id).await?;
        let mut current = tx.read().await?;
        current.available_classes = user.available_classes;
        current.observe(class);
        tx.write(current);
        tx.commit().await?;

        info!("[用户 {}] 订阅课程 {} ({})", user_id, header.name, header.id);
        Ok(format!("Successfully subscribed to {}", header.name))
    }

    /// 取消订阅，返回回复文本
    pub async fn unsubscribe(&self, user_id: &UserId, class_id: &str) -> SyncResult<String> {
        let mut tx = self.store.begin(user_id).await?;
        let mut user = tx.read().await?;

        if !user.unobserve(class_id) {
            tx.rollback();
            return Ok(NOT_SUBSCRIBED.to_string());
        }

        tx.write(user);
        tx.commit().await?;
        info!("[用户 {}] 取消订阅课程 {}", user_id, class_id);
        Ok(UNSUBSCRIBED.to_string())
    }

    /// 列出可选课程，已订阅的以 `*` 标记
    pub async fn list_classes(&self, user_id: &UserId) -> SyncResult<String> {
        let user = self.store.get(user_id).await?;
        Ok(render_class_list(&user))
    }

    async fn fetch_available(&self, session: &SessionToken) -> SyncResult<Vec<ClassHeader>> {
        let html = self.fetcher.fetch_class_list(session).await?;
        parse_class_list(&html).map_err(|e| SyncError::parse(CLASS_LIST_ID, e))
    }

    async fn save_available(&self, user_id: &UserId, available: &[ClassHeader]) -> SyncResult<()> {
        let mut tx = self.store.begin(user_id).await?;
        let mut current = tx.read().await?;
        current.available_classes = available.to_vec();
        tx.write(current);
        tx.commit().await?;
        Ok(())
    }
}

/// 课程列表回复
pub fn render_class_list(user: &User) -> String {
    let mut lines = Vec::with_capacity(user.available_classes.len() + 1);
    lines.push(CLASS_LIST_HEADER.to_string());
    for class in &user.available_classes {
        if user.is_observed(&class.id) {
            lines.push(format!("* {}: {}", class.id, class.name));
        } else {
            lines.push(format!("{}: {}", class.id, class.name));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::MemoryUserStore;
    use crate::models::{Score, ScorePath};
    use crate::services::session::StaticSessionProvider;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    const CLASS_LIST: &str = r#"
        <html><body>
          <a href="kontroler.php?_action=dla_stud/studia/sprawdziany/pokaz&wez_id=200">Geometria</a>
          <a href="kontroler.php?_action=dla_stud/studia/sprawdziany/pokaz&wez_id=100">Analiza</a>
        </body></html>"#;

    const SCORES: &str = r#"
        <div id="childrenof1">
          <table><tr><td></td><td>Quiz 1<span>(max 5)</span></td><td><b>4</b></td></tr></table>
        </div>"#;

    #[derive(Default)]
    struct FakeFetcher {
        class_list: Mutex<String>,
    }

    #[async_trait]
    impl MarkupFetcher for FakeFetcher {
        async fn fetch_class_list(&self, _session: &SessionToken) -> SyncResult<String> {
            Ok(self.class_list.lock().unwrap().clone())
        }

        async fn fetch_scores(&self, _session: &SessionToken, _class_id: &str) -> SyncResult<String> {
            Ok(SCORES.to_string())
        }
    }

    #[derive(Default)]
    struct RecordingDispatcher {
        sent: Mutex<Vec<(UserId, String)>>,
    }

    #[async_trait]
    impl NotificationDispatcher for RecordingDispatcher {
        async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()> {
            self.sent
                .lock()
                .unwrap()
                .push((user_id.clone(), text.to_string()));
            Ok(())
        }
    }

    /// 第一次发送失败，之后转交给 `inner`
    struct FlakyDispatcher {
        failed_once: AtomicBool,
        inner: RecordingDispatcher,
    }

    #[async_trait]
    impl NotificationDispatcher for FlakyDispatcher {
        async fn notify(&self, user_id: &UserId, text: &str) -> SyncResult<()> {
            if !self.failed_once.swap(true, Ordering::SeqCst) {
                return Err(SyncError::Notify {
                    reason: "webhook 返回 503".into(),
                });
            }
            self.inner.notify(user_id, text).await
        }
    }

    struct Fixture {
        service: SubscriptionService,
        fetcher: Arc<FakeFetcher>,
        dispatcher: Arc<RecordingDispatcher>,
        store: Arc<MemoryUserStore>,
    }

    fn fixture(class_list: &str) -> Fixture {
        let mut sessions = HashMap::new();
        sessions.insert(UserId::new("alice"), "sess".to_string());
        let fetcher = Arc::new(FakeFetcher {
            class_list: Mutex::new(class_list.to_string()),
        });
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let store = Arc::new(MemoryUserStore::new());
        let service = SubscriptionService::new(
            Arc::new(StaticSessionProvider::new(sessions)),
            fetcher.clone(),
            dispatcher.clone(),
            store.clone(),
        );
        Fixture {
            service,
            fetcher,
            dispatcher,
            store,
        }
    }

    fn alice() -> UserId {
        UserId::new("alice")
    }

    #[tokio::test]
    async fn test_register_is_idempotent_and_notifies_once() {
        let f = fixture(CLASS_LIST);
        let now = Utc::now();

        assert!(f.service.register_user(&alice(), now).await.unwrap());
        assert!(!f.service.register_user(&alice(), now).await.unwrap());

        let user = f.store.get(&alice()).await.unwrap();
        assert_eq!(user.next_check, now);
        assert_eq!(
            user.available_classes,
            vec![
                ClassHeader::new("100", "Analiza"),
                ClassHeader::new("200", "Geometria")
            ]
        );
        assert!(user.observed_classes.is_empty());

        let sent = f.dispatcher.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0].1,
            "These are your classes (* for subscribed):\n100: Analiza\n200: Geometria"
        );
    }

    #[tokio::test]
    async fn test_register_retries_after_failed_reply() {
        let mut sessions = HashMap::new();
        sessions.insert(alice(), "sess".to_string());
        let dispatcher = Arc::new(FlakyDispatcher {
            failed_once: AtomicBool::new(false),
            inner: RecordingDispatcher::default(),
        });
        let store = Arc::new(MemoryUserStore::new());
        let service = SubscriptionService::new(
            Arc::new(StaticSessionProvider::new(sessions)),
            Arc::new(FakeFetcher {
                class_list: Mutex::new(CLASS_LIST.to_string()),
            }),
            dispatcher.clone(),
            store.clone(),
        );

        let err = service.register_user(&alice(), Utc::now()).await.unwrap_err();
        assert!(matches!(err, SyncError::Notify { .. }));
        assert!(matches!(
            store.get(&alice()).await.unwrap_err(),
            StoreError::NotFound { .. }
        ));

        assert!(service.register_user(&alice(), Utc::now()).await.unwrap());
        assert!(store.get(&alice()).await.is_ok());

        let sent = dispatcher.inner.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.starts_with(CLASS_LIST_HEADER));
    }

    #[tokio::test]
    async fn test_subscribe_stores_snapshot() {
        let f = fixture(CLASS_LIST);
        f.service.register_user(&alice(), Utc::now()).await.unwrap();

        let reply = f.service.subscribe(&alice(), "200").await.unwrap();
        assert_eq!(reply, "Successfully subscribed to Geometria");

        let user = f.store.get(&alice()).await.unwrap();
        assert!(user.is_observed("200"));
        let class = user.class("200").unwrap();
        assert_eq!(
            class.scores.get(&ScorePath::new("Quiz 1")),
            Some(&Score::Visible {
                actual: 4.0,
                max: 5.0
            })
        );

        let again = f.service.subscribe(&alice(), "200").await.unwrap();
        assert_eq!(again, ALREADY_SUBSCRIBED);
    }

    #[tokio::test]
    async fn test_subscribe_refreshes_available_classes() {
        let f = fixture(CLASS_LIST);
        f.service.register_user(&alice(), Utc::now()).await.unwrap();

        *f.fetcher.class_list.lock().unwrap() = format!(
            "{}<a href=\"kontroler.php?_action=dla_stud/studia/sprawdziany/pokaz&wez_id=300\">Topologia</a>",
            CLASS_LIST
        );

        let reply = f.service.subscribe(&alice(), "300").await.unwrap();
        assert_eq!(reply, "Successfully subscribed to Topologia");
        assert_eq!(
            f.store.get(&alice()).await.unwrap().available_classes.len(),
            3
        );

        let missing = f.service.subscribe(&alice(), "999").await.unwrap();
        assert_eq!(missing, NO_SUCH_CLASS);
    }

    #[tokio::test]
    async fn test_unsubscribe_and_list() {
        let f = fixture(CLASS_LIST);
        f.service.register_user(&alice(), Utc::now()).await.unwrap();
        f.service.subscribe(&alice(), "100").await.unwrap();

        assert_eq!(
            f.service.list_classes(&alice()).await.unwrap(),
            "These are your classes (* for subscribed):\n* 100: Analiza\n200: Geometria"
        );

        assert_eq!(
            f.service.unsubscribe(&alice(), "100").await.unwrap(),
            UNSUBSCRIBED
        );
        assert_eq!(
            f.service.unsubscribe(&alice(), "100").await.unwrap(),
            NOT_SUBSCRIBED
        );

        let user = f.store.get(&alice()).await.unwrap();
        assert!(user.observed_classes.is_empty());
        assert!(user.classes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let f = fixture(CLASS_LIST);
        let err = f.service.list_classes(&alice()).await.unwrap_err();
        assert!(matches!(err, SyncError::Store(StoreError::NotFound { .. })));
    }
}
