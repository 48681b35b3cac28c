//! Tests for subscription and favourite reconciliation.

use std::sync::Arc;

use super::{Favourites, Subscriptions, TopicStatus, restore_subscriptions};
use crate::link::fake::{FakeLink, LinkCall};
use crate::link::BrokerLink;
use crate::storage::{Database, Ledger, NewUser};

struct Fixture {
    db: Database,
    link: Arc<FakeLink>,
    broker: i64,
    user: i64,
}

impl Fixture {
    async fn new() -> Self {
        let db = Database::open_in_memory().await.unwrap();
        let broker = db.resolve_or_create_broker("10.0.0.5", 1883).await.unwrap();
        let user = db
            .resolve_or_create_user(NewUser {
                broker_id: broker,
                client_id: "alice",
                username: "alice",
                password: "pw",
                outsider: false,
            })
            .await
            .unwrap();
        Self {
            db,
            link: FakeLink::new(),
            broker,
            user,
        }
    }

    fn subscriptions(&self) -> Subscriptions {
        Subscriptions::new(
            self.db.clone(),
            Arc::clone(&self.link) as Arc<dyn BrokerLink>,
            self.broker,
            self.user,
        )
    }

    fn favourites(&self) -> Favourites {
        Favourites::new(self.db.clone(), self.broker, self.user)
    }

    async fn subscribed(&self) -> Vec<String> {
        self.db
            .list_ledger(Ledger::Subscriptions, self.broker, self.user)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.topic)
            .collect()
    }

    async fn fail_writes(&self, table: &str, event: &str) {
        let sql = format!(
            "CREATE TRIGGER fail_{event}_{table} BEFORE {event} ON {table} \
             BEGIN SELECT RAISE(ABORT, 'storage unavailable'); END"
        );
        sqlx::query(&sql).execute(self.db.pool()).await.unwrap();
    }
}

fn topics(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| (*t).to_string()).collect()
}

fn statuses(report: &super::BatchReport) -> Vec<TopicStatus> {
    report.items().iter().map(|(_, r)| r.status).collect()
}

// === Subscribe ===

#[tokio::test]
async fn duplicate_in_one_batch_is_fine_then_what() {
    let fx = Fixture::new().await;
    let report = fx
        .subscriptions()
        .subscribe(&topics(&["a/b", "a/b"]))
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec![TopicStatus::Fine, TopicStatus::What]);
    assert!(!report.all_fine());
    assert_eq!(fx.link.subscribe_calls(), vec!["a/b"]);
    assert_eq!(fx.subscribed().await, vec!["a/b"]);
}

#[tokio::test]
async fn resubscribe_reuses_catalogued_topic() {
    let fx = Fixture::new().await;
    let subs = fx.subscriptions();
    subs.subscribe(&topics(&["a/b"])).await.unwrap();
    subs.unsubscribe(&topics(&["a/b"])).await.unwrap();

    let report = subs.subscribe(&topics(&["a/b"])).await.unwrap();
    assert!(report.all_fine());
    assert_eq!(fx.db.list_topics_for_broker(fx.broker).await.unwrap().len(), 1);
    assert_eq!(fx.subscribed().await, vec!["a/b"]);
}

#[tokio::test]
async fn broker_rejection_writes_nothing() {
    let fx = Fixture::new().await;
    fx.link.reject("secret/#");

    let report = fx
        .subscriptions()
        .subscribe(&topics(&["secret/#", "open/#"]))
        .await
        .unwrap();

    assert_eq!(statuses(&report), vec![TopicStatus::Error, TopicStatus::Fine]);
    assert!(fx.db.find_topic(fx.broker, "secret/#").await.unwrap().is_none());
    assert_eq!(fx.subscribed().await, vec!["open/#"]);
}

#[tokio::test]
async fn broker_timeout_is_error() {
    let fx = Fixture::new().await;
    fx.link.time_out("slow/topic");

    let report = fx
        .subscriptions()
        .subscribe(&topics(&["slow/topic"]))
        .await
        .unwrap();
    assert_eq!(report.status_of("slow/topic"), Some(TopicStatus::Error));
    assert!(fx.subscribed().await.is_empty());
}

#[tokio::test]
async fn invalid_filter_never_reaches_broker() {
    let fx = Fixture::new().await;
    let report = fx
        .subscriptions()
        .subscribe(&topics(&["a/#/b", ""]))
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![TopicStatus::ClientError, TopicStatus::ClientError]
    );
    assert!(fx.link.calls().is_empty());
}

#[tokio::test]
async fn concurrent_duplicate_subscribes_leave_one_row() {
    let fx = Fixture::new().await;
    let (first, second) = (fx.subscriptions(), fx.subscriptions());
    let wanted = topics(&["race/topic"]);

    let (a, b) = tokio::join!(first.subscribe(&wanted), second.subscribe(&wanted));
    let mut all = statuses(&a.unwrap());
    all.extend(statuses(&b.unwrap()));

    assert_eq!(all.iter().filter(|s| **s == TopicStatus::Fine).count(), 1);
    assert_eq!(all.iter().filter(|s| **s == TopicStatus::What).count(), 1);
    assert_eq!(fx.subscribed().await.len(), 1);
}

#[tokio::test]
async fn failed_persist_reverts_broker_subscription() {
    let fx = Fixture::new().await;
    fx.fail_writes("subscriptions", "INSERT").await;

    let report = fx
        .subscriptions()
        .subscribe(&topics(&["a/b"]))
        .await
        .unwrap();

    let (_, result) = &report.items()[0];
    assert_eq!(result.status, TopicStatus::ServerError);
    assert!(result.message.contains("reverted"));
    assert_eq!(
        fx.link.calls(),
        vec![
            LinkCall::Subscribe("a/b".into()),
            LinkCall::Unsubscribe("a/b".into())
        ]
    );
    assert!(fx.subscribed().await.is_empty());
}

// === Unsubscribe ===

#[tokio::test]
async fn unsubscribe_unknown_or_unsubscribed_skips_broker() {
    let fx = Fixture::new().await;
    fx.db.resolve_or_create_topic(fx.broker, "known/only").await.unwrap();

    let report = fx
        .subscriptions()
        .unsubscribe(&topics(&["never/seen", "known/only"]))
        .await
        .unwrap();

    assert_eq!(
        statuses(&report),
        vec![TopicStatus::ClientError, TopicStatus::What]
    );
    assert!(fx.link.unsubscribe_calls().is_empty());
}

#[tokio::test]
async fn unsubscribe_keeps_catalogue() {
    let fx = Fixture::new().await;
    let subs = fx.subscriptions();
    subs.subscribe(&topics(&["a/b"])).await.unwrap();

    let report = subs.unsubscribe(&topics(&["a/b", "a/b"])).await.unwrap();

    assert_eq!(statuses(&report), vec![TopicStatus::Fine, TopicStatus::What]);
    assert_eq!(fx.link.unsubscribe_calls(), vec!["a/b"]);
    assert!(fx.subscribed().await.is_empty());
    assert!(fx.db.find_topic(fx.broker, "a/b").await.unwrap().is_some());
}

#[tokio::test]
async fn rejected_unsubscribe_keeps_ledger_row() {
    let fx = Fixture::new().await;
    let subs = fx.subscriptions();
    subs.subscribe(&topics(&["a/b"])).await.unwrap();
    fx.link.reject("a/b");

    let report = subs.unsubscribe(&topics(&["a/b"])).await.unwrap();
    assert_eq!(report.status_of("a/b"), Some(TopicStatus::Error));
    assert_eq!(fx.subscribed().await, vec!["a/b"]);
}

#[tokio::test]
async fn failed_delete_resubscribes_on_broker() {
    let fx = Fixture::new().await;
    let subs = fx.subscriptions();
    subs.subscribe(&topics(&["a/b"])).await.unwrap();
    fx.fail_writes("subscriptions", "DELETE").await;

    let report = subs.unsubscribe(&topics(&["a/b"])).await.unwrap();

    assert_eq!(report.status_of("a/b"), Some(TopicStatus::ServerError));
    assert_eq!(fx.link.subscribe_calls(), vec!["a/b", "a/b"]);
    assert_eq!(fx.subscribed().await, vec!["a/b"]);
}

// === Favourites ===

#[tokio::test]
async fn favourite_requires_known_topic() {
    let fx = Fixture::new().await;
    let favs = fx.favourites();

    let report = favs.mark(&topics(&["x/y"])).await.unwrap();
    assert_eq!(report.status_of("x/y"), Some(TopicStatus::ClientError));

    fx.subscriptions()
        .subscribe(&topics(&["x/y"]))
        .await
        .unwrap();

    let report = favs.mark(&topics(&["x/y"])).await.unwrap();
    assert!(report.all_fine());
}

#[tokio::test]
async fn favourite_lifecycle_is_independent_of_subscriptions() {
    let fx = Fixture::new().await;
    fx.db.resolve_or_create_topic(fx.broker, "x/y").await.unwrap();
    let favs = fx.favourites();

    let report = favs.mark(&topics(&["x/y", "x/y"])).await.unwrap();
    assert_eq!(statuses(&report), vec![TopicStatus::Fine, TopicStatus::What]);
    assert!(fx.subscribed().await.is_empty());

    let report = favs.unmark(&topics(&["x/y", "x/y", "nope"])).await.unwrap();
    assert_eq!(
        statuses(&report),
        vec![TopicStatus::Fine, TopicStatus::What, TopicStatus::What]
    );
    assert!(fx
        .db
        .list_ledger(Ledger::Favourites, fx.broker, fx.user)
        .await
        .unwrap()
        .is_empty());
    assert!(fx.link.calls().is_empty());
}

#[tokio::test]
async fn favourite_write_failure_is_server_error() {
    let fx = Fixture::new().await;
    fx.db.resolve_or_create_topic(fx.broker, "x/y").await.unwrap();
    fx.fail_writes("favourites", "INSERT").await;

    let report = fx.favourites().mark(&topics(&["x/y"])).await.unwrap();
    assert_eq!(report.status_of("x/y"), Some(TopicStatus::ServerError));
}

// === Restore ===

#[tokio::test]
async fn restore_resubscribes_every_ledger_row() {
    let fx = Fixture::new().await;
    fx.subscriptions()
        .subscribe(&topics(&["a/b", "c/#", "d/+"]))
        .await
        .unwrap();

    let fresh = FakeLink::new();
    fresh.reject("c/#");
    let summary = restore_subscriptions(&fx.db, fresh.as_ref(), fx.broker, fx.user)
        .await
        .unwrap();

    assert_eq!(summary.restored, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(fresh.subscribe_calls(), vec!["a/b", "c/#", "d/+"]);
    assert_eq!(fx.subscribed().await.len(), 3);
}

#[tokio::test]
async fn restore_with_empty_ledger_does_nothing() {
    let fx = Fixture::new().await;
    let summary = restore_subscriptions(&fx.db, fx.link.as_ref(), fx.broker, fx.user)
        .await
        .unwrap();
    assert_eq!(summary.restored + summary.failed, 0);
    assert!(fx.link.calls().is_empty());
}
