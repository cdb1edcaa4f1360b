//! Concurrency properties of the view path: one winner for burn-on-read,
//! a hard ceiling for view budgets, and no lost purges or double reveals
//! when the sweeper races viewers.

#![allow(clippy::unwrap_used, clippy::panic)]

use std::sync::Arc;

use chrono::Utc;
use shroud_core::audit::{AccessAction, AccessOutcome, ActivityQuery, RequestContext};
use shroud_core::{CreateSecret, Denial, EngineError, LifecycleCoordinator, ViewOutcome};
use shroud_storage::{MemoryBackend, RedbBackend, StorageBackend};
use uuid::Uuid;
use zeroize::Zeroizing;

const VIEWERS: usize = 12;

fn request(max_views: Option<u32>, burn_on_read: bool) -> CreateSecret {
    CreateSecret {
        organization_id: "org-1".to_owned(),
        team_id: None,
        name: "deploy key".to_owned(),
        plaintext: Zeroizing::new("s3cr3t-value".to_owned()),
        password: Zeroizing::new("p@ss".to_owned()),
        max_views,
        expires_at: None,
        burn_on_read,
    }
}

/// Fire `VIEWERS` concurrent views and collect their outcomes.
async fn race(coordinator: &LifecycleCoordinator, id: Uuid, password: &str) -> Vec<ViewOutcome> {
    let handles: Vec<_> = (0..VIEWERS)
        .map(|_| {
            let coordinator = coordinator.clone();
            let password = password.to_owned();
            tokio::spawn(async move {
                coordinator
                    .view(id, &password, &RequestContext::anonymous())
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(VIEWERS);
    for handle in handles {
        outcomes.push(handle.await.unwrap().unwrap());
    }
    outcomes
}

fn revealed_count(outcomes: &[ViewOutcome]) -> usize {
    outcomes
        .iter()
        .filter(|o| matches!(o, ViewOutcome::Revealed(_)))
        .count()
}

async fn assert_burn_has_one_winner(storage: Arc<dyn StorageBackend>) {
    let coordinator = LifecycleCoordinator::new(storage);
    let created = coordinator
        .create(request(None, true), &RequestContext::actor("alice"))
        .await
        .unwrap();

    let outcomes = race(&coordinator, created.id, "p@ss").await;
    assert_eq!(revealed_count(&outcomes), 1);
    for outcome in &outcomes {
        match outcome {
            ViewOutcome::Revealed(secret) => {
                assert_eq!(secret.plaintext.as_str(), "s3cr3t-value");
                assert!(secret.burned);
            }
            ViewOutcome::Denied(denial) => assert_eq!(*denial, Denial::AlreadyBurned),
            ViewOutcome::WrongPassword => panic!("correct password reported as wrong"),
        }
    }

    let summary = coordinator.summary(created.id).await.unwrap();
    assert_eq!(summary.view_count, 1);
    assert!(summary.deleted_at.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burn_on_read_has_exactly_one_winner_in_memory() {
    assert_burn_has_one_winner(Arc::new(MemoryBackend::new())).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn burn_on_read_has_exactly_one_winner_on_redb() {
    let dir = tempfile::tempdir().unwrap();
    let backend = RedbBackend::open(dir.path().join("shroud.redb")).unwrap();
    assert_burn_has_one_winner(Arc::new(backend)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn view_budget_is_a_hard_ceiling() {
    let coordinator = LifecycleCoordinator::new(Arc::new(MemoryBackend::new()));
    let created = coordinator
        .create(request(Some(3), false), &RequestContext::actor("alice"))
        .await
        .unwrap();

    let outcomes = race(&coordinator, created.id, "p@ss").await;
    assert_eq!(revealed_count(&outcomes), 3);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        ViewOutcome::Revealed(_) | ViewOutcome::Denied(Denial::ViewLimitReached)
    )));

    let mut counts: Vec<u32> = outcomes
        .iter()
        .filter_map(|o| match o {
            ViewOutcome::Revealed(secret) => Some(secret.view_count),
            _ => None,
        })
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, vec![1, 2, 3]);
    assert_eq!(coordinator.summary(created.id).await.unwrap().view_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_wrong_passwords_never_consume_budget() {
    let coordinator = LifecycleCoordinator::new(Arc::new(MemoryBackend::new()));
    let created = coordinator
        .create(request(Some(1), true), &RequestContext::actor("alice"))
        .await
        .unwrap();

    let outcomes = race(&coordinator, created.id, "guess").await;
    assert!(outcomes.iter().all(|o| matches!(o, ViewOutcome::WrongPassword)));

    let summary = coordinator.summary(created.id).await.unwrap();
    assert_eq!(summary.view_count, 0);
    assert!(summary.deleted_at.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweeper_racing_viewers_never_double_reveals() {
    let coordinator = LifecycleCoordinator::new(Arc::new(MemoryBackend::new()));
    let created = coordinator
        .create(request(Some(1), false), &RequestContext::actor("alice"))
        .await
        .unwrap();

    let sweeper = coordinator.sweeper().clone();
    let sweeping = tokio::spawn(async move {
        let mut purged = 0;
        for _ in 0..50 {
            purged += sweeper.sweep(Utc::now()).await.unwrap().purged();
            tokio::task::yield_now().await;
        }
        purged
    });
    let outcomes = race(&coordinator, created.id, "p@ss").await;
    let purged = sweeping.await.unwrap();

    assert_eq!(revealed_count(&outcomes), 1);
    assert!(outcomes.iter().all(|o| matches!(
        o,
        ViewOutcome::Revealed(_)
            | ViewOutcome::Denied(Denial::ViewLimitReached | Denial::Deleted)
    )));

    // Whatever the interleaving, the spent record is gone after one more pass.
    let final_pass = coordinator.sweeper().sweep(Utc::now()).await.unwrap().purged();
    assert_eq!(purged + final_pass, 1);
    assert!(matches!(
        coordinator.summary(created.id).await,
        Err(EngineError::NotFound { .. })
    ));
}

#[tokio::test]
async fn history_survives_purge() {
    let coordinator = LifecycleCoordinator::new(Arc::new(MemoryBackend::new()));
    let created = coordinator
        .create(request(None, true), &RequestContext::actor("alice"))
        .await
        .unwrap();
    let viewer = RequestContext {
        actor: None,
        ip_address: Some("198.51.100.4".to_owned()),
        user_agent: Some("Mozilla/5.0".to_owned()),
    };
    let _ = coordinator.view(created.id, "p@ss", &viewer).await.unwrap();
    let _ = coordinator.view(created.id, "p@ss", &viewer).await.unwrap();

    let report = coordinator.sweeper().sweep(Utc::now()).await.unwrap();
    assert_eq!(report.purged_terminal, 1);

    // Once purged, the record reads as deleted; that attempt has no record
    // to denormalize from and is not added to the history.
    let after = coordinator.view(created.id, "p@ss", &viewer).await.unwrap();
    assert!(matches!(after, ViewOutcome::Denied(Denial::Deleted)));

    let history = coordinator
        .activity(created.id, ActivityQuery::default())
        .await
        .unwrap();
    let steps: Vec<_> = history.iter().map(|e| (e.action, e.outcome)).collect();
    assert_eq!(
        steps,
        vec![
            (AccessAction::Create, AccessOutcome::Success),
            (AccessAction::View, AccessOutcome::Success),
            (AccessAction::View, AccessOutcome::Denied(Denial::AlreadyBurned)),
            (AccessAction::Purge, AccessOutcome::Success),
        ]
    );
    assert!(history.iter().all(|e| e.secret_name == "deploy key"));
    assert!(history.iter().all(|e| e.secret_owner.as_deref() == Some("alice")));
}
