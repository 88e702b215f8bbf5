//! Ticket allocator tests (sequential, racing and partial-failure paths)

use super::*;
use crate::application::cancel::cancel_channel;
use crate::application::test_support::Harness;
use crate::domain::{layout, DomainError, StorePath};
use crate::port::replicated_store::mocks::InMemoryStore;
use crate::port::ReplicatedStore;
use serde_json::Value;
use std::time::Duration;

#[tokio::test]
async fn test_sequential_takes_are_unique_and_dense() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;

    let mut numbers = Vec::new();
    for i in 0..10 {
        numbers.push(h.take_as(&format!("holder{i}"), &id).await);
    }

    assert_eq!(numbers, (1..=10).collect::<Vec<_>>());
    let location = h.services.registry.get_location(&id).await.unwrap();
    assert_eq!(location.current_number, 11);
    assert_eq!(location.queue.len(), 10);
}

#[tokio::test]
async fn test_second_take_by_same_holder_is_already_queued() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;

    assert_eq!(h.take_as("alice", &id).await, 1);
    let err = h.services.allocator.take_number(&id).await.unwrap_err();
    assert_eq!(
        err,
        AppError::AlreadyQueued {
            location_id: id.clone(),
            number: 1
        }
    );
}

#[tokio::test]
async fn test_take_again_after_relinquish_or_serve() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;

    assert_eq!(h.take_as("alice", &id).await, 1);
    assert_eq!(
        h.services.allocator.relinquish_number(&id).await.unwrap(),
        Some(1)
    );
    assert_eq!(h.services.allocator.take_number(&id).await.unwrap(), 2);

    h.act_as("manager");
    h.services.allocator.mark_served(&id, 2).await.unwrap();

    h.act_as("alice");
    assert_eq!(h.services.allocator.take_number(&id).await.unwrap(), 3);
}

#[tokio::test]
async fn test_take_requires_identity_and_location() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;

    h.session.leave();
    assert_eq!(
        h.services.allocator.take_number(&id).await,
        Err(AppError::NotAuthenticated)
    );

    h.act_as("alice");
    assert!(matches!(
        h.services.allocator.take_number("nowhere").await,
        Err(AppError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_relinquish_without_ticket_is_noop_twice() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");

    let puts_before = h.store.put_count();
    assert_eq!(h.services.allocator.relinquish_number(&id).await, Ok(None));
    assert_eq!(h.services.allocator.relinquish_number(&id).await, Ok(None));
    assert_eq!(h.store.put_count(), puts_before);
}

#[tokio::test]
async fn test_relinquish_tombstones_entry_then_reservation() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("alice", &id).await;

    h.services.allocator.relinquish_number(&id).await.unwrap();

    let alice = Identity::new("alice");
    assert_eq!(h.services.registry.entry(&id, 1).await.unwrap(), None);
    assert_eq!(
        h.services.registry.reservation(&alice, &id).await.unwrap(),
        None
    );
    // the counter never moves backwards
    assert_eq!(h.services.registry.current_number(&id).await.unwrap(), 2);
}

#[tokio::test]
async fn test_dangling_reservation_is_stale() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("alice", &id).await;

    // crash after tombstoning the entry, before clearing the index
    h.store
        .put(&layout::queue_entry(&id, 1), Value::Null)
        .await
        .unwrap();

    assert_eq!(h.services.allocator.take_number(&id).await.unwrap(), 2);
    assert_eq!(
        h.services
            .registry
            .reservation(&Identity::new("alice"), &id)
            .await
            .unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn test_entry_write_failure_clears_reservation() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");
    h.store
        .fail_puts_under(layout::location(&id).child("queue"), 1);

    let err = h.services.allocator.take_number(&id).await.unwrap_err();
    assert!(matches!(err, AppError::StoreWriteFailed(_)));
    assert_eq!(
        h.services
            .registry
            .reservation(&Identity::new("alice"), &id)
            .await
            .unwrap(),
        None
    );

    // nothing left behind, so the retry succeeds immediately with the same number
    assert_eq!(h.services.allocator.take_number(&id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_counter_write_failure_clears_entry_and_reservation() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");
    h.store
        .fail_puts_under(layout::location(&id).child("currentNumber"), 1);

    let err = h.services.allocator.take_number(&id).await.unwrap_err();
    assert!(matches!(err, AppError::StoreWriteFailed(_)));
    assert_eq!(h.services.registry.entry(&id, 1).await.unwrap(), None);
    assert_eq!(h.services.registry.current_number(&id).await.unwrap(), 1);

    assert_eq!(h.services.allocator.take_number(&id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_reservation_write_failure_writes_nothing_else() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");
    h.store.fail_puts_under(StorePath::root("~alice"), 1);

    assert!(matches!(
        h.services.allocator.take_number(&id).await,
        Err(AppError::StoreWriteFailed(_))
    ));
    let location = h.services.registry.get_location(&id).await.unwrap();
    assert!(location.queue.is_empty());
    assert_eq!(location.current_number, 1);
}

#[tokio::test]
async fn test_concurrent_takes_resolve_to_distinct_numbers() {
    let store = Arc::new(InMemoryStore::with_yield());
    let manager = Harness::on_store(store.clone());
    let id = manager.location_managed_by("manager", 0).await;
    // advance the counter so both racers read 7
    for i in 0..6 {
        manager.take_as(&format!("early{i}"), &id).await;
    }

    let alice = Harness::on_store(store.clone());
    alice.act_as("alice");
    let bob = Harness::on_store(store.clone());
    bob.act_as("bob");

    let (a, b) = tokio::join!(
        alice.services.allocator.take_number(&id),
        bob.services.allocator.take_number(&id)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    let mut got = vec![a, b];
    got.sort();
    assert_eq!(got, vec![7, 8]);

    let location = manager.services.registry.get_location(&id).await.unwrap();
    assert_eq!(location.entry(a).unwrap().holder, Identity::new("alice"));
    assert_eq!(location.entry(b).unwrap().holder, Identity::new("bob"));
    assert_eq!(location.current_number, 9);
}

#[tokio::test]
async fn test_take_from_stale_snapshot_does_not_overwrite_newer_entry() {
    let store = Arc::new(InMemoryStore::new());
    let alice = Harness::on_store(store.clone());
    let id = alice.location_managed_by("manager", 0).await;
    let bob = Harness::on_store(store.clone());
    bob.act_as("bob");

    // bob reads counter 1, then stalls before writing anything else
    let hold = store.hold_puts_under(layout::reservation(&Identity::new("bob"), &id), 1);
    let bob_take = bob.services.allocator.take_number(&id);
    let alice_take = async {
        hold.reached().await;
        let number = alice.take_as("alice", &id).await;
        hold.release();
        number
    };
    let (b, a) = tokio::join!(bob_take, alice_take);

    assert_eq!(a, 1);
    assert_eq!(b.unwrap(), 2);
    let location = alice.services.registry.get_location(&id).await.unwrap();
    assert_eq!(location.entry(1).unwrap().holder, Identity::new("alice"));
    assert_eq!(location.entry(2).unwrap().holder, Identity::new("bob"));
    assert_eq!(location.current_number, 3);
    assert_eq!(
        bob.services
            .registry
            .reservation(&Identity::new("bob"), &id)
            .await
            .unwrap(),
        Some(2)
    );
}

#[tokio::test]
async fn test_race_without_retry_budget_is_allocation_conflict() {
    let store = Arc::new(InMemoryStore::with_yield());
    let config = QueueConfig::default().with_max_allocation_attempts(1);
    let manager = Harness::on_store_with(store.clone(), config.clone());
    let id = manager.location_managed_by("manager", 0).await;

    let alice = Harness::on_store_with(store.clone(), config.clone());
    alice.act_as("alice");
    let bob = Harness::on_store_with(store.clone(), config);
    bob.act_as("bob");

    let (a, b) = tokio::join!(
        alice.services.allocator.take_number(&id),
        bob.services.allocator.take_number(&id)
    );

    let results = [a, b];
    let won: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(won, vec![&1]);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(AppError::AllocationConflict { attempts: 1, .. })
    )));
}

#[tokio::test]
async fn test_mark_served_is_manager_only() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("alice", &id).await;

    assert!(matches!(
        h.services.allocator.mark_served(&id, 1).await,
        Err(AppError::Unauthorized(_))
    ));
}

#[tokio::test]
async fn test_mark_served_advances_last_served_monotonically() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    for holder in ["a", "b", "c"] {
        h.take_as(holder, &id).await;
    }

    h.act_as("manager");
    h.services.allocator.mark_served(&id, 3).await.unwrap();
    h.services.allocator.mark_served(&id, 1).await.unwrap();

    let location = h.services.registry.get_location(&id).await.unwrap();
    assert_eq!(location.last_served_number, 3);
    assert!(location.entry(1).unwrap().served);
    assert!(!location.entry(2).unwrap().served);
}

#[tokio::test]
async fn test_slow_serve_cannot_move_last_served_back() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    for holder in ["a", "b", "c", "d", "e", "f"] {
        h.take_as(holder, &id).await;
    }
    h.act_as("manager");
    for number in 1..=4 {
        h.services.allocator.mark_served(&id, number).await.unwrap();
    }

    // serve 5 reads last served 4 and stalls before writing 5
    let hold = h.store.hold_puts_under(
        layout::location_field(&id, layout::field::LAST_SERVED_NUMBER),
        1,
    );
    let slow = h.services.allocator.mark_served(&id, 5);
    let fast = async {
        hold.reached().await;
        let outcome = h.services.allocator.mark_served(&id, 6).await;
        hold.release();
        outcome
    };
    let (slow, fast) = tokio::join!(slow, fast);
    slow.unwrap();
    fast.unwrap();

    let location = h.services.registry.get_location(&id).await.unwrap();
    assert_eq!(location.last_served_number, 6);
    assert!(location.entry(5).unwrap().served);
    assert!(location.entry(6).unwrap().served);
}

#[tokio::test]
async fn test_mark_served_twice_keeps_first_timestamp() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("alice", &id).await;

    h.act_as("manager");
    let first = h.services.allocator.mark_served(&id, 1).await.unwrap();
    h.clock.advance_minutes(5);
    let second = h.services.allocator.mark_served(&id, 1).await.unwrap();

    let ServeOutcome::Served { served_at } = first else {
        panic!("first serve should write");
    };
    assert_eq!(second, ServeOutcome::AlreadyServed);
    let entry = h.services.registry.entry(&id, 1).await.unwrap().unwrap();
    assert_eq!(entry.served_at, Some(served_at));
}

#[tokio::test]
async fn test_take_fails_when_numbers_are_exhausted() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.store
        .put(
            &layout::location_field(&id, layout::field::CURRENT_NUMBER),
            serde_json::json!(u64::MAX),
        )
        .await
        .unwrap();

    h.act_as("alice");
    assert!(matches!(
        h.services.allocator.take_number(&id).await,
        Err(AppError::Domain(DomainError::TicketSequenceExhausted(_)))
    ));
    let location = h.services.registry.get_location(&id).await.unwrap();
    assert!(location.queue.is_empty());
    assert_eq!(
        h.services
            .registry
            .reservation(&Identity::new("alice"), &id)
            .await
            .unwrap(),
        None
    );
}

#[tokio::test]
async fn test_mark_served_unknown_ticket() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;

    assert!(matches!(
        h.services.allocator.mark_served(&id, 4).await,
        Err(AppError::NotFound(_))
    ));
    assert!(matches!(
        h.services.allocator.mark_served(&id, 0).await,
        Err(AppError::Domain(_))
    ));
}

#[tokio::test]
async fn test_serve_notifies_next_waiting_holder_once() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    for holder in ["h1", "h2", "h3", "h4", "h5", "h6"] {
        h.take_as(holder, &id).await;
    }
    h.register_endpoint("h6", "https://push.example/h6").await;

    h.act_as("manager");
    h.services.allocator.mark_served(&id, 5).await.unwrap();

    let attempts = h.transport.attempts();
    assert_eq!(attempts.len(), 1);
    assert_eq!(attempts[0].0.as_str(), "https://push.example/h6");
}

#[tokio::test]
async fn test_serve_skips_notification_when_next_already_served() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    for holder in ["h1", "h2", "h3", "h4", "h5", "h6"] {
        h.take_as(holder, &id).await;
    }
    h.register_endpoint("h6", "https://push.example/h6").await;

    h.act_as("manager");
    h.services.allocator.mark_served(&id, 6).await.unwrap();
    let after_six = h.transport.attempt_count();
    h.services.allocator.mark_served(&id, 5).await.unwrap();

    assert_eq!(after_six, 0);
    assert_eq!(h.transport.attempt_count(), 0);
}

#[tokio::test]
async fn test_serve_survives_failing_transport() {
    use crate::port::notification::mocks::RecordingTransport;
    use crate::port::DeliveryError;

    let transport = Arc::new(RecordingTransport::failing(DeliveryError::Unavailable(
        "relay down".to_string(),
    )));
    let h = Harness::with_transport(transport.clone());
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("a", &id).await;
    h.take_as("b", &id).await;
    h.register_endpoint("b", "ep").await;

    h.act_as("manager");
    let outcome = h.services.allocator.mark_served(&id, 1).await.unwrap();
    assert!(matches!(outcome, ServeOutcome::Served { .. }));
    assert_eq!(transport.attempt_count(), 1);
    assert!(h.services.registry.entry(&id, 1).await.unwrap().unwrap().served);
}

#[tokio::test]
async fn test_last_served_failure_rolls_back_served_flag() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.take_as("alice", &id).await;

    h.act_as("manager");
    h.store
        .fail_puts_under(layout::location(&id).child("lastServedNumber"), 1);
    assert!(matches!(
        h.services.allocator.mark_served(&id, 1).await,
        Err(AppError::StoreWriteFailed(_))
    ));

    let entry = h.services.registry.entry(&id, 1).await.unwrap().unwrap();
    assert!(!entry.served);
    assert_eq!(entry.served_at, None);
}

#[tokio::test]
async fn test_cancelled_take_reports_indeterminate_and_completes() {
    let store = Arc::new(InMemoryStore::with_yield());
    let h = Harness::on_store(store);
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");

    let (sender, token) = cancel_channel();
    sender.cancel();
    let result = h
        .services
        .allocator
        .take_number_until(&id, token)
        .await;
    assert!(matches!(result, Err(AppError::Indeterminate(_))));

    // the detached saga still runs to completion
    let alice = Identity::new("alice");
    let mut reserved = None;
    for _ in 0..100 {
        reserved = h.services.registry.reservation(&alice, &id).await.unwrap();
        if reserved.is_some()
            && h.services.registry.current_number(&id).await.unwrap() == 2
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(reserved, Some(1));
}

#[tokio::test]
async fn test_uncancelled_take_until_returns_number() {
    let h = Harness::new();
    let id = h.location_managed_by("manager", 0).await;
    h.act_as("alice");

    let number = h
        .services
        .allocator
        .take_number_until(&id, CancelToken::never())
        .await
        .unwrap();
    assert_eq!(number, 1);
    assert_eq!(
        h.services
            .allocator
            .relinquish_number_until(&id, CancelToken::never())
            .await
            .unwrap(),
        Some(1)
    );
}
