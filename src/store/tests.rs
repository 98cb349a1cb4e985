use std::path::PathBuf;

use ulid::Ulid;

use super::*;

const H: Ms = 3_600_000;
const DAY0: Ms = 1_741_600_800_000; // 2025-03-10T10:00:00Z

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("labdesk_test_store");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn item(stock: i64) -> Item {
    Item {
        id: Ulid::new(),
        details: ItemDetails {
            name: "Rigol DP832 power supply".into(),
            code: Some("EQ-PSU-02".into()),
            category: Some("supply".into()),
            spec_summary: "3 channels, 30V/3A".into(),
            reference_url: None,
        },
        stock,
        initial_stock: stock,
        created_at: DAY0,
    }
}

fn resource() -> ReservableResource {
    ReservableResource {
        id: Ulid::new(),
        details: ResourceDetails {
            name: "Instrumentation room 1".into(),
            code: Some("R-ROOM-1".into()),
            location: None,
            category: None,
            description: None,
            requires_approval: true,
        },
        created_at: DAY0,
    }
}

fn reservation(resource_id: Ulid, start: Ms, end: Ms, status: ReservationStatus) -> Reservation {
    Reservation {
        id: Ulid::new(),
        resource_id,
        requester: Ulid::new(),
        span: Span::new(start, end),
        status,
        decided_by: None,
        decided_at: None,
        created_at: DAY0,
    }
}

fn mv(item_id: Ulid, delta: i64) -> StockMove {
    StockMove {
        id: Ulid::new(),
        item_id,
        request_id: None,
        delta,
        actor: Ulid::new(),
        at: DAY0,
    }
}

fn loan(lines: Vec<LoanLine>) -> LoanRequest {
    LoanRequest {
        id: Ulid::new(),
        requester: Ulid::new(),
        purpose: "Metrology practice".into(),
        status: LoanStatus::Pending,
        decided_by: None,
        decided_at: None,
        created_at: DAY0,
        lines,
    }
}

fn decision<S>(to: S) -> Decision<S> {
    Decision { to, decided_by: Some(Ulid::new()), decided_at: DAY0 + H }
}

#[tokio::test]
async fn stock_move_adjusts_stock_and_ledger() {
    let store = DurableStore::open(&test_wal_path("stock_move.wal")).unwrap();
    let it = item(3);
    store.insert_item(it.clone()).await.unwrap();

    assert_eq!(store.apply_stock_move(mv(it.id, -2)).await.unwrap(), 1);
    assert_eq!(store.apply_stock_move(mv(it.id, 2)).await.unwrap(), 3);

    let moves = store.stock_moves_for_item(it.id).await.unwrap();
    assert_eq!(moves.iter().map(|m| m.delta).collect::<Vec<_>>(), vec![-2, 2]);
}

#[tokio::test]
async fn stock_move_refuses_to_go_negative() {
    let store = DurableStore::open(&test_wal_path("stock_negative.wal")).unwrap();
    let it = item(3);
    store.insert_item(it.clone()).await.unwrap();

    let err = store.apply_stock_move(mv(it.id, -5)).await.unwrap_err();
    assert_eq!(
        err,
        StoreError::InsufficientStock { item_id: it.id, available: 3, requested: 5 }
    );
    assert_eq!(store.item(it.id).await.unwrap().unwrap().stock, 3);
    assert!(store.stock_moves_for_item(it.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn stock_move_unknown_item() {
    let store = DurableStore::open(&test_wal_path("stock_unknown.wal")).unwrap();
    let id = Ulid::new();
    assert_eq!(store.apply_stock_move(mv(id, 1)).await, Err(StoreError::NotFound(id)));
}

#[tokio::test]
async fn concurrent_decrements_never_oversell() {
    let store = std::sync::Arc::new(DurableStore::open(&test_wal_path("oversell.wal")).unwrap());
    let it = item(5);
    store.insert_item(it.clone()).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..20 {
        let store = store.clone();
        handles.push(tokio::spawn(async move { store.apply_stock_move(mv(it.id, -1)).await }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 5);
    assert_eq!(store.item(it.id).await.unwrap().unwrap().stock, 0);
}

#[tokio::test]
async fn exclusion_guard_rejects_overlapping_active() {
    let store = DurableStore::open(&test_wal_path("exclusion.wal")).unwrap();
    let res = resource();
    store.insert_resource(res.clone()).await.unwrap();

    let first = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Approved);
    store.insert_reservation(first.clone()).await.unwrap();

    let clash = reservation(res.id, DAY0 + H / 2, DAY0 + 2 * H, ReservationStatus::Pending);
    assert_eq!(
        store.insert_reservation(clash).await,
        Err(StoreError::ExclusionViolation { with: first.id })
    );

    // Touching intervals are fine.
    let next = reservation(res.id, DAY0 + H, DAY0 + 2 * H, ReservationStatus::Pending);
    store.insert_reservation(next).await.unwrap();
}

#[tokio::test]
async fn closed_reservations_release_their_interval() {
    let store = DurableStore::open(&test_wal_path("release.wal")).unwrap();
    let res = resource();
    store.insert_resource(res.clone()).await.unwrap();
    let first = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Pending);
    store.insert_reservation(first.clone()).await.unwrap();

    store
        .transition_reservation(
            first.id,
            &[ReservationStatus::Pending, ReservationStatus::Approved],
            decision(ReservationStatus::Cancelled),
        )
        .await
        .unwrap();

    let hits = store.active_overlapping(res.id, Span::new(DAY0, DAY0 + H), None).await.unwrap();
    assert!(hits.is_empty());
    let again = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Pending);
    store.insert_reservation(again).await.unwrap();
}

#[tokio::test]
async fn reservation_transition_is_compare_and_set() {
    let store = DurableStore::open(&test_wal_path("res_cas.wal")).unwrap();
    let res = resource();
    store.insert_resource(res.clone()).await.unwrap();
    let r = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Pending);
    store.insert_reservation(r.clone()).await.unwrap();

    let approved = store
        .transition_reservation(r.id, &[ReservationStatus::Pending], decision(ReservationStatus::Approved))
        .await
        .unwrap();
    assert_eq!(approved.status, ReservationStatus::Approved);
    assert!(approved.decided_by.is_some());

    let err = store
        .transition_reservation(r.id, &[ReservationStatus::Pending], decision(ReservationStatus::Rejected))
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::StatusMismatch { id: r.id, current: "approved" });
}

#[tokio::test]
async fn loan_lines_written_once() {
    let store = DurableStore::open(&test_wal_path("loan_lines.wal")).unwrap();
    let it = item(2);
    store.insert_item(it.clone()).await.unwrap();
    let header = loan(vec![LoanLine { item_id: it.id, quantity: 9 }]);
    store.insert_loan_request(header.clone()).await.unwrap();

    // Header insert ignores lines.
    assert!(store.loan_request(header.id).await.unwrap().unwrap().lines.is_empty());

    let lines = vec![LoanLine { item_id: it.id, quantity: 1 }];
    store.insert_loan_lines(header.id, lines.clone()).await.unwrap();
    assert_eq!(
        store.insert_loan_lines(header.id, lines.clone()).await,
        Err(StoreError::AlreadyExists(header.id))
    );
    assert_eq!(store.loan_request(header.id).await.unwrap().unwrap().lines, lines);
}

#[tokio::test]
async fn loan_lines_must_reference_items() {
    let store = DurableStore::open(&test_wal_path("loan_lines_fk.wal")).unwrap();
    let header = loan(Vec::new());
    store.insert_loan_request(header.clone()).await.unwrap();
    let missing = Ulid::new();
    assert_eq!(
        store
            .insert_loan_lines(header.id, vec![LoanLine { item_id: missing, quantity: 1 }])
            .await,
        Err(StoreError::NotFound(missing))
    );
}

#[tokio::test]
async fn loan_transition_is_compare_and_set() {
    let store = DurableStore::open(&test_wal_path("loan_cas.wal")).unwrap();
    let header = loan(Vec::new());
    store.insert_loan_request(header.clone()).await.unwrap();

    store
        .transition_loan(header.id, LoanStatus::Pending, decision(LoanStatus::Rejected))
        .await
        .unwrap();
    assert_eq!(
        store
            .transition_loan(header.id, LoanStatus::Pending, decision(LoanStatus::Approved))
            .await,
        Err(StoreError::StatusMismatch { id: header.id, current: "rejected" })
    );
    let pending = store.loan_requests_with_status(LoanStatus::Pending).await.unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let it = item(4);
    let res = resource();
    let r = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Pending);
    let header = loan(Vec::new());
    {
        let store = DurableStore::open(&path).unwrap();
        store.insert_item(it.clone()).await.unwrap();
        store.apply_stock_move(mv(it.id, -3)).await.unwrap();
        store.insert_resource(res.clone()).await.unwrap();
        store.insert_reservation(r.clone()).await.unwrap();
        store
            .transition_reservation(r.id, &[ReservationStatus::Pending], decision(ReservationStatus::Approved))
            .await
            .unwrap();
        store.insert_loan_request(header.clone()).await.unwrap();
        store
            .insert_loan_lines(header.id, vec![LoanLine { item_id: it.id, quantity: 1 }])
            .await
            .unwrap();
    }

    let store = DurableStore::open(&path).unwrap();
    assert_eq!(store.item(it.id).await.unwrap().unwrap().stock, 1);
    assert_eq!(store.stock_moves_for_item(it.id).await.unwrap().len(), 1);
    assert_eq!(
        store.reservation(r.id).await.unwrap().unwrap().status,
        ReservationStatus::Approved
    );
    assert_eq!(store.loan_request(header.id).await.unwrap().unwrap().lines.len(), 1);
    let stats = store.stats().await;
    assert_eq!((stats.items, stats.resources, stats.reservations, stats.loan_requests), (1, 1, 1, 1));
}

#[tokio::test]
async fn compaction_preserves_state_and_ledger() {
    let path = test_wal_path("compact.wal");
    let it = item(10);
    let res = resource();
    let r = reservation(res.id, DAY0, DAY0 + H, ReservationStatus::Pending);
    {
        let store = DurableStore::open(&path).unwrap();
        store.insert_item(it.clone()).await.unwrap();
        for _ in 0..5 {
            store.apply_stock_move(mv(it.id, -1)).await.unwrap();
            store.update_item(it.id, it.details.clone()).await.unwrap();
        }
        store.insert_resource(res.clone()).await.unwrap();
        store.insert_reservation(r.clone()).await.unwrap();
        store
            .transition_reservation(r.id, &[ReservationStatus::Pending], decision(ReservationStatus::Rejected))
            .await
            .unwrap();

        assert!(store.wal_appends_since_compact().await > 0);
        let written = store.compact().await.unwrap();
        // item + 5 moves + resource + reservation
        assert_eq!(written, 8);
        assert_eq!(store.wal_appends_since_compact().await, 0);
    }

    let store = DurableStore::open(&path).unwrap();
    let reloaded = store.item(it.id).await.unwrap().unwrap();
    assert_eq!(reloaded.stock, 5);
    assert_eq!(reloaded.initial_stock, 10);
    assert_eq!(store.stock_moves_for_item(it.id).await.unwrap().len(), 5);
    assert_eq!(
        store.reservation(r.id).await.unwrap().unwrap().status,
        ReservationStatus::Rejected
    );
}

#[tokio::test]
async fn duplicate_ids_rejected() {
    let store = DurableStore::open(&test_wal_path("dups.wal")).unwrap();
    let it = item(1);
    store.insert_item(it.clone()).await.unwrap();
    assert_eq!(store.insert_item(it.clone()).await, Err(StoreError::AlreadyExists(it.id)));
    let res = resource();
    store.insert_resource(res.clone()).await.unwrap();
    assert_eq!(store.insert_resource(res.clone()).await, Err(StoreError::AlreadyExists(res.id)));
}
