use chrono::Duration;

use super::*;
use crate::store::{InMemoryPlacementStore, StoreError};

fn engine() -> PlacementEngine {
    PlacementEngine::new(
        Arc::new(InMemoryPlacementStore::new()),
        TierTable::default(),
    )
}

fn request(side: &str, tier: &str) -> CreatePlacement {
    CreatePlacement {
        side: side.to_string(),
        tier: tier.to_string(),
        x: 0.3,
        y: 0.4,
        width_fraction: None,
        rotation_degrees: None,
        image: ImageRef {
            url: "https://img.example/logo.png".to_string(),
            storage_id: "logo".to_string(),
        },
    }
}

fn paid(id: &PlacementId, amount_cents: i64) -> PaymentConfirmation {
    PaymentConfirmation {
        placement_id: id.clone(),
        payer_email: Some("buyer@example.com".to_string()),
        amount_cents,
        currency: "USD".to_string(),
        transaction_ref: format!("cs_{amount_cents}"),
    }
}

#[test]
fn test_create_defaults_width_and_rotation() {
    let engine = engine();
    let created = engine.create(request("front", "small")).unwrap();
    let stored = engine.get(&created.placement_id).unwrap();

    assert_eq!(created.z_index, 1);
    assert_eq!(stored.status, PlacementStatus::Pending);
    assert!(!stored.live);
    assert!((stored.geometry.width_fraction - 0.06 * 0.8).abs() < 1e-12);
    assert!(stored.geometry.rotation_degrees.abs() < f64::EPSILON);
}

#[test]
fn test_create_normalizes_rotation() {
    let engine = engine();
    let mut req = request("back", "large");
    req.rotation_degrees = Some(-45.0);
    let created = engine.create(req).unwrap();
    let stored = engine.get(&created.placement_id).unwrap();
    assert!((stored.geometry.rotation_degrees - 315.0).abs() < 1e-9);
}

#[test]
fn test_create_rejects_bad_fields() {
    let engine = engine();
    let cases: Vec<(CreatePlacement, &str)> = vec![
        (request("sleeve", "small"), "side"),
        (request("front", "xl"), "tier"),
        (
            CreatePlacement {
                x: f64::NAN,
                ..request("front", "small")
            },
            "x",
        ),
        (
            CreatePlacement {
                width_fraction: Some(f64::INFINITY),
                ..request("front", "small")
            },
            "widthFraction",
        ),
        (
            CreatePlacement {
                image: ImageRef {
                    url: "ftp://img.example/a.png".to_string(),
                    storage_id: "a".to_string(),
                },
                ..request("front", "small")
            },
            "imageReference.url",
        ),
        (
            CreatePlacement {
                image: ImageRef {
                    url: "https://img.example/a.png".to_string(),
                    storage_id: "  ".to_string(),
                },
                ..request("front", "small")
            },
            "imageReference.storageId",
        ),
    ];

    for (req, expected) in cases {
        match engine.create(req) {
            Err(LifecycleError::Validation { field, .. }) => assert_eq!(field, expected),
            other => panic!("expected validation error on {expected}, got {other:?}"),
        }
    }
    assert_eq!(engine.max_z_index(Side::Front).unwrap(), 0);
}

#[test]
fn test_confirm_is_idempotent() {
    let engine = engine();
    let id = engine.create(request("front", "medium")).unwrap().placement_id;

    assert_eq!(
        engine.confirm(&paid(&id, 1000)).unwrap(),
        ConfirmOutcome::Applied
    );
    let first = engine.get(&id).unwrap();

    assert_eq!(
        engine.confirm(&paid(&id, 9999)).unwrap(),
        ConfirmOutcome::AlreadyPaid
    );
    let second = engine.get(&id).unwrap();

    assert_eq!(first, second);
    assert!(second.live);
    let settlement = second.settlement.unwrap();
    assert_eq!(settlement.amount_cents, 1000);
    assert_eq!(settlement.currency, "usd");
}

#[test]
fn test_confirm_unknown_is_discarded() {
    let engine = engine();
    let outcome = engine
        .confirm(&paid(&PlacementId::new("PLC-missing"), 500))
        .unwrap();
    assert_eq!(
        outcome,
        ConfirmOutcome::Discarded {
            reason: DiscardReason::UnknownPlacement
        }
    );
}

#[test]
fn test_confirm_after_cancel_never_goes_live() {
    let engine = engine();
    let id = engine.create(request("back", "small")).unwrap().placement_id;
    engine.cancel(&id, CancelReason::Requested).unwrap();

    let outcome = engine.confirm(&paid(&id, 500)).unwrap();

    assert_eq!(
        outcome,
        ConfirmOutcome::Discarded {
            reason: DiscardReason::Cancelled
        }
    );
    let stored = engine.get(&id).unwrap();
    assert_eq!(stored.status, PlacementStatus::Cancelled);
    assert!(!stored.live);
    assert!(stored.settlement.is_none());
}

#[test]
fn test_cancel_outcomes() {
    let engine = engine();
    let pending = engine.create(request("front", "small")).unwrap().placement_id;
    let settled = engine.create(request("front", "small")).unwrap().placement_id;
    engine.confirm(&paid(&settled, 500)).unwrap();

    assert_eq!(
        engine.cancel(&pending, CancelReason::Requested).unwrap(),
        CancelOutcome::Cancelled
    );
    assert_eq!(
        engine.cancel(&pending, CancelReason::Stale).unwrap(),
        CancelOutcome::AlreadyCancelled
    );
    assert_eq!(
        engine.get(&pending).unwrap().cancel_reason,
        Some(CancelReason::Requested)
    );
    assert!(matches!(
        engine.cancel(&settled, CancelReason::Requested),
        Err(LifecycleError::Conflict {
            state: PlacementStatus::Paid,
            ..
        })
    ));
    assert!(matches!(
        engine.cancel(&PlacementId::new("PLC-nope"), CancelReason::Requested),
        Err(LifecycleError::NotFound { .. })
    ));
}

#[test]
fn test_attach_checkout_only_on_pending() {
    let engine = engine();
    let id = engine.create(request("front", "small")).unwrap().placement_id;

    engine.attach_checkout(&id, "cs_test_1").unwrap();
    assert_eq!(
        engine.get(&id).unwrap().checkout_session_id.as_deref(),
        Some("cs_test_1")
    );

    engine.cancel(&id, CancelReason::Requested).unwrap();
    assert!(matches!(
        engine.attach_checkout(&id, "cs_test_2"),
        Err(LifecycleError::Conflict { .. })
    ));
    assert!(matches!(
        engine.attach_checkout(&PlacementId::new("PLC-nope"), "cs"),
        Err(LifecycleError::NotFound { .. })
    ));
    assert!(matches!(
        engine.attach_checkout(&id, " "),
        Err(LifecycleError::Validation { .. })
    ));
}

#[test]
fn test_cancel_stale_pending_respects_cutoff() {
    let engine = engine();
    let old = engine.create(request("front", "small")).unwrap().placement_id;
    let settled = engine.create(request("front", "small")).unwrap().placement_id;
    engine.confirm(&paid(&settled, 500)).unwrap();

    assert_eq!(
        engine
            .cancel_stale_pending(Utc::now() - Duration::hours(1))
            .unwrap(),
        0
    );
    assert_eq!(
        engine
            .cancel_stale_pending(Utc::now() + Duration::seconds(1))
            .unwrap(),
        1
    );

    let old = engine.get(&old).unwrap();
    assert_eq!(old.status, PlacementStatus::Cancelled);
    assert_eq!(old.cancel_reason, Some(CancelReason::Stale));
    assert_eq!(engine.get(&settled).unwrap().status, PlacementStatus::Paid);
}

#[test]
fn test_stale_sweep_measures_from_checkout_start() {
    let engine = engine();
    let id = engine.create(request("front", "small")).unwrap().placement_id;
    std::thread::sleep(std::time::Duration::from_millis(5));
    let cutoff = Utc::now();
    std::thread::sleep(std::time::Duration::from_millis(5));
    engine.attach_checkout(&id, "cs_late").unwrap();

    let stored = engine.get(&id).unwrap();
    assert!(stored.created_at < cutoff);
    assert!(stored.checkout_started_at.is_some_and(|t| t > cutoff));

    assert_eq!(engine.cancel_stale_pending(cutoff).unwrap(), 0);
    assert_eq!(engine.get(&id).unwrap().status, PlacementStatus::Pending);

    assert_eq!(
        engine
            .cancel_stale_pending(Utc::now() + Duration::seconds(1))
            .unwrap(),
        1
    );
}

#[test]
fn test_expire_checkout_ignores_superseded_session() {
    let engine = engine();
    let id = engine.create(request("back", "medium")).unwrap().placement_id;
    engine.attach_checkout(&id, "cs_first").unwrap();
    engine.attach_checkout(&id, "cs_second").unwrap();

    assert_eq!(
        engine.expire_checkout(&id, "cs_first").unwrap(),
        ExpireOutcome::Superseded
    );
    assert_eq!(engine.get(&id).unwrap().status, PlacementStatus::Pending);

    assert_eq!(
        engine.confirm(&paid(&id, 1500)).unwrap(),
        ConfirmOutcome::Applied
    );
    assert!(engine.get(&id).unwrap().live);
}

#[test]
fn test_expire_checkout_cancels_attached_or_unrecorded_session() {
    let engine = engine();
    let attached = engine.create(request("front", "small")).unwrap().placement_id;
    engine.attach_checkout(&attached, "cs_only").unwrap();
    assert_eq!(
        engine.expire_checkout(&attached, "cs_only").unwrap(),
        ExpireOutcome::Cancelled(CancelOutcome::Cancelled)
    );
    assert_eq!(
        engine.get(&attached).unwrap().cancel_reason,
        Some(CancelReason::CheckoutExpired)
    );
    assert_eq!(
        engine.expire_checkout(&attached, "cs_only").unwrap(),
        ExpireOutcome::Cancelled(CancelOutcome::AlreadyCancelled)
    );

    let unrecorded = engine.create(request("front", "small")).unwrap().placement_id;
    assert_eq!(
        engine.expire_checkout(&unrecorded, "cs_unknown").unwrap(),
        ExpireOutcome::Cancelled(CancelOutcome::Cancelled)
    );
    assert!(matches!(
        engine.expire_checkout(&PlacementId::new("PLC-nope"), "cs"),
        Err(LifecycleError::NotFound { .. })
    ));
}

#[test]
fn test_list_live_only_paid() {
    let engine = engine();
    let a = engine.create(request("back", "small")).unwrap().placement_id;
    let b = engine.create(request("back", "small")).unwrap().placement_id;
    let _front = engine.create(request("front", "small")).unwrap().placement_id;
    engine.confirm(&paid(&b, 500)).unwrap();
    engine.confirm(&paid(&a, 500)).unwrap();

    let live: Vec<_> = engine
        .list_live(Side::Back)
        .unwrap()
        .into_iter()
        .map(|p| p.id)
        .collect();
    assert_eq!(live, vec![a, b]);
    assert!(engine.list_live(Side::Front).unwrap().is_empty());
    assert_eq!(engine.next_z_index(Side::Back).unwrap(), 3);
}

#[test]
fn test_draft_converts_to_request() {
    let draft = PlacementDraft {
        side: Side::Back,
        tier: Tier::Large,
        geometry: LogoGeometry {
            x: 0.1,
            y: 0.2,
            width_fraction: 0.5,
            rotation_degrees: 12.0,
        },
        image: ImageRef {
            url: "https://img.example/d.png".to_string(),
            storage_id: "d".to_string(),
        },
    };
    let engine = engine();
    let created = engine.create(draft.into()).unwrap();
    let stored = engine.get(&created.placement_id).unwrap();
    assert_eq!(stored.side, Side::Back);
    assert_eq!(stored.tier, Tier::Large);
    assert!((stored.geometry.width_fraction - 0.13).abs() < 1e-12);
}

/// Store whose every call fails.
struct BrokenStore;

impl PlacementStore for BrokenStore {
    fn insert(&self, _new: NewPlacement) -> Result<Placement, StoreError> {
        Err(broken())
    }

    fn get(&self, _id: &PlacementId) -> Result<Option<Placement>, StoreError> {
        Err(broken())
    }

    fn update(&self, _id: &PlacementId, _patch: &PlacementPatch) -> Result<(), StoreError> {
        Err(broken())
    }

    fn compare_and_update(
        &self,
        _id: &PlacementId,
        _expected: PlacementStatus,
        _patch: &PlacementPatch,
    ) -> Result<bool, StoreError> {
        Err(broken())
    }

    fn query(&self, _filter: &PlacementQuery) -> Result<Vec<Placement>, StoreError> {
        Err(broken())
    }

    fn max_z(&self, _side: Side) -> Result<i64, StoreError> {
        Err(broken())
    }
}

fn broken() -> StoreError {
    StoreError::Backend {
        message: "disk on fire".to_string(),
    }
}

#[test]
fn test_store_failures_are_retryable() {
    let engine = PlacementEngine::new(Arc::new(BrokenStore), TierTable::default());

    let err = engine.create(request("front", "small")).unwrap_err();
    assert!(err.is_retryable());
    let err = engine
        .confirm(&paid(&PlacementId::new("PLC-1"), 1))
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(!LifecycleError::NotFound {
        placement_id: "x".to_string()
    }
    .is_retryable());
}
