mod support;

use cloud_reconciler::schema::ResourceType;
use cloud_reconciler::{
    execute, ApiError, Context, DesiredSpec, ErrorCategory, ManagedRecord, Operator, Outcome,
    Phase, Registry, Request, Status,
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use support::{FakeApi, Op};

fn operator(api: &Arc<FakeApi>) -> Operator<Arc<FakeApi>> {
    Operator::new(api.clone(), Registry::default())
}

fn ctx() -> Context {
    Context::detached(Duration::from_secs(60))
}

fn spec(value: Value) -> DesiredSpec {
    serde_json::from_value(value).unwrap()
}

fn route_spec(backend: &str) -> DesiredSpec {
    spec(json!({
        "frontend_id": "fr-par-1/aaaaaaaa-0000-0000-0000-000000000001",
        "backend_id": backend,
        "match_sni": "sni.scaleway.com",
    }))
}

#[tokio::test]
async fn test_lifecycle() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    assert_eq!(record.phase(), Phase::Unmanaged);

    let outcome = operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Created);
    assert_eq!(record.phase(), Phase::Managed);
    let id = record.identity.clone().unwrap();

    let outcome = operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(api.calls().update, 0);

    let outcome = operator
        .apply(&mut record, &route_spec("fr-par-1/b2"), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Updated);
    assert_eq!(record.identity.as_ref(), Some(&id));
    assert_eq!(
        record.state.as_ref().unwrap().get("backend_id"),
        Some(&json!("fr-par-1/b2"))
    );

    let outcome = operator.destroy(&mut record, &ctx()).await.unwrap();
    assert_eq!(outcome, Outcome::Deleted);
    assert_eq!(record.phase(), Phase::Unmanaged);
    assert!(record.state.is_none());
    assert_eq!(api.count(), 0);
}

#[tokio::test]
async fn test_out_of_band_deletion_recreates() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    let first = record.identity.clone().unwrap();

    api.remove(&first);
    assert_eq!(
        operator.refresh(&mut record.clone(), &ctx()).await.unwrap(),
        Outcome::Gone
    );

    let outcome = operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Recreated);
    assert_ne!(record.identity.as_ref(), Some(&first));
    assert_eq!(api.count(), 1);
}

#[tokio::test]
async fn test_refresh_detects_drift() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    let id = record.identity.clone().unwrap();

    api.drift(&id, "match_sni", json!("other.example.com"));
    assert_eq!(
        operator.refresh(&mut record, &ctx()).await.unwrap(),
        Outcome::Refreshed
    );
    assert_eq!(
        record.state.as_ref().unwrap().get("match_sni"),
        Some(&json!("other.example.com"))
    );

    let outcome = operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Updated);
    assert_eq!(api.updates()[0].keys().collect::<Vec<_>>(), vec!["match_sni"]);
}

#[tokio::test]
async fn test_failed_create_stays_unmanaged() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    api.fail_next(
        Op::Create,
        ApiError::Conflict {
            reason: "frontend is locked".into(),
        },
    );

    let err = operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::Conflict);
    assert_eq!(record.phase(), Phase::Unmanaged);
}

#[tokio::test(start_paused = true)]
async fn test_unconfirmed_create_is_recorded() {
    let api = FakeApi::new();
    api.settle_after(10);
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::Lb);
    let lb = spec(json!({"name": "lb", "type": "LB-S"}));

    let err = operator
        .apply(&mut record, &lb, &Context::detached(Duration::from_secs(30)))
        .await
        .unwrap_err();
    assert_eq!(err.category(), ErrorCategory::Timeout);
    assert_eq!(record.phase(), Phase::Managed);
    assert!(record.state.is_none());

    // the next run waits for it instead of creating a second one
    let outcome = operator
        .apply(&mut record, &lb, &Context::detached(Duration::from_secs(600)))
        .await
        .unwrap();
    assert_eq!(outcome, Outcome::Unchanged);
    assert_eq!(record.state.as_ref().unwrap().status, Status::Ready);
    assert_eq!(api.calls().create, 1);
}

#[tokio::test]
async fn test_failed_update_keeps_last_known_state() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();
    let before = record.clone();

    api.fail_next(Op::Update, ApiError::RateLimited);
    let err = operator
        .apply(&mut record, &route_spec("fr-par-1/b2"), &ctx())
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(record.identity, before.identity);
    assert_eq!(
        record.state.as_ref().unwrap().get("backend_id"),
        Some(&json!("fr-par-1/b1"))
    );
}

#[tokio::test]
async fn test_failed_delete_keeps_identity() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();

    api.fail_next(Op::Delete, ApiError::RateLimited);
    operator.destroy(&mut record, &ctx()).await.unwrap_err();

    assert_eq!(record.phase(), Phase::Managed);
}

#[tokio::test]
async fn test_execute_requests() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let id = api.insert(
        "11111111-2222-3333-4444-555555555555",
        &[("name", json!("laptop")), ("public_key", json!("k"))],
    );

    let request: Request = serde_json::from_value(json!({
        "action": "import",
        "kind": "account_ssh_key",
        "id": id.as_str(),
    }))
    .unwrap();
    let response = execute(&operator, request, &ctx()).await;
    assert_eq!(response.outcome, Some(Outcome::Imported));
    let record = response.record.unwrap();

    let request: Request = serde_json::from_value(json!({
        "action": "apply",
        "record": record,
        "spec": {"name": "desktop", "public_key": "k\n"},
    }))
    .unwrap();
    let response = execute(&operator, request, &ctx()).await;
    assert_eq!(response.outcome, Some(Outcome::Updated));
    assert!(response.error.is_none());

    let request: Request = serde_json::from_value(json!({
        "action": "import",
        "kind": "account_ssh_key",
        "id": "11111111-2222-3333-4444-000000000000",
    }))
    .unwrap();
    let response = execute(&operator, request, &ctx()).await;
    assert!(response.record.is_none());
    assert!(!response.retryable);
    assert!(response
        .error
        .unwrap()
        .contains("cannot import nonexistent resource"));
}

#[tokio::test]
async fn test_vanished_during_update_is_forgotten() {
    let api = FakeApi::new();
    let operator = operator(&api);
    let mut record = ManagedRecord::unmanaged(ResourceType::LbRoute);
    operator
        .apply(&mut record, &route_spec("fr-par-1/b1"), &ctx())
        .await
        .unwrap();

    api.fail_next(Op::Update, ApiError::NotFound);
    let err = operator
        .apply(&mut record, &route_spec("fr-par-1/b2"), &ctx())
        .await
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::NotFound);
    assert_eq!(record.phase(), Phase::Unmanaged);
    assert!(record.state.is_none());
}
