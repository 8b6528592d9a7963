//! HTTP API tests, driving the router in process

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use chrono::{Days, Utc};
use milkbank_approval::{MockCaProvider, ProviderRegistry};
use milkbank_persistence::Database;
use milkbank_rpc::{create_router, AppConfig, AppContext};
use serde_json::{json, Value};
use tower::ServiceExt;

const ADMIN: (&str, &str) = ("admin-1", "admin");
const NURSE: (&str, &str) = ("nurse-1", "medical_staff");
const DESK: (&str, &str) = ("desk-1", "staff");

struct TestApp {
    router: Router,
    mock: Arc<MockCaProvider>,
}

impl TestApp {
    async fn new() -> Self {
        let db = Database::in_memory().await.unwrap();
        let mock = Arc::new(MockCaProvider::default());
        let ctx = AppContext::with_database(db, &AppConfig::default())
            .unwrap()
            .with_providers(ProviderRegistry::new().with(mock.clone()));
        Self {
            router: create_router(Arc::new(ctx)),
            mock,
        }
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        actor: Option<(&str, &str)>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some((id, role)) = actor {
            builder = builder.header("x-actor-id", id).header("x-actor-role", role);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create_donor(&self, name: &str) -> String {
        let (status, body) = self
            .call(
                "POST",
                "/donors",
                Some(DESK),
                Some(json!({"fullName": name, "phone": "0901234567"})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["data"]["id"].as_str().unwrap().to_string()
    }

    /// Pending → NeedsTests with a clear result
    async fn screen(&self, donor_id: &str) {
        for event in [
            json!({"event": "complete_screening", "outcome": "pass"}),
            json!({"event": "order_tests"}),
            json!({"event": "receive_test_result", "result": "clear", "reference": "LAB-1"}),
        ] {
            let (status, body) = self
                .call("POST", &format!("/donors/{donor_id}/events"), Some(NURSE), Some(event))
                .await;
            assert_eq!(status, StatusCode::OK, "{body}");
        }
    }
}

fn tomorrow() -> String {
    (Utc::now().date_naive() + Days::new(1)).to_string()
}

#[tokio::test]
async fn test_health_and_authentication() {
    let app = TestApp::new().await;

    let (status, body) = app.call("GET", "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = app.call("GET", "/donors", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "UNAUTHENTICATED");

    let (status, _) = app
        .call("GET", "/donors", Some(("x", "superuser")), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_donor_listing_shape() {
    let app = TestApp::new().await;
    app.create_donor("Nguyen Thi Lan").await;
    app.create_donor("Tran Thi Mai").await;

    let (status, body) = app
        .call(
            "GET",
            "/donors?status=&q=lan&page=1&per_page=10&sort_by=&order=",
            Some(DESK),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"][0]["full_name"], "Nguyen Thi Lan");
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["pagination"]["per_page"], 10);
    assert_eq!(body["pagination"]["total_pages"], 1);
}

#[tokio::test]
async fn test_reject_reason_forms() {
    let app = TestApp::new().await;

    let first = app.create_donor("Le Thi Hoa").await;
    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{first}/reject"),
            Some(NURSE),
            Some(json!({"reason": "recent tattoo"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "rejected");
    assert_eq!(body["data"]["rejection_reasons"], json!(["recent tattoo"]));

    let second = app.create_donor("Pham Thi Thu").await;
    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{second}/reject"),
            Some(NURSE),
            Some(json!({"reason": ["anaemia", "medication"]})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["rejection_reasons"].as_array().unwrap().len(), 2);

    let third = app.create_donor("Vo Thi Ngoc").await;
    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{third}/reject"),
            Some(NURSE),
            Some(json!({"reason": []})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "REJECTION_REQUIRES_REASON");

    // Front desk staff may not reject
    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{third}/reject"),
            Some(DESK),
            Some(json!({"reason": "no"})),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PERMISSION_DENIED");
}

#[tokio::test]
async fn test_malformed_body() {
    let app = TestApp::new().await;
    let (status, body) = app
        .call("POST", "/donors", Some(DESK), Some(json!({"phone": "0901"})))
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_approval_through_booking_and_donation() {
    let app = TestApp::new().await;
    let donor_id = app.create_donor("Do Thi Kim").await;
    app.screen(&donor_id).await;

    // Empty otp starts signing
    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{donor_id}/approve"),
            Some(NURSE),
            Some(json!({"caProvider": "mock-ca", "otp": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["approval"]["state"], "awaiting_challenge");
    let tx = body["data"]["approval"]["transaction_id"]
        .as_str()
        .unwrap()
        .to_string();

    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{donor_id}/approve"),
            Some(NURSE),
            Some(json!({
                "caProvider": "mock-ca",
                "otp": "000000x",
                "signatureData": {"transactionId": tx, "timestamp": 1760000000}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "WRONG_CODE");

    let (status, body) = app
        .call(
            "POST",
            &format!("/donors/{donor_id}/approve"),
            Some(NURSE),
            Some(json!({
                "caProvider": "mock-ca",
                "otp": app.mock.code_for(&tx),
                "signatureData": {"transactionId": tx}
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["approval"]["state"], "completed");
    assert_eq!(body["data"]["donor"]["status"], "approved");

    // A donation station and a booking for tomorrow morning
    let (status, body) = app
        .call(
            "POST",
            "/resources",
            Some(ADMIN),
            Some(json!({"id": "station-1", "name": "Station 1", "type": "donation"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, body) = app
        .call(
            "GET",
            &format!("/appointments/slots?from={}&type=donation&limit=3", tomorrow()),
            Some(DESK),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert_eq!(body["data"][0]["time"], "08:00");

    let booking = json!({
        "donorId": donor_id,
        "resourceId": "station-1",
        "date": tomorrow(),
        "time": "09:00",
        "type": "donation"
    });
    let (status, body) = app
        .call("POST", "/appointments", Some(DESK), Some(booking.clone()))
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let appointment_id = body["data"]["id"].as_str().unwrap().to_string();

    // Same slot again: another donor would collide on the slot, the same
    // donor on their open appointment
    let (status, body) = app
        .call("POST", "/appointments", Some(DESK), Some(booking))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["code"] == "SLOT_CONFLICT" || body["code"] == "DONOR_CONFLICT");

    let (status, body) = app
        .call(
            "POST",
            &format!("/appointments/{appointment_id}/check-in"),
            Some(DESK),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "arrived");

    let (status, body) = app
        .call(
            "POST",
            &format!("/appointments/{appointment_id}/donation"),
            Some(NURSE),
            Some(json!({"healthStatus": "good", "volume": 350, "containers": 2, "notes": ""})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["points_awarded"], 10);

    let (status, body) = app
        .call("GET", &format!("/appointments/{appointment_id}"), Some(DESK), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "completed");

    let (status, body) = app
        .call("GET", &format!("/donors/{donor_id}/points"), Some(DESK), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["balance"], 10);
    assert_eq!(body["data"]["entries"].as_array().unwrap().len(), 1);

    let (status, body) = app
        .call(
            "GET",
            &format!("/appointments?date={}&status=completed&type=donation", tomorrow()),
            Some(DESK),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["pagination"]["total"], 1);
}

#[tokio::test]
async fn test_mark_failed_and_unknown_ids() {
    let app = TestApp::new().await;
    let donor_id = app.create_donor("Bui Thi Yen").await;

    let (status, _) = app
        .call(
            "POST",
            "/resources",
            Some(ADMIN),
            Some(json!({"id": "room-1", "name": "Room 1", "type": "screening"})),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app
        .call(
            "POST",
            "/appointments",
            Some(DESK),
            Some(json!({
                "donorId": donor_id,
                "resourceId": "room-1",
                "date": tomorrow(),
                "time": "10:30",
                "type": "screening"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .call(
            "POST",
            &format!("/appointments/{id}/mark_failed"),
            Some(DESK),
            Some(json!({"reason": "other"})),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, body) = app
        .call(
            "POST",
            &format!("/appointments/{id}/mark_failed"),
            Some(DESK),
            Some(json!({"reason": "no_show", "notes": "did not answer phone"})),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "failed");
    assert_eq!(body["data"]["failure_reason"], "no_show");

    let (status, body) = app
        .call("GET", "/appointments/APT-missing", Some(DESK), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_provider_listing_requires_approval_read() {
    let app = TestApp::new().await;

    let (status, body) = app.call("GET", "/approval/providers", Some(NURSE), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"][0]["id"], "mock-ca");

    let (status, body) = app.call("GET", "/approval/providers", Some(DESK), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "PERMISSION_DENIED");
}
