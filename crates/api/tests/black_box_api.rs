use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use gloria_api::app::{build_app, services::AppServices};
use gloria_audit::{AuditQuery, AuditRecord};
use gloria_auth::IdentityClaims;
use gloria_core::{Page, PageRequest, UserId};
use gloria_infra::audit_store::{AuditStore, InMemoryAuditStore};
use gloria_infra::config::{AppConfig, DEV_JWT_SECRET};
use gloria_infra::store::StoreError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::StatusCode;
use serde_json::{Value, json};

struct TestServer {
    base_url: String,
    admin_id: UserId,
    services: Arc<AppServices>,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(tweak, Arc::new(InMemoryAuditStore::new())).await
    }

    /// Same router as prod on an ephemeral port, with a bootstrap admin
    /// whose id the tests know.
    async fn build(tweak: impl FnOnce(&mut AppConfig), audit: Arc<dyn AuditStore>) -> Self {
        let admin_id = UserId::new();
        let mut config = AppConfig::default();
        config.bootstrap.admin_email = Some("admin@gloria.test".into());
        config.bootstrap.admin_user_id = Some(admin_id);
        config.jobs.poll_interval_ms = 10;
        tweak(&mut config);

        let services = Arc::new(AppServices::with_audit_store(&config, audit).expect("failed to build services"));
        let app = build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{addr}"),
            admin_id,
            services,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.base_url, path)
    }

    async fn get(&self, token: &str, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).bearer_auth(token).send().await.unwrap()
    }

    async fn post(&self, token: &str, path: &str, body: Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    fn admin_token(&self) -> String {
        mint_jwt(self.admin_id)
    }

    /// Create an employee through the API and return their id.
    async fn create_user(&self, email: &str, number: &str) -> UserId {
        let res = self
            .post(
                &self.admin_token(),
                "/users",
                json!({ "email": email, "display_name": email, "employee_number": number }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        serde_json::from_value(body["id"].clone()).unwrap()
    }

    async fn role_id(&self, code: &str) -> String {
        let res = self.get(&self.admin_token(), "/roles").await;
        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = res.json().await.unwrap();
        body["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|r| r["code"] == code)
            .map(|r| r["id"].as_str().unwrap().to_string())
            .unwrap_or_else(|| panic!("role {code} not seeded"))
    }

    async fn assign(&self, user: UserId, code: &str) {
        let role_id = self.role_id(code).await;
        let res = self
            .post(&self.admin_token(), &format!("/users/{user}/roles"), json!({ "role_id": role_id }))
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Audit log that can be switched off to reject every append.
struct SwitchableAudit {
    inner: InMemoryAuditStore,
    offline: AtomicBool,
}

impl SwitchableAudit {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: InMemoryAuditStore::new(),
            offline: AtomicBool::new(false),
        })
    }

    fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    async fn total(&self) -> u64 {
        self.inner
            .query(&AuditQuery::default(), PageRequest::default())
            .await
            .unwrap()
            .total
    }
}

#[axum::async_trait]
impl AuditStore for SwitchableAudit {
    async fn append(&self, record: AuditRecord) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("audit log offline".into()));
        }
        self.inner.append(record).await
    }

    async fn query(&self, query: &AuditQuery, page: PageRequest) -> Result<Page<AuditRecord>, StoreError> {
        self.inner.query(query, page).await
    }

    async fn export_rows(&self, query: &AuditQuery, limit: usize) -> Result<Vec<AuditRecord>, StoreError> {
        self.inner.export_rows(query, limit).await
    }
}

fn new_user(email: &str, number: &str) -> Value {
    json!({ "email": email, "display_name": email, "employee_number": number })
}

fn mint_jwt(sub: UserId) -> String {
    let now = Utc::now();
    let claims = IdentityClaims {
        sub,
        email: None,
        iss: None,
        iat: now.timestamp(),
        exp: (now + ChronoDuration::minutes(10)).timestamp(),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(DEV_JWT_SECRET.as_bytes()),
    )
    .expect("failed to encode jwt")
}

#[tokio::test]
async fn health_is_public() {
    let server = TestServer::spawn().await;
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["circuit_breaker"]["state"], "closed");
}

#[tokio::test]
async fn requests_without_credentials_are_401() {
    let server = TestServer::spawn().await;

    let res = server.client.get(server.url("/me")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unauthorized");

    let res = server.get("not-a-jwt", "/me").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    // Valid signature but nobody in the directory.
    let res = server.get(&mint_jwt(UserId::new()), "/me").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_cookie_authenticates() {
    let server = TestServer::spawn().await;

    let res = server
        .client
        .get(server.url("/me"))
        .header("cookie", format!("theme=dark; gloria_session={}", server.admin_token()))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: Value = res.json().await.unwrap();
    assert_eq!(body["email"], "admin@gloria.test");
    assert!(body["roles"].as_array().unwrap().iter().any(|r| r["code"] == "system_admin"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let server = TestServer::spawn().await;
    let res = server
        .client
        .get(server.url("/me"))
        .bearer_auth(server.admin_token())
        .header("x-request-id", "req-42")
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-request-id"], "req-42");
}

#[tokio::test]
async fn create_user_validates_and_rejects_duplicates() {
    let server = TestServer::spawn().await;
    let token = server.admin_token();

    let res = server
        .post(
            &token,
            "/users",
            json!({ "email": "not-an-email", "display_name": "", "employee_number": "E-1" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert!(body["fields"]["email"].is_array());
    assert!(body["fields"]["display_name"].is_array());

    let res = server.post(&token, "/users", json!({ "email": 5 })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    server.create_user("ada@gloria.test", "E-1").await;
    let res = server
        .post(
            &token,
            "/users",
            json!({ "email": "ada@gloria.test", "display_name": "Ada", "employee_number": "E-2" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn employee_is_forbidden_outside_own_scope() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    server.assign(ada, "employee").await;
    let token = mint_jwt(ada);

    let res = server.get(&token, &format!("/users/{ada}")).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = server.get(&token, &format!("/users/{}", server.admin_id)).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "forbidden");
    assert_eq!(body["decision"]["granted"], false);

    // The list only shows what the caller may read.
    let res = server.get(&token, "/users").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["email"], "ada@gloria.test");

    let res = server
        .post(&token, "/users", json!({ "email": "x@gloria.test", "display_name": "X", "employee_number": "E-9" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn role_assignment_changes_effective_permissions() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    let token = mint_jwt(ada);

    let check = json!({ "resource": "users", "action": "read", "scope": "OWN" });
    let res = server.post(&token, "/permissions/check", check.clone()).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["decision"]["granted"], false);

    server.assign(ada, "team_lead").await;

    let res = server.post(&token, "/permissions/check", check).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["decision"]["granted"], true);

    let res = server.get(&token, "/me/permissions").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let effective = body["effective"].as_array().unwrap();
    assert!(!effective.is_empty());

    // Checking another user needs permissions:read.
    let res = server
        .post(
            &token,
            "/permissions/check",
            json!({ "user_id": server.admin_id, "resource": "audit", "action": "read" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    // A team lead cannot hand out roles.
    let role_id = server.role_id("hr_manager").await;
    let res = server
        .post(&token, &format!("/users/{ada}/roles"), json!({ "role_id": role_id }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn approval_runs_through_its_steps() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    server.assign(ada, "employee").await;
    let ada_token = mint_jwt(ada);
    let admin_token = server.admin_token();

    let res = server
        .post(
            &ada_token,
            "/approvals",
            json!({
                "kind": "leave",
                "title": "Annual leave",
                "approvers": [server.admin_id],
                "payload": { "days": 3 }
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "pending");
    let id = body["id"].as_str().unwrap().to_string();

    // Only the current approver may decide.
    let res = server.post(&ada_token, &format!("/approvals/{id}/approve"), json!({})).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = server
        .get(&admin_token, "/approvals?awaiting_me=true")
        .await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);

    let res = server
        .post(&admin_token, &format!("/approvals/{id}/approve"), json!({ "comment": "enjoy" }))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "approved");

    // Terminal: nothing else can happen to it.
    let res = server.post(&ada_token, &format!("/approvals/{id}/cancel"), json!({})).await;
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = server.get(&ada_token, &format!("/approvals/{id}")).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn approval_requires_active_approvers() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    server.assign(ada, "employee").await;

    let res = server
        .post(
            &mint_jwt(ada),
            "/approvals",
            json!({ "kind": "expense", "title": "Laptop", "approvers": [UserId::new()] }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = server
        .post(&mint_jwt(ada), "/approvals", json!({ "kind": "expense", "title": "Laptop", "approvers": [] }))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn mutations_are_audited_and_exportable() {
    let server = TestServer::spawn().await;
    let token = server.admin_token();
    let ada = server.create_user("ada@gloria.test", "E-1").await;

    let res = server.get(&token, "/audit-logs?action=user.created").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);
    assert_eq!(body["items"][0]["entity_id"], ada.to_string());
    assert_eq!(body["items"][0]["actor_id"], server.admin_id.to_string());

    let res = server.get(&token, "/audit-logs/export?format=csv").await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/csv"));
    assert_eq!(
        res.headers()["content-disposition"],
        "attachment; filename=audit_log.csv"
    );
    let csv = res.text().await.unwrap();
    assert!(csv.contains("user.created"));

    let res = server.get(&token, "/audit-logs/export?format=pdf").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // The export itself leaves a trail.
    let res = server.get(&token, "/audit-logs?action=audit.exported").await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 1);

    let res = server.get(&mint_jwt(ada), "/audit-logs").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn audited_changes_reach_the_inbox() {
    let server = TestServer::spawn().await;
    server.services.start_jobs(&Default::default()).unwrap();
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    let token = mint_jwt(ada);

    let mut inbox = Value::Null;
    for _ in 0..100 {
        let res = server.get(&token, "/notifications/inbox").await;
        assert_eq!(res.status(), StatusCode::OK);
        inbox = res.json().await.unwrap();
        if inbox["total"].as_u64().unwrap_or(0) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(inbox["items"][0]["topic"], "user.created");

    // The actor is never notified about their own change.
    let res = server.get(&server.admin_token(), "/notifications/inbox").await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["total"], 0);

    let services = server.services.clone();
    tokio::task::spawn_blocking(move || services.stop_jobs()).await.unwrap();
}

#[tokio::test]
async fn preferences_round_trip() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    let token = mint_jwt(ada);

    let res = server.get(&token, "/notifications/preferences").await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["in_app"], true);

    let res = server
        .client
        .put(server.url("/notifications/preferences"))
        .bearer_auth(&token)
        .json(&json!({ "email": false, "muted_topics": ["approval.*"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["email"], false);
    assert_eq!(body["in_app"], true);
    assert_eq!(body["muted_topics"], json!(["approval.*"]));
}

#[tokio::test]
async fn org_structure_is_managed_by_hr() {
    let server = TestServer::spawn().await;
    let token = server.admin_token();

    let res = server
        .post(&token, "/schools", json!({ "code": "NORTH", "name": "North campus" }))
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let school: Value = res.json().await.unwrap();
    let school_id = school["id"].as_str().unwrap();

    let res = server
        .post(
            &token,
            &format!("/schools/{school_id}/departments"),
            json!({ "code": "MATH", "name": "Mathematics" }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = server.get(&token, &format!("/schools/{school_id}/departments")).await;
    let body: Value = res.json().await.unwrap();
    assert_eq!(body.as_array().map(Vec::len), Some(1));

    let ada = server.create_user("ada@gloria.test", "E-1").await;
    server.assign(ada, "employee").await;
    let res = server
        .post(&mint_jwt(ada), "/schools", json!({ "code": "SOUTH", "name": "South campus" }))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rate_limit_sheds_excess_requests() {
    let server = TestServer::with_config(|cfg| {
        cfg.rate_limit.max_requests = 3;
        cfg.rate_limit.window_secs = 60;
    })
    .await;
    let token = server.admin_token();

    for _ in 0..3 {
        assert_eq!(server.get(&token, "/me").await.status(), StatusCode::OK);
    }
    let res = server.get(&token, "/me").await;
    assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(res.headers().contains_key("retry-after"));

    // Health is never limited.
    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn owner_only_grant_opens_only_the_own_record() {
    let server = TestServer::spawn().await;
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    let bob = server.create_user("bob@gloria.test", "E-2").await;
    let token = mint_jwt(ada);

    // No roles yet: not even the own record.
    assert_eq!(server.get(&token, &format!("/users/{ada}")).await.status(), StatusCode::FORBIDDEN);

    let res = server
        .post(
            &server.admin_token(),
            &format!("/users/{ada}/permissions"),
            json!({ "code": "users:read:SELF", "conditions": [{ "type": "owner_only" }] }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let res = server.get(&token, &format!("/users/{ada}")).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["email"], "ada@gloria.test");

    assert_eq!(server.get(&token, &format!("/users/{bob}")).await.status(), StatusCode::FORBIDDEN);

    let res = server.get(&token, "/users").await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let emails: Vec<&str> = body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|u| u["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, vec!["ada@gloria.test"]);
}

#[tokio::test]
async fn department_condition_limits_an_organization_grant() {
    let server = TestServer::spawn().await;
    let admin = server.admin_token();

    let res = server
        .post(&admin, "/schools", json!({ "code": "NORTH", "name": "North campus" }))
        .await;
    let school: Value = res.json().await.unwrap();
    let school_id = school["id"].as_str().unwrap().to_string();
    let mut departments = Vec::new();
    for code in ["MATH", "ARTS"] {
        let res = server
            .post(
                &admin,
                &format!("/schools/{school_id}/departments"),
                json!({ "code": code, "name": code }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let department: Value = res.json().await.unwrap();
        departments.push(department["id"].as_str().unwrap().to_string());
    }

    let mut staff = Vec::new();
    for (i, department) in departments.iter().enumerate() {
        let mut body = new_user(&format!("staff{i}@gloria.test"), &format!("S-{i}"));
        body["school_id"] = json!(school_id);
        body["department_id"] = json!(department);
        let res = server.post(&admin, "/users", body).await;
        assert_eq!(res.status(), StatusCode::CREATED);
        let user: Value = res.json().await.unwrap();
        staff.push(user["id"].as_str().unwrap().to_string());
    }

    let auditor = server.create_user("auditor@gloria.test", "E-3").await;
    let res = server
        .post(
            &admin,
            &format!("/users/{auditor}/permissions"),
            json!({
                "code": "users:read:ORGANIZATION",
                "conditions": [{ "type": "attribute_equals", "key": "department", "value": "MATH" }],
            }),
        )
        .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let token = mint_jwt(auditor);
    assert_eq!(server.get(&token, &format!("/users/{}", staff[0])).await.status(), StatusCode::OK);
    assert_eq!(
        server.get(&token, &format!("/users/{}", staff[1])).await.status(),
        StatusCode::FORBIDDEN
    );
}

#[tokio::test]
async fn unaudited_changes_are_rolled_back() {
    let audit = SwitchableAudit::new();
    let server = TestServer::build(|_| {}, audit.clone()).await;
    let admin = server.admin_token();
    let ada = server.create_user("ada@gloria.test", "E-1").await;
    let employee = server.role_id("employee").await;
    let recorded = audit.total().await;

    audit.set_offline(true);
    let res = server.post(&admin, "/users", new_user("ghost@gloria.test", "E-2")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(server.services.directory.user_by_email("ghost@gloria.test").unwrap().is_none());

    let res = server
        .post(&admin, &format!("/users/{ada}/roles"), json!({ "role_id": employee }))
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(server.services.directory.assignments_of(ada).unwrap().is_empty());

    let res = server
        .post(&admin, "/schools", json!({ "code": "NORTH", "name": "North campus" }))
        .await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(server.services.org.read(|chart| chart.schools()).unwrap().is_empty());
    assert_eq!(audit.total().await, recorded);

    audit.set_offline(false);
    let res = server.post(&admin, "/users", new_user("ghost@gloria.test", "E-2")).await;
    assert_eq!(res.status(), StatusCode::CREATED);
    assert_eq!(audit.total().await, recorded + 1);
}

#[tokio::test]
async fn open_circuit_fails_fast_without_running_handlers() {
    let audit = SwitchableAudit::new();
    let server = TestServer::build(
        |cfg| {
            cfg.circuit_breaker.failure_threshold = 1;
            cfg.circuit_breaker.recovery_timeout_secs = 60;
        },
        audit.clone(),
    )
    .await;
    let admin = server.admin_token();

    audit.set_offline(true);
    let res = server.post(&admin, "/users", new_user("first@gloria.test", "E-1")).await;
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    // The audit log is back, but the breaker has not cooled down.
    audit.set_offline(false);
    let res = server.post(&admin, "/users", new_user("second@gloria.test", "E-2")).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let retry_after: u64 = res.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry_after));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "circuit_open");
    assert!(server.services.directory.user_by_email("second@gloria.test").unwrap().is_none());

    let res = reqwest::get(format!("{}/health", server.base_url)).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["circuit_breaker"]["state"], "open");
}
