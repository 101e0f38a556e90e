use std::sync::Arc;

use adwarden_auth::{AccessClaims, AccessConfig, AccessStore, ModuleRegistry, SqliteAccessStore};
use adwarden_web::resources::NewResource;
use adwarden_web::{AppState, ResourceKind, ResourceStore, SqliteResourceStore, build_router};
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use jsonwebtoken::{EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

const SECRET: &str = "integration-secret";

struct TestApp {
    router: Router,
    access: Arc<SqliteAccessStore>,
    resources: Arc<SqliteResourceStore>,
}

impl TestApp {
    async fn new() -> Self {
        let access = Arc::new(SqliteAccessStore::open_in_memory().unwrap());
        access.migrate().await.unwrap();
        access
            .seed_defaults(&ModuleRegistry::builtin().unwrap())
            .await
            .unwrap();
        let resources = Arc::new(SqliteResourceStore::open_in_memory().unwrap());
        resources.migrate().await.unwrap();
        let state = AppState::new(
            access.clone(),
            resources.clone(),
            &AccessConfig::default(),
            SECRET,
        )
        .unwrap();
        Self {
            router: build_router(Arc::new(state), 1024 * 1024),
            access,
            resources,
        }
    }

    /// Create a user with the named role and return `(user_id, token)`.
    async fn login(&self, username: &str, role: &str) -> (String, String) {
        let role = self.access.get_role_by_name(role).await.unwrap();
        let user = self
            .access
            .create_user(username, None, &role.id)
            .await
            .unwrap();
        let now = chrono::Utc::now().timestamp() as usize;
        let claims = AccessClaims {
            sub: user.id.clone(),
            role_id: role.id,
            exp: now + 600,
            iat: now,
        };
        let token = encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap();
        (user.id, token)
    }

    async fn call(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            builder = builder.header("Authorization", format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.router.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn permission_id(&self, name: &str) -> String {
        self.access
            .list_permissions()
            .await
            .unwrap()
            .into_iter()
            .find(|p| p.name == name)
            .unwrap()
            .id
    }
}

#[tokio::test]
async fn health_is_open() {
    let app = TestApp::new().await;
    let resp = app
        .router
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_token_is_please_log_in() {
    let app = TestApp::new().await;
    let (status, body) = app.call("GET", "/api/reports", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "please log in");
}

#[tokio::test]
async fn editors_do_not_see_each_others_reports() {
    let app = TestApp::new().await;
    let (u1, t1) = app.login("u1", "Editor").await;
    let (_, t2) = app.login("u2", "Editor").await;
    let (_, root) = app.login("root", "SuperAdmin").await;

    let (status, x) = app
        .call("POST", "/api/reports", Some(&t1), Some(json!({ "name": "Report X" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(x["owner_id"], u1.as_str());
    let x_id = x["id"].as_str().unwrap().to_string();

    // U2 passes reports.read but the row is filtered out.
    let (status, list) = app.call("GET", "/api/reports", Some(&t2), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().unwrap().len(), 0);

    // Direct access looks exactly like a missing row.
    let (status, body) = app
        .call("GET", &format!("/api/reports/{x_id}"), Some(&t2), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "not found" }));
    let (status, missing) = app
        .call("GET", "/api/reports/does-not-exist", Some(&t2), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, missing);

    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/reports/{x_id}"),
            Some(&t2),
            Some(json!({ "name": "mine now" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // SuperAdmin sees it with no predicate.
    let (status, list) = app.call("GET", "/api/reports", Some(&root), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(
        list.as_array()
            .unwrap()
            .iter()
            .any(|r| r["id"] == x_id.as_str())
    );
}

#[tokio::test]
async fn owner_can_update_and_delete() {
    let app = TestApp::new().await;
    let (_, t1) = app.login("u1", "Editor").await;
    let (_, c) = app
        .call("POST", "/api/campaigns", Some(&t1), Some(json!({ "name": "Spring" })))
        .await;
    let id = c["id"].as_str().unwrap();

    let (status, updated) = app
        .call(
            "PUT",
            &format!("/api/campaigns/{id}"),
            Some(&t1),
            Some(json!({ "status": "paused" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["status"], "paused");

    // Editors hold no delete grant.
    let (status, body) = app
        .call("DELETE", &format!("/api/campaigns/{id}"), Some(&t1), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["action"], "delete");

    let (_, admin) = app.login("admin", "Admin").await;
    let (status, _) = app
        .call("DELETE", &format!("/api/campaigns/{id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn denial_names_module_action_and_role() {
    let app = TestApp::new().await;
    let (_, viewer) = app.login("v", "Viewer").await;
    let (status, body) = app
        .call("POST", "/api/campaigns", Some(&viewer), Some(json!({ "name": "c" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["module"], "campaigns");
    assert_eq!(body["action"], "create");
    assert_eq!(body["role"], "Viewer");
}

#[tokio::test]
async fn non_privileged_cannot_assign_owner() {
    let app = TestApp::new().await;
    let (u1, t1) = app.login("u1", "Editor").await;
    let (u2, _) = app.login("u2", "Editor").await;
    let (_, admin) = app.login("admin", "Admin").await;

    let (_, card) = app
        .call(
            "POST",
            "/api/cards",
            Some(&t1),
            Some(json!({ "name": "c", "owner_id": u2 })),
        )
        .await;
    assert_eq!(card["owner_id"], u1.as_str());

    let (_, card) = app
        .call(
            "POST",
            "/api/cards",
            Some(&admin),
            Some(json!({ "name": "c", "owner_id": u2 })),
        )
        .await;
    assert_eq!(card["owner_id"], u2.as_str());
}

#[tokio::test]
async fn advertiser_cards_grant_round_trip() {
    let app = TestApp::new().await;
    let (_, root) = app.login("root", "SuperAdmin").await;
    let (_, adv) = app.login("adv", "Advertiser").await;
    let role = app.access.get_role_by_name("Advertiser").await.unwrap();
    let cards_read = app.permission_id("cards_read").await;
    let grants = format!("/api/admin/roles/{}/permissions", role.id);

    let (status, _) = app.call("GET", "/api/cards", Some(&adv), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .call("POST", &grants, Some(&root), Some(json!({ "permission_id": cards_read })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "created");
    let (status, _) = app.call("GET", "/api/cards", Some(&adv), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app
        .call("POST", &grants, Some(&root), Some(json!({ "permission_id": cards_read })))
        .await;
    assert_eq!(body["outcome"], "already_granted");

    let (status, body) = app
        .call("DELETE", &format!("{grants}/{cards_read}"), Some(&root), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], true);
    let (status, _) = app.call("GET", "/api/cards", Some(&adv), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, audit) = app.call("GET", "/api/admin/audit", Some(&root), None).await;
    let actions: Vec<&str> = audit
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|e| e["action"].as_str())
        .collect();
    assert_eq!(actions, vec!["role.revoke", "role.grant"]);
}

#[tokio::test]
async fn dashboard_counts_only_visible_rows() {
    let app = TestApp::new().await;
    let (_, t1) = app.login("u1", "Editor").await;
    let (_, t2) = app.login("u2", "Editor").await;
    let (_, admin) = app.login("admin", "Admin").await;

    for (token, name) in [(&t1, "a"), (&t1, "b"), (&t2, "c")] {
        let (status, _) = app
            .call("POST", "/api/cards", Some(token), Some(json!({ "name": name })))
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let cards_total = |body: &Value| {
        body["kinds"]
            .as_array()
            .unwrap()
            .iter()
            .find(|k| k["kind"] == "cards")
            .map(|k| k["total"].as_u64().unwrap())
    };

    let (status, body) = app.call("GET", "/api/dashboard", Some(&t1), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cards_total(&body), Some(2));
    assert_eq!(body["kinds"][0]["kind"], "campaigns");

    let (_, body) = app.call("GET", "/api/dashboard", Some(&admin), None).await;
    assert_eq!(cards_total(&body), Some(3));

    // Advertisers hold no cards grant, so the kind is absent.
    let (_, adv) = app.login("adv", "Advertiser").await;
    let (_, body) = app.call("GET", "/api/dashboard", Some(&adv), None).await;
    assert_eq!(cards_total(&body), None);
}

#[tokio::test]
async fn legacy_rows_are_privileged_only() {
    let app = TestApp::new().await;
    app.resources
        .create(
            ResourceKind::Brands,
            &NewResource {
                name: "legacy".into(),
                status: None,
                data: None,
                owner_id: None,
            },
        )
        .await
        .unwrap();
    let (_, editor) = app.login("e", "Editor").await;
    let (_, admin) = app.login("a", "Admin").await;

    let (_, list) = app.call("GET", "/api/brands", Some(&editor), None).await;
    assert!(list.as_array().unwrap().is_empty());
    let (_, list) = app.call("GET", "/api/brands", Some(&admin), None).await;
    assert_eq!(list.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn navigation_follows_grants() {
    let app = TestApp::new().await;
    let (_, viewer) = app.login("v", "Viewer").await;
    let (status, body) = app.call("GET", "/api/navigation", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["role"], "Viewer");
    let modules: Vec<&str> = body["modules"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["module"].as_str())
        .collect();
    assert_eq!(modules, vec!["dashboard", "reports"]);
    assert!(
        body["permissions"]
            .as_array()
            .unwrap()
            .contains(&json!("reports.read"))
    );
}

#[tokio::test]
async fn deactivated_user_is_locked_out() {
    let app = TestApp::new().await;
    let (_, root) = app.login("root", "SuperAdmin").await;
    let (uid, viewer) = app.login("v", "Viewer").await;

    let (status, _) = app.call("GET", "/api/reports", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .call(
            "PUT",
            &format!("/api/admin/users/{uid}"),
            Some(&root),
            Some(json!({ "is_active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.call("GET", "/api/reports", Some(&viewer), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn admin_modules_lists_enforceable_modules() {
    let app = TestApp::new().await;
    let (_, admin) = app.login("admin", "Admin").await;
    let (status, body) = app.call("GET", "/api/admin/modules", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|m| m["name"].as_str())
        .collect();
    assert!(names.contains(&"cards"));
    // No permission rows, so no enforceable surface.
    assert!(!names.contains(&"navigation"));
}
