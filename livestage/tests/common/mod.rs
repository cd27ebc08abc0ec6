#![allow(dead_code)]

use livestage::{
    api::{build_router, AppState},
    auth,
    config::Config,
    users,
};
use serde_json::{json, Value};
use std::net::{SocketAddr, TcpListener};
use time::{format_description::well_known::Rfc3339, Duration, OffsetDateTime};
use tokio::task::JoinHandle;

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub client: reqwest::Client,
    server: JoinHandle<()>,
    _tmp: tempfile::TempDir,
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

pub async fn spawn_server() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    listener.set_nonblocking(true).unwrap();

    let tmp = tempfile::tempdir().unwrap();
    let mut config = Config::with_data_dir(addr.to_string(), tmp.path());
    config.sweep_interval_secs = 0;
    let state = AppState::new(config).await.unwrap();
    let app = build_router(state.clone());
    let server = tokio::spawn(async move {
        axum::Server::from_tcp(listener)
            .unwrap()
            .serve(app.into_make_service())
            .await
            .unwrap();
    });
    TestServer {
        addr,
        state,
        client: reqwest::Client::new(),
        server,
        _tmp: tmp,
    }
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Register a user and return a bearer token for it.
    pub fn user(&self, username: &str, display_name: &str, staff: bool) -> String {
        let conn = self.state.pool.get().unwrap();
        users::create_user(&conn, username, display_name, staff).unwrap();
        auth::issue_jwt(&self.state.jwt_secret, username, Duration::hours(1)).unwrap()
    }

    /// Create a scheduled event an hour from now and return its id.
    pub async fn create_event(&self, token: &str, title: &str) -> String {
        let body = event_body(title, OffsetDateTime::now_utc() + Duration::hours(1));
        let resp = self
            .client
            .post(self.url("/events"))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 201);
        let v: Value = resp.json().await.unwrap();
        assert_eq!(v["status"], "scheduled");
        v["id"].as_str().unwrap().to_string()
    }

    pub async fn patch(&self, token: &str, id: &str, body: Value) -> reqwest::Response {
        self.client
            .patch(self.url(&format!("/events/{id}")))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Create an event and take it live.
    pub async fn live_event(&self, token: &str, title: &str) -> String {
        let id = self.create_event(token, title).await;
        let resp = self.patch(token, &id, json!({"status": "live"})).await;
        assert_eq!(resp.status(), 200);
        id
    }

    pub async fn send(&self, token: Option<&str>, event_id: &str, text: &str) -> (u16, Value) {
        let mut req = self
            .client
            .post(self.url(&format!("/events/{event_id}/send")))
            .json(&json!({ "message": text }));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    pub async fn delete_message(&self, token: &str, message_id: &str) -> Value {
        let resp = self
            .client
            .post(self.url(&format!("/messages/{message_id}/delete")))
            .bearer_auth(token)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }

    pub async fn feed(&self, token: Option<&str>, event_id: &str) -> Value {
        let mut req = self
            .client
            .get(self.url(&format!("/events/{event_id}/messages")));
        if let Some(t) = token {
            req = req.bearer_auth(t);
        }
        let resp = req.send().await.unwrap();
        assert_eq!(resp.status(), 200);
        resp.json().await.unwrap()
    }
}

pub fn event_body(title: &str, at: OffsetDateTime) -> Value {
    json!({
        "title": title,
        "description": "Community night",
        "category": "gaming",
        "scheduled_date": at.format(&Rfc3339).unwrap(),
        "tags": "retro, coop",
        "stream_url": "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
    })
}
