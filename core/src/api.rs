/// Hospital REST API client
///
/// Endpoints (relative to `Config::api_url`):
///   GET    /search?q=
///   GET    /notifications/unread-count
///   GET    /chat/users
///   GET    /chat/:userId
///   POST   /chat/send                   body: {"receiverId":"...","message":"..."}
///   PUT    /chat/read/:userId
///   GET    /notifications
///   PUT    /notifications/:id/read
///   PUT    /notifications/read-all
///   DELETE /notifications/:id
///   DELETE /notifications
///   GET    /patients, POST /patients
///   GET    /lab-reports, POST /lab-reports, PUT /lab-reports/:id
///   GET    /medicines/alerts
use crate::config::Config;
use crate::error::{Result, WardError};
use crate::models::{
    ChatMessage, Counterpart, LabReport, LabReportUpdate, MedicineAlerts, NewLabReport,
    NewPatient, Notification, Patient, SearchResults, SendMessageRequest, UnreadCounts,
};
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Everything the client needs from the hospital server.
///
/// Sessions hold this as `Arc<dyn HospitalApi>` so tests can swap in a fake.
#[async_trait]
pub trait HospitalApi: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults>;

    /// Reconciliation source for the unread counters
    async fn unread_count(&self) -> Result<UnreadCounts>;

    async fn chat_users(&self) -> Result<Vec<Counterpart>>;
    async fn chat_history(&self, user_id: &str) -> Result<Vec<ChatMessage>>;
    async fn send_message(&self, receiver_id: &str, message: &str) -> Result<ChatMessage>;
    async fn mark_chat_read(&self, user_id: &str) -> Result<()>;

    async fn notifications(&self) -> Result<Vec<Notification>>;
    async fn mark_notification_read(&self, id: &str) -> Result<()>;
    async fn mark_all_notifications_read(&self) -> Result<()>;
    async fn delete_notification(&self, id: &str) -> Result<()>;
    async fn delete_all_notifications(&self) -> Result<()>;

    async fn patients(&self) -> Result<Vec<Patient>>;
    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient>;
    async fn lab_reports(&self) -> Result<Vec<LabReport>>;
    async fn create_lab_report(&self, report: &NewLabReport) -> Result<LabReport>;
    async fn update_lab_report(&self, id: &str, update: &LabReportUpdate) -> Result<LabReport>;
    async fn medicine_alerts(&self) -> Result<MedicineAlerts>;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

type HttpClient = Client<HttpConnector, Full<Bytes>>;

/// `HospitalApi` over plain HTTP/1.1
#[derive(Clone)]
pub struct HttpApi {
    client: HttpClient,
    base_url: String,
    auth_token: Option<String>,
    timeout: Duration,
}

impl HttpApi {
    pub fn new(config: &Config) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
            timeout: config.request_timeout,
        }
    }

    fn uri(&self, path: &str) -> Result<Uri> {
        format!("{}{}", self.base_url, path)
            .parse::<Uri>()
            .map_err(|e| {
                WardError::Config(format!("Invalid API URL {}{}: {}", self.base_url, path, e))
            })
    }

    /// Send one request and return the raw response body on 2xx
    async fn call(&self, method: Method, path: &str, body: Option<Vec<u8>>) -> Result<Bytes> {
        let uri = self.uri(path)?;
        let mut builder = Request::builder()
            .method(method.clone())
            .uri(uri)
            .header(ACCEPT, "application/json");
        if let Some(token) = &self.auth_token {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(bytes) => builder
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(bytes)))?,
            None => builder.body(Full::new(Bytes::new()))?,
        };

        debug!("{} {}", method, path);

        let exchange = async {
            let resp = self.client.request(req).await?;
            let status = resp.status();
            let body = resp.into_body().collect().await?.to_bytes();
            Ok::<_, WardError>((status, body))
        };

        let (status, body) = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| WardError::Timeout(format!("{} {} timed out", method, path)))??;

        if !status.is_success() {
            let message = error_message(status, &body);
            warn!("{} {} failed: {} {}", method, path, status.as_u16(), message);
            return Err(WardError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(body)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let body = self.call(Method::GET, path, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn send_json<B, T>(&self, method: Method, path: &str, payload: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let bytes = serde_json::to_vec(payload)?;
        let body = self.call(method, path, Some(bytes)).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    /// For endpoints whose response body carries nothing we need
    async fn fire(&self, method: Method, path: &str) -> Result<()> {
        self.call(method, path, None).await.map(|_| ())
    }
}

fn error_message(status: StatusCode, body: &[u8]) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| {
            status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string()
        })
}

fn segment(id: &str) -> String {
    urlencoding::encode(id).into_owned()
}

#[async_trait]
impl HospitalApi for HttpApi {
    async fn search(&self, query: &str) -> Result<SearchResults> {
        self.get(&format!("/search?q={}", urlencoding::encode(query))).await
    }

    async fn unread_count(&self) -> Result<UnreadCounts> {
        self.get("/notifications/unread-count").await
    }

    async fn chat_users(&self) -> Result<Vec<Counterpart>> {
        self.get("/chat/users").await
    }

    async fn chat_history(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        self.get(&format!("/chat/{}", segment(user_id))).await
    }

    async fn send_message(&self, receiver_id: &str, message: &str) -> Result<ChatMessage> {
        let req = SendMessageRequest {
            receiver_id,
            message,
        };
        self.send_json(Method::POST, "/chat/send", &req).await
    }

    async fn mark_chat_read(&self, user_id: &str) -> Result<()> {
        self.fire(Method::PUT, &format!("/chat/read/{}", segment(user_id))).await
    }

    async fn notifications(&self) -> Result<Vec<Notification>> {
        self.get("/notifications").await
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        self.fire(Method::PUT, &format!("/notifications/{}/read", segment(id))).await
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        self.fire(Method::PUT, "/notifications/read-all").await
    }

    async fn delete_notification(&self, id: &str) -> Result<()> {
        self.fire(Method::DELETE, &format!("/notifications/{}", segment(id))).await
    }

    async fn delete_all_notifications(&self) -> Result<()> {
        self.fire(Method::DELETE, "/notifications").await
    }

    async fn patients(&self) -> Result<Vec<Patient>> {
        self.get("/patients").await
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        self.send_json(Method::POST, "/patients", patient).await
    }

    async fn lab_reports(&self) -> Result<Vec<LabReport>> {
        self.get("/lab-reports").await
    }

    async fn create_lab_report(&self, report: &NewLabReport) -> Result<LabReport> {
        self.send_json(Method::POST, "/lab-reports", report).await
    }

    async fn update_lab_report(&self, id: &str, update: &LabReportUpdate) -> Result<LabReport> {
        self.send_json(Method::PUT, &format!("/lab-reports/{}", segment(id)), update)
            .await
    }

    async fn medicine_alerts(&self) -> Result<MedicineAlerts> {
        self.get("/medicines/alerts").await
    }
}
