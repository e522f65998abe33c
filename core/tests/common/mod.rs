// Shared test helpers: an in-memory hospital API that records every call
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use wardlink_core::api::HospitalApi;
use wardlink_core::error::{Result, WardError};
use wardlink_core::models::{
    ChatMessage, Counterpart, Doctor, LabReport, LabReportStatus, LabReportUpdate,
    MedicineAlerts, NewLabReport, NewPatient, Notification, NotificationKind, Patient,
    SearchResults, UnreadCounts,
};

#[derive(Default)]
struct State {
    calls: Vec<String>,
    counts: UnreadCounts,
    users: Vec<Counterpart>,
    history: HashMap<String, Vec<ChatMessage>>,
    notifications: Vec<Notification>,
    lab_reports: Vec<LabReport>,
    alerts: MedicineAlerts,
    next_id: u64,
    fail_unread: bool,
}

pub struct FakeApi {
    me: String,
    state: Mutex<State>,
    /// When set, chat history requests wait for a notification
    history_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeApi {
    pub fn new(me: &str) -> Self {
        Self {
            me: me.to_string(),
            state: Mutex::new(State::default()),
            history_gate: Mutex::new(None),
        }
    }

    /// Hold every chat history response until `gate` is notified
    pub fn with_history_gate(self, gate: Arc<Notify>) -> Self {
        *self.history_gate.lock().unwrap() = Some(gate);
        self
    }

    pub fn with_users(self, ids: &[&str]) -> Self {
        self.state.lock().unwrap().users = ids
            .iter()
            .map(|id| Counterpart::new(*id, format!("User {}", id)))
            .collect();
        self
    }

    pub fn with_counts(self, messages: u64, notifications: u64) -> Self {
        self.state.lock().unwrap().counts = UnreadCounts::new(messages, notifications);
        self
    }

    pub fn with_history(self, user_id: &str, messages: Vec<ChatMessage>) -> Self {
        self.state
            .lock()
            .unwrap()
            .history
            .insert(user_id.to_string(), messages);
        self
    }

    pub fn with_notifications(self, items: Vec<Notification>) -> Self {
        self.state.lock().unwrap().notifications = items;
        self
    }

    pub fn with_alerts(self, alerts: MedicineAlerts) -> Self {
        self.state.lock().unwrap().alerts = alerts;
        self
    }

    pub fn add_user(&self, id: &str) {
        self.state
            .lock()
            .unwrap()
            .users
            .push(Counterpart::new(id, format!("User {}", id)));
    }

    pub fn set_counts(&self, messages: u64, notifications: u64) {
        self.state.lock().unwrap().counts = UnreadCounts::new(messages, notifications);
    }

    pub fn fail_unread(&self, fail: bool) {
        self.state.lock().unwrap().fail_unread = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of recorded calls equal to `call`
    pub fn count(&self, call: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.as_str() == call)
            .count()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    fn record(&self, call: String) -> std::sync::MutexGuard<'_, State> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        state
    }
}

pub fn message(id: &str, from: &str, to: &str, body: &str) -> ChatMessage {
    ChatMessage {
        id: Some(id.to_string()),
        sender: from.to_string(),
        receiver: to.to_string(),
        message: body.to_string(),
        created_at: Utc::now(),
    }
}

pub fn notification(id: &str, read: bool) -> Notification {
    Notification {
        id: id.to_string(),
        kind: NotificationKind::System,
        title: format!("Notice {}", id),
        message: String::new(),
        is_read: read,
        link: None,
        created_at: Utc::now(),
    }
}

pub fn lab_report(id: &str, status: LabReportStatus) -> LabReport {
    LabReport {
        id: id.to_string(),
        patient: Some("Mira Shah".to_string()),
        test_name: "CBC".to_string(),
        status,
        result: None,
        created_at: None,
    }
}

#[async_trait]
impl HospitalApi for FakeApi {
    async fn search(&self, query: &str) -> Result<SearchResults> {
        self.record(format!("GET /search?q={}", query));
        Ok(SearchResults {
            doctors: vec![Doctor {
                id: "d1".to_string(),
                name: format!("Match for {}", query),
                specialization: None,
                department: None,
            }],
            ..Default::default()
        })
    }

    async fn unread_count(&self) -> Result<UnreadCounts> {
        let state = self.record("GET /notifications/unread-count".to_string());
        if state.fail_unread {
            return Err(WardError::Connection("server unreachable".to_string()));
        }
        Ok(state.counts)
    }

    async fn chat_users(&self) -> Result<Vec<Counterpart>> {
        Ok(self.record("GET /chat/users".to_string()).users.clone())
    }

    async fn chat_history(&self, user_id: &str) -> Result<Vec<ChatMessage>> {
        drop(self.record(format!("GET /chat/{}", user_id)));
        let gate = self.history_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let state = self.state.lock().unwrap();
        Ok(state.history.get(user_id).cloned().unwrap_or_default())
    }

    async fn send_message(&self, receiver_id: &str, message: &str) -> Result<ChatMessage> {
        let mut state = self.record(format!("POST /chat/send {}", receiver_id));
        state.next_id += 1;
        Ok(ChatMessage {
            id: Some(format!("sent-{}", state.next_id)),
            sender: self.me.clone(),
            receiver: receiver_id.to_string(),
            message: message.to_string(),
            created_at: Utc::now(),
        })
    }

    async fn mark_chat_read(&self, user_id: &str) -> Result<()> {
        self.record(format!("PUT /chat/read/{}", user_id));
        Ok(())
    }

    async fn notifications(&self) -> Result<Vec<Notification>> {
        Ok(self.record("GET /notifications".to_string()).notifications.clone())
    }

    async fn mark_notification_read(&self, id: &str) -> Result<()> {
        let mut state = self.record(format!("PUT /notifications/{}/read", id));
        let mut flipped = false;
        if let Some(n) = state.notifications.iter_mut().find(|n| n.id == id) {
            flipped = !n.is_read;
            n.is_read = true;
        }
        if flipped {
            state.counts.notification_count = state.counts.notification_count.saturating_sub(1);
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        let mut state = self.record("PUT /notifications/read-all".to_string());
        for n in state.notifications.iter_mut() {
            n.is_read = true;
        }
        state.counts.notification_count = 0;
        Ok(())
    }

    async fn delete_notification(&self, id: &str) -> Result<()> {
        let mut state = self.record(format!("DELETE /notifications/{}", id));
        if let Some(idx) = state.notifications.iter().position(|n| n.id == id) {
            let removed = state.notifications.remove(idx);
            if !removed.is_read {
                state.counts.notification_count =
                    state.counts.notification_count.saturating_sub(1);
            }
        }
        Ok(())
    }

    async fn delete_all_notifications(&self) -> Result<()> {
        let mut state = self.record("DELETE /notifications".to_string());
        state.notifications.clear();
        state.counts.notification_count = 0;
        Ok(())
    }

    async fn patients(&self) -> Result<Vec<Patient>> {
        self.record("GET /patients".to_string());
        Ok(Vec::new())
    }

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient> {
        let mut state = self.record("POST /patients".to_string());
        state.next_id += 1;
        Ok(Patient {
            id: format!("p{}", state.next_id),
            name: patient.name.clone(),
            patient_id: None,
            age: patient.age,
            gender: patient.gender.clone(),
            phone: patient.phone.clone(),
            blood_group: patient.blood_group.clone(),
        })
    }

    async fn lab_reports(&self) -> Result<Vec<LabReport>> {
        Ok(self.record("GET /lab-reports".to_string()).lab_reports.clone())
    }

    async fn create_lab_report(&self, report: &NewLabReport) -> Result<LabReport> {
        let mut state = self.record("POST /lab-reports".to_string());
        state.next_id += 1;
        let created = LabReport {
            id: format!("lr{}", state.next_id),
            patient: Some(report.patient.clone()),
            test_name: report.test_name.clone(),
            status: LabReportStatus::Pending,
            result: None,
            created_at: Some(Utc::now()),
        };
        state.lab_reports.insert(0, created.clone());
        Ok(created)
    }

    async fn update_lab_report(&self, id: &str, update: &LabReportUpdate) -> Result<LabReport> {
        let mut state = self.record(format!("PUT /lab-reports/{}", id));
        let report = state
            .lab_reports
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| WardError::Api {
                status: 404,
                message: "Lab report not found".to_string(),
            })?;
        if let Some(status) = update.status {
            report.status = status;
        }
        if let Some(result) = &update.result {
            report.result = Some(result.clone());
        }
        Ok(report.clone())
    }

    async fn medicine_alerts(&self) -> Result<MedicineAlerts> {
        Ok(self.record("GET /medicines/alerts".to_string()).alerts.clone())
    }
}
