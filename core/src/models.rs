/// Shared types for the hospital API and the inbox layer
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

// ─── Users ───────────────────────────────────────────────────────────────────

/// Staff and patient roles known to the hospital API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Doctor,
    Nurse,
    Receptionist,
    Pharmacist,
    LabTechnician,
    Patient,
    #[default]
    #[serde(other)]
    Other,
}

impl Role {
    /// Lenient parse used for flags and env vars ("lab-technician", "Doctor", ...)
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "admin" => Role::Admin,
            "doctor" => Role::Doctor,
            "nurse" => Role::Nurse,
            "receptionist" => Role::Receptionist,
            "pharmacist" => Role::Pharmacist,
            "lab_technician" | "labtechnician" => Role::LabTechnician,
            "patient" => Role::Patient,
            _ => Role::Other,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Doctor => "doctor",
            Role::Nurse => "nurse",
            Role::Receptionist => "receptionist",
            Role::Pharmacist => "pharmacist",
            Role::LabTechnician => "lab technician",
            Role::Patient => "patient",
            Role::Other => "user",
        };
        write!(f, "{}", name)
    }
}

/// The logged-in user. Owned by the auth layer, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub department: Option<String>,
}

impl SessionUser {
    pub fn new(id: impl Into<String>, name: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: None,
            role,
            department: None,
        }
    }
}

/// Presence shown next to a counterpart (display only)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Online,
    Away,
    #[default]
    #[serde(other)]
    Offline,
}

/// A user the session user can chat with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Counterpart {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub email: Option<String>,
    /// Client-side tally, reset when the conversation is opened
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub activity_status: ActivityStatus,
}

impl Counterpart {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            role: Role::Other,
            email: None,
            unread_count: 0,
            activity_status: ActivityStatus::Offline,
        }
    }
}

// ─── Chat ────────────────────────────────────────────────────────────────────

/// One chat message as stored by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(deserialize_with = "user_ref")]
    pub sender: String,
    #[serde(deserialize_with = "user_ref")]
    pub receiver: String,
    pub message: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    /// The other participant from `me`'s point of view
    pub fn counterpart_of(&self, me: &str) -> &str {
        if self.sender == me {
            &self.receiver
        } else {
            &self.sender
        }
    }
}

/// Body of `POST /chat/send`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest<'a> {
    pub receiver_id: &'a str,
    pub message: &'a str,
}

// ─── Unread counters ─────────────────────────────────────────────────────────

/// Server-reported unread totals (`GET /notifications/unread-count`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCounts {
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub notification_count: u64,
}

impl UnreadCounts {
    pub fn new(message_count: u64, notification_count: u64) -> Self {
        Self {
            message_count,
            notification_count,
        }
    }

    pub fn get(&self, kind: UnreadKind) -> u64 {
        match kind {
            UnreadKind::Messages => self.message_count,
            UnreadKind::Notifications => self.notification_count,
        }
    }

    pub(crate) fn slot(&mut self, kind: UnreadKind) -> &mut u64 {
        match kind {
            UnreadKind::Messages => &mut self.message_count,
            UnreadKind::Notifications => &mut self.notification_count,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnreadKind {
    Messages,
    Notifications,
}

// ─── Notifications ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Appointment,
    LabReport,
    Medicine,
    Message,
    System,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    /// Deep-link into the app, e.g. "/lab-reports"
    #[serde(default)]
    pub link: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

// ─── Records ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    /// Human-facing registration number
    #[serde(default)]
    pub patient_id: Option<String>,
    #[serde(default)]
    pub age: Option<u32>,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub blood_group: Option<String>,
}

impl Patient {
    pub fn summary(&self) -> String {
        let mut parts = vec![self.name.clone()];
        if let Some(pid) = &self.patient_id {
            parts.push(pid.clone());
        }
        match (self.age, &self.gender) {
            (Some(age), Some(g)) => parts.push(format!("{}y {}", age, g)),
            (Some(age), None) => parts.push(format!("{}y", age)),
            (None, Some(g)) => parts.push(g.clone()),
            (None, None) => {}
        }
        if let Some(phone) = &self.phone {
            parts.push(phone.clone());
        }
        parts.join(" · ")
    }
}

/// Body of `POST /patients`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPatient {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blood_group: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Doctor {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub specialization: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
}

impl Doctor {
    pub fn summary(&self) -> String {
        let mut line = format!("Dr. {}", self.name);
        if let Some(spec) = self.specialization.as_ref().or(self.department.as_ref()) {
            line.push_str(" · ");
            line.push_str(spec);
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    #[serde(rename = "_id")]
    pub id: String,
    /// Patient name (the server may populate the reference or send a bare name)
    #[serde(default, deserialize_with = "name_ref")]
    pub patient: Option<String>,
    #[serde(default, deserialize_with = "name_ref")]
    pub doctor: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

impl Appointment {
    pub fn summary(&self) -> String {
        let who = match (&self.patient, &self.doctor) {
            (Some(p), Some(d)) => format!("{} with Dr. {}", p, d),
            (Some(p), None) => p.clone(),
            (None, Some(d)) => format!("Dr. {}", d),
            (None, None) => "Appointment".to_string(),
        };
        let when: Vec<&str> = [self.date.as_deref(), self.time.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        let mut line = who;
        if !when.is_empty() {
            line.push_str(" · ");
            line.push_str(&when.join(" "));
        }
        if let Some(status) = &self.status {
            line.push_str(&format!(" [{}]", status));
        }
        line
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Medicine {
    #[serde(rename = "_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub quantity: Option<i64>,
    #[serde(default)]
    pub expiry_date: Option<String>,
}

impl Medicine {
    pub fn summary(&self) -> String {
        let mut line = self.name.clone();
        if let Some(cat) = &self.category {
            line.push_str(&format!(" ({})", cat));
        }
        if let Some(qty) = self.quantity {
            line.push_str(&format!(" · stock {}", qty));
        }
        if let Some(exp) = &self.expiry_date {
            line.push_str(&format!(" · expires {}", exp));
        }
        line
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabReportStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    #[serde(other)]
    Other,
}

impl LabReportStatus {
    /// Statuses a client may set; `Other` only comes from the server
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "pending" => Some(LabReportStatus::Pending),
            "in_progress" => Some(LabReportStatus::InProgress),
            "completed" | "done" => Some(LabReportStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for LabReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LabReportStatus::Pending => "pending",
            LabReportStatus::InProgress => "in progress",
            LabReportStatus::Completed => "completed",
            LabReportStatus::Other => "unknown",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabReport {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default, deserialize_with = "name_ref")]
    pub patient: Option<String>,
    pub test_name: String,
    #[serde(default)]
    pub status: LabReportStatus,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Body of `POST /lab-reports`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLabReport {
    /// Patient document id
    pub patient: String,
    pub test_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Body of `PUT /lab-reports/:id`
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabReportUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<LabReportStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// `GET /medicines/alerts`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MedicineAlerts {
    #[serde(default)]
    pub low_stock: Vec<Medicine>,
    #[serde(default, alias = "expiring")]
    pub expiring_soon: Vec<Medicine>,
}

impl MedicineAlerts {
    pub fn total(&self) -> usize {
        self.low_stock.len() + self.expiring_soon.len()
    }
}

// ─── Search ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchCategory {
    Patients,
    Doctors,
    Appointments,
    Medicines,
}

impl fmt::Display for SearchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchCategory::Patients => "Patients",
            SearchCategory::Doctors => "Doctors",
            SearchCategory::Appointments => "Appointments",
            SearchCategory::Medicines => "Medicines",
        };
        write!(f, "{}", name)
    }
}

/// `GET /search?q=`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub patients: Vec<Patient>,
    #[serde(default)]
    pub doctors: Vec<Doctor>,
    #[serde(default)]
    pub appointments: Vec<Appointment>,
    #[serde(default)]
    pub medicines: Vec<Medicine>,
}

impl SearchResults {
    pub fn total(&self) -> usize {
        self.patients.len() + self.doctors.len() + self.appointments.len() + self.medicines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    /// One summary line per hit, grouped by category in display order
    pub fn summary_lines(&self) -> Vec<(SearchCategory, String)> {
        let mut lines = Vec::with_capacity(self.total());
        lines.extend(self.patients.iter().map(|p| (SearchCategory::Patients, p.summary())));
        lines.extend(self.doctors.iter().map(|d| (SearchCategory::Doctors, d.summary())));
        lines.extend(
            self.appointments
                .iter()
                .map(|a| (SearchCategory::Appointments, a.summary())),
        );
        lines.extend(self.medicines.iter().map(|m| (SearchCategory::Medicines, m.summary())));
        lines
    }
}

// ─── Serde helpers ───────────────────────────────────────────────────────────

/// Accepts either a bare id or a populated document with `_id`
fn user_ref<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ref {
        Id(String),
        Doc {
            #[serde(rename = "_id")]
            id: String,
        },
    }

    Ok(match Ref::deserialize(deserializer)? {
        Ref::Id(id) => id,
        Ref::Doc { id } => id,
    })
}

/// Accepts either a bare name or a populated document with `name`
fn name_ref<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Ref {
        Name(String),
        Doc { name: String },
    }

    Ok(Option::<Ref>::deserialize(deserializer)?.map(|r| match r {
        Ref::Name(name) => name,
        Ref::Doc { name } => name,
    }))
}
