/// Lab report and pharmacy alert caches kept fresh by real-time events
use crate::api::HospitalApi;
use crate::error::Result;
use crate::models::{LabReport, LabReportUpdate, MedicineAlerts, NewLabReport};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

pub struct LabReportBoard {
    api: Arc<dyn HospitalApi>,
    reports: RwLock<Vec<LabReport>>,
}

impl LabReportBoard {
    pub fn new(api: Arc<dyn HospitalApi>) -> Self {
        Self {
            api,
            reports: RwLock::new(Vec::new()),
        }
    }

    pub async fn refresh(&self) -> Result<Vec<LabReport>> {
        let reports = self.api.lab_reports().await?;
        *self.reports.write().await = reports.clone();
        Ok(reports)
    }

    pub async fn reports(&self) -> Vec<LabReport> {
        self.reports.read().await.clone()
    }

    pub async fn create(&self, report: &NewLabReport) -> Result<LabReport> {
        let created = self.api.create_lab_report(report).await?;
        info!("Lab report {} created ({})", created.id, created.test_name);
        self.apply_update(created.clone()).await;
        Ok(created)
    }

    pub async fn update(&self, id: &str, update: &LabReportUpdate) -> Result<LabReport> {
        let updated = self.api.update_lab_report(id, update).await?;
        self.apply_update(updated.clone()).await;
        Ok(updated)
    }

    /// Replace by id, or insert at the front if not cached yet
    pub async fn apply_update(&self, report: LabReport) {
        let mut reports = self.reports.write().await;
        match reports.iter_mut().find(|r| r.id == report.id) {
            Some(existing) => *existing = report,
            None => reports.insert(0, report),
        }
    }
}

pub struct PharmacyAlerts {
    api: Arc<dyn HospitalApi>,
    alerts: RwLock<MedicineAlerts>,
}

impl PharmacyAlerts {
    pub fn new(api: Arc<dyn HospitalApi>) -> Self {
        Self {
            api,
            alerts: RwLock::new(MedicineAlerts::default()),
        }
    }

    /// Re-fetch alerts; called at start and on every `medicine_updated`
    pub async fn refresh(&self) -> Result<MedicineAlerts> {
        let alerts = self.api.medicine_alerts().await?;
        debug!(
            "Pharmacy alerts: {} low stock, {} expiring",
            alerts.low_stock.len(),
            alerts.expiring_soon.len()
        );
        *self.alerts.write().await = alerts.clone();
        Ok(alerts)
    }

    pub async fn current(&self) -> MedicineAlerts {
        self.alerts.read().await.clone()
    }
}
