use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::relay::RelayStats;
use super::SessionStatus;

#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub service_name: String,
    pub client_addr: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub container_id: Option<String>,
    pub bytes_transferred: u64,
    pub status: SessionStatus,
}

impl Session {
    pub fn new(service_name: &str, client_addr: &str, start_time: DateTime<Utc>) -> Self {
        Session {
            id: Uuid::new_v4(),
            service_name: service_name.to_string(),
            client_addr: client_addr.to_string(),
            start_time,
            end_time: None,
            container_id: None,
            bytes_transferred: 0,
            status: SessionStatus::Pending,
        }
    }

    pub fn finish(&mut self, status: SessionStatus, stats: RelayStats) {
        self.end_time = Some(Utc::now());
        self.bytes_transferred = stats.attacker_to_backend + stats.backend_to_attacker;
        self.status = status;
    }
}
