//! Appointment records and the read-only store that gates call setup

use crate::call::CallRole;
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Approval state of a booked appointment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for the doctor to approve
    Pending,
    /// Approved; the consultation may start at the scheduled time
    Approved,
    /// Declined by the doctor
    Declined,
}

/// One booked consultation slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    /// Unique appointment identifier; also keys the signaling topic
    pub id: String,

    /// The booking party; always the call initiator
    pub patient_id: String,

    /// The consulted party; always the call responder
    pub doctor_id: String,

    /// Scheduled consultation start
    pub scheduled_at: DateTime<Utc>,

    /// Approval state
    pub approval: ApprovalStatus,
}

impl Appointment {
    /// Whether the consultation may be joined at `now`: the doctor has
    /// approved and the scheduled time has been reached.
    pub fn is_joinable_at(&self, now: DateTime<Utc>) -> bool {
        self.approval == ApprovalStatus::Approved && self.scheduled_at <= now
    }

    /// Call role of `user_id` in this appointment, or `None` when they are
    /// not a participant.
    pub fn role_of(&self, user_id: &str) -> Option<CallRole> {
        if user_id == self.patient_id {
            Some(CallRole::Initiator)
        } else if user_id == self.doctor_id {
            Some(CallRole::Responder)
        } else {
            None
        }
    }
}

/// Read-only appointment lookup
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Resolve an appointment id, or `None` when unknown
    async fn find(&self, appointment_id: &str) -> Result<Option<Appointment>>;
}

/// In-memory store for tests and embedding applications
#[derive(Default)]
pub struct InMemoryAppointmentStore {
    records: RwLock<HashMap<String, Appointment>>,
}

impl InMemoryAppointmentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an appointment record
    pub async fn insert(&self, appointment: Appointment) {
        self.records
            .write()
            .await
            .insert(appointment.id.clone(), appointment);
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find(&self, appointment_id: &str) -> Result<Option<Appointment>> {
        Ok(self.records.read().await.get(appointment_id).cloned())
    }
}
