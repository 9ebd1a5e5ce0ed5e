//! Realtime Event Types
//!
//! Messages exchanged over the queue WebSocket. Queue events always carry the
//! full recomputed active queue, so clients replace their state instead of
//! applying deltas.

use clinic_core::{DoctorId, QueueEntry};
use serde::{Deserialize, Serialize};

/// Room name for a doctor's subscribers.
pub fn room_name(doctor_id: DoctorId) -> String {
    format!("doctor:{}", doctor_id)
}

// ============================================================================
// QUEUE EVENTS (server -> client)
// ============================================================================

/// Event name of a queue change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueEventKind {
    QueueUpdated,
    PatientCalled,
    PatientSkipped,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventKind::QueueUpdated => "queue-updated",
            QueueEventKind::PatientCalled => "patient-called",
            QueueEventKind::PatientSkipped => "patient-skipped",
        }
    }
}

/// What caused a `queue-updated` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueAction {
    Enqueued,
    Completed,
    StatusUpdated,
    CounterReset,
    /// Snapshot sent to a single reconnecting client.
    Resync,
}

/// A queue change pushed to a doctor's room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEvent {
    pub event: QueueEventKind,
    pub doctor_id: DoctorId,
    /// Active queue in serving order, read after the mutation.
    pub queue: Vec<QueueEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<QueueAction>,
    /// The entry the mutation touched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<QueueEntry>,
}

impl QueueEvent {
    pub fn new(event: QueueEventKind, doctor_id: DoctorId, queue: Vec<QueueEntry>) -> Self {
        Self {
            event,
            doctor_id,
            queue,
            action: None,
            entry: None,
        }
    }

    pub fn updated(doctor_id: DoctorId, queue: Vec<QueueEntry>, action: QueueAction) -> Self {
        Self::new(QueueEventKind::QueueUpdated, doctor_id, queue).with_action(action)
    }

    pub fn with_action(mut self, action: QueueAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn with_entry(mut self, entry: QueueEntry) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.event.as_str()
    }
}

// ============================================================================
// CONTROL MESSAGES (server -> client)
// ============================================================================

/// Connection-level replies that are not queue changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ControlMessage {
    RoomJoined {
        #[serde(rename = "roomName")]
        room_name: String,
        message: String,
    },
    Error {
        message: String,
    },
}

impl ControlMessage {
    pub fn room_joined(doctor_id: DoctorId) -> Self {
        ControlMessage::RoomJoined {
            room_name: room_name(doctor_id),
            message: "Joined doctor room".to_string(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ControlMessage::Error {
            message: message.into(),
        }
    }
}

// ============================================================================
// CLIENT MESSAGES (client -> server)
// ============================================================================

/// Messages a client may send after the handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Subscribe to a doctor's room.
    JoinDoctorRoom {
        #[serde(rename = "doctorId")]
        doctor_id: String,
    },
    /// Subscribe and receive a fresh snapshot.
    ReconnectQueue {
        #[serde(rename = "doctorId")]
        doctor_id: String,
    },
}

impl ClientMessage {
    /// The raw doctor id the client asked for.
    pub fn doctor_id(&self) -> &str {
        match self {
            ClientMessage::JoinDoctorRoom { doctor_id }
            | ClientMessage::ReconnectQueue { doctor_id } => doctor_id,
        }
    }

    pub fn wants_resync(&self) -> bool {
        matches!(self, ClientMessage::ReconnectQueue { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinic_core::{new_entity_id, Priority};

    #[test]
    fn test_queue_event_wire_shape() -> Result<(), serde_json::Error> {
        let doctor = new_entity_id();
        let entry = QueueEntry::waiting(
            doctor,
            new_entity_id(),
            1,
            Priority::Normal,
            None,
            chrono::Utc::now(),
        );
        let event = QueueEvent::updated(doctor, vec![entry.clone()], QueueAction::Enqueued)
            .with_entry(entry);

        let json = serde_json::to_value(&event)?;
        assert_eq!(json["event"], "queue-updated");
        assert_eq!(json["doctorId"], doctor.to_string());
        assert_eq!(json["action"], "enqueued");
        assert_eq!(json["queue"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["entry"]["tokenNumber"], 1);
        Ok(())
    }

    #[test]
    fn test_called_event_has_no_action() -> Result<(), serde_json::Error> {
        let event = QueueEvent::new(QueueEventKind::PatientCalled, new_entity_id(), vec![]);
        let json = serde_json::to_value(&event)?;
        assert_eq!(json["event"], "patient-called");
        assert!(json.get("action").is_none());
        assert!(json.get("entry").is_none());
        Ok(())
    }

    #[test]
    fn test_control_messages() -> Result<(), serde_json::Error> {
        let doctor = new_entity_id();
        let json = serde_json::to_value(ControlMessage::room_joined(doctor))?;
        assert_eq!(json["event"], "room-joined");
        assert_eq!(json["roomName"], format!("doctor:{}", doctor));
        assert_eq!(json["message"], "Joined doctor room");

        let json = serde_json::to_value(ControlMessage::error("Invalid doctor ID"))?;
        assert_eq!(json["event"], "error");
        assert_eq!(json["message"], "Invalid doctor ID");
        Ok(())
    }

    #[test]
    fn test_client_message_parse() -> Result<(), serde_json::Error> {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"join-doctor-room","doctorId":"abc"}"#)?;
        assert_eq!(msg.doctor_id(), "abc");
        assert!(!msg.wants_resync());

        let msg: ClientMessage =
            serde_json::from_str(r#"{"event":"reconnect-queue","doctorId":"abc"}"#)?;
        assert!(msg.wants_resync());

        assert!(serde_json::from_str::<ClientMessage>(r#"{"event":"leave"}"#).is_err());
        Ok(())
    }
}
