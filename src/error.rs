use uuid::Uuid;

/// Rejections surfaced synchronously to callers of the monitoring core.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    #[error("unknown patient: {0}")]
    UnknownPatient(Uuid),
    #[error("patient {0} is already registered")]
    DuplicatePatient(Uuid),
    #[error("unknown contact: {0}")]
    UnknownContact(Uuid),
    #[error("unknown alert: {0}")]
    UnknownAlert(Uuid),
    #[error("removing contact {0} would leave the patient without a Full-access contact")]
    LastFullContactRemoval(Uuid),
    #[error("the first contact of a patient must have Full access")]
    MissingFullContact,
    #[error("alert {0} is already resolved")]
    AlreadyResolved(Uuid),
    #[error("invalid reading: {0}")]
    InvalidReading(String),
    #[error("contact {contact_id} is not subscribed to alert {alert_id}")]
    NotSubscribed { contact_id: Uuid, alert_id: Uuid },
}

/// Per-contact delivery failure. Recorded on the alert, never propagated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DeliveryError {
    #[error("delivery timed out")]
    Timeout,
    #[error("contact unreachable: {0}")]
    Unreachable(String),
}
