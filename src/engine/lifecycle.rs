use crate::model::ReservationStatus;

/// Caller-requested lifecycle operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the target state; nothing to write.
    Unchanged,
    To(ReservationStatus),
}

impl ReservationStatus {
    /// Active → Cancelled is the only move. Cancelling twice is a no-op, not an error.
    pub fn apply(self, action: Action) -> Transition {
        match (self, action) {
            (ReservationStatus::Active, Action::Cancel) => Transition::To(ReservationStatus::Cancelled),
            (ReservationStatus::Cancelled, Action::Cancel) => Transition::Unchanged,
        }
    }
}
