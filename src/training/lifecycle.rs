//! The training-record state machine.
//!
//! Forward path:
//! PENDING_REVIEW -> ANONYMIZING -> ANONYMIZED -> VALIDATED ->
//! APPROVED_FOR_TRAINING -> IN_TRAINING. Any non-terminal state may be
//! rejected; IN_TRAINING may be retired. Nothing moves backward.

use crate::models::TrainingStatus;

/// States reachable in one transition from `from`.
pub fn allowed_transitions(from: TrainingStatus) -> &'static [TrainingStatus] {
    use TrainingStatus::*;
    match from {
        PendingReview => &[Anonymizing, Rejected],
        Anonymizing => &[Anonymized, Rejected],
        Anonymized => &[Validated, Rejected],
        Validated => &[ApprovedForTraining, Rejected],
        ApprovedForTraining => &[InTraining, Rejected],
        InTraining => &[Retired, Rejected],
        Retired | Rejected => &[],
    }
}

pub fn can_transition(from: TrainingStatus, to: TrainingStatus) -> bool {
    allowed_transitions(from).contains(&to)
}
