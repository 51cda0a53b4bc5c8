use crate::db::models::{DeploymentStatus, ReleaseStatus};
use anyhow::{bail, Result};

// --- Release state machine -------------------------------------------------
//
//     pending --dispatch--> building --success--> ready
//          |                    |
//          |                    +--failure/timeout/cancel--> failed
//          +--(no worker available within grace) stays pending

pub fn release_is_terminal(status: ReleaseStatus) -> bool {
    matches!(status, ReleaseStatus::Ready | ReleaseStatus::Failed)
}

pub fn is_valid_release_transition(from: ReleaseStatus, to: ReleaseStatus) -> bool {
    use ReleaseStatus::*;
    match (from, to) {
        (Pending, Building) => true,
        (Building, Ready) => true,
        (Building, Failed) => true,
        (Pending, Failed) => true,
        _ => false,
    }
}

pub fn validate_release_transition(from: ReleaseStatus, to: ReleaseStatus) -> Result<()> {
    if !is_valid_release_transition(from, to) {
        bail!("invalid release state transition from '{}' to '{}'", from, to);
    }
    Ok(())
}

// --- Deployment state machine ----------------------------------------------

/// Terminal states admit no further transitions.
pub fn is_terminal(status: &DeploymentStatus) -> bool {
    matches!(
        status,
        DeploymentStatus::Cancelled
            | DeploymentStatus::Stopped
            | DeploymentStatus::Superseded
            | DeploymentStatus::Failed
    )
}

/// States in which the deployment is actuated and reporting observed health.
pub fn is_active(status: &DeploymentStatus) -> bool {
    matches!(status, DeploymentStatus::Running | DeploymentStatus::Degraded)
}

/// Only pre-infrastructure states can be cancelled outright; once the
/// reconciler has started applying objects, termination is used instead.
pub fn is_cancellable(status: &DeploymentStatus) -> bool {
    matches!(status, DeploymentStatus::Pending | DeploymentStatus::Deploying)
}

/// Only deployments that reached a running state can serve as a rollback
/// source; `superseded` stays rollbackable since its Release is still ready.
pub fn is_rollbackable(status: &DeploymentStatus) -> bool {
    matches!(
        status,
        DeploymentStatus::Running | DeploymentStatus::Degraded | DeploymentStatus::Superseded
    )
}

pub fn is_valid_transition(from: &DeploymentStatus, to: &DeploymentStatus) -> bool {
    use DeploymentStatus::*;

    match (from, to) {
        (from, _) if is_terminal(from) => false,

        (Pending | Deploying, Cancelling) => true,
        (Cancelling, Cancelled) => true,

        (Pending, Deploying) => true,
        (Deploying, Running) => true,
        (Deploying, Degraded) => true,
        (Deploying, Failed) => true,

        (Running, Degraded) => true,
        (Degraded, Running) => true,
        (Degraded, Failed) => true,

        (Running | Degraded, Terminating) => true,
        (Terminating, Stopped) => true,
        (Terminating, Superseded) => true,

        (Pending | Deploying, Failed) => true,

        _ => false,
    }
}

pub fn validate_transition(from: &DeploymentStatus, to: &DeploymentStatus) -> Result<()> {
    if !is_valid_transition(from, to) {
        bail!("invalid deployment state transition from '{}' to '{}'", from, to);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use DeploymentStatus::*;

    #[test]
    fn terminal_states() {
        assert!(is_terminal(&Cancelled));
        assert!(is_terminal(&Stopped));
        assert!(is_terminal(&Superseded));
        assert!(is_terminal(&Failed));
        assert!(!is_terminal(&Pending));
        assert!(!is_terminal(&Running));
    }

    #[test]
    fn active_states() {
        assert!(is_active(&Running));
        assert!(is_active(&Degraded));
        assert!(!is_active(&Deploying));
    }

    #[test]
    fn cancellable_states() {
        assert!(is_cancellable(&Pending));
        assert!(is_cancellable(&Deploying));
        assert!(!is_cancellable(&Running));
        assert!(!is_cancellable(&Cancelled));
    }

    #[test]
    fn rollbackable_states() {
        assert!(is_rollbackable(&Running));
        assert!(is_rollbackable(&Superseded));
        assert!(!is_rollbackable(&Pending));
        assert!(!is_rollbackable(&Failed));
    }

    #[test]
    fn deployment_happy_path() {
        assert!(is_valid_transition(&Pending, &Deploying));
        assert!(is_valid_transition(&Deploying, &Running));
        assert!(is_valid_transition(&Running, &Terminating));
        assert!(is_valid_transition(&Terminating, &Superseded));
    }

    #[test]
    fn terminal_states_admit_no_transitions() {
        assert!(!is_valid_transition(&Cancelled, &Pending));
        assert!(!is_valid_transition(&Stopped, &Running));
        assert!(!is_valid_transition(&Superseded, &Deploying));
        assert!(!is_valid_transition(&Failed, &Running));
    }

    #[test]
    fn cannot_skip_states() {
        assert!(!is_valid_transition(&Pending, &Running));
        assert!(!is_valid_transition(&Running, &Pending));
    }

    #[test]
    fn release_happy_path() {
        assert!(is_valid_release_transition(ReleaseStatus::Pending, ReleaseStatus::Building));
        assert!(is_valid_release_transition(ReleaseStatus::Building, ReleaseStatus::Ready));
        assert!(!is_valid_release_transition(ReleaseStatus::Ready, ReleaseStatus::Building));
    }
}
