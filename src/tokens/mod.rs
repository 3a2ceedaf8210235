//! Expired token housekeeping
//!
//! Cluster join tokens and certificate-add tokens live as operations in the
//! daemon's operation registry until used or cancelled. A background task
//! sweeps the registry once a minute and cancels those past their
//! `expiresAt` time, from inside a single `RemoveExpiredTokens` operation.
//!
//! This runs on its own schedule and shares nothing with [`crate::tcp`].

pub mod operation;
pub mod task;

pub use operation::{
    Metadata, MetadataValue, Operation, OperationClass, OperationId, OperationStatus,
    OperationType, Operations, RunFn, EXPIRES_AT,
};
pub use task::{Schedule, TaskFn, TaskHandle};

use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Result type for token operations
pub type Result<T> = std::result::Result<T, TokenError>;

/// Operation errors
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Operation {id} already finished ({status:?})")]
    AlreadyFinished {
        id: OperationId,
        status: OperationStatus,
    },

    #[error("Operation {id} already started")]
    AlreadyStarted { id: OperationId },

    #[error("Operation {id} is not a task")]
    NotTask { id: OperationId },

    #[error("Failed to spawn operation thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// How often expired tokens are swept
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// How long a sweep waits for its cancellations to finish
pub const SWEEP_TIMEOUT: Duration = Duration::from_secs(30);

fn is_expired(op: &Operation, now: SystemTime) -> bool {
    op.op_type().is_token() && matches!(op.expires_at(), Some(expiry) if now > expiry)
}

/// Cancel every token operation whose expiry is before `now`
///
/// Returns the number of expired tokens found. When there are none nothing
/// is created or logged. Tokens that fail to cancel, for example because they
/// were used in the meantime, are logged and skipped. The housekeeping
/// operation and the cancelled tokens are dropped from the registry once the
/// sweep is done.
pub fn remove_expired_tokens(ops: &Operations, now: SystemTime) -> Result<usize> {
    let expired: Vec<Arc<Operation>> = ops
        .snapshot()
        .into_iter()
        .filter(|op| is_expired(op, now))
        .collect();

    if expired.is_empty() {
        return Ok(0);
    }

    let count = expired.len();
    let ids: Vec<OperationId> = expired.iter().map(|op| op.id()).collect();

    let run: RunFn = Box::new(move |_| {
        for op in &expired {
            if let Err(err) = op.cancel() {
                log::debug!("Failed removing expired token {}: {}", op.id(), err);
            }
        }
        Ok(())
    });

    let op = ops.add(Operation::task(OperationType::RemoveExpiredTokens, run));

    log::info!("Removing expired tokens");

    if let Err(err) = op.start() {
        log::error!("Failed to remove expired tokens: {}", err);
        ops.remove(op.id());
        return Err(err);
    }

    let status = op.wait(SWEEP_TIMEOUT);
    if !status.is_final() {
        log::warn!("Removing expired tokens still running after {:?}", SWEEP_TIMEOUT);
        return Ok(count);
    }
    ops.remove(op.id());

    for id in ids {
        if matches!(ops.get(id), Some(token) if token.status() == OperationStatus::Cancelled) {
            ops.remove(id);
        }
    }

    log::debug!("Done removing expired tokens");

    Ok(count)
}

/// The periodic sweep task and its schedule
pub fn expired_tokens_task(ops: Arc<Operations>) -> (TaskFn, Schedule) {
    let f: TaskFn = Box::new(move || {
        // Failures are logged inside
        let _ = remove_expired_tokens(&ops, SystemTime::now());
    });

    (f, Schedule::every(SWEEP_INTERVAL))
}

/// Start the sweep on a background thread
pub fn spawn_expired_tokens_task(ops: Arc<Operations>) -> Result<TaskHandle> {
    let (f, schedule) = expired_tokens_task(ops);
    Ok(task::spawn("remove-expired-tokens", schedule, f)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    #[test]
    fn test_expired_tokens_are_cancelled() {
        init_logging();
        let ops = Operations::new();
        let now = SystemTime::now();
        let hour = Duration::from_secs(3600);

        let join = ops.add(Operation::token(OperationType::ClusterJoinToken, now - hour));
        let cert = ops.add(Operation::token(OperationType::CertificateAddToken, now - hour));
        let fresh = ops.add(Operation::token(OperationType::ClusterJoinToken, now + hour));

        let removed = remove_expired_tokens(&ops, now).unwrap();
        assert_eq!(removed, 2);

        assert_eq!(join.status(), OperationStatus::Cancelled);
        assert_eq!(cert.status(), OperationStatus::Cancelled);
        assert_eq!(fresh.status(), OperationStatus::Pending);

        // Only the live token is left; the sweep cleaned up after itself
        let left: Vec<_> = ops.snapshot().iter().map(|op| op.id()).collect();
        assert_eq!(left, vec![fresh.id()]);
    }

    #[test]
    fn test_other_operations_ignored() {
        init_logging();
        let ops = Operations::new();
        let now = SystemTime::now();
        let past = now - Duration::from_secs(60);

        let mut metadata = Metadata::new();
        metadata.insert(EXPIRES_AT.to_string(), MetadataValue::Time(past));
        let other = ops.add(Operation::with_metadata(
            OperationType::Other("image-download".to_string()),
            metadata,
        ));
        let untimed = ops.add(Operation::with_metadata(
            OperationType::CertificateAddToken,
            Metadata::new(),
        ));

        assert_eq!(remove_expired_tokens(&ops, now).unwrap(), 0);
        assert_eq!(other.status(), OperationStatus::Pending);
        assert_eq!(untimed.status(), OperationStatus::Pending);

        // No housekeeping operation was created
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn test_already_finished_token_is_skipped() {
        init_logging();
        let ops = Operations::new();
        let now = SystemTime::now();

        let used = ops.add(Operation::token(
            OperationType::ClusterJoinToken,
            now - Duration::from_secs(1),
        ));
        used.cancel().unwrap();

        assert_eq!(remove_expired_tokens(&ops, now).unwrap(), 1);
        assert!(ops.is_empty());
    }

    #[test]
    fn test_expired_tokens_task_schedule() {
        let (_, schedule) = expired_tokens_task(Arc::new(Operations::new()));
        assert_eq!(schedule.interval(), Duration::from_secs(60));
    }

    #[test]
    fn test_spawned_sweep_runs_immediately() {
        init_logging();
        let ops = Arc::new(Operations::new());
        let token = ops.add(Operation::token(
            OperationType::CertificateAddToken,
            SystemTime::now() - Duration::from_secs(5),
        ));

        let handle = spawn_expired_tokens_task(Arc::clone(&ops)).unwrap();
        assert_eq!(token.wait(Duration::from_secs(5)), OperationStatus::Cancelled);
        handle.stop();
    }
}
