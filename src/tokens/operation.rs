//! Long-running operations and their registry

use super::{Result, TokenError};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, SystemTime};

/// Metadata key holding a token's expiry time
pub const EXPIRES_AT: &str = "expiresAt";

static OPERATION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    fn next() -> Self {
        Self(OPERATION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// What an operation is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    ClusterJoinToken,
    CertificateAddToken,
    RemoveExpiredTokens,
    Other(String),
}

impl OperationType {
    /// Join and certificate-add tokens are the ones that expire
    pub fn is_token(&self) -> bool {
        matches!(
            self,
            OperationType::ClusterJoinToken | OperationType::CertificateAddToken
        )
    }
}

/// Token operations only hold state; task operations run a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    Task,
    Token,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            OperationStatus::Success | OperationStatus::Failure | OperationStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataValue {
    Time(SystemTime),
    Text(String),
}

pub type Metadata = BTreeMap<String, MetadataValue>;

/// Body of a task operation
pub type RunFn = Box<dyn FnOnce(&Operation) -> std::result::Result<(), String> + Send>;

struct State {
    status: OperationStatus,
    run: Option<RunFn>,
    error: Option<String>,
}

pub struct Operation {
    id: OperationId,
    op_type: OperationType,
    class: OperationClass,
    metadata: Metadata,
    state: Mutex<State>,
    done: Condvar,
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.id)
            .field("op_type", &self.op_type)
            .field("class", &self.class)
            .field("status", &self.status())
            .finish()
    }
}

impl Operation {
    fn new(op_type: OperationType, class: OperationClass, metadata: Metadata, run: Option<RunFn>) -> Self {
        Operation {
            id: OperationId::next(),
            op_type,
            class,
            metadata,
            state: Mutex::new(State {
                status: OperationStatus::Pending,
                run,
                error: None,
            }),
            done: Condvar::new(),
        }
    }

    /// A token operation that expires at `expires_at`
    pub fn token(op_type: OperationType, expires_at: SystemTime) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(EXPIRES_AT.to_string(), MetadataValue::Time(expires_at));
        Self::new(op_type, OperationClass::Token, metadata, None)
    }

    /// A token operation with arbitrary metadata
    pub fn with_metadata(op_type: OperationType, metadata: Metadata) -> Self {
        Self::new(op_type, OperationClass::Token, metadata, None)
    }

    /// A task operation running `run` once started
    pub fn task(op_type: OperationType, run: RunFn) -> Self {
        Self::new(op_type, OperationClass::Task, Metadata::new(), Some(run))
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn op_type(&self) -> &OperationType {
        &self.op_type
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    /// Expiry time, if the metadata carries one of the right type
    pub fn expires_at(&self) -> Option<SystemTime> {
        match self.metadata.get(EXPIRES_AT) {
            Some(MetadataValue::Time(t)) => Some(*t),
            _ => None,
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.lock().status
    }

    /// Error reported by a failed task
    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a task operation on its own thread
    pub fn start(self: &Arc<Self>) -> Result<()> {
        let run = {
            let mut state = self.lock();
            if self.class != OperationClass::Task {
                return Err(TokenError::NotTask { id: self.id });
            }
            if state.status != OperationStatus::Pending {
                return Err(TokenError::AlreadyStarted { id: self.id });
            }
            let run = state.run.take().ok_or(TokenError::AlreadyStarted { id: self.id })?;
            state.status = OperationStatus::Running;
            run
        };

        let op = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name(format!("operation-{}", self.id.0))
            .spawn(move || {
                let result = run(op.as_ref());

                let mut state = op.lock();
                // A cancel while running wins
                if state.status == OperationStatus::Running {
                    match result {
                        Ok(()) => state.status = OperationStatus::Success,
                        Err(err) => {
                            state.status = OperationStatus::Failure;
                            state.error = Some(err);
                        }
                    }
                }
                op.done.notify_all();
            });

        if let Err(err) = spawned {
            let mut state = self.lock();
            state.status = OperationStatus::Failure;
            state.error = Some(err.to_string());
            self.done.notify_all();
            return Err(TokenError::Spawn(err));
        }

        Ok(())
    }

    /// Cancel a pending or running operation
    pub fn cancel(&self) -> Result<()> {
        let mut state = self.lock();
        if state.status.is_final() {
            return Err(TokenError::AlreadyFinished {
                id: self.id,
                status: state.status,
            });
        }

        state.status = OperationStatus::Cancelled;
        state.run = None;
        self.done.notify_all();
        Ok(())
    }

    /// Block until the operation reaches a final status or `timeout` passes
    pub fn wait(&self, timeout: Duration) -> OperationStatus {
        let state = self.lock();
        let (state, _) = self
            .done
            .wait_timeout_while(state, timeout, |state| !state.status.is_final())
            .unwrap_or_else(PoisonError::into_inner);
        state.status
    }
}

/// Registry of in-flight operations
#[derive(Default)]
pub struct Operations {
    ops: Mutex<HashMap<OperationId, Arc<Operation>>>,
}

impl Operations {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<OperationId, Arc<Operation>>> {
        self.ops.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an operation
    pub fn add(&self, op: Operation) -> Arc<Operation> {
        let op = Arc::new(op);
        self.lock().insert(op.id(), Arc::clone(&op));
        op
    }

    pub fn get(&self, id: OperationId) -> Option<Arc<Operation>> {
        self.lock().get(&id).cloned()
    }

    pub fn remove(&self, id: OperationId) -> Option<Arc<Operation>> {
        self.lock().remove(&id)
    }

    /// All registered operations, in id order
    pub fn snapshot(&self) -> Vec<Arc<Operation>> {
        let mut ops: Vec<_> = self.lock().values().cloned().collect();
        ops.sort_by_key(|op| op.id());
        ops
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_runs_to_success() {
        let op = Arc::new(Operation::task(
            OperationType::Other("test".to_string()),
            Box::new(|_| Ok(())),
        ));

        op.start().unwrap();
        assert_eq!(op.wait(Duration::from_secs(5)), OperationStatus::Success);
        assert!(op.error().is_none());
    }

    #[test]
    fn test_task_failure_is_recorded() {
        let op = Arc::new(Operation::task(
            OperationType::Other("test".to_string()),
            Box::new(|_| Err("boom".to_string())),
        ));

        op.start().unwrap();
        assert_eq!(op.wait(Duration::from_secs(5)), OperationStatus::Failure);
        assert_eq!(op.error().as_deref(), Some("boom"));
    }

    #[test]
    fn test_start_twice() {
        let op = Arc::new(Operation::task(
            OperationType::Other("test".to_string()),
            Box::new(|_| Ok(())),
        ));

        op.start().unwrap();
        assert!(matches!(op.start(), Err(TokenError::AlreadyStarted { .. })));
    }

    #[test]
    fn test_start_token_operation() {
        let op = Arc::new(Operation::token(
            OperationType::ClusterJoinToken,
            SystemTime::now(),
        ));
        assert!(matches!(op.start(), Err(TokenError::NotTask { .. })));
    }

    #[test]
    fn test_cancel_once() {
        let op = Operation::token(OperationType::CertificateAddToken, SystemTime::now());

        op.cancel().unwrap();
        assert_eq!(op.status(), OperationStatus::Cancelled);
        assert!(matches!(
            op.cancel(),
            Err(TokenError::AlreadyFinished { status: OperationStatus::Cancelled, .. })
        ));
    }

    #[test]
    fn test_expires_at_requires_time_value() {
        let mut metadata = Metadata::new();
        metadata.insert(EXPIRES_AT.to_string(), MetadataValue::Text("tomorrow".to_string()));
        let op = Operation::with_metadata(OperationType::ClusterJoinToken, metadata);

        assert_eq!(op.expires_at(), None);
    }

    #[test]
    fn test_token_and_task_shape() {
        let expiry = SystemTime::now();
        let token = Operation::token(OperationType::ClusterJoinToken, expiry);
        assert_eq!(token.class(), OperationClass::Token);
        assert_eq!(token.metadata().len(), 1);
        assert_eq!(token.metadata().get(EXPIRES_AT), Some(&MetadataValue::Time(expiry)));

        let task = Operation::task(OperationType::RemoveExpiredTokens, Box::new(|_| Ok(())));
        assert_eq!(task.class(), OperationClass::Task);
        assert!(task.metadata().is_empty());
        assert_eq!(task.expires_at(), None);
    }

    #[test]
    fn test_registry_snapshot_in_id_order() {
        let ops = Operations::new();
        let a = ops.add(Operation::token(OperationType::ClusterJoinToken, SystemTime::now()));
        let b = ops.add(Operation::token(OperationType::CertificateAddToken, SystemTime::now()));

        let ids: Vec<_> = ops.snapshot().iter().map(|op| op.id()).collect();
        assert_eq!(ids, vec![a.id(), b.id()]);

        ops.remove(a.id());
        assert_eq!(ops.len(), 1);
        assert!(ops.get(b.id()).is_some());
    }
}
