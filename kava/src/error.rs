use crate::{ClassId, MethodId, PoolKind};

/// Every failure the engine can report.
///
/// Library code never terminates the process; fatal variants travel up as
/// `Err` and the outer boundary (engine thread, binary) decides to abort via
/// [`fatal`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0} pool exhausted")]
    PoolExhausted(PoolKind),

    #[error("{pool} instance {index} released twice")]
    DoubleRelease { pool: PoolKind, index: usize },

    #[error("{pool} instance {index} is not acquired")]
    NotAcquired { pool: PoolKind, index: usize },

    #[error("call stack overflow (max depth {max_depth})")]
    StackOverflow { max_depth: usize },

    #[error("call stack underflow")]
    StackUnderflow,

    #[error("slot buffer cannot grow to {requested} slots (limit {limit})")]
    CapacityExceeded { requested: usize, limit: usize },

    #[error("slot buffer full ({capacity} slots)")]
    BufferOverflow { capacity: usize },

    #[error("caller operand stack holds {available} slots, {required} required")]
    OperandUnderflow { required: usize, available: usize },

    #[error("native receiver is not a live reference")]
    InvalidReceiver,

    #[error("local {index} out of range ({valid} valid)")]
    LocalOutOfRange { index: usize, valid: usize },

    #[error("class {0} is already initializing, concurrent initialization is not supported")]
    ConcurrentInitializationUnsupported(String),

    #[error("class {0} has not been resolved")]
    ClassNotResolved(String),

    #[error("class {0} is already defined")]
    DuplicateClass(String),

    #[error("class table is full ({0} classes)")]
    TooManyClasses(usize),

    #[error("class {class} declares {count} methods, more than a method id can index")]
    TooManyMethods { class: String, count: usize },

    #[error("unknown class id {0:?}")]
    UnknownClass(ClassId),

    #[error("unknown method id {0:?}")]
    UnknownMethod(MethodId),

    #[error("cannot invoke abstract method {0}")]
    AbstractMethod(String),

    #[error("malformed method descriptor {0:?}")]
    MalformedDescriptor(String),

    #[error("frame execution failed: {0}")]
    Execution(String),

    #[error("the engine thread cannot call back into the VM")]
    EngineThreadReentry,

    #[error("engine stopped before the frame completed")]
    EngineStopped,
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    /// Fatal errors mean a broken invariant, execution cannot continue.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted(_)
                | Self::DoubleRelease { .. }
                | Self::NotAcquired { .. }
                | Self::StackOverflow { .. }
                | Self::StackUnderflow
                | Self::CapacityExceeded { .. }
                | Self::BufferOverflow { .. }
                | Self::ConcurrentInitializationUnsupported(_)
                | Self::Execution(_)
        )
    }
}

/// Failures of [`crate::VM::start`] that are reported to the user instead of
/// aborting.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("Error: Could not find or load main class {0}")]
    ClassNotFound(String),

    #[error(
        "Error: Not found main() in {0}, please define as:\n  public static void main(String[] args)"
    )]
    MainNotFound(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Logs the error and ends the process.
pub fn fatal(err: &EngineError) -> ! {
    log::error!("fatal: {err}");
    std::process::exit(1)
}
