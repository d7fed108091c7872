mod buffer;
mod class;
mod descriptor;
mod engine;
mod env;
mod error;
mod frame;
mod init;
mod invoke;
mod native;
mod pool;
mod slot;
mod stack;
mod vm;

pub use buffer::SlotBuffer;
pub use class::*;
pub use descriptor::{FieldType, MethodDescriptor};
pub use engine::{
    ENGINE_THREAD_NAME, EngineThread, FatalPolicy, FrameExecutor, FrameOutcome, NoopExecutor,
};
pub use env::*;
pub use error::*;
pub use frame::{Frame, Ticket};
pub use init::InitStep;
pub use invoke::Invocation;
pub use native::*;
pub use pool::*;
pub use slot::*;
pub use stack::CallStack;
pub use vm::*;
