//! The engine coordination loop.
//!
//! One thread owns execution. It sleeps on the VM condvar while the call stack
//! is empty, and otherwise hands the top frame to the [`FrameExecutor`]. The
//! whole step runs under the VM mutex, so at most one frame is being executed
//! at any time.
use std::{
    sync::{Arc, atomic::Ordering},
    thread::{self, JoinHandle},
    time::Duration,
};

use parking_lot::{Condvar, Mutex};

use crate::{EngineError, EngineResult, ExecEnv, FrameId, VMShared};

pub const ENGINE_THREAD_NAME: &str = "kava-engine";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// The frame finished; the engine pops and releases it.
    Returned,
    /// The frame called another method and must be resumed after the callee,
    /// which is now on top of the stack.
    Suspended,
}

/// Runs a frame, the seam where an instruction interpreter plugs in.
///
/// `execute` is called with the frame on top of the call stack. Resuming a
/// suspended frame calls `execute` again with the same id.
pub trait FrameExecutor: Send {
    fn execute(&mut self, env: &mut ExecEnv, frame: FrameId) -> EngineResult<FrameOutcome>;
}

/// Returns from every frame immediately.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl FrameExecutor for NoopExecutor {
    fn execute(&mut self, _env: &mut ExecEnv, _frame: FrameId) -> EngineResult<FrameOutcome> {
        Ok(FrameOutcome::Returned)
    }
}

/// What the engine thread does with a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatalPolicy {
    /// Log and end the process.
    #[default]
    Abort,
    /// Log, stop the engine and wake every waiter.
    Stop,
}

pub(crate) fn run(
    shared: &VMShared,
    executor: &mut dyn FrameExecutor,
) -> EngineResult<()> {
    log::info!("engine loop started");
    let mut env = shared.env.lock();
    loop {
        while env.stack.is_empty() && !shared.exit.load(Ordering::Acquire) {
            shared.cond.wait(&mut env);
        }
        if shared.exit.load(Ordering::Acquire) {
            if !env.stack.is_empty() {
                log::warn!("abandoning {} frames on shutdown", env.stack.depth());
            }
            break;
        }

        let top = env.stack.peek().ok_or(EngineError::StackUnderflow)?;
        let depth = env.stack.depth();
        log::trace!("engine running frame {:?} at pc {}", top, env.pc);
        match executor.execute(&mut env, top)? {
            FrameOutcome::Returned => {
                if env.stack.peek() != Some(top) {
                    return Err(EngineError::Execution(
                        "frame returned with callees above it".into(),
                    ));
                }
                env.pop_frame()?;
                shared.cond.notify_all();
            }
            FrameOutcome::Suspended => {
                if env.stack.depth() <= depth {
                    return Err(EngineError::Execution(
                        "frame suspended without calling".into(),
                    ));
                }
            }
        }
    }
    log::info!("engine loop exited");
    Ok(())
}

/// Join handle of the engine thread that can also be waited on with a timeout.
pub struct EngineThread {
    handle: Mutex<Option<JoinHandle<EngineResult<()>>>>,
    done: Arc<(Mutex<bool>, Condvar)>,
}

impl EngineThread {
    pub(crate) fn spawn(
        shared: Arc<VMShared>,
        mut executor: Box<dyn FrameExecutor>,
        policy: FatalPolicy,
    ) -> std::io::Result<Self> {
        let done = Arc::new((Mutex::new(false), Condvar::new()));
        let done2 = Arc::clone(&done);
        let handle = thread::Builder::new()
            .name(ENGINE_THREAD_NAME.into())
            .spawn(move || {
                let result = run(&shared, executor.as_mut());
                if let Err(err) = &result {
                    match policy {
                        FatalPolicy::Abort => crate::fatal(err),
                        FatalPolicy::Stop => {
                            log::error!("engine stopped: {err}");
                            shared.exit.store(true, Ordering::Release);
                            let _env = shared.env.lock();
                            shared.cond.notify_all();
                        }
                    }
                }
                let (ref mx, ref cv) = *done2;
                *mx.lock() = true;
                cv.notify_all();
                result
            })?;
        Ok(Self {
            handle: Mutex::new(Some(handle)),
            done,
        })
    }

    pub fn thread_id(&self) -> Option<thread::ThreadId> {
        self.handle.lock().as_ref().map(|h| h.thread().id())
    }

    pub fn is_finished(&self) -> bool {
        *self.done.0.lock()
    }

    pub fn join_timeout(&self, dur: Duration) -> bool {
        let (ref mx, ref cv) = *self.done;
        let mut done = mx.lock();
        if *done {
            return true;
        }
        let res = cv.wait_for(&mut done, dur);
        !res.timed_out() || *done
    }

    pub fn join(&self) -> EngineResult<()> {
        let Some(handle) = self.handle.lock().take() else {
            return Ok(());
        };
        handle
            .join()
            .unwrap_or_else(|_| Err(EngineError::Execution("engine thread panicked".into())))
    }
}
