use std::{
    sync::{
        Arc, OnceLock,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, ThreadId},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::{
    ClassId, EngineError, EngineResult, EngineThread, EnvCreateInfo, EnvStats, ExecEnv,
    FatalPolicy, FrameExecutor, InitStep, Invocation, MethodId, NativeRegistry, NoopExecutor,
    PoolCreateInfo, Slot, StartError, Ticket,
};

pub const DEFAULT_MAX_DEPTH: usize = 256;

/// State shared between the VM owner, requester threads and the engine thread.
pub struct VMShared {
    pub(crate) env: Mutex<ExecEnv>,
    /// signalled when work is linked and when a frame completes
    pub(crate) cond: Condvar,
    pub(crate) exit: AtomicBool,
    engine_thread: OnceLock<ThreadId>,
}

pub struct VM {
    proxy: VMProxy,
    engine: Option<EngineThread>,
}

/// Cheap handle for threads that request execution.
#[derive(Clone)]
pub struct VMProxy {
    pub shared: Arc<VMShared>,
}

pub struct VMCreateInfo {
    pub max_depth: usize,
    /// initial slot capacity of pooled buffers
    pub buffer_capacity: usize,
    pub max_buffer_capacity: usize,
    /// defaults to `max_depth`
    pub handle_capacity: Option<usize>,
    pub natives: NativeRegistry,
    pub executor: Box<dyn FrameExecutor>,
    pub fatal_policy: FatalPolicy,
}

impl Default for VMCreateInfo {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            buffer_capacity: 16,
            max_buffer_capacity: u16::MAX as usize,
            handle_capacity: None,
            natives: NativeRegistry::new(),
            executor: Box::new(NoopExecutor),
            fatal_policy: FatalPolicy::Abort,
        }
    }
}

impl VMCreateInfo {
    fn env_info(&self) -> EnvCreateInfo {
        let mut pools = PoolCreateInfo::for_depth(self.max_depth);
        pools.buffer_capacity = self.buffer_capacity;
        pools.max_buffer_capacity = self.max_buffer_capacity;
        if let Some(handles) = self.handle_capacity {
            pools.handles = handles;
        }
        EnvCreateInfo {
            max_depth: self.max_depth,
            pools,
        }
    }
}

impl VMShared {
    pub(crate) fn new(env: ExecEnv) -> Arc<Self> {
        Arc::new(Self {
            env: Mutex::new(env),
            cond: Condvar::new(),
            exit: AtomicBool::new(false),
            engine_thread: OnceLock::new(),
        })
    }
}

impl VM {
    /// Builds the environment and starts the engine thread.
    pub fn new(info: VMCreateInfo) -> EngineResult<Self> {
        let env = ExecEnv::new(&info.env_info(), info.natives)?;
        let shared = VMShared::new(env);

        let engine = EngineThread::spawn(Arc::clone(&shared), info.executor, info.fatal_policy)
            .map_err(|e| EngineError::Execution(format!("cannot spawn engine thread: {e}")))?;
        if let Some(id) = engine.thread_id() {
            let _ = shared.engine_thread.set(id);
        }
        log::info!("vm created (max depth {})", info.max_depth);

        Ok(Self {
            proxy: VMProxy { shared },
            engine: Some(engine),
        })
    }

    pub fn proxy(&self) -> VMProxy {
        self.proxy.clone()
    }

    pub fn lock(&self) -> MutexGuard<'_, ExecEnv> {
        self.proxy.lock()
    }

    pub fn invoke(&self, method: MethodId, args: &[Slot]) -> EngineResult<Invocation> {
        self.proxy.invoke(method, args)
    }

    pub fn invoke_and_wait(&self, method: MethodId, args: &[Slot]) -> EngineResult<Invocation> {
        self.proxy.invoke_and_wait(method, args)
    }

    pub fn initialize(&self, class: ClassId) -> EngineResult<()> {
        self.proxy.initialize(class)
    }

    /// Runs `public static void main(String[])` of `main_class`.
    ///
    /// `args` become the locals of main. Returns once main has returned.
    pub fn start(&self, main_class: &str, args: &[Slot]) -> Result<(), StartError> {
        self.proxy.check_not_engine()?;
        let (class, main) = {
            let mut env = self.lock();
            let class = env
                .classes
                .find_class(main_class)
                .ok_or_else(|| StartError::ClassNotFound(main_class.to_owned()))?;
            let main = env
                .classes
                .find_entry_point(class)
                .ok_or_else(|| StartError::MainNotFound(main_class.to_owned()))?;
            env.classes.link(class)?;
            (class, main)
        };

        self.initialize(class)?;

        let mut env = self.lock();
        env.main_method = Some(main);
        log::info!("starting {main_class}.main");
        self.proxy.invoke_locked(&mut env, main, args, true)?;
        Ok(())
    }

    pub fn stats(&self) -> EnvStats {
        self.lock().stats()
    }

    /// Stops the engine, remaining frames are abandoned.
    pub fn shutdown(mut self) -> EngineResult<()> {
        self.stop()
    }

    fn stop(&mut self) -> EngineResult<()> {
        let Some(engine) = self.engine.take() else {
            return Ok(());
        };
        {
            let _env = self.proxy.shared.env.lock();
            self.proxy.shared.exit.store(true, Ordering::Release);
            self.proxy.shared.cond.notify_all();
        }
        let result = engine.join();
        let stats = self.stats();
        log::info!(
            "vm shut down, frames in use {}, buffers in use {}, handles in use {}",
            stats.frames.in_use,
            stats.buffers.in_use,
            stats.handles.in_use
        );
        result
    }
}

impl Drop for VM {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            log::error!("engine failed: {err}");
        }
    }
}

impl VMProxy {
    pub fn lock(&self) -> MutexGuard<'_, ExecEnv> {
        self.shared.env.lock()
    }

    /// Schedules the call and wakes the engine; does not wait for it.
    pub fn invoke(&self, method: MethodId, args: &[Slot]) -> EngineResult<Invocation> {
        self.check_not_engine()?;
        let mut env = self.lock();
        self.invoke_locked(&mut env, method, args, false)
    }

    /// Invokes and suspends until the scheduled frame has returned.
    pub fn invoke_and_wait(&self, method: MethodId, args: &[Slot]) -> EngineResult<Invocation> {
        self.check_not_engine()?;
        let mut env = self.lock();
        self.invoke_locked(&mut env, method, args, true)
    }

    fn invoke_locked(
        &self,
        env: &mut MutexGuard<'_, ExecEnv>,
        method: MethodId,
        args: &[Slot],
        wait: bool,
    ) -> EngineResult<Invocation> {
        self.check_running()?;
        let invocation = env.invoke_with_args(method, args)?;
        if let Invocation::Scheduled(ticket) = invocation {
            if wait {
                env.await_ticket(ticket);
            }
            self.shared.cond.notify_all();
            if wait {
                self.wait_ticket(env, ticket)?;
            }
        }
        Ok(invocation)
    }

    /// Runs the class initializer once, waiting for it when it is interpreted.
    pub fn initialize(&self, class: ClassId) -> EngineResult<()> {
        self.check_not_engine()?;
        let mut env = self.lock();
        self.check_running()?;
        match env.begin_initialize(class)? {
            InitStep::Done => Ok(()),
            InitStep::Pending(ticket) => {
                env.await_ticket(ticket);
                self.shared.cond.notify_all();
                self.wait_ticket(&mut env, ticket)?;
                env.finish_initialize(class)
            }
        }
    }

    fn wait_ticket(&self, env: &mut MutexGuard<'_, ExecEnv>, ticket: Ticket) -> EngineResult<()> {
        loop {
            if env.take_completed(ticket) {
                return Ok(());
            }
            if self.shared.exit.load(Ordering::Acquire) {
                return Err(EngineError::EngineStopped);
            }
            self.shared.cond.wait(env);
        }
    }

    /// Nothing drains frames linked once the engine has exited; checked under
    /// the lock.
    fn check_running(&self) -> EngineResult<()> {
        if self.shared.exit.load(Ordering::Acquire) {
            return Err(EngineError::EngineStopped);
        }
        Ok(())
    }

    /// The engine thread already holds the lock while it executes a frame.
    fn check_not_engine(&self) -> EngineResult<()> {
        match self.shared.engine_thread.get() {
            Some(id) if *id == thread::current().id() => Err(EngineError::EngineThreadReentry),
            _ => Ok(()),
        }
    }
}
