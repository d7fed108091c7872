use std::process::ExitCode;

use clap::Parser;
use kava::{
    AccessFlags, CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR, ClassDefinition, EngineResult,
    ExecEnv, FrameExecutor, FrameId, FrameOutcome, MAIN_DESCRIPTOR, MAIN_METHOD,
    MethodDefinition, NativeRegistry, Slot, StartError, VM, VMCreateInfo,
};

const DEMO_CLASS: &str = "Hello";

/// Runs the built-in demo class model on the engine.
#[derive(Debug, Parser)]
#[command(name = "kava", version)]
struct Cli {
    /// class whose `main` is run
    #[arg(default_value = DEMO_CLASS)]
    class: String,
    /// integers passed to `Hello.greet`
    args: Vec<i32>,
    #[arg(long, default_value_t = kava::DEFAULT_MAX_DEPTH)]
    max_depth: usize,
    /// -v info, -vv debug, -vvv trace
    #[arg(short, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Stands in for the interpreter: `main` calls `greet` once per argument.
struct DemoExecutor {
    args: Vec<i32>,
}

impl FrameExecutor for DemoExecutor {
    fn execute(&mut self, env: &mut ExecEnv, frame: FrameId) -> EngineResult<FrameOutcome> {
        let method = env.frame(frame)?.method;
        let entry = env.classes.method(method)?;
        if entry.name != MAIN_METHOD {
            return Ok(FrameOutcome::Returned);
        }

        let Some(greet) = env.classes.find_method(method.class, "greet", "(I)V") else {
            return Ok(FrameOutcome::Returned);
        };
        let operands = env.frame(frame)?.operands;
        for &n in &self.args {
            env.buffer_mut(operands)?.push(Slot::int(n))?;
            env.invoke(greet)?;
        }
        Ok(FrameOutcome::Returned)
    }
}

fn demo_natives() -> NativeRegistry {
    let mut natives = NativeRegistry::new();
    natives.register(DEMO_CLASS, "greet", "(I)V", |_env, _this, args| {
        if let Some(n) = args.first().and_then(Slot::as_int) {
            println!("hello #{n}");
        }
        None
    });
    natives
}

fn demo_class() -> ClassDefinition {
    ClassDefinition::new(DEMO_CLASS)
        .method(
            MethodDefinition::new(CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR)
                .access(AccessFlags::STATIC),
        )
        .method(
            MethodDefinition::new(MAIN_METHOD, MAIN_DESCRIPTOR)
                .access(AccessFlags::PUBLIC | AccessFlags::STATIC)
                .max_stack(1)
                .max_locals(1),
        )
        .method(
            MethodDefinition::new("greet", "(I)V")
                .access(AccessFlags::PRIVATE | AccessFlags::STATIC | AccessFlags::NATIVE),
        )
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let vm = match VM::new(VMCreateInfo {
        max_depth: cli.max_depth,
        natives: demo_natives(),
        executor: Box::new(DemoExecutor { args: cli.args }),
        ..Default::default()
    }) {
        Ok(vm) => vm,
        Err(err) => kava::fatal(&err),
    };

    if let Err(err) = vm.lock().classes.define(demo_class()) {
        kava::fatal(&err);
    }

    match vm.start(&cli.class, &[Slot::null()]) {
        Ok(()) => {}
        Err(StartError::Engine(err)) if err.is_fatal() => kava::fatal(&err),
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }

    let stats = vm.stats();
    log::info!(
        "done, frame high water {}, buffer high water {}",
        stats.frames.high_water,
        stats.buffers.high_water
    );
    match vm.shutdown() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => kava::fatal(&err),
    }
}
