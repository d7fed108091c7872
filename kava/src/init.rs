use crate::{
    CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR, ClassId, ClassState, EngineError,
    EngineResult, ExecEnv, Invocation, Ticket,
};

/// What `begin_initialize` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStep {
    /// The class is initialized, nothing left to do.
    Done,
    /// The initializer frame is scheduled; call `finish_initialize` once the
    /// ticket completes.
    Pending(Ticket),
}

impl ExecEnv {
    /// First half of class initialization, runs under the VM lock.
    ///
    /// Re-entry while the class is `Initializing` is fatal: initialization is
    /// single threaded and non re-entrant.
    pub fn begin_initialize(&mut self, class: ClassId) -> EngineResult<InitStep> {
        let entry = self.classes.class(class)?;
        match entry.state {
            ClassState::Initialized => return Ok(InitStep::Done),
            ClassState::Initializing => {
                return Err(EngineError::ConcurrentInitializationUnsupported(
                    entry.name.clone(),
                ));
            }
            ClassState::Loaded => return Err(EngineError::ClassNotResolved(entry.name.clone())),
            ClassState::Resolved => {}
        }

        let Some(initializer) =
            self.classes
                .find_method(class, CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR)
        else {
            let entry = self.classes.class_mut(class)?;
            entry.state = ClassState::Initialized;
            log::debug!("class {} has no initializer", entry.name);
            return Ok(InitStep::Done);
        };

        self.set_class_state(class, ClassState::Initializing)?;
        match self.invoke_with_args(initializer, &[]) {
            Ok(Invocation::Scheduled(ticket)) => Ok(InitStep::Pending(ticket)),
            // a native initializer has already run or was skipped
            Ok(Invocation::Native(_) | Invocation::NativeUnresolved) => {
                self.set_class_state(class, ClassState::Initialized)?;
                Ok(InitStep::Done)
            }
            Err(err) => {
                self.set_class_state(class, ClassState::Resolved)?;
                Err(err)
            }
        }
    }

    /// Second half, after the initializer frame returned normally.
    pub fn finish_initialize(&mut self, class: ClassId) -> EngineResult<()> {
        self.set_class_state(class, ClassState::Initialized)
    }

    fn set_class_state(&mut self, class: ClassId, state: ClassState) -> EngineResult<()> {
        let entry = self.classes.class_mut(class)?;
        log::debug!("class {}: {:?} -> {:?}", entry.name, entry.state, state);
        entry.state = state;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AccessFlags, ClassDefinition, EnvCreateInfo, MethodDefinition, NativeRegistry, Slot,
    };

    fn env() -> ExecEnv {
        ExecEnv::new(&EnvCreateInfo::default(), NativeRegistry::new()).unwrap()
    }

    fn clinit() -> MethodDefinition {
        MethodDefinition::new(CLASS_INITIALIZER, CLASS_INITIALIZER_DESCRIPTOR)
            .access(AccessFlags::STATIC)
            .max_stack(1)
    }

    #[test]
    fn without_initializer_goes_straight_to_initialized() {
        let mut env = env();
        let class = env.classes.define(ClassDefinition::new("A")).unwrap();
        env.classes.link(class).unwrap();

        assert_eq!(env.begin_initialize(class), Ok(InitStep::Done));
        assert_eq!(env.classes.class(class).unwrap().state, ClassState::Initialized);
        assert!(env.stack.is_empty());
    }

    #[test]
    fn initializer_is_scheduled_once() {
        let mut env = env();
        let class = env
            .classes
            .define(ClassDefinition::new("A").method(clinit()))
            .unwrap();
        env.classes.link(class).unwrap();

        let InitStep::Pending(_) = env.begin_initialize(class).unwrap() else {
            panic!("initializer should be scheduled");
        };
        assert_eq!(env.classes.class(class).unwrap().state, ClassState::Initializing);
        assert_eq!(env.stack.depth(), 1);

        env.pop_frame().unwrap();
        env.finish_initialize(class).unwrap();
        assert_eq!(env.begin_initialize(class), Ok(InitStep::Done));
        assert!(env.stack.is_empty());
    }

    #[test]
    fn reentry_while_initializing_is_fatal() {
        let mut env = env();
        let class = env
            .classes
            .define(ClassDefinition::new("A").method(clinit()))
            .unwrap();
        env.classes.link(class).unwrap();
        env.begin_initialize(class).unwrap();

        let err = env.begin_initialize(class).unwrap_err();
        assert_eq!(
            err,
            EngineError::ConcurrentInitializationUnsupported("A".into())
        );
        assert!(err.is_fatal());
        assert_eq!(env.stack.depth(), 1);
    }

    #[test]
    fn unresolved_class_is_refused() {
        let mut env = env();
        let class = env.classes.define(ClassDefinition::new("A")).unwrap();
        assert_eq!(
            env.begin_initialize(class),
            Err(EngineError::ClassNotResolved("A".into()))
        );
    }

    #[test]
    fn failed_invocation_rolls_back_the_state() {
        let mut env = env();
        let class = env
            .classes
            .define(ClassDefinition::new("A").method(clinit().max_locals(1)))
            .unwrap();
        env.classes.link(class).unwrap();

        assert!(matches!(
            env.begin_initialize(class),
            Err(EngineError::OperandUnderflow { .. })
        ));
        assert_eq!(env.classes.class(class).unwrap().state, ClassState::Resolved);

        // stray entry slots are never taken as initializer arguments
        env.entry_operands_mut().unwrap().push(Slot::int(0)).unwrap();
        assert!(matches!(
            env.begin_initialize(class),
            Err(EngineError::OperandUnderflow { .. })
        ));
        assert_eq!(env.entry_operands_mut().unwrap().valid_count(), 1);
        assert_eq!(env.stats().frames.in_use, 0);
    }

    #[test]
    fn initializer_is_scheduled_above_pending_frames() {
        let mut env = env();
        let class = env
            .classes
            .define(
                ClassDefinition::new("A")
                    .method(clinit())
                    .method(MethodDefinition::new("f", "(I)V").max_locals(1)),
            )
            .unwrap();
        env.classes.link(class).unwrap();
        let f = env.classes.find_method(class, "f", "(I)V").unwrap();
        env.invoke_with_args(f, &[Slot::int(3)]).unwrap();

        assert!(matches!(env.begin_initialize(class), Ok(InitStep::Pending(_))));
        assert_eq!(env.stack.depth(), 2);
    }
}
