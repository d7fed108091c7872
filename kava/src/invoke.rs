//! The method invocation protocol.
//!
//! Native methods run right away on the calling thread. Interpreted methods get
//! a pooled frame whose locals are filled from the caller's operand stack, the
//! frame is linked onto the call stack and left for the engine loop.
use std::{mem, sync::Arc};

use crate::{
    AccessFlags, BufferId, EngineError, EngineResult, ExecEnv, Frame, FrameId, MethodId,
    ObjectRef, PoolKind, ResolutionFailure, Slot, Ticket,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    /// Interpreted frame linked onto the call stack, not yet executed.
    Scheduled(Ticket),
    /// Native method ran to completion. Carries the value it pushed onto the
    /// caller operand stack, if any.
    Native(Option<Slot>),
    /// No native implementation was registered, the call was skipped.
    NativeUnresolved,
}

impl ExecEnv {
    /// A call made by running code: arguments come off the top frame's operand
    /// stack, or the entry operand stack while no frame is linked.
    pub fn invoke(&mut self, method: MethodId) -> EngineResult<Invocation> {
        let caller = self.caller_operands()?;
        let available = self.buffer(caller)?.valid_count();
        self.invoke_from(method, caller, available)
    }

    /// A call made from outside the engine. Only `args` are passed, whatever
    /// is linked on the call stack. They are staged on the entry operand stack,
    /// which is left as it was found; surplus slots and a native's return value
    /// are dropped from it.
    pub fn invoke_with_args(
        &mut self,
        method: MethodId,
        args: &[Slot],
    ) -> EngineResult<Invocation> {
        let entry = self.entry_operands;
        let base = self.buffer(entry)?.valid_count();
        self.pools.ensure_capacity(entry, base + args.len())?;

        let staged = args
            .iter()
            .try_for_each(|slot| self.buffer_mut(entry)?.push(*slot));
        let result = staged.and_then(|()| self.invoke_from(method, entry, args.len()));
        self.buffer_mut(entry)?.set_valid_count(base)?;
        result
    }

    /// `available` bounds how many slots the callee may take from `caller`.
    fn invoke_from(
        &mut self,
        method: MethodId,
        caller: BufferId,
        available: usize,
    ) -> EngineResult<Invocation> {
        let entry = self.classes.method(method)?;
        if entry.access.contains(AccessFlags::ABSTRACT) {
            return Err(EngineError::AbstractMethod(entry.name.clone()));
        }
        if entry.is_native() {
            return self.invoke_native(method, caller, available);
        }
        self.invoke_interpreted(method, caller, available)
            .map(Invocation::Scheduled)
    }

    fn invoke_native(
        &mut self,
        method: MethodId,
        caller: BufferId,
        available: usize,
    ) -> EngineResult<Invocation> {
        let entry = self.classes.method(method)?;
        let class_name = &self.classes.class(entry.class)?.name;
        log::debug!("<native {}.{}:{}>", class_name, entry.name, entry.descriptor);

        let Some(native) = self.natives.resolve(class_name, entry) else {
            let failure = ResolutionFailure {
                class: class_name.clone(),
                method: entry.name.clone(),
                descriptor: entry.descriptor.clone(),
            };
            log::warn!("failed to resolve native method {failure}");
            self.resolution_failures.push(failure);
            return Ok(Invocation::NativeUnresolved);
        };

        let receiver_count = usize::from(!entry.is_static());
        let arity = entry.signature.arity();
        let returns_value = entry.signature.returns_value();
        let needed = arity + receiver_count;

        if needed > available {
            return Err(EngineError::OperandUnderflow {
                required: needed,
                available,
            });
        }

        let mut args = mem::take(&mut self.native_args);
        args.clear();

        let receiver = {
            let operands = self.buffer(caller)?;
            let slots = operands
                .peek_slice(needed)
                .ok_or(EngineError::OperandUnderflow {
                    required: needed,
                    available: operands.valid_count(),
                })?;
            args.extend_from_slice(&slots[receiver_count..]);
            match receiver_count {
                0 => None,
                _ => Some(self.receiver_object(slots[0])?),
            }
        };
        self.buffer_mut(caller)?
            .truncate_top(needed)
            .ok_or(EngineError::OperandUnderflow {
                required: needed,
                available,
            })?;

        let result = native(self, receiver, &args);
        self.native_args = args;

        match (returns_value, result) {
            (true, Some(slot)) => {
                self.buffer_mut(caller)?.push(slot)?;
                Ok(Invocation::Native(Some(slot)))
            }
            _ => Ok(Invocation::Native(None)),
        }
    }

    fn receiver_object(&self, slot: Slot) -> EngineResult<ObjectRef> {
        let handle = slot.as_reference().ok_or(EngineError::InvalidReceiver)?;
        let handle = self
            .pools
            .handle(handle)
            .ok_or(EngineError::InvalidReceiver)?;
        match (handle.class, handle.object) {
            (Some(_), Some(object)) => Ok(object),
            _ => Err(EngineError::InvalidReceiver),
        }
    }

    fn invoke_interpreted(
        &mut self,
        method: MethodId,
        caller: BufferId,
        available: usize,
    ) -> EngineResult<Ticket> {
        let entry = self.classes.method(method)?;
        let max_stack = entry.max_stack as usize;
        let max_locals = entry.max_locals as usize;
        let constant_pool = Arc::clone(&self.classes.class(entry.class)?.constant_pool);
        log::debug!("invoke {}:{}", entry.name, entry.descriptor);

        if self.stack.depth() >= self.stack.max_depth() {
            return Err(EngineError::StackOverflow {
                max_depth: self.stack.max_depth(),
            });
        }

        if available < max_locals {
            return Err(EngineError::OperandUnderflow {
                required: max_locals,
                available,
            });
        }

        let frame_id = self.pools.frames.acquire()?;
        let operands = match self.pools.acquire_buffer(max_stack) {
            Ok(id) => id,
            Err(err) => {
                self.pools.frames.release(frame_id)?;
                return Err(err);
            }
        };
        let locals = match self.pools.acquire_buffer(max_locals) {
            Ok(id) => id,
            Err(err) => {
                self.pools.buffers.release(operands)?;
                self.pools.frames.release(frame_id)?;
                return Err(err);
            }
        };

        self.transfer_arguments(caller, locals, max_locals)?;

        let id = self
            .pools
            .frames
            .serial(frame_id)
            .ok_or(EngineError::NotAcquired {
                pool: PoolKind::Frame,
                index: frame_id.0 as usize,
            })?;
        let frame = Frame {
            id,
            return_pc: self.pc,
            method,
            locals,
            operands,
            constant_pool,
        };
        let ticket = frame.ticket();
        self.link_frame(frame_id, frame)?;
        Ok(ticket)
    }

    /// Pops `count` slots off the caller; the last pushed becomes the highest
    /// local.
    fn transfer_arguments(
        &mut self,
        caller: BufferId,
        locals: BufferId,
        count: usize,
    ) -> EngineResult<()> {
        let (from, to) = self.pools.buffers.get_pair_mut(caller, locals).ok_or(
            EngineError::NotAcquired {
                pool: PoolKind::SlotBuffer,
                index: caller.0 as usize,
            },
        )?;
        to.set_valid_count(count)?;
        for index in (0..count).rev() {
            let slot = from.pop().ok_or(EngineError::OperandUnderflow {
                required: count,
                available: count - index - 1,
            })?;
            to.set(index, slot)?;
        }
        Ok(())
    }

    fn link_frame(&mut self, frame_id: FrameId, frame: Frame) -> EngineResult<()> {
        let frame_serial = frame.id;
        let slot = self
            .pools
            .frames
            .get_mut(frame_id)
            .ok_or(EngineError::NotAcquired {
                pool: PoolKind::Frame,
                index: frame_id.0 as usize,
            })?;
        *slot = Some(frame);
        self.stack.push(frame_id)?;
        log::trace!(
            "pushed frame {} (depth {})",
            frame_serial,
            self.stack.depth()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    };

    use super::*;
    use crate::{
        ClassDefinition, ClassId, EnvCreateInfo, MethodDefinition, NativeRegistry,
        PoolCreateInfo,
    };

    fn env_with(natives: NativeRegistry, max_depth: usize) -> ExecEnv {
        ExecEnv::new(
            &EnvCreateInfo {
                max_depth,
                pools: PoolCreateInfo::for_depth(max_depth),
            },
            natives,
        )
        .unwrap()
    }

    fn define(env: &mut ExecEnv, def: ClassDefinition) -> ClassId {
        let id = env.classes.define(def).unwrap();
        env.classes.link(id).unwrap();
        id
    }

    fn method(env: &ExecEnv, class: ClassId, name: &str, desc: &str) -> MethodId {
        env.classes.find_method(class, name, desc).unwrap()
    }

    fn top_locals(env: &ExecEnv) -> Vec<Slot> {
        let frame = env.frame(env.stack.peek().unwrap()).unwrap();
        env.buffer(frame.locals).unwrap().as_slice().to_vec()
    }

    #[test]
    fn locals_receive_arguments_in_push_order() {
        let mut env = env_with(NativeRegistry::new(), 8);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(
                MethodDefinition::new("f", "(III)V")
                    .access(AccessFlags::STATIC)
                    .max_stack(2)
                    .max_locals(3),
            ),
        );
        let f = method(&env, class, "f", "(III)V");

        let entry = env.entry_operands_mut().unwrap();
        entry.push(Slot::int(100)).unwrap();
        for v in [1, 2, 3] {
            entry.push(Slot::int(v)).unwrap();
        }

        let inv = env.invoke(f).unwrap();
        assert!(matches!(inv, Invocation::Scheduled(_)));
        assert_eq!(env.stack.depth(), 1);
        assert_eq!(
            top_locals(&env),
            vec![Slot::int(1), Slot::int(2), Slot::int(3)]
        );
        assert_eq!(env.entry_operands_mut().unwrap().as_slice(), &[Slot::int(100)]);

        let frame = env.frame(env.stack.peek().unwrap()).unwrap();
        assert!(env.buffer(frame.operands).unwrap().capacity() >= 2);
    }

    #[test]
    fn arguments_come_from_the_top_frame() {
        let mut env = env_with(NativeRegistry::new(), 8);
        let class = define(
            &mut env,
            ClassDefinition::new("A")
                .method(MethodDefinition::new("outer", "()V").max_stack(4))
                .method(MethodDefinition::new("inner", "(JD)V").max_locals(2)),
        );
        env.invoke(method(&env, class, "outer", "()V")).unwrap();
        let outer_ops = env.caller_operands().unwrap();
        let ops = env.buffer_mut(outer_ops).unwrap();
        ops.push(Slot::long(7)).unwrap();
        ops.push(Slot::double(0.5)).unwrap();

        env.invoke(method(&env, class, "inner", "(JD)V")).unwrap();
        assert_eq!(env.stack.depth(), 2);
        assert_eq!(top_locals(&env), vec![Slot::long(7), Slot::double(0.5)]);
        assert_eq!(env.buffer(outer_ops).unwrap().valid_count(), 0);
    }

    #[test]
    fn too_few_caller_slots_leaves_everything_untouched() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(MethodDefinition::new("f", "(II)V").max_locals(2)),
        );
        env.entry_operands_mut().unwrap().push(Slot::int(1)).unwrap();
        let before = env.stats();

        assert_eq!(
            env.invoke(method(&env, class, "f", "(II)V")),
            Err(EngineError::OperandUnderflow {
                required: 2,
                available: 1
            })
        );
        assert_eq!(env.stats(), before);
        assert_eq!(env.entry_operands_mut().unwrap().valid_count(), 1);
    }

    #[test]
    fn overflow_past_max_depth() {
        let mut env = env_with(NativeRegistry::new(), 3);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(MethodDefinition::new("f", "()V")),
        );
        let f = method(&env, class, "f", "()V");
        for _ in 0..3 {
            env.invoke(f).unwrap();
        }
        assert_eq!(
            env.invoke(f),
            Err(EngineError::StackOverflow { max_depth: 3 })
        );

        env.pop_frame().unwrap();
        env.invoke(f).unwrap();
        assert_eq!(env.stack.depth(), 3);
    }

    #[test]
    fn pop_releases_frame_and_buffers() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(MethodDefinition::new("f", "()V").max_stack(3)),
        );
        let f = method(&env, class, "f", "()V");
        let idle = env.stats();

        env.pc = 42;
        env.invoke(f).unwrap();
        assert_eq!(env.stats().frames.in_use, 1);
        assert_eq!(env.stats().buffers.in_use, idle.buffers.in_use + 2);

        env.pc = 7;
        let frame = env.pop_frame().unwrap();
        assert_eq!(frame.return_pc, 42);
        assert_eq!(env.pc, 42);
        assert_eq!(env.stats().frames.in_use, 0);
        assert_eq!(env.stats().buffers.in_use, idle.buffers.in_use);
        assert_eq!(env.pop_frame().unwrap_err(), EngineError::StackUnderflow);
    }

    #[test]
    fn frame_ids_come_from_the_pool() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(MethodDefinition::new("f", "()V")),
        );
        let f = method(&env, class, "f", "()V");
        let Invocation::Scheduled(first) = env.invoke(f).unwrap() else {
            panic!("expected a frame");
        };
        let Invocation::Scheduled(second) = env.invoke(f).unwrap() else {
            panic!("expected a frame");
        };
        assert_eq!(first, Ticket(0));
        assert_eq!(second, Ticket(1));
    }

    #[test]
    fn missing_native_is_recorded_and_skipped() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(
                MethodDefinition::new("nop", "(I)V")
                    .access(AccessFlags::NATIVE | AccessFlags::STATIC),
            ),
        );
        env.entry_operands_mut().unwrap().push(Slot::int(1)).unwrap();

        let inv = env.invoke(method(&env, class, "nop", "(I)V")).unwrap();
        assert_eq!(inv, Invocation::NativeUnresolved);
        assert_eq!(env.stack.depth(), 0);
        assert_eq!(env.entry_operands_mut().unwrap().valid_count(), 1);
        assert_eq!(
            env.resolution_failures(),
            &[ResolutionFailure {
                class: "A".into(),
                method: "nop".into(),
                descriptor: "(I)V".into(),
            }]
        );
    }

    #[test]
    fn static_native_gets_all_arguments_and_returns() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut natives = NativeRegistry::new();
        let sink = Arc::clone(&seen);
        natives.register("M", "sum", "(IIJ)J", move |_, receiver, args| {
            assert!(receiver.is_none());
            sink.lock().unwrap().extend_from_slice(args);
            let total = args[0].as_int()? as i64 + args[1].as_int()? as i64 + args[2].as_long()?;
            Some(Slot::long(total))
        });
        let mut env = env_with(natives, 4);
        let class = define(
            &mut env,
            ClassDefinition::new("M").method(
                MethodDefinition::new("sum", "(IIJ)J")
                    .access(AccessFlags::NATIVE | AccessFlags::STATIC),
            ),
        );
        let entry = env.entry_operands_mut().unwrap();
        entry.push(Slot::int(1)).unwrap();
        entry.push(Slot::int(2)).unwrap();
        entry.push(Slot::long(3)).unwrap();

        let inv = env.invoke(method(&env, class, "sum", "(IIJ)J")).unwrap();
        assert_eq!(inv, Invocation::Native(Some(Slot::long(6))));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![Slot::int(1), Slot::int(2), Slot::long(3)]
        );
        assert_eq!(env.entry_operands_mut().unwrap().as_slice(), &[Slot::long(6)]);
    }

    #[test]
    fn instance_native_receives_the_receiver_object() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut natives = NativeRegistry::new();
        natives.register("java/io/PrintStream", "println", "(I)V", move |_, receiver, args| {
            assert_eq!(receiver, ObjectRef::new(0x40));
            assert_eq!(args, &[Slot::int(9)]);
            counter.fetch_add(1, Ordering::SeqCst);
            None
        });
        let mut env = env_with(natives, 4);
        let class = define(
            &mut env,
            ClassDefinition::new("java/io/PrintStream").method(
                MethodDefinition::new("println", "(I)V").access(AccessFlags::NATIVE),
            ),
        );
        let out = env
            .new_reference(class, ObjectRef::new(0x40).unwrap())
            .unwrap();
        let entry = env.entry_operands_mut().unwrap();
        entry.push(out).unwrap();
        entry.push(Slot::int(9)).unwrap();

        let println = method(&env, class, "println", "(I)V");
        assert_eq!(env.invoke(println).unwrap(), Invocation::Native(None));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(env.entry_operands_mut().unwrap().is_empty());
    }

    #[test]
    fn null_receiver_is_rejected_before_popping() {
        let mut natives = NativeRegistry::new();
        natives.register("A", "g", "()V", |_, _, _| None);
        let mut env = env_with(natives, 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A")
                .method(MethodDefinition::new("g", "()V").access(AccessFlags::NATIVE)),
        );
        env.entry_operands_mut().unwrap().push(Slot::null()).unwrap();

        assert_eq!(
            env.invoke(method(&env, class, "g", "()V")),
            Err(EngineError::InvalidReceiver)
        );
        assert_eq!(env.entry_operands_mut().unwrap().valid_count(), 1);
    }

    #[test]
    fn abstract_methods_cannot_be_invoked() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A")
                .method(MethodDefinition::new("f", "()V").access(AccessFlags::ABSTRACT)),
        );
        assert_eq!(
            env.invoke(method(&env, class, "f", "()V")),
            Err(EngineError::AbstractMethod("f".into()))
        );
    }

    #[test]
    fn outside_calls_ignore_the_linked_frames() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A")
                .method(MethodDefinition::new("pending", "()V").max_stack(2))
                .method(MethodDefinition::new("g", "(I)V").max_locals(1)),
        );
        env.invoke(method(&env, class, "pending", "()V")).unwrap();
        let pending_ops = env.caller_operands().unwrap();
        env.buffer_mut(pending_ops).unwrap().push(Slot::int(99)).unwrap();

        let g = method(&env, class, "g", "(I)V");
        let inv = env.invoke_with_args(g, &[Slot::int(7)]).unwrap();
        assert!(matches!(inv, Invocation::Scheduled(_)));
        assert_eq!(env.stack.depth(), 2);
        assert_eq!(top_locals(&env), vec![Slot::int(7)]);
        assert_eq!(env.buffer(pending_ops).unwrap().as_slice(), &[Slot::int(99)]);
        assert!(env.entry_operands_mut().unwrap().is_empty());
    }

    #[test]
    fn outside_calls_take_only_their_own_arguments() {
        let mut env = env_with(NativeRegistry::new(), 4);
        let class = define(
            &mut env,
            ClassDefinition::new("A").method(MethodDefinition::new("f", "(II)V").max_locals(2)),
        );
        env.entry_operands_mut().unwrap().push(Slot::int(1)).unwrap();

        let f = method(&env, class, "f", "(II)V");
        assert_eq!(
            env.invoke_with_args(f, &[Slot::int(2)]),
            Err(EngineError::OperandUnderflow {
                required: 2,
                available: 1
            })
        );
        assert_eq!(env.entry_operands_mut().unwrap().as_slice(), &[Slot::int(1)]);
        assert_eq!(env.stats().frames.in_use, 0);
        assert_eq!(env.stats().buffers.in_use, 1);
    }

    #[test]
    fn outside_native_call_hands_back_its_result() {
        let mut natives = NativeRegistry::new();
        natives.register("M", "neg", "(I)I", |_, _, args| {
            Some(Slot::int(-args[0].as_int()?))
        });
        let mut env = env_with(natives, 4);
        let class = define(
            &mut env,
            ClassDefinition::new("M").method(
                MethodDefinition::new("neg", "(I)I")
                    .access(AccessFlags::NATIVE | AccessFlags::STATIC),
            ),
        );

        let neg = method(&env, class, "neg", "(I)I");
        assert_eq!(
            env.invoke_with_args(neg, &[Slot::int(5), Slot::int(8)]),
            Ok(Invocation::Native(Some(Slot::int(-8))))
        );
        assert!(env.entry_operands_mut().unwrap().is_empty());
    }
}
