use std::{collections::HashMap, fmt, sync::Arc};

use crate::{ExecEnv, MethodEntry, ObjectRef, Slot};

/// A native method body.
///
/// Receives the environment, the receiver object (`None` for static methods)
/// and the arguments in declaration order. A returned slot is pushed onto the
/// caller's operand stack when the descriptor declares a return value.
pub type NativeFn =
    Arc<dyn Fn(&mut ExecEnv, Option<ObjectRef>, &[Slot]) -> Option<Slot> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NativeKey {
    class: String,
    name: String,
    descriptor: String,
}

/// Natives keyed by class name, method name and descriptor.
#[derive(Default, Clone)]
pub struct NativeRegistry {
    natives: HashMap<NativeKey, NativeFn, ahash::RandomState>,
}

/// A native method that had no registered implementation when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionFailure {
    pub class: String,
    pub method: String,
    pub descriptor: String,
}

impl NativeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        class: impl Into<String>,
        name: impl Into<String>,
        descriptor: impl Into<String>,
        f: F,
    ) where
        F: Fn(&mut ExecEnv, Option<ObjectRef>, &[Slot]) -> Option<Slot> + Send + Sync + 'static,
    {
        let key = NativeKey {
            class: class.into(),
            name: name.into(),
            descriptor: descriptor.into(),
        };
        self.natives.insert(key, Arc::new(f));
    }

    pub fn resolve(&self, class: &str, method: &MethodEntry) -> Option<NativeFn> {
        let key = NativeKey {
            class: class.to_owned(),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
        };
        self.natives.get(&key).cloned()
    }

    pub fn len(&self) -> usize {
        self.natives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.natives.is_empty()
    }
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("natives", &self.natives.len())
            .finish()
    }
}

impl fmt::Display for ResolutionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}:{}", self.class, self.method, self.descriptor)
    }
}
