//! Class and method entries as handed over by the loader.
//!
//! Class files are parsed elsewhere; this module only holds the resolved shape
//! the engine needs: method tables, access flags, frame sizes and the
//! initialization state.
use std::{collections::HashMap, sync::Arc};

use bitflags::bitflags;

use crate::{EngineError, EngineResult, MethodDescriptor};

pub const CLASS_INITIALIZER: &str = "<clinit>";
pub const CLASS_INITIALIZER_DESCRIPTOR: &str = "()V";
pub const MAIN_METHOD: &str = "main";
pub const MAIN_DESCRIPTOR: &str = "([Ljava/lang/String;)V";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MethodId {
    pub class: ClassId,
    pub index: u16,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct AccessFlags: u16 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const NATIVE = 0x0100;
        const ABSTRACT = 0x0400;
    }
}

/// Ordered, a class only moves forward.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum ClassState {
    Loaded,
    Resolved,
    Initializing,
    Initialized,
}

/// Which class area a class was loaded into. Bootstrap classes shadow user
/// classes of the same name.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ClassOrigin {
    Bootstrap,
    User,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Utf8(String),
    Class(String),
    MethodRef {
        class: String,
        name: String,
        descriptor: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub fn get(&self, index: usize) -> Option<&Constant> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct MethodEntry {
    pub name: String,
    pub descriptor: String,
    pub signature: MethodDescriptor,
    pub access: AccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,
    pub class: ClassId,
}

impl MethodEntry {
    #[inline]
    pub fn is_native(&self) -> bool {
        self.access.contains(AccessFlags::NATIVE)
    }

    #[inline]
    pub fn is_static(&self) -> bool {
        self.access.contains(AccessFlags::STATIC)
    }

    fn is_entry_point(&self) -> bool {
        self.name == MAIN_METHOD
            && self.descriptor == MAIN_DESCRIPTOR
            && self.access.contains(AccessFlags::PUBLIC | AccessFlags::STATIC)
    }
}

#[derive(Debug, Clone)]
pub struct ClassEntry {
    pub name: String,
    pub origin: ClassOrigin,
    pub methods: Vec<MethodEntry>,
    pub constant_pool: Arc<ConstantPool>,
    pub state: ClassState,
}

/// Loader-side description of a method.
#[derive(Debug, Clone)]
pub struct MethodDefinition {
    pub name: String,
    pub descriptor: String,
    pub access: AccessFlags,
    pub max_stack: u16,
    pub max_locals: u16,
}

impl MethodDefinition {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
            access: AccessFlags::empty(),
            max_stack: 0,
            max_locals: 0,
        }
    }

    pub fn access(mut self, access: AccessFlags) -> Self {
        self.access = access;
        self
    }

    pub fn max_stack(mut self, max_stack: u16) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn max_locals(mut self, max_locals: u16) -> Self {
        self.max_locals = max_locals;
        self
    }
}

/// Loader-side description of a class.
#[derive(Debug, Clone)]
pub struct ClassDefinition {
    pub name: String,
    pub origin: ClassOrigin,
    pub methods: Vec<MethodDefinition>,
    pub constant_pool: ConstantPool,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            origin: ClassOrigin::User,
            methods: Vec::new(),
            constant_pool: ConstantPool::default(),
        }
    }

    pub fn origin(mut self, origin: ClassOrigin) -> Self {
        self.origin = origin;
        self
    }

    pub fn method(mut self, method: MethodDefinition) -> Self {
        self.methods.push(method);
        self
    }

    pub fn constant_pool(mut self, pool: ConstantPool) -> Self {
        self.constant_pool = pool;
        self
    }
}

/// Every loaded class, bootstrap and user areas.
#[derive(Debug, Default)]
pub struct ClassRegistry {
    classes: Vec<ClassEntry>,
    bootstrap: HashMap<String, ClassId, ahash::RandomState>,
    user: HashMap<String, ClassId, ahash::RandomState>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a loaded class in state `Loaded`.
    pub fn define(&mut self, def: ClassDefinition) -> EngineResult<ClassId> {
        let area = match def.origin {
            ClassOrigin::Bootstrap => &self.bootstrap,
            ClassOrigin::User => &self.user,
        };
        if area.contains_key(&def.name) {
            return Err(EngineError::DuplicateClass(def.name));
        }

        let id = u32::try_from(self.classes.len())
            .map(ClassId)
            .map_err(|_| EngineError::TooManyClasses(self.classes.len()))?;
        // method ids index with a u16
        if def.methods.len() > usize::from(u16::MAX) + 1 {
            return Err(EngineError::TooManyMethods {
                class: def.name,
                count: def.methods.len(),
            });
        }
        let methods = def
            .methods
            .into_iter()
            .map(|m| {
                Ok(MethodEntry {
                    signature: MethodDescriptor::parse(&m.descriptor)?,
                    name: m.name,
                    descriptor: m.descriptor,
                    access: m.access,
                    max_stack: m.max_stack,
                    max_locals: m.max_locals,
                    class: id,
                })
            })
            .collect::<EngineResult<Vec<_>>>()?;

        match def.origin {
            ClassOrigin::Bootstrap => self.bootstrap.insert(def.name.clone(), id),
            ClassOrigin::User => self.user.insert(def.name.clone(), id),
        };
        log::debug!("loaded class {} as {:?}", def.name, id);
        self.classes.push(ClassEntry {
            name: def.name,
            origin: def.origin,
            methods,
            constant_pool: Arc::new(def.constant_pool),
            state: ClassState::Loaded,
        });
        Ok(id)
    }

    /// Bootstrap area first, then user classes.
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.bootstrap
            .get(name)
            .or_else(|| self.user.get(name))
            .copied()
    }

    pub fn find_method(
        &self,
        class: ClassId,
        name: &str,
        descriptor: &str,
    ) -> Option<MethodId> {
        let entry = self.classes.get(class.0 as usize)?;
        entry
            .methods
            .iter()
            .position(|m| m.name == name && m.descriptor == descriptor)
            .and_then(|index| method_id(class, index))
    }

    /// `public static void main(String[])`
    pub fn find_entry_point(&self, class: ClassId) -> Option<MethodId> {
        let entry = self.classes.get(class.0 as usize)?;
        entry
            .methods
            .iter()
            .position(MethodEntry::is_entry_point)
            .and_then(|index| method_id(class, index))
    }

    pub fn class(&self, id: ClassId) -> EngineResult<&ClassEntry> {
        self.classes
            .get(id.0 as usize)
            .ok_or(EngineError::UnknownClass(id))
    }

    pub fn class_mut(&mut self, id: ClassId) -> EngineResult<&mut ClassEntry> {
        self.classes
            .get_mut(id.0 as usize)
            .ok_or(EngineError::UnknownClass(id))
    }

    pub fn method(&self, id: MethodId) -> EngineResult<&MethodEntry> {
        self.classes
            .get(id.class.0 as usize)
            .and_then(|c| c.methods.get(id.index as usize))
            .ok_or(EngineError::UnknownMethod(id))
    }

    /// Loader transition `Loaded -> Resolved`; later states are left alone.
    pub fn link(&mut self, id: ClassId) -> EngineResult<()> {
        let class = self.class_mut(id)?;
        if class.state == ClassState::Loaded {
            class.state = ClassState::Resolved;
            log::debug!("linked class {}", class.name);
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

fn method_id(class: ClassId, index: usize) -> Option<MethodId> {
    u16::try_from(index)
        .ok()
        .map(|index| MethodId { class, index })
}
