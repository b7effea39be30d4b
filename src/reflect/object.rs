use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::{TypeHandle, Value};

/// Identity of a live object, valid while the object is alive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId(usize);

/// Storage of a class instance
#[derive(Debug)]
pub struct Instance {
    ty: TypeHandle,
    fields: Vec<Value>,
}

impl Instance {
    pub(crate) fn from_parts(ty: TypeHandle, fields: Vec<Value>) -> Self {
        debug_assert_eq!(ty.members().len(), fields.len());
        Self { ty, fields }
    }

    pub fn type_handle(&self) -> &TypeHandle {
        &self.ty
    }

    pub fn fields(&self) -> &[Value] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.ty.member_index(name).map(|i| &self.fields[i])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Value> {
        self.ty.member_index(name).map(move |i| &mut self.fields[i])
    }

    /// Returns false when the type has no member of that name
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.ty.member_index(name) {
            Some(index) => {
                self.fields[index] = value.into();
                true
            }
            None => false,
        }
    }

    pub(crate) fn set_slot(&mut self, index: usize, value: Value) {
        self.fields[index] = value;
    }

    /// Drop every outgoing reference of a retired instance
    pub(crate) fn sever(&mut self) {
        for field in &mut self.fields {
            *field = Value::Null;
        }
    }
}

/// Shared handle to a class instance. Clones alias the same object;
/// equality compares identity, never contents.
#[derive(Clone)]
pub struct ObjectRef(Arc<RwLock<Instance>>);

impl ObjectRef {
    pub fn new(instance: Instance) -> Self {
        Self(Arc::new(RwLock::new(instance)))
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Instance> {
        self.0.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Instance> {
        self.0.write()
    }

    pub fn id(&self) -> ObjectId {
        ObjectId(Arc::as_ptr(&self.0) as *const () as usize)
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn type_handle(&self) -> TypeHandle {
        self.0.read().ty.clone()
    }

    pub fn type_name(&self) -> String {
        self.0.read().ty.name().to_string()
    }

    /// Cloned member value
    pub fn get(&self, name: &str) -> Option<Value> {
        self.0.read().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) -> bool {
        self.0.write().set(name, value)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjectRef {}

// Object graphs may be cyclic, so never print through the reference
impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.try_read() {
            Some(instance) => write!(f, "ObjectRef({}@{:#x})", instance.ty.name(), self.id().0),
            None => write!(f, "ObjectRef(<locked>@{:#x})", self.id().0),
        }
    }
}
