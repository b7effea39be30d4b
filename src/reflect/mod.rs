/// Reflective Object Model
///
/// Describes the types a reloadable module exports and the live values
/// built from them. Migration walks this model instead of compiled
/// layouts, so two generations of a module can disagree about a type's
/// shape and still exchange state member by member.
///
/// Key pieces:
/// - `TypeRef` - declared type of a member
/// - `TypeDesc` - a struct or class type bound to one module generation
/// - `Value` / `ObjectRef` - live data, with reference identity for classes
/// - `TypeTable` - per-module lookup and zero-value construction

pub mod object;
pub mod value;

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::module::{GameHooks, ModuleId};

pub use object::{Instance, ObjectId, ObjectRef};
pub use value::{Primitive, StructValue, Value};

/// Scalar kinds that are copied bit for bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
}

/// Declared type of a member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Primitive(PrimitiveKind),
    Text,
    /// Fixed-length sequence
    Array(Box<TypeRef>),
    /// Growable ordered collection
    List(Box<TypeRef>),
    /// Associative collection
    Map(Box<TypeRef>, Box<TypeRef>),
    /// Value type, resolved by fully-qualified name
    Struct(String),
    /// Reference type, resolved by fully-qualified name
    Class(String),
    /// A type that no copier understands; left at its default
    Opaque(String),
}

impl TypeRef {
    pub fn bool() -> Self {
        TypeRef::Primitive(PrimitiveKind::Bool)
    }

    pub fn i32() -> Self {
        TypeRef::Primitive(PrimitiveKind::I32)
    }

    pub fn i64() -> Self {
        TypeRef::Primitive(PrimitiveKind::I64)
    }

    pub fn u32() -> Self {
        TypeRef::Primitive(PrimitiveKind::U32)
    }

    pub fn f32() -> Self {
        TypeRef::Primitive(PrimitiveKind::F32)
    }

    pub fn f64() -> Self {
        TypeRef::Primitive(PrimitiveKind::F64)
    }

    pub fn array(elem: TypeRef) -> Self {
        TypeRef::Array(Box::new(elem))
    }

    pub fn list(elem: TypeRef) -> Self {
        TypeRef::List(Box::new(elem))
    }

    pub fn map(key: TypeRef, value: TypeRef) -> Self {
        TypeRef::Map(Box::new(key), Box::new(value))
    }

    pub fn structure(name: impl Into<String>) -> Self {
        TypeRef::Struct(name.into())
    }

    pub fn class(name: impl Into<String>) -> Self {
        TypeRef::Class(name.into())
    }
}

/// Struct types are copied by value, classes are shared by reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Struct,
    Class,
}

/// One member of a struct or class
#[derive(Debug, Clone)]
pub struct MemberDesc {
    pub name: String,
    pub ty: TypeRef,

    /// Generated by the compiler (closure captures, backing storage);
    /// never migrated
    pub synthesized: bool,

    /// Explicitly opted out of migration
    pub no_migrate: bool,
}

impl MemberDesc {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            synthesized: false,
            no_migrate: false,
        }
    }

    /// Whether migration should look at this member at all
    pub fn migrates(&self) -> bool {
        !self.synthesized && !self.no_migrate
    }
}

/// A type as declared by module code, before it is bound to a generation
#[derive(Clone)]
pub struct TypeDecl {
    /// Fully-qualified name, stable across generations
    pub name: String,
    pub kind: TypeKind,
    pub members: Vec<MemberDesc>,

    /// Present when the type implements the Game capability
    pub hooks: Option<GameHooks>,
}

impl std::fmt::Debug for TypeDecl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDecl")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("members", &self.members)
            .field("game", &self.hooks.is_some())
            .finish()
    }
}

/// A type bound to the module generation that exported it
#[derive(Debug)]
pub struct TypeDesc {
    module: ModuleId,
    decl: TypeDecl,
}

/// Shared handle to a type; instances hold one, which keeps the owning
/// module from being unloaded
pub type TypeHandle = Arc<TypeDesc>;

impl TypeDesc {
    pub fn new(module: ModuleId, decl: TypeDecl) -> Self {
        Self { module, decl }
    }

    pub fn module(&self) -> ModuleId {
        self.module
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn kind(&self) -> TypeKind {
        self.decl.kind
    }

    pub fn members(&self) -> &[MemberDesc] {
        &self.decl.members
    }

    pub fn member(&self, name: &str) -> Option<(usize, &MemberDesc)> {
        self.decl
            .members
            .iter()
            .enumerate()
            .find(|(_, m)| m.name == name)
    }

    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.member(name).map(|(index, _)| index)
    }

    pub fn hooks(&self) -> Option<&GameHooks> {
        self.decl.hooks.as_ref()
    }

    pub fn is_game(&self) -> bool {
        self.decl.hooks.is_some()
    }
}

/// Struct-by-value nesting deeper than this is treated as a declaration
/// error and defaulted to `Null`
const MAX_STRUCT_DEPTH: usize = 32;

/// Types exported by one module generation
#[derive(Debug, Default)]
pub struct TypeTable {
    types: Vec<TypeHandle>,
    by_name: FxHashMap<String, usize>,
}

impl TypeTable {
    /// Bind declarations to a generation. Later duplicates of a name are
    /// dropped with a warning.
    pub fn bind(module: ModuleId, decls: Vec<TypeDecl>) -> Self {
        let mut table = Self::default();

        for decl in decls {
            if table.by_name.contains_key(&decl.name) {
                log::warn!("Duplicate type '{}' in module {}, ignoring", decl.name, module);
                continue;
            }

            table.by_name.insert(decl.name.clone(), table.types.len());
            table.types.push(Arc::new(TypeDesc::new(module, decl)));
        }

        table
    }

    pub fn get(&self, name: &str) -> Option<&TypeHandle> {
        self.by_name.get(name).map(|&index| &self.types[index])
    }

    /// Type by declaration order; panics when out of range
    pub fn at(&self, index: usize) -> &TypeHandle {
        &self.types[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeHandle> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// True when no instance or struct value anywhere still holds one of
    /// these types
    pub fn is_unreferenced(&self) -> bool {
        self.types.iter().all(|ty| Arc::strong_count(ty) == 1)
    }

    /// Zero value for a declared type
    pub fn default_value(&self, ty: &TypeRef) -> Value {
        self.default_value_at(ty, 0)
    }

    fn default_value_at(&self, ty: &TypeRef, depth: usize) -> Value {
        match ty {
            TypeRef::Primitive(kind) => Value::Primitive(Primitive::zero(*kind)),
            TypeRef::Text => Value::Text(String::new()),
            TypeRef::Array(_) => Value::Array(Vec::new()),
            TypeRef::List(_) => Value::List(Vec::new()),
            TypeRef::Map(_, _) => Value::Map(Vec::new()),
            TypeRef::Struct(name) => match self.get(name) {
                Some(handle) if depth < MAX_STRUCT_DEPTH => {
                    Value::Struct(self.default_struct_at(handle, depth + 1))
                }
                _ => Value::Null,
            },
            TypeRef::Class(_) | TypeRef::Opaque(_) => Value::Null,
        }
    }

    /// A struct value with every member at its zero value
    pub fn default_struct(&self, ty: &TypeHandle) -> StructValue {
        self.default_struct_at(ty, 0)
    }

    fn default_struct_at(&self, ty: &TypeHandle, depth: usize) -> StructValue {
        let fields = ty
            .members()
            .iter()
            .map(|m| self.default_value_at(&m.ty, depth))
            .collect();
        StructValue::from_parts(ty.clone(), fields)
    }

    /// Allocate a class instance without running any module code. Every
    /// member holds its zero value until migration fills it.
    pub fn instantiate(&self, ty: &TypeHandle) -> ObjectRef {
        let fields = ty
            .members()
            .iter()
            .map(|m| self.default_value_at(&m.ty, 0))
            .collect();
        ObjectRef::new(Instance::from_parts(ty.clone(), fields))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TypeTable {
        let vector = TypeDecl {
            name: "game::Vector3".to_string(),
            kind: TypeKind::Struct,
            members: vec![
                MemberDesc::new("x", TypeRef::f32()),
                MemberDesc::new("y", TypeRef::f32()),
                MemberDesc::new("z", TypeRef::f32()),
            ],
            hooks: None,
        };
        let actor = TypeDecl {
            name: "game::Actor".to_string(),
            kind: TypeKind::Class,
            members: vec![
                MemberDesc::new("name", TypeRef::Text),
                MemberDesc::new("position", TypeRef::structure("game::Vector3")),
                MemberDesc::new("target", TypeRef::class("game::Actor")),
            ],
            hooks: None,
        };
        TypeTable::bind(ModuleId(1), vec![vector, actor])
    }

    #[test]
    fn test_instantiate_zero_fills_members() {
        let table = table();
        let actor = table.get("game::Actor").unwrap();
        let object = table.instantiate(actor);

        let instance = object.read();
        assert_eq!(instance.get("name"), Some(&Value::Text(String::new())));
        assert_eq!(instance.get("target"), Some(&Value::Null));

        let position = instance.get("position").and_then(Value::as_struct).unwrap();
        assert_eq!(position.get("x").and_then(Value::as_f32), Some(0.0));
    }

    #[test]
    fn test_unreferenced_tracks_live_instances() {
        let table = table();
        assert!(table.is_unreferenced());

        let object = table.instantiate(table.get("game::Actor").unwrap());
        assert!(!table.is_unreferenced());

        drop(object);
        assert!(table.is_unreferenced());
    }

    #[test]
    fn test_duplicate_type_names_keep_first() {
        let first = TypeDecl {
            name: "game::Thing".to_string(),
            kind: TypeKind::Class,
            members: vec![MemberDesc::new("a", TypeRef::i32())],
            hooks: None,
        };
        let mut second = first.clone();
        second.members.clear();

        let table = TypeTable::bind(ModuleId(7), vec![first, second]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("game::Thing").unwrap().members().len(), 1);
    }
}
