/// Member Copiers
///
/// Each copier handles one category of declared member type. The chain is
/// tried most-specific first and the first copier whose `can_handle`
/// accepts the target type owns the member; no other copier is tried.

use std::sync::Arc;

use crate::reflect::{TypeKind, TypeRef, Value};

use super::{describe, SkipReason, Upgrader};

/// Copies one kind of member from an old instance into a new one
pub trait MemberCopier: Send + Sync {
    fn name(&self) -> &'static str;

    fn can_handle(&self, target: &TypeRef) -> bool;

    /// Produce the value for a member of type `target` from the old value
    fn copy(&self, upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason>;
}

/// Ordered copier chain
pub type CopierChain = Arc<[Box<dyn MemberCopier>]>;

/// The standard chain: array, primitive, text, collection, struct, class
pub fn default_chain() -> CopierChain {
    let chain: Vec<Box<dyn MemberCopier>> = vec![
        Box::new(ArrayCopier),
        Box::new(PrimitiveCopier),
        Box::new(TextCopier),
        Box::new(CollectionCopier),
        Box::new(StructCopier),
        Box::new(ClassCopier),
    ];
    chain.into()
}

fn mismatch(target: &TypeRef, old: &Value) -> SkipReason {
    SkipReason::Mismatch {
        expected: format!("{:?}", target),
        found: describe(old),
    }
}

/// Fixed-length sequences. Length is kept; elements that fail fall back
/// to the element type's zero value.
pub struct ArrayCopier;

impl MemberCopier for ArrayCopier {
    fn name(&self) -> &'static str {
        "array"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::Array(_))
    }

    fn copy(&self, upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        let (Value::Array(elements), TypeRef::Array(elem_ty)) = (old, target) else {
            return Err(mismatch(target, old));
        };

        let mut migrated = Vec::with_capacity(elements.len());
        for (index, element) in elements.iter().enumerate() {
            match upgrader.copy_value(element, elem_ty) {
                Ok(value) => migrated.push(value),
                Err(reason) => {
                    upgrader.note_skip(format!("[{}]", index), reason);
                    migrated.push(upgrader.new_types().default_value(elem_ty));
                }
            }
        }

        Ok(Value::Array(migrated))
    }
}

/// Scalars of identical kind, copied verbatim. A width or signedness
/// change between generations is not bridged.
pub struct PrimitiveCopier;

impl MemberCopier for PrimitiveCopier {
    fn name(&self) -> &'static str {
        "primitive"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::Primitive(_))
    }

    fn copy(&self, _upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        match (old, target) {
            (Value::Primitive(p), TypeRef::Primitive(kind)) if p.kind() == *kind => Ok(Value::Primitive(*p)),
            _ => Err(mismatch(target, old)),
        }
    }
}

pub struct TextCopier;

impl MemberCopier for TextCopier {
    fn name(&self) -> &'static str {
        "text"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::Text)
    }

    fn copy(&self, _upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        match old {
            Value::Text(text) => Ok(Value::Text(text.clone())),
            _ => Err(mismatch(target, old)),
        }
    }
}

/// Lists and maps. A fresh collection of the new member's type is filled
/// entry by entry; map keys and values are migrated independently and
/// an entry is dropped if either side fails.
pub struct CollectionCopier;

impl MemberCopier for CollectionCopier {
    fn name(&self) -> &'static str {
        "collection"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::List(_) | TypeRef::Map(_, _))
    }

    fn copy(&self, upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        match (old, target) {
            (Value::List(elements), TypeRef::List(elem_ty)) => {
                let mut migrated = Vec::with_capacity(elements.len());
                for (index, element) in elements.iter().enumerate() {
                    match upgrader.copy_value(element, elem_ty) {
                        Ok(value) => migrated.push(value),
                        Err(reason) => upgrader.note_skip(format!("[{}]", index), reason),
                    }
                }
                Ok(Value::List(migrated))
            }
            (Value::Map(entries), TypeRef::Map(key_ty, value_ty)) => {
                let mut migrated = Vec::with_capacity(entries.len());
                for (index, (key, value)) in entries.iter().enumerate() {
                    let key = match upgrader.copy_value(key, key_ty) {
                        Ok(key) => key,
                        Err(reason) => {
                            upgrader.note_skip(format!("{{key {}}}", index), reason);
                            continue;
                        }
                    };
                    let value = match upgrader.copy_value(value, value_ty) {
                        Ok(value) => value,
                        Err(reason) => {
                            upgrader.note_skip(format!("{{value {}}}", index), reason);
                            continue;
                        }
                    };
                    migrated.push((key, value));
                }
                Ok(Value::Map(migrated))
            }
            _ => Err(mismatch(target, old)),
        }
    }
}

/// Value types. The new struct starts from zero values, never from any
/// constructor logic, and is populated member by member.
pub struct StructCopier;

impl MemberCopier for StructCopier {
    fn name(&self) -> &'static str {
        "struct"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::Struct(_))
    }

    fn copy(&self, upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        let (Value::Struct(old_struct), TypeRef::Struct(name)) = (old, target) else {
            return Err(mismatch(target, old));
        };

        // Value types from modules that were not reloaded carry over as-is
        if !upgrader.is_reloaded(old_struct.type_handle()) {
            return Ok(old.clone());
        }

        // A member retyped to a different struct is not bridged
        if old_struct.type_handle().name() != name {
            return Err(mismatch(target, old));
        }

        let new_ty = match upgrader.new_types().get(name) {
            Some(ty) if ty.kind() == TypeKind::Struct => ty.clone(),
            Some(_) => return Err(SkipReason::KindChanged(name.clone())),
            None => return Err(SkipReason::TypeRemoved(name.clone())),
        };

        let mut migrated = upgrader.new_types().default_struct(&new_ty);
        upgrader.migrate_members(
            old_struct.type_handle(),
            old_struct.fields(),
            &new_ty,
            &mut |index, value| migrated.set_slot(index, value),
        );

        Ok(Value::Struct(migrated))
    }
}

/// Reference types. Goes through the identity map so that shared and
/// cyclic references come out shared and cyclic.
pub struct ClassCopier;

impl MemberCopier for ClassCopier {
    fn name(&self) -> &'static str {
        "class"
    }

    fn can_handle(&self, target: &TypeRef) -> bool {
        matches!(target, TypeRef::Class(_))
    }

    fn copy(&self, upgrader: &mut Upgrader<'_>, old: &Value, target: &TypeRef) -> Result<Value, SkipReason> {
        let (Value::Object(object), TypeRef::Class(name)) = (old, target) else {
            return match old {
                Value::Null => Ok(Value::Null),
                _ => Err(mismatch(target, old)),
            };
        };

        // A reloaded object only fills a slot declared with its own class
        if upgrader.is_reloaded(&object.type_handle()) && object.type_name() != *name {
            return Err(mismatch(target, old));
        }

        upgrader.upgrade_object(object).map(Value::Object)
    }
}
