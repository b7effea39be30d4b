use super::{ObjectRef, PrimitiveKind, TypeHandle};

/// Scalar value tagged with its exact kind
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    Bool(bool),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
}

impl Primitive {
    pub fn kind(&self) -> PrimitiveKind {
        match self {
            Primitive::Bool(_) => PrimitiveKind::Bool,
            Primitive::I8(_) => PrimitiveKind::I8,
            Primitive::I16(_) => PrimitiveKind::I16,
            Primitive::I32(_) => PrimitiveKind::I32,
            Primitive::I64(_) => PrimitiveKind::I64,
            Primitive::U8(_) => PrimitiveKind::U8,
            Primitive::U16(_) => PrimitiveKind::U16,
            Primitive::U32(_) => PrimitiveKind::U32,
            Primitive::U64(_) => PrimitiveKind::U64,
            Primitive::F32(_) => PrimitiveKind::F32,
            Primitive::F64(_) => PrimitiveKind::F64,
        }
    }

    pub fn zero(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Bool => Primitive::Bool(false),
            PrimitiveKind::I8 => Primitive::I8(0),
            PrimitiveKind::I16 => Primitive::I16(0),
            PrimitiveKind::I32 => Primitive::I32(0),
            PrimitiveKind::I64 => Primitive::I64(0),
            PrimitiveKind::U8 => Primitive::U8(0),
            PrimitiveKind::U16 => Primitive::U16(0),
            PrimitiveKind::U32 => Primitive::U32(0),
            PrimitiveKind::U64 => Primitive::U64(0),
            PrimitiveKind::F32 => Primitive::F32(0.0),
            PrimitiveKind::F64 => Primitive::F64(0.0),
        }
    }
}

/// A live member value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Primitive(Primitive),
    Text(String),
    Array(Vec<Value>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(StructValue),
    /// Shared reference; equality is identity
    Object(ObjectRef),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Primitive(Primitive::Bool(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::Primitive(Primitive::I32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Primitive(Primitive::I64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::Primitive(Primitive::U32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Primitive(Primitive::F32(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Primitive(Primitive::F64(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructValue> {
        match self {
            Value::Struct(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Elements of an array or list
    pub fn as_slice(&self) -> Option<&[Value]> {
        match self {
            Value::Array(v) | Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_entries(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_from_primitive {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::Primitive(Primitive::$variant(v))
                }
            }
        )*
    };
}

impl_from_primitive! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

impl From<StructValue> for Value {
    fn from(v: StructValue) -> Self {
        Value::Struct(v)
    }
}

/// Value of a struct type, one slot per member
#[derive(Debug, Clone)]
pub struct StructValue {
    ty: TypeHandle,
    fields: Vec<Value>,
}

impl StructValue {
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

    /// Returns false when the struct has no member of that name
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> bool {
        match self.ty.member_index(name) {
            Some(index) => {
                self.fields[index] = value.into();
                true
            }
            None => false,
        }
    }

    /// Builder form of `set`, for literals in game code
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.set(name, value);
        self
    }

    pub(crate) fn set_slot(&mut self, index: usize, value: Value) {
        self.fields[index] = value;
    }
}

impl PartialEq for StructValue {
    fn eq(&self, other: &Self) -> bool {
        self.ty.name() == other.ty.name() && self.fields == other.fields
    }
}
