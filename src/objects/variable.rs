//! Typed named variables attached to objects

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde_json::json;
use tracing::debug;

use crate::codec::{Codec, DataSource};
use crate::error::{CoreError, CoreResult};

/// Opaque payload stored in a pointer variable
pub type Opaque = Arc<dyn Any + Send + Sync>;

/// Caller-owned storage a variable can be bound to.
///
/// The variable keeps only a weak reference; once the caller drops the
/// binding, reads through the variable fail.
pub type Binding = Arc<RwLock<VarValue>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum VarType {
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    U64 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
    Str = 11,
    Pointer = 12,
}

impl VarType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => VarType::U8,
            2 => VarType::I8,
            3 => VarType::U16,
            4 => VarType::I16,
            5 => VarType::U32,
            6 => VarType::I32,
            7 => VarType::U64,
            8 => VarType::I64,
            9 => VarType::F32,
            10 => VarType::F64,
            11 => VarType::Str,
            12 => VarType::Pointer,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            VarType::U8 => "u8",
            VarType::I8 => "i8",
            VarType::U16 => "u16",
            VarType::I16 => "i16",
            VarType::U32 => "u32",
            VarType::I32 => "i32",
            VarType::U64 => "u64",
            VarType::I64 => "i64",
            VarType::F32 => "f32",
            VarType::F64 => "f64",
            VarType::Str => "string",
            VarType::Pointer => "pointer",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Variable payload
#[derive(Debug, Clone)]
pub enum VarValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(String),
    Pointer(Opaque),
}

impl VarValue {
    pub fn var_type(&self) -> VarType {
        match self {
            VarValue::U8(_) => VarType::U8,
            VarValue::I8(_) => VarType::I8,
            VarValue::U16(_) => VarType::U16,
            VarValue::I16(_) => VarType::I16,
            VarValue::U32(_) => VarType::U32,
            VarValue::I32(_) => VarType::I32,
            VarValue::U64(_) => VarType::U64,
            VarValue::I64(_) => VarType::I64,
            VarValue::F32(_) => VarType::F32,
            VarValue::F64(_) => VarType::F64,
            VarValue::Str(_) => VarType::Str,
            VarValue::Pointer(_) => VarType::Pointer,
        }
    }

    /// Any integer value widened to i64 (u64 values above i64::MAX fail)
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            VarValue::U8(v) => Some(v as i64),
            VarValue::I8(v) => Some(v as i64),
            VarValue::U16(v) => Some(v as i64),
            VarValue::I16(v) => Some(v as i64),
            VarValue::U32(v) => Some(v as i64),
            VarValue::I32(v) => Some(v as i64),
            VarValue::U64(v) => i64::try_from(v).ok(),
            VarValue::I64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            VarValue::F32(v) => Some(v as f64),
            VarValue::F64(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            VarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// JSON rendering for inspection tools
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            VarValue::F32(v) => json!(v),
            VarValue::F64(v) => json!(v),
            VarValue::U64(v) => json!(v),
            VarValue::Str(s) => json!(s),
            VarValue::Pointer(_) => json!("<pointer>"),
            other => json!(other.as_i64()),
        }
    }

    /// Encode the payload (type code is written by the caller)
    pub fn write<S: DataSource + ?Sized>(&self, ds: &mut S) -> CoreResult<()> {
        match self {
            VarValue::U8(v) => ds.write_u8(*v),
            VarValue::I8(v) => ds.write_i8(*v),
            VarValue::U16(v) => ds.write_u16(*v),
            VarValue::I16(v) => ds.write_i16(*v),
            VarValue::U32(v) => ds.write_u32(*v),
            VarValue::I32(v) => ds.write_i32(*v),
            VarValue::U64(v) => ds.write_u64(*v),
            VarValue::I64(v) => ds.write_i64(*v),
            VarValue::F32(v) => ds.write_f32(*v),
            VarValue::F64(v) => ds.write_f64(*v),
            VarValue::Str(s) => ds.write_string(s),
            VarValue::Pointer(_) => Ok(()),
        }
    }

    /// Decode a payload of the given type
    pub fn read<S: DataSource + ?Sized>(ds: &mut S, ty: VarType) -> CoreResult<Self> {
        Ok(match ty {
            VarType::U8 => VarValue::U8(ds.read_u8()?),
            VarType::I8 => VarValue::I8(ds.read_i8()?),
            VarType::U16 => VarValue::U16(ds.read_u16()?),
            VarType::I16 => VarValue::I16(ds.read_i16()?),
            VarType::U32 => VarValue::U32(ds.read_u32()?),
            VarType::I32 => VarValue::I32(ds.read_i32()?),
            VarType::U64 => VarValue::U64(ds.read_u64()?),
            VarType::I64 => VarValue::I64(ds.read_i64()?),
            VarType::F32 => VarValue::F32(ds.read_f32()?),
            VarType::F64 => VarValue::F64(ds.read_f64()?),
            VarType::Str => VarValue::Str(ds.read_string()?),
            VarType::Pointer => {
                return Err(CoreError::TypeMismatch {
                    key: String::new(),
                    expected: "serializable type".into(),
                    found: VarType::Pointer.to_string(),
                })
            }
        })
    }
}

impl PartialEq for VarValue {
    fn eq(&self, other: &Self) -> bool {
        use VarValue::*;
        match (self, other) {
            (U8(a), U8(b)) => a == b,
            (I8(a), I8(b)) => a == b,
            (U16(a), U16(b)) => a == b,
            (I16(a), I16(b)) => a == b,
            (U32(a), U32(b)) => a == b,
            (I32(a), I32(b)) => a == b,
            (U64(a), U64(b)) => a == b,
            (I64(a), I64(b)) => a == b,
            (F32(a), F32(b)) => a.to_bits() == b.to_bits(),
            (F64(a), F64(b)) => a.to_bits() == b.to_bits(),
            (Str(a), Str(b)) => a == b,
            (Pointer(a), Pointer(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Rust types storable in a variable
pub trait VarKind: Sized {
    const TYPE: VarType;
    fn into_value(self) -> VarValue;
    fn from_value(value: &VarValue) -> Option<Self>;
}

macro_rules! var_kind {
    ($ty:ty, $variant:ident) => {
        impl VarKind for $ty {
            const TYPE: VarType = VarType::$variant;

            fn into_value(self) -> VarValue {
                VarValue::$variant(self)
            }

            fn from_value(value: &VarValue) -> Option<Self> {
                match value {
                    VarValue::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }
        }

        impl From<$ty> for VarValue {
            fn from(v: $ty) -> Self {
                VarValue::$variant(v)
            }
        }
    };
}

var_kind!(u8, U8);
var_kind!(i8, I8);
var_kind!(u16, U16);
var_kind!(i16, I16);
var_kind!(u32, U32);
var_kind!(i32, I32);
var_kind!(u64, U64);
var_kind!(i64, I64);
var_kind!(f32, F32);
var_kind!(f64, F64);
var_kind!(String, Str);

impl From<&str> for VarValue {
    fn from(s: &str) -> Self {
        VarValue::Str(s.to_string())
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Owned(VarValue),
    Bound(Weak<RwLock<VarValue>>),
}

/// A named variable
#[derive(Debug, Clone)]
pub struct Variable {
    name: String,
    slot: Slot,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current value; `None` if bound storage has been dropped
    pub fn value(&self) -> Option<VarValue> {
        match &self.slot {
            Slot::Owned(v) => Some(v.clone()),
            Slot::Bound(w) => w.upgrade().map(|b| b.read().clone()),
        }
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.slot, Slot::Bound(_))
    }
}

/// Ordered variable list of one object
#[derive(Debug, Clone, Default)]
pub struct VariableList {
    vars: Vec<Variable>,
}

impl VariableList {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.vars.iter().position(|v| v.name == key)
    }

    /// Set `key`, replacing an existing slot or appending a new one.
    ///
    /// A live binding of the same type is written through to the caller's
    /// storage instead of being replaced.
    pub fn set(&mut self, key: &str, value: VarValue) {
        match self.position(key) {
            Some(i) => {
                let var = &mut self.vars[i];
                if let Slot::Bound(w) = &var.slot {
                    if let Some(target) = w.upgrade() {
                        let mut target = target.write();
                        if target.var_type() == value.var_type() {
                            *target = value;
                            return;
                        }
                    }
                }
                var.slot = Slot::Owned(value);
            }
            None => self.vars.push(Variable {
                name: key.to_string(),
                slot: Slot::Owned(value),
            }),
        }
    }

    /// Bind `key` to caller-owned storage
    pub fn bind(&mut self, key: &str, binding: &Binding) {
        let slot = Slot::Bound(Arc::downgrade(binding));
        match self.position(key) {
            Some(i) => self.vars[i].slot = slot,
            None => self.vars.push(Variable {
                name: key.to_string(),
                slot,
            }),
        }
    }

    /// Look up `key`, optionally requiring an exact type
    pub fn get(&self, key: &str, expected: Option<VarType>) -> CoreResult<VarValue> {
        let var = self
            .position(key)
            .map(|i| &self.vars[i])
            .ok_or_else(|| CoreError::NoSuchVariable(key.to_string()))?;
        let value = var
            .value()
            .ok_or_else(|| CoreError::NoSuchVariable(format!("{} (binding dropped)", key)))?;
        if let Some(ty) = expected {
            if value.var_type() != ty {
                return Err(CoreError::TypeMismatch {
                    key: key.to_string(),
                    expected: ty.to_string(),
                    found: value.var_type().to_string(),
                });
            }
        }
        Ok(value)
    }

    pub fn unset(&mut self, key: &str) -> bool {
        match self.position(key) {
            Some(i) => {
                self.vars.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.iter()
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn clear(&mut self) {
        self.vars.clear();
    }

    /// Encode the serializable variables; pointers and dropped bindings are skipped
    pub fn write_table<S: DataSource + ?Sized>(&self, ds: &mut S) -> CoreResult<()> {
        let entries: Vec<(&str, VarValue)> = self
            .vars
            .iter()
            .filter_map(|v| v.value().map(|val| (v.name(), val)))
            .filter(|(_, val)| val.var_type() != VarType::Pointer)
            .collect();
        ds.write_u32(entries.len() as u32)?;
        for (name, value) in entries {
            ds.write_string(name)?;
            ds.write_u8(value.var_type() as u8)?;
            value.write(ds)?;
        }
        Ok(())
    }

    /// Decode a table written by [`VariableList::write_table`], setting each entry
    pub fn read_table<S: DataSource + ?Sized>(&mut self, ds: &mut S) -> CoreResult<usize> {
        let count = ds.read_u32()? as usize;
        for _ in 0..count {
            let name = ds.read_string()?;
            let code = ds.read_u8()?;
            let ty = VarType::from_code(code).ok_or_else(|| CoreError::TypeMismatch {
                key: name.clone(),
                expected: "variable type code".into(),
                found: format!("{:#04x}", code),
            })?;
            let value = VarValue::read(ds, ty)?;
            debug!("loaded variable {} ({})", name, ty);
            self.set(&name, value);
        }
        Ok(count)
    }
}
