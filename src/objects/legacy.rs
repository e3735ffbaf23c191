//! Legacy narrow property table
//!
//! Files written before variables existed (object format minor 0) store a
//! property table with its own type codes and no 64-bit integers. The shim
//! maps those properties onto variables when loading, and offers the old
//! typed accessors, which match types strictly.

use tracing::debug;

use super::variable::{VarType, VarValue, VariableList};
use crate::codec::{Codec, DataSource};
use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum PropType {
    Bool = 1,
    Int = 2,
    Uint = 3,
    Float = 4,
    Double = 5,
    String = 6,
    Pointer = 7,
    U8 = 8,
    S8 = 9,
    U16 = 10,
    S16 = 11,
    U32 = 12,
    S32 = 13,
}

impl PropType {
    pub fn from_code(code: u32) -> Option<Self> {
        Some(match code {
            1 => PropType::Bool,
            2 => PropType::Int,
            3 => PropType::Uint,
            4 => PropType::Float,
            5 => PropType::Double,
            6 => PropType::String,
            7 => PropType::Pointer,
            8 => PropType::U8,
            9 => PropType::S8,
            10 => PropType::U16,
            11 => PropType::S16,
            12 => PropType::U32,
            13 => PropType::S32,
            _ => return None,
        })
    }

    /// Variable type a property of this type is stored as
    pub fn var_type(self) -> VarType {
        match self {
            PropType::Bool | PropType::U8 => VarType::U8,
            PropType::S8 => VarType::I8,
            PropType::U16 => VarType::U16,
            PropType::S16 => VarType::I16,
            PropType::Int | PropType::S32 => VarType::I32,
            PropType::Uint | PropType::U32 => VarType::U32,
            PropType::Float => VarType::F32,
            PropType::Double => VarType::F64,
            PropType::String => VarType::Str,
            PropType::Pointer => VarType::Pointer,
        }
    }

    /// Legacy type used to store a variable, if it has one
    pub fn for_var_type(ty: VarType) -> Option<Self> {
        match ty {
            VarType::U8 => Some(PropType::U8),
            VarType::I8 => Some(PropType::S8),
            VarType::U16 => Some(PropType::U16),
            VarType::I16 => Some(PropType::S16),
            VarType::U32 => Some(PropType::Uint),
            VarType::I32 => Some(PropType::Int),
            VarType::F32 => Some(PropType::Float),
            VarType::F64 => Some(PropType::Double),
            VarType::Str => Some(PropType::String),
            VarType::U64 | VarType::I64 | VarType::Pointer => None,
        }
    }
}

/// Legacy getter: the stored variable must have exactly the mapped type
pub fn prop_get(vars: &VariableList, name: &str, ty: PropType) -> CoreResult<VarValue> {
    vars.get(name, Some(ty.var_type()))
}

/// Legacy setter: `value` must already be of the mapped type
pub fn prop_set(vars: &mut VariableList, name: &str, ty: PropType, value: VarValue) -> CoreResult<()> {
    let value = match (ty, value) {
        (PropType::Bool, VarValue::U8(b)) => VarValue::U8((b != 0) as u8),
        (_, v) if v.var_type() == ty.var_type() => v,
        (_, v) => {
            return Err(CoreError::TypeMismatch {
                key: name.to_string(),
                expected: ty.var_type().to_string(),
                found: v.var_type().to_string(),
            })
        }
    };
    vars.set(name, value);
    Ok(())
}

/// Read a legacy property table into `vars`
pub fn read_legacy_table<S: DataSource + ?Sized>(
    ds: &mut S,
    vars: &mut VariableList,
) -> CoreResult<usize> {
    let count = ds.read_u32()? as usize;
    for _ in 0..count {
        let name = ds.read_string()?;
        let code = ds.read_u32()?;
        let ty = PropType::from_code(code).ok_or_else(|| CoreError::TypeMismatch {
            key: name.clone(),
            expected: "legacy property type".into(),
            found: format!("{}", code),
        })?;
        let value = match ty {
            PropType::Bool => VarValue::U8((ds.read_i32()? != 0) as u8),
            PropType::Pointer => {
                debug!("skipping legacy pointer property {}", name);
                continue;
            }
            other => VarValue::read(ds, other.var_type())?,
        };
        vars.set(&name, value);
    }
    Ok(count)
}

/// Write `vars` as a legacy property table; variables without a legacy type are skipped
pub fn write_legacy_table<S: DataSource + ?Sized>(
    ds: &mut S,
    vars: &VariableList,
) -> CoreResult<usize> {
    let entries: Vec<(String, PropType, VarValue)> = vars
        .iter()
        .filter_map(|v| {
            let value = v.value()?;
            let ty = PropType::for_var_type(value.var_type())?;
            Some((v.name().to_string(), ty, value))
        })
        .collect();
    ds.write_u32(entries.len() as u32)?;
    for (name, ty, value) in &entries {
        ds.write_string(name)?;
        ds.write_u32(*ty as u32)?;
        value.write(ds)?;
    }
    Ok(entries.len())
}
