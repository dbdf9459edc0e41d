//! Typed attribute values and the per-key multi-value attribute map.

use crate::error::{GraphError, Result};
use dsr_core::{AgentId, DotContext, DotKernel, Lattice, MvRegister};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The closed set of attribute value types.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Str(String),
    Int(i32),
    Float(f32),
    FloatVec(Vec<f32>),
    Bool(bool),
    ByteVec(Vec<u8>),
}

impl Value {
    /// Name of the native type, used in error messages and on the wire.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Str(_) => "str",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::FloatVec(_) => "float_vec",
            Value::Bool(_) => "bool",
            Value::ByteVec(_) => "byte_vec",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::FloatVec(v) => write!(f, "{v:?}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::ByteVec(v) => write!(f, "<{} bytes>", v.len()),
        }
    }
}

/// Native Rust types that map onto a [`Value`] variant.
pub trait AttributeType: Sized {
    const TYPE_NAME: &'static str;

    fn from_value(value: &Value) -> Option<Self>;
    fn into_value(self) -> Value;
}

macro_rules! attribute_type {
    ($ty:ty, $variant:ident, $name:literal) => {
        impl AttributeType for $ty {
            const TYPE_NAME: &'static str = $name;

            fn from_value(value: &Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v.clone()),
                    _ => None,
                }
            }

            fn into_value(self) -> Value {
                Value::$variant(self)
            }
        }

        impl From<$ty> for Value {
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    };
}

attribute_type!(String, Str, "str");
attribute_type!(i32, Int, "int");
attribute_type!(f32, Float, "float");
attribute_type!(Vec<f32>, FloatVec, "float_vec");
attribute_type!(bool, Bool, "bool");
attribute_type!(Vec<u8>, ByteVec, "byte_vec");

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

/// A single attribute write: the value plus who wrote it and when.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub value: Value,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub agent_id: AgentId,
}

impl Attribute {
    pub fn new(value: impl Into<Value>, agent_id: AgentId) -> Self {
        Self {
            value: value.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            agent_id,
        }
    }
}

/// Writer recorded on a value until the store stamps it.
pub(crate) const UNSTAMPED: AgentId = 0;

/// Attributes of a node or edge: one multi-value register per key.
///
/// A key whose register holds no value but remembers dots is a removal mask:
/// it hides the values it covers when concurrent snapshots are merged, and is
/// invisible through every accessor.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttributeMap {
    registers: BTreeMap<String, MvRegister<Attribute>>,
}

impl AttributeMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` under `key`, superseding every value observed for it.
    ///
    /// The write gets its writer and dot when the owning node is stored.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.registers
            .entry(key.into())
            .or_default()
            .write(UNSTAMPED, Attribute::new(value, UNSTAMPED));
    }

    /// Drop `key`. Returns whether it held a value.
    pub fn remove(&mut self, key: &str) -> bool {
        self.registers
            .remove(key)
            .is_some_and(|reg| !reg.is_empty())
    }

    /// The representative attribute for `key`: latest timestamp, ties to the
    /// greater dot.
    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.registers
            .get(key)
            .and_then(|reg| reg.resolve_by(|attr| attr.timestamp))
    }

    /// Every concurrent attribute held for `key`.
    pub fn get_all(&self, key: &str) -> Vec<&Attribute> {
        self.registers
            .get(key)
            .map(|reg| reg.read())
            .unwrap_or_default()
    }

    /// Typed read. `Ok(None)` if absent, `TypeMismatch` if stored under another type.
    pub fn get_as<T: AttributeType>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(attr) => T::from_value(&attr.value)
                .map(Some)
                .ok_or_else(|| GraphError::TypeMismatch {
                    expected: T::TYPE_NAME.to_string(),
                    found: attr.value.type_name().to_string(),
                }),
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.registers.get(key).is_some_and(|reg| !reg.is_empty())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.live().map(|(k, _)| k.as_str())
    }

    /// Representative attribute per key.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Attribute)> {
        self.registers.iter().filter_map(|(k, reg)| {
            reg.resolve_by(|attr| attr.timestamp)
                .map(|attr| (k.as_str(), attr))
        })
    }

    pub fn register(&self, key: &str) -> Option<&MvRegister<Attribute>> {
        self.registers.get(key)
    }

    pub fn len(&self) -> usize {
        self.live().count()
    }

    pub fn is_empty(&self) -> bool {
        self.live().next().is_none()
    }

    fn live(&self) -> impl Iterator<Item = (&String, &MvRegister<Attribute>)> {
        self.registers.iter().filter(|(_, reg)| !reg.is_empty())
    }

    /// Drop removal masks.
    pub(crate) fn drop_masks(&mut self) {
        self.registers.retain(|_, reg| !reg.is_empty());
    }

    /// Issue store dots for every write not already held by `base`, and mask
    /// every key of `base` this map no longer carries.
    pub(crate) fn stamp(
        &mut self,
        base: Option<&AttributeMap>,
        context: &mut DotContext,
        agent_id: AgentId,
    ) {
        let empty = BTreeMap::new();
        let base = base.map_or(&empty, |b| &b.registers);
        stamp_registers(&mut self.registers, base, context, agent_id, |attr, _, _| {
            attr.agent_id = agent_id;
        });
    }

    /// Join the registers of a concurrent snapshot into this map.
    pub fn merge(&mut self, other: &AttributeMap) {
        for (key, reg) in &other.registers {
            self.registers
                .entry(key.clone())
                .or_default()
                .join_assign(reg);
        }
    }
}

/// Rebuild every register of `registers` that differs from its counterpart
/// in `base`.
///
/// Values already present in `base` under the same dot keep it; every other
/// value gets a fresh dot from `context` after `stamp_value` has run on it.
/// The rebuilt register has observed everything in `context`, so it
/// supersedes every value this replica has seen for the key. Keys of `base`
/// missing from `registers` come back as empty registers carrying `context`.
pub(crate) fn stamp_registers<K, T>(
    registers: &mut BTreeMap<K, MvRegister<T>>,
    base: &BTreeMap<K, MvRegister<T>>,
    context: &mut DotContext,
    agent_id: AgentId,
    mut stamp_value: impl FnMut(&mut T, Option<&MvRegister<T>>, &mut DotContext),
) where
    K: Ord + Clone,
    T: Clone + PartialEq,
{
    for (key, reg) in registers.iter_mut() {
        let old = base.get(key);
        if old == Some(&*reg) {
            continue;
        }
        let mut values = DotKernel::new();
        let mut fresh = Vec::new();
        for (dot, value) in reg.read_with_dots() {
            let carried = old.is_some_and(|old| {
                old.read_with_dots().any(|(d, v)| d == dot && v == value)
            });
            if carried {
                values.insert(*dot, value.clone());
            } else {
                fresh.push(value.clone());
            }
        }
        for mut value in fresh {
            stamp_value(&mut value, old, context);
            values.insert(context.next_dot(agent_id), value);
        }
        *reg = MvRegister::from_parts(values, context.clone());
    }

    for (key, old) in base {
        if registers.contains_key(key) {
            continue;
        }
        let mask = if old.is_empty() {
            old.clone()
        } else {
            MvRegister::from_parts(DotKernel::new(), context.clone())
        };
        registers.insert(key.clone(), mask);
    }
}
