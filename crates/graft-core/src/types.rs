//! Node metadata: value descriptions, tensor shapes and provenance.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Element type of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F64,
    F32,
    F16,
    BF16,
    I64,
    I32,
    U8,
    Bool,
}

impl DataType {
    /// Short name used in program listings (e.g. `f32`).
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::F64 => "f64",
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::BF16 => "bf16",
            DataType::I64 => "i64",
            DataType::I32 => "i32",
            DataType::U8 => "u8",
            DataType::Bool => "b8",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "f64" => Ok(DataType::F64),
            "f32" => Ok(DataType::F32),
            "f16" => Ok(DataType::F16),
            "bf16" => Ok(DataType::BF16),
            "i64" => Ok(DataType::I64),
            "i32" => Ok(DataType::I32),
            "u8" => Ok(DataType::U8),
            "b8" | "bool" => Ok(DataType::Bool),
            other => Err(format!("unknown dtype '{}'", other)),
        }
    }
}

/// Static shape and element type of a tensor value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorMeta {
    pub shape: Vec<usize>,
    pub dtype: DataType,
}

impl TensorMeta {
    pub fn new(shape: Vec<usize>, dtype: DataType) -> Self {
        Self { shape, dtype }
    }

    /// Whether the shape equals a requested shape argument.
    ///
    /// Negative (inferred) extents never match.
    pub fn shape_matches(&self, requested: &[i64]) -> bool {
        self.shape.len() == requested.len()
            && self
                .shape
                .iter()
                .zip(requested)
                .all(|(&dim, &req)| usize::try_from(req).is_ok_and(|req| req == dim))
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.shape.iter().map(|d| d.to_string()).collect();
        write!(f, "{}[{}]", self.dtype, dims.join(", "))
    }
}

/// A metadata value.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Tensor(TensorMeta),
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

/// String-keyed metadata attached to a node.
///
/// Well-known keys are [`Meta::VAL`], [`Meta::TENSOR_META`] and
/// [`Meta::STACK_TRACE`]; any other key is carried along untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Meta {
    entries: BTreeMap<String, MetaValue>,
}

impl Meta {
    /// Description of the runtime value the node produces.
    pub const VAL: &'static str = "val";

    /// Static tensor shape and dtype of the node's output.
    pub const TENSOR_META: &'static str = "tensor_meta";

    /// Source location the node was traced from.
    pub const STACK_TRACE: &'static str = "stack_trace";

    pub fn new() -> Self {
        Self::default()
    }

    /// Metadata of a tensor-valued node (`val` and `tensor_meta` both set).
    pub fn tensor(tensor: TensorMeta) -> Self {
        let mut meta = Self::new();
        meta.insert(Self::VAL, MetaValue::Tensor(tensor.clone()));
        meta.insert(Self::TENSOR_META, MetaValue::Tensor(tensor));
        meta
    }

    pub fn get(&self, key: &str) -> Option<&MetaValue> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: MetaValue) -> Option<MetaValue> {
        self.entries.insert(key.into(), value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetaValue)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The `val` entry.
    pub fn val(&self) -> Option<&MetaValue> {
        self.get(Self::VAL)
    }

    /// Whether the node's runtime value is a tensor.
    pub fn is_tensor_valued(&self) -> bool {
        matches!(self.val(), Some(MetaValue::Tensor(_)))
    }

    /// The `tensor_meta` entry, if it describes a tensor.
    pub fn tensor_meta(&self) -> Option<&TensorMeta> {
        match self.get(Self::TENSOR_META) {
            Some(MetaValue::Tensor(tensor)) => Some(tensor),
            _ => None,
        }
    }

    /// Copy every entry of `other` into `self`, overwriting shared keys.
    pub fn propagate_from(&mut self, other: &Meta) {
        for (key, value) in &other.entries {
            self.entries.insert(key.clone(), value.clone());
        }
    }
}
