//! Engine-facing contract consumed by the graph layer.
//!
//! Everything in this module speaks the engine's own conventions: element types are named after
//! their storage (`Si32`, `I1`, ...) and an unknown axis extent is the negative sentinel
//! [`UNKNOWN_DIM`]. Frontend code never touches these types directly; the translation lives in
//! [`crate::tensor::spec_utils`].

use std::{fmt, sync::Arc};

use serde::{ser::SerializeStruct, Deserialize, Serialize};
use thiserror::Error;

/// Sentinel the engine uses for an axis whose extent is not known until run time.
pub const UNKNOWN_DIM: i64 = -1;

/// Scalar element types understood by engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    I1,
    Si32,
    Si64,
    F32,
    F64,
}

impl DType {
    pub fn is_integer(self) -> bool {
        matches!(self, DType::Si32 | DType::Si64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DType::F32 | DType::F64)
    }

    /// Storage size of a single element in bytes.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::I1 => 1,
            DType::Si32 | DType::F32 => 4,
            DType::Si64 | DType::F64 => 8,
        }
    }
}

/// Engine-side shape. Ranked shapes may contain [`UNKNOWN_DIM`] entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Shape {
    Unranked,
    Ranked(Vec<i64>),
}

impl Shape {
    pub fn ranked(dims: impl Into<Vec<i64>>) -> Self {
        Shape::Ranked(dims.into())
    }

    pub fn rank(&self) -> Option<usize> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims.len()),
        }
    }

    pub fn dims(&self) -> Option<&[i64]> {
        match self {
            Shape::Unranked => None,
            Shape::Ranked(dims) => Some(dims),
        }
    }

    /// Returns static dimensions when every axis is known.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        let dims = self.dims()?;
        dims.iter()
            .map(|&dim| usize::try_from(dim).ok())
            .collect::<Option<Vec<_>>>()
    }

    /// Returns element count when the shape is fully static.
    pub fn element_count(&self) -> Option<usize> {
        let dims = self.static_dims()?;
        let mut count = 1usize;
        for dim in dims {
            count = count.checked_mul(dim)?;
        }
        Some(count)
    }

    /// Reports whether `concrete` is a valid realization of this (possibly partial) shape.
    pub fn admits(&self, concrete: &[usize]) -> bool {
        match self {
            Shape::Unranked => true,
            Shape::Ranked(dims) => {
                dims.len() == concrete.len()
                    && dims
                        .iter()
                        .zip(concrete)
                        .all(|(&dim, &actual)| dim == UNKNOWN_DIM || dim == actual as i64)
            }
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Shape::Unranked => write!(f, "[*]"),
            Shape::Ranked(dims) => {
                write!(f, "[")?;
                for (idx, dim) in dims.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    if *dim == UNKNOWN_DIM {
                        write!(f, "?")?;
                    } else {
                        write!(f, "{dim}")?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    /// Builds a spec whose every axis is known.
    pub fn concrete(dtype: DType, dims: &[usize]) -> Self {
        Self::new(
            dtype,
            Shape::Ranked(dims.iter().map(|&dim| dim as i64).collect()),
        )
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Returns total byte length when the shape is static.
    pub fn byte_len(&self) -> Option<usize> {
        self.element_count()?.checked_mul(self.dtype.size_in_bytes())
    }
}

/// Dense little-endian tensor payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorLiteral {
    pub spec: TensorSpec,
    pub bytes: Arc<[u8]>,
}

impl TensorLiteral {
    pub fn new(spec: TensorSpec, bytes: Arc<[u8]>) -> Self {
        Self { spec, bytes }
    }

    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}

impl Serialize for TensorLiteral {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("TensorLiteral", 2)?;
        state.serialize_field("spec", &self.spec)?;
        state.serialize_field("bytes", &self.bytes.as_ref())?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for TensorLiteral {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct TensorLiteralHelper {
            spec: TensorSpec,
            bytes: Vec<u8>,
        }

        let helper = TensorLiteralHelper::deserialize(deserializer)?;
        Ok(TensorLiteral {
            spec: helper.spec,
            bytes: Arc::<[u8]>::from(helper.bytes),
        })
    }
}

/// Initialization payload when materialising storage on an engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TensorInit {
    Literal(TensorLiteral),
    Zeroed(TensorSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseUnaryOp {
    Neg,
    Exp,
}

/// Elementwise binary ops. Operands broadcast from the trailing axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementwiseBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceKind {
    Sum,
    Max,
}

/// Contraction of one lhs axis against one rhs axis; remaining axes are kept in order
/// (lhs free axes first, then rhs free axes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DotGeneralSpec {
    pub contract_lhs: usize,
    pub contract_rhs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReduceSpec {
    pub kind: ReduceKind,
    pub axes: Vec<usize>,
    pub keepdims: bool,
}

/// Attribute payload for `rng_uniform`: samples from `[minval, maxval)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RngUniformSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub minval: f64,
    pub maxval: f64,
    pub seed: u64,
}

/// Attribute payload for `rng_normal`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RngNormalSpec {
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub mean: f64,
    pub stddev: f64,
    pub seed: u64,
}

/// Identifier of an SSA value inside a program (and of a node inside a graph arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(pub u32);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    Constant(TensorLiteral),
    ElementwiseUnary(ElementwiseUnaryOp),
    ElementwiseBinary(ElementwiseBinaryOp),
    DotGeneral(DotGeneralSpec),
    Reduce(ReduceSpec),
    RngUniform(RngUniformSpec),
    RngNormal(RngNormalSpec),
}

impl Operation {
    /// Short label used in diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Constant(_) => "constant",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Neg) => "neg",
            Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp) => "exp",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Add) => "add",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Sub) => "sub",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Mul) => "mul",
            Operation::ElementwiseBinary(ElementwiseBinaryOp::Div) => "div",
            Operation::DotGeneral(_) => "dot_general",
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Sum,
                ..
            }) => "reduce_sum",
            Operation::Reduce(ReduceSpec {
                kind: ReduceKind::Max,
                ..
            }) => "reduce_max",
            Operation::RngUniform(_) => "rng_uniform",
            Operation::RngNormal(_) => "rng_normal",
        }
    }
}

/// Single SSA instruction. `output` is the statically inferred spec and may contain unknown axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub id: ValueId,
    pub op: Operation,
    pub operands: Vec<ValueId>,
    pub output: TensorSpec,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<TensorSpec>,
    pub parameter_ids: Vec<ValueId>,
    pub body: Vec<Instruction>,
    pub result_ids: Vec<ValueId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub entry: String,
    pub functions: Vec<Function>,
}

#[derive(Debug, Error)]
#[error("program json error: {0}")]
pub struct ProgramSerdeError(#[from] serde_json::Error);

impl Program {
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            functions: Vec::new(),
        }
    }

    pub fn with_functions(mut self, functions: Vec<Function>) -> Self {
        self.functions = functions;
        self
    }

    /// Looks up the entry function.
    pub fn entry_function(&self) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == self.entry)
    }

    pub fn to_json_string(&self) -> Result<String, ProgramSerdeError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json_str(src: &str) -> Result<Self, ProgramSerdeError> {
        Ok(serde_json::from_str(src)?)
    }
}

/// Reason an engine refused an instruction before computing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum SpecErrorCode {
    /// An allocation asked for a shape that still has unknown axes.
    #[error("unresolved dimension")]
    NegativeDimension,
    /// Concrete extents disagree with the declared spec or with each other.
    #[error("dimension mismatch")]
    DynamicDimensionMismatch,
    #[error("unsupported dtype")]
    DTypeNotSupported,
    /// Seeds, bounds, axes and similar payload fields out of range.
    #[error("invalid attribute")]
    InvalidAttributeValue,
}

/// Rejected instruction: the reason plus whatever context the engine had at hand.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{code}{}", describe(.detail))]
pub struct SpecError {
    pub code: SpecErrorCode,
    pub detail: Option<String>,
}

fn describe(detail: &Option<String>) -> String {
    detail
        .as_deref()
        .map(|detail| format!(": {detail}"))
        .unwrap_or_default()
}

impl SpecError {
    pub fn new(code: SpecErrorCode, detail: impl Into<Option<String>>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("program rejected, {0}")]
    SpecViolation(#[from] SpecError),
    #[error("{op} unsupported by this engine: {reason}")]
    Unimplemented { op: &'static str, reason: String },
    #[error("{message}")]
    Execution { message: String },
}

impl BackendError {
    pub fn spec(code: SpecErrorCode, detail: impl Into<Option<String>>) -> Self {
        SpecError::new(code, detail).into()
    }

    pub fn unimplemented(op: &'static str, reason: impl Into<String>) -> Self {
        BackendError::Unimplemented {
            op,
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        BackendError::Execution {
            message: message.into(),
        }
    }
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Portable engine trait: storage materialization, read-back, and program execution.
///
/// `run_program` receives one handle per entry parameter, in `parameter_ids` order, and returns
/// one handle per `result_ids` entry. Handles are owned by the engine; dropping the last clone
/// releases the storage.
pub trait PortableBackend: Send + Sync {
    type TensorHandle: Clone + Send + Sync + 'static;

    /// Returns a human-readable engine identifier (e.g., `"cpu"`).
    fn backend_name(&self) -> &str;

    /// Materialises a tensor handle from host initialisation data.
    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle>;

    /// Reads back a tensor handle into a dense literal with a fully concrete spec.
    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral>;

    /// Executes the entry function of `program`.
    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_admits_partial_realizations() {
        let shape = Shape::ranked([UNKNOWN_DIM, 2]);
        assert!(shape.admits(&[7, 2]));
        assert!(!shape.admits(&[7, 3]));
        assert!(!shape.admits(&[2]));
        assert!(Shape::Unranked.admits(&[1, 2, 3]));
    }

    #[test]
    fn static_dims_rejects_sentinel() {
        assert_eq!(Shape::ranked([2, 3]).static_dims(), Some(vec![2, 3]));
        assert_eq!(Shape::ranked([UNKNOWN_DIM, 3]).static_dims(), None);
        assert_eq!(Shape::Unranked.element_count(), None);
        assert_eq!(format!("{}", Shape::ranked([UNKNOWN_DIM, 3])), "[?, 3]");
    }

    #[test]
    fn program_json_roundtrip_preserves_literals() {
        let literal = TensorLiteral::new(
            TensorSpec::concrete(DType::F32, &[1]),
            Arc::from(1.5f32.to_le_bytes().to_vec()),
        );
        let program = Program::new("main").with_functions(vec![Function {
            name: "main".into(),
            parameters: Vec::new(),
            parameter_ids: Vec::new(),
            body: vec![Instruction {
                id: ValueId(0),
                op: Operation::Constant(literal.clone()),
                operands: Vec::new(),
                output: literal.spec.clone(),
            }],
            result_ids: vec![ValueId(0)],
        }]);
        let json = program.to_json_string().expect("serialize");
        let decoded = Program::from_json_str(&json).expect("deserialize");
        assert_eq!(decoded, program);
        assert_eq!(decoded.entry_function().map(|f| f.body.len()), Some(1));
    }
}
