use std::collections::HashMap;
use std::sync::Arc;

use kgraph::backend::spec::{
    BackendError, BackendResult, DType, DotGeneralSpec, ElementwiseBinaryOp, ElementwiseUnaryOp,
    Instruction, Operation, PortableBackend, Program, ReduceKind, ReduceSpec, RngNormalSpec,
    RngUniformSpec, Shape, SpecErrorCode, TensorInit, TensorLiteral, TensorSpec, ValueId,
};
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;

/// Engine-resident tensor: a concrete spec plus dense row-major storage.
#[derive(Clone, Debug)]
pub struct CpuTensor {
    pub spec: TensorSpec,
    pub data: TensorData,
}

#[derive(Clone, Debug)]
pub enum TensorData {
    F32(Arc<[f32]>),
    F64(Arc<[f64]>),
    Si32(Arc<[i32]>),
    Si64(Arc<[i64]>),
    Bool(Arc<[u8]>),
}

impl TensorData {
    fn dtype(&self) -> DType {
        match self {
            TensorData::F32(_) => DType::F32,
            TensorData::F64(_) => DType::F64,
            TensorData::Si32(_) => DType::Si32,
            TensorData::Si64(_) => DType::Si64,
            TensorData::Bool(_) => DType::I1,
        }
    }

    fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::F64(values) => values.len(),
            TensorData::Si32(values) => values.len(),
            TensorData::Si64(values) => values.len(),
            TensorData::Bool(values) => values.len(),
        }
    }
}

impl CpuTensor {
    /// Concrete dimensions; every handle this engine creates has a fully static spec.
    pub fn dims(&self) -> BackendResult<Vec<usize>> {
        static_dims(&self.spec.shape)
    }
}

/// Reference engine that interprets programs on the host.
#[derive(Clone, Debug, Default)]
pub struct CpuPortableBackend;

impl CpuPortableBackend {
    pub fn new() -> Self {
        Self
    }
}

impl PortableBackend for CpuPortableBackend {
    type TensorHandle = CpuTensor;

    fn backend_name(&self) -> &str {
        "cpu"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        match init {
            TensorInit::Literal(lit) => literal_to_tensor(&lit),
            TensorInit::Zeroed(spec) => zeroed_tensor(&spec),
        }
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        tensor_to_literal(tensor)
    }

    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        let function = program
            .entry_function()
            .ok_or_else(|| BackendError::execution("entry function not found"))?;

        if function.parameter_ids.len() != entry_inputs.len()
            || function.parameters.len() != entry_inputs.len()
        {
            return Err(BackendError::execution(format!(
                "entry input arity mismatch: expected {}, got {}",
                function.parameter_ids.len(),
                entry_inputs.len()
            )));
        }

        let mut values: HashMap<ValueId, CpuTensor> = HashMap::new();
        for ((param_id, declared), handle) in function
            .parameter_ids
            .iter()
            .zip(&function.parameters)
            .zip(entry_inputs)
        {
            check_parameter(*param_id, declared, handle)?;
            values.insert(*param_id, handle.clone());
        }

        for (instr_index, instruction) in function.body.iter().enumerate() {
            let mut inputs = Vec::with_capacity(instruction.operands.len());
            for operand in &instruction.operands {
                let tensor = values.get(operand).cloned().ok_or_else(|| {
                    BackendError::execution(format!("operand value {operand} missing"))
                })?;
                inputs.push(tensor);
            }
            log::trace!(
                "cpu: {} #{instr_index} {} {} <- {:?}",
                function.name,
                instruction.op.name(),
                instruction.id,
                instruction.operands
            );
            let output = execute_operation(instruction, &inputs).map_err(|err| {
                augment_backend_error(err, &function.name, instr_index, instruction, &inputs)
            })?;
            values.insert(instruction.id, output);
        }

        let mut results = Vec::with_capacity(function.result_ids.len());
        for id in &function.result_ids {
            let value = values.get(id).cloned().ok_or_else(|| {
                BackendError::execution(format!("missing function result value {id}"))
            })?;
            results.push(value);
        }
        log::debug!(
            "cpu: ran `{}` ({} instruction(s), {} result(s))",
            function.name,
            function.body.len(),
            results.len()
        );
        Ok(results)
    }
}

fn check_parameter(id: ValueId, declared: &TensorSpec, handle: &CpuTensor) -> BackendResult<()> {
    if declared.dtype != handle.spec.dtype {
        return Err(BackendError::spec(
            SpecErrorCode::DTypeNotSupported,
            format!(
                "parameter {id} declared {:?}, bound {:?}",
                declared.dtype, handle.spec.dtype
            ),
        ));
    }
    let dims = handle.dims()?;
    if !declared.shape.admits(&dims) {
        return Err(BackendError::spec(
            SpecErrorCode::DynamicDimensionMismatch,
            format!(
                "parameter {id} declared {}, bound {:?}",
                declared.shape, dims
            ),
        ));
    }
    Ok(())
}

fn execute_operation(instruction: &Instruction, inputs: &[CpuTensor]) -> BackendResult<CpuTensor> {
    let output = &instruction.output;
    match &instruction.op {
        Operation::Constant(literal) => {
            let tensor = literal_to_tensor(literal)?;
            resolve_output(output, tensor.dims()?, tensor.data)
        }
        Operation::ElementwiseUnary(op) => op_elementwise_unary(inputs, output, *op),
        Operation::ElementwiseBinary(op) => op_elementwise_binary(inputs, output, *op),
        Operation::DotGeneral(spec) => op_dot_general(inputs, output, spec),
        Operation::Reduce(spec) => op_reduce(inputs, output, spec),
        Operation::RngUniform(spec) => op_rng_uniform(output, spec),
        Operation::RngNormal(spec) => op_rng_normal(output, spec),
    }
}

/// Checks the computed result against the statically declared spec and returns it with the
/// declared spec made concrete.
fn resolve_output(
    declared: &TensorSpec,
    dims: Vec<usize>,
    data: TensorData,
) -> BackendResult<CpuTensor> {
    if data.dtype() != declared.dtype {
        return Err(BackendError::execution(format!(
            "computed {:?} but the instruction declares {:?}",
            data.dtype(),
            declared.dtype
        )));
    }
    if !declared.shape.admits(&dims) {
        return Err(BackendError::execution(format!(
            "computed dims {:?} do not match declared shape {}",
            dims, declared.shape
        )));
    }
    let expected: usize = dims.iter().product();
    if data.len() != expected {
        return Err(BackendError::execution(format!(
            "computed {} element(s) for dims {:?}",
            data.len(),
            dims
        )));
    }
    Ok(CpuTensor {
        spec: TensorSpec::concrete(declared.dtype, &dims),
        data,
    })
}

fn augment_backend_error(
    error: BackendError,
    function_name: &str,
    instruction_index: usize,
    instruction: &Instruction,
    inputs: &[CpuTensor],
) -> BackendError {
    let location = format!(
        "at function `{}` instruction #{}, {} id {} operands [{}]",
        function_name,
        instruction_index,
        instruction.op.name(),
        instruction.id,
        format_operands(&instruction.operands, inputs)
    );
    match error {
        BackendError::Execution { message } => BackendError::Execution {
            message: format!("{message} ({location})"),
        },
        BackendError::Unimplemented { op, reason } => BackendError::Unimplemented {
            op,
            reason: format!("{reason} ({location})"),
        },
        BackendError::SpecViolation(mut err) => {
            err.detail = Some(match err.detail.take() {
                Some(detail) => format!("{detail}; {location}"),
                None => location,
            });
            BackendError::SpecViolation(err)
        }
    }
}

fn format_operands(operands: &[ValueId], inputs: &[CpuTensor]) -> String {
    operands
        .iter()
        .zip(inputs)
        .map(|(id, tensor)| format!("{id}: {:?}{}", tensor.spec.dtype, tensor.spec.shape))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Arithmetic needed by the numeric kernels.
trait Scalar: Copy + Send + Sync + 'static {
    const ZERO: Self;
    const LOWEST: Self;
    const WIDTH: usize;

    fn add(self, other: Self) -> Self;
    fn sub(self, other: Self) -> Self;
    fn mul(self, other: Self) -> Self;
    fn div(self, other: Self) -> BackendResult<Self>;
    fn neg(self) -> Self;
    fn max(self, other: Self) -> Self;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, out: &mut Vec<u8>);
}

macro_rules! impl_float_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                const ZERO: Self = 0.0;
                const LOWEST: Self = <$ty>::NEG_INFINITY;
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn add(self, other: Self) -> Self {
                    self + other
                }

                fn sub(self, other: Self) -> Self {
                    self - other
                }

                fn mul(self, other: Self) -> Self {
                    self * other
                }

                fn div(self, other: Self) -> BackendResult<Self> {
                    Ok(self / other)
                }

                fn neg(self) -> Self {
                    -self
                }

                fn max(self, other: Self) -> Self {
                    if self.is_nan() || self >= other {
                        self
                    } else {
                        other
                    }
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

macro_rules! impl_int_scalar {
    ($($ty:ty),*) => {
        $(
            impl Scalar for $ty {
                const ZERO: Self = 0;
                const LOWEST: Self = <$ty>::MIN;
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn add(self, other: Self) -> Self {
                    self.wrapping_add(other)
                }

                fn sub(self, other: Self) -> Self {
                    self.wrapping_sub(other)
                }

                fn mul(self, other: Self) -> Self {
                    self.wrapping_mul(other)
                }

                fn div(self, other: Self) -> BackendResult<Self> {
                    if other == 0 {
                        return Err(BackendError::execution("integer division by zero"));
                    }
                    Ok(self.wrapping_div(other))
                }

                fn neg(self) -> Self {
                    self.wrapping_neg()
                }

                fn max(self, other: Self) -> Self {
                    Ord::max(self, other)
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }

                fn write_le(self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_float_scalar!(f32, f64);
impl_int_scalar!(i32, i64);

fn decode<T: Scalar>(bytes: &[u8]) -> Arc<[T]> {
    bytes.chunks_exact(T::WIDTH).map(T::read_le).collect()
}

fn encode<T: Scalar>(values: &[T]) -> Arc<[u8]> {
    let mut bytes = Vec::with_capacity(values.len() * T::WIDTH);
    for &value in values {
        value.write_le(&mut bytes);
    }
    Arc::from(bytes)
}

fn literal_to_tensor(literal: &TensorLiteral) -> BackendResult<CpuTensor> {
    let expected = literal.spec.byte_len().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::NegativeDimension,
            format!("literal shape {} is not concrete", literal.spec.shape),
        )
    })?;
    if literal.bytes.len() != expected {
        return Err(BackendError::execution(format!(
            "literal byte length {} mismatches {:?}{} ({expected} bytes)",
            literal.bytes.len(),
            literal.spec.dtype,
            literal.spec.shape
        )));
    }
    let data = match literal.spec.dtype {
        DType::F32 => TensorData::F32(decode(&literal.bytes)),
        DType::F64 => TensorData::F64(decode(&literal.bytes)),
        DType::Si32 => TensorData::Si32(decode(&literal.bytes)),
        DType::Si64 => TensorData::Si64(decode(&literal.bytes)),
        DType::I1 => TensorData::Bool(Arc::clone(&literal.bytes)),
    };
    Ok(CpuTensor {
        spec: literal.spec.clone(),
        data,
    })
}

fn zeroed_tensor(spec: &TensorSpec) -> BackendResult<CpuTensor> {
    let dims = static_dims(&spec.shape)?;
    let count = dims.iter().product();
    let data = match spec.dtype {
        DType::F32 => TensorData::F32(Arc::from(vec![0.0f32; count])),
        DType::F64 => TensorData::F64(Arc::from(vec![0.0f64; count])),
        DType::Si32 => TensorData::Si32(Arc::from(vec![0i32; count])),
        DType::Si64 => TensorData::Si64(Arc::from(vec![0i64; count])),
        DType::I1 => TensorData::Bool(Arc::from(vec![0u8; count])),
    };
    Ok(CpuTensor {
        spec: TensorSpec::concrete(spec.dtype, &dims),
        data,
    })
}

fn tensor_to_literal(tensor: &CpuTensor) -> BackendResult<TensorLiteral> {
    let bytes = match &tensor.data {
        TensorData::F32(values) => encode(values),
        TensorData::F64(values) => encode(values),
        TensorData::Si32(values) => encode(values),
        TensorData::Si64(values) => encode(values),
        TensorData::Bool(values) => Arc::clone(values),
    };
    Ok(TensorLiteral::new(tensor.spec.clone(), bytes))
}

fn op_elementwise_binary(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    op: ElementwiseBinaryOp,
) -> BackendResult<CpuTensor> {
    let [lhs, rhs] = inputs else {
        return Err(BackendError::execution(
            "elementwise binary expects 2 inputs",
        ));
    };
    let lhs_dims = lhs.dims()?;
    let rhs_dims = rhs.dims()?;
    let out_dims = broadcast_dims(&lhs_dims, &rhs_dims)?;
    let lhs_map = broadcast_offsets(&lhs_dims, &out_dims);
    let rhs_map = broadcast_offsets(&rhs_dims, &out_dims);

    let data = match (&lhs.data, &rhs.data) {
        (TensorData::F32(a), TensorData::F32(b)) => {
            TensorData::F32(binary_kernel(a, b, &lhs_map, &rhs_map, op)?)
        }
        (TensorData::F64(a), TensorData::F64(b)) => {
            TensorData::F64(binary_kernel(a, b, &lhs_map, &rhs_map, op)?)
        }
        (TensorData::Si32(a), TensorData::Si32(b)) => {
            TensorData::Si32(binary_kernel(a, b, &lhs_map, &rhs_map, op)?)
        }
        (TensorData::Si64(a), TensorData::Si64(b)) => {
            TensorData::Si64(binary_kernel(a, b, &lhs_map, &rhs_map, op)?)
        }
        (a, b) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                format!(
                    "elementwise binary on {:?} and {:?}",
                    a.dtype(),
                    b.dtype()
                ),
            ))
        }
    };
    resolve_output(output, out_dims, data)
}

fn binary_kernel<T: Scalar>(
    lhs: &[T],
    rhs: &[T],
    lhs_map: &[usize],
    rhs_map: &[usize],
    op: ElementwiseBinaryOp,
) -> BackendResult<Arc<[T]>> {
    lhs_map
        .iter()
        .zip(rhs_map)
        .map(|(&i, &j)| {
            let (x, y) = (lhs[i], rhs[j]);
            match op {
                ElementwiseBinaryOp::Add => Ok(x.add(y)),
                ElementwiseBinaryOp::Sub => Ok(x.sub(y)),
                ElementwiseBinaryOp::Mul => Ok(x.mul(y)),
                ElementwiseBinaryOp::Div => x.div(y),
            }
        })
        .collect()
}

fn op_elementwise_unary(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    op: ElementwiseUnaryOp,
) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let data = match (op, &input.data) {
        (ElementwiseUnaryOp::Exp, TensorData::F32(values)) => {
            TensorData::F32(values.iter().map(|&x| x.exp()).collect())
        }
        (ElementwiseUnaryOp::Exp, TensorData::F64(values)) => {
            TensorData::F64(values.iter().map(|&x| x.exp()).collect())
        }
        (ElementwiseUnaryOp::Neg, TensorData::F32(values)) => TensorData::F32(negate(values)),
        (ElementwiseUnaryOp::Neg, TensorData::F64(values)) => TensorData::F64(negate(values)),
        (ElementwiseUnaryOp::Neg, TensorData::Si32(values)) => TensorData::Si32(negate(values)),
        (ElementwiseUnaryOp::Neg, TensorData::Si64(values)) => TensorData::Si64(negate(values)),
        (op, data) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                format!("{op:?} on {:?}", data.dtype()),
            ))
        }
    };
    resolve_output(output, input.dims()?, data)
}

fn negate<T: Scalar>(values: &[T]) -> Arc<[T]> {
    values.iter().map(|&x| x.neg()).collect()
}

fn op_reduce(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    spec: &ReduceSpec,
) -> BackendResult<CpuTensor> {
    let input = expect_single(inputs)?;
    let dims = input.dims()?;
    if let Some(axis) = spec.axes.iter().find(|&&axis| axis >= dims.len()) {
        return Err(BackendError::spec(
            SpecErrorCode::InvalidAttributeValue,
            format!("reduce axis {axis} out of range for rank {}", dims.len()),
        ));
    }

    let kept: Vec<usize> = dims
        .iter()
        .enumerate()
        .map(|(axis, &dim)| if spec.axes.contains(&axis) { 1 } else { dim })
        .collect();
    let kept_strides = compute_strides(&kept);
    let target_strides: Vec<usize> = kept_strides
        .iter()
        .enumerate()
        .map(|(axis, &stride)| if spec.axes.contains(&axis) { 0 } else { stride })
        .collect();
    let targets = strided_offsets(&dims, &target_strides);
    let out_len = kept.iter().product();

    let data = match &input.data {
        TensorData::F32(values) => {
            TensorData::F32(reduce_kernel(values, &targets, out_len, spec.kind))
        }
        TensorData::F64(values) => {
            TensorData::F64(reduce_kernel(values, &targets, out_len, spec.kind))
        }
        TensorData::Si32(values) => {
            TensorData::Si32(reduce_kernel(values, &targets, out_len, spec.kind))
        }
        TensorData::Si64(values) => {
            TensorData::Si64(reduce_kernel(values, &targets, out_len, spec.kind))
        }
        TensorData::Bool(_) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                "reduce on bool".to_string(),
            ))
        }
    };

    let out_dims = if spec.keepdims {
        kept
    } else {
        dims.iter()
            .enumerate()
            .filter(|(axis, _)| !spec.axes.contains(axis))
            .map(|(_, &dim)| dim)
            .collect()
    };
    resolve_output(output, out_dims, data)
}

fn reduce_kernel<T: Scalar>(
    values: &[T],
    targets: &[usize],
    out_len: usize,
    kind: ReduceKind,
) -> Arc<[T]> {
    let init = match kind {
        ReduceKind::Sum => T::ZERO,
        ReduceKind::Max => T::LOWEST,
    };
    let mut acc = vec![init; out_len];
    for (&value, &target) in values.iter().zip(targets) {
        acc[target] = match kind {
            ReduceKind::Sum => acc[target].add(value),
            ReduceKind::Max => acc[target].max(value),
        };
    }
    Arc::from(acc)
}

fn op_dot_general(
    inputs: &[CpuTensor],
    output: &TensorSpec,
    spec: &DotGeneralSpec,
) -> BackendResult<CpuTensor> {
    let [lhs, rhs] = inputs else {
        return Err(BackendError::execution("dot_general expects 2 inputs"));
    };
    let lhs_dims = lhs.dims()?;
    let rhs_dims = rhs.dims()?;
    if spec.contract_lhs >= lhs_dims.len() || spec.contract_rhs >= rhs_dims.len() {
        return Err(BackendError::spec(
            SpecErrorCode::InvalidAttributeValue,
            format!(
                "contraction axes ({}, {}) out of range for {:?} x {:?}",
                spec.contract_lhs, spec.contract_rhs, lhs_dims, rhs_dims
            ),
        ));
    }
    let depth = lhs_dims[spec.contract_lhs];
    if depth != rhs_dims[spec.contract_rhs] {
        return Err(BackendError::spec(
            SpecErrorCode::DynamicDimensionMismatch,
            format!(
                "dot contraction extent {} (lhs {:?}) vs {} (rhs {:?})",
                depth, lhs_dims, rhs_dims[spec.contract_rhs], rhs_dims
            ),
        ));
    }

    let lhs_layout = DotLayout::new(&lhs_dims, spec.contract_lhs);
    let rhs_layout = DotLayout::new(&rhs_dims, spec.contract_rhs);
    let mut out_dims = lhs_layout.free_dims.clone();
    out_dims.extend_from_slice(&rhs_layout.free_dims);

    let data = match (&lhs.data, &rhs.data) {
        (TensorData::F32(a), TensorData::F32(b)) => {
            TensorData::F32(dot_kernel(a, b, &lhs_layout, &rhs_layout, depth))
        }
        (TensorData::F64(a), TensorData::F64(b)) => {
            TensorData::F64(dot_kernel(a, b, &lhs_layout, &rhs_layout, depth))
        }
        (TensorData::Si32(a), TensorData::Si32(b)) => {
            TensorData::Si32(dot_kernel(a, b, &lhs_layout, &rhs_layout, depth))
        }
        (TensorData::Si64(a), TensorData::Si64(b)) => {
            TensorData::Si64(dot_kernel(a, b, &lhs_layout, &rhs_layout, depth))
        }
        (a, b) => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                format!("dot_general on {:?} and {:?}", a.dtype(), b.dtype()),
            ))
        }
    };
    resolve_output(output, out_dims, data)
}

/// Offsets of every free-axis position of one dot operand, plus the stride of its contraction
/// axis.
struct DotLayout {
    free_dims: Vec<usize>,
    bases: Vec<usize>,
    contract_stride: usize,
}

impl DotLayout {
    fn new(dims: &[usize], contract: usize) -> Self {
        let strides = compute_strides(dims);
        let (free_dims, free_strides): (Vec<usize>, Vec<usize>) = dims
            .iter()
            .zip(&strides)
            .enumerate()
            .filter(|(axis, _)| *axis != contract)
            .map(|(_, (&dim, &stride))| (dim, stride))
            .unzip();
        DotLayout {
            bases: strided_offsets(&free_dims, &free_strides),
            free_dims,
            contract_stride: strides[contract],
        }
    }
}

fn dot_kernel<T: Scalar>(
    lhs: &[T],
    rhs: &[T],
    lhs_layout: &DotLayout,
    rhs_layout: &DotLayout,
    depth: usize,
) -> Arc<[T]> {
    let mut out = Vec::with_capacity(lhs_layout.bases.len() * rhs_layout.bases.len());
    for &lhs_base in &lhs_layout.bases {
        for &rhs_base in &rhs_layout.bases {
            let mut acc = T::ZERO;
            for k in 0..depth {
                let x = lhs[lhs_base + k * lhs_layout.contract_stride];
                let y = rhs[rhs_base + k * rhs_layout.contract_stride];
                acc = acc.add(x.mul(y));
            }
            out.push(acc);
        }
    }
    Arc::from(out)
}

fn sampleable_range(low: f64, high: f64, width: f64) -> bool {
    low.is_finite() && high.is_finite() && low < high && width.is_finite()
}

fn op_rng_uniform(output: &TensorSpec, spec: &RngUniformSpec) -> BackendResult<CpuTensor> {
    let out_of_range = |low: &dyn std::fmt::Display, high: &dyn std::fmt::Display| {
        BackendError::spec(
            SpecErrorCode::InvalidAttributeValue,
            format!(
                "rng_uniform bounds [{low}, {high}) are not a finite range in {:?}",
                spec.dtype
            ),
        )
    };
    let count = spec.shape.iter().product();
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let data = match spec.dtype {
        DType::F32 => {
            let (low, high) = (spec.minval as f32, spec.maxval as f32);
            if !sampleable_range(low.into(), high.into(), (high - low).into()) {
                return Err(out_of_range(&low, &high));
            }
            let dist = Uniform::new(low, high);
            TensorData::F32(dist.sample_iter(&mut rng).take(count).collect())
        }
        DType::F64 => {
            let (low, high) = (spec.minval, spec.maxval);
            if !sampleable_range(low, high, high - low) {
                return Err(out_of_range(&low, &high));
            }
            let dist = Uniform::new(low, high);
            TensorData::F64(dist.sample_iter(&mut rng).take(count).collect())
        }
        other => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                format!("rng_uniform produces floats, requested {other:?}"),
            ))
        }
    };
    resolve_output(output, spec.shape.clone(), data)
}

fn op_rng_normal(output: &TensorSpec, spec: &RngNormalSpec) -> BackendResult<CpuTensor> {
    let invalid = |err: rand_distr::NormalError| {
        BackendError::spec(
            SpecErrorCode::InvalidAttributeValue,
            format!(
                "rng_normal mean {} stddev {}: {err}",
                spec.mean, spec.stddev
            ),
        )
    };
    let count = spec.shape.iter().product();
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let data = match spec.dtype {
        DType::F32 => {
            let dist = Normal::new(spec.mean as f32, spec.stddev as f32).map_err(invalid)?;
            TensorData::F32(dist.sample_iter(&mut rng).take(count).collect())
        }
        DType::F64 => {
            let dist = Normal::new(spec.mean, spec.stddev).map_err(invalid)?;
            TensorData::F64(dist.sample_iter(&mut rng).take(count).collect())
        }
        other => {
            return Err(BackendError::spec(
                SpecErrorCode::DTypeNotSupported,
                format!("rng_normal produces floats, requested {other:?}"),
            ))
        }
    };
    resolve_output(output, spec.shape.clone(), data)
}

fn expect_single(inputs: &[CpuTensor]) -> BackendResult<&CpuTensor> {
    if inputs.len() != 1 {
        Err(BackendError::execution("operation expects single input"))
    } else {
        Ok(&inputs[0])
    }
}

fn static_dims(shape: &Shape) -> BackendResult<Vec<usize>> {
    shape.static_dims().ok_or_else(|| {
        BackendError::spec(
            SpecErrorCode::NegativeDimension,
            format!("shape {shape} is not concrete at runtime"),
        )
    })
}

fn compute_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; dims.len()];
    let mut acc = 1usize;
    for (i, dim) in dims.iter().enumerate().rev() {
        strides[i] = acc;
        acc *= *dim;
    }
    strides
}

/// Linear offsets `sum(coord[i] * strides[i])` for every coordinate of `dims` in row-major
/// order. A zero stride pins that axis, which is how broadcasting and reduction targets are
/// expressed.
fn strided_offsets(dims: &[usize], strides: &[usize]) -> Vec<usize> {
    let count: usize = dims.iter().product();
    let mut offsets = Vec::with_capacity(count);
    if count == 0 {
        return offsets;
    }
    let mut coords = vec![0usize; dims.len()];
    for _ in 0..count {
        offsets.push(coords.iter().zip(strides).map(|(c, s)| c * s).sum());
        for axis in (0..dims.len()).rev() {
            coords[axis] += 1;
            if coords[axis] < dims[axis] {
                break;
            }
            coords[axis] = 0;
        }
    }
    offsets
}

fn broadcast_dims(lhs: &[usize], rhs: &[usize]) -> BackendResult<Vec<usize>> {
    let rank = lhs.len().max(rhs.len());
    let mut dims = vec![0; rank];
    for (offset, slot) in dims.iter_mut().rev().enumerate() {
        let a = lhs.len().checked_sub(offset + 1).map_or(1, |i| lhs[i]);
        let b = rhs.len().checked_sub(offset + 1).map_or(1, |i| rhs[i]);
        *slot = match (a, b) {
            (a, b) if a == b => a,
            (1, b) => b,
            (a, 1) => a,
            (a, b) => {
                return Err(BackendError::spec(
                    SpecErrorCode::DynamicDimensionMismatch,
                    format!("cannot broadcast {lhs:?} with {rhs:?}: extents {a} and {b}"),
                ))
            }
        };
    }
    Ok(dims)
}

/// Maps each output position to the input element it reads under trailing-axis broadcasting.
fn broadcast_offsets(input: &[usize], out_dims: &[usize]) -> Vec<usize> {
    let lead = out_dims.len() - input.len();
    let input_strides = compute_strides(input);
    let strides: Vec<usize> = (0..out_dims.len())
        .map(|axis| match axis.checked_sub(lead) {
            Some(in_axis) if input[in_axis] != 1 => input_strides[in_axis],
            _ => 0,
        })
        .collect();
    strided_offsets(out_dims, &strides)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f64_tensor(dims: &[usize], values: Vec<f64>) -> CpuTensor {
        CpuTensor {
            spec: TensorSpec::concrete(DType::F64, dims),
            data: TensorData::F64(Arc::from(values)),
        }
    }

    fn f64_values(tensor: &CpuTensor) -> Vec<f64> {
        match &tensor.data {
            TensorData::F64(values) => values.to_vec(),
            other => panic!("expected f64 data, got {:?}", other.dtype()),
        }
    }

    #[test]
    fn strided_offsets_walk_row_major() {
        assert_eq!(strided_offsets(&[2, 3], &[3, 1]), vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(strided_offsets(&[2, 3], &[0, 1]), vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(strided_offsets(&[], &[]), vec![0]);
        assert!(strided_offsets(&[0, 3], &[3, 1]).is_empty());
    }

    #[test]
    fn broadcast_dims_follow_trailing_alignment() {
        assert_eq!(broadcast_dims(&[4, 1, 3], &[5, 1]).unwrap(), vec![4, 5, 3]);
        assert!(broadcast_dims(&[2, 3], &[4]).is_err());
    }

    #[test]
    fn dot_contracts_last_with_first_axis() {
        let lhs = f64_tensor(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let rhs = f64_tensor(&[3, 2], vec![7.0, 8.0, 9.0, 10.0, 11.0, 12.0]);
        let output = TensorSpec::new(DType::F64, Shape::ranked([-1, 2]));
        let spec = DotGeneralSpec {
            contract_lhs: 1,
            contract_rhs: 0,
        };
        let out = op_dot_general(&[lhs, rhs], &output, &spec).unwrap();
        assert_eq!(out.dims().unwrap(), vec![2, 2]);
        assert_eq!(f64_values(&out), vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn dot_rejects_runtime_contraction_mismatch() {
        let lhs = f64_tensor(&[1, 3], vec![1.0; 3]);
        let rhs = f64_tensor(&[2, 2], vec![1.0; 4]);
        let output = TensorSpec::new(DType::F64, Shape::ranked([1, 2]));
        let spec = DotGeneralSpec {
            contract_lhs: 1,
            contract_rhs: 0,
        };
        let err = op_dot_general(&[lhs, rhs], &output, &spec).unwrap_err();
        assert!(matches!(err, BackendError::SpecViolation(_)));
    }

    #[test]
    fn reduce_with_and_without_keepdims() {
        let input = f64_tensor(&[2, 3], vec![1.0, 5.0, 3.0, -1.0, -2.0, -3.0]);
        let max = ReduceSpec {
            kind: ReduceKind::Max,
            axes: vec![1],
            keepdims: true,
        };
        let out = op_reduce(
            &[input.clone()],
            &TensorSpec::new(DType::F64, Shape::ranked([2, 1])),
            &max,
        )
        .unwrap();
        assert_eq!(f64_values(&out), vec![5.0, -1.0]);

        let sum = ReduceSpec {
            kind: ReduceKind::Sum,
            axes: vec![0],
            keepdims: false,
        };
        let output = TensorSpec::new(DType::F64, Shape::ranked([3]));
        let out = op_reduce(&[input], &output, &sum).unwrap();
        assert_eq!(f64_values(&out), vec![0.0, 3.0, 0.0]);
    }

    #[test]
    fn binary_broadcasts_row_vector() {
        let lhs = f64_tensor(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let rhs = f64_tensor(&[2], vec![10.0, 100.0]);
        let out = op_elementwise_binary(
            &[lhs, rhs],
            &TensorSpec::new(DType::F64, Shape::ranked([2, 2])),
            ElementwiseBinaryOp::Mul,
        )
        .unwrap();
        assert_eq!(f64_values(&out), vec![10.0, 200.0, 30.0, 400.0]);
    }

    #[test]
    fn integer_division_by_zero_fails() {
        let lhs = CpuTensor {
            spec: TensorSpec::concrete(DType::Si32, &[2]),
            data: TensorData::Si32(Arc::from(vec![4, 2])),
        };
        let rhs = CpuTensor {
            spec: TensorSpec::concrete(DType::Si32, &[2]),
            data: TensorData::Si32(Arc::from(vec![2, 0])),
        };
        let err = op_elementwise_binary(
            &[lhs, rhs],
            &TensorSpec::new(DType::Si32, Shape::ranked([2])),
            ElementwiseBinaryOp::Div,
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Execution { .. }));
    }

    #[test]
    fn declared_known_axes_are_enforced() {
        let err = resolve_output(
            &TensorSpec::new(DType::F64, Shape::ranked([3])),
            vec![2],
            TensorData::F64(Arc::from(vec![0.0, 0.0])),
        )
        .unwrap_err();
        assert!(matches!(err, BackendError::Execution { .. }));
    }

    #[test]
    fn same_seed_reproduces_samples() {
        let spec = RngNormalSpec {
            shape: vec![16],
            dtype: DType::F64,
            mean: 0.0,
            stddev: 1.0,
            seed: 7,
        };
        let output = TensorSpec::concrete(DType::F64, &[16]);
        let first = op_rng_normal(&output, &spec).unwrap();
        let second = op_rng_normal(&output, &spec).unwrap();
        assert_eq!(f64_values(&first), f64_values(&second));

        let other = op_rng_normal(&output, &RngNormalSpec { seed: 8, ..spec }).unwrap();
        assert_ne!(f64_values(&first), f64_values(&other));
    }

    #[test]
    fn uniform_rejects_ranges_the_sampler_cannot_represent() {
        let narrow = RngUniformSpec {
            shape: vec![4],
            dtype: DType::F32,
            minval: -1e39,
            maxval: 0.0,
            seed: 1,
        };
        let wide = RngUniformSpec {
            dtype: DType::F64,
            ..narrow.clone()
        };
        let cases = [
            narrow.clone(),
            RngUniformSpec {
                minval: -3e38,
                maxval: 3e38,
                ..narrow.clone()
            },
            RngUniformSpec {
                minval: -1e308,
                maxval: 1e308,
                ..wide.clone()
            },
            RngUniformSpec {
                minval: 2.0,
                maxval: 2.0,
                ..wide.clone()
            },
        ];
        for spec in cases {
            let output = TensorSpec::concrete(spec.dtype, &[4]);
            match op_rng_uniform(&output, &spec) {
                Err(BackendError::SpecViolation(err)) => {
                    assert_eq!(err.code, SpecErrorCode::InvalidAttributeValue, "{spec:?}")
                }
                other => panic!("{spec:?}: expected an attribute error, got {other:?}"),
            }
        }

        // The same bounds are representable once widened to f64.
        let sampled = op_rng_uniform(&TensorSpec::concrete(DType::F64, &[4]), &wide).unwrap();
        assert!(f64_values(&sampled)
            .iter()
            .all(|v| (-1e39..0.0).contains(v)));
    }
}
