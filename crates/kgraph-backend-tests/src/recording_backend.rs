use std::sync::{Arc, Mutex};

use kgraph::backend::spec::{
    BackendError, BackendResult, Function, Operation, PortableBackend, Program, TensorInit,
    TensorLiteral, TensorSpec,
};

/// Test-only engine that records the latest program instead of executing it.
///
/// Handles are just tensor specs. Reading a result back yields zeros of the declared spec, so
/// evaluation round-trips as long as every result has a concrete shape.
#[derive(Default)]
pub struct RecordingBackend {
    last_program: Mutex<Option<Program>>,
    materialized: Mutex<Vec<TensorInit>>,
}

impl RecordingBackend {
    pub fn recorded_program(&self) -> Option<Program> {
        self.last_program
            .lock()
            .expect("backend mutex poisoned")
            .clone()
    }

    pub fn recorded_program_or_panic(&self) -> Program {
        self.recorded_program()
            .expect("backend should record emitted program")
    }

    pub fn recorded_entry_function_or_panic(&self) -> Function {
        self.recorded_program_or_panic()
            .entry_function()
            .expect("captured function present")
            .clone()
    }

    /// Operation names of the recorded entry function, in program order.
    pub fn recorded_op_names(&self) -> Vec<&'static str> {
        self.recorded_entry_function_or_panic()
            .body
            .iter()
            .map(|instruction| instruction.op.name())
            .collect()
    }

    /// Every initialisation payload handed to `materialize`, oldest first.
    pub fn materialized(&self) -> Vec<TensorInit> {
        self.materialized
            .lock()
            .expect("backend mutex poisoned")
            .clone()
    }
}

fn result_spec(function: &Function, id: kgraph::backend::spec::ValueId) -> Option<TensorSpec> {
    function
        .body
        .iter()
        .find(|instruction| instruction.id == id)
        .map(|instruction| instruction.output.clone())
        .or_else(|| {
            function
                .parameter_ids
                .iter()
                .position(|param| *param == id)
                .map(|idx| function.parameters[idx].clone())
        })
}

impl PortableBackend for RecordingBackend {
    type TensorHandle = TensorSpec;

    fn backend_name(&self) -> &str {
        "recording"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        let spec = match &init {
            TensorInit::Literal(literal) => literal.spec.clone(),
            TensorInit::Zeroed(spec) => spec.clone(),
        };
        self.materialized
            .lock()
            .expect("backend mutex poisoned")
            .push(init);
        Ok(spec)
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        let len = tensor.byte_len().ok_or_else(|| {
            BackendError::execution(format!(
                "recording backend cannot read back unresolved shape {}",
                tensor.shape
            ))
        })?;
        Ok(TensorLiteral::new(
            tensor.clone(),
            Arc::from(vec![0u8; len]),
        ))
    }

    fn run_program(
        &self,
        program: &Program,
        _entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        let function = program
            .entry_function()
            .ok_or_else(|| BackendError::execution("entry function not found"))?;
        let outputs = function
            .result_ids
            .iter()
            .map(|id| {
                result_spec(function, *id).ok_or_else(|| {
                    BackendError::execution(format!("result {id} is not defined"))
                })
            })
            .collect::<BackendResult<Vec<_>>>()?;
        self.last_program
            .lock()
            .expect("backend mutex poisoned")
            .replace(program.clone());
        Ok(outputs)
    }
}

/// Literal payloads of every `Constant` instruction in `function`.
pub fn constant_literals(function: &Function) -> Vec<&TensorLiteral> {
    function
        .body
        .iter()
        .filter_map(|instruction| match &instruction.op {
            Operation::Constant(literal) => Some(literal),
            _ => None,
        })
        .collect()
}
