use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use kgraph::backend::spec::{BackendResult, PortableBackend, Program, TensorInit, TensorLiteral};
use kgraph::{BackendConfig, DType, Error, FeedDict, GraphBackend, HostTensor, TensorRole};
use kgraph_backend_ref_cpu::CpuPortableBackend;

struct CountingBackend {
    inner: CpuPortableBackend,
    runs: AtomicUsize,
}

impl CountingBackend {
    fn new() -> Self {
        CountingBackend {
            inner: CpuPortableBackend::new(),
            runs: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }
}

type CpuHandle = <CpuPortableBackend as PortableBackend>::TensorHandle;

impl PortableBackend for CountingBackend {
    type TensorHandle = CpuHandle;

    fn backend_name(&self) -> &str {
        "cpu-counting"
    }

    fn materialize(&self, init: TensorInit) -> BackendResult<Self::TensorHandle> {
        self.inner.materialize(init)
    }

    fn to_literal(&self, tensor: &Self::TensorHandle) -> BackendResult<TensorLiteral> {
        self.inner.to_literal(tensor)
    }

    fn run_program(
        &self,
        program: &Program,
        entry_inputs: &[Self::TensorHandle],
    ) -> BackendResult<Vec<Self::TensorHandle>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.inner.run_program(program, entry_inputs)
    }
}

fn counting_backend() -> (Arc<CountingBackend>, GraphBackend<CountingBackend>) {
    let engine = Arc::new(CountingBackend::new());
    let config = BackendConfig {
        floatx: DType::Float32,
        seed: Some(3),
    };
    let backend = GraphBackend::with_config(Arc::clone(&engine), config);
    (engine, backend)
}

#[test]
fn each_evaluation_is_one_engine_run() -> Result<()> {
    let (engine, backend) = counting_backend();
    let a = backend.ones([2usize, 2], None)?;
    let b = backend.mul(&a, &a)?;
    let c = backend.sum(&b, None, false)?;
    assert_eq!(engine.calls(), 0, "building the graph must not execute it");

    assert_eq!(backend.eval(&c)?.to_vec::<f32>()?, vec![4.0]);
    assert_eq!(engine.calls(), 1);

    let outputs = backend.eval_many(&[&a, &b, &c], &FeedDict::new())?;
    assert_eq!(outputs.len(), 3);
    assert_eq!(engine.calls(), 2);
    Ok(())
}

#[test]
fn failed_plans_never_reach_the_engine() -> Result<()> {
    let (engine, backend) = counting_backend();
    let x = backend.placeholder([2usize], None, Some("x"))?;
    let y = backend.exp(&x)?;
    assert!(matches!(
        backend.eval(&y),
        Err(Error::UnboundPlaceholder { ref name }) if name == "x"
    ));

    backend.dispose()?;
    assert!(matches!(backend.eval(&y), Err(Error::DisposedBackend)));
    assert_eq!(engine.calls(), 0);
    Ok(())
}

#[test]
fn engine_failures_carry_instruction_context() -> Result<()> {
    let (_engine, backend) = counting_backend();
    let x = backend.placeholder([None], None, Some("x"))?;
    let bias = HostTensor::from_vec(vec![3], vec![1.0f32, 2.0, 3.0])?;
    let bias = backend.constant(&bias, None, None)?;
    let y = backend.add(&x, &bias)?;
    assert_eq!(y.int_shape()?, Some(vec![Some(3)]));

    let mut feeds = FeedDict::new();
    feeds.insert(&x, HostTensor::zeros(vec![4], DType::Float32))?;
    let err = backend.eval_with(&y, &feeds).unwrap_err();
    let message = err.to_string();
    assert!(matches!(err, Error::EngineExecution(_)), "{message}");
    assert!(message.contains("add"), "{message}");
    assert!(message.contains("instruction #"), "{message}");

    // A broadcastable runtime extent resolves the unknown axis.
    let mut feeds = FeedDict::new();
    feeds.insert(&x, HostTensor::zeros(vec![1], DType::Float32))?;
    assert_eq!(backend.eval_with(&y, &feeds)?.to_vec::<f32>()?, vec![1.0, 2.0, 3.0]);
    Ok(())
}

#[test]
fn integer_division_by_zero_is_an_engine_error() -> Result<()> {
    let (_engine, backend) = counting_backend();
    let a = backend.constant(&HostTensor::from_vec(vec![2], vec![6i64, 1])?, None, None)?;
    let b = backend.constant(&HostTensor::from_vec(vec![2], vec![3i64, 0])?, None, None)?;
    let q = backend.divide(&a, &b)?;
    assert!(matches!(backend.eval(&q), Err(Error::EngineExecution(_))));
    Ok(())
}

#[test]
fn dropping_the_backend_disposes_its_graph() -> Result<()> {
    let engine = Arc::new(CpuPortableBackend::new());
    let orphan = {
        let backend = GraphBackend::with_config(
            Arc::clone(&engine),
            BackendConfig {
                floatx: DType::Float64,
                seed: None,
            },
        );
        let t = backend.zeros([2usize], None)?;
        assert_eq!(t.dtype(), DType::Float64);
        assert_eq!(t.eval()?.to_vec::<f64>()?, vec![0.0, 0.0]);
        t
    };
    assert_eq!(orphan.role(), TensorRole::Variable);
    assert!(matches!(orphan.eval(), Err(Error::DisposedBackend)));
    Ok(())
}

#[test]
fn builders_validate_dtypes_statically() -> Result<()> {
    let (engine, backend) = counting_backend();
    let f = backend.ones([2usize], None)?;
    let i = backend.ones([2usize], Some(DType::Int32))?;
    assert!(matches!(
        backend.add(&f, &i),
        Err(Error::DTypeMismatch { op: "add", .. })
    ));
    assert!(matches!(backend.exp(&i), Err(Error::UnsupportedDType { .. })));
    assert!(matches!(backend.softmax(&i), Err(Error::UnsupportedDType { .. })));

    let flags = backend.constant(
        &HostTensor::from_vec(vec![2], vec![true, false])?,
        None,
        None,
    )?;
    assert_eq!(flags.dtype(), DType::Bool);
    assert!(matches!(
        backend.sum(&flags, None, false),
        Err(Error::UnsupportedDType { .. })
    ));
    assert!(matches!(
        backend.random_uniform([2usize], 0.0, 1.0, Some(DType::Int32), None, None),
        Err(Error::UnsupportedDType { .. })
    ));
    assert_eq!(engine.calls(), 0);
    Ok(())
}

#[test]
fn uniform_bounds_are_checked_before_the_engine_runs() -> Result<()> {
    let (engine, backend) = counting_backend();
    let f32_overflow = backend.random_uniform([4usize], -1e39, 0.0, None, Some(1), None);
    assert!(matches!(f32_overflow, Err(Error::InvalidArgument(_))));
    let width_overflow =
        backend.random_uniform([4usize], -1e308, 1e308, Some(DType::Float64), Some(1), None);
    assert!(matches!(width_overflow, Err(Error::InvalidArgument(_))));
    assert_eq!(engine.calls(), 0);
    Ok(())
}
