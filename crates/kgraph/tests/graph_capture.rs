use std::sync::Arc;

use kgraph::backend::spec::{
    DType as EngineDType, ElementwiseBinaryOp, ElementwiseUnaryOp, Operation, Program,
    ReduceKind, Shape as EngineShape, TensorInit,
};
use kgraph::{BackendConfig, DType, Error, FeedDict, GraphBackend, HostTensor};
use kgraph_backend_tests::recording_backend::{constant_literals, RecordingBackend};

fn recording_backend(seed: Option<u64>) -> (Arc<RecordingBackend>, GraphBackend<RecordingBackend>) {
    let engine = Arc::new(RecordingBackend::default());
    let config = BackendConfig {
        floatx: DType::Float32,
        seed,
    };
    let backend = GraphBackend::with_config(Arc::clone(&engine), config);
    (engine, backend)
}

#[test]
fn softmax_lowers_to_five_instructions() {
    let (engine, backend) = recording_backend(None);
    let x = backend.placeholder([2usize, 4], None, Some("x")).unwrap();
    let probs = backend.softmax(&x).unwrap();
    assert_eq!(probs.shape(), x.shape());

    let mut feeds = FeedDict::new();
    feeds
        .insert(&x, HostTensor::zeros(vec![2, 4], DType::Float32))
        .unwrap();
    let out = backend.eval_with(&probs, &feeds).unwrap();
    assert_eq!(out.dims(), [2, 4]);

    let function = engine.recorded_entry_function_or_panic();
    assert_eq!(function.parameter_ids, vec![x.value()]);
    assert_eq!(
        engine.recorded_op_names(),
        vec!["reduce_max", "sub", "exp", "reduce_sum", "div"]
    );

    let body = &function.body;
    match &body[0].op {
        Operation::Reduce(spec) => {
            assert_eq!(spec.kind, ReduceKind::Max);
            assert_eq!(spec.axes, vec![1]);
            assert!(spec.keepdims);
        }
        other => panic!("expected leading reduce_max, got {other:?}"),
    }
    assert_eq!(body[0].output.shape, EngineShape::ranked([2, 1]));
    assert_eq!(body[1].operands, vec![x.value(), body[0].id]);
    assert_eq!(
        body[2].op,
        Operation::ElementwiseUnary(ElementwiseUnaryOp::Exp)
    );
    assert_eq!(body[3].operands, vec![body[2].id]);
    assert_eq!(
        body[4].op,
        Operation::ElementwiseBinary(ElementwiseBinaryOp::Div)
    );
    assert_eq!(body[4].operands, vec![body[2].id, body[3].id]);
    assert_eq!(function.result_ids, vec![probs.value()]);
}

#[test]
fn dot_contracts_last_lhs_axis_with_first_rhs_axis() {
    let (engine, backend) = recording_backend(None);
    let x = backend
        .placeholder([None, Some(3), Some(4)], None, Some("x"))
        .unwrap();
    let w = backend
        .variable(&HostTensor::zeros(vec![4, 5], DType::Float32), None, Some("w"))
        .unwrap();
    let y = backend.dot(&x, &w).unwrap();
    assert_eq!(y.int_shape().unwrap(), Some(vec![None, Some(3), Some(5)]));

    let mut feeds = FeedDict::new();
    feeds
        .insert(&x, HostTensor::zeros(vec![2, 3, 4], DType::Float32))
        .unwrap();
    // The recording engine cannot resolve the unknown batch axis, so read-back fails after the
    // program was recorded.
    let err = backend.eval_with(&y, &feeds).unwrap_err();
    assert!(matches!(err, Error::EngineExecution(_)), "{err}");

    let function = engine.recorded_entry_function_or_panic();
    assert_eq!(function.parameter_ids, vec![x.value(), w.value()]);
    assert_eq!(function.parameters[0].shape, EngineShape::ranked([-1, 3, 4]));
    assert_eq!(function.body.len(), 1);
    match &function.body[0].op {
        Operation::DotGeneral(spec) => {
            assert_eq!(spec.contract_lhs, 2);
            assert_eq!(spec.contract_rhs, 0);
        }
        other => panic!("expected dot_general, got {other:?}"),
    }
    assert_eq!(function.body[0].output.dtype, EngineDType::F32);
    assert_eq!(function.body[0].output.shape, EngineShape::ranked([-1, 3, 5]));
}

#[test]
fn host_arrays_are_embedded_as_constants() {
    let (engine, backend) = recording_backend(None);
    let host = HostTensor::from_rows(&[[1.0f64, 2.0], [3.0, 4.0]]).unwrap();
    let v = backend
        .variable(&HostTensor::zeros(vec![2, 2], DType::Float64), None, None)
        .unwrap();
    let product = backend.mul(&host, &v).unwrap();
    assert_eq!(product.dtype(), DType::Float64);
    backend.eval(&product).unwrap();

    let function = engine.recorded_entry_function_or_panic();
    let literals = constant_literals(&function);
    assert_eq!(literals.len(), 1);
    assert_eq!(literals[0].spec.dtype, EngineDType::F64);
    assert_eq!(literals[0].spec.shape, EngineShape::ranked([2, 2]));
    assert_eq!(&*literals[0].bytes, host.as_bytes());
    assert_eq!(function.parameter_ids, vec![v.value()]);
}

#[test]
fn only_reachable_nodes_are_lowered() {
    let (engine, backend) = recording_backend(None);
    let a = backend.ones([3usize], None).unwrap();
    let unused_input = backend.placeholder([3usize], None, Some("unused")).unwrap();
    let _unused = backend.exp(&unused_input).unwrap();
    let b = backend.neg(&a).unwrap();
    let c = backend.add(&a, &b).unwrap();
    assert_eq!(backend.arena().node_count().unwrap(), 5);

    backend.eval(&c).unwrap();
    let function = engine.recorded_entry_function_or_panic();
    assert_eq!(function.parameter_ids, vec![a.value()]);
    assert_eq!(engine.recorded_op_names(), vec!["neg", "add"]);
}

#[test]
fn variables_materialize_once_and_feeds_per_run() {
    let (engine, backend) = recording_backend(None);
    let z = backend.zeros([2usize, 3], Some(DType::Int32)).unwrap();
    let x = backend.placeholder([2usize, 3], Some(DType::Int32), None).unwrap();
    let y = backend.add(&x, &z).unwrap();

    let materialized = engine.materialized();
    assert_eq!(materialized.len(), 1);
    match &materialized[0] {
        TensorInit::Zeroed(spec) => {
            assert_eq!(spec.dtype, EngineDType::Si32);
            assert_eq!(spec.shape, EngineShape::ranked([2, 3]));
        }
        other => panic!("zeros should allocate on the engine, got {other:?}"),
    }

    let mut feeds = FeedDict::new();
    feeds
        .insert(&x, HostTensor::zeros(vec![2, 3], DType::Int32))
        .unwrap();
    backend.eval_with(&y, &feeds).unwrap();
    backend.eval_with(&y, &feeds).unwrap();
    let materialized = engine.materialized();
    assert_eq!(materialized.len(), 3);
    assert!(materialized[1..]
        .iter()
        .all(|init| matches!(init, TensorInit::Literal(_))));
}

#[test]
fn random_ops_record_their_seeds() {
    let (engine, backend) = recording_backend(Some(11));
    let seeded = backend
        .random_uniform([4usize], -1.0, 1.0, None, Some(3), None)
        .unwrap();
    let unseeded = backend
        .random_normal([4usize], 0.5, 2.0, Some(DType::Float64), None, Some("noise"))
        .unwrap();
    backend.eval_many(&[&seeded, &unseeded], &FeedDict::new()).unwrap();

    let function = engine.recorded_entry_function_or_panic();
    assert!(function.parameters.is_empty());
    match &function.body[0].op {
        Operation::RngUniform(spec) => {
            assert_eq!(spec.seed, 3);
            assert_eq!(spec.shape, vec![4]);
            assert_eq!((spec.minval, spec.maxval), (-1.0, 1.0));
            assert_eq!(spec.dtype, EngineDType::F32);
        }
        other => panic!("expected rng_uniform, got {other:?}"),
    }
    match &function.body[1].op {
        Operation::RngNormal(spec) => {
            assert_eq!(spec.seed, 11);
            assert_eq!((spec.mean, spec.stddev), (0.5, 2.0));
            assert_eq!(spec.dtype, EngineDType::F64);
        }
        other => panic!("expected rng_normal, got {other:?}"),
    }
}

#[test]
fn unnamed_placeholder_is_reported_by_value_id() {
    let (engine, backend) = recording_backend(None);
    let x = backend.placeholder([1usize], None, None).unwrap();
    match backend.eval(&x) {
        Err(Error::UnboundPlaceholder { name }) => assert_eq!(name, x.value().to_string()),
        other => panic!("expected unbound placeholder, got {other:?}"),
    }
    assert!(engine.recorded_program().is_none());
}

#[test]
fn recorded_program_survives_json_roundtrip() {
    let (engine, backend) = recording_backend(Some(1));
    let x = backend.placeholder([None, Some(2)], None, None).unwrap();
    let w = backend
        .constant(&HostTensor::from_rows(&[[1.0f32], [2.0]]).unwrap(), None, None)
        .unwrap();
    let y = backend.softmax(&backend.dot(&x, &w).unwrap()).unwrap();
    let mut feeds = FeedDict::new();
    feeds
        .insert(&x, HostTensor::zeros(vec![5, 2], DType::Float32))
        .unwrap();
    let _ = backend.eval_with(&y, &feeds);

    let program = engine.recorded_program_or_panic();
    let json = program.to_json_string().unwrap();
    assert_eq!(Program::from_json_str(&json).unwrap(), program);
}

#[test]
fn unmappable_host_arrays_never_reach_the_engine() {
    let (engine, backend) = recording_backend(None);
    let halfwords = HostTensor::from_vec(vec![2], vec![7u16, 9]).unwrap();
    assert!(matches!(
        backend.variable(&halfwords, None, Some("w")),
        Err(Error::UnsupportedDType { .. })
    ));
    assert!(matches!(
        backend.constant(&halfwords, None, None),
        Err(Error::UnsupportedDType { .. })
    ));
    assert!(engine.materialized().is_empty());
    assert_eq!(backend.arena().node_count().unwrap(), 0);
}
