use std::sync::Arc;

use anyhow::{ensure, Result};
use kgraph::backend::spec::PortableBackend;
use kgraph::{
    with_backend, BackendConfig, DType, Error, FeedDict, GraphBackend, HostTensor, TensorRole,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn backend_for<B: PortableBackend + 'static>(engine: &Arc<B>) -> GraphBackend<B> {
    GraphBackend::with_config(Arc::clone(engine), config(None))
}

fn config(seed: Option<u64>) -> BackendConfig {
    BackendConfig {
        floatx: DType::Float32,
        seed,
    }
}

fn assert_close(actual: &[f64], expected: &[f64], tol: f64) -> Result<()> {
    ensure!(
        actual.len() == expected.len(),
        "length mismatch: {} vs {}",
        actual.len(),
        expected.len()
    );
    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        ensure!((a - e).abs() <= tol, "element {idx}: {a} vs {e} (tol {tol})");
    }
    Ok(())
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

pub fn ndim_reports_rank<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([2usize, 4, 5], None, None)?;
    ensure!(backend.ndim(&x)? == Some(3));

    let v = backend.variable(&HostTensor::from_rows(&[[1.0f32, 2.0], [3.0, 4.0]])?, None, None)?;
    ensure!(backend.ndim(&v)? == Some(2));
    ensure!(v.role() == TensorRole::Variable);
    ensure!(v.dtype() == DType::Float32);

    let unknown = backend.placeholder(kgraph::Shape::unknown(), None, None)?;
    ensure!(backend.ndim(&unknown)?.is_none());
    ensure!(backend.int_shape(&unknown)?.is_none());
    Ok(())
}

pub fn variable_roundtrips_host_values<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let host = HostTensor::from_rows(&[[1.0f64, 2.0], [3.0, 4.0]])?;
    let v = backend.variable(&host, None, Some("weights"))?;
    let c = backend.constant(&host, Some(DType::Float32), None)?;
    ensure!(backend.dtype(&v)? == DType::Float64);
    ensure!(backend.dtype(&c)? == DType::Float32);
    ensure!(c.role() == TensorRole::Constant);

    let first = backend.eval(&v)?;
    ensure!(first == host, "variable did not round-trip: {first:?}");
    ensure!(first == backend.eval(&v)?);
    let folded = backend.eval(&c)?;
    ensure!(folded.to_vec::<f32>()? == vec![1.0, 2.0, 3.0, 4.0]);
    ensure!(folded == backend.eval(&c)?);
    Ok(())
}

pub fn integer_rows_keep_their_dtype<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let v = backend.variable(&HostTensor::from_rows(&[[1i32, 2], [3, 4]])?, None, None)?;
    ensure!(backend.int_shape(&v)? == Some(vec![Some(2), Some(2)]));
    ensure!(backend.dtype(&v)? == DType::Int32);
    ensure!(backend.eval(&v)?.to_vec::<i32>()? == vec![1, 2, 3, 4]);
    Ok(())
}

pub fn unmappable_host_elements_are_rejected<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let halfwords = HostTensor::from_vec(vec![2], vec![1u16, 2])?;
    ensure!(matches!(
        backend.variable(&halfwords, None, None),
        Err(Error::UnsupportedDType { .. })
    ));
    ensure!(matches!(
        backend.constant(&halfwords, None, None),
        Err(Error::UnsupportedDType { .. })
    ));
    ensure!(matches!(
        backend.mul(&halfwords, &halfwords),
        Err(Error::UnsupportedDType { .. })
    ));
    ensure!(backend.arena().node_count()? == 0);

    // An explicit dtype converts the elements instead.
    let cast = backend.constant(&halfwords, Some(DType::Int64), None)?;
    ensure!(backend.eval(&cast)?.to_vec::<i64>()? == vec![1, 2]);
    Ok(())
}

pub fn partial_shape_flows_through_dot<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([None, Some(2)], None, Some("x"))?;
    let w = backend.variable(
        &HostTensor::from_rows(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]])?,
        None,
        None,
    )?;
    let y = backend.dot(&x, &w)?;
    ensure!(backend.int_shape(&y)? == Some(vec![None, Some(3)]));
    ensure!(y.engine_spec().shape.dims() == Some(&[-1i64, 3][..]));

    let mut feeds = FeedDict::new();
    feeds.insert(
        &x,
        HostTensor::from_vec(vec![4, 2], vec![1.0f32, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, 0.0])?,
    )?;
    let out = backend.eval_with(&y, &feeds)?;
    ensure!(out.dims() == [4, 3]);
    ensure!(
        out.to_vec::<f32>()?
            == vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 5.0, 7.0, 9.0, 2.0, 4.0, 6.0]
    );
    Ok(())
}

pub fn dot_matches_host_reference<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let mut rng = StdRng::seed_from_u64(42);
    let (m, k, n) = (5, 7, 3);
    let a: Vec<f64> = (0..m * k).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let b: Vec<f64> = (0..k * n).map(|_| rng.gen_range(-1.0..1.0)).collect();

    let mut expected = vec![0.0; m * n];
    for i in 0..m {
        for j in 0..n {
            expected[i * n + j] = (0..k).map(|p| a[i * k + p] * b[p * n + j]).sum();
        }
    }

    let lhs = backend.constant(&HostTensor::from_vec(vec![m, k], a)?, None, None)?;
    let rhs = backend.variable(&HostTensor::from_vec(vec![k, n], b)?, None, None)?;
    let out = backend.eval(&backend.dot(&lhs, &rhs)?)?;
    ensure!(out.dims() == [m, n]);
    assert_close(&out.to_vec::<f64>()?, &expected, 1e-12)
}

pub fn static_dot_mismatch_fails_at_build<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let a = backend.zeros([2usize, 3], None)?;
    let b = backend.zeros([4usize, 2], None)?;
    match backend.dot(&a, &b) {
        Err(Error::ShapeMismatch { op: "dot", .. }) => Ok(()),
        other => anyhow::bail!("expected dot shape mismatch, got {other:?}"),
    }
}

pub fn runtime_dot_mismatch_surfaces_engine_error<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([Some(2), None], None, Some("x"))?;
    let w = backend.zeros([3usize, 2], None)?;
    let y = backend.dot(&x, &w)?;

    let mut feeds = FeedDict::new();
    feeds.insert(&x, HostTensor::zeros(vec![2, 4], DType::Float32))?;
    match backend.eval_with(&y, &feeds) {
        Err(Error::EngineExecution(_)) => Ok(()),
        other => anyhow::bail!("expected an engine failure, got {other:?}"),
    }
}

pub fn unbound_placeholder_is_reported<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([2usize, 2], None, Some("inputs"))?;
    let y = backend.mul(&x, &x)?;
    match backend.eval(&y) {
        Err(Error::UnboundPlaceholder { name }) => ensure!(name == "inputs"),
        other => anyhow::bail!("expected unbound placeholder, got {other:?}"),
    }

    // Tensors not depending on the placeholder evaluate without feeds.
    let z = backend.ones([2usize], None)?;
    ensure!(backend.eval(&z)?.to_vec::<f32>()? == vec![1.0, 1.0]);
    Ok(())
}

pub fn feed_checks_dtype_and_shape<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([None, Some(2)], None, Some("x"))?;
    let mut feeds = FeedDict::new();

    let wrong_dtype = HostTensor::zeros(vec![3, 2], DType::Float64);
    ensure!(matches!(
        feeds.insert(&x, wrong_dtype),
        Err(Error::DTypeMismatch { op: "feed", .. })
    ));
    let wrong_shape = HostTensor::zeros(vec![3, 3], DType::Float32);
    ensure!(matches!(
        feeds.insert(&x, wrong_shape),
        Err(Error::ShapeMismatch { op: "feed", .. })
    ));
    ensure!(feeds.is_empty());

    let w = backend.constant(&HostTensor::zeros(vec![2, 2], DType::Float32), None, None)?;
    ensure!(matches!(
        feeds.insert(&w, HostTensor::zeros(vec![2, 2], DType::Float32)),
        Err(Error::InvalidArgument(_))
    ));

    feeds.insert(&x, HostTensor::zeros(vec![0, 2], DType::Float32))?;
    ensure!(feeds.len() == 1);
    let out = backend.eval_with(&backend.add(&x, &x)?, &feeds)?;
    ensure!(out.dims() == [0, 2]);
    ensure!(out.is_empty());
    Ok(())
}

pub fn softmax_matches_reference<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let logits = backend.constant(
        &HostTensor::from_rows(&[[-4.0f64, 2.0], [0.02, 0.3]])?,
        None,
        None,
    )?;
    let probs = backend.softmax(&logits)?;
    ensure!(probs.dtype() == DType::Float64);
    let out = backend.eval(&probs)?;
    assert_close(
        &out.to_vec::<f64>()?,
        &[
            0.0024726231566347748,
            0.99752737684336534,
            0.430453776060771,
            0.56954622393922893,
        ],
        1e-8,
    )
}

pub fn softmax_rows_sum_to_one<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([None, Some(4)], Some(DType::Float64), None)?;
    let probs = backend.softmax(&x)?;
    ensure!(backend.int_shape(&probs)? == Some(vec![None, Some(4)]));

    let mut feeds = FeedDict::new();
    feeds.insert(
        &x,
        HostTensor::from_vec(
            vec![3, 4],
            vec![
                1.0f64, 2.0, 3.0, 4.0, 1000.0, 1000.0, 1000.0, 1000.0, -50.0, 0.0, 50.0, 0.0,
            ],
        )?,
    )?;
    let out = backend.eval_with(&probs, &feeds)?.to_vec::<f64>()?;
    for row in out.chunks(4) {
        ensure!((row.iter().sum::<f64>() - 1.0).abs() < 1e-12, "row {row:?}");
        ensure!(row.iter().all(|p| p.is_finite()));
    }
    assert_close(&out[4..8], &[0.25; 4], 1e-12)
}

pub fn mul_with_identity_constant<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let magic = HostTensor::from_rows(&[
        [17.0f64, 24.0, 1.0, 8.0, 15.0],
        [23.0, 5.0, 7.0, 14.0, 16.0],
        [4.0, 6.0, 13.0, 20.0, 22.0],
        [10.0, 12.0, 19.0, 21.0, 3.0],
        [11.0, 18.0, 25.0, 2.0, 9.0],
    ])?;
    let identity: Vec<f64> = (0..25)
        .map(|i| if i / 5 == i % 5 { 1.0 } else { 0.0 })
        .collect();
    let eye = backend.constant(&HostTensor::from_vec(vec![5, 5], identity.clone())?, None, None)?;

    let product = backend.mul(&magic, &eye)?;
    let expected: Vec<f64> = magic
        .to_vec::<f64>()?
        .iter()
        .zip(&identity)
        .map(|(a, b)| a * b)
        .collect();
    assert_close(&backend.eval(&product)?.to_vec::<f64>()?, &expected, 1e-10)
}

pub fn broadcast_arithmetic<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.constant(
        &HostTensor::from_rows(&[[1.0f32, 2.0, 3.0], [4.0, 5.0, 6.0]])?,
        None,
        None,
    )?;
    let bias = HostTensor::from_vec(vec![3], vec![10.0f32, 20.0, 30.0])?;
    let shifted = backend.add(&x, &bias)?;
    ensure!(backend.int_shape(&shifted)? == Some(vec![Some(2), Some(3)]));
    ensure!(
        backend.eval(&shifted)?.to_vec::<f32>()?
            == vec![11.0, 22.0, 33.0, 14.0, 25.0, 36.0]
    );

    let halved = backend.divide(&x, &HostTensor::scalar(2.0f32))?;
    let negated = backend.neg(&halved)?;
    let diff = backend.subtract(&negated, &x)?;
    ensure!(
        backend.eval(&diff)?.to_vec::<f32>()?
            == vec![-1.5, -3.0, -4.5, -6.0, -7.5, -9.0]
    );

    let exp = backend.exp(&backend.zeros([2usize], None)?)?;
    ensure!(backend.eval(&exp)?.to_vec::<f32>()? == vec![1.0, 1.0]);
    Ok(())
}

pub fn reductions_over_axes<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.constant(
        &HostTensor::from_rows(&[[1i32, 7, 3], [4, -5, 6]])?,
        None,
        None,
    )?;
    ensure!(x.dtype() == DType::Int32);

    let row_max = backend.max(&x, Some(-1), false)?;
    ensure!(backend.int_shape(&row_max)? == Some(vec![Some(2)]));
    ensure!(backend.eval(&row_max)?.to_vec::<i32>()? == vec![7, 6]);

    let col_sum = backend.sum(&x, Some(0), true)?;
    ensure!(backend.int_shape(&col_sum)? == Some(vec![Some(1), Some(3)]));
    ensure!(backend.eval(&col_sum)?.to_vec::<i32>()? == vec![5, 2, 9]);

    let total = backend.sum(&x, None, false)?;
    ensure!(backend.ndim(&total)? == Some(0));
    ensure!(backend.eval(&total)?.to_vec::<i32>()? == vec![16]);

    ensure!(matches!(
        backend.sum(&x, Some(2), false),
        Err(Error::InvalidArgument(_))
    ));
    Ok(())
}

pub fn zeros_default_to_floatx<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let z = backend.zeros([3usize, 4], None)?;
    ensure!(z.dtype() == DType::Float32);
    ensure!(z.role() == TensorRole::Variable);
    let out = backend.eval(&z)?;
    ensure!(out.dims() == [3, 4]);
    ensure!(out.to_vec::<f32>()? == vec![0.0f32; 12]);

    ensure!(matches!(
        backend.zeros([None, Some(4)], None),
        Err(Error::ShapeMismatch { .. })
    ));
    Ok(())
}

pub fn ones_honour_dtype_override<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let ones = backend.ones([2usize, 2], Some(DType::Int64))?;
    ensure!(ones.dtype() == DType::Int64);
    ensure!(backend.eval(&ones)?.to_vec::<i64>()? == vec![1; 4]);
    Ok(())
}

pub fn random_uniform_statistics<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let r = backend.random_uniform(
        [100usize, 2000],
        -4.0,
        2.0,
        Some(DType::Float64),
        Some(1337),
        None,
    )?;
    let values = backend.eval(&r)?.to_vec::<f64>()?;
    ensure!(values.len() == 200_000);
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    ensure!(min >= -4.0 && max < 2.0, "samples escaped [-4, 2): {min}..{max}");
    ensure!((min + 4.0).abs() < 1e-3, "min {min}");
    ensure!((max - 2.0).abs() < 1e-3, "max {max}");
    ensure!((mean(&values) + 1.0).abs() < 2.5e-2, "mean {}", mean(&values));
    Ok(())
}

pub fn uniform_ranges_must_fit_the_dtype<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let backend = backend_for(engine);
    ensure!(matches!(
        backend.random_uniform([4usize], -1e39, 0.0, Some(DType::Float32), Some(1), None),
        Err(Error::InvalidArgument(_))
    ));
    ensure!(matches!(
        backend.random_uniform([4usize], -1e308, 1e308, Some(DType::Float64), Some(1), None),
        Err(Error::InvalidArgument(_))
    ));

    let wide = backend.random_uniform([4usize], -1e39, 0.0, Some(DType::Float64), Some(1), None)?;
    let values = backend.eval(&wide)?.to_vec::<f64>()?;
    ensure!(values.iter().all(|v| (-1e39..0.0).contains(v)), "{values:?}");
    Ok(())
}

pub fn random_normal_statistics<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let r = backend.random_normal(
        [1000usize, 100],
        42.0,
        0.4,
        Some(DType::Float64),
        Some(1337),
        None,
    )?;
    let values = backend.eval(&r)?.to_vec::<f64>()?;
    let mu = mean(&values);
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    ensure!((mu - 42.0).abs() < 1e-2, "mean {mu}");
    ensure!((var.sqrt() - 0.4).abs() < 1e-2, "stddev {}", var.sqrt());
    Ok(())
}

pub fn random_ops_are_reproducible<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let a = backend.random_normal([8usize], 0.0, 1.0, None, None, Some("noise"))?;
    let b = backend.random_normal([8usize], 0.0, 1.0, None, None, None)?;
    ensure!(a.name() == Some("noise"));

    let first = backend.eval(&a)?;
    ensure!(first == backend.eval(&a)?, "re-evaluation changed the samples");
    ensure!(first != backend.eval(&b)?, "unseeded ops shared a seed");

    let other = backend_for(engine);
    let fixed = |backend: &GraphBackend<B>| -> Result<HostTensor> {
        let t = backend.random_uniform([16usize], 0.0, 1.0, None, Some(9), None)?;
        Ok(backend.eval(&t)?)
    };
    ensure!(fixed(&backend)? == fixed(&other)?);
    Ok(())
}

pub fn graph_seed_drives_unseeded_ops<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let sample = |seed: u64| -> Result<Vec<f32>> {
        let backend = GraphBackend::with_config(Arc::clone(engine), config(Some(seed)));
        let first = backend.random_uniform([32usize], 0.0, 1.0, None, None, None)?;
        let second = backend.random_uniform([32usize], 0.0, 1.0, None, None, None)?;
        let mut values = backend.eval(&first)?.to_vec::<f32>()?;
        values.extend(backend.eval(&second)?.to_vec::<f32>()?);
        Ok(values)
    };
    let run_a = sample(5)?;
    ensure!(run_a == sample(5)?);
    ensure!(run_a != sample(6)?);
    ensure!(run_a[..32] != run_a[32..]);
    Ok(())
}

pub fn eval_many_shares_one_run<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.placeholder([2usize], None, Some("x"))?;
    let doubled = backend.add(&x, &x)?;
    let squared = backend.mul(&x, &x)?;

    let mut feeds = FeedDict::new();
    feeds.insert(&x, HostTensor::from_vec(vec![2], vec![3.0f32, -1.0])?)?;
    let outputs = backend.eval_many(&[&doubled, &squared, &x], &feeds)?;
    ensure!(outputs.len() == 3);
    ensure!(outputs[0].to_vec::<f32>()? == vec![6.0, -2.0]);
    ensure!(outputs[1].to_vec::<f32>()? == vec![9.0, 1.0]);
    ensure!(outputs[2].to_vec::<f32>()? == vec![3.0, -1.0]);
    ensure!(backend.session().run(&[], &feeds)?.is_empty());
    Ok(())
}

pub fn dispose_releases_backend<B: PortableBackend + 'static>(engine: &Arc<B>) -> Result<()> {
    let backend = backend_for(engine);
    let x = backend.zeros([2usize], None)?;
    let a = backend.zeros([2usize, 3], None)?;
    let b = backend.zeros([4usize, 2], None)?;
    let flags = backend.constant(&HostTensor::from_vec(vec![2], vec![true, false])?, None, None)?;
    ensure!(!backend.is_disposed());

    backend.dispose()?;
    ensure!(backend.is_disposed());
    ensure!(matches!(backend.dispose(), Err(Error::DisposedBackend)));
    ensure!(matches!(backend.eval(&x), Err(Error::DisposedBackend)));
    ensure!(matches!(backend.ndim(&x), Err(Error::DisposedBackend)));
    ensure!(matches!(x.ndim(), Err(Error::DisposedBackend)));
    ensure!(matches!(a.int_shape(), Err(Error::DisposedBackend)));
    ensure!(matches!(
        backend.placeholder([2usize], None, None),
        Err(Error::DisposedBackend)
    ));
    ensure!(matches!(backend.exp(&x), Err(Error::DisposedBackend)));

    // Disposal wins over argument errors the same calls would otherwise report.
    ensure!(matches!(backend.dot(&a, &b), Err(Error::DisposedBackend)));
    ensure!(matches!(
        backend.zeros([None, Some(4)], None),
        Err(Error::DisposedBackend)
    ));
    ensure!(matches!(
        backend.variable(&HostTensor::from_vec(vec![2], vec![1u8, 2])?, None, None),
        Err(Error::DisposedBackend)
    ));
    ensure!(matches!(backend.sum(&flags, None, false), Err(Error::DisposedBackend)));
    ensure!(matches!(
        backend.random_uniform([2usize], 1.0, -1.0, None, None, None),
        Err(Error::DisposedBackend)
    ));

    // The engine itself stays usable for other backends.
    let fresh = backend_for(engine);
    let y = fresh.ones([1usize], None)?;
    ensure!(fresh.eval(&y)?.to_vec::<f32>()? == vec![1.0]);
    Ok(())
}

pub fn tensors_are_bound_to_their_backend<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let first = backend_for(engine);
    let second = backend_for(engine);
    let a = first.ones([2usize], None)?;
    let b = second.ones([2usize], None)?;

    ensure!(matches!(first.add(&a, &b), Err(Error::BackendMismatch)));
    ensure!(matches!(first.eval(&b), Err(Error::BackendMismatch)));
    ensure!(matches!(first.ndim(&b), Err(Error::BackendMismatch)));

    let p = second.placeholder([2usize], None, None)?;
    let mut feeds = FeedDict::new();
    feeds.insert(&p, HostTensor::zeros(vec![2], DType::Float32))?;
    ensure!(matches!(
        first.eval_with(&a, &feeds),
        Err(Error::BackendMismatch)
    ));
    let q = first.placeholder([2usize], None, None)?;
    ensure!(matches!(
        feeds.insert(&q, HostTensor::zeros(vec![2], DType::Float32)),
        Err(Error::BackendMismatch)
    ));
    Ok(())
}

pub fn with_backend_disposes_after_use<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let mut leaked = None;
    let total = with_backend(Arc::clone(engine), config(None), |backend| {
        let t = backend.ones([3usize], Some(DType::Float64))?;
        let s = backend.sum(&t, None, false)?;
        leaked = Some(s.clone());
        backend.eval(&s)
    })?;
    ensure!(total.to_vec::<f64>()? == vec![3.0]);

    let leaked = leaked.ok_or_else(|| anyhow::anyhow!("closure did not run"))?;
    ensure!(matches!(leaked.eval(), Err(Error::DisposedBackend)));

    let failed: kgraph::Result<()> = with_backend(Arc::clone(engine), config(None), |backend| {
        backend.placeholder([1usize], None, Some("x"))?.eval().map(|_| ())
    });
    ensure!(matches!(failed, Err(Error::UnboundPlaceholder { .. })));
    Ok(())
}

pub fn independent_backends_across_threads<B: PortableBackend + 'static>(
    engine: &Arc<B>,
) -> Result<()> {
    let results: Vec<Result<Vec<f64>>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|worker| {
                scope.spawn(move || -> Result<Vec<f64>> {
                    let backend = backend_for(engine);
                    let x = backend.placeholder([3usize], Some(DType::Float64), None)?;
                    let y = backend.mul(&x, &HostTensor::scalar(worker as f64))?;
                    let mut feeds = FeedDict::new();
                    feeds.insert(&x, HostTensor::from_vec(vec![3], vec![1.0f64, 2.0, 3.0])?)?;
                    Ok(backend.eval_with(&y, &feeds)?.to_vec::<f64>()?)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow::anyhow!("worker panicked")))
            })
            .collect()
    });

    for (worker, result) in results.into_iter().enumerate() {
        let w = worker as f64;
        ensure!(result? == vec![w, 2.0 * w, 3.0 * w]);
    }
    Ok(())
}
