use kgraph_backend_ref_cpu::CpuPortableBackend;
use kgraph_backend_tests::define_backend_tests;

define_backend_tests!(cpu_backend, || std::sync::Arc::new(CpuPortableBackend::new()));
