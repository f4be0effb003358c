//! Engine-agnostic behaviour suite.
//!
//! Engines instantiate the whole suite with [`define_backend_tests!`]; graph-capture tests use
//! [`recording_backend::RecordingBackend`] to inspect lowered programs without executing them.

pub mod recording_backend;
pub mod smoke;

#[macro_export]
macro_rules! define_backend_tests {
    ($module:ident, $backend_ctor:expr) => {
        #[cfg(test)]
        mod $module {
            #[allow(unused_imports)]
            use super::*;
            use $crate::smoke;

            macro_rules! smoke_test {
                ($name:ident) => {
                    #[test]
                    fn $name() -> ::anyhow::Result<()> {
                        let backend = ($backend_ctor)();
                        smoke::$name(&backend)
                    }
                };
            }

            smoke_test!(ndim_reports_rank);
            smoke_test!(variable_roundtrips_host_values);
            smoke_test!(integer_rows_keep_their_dtype);
            smoke_test!(unmappable_host_elements_are_rejected);
            smoke_test!(partial_shape_flows_through_dot);
            smoke_test!(dot_matches_host_reference);
            smoke_test!(static_dot_mismatch_fails_at_build);
            smoke_test!(runtime_dot_mismatch_surfaces_engine_error);
            smoke_test!(unbound_placeholder_is_reported);
            smoke_test!(feed_checks_dtype_and_shape);
            smoke_test!(softmax_matches_reference);
            smoke_test!(softmax_rows_sum_to_one);
            smoke_test!(mul_with_identity_constant);
            smoke_test!(broadcast_arithmetic);
            smoke_test!(reductions_over_axes);
            smoke_test!(zeros_default_to_floatx);
            smoke_test!(ones_honour_dtype_override);
            smoke_test!(random_uniform_statistics);
            smoke_test!(uniform_ranges_must_fit_the_dtype);
            smoke_test!(random_normal_statistics);
            smoke_test!(random_ops_are_reproducible);
            smoke_test!(graph_seed_drives_unseeded_ops);
            smoke_test!(eval_many_shares_one_run);
            smoke_test!(dispose_releases_backend);
            smoke_test!(tensors_are_bound_to_their_backend);
            smoke_test!(with_backend_disposes_after_use);
            smoke_test!(independent_backends_across_threads);
        }
    };
}
