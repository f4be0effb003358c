use std::env;
use std::sync::OnceLock;

use crate::tensor::DType;

static KGRAPH_FLOATX: OnceLock<DType> = OnceLock::new();
static KGRAPH_SEED: OnceLock<Option<u64>> = OnceLock::new();

fn non_empty(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn parse_floatx(value: &str) -> Option<DType> {
    match value.parse::<DType>() {
        Ok(dtype) if dtype.is_float() => Some(dtype),
        _ => None,
    }
}

/// Default floating dtype, read once from `KGRAPH_FLOATX`.
pub(crate) fn default_floatx() -> DType {
    *KGRAPH_FLOATX.get_or_init(|| match non_empty("KGRAPH_FLOATX") {
        Some(value) => parse_floatx(&value).unwrap_or_else(|| {
            log::warn!("ignoring KGRAPH_FLOATX={value:?}: expected float32 or float64");
            DType::Float32
        }),
        None => DType::Float32,
    })
}

/// Graph-level seed, read once from `KGRAPH_SEED`.
pub(crate) fn default_seed() -> Option<u64> {
    *KGRAPH_SEED.get_or_init(|| {
        let value = non_empty("KGRAPH_SEED")?;
        match value.parse::<u64>() {
            Ok(seed) => Some(seed),
            Err(_) => {
                log::warn!("ignoring KGRAPH_SEED={value:?}: not an unsigned integer");
                None
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floatx_only_accepts_float_names() {
        assert_eq!(parse_floatx("float64"), Some(DType::Float64));
        assert_eq!(parse_floatx("float32"), Some(DType::Float32));
        assert_eq!(parse_floatx("int32"), None);
        assert_eq!(parse_floatx("half"), None);
    }
}
