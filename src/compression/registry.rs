//! Name-keyed compressor constructor registry and kwargs plumbing.
//!
//! Registration requests carry a whitespace-serialized kwargs blob. The
//! registry resolves the leaf compressor first, then wraps it with the
//! requested decorators (momentum innermost, error feedback outermost),
//! mirroring how a worker-side schedule composes them.

use std::collections::{BTreeMap, HashMap};

use once_cell::sync::Lazy;

use crate::error::{GradexError, Result};
use crate::types::DataType;

use super::error_feedback::{CorrectedErrorFeedback, SparseErrorFeedback, VanillaErrorFeedback};
use super::momentum::NesterovMomentum;
use super::topk::TopK;
use super::traits::{Compressor, NoCompression};

/// Hyper-parameter map carried by registration requests.
pub type Kwargs = BTreeMap<String, String>;

/// Serialize kwargs as `"<N> <k1> <v1> ... <kN> <vN>"`.
pub fn serialize_kwargs(kwargs: &Kwargs) -> String {
    let mut out = kwargs.len().to_string();
    for (k, v) in kwargs {
        out.push(' ');
        out.push_str(k);
        out.push(' ');
        out.push_str(v);
    }
    out
}

/// Inverse of [`serialize_kwargs`]. Keys and values are whitespace
/// tokenized; typed parsing happens later via [`hyperparam`].
pub fn deserialize_kwargs(content: &str) -> Result<Kwargs> {
    let mut tokens = content.split_whitespace();
    let count: usize = tokens
        .next()
        .ok_or_else(|| GradexError::MalformedKwargs("empty blob".into()))?
        .parse()
        .map_err(|_| GradexError::MalformedKwargs("bad pair count".into()))?;
    let mut kwargs = Kwargs::new();
    for _ in 0..count {
        let key = tokens
            .next()
            .ok_or_else(|| GradexError::MalformedKwargs("truncated key".into()))?;
        let val = tokens
            .next()
            .ok_or_else(|| GradexError::MalformedKwargs("truncated value".into()))?;
        kwargs.insert(key.to_string(), val.to_string());
    }
    Ok(kwargs)
}

/// Look up and parse a hyper-parameter.
///
/// Returns `Ok(None)` when an optional parameter is absent. A required
/// parameter that is absent, unparsable, or rejected by `check` is a
/// configuration error, fatal at registration.
pub fn hyperparam<T: std::str::FromStr + std::fmt::Display>(
    kwargs: &Kwargs,
    name: &str,
    optional: bool,
    check: impl Fn(&T) -> bool,
) -> Result<Option<T>> {
    let raw = match kwargs.get(name) {
        Some(raw) => raw,
        None if optional => return Ok(None),
        None => return Err(GradexError::MissingHyperParam(name.to_string())),
    };
    let value: T = raw.parse().map_err(|_| GradexError::InvalidHyperParam {
        name: name.to_string(),
        value: raw.clone(),
    })?;
    if !check(&value) {
        return Err(GradexError::InvalidHyperParam {
            name: name.to_string(),
            value: raw.clone(),
        });
    }
    tracing::info!(name, %value, "registered hyper-parameter");
    Ok(Some(value))
}

fn required<T: std::str::FromStr + std::fmt::Display>(
    kwargs: &Kwargs,
    name: &str,
    check: impl Fn(&T) -> bool,
) -> Result<T> {
    match hyperparam(kwargs, name, false, check)? {
        Some(v) => Ok(v),
        None => Err(GradexError::MissingHyperParam(name.to_string())),
    }
}

/// Resolve `compressor_k`: values below 1 are a fraction of the element
/// count, values at or above 1 an absolute count; never less than 1.
fn resolve_k(factor: f64, size: usize, dtype: DataType) -> usize {
    if factor < 1.0 {
        (((size / dtype.size_in_bytes()) as f64 * factor) as usize).max(1)
    } else {
        factor as usize
    }
}

type Ctor = fn(&Kwargs, usize, DataType, Option<Box<dyn Compressor>>) -> Result<Box<dyn Compressor>>;

fn ctor_topk(
    kwargs: &Kwargs,
    size: usize,
    dtype: DataType,
    _inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    let factor: f64 = required(kwargs, "compressor_k", |k: &f64| *k > 0.0)?;
    let k = resolve_k(factor, size, dtype);
    tracing::info!(k, size, "topk compressor registered");
    Ok(Box::new(TopK::new(k, size, dtype)?))
}

fn ctor_none(
    _kwargs: &Kwargs,
    _size: usize,
    _dtype: DataType,
    _inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    Ok(Box::new(NoCompression::new()))
}

fn take_inner(inner: Option<Box<dyn Compressor>>, name: &str) -> Result<Box<dyn Compressor>> {
    inner.ok_or_else(|| GradexError::MalformedKwargs(format!("{name} requires an inner compressor")))
}

fn ctor_vanilla_ef(
    _kwargs: &Kwargs,
    size: usize,
    dtype: DataType,
    inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    let inner = take_inner(inner, "vanilla_ef")?;
    tracing::info!("vanilla error feedback registered");
    Ok(Box::new(VanillaErrorFeedback::new(inner, size, dtype)?))
}

fn ctor_corrected_ef(
    _kwargs: &Kwargs,
    size: usize,
    dtype: DataType,
    inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    let inner = take_inner(inner, "corrected_ef")?;
    tracing::info!("corrected error feedback registered");
    Ok(Box::new(CorrectedErrorFeedback::new(inner, size, dtype)?))
}

fn ctor_sparse_ef(
    kwargs: &Kwargs,
    size: usize,
    dtype: DataType,
    inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    let inner = take_inner(inner, "sparse_ef")?;
    let factor: f64 = required(kwargs, "compressor_k", |k: &f64| *k > 0.0)?;
    let k = resolve_k(factor, size, dtype);
    let seed = hyperparam::<u64>(kwargs, "seed", true, |s| *s != 0)?;
    tracing::info!(size, k, ?seed, "sparse error feedback registered");
    Ok(Box::new(SparseErrorFeedback::new(inner, size, dtype, k, seed)?))
}

fn ctor_nesterov(
    kwargs: &Kwargs,
    size: usize,
    dtype: DataType,
    inner: Option<Box<dyn Compressor>>,
) -> Result<Box<dyn Compressor>> {
    let inner = take_inner(inner, "nesterov_momentum")?;
    let mu: f32 = required(kwargs, "momentum_mu", |_: &f32| true)?;
    tracing::info!(mu, "nesterov momentum registered");
    Ok(Box::new(NesterovMomentum::new(inner, size, dtype, mu)?))
}

static REGISTRY: Lazy<HashMap<&'static str, Ctor>> = Lazy::new(|| {
    let mut table: HashMap<&'static str, Ctor> = HashMap::new();
    table.insert("topk", ctor_topk);
    table.insert("none", ctor_none);
    table.insert("vanilla_ef", ctor_vanilla_ef);
    table.insert("corrected_ef", ctor_corrected_ef);
    table.insert("sparse_ef", ctor_sparse_ef);
    table.insert("nesterov_momentum", ctor_nesterov);
    table
});

fn lookup(name: &str) -> Result<Ctor> {
    REGISTRY
        .get(name)
        .copied()
        .ok_or_else(|| GradexError::UnknownCompressor(name.to_string()))
}

/// Build the full compressor chain described by `kwargs` for a tensor of
/// `size` bytes and dtype `dtype`.
///
/// `compressor_type` names the leaf; `momentum_type` and `ef_type`
/// optionally add decorators, error feedback outermost.
pub fn create(kwargs: &Kwargs, size: usize, dtype: DataType) -> Result<Box<dyn Compressor>> {
    let leaf: String = required(kwargs, "compressor_type", |_: &String| true)?;
    let mut compressor = lookup(&leaf)?(kwargs, size, dtype, None)?;

    if let Some(momentum) = hyperparam::<String>(kwargs, "momentum_type", true, |_| true)? {
        let name = match momentum.as_str() {
            "nesterov" => "nesterov_momentum",
            other => return Err(GradexError::UnknownCompressor(other.to_string())),
        };
        compressor = lookup(name)?(kwargs, size, dtype, Some(compressor))?;
    }

    if let Some(ef) = hyperparam::<String>(kwargs, "ef_type", true, |_| true)? {
        let name = match ef.as_str() {
            "vanilla" => "vanilla_ef",
            "corrected" => "corrected_ef",
            "sparse" => "sparse_ef",
            other => return Err(GradexError::UnknownCompressor(other.to_string())),
        };
        compressor = lookup(name)?(kwargs, size, dtype, Some(compressor))?;
    }

    Ok(compressor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TensorView;

    fn kwargs(pairs: &[(&str, &str)]) -> Kwargs {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_kwargs_roundtrip() {
        let kw = kwargs(&[("compressor_type", "topk"), ("compressor_k", "2")]);
        let blob = serialize_kwargs(&kw);
        assert_eq!(blob, "2 compressor_k 2 compressor_type topk");
        assert_eq!(deserialize_kwargs(&blob).unwrap(), kw);
    }

    #[test]
    fn test_deserialize_rejects_truncated() {
        assert!(deserialize_kwargs("").is_err());
        assert!(deserialize_kwargs("2 only_one_key").is_err());
        assert!(deserialize_kwargs("x a b").is_err());
    }

    #[test]
    fn test_hyperparam_required_missing() {
        let kw = Kwargs::new();
        let err = hyperparam::<f64>(&kw, "compressor_k", false, |_| true).unwrap_err();
        assert!(matches!(err, GradexError::MissingHyperParam(_)));
    }

    #[test]
    fn test_hyperparam_optional_missing() {
        let kw = Kwargs::new();
        assert!(hyperparam::<u64>(&kw, "seed", true, |_| true)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_hyperparam_check_rejects() {
        let kw = kwargs(&[("seed", "0")]);
        let err = hyperparam::<u64>(&kw, "seed", true, |s| *s != 0).unwrap_err();
        assert!(matches!(err, GradexError::InvalidHyperParam { .. }));
    }

    #[test]
    fn test_resolve_k_fraction_and_count() {
        assert_eq!(resolve_k(0.5, 16, DataType::F32), 2);
        assert_eq!(resolve_k(0.0001, 16, DataType::F32), 1);
        assert_eq!(resolve_k(3.0, 16, DataType::F32), 3);
    }

    #[test]
    fn test_create_topk_leaf() {
        let kw = kwargs(&[("compressor_type", "topk"), ("compressor_k", "2")]);
        let mut c = create(&kw, 16, DataType::F32).unwrap();
        let grad = [1.0f32, -3.0, 2.0, 0.5];
        let bytes = unsafe { std::slice::from_raw_parts(grad.as_ptr() as *const u8, 16) };
        let out = c.compress(TensorView::of_slice(bytes, DataType::F32)).unwrap();
        assert_eq!(out.len(), 16); // 2 pairs of 8 bytes
    }

    #[test]
    fn test_create_full_chain_with_vanilla_ef() {
        let kw = kwargs(&[
            ("compressor_type", "topk"),
            ("compressor_k", "1"),
            ("momentum_type", "nesterov"),
            ("momentum_mu", "0.9"),
            ("ef_type", "vanilla"),
        ]);
        let mut c = create(&kw, 16, DataType::F32).unwrap();
        let mut grad = [1.0f32, -3.0, 2.0, 0.5];
        let view = unsafe {
            TensorView::from_raw(grad.as_mut_ptr() as u64, 16, DataType::F32)
        };
        let out = c.compress(view).unwrap();
        assert_eq!(out.len(), 8);
    }

    #[test]
    fn test_create_unknown_leaf() {
        let kw = kwargs(&[("compressor_type", "gzip")]);
        let err = create(&kw, 16, DataType::F32).unwrap_err();
        assert!(matches!(err, GradexError::UnknownCompressor(_)));
    }

    #[test]
    fn test_create_missing_required_param() {
        let kw = kwargs(&[("compressor_type", "topk")]);
        let err = create(&kw, 16, DataType::F32).unwrap_err();
        assert!(matches!(err, GradexError::MissingHyperParam(_)));
    }

    #[test]
    fn test_create_unknown_ef_variant() {
        let kw = kwargs(&[
            ("compressor_type", "none"),
            ("ef_type", "quantized"),
        ]);
        let err = create(&kw, 16, DataType::F32).unwrap_err();
        assert!(matches!(err, GradexError::UnknownCompressor(_)));
    }
}
