//! Deterministic reconstruction of tensor data that was not saved.
//!
//! A [`RandomRecipe`] records a seed and summary statistics of the captured
//! data. Materializing it always produces the same bytes for the same
//! metadata, so replays stay reproducible even without the original values.

use graphrepro_core::{DType, Tensor, TensorMeta};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Distribution random data is drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dist", rename_all = "snake_case")]
pub enum Distribution {
    /// Floating point data, drawn from a normal distribution.
    Normal { mean: f64, std: f64 },
    /// Integer or boolean data, drawn uniformly from `[min, max]`.
    Integers { min: i64, max: i64 },
}

/// Seed plus distribution for regenerating a tensor's storage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RandomRecipe {
    pub seed: u64,
    #[serde(flatten)]
    pub dist: Distribution,
}

impl RandomRecipe {
    /// Summarizes a captured tensor. The seed is derived from its bytes.
    pub fn summarize(tensor: &Tensor) -> Self {
        let digest = Sha256::digest(tensor.storage_bytes());
        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&digest[..8]);
        let seed = u64::from_le_bytes(seed_bytes);

        let values = tensor.storage_f64();
        let dist = if tensor.dtype().is_floating_point() {
            let finite: Vec<f64> = values.into_iter().filter(|v| v.is_finite()).collect();
            normal_summary(&finite)
        } else {
            let min = values.iter().copied().fold(f64::INFINITY, f64::min);
            let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            if values.is_empty() {
                Distribution::Integers { min: 0, max: 0 }
            } else {
                Distribution::Integers {
                    min: min as i64,
                    max: max as i64,
                }
            }
        };

        Self { seed, dist }
    }

    /// Produces storage bytes for `meta`.
    pub fn materialize(&self, meta: &TensorMeta) -> Vec<u8> {
        let dtype = meta.dtype();
        let count = meta.storage_numel();
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut out = Vec::with_capacity(count * dtype.itemsize());

        for _ in 0..count {
            let value = match self.dist {
                Distribution::Normal { mean, std } => {
                    // Box-Muller; 1 - u keeps the log argument in (0, 1].
                    let u1: f64 = rng.r#gen();
                    let u2: f64 = rng.r#gen();
                    let z = (-2.0_f64 * (1.0 - u1).ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
                    mean + std * z
                }
                Distribution::Integers { min, max } => {
                    let (lo, hi) = if dtype == DType::Bool {
                        (min.clamp(0, 1), max.clamp(0, 1))
                    } else {
                        (min, max)
                    };
                    let hi = hi.max(lo);
                    rng.gen_range(lo..=hi) as f64
                }
            };
            dtype.encode_into(value, &mut out);
        }
        out
    }
}

/// Mean and standard deviation of finite values.
///
/// Values are scaled by their largest magnitude first so the sums cannot
/// overflow; both results are always finite.
fn normal_summary(finite: &[f64]) -> Distribution {
    let scale = finite.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    if finite.is_empty() || scale == 0.0 {
        return Distribution::Normal {
            mean: 0.0,
            std: if finite.is_empty() { 1.0 } else { 0.0 },
        };
    }

    let n = finite.len() as f64;
    let mean = finite.iter().map(|v| v / scale).sum::<f64>() / n;
    let var = finite.iter().map(|v| (v / scale - mean).powi(2)).sum::<f64>() / n;
    Distribution::Normal {
        mean: (mean * scale).clamp(f64::MIN, f64::MAX),
        std: (var.sqrt() * scale).min(f64::MAX),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use graphrepro_core::Device;

    #[test]
    fn test_summarize_float() {
        let t = Tensor::from_values(vec![4], &[1.0, 2.0, 3.0, 4.0], DType::F32, Device::Cpu).unwrap();
        let recipe = RandomRecipe::summarize(&t);
        match recipe.dist {
            Distribution::Normal { mean, std } => {
                assert!((mean - 2.5).abs() < 1e-9);
                assert!((std - 1.25f64.sqrt()).abs() < 1e-9);
            }
            other => panic!("unexpected distribution {other:?}"),
        }
    }

    #[test]
    fn test_summarize_huge_floats_is_finite() {
        let values: Vec<f64> = (0..16).map(|i| if i % 2 == 0 { 1e200 } else { -1e200 }).collect();
        let t = Tensor::from_values(vec![16], &values, DType::F64, Device::Cpu).unwrap();
        let recipe = RandomRecipe::summarize(&t);
        let Distribution::Normal { mean, std } = recipe.dist else {
            panic!("unexpected distribution {:?}", recipe.dist);
        };
        assert_eq!(mean, 0.0);
        assert!((std / 1e200 - 1.0).abs() < 1e-12);

        let json = serde_json::to_string(&recipe).unwrap();
        assert!(!json.contains("null"));
        assert_eq!(serde_json::from_str::<RandomRecipe>(&json).unwrap(), recipe);

        let t = Tensor::from_values(vec![2], &[f64::MAX, f64::MAX], DType::F64, Device::Cpu).unwrap();
        let Distribution::Normal { mean, std } = RandomRecipe::summarize(&t).dist else {
            panic!("expected a normal distribution");
        };
        assert_eq!(mean, f64::MAX);
        assert_eq!(std, 0.0);
    }

    #[test]
    fn test_bool_recipe_with_inverted_bounds() {
        let meta = TensorMeta::contiguous(vec![16], DType::Bool, Device::Cpu);
        let recipe = RandomRecipe {
            seed: 3,
            dist: Distribution::Integers { min: 1, max: 0 },
        };
        let bytes = recipe.materialize(&meta);
        let t = Tensor::from_storage(meta, bytes).unwrap();
        assert!(t.to_f64_vec().iter().all(|v| *v == 1.0));
    }

    #[test]
    fn test_summarize_integers() {
        let t = Tensor::from_values(vec![3], &[-2.0, 5.0, 1.0], DType::I64, Device::Cpu).unwrap();
        assert_eq!(
            RandomRecipe::summarize(&t).dist,
            Distribution::Integers { min: -2, max: 5 }
        );
    }

    #[test]
    fn test_materialize_is_deterministic() {
        let meta = TensorMeta::contiguous(vec![8, 8], DType::F32, Device::Cpu);
        let recipe = RandomRecipe {
            seed: 42,
            dist: Distribution::Normal { mean: 0.0, std: 1.0 },
        };
        let a = recipe.materialize(&meta);
        let b = recipe.materialize(&meta);
        assert_eq!(a, b);
        assert_eq!(a.len(), meta.storage_nbytes());
    }

    #[test]
    fn test_materialize_integers_in_range() {
        let meta = TensorMeta::contiguous(vec![64], DType::I32, Device::Cpu);
        let recipe = RandomRecipe {
            seed: 7,
            dist: Distribution::Integers { min: 3, max: 6 },
        };
        let bytes = recipe.materialize(&meta);
        let t = Tensor::from_storage(meta, bytes).unwrap();
        assert!(t.to_f64_vec().iter().all(|v| (3.0..=6.0).contains(v)));
    }

    #[test]
    fn test_recipe_json_shape() {
        let recipe = RandomRecipe {
            seed: 1,
            dist: Distribution::Integers { min: 0, max: 1 },
        };
        let json = serde_json::to_value(recipe).unwrap();
        assert_eq!(json["dist"], "integers");
        assert_eq!(json["seed"], 1);
        let back: RandomRecipe = serde_json::from_value(json).unwrap();
        assert_eq!(back, recipe);
    }
}
