//! Neural network models built on candle: an scVI-style VAE over counts and
//! a small classifier over its latent space.

pub mod classifier;
pub mod distributions;
pub mod layers;
pub mod vae;

pub use classifier::Classifier;
pub use vae::{Vae, VaeConfig, VaeData};

use candle_core::{DType, Device, Result, Tensor};
use ndarray::Array2;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, StandardNormal};
use rand_xoshiro::Xoshiro256StarStar;

/// Pick the compute device.
pub fn select_device(gpu: bool) -> Result<Device> {
    if gpu {
        Device::new_cuda(0)
    } else {
        Ok(Device::Cpu)
    }
}

/// Seeded source of training-time randomness (reparameterisation noise and
/// dropout masks), independent of the device rng.
pub struct Noise {
    rng: Xoshiro256StarStar,
}

impl Noise {
    pub fn new(seed: u64) -> Self {
        Noise {
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }

    /// Standard normal draws shaped like `like`.
    pub fn standard_normal(&mut self, like: &Tensor) -> Result<Tensor> {
        let n = like.elem_count();
        let values: Vec<f32> = (0..n)
            .map(|_| StandardNormal.sample(&mut self.rng))
            .collect();
        Tensor::from_vec(values, like.shape().clone(), like.device())?.to_dtype(like.dtype())
    }

    /// Inverted dropout: zero each entry with probability `p` and scale the
    /// survivors by `1 / (1 - p)`.
    pub fn dropout(&mut self, x: &Tensor, p: f32) -> Result<Tensor> {
        if p <= 0.0 {
            return Ok(x.clone());
        }
        let scale = 1.0 / (1.0 - p);
        let mask: Vec<f32> = (0..x.elem_count())
            .map(|_| {
                if self.rng.gen::<f32>() < p {
                    0.0
                } else {
                    scale
                }
            })
            .collect();
        let mask = Tensor::from_vec(mask, x.shape().clone(), x.device())?.to_dtype(x.dtype())?;
        x.mul(&mask)
    }
}

/// Copy a dense matrix to the device as an f32 tensor.
pub fn array_to_tensor(x: &Array2<f32>, device: &Device) -> Result<Tensor> {
    let values: Vec<f32> = x.iter().copied().collect();
    Tensor::from_vec(values, x.dim(), device)
}

/// Rows `idx` of `t`.
pub fn select_rows(t: &Tensor, idx: &[usize]) -> Result<Tensor> {
    let idx: Vec<u32> = idx.iter().map(|&i| i as u32).collect();
    let n = idx.len();
    let idx = Tensor::from_vec(idx, n, t.device())?;
    t.index_select(&idx, 0)
}

/// One-hot encoding of `labels` with `n` columns.
pub fn one_hot(labels: &[u32], n: usize, device: &Device) -> Result<Tensor> {
    let mut values = vec![0f32; labels.len() * n];
    for (row, &label) in labels.iter().enumerate() {
        values[row * n + label as usize] = 1.0;
    }
    Tensor::from_vec(values, (labels.len(), n), device)
}

/// Copy a 2-d tensor back to the host.
pub fn tensor_to_array(t: &Tensor) -> Result<Array2<f32>> {
    let (rows, cols) = t.dims2()?;
    let values = t.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?;
    Array2::from_shape_vec((rows, cols), values)
        .map_err(|e| candle_core::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_select_rows_and_one_hot() -> Result<()> {
        let x = array_to_tensor(&array![[1.0f32, 2.0], [3.0, 4.0], [5.0, 6.0]], &Device::Cpu)?;
        let rows = select_rows(&x, &[2, 0])?;
        assert_eq!(rows.to_vec2::<f32>()?, vec![vec![5.0, 6.0], vec![1.0, 2.0]]);

        let oh = one_hot(&[1, 0, 2], 3, &Device::Cpu)?;
        assert_eq!(
            tensor_to_array(&oh)?,
            array![[0.0f32, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]
        );
        Ok(())
    }

    #[test]
    fn test_noise_is_seeded() -> Result<()> {
        let like = Tensor::zeros((4, 3), DType::F32, &Device::Cpu)?;
        let a = Noise::new(5).standard_normal(&like)?.to_vec2::<f32>()?;
        let b = Noise::new(5).standard_normal(&like)?.to_vec2::<f32>()?;
        assert_eq!(a, b);
        assert_ne!(a, Noise::new(6).standard_normal(&like)?.to_vec2::<f32>()?);
        Ok(())
    }

    #[test]
    fn test_dropout_scales_survivors() -> Result<()> {
        let x = Tensor::ones((50, 20), DType::F32, &Device::Cpu)?;
        let dropped = Noise::new(1).dropout(&x, 0.5)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(dropped.iter().all(|&v| v == 0.0 || v == 2.0));
        let kept = dropped.iter().filter(|&&v| v > 0.0).count();
        assert!(kept > 300 && kept < 700);
        let same = Noise::new(1).dropout(&x, 0.0)?;
        assert_eq!(same.to_vec2::<f32>()?, x.to_vec2::<f32>()?);
        Ok(())
    }
}
