//! Variational autoencoder over raw counts with a negative binomial
//! likelihood, a Gaussian latent space and a log-normal library size.

use super::distributions::{kl_normal, kl_standard_normal, log_nb_positive};
use super::layers::FcLayers;
use super::{array_to_tensor, one_hot, select_rows, Noise};
use crate::config::ModelParams;
use crate::dataset::GeneExpressionDataset;
use candle_core::{DType, Device, Module, Result, Tensor, D};
use candle_nn::{linear, ops::softmax, Init, Linear, VarBuilder};

const VAR_EPS: f64 = 1e-4;

/// Shape of a [`Vae`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VaeConfig {
    pub n_input: usize,
    /// Number of batches the decoder conditions on; 0 or 1 disables it.
    pub n_batch: usize,
    pub n_hidden: usize,
    pub n_latent: usize,
    pub n_layers: usize,
    pub dropout_rate: f32,
}

impl VaeConfig {
    pub fn from_params(params: &ModelParams, n_input: usize, n_batches: usize) -> Self {
        VaeConfig {
            n_input,
            n_batch: if params.ignore_batch { 0 } else { n_batches },
            n_hidden: params.n_hidden,
            n_latent: params.n_latent,
            n_layers: params.n_layers,
            dropout_rate: params.dropout_rate,
        }
    }

    fn conditions_on_batch(&self) -> bool {
        self.n_batch > 1
    }
}

struct Encoder {
    hidden: FcLayers,
    mean: Linear,
    var: Linear,
}

impl Encoder {
    fn new(
        n_in: usize,
        n_out: usize,
        n_layers: usize,
        n_hidden: usize,
        dropout_rate: f32,
        vb: VarBuilder<'_>,
    ) -> Result<Self> {
        Ok(Encoder {
            hidden: FcLayers::new(
                n_in,
                n_hidden,
                0,
                n_layers,
                n_hidden,
                dropout_rate,
                vb.pp("encoder"),
            )?,
            mean: linear(n_hidden, n_out, vb.pp("mean_encoder"))?,
            var: linear(n_hidden, n_out, vb.pp("var_encoder"))?,
        })
    }

    /// Posterior mean and variance.
    fn forward(&self, x: &Tensor, noise: Option<&mut Noise>) -> Result<(Tensor, Tensor)> {
        let q = self.hidden.forward(x, None, noise)?;
        let q_m = self.mean.forward(&q)?;
        let q_v = self.var.forward(&q)?.exp()?.affine(1.0, VAR_EPS)?;
        Ok((q_m, q_v))
    }
}

/// Draw from `N(m, v)` with the reparameterisation trick, or return `m`.
fn reparameterize(m: &Tensor, v: &Tensor, noise: Option<&mut Noise>) -> Result<Tensor> {
    match noise {
        Some(noise) => m.add(&v.sqrt()?.mul(&noise.standard_normal(m)?)?),
        None => Ok(m.clone()),
    }
}

/// Minibatch inputs for the VAE.
pub struct VaeBatch {
    pub x: Tensor,
    pub batch: Option<Tensor>,
    pub local_mean: Tensor,
    pub local_var: Tensor,
}

/// A whole dataset resident on the device, sliced into [`VaeBatch`]es.
pub struct VaeData {
    x: Tensor,
    batch: Option<Tensor>,
    local_mean: Tensor,
    local_var: Tensor,
}

impl VaeData {
    pub fn new(dataset: &GeneExpressionDataset, n_batch: usize, device: &Device) -> Result<Self> {
        let n = dataset.num_cells();
        let batch = if n_batch > 1 {
            Some(one_hot(&dataset.batch_indices, n_batch, device)?)
        } else {
            None
        };
        Ok(VaeData {
            x: array_to_tensor(&dataset.x, device)?,
            batch,
            local_mean: Tensor::from_slice(&dataset.local_means, (n, 1), device)?,
            local_var: Tensor::from_slice(&dataset.local_vars, (n, 1), device)?,
        })
    }

    pub fn num_cells(&self) -> usize {
        self.x.dims()[0]
    }

    pub fn rows(&self, idx: &[usize]) -> Result<VaeBatch> {
        Ok(VaeBatch {
            x: select_rows(&self.x, idx)?,
            batch: self.batch.as_ref().map(|b| select_rows(b, idx)).transpose()?,
            local_mean: select_rows(&self.local_mean, idx)?,
            local_var: select_rows(&self.local_var, idx)?,
        })
    }

    pub fn all(&self) -> VaeBatch {
        VaeBatch {
            x: self.x.clone(),
            batch: self.batch.clone(),
            local_mean: self.local_mean.clone(),
            local_var: self.local_var.clone(),
        }
    }
}

/// Per-cell loss terms.
pub struct VaeLoss {
    /// Negative log-likelihood of the counts.
    pub reconstruction: Tensor,
    pub kl_l: Tensor,
    pub kl_z: Tensor,
}

impl VaeLoss {
    /// Mean over cells of `reconstruction + kl_l + kl_weight * kl_z`.
    pub fn total(&self, kl_weight: f64) -> Result<Tensor> {
        self.reconstruction
            .add(&self.kl_l)?
            .add(&self.kl_z.affine(kl_weight, 0.0)?)?
            .mean_all()
    }

    /// Per-cell `reconstruction + kl_l`, the held-out `ll` metric.
    pub fn reconstruction_error(&self) -> Result<Tensor> {
        self.reconstruction.add(&self.kl_l)
    }
}

pub struct Vae {
    config: VaeConfig,
    z_encoder: Encoder,
    l_encoder: Encoder,
    px_decoder: FcLayers,
    px_scale_decoder: Linear,
    px_r: Tensor,
}

impl Vae {
    pub fn new(config: VaeConfig, vb: VarBuilder<'_>) -> Result<Self> {
        let VaeConfig {
            n_input,
            n_batch,
            n_hidden,
            n_latent,
            n_layers,
            dropout_rate,
        } = config;
        let z_encoder = Encoder::new(
            n_input,
            n_latent,
            n_layers,
            n_hidden,
            dropout_rate,
            vb.pp("z_encoder"),
        )?;
        let l_encoder = Encoder::new(n_input, 1, 1, n_hidden, dropout_rate, vb.pp("l_encoder"))?;
        let px_decoder = FcLayers::new(
            n_latent,
            n_hidden,
            n_batch,
            n_layers,
            n_hidden,
            0.0,
            vb.pp("decoder").pp("px_decoder"),
        )?;
        let px_scale_decoder = linear(n_hidden, n_input, vb.pp("decoder").pp("px_scale_decoder"))?;
        let px_r = vb.get_with_hints(
            n_input,
            "px_r",
            Init::Randn {
                mean: 0.0,
                stdev: 1.0,
            },
        )?;
        Ok(Vae {
            config,
            z_encoder,
            l_encoder,
            px_decoder,
            px_scale_decoder,
            px_r,
        })
    }

    pub fn config(&self) -> &VaeConfig {
        &self.config
    }

    fn encode(
        &self,
        x: &Tensor,
        mut noise: Option<&mut Noise>,
    ) -> Result<((Tensor, Tensor), (Tensor, Tensor))> {
        let log_x = x.affine(1.0, 1.0)?.log()?;
        let z = self.z_encoder.forward(&log_x, noise.as_deref_mut())?;
        let l = self.l_encoder.forward(&log_x, noise)?;
        Ok((z, l))
    }

    /// Loss terms for a minibatch. With `noise` the model runs in training
    /// mode: latents are sampled and dropout is active.
    pub fn loss(&self, batch: &VaeBatch, mut noise: Option<&mut Noise>) -> Result<VaeLoss> {
        let ((qz_m, qz_v), (ql_m, ql_v)) = self.encode(&batch.x, noise.as_deref_mut())?;
        let z = reparameterize(&qz_m, &qz_v, noise.as_deref_mut())?;
        let library = reparameterize(&ql_m, &ql_v, noise)?;

        let cat = if self.config.conditions_on_batch() {
            batch.batch.as_ref()
        } else {
            None
        };
        let px = self.px_decoder.forward(&z, cat, None)?;
        let px_scale = softmax(&self.px_scale_decoder.forward(&px)?, D::Minus1)?;
        let px_rate = px_scale.broadcast_mul(&library.exp()?)?;
        let theta = self.px_r.exp()?;

        Ok(VaeLoss {
            reconstruction: log_nb_positive(&batch.x, &px_rate, &theta)?.neg()?,
            kl_l: kl_normal(&ql_m, &ql_v, &batch.local_mean, &batch.local_var)?,
            kl_z: kl_standard_normal(&qz_m, &qz_v)?,
        })
    }

    /// Posterior mean of the latent code, cells x n_latent.
    pub fn latent(&self, x: &Tensor) -> Result<Tensor> {
        let ((qz_m, _), _) = self.encode(x, None)?;
        Ok(qz_m)
    }

    /// Posterior means `[E[z|x], E[l|x]]`, cells x (n_latent + 1).
    pub fn posterior_means(&self, x: &Tensor) -> Result<Tensor> {
        let ((qz_m, _), (ql_m, _)) = self.encode(x, None)?;
        Tensor::cat(&[&qz_m, &ql_m], 1)
    }

    /// Inverse dispersion of each gene.
    pub fn theta(&self) -> Result<Vec<f32>> {
        self.px_r.exp()?.to_dtype(DType::F32)?.to_vec1::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::gene_names;
    use candle_nn::VarMap;
    use ndarray::array;

    fn tiny_dataset() -> GeneExpressionDataset {
        let x = array![
            [3.0f32, 0.0, 1.0, 5.0, 0.0],
            [0.0, 2.0, 2.0, 1.0, 1.0],
            [7.0, 1.0, 0.0, 0.0, 2.0],
            [1.0, 1.0, 1.0, 1.0, 1.0],
        ];
        GeneExpressionDataset::new(x, gene_names(5), vec![0, 1, 0, 1]).unwrap()
    }

    fn config(n_batch: usize) -> VaeConfig {
        VaeConfig {
            n_input: 5,
            n_batch,
            n_hidden: 8,
            n_latent: 3,
            n_layers: 2,
            dropout_rate: 0.1,
        }
    }

    #[test]
    fn test_shapes_and_finite_loss() -> Result<()> {
        let device = Device::Cpu;
        let ds = tiny_dataset();
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let vae = Vae::new(config(2), vb)?;
        let data = VaeData::new(&ds, 2, &device)?;
        assert_eq!(data.num_cells(), 4);

        let batch = data.rows(&[0, 2, 3])?;
        let mut noise = Noise::new(3);
        let loss = vae.loss(&batch, Some(&mut noise))?;
        assert_eq!(loss.reconstruction.dims(), &[3]);
        assert_eq!(loss.kl_z.dims(), &[3]);
        let total = loss.total(0.5)?.to_scalar::<f32>()?;
        assert!(total.is_finite());
        assert!(loss
            .kl_z
            .to_vec1::<f32>()?
            .iter()
            .all(|&kl| kl >= -1e-5));

        let all = data.all();
        assert_eq!(vae.latent(&all.x)?.dims(), &[4, 3]);
        assert_eq!(vae.posterior_means(&all.x)?.dims(), &[4, 4]);
        assert_eq!(vae.theta()?.len(), 5);
        Ok(())
    }

    #[test]
    fn test_eval_mode_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let ds = tiny_dataset();
        let varmap = VarMap::new();
        let vae = Vae::new(config(0), VarBuilder::from_varmap(&varmap, DType::F32, &device))?;
        let data = VaeData::new(&ds, 0, &device)?;
        let all = data.all();
        assert!(all.batch.is_none());
        let a = vae.loss(&all, None)?.reconstruction_error()?.to_vec1::<f32>()?;
        let b = vae.loss(&all, None)?.reconstruction_error()?.to_vec1::<f32>()?;
        assert_eq!(a, b);
        Ok(())
    }

    #[test]
    fn test_from_params_ignore_batch() {
        let mut params: ModelParams =
            serde_json::from_str(r#"{"cl_hidden": 4, "cl_layers": 1}"#).unwrap();
        assert_eq!(VaeConfig::from_params(&params, 10, 3).n_batch, 3);
        params.ignore_batch = true;
        assert_eq!(VaeConfig::from_params(&params, 10, 3).n_batch, 0);
    }
}
