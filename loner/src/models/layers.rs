use super::Noise;
use candle_core::{Result, Tensor};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Stack of `Linear -> ReLU -> Dropout` layers. When `n_cat > 1` a one-hot
/// covariate is appended to the input of every layer.
pub struct FcLayers {
    layers: Vec<Linear>,
    n_cat: usize,
    dropout_rate: f32,
}

impl FcLayers {
    pub fn new(
        n_in: usize,
        n_out: usize,
        n_cat: usize,
        n_layers: usize,
        n_hidden: usize,
        dropout_rate: f32,
        vb: VarBuilder<'_>,
    ) -> Result<Self> {
        let n_cat = if n_cat > 1 { n_cat } else { 0 };
        let mut dims = vec![n_in];
        dims.extend(std::iter::repeat(n_hidden).take(n_layers.saturating_sub(1)));
        dims.push(n_out);
        let layers = dims
            .windows(2)
            .enumerate()
            .map(|(i, w)| linear(w[0] + n_cat, w[1], vb.pp(format!("layer_{i}"))))
            .collect::<Result<_>>()?;
        Ok(FcLayers {
            layers,
            n_cat,
            dropout_rate,
        })
    }

    /// Dropout is applied only when `noise` is given.
    pub fn forward(
        &self,
        x: &Tensor,
        cat: Option<&Tensor>,
        mut noise: Option<&mut Noise>,
    ) -> Result<Tensor> {
        let mut h = x.clone();
        for layer in &self.layers {
            let input = match cat {
                Some(cat) if self.n_cat > 0 => Tensor::cat(&[&h, cat], 1)?,
                _ => h,
            };
            h = layer.forward(&input)?.relu()?;
            if let Some(noise) = noise.as_deref_mut() {
                h = noise.dropout(&h, self.dropout_rate)?;
            }
        }
        Ok(h)
    }
}
