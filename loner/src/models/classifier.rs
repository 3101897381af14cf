use super::layers::FcLayers;
use super::Noise;
use candle_core::{DType, Module, Result, Tensor, D};
use candle_nn::{linear, loss::cross_entropy, ops::softmax, Linear, VarBuilder};

/// Fully connected network with a two-way head.
pub struct Classifier {
    hidden: FcLayers,
    head: Linear,
}

impl Classifier {
    pub fn new(
        n_input: usize,
        n_hidden: usize,
        n_layers: usize,
        n_labels: usize,
        dropout_rate: f32,
        vb: VarBuilder<'_>,
    ) -> Result<Self> {
        Ok(Classifier {
            hidden: FcLayers::new(
                n_input,
                n_hidden,
                0,
                n_layers,
                n_hidden,
                dropout_rate,
                vb.pp("hidden"),
            )?,
            head: linear(n_hidden, n_labels, vb.pp("head"))?,
        })
    }

    /// Unnormalised class scores.
    pub fn logits(&self, x: &Tensor, noise: Option<&mut Noise>) -> Result<Tensor> {
        let h = self.hidden.forward(x, None, noise)?;
        self.head.forward(&h)
    }

    /// Mean cross-entropy against integer `labels`.
    pub fn loss(&self, x: &Tensor, labels: &Tensor, noise: Option<&mut Noise>) -> Result<Tensor> {
        cross_entropy(&self.logits(x, noise)?, labels)
    }

    /// Class probabilities, cells x n_labels.
    pub fn predict_proba(&self, x: &Tensor) -> Result<Tensor> {
        softmax(&self.logits(x, None)?, D::Minus1)
    }

    /// Most likely class of each cell.
    pub fn predict(&self, x: &Tensor) -> Result<Vec<u32>> {
        self.logits(x, None)?.argmax(D::Minus1)?.to_vec1::<u32>()
    }

    /// Fraction of cells whose predicted class equals `labels`.
    pub fn accuracy(&self, x: &Tensor, labels: &[u32]) -> Result<f64> {
        if labels.is_empty() {
            return Ok(0.0);
        }
        let predicted = self.predict(x)?;
        let correct = predicted.iter().zip(labels).filter(|(p, l)| p == l).count();
        Ok(correct as f64 / labels.len() as f64)
    }

    /// Probability of the second class, the doublet score.
    pub fn doublet_scores(&self, x: &Tensor) -> Result<Vec<f32>> {
        self.predict_proba(x)?
            .narrow(1, 1, 1)?
            .squeeze(1)?
            .to_dtype(DType::F32)?
            .to_vec1::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::VarMap;

    #[test]
    fn test_classifier_outputs() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let classifier = Classifier::new(4, 6, 2, 2, 0.1, vb)?;
        let x = Tensor::new(
            &[[0.1f32, -0.3, 1.0, 2.0], [0.5, 0.5, -1.0, 0.0], [0.0, 0.0, 0.0, 0.0]],
            &device,
        )?;
        let probs = classifier.predict_proba(&x)?.to_vec2::<f32>()?;
        for row in &probs {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
        let scores = classifier.doublet_scores(&x)?;
        assert_eq!(scores.len(), 3);
        assert!((scores[0] - probs[0][1]).abs() < 1e-6);

        let labels = Tensor::new(&[0u32, 1, 1], &device)?;
        let mut noise = Noise::new(0);
        let loss = classifier.loss(&x, &labels, Some(&mut noise))?.to_scalar::<f32>()?;
        assert!(loss.is_finite() && loss > 0.0);

        let predicted = classifier.predict(&x)?;
        let acc = classifier.accuracy(&x, &predicted)?;
        assert_eq!(acc, 1.0);
        Ok(())
    }
}
