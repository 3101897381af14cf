//! Minibatch training with a held-out split, early stopping and best-state
//! restoration.

use anyhow::{anyhow, bail, Result};
use candle_core::Tensor;
use candle_nn::{AdamW, Optimizer, ParamsAdamW, VarMap};
use log::{debug, info};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;

/// Evaluate the held-out metric every this many epochs.
pub const EVAL_FREQUENCY: usize = 2;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 0.01;
const WEIGHT_DECAY: f64 = 1e-6;

/// Whether larger or smaller metric values are better.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Minimize,
    Maximize,
}

impl Direction {
    fn improvement(self, from: f64, to: f64) -> f64 {
        match self {
            Direction::Minimize => from - to,
            Direction::Maximize => to - from,
        }
    }
}

/// Patience-based stopping rule over successive evaluations.
///
/// Each evaluation is compared with the previous one; an improvement below
/// `threshold` counts towards `patience`. Stopping is never requested during
/// the first `patience` evaluations.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    threshold: f64,
    direction: Direction,
    evaluations: usize,
    wait: usize,
    previous: Option<f64>,
    best: Option<f64>,
}

impl EarlyStopping {
    pub fn new(patience: usize, direction: Direction) -> Self {
        EarlyStopping {
            patience,
            threshold: 0.0,
            direction,
            evaluations: 0,
            wait: 0,
            previous: None,
            best: None,
        }
    }

    /// Record an evaluation. Returns false once training should stop.
    pub fn update(&mut self, score: f64) -> bool {
        self.evaluations += 1;
        if let Some(previous) = self.previous {
            if self.direction.improvement(previous, score) < self.threshold {
                self.wait += 1;
            } else {
                self.wait = 0;
            }
        }
        self.previous = Some(score);
        self.evaluations <= self.patience || self.wait < self.patience
    }

    /// Record `score` as the best so far if it beats every earlier one.
    pub fn improves_best(&mut self, score: f64) -> bool {
        let improved = match self.best {
            None => true,
            Some(best) => self.direction.improvement(best, score) > 0.0,
        };
        if improved {
            self.best = Some(score);
        }
        improved
    }

    pub fn reset_wait(&mut self) {
        self.wait = 0;
    }

    pub fn best(&self) -> Option<f64> {
        self.best
    }
}

/// Randomly split `0..n` into `(train, test)` with `ceil(valid_pct * n)`
/// test indices.
pub fn train_test_split<R: Rng>(
    n: usize,
    valid_pct: f64,
    rng: &mut R,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let n_test = (valid_pct * n as f64).ceil() as usize;
    if n_test >= n {
        bail!("cannot hold out {n_test} of {n} cells and still train");
    }
    let mut perm: Vec<usize> = (0..n).collect();
    perm.shuffle(rng);
    let train = perm.split_off(n_test);
    Ok((train, perm))
}

/// One evaluation of the held-out metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub epoch: usize,
    pub score: f64,
}

type Snapshot = HashMap<String, Tensor>;

fn snapshot(varmap: &VarMap) -> Result<Snapshot> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("parameter store lock poisoned"))?;
    vars.iter()
        .map(|(name, var)| Ok((name.clone(), var.as_tensor().copy()?)))
        .collect()
}

fn restore(varmap: &VarMap, state: &Snapshot) -> Result<()> {
    let vars = varmap
        .data()
        .lock()
        .map_err(|_| anyhow!("parameter store lock poisoned"))?;
    for (name, var) in vars.iter() {
        if let Some(saved) = state.get(name) {
            var.set(saved)?;
        }
    }
    Ok(())
}

/// Trains the parameters of one `VarMap` on a fixed train/test split.
///
/// The epoch counter, evaluation history, early-stopping state and best
/// weights persist across calls to [`Trainer::train`], so a model can be
/// trained in several phases with different learning rates.
pub struct Trainer<'a, R> {
    varmap: &'a VarMap,
    train_indices: Vec<usize>,
    test_indices: Vec<usize>,
    batch_size: usize,
    early_stopping: EarlyStopping,
    rng: R,
    epoch: usize,
    history: Vec<Evaluation>,
    best_state: Option<Snapshot>,
}

impl<'a, R: Rng> Trainer<'a, R> {
    pub fn new(
        varmap: &'a VarMap,
        num_cells: usize,
        valid_pct: f64,
        batch_size: usize,
        early_stopping: EarlyStopping,
        mut rng: R,
    ) -> Result<Self> {
        let (train_indices, test_indices) = train_test_split(num_cells, valid_pct, &mut rng)?;
        Ok(Trainer {
            varmap,
            train_indices,
            test_indices,
            batch_size,
            early_stopping,
            rng,
            epoch: 0,
            history: Vec::new(),
            best_state: None,
        })
    }

    pub fn train_indices(&self) -> &[usize] {
        &self.train_indices
    }

    pub fn test_indices(&self) -> &[usize] {
        &self.test_indices
    }

    pub fn history(&self) -> &[Evaluation] {
        &self.history
    }

    /// Epochs completed over all phases.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn reset_wait(&mut self) {
        self.early_stopping.reset_wait();
    }

    /// Run up to `n_epochs` epochs of AdamW at learning rate `lr`.
    ///
    /// `loss_fn` maps a minibatch of cell indices and the epoch within this
    /// call (starting from 0 on every call) to a scalar loss; `metric_fn` scores the test indices. The best-scoring
    /// weights seen so far are restored before returning.
    pub fn train<L, M>(
        &mut self,
        n_epochs: usize,
        lr: f64,
        mut loss_fn: L,
        mut metric_fn: M,
    ) -> Result<()>
    where
        L: FnMut(&[usize], usize) -> Result<Tensor>,
        M: FnMut(&[usize]) -> Result<f64>,
    {
        let params = ParamsAdamW {
            lr,
            beta1: ADAM_BETA1,
            beta2: ADAM_BETA2,
            eps: ADAM_EPS,
            weight_decay: WEIGHT_DECAY,
        };
        let mut optimizer = AdamW::new(self.varmap.all_vars(), params)?;

        for phase_epoch in 0..n_epochs {
            let mut order = self.train_indices.clone();
            order.shuffle(&mut self.rng);
            let mut epoch_loss = 0.0;
            for minibatch in order.chunks(self.batch_size) {
                let loss = loss_fn(minibatch, phase_epoch)?;
                epoch_loss += f64::from(loss.to_dtype(candle_core::DType::F32)?.to_scalar::<f32>()?)
                    * minibatch.len() as f64;
                optimizer.backward_step(&loss)?;
            }
            self.epoch += 1;
            debug!(
                "epoch {}: train loss {:.4}",
                self.epoch,
                epoch_loss / order.len().max(1) as f64
            );

            if self.epoch % EVAL_FREQUENCY != 0 {
                continue;
            }
            let score = metric_fn(&self.test_indices)?;
            self.history.push(Evaluation {
                epoch: self.epoch,
                score,
            });
            if self.early_stopping.improves_best(score) {
                self.best_state = Some(snapshot(self.varmap)?);
            }
            if !self.early_stopping.update(score) {
                info!("early stopping at epoch {} (held-out {score:.4})", self.epoch);
                break;
            }
        }

        if let Some(state) = &self.best_state {
            restore(self.varmap, state)?;
            if let Some(best) = self.early_stopping.best() {
                debug!("restored parameters with held-out score {best:.4}");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn single_var(varmap: &VarMap, len: usize) -> Result<Var> {
        let var = Var::from_tensor(&Tensor::zeros(len, DType::F32, &Device::Cpu)?)?;
        varmap
            .data()
            .lock()
            .unwrap()
            .insert("w".to_string(), var.clone());
        Ok(var)
    }

    #[test]
    fn test_split_sizes() -> Result<()> {
        let mut rng = Xoshiro256StarStar::seed_from_u64(0);
        let (train, test) = train_test_split(101, 0.1, &mut rng)?;
        assert_eq!(test.len(), 11);
        assert_eq!(train.len(), 90);
        let mut all: Vec<usize> = train.iter().chain(&test).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..101).collect::<Vec<_>>());
        assert!(train_test_split(1, 0.5, &mut rng).is_err());
        Ok(())
    }

    #[test]
    fn test_early_stopping_patience() {
        let mut es = EarlyStopping::new(3, Direction::Minimize);
        // never stop during the first `patience` evaluations
        assert!(es.update(1.0));
        assert!(es.update(2.0));
        assert!(es.update(3.0));
        // fourth evaluation: three non-improvements in a row
        assert!(!es.update(4.0));

        let mut es = EarlyStopping::new(2, Direction::Maximize);
        assert!(es.update(0.5));
        assert!(es.update(0.4));
        assert!(es.update(0.6));
        assert!(es.update(0.3));
        assert!(!es.update(0.2));
        es.reset_wait();
        assert!(es.update(0.1));
    }

    #[test]
    fn test_equal_scores_do_not_count() {
        let mut es = EarlyStopping::new(1, Direction::Maximize);
        assert!(es.update(0.5));
        assert!(es.update(0.5));
        assert!(es.update(0.5));
        assert!(!es.update(0.4));
    }

    #[test]
    fn test_improves_best() {
        let mut es = EarlyStopping::new(5, Direction::Maximize);
        assert!(es.improves_best(0.5));
        assert!(!es.improves_best(0.5));
        assert!(es.improves_best(0.7));
        assert!(!es.improves_best(0.6));
        assert_eq!(es.best(), Some(0.7));
    }

    /// Fit `w` to a target while the held-out metric only gets worse: the
    /// weights seen at the first evaluation must be restored.
    #[test]
    fn test_restores_best_state() -> Result<()> {
        let varmap = VarMap::new();
        let w = single_var(&varmap, 3)?;
        let target = Tensor::new(&[1.0f32, 2.0, 3.0], &Device::Cpu)?;

        let mut trainer = Trainer::new(
            &varmap,
            20,
            0.25,
            4,
            EarlyStopping::new(100, Direction::Minimize),
            Xoshiro256StarStar::seed_from_u64(1),
        )?;
        assert_eq!(trainer.test_indices().len(), 5);
        assert_eq!(trainer.train_indices().len(), 15);

        let mut snapshots = Vec::new();
        let mut calls = 0.0;
        trainer.train(
            10,
            0.1,
            |_, _| Ok(w.as_tensor().sub(&target)?.sqr()?.sum_all()?),
            |_| {
                snapshots.push(w.as_tensor().to_vec1::<f32>()?);
                calls += 1.0;
                Ok::<_, anyhow::Error>(calls)
            },
        )?;
        assert_eq!(trainer.epoch(), 10);
        assert_eq!(trainer.history().len(), 5);
        assert_eq!(w.as_tensor().to_vec1::<f32>()?, snapshots[0]);
        assert_ne!(snapshots[0], snapshots[4]);
        Ok(())
    }

    #[test]
    fn test_stops_early_and_resumes() -> Result<()> {
        let varmap = VarMap::new();
        let w = single_var(&varmap, 2)?;
        let mut trainer = Trainer::new(
            &varmap,
            10,
            0.2,
            5,
            EarlyStopping::new(2, Direction::Maximize),
            Xoshiro256StarStar::seed_from_u64(2),
        )?;
        // the held-out score drops at every evaluation
        let mut score = 1.0;
        let mut metric = |_: &[usize]| {
            score -= 0.1;
            Ok::<_, anyhow::Error>(score)
        };
        trainer.train(100, 0.01, |_, _| Ok(w.as_tensor().sum_all()?), &mut metric)?;
        // evaluations at epochs 2, 4, 6; the third is the second in a row
        // without improvement
        assert_eq!(trainer.epoch(), 6);
        trainer.reset_wait();
        trainer.train(100, 0.001, |_, _| Ok(w.as_tensor().sum_all()?), &mut metric)?;
        assert_eq!(trainer.epoch(), 10);
        Ok(())
    }

    #[test]
    fn test_loss_sees_epoch_within_phase() -> Result<()> {
        let varmap = VarMap::new();
        let w = single_var(&varmap, 2)?;
        let mut trainer = Trainer::new(
            &varmap,
            10,
            0.2,
            8,
            EarlyStopping::new(100, Direction::Minimize),
            Xoshiro256StarStar::seed_from_u64(3),
        )?;
        let mut seen = Vec::new();
        let mut loss = |_: &[usize], epoch: usize| {
            seen.push(epoch);
            Ok::<_, anyhow::Error>(w.as_tensor().sqr()?.sum_all()?)
        };
        trainer.train(3, 0.01, &mut loss, |_| Ok(0.0))?;
        trainer.train(2, 0.001, &mut loss, |_| Ok(0.0))?;
        assert_eq!(trainer.epoch(), 5);
        // 8 training cells in one minibatch per epoch
        assert_eq!(seen, vec![0, 1, 2, 0, 1]);
        Ok(())
    }
}
