//! Log-likelihoods and KL divergences as differentiable tensor expressions.

use candle_core::{Result, Tensor};

const NB_EPS: f64 = 1e-8;
const MIN_PRIOR_VAR: f64 = 1e-8;
const LGAMMA_SHIFT: usize = 6;

/// Elementwise `ln Γ(z)` for `z > 0`.
///
/// Shifts the argument by six with the recurrence `Γ(z+1) = zΓ(z)` and
/// evaluates the Stirling series at `z + 6`, where its truncation error is
/// below 1e-9.
pub fn lgamma(z: &Tensor) -> Result<Tensor> {
    let mut shift_log = z.log()?;
    for k in 1..LGAMMA_SHIFT {
        shift_log = shift_log.add(&z.affine(1.0, k as f64)?.log()?)?;
    }
    let w = z.affine(1.0, LGAMMA_SHIFT as f64)?;
    let w_inv = w.recip()?;
    let w_inv2 = w_inv.sqr()?;
    // 1/(12w) - 1/(360w^3) + 1/(1260w^5)
    let series = w_inv2.affine(-1.0 / 1260.0, 1.0 / 360.0)?;
    let series = w_inv2.mul(&series)?.affine(-1.0, 1.0 / 12.0)?;
    let series = w_inv.mul(&series)?;
    let half_ln_2pi = 0.5 * (2.0 * std::f64::consts::PI).ln();
    let stirling = w
        .affine(1.0, -0.5)?
        .mul(&w.log()?)?
        .sub(&w)?
        .affine(1.0, half_ln_2pi)?;
    stirling.add(&series)?.sub(&shift_log)
}

/// Negative binomial log-likelihood of counts `x` (cells x genes) with mean
/// `mu` and inverse dispersion `theta` (one value per gene), summed per cell.
pub fn log_nb_positive(x: &Tensor, mu: &Tensor, theta: &Tensor) -> Result<Tensor> {
    let theta = theta.broadcast_as(mu.shape())?;
    let log_theta_mu_eps = theta.add(mu)?.affine(1.0, NB_EPS)?.log()?;
    let dispersion_term = theta.mul(&theta.affine(1.0, NB_EPS)?.log()?.sub(&log_theta_mu_eps)?)?;
    let count_term = x.mul(&mu.affine(1.0, NB_EPS)?.log()?.sub(&log_theta_mu_eps)?)?;
    let normaliser = lgamma(&x.add(&theta)?)?
        .sub(&lgamma(&theta)?)?
        .sub(&lgamma(&x.affine(1.0, 1.0)?)?)?;
    dispersion_term.add(&count_term)?.add(&normaliser)?.sum(1)
}

/// `KL(N(m, v) || N(0, 1))` summed over the last dimension.
pub fn kl_standard_normal(m: &Tensor, v: &Tensor) -> Result<Tensor> {
    // 0.5 * (v + m^2 - 1 - ln v)
    v.add(&m.sqr()?)?
        .sub(&v.log()?)?
        .affine(0.5, -0.5)?
        .sum(1)
}

/// `KL(N(m1, v1) || N(m2, v2))` summed over the last dimension. The prior
/// moments broadcast against the posterior ones.
pub fn kl_normal(m1: &Tensor, v1: &Tensor, m2: &Tensor, v2: &Tensor) -> Result<Tensor> {
    let v2 = v2.maximum(MIN_PRIOR_VAR)?.broadcast_as(v1.shape())?;
    let m2 = m2.broadcast_as(m1.shape())?;
    let ratio = v1.div(&v2)?;
    let mahalanobis = m1.sub(&m2)?.sqr()?.div(&v2)?;
    ratio
        .add(&mahalanobis)?
        .sub(&ratio.log()?)?
        .affine(0.5, -0.5)?
        .sum(1)
}
