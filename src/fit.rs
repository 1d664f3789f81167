//! Lens aberrations fit
//!
//! A polynomial of the scattering angle `θ = pixels * pixel_size / distance` is fitted
//! to a 1D pixel aberrations profile by iteratively reweighted least squares. The
//! profile is the derivative of the phase, the phase polynomial is the integral of the
//! fit scaled by `2π / λ * pixel_size * defocus / distance`.

use crate::{data::Identity, Error, Result};
use nalgebra::{DMatrix, DVector};
use ndarray::Array1;
use std::{f64::consts::PI, sync::Weak};
use strum_macros::{Display, EnumIter, EnumString};

const MAX_ITERATIONS: usize = 100;

/// Robust loss function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Loss {
    Linear,
    #[strum(serialize = "soft_l1")]
    SoftL1,
    Huber,
    #[default]
    Cauchy,
    Arctan,
}
impl Loss {
    /// Weight of a residual `r` in the reweighted least squares, `ρ'(r²)`
    pub fn weight(&self, r: f64) -> f64 {
        let z = r * r;
        match self {
            Loss::Linear => 1f64,
            Loss::SoftL1 => (1f64 + z).sqrt().recip(),
            Loss::Huber => {
                if z <= 1f64 {
                    1f64
                } else {
                    z.sqrt().recip()
                }
            }
            Loss::Cauchy => (1f64 + z).recip(),
            Loss::Arctan => (1f64 + z * z).recip(),
        }
    }
}

/// Pixel aberrations profile along one detector axis
#[derive(Debug, Clone)]
pub struct FitInput {
    /// Pixel distances to the zero scattering angle, ascending
    pub pixels: Array1<f64>,
    pub pixel_aberrations: Array1<f64>,
    pub defocus: f64,
    pub wavelength: f64,
    pub distance: f64,
    pub pixel_size: f64,
}

/// Fitted aberrations
#[derive(Debug, Clone, PartialEq)]
pub struct FitResult {
    /// Third order aberration coefficient [rad/mrad³]
    pub c_3: f64,
    /// Fourth order aberration coefficient [rad/mrad⁴]
    pub c_4: f64,
    /// Pixel aberrations polynomial coefficients in ascending order of `θ`
    pub fit: Vec<f64>,
    /// Phase polynomial coefficients in ascending order of `θ`
    pub ph_fit: Vec<f64>,
    /// Relative errors of the `fit` coefficients
    pub rel_err: Vec<f64>,
    /// Coefficient of determination of the fit
    pub r_sq: f64,
}

/// Aberrations fitting object
#[derive(Debug, Clone)]
pub struct AberrationsFit {
    input: FitInput,
    parent: Weak<Identity>,
}

fn vandermonde(x: &[f64], order: usize) -> DMatrix<f64> {
    DMatrix::from_fn(x.len(), order + 1, |i, k| x[i].powi(k as i32))
}

impl AberrationsFit {
    pub fn new(input: FitInput, parent: Weak<Identity>) -> Result<Self> {
        if input.pixels.len() != input.pixel_aberrations.len() {
            return Err(Error::invalid(format!(
                "{} pixels for {} pixel aberrations",
                input.pixels.len(),
                input.pixel_aberrations.len()
            )));
        }
        Ok(Self { input, parent })
    }
    pub fn input(&self) -> &FitInput {
        &self.input
    }
    pub fn parent(&self) -> Weak<Identity> {
        self.parent.clone()
    }
    /// Scattering angles of the profile samples
    pub fn theta(&self) -> Array1<f64> {
        let scale = self.input.pixel_size / self.input.distance;
        self.input.pixels.mapv(|x| x * scale)
    }
    /// Converts pixel aberrations coefficients into phase coefficients
    pub fn to_phase(&self, fit: &[f64]) -> Vec<f64> {
        let FitInput {
            wavelength,
            pixel_size,
            defocus,
            distance,
            ..
        } = self.input;
        let scale = 2f64 * PI / wavelength * pixel_size * defocus / distance;
        std::iter::once(0f64)
            .chain(
                fit.iter()
                    .enumerate()
                    .map(|(k, a)| scale * a / (k + 1) as f64),
            )
            .collect()
    }
    /// Evaluates the pixel aberrations polynomial on the profile samples
    pub fn model(&self, fit: &[f64]) -> Array1<f64> {
        self.theta()
            .mapv(|t| fit.iter().rev().fold(0f64, |acc, &a| acc * t + a))
    }

    /// Fits a polynomial of order `max_order` to the profile
    ///
    /// The iterations stop once the coefficients change by less than `xtol` relative
    /// or the cost by less than `ftol` relative.
    pub fn fit(&self, max_order: usize, xtol: f64, ftol: f64, loss: Loss) -> Result<FitResult> {
        let theta = self.theta();
        let n = theta.len();
        let p = max_order + 1;
        if n < p {
            return Err(Error::invalid(format!(
                "{} samples can't be fitted with a polynomial of order {}",
                n, max_order
            )));
        }
        let theta_max = theta
            .iter()
            .fold(0f64, |m, t| m.max(t.abs()))
            .max(f64::MIN_POSITIVE);
        let x: Vec<f64> = theta.iter().map(|t| t / theta_max).collect();
        let a = vandermonde(&x, max_order);
        let y = DVector::from_iterator(n, self.input.pixel_aberrations.iter().copied());

        let solve = |w: &DVector<f64>| -> Result<DVector<f64>> {
            let sw = w.map(f64::sqrt);
            let mut aw = a.clone();
            for (mut row, s) in aw.row_iter_mut().zip(sw.iter()) {
                row *= *s;
            }
            let yw = y.component_mul(&sw);
            aw.svd(true, true)
                .solve(&yw, f64::EPSILON)
                .map_err(|e| Error::invalid(format!("least squares solve failed: {}", e)))
        };
        let cost = |r: &DVector<f64>| r.iter().map(|r| r * r).sum::<f64>();

        let mut weights = DVector::from_element(n, 1f64);
        let mut coefs = solve(&weights)?;
        let mut residuals = &a * &coefs - &y;
        let mut prev_cost = cost(&residuals);
        for iteration in 0..MAX_ITERATIONS {
            weights = residuals.map(|r| loss.weight(r));
            let next = solve(&weights)?;
            let step = (&next - &coefs).norm();
            coefs = next;
            residuals = &a * &coefs - &y;
            let next_cost = cost(&residuals.zip_map(&weights, |r, w| r * w.sqrt()));
            let converged = step <= xtol * (xtol + coefs.norm())
                || (prev_cost - next_cost).abs() <= ftol * next_cost.max(f64::MIN_POSITIVE);
            prev_cost = next_cost;
            if converged {
                log::debug!("fit converged after {} iterations", iteration + 1);
                break;
            }
        }

        // covariance of the normalized coefficients
        let dof = n.saturating_sub(p).max(1) as f64;
        let variance = residuals
            .iter()
            .zip(weights.iter())
            .map(|(r, w)| w * r * r)
            .sum::<f64>()
            / dof;
        let mut aw = a.clone();
        for (mut row, w) in aw.row_iter_mut().zip(weights.iter()) {
            row *= w.sqrt();
        }
        let covariance = (aw.transpose() * &aw)
            .pseudo_inverse(f64::EPSILON)
            .map_err(|e| Error::invalid(format!("covariance computation failed: {}", e)))?;
        let rel_err: Vec<f64> = coefs
            .iter()
            .enumerate()
            .map(|(k, c)| {
                let err = (variance * covariance[(k, k)]).max(0f64).sqrt();
                if *c != 0f64 {
                    (err / c).abs()
                } else {
                    0f64
                }
            })
            .collect();

        let fit: Vec<f64> = coefs
            .iter()
            .enumerate()
            .map(|(k, c)| c / theta_max.powi(k as i32))
            .collect();
        let ph_fit = self.to_phase(&fit);
        let profile = &self.input.pixel_aberrations;
        let mean = profile.mean().unwrap_or(0f64);
        let ss_tot = profile.iter().map(|v| (v - mean).powi(2)).sum::<f64>();
        let ss_res = residuals.iter().map(|r| r * r).sum::<f64>();
        let r_sq = if ss_tot > 0f64 {
            1f64 - ss_res / ss_tot
        } else {
            1f64
        };
        Ok(FitResult {
            c_3: ph_fit.get(3).map_or(0f64, |c| c * 1e-9),
            c_4: ph_fit.get(4).map_or(0f64, |c| c * 1e-12),
            fit,
            ph_fit,
            rel_err,
            r_sq,
        })
    }
}
