//! Height-profile curve fits along a line's principal axis.
//!
//! The catenary `z = a·cosh((x - h)/a) + v` is fitted with damped
//! Gauss-Newton (Levenberg-Marquardt) iterations; parabola, polynomial and
//! linear models are ordinary least squares on a Vandermonde matrix.

use nalgebra::{Complex, DMatrix, DVector, Matrix3, SVD, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Scale parameters below this are treated as a degenerate catenary.
const MIN_SCALE: f64 = 1e-6;
const INITIAL_DAMPING: f64 = 1e-3;
const DAMPING_FACTOR: f64 = 10.0;
const MIN_DAMPING: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e12;
const COST_TOLERANCE: f64 = 1e-12;
const STEP_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveModel {
    Catenary,
    Parabola,
    Polynomial { degree: usize },
    Linear,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CurveParameters {
    /// `z = a·cosh((x - h)/a) + v`
    Catenary { a: f64, h: f64, v: f64 },
    /// `z = a·x² + b·x + c` with its vertex `(x, z)`.
    Parabola { a: f64, b: f64, c: f64, vertex: (f64, f64) },
    /// Coefficients from the highest power down, and the lowest stationary
    /// point inside the fitted range if there is one.
    Polynomial {
        coefficients: Vec<f64>,
        extremum: Option<(f64, f64)>,
    },
    /// `z = slope·x + intercept`
    Linear { slope: f64, intercept: f64 },
}

impl CurveParameters {
    pub fn evaluate(&self, x: f64) -> f64 {
        match self {
            CurveParameters::Catenary { a, h, v } => a * ((x - h) / a).cosh() + v,
            CurveParameters::Parabola { a, b, c, .. } => (a * x + b) * x + c,
            CurveParameters::Polynomial { coefficients, .. } => horner(coefficients, x),
            CurveParameters::Linear { slope, intercept } => slope * x + intercept,
        }
    }

    pub fn model(&self) -> CurveModel {
        match self {
            CurveParameters::Catenary { .. } => CurveModel::Catenary,
            CurveParameters::Parabola { .. } => CurveModel::Parabola,
            CurveParameters::Polynomial { coefficients, .. } => CurveModel::Polynomial {
                degree: coefficients.len().saturating_sub(1),
            },
            CurveParameters::Linear { .. } => CurveModel::Linear,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurveFit {
    pub parameters: CurveParameters,
    pub rmse: f64,
    pub r_squared: f64,
    /// Solver iterations; zero for closed-form fits.
    pub iterations: usize,
}

/// Outcome of fitting one model to one line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFit {
    pub model: CurveModel,
    pub result: Result<CurveFit, FitError>,
}

pub fn fit_model(model: CurveModel, x: &[f64], z: &[f64], max_iterations: usize) -> ModelFit {
    let result = match model {
        CurveModel::Catenary => fit_catenary(x, z, max_iterations),
        CurveModel::Parabola => fit_parabola(x, z),
        CurveModel::Polynomial { degree } => fit_polynomial(x, z, degree),
        CurveModel::Linear => fit_linear(x, z),
    };
    ModelFit { model, result }
}

fn horner(coefficients: &[f64], x: f64) -> f64 {
    coefficients.iter().fold(0.0, |acc, c| acc * x + c)
}

/// RMSE and coefficient of determination of `parameters` on the samples.
fn fit_quality(parameters: &CurveParameters, x: &[f64], z: &[f64]) -> Result<(f64, f64), FitError> {
    let n = z.len() as f64;
    let mean = z.iter().sum::<f64>() / n;
    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (&xi, &zi) in x.iter().zip(z) {
        ss_res += (zi - parameters.evaluate(xi)).powi(2);
        ss_tot += (zi - mean).powi(2);
    }
    if !ss_res.is_finite() {
        return Err(FitError::NonFinite);
    }
    let r_squared = if ss_tot > f64::EPSILON {
        1.0 - ss_res / ss_tot
    } else if ss_res <= f64::EPSILON {
        1.0
    } else {
        0.0
    };
    Ok(((ss_res / n).sqrt(), r_squared))
}

fn require_points(x: &[f64], z: &[f64], required: usize) -> Result<(), FitError> {
    let points = x.len().min(z.len());
    if points < required {
        Err(FitError::TooFewPoints { points, required })
    } else {
        Ok(())
    }
}

/// Initial catenary guess: vertex at the lowest sample and a scale matching
/// the observed sag over the wider half-span.
fn catenary_initial_guess(x: &[f64], z: &[f64]) -> Vector3<f64> {
    let (lowest, z_min) = z
        .iter()
        .copied()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .unwrap_or((0, 0.0));
    let z_max = z.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let h = x[lowest];
    let half_width = (h - x_min).max(x_max - h);
    let sag = z_max - z_min;
    let a = if sag > 1e-9 && half_width > 0.0 {
        half_width * half_width / (2.0 * sag)
    } else {
        (x_max - x_min).max(1.0)
    };
    Vector3::new(a.max(MIN_SCALE * 10.0), h, z_min - a)
}

fn catenary_cost(params: &Vector3<f64>, x: &[f64], z: &[f64]) -> Option<f64> {
    let (a, h, v) = (params.x, params.y, params.z);
    if a < MIN_SCALE || !params.iter().all(|p| p.is_finite()) {
        return None;
    }
    let cost: f64 = x
        .iter()
        .zip(z)
        .map(|(&xi, &zi)| (a * ((xi - h) / a).cosh() + v - zi).powi(2))
        .sum();
    cost.is_finite().then_some(cost)
}

/// `JᵀJ` and `Jᵀr` of the catenary residuals.
fn catenary_normal_equations(params: &Vector3<f64>, x: &[f64], z: &[f64]) -> (Matrix3<f64>, Vector3<f64>) {
    let (a, h, v) = (params.x, params.y, params.z);
    let mut jtj = Matrix3::zeros();
    let mut jtr = Vector3::zeros();
    for (&xi, &zi) in x.iter().zip(z) {
        let u = (xi - h) / a;
        let (sinh, cosh) = (u.sinh(), u.cosh());
        let residual = a * cosh + v - zi;
        let jacobian = Vector3::new(cosh - u * sinh, -sinh, 1.0);
        jtj += jacobian * jacobian.transpose();
        jtr += jacobian * residual;
    }
    (jtj, jtr)
}

/// Levenberg-Marquardt fit of `z = a·cosh((x - h)/a) + v`.
pub fn fit_catenary(x: &[f64], z: &[f64], max_iterations: usize) -> Result<CurveFit, FitError> {
    require_points(x, z, 3)?;
    let mut params = catenary_initial_guess(x, z);
    let mut cost = catenary_cost(&params, x, z).ok_or(FitError::NonFinite)?;
    let mut damping = INITIAL_DAMPING;

    let mut converged = false;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        let (jtj, jtr) = catenary_normal_equations(&params, x, z);
        if !jtj.iter().chain(jtr.iter()).all(|v| v.is_finite()) {
            return Err(FitError::NonFinite);
        }
        if jtr.amax() <= STEP_TOLERANCE * (1.0 + cost) {
            converged = true;
            break;
        }

        let mut damped = jtj;
        for i in 0..3 {
            damped[(i, i)] += damping * jtj[(i, i)].max(MIN_DAMPING);
        }
        let step = damped.cholesky().map(|c| c.solve(&-jtr));
        let candidate = step.map(|s| (params + s, s));

        match candidate.and_then(|(p, s)| catenary_cost(&p, x, z).map(|c| (p, s, c))) {
            Some((next, step, next_cost)) if next_cost < cost => {
                let reduction = (cost - next_cost) / cost.max(f64::MIN_POSITIVE);
                params = next;
                cost = next_cost;
                damping = (damping / DAMPING_FACTOR).max(MIN_DAMPING);
                if reduction < COST_TOLERANCE
                    || step.norm() < STEP_TOLERANCE * (params.norm() + STEP_TOLERANCE)
                {
                    converged = true;
                    break;
                }
            }
            _ => {
                damping *= DAMPING_FACTOR;
                if damping > MAX_DAMPING {
                    // no descent direction left: the current parameters are stationary
                    converged = true;
                    break;
                }
            }
        }
    }
    if !converged {
        return Err(FitError::NonConvergence { iterations });
    }

    let parameters = CurveParameters::Catenary {
        a: params.x,
        h: params.y,
        v: params.z,
    };
    let (rmse, r_squared) = fit_quality(&parameters, x, z)?;
    Ok(CurveFit {
        parameters,
        rmse,
        r_squared,
        iterations,
    })
}

/// Least-squares polynomial coefficients, highest power first.
fn polynomial_coefficients(x: &[f64], z: &[f64], degree: usize) -> Result<Vec<f64>, FitError> {
    require_points(x, z, degree + 1)?;
    // fit in a scaled abscissa to keep the Vandermonde matrix conditioned
    let n = x.len().min(z.len());
    let scale = x.iter().fold(0.0_f64, |m, v| m.max(v.abs())).max(1.0);
    let vandermonde = DMatrix::from_fn(n, degree + 1, |row, col| {
        (x[row] / scale).powi((degree - col) as i32)
    });
    let rhs = DVector::from_column_slice(&z[..n]);
    let solution = SVD::new(vandermonde, true, true)
        .solve(&rhs, 1e-12)
        .map_err(|_| FitError::Singular)?;
    let coefficients: Vec<f64> = solution
        .iter()
        .enumerate()
        .map(|(col, c)| c / scale.powi((degree - col) as i32))
        .collect();
    if coefficients.iter().all(|c| c.is_finite()) {
        Ok(coefficients)
    } else {
        Err(FitError::NonFinite)
    }
}

/// Real roots of the polynomial, from the eigenvalues of its companion matrix.
fn real_roots(coefficients: &[f64]) -> Vec<f64> {
    let start = coefficients.iter().position(|c| c.abs() > f64::EPSILON);
    let Some(start) = start else {
        return Vec::new();
    };
    let coefficients = &coefficients[start..];
    let degree = coefficients.len() - 1;
    match degree {
        0 => Vec::new(),
        1 => vec![-coefficients[1] / coefficients[0]],
        _ => {
            let lead = coefficients[0];
            let companion = DMatrix::from_fn(degree, degree, |row, col| {
                if row == 0 {
                    -coefficients[col + 1] / lead
                } else if row == col + 1 {
                    1.0
                } else {
                    0.0
                }
            });
            companion
                .complex_eigenvalues()
                .iter()
                .filter(|root: &&Complex<f64>| root.im.abs() < 1e-9)
                .map(|root| root.re)
                .collect()
        }
    }
}

fn derivative(coefficients: &[f64]) -> Vec<f64> {
    let degree = coefficients.len().saturating_sub(1);
    coefficients[..degree]
        .iter()
        .enumerate()
        .map(|(i, c)| c * (degree - i) as f64)
        .collect()
}

pub fn fit_polynomial(x: &[f64], z: &[f64], degree: usize) -> Result<CurveFit, FitError> {
    let coefficients = polynomial_coefficients(x, z, degree)?;
    let x_min = x.iter().copied().fold(f64::INFINITY, f64::min);
    let x_max = x.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let extremum = if degree >= 2 {
        real_roots(&derivative(&coefficients))
            .into_iter()
            .filter(|r| (x_min..=x_max).contains(r))
            .map(|r| (r, horner(&coefficients, r)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
    } else {
        None
    };
    let parameters = CurveParameters::Polynomial {
        coefficients,
        extremum,
    };
    let (rmse, r_squared) = fit_quality(&parameters, x, z)?;
    Ok(CurveFit {
        parameters,
        rmse,
        r_squared,
        iterations: 0,
    })
}

pub fn fit_parabola(x: &[f64], z: &[f64]) -> Result<CurveFit, FitError> {
    let coefficients = polynomial_coefficients(x, z, 2)?;
    let (a, b, c) = (coefficients[0], coefficients[1], coefficients[2]);
    let vertex_x = if a != 0.0 { -b / (2.0 * a) } else { 0.0 };
    let vertex = (vertex_x, (a * vertex_x + b) * vertex_x + c);
    let parameters = CurveParameters::Parabola { a, b, c, vertex };
    let (rmse, r_squared) = fit_quality(&parameters, x, z)?;
    Ok(CurveFit {
        parameters,
        rmse,
        r_squared,
        iterations: 0,
    })
}

pub fn fit_linear(x: &[f64], z: &[f64]) -> Result<CurveFit, FitError> {
    let coefficients = polynomial_coefficients(x, z, 1)?;
    let parameters = CurveParameters::Linear {
        slope: coefficients[0],
        intercept: coefficients[1],
    };
    let (rmse, r_squared) = fit_quality(&parameters, x, z)?;
    Ok(CurveFit {
        parameters,
        rmse,
        r_squared,
        iterations: 0,
    })
}

#[cfg(test)]
mod tests {
    use all_asserts::{assert_gt, assert_le, assert_lt};
    use approx::assert_relative_eq;

    use super::*;

    fn samples(count: usize, span: f64, f: impl Fn(f64) -> f64) -> (Vec<f64>, Vec<f64>) {
        let x: Vec<f64> = (0..count).map(|i| span * i as f64 / (count - 1) as f64).collect();
        let z = x.iter().map(|&x| f(x)).collect();
        (x, z)
    }

    #[test]
    fn recovers_a_catenary() {
        let (x, z) = samples(200, 100.0, |x| 200.0 * ((x - 50.0) / 200.0).cosh() - 170.0);
        let fit = fit_catenary(&x, &z, 200).unwrap();
        let CurveParameters::Catenary { a, h, v } = fit.parameters else {
            panic!("wrong model");
        };
        assert_relative_eq!(a, 200.0, epsilon = 1e-3);
        assert_relative_eq!(h, 50.0, epsilon = 1e-3);
        assert_relative_eq!(v, -170.0, epsilon = 1e-3);
        assert_lt!(fit.rmse, 1e-6);
        assert_gt!(fit.r_squared, 0.999_999);
    }

    #[test]
    fn recovers_an_offset_half_span() {
        // lowest point at the left end, as on a span cut next to a tower
        let (x, z) = samples(120, 60.0, |x| 80.0 * ((x + 5.0) / 80.0).cosh() + 312.0);
        let fit = fit_catenary(&x, &z, 200).unwrap();
        assert_lt!(fit.rmse, 1e-4);
    }

    #[test]
    fn a_steep_parabola_is_a_poor_catenary() {
        let (x, z) = samples(200, 50.0, |x| 0.1 * (x - 25.0).powi(2));
        match fit_catenary(&x, &z, 200) {
            Ok(fit) => assert_gt!(fit.rmse, 0.5),
            Err(err) => assert!(matches!(err, FitError::NonConvergence { .. } | FitError::NonFinite)),
        }
    }

    #[test]
    fn catenary_needs_three_points() {
        assert_eq!(
            fit_catenary(&[0.0, 1.0], &[0.0, 1.0], 10),
            Err(FitError::TooFewPoints {
                points: 2,
                required: 3
            })
        );
    }

    #[test]
    fn parabola_vertex() {
        let (x, z) = samples(50, 10.0, |x| 2.0 * (x - 4.0).powi(2) + 1.0);
        let fit = fit_parabola(&x, &z).unwrap();
        let CurveParameters::Parabola { a, vertex, .. } = fit.parameters else {
            panic!("wrong model");
        };
        assert_relative_eq!(a, 2.0, epsilon = 1e-8);
        assert_relative_eq!(vertex.0, 4.0, epsilon = 1e-8);
        assert_relative_eq!(vertex.1, 1.0, epsilon = 1e-8);
        assert_le!(fit.rmse, 1e-8);
    }

    #[test]
    fn cubic_extremum_inside_range() {
        // local minimum at x = 3, local maximum at x = 1
        let (x, z) = samples(60, 4.0, |x| x.powi(3) - 6.0 * x * x + 9.0 * x);
        let fit = fit_polynomial(&x, &z, 3).unwrap();
        let CurveParameters::Polynomial { coefficients, extremum } = &fit.parameters else {
            panic!("wrong model");
        };
        assert_eq!(coefficients.len(), 4);
        let (ex, ez) = extremum.unwrap();
        assert_relative_eq!(ex, 3.0, epsilon = 1e-6);
        assert_relative_eq!(ez, 0.0, epsilon = 1e-6);
        assert_eq!(fit.parameters.model(), CurveModel::Polynomial { degree: 3 });
    }

    #[test]
    fn linear_fit_and_r_squared() {
        let (x, z) = samples(30, 30.0, |x| 0.5 * x - 2.0);
        let fit = fit_linear(&x, &z).unwrap();
        let CurveParameters::Linear { slope, intercept } = fit.parameters else {
            panic!("wrong model");
        };
        assert_relative_eq!(slope, 0.5, epsilon = 1e-9);
        assert_relative_eq!(intercept, -2.0, epsilon = 1e-9);
        assert_relative_eq!(fit.r_squared, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn fit_model_dispatches() {
        let (x, z) = samples(30, 30.0, |x| 0.5 * x);
        let fit = fit_model(CurveModel::Polynomial { degree: 40 }, &x, &z, 10);
        assert!(matches!(fit.result, Err(FitError::TooFewPoints { .. })));
        let fit = fit_model(CurveModel::Linear, &x, &z, 10);
        assert!(fit.result.is_ok());
    }
}
