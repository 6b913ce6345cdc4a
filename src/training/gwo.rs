//! Grey Wolf Optimizer (Mirjalili et al., 2014).
//!
//! Population-based minimizer over a box. The three best wolves found so far
//! (alpha, beta, delta) lead; every wolf moves to the mean of three
//! encirclement positions around them. The exploration coefficient `a`
//! decreases linearly from 2 to 0 over the run.

use rand::Rng;

use super::TrainingError;

#[derive(Debug, Clone)]
pub struct GreyWolfOptimizer {
    lower: Vec<f64>,
    upper: Vec<f64>,
    n_wolves: usize,
    max_iter: usize,
}

/// Result of one optimization run.
#[derive(Debug, Clone, PartialEq)]
pub struct GwoOutcome {
    pub best_position: Vec<f64>,
    pub best_score: f64,
    /// Alpha score after each iteration (non-increasing)
    pub convergence: Vec<f64>,
}

#[derive(Debug, Clone)]
struct Leader {
    position: Vec<f64>,
    score: f64,
}

impl GreyWolfOptimizer {
    /// # Errors
    /// `InvalidConfig` for mismatched or inverted bounds, fewer than three
    /// wolves, or zero iterations.
    pub fn new(
        lower: Vec<f64>,
        upper: Vec<f64>,
        n_wolves: usize,
        max_iter: usize,
    ) -> Result<Self, TrainingError> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err(TrainingError::InvalidConfig(
                "bounds must be non-empty and of equal length".into(),
            ));
        }
        if lower
            .iter()
            .zip(&upper)
            .any(|(lo, hi)| !lo.is_finite() || !hi.is_finite() || lo > hi)
        {
            return Err(TrainingError::InvalidConfig(
                "every lower bound must be finite and not above its upper bound".into(),
            ));
        }
        if n_wolves < 3 {
            return Err(TrainingError::InvalidConfig(
                "the pack needs at least 3 wolves".into(),
            ));
        }
        if max_iter == 0 {
            return Err(TrainingError::InvalidConfig("max_iter must be positive".into()));
        }
        Ok(Self {
            lower,
            upper,
            n_wolves,
            max_iter,
        })
    }

    #[must_use]
    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    /// Minimize `objective` over the box. Non-finite scores count as +inf.
    pub fn minimize<F, R>(&self, mut objective: F, rng: &mut R) -> GwoOutcome
    where
        F: FnMut(&[f64]) -> f64,
        R: Rng + ?Sized,
    {
        let dim = self.dim();
        let mut wolves: Vec<Vec<f64>> = (0..self.n_wolves)
            .map(|_| {
                (0..dim)
                    .map(|j| rng.gen_range(self.lower[j]..=self.upper[j]))
                    .collect()
            })
            .collect();

        let empty = || Leader {
            position: vec![0.0; dim],
            score: f64::INFINITY,
        };
        let (mut alpha, mut beta, mut delta) = (empty(), empty(), empty());
        let mut convergence = Vec::with_capacity(self.max_iter);

        for t in 0..self.max_iter {
            for wolf in &wolves {
                let score = objective(wolf.as_slice());
                let score = if score.is_finite() { score } else { f64::INFINITY };

                if score < alpha.score {
                    delta = std::mem::replace(&mut beta, alpha.clone());
                    alpha = Leader {
                        position: wolf.clone(),
                        score,
                    };
                } else if score < beta.score {
                    delta = std::mem::replace(
                        &mut beta,
                        Leader {
                            position: wolf.clone(),
                            score,
                        },
                    );
                } else if score < delta.score {
                    delta = Leader {
                        position: wolf.clone(),
                        score,
                    };
                }
            }

            let a = 2.0 - t as f64 * (2.0 / self.max_iter as f64);

            for wolf in &mut wolves {
                for j in 0..dim {
                    let mut pull = |leader: &Leader| {
                        let big_a = 2.0 * a * rng.gen::<f64>() - a;
                        let big_c = 2.0 * rng.gen::<f64>();
                        let distance = (big_c * leader.position[j] - wolf[j]).abs();
                        leader.position[j] - big_a * distance
                    };
                    let x = (pull(&alpha) + pull(&beta) + pull(&delta)) / 3.0;
                    wolf[j] = x.clamp(self.lower[j], self.upper[j]);
                }
            }

            convergence.push(alpha.score);
            tracing::debug!("GWO iteration {}/{}: best={:.4} a={:.3}", t + 1, self.max_iter, alpha.score, a);
        }

        GwoOutcome {
            best_position: alpha.position,
            best_score: alpha.score,
            convergence,
        }
    }
}
