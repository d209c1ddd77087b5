//! A self-contained particle-swarm minimizer.

use rand::Rng;
use rand_pcg::Pcg64;

/// Parameters of the swarm. Inertia decreases linearly from `inertia_max`
/// to `inertia_min` over the iterations.
#[derive(Clone, Debug)]
pub struct PsoParams {
    pub swarm_size: usize,
    pub max_iterations: usize,
    pub inertia_min: f64,
    pub inertia_max: f64,
    /// Cognitive acceleration coefficient (pull toward the personal best).
    pub cognitive: f64,
    /// Social acceleration coefficient (pull toward the global best).
    pub social: f64,
    pub max_velocity: f64,
}

impl Default for PsoParams {
    fn default() -> Self {
        Self {
            swarm_size: 60,
            max_iterations: 100,
            inertia_min: 0.4,
            inertia_max: 0.9,
            cognitive: 2.05,
            social: 2.05,
            max_velocity: 10.,
        }
    }
}

pub struct PsoResult {
    pub position: Vec<f64>,
    pub value: f64,
}

/// Minimizes `objective` over the box given by per-dimension
/// `(lower, upper)` bounds.
pub fn minimize<F>(objective: F, bounds: &[(f64, f64)], params: &PsoParams, rng: &mut Pcg64) -> PsoResult
where
    F: Fn(&[f64]) -> f64,
{
    let dims = bounds.len();
    let swarm_size = params.swarm_size.max(1);

    let mut positions: Vec<Vec<f64>> = (0..swarm_size)
        .map(|_| {
            bounds
                .iter()
                .map(|(lower, upper)| rng.gen_range(*lower..=*upper))
                .collect()
        })
        .collect();
    let mut velocities: Vec<Vec<f64>> = vec![vec![0.; dims]; swarm_size];

    let mut personal_best = positions.clone();
    let mut personal_best_value: Vec<f64> = positions.iter().map(|p| objective(p)).collect();

    let mut global_best_index = 0;
    for i in 1..swarm_size {
        if personal_best_value[i] < personal_best_value[global_best_index] {
            global_best_index = i;
        }
    }
    let mut global_best = personal_best[global_best_index].clone();
    let mut global_best_value = personal_best_value[global_best_index];

    for iteration in 0..params.max_iterations {
        let progress = if params.max_iterations > 1 {
            iteration as f64 / (params.max_iterations - 1) as f64
        } else {
            0.
        };
        let inertia = params.inertia_max - (params.inertia_max - params.inertia_min) * progress;

        for i in 0..swarm_size {
            for d in 0..dims {
                let r1: f64 = rng.gen();
                let r2: f64 = rng.gen();
                let mut velocity = inertia * velocities[i][d]
                    + params.cognitive * r1 * (personal_best[i][d] - positions[i][d])
                    + params.social * r2 * (global_best[d] - positions[i][d]);
                velocity = velocity.clamp(-params.max_velocity, params.max_velocity);
                velocities[i][d] = velocity;
                positions[i][d] = (positions[i][d] + velocity).clamp(bounds[d].0, bounds[d].1);
            }

            let value = objective(&positions[i]);
            if value < personal_best_value[i] {
                personal_best_value[i] = value;
                personal_best[i] = positions[i].clone();
                if value < global_best_value {
                    global_best_value = value;
                    global_best = positions[i].clone();
                }
            }
        }
    }

    PsoResult {
        position: global_best,
        value: global_best_value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn converges_on_a_quadratic_bowl() {
        let mut rng = Pcg64::seed_from_u64(123);
        let bounds = vec![(-5., 5.); 3];
        let result = minimize(
            |x| x.iter().map(|v| v * v).sum(),
            &bounds,
            &PsoParams::default(),
            &mut rng,
        );
        assert!(result.value < 1e-3, "value = {}", result.value);
        for v in result.position {
            assert!(v.abs() < 0.1);
        }
    }

    #[test]
    fn respects_bounds() {
        let mut rng = Pcg64::seed_from_u64(7);
        let bounds = vec![(0., 3.); 2];
        // Minimum of the unconstrained objective lies outside the box.
        let result = minimize(
            |x| x.iter().map(|v| (v - 10.) * (v - 10.)).sum(),
            &bounds,
            &PsoParams::default(),
            &mut rng,
        );
        for v in result.position {
            assert!((0. ..=3.).contains(&v));
        }
    }
}
