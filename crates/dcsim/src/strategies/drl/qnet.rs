//! A small feedforward Q-network with an Adam optimizer.

use rand::Rng;
use rand_pcg::Pcg64;

const HIDDEN: usize = 64;

/// Two linear layers with a ReLU in between: state -> 64 -> actions.
#[derive(Clone)]
pub struct QNetwork {
    in_dim: usize,
    out_dim: usize,
    // row-major: w1[h * in_dim + i], w2[o * HIDDEN + h]
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
}

impl QNetwork {
    pub fn new(in_dim: usize, out_dim: usize, rng: &mut Pcg64) -> Self {
        let scale1 = 1. / (in_dim as f64).sqrt();
        let scale2 = 1. / (HIDDEN as f64).sqrt();
        Self {
            in_dim,
            out_dim,
            w1: (0..HIDDEN * in_dim).map(|_| rng.gen_range(-scale1..scale1)).collect(),
            b1: vec![0.; HIDDEN],
            w2: (0..out_dim * HIDDEN).map(|_| rng.gen_range(-scale2..scale2)).collect(),
            b2: vec![0.; out_dim],
        }
    }

    fn hidden(&self, state: &[f64]) -> Vec<f64> {
        let mut hidden = vec![0.; HIDDEN];
        for h in 0..HIDDEN {
            let mut sum = self.b1[h];
            for i in 0..self.in_dim {
                sum += self.w1[h * self.in_dim + i] * state[i];
            }
            hidden[h] = sum.max(0.);
        }
        hidden
    }

    /// Q-values for every action.
    pub fn forward(&self, state: &[f64]) -> Vec<f64> {
        let hidden = self.hidden(state);
        let mut out = vec![0.; self.out_dim];
        for (o, out_value) in out.iter_mut().enumerate() {
            let mut sum = self.b2[o];
            for h in 0..HIDDEN {
                sum += self.w2[o * HIDDEN + h] * hidden[h];
            }
            *out_value = sum;
        }
        out
    }

    pub fn argmax(&self, state: &[f64]) -> usize {
        let q = self.forward(state);
        let mut best = 0;
        for (action, value) in q.iter().enumerate() {
            if *value > q[best] {
                best = action;
            }
        }
        best
    }

    pub fn max_q(&self, state: &[f64]) -> f64 {
        self.forward(state).into_iter().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Accumulates gradients of the squared error on the chosen action's
    /// Q-value toward `target`.
    fn accumulate_gradients(&self, state: &[f64], action: usize, target: f64, grads: &mut Gradients) {
        let hidden = self.hidden(state);
        let mut q = self.b2[action];
        for h in 0..HIDDEN {
            q += self.w2[action * HIDDEN + h] * hidden[h];
        }
        let d_out = 2. * (q - target);

        grads.b2[action] += d_out;
        for h in 0..HIDDEN {
            grads.w2[action * HIDDEN + h] += d_out * hidden[h];
            if hidden[h] > 0. {
                let d_hidden = d_out * self.w2[action * HIDDEN + h];
                grads.b1[h] += d_hidden;
                for i in 0..self.in_dim {
                    grads.w1[h * self.in_dim + i] += d_hidden * state[i];
                }
            }
        }
    }
}

struct Gradients {
    w1: Vec<f64>,
    b1: Vec<f64>,
    w2: Vec<f64>,
    b2: Vec<f64>,
}

impl Gradients {
    fn zeros_like(net: &QNetwork) -> Self {
        Self {
            w1: vec![0.; net.w1.len()],
            b1: vec![0.; net.b1.len()],
            w2: vec![0.; net.w2.len()],
            b2: vec![0.; net.b2.len()],
        }
    }

    fn scale(&mut self, factor: f64) {
        for grads in [&mut self.w1, &mut self.b1, &mut self.w2, &mut self.b2] {
            for g in grads.iter_mut() {
                *g *= factor;
            }
        }
    }
}

/// Adam optimizer state over the network parameters.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    step: u64,
    m: Vec<f64>,
    v: Vec<f64>,
}

impl Adam {
    pub fn new(learning_rate: f64, net: &QNetwork) -> Self {
        let size = net.w1.len() + net.b1.len() + net.w2.len() + net.b2.len();
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            step: 0,
            m: vec![0.; size],
            v: vec![0.; size],
        }
    }

    fn apply(&mut self, net: &mut QNetwork, grads: &Gradients) {
        self.step += 1;
        let bias1 = 1. - self.beta1.powi(self.step as i32);
        let bias2 = 1. - self.beta2.powi(self.step as i32);

        let params = [&mut net.w1, &mut net.b1, &mut net.w2, &mut net.b2];
        let grad_slices = [&grads.w1, &grads.b1, &grads.w2, &grads.b2];
        let mut offset = 0;
        for (param, grad) in params.into_iter().zip(grad_slices) {
            for (index, (p, g)) in param.iter_mut().zip(grad.iter()).enumerate() {
                let slot = offset + index;
                self.m[slot] = self.beta1 * self.m[slot] + (1. - self.beta1) * g;
                self.v[slot] = self.beta2 * self.v[slot] + (1. - self.beta2) * g * g;
                let m_hat = self.m[slot] / bias1;
                let v_hat = self.v[slot] / bias2;
                *p -= self.learning_rate * m_hat / (v_hat.sqrt() + self.epsilon);
            }
            offset += grad.len();
        }
    }
}

/// One optimization step toward the TD targets of a batch of
/// `(state, action, target)` triples.
pub fn train_step(net: &mut QNetwork, optimizer: &mut Adam, batch: &[(&[f64], usize, f64)]) {
    if batch.is_empty() {
        return;
    }
    let mut grads = Gradients::zeros_like(net);
    for (state, action, target) in batch {
        net.accumulate_gradients(state, *action, *target, &mut grads);
    }
    grads.scale(1. / batch.len() as f64);
    optimizer.apply(net, &grads);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn learns_a_fixed_target() {
        let mut rng = Pcg64::seed_from_u64(42);
        let mut net = QNetwork::new(4, 3, &mut rng);
        let mut optimizer = Adam::new(1e-2, &net);
        let state = [0.5, -0.2, 1.0, 0.1];

        for _ in 0..500 {
            train_step(&mut net, &mut optimizer, &[(&state, 1, 5.)]);
        }
        let q = net.forward(&state);
        assert!((q[1] - 5.).abs() < 0.1, "q = {:?}", q);
    }

    #[test]
    fn argmax_tracks_the_trained_action() {
        let mut rng = Pcg64::seed_from_u64(1);
        let mut net = QNetwork::new(2, 4, &mut rng);
        let mut optimizer = Adam::new(1e-2, &net);
        let state = [1.0, -1.0];

        for _ in 0..300 {
            train_step(&mut net, &mut optimizer, &[(&state, 2, 10.), (&state, 0, -10.)]);
        }
        assert_eq!(net.argmax(&state), 2);
    }
}
