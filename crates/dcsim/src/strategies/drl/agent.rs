//! Q-learning agent interface.

use std::collections::VecDeque;

use rand::Rng;
use rand_pcg::Pcg64;

/// A single experience transition stored in the replay buffer.
#[derive(Clone, Debug)]
pub struct Transition {
    pub state: Vec<f64>,
    pub action: usize,
    pub reward: f64,
    pub next_state: Vec<f64>,
    /// True when the transition ended the episode (an infeasible solve).
    pub terminal: bool,
}

/// The surface the core expects from a Q-learning agent. The bundled agents
/// implement it on a small in-tree network; an external library can be
/// plugged in behind the same trait.
pub trait QAgent: Send {
    /// Epsilon-greedy action selection.
    fn select_action(&mut self, state: &[f64]) -> usize;

    /// Stores a transition in the replay buffer.
    fn store(&mut self, transition: Transition);

    /// Runs one gradient step over a replay sample.
    fn update(&mut self);

    fn epsilon(&self) -> f64;

    fn batch_size(&self) -> usize;
}

/// Bounded FIFO replay buffer.
pub struct ReplayBuffer {
    transitions: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            transitions: VecDeque::new(),
            capacity,
        }
    }

    pub fn push(&mut self, transition: Transition) {
        if self.transitions.len() >= self.capacity {
            self.transitions.pop_front();
        }
        self.transitions.push_back(transition);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn get(&self, index: usize) -> &Transition {
        &self.transitions[index]
    }

    /// Uniformly samples `count` distinct indices.
    pub fn sample_indices(&self, count: usize, rng: &mut Pcg64) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..self.transitions.len()).collect();
        for i in 0..count.min(indices.len()) {
            let j = rng.gen_range(i..indices.len());
            indices.swap(i, j);
        }
        indices.truncate(count);
        indices
    }
}
