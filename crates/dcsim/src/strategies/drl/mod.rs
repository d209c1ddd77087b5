//! Reinforcement-learning driven strategy tuning.

pub mod agent;
pub mod ddqn;
pub mod dqn;
pub mod ilp_rl;
pub mod qnet;

pub use agent::{QAgent, Transition};
pub use ilp_rl::{AgentKind, IlpRlStrategy};
