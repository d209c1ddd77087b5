//! Solver interface for the consolidation programs, with an in-tree
//! branch-and-bound implementation.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::strategies::ilp::model::{IlpModel, Sense};

const EPS: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error("model is infeasible")]
    Infeasible,
    #[error("time limit reached without a feasible solution")]
    TimeLimit,
    #[error("solver failure: {0}")]
    Internal(String),
}

#[derive(Clone, Debug)]
pub struct IlpSolution {
    pub values: Vec<bool>,
    pub objective: f64,
}

/// Minimizes a binary program within a time limit and a relative MIP gap.
///
/// The trait is the only thing the consolidator depends on, so an external
/// MILP package can be dropped in without touching the strategy.
pub trait IlpSolver: Send {
    fn minimize(
        &self,
        model: &IlpModel,
        time_limit: Duration,
        mip_gap: f64,
    ) -> Result<IlpSolution, SolverError>;
}

/// Depth-first branch and bound over the binary variables.
///
/// Branches in order of descending objective magnitude, trying the
/// cost-lowering value first, so the first leaf reached is already a greedy
/// solution. Nodes are pruned on constraint-interval infeasibility and on
/// the fixed-cost lower bound; the search stops once the incumbent is within
/// the requested gap of the root bound or the time limit expires.
#[derive(Default)]
pub struct BranchAndBoundSolver;

impl BranchAndBoundSolver {
    pub fn new() -> Self {
        Default::default()
    }
}

impl IlpSolver for BranchAndBoundSolver {
    fn minimize(
        &self,
        model: &IlpModel,
        time_limit: Duration,
        mip_gap: f64,
    ) -> Result<IlpSolution, SolverError> {
        let mut search = Search::new(model, time_limit, mip_gap);
        search.dfs(0);
        match search.best {
            Some((values, objective)) => Ok(IlpSolution { values, objective }),
            None if search.timed_out => Err(SolverError::TimeLimit),
            None => Err(SolverError::Infeasible),
        }
    }
}

struct Search<'a> {
    model: &'a IlpModel,
    order: Vec<usize>,
    var_constraints: Vec<Vec<(usize, f64)>>,
    fixed_sum: Vec<f64>,
    min_rest: Vec<f64>,
    max_rest: Vec<f64>,
    values: Vec<bool>,
    fixed_cost: f64,
    optimistic_rest: f64,
    root_bound: f64,
    best: Option<(Vec<bool>, f64)>,
    deadline: Instant,
    mip_gap: f64,
    nodes: u64,
    timed_out: bool,
    gap_reached: bool,
}

impl<'a> Search<'a> {
    fn new(model: &'a IlpModel, time_limit: Duration, mip_gap: f64) -> Self {
        let n = model.num_vars();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|a, b| model.objective()[*b].abs().total_cmp(&model.objective()[*a].abs()));

        let mut var_constraints = vec![Vec::new(); n];
        let mut min_rest = Vec::with_capacity(model.constraints().len());
        let mut max_rest = Vec::with_capacity(model.constraints().len());
        for (index, constraint) in model.constraints().iter().enumerate() {
            let mut lo = 0.;
            let mut hi = 0.;
            for (var, coeff) in &constraint.terms {
                var_constraints[*var].push((index, *coeff));
                lo += coeff.min(0.);
                hi += coeff.max(0.);
            }
            min_rest.push(lo);
            max_rest.push(hi);
        }

        let optimistic_rest: f64 = model.objective().iter().map(|cost| cost.min(0.)).sum();

        Self {
            model,
            order,
            var_constraints,
            fixed_sum: vec![0.; model.constraints().len()],
            min_rest,
            max_rest,
            values: vec![false; n],
            fixed_cost: 0.,
            optimistic_rest,
            root_bound: optimistic_rest,
            best: None,
            deadline: Instant::now() + time_limit,
            mip_gap,
            nodes: 0,
            timed_out: false,
            gap_reached: false,
        }
    }

    fn constraints_can_hold(&self) -> bool {
        for (index, constraint) in self.model.constraints().iter().enumerate() {
            let lo = self.fixed_sum[index] + self.min_rest[index];
            let hi = self.fixed_sum[index] + self.max_rest[index];
            let holds = match constraint.sense {
                Sense::Le => lo <= constraint.rhs + EPS,
                Sense::Ge => hi >= constraint.rhs - EPS,
                Sense::Eq => lo <= constraint.rhs + EPS && hi >= constraint.rhs - EPS,
            };
            if !holds {
                return false;
            }
        }
        true
    }

    fn fix(&mut self, var: usize, value: bool) {
        self.values[var] = value;
        let cost = self.model.objective()[var];
        if value {
            self.fixed_cost += cost;
        }
        self.optimistic_rest -= cost.min(0.);
        for (index, coeff) in &self.var_constraints[var] {
            if value {
                self.fixed_sum[*index] += coeff;
            }
            self.min_rest[*index] -= coeff.min(0.);
            self.max_rest[*index] -= coeff.max(0.);
        }
    }

    fn unfix(&mut self, var: usize, value: bool) {
        let cost = self.model.objective()[var];
        if value {
            self.fixed_cost -= cost;
        }
        self.optimistic_rest += cost.min(0.);
        for (index, coeff) in &self.var_constraints[var] {
            if value {
                self.fixed_sum[*index] -= coeff;
            }
            self.min_rest[*index] += coeff.min(0.);
            self.max_rest[*index] += coeff.max(0.);
        }
    }

    fn dfs(&mut self, depth: usize) {
        if self.timed_out || self.gap_reached {
            return;
        }
        self.nodes += 1;
        if self.nodes % 256 == 0 && Instant::now() > self.deadline {
            self.timed_out = true;
            return;
        }
        if !self.constraints_can_hold() {
            return;
        }
        if let Some((_, incumbent)) = &self.best {
            if self.fixed_cost + self.optimistic_rest >= incumbent - EPS {
                return;
            }
        }
        if depth == self.order.len() {
            let objective = self.fixed_cost;
            self.best = Some((self.values.clone(), objective));
            let gap_bound = self.mip_gap * objective.abs().max(1.);
            if objective - self.root_bound <= gap_bound {
                self.gap_reached = true;
            }
            return;
        }

        let var = self.order[depth];
        let preferred = self.model.objective()[var] < 0.;
        for value in [preferred, !preferred] {
            self.fix(var, value);
            self.dfs(depth + 1);
            self.unfix(var, value);
            if self.timed_out || self.gap_reached {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::ilp::model::Sense;

    fn limit() -> Duration {
        Duration::from_secs(10)
    }

    #[test]
    fn picks_the_cheapest_feasible_assignment() {
        // Choose exactly one of three options with costs 5, 2, 9.
        let mut model = IlpModel::new();
        let a = model.add_var(5.);
        let b = model.add_var(2.);
        let c = model.add_var(9.);
        model.add_constraint(vec![(a, 1.), (b, 1.), (c, 1.)], Sense::Eq, 1.);

        let solution = BranchAndBoundSolver::new().minimize(&model, limit(), 0.).unwrap();
        assert_eq!(solution.values, vec![false, true, false]);
        assert_eq!(solution.objective, 2.);
        assert_eq!(model.objective_value(&solution.values), solution.objective);
    }

    #[test]
    fn respects_capacity_constraints() {
        // Two items must go somewhere, but they do not fit together.
        let mut model = IlpModel::new();
        let x1 = model.add_var(1.);
        let x2 = model.add_var(1.);
        let y1 = model.add_var(10.);
        let y2 = model.add_var(10.);
        // item 1 on bin 1 or 2, item 2 likewise
        model.add_constraint(vec![(x1, 1.), (y1, 1.)], Sense::Eq, 1.);
        model.add_constraint(vec![(x2, 1.), (y2, 1.)], Sense::Eq, 1.);
        // bin 1 holds one item
        model.add_constraint(vec![(x1, 3.), (x2, 3.)], Sense::Le, 4.);

        let solution = BranchAndBoundSolver::new().minimize(&model, limit(), 0.).unwrap();
        let on_bin_one = solution.values[0] as u32 + solution.values[1] as u32;
        assert_eq!(on_bin_one, 1);
        assert_eq!(solution.objective, 11.);
    }

    #[test]
    fn detects_infeasibility() {
        let mut model = IlpModel::new();
        let x = model.add_var(1.);
        model.add_constraint(vec![(x, 1.)], Sense::Ge, 2.);

        let result = BranchAndBoundSolver::new().minimize(&model, limit(), 0.);
        assert!(matches!(result, Err(SolverError::Infeasible)));
    }

    #[test]
    fn negative_costs_are_taken_greedily() {
        let mut model = IlpModel::new();
        let a = model.add_var(-3.);
        let b = model.add_var(-1.);
        model.add_constraint(vec![(a, 1.), (b, 1.)], Sense::Le, 1.);

        let solution = BranchAndBoundSolver::new().minimize(&model, limit(), 0.).unwrap();
        assert_eq!(solution.values, vec![true, false]);
        assert_eq!(solution.objective, -3.);
    }
}
