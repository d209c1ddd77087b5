//! Builder for binary linear programs.

/// Sense of a linear constraint.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Sense {
    Le,
    Eq,
    Ge,
}

/// A linear constraint `sum(coeff * var) <sense> rhs` over binary variables.
#[derive(Clone, Debug)]
pub struct Constraint {
    pub terms: Vec<(usize, f64)>,
    pub sense: Sense,
    pub rhs: f64,
}

/// A minimization program over 0/1 variables.
///
/// This is the whole surface the consolidator builds against; solvers see
/// nothing but variables, a linear objective and linear constraints, so an
/// external solver can be swapped in behind [`IlpSolver`](super::solver::IlpSolver)
/// without touching the model construction.
#[derive(Clone, Debug, Default)]
pub struct IlpModel {
    objective: Vec<f64>,
    constraints: Vec<Constraint>,
}

impl IlpModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a binary variable with the given objective coefficient and
    /// returns its index.
    pub fn add_var(&mut self, cost: f64) -> usize {
        self.objective.push(cost);
        self.objective.len() - 1
    }

    pub fn add_constraint(&mut self, terms: Vec<(usize, f64)>, sense: Sense, rhs: f64) {
        self.constraints.push(Constraint { terms, sense, rhs });
    }

    pub fn num_vars(&self) -> usize {
        self.objective.len()
    }

    pub fn objective(&self) -> &[f64] {
        &self.objective
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Objective value of a complete assignment.
    pub fn objective_value(&self, values: &[bool]) -> f64 {
        self.objective
            .iter()
            .zip(values)
            .map(|(cost, set)| if *set { *cost } else { 0. })
            .sum()
    }
}
