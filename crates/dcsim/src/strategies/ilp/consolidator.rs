//! ILP-based placement and consolidation strategy.

use std::time::Duration;

use log::{debug, warn};

use crate::core::common::Resources;
use crate::core::config::options::Options;
use crate::core::error::SimulationError;
use crate::core::physical_machine::PhysicalMachine;
use crate::core::vm::VirtualMachine;
use crate::strategies::ilp::model::{IlpModel, Sense};
use crate::strategies::ilp::solver::{BranchAndBoundSolver, IlpSolver, SolverError};
use crate::strategies::{ClusterState, Decision, PlacementStrategy, StrategyDecisions};

/// Tunable parameters of the consolidation program.
#[derive(Clone, Debug)]
pub struct IlpParams {
    /// Cost per performed migration.
    pub mu: f64,
    /// Target utilization after migration: the CPU load of candidates left
    /// in place must not exceed `tau` times the reference machine capacity.
    pub tau: f64,
    /// Scaler of the dynamic placement cost for new requests. A negative
    /// value switches to scaling by the VM's current/requested CPU ratio.
    pub beta: f64,
    /// Same as `beta` for migration candidates.
    pub gamma: f64,
    /// Migration start threshold consumed by over-commit detection.
    pub mst: f64,
    /// How many powered-off machines to offer the model per bundled VM.
    pub extra_machine_coef: f64,
    /// Big-M bound on requests per machine.
    pub max_requests_per_pm: f64,
    pub time_limit: Duration,
    pub mip_gap: f64,
    pub bundle_size: usize,
}

impl Default for IlpParams {
    fn default() -> Self {
        Self {
            mu: 250.,
            tau: 0.75,
            beta: 1.0,
            gamma: 1.0,
            mst: 1.0,
            extra_machine_coef: 5.0,
            max_requests_per_pm: 100_000.,
            time_limit: Duration::from_secs(60),
            mip_gap: 0.01,
            bundle_size: 10,
        }
    }
}

/// Outcome of one solve, kept for the learning wrapper.
#[derive(Clone, Copy, Debug)]
pub struct SolveOutcome {
    pub feasible: bool,
    pub objective: f64,
}

/// Builds a binary program over the bundled VMs and a subset of candidate
/// machines, minimizing power-on, migration and utilization-dependent
/// placement costs, and decodes the solution into decisions.
pub struct IlpConsolidator {
    pub(crate) params: IlpParams,
    solver: Box<dyn IlpSolver>,
}

impl IlpConsolidator {
    pub fn new(params: IlpParams) -> Self {
        Self {
            params,
            solver: Box::new(BranchAndBoundSolver::new()),
        }
    }

    pub fn with_solver(params: IlpParams, solver: Box<dyn IlpSolver>) -> Self {
        Self { params, solver }
    }

    pub fn from_options(options: &Options) -> Result<Self, SimulationError> {
        let defaults = IlpParams::default();
        Ok(Self::new(IlpParams {
            mu: options.get("mu", defaults.mu)?,
            tau: options.get("tau", defaults.tau)?,
            beta: options.get("beta", defaults.beta)?,
            gamma: options.get("gamma", defaults.gamma)?,
            mst: options.get("mst", defaults.mst)?,
            extra_machine_coef: options.get("extra_coef", defaults.extra_machine_coef)?,
            max_requests_per_pm: options.get("max_requests_per_pm", defaults.max_requests_per_pm)?,
            time_limit: Duration::from_secs_f64(options.get("time_limit", 60.)?),
            mip_gap: options.get("mip_gap", defaults.mip_gap)?,
            bundle_size: options.get("bundle_size", defaults.bundle_size)?,
        }))
    }

    /// Candidate machines offered to the model: every powered-on machine
    /// plus the cheapest-to-start powered-off ones, up to
    /// `extra_machine_coef` per bundled VM.
    fn choose_machines<'a>(
        &self,
        machines: &'a [PhysicalMachine],
        request_count: usize,
        migration_count: usize,
    ) -> Vec<&'a PhysicalMachine> {
        let mut chosen: Vec<&PhysicalMachine> =
            machines.iter().filter(|pm| pm.is_powered_on()).collect();

        let mut turned_off: Vec<&PhysicalMachine> =
            machines.iter().filter(|pm| !pm.is_powered_on()).collect();
        turned_off.sort_by(|a, b| turn_on_cost(a).total_cmp(&turn_on_cost(b)));

        let extra = (self.params.extra_machine_coef * (request_count + migration_count) as f64) as usize;
        chosen.extend(turned_off.into_iter().take(extra));
        debug!(
            target: "placement",
            "consolidator chose {} machines for the program", chosen.len()
        );
        chosen
    }

    /// Piecewise-linear power rate at the machine's current CPU utilization
    /// `u` (percent): high when placing onto a cold machine, rising again as
    /// the machine saturates.
    fn dynamic_cost(pm: &PhysicalMachine, request_cpu: f64) -> f64 {
        let u = pm.utilization().cpu;
        let rate = if u < 45. {
            pm.power_per_cpu_unit() * (300. - 4. * u)
        } else {
            pm.power_per_cpu_unit() * (4. * u - 60.)
        };
        rate * request_cpu
    }

    fn scaled_dynamic_cost(pm: &PhysicalMachine, vm: &VirtualMachine, scaler: f64) -> f64 {
        let base = Self::dynamic_cost(pm, vm.current_usage().cpu);
        if scaler < 0. {
            let requested = vm.requested().cpu;
            if requested > 0. {
                base * vm.current_usage().cpu / requested
            } else {
                base
            }
        } else {
            base * scaler
        }
    }

    pub(crate) fn solve(
        &self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<(StrategyDecisions, SolveOutcome), SimulationError> {
        let chosen = self.choose_machines(cluster.machines, new_requests.len(), to_migrate.len());
        let machine_count = chosen.len();
        debug!(
            target: "placement",
            "consolidation program: {} machines, {} new requests, {} migration candidates",
            machine_count,
            new_requests.len(),
            to_migrate.len()
        );

        if machine_count == 0 {
            let decisions = StrategyDecisions {
                placements: unplaced(new_requests),
                migrations: Vec::new(),
            };
            return Ok((
                decisions,
                SolveOutcome {
                    feasible: new_requests.is_empty(),
                    objective: 0.,
                },
            ));
        }

        let mut model = IlpModel::new();

        // y[i]: machine powered on; cold machines are penalized.
        let y: Vec<usize> = chosen
            .iter()
            .map(|pm| model.add_var(if pm.is_powered_on() { 1. } else { 100. }))
            .collect();

        // x_new[j][i]: new request j placed on machine i, with the
        // utilization-dependent placement cost scaled by beta.
        let x_new: Vec<Vec<usize>> = new_requests
            .iter()
            .map(|vm| {
                chosen
                    .iter()
                    .map(|pm| model.add_var(Self::scaled_dynamic_cost(pm, vm, self.params.beta)))
                    .collect()
            })
            .collect();

        // x_mig[k][i]: candidate k moved to machine i, scaled by gamma.
        let x_mig: Vec<Vec<usize>> = to_migrate
            .iter()
            .map(|vm| {
                chosen
                    .iter()
                    .map(|pm| model.add_var(Self::scaled_dynamic_cost(pm, vm, self.params.gamma)))
                    .collect()
            })
            .collect();

        // m[k]: candidate k is actually migrated, at cost mu each.
        let migrate: Vec<usize> = to_migrate.iter().map(|_| model.add_var(self.params.mu)).collect();

        // Each new request lands on exactly one machine.
        for row in &x_new {
            model.add_constraint(row.iter().map(|var| (*var, 1.)).collect(), Sense::Eq, 1.);
        }

        // Per-machine, per-axis capacity over the free resources.
        for (i, pm) in chosen.iter().enumerate() {
            let free = pm.free();
            for (axis, free_axis) in [
                (Axis::Cpu, free.cpu),
                (Axis::Ram, free.ram),
                (Axis::Disk, free.disk),
                (Axis::Bandwidth, free.bandwidth),
                (Axis::Fpga, free.fpga),
            ] {
                let mut terms = Vec::new();
                for (j, vm) in new_requests.iter().enumerate() {
                    terms.push((x_new[j][i], axis.of(&vm.current_usage())));
                }
                for (k, vm) in to_migrate.iter().enumerate() {
                    terms.push((x_mig[k][i], axis.of(&vm.current_usage())));
                }
                model.add_constraint(terms, Sense::Le, free_axis.max(0.));
            }
        }

        // Big-M activation: assignments imply the machine is on.
        for (i, y_var) in y.iter().enumerate() {
            let mut terms: Vec<(usize, f64)> = Vec::new();
            for row in &x_new {
                terms.push((row[i], 1.));
            }
            for row in &x_mig {
                terms.push((row[i], 1.));
            }
            terms.push((*y_var, -self.params.max_requests_per_pm));
            model.add_constraint(terms, Sense::Le, 0.);
        }

        // A candidate either stays put or moves to exactly one machine.
        for (k, m_var) in migrate.iter().enumerate() {
            let mut terms: Vec<(usize, f64)> = x_mig[k].iter().map(|var| (*var, 1.)).collect();
            terms.push((*m_var, -1.));
            model.add_constraint(terms, Sense::Eq, 0.);
        }

        // Residual load of non-migrated candidates stays below tau times
        // the reference machine capacity.
        if !to_migrate.is_empty() {
            let reference_cpu = chosen[0].total().cpu;
            let mut terms = Vec::new();
            let mut load_sum = 0.;
            for (k, vm) in to_migrate.iter().enumerate() {
                let cpu = vm.current_usage().cpu.ceil();
                load_sum += cpu;
                terms.push((migrate[k], -cpu));
            }
            model.add_constraint(terms, Sense::Le, self.params.tau * reference_cpu - load_sum);
        }

        match self
            .solver
            .minimize(&model, self.params.time_limit, self.params.mip_gap)
        {
            Ok(solution) => {
                let mut decisions = StrategyDecisions::default();
                for (j, vm) in new_requests.iter().enumerate() {
                    let target = x_new[j]
                        .iter()
                        .position(|var| solution.values[*var])
                        .map(|i| chosen[i].id());
                    decisions.placements.push(Decision {
                        vm_id: vm.id(),
                        target,
                    });
                }
                for (k, vm) in to_migrate.iter().enumerate() {
                    if !solution.values[migrate[k]] {
                        continue;
                    }
                    if let Some(i) = x_mig[k].iter().position(|var| solution.values[*var]) {
                        decisions.migrations.push(Decision {
                            vm_id: vm.id(),
                            target: Some(chosen[i].id()),
                        });
                    }
                }
                Ok((
                    decisions,
                    SolveOutcome {
                        feasible: true,
                        objective: solution.objective,
                    },
                ))
            }
            Err(SolverError::Infeasible) | Err(SolverError::TimeLimit) => {
                warn!(target: "placement", "consolidation program infeasible");
                let decisions = StrategyDecisions {
                    placements: unplaced(new_requests),
                    migrations: Vec::new(),
                };
                Ok((
                    decisions,
                    SolveOutcome {
                        feasible: false,
                        objective: 0.,
                    },
                ))
            }
            Err(e) => Err(SimulationError::Strategy(e.to_string())),
        }
    }
}

fn unplaced(vms: &[&VirtualMachine]) -> Vec<Decision> {
    vms.iter()
        .map(|vm| Decision {
            vm_id: vm.id(),
            target: None,
        })
        .collect()
}

fn turn_on_cost(pm: &PhysicalMachine) -> f64 {
    pm.power_on_cost() + 4. * pm.power_per_cpu_unit() + 2. * pm.power_per_fpga_unit()
}

enum Axis {
    Cpu,
    Ram,
    Disk,
    Bandwidth,
    Fpga,
}

impl Axis {
    fn of(&self, resources: &Resources) -> f64 {
        match self {
            Axis::Cpu => resources.cpu,
            Axis::Ram => resources.ram,
            Axis::Disk => resources.disk,
            Axis::Bandwidth => resources.bandwidth,
            Axis::Fpga => resources.fpga,
        }
    }
}

impl PlacementStrategy for IlpConsolidator {
    fn run(
        &mut self,
        new_requests: &[&VirtualMachine],
        to_migrate: &[&VirtualMachine],
        cluster: &ClusterState,
    ) -> Result<StrategyDecisions, SimulationError> {
        let (decisions, _) = self.solve(new_requests, to_migrate, cluster)?;
        Ok(decisions)
    }

    fn bundle_size(&self) -> usize {
        self.params.bundle_size
    }

    fn migration_threshold(&self) -> f64 {
        self.params.mst
    }

    fn name(&self) -> &str {
        "Ilp"
    }
}
