use dcsim::core::common::Resources;
use dcsim::core::physical_machine::PhysicalMachine;
use dcsim::core::vm::VirtualMachine;
use dcsim::strategies::drl::dqn::{AgentParams, DqnAgent};
use dcsim::strategies::drl::{QAgent, Transition};
use dcsim::strategies::ilp::consolidator::{IlpConsolidator, IlpParams};
use dcsim::strategies::pso::Papso;
use dcsim::strategies::{
    placement_strategy_resolver, AlphaBeta, BestFitDecreasing, ClusterState, FirstFitDecreasing,
    OpenStack, PlacementStrategy, WindowCounters,
};
use dcsim::core::config::options::parse_config_value;

fn machine(id: u32, cpu: f64) -> PhysicalMachine {
    PhysicalMachine::new(id, Resources::new(cpu, 100., 100., 1000., 0.), 0.5, 1., 2.)
}

fn vm(id: u32, cpu: f64, utilization: f64) -> VirtualMachine {
    let mut vm = VirtualMachine::new(id, Resources::new(cpu, 1., 1., 10., 0.), 100.);
    vm.set_utilization(utilization);
    vm
}

fn cluster(machines: &[PhysicalMachine]) -> ClusterState {
    ClusterState {
        machines,
        vm_count: 0,
        window: WindowCounters::default(),
    }
}

fn run(
    strategy: &mut dyn PlacementStrategy,
    new_requests: &[VirtualMachine],
    to_migrate: &[VirtualMachine],
    machines: &[PhysicalMachine],
) -> dcsim::strategies::StrategyDecisions {
    let new_refs: Vec<&VirtualMachine> = new_requests.iter().collect();
    let mig_refs: Vec<&VirtualMachine> = to_migrate.iter().collect();
    strategy.run(&new_refs, &mig_refs, &cluster(machines)).unwrap()
}

fn target_of(decisions: &[dcsim::strategies::Decision], vm_id: u32) -> Option<u32> {
    decisions
        .iter()
        .find(|decision| decision.vm_id == vm_id)
        .and_then(|decision| decision.target)
}

#[test]
// Largest request first, each on the first machine with room
fn first_fit_decreasing_packs_in_cpu_order() {
    let machines = vec![machine(0, 10.), machine(1, 10.)];
    let vms = vec![vm(1, 2., 1.), vm(2, 9., 1.), vm(3, 5., 1.)];

    let decisions = run(&mut FirstFitDecreasing::new(), &vms, &[], &machines);
    // 9 lands first and fills machine 0, 5 opens machine 1, 2 joins 5
    assert_eq!(target_of(&decisions.placements, 2), Some(0));
    assert_eq!(target_of(&decisions.placements, 3), Some(1));
    assert_eq!(target_of(&decisions.placements, 1), Some(1));
}

#[test]
fn first_fit_decreasing_reports_no_fit() {
    let machines = vec![machine(0, 4.)];
    let vms = vec![vm(1, 5., 1.)];
    let decisions = run(&mut FirstFitDecreasing::new(), &vms, &[], &machines);
    assert_eq!(decisions.placements[0].target, None);
}

#[test]
// The machine left with the least CPU slack wins; ties go to the smaller id
fn best_fit_decreasing_picks_tightest_machine() {
    let mut loaded = machine(1, 10.);
    loaded.add_vm(99, Resources::new(5., 1., 1., 10., 0.));
    let machines = vec![machine(0, 10.), loaded, machine(2, 6.)];
    let vms = vec![vm(1, 4., 1.)];

    let decisions = run(&mut BestFitDecreasing::new(), &vms, &[], &machines);
    // leftovers: 6 on machine 0, 1 on machine 1, 2 on machine 2
    assert_eq!(decisions.placements[0].target, Some(1));

    let equal = vec![machine(0, 10.), machine(1, 10.)];
    let decisions = run(&mut BestFitDecreasing::new(), &vms, &[], &equal);
    assert_eq!(decisions.placements[0].target, Some(0));
}

#[test]
// Weighted score alpha*cpu + beta*ram decides the packing order
fn alpha_beta_orders_by_weighted_usage() {
    // room for only one of the two VMs
    let machines = vec![machine(0, 6.5)];
    let mut heavy_ram = VirtualMachine::new(1, Resources::new(1., 8., 1., 10., 0.), 100.);
    heavy_ram.set_utilization(1.);
    let mut heavy_cpu = VirtualMachine::new(2, Resources::new(6., 1., 1., 10., 0.), 100.);
    heavy_cpu.set_utilization(1.);

    // with beta dominant the RAM-heavy VM goes first and takes the spot
    let mut strategy = AlphaBeta::new(0.1, 10.);
    let decisions = run(&mut strategy, &[heavy_ram.clone(), heavy_cpu.clone()], &[], &machines);
    assert_eq!(target_of(&decisions.placements, 1), Some(0));
    assert_eq!(target_of(&decisions.placements, 2), None);

    // with alpha dominant the CPU-heavy VM wins instead
    let mut strategy = AlphaBeta::new(10., 0.1);
    let decisions = run(&mut strategy, &[heavy_ram, heavy_cpu], &[], &machines);
    assert_eq!(target_of(&decisions.placements, 2), Some(0));
    assert_eq!(target_of(&decisions.placements, 1), None);
}

#[test]
// Already-on machines cost no power-on, so they win over cold ones
fn openstack_prefers_powered_on_machines() {
    let mut warm = machine(1, 10.);
    warm.add_vm(99, Resources::new(1., 1., 1., 10., 0.));
    let machines = vec![machine(0, 10.), warm];
    let vms = vec![vm(1, 2., 1.)];

    let decisions = run(&mut OpenStack::new(0.8), &vms, &[], &machines);
    assert_eq!(decisions.placements[0].target, Some(1));
}

#[test]
// Raising the allocation limit only widens the candidate set
fn openstack_allocation_limit_is_monotone() {
    let machines = vec![machine(0, 10.)];
    // needs 60% of the machine: rejected at ial = 0.5, accepted at 1.0
    let vms = vec![vm(1, 6., 1.)];

    let strict = run(&mut OpenStack::new(0.5), &vms, &[], &machines);
    assert_eq!(strict.placements[0].target, None);

    let permissive = run(&mut OpenStack::new(1.0), &vms, &[], &machines);
    assert_eq!(permissive.placements[0].target, Some(0));
}

#[test]
// Four unit VMs on four unit machines: the swarm finds a one-to-one
// assignment with no overflows
fn papso_solves_the_feasible_toy() {
    let machines: Vec<PhysicalMachine> = (0..4).map(|id| machine(id, 1.)).collect();
    let vms: Vec<VirtualMachine> = (0..4).map(|id| vm(id, 1., 1.)).collect();

    let (_, options) = parse_config_value("Papso[w1=1.0,w2=0.0,seed=123]");
    let mut strategy = Papso::from_options(&options).unwrap();
    let decisions = run(&mut strategy, &vms, &[], &machines);

    let mut targets: Vec<u32> = decisions
        .placements
        .iter()
        .map(|decision| decision.target.unwrap())
        .collect();
    targets.sort_unstable();
    assert_eq!(targets, vec![0, 1, 2, 3]);
}

#[test]
// The program assigns every request within capacity
fn ilp_places_within_capacity() {
    let machines = vec![machine(0, 4.), machine(1, 4.)];
    let vms = vec![vm(1, 3., 1.), vm(2, 2., 1.), vm(3, 2., 1.)];

    let mut strategy = IlpConsolidator::new(IlpParams::default());
    let decisions = run(&mut strategy, &vms, &[], &machines);

    let mut load = [0.; 2];
    for decision in &decisions.placements {
        let target = decision.target.expect("every request must be placed") as usize;
        let cpu = vms.iter().find(|vm| vm.id() == decision.vm_id).unwrap().current_usage().cpu;
        load[target] += cpu;
    }
    assert!(load.iter().all(|cpu| *cpu <= 4.));
}

#[test]
// With no room anywhere the program is infeasible and nothing is placed
fn ilp_reports_infeasibility() {
    let machines = vec![machine(0, 2.)];
    let vms = vec![vm(1, 3., 1.)];

    let mut strategy = IlpConsolidator::new(IlpParams::default());
    let decisions = run(&mut strategy, &vms, &[], &machines);
    assert_eq!(decisions.placements[0].target, None);
}

#[test]
// A tight residual-load target forces the candidate off its machine
fn ilp_residual_load_forces_migration() {
    let mut source = machine(0, 10.);
    let moving = vm(7, 6., 1.);
    source.add_vm(7, moving.current_usage());
    let machines = vec![source, machine(1, 10.)];

    let params = IlpParams {
        tau: 0.,
        mu: 1.,
        ..IlpParams::default()
    };
    let mut strategy = IlpConsolidator::new(params);
    let decisions = run(&mut strategy, &[], &[moving], &machines);

    assert_eq!(target_of(&decisions.migrations, 7), Some(1));
}

#[test]
// The agent learns to favor the rewarded action
fn dqn_agent_learns_the_rewarded_action() {
    let params = AgentParams {
        learning_rate: 1e-2,
        batch_size: 8,
        epsilon_start: 0.,
        epsilon_min: 0.,
        ..AgentParams::default()
    };
    let mut agent = DqnAgent::new(4, 3, params, 7);
    let state = vec![1., 0., -1., 0.5];

    for _ in 0..32 {
        for action in 0..3 {
            agent.store(Transition {
                state: state.clone(),
                action,
                reward: if action == 2 { 10. } else { -10. },
                next_state: state.clone(),
                terminal: true,
            });
        }
    }
    for _ in 0..300 {
        agent.update();
    }
    assert_eq!(agent.select_action(&state), 2);
}

#[test]
fn resolver_knows_every_strategy() {
    for name in [
        "FirstFitDecreasing",
        "BestFitDecreasing",
        "AlphaBeta",
        "OpenStack[ial=0.9]",
        "Papso[swarm_size=10,max_iters=10]",
        "Ilp[mu=100]",
        "IlpDqn",
        "IlpDoubleDqn",
    ] {
        let strategy = placement_strategy_resolver(name).unwrap();
        assert!(!strategy.name().is_empty());
    }
    assert!(placement_strategy_resolver("NoSuchStrategy").is_err());
}
