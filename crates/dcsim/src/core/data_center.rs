//! Data center state machine: VM index, bundling, migrations, over-commit
//! detection.

use std::mem;

use indexmap::IndexMap;
use log::{debug, info, warn};

use crate::core::common::{MachineUsageInfo, Resources};
use crate::core::config::MigrationTimeModel;
use crate::core::engine::EngineHandle;
use crate::core::error::SimulationError;
use crate::core::events::{Event, EventPayload};
use crate::core::physical_machine::PhysicalMachine;
use crate::core::vm::VirtualMachine;
use crate::strategies::{
    placement_strategy_resolver, ClusterState, PlacementStrategy, StrategyDecisions, WindowCounters,
};

struct VmEntry {
    pm_id: u32,
    vm: VirtualMachine,
}

/// Holds the machines, the VM index and the pending placement bundles, and
/// applies the decisions of the active placement strategy.
///
/// All mutation happens on the engine's consumer thread; observers take
/// snapshots through the introspection methods, which may be one event
/// stale.
pub struct DataCenter {
    machines: Vec<PhysicalMachine>,
    vms: IndexMap<u32, VmEntry>,
    pending_new_requests: Vec<VirtualMachine>,
    pending_migrations: Vec<u32>,
    strategy: Box<dyn PlacementStrategy>,
    migration_time_model: MigrationTimeModel,
    sla_violations_total: u64,
    migrations_total: u64,
    sla_violations_window: u64,
    migrations_window: u64,
    new_requests_window: u64,
}

impl DataCenter {
    pub fn new(strategy: Box<dyn PlacementStrategy>, migration_time_model: MigrationTimeModel) -> Self {
        Self {
            machines: Vec::new(),
            vms: IndexMap::new(),
            pending_new_requests: Vec::new(),
            pending_migrations: Vec::new(),
            strategy,
            migration_time_model,
            sla_violations_total: 0,
            migrations_total: 0,
            sla_violations_window: 0,
            migrations_window: 0,
            new_requests_window: 0,
        }
    }

    /// Adds a machine and returns its id.
    pub fn add_physical_machine(
        &mut self,
        total: Resources,
        per_core_base_power: f64,
        power_per_cpu_unit: f64,
        power_per_fpga_unit: f64,
    ) -> u32 {
        let id = self.machines.len() as u32;
        self.machines.push(PhysicalMachine::new(
            id,
            total,
            per_core_base_power,
            power_per_cpu_unit,
            power_per_fpga_unit,
        ));
        id
    }

    pub fn set_placement_strategy(&mut self, strategy: Box<dyn PlacementStrategy>) {
        self.strategy = strategy;
    }

    // EVENT HANDLERS //////////////////////////////////////////////////////

    pub(crate) fn handle_event(
        &mut self,
        event: Event,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        match event.payload {
            EventPayload::VmRequest(vm) => self.on_vm_request(*vm, engine),
            EventPayload::VmUtilUpdate { vm_id, utilization } => {
                self.on_util_update(vm_id, utilization, engine)
            }
            EventPayload::VmDeparture { vm_id } => self.on_vm_departure(vm_id),
            EventPayload::MigrationComplete {
                vm_id,
                old_pm_id,
                new_pm_id,
            } => self.on_migration_complete(vm_id, old_pm_id, new_pm_id),
            EventPayload::ReconfigureStrategy { name } => {
                info!(target: "placement", "switching strategy to {}", name);
                self.strategy = placement_strategy_resolver(&name)?;
                Ok(())
            }
        }
    }

    fn on_vm_request(
        &mut self,
        vm: VirtualMachine,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        debug!(target: "arrival", "vm {} arrived", vm.id());
        self.new_requests_window += 1;
        self.pending_new_requests.push(vm);
        if self.pending_new_requests.len() >= self.strategy.bundle_size().max(1) {
            self.run_placement(engine)?;
        }
        Ok(())
    }

    fn on_util_update(
        &mut self,
        vm_id: u32,
        utilization: f64,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        let entry = self.vms.get_mut(&vm_id).ok_or(SimulationError::UnknownVm(vm_id))?;
        let old_usage = entry.vm.current_usage();
        entry.vm.set_utilization(utilization);
        let new_usage = entry.vm.current_usage();
        let pm_id = entry.pm_id;
        let old_pm_id = entry.vm.old_pm_id();

        let pm = &mut self.machines[pm_id as usize];
        pm.release(old_usage);
        pm.allocate(new_usage);
        debug!(
            target: "util_update",
            "vm {} updated on machine {}, usage {}",
            vm_id, pm_id, new_usage
        );

        // Both endpoints reserve the VM while it migrates.
        if let Some(old_pm_id) = old_pm_id {
            let old_pm = &mut self.machines[old_pm_id as usize];
            old_pm.release(old_usage);
            old_pm.allocate(new_usage);
        }

        if self.detect_overcommitment(pm_id) {
            self.run_placement(engine)?;
        }
        Ok(())
    }

    fn on_vm_departure(&mut self, vm_id: u32) -> Result<(), SimulationError> {
        let entry = self
            .vms
            .shift_remove(&vm_id)
            .ok_or(SimulationError::UnknownVm(vm_id))?;
        let usage = entry.vm.current_usage();

        if entry.vm.is_migrating() {
            // Cancel the in-flight migration on both endpoints; the pending
            // MigrationComplete event becomes a no-op.
            let old_pm_id = entry.vm.old_pm_id().unwrap_or(entry.pm_id);
            let old_pm = &mut self.machines[old_pm_id as usize];
            old_pm.end_migration();
            old_pm.remove_vm(vm_id, usage);
            let new_pm = &mut self.machines[entry.pm_id as usize];
            new_pm.end_migration();
            new_pm.remove_vm(vm_id, usage);
            info!(target: "migration", "vm {} migration cancelled", vm_id);
        } else {
            self.machines[entry.pm_id as usize].remove_vm(vm_id, usage);
        }

        info!(target: "departure", "vm {} departed", vm_id);
        Ok(())
    }

    fn on_migration_complete(
        &mut self,
        vm_id: u32,
        old_pm_id: u32,
        new_pm_id: u32,
    ) -> Result<(), SimulationError> {
        let entry = match self.vms.get_mut(&vm_id) {
            Some(entry) => entry,
            None => {
                info!(
                    target: "migration",
                    "vm {} departed before its migration completion", vm_id
                );
                return Ok(());
            }
        };
        entry.vm.end_migration();
        let usage = entry.vm.current_usage();

        let old_pm = &mut self.machines[old_pm_id as usize];
        old_pm.end_migration();
        old_pm.remove_vm(vm_id, usage);
        self.machines[new_pm_id as usize].end_migration();

        self.migrations_window += 1;
        self.migrations_total += 1;
        info!(
            target: "migration",
            "vm {} migrated from machine {} to machine {}", vm_id, old_pm_id, new_pm_id
        );
        Ok(())
    }

    // PLACEMENT ///////////////////////////////////////////////////////////

    fn run_placement(&mut self, engine: &EngineHandle) -> Result<(), SimulationError> {
        let new_vms = mem::take(&mut self.pending_new_requests);
        let migrate_ids = mem::take(&mut self.pending_migrations);

        let decisions = {
            let new_refs: Vec<&VirtualMachine> = new_vms.iter().collect();
            // A candidate may have departed or started migrating since it
            // was queued; duplicates come from repeated SLA detections.
            let mut seen = std::collections::BTreeSet::new();
            let mig_refs: Vec<&VirtualMachine> = migrate_ids
                .iter()
                .filter(|id| seen.insert(**id))
                .filter_map(|id| self.vms.get(id).map(|entry| &entry.vm))
                .filter(|vm| !vm.is_migrating())
                .collect();
            let cluster = ClusterState {
                machines: &self.machines,
                vm_count: self.vms.len(),
                window: WindowCounters {
                    sla_violations: self.sla_violations_window,
                    migrations: self.migrations_window,
                    new_requests: self.new_requests_window,
                },
            };
            self.strategy.run(&new_refs, &mig_refs, &cluster)?
        };

        self.sla_violations_window = 0;
        self.migrations_window = 0;
        self.new_requests_window = 0;

        self.apply_decisions(new_vms, decisions, engine)?;

        let cluster = ClusterState {
            machines: &self.machines,
            vm_count: self.vms.len(),
            window: WindowCounters::default(),
        };
        self.strategy.observe(&cluster);
        Ok(())
    }

    fn apply_decisions(
        &mut self,
        new_vms: Vec<VirtualMachine>,
        decisions: StrategyDecisions,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        let mut by_id: IndexMap<u32, VirtualMachine> =
            new_vms.into_iter().map(|vm| (vm.id(), vm)).collect();

        for decision in &decisions.placements {
            let vm = by_id.shift_remove(&decision.vm_id).ok_or_else(|| {
                SimulationError::Strategy(format!(
                    "placement decision for unknown vm {}",
                    decision.vm_id
                ))
            })?;
            match decision.target {
                Some(pm_id) => {
                    info!(target: "placement", "vm {} placed on machine {}", vm.id(), pm_id);
                    self.place_vm_on_pm(vm, pm_id, engine)?;
                }
                None => {
                    warn!(target: "placement", "no fit for vm {}", vm.id());
                    return Err(SimulationError::NoFit(decision.vm_id));
                }
            }
        }
        if let Some(vm_id) = by_id.keys().next() {
            return Err(SimulationError::Strategy(format!(
                "strategy returned no decision for vm {}",
                vm_id
            )));
        }

        let scheduled: Vec<(u32, u32)> = decisions
            .migrations
            .iter()
            .filter_map(|decision| {
                let target = match decision.target {
                    Some(target) => target,
                    None => {
                        warn!(target: "migration", "no migration fit for vm {}", decision.vm_id);
                        return None;
                    }
                };
                match self.vms.get(&decision.vm_id) {
                    Some(entry) if entry.pm_id == target => {
                        debug!(
                            target: "migration",
                            "vm {} already on machine {}", decision.vm_id, target
                        );
                        None
                    }
                    Some(_) => Some((decision.vm_id, target)),
                    None => None,
                }
            })
            .collect();

        let concurrent = scheduled.len();
        for (vm_id, target) in scheduled {
            self.schedule_migration(vm_id, target, concurrent, engine)?;
        }
        Ok(())
    }

    fn place_vm_on_pm(
        &mut self,
        mut vm: VirtualMachine,
        pm_id: u32,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        let vm_id = vm.id();
        let pm = self
            .machines
            .get_mut(pm_id as usize)
            .ok_or(SimulationError::InsufficientCapacity { vm_id, pm_id })?;
        if !pm.can_host(&vm.current_usage()) {
            return Err(SimulationError::InsufficientCapacity { vm_id, pm_id });
        }
        pm.add_vm(vm_id, vm.current_usage());

        vm.set_current_pm_id(pm_id);
        vm.set_placed();
        let start_time = engine.now();
        vm.set_start_time(start_time);

        for update in vm.future_updates() {
            engine.push(Event::new(
                start_time + update.offset,
                EventPayload::VmUtilUpdate {
                    vm_id,
                    utilization: update.utilization,
                },
            ));
        }
        engine.push(Event::new(
            start_time + vm.duration(),
            EventPayload::VmDeparture { vm_id },
        ));

        self.vms.insert(vm_id, VmEntry { pm_id, vm });
        Ok(())
    }

    fn schedule_migration(
        &mut self,
        vm_id: u32,
        new_pm_id: u32,
        concurrent: usize,
        engine: &EngineHandle,
    ) -> Result<(), SimulationError> {
        let entry = self.vms.get_mut(&vm_id).ok_or(SimulationError::UnknownVm(vm_id))?;
        let old_pm_id = entry.pm_id;
        if old_pm_id == new_pm_id {
            return Ok(());
        }

        entry.vm.begin_migration();
        entry.vm.set_current_pm_id(new_pm_id);
        entry.pm_id = new_pm_id;
        let usage = entry.vm.current_usage();

        // The destination reserves the VM from the start of the transfer.
        self.machines[new_pm_id as usize].add_vm(vm_id, usage);
        self.machines[new_pm_id as usize].begin_migration();
        self.machines[old_pm_id as usize].begin_migration();

        let transfer_time = match self.migration_time_model {
            MigrationTimeModel::Simple => usage.disk / usage.bandwidth,
            MigrationTimeModel::Batched => {
                usage.disk / (usage.bandwidth / (1000. * concurrent.max(1) as f64))
            }
        };
        info!(
            target: "migration",
            "vm {} migrating from machine {} to machine {}, eta {:.3}",
            vm_id, old_pm_id, new_pm_id, transfer_time
        );
        engine.push(Event::new(
            engine.now() + transfer_time,
            EventPayload::MigrationComplete {
                vm_id,
                old_pm_id,
                new_pm_id,
            },
        ));
        Ok(())
    }

    fn detect_overcommitment(&mut self, pm_id: u32) -> bool {
        let threshold = self.strategy.migration_threshold();
        let pm = &self.machines[pm_id as usize];
        if !pm.is_overcommitted(threshold) {
            return false;
        }
        if pm.is_migrating() {
            // Relief is already underway.
            return false;
        }

        self.sla_violations_total += 1;
        self.sla_violations_window += 1;
        warn!(
            target: "migration",
            "machine {} overcommitted, utilization {}", pm_id, pm.utilization()
        );

        for vm_id in pm.hosted_vms() {
            let migrating = self
                .vms
                .get(vm_id)
                .map(|entry| entry.vm.is_migrating())
                .unwrap_or(true);
            if !migrating {
                self.pending_migrations.push(*vm_id);
            }
        }
        true
    }

    // INTROSPECTION ///////////////////////////////////////////////////////

    pub fn machines(&self) -> &[PhysicalMachine] {
        &self.machines
    }

    pub fn machine_count(&self) -> usize {
        self.machines.len()
    }

    pub fn vm_count(&self) -> usize {
        self.vms.len()
    }

    /// The machine currently holding the VM (the destination while a
    /// migration is in flight).
    pub fn vm_location(&self, vm_id: u32) -> Option<u32> {
        self.vms.get(&vm_id).map(|entry| entry.pm_id)
    }

    pub fn machine_usage_info(&self) -> Vec<MachineUsageInfo> {
        self.machines.iter().map(|pm| pm.usage_info()).collect()
    }

    /// System-wide used/total ratio in percent, over powered-on machines.
    pub fn resource_utilizations(&self) -> Resources {
        let mut used = Resources::default();
        let mut total = Resources::default();
        let mut any = false;
        for pm in &self.machines {
            if pm.is_powered_on() {
                used += pm.used();
                total += pm.total();
                any = true;
            }
        }
        if any {
            used / total * 100.
        } else {
            Resources::default()
        }
    }

    pub fn turned_on_machine_count(&self) -> usize {
        self.machines.iter().filter(|pm| pm.is_powered_on()).count()
    }

    pub fn total_power_consumption(&self) -> f64 {
        self.machines.iter().map(|pm| pm.power_consumption()).sum()
    }

    pub fn average_power_consumption(&self) -> f64 {
        let turned_on = self.turned_on_machine_count();
        if turned_on == 0 {
            return 0.;
        }
        self.total_power_consumption() / turned_on as f64
    }

    pub fn sla_violation_count(&self) -> u64 {
        self.sla_violations_total
    }

    pub fn migration_count(&self) -> u64 {
        self.migrations_total
    }

    pub fn strategy_name(&self) -> String {
        self.strategy.name().to_string()
    }

    pub fn bundle_size(&self) -> usize {
        self.strategy.bundle_size()
    }
}
