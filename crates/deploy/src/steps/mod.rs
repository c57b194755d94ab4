//! Deployment steps: the unit of orchestration.
//!
//! Each step deploys or configures one contract and names the steps it
//! depends on. A registry owns the steps; the scheduler orders them
//! topologically, validates every step before any of them runs, then runs
//! them sequentially.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;

use crate::deployer::Deployer;
use crate::error::{Error, Result};
use crate::network::Network;

mod arbiter_staking;
mod bounty_registry;
mod erc20_relay;
mod nectar_token;
mod offer_registry;

pub use arbiter_staking::ArbiterStaking;
pub use bounty_registry::BountyRegistry;
pub use erc20_relay::Erc20Relay;
pub use nectar_token::NectarToken;
pub use offer_registry::OfferRegistry;

/// One deployment step.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> &'static str;

    /// Steps that must have completed before this one runs.
    fn dependencies(&self) -> Vec<&'static str> {
        Vec::new()
    }

    /// Steps whose teardown must happen before this one's. Defaults to the
    /// deployment dependencies, so teardown runs in reverse deploy order.
    fn teardown_dependencies(&self) -> Vec<&'static str> {
        self.dependencies()
    }

    /// Check configuration preconditions. Runs for every selected step
    /// before any step touches the chain.
    fn validate(&self, _network: &Network) -> Result<()> {
        Ok(())
    }

    async fn run(&self, network: &mut Network, deployer: &mut Deployer) -> Result<()>;

    /// Undo or deprecate this step's contract. Default is a no-op.
    async fn deactivate(&self, _network: &mut Network, _deployer: &mut Deployer) -> Result<()> {
        Ok(())
    }
}

/// Lifecycle of one step within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Discovered,
    Validated,
    Running,
    Completed,
    Aborted,
}

/// Outcome of a scheduler run: the terminal state of every selected step,
/// in execution order, plus the error that stopped the run, if any.
pub struct RunReport {
    pub steps: Vec<(String, StepState)>,
    pub error: Option<Error>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn state_of(&self, name: &str) -> Option<StepState> {
        self.steps
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, state)| *state)
    }

    pub fn into_result(self) -> Result<()> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Explicitly populated step registry. Nothing registers itself; the
/// caller chooses between [`StepRegistry::builtin`] and hand-registration.
#[derive(Default)]
pub struct StepRegistry {
    steps: BTreeMap<&'static str, Box<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard community deployment steps.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Box::new(NectarToken))?;
        registry.register(Box::new(ArbiterStaking))?;
        registry.register(Box::new(BountyRegistry))?;
        registry.register(Box::new(Erc20Relay))?;
        registry.register(Box::new(OfferRegistry))?;
        Ok(registry)
    }

    pub fn register(&mut self, step: Box<dyn Step>) -> Result<()> {
        let name = step.name();
        if self.steps.insert(name, step).is_some() {
            return Err(Error::Configuration(format!(
                "step {name} registered twice"
            )));
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&dyn Step> {
        self.steps.get(name).map(|s| s.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.steps.keys().copied().collect()
    }

    /// Deterministic topological order over the selected steps (all steps
    /// when `selection` is `None`). A selection must be closed under
    /// dependencies.
    pub fn execution_order(&self, selection: Option<&[String]>) -> Result<Vec<&'static str>> {
        self.toposort(selection, |step| step.dependencies())
    }

    /// Topological order over the teardown-dependency graph. Callers
    /// reverse it to deactivate dependents before their dependencies.
    pub fn teardown_order(&self, selection: Option<&[String]>) -> Result<Vec<&'static str>> {
        self.toposort(selection, |step| step.teardown_dependencies())
    }

    fn toposort(
        &self,
        selection: Option<&[String]>,
        deps_of: impl Fn(&dyn Step) -> Vec<&'static str>,
    ) -> Result<Vec<&'static str>> {
        let selected: BTreeSet<&'static str> = match selection {
            Some(names) => {
                let mut set = BTreeSet::new();
                for name in names {
                    let (key, _) = self
                        .steps
                        .get_key_value(name.as_str())
                        .ok_or_else(|| Error::Configuration(format!("unknown step: {name}")))?;
                    set.insert(*key);
                }
                set
            }
            None => self.steps.keys().copied().collect(),
        };

        let mut indegree: BTreeMap<&'static str, usize> =
            selected.iter().map(|&name| (name, 0)).collect();
        let mut dependents: BTreeMap<&'static str, Vec<&'static str>> = BTreeMap::new();
        for &name in &selected {
            for dep in deps_of(self.steps[name].as_ref()) {
                if !self.steps.contains_key(dep) {
                    return Err(Error::Configuration(format!(
                        "step {name} depends on unknown step {dep}"
                    )));
                }
                if !selected.contains(dep) {
                    return Err(Error::Configuration(format!(
                        "step {name} depends on {dep}, which is not selected"
                    )));
                }
                if let Some(degree) = indegree.get_mut(name) {
                    *degree += 1;
                }
                dependents.entry(dep).or_default().push(name);
            }
        }

        // Kahn's algorithm over ordered sets, so ties break alphabetically
        // and the order is stable across runs.
        let mut ready: BTreeSet<&'static str> = indegree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&name, _)| name)
            .collect();
        let mut order = Vec::with_capacity(selected.len());
        while let Some(&name) = ready.iter().next() {
            ready.remove(name);
            order.push(name);
            for &dependent in dependents.get(name).into_iter().flatten() {
                if let Some(degree) = indegree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.insert(dependent);
                    }
                }
            }
        }

        if order.len() != selected.len() {
            let stuck: Vec<&str> = selected
                .iter()
                .filter(|name| !order.contains(*name))
                .copied()
                .collect();
            return Err(Error::Configuration(format!(
                "dependency cycle among steps: {}",
                stuck.join(", ")
            )));
        }

        Ok(order)
    }

    /// Validate every selected step, then run them in dependency order.
    ///
    /// Validation failures abort before anything touches the chain. A run
    /// failure aborts the remaining steps; effects already on chain stay.
    /// Scheduling errors (unknown step, open selection, cycle) return
    /// `Err` directly since no step was involved yet.
    pub async fn run(
        &self,
        selection: Option<&[String]>,
        network: &mut Network,
        deployer: &mut Deployer,
    ) -> Result<RunReport> {
        let order = self.execution_order(selection)?;
        tracing::info!(order = ?order, "deployment order");

        let mut states: BTreeMap<&'static str, StepState> =
            order.iter().map(|&name| (name, StepState::Discovered)).collect();

        for &name in &order {
            if let Err(e) = self.steps[name].validate(network) {
                tracing::error!(step = name, error = %e, "step validation failed");
                states.insert(name, StepState::Aborted);
                return Ok(report(&order, states, Some(e)));
            }
            states.insert(name, StepState::Validated);
        }

        for (index, &name) in order.iter().enumerate() {
            tracing::info!(step = name, "running deployment step");
            states.insert(name, StepState::Running);
            if let Err(e) = self.steps[name].run(network, deployer).await {
                tracing::error!(step = name, error = %e, "deployment step failed");
                for &remaining in &order[index..] {
                    states.insert(remaining, StepState::Aborted);
                }
                return Ok(report(&order, states, Some(e)));
            }
            states.insert(name, StepState::Completed);
        }

        Ok(report(&order, states, None))
    }

    /// Deactivate the selected steps, dependents before dependencies.
    pub async fn run_teardown(
        &self,
        selection: Option<&[String]>,
        network: &mut Network,
        deployer: &mut Deployer,
    ) -> Result<RunReport> {
        let mut order = self.teardown_order(selection)?;
        order.reverse();
        tracing::info!(order = ?order, "teardown order");

        let mut states: BTreeMap<&'static str, StepState> = order
            .iter()
            .map(|&name| (name, StepState::Validated))
            .collect();

        for (index, &name) in order.iter().enumerate() {
            tracing::info!(step = name, "deactivating step");
            states.insert(name, StepState::Running);
            if let Err(e) = self.steps[name].deactivate(network, deployer).await {
                tracing::error!(step = name, error = %e, "teardown step failed");
                for &remaining in &order[index..] {
                    states.insert(remaining, StepState::Aborted);
                }
                return Ok(report(&order, states, Some(e)));
            }
            states.insert(name, StepState::Completed);
        }

        Ok(report(&order, states, None))
    }
}

fn report(
    order: &[&'static str],
    states: BTreeMap<&'static str, StepState>,
    error: Option<Error>,
) -> RunReport {
    RunReport {
        steps: order
            .iter()
            .map(|&name| (name.to_string(), states[name]))
            .collect(),
        error,
    }
}

/// Per-contract configuration table for a step, keyed by snake-case name.
pub(crate) fn contract_config<'a>(
    network: &'a Network,
    key: &str,
) -> Option<&'a toml::value::Table> {
    network.contract_config.get(key).and_then(|v| v.as_table())
}

/// Read an unsigned integer from a step's config table. TOML integers are
/// signed; a negative value must not wrap into a huge block count or rate.
pub(crate) fn config_u64(network: &Network, key: &str, field: &str, default: u64) -> Result<u64> {
    match contract_config(network, key).and_then(|config| config.get(field)) {
        Some(value) => {
            let value = value.as_integer().ok_or_else(|| {
                Error::Configuration(format!("{key}.{field} must be an integer"))
            })?;
            u64::try_from(value).map_err(|_| {
                Error::Configuration(format!(
                    "{key}.{field} must be non-negative, got {value}"
                ))
            })
        }
        None => Ok(default),
    }
}
