//! prioritized hook pools
//!
//! A [Pool] holds named hooks and runs them once, in ascending priority order, against a mutable
//! context. Two pools exist per process, grouped in [HookRegistry]: one for boot time and one for
//! provisioning time.
//!
//! Pool lifecycle:
//!
//! ```text
//! Idle --run--> Running --+--> Completed   (every hook ran, or a hook returned Flow::Stop)
//!                         +--> Aborted     (a hook returned an error)
//! ```
//!
//! Hooks can only be registered while the pool is idle and a pool runs at most once. Hooks with
//! equal priority run in registration order.
use crate::provision::{BootContext, ProvisionContext};

mod admin;
mod base;
mod grub;
mod network;
mod ntp;

/// Outcome of a successful hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// End the run successfully, skipping every remaining hook
    Stop,
}

pub type HookResult = anyhow::Result<Flow>;

pub type Action<C> = Box<dyn FnMut(&mut C) -> HookResult>;

pub struct Hook<C> {
    pub name: String,
    pub priority: i32,
    action: Action<C>,
}

impl<C> std::fmt::Debug for Hook<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Idle,
    Running,
    Completed,
    Aborted,
}

pub struct Pool<C> {
    hooks: Vec<Hook<C>>,
    state: PoolState,
}

impl<C> std::fmt::Debug for Pool<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("hooks", &self.hooks)
            .field("state", &self.state)
            .finish()
    }
}

impl<C> Default for Pool<C> {
    fn default() -> Self {
        Self {
            hooks: vec![],
            state: PoolState::Idle,
        }
    }
}

/// What a completed run did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Names of the hooks that ran, in execution order
    pub executed: Vec<String>,
    /// Hook that ended the run with [Flow::Stop]
    pub stopped_by: Option<String>,
}

impl<C> Pool<C> {
    pub fn register(
        &mut self,
        name: impl Into<String>,
        priority: i32,
        action: impl FnMut(&mut C) -> HookResult + 'static,
    ) -> Result<(), HookError> {
        let name = name.into();
        if self.state != PoolState::Idle {
            return Err(HookError::NotIdle {
                state: self.state,
                operation: "register",
            });
        }

        tracing::debug!(hook = %name, priority, "registering hook");
        self.hooks.push(Hook {
            name,
            priority,
            action: Box::new(action),
        });
        Ok(())
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    /// Registered hooks in execution order
    pub fn hooks(&self) -> Vec<&Hook<C>> {
        let mut hooks: Vec<_> = self.hooks.iter().collect();
        hooks.sort_by_key(|hook| hook.priority);
        hooks
    }

    /// Run every hook with `priority >= min_priority` (all hooks when `None`)
    ///
    /// The first hook error aborts the run and is returned; the hooks already executed are not
    /// undone.
    pub fn run(&mut self, context: &mut C, min_priority: Option<i32>) -> Result<RunSummary, HookError> {
        if self.state != PoolState::Idle {
            return Err(HookError::NotIdle {
                state: self.state,
                operation: "run",
            });
        }
        self.state = PoolState::Running;

        let mut order: Vec<usize> = (0..self.hooks.len())
            .filter(|&index| min_priority.map_or(true, |min| self.hooks[index].priority >= min))
            .collect();
        // stable: ties keep registration order
        order.sort_by_key(|&index| self.hooks[index].priority);

        let mut summary = RunSummary::default();
        for index in order {
            let hook = &mut self.hooks[index];
            tracing::info!(hook = %hook.name, priority = hook.priority, "running hook");

            match (hook.action)(context) {
                Ok(flow) => {
                    summary.executed.push(hook.name.clone());
                    if flow == Flow::Stop {
                        tracing::info!(hook = %hook.name, "hook stopped the run");
                        summary.stopped_by = Some(hook.name.clone());
                        break;
                    }
                }
                Err(source) => {
                    self.state = PoolState::Aborted;
                    return Err(HookError::Failed {
                        name: hook.name.clone(),
                        source,
                    });
                }
            }
        }

        self.state = PoolState::Completed;
        Ok(summary)
    }
}

/// The boot and provisioning pools of one process
#[derive(Debug, Default)]
pub struct HookRegistry {
    pub boot: Pool<BootContext>,
    pub provisioning: Pool<ProvisionContext>,
}

impl HookRegistry {
    /// Registry holding every built-in hook
    pub fn with_builtin() -> Result<Self, HookError> {
        let mut registry = Self::default();

        registry
            .provisioning
            .register("Network configuration", 10, network::configure)?;
        registry
            .provisioning
            .register("Base configuration", 50, base::configure)?;
        registry
            .provisioning
            .register("Vault configuration", 70, crate::vault::hook::configure)?;
        registry
            .provisioning
            .register("NTP configuration", 100, ntp::configure)?;
        registry
            .provisioning
            .register("Admin user configuration", 110, admin::configure)?;

        registry.boot.register("Grub configuration", 50, grub::configure)?;

        Ok(registry)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum HookError {
    #[error("hook {name} failed")]
    Failed {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot {operation} on a pool in state {state:?}")]
    NotIdle {
        state: PoolState,
        operation: &'static str,
    },
}
