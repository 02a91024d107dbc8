//! Virtual machine power state.
//!
//! These states reconcile the power state of machines that already exist;
//! they never provision one.

use async_trait::async_trait;
use serde_json::json;

use crate::client::AzureResult;
use crate::exec::compute::virtual_machine::{self, power_state, Cleanup};
use crate::exec::{unknown_function, ExecContext, ModuleParams, ParamExt};
use crate::states::{ensure_absent, lookup, StateModule, StateReturn};

const LABEL: &str = "virtual machine";

/// Desired power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Power {
    Running,
    Stopped,
    Deallocated,
}

impl Power {
    fn name(&self) -> &'static str {
        match self {
            Power::Running => "running",
            Power::Stopped => "stopped",
            Power::Deallocated => "deallocated",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Power::Running => "started",
            Power::Stopped => "stopped",
            Power::Deallocated => "deallocated",
        }
    }

    /// A deallocated machine is also stopped.
    fn satisfied_by(&self, current: &str) -> bool {
        match self {
            Power::Stopped => current == "stopped" || current == "deallocated",
            other => current == other.name(),
        }
    }
}

/// Bring an existing machine to `power`.
pub async fn ensure_power(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    power: Power,
) -> AzureResult<StateReturn> {
    let mut ret = StateReturn::new(name);
    let vm = match lookup(virtual_machine::get(&ctx.quiet(), name, resource_group, Some("instanceView"))).await? {
        Some(vm) => vm,
        None => {
            return Ok(ret.fail(format!(
                "Virtual machine {} was not found in resource group {}.",
                name, resource_group
            )))
        }
    };

    let current = power_state(&vm).unwrap_or_else(|| "unknown".to_string());
    if power.satisfied_by(&current) {
        return Ok(ret.succeed(format!("Virtual machine {} is already {}.", name, current)));
    }

    ret.change("power_state", json!({"old": current, "new": power.name()}));
    if ctx.test {
        return Ok(ret.pending(format!("Virtual machine {} would be {}.", name, power.verb())));
    }

    let result = match power {
        Power::Running => virtual_machine::start(ctx, name, resource_group).await,
        Power::Stopped => virtual_machine::power_off(ctx, name, resource_group, false).await,
        Power::Deallocated => virtual_machine::deallocate(ctx, name, resource_group).await,
    };
    Ok(match result {
        Ok(()) => ret.succeed(format!("Virtual machine {} has been {}.", name, power.verb())),
        Err(err) => ret.fail(format!(
            "Failed to bring virtual machine {} to {}! ({})",
            name,
            power.name(),
            err
        )),
    })
}

pub async fn absent(
    ctx: &ExecContext,
    name: &str,
    resource_group: &str,
    cleanup: Cleanup,
) -> AzureResult<StateReturn> {
    let existing = lookup(virtual_machine::get(&ctx.quiet(), name, resource_group, None)).await?;
    Ok(ensure_absent(ctx, name, LABEL, existing, || {
        virtual_machine::delete(ctx, name, resource_group, cleanup)
    })
    .await)
}

pub struct VirtualMachineState;

#[async_trait]
impl StateModule for VirtualMachineState {
    fn name(&self) -> &'static str {
        "azurerm.compute.virtual_machine"
    }

    fn description(&self) -> &'static str {
        "Ensure existing virtual machines are running, stopped, deallocated or absent"
    }

    fn functions(&self) -> &'static [&'static str] {
        &["running", "stopped", "deallocated", "absent"]
    }

    async fn apply(&self, function: &str, params: &ModuleParams, ctx: &ExecContext) -> AzureResult<StateReturn> {
        let name = params.get_string_required("name")?;
        let resource_group = params.get_string_required("resource_group")?;
        let power = match function {
            "running" => Power::Running,
            "stopped" => Power::Stopped,
            "deallocated" => Power::Deallocated,
            "absent" => return absent(ctx, &name, &resource_group, Cleanup::from_params(params)).await,
            other => return Err(unknown_function(self.name(), other)),
        };
        ensure_power(ctx, &name, &resource_group, power).await
    }
}
