use crate::hooks::{Flow, HookResult};
use crate::provision::BootContext;

const GRUB_INIT: &str = "/usr/local/bin/grub-init";

/// Kernel command line setup on first boot; a failing `grub-init` does not fail the boot run
pub(super) fn configure(context: &mut BootContext) -> HookResult {
    let Some(line) = context.conf.get("grub").and_then(|grub| grub.as_str()) else {
        return Ok(Flow::Continue);
    };
    if line.is_empty() {
        return Ok(Flow::Continue);
    }

    if let Err(err) = context.distro.run(GRUB_INIT, &[line]) {
        tracing::error!(error = %format!("{err:#}"), "grub-init failed");
    }
    Ok(Flow::Continue)
}
