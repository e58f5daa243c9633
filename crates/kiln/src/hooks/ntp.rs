use crate::distro::write_file;
use crate::hooks::{Flow, HookResult};
use crate::provision::ProvisionContext;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct NtpConfig {
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub pools: Vec<String>,
}

impl NtpConfig {
    pub fn render(&self) -> String {
        let mut out = String::new();
        for server in &self.servers {
            out.push_str(&format!("server {server} iburst\n"));
        }
        for pool in &self.pools {
            out.push_str(&format!("pool {pool} iburst\n"));
        }
        out.push_str("driftfile /var/lib/chrony/chrony.drift\nmakestep 1.0 3\nrtcsync\n");
        out
    }
}

pub(super) fn configure(context: &mut ProvisionContext) -> HookResult {
    let Some(ntp) = context.conf.get("ntp") else {
        return Ok(Flow::Continue);
    };
    let ntp: NtpConfig = ntp.deserialize_into()?;

    let daemon = context.distro.daemon_name("chrony");
    tracing::info!(%daemon, "configuring chrony");

    write_file(&context.path("etc/chrony/chrony.conf"), &ntp.render())?;
    context.distro.systemctl("enable", &daemon)?;
    context.distro.systemctl("restart", &daemon)?;
    Ok(Flow::Continue)
}
