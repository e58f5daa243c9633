use crate::hooks::{Flow, HookResult};
use crate::provision::ProvisionContext;
use crate::util::{seconds, Retry};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Reachability probe run after the network is configured
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct NetworkCheck {
    pub http: Option<String>,
    /// `host:port`
    pub tcp: Option<String>,
    pub dns: Option<String>,
    /// http timeout in seconds
    pub timeout: Option<f64>,
    pub tries: Option<u64>,
    pub delay: Option<f64>,
}

impl NetworkCheck {
    fn retry(&self) -> Retry {
        Retry {
            tries: self.tries,
            delay: seconds(self.delay.unwrap_or(2.0)),
        }
    }

    /// A single attempt
    pub fn probe(&self, attempt: u64) -> bool {
        if let Some(url) = &self.http {
            tracing::info!(%url, attempt, "checking url");
            let timeout = seconds(self.timeout.unwrap_or(5.0));
            return reqwest::blocking::Client::builder()
                .timeout(timeout)
                .build()
                .and_then(|client| client.head(url).send())
                .is_ok();
        }

        if let Some(target) = &self.tcp {
            tracing::info!(%target, attempt, "checking tcp connection");
            let Some(address) = target
                .to_socket_addrs()
                .ok()
                .and_then(|mut addresses| addresses.next())
            else {
                return false;
            };
            return TcpStream::connect_timeout(&address, Duration::from_secs(10)).is_ok();
        }

        if let Some(name) = &self.dns {
            tracing::info!(%name, attempt, "checking name resolution");
            return (name.as_str(), 0).to_socket_addrs().is_ok();
        }

        tracing::warn!(check = ?self, "network check without probe");
        false
    }
}

pub(super) fn configure(context: &mut ProvisionContext) -> HookResult {
    let Some(network) = context.conf.get("network") else {
        tracing::info!("network not configured");
        return Ok(Flow::Continue);
    };

    if !context.distro.apply_network_config(network)? {
        tracing::warn!("failed to render network configuration");
    }

    let checks: Vec<NetworkCheck> = match context.conf.get("network_checks") {
        Some(checks) => checks.deserialize_into()?,
        None => vec![],
    };
    for check in &checks {
        if !check.retry().poll(|attempt| check.probe(attempt)) {
            tracing::warn!(?check, "network check did not succeed");
        }
    }

    Ok(Flow::Continue)
}
