//! secret store integration
//!
//! Configuration values may hold references such as `@vault:kv2:db:password`. During provisioning
//! the `Vault configuration` hook
//!
//! 1. optionally waits for the secret store to be unsealed
//! 2. authenticates ([auth]): an approle login, the secret-id coming either from the
//!    configuration or from a gatekeeper challenge signed by the TPM
//! 3. issues every declared certificate once ([pki::CertificateCache])
//! 4. replaces every reference in the configuration tree ([SecretResolver])
//!
//! References use the grammar `@vault:<scheme>[:<rest>]`:
//!
//! | scheme | rest | value |
//! |---|---|---|
//! | `kv1` | `<path>:<key>` | `data.<key>` of `secret/<role>/<path>` |
//! | `kv2` | `<path>:<key>` | `data.data.<key>` of `kv/<role>/<path>` |
//! | `pki-key` | certificate name | private key |
//! | `pki-cert` | certificate name | certificate |
//! | `pki-ca-chain` | certificate name | issuing chain, as a sequence |
//! | `pki-chain` | certificate name | certificate followed by the chain |
//! | `ca` | | trust anchor chain of the PKI backend |
//! | `yaml` | yaml documents | the documents with their own references resolved |
use crate::util::{seconds, Retry};
use crate::value::Value;
use std::time::Duration;

pub mod auth;
pub mod hook;
pub mod pki;
mod resolver;
mod transport;

pub use resolver::{normalize_path, Reference, SecretResolver, SecretSource, VaultSource};
pub use transport::{HttpTransport, Response, Transport};

/// `vault` section of the configuration document
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct VaultConfig {
    pub url: String,
    /// PEM trusted in addition to the system roots
    pub ca: Option<String>,
    /// Default role for certificates, and the kv path prefix
    pub role: Option<String>,
    pub role_id: Option<String>,
    pub secret_id: Option<String>,
    /// Gatekeeper url; when set the secret-id is obtained through a TPM challenge
    pub tpm_auth: Option<String>,
    pub tpm_auth_ca: Option<String>,
    #[serde(default)]
    pub certificates: Vec<CertificateRequest>,
    pub wait: Option<WaitPolicy>,
    /// Per request timeout in seconds
    pub timeout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct CertificateRequest {
    pub name: String,
    pub role: Option<String>,
    pub ip: Option<Vec<String>>,
    pub alt_names: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct WaitPolicy {
    pub tries: Option<u64>,
    pub delay: Option<f64>,
}

impl VaultConfig {
    pub fn from_value(value: &Value) -> Result<Self, VaultError> {
        value
            .deserialize_into()
            .map_err(|e| VaultError::InvalidConfig(e.to_string()))
    }

    pub fn timeout(&self) -> Duration {
        seconds(self.timeout.unwrap_or(30.0))
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/v1/{}", self.url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

impl WaitPolicy {
    pub fn retry(&self) -> Retry {
        Retry {
            tries: self.tries,
            delay: seconds(self.delay.unwrap_or(5.0)),
        }
    }
}

/// Block until the secret store reports itself unsealed
pub fn wait_until_unsealed(
    config: &VaultConfig,
    transport: &dyn Transport,
    policy: &WaitPolicy,
) -> Result<(), VaultError> {
    let health = config.endpoint("sys/health");

    let unsealed = policy.retry().poll(|attempt| match transport.get(&health, &[], None) {
        Ok(response) if response.is_success() => {
            let sealed = response
                .json()
                .ok()
                .and_then(|body| body.get("sealed").and_then(serde_json::Value::as_bool))
                .unwrap_or(true);
            if sealed {
                tracing::info!(attempt, "secret store sealed");
            }
            !sealed
        }
        Ok(response) => {
            tracing::warn!(attempt, status = response.status, "secret store not healthy");
            false
        }
        Err(err) => {
            tracing::warn!(attempt, error = %err, "cannot reach secret store");
            false
        }
    });

    if unsealed {
        Ok(())
    } else {
        Err(VaultError::SecretStoreUnavailable {
            url: health,
            message: "still sealed or unreachable".to_string(),
        })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum VaultError {
    #[error("malformed secret reference {reference}: {reason}")]
    MalformedSecretReference { reference: String, reason: String },
    #[error("secret store unavailable at {url}: {message}")]
    SecretStoreUnavailable { url: String, message: String },
    #[error("authentication to the secret store failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid secret store configuration: {0}")]
    InvalidConfig(String),
}

impl VaultError {
    pub(crate) fn malformed(reference: &str, reason: impl Into<String>) -> Self {
        VaultError::MalformedSecretReference {
            reference: reference.to_string(),
            reason: reason.into(),
        }
    }
}


#[cfg(test)]
mod test {
    use super::testing::*;
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_joins_url() {
        let config = config("url: https://vault:8200/");
        assert_eq!(config.endpoint("/sys/health"), "https://vault:8200/v1/sys/health");
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn missing_url_is_invalid() {
        let err = VaultConfig::from_value(&Value::from_yaml_str("role: r").unwrap()).unwrap_err();
        assert!(matches!(err, VaultError::InvalidConfig(_)));
    }

    #[test]
    fn waits_until_unsealed() {
        let config = config("url: https://vault");
        let transport = ScriptedTransport::default().route(
            "GET",
            "https://vault/v1/sys/health",
            200,
            r#"{"sealed": false}"#,
        );
        transport.queue.borrow_mut().extend([
            Err(VaultError::SecretStoreUnavailable {
                url: "https://vault".into(),
                message: "refused".into(),
            }),
            Ok(Response {
                status: 503,
                body: String::new(),
            }),
            Ok(Response {
                status: 200,
                body: r#"{"sealed": true}"#.into(),
            }),
        ]);
        let policy = WaitPolicy {
            tries: Some(5),
            delay: Some(0.0),
        };

        wait_until_unsealed(&config, &transport, &policy).unwrap();
        assert_eq!(transport.requests().len(), 4);
    }

    #[test]
    fn gives_up_after_tries() {
        let config = config("url: https://vault");
        let transport = ScriptedTransport::default();
        let policy = WaitPolicy {
            tries: Some(2),
            delay: Some(0.0),
        };

        let err = wait_until_unsealed(&config, &transport, &policy).unwrap_err();
        assert!(matches!(err, VaultError::SecretStoreUnavailable { .. }));
        assert_eq!(transport.requests().len(), 2);
    }
}
