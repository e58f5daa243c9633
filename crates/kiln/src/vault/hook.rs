//! the `Vault configuration` provisioning hook
use crate::hooks::{Flow, HookResult};
use crate::provision::ProvisionContext;
use crate::value::Value;
use crate::vault::auth::{self, ChallengeSigner, Tpm2Signer};
use crate::vault::pki::CertificateCache;
use crate::vault::{
    wait_until_unsealed, HttpTransport, SecretResolver, Transport, VaultConfig, VaultError,
    VaultSource,
};
use indexmap::IndexMap;

pub fn configure(context: &mut ProvisionContext) -> HookResult {
    let config = match context.conf.get("vault") {
        Some(vault) => VaultConfig::from_value(vault),
        None => {
            tracing::debug!("no secret store configured");
            return Ok(Flow::Continue);
        }
    };

    let result = config.and_then(|config| {
        let vault = HttpTransport::new(config.ca.as_deref(), config.timeout())?;
        let gatekeeper = match config.tpm_auth {
            Some(_) => Some(HttpTransport::new(
                config.tpm_auth_ca.as_deref(),
                config.timeout(),
            )?),
            None => None,
        };

        provision_secrets(
            &mut context.conf,
            &mut context.system,
            &config,
            &vault,
            gatekeeper.as_ref().map(|gatekeeper| gatekeeper as &dyn Transport),
            &Tpm2Signer,
        )
    });
    boundary(result)
}

/// Authenticate, issue certificates and resolve every reference of `conf`
///
/// On success `system` receives the `vault_save` hand-off entry.
pub fn provision_secrets(
    conf: &mut Value,
    system: &mut Value,
    config: &VaultConfig,
    vault: &dyn Transport,
    gatekeeper: Option<&dyn Transport>,
    signer: &dyn ChallengeSigner,
) -> Result<(), VaultError> {
    if let Some(policy) = &config.wait {
        tracing::info!(url = %config.url, "waiting for the secret store to be unsealed");
        wait_until_unsealed(config, vault, policy)?;
    }

    let name = conf.get("name").and_then(Value::as_str).map(String::from);
    let token = auth::authenticate(config, name.as_deref(), vault, gatekeeper, signer)?;

    if let Some(system) = system.object_mut() {
        let mut save = IndexMap::new();
        save.insert("vault_url", Value::from(config.url.as_str()));
        save.insert("vault_token", Value::from(token.as_str()));
        save.insert("vault_ca", Value::from(config.ca.clone()));
        system.insert("vault_save".to_string(), Value::from(save));
    }

    let certificates = CertificateCache::issue_all(config, vault, &token)?;
    tracing::info!(count = certificates.len(), "certificates issued");

    let source = VaultSource::new(config, vault, &token);
    SecretResolver::new(&source, &certificates, config.role.as_deref()).transform(conf)
}

/// Only a malformed reference fails the hook; losing the secret store leaves the run going
fn boundary(result: Result<(), VaultError>) -> HookResult {
    match result {
        Ok(()) => Ok(Flow::Continue),
        Err(err @ VaultError::MalformedSecretReference { .. }) => Err(err.into()),
        Err(err) => {
            tracing::error!(error = %err, "secret resolution skipped");
            Ok(Flow::Continue)
        }
    }
}
