//! approle login and the gatekeeper challenge
use crate::vault::{Transport, VaultConfig, VaultError};
use anyhow::{bail, Context};
use base64::Engine;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;

/// Challenge sent by the gatekeeper: a TPM key (base64 blobs) and the nonce to sign
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct Challenge {
    #[serde(rename = "key.ctxt")]
    pub context: String,
    #[serde(rename = "key.priv")]
    pub private: String,
    #[serde(rename = "key.pub")]
    pub public: String,
    pub nonce: String,
}

/// Hardware backed signature of a challenge nonce
pub trait ChallengeSigner {
    /// base64 signature of the sha256 digest of the nonce
    fn sign(&self, challenge: &Challenge) -> anyhow::Result<String>;
}

/// Signs with the `tpm2` command line tools
#[derive(Debug, Default)]
pub struct Tpm2Signer;

impl ChallengeSigner for Tpm2Signer {
    fn sign(&self, challenge: &Challenge) -> anyhow::Result<String> {
        let workdir = tempfile::tempdir().context("unable to create a work directory")?;
        let dir = workdir.path();
        let file = |name: &str| dir.join(name).display().to_string();

        for (name, blob) in [
            ("key.ctxt", &challenge.context),
            ("key.priv", &challenge.private),
            ("key.pub", &challenge.public),
        ] {
            let decoded = base64::engine::general_purpose::STANDARD
                .decode(blob)
                .with_context(|| format!("component {name} is not base64"))?;
            std::fs::write(dir.join(name), decoded)
                .with_context(|| format!("unable to write {name}"))?;
        }

        tracing::debug!("recreating primary context");
        tpm2(&["createprimary", "-G", "rsa", "-c", &file("primary.ctxt")])?;
        tracing::debug!("loading the challenge key");
        tpm2(&[
            "load",
            "-C",
            &file("primary.ctxt"),
            "-c",
            &file("key.ctxt"),
            "-u",
            &file("key.pub"),
            "-r",
            &file("key.priv"),
        ])?;

        std::fs::write(dir.join("digest"), Sha256::digest(challenge.nonce.as_bytes()))
            .context("unable to write the nonce digest")?;
        tracing::debug!("signing nonce digest");
        tpm2(&[
            "sign",
            "-c",
            &file("key.ctxt"),
            "-g",
            "sha256",
            "-o",
            &file("sign.raw"),
            "-f",
            "plain",
            "-d",
            &file("digest"),
        ])?;

        let signature = read(&dir.join("sign.raw"))?;
        Ok(base64::engine::general_purpose::STANDARD.encode(signature))
    }
}

fn tpm2(args: &[&str]) -> anyhow::Result<()> {
    let output = Command::new("tpm2")
        .args(args)
        .output()
        .context("failed to execute 'tpm2'. Is tpm2-tools installed?")?;
    if !output.status.success() {
        bail!(
            "tpm2 {} failed: {}",
            args.first().unwrap_or(&""),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("unable to read {}", path.display()))
}

/// Obtain a client token
///
/// The secret-id comes from the gatekeeper when `tpm_auth` is configured (a `gatekeeper`
/// transport must then be given), from `secret_id` otherwise.
pub fn authenticate(
    config: &VaultConfig,
    name: Option<&str>,
    vault: &dyn Transport,
    gatekeeper: Option<&dyn Transport>,
    signer: &dyn ChallengeSigner,
) -> Result<String, VaultError> {
    let secret_id = match (&config.tpm_auth, gatekeeper) {
        (Some(url), Some(gatekeeper)) => {
            tracing::info!("requesting secret-id from the gatekeeper");
            gatekeeper_secret_id(url, name.unwrap_or_default(), gatekeeper, signer)?
        }
        (Some(_), None) => {
            return Err(VaultError::InvalidConfig(
                "tpm_auth is set but no gatekeeper client is available".into(),
            ))
        }
        (None, _) => {
            tracing::info!("using secret-id from configuration");
            config.secret_id.clone().ok_or_else(|| {
                VaultError::AuthenticationFailed("no secret-id available".into())
            })?
        }
    };

    let role_id = config
        .role_id
        .as_deref()
        .ok_or_else(|| VaultError::AuthenticationFailed("no role-id configured".into()))?;

    login(config, vault, role_id, &secret_id)
}

pub fn gatekeeper_secret_id(
    url: &str,
    name: &str,
    gatekeeper: &dyn Transport,
    signer: &dyn ChallengeSigner,
) -> Result<String, VaultError> {
    let url = url.trim_end_matches('/');

    let response = gatekeeper.get(&format!("{url}/challenge"), &[("name", name)], None)?;
    if !response.is_success() {
        return Err(VaultError::AuthenticationFailed(format!(
            "cannot get a challenge ({})",
            response.status
        )));
    }
    let challenge: Challenge = serde_json::from_str(&response.body)
        .map_err(|e| VaultError::AuthenticationFailed(format!("malformed challenge: {e}")))?;
    tracing::debug!("got a challenge");

    let signature = signer
        .sign(&challenge)
        .map_err(|e| VaultError::AuthenticationFailed(format!("{e:#}")))?;

    let response = gatekeeper.get(
        &format!("{url}/secret_id"),
        &[("name", name), ("signature", &signature)],
        None,
    )?;
    if !response.is_success() {
        return Err(VaultError::AuthenticationFailed(format!(
            "signature verification failed ({})",
            response.status
        )));
    }

    response
        .json()
        .ok()
        .and_then(|body| body.get("data").and_then(|data| data.as_str().map(String::from)))
        .ok_or_else(|| VaultError::AuthenticationFailed("gatekeeper answer has no secret-id".into()))
}

pub fn login(
    config: &VaultConfig,
    vault: &dyn Transport,
    role_id: &str,
    secret_id: &str,
) -> Result<String, VaultError> {
    let response = vault.post(
        &config.endpoint("auth/approle/login"),
        &json!({"role_id": role_id, "secret_id": secret_id}),
        None,
    )?;
    if !response.is_success() {
        return Err(VaultError::AuthenticationFailed(format!(
            "approle login refused ({})",
            response.status
        )));
    }

    let token = response
        .json()
        .ok()
        .and_then(|body| {
            body.pointer("/auth/client_token")
                .and_then(|token| token.as_str().map(String::from))
        })
        .ok_or_else(|| VaultError::AuthenticationFailed("login answer has no token".into()))?;

    tracing::info!("authenticated to the secret store");
    Ok(token)
}
