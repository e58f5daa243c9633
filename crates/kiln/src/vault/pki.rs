//! certificate issuance, once per run
use crate::vault::{CertificateRequest, Transport, VaultConfig, VaultError};
use indexmap::IndexMap;
use serde_json::json;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct IssuedCertificate {
    pub private_key: String,
    pub certificate: String,
    pub ca_chain: Vec<String>,
}

impl IssuedCertificate {
    /// Certificate followed by its issuing chain
    pub fn full_chain(&self) -> String {
        std::iter::once(self.certificate.as_str())
            .chain(self.ca_chain.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Certificates issued for this run, by name
///
/// References only ever read from the cache; nothing is issued on lookup. A name declared twice
/// keeps the certificate issued last.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CertificateCache {
    certificates: IndexMap<String, IssuedCertificate>,
}

impl CertificateCache {
    /// Issue every certificate declared in `config`
    ///
    /// A certificate the secret store refuses or answers incompletely is skipped with a warning.
    pub fn issue_all(
        config: &VaultConfig,
        vault: &dyn Transport,
        token: &str,
    ) -> Result<Self, VaultError> {
        let mut cache = Self::default();
        for request in &config.certificates {
            if let Some(issued) = issue(config, vault, token, request)? {
                cache.insert(request.name.clone(), issued);
            }
        }
        Ok(cache)
    }

    pub fn insert(&mut self, name: String, certificate: IssuedCertificate) {
        if self.certificates.insert(name.clone(), certificate).is_some() {
            tracing::warn!(certificate = %name, "certificate issued twice, keeping the last one");
        }
    }

    pub fn get(&self, name: &str) -> Option<&IssuedCertificate> {
        self.certificates.get(name)
    }

    pub fn len(&self) -> usize {
        self.certificates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.certificates.is_empty()
    }
}

fn issue(
    config: &VaultConfig,
    vault: &dyn Transport,
    token: &str,
    request: &CertificateRequest,
) -> Result<Option<IssuedCertificate>, VaultError> {
    let name = &request.name;
    let Some(role) = request.role.as_ref().or(config.role.as_ref()) else {
        tracing::warn!(certificate = %name, "no role to issue certificate");
        return Ok(None);
    };

    let mut body = json!({ "common_name": name });
    if let Some(ip) = &request.ip {
        body["ip_sans"] = ip.join(",").into();
    }
    if let Some(alt_names) = &request.alt_names {
        body["alt_names"] = alt_names.join(",").into();
    }

    tracing::info!(certificate = %name, %role, "issuing certificate");
    let response = vault.post(&config.endpoint(&format!("pki/issue/{role}")), &body, Some(token))?;
    if !response.is_success() {
        tracing::warn!(
            certificate = %name,
            status = response.status,
            body = %response.body,
            "failed to issue certificate"
        );
        return Ok(None);
    }

    let issued = response
        .json()
        .ok()
        .and_then(|mut body| body.get_mut("data").map(serde_json::Value::take))
        .and_then(|data| serde_json::from_value::<IssuedCertificate>(data).ok());
    if issued.is_none() {
        tracing::warn!(certificate = %name, "incomplete answer when issuing certificate");
    }
    Ok(issued)
}
