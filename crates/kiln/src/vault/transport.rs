use crate::vault::VaultError;
use std::time::Duration;

const TOKEN_HEADER: &str = "X-Vault-Token";

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub body: String,
}

impl Response {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Blocking HTTP access to the secret store (or the gatekeeper)
///
/// Any answer, whatever its status, is a [Response]; only a request that could not be completed is
/// an error.
pub trait Transport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Response, VaultError>;

    fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<Response, VaultError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Client trusting `ca` (PEM) on top of the system roots
    pub fn new(ca: Option<&str>, timeout: Duration) -> Result<Self, VaultError> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);

        if let Some(ca) = ca {
            let certificate = reqwest::Certificate::from_pem(ca.as_bytes())
                .map_err(|e| VaultError::InvalidConfig(format!("unusable CA certificate: {e}")))?;
            builder = builder.add_root_certificate(certificate);
        }

        let client = builder
            .build()
            .map_err(|e| VaultError::InvalidConfig(format!("cannot build http client: {e}")))?;
        Ok(Self { client })
    }

    fn send(
        &self,
        url: &str,
        request: reqwest::blocking::RequestBuilder,
        token: Option<&str>,
    ) -> Result<Response, VaultError> {
        let request = match token {
            Some(token) => request.header(TOKEN_HEADER, token),
            None => request,
        };

        let unavailable = |e: reqwest::Error| VaultError::SecretStoreUnavailable {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = request.send().map_err(unavailable)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(unavailable)?;

        tracing::debug!(url, status, "secret store answered");
        Ok(Response { status, body })
    }
}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&str, &str)],
        token: Option<&str>,
    ) -> Result<Response, VaultError> {
        self.send(url, self.client.get(url).query(query), token)
    }

    fn post(
        &self,
        url: &str,
        body: &serde_json::Value,
        token: Option<&str>,
    ) -> Result<Response, VaultError> {
        self.send(url, self.client.post(url).json(body), token)
    }
}
