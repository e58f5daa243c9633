use crate::value::Value;
use crate::vault::pki::CertificateCache;
use crate::vault::{Transport, VaultConfig, VaultError};
use crate::visit::TransformLeaves;

const PREFIX: &str = "@vault:";

/// A parsed `@vault:` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    Kv1 { path: &'a str, key: &'a str },
    Kv2 { path: &'a str, key: &'a str },
    PkiKey(&'a str),
    PkiCert(&'a str),
    PkiCaChain(&'a str),
    PkiChain(&'a str),
    Ca,
    Yaml(&'a str),
}

impl<'a> Reference<'a> {
    /// `Ok(None)` for any string that is not a reference
    pub fn parse(text: &'a str) -> Result<Option<Self>, VaultError> {
        let Some(body) = text.strip_prefix(PREFIX) else {
            return Ok(None);
        };

        let (scheme, rest) = match body.split_once(':') {
            Some((scheme, rest)) => (scheme, Some(rest)),
            None => (body, None),
        };

        let reference = match (scheme, rest) {
            ("kv1" | "kv2", Some(rest)) => {
                let mut args = rest.split(':');
                let (Some(path), Some(key)) = (args.next(), args.next()) else {
                    return Err(VaultError::malformed(text, format!("{scheme} needs a path and a key")));
                };
                if scheme == "kv1" {
                    Reference::Kv1 { path, key }
                } else {
                    Reference::Kv2 { path, key }
                }
            }
            ("pki-key", Some(name)) => Reference::PkiKey(name),
            ("pki-cert", Some(name)) => Reference::PkiCert(name),
            ("pki-ca-chain", Some(name)) => Reference::PkiCaChain(name),
            ("pki-chain", Some(name)) => Reference::PkiChain(name),
            ("yaml", Some(payload)) => Reference::Yaml(payload),
            ("ca", None) => Reference::Ca,
            ("kv1" | "kv2" | "pki-key" | "pki-cert" | "pki-ca-chain" | "pki-chain" | "yaml", None) => {
                return Err(VaultError::malformed(text, format!("{scheme} needs arguments")))
            }
            ("ca", Some(_)) => return Err(VaultError::malformed(text, "ca takes no argument")),
            (scheme, _) => {
                return Err(VaultError::malformed(text, format!("unknown scheme {scheme:?}")))
            }
        };
        Ok(Some(reference))
    }
}

/// Lexical normalisation of a `/` separated path (`.` and `..` resolved, empty segments dropped)
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = vec![];
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    segments.join("/")
}

/// Read access to the secret store
pub trait SecretSource {
    /// JSON body at `path` (relative to `/v1/`); `None` when the store does not answer with success
    fn read(&self, path: &str) -> Result<Option<serde_json::Value>, VaultError>;

    /// Trust anchor chain of the PKI backend
    fn ca_chain(&self) -> Result<Option<String>, VaultError>;
}

/// [SecretSource] over an authenticated [Transport]
#[derive(derive_new::new)]
pub struct VaultSource<'a> {
    config: &'a VaultConfig,
    transport: &'a dyn Transport,
    token: &'a str,
}

impl SecretSource for VaultSource<'_> {
    fn read(&self, path: &str) -> Result<Option<serde_json::Value>, VaultError> {
        let response = self
            .transport
            .get(&self.config.endpoint(path), &[], Some(self.token))?;
        if !response.is_success() {
            tracing::warn!(path, status = response.status, "secret read refused");
            return Ok(None);
        }
        Ok(response.json().ok())
    }

    fn ca_chain(&self) -> Result<Option<String>, VaultError> {
        let response = self
            .transport
            .get(&self.config.endpoint("pki/ca_chain"), &[], None)?;
        if !response.is_success() {
            tracing::warn!(status = response.status, "cannot fetch the CA chain");
            return Ok(None);
        }
        Ok(Some(response.body))
    }
}

/// Replaces `@vault:` references in a configuration tree
///
/// A reference that cannot be resolved is logged and left in place; a malformed one stops the
/// transform.
#[derive(derive_new::new)]
pub struct SecretResolver<'a> {
    source: &'a dyn SecretSource,
    certificates: &'a CertificateCache,
    role: Option<&'a str>,
}

impl SecretResolver<'_> {
    pub fn transform(&self, tree: &mut Value) -> Result<(), VaultError> {
        tree.transform_leaves(&mut |leaf: &Value| self.resolve(leaf))
    }

    /// Replacement for `leaf`, `None` when it is not a (resolvable) reference
    pub fn resolve(&self, leaf: &Value) -> Result<Option<Value>, VaultError> {
        let Some(text) = leaf.as_str() else {
            return Ok(None);
        };
        let Some(reference) = Reference::parse(text)? else {
            return Ok(None);
        };

        let resolved = match reference {
            Reference::Kv1 { path, key } => self
                .read("secret", path)?
                .and_then(|mut body| body.get_mut("data").map(serde_json::Value::take))
                .and_then(|mut data| data.get_mut(key).map(serde_json::Value::take))
                .filter(|value| !value.is_null())
                .map(Value::from),
            Reference::Kv2 { path, key } => self
                .read("kv", path)?
                .and_then(|mut body| body.pointer_mut("/data/data").map(serde_json::Value::take))
                .and_then(|mut data| data.get_mut(key).map(serde_json::Value::take))
                .filter(|value| !value.is_null())
                .map(Value::from),
            Reference::PkiKey(name) => self
                .certificates
                .get(name)
                .map(|issued| Value::from(issued.private_key.as_str())),
            Reference::PkiCert(name) => self
                .certificates
                .get(name)
                .map(|issued| Value::from(issued.certificate.as_str())),
            Reference::PkiCaChain(name) => self
                .certificates
                .get(name)
                .map(|issued| Value::from(issued.ca_chain.clone())),
            Reference::PkiChain(name) => self
                .certificates
                .get(name)
                .map(|issued| Value::from(issued.full_chain())),
            Reference::Ca => self.source.ca_chain()?.map(Value::from),
            Reference::Yaml(payload) => Some(self.resolve_yaml(text, payload)?),
        };

        if resolved.is_none() {
            tracing::warn!(reference = text, "could not resolve secret reference");
        }
        Ok(resolved)
    }

    fn read(&self, engine: &str, path: &str) -> Result<Option<serde_json::Value>, VaultError> {
        let full = match self.role {
            Some(role) => format!("{engine}/{role}/{path}"),
            None => format!("{engine}/{path}"),
        };
        self.source.read(&normalize_path(&full))
    }

    /// Resolve references inside serialized documents, re-serialised with `---` separators
    fn resolve_yaml(&self, reference: &str, payload: &str) -> Result<Value, VaultError> {
        let documents = Value::from_yaml_documents(payload)
            .map_err(|e| VaultError::malformed(reference, format!("invalid yaml payload: {e}")))?;

        let mut resolved = Vec::with_capacity(documents.len());
        for mut document in documents {
            match self.resolve(&document)? {
                Some(replacement) => document = replacement,
                None => self.transform(&mut document)?,
            }
            resolved.push(document);
        }

        let rendered = resolved
            .iter()
            .map(Value::to_yaml_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| VaultError::malformed(reference, format!("cannot serialize payload: {e}")))?;
        Ok(Value::from(rendered.join("---\n")))
    }
}
