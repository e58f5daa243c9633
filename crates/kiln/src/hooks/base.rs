use crate::distro::write_file;
use crate::hooks::{Flow, HookResult};
use crate::provision::ProvisionContext;
use crate::value::Value;
use anyhow::Context;
use indexmap::IndexMap;

const DEFAULT_NO_PROXY: &str =
    "localhost,127.0.0.1,10.96.0.0/16,192.168.0.0/16,127.0.0.1,localhost,.svc,.local,argocd-repo-server";

/// Trust stores as (probed directory, anchor directory, refresh command); first existing one wins
const TRUST_STORES: &[(&str, &str, &str)] = &[
    (
        "usr/local/share/ca-certificates",
        "usr/local/share/ca-certificates/kiln",
        "update-ca-certificates",
    ),
    (
        "etc/pki/ca-trust/source/anchors",
        "etc/pki/ca-trust/source/anchors",
        "update-ca-trust",
    ),
    (
        "usr/share/pki/trust/anchors",
        "usr/share/pki/trust/anchors",
        "update-ca-certificates",
    ),
];

pub(super) fn configure(context: &mut ProvisionContext) -> HookResult {
    std::env::set_var("HOME", "/root");
    configure_proxy(context)?;
    configure_certificates(context)?;
    Ok(Flow::Continue)
}

fn configure_proxy(context: &mut ProvisionContext) -> anyhow::Result<()> {
    let system_no_proxy = context
        .system
        .get("no_proxy")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_NO_PROXY)
        .to_string();

    let Some(proxy) = context.conf.get_mut("proxy").and_then(Value::object_mut) else {
        return Ok(());
    };

    if let Some(no_proxy) = proxy.get("no_proxy").and_then(Value::as_str) {
        let completed = complete_no_proxy(no_proxy, &system_no_proxy);
        proxy.insert("no_proxy".into(), completed.into());
    }

    let mut variables = IndexMap::new();
    for (key, name) in [("http", "http_proxy"), ("https", "https_proxy"), ("no_proxy", "no_proxy")] {
        if let Some(value) = proxy.get(key).and_then(Value::as_str) {
            variables.insert(name, value.to_string());
        }
    }

    tracing::info!(?variables, "configuring proxy");
    let environment = context.path("etc/environment");
    write_file(&environment, &render_environment(&variables))?;
    for (name, value) in &variables {
        std::env::set_var(name, value);
    }
    Ok(())
}

/// `no_proxy` followed by the entries of `system` it lacks
pub fn complete_no_proxy(no_proxy: &str, system: &str) -> String {
    let mut entries: Vec<&str> = no_proxy.split(',').collect();
    let added: Vec<&str> = system
        .split(',')
        .filter(|entry| !entries.contains(entry))
        .collect();
    entries.extend(added);
    entries.join(",")
}

fn render_environment(variables: &IndexMap<&str, String>) -> String {
    let mut out = String::from("PATH=\"/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin\"\n");
    for (name, value) in variables {
        out.push_str(&format!("{name}=\"{value}\"\n"));
        out.push_str(&format!("{}=\"{value}\"\n", name.to_uppercase()));
    }
    out
}

fn configure_certificates(context: &mut ProvisionContext) -> anyhow::Result<()> {
    let mut certificates: Vec<(String, String)> = match context.conf.get("certificates") {
        Some(Value::Object(certificates)) => certificates
            .iter()
            .filter_map(|(name, pem)| Some((name.clone(), pem.as_str()?.to_string())))
            .collect(),
        _ => vec![],
    };
    if let Some(ca) = context
        .conf
        .get("vault")
        .and_then(|vault| vault.get("ca"))
        .and_then(Value::as_str)
    {
        certificates.push(("vault".into(), ca.to_string()));
    }

    if certificates.is_empty() {
        return Ok(());
    }

    let Some((_, folder, refresh)) = TRUST_STORES
        .iter()
        .find(|(probe, _, _)| context.path(probe).is_dir())
    else {
        tracing::warn!("cannot handle certificates on this system");
        return Ok(());
    };

    let folder = context.path(folder);
    for (name, pem) in &certificates {
        let target = folder.join(format!("{name}.crt"));
        write_file(&target, &format!("{pem}\n"))
            .with_context(|| format!("unable to install certificate {name}"))?;
        tracing::info!(certificate = %name, "trust anchor installed");
    }

    context.distro.run(refresh, &[])?;
    Ok(())
}
