//! operating system distribution collaborator
//!
//! Hooks never branch on the distribution; they ask a [Distro] for the few things that differ
//! (service names, network rendering) and go through it for every system call.
use crate::value::Value;
use anyhow::{bail, Context};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// User account created by [Distro::create_user]
#[derive(Debug, Clone, PartialEq)]
pub struct UserSpec {
    pub name: String,
    pub authorized_keys: Vec<String>,
    /// Plain text password; the account stays locked when absent
    pub password: Option<String>,
    pub groups: Vec<String>,
    pub shell: String,
    /// sudoers rule, e.g. `ALL=(ALL) NOPASSWD:ALL`
    pub sudo: Option<String>,
}

pub trait Distro: std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Root of the configured file system
    fn root(&self) -> &Path;

    /// Name of the unit providing `service`
    fn daemon_name(&self, service: &str) -> String {
        service.to_string()
    }

    /// Render a version 2 network description and bring it up
    ///
    /// Returns `false` when nothing could be rendered.
    fn apply_network_config(&self, network: &Value) -> anyhow::Result<bool>;

    /// Run a command to completion, failing on a non zero exit status
    fn run(&self, program: &str, args: &[&str]) -> anyhow::Result<()> {
        run_command(program, args, None)
    }

    /// Run a command feeding `input` on its standard input
    fn run_with_input(&self, program: &str, args: &[&str], input: &str) -> anyhow::Result<()> {
        run_command(program, args, Some(input))
    }

    fn systemctl(&self, action: &str, unit: &str) -> anyhow::Result<()> {
        self.run("systemctl", &[action, unit])
    }

    fn create_user(&self, user: &UserSpec) -> anyhow::Result<()> {
        for group in &user.groups {
            self.run("groupadd", &["-f", group])?;
        }

        let groups = user.groups.join(",");
        let mut args = vec!["-m", "-s", user.shell.as_str()];
        if !groups.is_empty() {
            args.extend(["-G", groups.as_str()]);
        }
        args.push(&user.name);
        self.run("useradd", &args)
            .with_context(|| format!("unable to create user {}", user.name))?;

        match &user.password {
            Some(password) => {
                self.run_with_input("chpasswd", &[], &format!("{}:{password}\n", user.name))?
            }
            None => self.run("passwd", &["-l", &user.name])?,
        }

        if !user.authorized_keys.is_empty() {
            let ssh_dir = self.root().join("home").join(&user.name).join(".ssh");
            std::fs::create_dir_all(&ssh_dir)
                .with_context(|| format!("unable to create {}", ssh_dir.display()))?;
            let keys = ssh_dir.join("authorized_keys");
            std::fs::write(&keys, user.authorized_keys.join("\n") + "\n")
                .with_context(|| format!("unable to write {}", keys.display()))?;
            let ssh_dir = ssh_dir.display().to_string();
            self.run("chown", &["-R", &format!("{0}:{0}", user.name), &ssh_dir])?;
            self.run("chmod", &["700", &ssh_dir])?;
        }

        if let Some(rule) = &user.sudo {
            let sudoers = self.root().join("etc/sudoers.d").join(format!("90-kiln-{}", user.name));
            write_file(&sudoers, &format!("{} {rule}\n", user.name))?;
        }

        tracing::info!(user = %user.name, distro = self.name(), "user created");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Debian,
    RedHat,
    OpenSuse,
}

/// Distribution of the system mounted at `root`, read from `etc/os-release`
pub fn detect(root: &Path) -> anyhow::Result<Box<dyn Distro>> {
    let os_release = root.join("etc/os-release");
    let contents = std::fs::read_to_string(&os_release)
        .with_context(|| format!("unable to read {}", os_release.display()))?;

    let family = family_of(&contents)
        .with_context(|| format!("unsupported distribution in {}", os_release.display()))?;
    tracing::debug!(?family, "distribution detected");

    let root = root.to_path_buf();
    Ok(match family {
        Family::Debian => Box::new(Debian { root }),
        Family::RedHat => Box::new(RedHat { root }),
        Family::OpenSuse => Box::new(OpenSuse { root }),
    })
}

pub fn family_of(os_release: &str) -> Option<Family> {
    let mut ids = vec![];
    for line in os_release.lines() {
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key == "ID" || key == "ID_LIKE" {
            ids.extend(
                value
                    .trim_matches('"')
                    .split_whitespace()
                    .map(str::to_lowercase),
            );
        }
    }

    ids.iter().find_map(|id| match id.as_str() {
        "debian" | "ubuntu" => Some(Family::Debian),
        "rhel" | "centos" | "fedora" | "rocky" | "almalinux" => Some(Family::RedHat),
        id if id.starts_with("opensuse") || id == "suse" || id == "sles" => Some(Family::OpenSuse),
        _ => None,
    })
}

#[derive(Debug)]
pub struct Debian {
    root: PathBuf,
}

impl Distro for Debian {
    fn name(&self) -> &'static str {
        "debian"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn apply_network_config(&self, network: &Value) -> anyhow::Result<bool> {
        let mut document = Value::Null;
        if let Some(object) = document.object_mut() {
            object.insert("network".into(), network.clone());
        }
        let target = self.root.join("etc/netplan/50-kiln.yaml");
        write_file(&target, &document.to_yaml_string()?)?;
        self.run("netplan", &["apply"])?;
        Ok(true)
    }
}

#[derive(Debug)]
pub struct RedHat {
    root: PathBuf,
}

impl Distro for RedHat {
    fn name(&self) -> &'static str {
        "redhat"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn daemon_name(&self, service: &str) -> String {
        rpm_daemon_name(service)
    }

    fn apply_network_config(&self, network: &Value) -> anyhow::Result<bool> {
        apply_keyfiles(self, network)
    }
}

#[derive(Debug)]
pub struct OpenSuse {
    root: PathBuf,
}

impl Distro for OpenSuse {
    fn name(&self) -> &'static str {
        "opensuse"
    }

    fn root(&self) -> &Path {
        &self.root
    }

    fn daemon_name(&self, service: &str) -> String {
        rpm_daemon_name(service)
    }

    fn apply_network_config(&self, network: &Value) -> anyhow::Result<bool> {
        // NetworkManager regenerates it
        let resolv = self.root.join("etc/resolv.conf");
        if resolv.exists() {
            std::fs::remove_file(&resolv)
                .with_context(|| format!("unable to remove {}", resolv.display()))?;
        }
        apply_keyfiles(self, network)
    }
}

fn rpm_daemon_name(service: &str) -> String {
    match service {
        "chrony" => "chronyd".to_string(),
        other => other.to_string(),
    }
}

/// Renders `ethernets` as NetworkManager keyfiles then restarts NetworkManager
fn apply_keyfiles(distro: &dyn Distro, network: &Value) -> anyhow::Result<bool> {
    let Some(Value::Object(ethernets)) = network.get("ethernets") else {
        tracing::warn!("no ethernets in network configuration");
        return Ok(false);
    };

    let connections = distro.root().join("etc/NetworkManager/system-connections");
    for (name, device) in ethernets {
        let target = connections.join(format!("{name}.nmconnection"));
        write_file(&target, &keyfile(name, device))?;
        set_mode(&target, 0o600)?;
    }

    distro.systemctl("enable", "NetworkManager")?;
    distro.systemctl("restart", "NetworkManager")?;
    Ok(true)
}

pub(crate) fn keyfile(name: &str, device: &Value) -> String {
    let mut out = format!("[connection]\nid={name}\ntype=ethernet\ninterface-name={name}\n\n[ipv4]\n");

    let dhcp = matches!(device.get("dhcp4"), Some(Value::Boolean(true)));
    let addresses: Vec<&str> = device
        .get("addresses")
        .and_then(Value::as_array)
        .map(|addresses| addresses.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if dhcp || addresses.is_empty() {
        out.push_str("method=auto\n");
    } else {
        out.push_str("method=manual\n");
        for (index, address) in addresses.iter().enumerate() {
            out.push_str(&format!("address{}={address}\n", index + 1));
        }
    }

    if let Some(gateway) = device.get("gateway4").and_then(Value::as_str) {
        out.push_str(&format!("gateway={gateway}\n"));
    }

    let dns: Vec<&str> = device
        .get("nameservers")
        .and_then(|nameservers| nameservers.get("addresses"))
        .and_then(Value::as_array)
        .map(|servers| servers.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();
    if !dns.is_empty() {
        out.push_str(&format!("dns={};\n", dns.join(";")));
    }

    out
}

/// Write `contents` to `path`, creating missing parent directories
pub fn write_file(path: &Path, contents: &str) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("unable to create {}", parent.display()))?;
    }
    std::fs::write(path, contents).with_context(|| format!("unable to write {}", path.display()))
}

fn set_mode(path: &Path, mode: u32) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("unable to set permissions of {}", path.display()))
}

fn run_command(program: &str, args: &[&str], input: Option<&str>) -> anyhow::Result<()> {
    tracing::debug!(program, ?args, "running command");

    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if input.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command
        .spawn()
        .with_context(|| format!("failed to execute '{program}'"))?;
    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        stdin
            .write_all(input.as_bytes())
            .with_context(|| format!("unable to write to '{program}'"))?;
    }

    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to wait for '{program}'"))?;
    if !output.status.success() {
        bail!(
            "'{program}' failed ({}): {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
