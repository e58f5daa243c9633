//! provisioning and boot runs over a live system
use crate::distro::{write_file, Distro};
use crate::hooks::{HookError, Pool, RunSummary};
use crate::value::Value;
use anyhow::Context;
use std::path::{Path, PathBuf};

const STATUS_FILE: &str = "etc/kiln/status";
const MARK_FILE: &str = "var/lib/kiln-boot-once";
const CONFIGURATION: &str = "etc/kiln/configuration.yaml";
const SYSTEM: &str = "etc/kiln/system.yaml";

/// Context handed to provisioning hooks
///
/// `conf` is the user configuration, `system` the image-level settings. Hooks may rewrite both;
/// later hooks see the rewritten documents.
#[derive(Debug)]
pub struct ProvisionContext {
    pub conf: Value,
    pub system: Value,
    pub distro: Box<dyn Distro>,
}

/// Context handed to boot hooks
#[derive(Debug)]
pub struct BootContext {
    pub conf: Value,
    pub system: Value,
    pub distro: Box<dyn Distro>,
}

impl ProvisionContext {
    /// `relative` under the configured root
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.distro.root().join(relative)
    }
}

pub fn default_configuration(root: &Path) -> PathBuf {
    root.join(CONFIGURATION)
}

pub fn default_system(root: &Path) -> PathBuf {
    root.join(SYSTEM)
}

/// Read a yaml document; an empty document is an empty mapping
pub fn load_document(path: &Path) -> anyhow::Result<Value> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("unable to read {}", path.display()))?;
    parse_document(&contents).with_context(|| format!("unable to parse {}", path.display()))
}

/// Like [load_document] but a missing file is an empty mapping
pub fn load_optional_document(path: &Path) -> anyhow::Result<Value> {
    if path.exists() {
        load_document(path)
    } else {
        tracing::debug!(path = %path.display(), "no document, using an empty one");
        Ok(empty_mapping())
    }
}

pub fn parse_document(contents: &str) -> anyhow::Result<Value> {
    let value = Value::from_yaml_str(contents)?;
    Ok(if value.is_null() { empty_mapping() } else { value })
}

fn empty_mapping() -> Value {
    Value::Object(Default::default())
}

/// Run the provisioning pool and record the outcome in the status file
///
/// A failing hook is logged and recorded as status `1`; it is not returned. Returns whether the
/// run succeeded.
pub fn run_provisioning(
    pool: &mut Pool<ProvisionContext>,
    context: &mut ProvisionContext,
    min_priority: Option<i32>,
) -> anyhow::Result<bool> {
    let status_file = context.path(STATUS_FILE);

    let succeeded = match pool.run(context, min_priority) {
        Ok(summary) => {
            log_summary(&summary);
            true
        }
        Err(err) => {
            log_failure(err);
            false
        }
    };

    write_file(&status_file, if succeeded { "0" } else { "1" })?;
    Ok(succeeded)
}

/// Run the boot pool, touching the boot mark on success
pub fn run_boot(pool: &mut Pool<BootContext>, context: &mut BootContext) -> anyhow::Result<()> {
    let mark_file = context.distro.root().join(MARK_FILE);

    let summary = pool.run(context, None)?;
    log_summary(&summary);

    write_file(&mark_file, "")?;
    Ok(())
}

fn log_summary(summary: &RunSummary) {
    match &summary.stopped_by {
        Some(hook) => tracing::info!(executed = ?summary.executed, %hook, "run stopped early"),
        None => tracing::info!(executed = ?summary.executed, "run completed"),
    }
}

fn log_failure(err: HookError) {
    match err {
        HookError::Failed { name, source } => {
            tracing::error!(hook = %name, error = %format!("{source:#}"), "hook failed")
        }
        other => tracing::error!(error = %other, "run refused"),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::distro::testing::RecordingDistro;
    use crate::hooks::Flow;
    use pretty_assertions::assert_eq;

    fn context(root: &Path) -> ProvisionContext {
        ProvisionContext {
            conf: empty_mapping(),
            system: empty_mapping(),
            distro: Box::new(RecordingDistro::new(root)),
        }
    }

    #[test]
    fn status_records_success() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = Pool::default();
        pool.register("noop", 10, |_: &mut ProvisionContext| Ok(Flow::Continue))
            .unwrap();

        assert!(run_provisioning(&mut pool, &mut context(root.path()), None).unwrap());
        assert_eq!(
            std::fs::read_to_string(root.path().join(STATUS_FILE)).unwrap(),
            "0"
        );
    }

    #[test]
    fn status_records_failure_without_error() {
        let root = tempfile::tempdir().unwrap();
        let mut pool = Pool::default();
        pool.register("broken", 10, |_: &mut ProvisionContext| {
            anyhow::bail!("no route to host")
        })
        .unwrap();

        assert!(!run_provisioning(&mut pool, &mut context(root.path()), None).unwrap());
        assert_eq!(
            std::fs::read_to_string(root.path().join(STATUS_FILE)).unwrap(),
            "1"
        );
    }

    #[test]
    fn boot_mark_only_on_success() {
        let root = tempfile::tempdir().unwrap();
        let mut context = BootContext {
            conf: empty_mapping(),
            system: empty_mapping(),
            distro: Box::new(RecordingDistro::new(root.path())),
        };

        let mut failing = Pool::default();
        failing
            .register("broken", 10, |_: &mut BootContext| anyhow::bail!("broken"))
            .unwrap();
        assert!(run_boot(&mut failing, &mut context).is_err());
        assert!(!root.path().join(MARK_FILE).exists());

        let mut pool = Pool::default();
        pool.register("noop", 10, |_: &mut BootContext| Ok(Flow::Continue))
            .unwrap();
        run_boot(&mut pool, &mut context).unwrap();
        assert!(root.path().join(MARK_FILE).exists());
    }

    #[test]
    fn missing_optional_document_is_empty() {
        let root = tempfile::tempdir().unwrap();
        let system = load_optional_document(&default_system(root.path())).unwrap();
        assert_eq!(system, empty_mapping());
        assert_eq!(parse_document("").unwrap(), empty_mapping());
    }
}
