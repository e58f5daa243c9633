//! compile loaded modules into one disk-image-create invocation
//!
//! Compilation runs in three strictly ordered passes over the [ModuleSet]:
//!
//! 1. options are resolved into variables and flags ([Resolved::resolve])
//! 2. every environment declaration whose condition holds is expanded and **written to the process
//!    environment** (and recorded, see [Planner::applied_env])
//! 3. recipes are applied to the package and element lists ([Accumulator])
//!
//! Module load order drives all three passes. Compiling twice in one process sets the environment
//! twice; that is only harmless when the declarations themselves are idempotent.
use crate::module_set::{LoadError, ModuleLoader, ModuleSet};
use crate::options::{OptionDecl, OptionError, OptionKind, Resolved};
use crate::recipe::Accumulator;
use crate::template::{TemplateError, TemplateExpander};
use indexmap::{IndexMap, IndexSet};
use std::path::{Path, PathBuf};

pub const IMAGE_TOOL: &str = "disk-image-create";
pub const ELEMENTS_PATH: &str = "ELEMENTS_PATH";

#[derive(derive_new::new, Debug)]
pub struct Planner {
    modules: ModuleSet,
    #[new(default)]
    resolved: Resolved,
    #[new(default)]
    accumulator: Accumulator,
    #[new(default)]
    applied_env: IndexMap<String, String>,
}

/// Target of a build
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTarget {
    pub output: String,
    pub format: String,
    pub arch: String,
    /// Comma separated packages passed as an additional `-p`
    pub extra_packages: Option<String>,
}

impl ImageTarget {
    /// Output file name, `format` is appended as extension when `output` has none
    pub fn file_name(&self) -> String {
        if self.output.contains('.') {
            self.output.clone()
        } else {
            format!("{}.{}", self.output, self.format)
        }
    }
}

/// Everything needed to run the image tool
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub env: IndexMap<String, String>,
    pub packages: Vec<String>,
    pub elements: Vec<String>,
    pub elements_path: Vec<PathBuf>,
}

impl Planner {
    /// Load the optional root document, then `modules` in the given order
    pub fn load(
        loader: &ModuleLoader,
        root: Option<&Path>,
        modules: &[String],
    ) -> Result<Self, LoadError> {
        let mut set = ModuleSet::default();
        if let Some(root) = root {
            loader.load_root(&mut set, root)?;
        }
        for name in modules {
            loader.load_module(&mut set, name)?;
        }
        Ok(Self::new(set))
    }

    /// Load, compile and produce the invocation in one go
    pub fn plan(
        loader: &ModuleLoader,
        modules: &[String],
        flags: &IndexSet<String>,
        bindings: &IndexMap<String, String>,
        target: &ImageTarget,
    ) -> Result<Invocation, PlanError> {
        let mut planner = Self::load(loader, None, modules)?;
        planner.compile(flags, bindings)?;
        Ok(planner.invocation(target))
    }

    pub fn modules(&self) -> &ModuleSet {
        &self.modules
    }

    pub fn compile(
        &mut self,
        flags: &IndexSet<String>,
        bindings: &IndexMap<String, String>,
    ) -> Result<(), PlanError> {
        self.accumulator = Accumulator::default();
        self.applied_env.clear();

        self.resolved = Resolved::resolve(
            self.modules.options().map(|(_, option)| option),
            flags,
            bindings,
        )?;

        // declared variables without a value expand to an empty string
        let mut template_vars = self.resolved.vars.clone();
        for (_, option) in self.modules.options() {
            if option.kind == OptionKind::Var {
                template_vars.entry(option.name.clone()).or_default();
            }
        }
        let expander = TemplateExpander::new(&template_vars);

        for (source, decl) in self.modules.env() {
            if !decl.when.evaluate(&self.resolved.vars, &self.resolved.bools) {
                continue;
            }

            let value = expander.expand(&decl.value)?;
            tracing::info!(module = %source.name, name = %decl.name, %value, "setting environment variable");
            std::env::set_var(&decl.name, &value);
            self.applied_env.insert(decl.name.clone(), value);
        }

        for (_, recipe) in self.modules.recipes() {
            self.accumulator.apply(
                recipe,
                &self.resolved.vars,
                &self.resolved.bools,
                &expander,
            )?;
        }

        tracing::debug!(
            packages = ?self.accumulator.packages,
            elements = ?self.accumulator.elements,
            "recipes compiled"
        );
        Ok(())
    }

    pub fn resolved(&self) -> &Resolved {
        &self.resolved
    }

    pub fn packages(&self) -> &[String] {
        &self.accumulator.packages
    }

    pub fn elements(&self) -> &[String] {
        &self.accumulator.elements
    }

    /// Environment variables set by [Planner::compile], in application order
    pub fn applied_env(&self) -> &IndexMap<String, String> {
        &self.applied_env
    }

    pub fn invocation(&self, target: &ImageTarget) -> Invocation {
        let elements_path = self.modules.elements_path();

        let mut args: Vec<String> = vec![
            "-a".into(),
            target.arch.clone(),
            "-t".into(),
            target.format.clone(),
            "-o".into(),
            target.file_name(),
        ];

        let packages = self.accumulator.packages.join(",");
        if !packages.is_empty() {
            args.extend(["-p".to_string(), packages]);
        }
        if let Some(extra) = &target.extra_packages {
            args.extend(["-p".to_string(), extra.clone()]);
        }
        args.extend(self.accumulator.elements.iter().cloned());

        let mut env = self.applied_env.clone();
        env.insert(ELEMENTS_PATH.to_string(), join_paths(&elements_path));

        Invocation {
            program: IMAGE_TOOL.to_string(),
            args,
            env,
            packages: self.accumulator.packages.clone(),
            elements: self.accumulator.elements.clone(),
            elements_path,
        }
    }

    /// Option listing grouped as variables and flags, sorted by name
    pub fn options_help(&self) -> String {
        let mut options: Vec<&OptionDecl> = self.modules.options().map(|(_, o)| o).collect();
        options.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::new();
        for (title, kind) in [("variables", OptionKind::Var), ("flags", OptionKind::Flag)] {
            out.push_str(&format!("\n{title}:\n"));
            for option in options.iter().filter(|o| o.kind == kind) {
                out.push_str(&format!("  {}:\n", option.name));
                if let Some(help) = &option.help {
                    for line in help.lines() {
                        out.push_str(&format!("    {}\n", line.trim()));
                    }
                }
                if let Some(choices) = &option.choices {
                    out.push_str(&format!("    allowed values: {}\n", choices.join(", ")));
                }
                if let Some(default) = &option.default {
                    out.push_str(&format!("    default value: {default}\n"));
                }
            }
        }
        out
    }
}

impl Invocation {
    /// Shell script replaying the environment and the command, for debugging builds
    pub fn debug_script(&self) -> String {
        let mut script = String::from("#!/bin/bash\n\n");
        for (name, value) in &self.env {
            script.push_str(&format!("{name}={value}\n"));
        }
        script.push_str(&format!("{}\n", self.command_line()));
        script
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn command(&self) -> std::process::Command {
        let mut command = std::process::Command::new(&self.program);
        command.args(&self.args).envs(&self.env);
        command
    }
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|path| path.display().to_string())
        .collect::<Vec<_>>()
        .join(":")
}

#[derive(thiserror::Error, Debug)]
pub enum PlanError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Option(#[from] OptionError),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module_set::Source;
    use pretty_assertions::assert_eq;

    fn target() -> ImageTarget {
        ImageTarget {
            output: "node".into(),
            format: "qcow2".into(),
            arch: "amd64".into(),
            extra_packages: None,
        }
    }

    fn flags(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn file_name_gets_format_extension() {
        let mut target = target();
        assert_eq!(target.file_name(), "node.qcow2");
        target.output = "node.raw".into();
        assert_eq!(target.file_name(), "node.raw");
    }

    #[test]
    fn compiles_in_module_order() {
        let set = crate::module_set! {
            "base" => r#"
options:
  - {name: release, kind: var, default: jammy}
  - {name: docker, kind: flag}
env:
  - {name: KILN_TEST_PLANNER_RELEASE, value: "${release}"}
  - {name: KILN_TEST_PLANNER_SKIPPED, value: "x", when: [docker]}
recipes:
  - {packages: [vim, "kernel-${release}"], elements: [ubuntu]}
"#,
            "extra" => r#"
recipes:
  - {packages: ["!vim", curl], elements: [vm]}
"#
        };

        let mut planner = Planner::new(set);
        planner.compile(&flags(&[]), &IndexMap::new()).unwrap();

        assert_eq!(planner.packages(), ["kernel-jammy", "curl"]);
        assert_eq!(planner.elements(), ["ubuntu", "vm"]);
        assert_eq!(
            std::env::var("KILN_TEST_PLANNER_RELEASE").as_deref(),
            Ok("jammy")
        );
        assert!(std::env::var("KILN_TEST_PLANNER_SKIPPED").is_err());
        assert_eq!(
            planner.applied_env().keys().collect::<Vec<_>>(),
            ["KILN_TEST_PLANNER_RELEASE"]
        );
    }

    #[test]
    fn invocation_arguments() {
        let mut set = crate::module_set! {
            "base" => "recipes: [{packages: [vim, curl], elements: [ubuntu, vm]}]"
        };
        set.insert(
            Default::default(),
            Source {
                name: "folder".into(),
                folder: Some(PathBuf::from("/opt/modules/folder")),
                document: None,
            },
        );

        let mut planner = Planner::new(set);
        planner.compile(&flags(&[]), &IndexMap::new()).unwrap();

        let mut target = target();
        target.extra_packages = Some("htop".into());
        let invocation = planner.invocation(&target);

        assert_eq!(
            invocation.command_line(),
            "disk-image-create -a amd64 -t qcow2 -o node.qcow2 -p vim,curl -p htop ubuntu vm"
        );
        assert_eq!(
            invocation.env[ELEMENTS_PATH],
            "/opt/modules/folder/elements"
        );
    }

    #[test]
    fn empty_package_list_omits_flag() {
        let set = crate::module_set! { "base" => "recipes: [{elements: [ubuntu]}]" };
        let mut planner = Planner::new(set);
        planner.compile(&flags(&[]), &IndexMap::new()).unwrap();

        assert_eq!(
            planner.invocation(&target()).args,
            ["-a", "amd64", "-t", "qcow2", "-o", "node.qcow2", "ubuntu"]
        );
    }

    #[test]
    fn recompiling_starts_fresh() {
        let set = crate::module_set! {
            "base" => r#"
options: [{name: debug, kind: flag}]
env: [{name: KILN_TEST_PLANNER_ONCE, value: x, when: [debug]}]
recipes: [{packages: [vim]}]
"#
        };
        let mut planner = Planner::new(set);

        planner.compile(&flags(&["debug"]), &IndexMap::new()).unwrap();
        assert_eq!(planner.applied_env().len(), 1);
        planner.compile(&flags(&[]), &IndexMap::new()).unwrap();

        assert_eq!(planner.packages(), ["vim"]);
        assert!(planner.applied_env().is_empty());
    }

    #[test]
    fn unset_variables_expand_empty() {
        let set = crate::module_set! {
            "base" => r#"
options:
  - {name: proxy, kind: var}
env:
  - {name: KILN_TEST_PLANNER_PROXY, value: "proxy=${proxy}"}
recipes:
  - {packages: ['%{ if proxy != "" }squid%{ else }direct%{ endif }']}
  - {when: [proxy], packages: [proxy-tools]}
"#
        };
        let mut planner = Planner::new(set);

        planner.compile(&flags(&[]), &IndexMap::new()).unwrap();
        assert_eq!(planner.applied_env()["KILN_TEST_PLANNER_PROXY"], "proxy=");
        assert_eq!(planner.packages(), ["direct"]);
        assert!(!planner.resolved().vars.contains_key("proxy"));

        let bindings = [("proxy".to_string(), "cache:3128".to_string())]
            .into_iter()
            .collect();
        planner.compile(&flags(&[]), &bindings).unwrap();
        assert_eq!(
            planner.applied_env()["KILN_TEST_PLANNER_PROXY"],
            "proxy=cache:3128"
        );
        assert_eq!(planner.packages(), ["squid", "proxy-tools"]);
    }

    #[test]
    fn undeclared_variable_stops_compilation() {
        let set = crate::module_set! { "base" => "recipes: [{packages: [\"${mirror}\"]}]" };
        let mut planner = Planner::new(set);

        let err = planner.compile(&flags(&[]), &IndexMap::new()).unwrap_err();
        assert!(matches!(err, PlanError::Template(TemplateError::Evaluate { .. })));
    }

    #[test]
    fn debug_script_replays_environment() {
        let invocation = Invocation {
            program: IMAGE_TOOL.to_string(),
            args: vec!["-o".into(), "node.qcow2".into(), "ubuntu".into()],
            env: [
                ("DIB_RELEASE".to_string(), "jammy".to_string()),
                (ELEMENTS_PATH.to_string(), "/m/elements".to_string()),
            ]
            .into_iter()
            .collect(),
            packages: vec![],
            elements: vec!["ubuntu".into()],
            elements_path: vec![PathBuf::from("/m/elements")],
        };

        assert_eq!(
            invocation.debug_script(),
            "#!/bin/bash\n\nDIB_RELEASE=jammy\nELEMENTS_PATH=/m/elements\ndisk-image-create -o node.qcow2 ubuntu\n"
        );
    }

    #[test]
    fn invalid_choice_stops_compilation() {
        let set = crate::module_set! {
            "base" => "options: [{name: release, kind: var, choices: [jammy]}]\nrecipes: [{packages: [vim]}]"
        };
        let mut planner = Planner::new(set);
        let bindings = [("release".to_string(), "focal".to_string())].into_iter().collect();

        let err = planner.compile(&flags(&[]), &bindings).unwrap_err();
        assert!(matches!(err, PlanError::Option(OptionError::InvalidChoice { .. })));
        assert!(planner.packages().is_empty());
    }

    #[test]
    fn options_help_groups_and_sorts() {
        let set = crate::module_set! {
            "base" => r#"
options:
  - {name: zeta, kind: var, default: z}
  - {name: fips, kind: flag, help: harden crypto}
  - {name: alpha, kind: var, choices: [a, b]}
"#
        };

        assert_eq!(
            Planner::new(set).options_help(),
            "\nvariables:\n  alpha:\n    allowed values: a, b\n  zeta:\n    default value: z\n\nflags:\n  fips:\n    harden crypto\n"
        );
    }
}
