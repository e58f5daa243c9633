mod cli;

use anyhow::Context;
use indexmap::{IndexMap, IndexSet};
use kiln::hooks::HookRegistry;
use kiln::module_set::ModuleLoader;
use kiln::planner::{ImageTarget, Invocation, Planner};
use kiln::provision::{self, BootContext, ProvisionContext};
use std::path::Path;

const DEBUG_SCRIPT: &str = "DIB_DEBUG";

fn main() {
    use clap::Parser;
    let cli = cli::Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_env("KILN_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let command_result = match cli.command {
        cli::Command::Build(build_cli) => build(build_cli),
        cli::Command::Configure(configure_cli) => configure(configure_cli),
        cli::Command::Boot(boot_cli) => boot(boot_cli),
    };

    if let Err(e) = command_result {
        for error in e.chain() {
            eprintln!("{error}")
        }
        std::process::exit(1);
    }
}

pub fn build(cli: cli::BuildCommand) -> anyhow::Result<()> {
    let loader = ModuleLoader::new(cli.module_path.clone())?;
    let mut planner = Planner::load(&loader, cli.config.as_deref(), &cli.modules)?;

    let flags: IndexSet<String> = cli.bools.iter().cloned().collect();
    let bindings: IndexMap<String, String> = cli.bindings.iter().cloned().collect();
    planner.compile(&flags, &bindings)?;

    if cli.list_options {
        print!("{}", planner.options_help());
        return Ok(());
    }

    let invocation = planner.invocation(&ImageTarget {
        output: cli.output,
        format: cli.format,
        arch: cli.arch,
        extra_packages: cli.packages,
    });

    if let Some(format) = &cli.emit {
        return output(format, &invocation);
    }

    if let Some(script) = std::env::var_os(DEBUG_SCRIPT) {
        std::fs::write(&script, invocation.debug_script()).with_context(|| {
            format!("unable to write debug script {}", Path::new(&script).display())
        })?;
    }

    exec(&invocation)
}

fn output(format: &cli::OutputFormat, invocation: &Invocation) -> anyhow::Result<()> {
    match format {
        cli::OutputFormat::Yaml => serde_yaml::to_writer(std::io::stdout(), invocation)?,
        cli::OutputFormat::Json => serde_json::to_writer_pretty(std::io::stdout(), invocation)?,
    };

    Ok(())
}

/// Replace this process with the image tool
fn exec(invocation: &Invocation) -> anyhow::Result<()> {
    use std::os::unix::process::CommandExt;

    let program = which::which(&invocation.program)
        .with_context(|| format!("{} not found in PATH", invocation.program))?;
    tracing::info!(program = %program.display(), command = %invocation.command_line(), "starting image build");

    let err = invocation.command().exec();
    Err(err).with_context(|| format!("unable to execute {}", program.display()))
}

pub fn configure(cli: cli::ConfigureCommand) -> anyhow::Result<()> {
    let root = &cli.system.root;
    let conf_path = cli
        .conf
        .unwrap_or_else(|| provision::default_configuration(root));

    let mut context = ProvisionContext {
        conf: provision::load_document(&conf_path)?,
        system: load_system(&cli.system)?,
        distro: kiln::distro::detect(root)?,
    };

    let mut registry = HookRegistry::with_builtin()?;
    let succeeded =
        provision::run_provisioning(&mut registry.provisioning, &mut context, cli.min_priority)?;
    if !succeeded {
        tracing::warn!("provisioning failed, see status file");
    }
    Ok(())
}

pub fn boot(cli: cli::BootCommand) -> anyhow::Result<()> {
    let stdin = std::io::read_to_string(std::io::stdin())?;

    let mut context = BootContext {
        conf: provision::parse_document(&stdin).context("unable to parse configuration from stdin")?,
        system: load_system(&cli.system)?,
        distro: kiln::distro::detect(&cli.system.root)?,
    };

    let mut registry = HookRegistry::with_builtin()?;
    provision::run_boot(&mut registry.boot, &mut context)
}

fn load_system(args: &cli::SystemArgs) -> anyhow::Result<kiln::value::Value> {
    let path = args
        .system
        .clone()
        .unwrap_or_else(|| provision::default_system(&args.root));
    provision::load_optional_document(&path)
}
