//! kiln cli interface

use clap::{Parser, Subcommand, ValueEnum};
use std::fmt::Formatter;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Compile modules and build a disk image
    ///
    /// Runs disk-image-create with the compiled packages and elements
    /// unless --emit or --list-options is given.
    Build(BuildCommand),

    /// Run the provisioning hooks on a live system
    ///
    /// The outcome is recorded in <root>/etc/kiln/status
    Configure(ConfigureCommand),

    /// Run the boot hooks, reading the configuration from stdin
    Boot(BootCommand),
}

#[derive(Parser, Debug)]
pub struct BuildCommand {
    /// Output image name, the format is appended when it has no extension
    #[arg(short = 'o', long = "output", default_value = "image")]
    pub output: String,

    /// Image format
    #[arg(short = 't', long = "format", default_value = "qcow2")]
    pub format: String,

    /// Target architecture
    #[arg(short = 'a', long = "arch", default_value = "amd64")]
    pub arch: String,

    /// Set a flag option
    #[arg(short = 'b', long = "bool")]
    pub bools: Vec<String>,

    /// Bind a variable option (key=value)
    #[arg(short = 's', long = "set", value_parser = parse_binding)]
    pub bindings: Vec<(String, String)>,

    /// Extra comma separated packages, passed as given
    #[arg(short = 'p', long = "packages")]
    pub packages: Option<String>,

    /// Root document loaded before any module
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Directory searched for modules
    ///
    /// Can be specified multiple times.
    #[arg(
        short = 'M',
        long = "module-path",
        env = "KILN_MODULE_PATH",
        value_delimiter = ':',
        default_value = "."
    )]
    pub module_path: Vec<PathBuf>,

    /// Print the options declared by the modules and exit
    #[arg(long = "list-options")]
    pub list_options: bool,

    /// Print the invocation instead of running it
    #[arg(long = "emit")]
    pub emit: Option<OutputFormat>,

    /// Modules to compile, in order
    pub modules: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct ConfigureCommand {
    /// Only run hooks with at least this priority
    pub min_priority: Option<i32>,

    #[clap(flatten)]
    pub system: SystemArgs,

    /// Configuration document [default: <root>/etc/kiln/configuration.yaml]
    #[arg(long = "conf")]
    pub conf: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct BootCommand {
    #[clap(flatten)]
    pub system: SystemArgs,
}

#[derive(Parser, Debug)]
pub struct SystemArgs {
    /// Root of the system to configure
    #[arg(long = "root", default_value = "/")]
    pub root: PathBuf,

    /// System document, may be absent [default: <root>/etc/kiln/system.yaml]
    #[arg(long = "system")]
    pub system: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Default, Debug)]
pub enum OutputFormat {
    Json,
    #[default]
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Json => f.write_str("json"),
            OutputFormat::Yaml => f.write_str("yaml"),
        }
    }
}

fn parse_binding(binding: &str) -> Result<(String, String), String> {
    let (key, value) = binding
        .split_once('=')
        .ok_or_else(|| format!("invalid binding {binding:?}, expected key=value"))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn cli_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn build_arguments() {
        let cli = Cli::try_parse_from([
            "kiln", "build", "-s", " release = jammy ", "-b", "docker", "-M", "/a", "-M", "/b",
            "--emit", "json", "base", "web",
        ])
        .unwrap();

        let Command::Build(build) = cli.command else {
            panic!("not a build command");
        };
        assert_eq!(build.bindings, [("release".to_string(), "jammy".to_string())]);
        assert_eq!(build.bools, ["docker"]);
        assert_eq!(build.module_path, [PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(build.modules, ["base", "web"]);
        assert_eq!(build.output, "image");
        assert!(matches!(build.emit, Some(OutputFormat::Json)));
    }

    #[test]
    fn malformed_binding() {
        assert!(Cli::try_parse_from(["kiln", "build", "-s", "release"]).is_err());
    }

    #[test]
    fn configure_arguments() {
        let cli = Cli::try_parse_from(["kiln", "configure", "60", "--root", "/mnt"]).unwrap();

        let Command::Configure(configure) = cli.command else {
            panic!("not a configure command");
        };
        assert_eq!(configure.min_priority, Some(60));
        assert_eq!(configure.system.root, PathBuf::from("/mnt"));
        assert_eq!(configure.conf, None);
    }
}
