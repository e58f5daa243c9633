//! # kiln - modular disk image recipes and first-boot provisioning
//!
//! `kiln` has two halves that share nothing but the [value::Value] document model:
//!
//! - at **build time** a set of modules is compiled into a single `disk-image-create` invocation
//! - at **first boot** (and every boot) a registry of hooks configures the running system, with
//!   secrets pulled from a vault-like store
//!
//! ## Introduction for developers
//!
//! ### Modules
//!
//! A module is a folder found on the module search path. It may contain
//!
//! - `config.yaml`: the module document, validated against a JSON schema before anything else
//!   happens ([module_set::SchemaValidator])
//! - `elements/`: image elements, added to `ELEMENTS_PATH`
//!
//! A module document declares
//!
//! ```yaml
//! modules:            # loaded after this module, depth first, each at most once
//!   - name: base.network
//! options:            # knobs set from the command line
//!   - name: release
//!     kind: var
//!     default: jammy
//!     choices: [focal, jammy]
//!   - name: with_docker
//!     kind: flag
//! env:                # exported before the build, values are templates
//!   - name: DIB_RELEASE
//!     value: "${release}"
//! recipes:
//!   - when: [with_docker, "!release=focal"]
//!     packages: [docker.io]
//!     elements: [docker]
//! ```
//!
//! ### Compiling
//!
//! see [planner::Planner::compile]
//!
//! 1. options are resolved ([options::Resolved::resolve]): a variable takes its binding, then its
//!    default, and must be one of its choices; a flag is set when named on the command line
//! 2. environment declarations whose condition holds ([condition::Condition]) are expanded
//!    ([template::TemplateExpander]) and exported, in module order
//! 3. recipes are folded into the package and element lists ([recipe::Accumulator]); an entry
//!    starting with `!` removes an earlier one
//!
//! Order matters everywhere: later modules see the environment set by earlier ones, and a removal
//! only affects entries added before it.
//!
//! ### Hooks
//!
//! [hooks::HookRegistry] holds two pools, one run on first boot (provisioning) and one on every
//! boot. Hooks run by ascending priority, registration order breaking ties. A hook may stop the run
//! early ([hooks::Flow::Stop]); a failing hook aborts the rest of its pool.
//!
//! | priority | provisioning hook |
//! |---|---|
//! | 10 | Network configuration |
//! | 50 | Base configuration |
//! | 70 | Vault configuration |
//! | 100 | NTP configuration |
//! | 110 | Admin user configuration |
//!
//! Everything distribution specific goes through [distro::Distro].
//!
//! ### Secrets
//!
//! see [vault]
//!
//! Configuration strings such as `@vault:kv2:db:password` are replaced in place by walking the
//! document ([visit::TransformLeaves]). A reference that cannot be resolved stays as it is; one
//! that cannot be parsed fails the hook.
pub mod condition;
pub mod distro;
pub mod hooks;
pub mod module_set;
pub mod options;
pub mod planner;
pub mod provision;
pub mod recipe;
pub mod template;
mod util;
pub mod value;
pub mod vault;
pub mod visit;
