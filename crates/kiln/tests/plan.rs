//! Compilation of module folders written to a temporary directory

use indexmap::{IndexMap, IndexSet};
use kiln::module_set::{LoadError, ModuleLoader};
use kiln::options::OptionError;
use kiln::planner::{ImageTarget, PlanError, Planner, ELEMENTS_PATH};
use pretty_assertions::assert_eq;
use std::path::{Path, PathBuf};

const BASE: &str = r#"
modules:
  - name: net.dhcp
options:
  - name: release
    kind: var
    default: jammy
    choices: [focal, jammy]
    help: Ubuntu release
  - name: docker
    kind: flag
    help: Install docker
env:
  - name: KILN_PLAN_TEST_RELEASE
    value: "${release}"
recipes:
  - packages: [curl, vim]
    elements: [ubuntu, vm]
  - when: [docker]
    packages: [docker.io]
  - when: ["release=focal"]
    elements: [focal-fixes]
"#;

const DHCP: &str = r#"
recipes:
  - packages: ["!vim", dhcpcd]
    elements: [dhcp-all-interfaces]
"#;

struct Fixture {
    _dir: tempfile::TempDir,
    root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().canonicalize().unwrap();

        write(&root, "base/config.yaml", BASE);
        write(&root, "net/dhcp/config.yaml", DHCP);
        std::fs::create_dir_all(root.join("web/elements")).unwrap();

        Self { _dir: dir, root }
    }

    fn loader(&self) -> ModuleLoader {
        ModuleLoader::new(vec![self.root.clone()]).unwrap()
    }
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn target() -> ImageTarget {
    ImageTarget {
        output: "image".into(),
        format: "qcow2".into(),
        arch: "amd64".into(),
        extra_packages: None,
    }
}

fn modules(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[test]
fn compiles_modules_in_load_order() {
    let fixture = Fixture::new();

    let invocation = Planner::plan(
        &fixture.loader(),
        &modules(&["base", "web"]),
        &IndexSet::new(),
        &IndexMap::new(),
        &target(),
    )
    .unwrap();

    insta::assert_snapshot!(
        invocation.command_line(),
        @"disk-image-create -a amd64 -t qcow2 -o image.qcow2 -p curl,dhcpcd ubuntu vm dhcp-all-interfaces"
    );
    assert_eq!(invocation.packages, ["curl", "dhcpcd"]);
    assert_eq!(
        invocation.elements_path,
        [
            fixture.root.join("base/elements"),
            fixture.root.join("net/dhcp/elements"),
            fixture.root.join("web/elements"),
        ]
    );
    assert_eq!(
        invocation.env.get("KILN_PLAN_TEST_RELEASE").map(String::as_str),
        Some("jammy")
    );
    assert_eq!(
        invocation.env.get(ELEMENTS_PATH).cloned(),
        Some(format!(
            "{root}/base/elements:{root}/net/dhcp/elements:{root}/web/elements",
            root = fixture.root.display()
        ))
    );
}

#[test]
fn flags_and_bindings_select_recipes() {
    let fixture = Fixture::new();
    let flags: IndexSet<String> = ["docker".to_string()].into_iter().collect();
    let bindings: IndexMap<String, String> = [("release".to_string(), "focal".to_string())]
        .into_iter()
        .collect();

    let invocation = Planner::plan(
        &fixture.loader(),
        &modules(&["base"]),
        &flags,
        &bindings,
        &ImageTarget {
            output: "disk.raw".into(),
            format: "raw".into(),
            arch: "arm64".into(),
            extra_packages: Some("htop,strace".into()),
        },
    )
    .unwrap();

    insta::assert_snapshot!(
        invocation.command_line(),
        @"disk-image-create -a arm64 -t raw -o disk.raw -p curl,docker.io,dhcpcd -p htop,strace ubuntu vm focal-fixes dhcp-all-interfaces"
    );
}

#[test]
fn root_document_comes_first() {
    let fixture = Fixture::new();
    let root_document = fixture.root.join("site.yaml");
    std::fs::write(
        &root_document,
        "modules: [{name: web}]\nrecipes: [{packages: [htop]}]\n",
    )
    .unwrap();

    let mut planner = Planner::load(&fixture.loader(), Some(&root_document), &modules(&["base"])).unwrap();
    planner.compile(&IndexSet::new(), &IndexMap::new()).unwrap();

    assert_eq!(planner.packages(), ["htop", "curl", "dhcpcd"]);
    assert_eq!(
        planner.modules().elements_path(),
        [
            fixture.root.join("web/elements"),
            fixture.root.join("base/elements"),
            fixture.root.join("net/dhcp/elements"),
        ]
    );
}

#[test]
fn lists_options() {
    let fixture = Fixture::new();
    let planner = Planner::load(&fixture.loader(), None, &modules(&["base"])).unwrap();

    insta::assert_snapshot!(planner.options_help().trim(), @r"
    variables:
      release:
        Ubuntu release
        allowed values: focal, jammy
        default value: jammy

    flags:
      docker:
        Install docker
    ");
}

#[test]
fn rejects_unknown_choice() {
    let fixture = Fixture::new();
    let bindings: IndexMap<String, String> = [("release".to_string(), "bionic".to_string())]
        .into_iter()
        .collect();

    let err = Planner::plan(
        &fixture.loader(),
        &modules(&["base"]),
        &IndexSet::new(),
        &bindings,
        &target(),
    )
    .unwrap_err();

    assert!(matches!(
        err,
        PlanError::Option(OptionError::InvalidChoice { ref value, .. }) if value == "bionic"
    ));
}

#[test]
fn reports_every_schema_violation() {
    let fixture = Fixture::new();
    write(
        &fixture.root,
        "broken/config.yaml",
        "unknown: 1\nrecipes: [{packages: vim}]\n",
    );

    let err = Planner::load(&fixture.loader(), None, &modules(&["broken"])).unwrap_err();

    let LoadError::InvalidConfiguration { path, issues } = err else {
        panic!("expected a configuration error");
    };
    assert_eq!(path, fixture.root.join("broken/config.yaml"));
    assert_eq!(issues.len(), 2);
}

#[test]
fn unknown_module() {
    let fixture = Fixture::new();

    let err = Planner::load(&fixture.loader(), None, &modules(&["nope"])).unwrap_err();
    assert!(matches!(err, LoadError::ModuleNotFound { ref name, .. } if name == "nope"));
}
