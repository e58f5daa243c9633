//! declared options and their resolution against caller input
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer};

/// One entry of a module's `options` list
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OptionDecl {
    pub name: String,
    pub kind: OptionKind,
    #[serde(default, deserialize_with = "scalar_string")]
    pub default: Option<String>,
    #[serde(default, deserialize_with = "scalar_strings")]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub help: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(from = "String")]
pub enum OptionKind {
    Var,
    Flag,
    Unknown(String),
}

impl From<String> for OptionKind {
    fn from(value: String) -> Self {
        match value.as_str() {
            "var" => OptionKind::Var,
            "flag" => OptionKind::Flag,
            _ => OptionKind::Unknown(value),
        }
    }
}

/// Result of option resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolved {
    pub vars: IndexMap<String, String>,
    pub bools: IndexSet<String>,
}

impl Resolved {
    /// Resolve `options` in order against active flags and `key=value` bindings
    ///
    /// A repeated option name is resolved again; the later write to `vars` wins.
    pub fn resolve<'o>(
        options: impl IntoIterator<Item = &'o OptionDecl>,
        flags: &IndexSet<String>,
        bindings: &IndexMap<String, String>,
    ) -> Result<Self, OptionError> {
        let mut resolved = Resolved::default();

        for option in options {
            match &option.kind {
                OptionKind::Var => {
                    if let Some(value) = bindings.get(&option.name) {
                        if let Some(choices) = &option.choices {
                            if !choices.contains(value) {
                                return Err(OptionError::InvalidChoice {
                                    name: option.name.clone(),
                                    value: value.clone(),
                                    choices: choices.clone(),
                                });
                            }
                        }
                        resolved.vars.insert(option.name.clone(), value.clone());
                    } else if let Some(default) = &option.default {
                        resolved.vars.insert(option.name.clone(), default.clone());
                    }
                }
                OptionKind::Flag => {
                    if flags.contains(&option.name) {
                        resolved.bools.insert(option.name.clone());
                    }
                }
                OptionKind::Unknown(kind) => {
                    return Err(OptionError::UnknownOptionKind {
                        name: option.name.clone(),
                        kind: kind.clone(),
                    })
                }
            }
        }

        tracing::debug!(vars=?resolved.vars, bools=?resolved.bools, "options resolved");
        Ok(resolved)
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum OptionError {
    #[error("{value} for {name} is not authorized (allowed: {})", .choices.join(", "))]
    InvalidChoice {
        name: String,
        value: String,
        choices: Vec<String>,
    },
    #[error("option {name} has unknown kind {kind}")]
    UnknownOptionKind { name: String, kind: String },
}

/// yaml scalars as they were written: `default: 22` is the string `"22"`
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    String(String),
    Integer(i64),
    Decimal(f64),
    Boolean(bool),
}

impl From<Scalar> for String {
    fn from(value: Scalar) -> Self {
        match value {
            Scalar::String(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Decimal(d) => d.to_string(),
            Scalar::Boolean(b) => b.to_string(),
        }
    }
}

fn scalar_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(String::from))
}

fn scalar_strings<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<Vec<String>>, D::Error> {
    Ok(Option::<Vec<Scalar>>::deserialize(deserializer)?
        .map(|choices| choices.into_iter().map(String::from).collect()))
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn options(yaml: &str) -> Vec<OptionDecl> {
        serde_yaml::from_str(yaml).expect("valid options")
    }

    fn bindings(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn flags(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    const OPTIONS: &str = r#"
- name: release
  kind: var
  default: jammy
  choices: [focal, jammy, noble]
- name: port
  kind: var
  default: 22
- name: proxy
  kind: var
- name: fips
  kind: flag
  help: harden crypto
"#;

    #[test]
    fn defaults_bindings_and_absent_values() {
        let resolved = Resolved::resolve(
            &options(OPTIONS),
            &flags(&["fips", "undeclared"]),
            &bindings(&[("release", "noble")]),
        )
        .unwrap();

        assert_eq!(resolved.vars, bindings(&[("release", "noble"), ("port", "22")]));
        assert_eq!(resolved.bools, flags(&["fips"]));
        assert!(!resolved.vars.contains_key("proxy"));
    }

    #[test]
    fn binding_outside_choices_is_rejected() {
        let err = Resolved::resolve(
            &options(OPTIONS),
            &flags(&[]),
            &bindings(&[("release", "bionic")]),
        )
        .unwrap_err();

        assert!(matches!(err, OptionError::InvalidChoice { ref value, .. } if value == "bionic"));
    }

    #[test]
    fn default_is_not_checked_against_choices() {
        let decls = options("- {name: size, kind: var, default: huge, choices: [s, m]}");
        let resolved = Resolved::resolve(&decls, &flags(&[]), &bindings(&[])).unwrap();
        assert_eq!(resolved.vars["size"], "huge");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let decls = options("- {name: weird, kind: tristate}");
        assert_eq!(
            Resolved::resolve(&decls, &flags(&[]), &bindings(&[])),
            Err(OptionError::UnknownOptionKind {
                name: "weird".into(),
                kind: "tristate".into()
            })
        );
    }

    #[test]
    fn later_declaration_overwrites() {
        let decls = options(
            "- {name: release, kind: var, default: focal}\n- {name: release, kind: var, default: noble}",
        );
        let resolved = Resolved::resolve(&decls, &flags(&[]), &bindings(&[])).unwrap();
        assert_eq!(resolved.vars["release"], "noble");
    }

    #[test]
    fn resolution_is_idempotent() {
        let decls = options(OPTIONS);
        let flags = flags(&["fips"]);
        let bindings = bindings(&[("proxy", "http://proxy:3128")]);

        let first = Resolved::resolve(&decls, &flags, &bindings).unwrap();
        let second = Resolved::resolve(&decls, &flags, &bindings).unwrap();
        assert_eq!(first, second);
    }
}
