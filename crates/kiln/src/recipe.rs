//! conditional contributions to the package and element lists
use crate::condition::Condition;
use crate::template::{TemplateError, TemplateExpander};
use indexmap::{IndexMap, IndexSet};

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub when: Condition,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub elements: Vec<String>,
}

/// Environment variable set when its condition holds
#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct EnvDecl {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub when: Condition,
}

/// Package and element lists built up by applying recipes in order
///
/// An entry that expands to `!value` removes every occurrence of `value` collected so far.
/// Entries are never deduplicated and a removal does not block later additions.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Accumulator {
    pub packages: Vec<String>,
    pub elements: Vec<String>,
}

impl Accumulator {
    pub fn apply(
        &mut self,
        recipe: &Recipe,
        vars: &IndexMap<String, String>,
        bools: &IndexSet<String>,
        expander: &TemplateExpander,
    ) -> Result<(), TemplateError> {
        if !recipe.when.evaluate(vars, bools) {
            tracing::trace!(when = ?recipe.when, "recipe skipped");
            return Ok(());
        }

        for raw in &recipe.packages {
            update(&mut self.packages, expander.expand(raw)?);
        }

        for raw in &recipe.elements {
            update(&mut self.elements, expander.expand(raw)?);
        }

        Ok(())
    }
}

fn update(target: &mut Vec<String>, entry: String) {
    if entry.is_empty() {
        tracing::debug!("skipping empty entry");
        return;
    }

    match entry.strip_prefix('!') {
        Some(removed) => target.retain(|existing| existing != removed),
        None => target.push(entry),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn recipes(yaml: &str) -> Vec<Recipe> {
        serde_yaml::from_str(yaml).expect("valid recipes")
    }

    fn accumulate(recipes: &[Recipe], vars: &[(&str, &str)], bools: &[&str]) -> Accumulator {
        let vars: IndexMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let bools: IndexSet<String> = bools.iter().map(|b| b.to_string()).collect();
        let expander = TemplateExpander::new(&vars);

        let mut accumulator = Accumulator::default();
        for recipe in recipes {
            accumulator
                .apply(recipe, &vars, &bools, &expander)
                .expect("recipes apply");
        }
        accumulator
    }

    #[test]
    fn removal_then_addition_keeps_value() {
        let result = accumulate(&recipes(r#"[{packages: ["!x", "x"]}]"#), &[], &[]);
        assert_eq!(result.packages, ["x"]);
    }

    #[test]
    fn addition_then_removal_drops_value() {
        let result = accumulate(&recipes(r#"[{packages: ["x", "!x"]}]"#), &[], &[]);
        assert!(result.packages.is_empty());
    }

    #[test]
    fn removal_drops_every_occurrence_and_keeps_duplicates_otherwise() {
        let result = accumulate(
            &recipes(
                r#"
- packages: [vim, curl, vim, git, git]
- packages: ["!vim", "!absent"]
"#,
            ),
            &[],
            &[],
        );
        assert_eq!(result.packages, ["curl", "git", "git"]);
    }

    #[test]
    fn later_recipe_cancels_earlier_one() {
        let result = accumulate(
            &recipes(
                r#"
- elements: [ubuntu, cloud-init]
- when: [minimal]
  elements: ["!cloud-init"]
- elements: [growroot]
"#,
            ),
            &[],
            &["minimal"],
        );
        assert_eq!(result.elements, ["ubuntu", "growroot"]);
    }

    #[test]
    fn conditions_gate_whole_recipe() {
        let recipes = recipes(
            r#"
- when: [docker]
  packages: [docker.io]
  elements: [kanod-docker]
- when: ["release=jammy"]
  packages: [podman]
"#,
        );
        let result = accumulate(&recipes, &[("release", "jammy")], &[]);
        assert_eq!(result.packages, ["podman"]);
        assert!(result.elements.is_empty());
    }

    #[test]
    fn removal_applies_after_expansion() {
        let result = accumulate(
            &recipes(
                r#"
- packages: ["linux-image-generic", "linux-image-virtual"]
- packages: ["!linux-image-${flavour}"]
"#,
            ),
            &[("flavour", "generic")],
            &[],
        );
        assert_eq!(result.packages, ["linux-image-virtual"]);
    }

    #[test]
    fn expansion_failure_is_reported() {
        let vars = IndexMap::new();
        let expander = TemplateExpander::new(&vars);
        let err = Accumulator::default()
            .apply(
                &recipes(r#"[{packages: ["${nope}"]}]"#)[0],
                &vars,
                &IndexSet::new(),
                &expander,
            )
            .unwrap_err();
        assert!(matches!(err, TemplateError::Evaluate { .. }));
    }
}
