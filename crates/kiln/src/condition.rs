//! `when` conditions of recipes and environment declarations
//!
//! A condition is a list of terms that must all hold:
//! - `name` holds when `name` is an active flag or a defined variable
//! - `key=value` holds when variable `key` is exactly `value`
//! - a leading `!` negates the term
//!
//! There is no grouping and no disjunction. An empty list always holds.
use indexmap::{IndexMap, IndexSet};
use std::convert::Infallible;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
#[serde(from = "Vec<String>")]
pub struct Condition {
    terms: Vec<Term>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Term {
    pub negated: bool,
    pub test: Test,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Test {
    FlagSet(String),
    VarEquals(String, String),
}

impl Condition {
    pub fn parse<I, S>(terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            terms: terms
                .into_iter()
                .map(|term| Term::from(term.as_ref()))
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn evaluate(&self, vars: &IndexMap<String, String>, bools: &IndexSet<String>) -> bool {
        self.terms.iter().all(|term| term.holds(vars, bools))
    }
}

impl From<Vec<String>> for Condition {
    fn from(value: Vec<String>) -> Self {
        Condition::parse(value)
    }
}

impl Term {
    pub fn holds(&self, vars: &IndexMap<String, String>, bools: &IndexSet<String>) -> bool {
        let raw = match &self.test {
            Test::VarEquals(key, value) => vars.get(key) == Some(value),
            Test::FlagSet(name) => bools.contains(name) || vars.contains_key(name),
        };

        raw != self.negated
    }
}

impl From<&str> for Term {
    fn from(term: &str) -> Self {
        let (negated, rest) = match term.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, term),
        };

        let test = match rest.split_once('=') {
            Some((key, value)) => Test::VarEquals(key.to_string(), value.to_string()),
            None => Test::FlagSet(rest.to_string()),
        };

        Term { negated, test }
    }
}

impl FromStr for Term {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn vars(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn bools(names: &[&str]) -> IndexSet<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn parses_terms() {
        assert_eq!(
            Term::from("!release=jammy"),
            Term {
                negated: true,
                test: Test::VarEquals("release".into(), "jammy".into())
            }
        );
        // only the first `=` separates key and value
        assert_eq!(
            Term::from("opts=a=b").test,
            Test::VarEquals("opts".into(), "a=b".into())
        );
        assert_eq!(Term::from("debug").test, Test::FlagSet("debug".into()));
    }

    #[test]
    fn empty_condition_holds() {
        assert!(Condition::default().evaluate(&vars(&[]), &bools(&[])));
        assert!(Condition::parse(Vec::<String>::new()).evaluate(&vars(&[]), &bools(&[])));
    }

    #[test]
    fn flags_and_defined_vars_both_satisfy_flag_tests() {
        let condition = Condition::parse(["debug", "release"]);
        assert!(condition.evaluate(&vars(&[("release", "jammy")]), &bools(&["debug"])));
        assert!(!condition.evaluate(&vars(&[]), &bools(&["debug"])));
    }

    #[test]
    fn negated_terms() {
        let vars = vars(&[("release", "jammy")]);
        let bools = bools(&["fips"]);

        assert!(!Condition::parse(["!fips"]).evaluate(&vars, &bools));
        assert!(Condition::parse(["!docker"]).evaluate(&vars, &bools));
        assert!(!Condition::parse(["!release=jammy"]).evaluate(&vars, &bools));
        assert!(Condition::parse(["!release=noble"]).evaluate(&vars, &bools));
        // an undefined variable never equals a value
        assert!(Condition::parse(["!arch=arm64"]).evaluate(&vars, &bools));
        assert!(!Condition::parse(["arch=arm64"]).evaluate(&vars, &bools));
    }

    #[test]
    fn conjunction_fails_on_any_term() {
        let vars = vars(&[("release", "jammy")]);
        let bools = bools(&["fips"]);

        assert!(Condition::parse(["fips", "release=jammy", "!docker"]).evaluate(&vars, &bools));
        assert!(!Condition::parse(["fips", "release=jammy", "docker"]).evaluate(&vars, &bools));
    }

    #[test]
    fn deserializes_from_string_list() {
        let condition: Condition = serde_yaml::from_str("[a, '!b=c']").unwrap();
        assert_eq!(condition, Condition::parse(["a", "!b=c"]));
    }
}
