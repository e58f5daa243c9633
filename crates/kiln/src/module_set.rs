//! collection of loaded modules (document contributions and source folder)
//!
//! [ModuleSet] tracks
//! - the source of every module (name, resource folder, document path)
//! - the options, environment declarations and recipes each module contributed
//!
//! in load order. Once added, entries are never removed or reordered: the order in which modules
//! are loaded is the order in which options are resolved, environment variables are set and
//! recipes are applied.
use crate::options::OptionDecl;
use crate::recipe::{EnvDecl, Recipe};
use std::path::{Path, PathBuf};

const MODULE_DOCUMENT: &str = "config.yaml";
const ELEMENTS_FOLDER: &str = "elements";

/// Declarative document of a module (`config.yaml`)
#[derive(Debug, Clone, Default, PartialEq, serde::Deserialize)]
pub struct ModuleDocument {
    #[serde(default)]
    pub modules: Vec<ModuleRef>,
    #[serde(default)]
    pub options: Vec<OptionDecl>,
    #[serde(default)]
    pub env: Vec<EnvDecl>,
    #[serde(default)]
    pub recipes: Vec<Recipe>,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
pub struct ModuleRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub name: String,
    /// Resource folder; `None` for a root document passed on its own
    pub folder: Option<PathBuf>,
    pub document: Option<PathBuf>,
}

#[derive(Default, Debug)]
pub struct ModuleSet {
    sources: Vec<Source>,
    options: Vec<(usize, OptionDecl)>,
    env: Vec<(usize, EnvDecl)>,
    recipes: Vec<(usize, Recipe)>,
}

pub type SourceItem<'a, T> = (&'a Source, &'a T);

impl ModuleSet {
    /// Appends a module and its contributions
    pub fn insert(&mut self, document: ModuleDocument, source: Source) {
        let source_index = self.sources.len();
        tracing::debug!(module = %source.name, "registering module");
        self.sources.push(source);

        let ModuleDocument {
            options,
            env,
            recipes,
            ..
        } = document;
        self.options
            .extend(options.into_iter().map(|option| (source_index, option)));
        self.env
            .extend(env.into_iter().map(|decl| (source_index, decl)));
        self.recipes
            .extend(recipes.into_iter().map(|recipe| (source_index, recipe)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.iter().any(|source| source.name == name)
    }

    pub fn contains_folder(&self, folder: &Path) -> bool {
        self.sources
            .iter()
            .any(|source| source.folder.as_deref() == Some(folder))
    }

    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.sources.iter()
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn options(&self) -> impl Iterator<Item = SourceItem<'_, OptionDecl>> {
        self.options
            .iter()
            .map(|(source_index, option)| (&self.sources[*source_index], option))
    }

    pub fn env(&self) -> impl Iterator<Item = SourceItem<'_, EnvDecl>> {
        self.env
            .iter()
            .map(|(source_index, decl)| (&self.sources[*source_index], decl))
    }

    pub fn recipes(&self) -> impl Iterator<Item = SourceItem<'_, Recipe>> {
        self.recipes
            .iter()
            .map(|(source_index, recipe)| (&self.sources[*source_index], recipe))
    }

    /// `elements` sub-folder of every module folder, in load order
    pub fn elements_path(&self) -> Vec<PathBuf> {
        self.sources
            .iter()
            .filter_map(|source| source.folder.as_ref())
            .map(|folder| folder.join(ELEMENTS_FOLDER))
            .collect()
    }
}

/// Finds modules on the search path, validates and loads their documents
#[derive(Debug)]
pub struct ModuleLoader {
    search_path: Vec<PathBuf>,
    validator: SchemaValidator,
}

impl ModuleLoader {
    pub fn new(search_path: Vec<PathBuf>) -> Result<Self, LoadError> {
        Ok(Self {
            search_path,
            validator: SchemaValidator::new()?,
        })
    }

    /// Resource folder of module `name`
    ///
    /// Tries `<dir>/<name>` then `<dir>/<name with '.' as '/'>` for each search directory.
    pub fn locate(&self, name: &str) -> Result<PathBuf, LoadError> {
        let nested = name.replace('.', "/");

        for dir in &self.search_path {
            for candidate in [dir.join(name), dir.join(&nested)] {
                if candidate.is_dir() {
                    return candidate.canonicalize().map_err(|source| LoadError::Io {
                        path: candidate.clone(),
                        source,
                    });
                }
            }
        }

        Err(LoadError::ModuleNotFound {
            name: name.to_string(),
            searched: self.search_path.clone(),
        })
    }

    /// Load module `name` followed by the modules it references
    ///
    /// Modules already part of `set`, by name or by folder, are skipped, so each module is loaded
    /// once and keeps the position of its first reference.
    pub fn load_module(&self, set: &mut ModuleSet, name: &str) -> Result<(), LoadError> {
        if set.contains(name) {
            tracing::debug!(module = name, "already loaded");
            return Ok(());
        }

        let folder = self.locate(name)?;
        if set.contains_folder(&folder) {
            tracing::debug!(module = name, folder = %folder.display(), "folder already loaded");
            return Ok(());
        }
        tracing::info!(module = name, folder = %folder.display(), "loading module");

        let document_path = folder.join(MODULE_DOCUMENT);
        let (document, document_path) = if document_path.is_file() {
            (self.read_document(&document_path)?, Some(document_path))
        } else {
            tracing::debug!(module = name, "no module document, contributing elements only");
            (ModuleDocument::default(), None)
        };

        let children = document.modules.clone();
        set.insert(
            document,
            Source {
                name: name.to_string(),
                folder: Some(folder),
                document: document_path,
            },
        );

        for child in children {
            self.load_module(set, &child.name)?;
        }

        Ok(())
    }

    /// Load a document that is not part of any module folder and the modules it references
    pub fn load_root(&self, set: &mut ModuleSet, path: &Path) -> Result<(), LoadError> {
        tracing::info!(path = %path.display(), "loading root document");
        let document = self.read_document(path)?;

        let children = document.modules.clone();
        set.insert(
            document,
            Source {
                name: path.display().to_string(),
                folder: None,
                document: Some(path.to_path_buf()),
            },
        );

        for child in children {
            self.load_module(set, &child.name)?;
        }

        Ok(())
    }

    fn read_document(&self, path: &Path) -> Result<ModuleDocument, LoadError> {
        let contents = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        self.parse_document(&contents)
            .map_err(|e| e.at(path))
    }

    /// Parse and validate a module document
    ///
    /// Every schema violation is collected before failing.
    pub fn parse_document(&self, contents: &str) -> Result<ModuleDocument, LoadError> {
        let mut raw: serde_json::Value =
            serde_yaml::from_str(contents).map_err(|source| LoadError::Yaml {
                path: PathBuf::new(),
                source,
            })?;

        // an empty file is an empty document
        if raw.is_null() {
            raw = serde_json::Value::Object(Default::default());
        }

        let issues = self.validator.validate(&raw);
        if !issues.is_empty() {
            return Err(LoadError::InvalidConfiguration {
                path: PathBuf::new(),
                issues,
            });
        }

        serde_json::from_value(raw).map_err(|source| LoadError::Document {
            path: PathBuf::new(),
            source,
        })
    }
}

/// Module document schema (draft 7), compiled once per loader
pub struct SchemaValidator {
    validator: jsonschema::Validator,
}

impl SchemaValidator {
    pub fn new() -> Result<Self, LoadError> {
        let schema: serde_json::Value = serde_yaml::from_str(include_str!("schema_config.yaml"))
            .map_err(|e| LoadError::Schema(e.to_string()))?;

        let validator = jsonschema::options()
            .with_draft(jsonschema::Draft::Draft7)
            .build(&schema)
            .map_err(|e| LoadError::Schema(e.to_string()))?;

        Ok(Self { validator })
    }

    pub fn validate(&self, document: &serde_json::Value) -> ConfigIssues {
        let mut issues = ConfigIssues::new();

        for error in self.validator.iter_errors(document) {
            let pointer = error.instance_path.to_string();
            let path = pointer.trim_start_matches('/').replace('/', ".");

            issues.log(Issue {
                path: if path.is_empty() { ".".to_string() } else { path },
                message: error.to_string(),
            });
        }

        issues
    }
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator").finish_non_exhaustive()
    }
}

#[derive(derive_new::new, Debug, Default, PartialEq)]
pub struct ConfigIssues {
    #[new(default)]
    issues: Vec<Issue>,
}

impl ConfigIssues {
    pub fn log(&mut self, issue: Issue) {
        tracing::trace!(?issue, "issue found");
        self.issues.push(issue);
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Issue> {
        self.issues.iter()
    }
}

impl std::fmt::Display for ConfigIssues {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for issue in &self.issues {
            writeln!(f, "{issue}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Issue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let message = self.message.replace('\n', "\n  ");
        write!(f, "* {message}\n  at {}", self.path)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LoadError {
    #[error("module {name} not found in {searched:?}")]
    ModuleNotFound { name: String, searched: Vec<PathBuf> },
    #[error("IO error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("unable to parse yaml document {path}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid configuration ({} error(s)) in {path}\n{issues}", .issues.len())]
    InvalidConfiguration { path: PathBuf, issues: ConfigIssues },
    #[error("unable to decode module document {path}")]
    Document {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("module document schema is unusable: {0}")]
    Schema(String),
}

impl LoadError {
    /// Attach the document path to an error raised while parsing its contents
    fn at(self, document: &Path) -> Self {
        let document = document.to_path_buf();
        match self {
            LoadError::Yaml { source, .. } => LoadError::Yaml {
                path: document,
                source,
            },
            LoadError::InvalidConfiguration { issues, .. } => LoadError::InvalidConfiguration {
                path: document,
                issues,
            },
            LoadError::Document { source, .. } => LoadError::Document {
                path: document,
                source,
            },
            other => other,
        }
    }
}

/// Utility macro to create a [ModuleSet] from inline yaml documents (no schema validation)
///
/// ```
/// # use kiln::module_set;
/// let set = module_set! {
///   "base" => "options: [{name: release, kind: var, default: jammy}]",
///   "extra" => "recipes: [{packages: [vim]}]"
/// };
/// assert_eq!(set.source_count(), 2);
/// ```
///
/// # Panic
/// Panics on invalid input
///
/// ```should_panic
/// # use kiln::module_set;
/// module_set! { "broken" => "options: 42" };
/// ```
#[macro_export]
macro_rules! module_set {
    { $($name:expr => $yaml:expr),+ $(,)? } => {{
        let mut set = $crate::module_set::ModuleSet::default();
        $(
            set.insert(
                serde_yaml::from_str($yaml).expect("document must parse"),
                $crate::module_set::Source { name: $name.to_string(), folder: None, document: None },
            );
        )+

        set
    }};
}
