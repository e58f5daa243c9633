//! string templates in module documents
//!
//! Package names, element names and environment values are HCL templates evaluated against the
//! resolved variables:
//!
//! ```yaml
//! packages: ["linux-image-${kernel_flavour}"]
//! env:
//!   - name: DIB_RELEASE
//!     value: "%{ if release == \"lts\" }jammy%{ else }${release}%{ endif }"
//! ```
//!
//! `regex_replace(value, pattern, replacement)` is available in addition to the hcl built-ins.
use hcl::eval::{Context, Evaluate, FuncArgs, FuncDef, ParamType};
use indexmap::IndexMap;

/// Template evaluation bound to one set of variables
pub struct TemplateExpander {
    context: Context<'static>,
}

impl TemplateExpander {
    pub fn new(vars: &IndexMap<String, String>) -> Self {
        let mut context = Context::new();

        for (name, value) in vars {
            context.declare_var(
                hcl::Identifier::sanitized(name),
                hcl::Value::from(value.clone()),
            );
        }

        let regex_replace = FuncDef::builder()
            .param(ParamType::String)
            .param(ParamType::String)
            .param(ParamType::String)
            .build(regex_replace);
        context.declare_func(hcl::Identifier::unchecked("regex_replace"), regex_replace);

        Self { context }
    }

    pub fn expand(&self, template: &str) -> Result<String, TemplateError> {
        if !template.contains("${") && !template.contains("%{") {
            return Ok(template.to_string());
        }

        let parsed: hcl::Template = template.parse().map_err(|source| TemplateError::Parse {
            template: template.to_string(),
            source,
        })?;

        let expanded = parsed
            .evaluate(&self.context)
            .map_err(|source| TemplateError::Evaluate {
                template: template.to_string(),
                source,
            })?;

        tracing::trace!(template, %expanded, "template expanded");
        Ok(expanded)
    }
}

impl std::fmt::Debug for TemplateExpander {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateExpander").finish_non_exhaustive()
    }
}

fn regex_replace(args: FuncArgs) -> Result<hcl::Value, String> {
    let value = args[0].as_str().unwrap_or_default();
    let pattern = args[1].as_str().unwrap_or_default();
    let replacement = args[2].as_str().unwrap_or_default();

    let regex = regex::Regex::new(pattern).map_err(|e| e.to_string())?;
    Ok(regex.replace_all(value, replacement).into_owned().into())
}

#[derive(thiserror::Error, Debug)]
pub enum TemplateError {
    #[error("malformed template {template:?}")]
    Parse {
        template: String,
        #[source]
        source: hcl::Error,
    },
    #[error("unable to expand template {template:?}")]
    Evaluate {
        template: String,
        #[source]
        source: hcl::eval::Error,
    },
}
