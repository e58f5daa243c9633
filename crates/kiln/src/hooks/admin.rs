use crate::distro::UserSpec;
use crate::hooks::{Flow, HookResult};
use crate::provision::ProvisionContext;

#[derive(Debug, Clone, PartialEq, serde::Deserialize)]
struct AdminConfig {
    #[serde(default = "default_username")]
    username: String,
    #[serde(default)]
    keys: Vec<String>,
    passwd: Option<String>,
}

fn default_username() -> String {
    "admin".to_string()
}

impl From<AdminConfig> for UserSpec {
    fn from(admin: AdminConfig) -> Self {
        UserSpec {
            name: admin.username,
            authorized_keys: admin.keys,
            password: admin.passwd,
            groups: vec!["wheel".to_string()],
            shell: "/bin/bash".to_string(),
            sudo: Some("ALL=(ALL) NOPASSWD:ALL".to_string()),
        }
    }
}

pub(super) fn configure(context: &mut ProvisionContext) -> HookResult {
    let Some(admin) = context.conf.get("admin") else {
        return Ok(Flow::Continue);
    };
    let admin: AdminConfig = admin.deserialize_into()?;

    context.distro.create_user(&admin.into())?;
    Ok(Flow::Continue)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::value::Value;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults() {
        let admin: AdminConfig = Value::from_yaml_str("keys: [ssh-rsa AAAA]")
            .unwrap()
            .deserialize_into()
            .unwrap();

        assert_eq!(
            UserSpec::from(admin),
            UserSpec {
                name: "admin".into(),
                authorized_keys: vec!["ssh-rsa AAAA".into()],
                password: None,
                groups: vec!["wheel".into()],
                shell: "/bin/bash".into(),
                sudo: Some("ALL=(ALL) NOPASSWD:ALL".into()),
            }
        );
    }
}
