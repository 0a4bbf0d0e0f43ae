//! API users and tokens, managed with `pveum` over SSH.

use anyhow::{Context, Result};
use declarative::{Created, Provider, Removal, UpdateStrategy};
use remote::shell::{self, sudo_prefix};
use remote::{Effector, Error, SshConnection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

fn default_role() -> String {
    "Administrator".to_string()
}

fn default_token_name() -> String {
    "provider".to_string()
}

/// Whether `pveum` failed because the object is already gone.
fn is_absent(err: &Error) -> bool {
    match err {
        Error::RemoteCommand { stdout, stderr, .. } => [stdout, stderr]
            .iter()
            .any(|s| s.contains("does not exist") || s.contains("no such")),
        _ => false,
    }
}

fn removal(result: remote::Result<remote::CommandOutput>, what: &str) -> Result<Removal> {
    match result {
        Ok(_) => Ok(Removal::Removed),
        Err(e) if is_absent(&e) => {
            log::debug!("{what} already removed");
            Ok(Removal::AlreadyAbsent)
        }
        Err(e) => Err(e).with_context(|| format!("Failed to remove {what}")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiUserInputs {
    pub connection: SshConnection,
    pub username: String,
    /// Authentication realm, e.g. `pve` or `pam`.
    pub realm: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub use_sudo: bool,
}

impl ApiUserInputs {
    pub fn userid(&self) -> String {
        format!("{}@{}", self.username, self.realm)
    }

    fn acl_command(&self) -> String {
        format!("pveum aclmod / -users {} -roles {}", self.userid(), self.role)
    }

    fn revoke_command(&self) -> String {
        format!("pveum acldel / -users {} -roles {}", self.userid(), self.role)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiUserOutputs {
    pub userid: String,
}

/// A Proxmox user with a role on `/`.
pub struct ApiUserProvider {
    effector: Arc<dyn Effector>,
}

impl ApiUserProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }
}

impl Provider for ApiUserProvider {
    type Inputs = ApiUserInputs;
    type Outputs = ApiUserOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:user"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("user {} ({})", inputs.userid(), inputs.role)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let userid = inputs.userid();
        let command = shell::chain(
            &[format!("pveum user add {userid}"), inputs.acl_command()],
            inputs.use_sudo,
        );
        self.effector
            .run(&inputs.connection, &command)
            .with_context(|| format!("Failed to create user {userid}"))?;
        Ok(Created::new(userid.clone(), ApiUserOutputs { userid }))
    }

    /// A role change swaps the ACL entry on `/`; the user is kept.
    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        if old.connection == new.connection && old.userid() == new.userid() {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        if self.update_strategy(old, new) == UpdateStrategy::Replace {
            self.delete(id, old, old_outputs)?;
            return self.create(new);
        }
        let mut steps = Vec::with_capacity(2);
        if old.role != new.role {
            steps.push(old.revoke_command());
        }
        steps.push(new.acl_command());
        let command = shell::chain(&steps, new.use_sudo);
        self.effector
            .run(&new.connection, &command)
            .with_context(|| format!("Failed to change the role of {id}"))?;
        Ok(Created::new(id, old_outputs.clone()))
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, outputs: &Self::Outputs) -> Result<Removal> {
        let command = format!("{}pveum user delete {}", sudo_prefix(inputs.use_sudo), outputs.userid);
        removal(
            self.effector.run(&inputs.connection, &command),
            &format!("user {}", outputs.userid),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiTokenInputs {
    pub connection: SshConnection,
    /// Owner, e.g. `automation@pve`.
    pub userid: String,
    #[serde(default = "default_token_name")]
    pub token_name: String,
    /// Restrict the token to a subset of the user's privileges.
    #[serde(default)]
    pub privsep: bool,
    /// Expiry as a unix timestamp; 0 never expires.
    #[serde(default)]
    pub expire: u64,
    #[serde(default)]
    pub use_sudo: bool,
}

impl ApiTokenInputs {
    fn options(&self) -> String {
        format!("--privsep={} --expire {}", u8::from(self.privsep), self.expire)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiTokenOutputs {
    /// `user@realm!token`.
    pub token_id: String,
    pub value: String,
}

/// Secret from `pveum user token add --output-format json`.
pub fn parse_token_value(stdout: &str) -> remote::Result<String> {
    let reply: Value = serde_json::from_str(stdout.trim())
        .map_err(|e| Error::malformed("pveum user token add", e.to_string()))?;
    reply
        .get("value")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::malformed("pveum user token add", "no \"value\" field"))
}

/// An API token whose secret is only available from the create call.
pub struct ApiTokenProvider {
    effector: Arc<dyn Effector>,
}

impl ApiTokenProvider {
    pub fn new(effector: Arc<dyn Effector>) -> Self {
        Self { effector }
    }
}

impl Provider for ApiTokenProvider {
    type Inputs = ApiTokenInputs;
    type Outputs = ApiTokenOutputs;

    fn resource_type(&self) -> &'static str {
        "proxmox:token"
    }

    fn describe(&self, inputs: &Self::Inputs) -> String {
        format!("token {}!{}", inputs.userid, inputs.token_name)
    }

    fn create(&self, inputs: &Self::Inputs) -> Result<Created<Self::Outputs>> {
        let command = format!(
            "{}pveum user token add {} {} {} --output-format json",
            sudo_prefix(inputs.use_sudo),
            inputs.userid,
            inputs.token_name,
            inputs.options()
        );
        let out = self.effector.run(&inputs.connection, &command)?;
        let value = parse_token_value(&out.stdout)?;
        let token_id = format!("{}!{}", inputs.userid, inputs.token_name);
        Ok(Created::new(token_id.clone(), ApiTokenOutputs { token_id, value }))
    }

    /// Expiry and privilege separation change in place; the secret survives.
    fn update_strategy(&self, old: &Self::Inputs, new: &Self::Inputs) -> UpdateStrategy {
        if old.connection == new.connection
            && old.userid == new.userid
            && old.token_name == new.token_name
        {
            UpdateStrategy::InPlace
        } else {
            UpdateStrategy::Replace
        }
    }

    fn update(
        &self,
        id: &str,
        old: &Self::Inputs,
        old_outputs: &Self::Outputs,
        new: &Self::Inputs,
    ) -> Result<Created<Self::Outputs>> {
        if self.update_strategy(old, new) == UpdateStrategy::Replace {
            self.delete(id, old, old_outputs)?;
            return self.create(new);
        }
        let command = format!(
            "{}pveum user token modify {} {} {}",
            sudo_prefix(new.use_sudo),
            new.userid,
            new.token_name,
            new.options()
        );
        self.effector.run(&new.connection, &command)?;
        Ok(Created::new(id, old_outputs.clone()))
    }

    fn delete(&self, _id: &str, inputs: &Self::Inputs, outputs: &Self::Outputs) -> Result<Removal> {
        let command = format!(
            "{}pveum user token remove {} {}",
            sudo_prefix(inputs.use_sudo),
            inputs.userid,
            inputs.token_name
        );
        removal(
            self.effector.run(&inputs.connection, &command),
            &format!("token {}", outputs.token_id),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remote::{CommandOutput, MockEffector};

    const TOKEN_JSON: &str = r#"{"full-tokenid":"automation@pve!provider","info":{"privsep":"0"},"value":"0b6c1e5e-8c1f-4d55-a2a6-3f7f2d9a1c11"}"#;

    fn conn() -> SshConnection {
        SshConnection::with_password("10.0.0.2", "automation", "x")
    }

    fn user() -> ApiUserInputs {
        ApiUserInputs {
            connection: conn(),
            username: "automation".into(),
            realm: "pve".into(),
            role: default_role(),
            use_sudo: true,
        }
    }

    fn token() -> ApiTokenInputs {
        ApiTokenInputs {
            connection: conn(),
            userid: "automation@pve".into(),
            token_name: "provider".into(),
            privsep: false,
            expire: 0,
            use_sudo: true,
        }
    }

    #[test]
    fn test_user_create_grants_role() {
        let mock = MockEffector::new();
        let provider = ApiUserProvider::new(Arc::new(mock.clone()));
        let created = provider.create(&user()).unwrap();
        assert_eq!(created.id, "automation@pve");
        assert_eq!(
            mock.commands(),
            vec![
                "sudo pveum user add automation@pve && sudo pveum aclmod / -users automation@pve -roles Administrator"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_user_role_change_is_in_place() {
        let mock = MockEffector::new();
        let provider = ApiUserProvider::new(Arc::new(mock.clone()));
        let mut auditor = user();
        auditor.role = "PVEAuditor".into();
        assert_eq!(provider.update_strategy(&user(), &auditor), UpdateStrategy::InPlace);

        let outputs = ApiUserOutputs {
            userid: "automation@pve".into(),
        };
        provider.update("automation@pve", &user(), &outputs, &auditor).unwrap();
        assert_eq!(
            mock.commands(),
            vec![
                "sudo pveum acldel / -users automation@pve -roles Administrator && sudo pveum aclmod / -users automation@pve -roles PVEAuditor"
                    .to_string()
            ]
        );
    }

    #[test]
    fn test_user_sudo_change_keeps_role() {
        let mock = MockEffector::new();
        let provider = ApiUserProvider::new(Arc::new(mock.clone()));
        let mut direct = user();
        direct.use_sudo = false;

        let outputs = ApiUserOutputs {
            userid: "automation@pve".into(),
        };
        provider.update("automation@pve", &user(), &outputs, &direct).unwrap();
        assert_eq!(
            mock.commands(),
            vec!["pveum aclmod / -users automation@pve -roles Administrator".to_string()]
        );
    }

    #[test]
    fn test_user_delete_tolerates_missing_user() {
        let mock = MockEffector::new();
        mock.respond(
            "pveum user delete",
            CommandOutput::failed(255, "delete user failed: user 'automation@pve' does not exist\n"),
        );
        let provider = ApiUserProvider::new(Arc::new(mock));
        let outputs = ApiUserOutputs {
            userid: "automation@pve".into(),
        };
        assert_eq!(
            provider.delete("automation@pve", &user(), &outputs).unwrap(),
            Removal::AlreadyAbsent
        );
    }

    #[test]
    fn test_token_value_parsed_from_json() {
        let mock = MockEffector::new();
        mock.respond("pveum user token add", CommandOutput::ok(TOKEN_JSON));
        let provider = ApiTokenProvider::new(Arc::new(mock.clone()));

        let created = provider.create(&token()).unwrap();
        assert_eq!(created.outputs.token_id, "automation@pve!provider");
        assert_eq!(created.outputs.value, "0b6c1e5e-8c1f-4d55-a2a6-3f7f2d9a1c11");
        assert_eq!(
            mock.commands()[0],
            "sudo pveum user token add automation@pve provider --privsep=0 --expire 0 --output-format json"
        );
    }

    #[test]
    fn test_token_without_value_is_malformed() {
        for stdout in [r#"{"full-tokenid":"a@pve!t"}"#, "token created", ""] {
            let mock = MockEffector::new();
            mock.respond("pveum user token add", CommandOutput::ok(stdout));
            let provider = ApiTokenProvider::new(Arc::new(mock));
            let err = provider.create(&token()).unwrap_err();
            assert!(
                matches!(err.downcast_ref::<Error>(), Some(Error::MalformedResponse { .. })),
                "{stdout:?} should be malformed"
            );
        }
    }

    #[test]
    fn test_token_expiry_change_keeps_secret() {
        let mock = MockEffector::new();
        let provider = ApiTokenProvider::new(Arc::new(mock.clone()));
        let outputs = ApiTokenOutputs {
            token_id: "automation@pve!provider".into(),
            value: "secret".into(),
        };
        let mut rotated = token();
        rotated.expire = 1_900_000_000;
        rotated.privsep = true;

        let updated = provider
            .update("automation@pve!provider", &token(), &outputs, &rotated)
            .unwrap();
        assert_eq!(updated.outputs.value, "secret");
        assert_eq!(
            mock.commands(),
            vec!["sudo pveum user token modify automation@pve provider --privsep=1 --expire 1900000000".to_string()]
        );
    }

    #[test]
    fn test_token_rename_replaces() {
        let mock = MockEffector::new();
        mock.respond("pveum user token add", CommandOutput::ok(TOKEN_JSON));
        let provider = ApiTokenProvider::new(Arc::new(mock.clone()));
        let outputs = ApiTokenOutputs {
            token_id: "automation@pve!provider".into(),
            value: "old".into(),
        };
        let mut renamed = token();
        renamed.token_name = "ci".into();

        assert_eq!(provider.update_strategy(&token(), &renamed), UpdateStrategy::Replace);
        provider.update("automation@pve!provider", &token(), &outputs, &renamed).unwrap();
        let commands = mock.commands();
        assert!(commands[0].contains("pveum user token remove automation@pve provider"));
        assert!(commands[1].contains("pveum user token add automation@pve ci"));
    }
}
