//! Uploading text content to a remote path.
//!
//! Content travels through the remote shell as a single-quoted argument, so
//! it must be text. The written file is replaced, never appended to, so
//! re-applying the same content leaves exactly one copy.

use crate::effector::{CommandOutput, Session};
use crate::error::{Error, Result};
use crate::shell::{AND, quote, sudo_prefix};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

static MODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[012467]{3}$").expect("valid permission mode pattern"));

/// A validated three-digit octal permission mode such as `644`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FileMode(String);

impl FileMode {
    /// Validate a mode string; each digit must be one of 0, 1, 2, 4, 6, 7.
    pub fn parse(mode: &str) -> Result<Self> {
        if MODE_PATTERN.is_match(mode) {
            Ok(Self(mode.to_string()))
        } else {
            Err(Error::InvalidPermission(mode.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FileMode {
    fn default() -> Self {
        Self("644".to_string())
    }
}

impl TryFrom<String> for FileMode {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<FileMode> for String {
    fn from(mode: FileMode) -> Self {
        mode.0
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A file to place on a remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub path: String,
    pub content: String,
    pub mode: FileMode,
    pub use_sudo: bool,
}

impl RemoteFile {
    /// Describe a file, validating the mode before anything touches the network.
    pub fn new(
        path: impl Into<String>,
        content: impl Into<String>,
        mode: &str,
        use_sudo: bool,
    ) -> Result<Self> {
        Ok(Self {
            path: path.into(),
            content: content.into(),
            mode: FileMode::parse(mode)?,
            use_sudo,
        })
    }

    fn parent(&self) -> Option<&str> {
        match self.path.rsplit_once('/') {
            Some(("", _)) | None => None,
            Some((dir, _)) => Some(dir),
        }
    }

    /// Shell command that creates parent directories, replaces the file and sets its mode.
    pub fn write_command(&self) -> String {
        let sudo = sudo_prefix(self.use_sudo);
        let path = quote(&self.path);
        let mut steps = Vec::with_capacity(4);
        if let Some(dir) = self.parent() {
            steps.push(format!("{sudo}mkdir -p {}", quote(dir)));
        }
        steps.push(format!("{sudo}rm -f {path}"));
        steps.push(format!(
            "printf '%s' {} | {sudo}tee {path} > /dev/null",
            quote(&self.content)
        ));
        steps.push(format!("{sudo}chmod {} {path}", self.mode));
        steps.join(AND)
    }

    /// Shell command that removes the file; succeeds when it is already gone.
    pub fn remove_command(&self) -> String {
        format!("{}rm -f {}", sudo_prefix(self.use_sudo), quote(&self.path))
    }
}

/// Write `content` to `remote_path` with `mode` over an open session.
///
/// The mode is validated before any command is sent.
pub fn upload_content(
    session: &mut dyn Session,
    content: &str,
    remote_path: &str,
    mode: &str,
    use_sudo: bool,
) -> Result<CommandOutput> {
    let file = RemoteFile::new(remote_path, content, mode, use_sudo)?;
    log::debug!("[{}] writing {} (mode {})", session.host(), file.path, file.mode);
    session.run(&file.write_command())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalSession;
    use crate::mock::MockEffector;
    use crate::{Effector, SshConnection};

    #[test]
    fn test_mode_validation() {
        for ok in ["644", "600", "740", "777", "000", "400"] {
            assert!(FileMode::parse(ok).is_ok(), "{ok} should be accepted");
        }
        for bad in ["", "64", "6444", "655", "755", "839", "rwx", "0644", " 644"] {
            assert!(
                matches!(FileMode::parse(bad), Err(Error::InvalidPermission(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn test_invalid_mode_rejected_before_any_exec() {
        let mock = MockEffector::new();
        let conn = SshConnection::with_password("10.0.0.5", "root", "x");
        let mut session = mock.connect(&conn).unwrap();

        let err = upload_content(session.as_mut(), "data", "/etc/x.conf", "659", false).unwrap_err();
        assert!(matches!(err, Error::InvalidPermission(_)));
        assert!(mock.exec_calls().is_empty());
    }

    #[test]
    fn test_mode_deserialization_validates() {
        assert!(serde_json::from_str::<FileMode>("\"600\"").is_ok());
        assert!(serde_json::from_str::<FileMode>("\"999\"").is_err());
    }

    #[test]
    fn test_write_command_shape() {
        let file = RemoteFile::new("/etc/sudoers.d/ops", "ops ALL=(ALL) NOPASSWD:ALL", "440", true)
            .unwrap();
        let cmd = file.write_command();
        let steps: Vec<&str> = cmd.split(" && ").collect();
        assert_eq!(steps.len(), 4);
        assert_eq!(steps[0], "sudo mkdir -p '/etc/sudoers.d'");
        assert_eq!(steps[1], "sudo rm -f '/etc/sudoers.d/ops'");
        assert!(steps[2].ends_with("| sudo tee '/etc/sudoers.d/ops' > /dev/null"));
        assert_eq!(steps[3], "sudo chmod 440 '/etc/sudoers.d/ops'");
        assert_eq!(file.remove_command(), "sudo rm -f '/etc/sudoers.d/ops'");
    }

    #[test]
    fn test_single_quote_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/file.txt");
        let path = path.to_str().unwrap();

        let mut session = LocalSession;
        upload_content(&mut session, "it's a test", path, "644", false).unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "it's a test");
    }

    #[test]
    fn test_reupload_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        let path = path.to_str().unwrap();

        let mut session = LocalSession;
        upload_content(&mut session, "first", path, "600", false).unwrap();
        upload_content(&mut session, "second", path, "600", false).unwrap();

        assert_eq!(std::fs::read_to_string(path).unwrap(), "second");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
