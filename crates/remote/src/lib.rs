//! # Remote
//!
//! Effectors that perform one imperative action against a remote host, and
//! the retry/poll primitives layered over them.
//!
//! ## Core Concepts
//!
//! - **Effector**: opens a [`Session`] to a host ([`SshEffector`], [`LocalEffector`], [`MockEffector`])
//! - **Session**: runs one shell command at a time and returns raw output
//! - **ApiClient**: token-authenticated JSON API calls over HTTPS
//! - **Retry/Poll**: [`wait_until_reachable`], [`reboot_and_wait`], [`wait_for_condition`]
//!
//! ## Example
//!
//! ```no_run
//! use remote::{Effector, SshConnection, SshEffector, upload_content};
//!
//! let conn = SshConnection::with_password("10.0.0.5", "root", "secret");
//! let mut session = SshEffector::new().connect(&conn)?;
//! let out = session.run("pveversion")?;
//! println!("{}", out.stdout);
//!
//! upload_content(session.as_mut(), "vfio\n", "/etc/modules-load.d/vfio.conf", "644", false)?;
//! # Ok::<(), remote::Error>(())
//! ```
//!
//! Nothing in this crate is idempotent by construction. Commands must be
//! written so that re-running them converges (`mkdir -p`, `rm -f` before
//! writing, and so on).

pub mod api;
pub mod connection;
pub mod effector;
pub mod error;
pub mod file;
pub mod local;
pub mod mock;
pub mod retry;
pub mod shell;
pub mod ssh;

pub use api::ApiClient;
pub use connection::{ApiConnection, Credential, SshConnection};
pub use effector::{CommandOutput, Effector, Session};
pub use error::{ConnectionFailure, Error, ErrorCategory, Result};
pub use file::{FileMode, RemoteFile, upload_content};
pub use local::LocalEffector;
pub use mock::{ExecRecord, MockEffector};
pub use retry::{
    PollCondition, ReachabilityConfig, RebootConfig, poll_until, reboot_and_wait,
    wait_for_condition, wait_until_reachable,
};
pub use ssh::SshEffector;
