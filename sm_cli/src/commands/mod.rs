//! Command implementations for the serviceman CLI.

pub mod add;
pub mod control;
pub mod list;
pub mod run;

use clap::Args;

use sm_core::Service;
use sm_io::home_dir;

use crate::exit::{Exit, NORMALIZE, OrExit};

/// `--system` / `--user`, shared by every command that touches installed
/// services.
#[derive(Args, Clone, Debug, Default, PartialEq, Eq)]
pub struct ScopeArgs {
    /// Act on a system service, even as an unprivileged user
    #[arg(long, conflicts_with = "user")]
    pub system: bool,

    /// Act on a user service, even when privileged
    #[arg(long)]
    pub user: bool,
}

impl ScopeArgs {
    /// Whether to act on system scope, and the flag that was assumed if
    /// neither was given.
    pub fn resolve(&self, privileged: bool) -> (bool, Option<&'static str>) {
        if self.system {
            (true, None)
        } else if self.user {
            (false, None)
        } else if privileged {
            (true, Some("--system"))
        } else {
            (false, Some("--user"))
        }
    }
}

/// A descriptor that only names a service, for start/stop/list.
pub(crate) fn lookup_service(name: &str, system: bool) -> Result<Service, Exit> {
    let mut svc = Service {
        name: name.to_string(),
        exec: name.to_string(),
        system,
        ..Default::default()
    };
    svc.normalize_without_path(home_dir()).or_exit(NORMALIZE)?;
    Ok(svc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_flags_win_over_privilege() {
        let system = ScopeArgs {
            system: true,
            user: false,
        };
        assert_eq!(system.resolve(false), (true, None));

        let user = ScopeArgs {
            system: false,
            user: true,
        };
        assert_eq!(user.resolve(true), (false, None));
    }

    #[test]
    fn privilege_decides_when_unspecified() {
        let none = ScopeArgs::default();
        assert_eq!(none.resolve(true), (true, Some("--system")));
        assert_eq!(none.resolve(false), (false, Some("--user")));
    }
}
