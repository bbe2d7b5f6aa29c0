pub mod backend;
pub mod config;
pub mod lookup;
pub mod paths;
pub mod privilege;
pub mod process;
pub mod runnable;
pub mod runner;
pub mod traits;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use backend::{Backend, LaunchdBackend, ListResult, SystemdBackend, WindowsBackend, native};
pub use config::{load_config, render_config, save_config};
pub use lookup::{ResolvedCommand, absolutize_path_args, find_exec, resolve_command};
pub use paths::home_dir;
pub use privilege::{adjust_privileges, is_privileged};
pub use runnable::{Runnable, render_all, run_all};
pub use traits::{CommandOutput, CommandRunner, SystemCommandRunner};
