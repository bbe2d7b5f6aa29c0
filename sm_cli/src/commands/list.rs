//! `serviceman list`.

use console::style;

use sm_core::Service;
use sm_io::{home_dir, is_privileged, native};

use super::ScopeArgs;
use crate::display::format_list;
use crate::exit::{Exit, OrExit, USAGE};

pub async fn run(all: bool, scope: &ScopeArgs) -> Result<(), Exit> {
    let privileged = is_privileged();
    let (system, _) = scope.resolve(privileged);
    let svc = Service {
        system,
        home: home_dir(),
        ..Default::default()
    };

    let result = native(privileged).list(&svc).await.or_exit(USAGE)?;
    for err in &result.errors {
        eprintln!("{} {}", style("possible error:").yellow(), err);
    }
    print!("{}", format_list(&result, all));
    Ok(())
}
