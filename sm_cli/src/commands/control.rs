//! `serviceman start|stop|restart`.

use sm_io::{Backend, is_privileged, native};

use super::{ScopeArgs, lookup_service};
use crate::display::{success, warning};
use crate::exit::{Exit, OrExit, START, STOP};

fn backend_for(scope: &ScopeArgs) -> (Box<dyn Backend>, bool) {
    let privileged = is_privileged();
    let (system, _) = scope.resolve(privileged);
    (native(privileged), system)
}

pub async fn start(name: &str, scope: &ScopeArgs) -> Result<(), Exit> {
    let (backend, system) = backend_for(scope);
    let svc = lookup_service(name, system)?;
    backend.start(&svc).await.or_exit(START)?;
    success(&format!("started '{}'", name));
    Ok(())
}

pub async fn stop(name: &str, scope: &ScopeArgs) -> Result<(), Exit> {
    let (backend, system) = backend_for(scope);
    let svc = lookup_service(name, system)?;
    backend.stop(&svc).await.or_exit(STOP)?;
    success(&format!("stopped '{}'", name));
    Ok(())
}

pub async fn restart(name: &str, scope: &ScopeArgs) -> Result<(), Exit> {
    let (backend, system) = backend_for(scope);
    let svc = lookup_service(name, system)?;
    if let Err(e) = backend.stop(&svc).await {
        warning(&format!("could not stop '{}': {}", name, e));
    }
    backend.start(&svc).await.or_exit(START)?;
    success(&format!("restarted '{}'", name));
    Ok(())
}
