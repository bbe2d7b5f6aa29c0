//! The JSON form of a service descriptor, as read by `serviceman run`.

use std::fs;
use std::path::Path;

use sm_core::{Error, Service};

/// Load a descriptor. A missing `restart` key means `true`.
pub fn load_config(path: &Path) -> Result<Service, Error> {
    let text = fs::read_to_string(path).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_config(path, &text)
}

fn parse_config(path: &Path, text: &str) -> Result<Service, Error> {
    let svc: Service = serde_json::from_str(text).map_err(|e| Error::Config {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    if svc.exec.trim().is_empty() {
        return Err(Error::Config {
            path: path.to_path_buf(),
            message: "missing 'exec'".to_string(),
        });
    }
    Ok(svc)
}

pub fn render_config(svc: &Service) -> Result<String, Error> {
    serde_json::to_string_pretty(svc).map_err(|e| Error::io("failed to serialize service", e))
}

pub fn save_config(path: &Path, svc: &Service) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(format!("failed to create {}", parent.display()), e))?;
    }
    let text = render_config(svc)?;
    fs::write(path, text).map_err(|e| Error::io(format!("failed to write {}", path.display()), e))
}
