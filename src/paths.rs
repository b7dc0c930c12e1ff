//! Where tierstack looks for stack files and keeps state
//!
//! Each directory is resolved in order from:
//! 1. its `TIERSTACK_*_DIR` override (`~` and `$VAR` are expanded)
//! 2. the matching XDG base directory, plus `tierstack`
//! 3. `~/.config/tierstack` or `~/.local/state/tierstack`

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_DIR: &str = "TIERSTACK_CONFIG_DIR";
pub const ENV_STATE_DIR: &str = "TIERSTACK_STATE_DIR";

const APP_DIR: &str = "tierstack";

/// Stack file looked up in the config directory when `--stack` is absent
pub const STACK_FILE: &str = "stack.toml";

/// One base directory and the ways it can be located
struct Location {
    override_var: &'static str,
    xdg_var: &'static str,
    home_relative: &'static [&'static str],
}

const CONFIG: Location = Location {
    override_var: ENV_CONFIG_DIR,
    xdg_var: "XDG_CONFIG_HOME",
    home_relative: &[".config"],
};

const STATE: Location = Location {
    override_var: ENV_STATE_DIR,
    xdg_var: "XDG_STATE_HOME",
    home_relative: &[".local", "state"],
};

impl Location {
    fn resolve(&self) -> Result<PathBuf> {
        if let Ok(dir) = std::env::var(self.override_var) {
            let path = expand(&dir);
            log::debug!("{} set, using {}", self.override_var, path.display());
            return Ok(path);
        }
        if let Some(base) = std::env::var_os(self.xdg_var).filter(|v| !v.is_empty()) {
            return Ok(PathBuf::from(base).join(APP_DIR));
        }

        let mut path = dirs::home_dir().context("Could not determine home directory")?;
        path.extend(self.home_relative);
        path.push(APP_DIR);
        log::debug!("Falling back to {}", path.display());
        Ok(path)
    }
}

pub fn config_dir() -> Result<PathBuf> {
    CONFIG.resolve()
}

pub fn state_dir() -> Result<PathBuf> {
    STATE.resolve()
}

/// Stack file to load: `--stack` if given, else `<config dir>/stack.toml`
pub fn stack_file(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) => Ok(expand(&path.to_string_lossy())),
        None => Ok(config_dir()?.join(STACK_FILE)),
    }
}

/// Snapshot of recorded resources for one stack
pub fn state_file(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("{stack}.state.json"))
}

/// Simulated cloud inventory for one stack
pub fn cloud_file(dir: &Path, stack: &str) -> PathBuf {
    dir.join(format!("{stack}.cloud.json"))
}

/// Expand `~` and `$VAR`; unknown variables leave the input untouched
pub fn expand(path: &str) -> PathBuf {
    match shellexpand::full(path) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(path),
    }
}
