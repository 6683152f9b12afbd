use anyhow::Result;
use std::path::PathBuf;

pub const TERMRUN_DIR_NAME: &str = ".termrun";
pub const CONFIG_FILE_NAME: &str = "config.yaml";

pub fn termrun_home() -> Result<PathBuf> {
    if let Ok(override_home) = std::env::var("TERMRUN_HOME") {
        let trimmed = override_home.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }
    Ok(dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("No home directory found"))?
        .join(TERMRUN_DIR_NAME))
}

pub fn config_file() -> Result<PathBuf> {
    Ok(termrun_home()?.join(CONFIG_FILE_NAME))
}
