use std::fs;
use std::path::PathBuf;
use directories::ProjectDirs;
use crate::common::error::{GateError, Result};

pub enum RunMode {
    Development(PathBuf), // Base directory for dev mode
    User,                 // Platform data directories
}

pub struct Paths {
    mode: RunMode,
}

impl Paths {
    pub fn new(dev: bool) -> Result<Self> {
        if dev {
            let base_dir = PathBuf::from("./dev_data");
            fs::create_dir_all(base_dir.join("templates"))?;
            fs::create_dir_all(base_dir.join("config"))?;
            tracing::info!("Development mode - using local directory: {}", base_dir.display());
            Ok(Self { mode: RunMode::Development(base_dir) })
        } else {
            Ok(Self { mode: RunMode::User })
        }
    }

    pub fn config_file(&self) -> PathBuf {
        match &self.mode {
            RunMode::Development(base) => base.join("config/votergate.toml"),
            RunMode::User => PathBuf::from("configs/votergate.toml"),
        }
    }

    pub fn templates_dir(&self) -> Result<PathBuf> {
        match &self.mode {
            RunMode::Development(base) => Ok(base.join("templates")),
            RunMode::User => {
                let dirs = ProjectDirs::from("org", "votergate", "VoterGate")
                    .ok_or_else(|| GateError::Storage("Failed to get project dirs".into()))?;
                Ok(dirs.data_dir().join("templates"))
            }
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self.mode, RunMode::Development(_))
    }
}
