use anyhow::Result;
use std::path::Path;

use crate::config::FreightDeskConfig;

pub struct InitConfigCommand {
    pub path: String,
    pub force: bool,
}

impl InitConfigCommand {
    pub fn new(path: String, force: bool) -> Self {
        Self { path, force }
    }

    pub async fn execute(&self) -> Result<()> {
        let path = Path::new(&self.path);
        if path.exists() && !self.force {
            println!("⚠️  {} already exists", self.path);
            println!("   💡 Use --force to overwrite it with defaults");
            anyhow::bail!("configuration file {} already exists", self.path);
        }

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir).await?;
        }
        FreightDeskConfig::default().save_to_file(path)?;

        println!("⚙️  Wrote default configuration to {}", self.path);
        println!("   📦 Snapshot store: .freight-desk/state.json");
        println!("   💡 Add a [database] section to use SQLite instead");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refuses_to_overwrite_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("desk").join("freight-desk.toml");
        let path_str = path.to_string_lossy().to_string();

        InitConfigCommand::new(path_str.clone(), false)
            .execute()
            .await
            .unwrap();
        assert!(InitConfigCommand::new(path_str.clone(), false)
            .execute()
            .await
            .is_err());
        InitConfigCommand::new(path_str, true).execute().await.unwrap();
        assert!(path.exists());
    }
}
