use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::debug;

use super::UnitRecord;
use crate::error::{Result, WardenError};

/// YAML-file-per-unit persistence for the unit-record set. The
/// orchestrator is the only writer; external consumers read through
/// `load_all`.
pub struct UnitStore {
    units_dir: PathBuf,
}

impl UnitStore {
    pub fn new(root: &Path) -> Self {
        Self {
            units_dir: root.join("units"),
        }
    }

    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(&self.units_dir).await?;
        self.recover_interrupted_writes().await;
        Ok(())
    }

    pub async fn save(&self, unit: &UnitRecord) -> Result<()> {
        let path = self.unit_path(&unit.id);
        let content = serde_yaml_bw::to_string(unit)?;
        self.write_atomic(&path, &content).await
    }

    pub async fn save_all(&self, units: &[UnitRecord]) -> Result<()> {
        for unit in units {
            self.save(unit).await?;
        }
        Ok(())
    }

    async fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        let tmp_path = path.with_extension("yaml.tmp");
        fs::write(&tmp_path, content).await?;
        fs::rename(&tmp_path, path).await?;
        debug!(path = %path.display(), "Unit record written");
        Ok(())
    }

    async fn recover_interrupted_writes(&self) {
        if let Ok(mut entries) = fs::read_dir(&self.units_dir).await {
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.extension().is_some_and(|ext| ext == "tmp") {
                    debug!(path = %path.display(), "Removing interrupted write");
                    let _ = fs::remove_file(&path).await;
                }
            }
        }
    }

    pub async fn load(&self, unit_id: &str) -> Result<UnitRecord> {
        let path = self.unit_path(unit_id);
        if !path.exists() {
            return Err(WardenError::UnitNotFound(unit_id.to_string()));
        }
        let content = fs::read_to_string(&path).await?;
        let unit: UnitRecord = serde_yaml_bw::from_str(&content)?;
        Ok(unit)
    }

    /// Loads every persisted unit, oldest first, so registry insertion
    /// order (and with it dependency tie-breaking) survives restarts.
    pub async fn load_all(&self) -> Result<Vec<UnitRecord>> {
        let mut units = Vec::new();

        if !self.units_dir.exists() {
            return Ok(units);
        }

        let mut entries = fs::read_dir(&self.units_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "yaml") {
                let content = fs::read_to_string(&path).await?;
                match serde_yaml_bw::from_str::<UnitRecord>(&content) {
                    Ok(unit) => units.push(unit),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable unit record")
                    }
                }
            }
        }

        units.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(units)
    }

    pub async fn delete(&self, unit_id: &str) -> Result<()> {
        let path = self.unit_path(unit_id);
        if path.exists() {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }

    pub fn exists(&self, unit_id: &str) -> bool {
        self.unit_path(unit_id).exists()
    }

    fn unit_path(&self, unit_id: &str) -> PathBuf {
        self.units_dir.join(format!("{}.yaml", unit_id))
    }
}
