//! When and how the active log file is rotated

use std::fs;
use std::path::{Path, PathBuf};

use jiff::Zoned;

use crate::logger::config::{RotationConfig, RotationStrategy, TimeUnit};
use crate::logger::error::LoggerError;

pub struct RotationManager {
    config: RotationConfig,
    last_rotation: Zoned,
}

impl RotationManager {
    pub fn new(config: RotationConfig) -> Self {
        Self {
            config,
            last_rotation: Zoned::now(),
        }
    }

    pub fn should_rotate(&self, current_size: u64) -> bool {
        let size_due = current_size >= self.config.max_size;
        match self.config.strategy {
            RotationStrategy::Size => size_due,
            RotationStrategy::Time(unit) => self.time_due(unit),
            RotationStrategy::Combined => size_due || self.time_due(TimeUnit::Daily),
        }
    }

    fn time_due(&self, unit: TimeUnit) -> bool {
        match self.last_rotation.checked_add(unit.span()) {
            Ok(due) => Zoned::now() >= due,
            Err(_) => false,
        }
    }

    /// Move `active` aside under a timestamped name and prune old files.
    pub fn rotate(&mut self, active: &Path) -> Result<PathBuf, LoggerError> {
        let rotated = Self::rotated_path(active, &Zoned::now());
        if active.exists() {
            fs::rename(active, &rotated).map_err(|e| {
                LoggerError::rotation(format!(
                    "cannot move {} to {}: {}",
                    active.display(),
                    rotated.display(),
                    e
                ))
            })?;
        }
        self.last_rotation = Zoned::now();
        self.prune(active)?;
        Ok(rotated)
    }

    /// `app.log` becomes `app.20261016_101500.123.log`.
    fn rotated_path(active: &Path, at: &Zoned) -> PathBuf {
        let stamp = at.strftime("%Y%m%d_%H%M%S%.3f");
        let stem = active.file_stem().unwrap_or_default().to_string_lossy();
        let name = match active.extension() {
            Some(ext) => format!("{}.{}.{}", stem, stamp, ext.to_string_lossy()),
            None => format!("{}.{}", stem, stamp),
        };
        active.with_file_name(name)
    }

    /// Delete the oldest rotated files beyond `max_files`.
    pub fn prune(&self, active: &Path) -> Result<(), LoggerError> {
        let dir = match active.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let prefix = format!(
            "{}.",
            active.file_stem().unwrap_or_default().to_string_lossy()
        );

        let mut rotated: Vec<(PathBuf, Option<std::time::SystemTime>)> = fs::read_dir(dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| {
                path != active
                    && path
                        .file_name()
                        .map(|name| name.to_string_lossy().starts_with(&prefix))
                        .unwrap_or(false)
            })
            .map(|path| {
                let modified = fs::metadata(&path).and_then(|m| m.modified()).ok();
                (path, modified)
            })
            .collect();

        if rotated.len() <= self.config.max_files {
            return Ok(());
        }

        // Oldest first; ties fall back to the timestamped name.
        rotated.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        let excess = rotated.len() - self.config.max_files;
        for (path, _) in rotated.into_iter().take(excess) {
            fs::remove_file(&path)?;
        }
        Ok(())
    }
}
