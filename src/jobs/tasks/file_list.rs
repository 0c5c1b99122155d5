use std::path::Path;

use async_trait::async_trait;
use jiff::Timestamp;

use crate::jobs::config::JobConfig;
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::state::{JobState, WATERMARK_KEY, WorkUnit};
use crate::jobs::tasks::props;
use crate::jobs::types::Source;

/// One work unit per file listed in `source.files`.
///
/// With `source.incremental = true`, a file is skipped when its modification
/// time is not newer than the watermark its last committed task recorded.
#[derive(Debug, Clone)]
pub struct FileListSource {
    files: Vec<String>,
    incremental: bool,
}

impl FileListSource {
    async fn modified_millis(path: &str) -> Option<i64> {
        let metadata = tokio::fs::metadata(path).await.ok()?;
        let modified = metadata.modified().ok()?;
        Timestamp::try_from(modified).ok().map(|ts| ts.as_millisecond())
    }
}

#[async_trait]
impl Source for FileListSource {
    fn source_type() -> &'static str {
        "file_list"
    }

    fn from_config(config: &JobConfig) -> JobResult<Self> {
        let files = config.get_list(props::SOURCE_FILES);
        if files.is_empty() {
            return Err(JobError::config(
                props::SOURCE_FILES,
                "at least one source file is required",
            ));
        }
        Ok(Self {
            files,
            incremental: config.get_bool(props::SOURCE_INCREMENTAL, false)?,
        })
    }

    async fn work_units(
        &self,
        config: &JobConfig,
        previous: Option<&JobState>,
    ) -> JobResult<Vec<WorkUnit>> {
        let previous = if self.incremental { previous } else { None };

        let writer_props: Vec<(&String, &String)> = config
            .props()
            .iter()
            .filter(|(k, _)| k.starts_with(props::WRITER_PREFIX))
            .collect();

        let mut units = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let mtime = Self::modified_millis(file).await;
            let watermark = previous.and_then(|state| state.watermark(file));
            if let (Some(mtime), Some(watermark)) = (mtime, watermark) {
                if mtime <= watermark {
                    tracing::debug!(file = %file, mtime, watermark, "Skipping unchanged file");
                    continue;
                }
            }

            let name = Path::new(file)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| JobError::Source(format!("'{}' does not name a file", file)))?;

            let mut unit = writer_props
                .iter()
                .map(|(k, v)| ((*k).clone(), (*v).clone()))
                .collect::<WorkUnit>()
                .with(props::SOURCE_FILE, file.as_str())
                .with(props::FILE_NAME, name)
                .with(WATERMARK_KEY, file.as_str());
            if let Some(mtime) = mtime {
                unit = unit.with(props::SOURCE_FILE_MTIME, mtime.to_string());
            }
            units.push(unit);
        }

        tracing::info!(
            files = self.files.len(),
            work_units = units.len(),
            incremental = self.incremental,
            "Listed source files"
        );
        Ok(units)
    }
}
