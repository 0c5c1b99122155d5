use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;

use crate::jobs::config::JobConfig;
use crate::jobs::error::{JobError, JobResult, TaskExecutionError};
use crate::jobs::state::TaskState;
use crate::jobs::tasks::props;
use crate::jobs::types::{TaskContext, TaskOutput, TaskPipeline};

/// Length-preserving byte transforms applied between extract and stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    Uppercase,
    Rot13,
    Reverse,
}

impl Transform {
    pub fn apply(&self, mut bytes: Vec<u8>) -> Vec<u8> {
        match self {
            Transform::Identity => {}
            Transform::Uppercase => bytes.make_ascii_uppercase(),
            Transform::Rot13 => bytes.iter_mut().for_each(|b| *b = rot13(*b)),
            Transform::Reverse => bytes.reverse(),
        }
        bytes
    }
}

fn rot13(b: u8) -> u8 {
    match b {
        b'a'..=b'z' => (b - b'a' + 13) % 26 + b'a',
        b'A'..=b'Z' => (b - b'A' + 13) % 26 + b'A',
        _ => b,
    }
}

impl FromStr for Transform {
    type Err = JobError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "identity" | "none" => Ok(Transform::Identity),
            "uppercase" => Ok(Transform::Uppercase),
            "rot13" => Ok(Transform::Rot13),
            "reverse" => Ok(Transform::Reverse),
            other => Err(JobError::config(
                props::TRANSFORM_TYPE,
                format!("unknown transform '{}'", other),
            )),
        }
    }
}

/// Reads one source file, transforms it and stages the result; publishing
/// moves the staged file into the output directory.
#[derive(Debug, Clone)]
pub struct FileTransformPipeline {
    staging_dir: PathBuf,
    output_dir: PathBuf,
    transform: Transform,
}

impl FileTransformPipeline {
    pub fn new(staging_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>, transform: Transform) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            output_dir: output_dir.into(),
            transform,
        }
    }

    fn required<'a>(task: &'a TaskState, key: &str) -> Result<&'a str, TaskExecutionError> {
        task.get_prop(key)
            .ok_or_else(|| TaskExecutionError::fatal(format!("task has no '{}' property", key)))
    }

    async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
        if tokio::fs::rename(from, to).await.is_ok() {
            return Ok(());
        }
        // Staging and output may live on different file systems.
        tokio::fs::copy(from, to).await?;
        tokio::fs::remove_file(from).await
    }
}

#[async_trait]
impl TaskPipeline for FileTransformPipeline {
    fn pipeline_type() -> &'static str {
        "file_transform"
    }

    fn from_config(config: &JobConfig) -> JobResult<Self> {
        let staging_dir = config.require(props::WRITER_STAGING_DIR)?;
        let output_dir = config.require(props::WRITER_OUTPUT_DIR)?;
        let transform = config
            .get(props::TRANSFORM_TYPE)
            .map(Transform::from_str)
            .transpose()?
            .unwrap_or(Transform::Identity);
        Ok(Self::new(staging_dir, output_dir, transform))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskExecutionError> {
        let source = ctx
            .work_unit
            .get(props::SOURCE_FILE)
            .ok_or_else(|| TaskExecutionError::fatal("work unit has no source file"))?;
        let name = ctx.work_unit.get(props::FILE_NAME).unwrap_or(&ctx.task_id);

        if ctx.cancellation_token.is_cancelled() {
            return Err(TaskExecutionError::Cancelled);
        }

        let content = tokio::fs::read(source).await?;
        let transformed = self.transform.apply(content);
        let records = transformed
            .split(|b| *b == b'\n')
            .filter(|line| !line.is_empty())
            .count() as u64;

        let file_name = format!("{}.{}", name, ctx.task_id);
        let staged = self.staging_dir.join(&file_name);
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        tokio::fs::write(&staged, &transformed).await?;

        tracing::debug!(
            task_id = %ctx.task_id,
            source = %source,
            staged = %staged.display(),
            bytes = transformed.len(),
            "Staged transformed file"
        );

        let high_watermark = ctx
            .work_unit
            .get(props::SOURCE_FILE_MTIME)
            .and_then(|v| v.parse::<i64>().ok());

        let mut output_props = BTreeMap::new();
        output_props.insert(
            props::WRITER_STAGED_FILE.to_string(),
            staged.display().to_string(),
        );
        output_props.insert(
            props::WRITER_OUTPUT_FILE.to_string(),
            self.output_dir.join(&file_name).display().to_string(),
        );

        Ok(TaskOutput {
            records_written: records,
            bytes_written: transformed.len() as u64,
            high_watermark,
            props: output_props,
        })
    }

    async fn publish(&self, task: &TaskState) -> Result<(), TaskExecutionError> {
        let staged = Path::new(Self::required(task, props::WRITER_STAGED_FILE)?);
        let target = Path::new(Self::required(task, props::WRITER_OUTPUT_FILE)?);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Self::move_file(staged, target).await?;

        tracing::debug!(
            task_id = %task.task_id,
            target = %target.display(),
            "Published task output"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::state::WorkUnit;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn ctx(task_id: &str, unit: WorkUnit) -> TaskContext {
        TaskContext {
            task_id: task_id.to_string(),
            job_id: "job_t_1_0".to_string(),
            attempt: 0,
            work_unit: Arc::new(unit),
            cancellation_token: CancellationToken::new(),
        }
    }

    #[test]
    fn test_rot13() {
        assert_eq!(Transform::Rot13.apply(b"Hello, World!".to_vec()), b"Uryyb, Jbeyq!".to_vec());
    }

    #[test]
    fn test_unknown_transform() {
        assert!("gzip".parse::<Transform>().unwrap_err().is_config());
        assert_eq!("ROT13".parse::<Transform>().unwrap(), Transform::Rot13);
    }

    #[test]
    fn test_from_config_requires_directories() {
        let config = JobConfig::new().with(props::WRITER_STAGING_DIR, "/tmp/staging");
        let err = FileTransformPipeline::from_config(&config).unwrap_err();
        assert!(matches!(err, JobError::Config { key, .. } if key == props::WRITER_OUTPUT_DIR));
    }

    #[tokio::test]
    async fn test_stage_then_publish() {
        let dir = TempDir::new().unwrap();
        let source = dir.path().join("in.txt");
        std::fs::write(&source, "alpha\nbeta\n").unwrap();

        let pipeline = FileTransformPipeline::new(
            dir.path().join("staging"),
            dir.path().join("output"),
            Transform::Uppercase,
        );
        let unit = WorkUnit::new()
            .with(props::SOURCE_FILE, source.display().to_string())
            .with(props::FILE_NAME, "in.txt")
            .with(props::SOURCE_FILE_MTIME, "1234");

        let output = pipeline.run(&ctx("task_x_0", unit.clone())).await.unwrap();
        assert_eq!(output.records_written, 2);
        assert_eq!(output.bytes_written, 11);
        assert_eq!(output.high_watermark, Some(1234));

        let target = dir.path().join("output").join("in.txt.task_x_0");
        assert!(!target.exists(), "nothing is published before commit");

        let mut state = TaskState::new("task_x_0".into(), "job_t_1_0".into(), &unit);
        state.props.extend(output.props);
        pipeline.publish(&state).await.unwrap();

        assert_eq!(std::fs::read_to_string(&target).unwrap(), "ALPHA\nBETA\n");
        assert!(!dir.path().join("staging").join("in.txt.task_x_0").exists());
    }

    #[tokio::test]
    async fn test_missing_source_is_fatal() {
        let dir = TempDir::new().unwrap();
        let pipeline = FileTransformPipeline::new(dir.path(), dir.path(), Transform::Identity);
        let unit = WorkUnit::new().with(props::SOURCE_FILE, dir.path().join("nope").display().to_string());

        let err = pipeline.run(&ctx("t", unit)).await.unwrap_err();
        assert!(matches!(err, TaskExecutionError::Fatal(_)));
        assert!(!err.is_retryable());
    }

    proptest! {
        #[test]
        fn property_transforms_preserve_length(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            for transform in [Transform::Identity, Transform::Uppercase, Transform::Rot13, Transform::Reverse] {
                prop_assert_eq!(transform.apply(bytes.clone()).len(), bytes.len());
            }
        }
    }
}
