//! Tests for the writer and the runtime level handle

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use tempfile::tempdir;
use tracing_subscriber::fmt::MakeWriter;

use crate::logger::config::*;
use crate::logger::writer::RotatingFileWriter;

fn file_config(path: PathBuf, max_size: u64, max_files: usize) -> FileConfig {
    FileConfig {
        enabled: true,
        path,
        append: false,
        format: LogFormat::Full,
        rotation: RotationConfig {
            strategy: RotationStrategy::Size,
            max_size,
            max_files,
        },
    }
}

fn rotated_files(dir: &std::path::Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with("app.") && name != "app.log")
        .collect();
    names.sort();
    names
}

mod writer_tests {
    use super::*;

    #[test]
    fn test_writer_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("logs").join("app.log");
        let writer = RotatingFileWriter::new(&file_config(path.clone(), 1024, 3)).unwrap();

        writer.make_writer().write_all(b"hello\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
        assert!(!writer.is_in_fallback_mode());
    }

    #[test]
    fn test_append_keeps_existing_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "before\n").unwrap();

        let mut config = file_config(path.clone(), 1024, 3);
        config.append = true;
        let writer = RotatingFileWriter::new(&config).unwrap();
        writer.make_writer().write_all(b"after\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "before\nafter\n");
    }

    #[test]
    fn test_truncate_when_not_appending() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "stale\n").unwrap();

        let writer = RotatingFileWriter::new(&file_config(path.clone(), 1024, 3)).unwrap();
        writer.make_writer().write_all(b"fresh\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_size_limit_rotates_before_next_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::new(&file_config(path.clone(), 16, 10)).unwrap();

        writer.make_writer().write_all(b"0123456789abcdef\n").unwrap();
        assert!(rotated_files(dir.path()).is_empty());

        writer.make_writer().write_all(b"second\n").unwrap();

        let rotated = rotated_files(dir.path());
        assert_eq!(rotated.len(), 1);
        assert_eq!(
            fs::read_to_string(dir.path().join(&rotated[0])).unwrap(),
            "0123456789abcdef\n"
        );
        assert_eq!(fs::read_to_string(&path).unwrap(), "second\n");
    }

    #[test]
    fn test_rotation_prunes_to_max_files() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        let writer = RotatingFileWriter::new(&file_config(path.clone(), 4, 2)).unwrap();

        for i in 0..6 {
            writer
                .make_writer()
                .write_all(format!("line {}\n", i).as_bytes())
                .unwrap();
            // Rotated names carry millisecond timestamps.
            std::thread::sleep(std::time::Duration::from_millis(5));
        }

        assert!(rotated_files(dir.path()).len() <= 2);
        assert_eq!(fs::read_to_string(&path).unwrap(), "line 5\n");
    }

    #[test]
    fn test_recover_is_noop_when_healthy() {
        let dir = tempdir().unwrap();
        let writer =
            RotatingFileWriter::new(&file_config(dir.path().join("app.log"), 1024, 3)).unwrap();
        assert!(writer.try_recover());
        assert!(!writer.is_in_fallback_mode());
    }
}

mod level_handle_tests {
    use crate::logger::LogLevelHandle;
    use proptest::prelude::*;
    use std::sync::Arc;
    use tracing_subscriber::{layer::SubscriberExt, reload, EnvFilter};

    const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

    fn with_test_handle<F, R>(initial_level: &str, f: F) -> R
    where
        F: FnOnce(&LogLevelHandle) -> R,
    {
        let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial_level));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::sink));
        let handle = LogLevelHandle {
            inner: Arc::new(reload_handle),
        };
        tracing::subscriber::with_default(subscriber, || f(&handle))
    }

    #[test]
    fn test_invalid_directive_is_rejected() {
        with_test_handle("info", |handle| {
            let err = handle.set_level("tributary=notalevel").unwrap_err();
            assert!(err.to_string().contains("tributary=notalevel"));
            assert_eq!(handle.current_level().as_deref(), Some("info"));
        });
    }

    #[test]
    fn test_module_directives_are_accepted() {
        with_test_handle("info", |handle| {
            handle.set_level("warn,tributary::jobs=debug").unwrap();
            let current = handle.current_level().unwrap();
            assert!(current.contains("tributary::jobs=debug"));
        });
    }

    proptest! {
        #[test]
        fn property_last_update_wins(indices in prop::collection::vec(0usize..5, 1..5)) {
            with_test_handle("info", |handle| {
                for &i in &indices {
                    prop_assert!(handle.set_level(LEVELS[i]).is_ok());
                }
                let last = LEVELS[*indices.last().unwrap()];
                prop_assert_eq!(handle.current_level().map(|l| l.to_lowercase()), Some(last.to_string()));
                Ok(())
            })?;
        }
    }
}
