//! CLI argument validation functions
//!
//! Value parsers for arguments that clap cannot check on its own.

use std::fs;
use std::path::PathBuf;

/// Upper bound for `--pool-size`
const MAX_POOL_SIZE: usize = 1024;

/// Upper bound for `--max-retries`
const MAX_RETRIES: u32 = 100;

/// Validate that a file path is accessible (exists and is readable)
pub fn validate_config_file_path(path_str: &str) -> Result<PathBuf, String> {
    readable_file(path_str, "Configuration")
}

/// Validate that a job definition exists and is a readable `.toml` file
pub fn validate_job_file_path(path_str: &str) -> Result<PathBuf, String> {
    let path = readable_file(path_str, "Job")?;
    if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
        return Err(format!("Job file must have a .toml extension: '{}'", path_str));
    }
    Ok(path)
}

fn readable_file(path_str: &str, kind: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(format!("{} file does not exist: '{}'", kind, path_str));
    }

    if !path.is_file() {
        return Err(format!("{} path is not a file: '{}'", kind, path_str));
    }

    match fs::File::open(&path) {
        Ok(_) => Ok(path),
        Err(e) => Err(format!("Cannot read {} file '{}': {}", kind.to_lowercase(), path_str, e)),
    }
}

/// Same character set `job.name` accepts
pub fn validate_job_name(name: &str) -> Result<String, String> {
    let name = name.trim();
    if name.is_empty() {
        return Err("Job name cannot be empty".to_string());
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(format!("Job name may only contain [A-Za-z0-9_.-], got: '{}'", name));
    }
    if name.starts_with('.') {
        return Err(format!("Job name must not start with '.': '{}'", name));
    }
    Ok(name.to_string())
}

pub fn validate_pool_size(value: &str) -> Result<usize, String> {
    let size: usize = value
        .parse()
        .map_err(|_| format!("Pool size must be a positive number, got: '{}'", value))?;

    if size == 0 || size > MAX_POOL_SIZE {
        return Err(format!("Pool size must be between 1 and {}", MAX_POOL_SIZE));
    }

    Ok(size)
}

pub fn validate_max_retries(value: &str) -> Result<u32, String> {
    let retries: u32 = value
        .parse()
        .map_err(|_| format!("Max retries must be a non-negative number, got: '{}'", value))?;

    if retries > MAX_RETRIES {
        return Err(format!("Max retries cannot exceed {}", MAX_RETRIES));
    }

    Ok(retries)
}
