//! Per-job directory layout
//!
//! Every job owns an input, scratch, output, and log directory, named
//! deterministically from its id. Ids are bucketed by thousands so no
//! single directory accumulates an unbounded number of entries.

use std::path::{Path, PathBuf};

use crate::config::Config;

fn job_dir(base: &Path, kind: &str, job_id: i64) -> PathBuf {
    base.join(kind)
        .join(format!("{:06}", job_id / 1000))
        .join(format!("{job_id:09}"))
}

/// Directory holding a job's assembled input files.
pub fn input_dir(config: &Config, job_id: i64) -> PathBuf {
    job_dir(&config.base_dir, "input", job_id)
}

/// Scratch working directory for a job's recipe run.
pub fn scratch_dir(config: &Config, job_id: i64) -> PathBuf {
    job_dir(&config.base_dir, "scratch", job_id)
}

/// Directory holding a job's output files.
pub fn output_dir(config: &Config, job_id: i64) -> PathBuf {
    job_dir(&config.base_dir, "output", job_id)
}

/// Directory holding a job's recipe and transfer logs.
pub fn log_dir(config: &Config, job_id: i64) -> PathBuf {
    job_dir(&config.base_dir, "log", job_id)
}

/// Path of the assembled input file list consumed by the recipe runner.
pub fn input_list_path(config: &Config, job_id: i64) -> PathBuf {
    input_dir(config, job_id).join("input_files_job.lis")
}

/// Create a directory (and parents) if it does not already exist.
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> Config {
        Config::new("JAC".to_string(), PathBuf::from("/data/aster"))
    }

    #[test]
    fn test_layout_is_deterministic_and_bucketed() {
        let config = test_config();

        assert_eq!(
            input_dir(&config, 1234),
            PathBuf::from("/data/aster/input/000001/000001234")
        );
        assert_eq!(
            output_dir(&config, 1234),
            PathBuf::from("/data/aster/output/000001/000001234")
        );
        assert_eq!(
            scratch_dir(&config, 17),
            PathBuf::from("/data/aster/scratch/000000/000000017")
        );
        assert_eq!(
            input_list_path(&config, 17),
            PathBuf::from("/data/aster/input/000000/000000017/input_files_job.lis")
        );

        // Same id, same path, every time.
        assert_eq!(input_dir(&config, 1234), input_dir(&config, 1234));
    }
}
