//! Recipe runner seam
//!
//! The data-reduction recipe is an external process: it consumes the
//! assembled input list, works in the job's scratch directory, and leaves
//! its products in the output directory. The core never interprets recipe
//! internals, only success or failure plus the resulting file list.

use std::path::PathBuf;
use std::process::Stdio;

use aster_core::domain::job::ProcessingMode;
use async_trait::async_trait;

use super::{ExternalError, ExternalResult};

/// Everything the recipe process needs to run one job.
#[derive(Debug, Clone)]
pub struct RecipeContext {
    pub job_id: i64,
    pub input_list: PathBuf,
    pub mode: ProcessingMode,
    pub parameters: String,
    pub scratch_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    /// Pinned recipe environment directory from the task configuration.
    pub starlink_dir: Option<String>,
    /// Custom run command from the task configuration, overriding the
    /// standard wrapper.
    pub command: Option<String>,
}

/// Result of a completed recipe run.
#[derive(Debug, Clone)]
pub struct RecipeOutcome {
    /// Output filenames found in the job's output directory.
    pub output_files: Vec<String>,
    /// Recipe log file for the audit trail.
    pub log_file: PathBuf,
}

/// The recipe execution seam.
#[async_trait]
pub trait RecipeRunner: Send + Sync {
    async fn run(&self, ctx: &RecipeContext) -> ExternalResult<RecipeOutcome>;
}

/// Production runner: spawns the reduction wrapper script.
pub struct WrapperRecipeRunner {
    wrapper: PathBuf,
}

impl WrapperRecipeRunner {
    pub fn new(wrapper: impl Into<PathBuf>) -> Self {
        Self {
            wrapper: wrapper.into(),
        }
    }
}

#[async_trait]
impl RecipeRunner for WrapperRecipeRunner {
    async fn run(&self, ctx: &RecipeContext) -> ExternalResult<RecipeOutcome> {
        let log_file = ctx.log_dir.join(format!("recipe_{:09}.log", ctx.job_id));
        let log = std::fs::File::create(&log_file)
            .map_err(|e| ExternalError::service(format!("cannot open recipe log: {e}")))?;
        let log_err = log
            .try_clone()
            .map_err(|e| ExternalError::service(format!("cannot open recipe log: {e}")))?;

        let program: PathBuf = match &ctx.command {
            Some(command) => PathBuf::from(command),
            None => self.wrapper.clone(),
        };

        let mut cmd = tokio::process::Command::new(&program);
        cmd.arg("--id")
            .arg(ctx.job_id.to_string())
            .arg("--inputs")
            .arg(&ctx.input_list)
            .arg("--mode")
            .arg(ctx.mode.as_str())
            .arg("--outdir")
            .arg(&ctx.output_dir)
            .current_dir(&ctx.scratch_dir)
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        if !ctx.parameters.is_empty() {
            cmd.arg("--recpars").arg(&ctx.parameters);
        }
        if let Some(starlink_dir) = &ctx.starlink_dir {
            cmd.env("STARLINK_DIR", starlink_dir);
        }

        tracing::info!("Launching recipe for job {}: {:?}", ctx.job_id, program);

        let status = cmd
            .status()
            .await
            .map_err(|e| ExternalError::service(format!("failed to spawn recipe: {e}")))?;

        if !status.success() {
            return Err(ExternalError::service(format!(
                "recipe exited with status {status}; see {}",
                log_file.display()
            )));
        }

        let output_files = list_output_files(&ctx.output_dir).await?;
        if output_files.is_empty() {
            return Err(ExternalError::service(
                "recipe succeeded but produced no output files",
            ));
        }

        Ok(RecipeOutcome {
            output_files,
            log_file,
        })
    }
}

/// Plain filenames of the regular files in the output directory, sorted.
async fn list_output_files(output_dir: &std::path::Path) -> ExternalResult<Vec<String>> {
    let mut names = Vec::new();

    let mut entries = tokio::fs::read_dir(output_dir)
        .await
        .map_err(|e| ExternalError::service(format!("cannot read output directory: {e}")))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| ExternalError::service(e.to_string()))?
    {
        let meta = entry
            .metadata()
            .await
            .map_err(|e| ExternalError::service(e.to_string()))?;
        if meta.is_file() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }

    names.sort();
    Ok(names)
}
