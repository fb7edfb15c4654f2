//! Packaging of per-database dumps into one deliverable file
//!
//! Two output modes are supported: a combined SQL text file with one
//! delimited section per database, or a ZIP archive holding one entry per
//! database plus a `backup_metadata.json` manifest. Input dump files are
//! streamed, never read fully into memory, and removed once packaged.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FailureStage, VaultError, VaultResult};
use crate::storage::remove_file_if_exists;
use crate::{TOOL_NAME, TOOL_VERSION};

/// Name of the manifest entry inside archives
pub const METADATA_ENTRY: &str = "backup_metadata.json";

/// Deflate level used for archive entries
const COMPRESSION_LEVEL: i64 = 9;

/// How per-database dumps are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One concatenated `.sql` file
    Combined,
    /// A ZIP archive with a metadata manifest
    #[default]
    Archive,
}

impl OutputMode {
    /// File extension of the packaged artifact
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Combined => "sql",
            Self::Archive => "zip",
        }
    }
}

impl FromStr for OutputMode {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "combined" | "sql" => Ok(Self::Combined),
            "archive" | "zip" => Ok(Self::Archive),
            other => Err(VaultError::Validation(format!(
                "Unknown output mode '{}', expected 'combined' or 'archive'",
                other
            ))),
        }
    }
}

/// A finished per-database dump waiting to be packaged
#[derive(Debug, Clone)]
pub struct DumpFile {
    pub database: String,
    pub path: PathBuf,
    pub tables_backed_up: usize,
}

impl DumpFile {
    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("{}.sql", self.database))
    }
}

/// The file produced by packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagedArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub size_bytes: u64,
    /// Entries written successfully (archive mode) or sections appended (combined mode)
    pub files_packaged: usize,
}

/// Outcome of one backup or packaging call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub size_bytes: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<FailureStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables_backed_up: Option<usize>,
}

impl BackupResult {
    pub fn succeeded(artifact: &PackagedArtifact, duration: Duration, tables: Option<usize>) -> Self {
        Self {
            success: true,
            file_path: Some(artifact.path.clone()),
            file_name: Some(artifact.file_name.clone()),
            size_bytes: artifact.size_bytes,
            duration_ms: duration.as_millis() as u64,
            error: None,
            failed_stage: None,
            tables_backed_up: tables,
        }
    }

    pub fn failed(error: &VaultError, duration: Duration) -> Self {
        Self {
            success: false,
            file_path: None,
            file_name: None,
            size_bytes: 0,
            duration_ms: duration.as_millis() as u64,
            error: Some(error.to_string()),
            failed_stage: Some(error.stage()),
            tables_backed_up: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ArchiveManifest {
    created: DateTime<Utc>,
    databases: Vec<String>,
    total_files: usize,
    creator: String,
    version: String,
}

/// Writes packaged artifacts into an output directory
#[derive(Debug, Clone)]
pub struct ArchivePackager {
    output_dir: PathBuf,
}

impl ArchivePackager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Package `inputs` into `file_name`, reporting failure in the result
    pub async fn package(&self, inputs: Vec<DumpFile>, file_name: &str, mode: OutputMode) -> BackupResult {
        let started = Instant::now();
        let tables = inputs.iter().map(|d| d.tables_backed_up).sum();

        match self.package_files(inputs, file_name, mode).await {
            Ok(artifact) => BackupResult::succeeded(&artifact, started.elapsed(), Some(tables)),
            Err(e) => {
                tracing::error!(file = file_name, error = %e, "Packaging failed");
                BackupResult::failed(&e, started.elapsed())
            }
        }
    }

    /// Package `inputs` into `file_name` inside the output directory
    ///
    /// The artifact is written under a `.partial` name and only renamed to
    /// `file_name` once complete, so a failed or cancelled call leaves no
    /// artifact behind. The input files are deleted once the artifact is
    /// complete.
    pub async fn package_files(
        &self,
        inputs: Vec<DumpFile>,
        file_name: &str,
        mode: OutputMode,
    ) -> VaultResult<PackagedArtifact> {
        if inputs.is_empty() {
            return Err(VaultError::Packaging("No database dumps to package".into()));
        }

        tokio::fs::create_dir_all(&self.output_dir).await.map_err(|e| {
            VaultError::Packaging(format!(
                "Failed to create output directory {}: {}",
                self.output_dir.display(),
                e
            ))
        })?;

        let output = self.output_dir.join(file_name);
        let staged = StagedFile::new(partial_path(&output));
        let files_packaged = match mode {
            OutputMode::Combined => combine(&inputs, staged.path()).await?,
            OutputMode::Archive => {
                // Dropping this future (e.g. on timeout) stops the blocking task
                let cancel = CancellationToken::new();
                let _stop_on_drop = cancel.clone().drop_guard();
                let (inputs_for_zip, staging) = (inputs.clone(), staged.path().to_path_buf());
                tokio::task::spawn_blocking(move || write_archive(&inputs_for_zip, &staging, &cancel))
                    .await
                    .map_err(|e| VaultError::Packaging(format!("Archive task failed: {}", e)))??
            }
        };

        staged.commit(&output).await?;
        remove_inputs(&inputs);

        let size_bytes = tokio::fs::metadata(&output)
            .await
            .map_err(|e| VaultError::Packaging(format!("Failed to stat {}: {}", output.display(), e)))?
            .len();

        tracing::info!(
            file = file_name,
            mode = ?mode,
            databases = inputs.len(),
            size_bytes,
            "Backup packaged"
        );

        Ok(PackagedArtifact {
            path: output,
            file_name: file_name.to_string(),
            size_bytes,
            files_packaged,
        })
    }
}

/// `<output>.partial`
fn partial_path(output: &Path) -> PathBuf {
    let mut name = output.as_os_str().to_os_string();
    name.push(".partial");
    PathBuf::from(name)
}

/// An artifact under construction, deleted on drop unless committed
struct StagedFile {
    path: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            committed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Move the finished file to `output`
    async fn commit(mut self, output: &Path) -> VaultResult<()> {
        tokio::fs::rename(&self.path, output).await.map_err(|e| {
            VaultError::Packaging(format!(
                "Failed to move {} to {}: {}",
                self.path.display(),
                output.display(),
                e
            ))
        })?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Err(e) = remove_file_if_exists(&self.path) {
            tracing::warn!(file = %self.path.display(), error = %e, "Failed to remove partial artifact");
        }
    }
}

async fn combine(inputs: &[DumpFile], output: &Path) -> VaultResult<usize> {
    if let [single] = inputs {
        move_file(&single.path, output).await?;
        return Ok(1);
    }

    let file = tokio::fs::File::create(output).await.map_err(|e| {
        VaultError::Packaging(format!("Failed to create {}: {}", output.display(), e))
    })?;
    let mut writer = tokio::io::BufWriter::new(file);

    let databases: Vec<&str> = inputs.iter().map(|d| d.database.as_str()).collect();
    let header = format!(
        "--\n-- Combined database backup\n-- Created: {}\n-- Databases: {}\n-- Tool: {} {}\n--\n",
        Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        databases.join(", "),
        TOOL_NAME,
        TOOL_VERSION
    );
    writer.write_all(header.as_bytes()).await?;

    let mut appended = 0;
    for input in inputs {
        let name = input.file_name();
        writer
            .write_all(format!("\n---- Database File: {} ----\n\n", name).as_bytes())
            .await?;

        match tokio::fs::File::open(&input.path).await {
            Ok(mut dump) => {
                tokio::io::copy(&mut dump, &mut writer).await?;
                appended += 1;
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Dump file unreadable, skipped in combined output");
                writer
                    .write_all(format!("-- ERROR: could not read {}: {}\n", name, e).as_bytes())
                    .await?;
            }
        }
    }

    if appended == 0 {
        return Err(VaultError::Packaging("None of the dump files could be read".into()));
    }

    writer
        .write_all(format!("\n-- End of combined backup: {} databases\n", inputs.len()).as_bytes())
        .await?;
    writer.shutdown().await?;
    Ok(appended)
}

async fn move_file(from: &Path, to: &Path) -> VaultResult<()> {
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }

    // Rename fails across filesystems
    tokio::fs::copy(from, to).await.map_err(|e| {
        VaultError::Packaging(format!("Failed to move {} to {}: {}", from.display(), to.display(), e))
    })?;
    tokio::fs::remove_file(from).await?;
    Ok(())
}

/// Entries at or past this size need ZIP64 headers
const ZIP64_THRESHOLD: u64 = u32::MAX as u64;

fn needs_zip64(len: u64) -> bool {
    len >= ZIP64_THRESHOLD
}

/// Write the archive, removing `output` again if it could not be completed
fn write_archive(inputs: &[DumpFile], output: &Path, cancel: &CancellationToken) -> VaultResult<usize> {
    let written = build_archive(inputs, output, cancel);
    if written.is_err() {
        if let Err(e) = remove_file_if_exists(output) {
            tracing::warn!(file = %output.display(), error = %e, "Failed to remove incomplete archive");
        }
    }
    written
}

fn build_archive(inputs: &[DumpFile], output: &Path, cancel: &CancellationToken) -> VaultResult<usize> {
    let cancelled = || VaultError::Packaging("Archive creation was cancelled".into());
    if cancel.is_cancelled() {
        return Err(cancelled());
    }

    let file = File::create(output)
        .map_err(|e| VaultError::Packaging(format!("Failed to create {}: {}", output.display(), e)))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(COMPRESSION_LEVEL));

    let mut added = 0;
    for input in inputs {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let name = input.file_name();
        let opened = std::fs::metadata(&input.path)
            .and_then(|meta| File::open(&input.path).map(|file| (meta.len(), file)));
        match opened {
            Ok((len, dump)) => {
                zip.start_file(name.as_str(), options.large_file(needs_zip64(len)))?;
                let mut reader = CancellableReader { inner: dump, cancel };
                std::io::copy(&mut reader, &mut zip).map_err(|e| {
                    if cancel.is_cancelled() {
                        cancelled()
                    } else {
                        VaultError::Packaging(format!("Failed to add {}: {}", name, e))
                    }
                })?;
                added += 1;
            }
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Dump file unreadable, adding error entry");
                zip.start_file(format!("{}.error.txt", name), options)?;
                writeln!(zip, "Backup of database {} could not be added: {}", input.database, e)?;
            }
        }
    }

    if added == 0 {
        return Err(VaultError::Packaging("None of the dump files could be read".into()));
    }

    let manifest = ArchiveManifest {
        created: Utc::now(),
        databases: inputs.iter().map(|d| d.database.clone()).collect(),
        total_files: added,
        creator: TOOL_NAME.to_string(),
        version: TOOL_VERSION.to_string(),
    };
    zip.start_file(METADATA_ENTRY, options)?;
    serde_json::to_writer_pretty(&mut zip, &manifest)?;

    let mut writer = zip.finish()?;
    writer.flush()?;
    Ok(added)
}

/// Stops reading once the archive task has been cancelled
struct CancellableReader<'a, R> {
    inner: R,
    cancel: &'a CancellationToken,
}

impl<R: Read> Read for CancellableReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.cancel.is_cancelled() {
            return Err(std::io::Error::other("archive creation cancelled"));
        }
        self.inner.read(buf)
    }
}

fn remove_inputs(inputs: &[DumpFile]) {
    for input in inputs {
        if let Err(e) = remove_file_if_exists(&input.path) {
            tracing::warn!(file = %input.path.display(), error = %e, "Failed to remove temporary dump file");
        }
    }
}
