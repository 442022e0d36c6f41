use std::env;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};

use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::ProposalError;
use crate::proposal::{IndexBase, RawProposals};
use crate::results::load_all_boxes;

/// Something that can compute proposals for a batch of images out of band.
///
/// `submit` starts the work and returns a ticket; `wait` blocks until that
/// work is done and yields rows in the client's own index convention.
pub trait ExternalComputeClient {
    type Ticket;

    fn submit(&self, image_paths: &[PathBuf], routine: &str)
        -> Result<Self::Ticket, ProposalError>;

    fn wait(&self, ticket: Self::Ticket) -> Result<RawProposals, ProposalError>;
}

#[derive(Debug, Clone)]
pub struct MatlabConfig {
    /// MATLAB executable.
    pub program: PathBuf,
    /// Flags placed before the script; the last one must take the script as its argument.
    pub flags: Vec<String>,
    /// Edge Boxes toolbox root, added recursively to the MATLAB path.
    pub toolbox_dir: PathBuf,
    /// Working directory for every MATLAB process.
    pub work_dir: PathBuf,
    /// Run a `savepath` bootstrap before each batch.
    pub persist_path: bool,
}

impl Default for MatlabConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("matlab"),
            flags: vec!["-nodisplay".into(), "-nojvm".into(), "-r".into()],
            toolbox_dir: PathBuf::from("toolbox"),
            work_dir: install_dir(),
            persist_path: true,
        }
    }
}

/// Directory holding the running executable, falling back to `.`.
pub fn install_dir() -> PathBuf {
    env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// A MATLAB process in flight plus the results file it will write.
///
/// The results file is removed when the job is dropped, whichever way `wait` returns.
#[derive(Debug)]
pub struct MatlabJob {
    child: Child,
    output: TempPath,
}

impl MatlabJob {
    pub fn output_path(&self) -> &Path {
        &self.output
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatlabClient {
    cfg: MatlabConfig,
}

impl MatlabClient {
    pub fn new(cfg: MatlabConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &MatlabConfig {
        &self.cfg
    }

    fn toolbox_path(&self) -> PathBuf {
        if self.cfg.toolbox_dir.is_absolute() {
            return self.cfg.toolbox_dir.clone();
        }
        env::current_dir()
            .map(|cwd| cwd.join(&self.cfg.toolbox_dir))
            .unwrap_or_else(|_| self.cfg.toolbox_dir.clone())
    }

    fn command(&self, script: &str) -> Command {
        let mut cmd = Command::new(&self.cfg.program);
        cmd.args(&self.cfg.flags)
            .arg(script)
            .stdout(Stdio::null())
            .current_dir(&self.cfg.work_dir);
        cmd
    }

    fn spawn_err(&self, source: std::io::Error) -> ProposalError {
        ProposalError::Spawn {
            program: self.cfg.program.clone(),
            source,
        }
    }

    /// Persist the toolbox on the MATLAB path. A failure here is not fatal:
    /// the routine script adds the path again for its own session.
    fn bootstrap(&self, toolbox: &Path) -> Result<(), ProposalError> {
        if !self.cfg.persist_path {
            return Ok(());
        }
        let status = self
            .command(&bootstrap_script(toolbox))
            .status()
            .map_err(|e| self.spawn_err(e))?;
        if !status.success() {
            warn!(status = ?status.code(), "MATLAB path bootstrap exited unsuccessfully");
        }
        Ok(())
    }
}

impl ExternalComputeClient for MatlabClient {
    type Ticket = MatlabJob;

    fn submit(&self, image_paths: &[PathBuf], routine: &str) -> Result<MatlabJob, ProposalError> {
        if !is_matlab_identifier(routine) {
            return Err(ProposalError::InvalidRoutine(routine.to_string()));
        }
        let output = tempfile::Builder::new()
            .prefix("edge_boxes_")
            .suffix(".mat")
            .tempfile()
            .map_err(ProposalError::TempFile)?
            .into_temp_path();

        let toolbox = self.toolbox_path();
        self.bootstrap(&toolbox)?;

        let script = routine_script(&toolbox, routine, image_paths, &output);
        debug!(%script, images = image_paths.len(), "launching MATLAB");
        let child = self.command(&script).spawn().map_err(|e| self.spawn_err(e))?;
        Ok(MatlabJob { child, output })
    }

    fn wait(&self, mut job: MatlabJob) -> Result<RawProposals, ProposalError> {
        let status = job.child.wait().map_err(|e| self.spawn_err(e))?;
        if !status.success() {
            return Err(ProposalError::ExternalProcess {
                status: status.code(),
            });
        }
        let boxes = load_all_boxes(&job.output)?;
        if let Err(err) = job.output.close() {
            warn!(error = %err, "failed to remove MATLAB results file");
        }
        Ok(RawProposals {
            index_base: IndexBase::One,
            boxes,
        })
    }
}

/// Quote a string as a MATLAB char literal.
pub fn matlab_string(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render paths as a MATLAB cell literal: `{'a.jpg','b.jpg'}`.
pub fn cell_literal(paths: &[PathBuf]) -> String {
    let items: Vec<String> = paths
        .iter()
        .map(|p| matlab_string(&p.to_string_lossy()))
        .collect();
    format!("{{{}}}", items.join(","))
}

pub fn bootstrap_script(toolbox: &Path) -> String {
    format!(
        "addpath(genpath({})); savepath; exit",
        matlab_string(&toolbox.to_string_lossy())
    )
}

/// Script for the batch run. The try/catch makes MATLAB exit non-zero on an
/// error instead of dropping to an interactive prompt.
pub fn routine_script(toolbox: &Path, routine: &str, images: &[PathBuf], output: &Path) -> String {
    format!(
        "addpath(genpath({toolbox})); try; {routine}({cell}, {output}); catch err; disp(getReport(err)); exit(1); end; exit(0);",
        toolbox = matlab_string(&toolbox.to_string_lossy()),
        cell = cell_literal(images),
        output = matlab_string(&output.to_string_lossy()),
    )
}

pub fn is_matlab_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quotes_are_doubled_in_cell_literal() {
        let paths = vec![PathBuf::from("a.jpg"), PathBuf::from("it's.jpg")];
        assert_eq!(cell_literal(&paths), "{'a.jpg','it''s.jpg'}");
    }

    #[test]
    fn routine_names_must_be_identifiers() {
        assert!(is_matlab_identifier("edge_boxes_wrapper"));
        assert!(!is_matlab_identifier("1abc"));
        assert!(!is_matlab_identifier("f; system('rm')"));
        assert!(!is_matlab_identifier(""));
    }
}
