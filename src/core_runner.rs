use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{sync_channel, Receiver};
use std::thread;

use crate::buffered_ledger_meta_reader::LEDGER_READ_AHEAD_BUFFER_SIZE;
use crate::{BufReaderError, BufferedLedgerMetaReader, IngestionConfig, MetaResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunnerStatus {
    RunningOffline,
    RunningOnline,
    Closed,
}

#[derive(thiserror::Error, Debug)]
pub enum RunnerError {
    #[error("instance of core already running")]
    AlreadyRunning,

    #[error("error running CLI command: {0}")]
    CliExec(io::Error),

    #[error("stellar-core {command} exited with {status}")]
    CommandFailed { command: String, status: std::process::ExitStatus },

    #[error("error in reading ledger metadata {0}")]
    MetaReader(#[from] BufReaderError),

    #[error("instance of core already closed")]
    AlreadyClosed,

    #[error("process error {0}")]
    Process(#[from] io::Error),

    #[error("core process has no stdout to read meta from")]
    MissingStdout,
}

/// Drives a local stellar-core process and exposes its meta stream.
pub struct StellarCoreRunner {
    executable_path: String,

    context_path: PathBuf,

    config_path: PathBuf,

    status: RunnerStatus,

    process: Option<Child>,
}

impl StellarCoreRunner {
    pub fn new(config: &IngestionConfig, config_path: PathBuf) -> Self {
        Self {
            executable_path: config.executable_path.clone(),
            context_path: PathBuf::from(&config.context_path.0),
            config_path,
            status: RunnerStatus::Closed,
            process: None,
        }
    }

    fn core_command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.executable_path);
        cmd.args(args)
            .arg("--conf")
            .arg(&self.config_path)
            .arg("--ll")
            .arg("ERROR")
            .current_dir(&self.context_path);
        cmd
    }

    /// Runs a one-shot command whose output is not needed.
    fn run_to_completion(&self, args: &[&str]) -> Result<(), RunnerError> {
        log::debug!("running stellar-core {}", args.join(" "));

        let status = self
            .core_command(args)
            .stdout(Stdio::null())
            .status()
            .map_err(RunnerError::CliExec)?;

        if !status.success() {
            return Err(RunnerError::CommandFailed { command: args.join(" "), status });
        }

        Ok(())
    }

    /// Spawns a command whose stdout carries the meta stream and hands
    /// the stream to a reader thread.
    fn stream_meta(&mut self, args: &[&str]) -> Result<Receiver<MetaResult>, RunnerError> {
        log::info!("starting stellar-core {}", args.join(" "));

        let mut child = self
            .core_command(args)
            .stdout(Stdio::piped())
            .spawn()
            .map_err(RunnerError::CliExec)?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                let _ = child.kill();
                return Err(RunnerError::MissingStdout);
            }
        };
        self.process = Some(child);

        let (transmitter, receiver) = sync_channel(LEDGER_READ_AHEAD_BUFFER_SIZE);
        let reader = BufferedLedgerMetaReader::new(Box::new(stdout));
        thread::Builder::new()
            .name("core-meta-reader".to_string())
            .spawn(move || reader.stream_into(transmitter))?;

        Ok(receiver)
    }

    fn kill_process(&mut self) -> Result<(), RunnerError> {
        if let Some(mut child) = self.process.take() {
            if child.try_wait()?.is_none() {
                child.kill()?;
            }
            child.wait()?;
        }

        Ok(())
    }

    fn remove_temp_data(&self) -> Result<(), RunnerError> {
        match fs::remove_dir_all(self.context_path.join("buckets")) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    /// Replays `[from, to]` offline.
    pub fn catchup(&mut self, from: u32, to: u32) -> Result<Receiver<MetaResult>, RunnerError> {
        if self.status != RunnerStatus::Closed {
            return Err(RunnerError::AlreadyRunning);
        }

        let range = format!("{}/{}", to, to.saturating_sub(from) + 1);
        let receiver = self.stream_meta(&["catchup", &range, "--metadata-output-stream", "fd:1", "--in-memory"])?;
        self.status = RunnerStatus::RunningOffline;

        Ok(receiver)
    }

    /// Follows the network starting at `start`, after bringing a fresh
    /// database to the ledger before it.
    pub fn run_from(&mut self, start: u32) -> Result<Receiver<MetaResult>, RunnerError> {
        if self.status != RunnerStatus::Closed {
            return Err(RunnerError::AlreadyRunning);
        }

        self.run_to_completion(&["new-db"])?;
        if start > 2 {
            self.run_to_completion(&["catchup", &format!("{}/0", start - 1)])?;
        }

        let receiver = self.stream_meta(&["run", "--metadata-output-stream", "fd:1"])?;
        self.status = RunnerStatus::RunningOnline;

        Ok(receiver)
    }

    pub fn close(&mut self) -> Result<(), RunnerError> {
        if self.status == RunnerStatus::Closed {
            return Err(RunnerError::AlreadyClosed);
        }

        self.status = RunnerStatus::Closed;
        self.kill_process()?;
        self.remove_temp_data()?;

        log::info!("stellar-core closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ContextPath;

    fn runner(executable: &str, context: &str) -> StellarCoreRunner {
        let config = IngestionConfig {
            executable_path: executable.to_string(),
            context_path: ContextPath(context.to_string()),
            ..Default::default()
        };
        StellarCoreRunner::new(&config, PathBuf::from("stellar-core.cfg"))
    }

    #[test]
    fn missing_executable_keeps_runner_closed() {
        let mut runner = runner("/nonexistent/stellar-core", "/tmp");

        assert!(matches!(runner.catchup(10, 20), Err(RunnerError::CliExec(_))));
        assert_eq!(runner.status(), RunnerStatus::Closed);
        assert!(matches!(runner.close(), Err(RunnerError::AlreadyClosed)));
    }

    #[test]
    fn failed_setup_command_is_reported() {
        let mut runner = runner("false", "/tmp");

        assert!(matches!(runner.run_from(100), Err(RunnerError::CommandFailed { .. })));
        assert_eq!(runner.status(), RunnerStatus::Closed);
    }
}
