use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::queue::EventSender;

use super::{pump_lines, CaptureTarget, ObservationSource};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Probe requests only.
pub const DEFAULT_DISPLAY_FILTER: &str = "wlan.fc.type_subtype == 0x0004";

const STDERR_TAIL_LINES: usize = 20;

/// Runs tshark against an interface or capture file and reads its
/// `wlan.sa` / `frame.time_epoch` field output.
pub struct TsharkSource {
    program: PathBuf,
    target: CaptureTarget,
    display_filter: String,
}

impl TsharkSource {
    pub fn new(program: PathBuf, target: CaptureTarget, display_filter: String) -> Self {
        Self {
            program,
            target,
            display_filter,
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(14);
        match &self.target {
            CaptureTarget::Live { interface } => {
                args.push("-i".to_string());
                args.push(interface.clone());
            }
            CaptureTarget::Pcap { path } | CaptureTarget::EventLog { path } => {
                args.push("-r".to_string());
                args.push(path.display().to_string());
            }
        }
        args.extend(
            ["-l", "-n", "-T", "fields", "-e", "wlan.sa", "-e", "frame.time_epoch"]
                .iter()
                .map(|s| s.to_string()),
        );
        if !self.display_filter.is_empty() {
            args.push("-Y".to_string());
            args.push(self.display_filter.clone());
        }
        args
    }
}

fn collect_stderr(stderr: ChildStderr) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            log_debug!("tshark: {line}");
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().collect()
    })
}

#[async_trait]
impl ObservationSource for TsharkSource {
    fn describe(&self) -> String {
        format!("tshark on {}", self.target)
    }

    async fn run(self: Box<Self>, events: EventSender, cancel_token: CancellationToken) -> Result<()> {
        let args = self.args();
        log_info!("starting {} {}", self.program.display(), args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch {}", self.program.display()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("tshark stdout was not captured"))?;
        let stderr_task = child.stderr.take().map(collect_stderr);

        let pumped = pump_lines(BufReader::new(stdout), &events, &cancel_token).await;

        if pumped.is_err() || cancel_token.is_cancelled() || events.is_closed() {
            log_info!("stopping tshark");
            if let Err(err) = child.kill().await {
                log_warn!("failed to kill tshark: {err}");
            }
            pumped?;
            return Ok(());
        }

        let status = child.wait().await.context("failed to wait for tshark")?;
        let stderr_tail = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => Vec::new(),
        };

        if !status.success() {
            bail!(
                "tshark exited with {status}: {}",
                if stderr_tail.is_empty() {
                    "no diagnostics".to_string()
                } else {
                    stderr_tail.join("\n")
                }
            );
        }

        log_info!("tshark finished: {status}");
        Ok(())
    }
}
