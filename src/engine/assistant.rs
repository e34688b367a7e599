use std::fmt;
use std::io::{ErrorKind, Read as _, Write as _};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, PoisonError};

use tokio::sync::Mutex;

use crate::config::AssistantConfig;
use crate::error::{RecapError, Result};
use crate::level::SummaryLevel;
use crate::parse::{ResponseParser, StructuredSummary};
use crate::prompt;

use super::{EngineTier, RequestContext, SummarizationEngine};

/// A platform-provided, on-device text generator.
///
/// `respond` blocks; the engine always calls it from a blocking worker
/// thread and calls `abort` from the async side when the request is
/// cancelled.
pub trait AssistantBackend: Send + Sync {
    /// Capability level reported by the platform. Higher is better.
    fn capability_level(&self) -> u32;

    fn respond(&self, system: &str, user: &str) -> Result<String>;

    /// Stop an in-flight `respond`, which should then return
    /// [`RecapError::Cancelled`].
    fn abort(&self) {}
}

/// Runs an on-device assistant helper program, writing the prompt to its
/// stdin and reading the answer from stdout.
#[derive(Debug)]
pub struct CommandAssistant {
    command: String,
    args: Vec<String>,
    capability: u32,
    running: std::sync::Mutex<Option<Child>>,
}

impl CommandAssistant {
    #[must_use]
    pub const fn new(command: String, args: Vec<String>, capability: u32) -> Self {
        Self {
            command,
            args,
            capability,
            running: std::sync::Mutex::new(None),
        }
    }
}

impl AssistantBackend for CommandAssistant {
    fn capability_level(&self) -> u32 {
        self.capability
    }

    fn respond(&self, system: &str, user: &str) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                RecapError::Generation(format!("failed to run assistant {}: {e}", self.command))
            })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        *self.running.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);

        // stdin and stdout are serviced concurrently; either pipe may fill first.
        let prompt = format!("{system}\n\n{user}");
        let writer = stdin.map(|mut stdin| {
            std::thread::spawn(move || stdin.write_all(prompt.as_bytes()))
        });

        let mut out = Vec::new();
        let read = stdout.map(|mut stdout| stdout.read_to_end(&mut out));

        let written = writer.map(std::thread::JoinHandle::join);
        let Some(mut child) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(RecapError::Cancelled);
        };
        let status = child
            .wait()
            .map_err(|e| RecapError::Generation(format!("assistant failed: {e}")))?;

        if let Some(Err(e)) = read {
            return Err(RecapError::Generation(format!(
                "failed to read assistant reply: {e}"
            )));
        }
        if let Some(Ok(Err(e))) = written
            && e.kind() != ErrorKind::BrokenPipe
        {
            return Err(RecapError::Generation(format!(
                "failed to write assistant prompt: {e}"
            )));
        }
        if !status.success() {
            return Err(RecapError::Generation(format!("assistant exited with {status}")));
        }

        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn abort(&self) {
        if let Some(mut child) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            tracing::debug!("killing assistant {}", self.command);
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Tier backed by an [`AssistantBackend`], gated on its capability level.
pub struct AssistantEngine {
    backend: Option<Arc<dyn AssistantBackend>>,
    min_capability: u32,
    calls: Mutex<u64>,
}

impl fmt::Debug for AssistantEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssistantEngine")
            .field("installed", &self.backend.is_some())
            .field("min_capability", &self.min_capability)
            .finish_non_exhaustive()
    }
}

impl AssistantEngine {
    #[must_use]
    pub fn new(backend: Option<Arc<dyn AssistantBackend>>, min_capability: u32) -> Self {
        Self {
            backend,
            min_capability,
            calls: Mutex::new(0),
        }
    }

    /// Use the configured helper program, if any.
    #[must_use]
    pub fn from_config(config: &AssistantConfig) -> Self {
        let backend = config.command.as_ref().map(|command| {
            Arc::new(CommandAssistant::new(
                command.clone(),
                config.args.clone(),
                config.capability,
            )) as Arc<dyn AssistantBackend>
        });
        Self::new(backend, config.min_capability)
    }

    /// Completed backend invocations.
    pub async fn calls(&self) -> u64 {
        *self.calls.lock().await
    }

    fn ready_backend(&self) -> Result<&Arc<dyn AssistantBackend>> {
        let backend = self.backend.as_ref().ok_or_else(|| RecapError::Unavailable {
            tier: EngineTier::OnDeviceAssistant,
            reason: "no on-device assistant installed".to_string(),
        })?;

        let level = backend.capability_level();
        if level < self.min_capability {
            return Err(RecapError::Unavailable {
                tier: EngineTier::OnDeviceAssistant,
                reason: format!(
                    "capability level {level} is below the required {}",
                    self.min_capability
                ),
            });
        }

        Ok(backend)
    }
}

impl SummarizationEngine for AssistantEngine {
    fn tier(&self) -> EngineTier {
        EngineTier::OnDeviceAssistant
    }

    async fn readiness(&self) -> Result<()> {
        self.ready_backend().map(|_| ())
    }

    async fn summarize(
        &self,
        level: SummaryLevel,
        text: &str,
        ctx: &RequestContext,
    ) -> Result<StructuredSummary> {
        let backend = Arc::clone(self.ready_backend()?);
        let mut calls = self.calls.lock().await;

        let messages = prompt::build_messages(level, text, &ctx.metadata);
        let worker = Arc::clone(&backend);
        let task = tokio::task::spawn_blocking(move || {
            worker.respond(&messages.system, &messages.user)
        });

        let mut cancel = ctx.cancel.clone();
        let raw = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                backend.abort();
                return Err(RecapError::Cancelled);
            }
            joined = task => joined
                .map_err(|e| RecapError::Generation(format!("assistant task failed: {e}")))??,
        };
        *calls += 1;

        let summary = ResponseParser::parse(level, &raw, text)?;
        Ok(summary.with_tier(EngineTier::OnDeviceAssistant))
    }
}
