use std::path::PathBuf;
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;

use crate::config::RuntimeConfig;
use crate::error::{RecapError, Result};
use crate::generate::GenerationConfig;

use super::EngineTier;

/// One generation request handed to a runtime.
#[derive(Debug, Clone)]
pub struct RuntimeRequest {
    pub model_path: PathBuf,
    /// Fully rendered prompt, chat template included.
    pub prompt: String,
    pub config: GenerationConfig,
}

/// Source of text increments for the local tier.
///
/// `start` returns immediately; increments arrive on the channel. Dropping
/// the receiver must stop generation.
pub trait LocalRuntime: Send + Sync {
    fn start(&self, request: RuntimeRequest) -> Result<mpsc::Receiver<Result<String>>>;
}

/// Runs a llama.cpp-style command line generator and streams its stdout.
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    command: String,
    args: Vec<String>,
}

impl ProcessRuntime {
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    fn expand_args(&self, request: &RuntimeRequest) -> Vec<String> {
        let model = request.model_path.to_string_lossy();
        let n_predict = request.config.max_output_tokens.to_string();
        let ctx = request.config.context_window.to_string();
        let batch = request.config.batch_size.to_string();
        let temp = request.config.temperature.to_string();

        self.args
            .iter()
            .map(|arg| {
                if arg == "{prompt}" {
                    return request.prompt.clone();
                }
                arg.replace("{model}", &model)
                    .replace("{n_predict}", &n_predict)
                    .replace("{ctx}", &ctx)
                    .replace("{batch}", &batch)
                    .replace("{temp}", &temp)
            })
            .collect()
    }
}

impl LocalRuntime for ProcessRuntime {
    fn start(&self, request: RuntimeRequest) -> Result<mpsc::Receiver<Result<String>>> {
        let mut child = Command::new(&self.command)
            .args(self.expand_args(&request))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RecapError::Unavailable {
                tier: EngineTier::Local,
                reason: format!("failed to start {}: {e}", self.command),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| {
            RecapError::Generation("generator process has no stdout".to_string())
        })?;

        tracing::debug!("started {} with pid {:?}", self.command, child.id());

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let mut pending: Vec<u8> = Vec::new();
            let mut sent_any = false;

            loop {
                let n = match stdout.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        let _ = tx
                            .send(Err(RecapError::Generation(format!(
                                "failed to read generator output: {e}"
                            ))))
                            .await;
                        let _ = child.start_kill();
                        return;
                    }
                };

                pending.extend_from_slice(&buf[..n]);
                let piece = take_utf8(&mut pending);
                if piece.is_empty() {
                    continue;
                }
                if tx.send(Ok(piece)).await.is_err() {
                    // Receiver gone: generation stopped early.
                    let _ = child.start_kill();
                    return;
                }
                sent_any = true;
            }

            if !pending.is_empty() {
                let _ = tx
                    .send(Ok(String::from_utf8_lossy(&pending).into_owned()))
                    .await;
                sent_any = true;
            }

            match child.wait().await {
                Ok(status) if !status.success() && !sent_any => {
                    let _ = tx
                        .send(Err(RecapError::Generation(format!(
                            "generator exited with {status}"
                        ))))
                        .await;
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("failed to reap generator process: {e}"),
            }
        });

        Ok(rx)
    }
}

/// Remove and return the longest decodable prefix of `pending`, keeping an
/// incomplete trailing sequence for the next read. Invalid bytes are
/// replaced.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(pending) {
            Ok(s) => {
                out.push_str(s);
                pending.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                match e.error_len() {
                    Some(len) => {
                        out.push_str(&String::from_utf8_lossy(&pending[..valid + len]));
                        pending.drain(..valid + len);
                    }
                    None => {
                        out.push_str(&String::from_utf8_lossy(&pending[..valid]));
                        pending.drain(..valid);
                        return out;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generate::ModelFamily;

    fn request(prompt: &str) -> RuntimeRequest {
        RuntimeRequest {
            model_path: PathBuf::from("/models/m.gguf"),
            prompt: prompt.to_string(),
            config: GenerationConfig::for_family(ModelFamily::Llama3),
        }
    }

    fn runtime(command: &str, args: &[&str]) -> ProcessRuntime {
        ProcessRuntime::new(&RuntimeConfig {
            command: command.to_string(),
            args: args.iter().map(ToString::to_string).collect(),
        })
    }

    async fn collect(mut rx: mpsc::Receiver<Result<String>>) -> Result<String> {
        let mut out = String::new();
        while let Some(piece) = rx.recv().await {
            out.push_str(&piece?);
        }
        Ok(out)
    }

    #[test]
    fn placeholders_are_expanded() {
        let rt = runtime("llama-cli", &["-m", "{model}", "-n", "{n_predict}", "-p", "{prompt}"]);
        let args = rt.expand_args(&request("say {model} hi"));
        assert_eq!(
            args,
            vec!["-m", "/models/m.gguf", "-n", "1024", "-p", "say {model} hi"]
        );
    }

    #[test]
    fn split_utf8_sequences_wait_for_completion() {
        let bytes = "héllo".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "h");
        assert_eq!(pending.len(), 1);
        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "éllo");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn streams_process_stdout() {
        let rt = runtime("printf", &["%s", "{prompt}"]);
        let rx = rt.start(request("hello from the runtime")).unwrap_or_else(|e| panic!("{e}"));
        let text = collect(rx).await.unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(text, "hello from the runtime");
    }

    #[tokio::test]
    async fn silent_failure_is_a_generation_error() {
        let rt = runtime("false", &[]);
        let rx = rt.start(request("x")).unwrap_or_else(|e| panic!("{e}"));
        assert!(matches!(collect(rx).await, Err(RecapError::Generation(_))));
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let rt = runtime("/nonexistent/llama-cli", &[]);
        assert!(matches!(
            rt.start(request("x")),
            Err(RecapError::Unavailable { .. })
        ));
    }
}
