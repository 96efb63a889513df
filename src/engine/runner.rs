//! Subprocess token streaming
//!
//! Runs the engine binary once per prompt and forwards its stdout as a
//! stream of text chunks. Abandoning the stream kills the subprocess.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Parameters for one generation run. Immutable once built.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub binary: PathBuf,
    pub model_path: PathBuf,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
    pub context_size: u32,
    pub gpu_layers: u32,
}

/// Spawn the engine for `prompt` and stream its stdout.
///
/// Each non-empty read becomes one chunk, decoded lossily as UTF-8 in
/// arrival order. Stderr is discarded. The stream ends when the process
/// exits; the exit code is deliberately not inspected. A spawn failure
/// yields a single diagnostic chunk instead of an error so the consumer
/// can render it inline.
pub fn stream_generate(prompt: &str, config: &GenerationConfig) -> ReceiverStream<String> {
    let (tx, rx) = mpsc::channel::<String>(32);

    let mut command = Command::new(&config.binary);
    command
        .arg("--model")
        .arg(&config.model_path)
        .arg("--prompt")
        .arg(prompt)
        .arg("--n-predict")
        .arg(config.max_tokens.to_string())
        .arg("--temp")
        .arg(config.temperature.to_string())
        .arg("--top-p")
        .arg(config.top_p.to_string())
        .arg("--ctx-size")
        .arg(config.context_size.to_string())
        .arg("--n-gpu-layers")
        .arg(config.gpu_layers.to_string())
        .arg("--no-display-prompt")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    tracing::debug!("Spawning engine {:?}", config.binary);

    tokio::spawn(async move {
        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                let _ = tx
                    .send(format!("Failed to run the inference engine: {e}"))
                    .await;
                return;
            }
        };

        let Some(mut stdout) = child.stdout.take() else {
            let _ = child.start_kill();
            return;
        };

        let mut buf = [0u8; 4096];
        loop {
            tokio::select! {
                // Consumer abandoned the stream: killing the subprocess is
                // a required side effect, not best effort.
                _ = tx.closed() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return;
                }
                read = stdout.read(&mut buf) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let chunk = String::from_utf8_lossy(&buf[..n]).into_owned();
                        if !chunk.is_empty() && tx.send(chunk).await.is_err() {
                            let _ = child.start_kill();
                            let _ = child.wait().await;
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Engine stdout read error: {}", e);
                        break;
                    }
                }
            }
        }

        // A non-zero exit with no trailing output looks identical to a
        // clean completion; callers treat every natural end as done.
        let _ = child.wait().await;
    });

    ReceiverStream::new(rx)
}
