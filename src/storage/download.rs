//! Model downloader
//!
//! Fetches missing or invalid model files one at a time, writing each
//! transfer to a temp file and swapping it into place on success.

use crate::catalog::ModelDescriptor;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Environment variables consulted for a download access token, in order.
pub const TOKEN_ENV_KEYS: [&str; 2] = ["HF_TOKEN", "HUGGINGFACE_TOKEN"];

/// Download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Download failed with status {0}. If the model is gated, set HF_TOKEN.")]
    HttpStatus(u16),
    #[error("Downloaded {0} looks incomplete. Check access to the source and retry.")]
    InvalidSize(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Request error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Access token from the process environment.
pub fn access_token() -> Option<String> {
    access_token_with(|key| std::env::var(key).ok())
}

/// Token lookup with an injectable environment, for tests.
///
/// The first key that is set wins; a set-but-empty value yields no token
/// rather than falling through to the next key.
pub fn access_token_with(env: impl Fn(&str) -> Option<String>) -> Option<String> {
    let token = TOKEN_ENV_KEYS.iter().find_map(|key| env(key))?;
    (!token.is_empty()).then_some(token)
}

/// Ensure every descriptor has a valid local file in `dir`.
///
/// Descriptors that are already valid are skipped without side effects.
/// Transfers run sequentially; `on_progress(descriptor, index, total)` fires
/// with the 1-based position before each transfer starts. The first failure
/// aborts the remaining batch; retrying is the caller's decision.
pub async fn ensure_all_present(
    descriptors: &[ModelDescriptor],
    dir: &Path,
    on_progress: impl Fn(&ModelDescriptor, usize, usize),
) -> Result<(), DownloadError> {
    ensure_all_present_with(descriptors, dir, on_progress, |key| std::env::var(key).ok()).await
}

/// `ensure_all_present` with an injectable environment lookup, so tests can
/// exercise the token path without mutating the process environment.
pub async fn ensure_all_present_with(
    descriptors: &[ModelDescriptor],
    dir: &Path,
    on_progress: impl Fn(&ModelDescriptor, usize, usize),
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), DownloadError> {
    if descriptors.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(dir)?;

    let client = reqwest::Client::new();
    let total = descriptors.len();

    for (index, model) in descriptors.iter().enumerate() {
        if model.is_valid_in(dir) {
            continue;
        }

        let local_path = model.local_path_in(dir);

        // A leftover partial or corrupt file blocks the rename below.
        if local_path.exists() {
            tracing::info!("Removing invalid local file {:?}", local_path);
            fs::remove_file(&local_path)?;
        }

        on_progress(model, index + 1, total);
        tracing::info!("Downloading {} from {}", model.name, model.download_url);

        let mut request = client.get(&model.download_url);
        if let Some(token) = access_token_with(&env) {
            request = request.bearer_auth(token);
        }

        let mut response = request.send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus(response.status().as_u16()));
        }

        let temp_path = dir.join(format!("{}.download", model.file_name));
        let mut temp_file = File::create(&temp_path).await?;
        while let Some(chunk) = response.chunk().await? {
            temp_file.write_all(&chunk).await?;
        }
        temp_file.flush().await?;
        drop(temp_file);

        // Remove-then-move: a crash in between leaves the slot empty, which
        // the next run's validity check recovers from.
        if local_path.exists() {
            fs::remove_file(&local_path)?;
        }
        fs::rename(&temp_path, &local_path)?;

        if !model.is_valid_in(dir) {
            let _ = fs::remove_file(&local_path);
            return Err(DownloadError::InvalidSize(model.name.clone()));
        }
        tracing::info!("Download complete: {:?}", local_path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelBackend;
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn descriptor(id: &str, url: &str, min: u64) -> ModelDescriptor {
        ModelDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            backend: ModelBackend::LlamaCpp,
            download_url: url.to_string(),
            file_name: format!("{id}.gguf"),
            minimum_bytes: min,
        }
    }

    /// Minimal canned-response HTTP listener; answers every connection with
    /// the same status line and body.
    async fn spawn_http_server(status: &'static str, body: Vec<u8>) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let body = body.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 2048];
                    let _ = sock.read(&mut buf).await;
                    let head = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                        body.len()
                    );
                    let _ = sock.write_all(head.as_bytes()).await;
                    let _ = sock.write_all(&body).await;
                    let _ = sock.shutdown().await;
                });
            }
        });
        format!("http://{addr}/model.gguf")
    }

    #[test]
    fn test_access_token_priority_order() {
        let token = access_token_with(|key| match key {
            "HF_TOKEN" => Some("first".to_string()),
            "HUGGINGFACE_TOKEN" => Some("second".to_string()),
            _ => None,
        });
        assert_eq!(token.as_deref(), Some("first"));
    }

    #[test]
    fn test_access_token_empty_first_key_yields_none() {
        // A set-but-empty HF_TOKEN disables auth; it does not fall
        // through to HUGGINGFACE_TOKEN.
        let token = access_token_with(|key| match key {
            "HF_TOKEN" => Some(String::new()),
            "HUGGINGFACE_TOKEN" => Some("fallback".to_string()),
            _ => None,
        });
        assert_eq!(token, None);
    }

    #[test]
    fn test_access_token_second_key_when_first_unset() {
        let token = access_token_with(|key| {
            (key == "HUGGINGFACE_TOKEN").then(|| "fallback".to_string())
        });
        assert_eq!(token.as_deref(), Some("fallback"));
    }

    #[tokio::test]
    async fn test_skips_valid_descriptors_without_progress() {
        let dir = tempfile::tempdir().unwrap();
        let model = descriptor("valid", "http://127.0.0.1:1/unused", 4);
        fs::write(model.local_path_in(dir.path()), b"12345").unwrap();

        let calls = Arc::new(Mutex::new(0usize));
        let seen = calls.clone();
        ensure_all_present(&[model], dir.path(), move |_, _, _| {
            *seen.lock().unwrap() += 1;
        })
        .await
        .unwrap();
        assert_eq!(*calls.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_downloads_missing_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server("200 OK", vec![b'x'; 64]).await;

        let missing = descriptor("missing", &url, 64);
        let valid = descriptor("already", "http://127.0.0.1:1/unused", 4);
        fs::write(valid.local_path_in(dir.path()), b"12345").unwrap();

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = calls.clone();
        let batch = [missing.clone(), valid];
        ensure_all_present(&batch, dir.path(), move |m, index, total| {
            seen.lock().unwrap().push((m.id.clone(), index, total));
        })
        .await
        .unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec![("missing".to_string(), 1, 2)]
        );
        assert!(missing.is_valid_in(dir.path()));
    }

    #[tokio::test]
    async fn test_token_sent_as_bearer_auth_header() {
        let dir = tempfile::tempdir().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let captured = Arc::new(Mutex::new(String::new()));
        let sink = captured.clone();
        tokio::spawn(async move {
            if let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 2048];
                let n = sock.read(&mut buf).await.unwrap_or(0);
                *sink.lock().unwrap() = String::from_utf8_lossy(&buf[..n]).into_owned();
                let body = vec![b'x'; 16];
                let head = format!(
                    "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                    body.len()
                );
                let _ = sock.write_all(head.as_bytes()).await;
                let _ = sock.write_all(&body).await;
                let _ = sock.shutdown().await;
            }
        });

        let model = descriptor("gated", &format!("http://{addr}/model.gguf"), 16);
        ensure_all_present_with(&[model], dir.path(), |_, _, _| {}, |key| {
            (key == "HF_TOKEN").then(|| "secret-token".to_string())
        })
        .await
        .unwrap();

        let request = captured.lock().unwrap().to_lowercase();
        assert!(
            request.contains("authorization: bearer secret-token"),
            "missing bearer header in request:\n{request}"
        );
    }

    #[tokio::test]
    async fn test_http_error_aborts_batch() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server("403 Forbidden", Vec::new()).await;

        let gated = descriptor("gated", &url, 8);
        let untouched = descriptor("later", &url, 8);

        let err = ensure_all_present(&[gated, untouched.clone()], dir.path(), |_, _, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus(403)));
        assert!(!untouched.is_valid_in(dir.path()));
        assert!(!untouched.local_path_in(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_short_body_fails_and_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server("200 OK", vec![b'x'; 8]).await;

        let model = descriptor("short", &url, 1024);
        let err = ensure_all_present(&[model.clone()], dir.path(), |_, _, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::InvalidSize(_)));
        assert!(!model.local_path_in(dir.path()).exists());
    }

    #[tokio::test]
    async fn test_replaces_invalid_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let url = spawn_http_server("200 OK", vec![b'y'; 32]).await;

        let model = descriptor("partial", &url, 32);
        fs::write(model.local_path_in(dir.path()), b"stub").unwrap();

        ensure_all_present(&[model.clone()], dir.path(), |_, _, _| {})
            .await
            .unwrap();
        assert!(model.is_valid_in(dir.path()));
        assert_eq!(
            fs::metadata(model.local_path_in(dir.path())).unwrap().len(),
            32
        );
    }
}
