// crates/server/src/routes/transfers.rs
//! File transfers inside the transfer root, run as single-flight jobs that
//! report progress to the requesting browser client.
//!
//! - POST /transfers - Start copying `source` to `destination`

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use toolbox_core::{DisplayMode, JobError, JobHandle, NoticeAndProgress, Noticer, NoticerConfig};

use crate::error::{ApiError, ApiResult};
use crate::metrics::record_transfer;
use crate::routes::ActingUser;
use crate::state::AppState;

/// Registry operation name for transfers. Jobs are keyed by the normalized
/// destination path.
pub const TRANSFER_OP: &str = "transfer";
/// Message type transfer notices are sent under.
pub const TRANSFER_KIND: &str = "transfer";

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source: String,
    pub destination: String,
    #[serde(default, rename = "clientID")]
    pub client_id: String,
    #[serde(default, rename = "noticeID")]
    pub notice_id: String,
    #[serde(default)]
    pub notice_mode: String,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(Deserialize))]
#[serde(rename_all = "camelCase")]
pub struct TransferAccepted {
    pub job_id: String,
    pub op: String,
    pub key: String,
}

#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error(transparent)]
    Cancelled(#[from] JobError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A path below the transfer root with `.` components dropped. `key` is the
/// normalized relative form, used as the registry cache key.
#[derive(Debug, PartialEq, Eq)]
struct RootedPath {
    full: PathBuf,
    key: String,
}

/// Resolve `relative` below `root`, rejecting anything that could leave it.
fn confine(root: &Path, relative: &str) -> ApiResult<RootedPath> {
    if relative.trim().is_empty() {
        return Err(ApiError::BadRequest("empty path".to_string()));
    }
    let mut normalized = PathBuf::new();
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => normalized.push(part),
            Component::CurDir => {}
            _ => {
                return Err(ApiError::BadRequest(format!(
                    "path must stay inside the transfer root: {relative}"
                )))
            }
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(ApiError::BadRequest(format!("path names no file: {relative}")));
    }
    let key = normalized
        .iter()
        .map(|part| part.to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    Ok(RootedPath {
        full: root.join(&normalized),
        key,
    })
}

/// True when both paths name one file, by spelling or through links.
async fn same_file(source: &RootedPath, destination: &RootedPath) -> bool {
    if source.key == destination.key {
        return true;
    }
    match (
        tokio::fs::canonicalize(&source.full).await,
        tokio::fs::canonicalize(&destination.full).await,
    ) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// POST /api/transfers
async fn start_transfer(
    State(state): State<Arc<AppState>>,
    ActingUser(user): ActingUser,
    Json(req): Json<TransferRequest>,
) -> ApiResult<(StatusCode, Json<TransferAccepted>)> {
    let source = confine(&state.transfer_root, &req.source)?;
    let destination = confine(&state.transfer_root, &req.destination)?;
    let meta = tokio::fs::metadata(&source.full)
        .await
        .map_err(|_| ApiError::NotFound(format!("source {}", req.source)))?;
    if !meta.is_file() {
        return Err(ApiError::BadRequest(format!("source is not a file: {}", req.source)));
    }
    if same_file(&source, &destination).await {
        return Err(ApiError::BadRequest(format!(
            "source and destination are the same file: {}",
            source.key
        )));
    }

    let handle = state
        .context
        .job_handle()
        .with_option("source", req.source.clone())
        .with_option("user", user.clone());
    state
        .context
        .registry()
        .register(TRANSFER_OP, &destination.key, handle.clone())?;

    let config = NoticerConfig::new(user.clone(), TRANSFER_KIND)
        .client_id(req.client_id)
        .display_id(req.notice_id)
        .title(format!("Copy {}", req.source))
        .mode(DisplayMode::parse(&req.notice_mode));
    let noticer = Noticer::new(state.context.bus(), handle.token(), config).with_progress();

    tracing::info!(
        user = %user,
        source = %req.source,
        destination = %destination.key,
        job_id = %handle.id(),
        "Starting transfer"
    );
    let accepted = TransferAccepted {
        job_id: handle.id().to_string(),
        op: TRANSFER_OP.to_string(),
        key: destination.key.clone(),
    };
    tokio::spawn(run_transfer(
        Arc::clone(&state),
        handle,
        destination.key,
        source.full,
        destination.full,
        meta.len(),
        noticer,
    ));

    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn run_transfer(
    state: Arc<AppState>,
    handle: JobHandle,
    key: String,
    source: PathBuf,
    destination: PathBuf,
    size: u64,
    np: NoticeAndProgress,
) {
    let started = Instant::now();
    let result = copy_file(&handle, &source, &destination, size, &np).await;

    let (label, status, content) = match &result {
        Ok(bytes) => {
            np.complete();
            ("ok", 1, format!("copied {bytes} bytes"))
        }
        Err(TransferError::Cancelled(_)) => ("cancelled", 0, "transfer cancelled".to_string()),
        Err(TransferError::Io(e)) => {
            tracing::warn!(key = %key, error = %e, "Transfer failed");
            ("failed", 0, format!("transfer failed: {e}"))
        }
    };
    if let Err(e) = np.send(content, status).await {
        tracing::debug!(key = %key, error = %e, "Final transfer notice not delivered");
    }

    state.context.registry().finish(TRANSFER_OP, &key, handle.id());
    record_transfer(label, np.progress().finished().max(0) as u64, started.elapsed());
}

async fn copy_file(
    handle: &JobHandle,
    source: &Path,
    destination: &Path,
    size: u64,
    np: &NoticeAndProgress,
) -> Result<u64, TransferError> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut reader = np.proxy_reader(File::open(source).await?);
    let mut out = File::create(destination).await?;
    np.add(size as i64);

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut copied = 0u64;
    let mut reported_step = 0u64;
    loop {
        let n = tokio::select! {
            read = reader.read(&mut buf) => read?,
            _ = handle.token().cancelled() => return Err(JobError::ForcedExit.into()),
        };
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n]).await?;
        copied += n as u64;

        // One notice per 10% step.
        let step = (np.progress().calc_percent() / 10.0) as u64;
        if step > reported_step && step < 10 {
            reported_step = step;
            match np.send(format!("{}% copied", step * 10), 1).await {
                Ok(()) => {}
                Err(e) if e.is_forced_exit() => return Err(JobError::ForcedExit.into()),
                Err(e) => tracing::debug!(error = %e, "Transfer progress notice not delivered"),
            }
        }
    }
    out.flush().await?;
    Ok(copied)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/transfers", post(start_transfer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confine_accepts_relative_paths() {
        let root = Path::new("/srv/data");
        let path = confine(root, "a/b.txt").unwrap();
        assert_eq!(path.full, root.join("a/b.txt"));
        assert_eq!(path.key, "a/b.txt");
    }

    #[test]
    fn test_confine_drops_dot_components() {
        let root = Path::new("/srv/data");
        assert_eq!(confine(root, "./c.txt").unwrap(), confine(root, "c.txt").unwrap());
        assert_eq!(confine(root, "a/./b/.//c").unwrap().key, "a/b/c");
        assert!(confine(root, "./").is_err());
    }

    #[test]
    fn test_confine_rejects_escapes() {
        let root = Path::new("/srv/data");
        assert!(confine(root, "../etc/passwd").is_err());
        assert!(confine(root, "a/../../b").is_err());
        assert!(confine(root, "/etc/passwd").is_err());
        assert!(confine(root, "  ").is_err());
    }

    #[tokio::test]
    async fn test_same_file_by_spelling() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("in.bin"), b"data").unwrap();
        let root = dir.path();

        let src = confine(root, "in.bin").unwrap();
        assert!(same_file(&src, &confine(root, "./in.bin").unwrap()).await);
        assert!(!same_file(&src, &confine(root, "out.bin").unwrap()).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_same_file_through_symlink() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::write(root.join("in.bin"), b"data").unwrap();
        std::os::unix::fs::symlink(root.join("in.bin"), root.join("alias.bin")).unwrap();

        let src = confine(root, "in.bin").unwrap();
        assert!(same_file(&src, &confine(root, "alias.bin").unwrap()).await);
    }
}
