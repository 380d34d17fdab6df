//! Drives one received message through the task lifecycle.
//!
//! The task is loaded (or created, for messages that originate from storage
//! events), flipped to `processing`, its input downloaded, and every
//! requested transcode type encoded and uploaded in order. An abort between
//! or during types stops the run; a failure in one type does not stop the
//! others. The message is acknowledged whatever the outcome.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tc_av::ExecutionEngine;
use tc_core::{
    Error, ErrorDetail, ErrorStage, ProgressState, QueueMessage, Result, TaskOutcome, TaskStatus,
};
use tc_db::TaskStore;
use tc_queue::ReceivedMessage;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

/// How one transcode type ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeOutcome {
    Completed,
    Failed,
    Aborted,
}

/// Process one message and acknowledge it.
pub async fn process_message(ctx: &AppContext, engine: &ExecutionEngine, received: &ReceivedMessage) {
    let task_id = &received.message.task_id;
    tracing::info!(
        task_id = %task_id,
        message_id = %received.message_id,
        receive_count = received.receive_count,
        "Processing message"
    );

    if let Err(e) = process_task(ctx, engine, &received.message).await {
        tracing::error!(task_id = %task_id, error = %e, "Task processing failed");
        fail_stranded(&ctx.store, task_id, &e);
    }

    // Failures are reported through the task, never through redelivery.
    if let Err(e) = ctx.queue.delete(&received.receipt_handle).await {
        tracing::warn!(task_id = %task_id, error = %e, "Failed to delete message");
    }
}

async fn process_task(ctx: &AppContext, engine: &ExecutionEngine, msg: &QueueMessage) -> Result<()> {
    let store = &ctx.store;
    let task = match store.get(&msg.task_id) {
        Ok(task) => task,
        Err(e) if e.is_not_found() => store.create_with_id(
            &msg.task_id,
            &msg.input_bucket,
            &msg.input_key,
            &msg.output_bucket,
            msg.transcode_types.clone(),
        )?,
        Err(e) => return Err(e),
    };

    if task.status == TaskStatus::Cancelled {
        tracing::info!(task_id = %task.task_id, "Task was cancelled; skipping");
        return Ok(());
    }

    store.begin_run(&msg.task_id)?;

    let input = match download(ctx, msg).await {
        Ok(path) => path,
        Err(e) => {
            tracing::error!(task_id = %msg.task_id, error = %e, "Download failed");
            record(
                &msg.task_id,
                "error detail",
                store.add_error_detail(
                    &msg.task_id,
                    ErrorDetail::new("", ErrorStage::Download, e.to_string()).with_output(
                        format!("Bucket: {}, Key: {}", msg.input_bucket, msg.input_key),
                    ),
                ),
            );
            store.update_status(
                &msg.task_id,
                TaskStatus::Failed,
                Some(&format!("download failed: {e}")),
            )?;
            return Ok(());
        }
    };

    let outcome = run_types(ctx, engine, msg, &input).await;
    remove_local(&input).await;

    tracing::info!(task_id = %msg.task_id, outcome = ?outcome, "Task run finished");
    if let Some((status, message)) = outcome.final_status() {
        store.update_status(&msg.task_id, status, message)?;
    }
    Ok(())
}

/// Move a task the run could not finish out of `processing`, so it can be
/// retried. Best effort: the store may be what failed.
fn fail_stranded(store: &TaskStore, task_id: &str, error: &Error) {
    match store.get(task_id) {
        Ok(task) if task.status == TaskStatus::Processing => {
            record(task_id, "progress", store.mark_incomplete_failed(task_id));
            record(
                task_id,
                "status",
                store.update_status(
                    task_id,
                    TaskStatus::Failed,
                    Some(&format!("internal error: {error}")),
                ),
            );
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(task_id, error = %e, "Could not load task to mark it failed"),
    }
}

/// Log a failed bookkeeping write; the run carries on without it.
fn record<T>(task_id: &str, what: &str, result: Result<T>) {
    if let Err(e) = result {
        tracing::warn!(task_id, what, error = %e, "Failed to record task state");
    }
}

/// Whether the task left `processing`. A failed lookup counts as not
/// aborted; the abort watcher and the next checkpoint look again.
fn aborted(store: &TaskStore, task_id: &str) -> bool {
    store.is_aborted(task_id).unwrap_or_else(|e| {
        tracing::warn!(task_id, error = %e, "Abort check failed");
        false
    })
}

async fn run_types(
    ctx: &AppContext,
    engine: &ExecutionEngine,
    msg: &QueueMessage,
    input: &Path,
) -> TaskOutcome {
    let mut was_aborted = false;
    let mut has_error = false;

    for transcode_type in &msg.transcode_types {
        if aborted(&ctx.store, &msg.task_id) {
            tracing::info!(task_id = %msg.task_id, "Task aborted; stopping");
            was_aborted = true;
            break;
        }

        match run_type(ctx, engine, msg, transcode_type, input).await {
            TypeOutcome::Completed => {}
            TypeOutcome::Failed => has_error = true,
            TypeOutcome::Aborted => {
                was_aborted = true;
                break;
            }
        }
    }

    TaskOutcome::aggregate(was_aborted, has_error)
}

async fn run_type(
    ctx: &AppContext,
    engine: &ExecutionEngine,
    msg: &QueueMessage,
    transcode_type: &str,
    input: &Path,
) -> TypeOutcome {
    let outcome = encode_and_upload(ctx, engine, msg, transcode_type, input).await;
    if outcome == TypeOutcome::Aborted {
        // An abort fails every unfinished type, including this one.
        record(
            &msg.task_id,
            "progress",
            ctx.store
                .update_progress(&msg.task_id, transcode_type, ProgressState::Failed),
        );
    }
    outcome
}

async fn encode_and_upload(
    ctx: &AppContext,
    engine: &ExecutionEngine,
    msg: &QueueMessage,
    transcode_type: &str,
    input: &Path,
) -> TypeOutcome {
    let store = &ctx.store;
    let task_id = msg.task_id.as_str();
    match store.begin_type(task_id, transcode_type) {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(task_id, transcode_type, "Task aborted before type started");
            return TypeOutcome::Aborted;
        }
        Err(e) => tracing::warn!(task_id, transcode_type, error = %e, "Failed to mark type processing"),
    }

    let profile = match engine.profiles().get(transcode_type) {
        Ok(profile) => profile.clone(),
        Err(e) => {
            record(
                task_id,
                "error detail",
                store.add_error_detail(
                    task_id,
                    ErrorDetail::new(transcode_type, ErrorStage::Prepare, e.to_string()),
                ),
            );
            record(
                task_id,
                "progress",
                store.update_progress(task_id, transcode_type, ProgressState::Failed),
            );
            return TypeOutcome::Failed;
        }
    };

    let file_name = output_name(&msg.input_key, transcode_type, &profile.extension);
    let output = local_path(&ctx.config.worker.temp_dir, task_id, &file_name);

    let cancel = CancellationToken::new();
    let watcher = spawn_abort_watcher(
        ctx.store.clone(),
        task_id.to_string(),
        ctx.config.worker.abort_poll(),
        cancel.clone(),
    );
    let encoded = engine.transcode(&profile, input, &output, &cancel).await;
    watcher.abort();

    match encoded {
        Ok(report) => {
            tracing::info!(
                task_id,
                transcode_type,
                duration_ms = report.duration.as_millis() as u64,
                software_fallback = report.software_fallback,
                "Transcode succeeded"
            );
        }
        Err(failure) if failure.is_cancelled() => {
            tracing::info!(task_id, transcode_type, "Encode killed after abort");
            return TypeOutcome::Aborted;
        }
        Err(failure) => {
            tracing::error!(task_id, transcode_type, error = %failure, "Transcode failed");
            record(
                task_id,
                "error detail",
                store.add_error_detail(
                    task_id,
                    ErrorDetail::new(transcode_type, ErrorStage::Transcode, failure.message.clone())
                        .with_command(failure.command)
                        .with_output(failure.output),
                ),
            );
            record(
                task_id,
                "progress",
                store.update_progress(task_id, transcode_type, ProgressState::Failed),
            );
            remove_local(&output).await;
            return TypeOutcome::Failed;
        }
    }

    if aborted(store, task_id) {
        tracing::info!(task_id, transcode_type, "Task aborted during encode; discarding output");
        remove_local(&output).await;
        return TypeOutcome::Aborted;
    }

    let bucket = ctx.output_bucket(&msg.output_bucket);
    let uploaded = ctx.blobs.put_object(bucket, &file_name, &output).await;
    remove_local(&output).await;

    match uploaded {
        Ok(bytes) => {
            record(task_id, "output", store.add_output(task_id, transcode_type, &file_name));
            record(
                task_id,
                "progress",
                store.update_progress(task_id, transcode_type, ProgressState::Completed),
            );
            tracing::info!(task_id, transcode_type, bucket, key = %file_name, bytes, "Uploaded output");
            TypeOutcome::Completed
        }
        Err(e) => {
            tracing::error!(task_id, transcode_type, error = %e, "Upload failed");
            record(
                task_id,
                "error detail",
                store.add_error_detail(
                    task_id,
                    ErrorDetail::new(transcode_type, ErrorStage::Upload, e.to_string())
                        .with_output(format!("OutputKey: {file_name}")),
                ),
            );
            record(
                task_id,
                "progress",
                store.update_progress(task_id, transcode_type, ProgressState::Failed),
            );
            TypeOutcome::Failed
        }
    }
}

/// Fetch the input to `{temp}/{task_id}_input_{ts}_{basename}`.
async fn download(ctx: &AppContext, msg: &QueueMessage) -> Result<PathBuf> {
    let basename = Path::new(&msg.input_key)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "input".into());
    let dest = local_path(
        &ctx.config.worker.temp_dir,
        &msg.task_id,
        &format!("input_{}_{basename}", chrono::Utc::now().timestamp()),
    );

    let bytes = ctx
        .blobs
        .get_object(&msg.input_bucket, &msg.input_key, &dest)
        .await?;
    tracing::info!(task_id = %msg.task_id, bytes, path = %dest.display(), "Downloaded input");
    Ok(dest)
}

/// Scratch path for one task's file. The task id keeps concurrent runs
/// over the same key apart.
fn local_path(temp_dir: &Path, task_id: &str, name: &str) -> PathBuf {
    temp_dir.join(format!("{task_id}_{name}"))
}

/// `{stem}_{type}_{ts}.{ext}` for an input key.
fn output_name(input_key: &str, transcode_type: &str, extension: &str) -> String {
    let stem = Path::new(input_key)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".into());
    format!(
        "{stem}_{transcode_type}_{}.{extension}",
        chrono::Utc::now().timestamp()
    )
}

/// Fire `cancel` once the task stops being `processing`.
fn spawn_abort_watcher(
    store: Arc<TaskStore>,
    task_id: String,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return,
            }
            match store.is_aborted(&task_id) {
                Ok(true) => {
                    tracing::info!(task_id = %task_id, "Abort detected during encode");
                    cancel.cancel();
                    return;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(task_id = %task_id, error = %e, "Abort check failed"),
            }
        }
    })
}

async fn remove_local(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove temp file");
        }
    }
}
