use std::sync::Arc;

use axum::extract::{Multipart, State};
use axum::response::Redirect;
use sha1::{Digest, Sha1};
use tracing::info;

use super::query_escape;
use crate::app::AppState;
use conveyor_queue::Item;

/// `POST /` — multipart upload with `jobType` and `jobFile` fields. Each
/// non-empty line of the file is queued as one item; the whole upload is
/// pushed atomically. Responds with a redirect back to the index carrying a
/// `status` or `error` banner.
pub async fn upload_handler(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Redirect {
    match handle_upload(&state, multipart).await {
        Ok(count) => redirect_status(&format!("{count} items queued successfully")),
        Err(msg) => redirect_error(&msg),
    }
}

async fn handle_upload(state: &AppState, mut multipart: Multipart) -> Result<usize, String> {
    let mut job_type = String::new();
    let mut file_name = String::new();
    let mut contents: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| format!("failed to read upload: {e}"))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("jobType") => {
                job_type = field
                    .text()
                    .await
                    .map_err(|e| format!("failed to read jobType: {e}"))?;
            }
            Some("jobFile") => {
                file_name = field.file_name().unwrap_or("upload").to_string();
                contents = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| format!("failed to stream-read upload (error: {e})"))?,
                );
            }
            _ => {}
        }
    }

    let job_type = job_type.trim().to_string();
    if job_type.is_empty() {
        return Err("please select a job type".to_string());
    }
    let contents = contents.ok_or_else(|| "please select a file".to_string())?;

    let items = items_from_lines(&job_type, &file_name, &contents);
    state
        .queue
        .push(&items)
        .map_err(|e| format!("failed to queue items: {e}"))?;

    info!(count = items.len(), job_type, file = %file_name, "upload queued");
    Ok(items.len())
}

/// One item per non-empty line. The id hashes `<filename>_<line_index>` so a
/// re-upload of the same file is rejected as a duplicate rather than queued
/// twice; the index counts all lines, blank ones included, so ids are stable
/// against blank-line placement.
fn items_from_lines(job_type: &str, file_name: &str, contents: &str) -> Vec<Item> {
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.is_empty())
        .map(|(idx, line)| {
            let mut item = Item::new(line_id(file_name, idx), job_type, line);
            item.group_id = file_name.to_string();
            item
        })
        .collect()
}

/// First 16 hex characters of SHA-1 over `<filename>_<line_index>`.
fn line_id(file_name: &str, line_index: usize) -> String {
    let digest = Sha1::digest(format!("{file_name}_{line_index}").as_bytes());
    let mut id = hex::encode(digest);
    id.truncate(16);
    id
}

fn redirect_status(msg: &str) -> Redirect {
    Redirect::to(&format!("/?status={}", query_escape(msg)))
}

fn redirect_error(msg: &str) -> Redirect {
    Redirect::to(&format!("/?error={}", query_escape(msg)))
}
