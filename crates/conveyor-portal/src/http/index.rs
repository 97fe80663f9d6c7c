use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::Html;
use conveyor_queue::GroupStats;
use tracing::error;

use super::escape_html;
use crate::app::AppState;

static INDEX_HTML: &str = include_str!("../../static/index.html");

/// Stats row rendered on the index page: totals plus percentages for the
/// terminal statuses.
#[derive(Debug, PartialEq)]
struct PercentStats {
    group_id: String,
    kind: String,
    total: i64,
    done: f64,
    failed: f64,
    skipped: f64,
}

fn percentages(stats: &[GroupStats]) -> Vec<PercentStats> {
    stats
        .iter()
        .map(|g| {
            let total = g.total.max(1) as f64;
            PercentStats {
                group_id: g.group_id.clone(),
                kind: g.kind.clone(),
                total: g.total,
                done: 100.0 * g.done as f64 / total,
                failed: 100.0 * g.failed as f64 / total,
                skipped: 100.0 * g.skipped as f64 / total,
            }
        })
        .collect()
}

/// `GET /` — queue overview plus the upload form. A `status` or `error`
/// query parameter (set by the upload redirect) renders as a banner.
pub async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HashMap<String, String>>,
) -> Html<String> {
    let banner = if let Some(status) = params.get("status").map(|s| s.trim()).filter(|s| !s.is_empty())
    {
        format!(r#"<div class="banner ok">{}</div>"#, escape_html(status))
    } else if let Some(err) = params.get("error").map(|s| s.trim()).filter(|s| !s.is_empty()) {
        format!(r#"<div class="banner err">{}</div>"#, escape_html(err))
    } else {
        String::new()
    };

    let stats_rows = match state.queue.stats() {
        Ok(stats) if stats.is_empty() => {
            r#"<tr><td colspan="6">queue is empty</td></tr>"#.to_string()
        }
        Ok(stats) => percentages(&stats)
            .iter()
            .map(|row| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td>\
                     <td>{:.0}%</td><td>{:.0}%</td><td>{:.0}%</td></tr>",
                    escape_html(&row.group_id),
                    escape_html(&row.kind),
                    row.total,
                    row.done,
                    row.failed,
                    row.skipped,
                )
            })
            .collect::<Vec<_>>()
            .join("\n      "),
        Err(e) => {
            error!(error = %e, "stats unavailable");
            format!(
                r#"<tr><td colspan="6">stats unavailable: {}</td></tr>"#,
                escape_html(&e.to_string())
            )
        }
    };

    let type_options = state
        .queue
        .job_types()
        .iter()
        .map(|t| format!(r#"<option value="{0}">{0}</option>"#, escape_html(t)))
        .collect::<Vec<_>>()
        .join("\n      ");

    Html(
        INDEX_HTML
            .replace("{{banner}}", &banner)
            .replace("{{stats_rows}}", &stats_rows)
            .replace("{{type_options}}", &type_options),
    )
}
