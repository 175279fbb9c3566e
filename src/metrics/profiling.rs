use axum::{
    extract::Query,
    http::header,
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::time::Duration;

use crate::{MiddlewareError, MiddlewareResult};

const DEFAULT_SECONDS: u64 = 30;
const MAX_SECONDS: u64 = 300;
const DEFAULT_FREQUENCY: i32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ProfileParams {
    pub seconds: Option<u64>,
    pub frequency: Option<i32>,
}

impl ProfileParams {
    fn validate(&self) -> MiddlewareResult<(Duration, i32)> {
        let seconds = self.seconds.unwrap_or(DEFAULT_SECONDS);
        if seconds == 0 || seconds > MAX_SECONDS {
            return Err(MiddlewareError::BadRequest(format!(
                "seconds should be in 1..={MAX_SECONDS}, got {seconds}"
            )));
        }

        let frequency = self.frequency.unwrap_or(DEFAULT_FREQUENCY);
        if frequency <= 0 {
            return Err(MiddlewareError::BadRequest(format!(
                "frequency should be positive, got {frequency}"
            )));
        }

        Ok((Duration::from_secs(seconds), frequency))
    }
}

/// Adds the profiler routes under `prefix`, which must already be normalized
/// (leading slash, no trailing slash).
pub fn register<S>(router: Router<S>, prefix: &str) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    let index_page = index_html(prefix);

    router
        .route(prefix, get(move || async move { Html(index_page) }))
        .route(&format!("{prefix}/cmdline"), get(cmdline))
        .route(&format!("{prefix}/profile"), get(profile))
        .route(&format!("{prefix}/flamegraph"), get(flamegraph))
}

fn index_html(prefix: &str) -> String {
    format!(
        r#"<html>
<head><title>{prefix}</title></head>
<body>
<p>Profiles:</p>
<ul>
<li><a href="{prefix}/cmdline">cmdline</a>: command line of the running process</li>
<li><a href="{prefix}/profile?seconds={DEFAULT_SECONDS}">profile</a>: CPU profile, text report</li>
<li><a href="{prefix}/flamegraph?seconds={DEFAULT_SECONDS}">flamegraph</a>: CPU profile, SVG flame graph</li>
</ul>
</body>
</html>"#
    )
}

async fn cmdline() -> String {
    std::env::args().collect::<Vec<_>>().join("\x00")
}

async fn profile(Query(params): Query<ProfileParams>) -> MiddlewareResult<String> {
    run_profiler(&params, render_text).await
}

async fn flamegraph(Query(params): Query<ProfileParams>) -> MiddlewareResult<impl IntoResponse> {
    let svg = run_profiler(&params, |report| {
        let mut body = Vec::new();
        report.flamegraph(&mut body)?;
        Ok(body)
    })
    .await?;

    Ok(([(header::CONTENT_TYPE, "image/svg+xml")], svg))
}

/// Samples the whole process for the requested duration on a blocking
/// thread, then renders the report there.
async fn run_profiler<T, F>(params: &ProfileParams, render: F) -> MiddlewareResult<T>
where
    T: Send + 'static,
    F: FnOnce(&pprof::Report) -> MiddlewareResult<T> + Send + 'static,
{
    let (duration, frequency) = params.validate()?;
    tracing::info!(seconds = duration.as_secs(), frequency, "start cpu profiling");

    tokio::task::spawn_blocking(move || {
        let guard = pprof::ProfilerGuardBuilder::default()
            .frequency(frequency)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?;
        std::thread::sleep(duration);

        let report = guard.report().build()?;
        render(&report)
    })
    .await
    .map_err(|e| MiddlewareError::Profiling(format!("profiling task: {e}")))?
}

fn render_text(report: &pprof::Report) -> MiddlewareResult<String> {
    let mut rows: Vec<(isize, String, String)> = report
        .data
        .iter()
        .map(|(frames, count)| {
            let top = frames
                .frames
                .first()
                .and_then(|symbols| symbols.first())
                .map(|symbol| symbol.name())
                .unwrap_or_else(|| "<unknown>".to_string());
            (*count, frames.thread_name.clone(), top)
        })
        .collect();
    rows.sort_by(|a, b| b.0.cmp(&a.0));

    let total: isize = rows.iter().map(|r| r.0).sum();
    let mut out = format!("samples: {total}\n");
    for (count, thread, top) in rows {
        out.push_str(&format!("{count:>8} {thread:<20} {top}\n"));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let (duration, frequency) = ProfileParams::default().validate().unwrap();
        assert_eq!(duration, Duration::from_secs(DEFAULT_SECONDS));
        assert_eq!(frequency, DEFAULT_FREQUENCY);
    }

    #[test]
    fn test_params_bounds() {
        let zero = ProfileParams {
            seconds: Some(0),
            frequency: None,
        };
        assert!(matches!(zero.validate(), Err(MiddlewareError::BadRequest(_))));

        let long = ProfileParams {
            seconds: Some(MAX_SECONDS + 1),
            frequency: None,
        };
        assert!(long.validate().is_err());

        let negative = ProfileParams {
            seconds: Some(1),
            frequency: Some(-5),
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_index_links_routes() {
        let html = index_html("/debug/pprof");
        assert!(html.contains("/debug/pprof/cmdline"));
        assert!(html.contains("/debug/pprof/flamegraph"));
    }
}
