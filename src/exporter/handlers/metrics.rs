use crate::{
    collectors::{CollectorType, registry::CollectorSet},
    exporter::MetricsState,
};
use anyhow::Result;
use axum::{
    extract::{Extension, RawQuery},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
};
use tracing::{debug, error, info, warn};

const COLLECT_PARAM: &str = "collect[]";

fn text_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "content-type",
        HeaderValue::from_static(prometheus::TEXT_FORMAT),
    );
    headers
}

async fn render(set: &CollectorSet) -> (StatusCode, HeaderMap, String) {
    match set.gather().await {
        Ok(metrics) => {
            debug!(collectors = ?set.names(), "collected metrics");
            (StatusCode::OK, text_headers(), metrics)
        }
        Err(e) => {
            error!("Failed to collect metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                text_headers(),
                format!("Error collecting metrics: {e}"),
            )
        }
    }
}

fn build<I>(collectors: I, process: bool) -> Result<CollectorSet>
where
    I: IntoIterator<Item = CollectorType>,
{
    let mut set = CollectorSet::new();
    if process {
        set = set.with_process_metrics()?;
    }
    for collector in collectors {
        set.register(collector)?;
    }
    Ok(set)
}

fn internal_error(e: &anyhow::Error) -> (StatusCode, HeaderMap, String) {
    error!("Couldn't create metrics handler: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        text_headers(),
        format!("Couldn't create metrics handler: {e}"),
    )
}

/// Basic metrics with the overlapping ones, request counters and process
/// metrics.
pub async fn basic(Extension(state): Extension<MetricsState>) -> impl IntoResponse {
    let collectors = [
        CollectorType::from(state.basic.clone()),
        CollectorType::from(state.client.clone()),
    ];

    match build(collectors, true) {
        Ok(set) => render(&set).await,
        Err(e) => internal_error(&e),
    }
}

/// Enhanced metrics only.
pub async fn enhanced(Extension(state): Extension<MetricsState>) -> impl IntoResponse {
    match build([CollectorType::from(state.enhanced.clone())], false) {
        Ok(set) => render(&set).await,
        Err(e) => internal_error(&e),
    }
}

/// Values of every `collect[]` query parameter, in order.
pub(crate) fn filters(query: Option<&str>) -> Vec<String> {
    query
        .map(|q| {
            url::form_urlencoded::parse(q.as_bytes())
                .filter(|(key, _)| key == COLLECT_PARAM)
                .map(|(_, value)| value.into_owned())
                .collect()
        })
        .unwrap_or_default()
}

/// Every collector, or only those named by `collect[]`.
pub async fn metrics(
    Extension(state): Extension<MetricsState>,
    RawQuery(query): RawQuery,
) -> impl IntoResponse {
    let filters = filters(query.as_deref());
    debug!(?filters, "collect query");

    let collectors = state.factory.create(&filters);

    let selected: Vec<CollectorType> = if filters.is_empty() {
        collectors.into_values().collect()
    } else {
        filters
            .iter()
            .filter_map(|name| collectors.get(name.as_str()).cloned())
            .collect()
    };

    match build(selected, true) {
        Ok(set) => {
            info!(collectors = ?set.names(), "collectors registered");
            render(&set).await
        }
        Err(e) if !filters.is_empty() => {
            warn!("Couldn't create filtered metrics handler: {}", e);
            (
                StatusCode::BAD_REQUEST,
                text_headers(),
                format!("Couldn't create filtered metrics handler: {e}"),
            )
        }
        Err(e) => internal_error(&e),
    }
}
