use crate::{
    cli::telemetry::shutdown_tracer,
    collectors::{
        BasicExporter, ClientCollector, EnhancedCollector,
        basic::{CloudWatchScraper, ExporterOptions, Overlap},
        enhanced::OsMetricsScraper,
        factory::Factory,
        scrape::Scrape,
    },
    config,
    sessions::{RequestMetrics, SessionPool, Transport},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension, Router,
    body::Body,
    http::{HeaderName, HeaderValue, Request},
    middleware::{Next, from_fn},
    response::Response,
    routing::get,
};
use opentelemetry::global;
use opentelemetry::trace::{TraceContextExt, TraceId};
use opentelemetry_http::HeaderExtractor;
use std::{path::PathBuf, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{Span, error, info, info_span};
use tracing_opentelemetry::OpenTelemetrySpanExt;
use ulid::Ulid;

mod handlers;
mod shutdown;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = if let Some(hash) = built_info::GIT_COMMIT_HASH {
    hash
} else {
    ":-("
};

/// Runtime settings taken from the command line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub config_file: PathBuf,
    pub basic_path: String,
    pub enhanced_path: String,
    pub basic_exclude: Vec<String>,
    pub scrape_timeout: Option<Duration>,
    pub trace: bool,
}

/// Collectors shared by every request, created once at startup.
#[derive(Clone)]
pub struct MetricsState {
    basic: BasicExporter,
    enhanced: EnhancedCollector,
    client: ClientCollector,
    factory: Factory,
}

impl MetricsState {
    /// `options` apply to the basic exporter of `/basic` and to the ones the
    /// factory creates for `/metrics`; the overlap setting is chosen per
    /// endpoint.
    pub fn new(
        pool: Arc<SessionPool>,
        basic_scraper: Arc<dyn Scrape>,
        enhanced_scraper: Arc<dyn Scrape>,
        request_metrics: RequestMetrics,
        options: ExporterOptions,
    ) -> Self {
        let basic = BasicExporter::new(
            Arc::clone(&pool),
            Arc::clone(&basic_scraper),
            options.clone().with_overlap(Overlap::Enabled),
        );
        let enhanced = EnhancedCollector::new(Arc::clone(&pool), enhanced_scraper)
            .with_scrape_timeout(options.scrape_timeout);
        let client = ClientCollector::new(request_metrics);
        let factory = Factory::new(pool, basic_scraper, options)
            .with_predefined(enhanced.clone())
            .with_predefined(client.clone());

        Self {
            basic,
            enhanced,
            client,
            factory,
        }
    }

    pub fn pool(&self) -> &Arc<SessionPool> {
        self.factory.pool()
    }
}

/// Build the pool from the configuration file, then serve until SIGINT or
/// SIGTERM.
///
/// # Errors
///
/// Returns an error if the configuration can't be loaded, the sessions can't
/// be created or the listener can't be bound
pub async fn new(port: u16, listen: Option<String>, settings: Settings) -> Result<()> {
    let config = config::load(&settings.config_file)?;

    let transport = Transport::new();

    let pool = SessionPool::build(&config.instances, &transport, settings.trace)
        .await
        .context("Can't create sessions")?;

    if pool.is_empty() {
        error!("no instance could be resolved, every endpoint will be empty");
    }

    let options = ExporterOptions::new(Overlap::Enabled)
        .exclude(settings.basic_exclude.iter().cloned())
        .with_scrape_timeout(settings.scrape_timeout);

    let state = MetricsState::new(
        Arc::new(pool),
        Arc::new(CloudWatchScraper::new()),
        Arc::new(OsMetricsScraper::new()),
        transport.metrics().clone(),
        options,
    );

    let app = router(state, &settings.basic_path, &settings.enhanced_path);

    let (listener, bind_addr) = bind(port, listen).await?;

    println!(
        "{} {} - Listening on {bind_addr}\n\nEndpoints:\n{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        format_list(&[
            settings.basic_path.as_str(),
            settings.enhanced_path.as_str(),
            "/metrics",
            "/health",
        ]),
    );

    if !settings.basic_exclude.is_empty() {
        println!(
            "\nExcluded basic metrics:\n{}",
            format_list(&settings.basic_exclude)
        );
    }

    if let Err(e) = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
    {
        error!(error=%e, "server error");
    }

    info!("shutting down");

    shutdown_tracer();

    Ok(())
}

/// Application routes with request id propagation and HTTP tracing.
pub fn router(state: MetricsState, basic_path: &str, enhanced_path: &str) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(make_span)
        .on_response(on_response);

    Router::new()
        .route(basic_path, get(handlers::basic))
        .route(enhanced_path, get(handlers::enhanced))
        .route("/metrics", get(handlers::metrics))
        .route("/health", get(handlers::health).options(handlers::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(trace_layer)
                .layer(from_fn(add_trace_headers))
                .layer(Extension(state)),
        )
}

async fn bind(port: u16, listen: Option<String>) -> Result<(TcpListener, String)> {
    match listen {
        Some(addr) => {
            let ip = addr.parse::<std::net::IpAddr>().map_err(|_| {
                anyhow!(
                    "Invalid IP address: '{addr}'. Expected IPv4 (e.g., 0.0.0.0, 127.0.0.1) or IPv6 (e.g., ::, ::1)"
                )
            })?;

            let bind_addr = std::net::SocketAddr::new(ip, port);
            let listener = TcpListener::bind(bind_addr)
                .await
                .with_context(|| format!("Failed to bind to {bind_addr}"))?;

            Ok((listener, bind_addr.to_string()))
        }
        None => {
            // IPv6 first, then IPv4
            match TcpListener::bind(format!("[::]:{port}")).await {
                Ok(l) => Ok((l, format!("[::]:{port}"))),
                Err(_) => Ok((
                    TcpListener::bind(format!("0.0.0.0:{port}"))
                        .await
                        .with_context(|| format!("Failed to bind to 0.0.0.0:{port}"))?,
                    format!("0.0.0.0:{port}"),
                )),
            }
        }
    }
}

// Helper to format a list of items with a leading dash and indentation for the
// start up message
fn format_list<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| format!("  - {i}"))
        .collect::<Vec<_>>()
        .join("\n")
}

fn make_span(request: &Request<Body>) -> Span {
    let parent_cx =
        global::get_text_map_propagator(|prop| prop.extract(&HeaderExtractor(request.headers())));

    let method = request.method().as_str();

    let path = request.uri().path();

    let target = request.uri().to_string();

    let scheme = request.uri().scheme_str().unwrap_or("http");

    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("none");

    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown");

    let span = info_span!(
        "http.server.request",
        otel.kind = "server",
        http.method = method,
        http.route = path,
        http.target = target,
        http.scheme = scheme,
        http.user_agent = user_agent,
        request_id = request_id,
    );

    let _ = span.set_parent(parent_cx);

    span
}

fn on_response<B>(response: &axum::http::Response<B>, latency: Duration, span: &Span) {
    if response.status().is_server_error() {
        span.record("otel.status_code", "ERROR");
    } else {
        span.record("otel.status_code", "OK");
    }

    let cx = span.context();
    let trace_id = cx.span().span_context().trace_id();

    if trace_id != TraceId::INVALID {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms = latency.as_millis() as u64,
            trace_id = %trace_id,
            "request completed"
        );
    } else {
        info!(
            parent: span,
            status = response.status().as_u16(),
            elapsed_ms = latency.as_millis() as u64,
            "request completed"
        );
    }
}

async fn add_trace_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;

    let span = Span::current();

    let cx = span.context();

    // CLONE the SpanContext to avoid borrowing a temporary
    let span_context = cx.span().span_context().clone();

    if span_context.is_valid()
        && let Ok(val) = HeaderValue::from_str(&span_context.trace_id().to_string())
    {
        res.headers_mut()
            .insert(HeaderName::from_static("x-trace-id"), val);
    }

    res
}
