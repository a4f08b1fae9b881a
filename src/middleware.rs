use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Creates the complete middleware stack for the application
pub fn create_middleware_stack() -> ServiceBuilder<
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>,
                    DefaultMakeSpan,
                    DefaultOnRequest,
                    DefaultOnResponse,
                >,
                tower::layer::util::Identity,
            >,
        >,
    >,
> {
    ServiceBuilder::new()
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_request(DefaultOnRequest::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(create_cors_layer())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
}

/// Cross-origin callers may only read.
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any)
        .allow_credentials(false)
}

/// Host names the server answers to.
#[derive(Debug, Clone)]
pub struct AllowedHosts {
    patterns: Vec<String>,
}

impl AllowedHosts {
    /// With `debug` on and no patterns configured, local development hosts
    /// are allowed.
    pub fn new(patterns: &[String], debug: bool) -> Self {
        let mut patterns: Vec<String> = patterns.iter().map(|p| p.to_ascii_lowercase()).collect();
        if patterns.is_empty() && debug {
            patterns = vec!["localhost".into(), "127.0.0.1".into(), "[::1]".into()];
        }
        AllowedHosts { patterns }
    }

    /// Match a `Host` header value (port ignored) against the patterns:
    /// `*` matches anything, `.example.com` matches the domain and its
    /// subdomains, anything else must match exactly.
    pub fn is_allowed(&self, host_header: &str) -> bool {
        let host = strip_port(host_header.trim()).to_ascii_lowercase();
        let host = host.trim_end_matches('.');
        if host.is_empty() {
            return false;
        }

        self.patterns.iter().any(|pattern| {
            if pattern == "*" {
                true
            } else if let Some(domain) = pattern.strip_prefix('.') {
                host == domain || host.ends_with(pattern.as_str())
            } else {
                host == pattern
            }
        })
    }
}

fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        // [v6]:port
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name,
        _ => host,
    }
}

/// Reject requests whose `Host` header is not in `ALLOWED_HOSTS`.
pub async fn enforce_allowed_hosts(
    State(allowed): State<Arc<AllowedHosts>>,
    request: Request,
    next: Next,
) -> Response {
    let host = request
        .headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .or_else(|| request.uri().authority().map(|a| a.to_string()));

    match host {
        Some(ref host) if allowed.is_allowed(host) => next.run(request).await,
        other => {
            let shown = other.unwrap_or_default();
            tracing::warn!("Invalid HTTP_HOST header: '{}'", shown);
            let body = Json(json!({
                "error": {
                    "code": "DISALLOWED_HOST",
                    "message": format!("Invalid HTTP_HOST header: '{}'", shown)
                }
            }));
            (StatusCode::BAD_REQUEST, body).into_response()
        }
    }
}

/// Initialize structured JSON logging. `RUST_LOG` wins over the default
/// level, which is `debug` when DEBUG is on and `info` otherwise.
pub fn init_tracing(debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
        )
        .try_init()?;

    tracing::info!("Structured logging initialized with JSON format");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hosts(patterns: &[&str]) -> AllowedHosts {
        let patterns: Vec<String> = patterns.iter().map(|p| p.to_string()).collect();
        AllowedHosts::new(&patterns, false)
    }

    #[test]
    fn test_exact_hosts() {
        let allowed = hosts(&["localhost", "127.0.0.1"]);
        assert!(allowed.is_allowed("localhost"));
        assert!(allowed.is_allowed("localhost:8000"));
        assert!(allowed.is_allowed("LOCALHOST"));
        assert!(allowed.is_allowed("127.0.0.1:8000"));
        assert!(!allowed.is_allowed("evil.com"));
        assert!(!allowed.is_allowed("localhost.evil.com"));
        assert!(!allowed.is_allowed(""));
    }

    #[test]
    fn test_subdomain_wildcard() {
        let allowed = hosts(&[".example.com"]);
        assert!(allowed.is_allowed("example.com"));
        assert!(allowed.is_allowed("polls.example.com:443"));
        assert!(!allowed.is_allowed("badexample.com"));
    }

    #[test]
    fn test_star_allows_everything() {
        assert!(hosts(&["*"]).is_allowed("anything.at.all"));
    }

    #[test]
    fn test_debug_defaults() {
        let allowed = AllowedHosts::new(&[], true);
        assert!(allowed.is_allowed("localhost:8000"));
        assert!(allowed.is_allowed("[::1]:8000"));
        assert!(!allowed.is_allowed("example.com"));

        assert!(!AllowedHosts::new(&[], false).is_allowed("localhost"));
    }

    #[test]
    fn test_strip_port() {
        assert_eq!(strip_port("db:5432"), "db");
        assert_eq!(strip_port("[::1]:8000"), "[::1]");
        assert_eq!(strip_port("[::1]"), "[::1]");
        assert_eq!(strip_port("plain"), "plain");
    }
}
