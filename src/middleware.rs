use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{
        header::{self, HeaderName},
        HeaderMap, HeaderValue, Method, StatusCode,
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

use tracing::warn;

use crate::config::AppConfig;

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "camera=(), microphone=(), geolocation=()"),
];

const STATIC_PREFIXES: [&str; 2] = ["/static/", "/favicon.ico"];

fn is_static_asset(path: &str) -> bool {
    STATIC_PREFIXES.iter().any(|p| path.starts_with(p))
}

fn is_api(path: &str) -> bool {
    path == "/api" || path.starts_with("/api/")
}

fn apply_security_headers(headers: &mut HeaderMap) {
    for (name, value) in SECURITY_HEADERS {
        headers.insert(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        );
    }
}

/// An origin that is not a valid header value is left out rather than
/// replaced with `*`.
fn apply_cors_headers(headers: &mut HeaderMap, origin: &str) {
    match HeaderValue::from_str(origin) {
        Ok(origin) => {
            headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        }
        Err(_) => warn!(origin, "allowed origin is not a valid header value; omitting it"),
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
}

/// Adds the fixed security headers to every non-static response, CORS
/// headers under `/api`, and answers `/api` preflights with an empty 204.
pub async fn security_headers(
    State(config): State<Arc<AppConfig>>,
    req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_owned();
    if is_static_asset(&path) {
        return next.run(req).await;
    }
    let api = is_api(&path);

    let mut res = if api && req.method() == Method::OPTIONS {
        StatusCode::NO_CONTENT.into_response()
    } else {
        next.run(req).await
    };

    let headers = res.headers_mut();
    apply_security_headers(headers);
    if api {
        apply_cors_headers(headers, &config.allowed_origin);
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request as HttpRequest, middleware, routing::get, Router};
    use tower::ServiceExt;

    fn app(origin: &str) -> Router {
        let config = Arc::new(AppConfig {
            allowed_origin: origin.into(),
            ..AppConfig::default()
        });
        Router::new()
            .route("/api/ping", get(|| async { "pong" }))
            .route("/about", get(|| async { "about" }))
            .route("/static/app.css", get(|| async { "body{}" }))
            .layer(middleware::from_fn_with_state(config, security_headers))
    }

    async fn send(app: Router, method: Method, uri: &str) -> Response {
        app.oneshot(
            HttpRequest::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[test]
    fn path_classification() {
        assert!(is_api("/api"));
        assert!(is_api("/api/health"));
        assert!(!is_api("/apiary"));
        assert!(is_static_asset("/static/js/main.js"));
        assert!(is_static_asset("/favicon.ico"));
        assert!(!is_static_asset("/about"));
    }

    #[tokio::test]
    async fn api_routes_get_security_and_cors_headers() {
        let res = send(app("https://oalearn.com"), Method::GET, "/api/ping").await;
        assert_eq!(res.status(), StatusCode::OK);
        let h = res.headers();
        assert_eq!(h["x-content-type-options"], "nosniff");
        assert_eq!(h["x-frame-options"], "DENY");
        assert_eq!(h["x-xss-protection"], "1; mode=block");
        assert_eq!(h["referrer-policy"], "strict-origin-when-cross-origin");
        assert_eq!(
            h["permissions-policy"],
            "camera=(), microphone=(), geolocation=()"
        );
        assert_eq!(h["access-control-allow-origin"], "https://oalearn.com");
        assert_eq!(
            h["access-control-allow-methods"],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(
            h["access-control-allow-headers"],
            "Content-Type, Authorization"
        );
    }

    #[tokio::test]
    async fn preflight_is_answered_with_empty_204() {
        let res = send(app("*"), Method::OPTIONS, "/api/ping").await;
        assert_eq!(res.status(), StatusCode::NO_CONTENT);
        assert_eq!(res.headers()["access-control-allow-origin"], "*");
        let body = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn invalid_origin_is_never_widened_to_wildcard() {
        let res = send(app("https://oalearn.com\n"), Method::GET, "/api/ping").await;
        assert_eq!(res.status(), StatusCode::OK);
        let h = res.headers();
        assert!(h.get("access-control-allow-origin").is_none());
        assert_eq!(
            h["access-control-allow-methods"],
            "GET, POST, PUT, DELETE, OPTIONS"
        );
        assert_eq!(h["x-frame-options"], "DENY");
    }

    #[tokio::test]
    async fn non_api_routes_skip_cors() {
        let res = send(app("*"), Method::GET, "/about").await;
        assert_eq!(res.headers()["x-frame-options"], "DENY");
        assert!(res.headers().get("access-control-allow-origin").is_none());
    }

    #[tokio::test]
    async fn static_assets_are_untouched() {
        let res = send(app("*"), Method::GET, "/static/app.css").await;
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get("x-frame-options").is_none());
    }
}
