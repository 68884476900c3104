use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchedFeed {
    pub body: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("unexpected status code: {0}")]
    HttpStatus(u16),
}

impl FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Request(_) => true,
            FetchError::HttpStatus(code) => *code >= 500,
        }
    }
}

pub async fn fetch_feed(client: &reqwest::Client, url: &str) -> Result<FetchedFeed, FetchError> {
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::HttpStatus(status.as_u16()));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(ToString::to_string);
    let body = response.bytes().await?.to_vec();

    Ok(FetchedFeed { body, content_type })
}

pub async fn fetch_feed_with_retry(
    client: &reqwest::Client,
    url: &str,
    max_retries: usize,
) -> Result<FetchedFeed, FetchError> {
    let mut attempt = 0_usize;
    loop {
        match fetch_feed(client, url).await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !err.is_retryable() || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                tracing::debug!(url, attempt, error = %err, "retrying feed fetch");
                tokio::time::sleep(Duration::from_millis(40 * attempt as u64)).await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::Response;
    use axum::routing::get;
    use axum::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Clone)]
    struct AppState {
        request_count: Arc<AtomicUsize>,
    }

    async fn flaky_feed_handler(State(state): State<AppState>) -> Response {
        let counter = state.request_count.fetch_add(1, Ordering::SeqCst);
        if counter == 0 {
            let mut response =
                Response::new(axum::body::Body::from("temporary failure".to_string()));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            return response;
        }
        rss_response()
    }

    async fn stable_feed_handler() -> Response {
        rss_response()
    }

    async fn untitled_feed_handler() -> Response {
        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../../fixtures/untitled.rss.xml").to_string(),
        ));
        *response.status_mut() = StatusCode::OK;
        response
    }

    async fn garbage_handler() -> Response {
        let mut response = Response::new(axum::body::Body::from("<html>not a feed".to_string()));
        *response.status_mut() = StatusCode::OK;
        response
    }

    async fn missing_handler() -> Response {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NOT_FOUND;
        response
    }

    fn rss_response() -> Response {
        let mut response = Response::new(axum::body::Body::from(
            include_str!("../../../fixtures/sample.rss.xml").to_string(),
        ));
        *response.status_mut() = StatusCode::OK;
        response.headers_mut().insert(
            reqwest::header::CONTENT_TYPE,
            "application/rss+xml".parse().expect("header must parse"),
        );
        response
    }

    /// Serves `/flaky.xml`, `/feed.xml`, `/untitled.xml`, `/garbage.xml` and
    /// `/missing.xml`; returns the base URL.
    pub(crate) async fn spawn_test_server() -> (String, tokio::task::JoinHandle<()>) {
        let state = AppState {
            request_count: Arc::new(AtomicUsize::new(0)),
        };
        let app = Router::new()
            .route("/flaky.xml", get(flaky_feed_handler))
            .route("/feed.xml", get(stable_feed_handler))
            .route("/untitled.xml", get(untitled_feed_handler))
            .route("/garbage.xml", get(garbage_handler))
            .route("/missing.xml", get(missing_handler))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let address = listener.local_addr().expect("local addr should exist");
        let join_handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("server should run");
        });
        (format!("http://{address}"), join_handle)
    }

    #[tokio::test]
    async fn fetch_feed_retries_server_errors() {
        let (base, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();

        let fetched = fetch_feed_with_retry(&client, &format!("{base}/flaky.xml"), 2)
            .await
            .expect("fetch should succeed with retry");
        assert!(fetched.body.starts_with(b"<?xml"));
        assert_eq!(fetched.content_type.as_deref(), Some("application/rss+xml"));

        server_task.abort();
    }

    #[tokio::test]
    async fn fetch_feed_does_not_retry_client_errors() {
        let (base, server_task) = spawn_test_server().await;
        let client = reqwest::Client::new();

        let error = fetch_feed_with_retry(&client, &format!("{base}/missing.xml"), 2)
            .await
            .expect_err("404 must fail");
        assert!(matches!(error, FetchError::HttpStatus(404)));

        server_task.abort();
    }
}
