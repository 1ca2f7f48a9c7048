use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::BytesRejection;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::middleware::map_request;
use axum::response::{IntoResponse, Response};
use axum::routing::{get_service, post};
use axum::{Json, Router, body::Bytes};
use chrono::Utc;
use serde_json::json;
use tower_http::services::ServeDir;
use tracing::{info, instrument, warn};

use crate::channel::{ChannelRouter, Route};
use crate::config::Config;
use crate::env::{ReadEnv, SystemEnv};
use crate::feed::FeedUpdater;
use crate::publisher::{ArtifactPublisher, PublishError};
use crate::release::Release;
use crate::replay::ReplayGuard;
use crate::validator::{NONCE_HEADER, Rejection, RequestValidator};

const RELEASE_SUCCESS: &str = "release success";
const FINAL_TREE: &str = "/release";

/// Everything the handler needs, each piece built from its own config slice.
#[derive(Clone)]
pub struct AppState {
    validator: Arc<RequestValidator>,
    router: Arc<ChannelRouter>,
    publisher: Arc<ArtifactPublisher>,
    feed: Option<Arc<FeedUpdater>>,
}

impl AppState {
    pub fn new(
        validator: RequestValidator,
        router: ChannelRouter,
        publisher: ArtifactPublisher,
        feed: Option<FeedUpdater>,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            router: Arc::new(router),
            publisher: Arc::new(publisher),
            feed: feed.map(Arc::new),
        }
    }

    pub fn from_config<E: ReadEnv>(config: &Config, env: &E) -> Result<Self, reqwest::Error> {
        let nonce_db = config.nonce_db_path(env);
        info!(path = %nonce_db.display(), "Using nonce database");

        let validator = RequestValidator::new(
            config.allow_list(),
            ReplayGuard::sqlite(nonce_db),
            config.security.api_secret.clone(),
        );
        let router = ChannelRouter::new(config.channel_roots(), config.project_segments());
        let publisher = ArtifactPublisher::new(config.download_timeout(), config.mirror_mode())?;
        let feed = config.feed_config().map(FeedUpdater::new);
        if feed.is_none() {
            info!("No feed path configured, feed updates disabled");
        }

        Ok(Self::new(validator, router, publisher, feed))
    }

    /// The feed updater, when this route should be syndicated.
    fn feed_for(&self, route: &Route) -> Option<Arc<FeedUpdater>> {
        self.feed
            .as_ref()
            .filter(|_| route.feeds_syndication())
            .cloned()
    }
}

/// Why a `POST /release` did not end in `release success`.
#[derive(Debug)]
pub enum HookError {
    UnreadableBody(BytesRejection),
    Rejected(Rejection),
    Decode(serde_json::Error),
    Publish(PublishError),
}

impl std::fmt::Display for HookError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnreadableBody(e) => write!(f, "cannot read request body: {e}"),
            Self::Rejected(e) => write!(f, "request rejected: {e}"),
            Self::Decode(e) => write!(f, "cannot decode release: {e}"),
            Self::Publish(e) => write!(f, "cannot publish release: {e}"),
        }
    }
}

impl std::error::Error for HookError {}

impl From<Rejection> for HookError {
    fn from(e: Rejection) -> Self {
        Self::Rejected(e)
    }
}

impl HookError {
    fn status_and_message(&self) -> (StatusCode, &'static str) {
        match self {
            Self::UnreadableBody(_) => (StatusCode::OK, "can't read body."),
            Self::Rejected(Rejection::OriginNotAllowed) => {
                (StatusCode::FORBIDDEN, "invalid ip addr.")
            }
            Self::Rejected(
                Rejection::MalformedNonce | Rejection::NonceReused | Rejection::BadSignature,
            ) => {
                (StatusCode::BAD_REQUEST, "invalid request.")
            }
            Self::Rejected(Rejection::RepositoryNotAllowed) => {
                (StatusCode::FORBIDDEN, "disallow release the software")
            }
            Self::Decode(_) => (StatusCode::BAD_REQUEST, "can't decode data"),
            Self::Publish(_) => (StatusCode::BAD_REQUEST, "can't download tarballs."),
        }
    }
}

impl IntoResponse for HookError {
    fn into_response(self) -> Response {
        let (status, message) = self.status_and_message();
        status_response(status, message)
    }
}

fn status_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "status": message }))).into_response()
}

/// `POST /release` plus read-only access to the publication tree.
pub fn app(state: AppState) -> Router {
    let roots = state.router.roots().clone();

    // `/release` itself is the webhook, so the final tree is routed by its tail.
    let final_tree =
        get_service(ServeDir::new(&roots.release)).layer(map_request(strip_final_tree_prefix));

    let mut router = Router::new()
        .route(FINAL_TREE, post(handle_release))
        .route("/release/{*path}", final_tree)
        .nest_service("/draft", ServeDir::new(&roots.draft))
        .nest_service("/prerelease", ServeDir::new(&roots.prerelease));
    if let Some(source) = &roots.source {
        router = router.nest_service("/sources", ServeDir::new(source));
    }

    router.with_state(state)
}

async fn strip_final_tree_prefix(mut request: Request) -> Request {
    let stripped = request
        .uri()
        .path_and_query()
        .and_then(|pq| pq.as_str().strip_prefix(FINAL_TREE))
        .and_then(|rest| rest.parse::<Uri>().ok());
    if let Some(uri) = stripped {
        *request.uri_mut() = uri;
    }
    request
}

/// Starts the release webhook HTTP server on `web.host:web.port`.
pub async fn serve(config: Config) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let state = AppState::from_config(&config, &SystemEnv)?;
    let app = app(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "Release webhook server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

#[instrument(
    name = "release.publish",
    skip_all,
    fields(
        nonce = tracing::field::Empty,
        release = tracing::field::Empty,
        channel = tracing::field::Empty,
    )
)]
async fn handle_release(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, HookError> {
    let span = tracing::Span::current();
    if let Some(nonce) = headers.get(NONCE_HEADER).and_then(|v| v.to_str().ok()) {
        span.record("nonce", nonce);
    }

    let body = body.map_err(|e| {
        warn!(error = %e, "Failed to read request body");
        HookError::UnreadableBody(e)
    })?;

    state
        .validator
        .admit(&headers, peer, &body)
        .await
        .inspect_err(|e| warn!(peer = %peer, reason = %e, "Request rejected"))?;

    let release: Release = serde_json::from_slice(&body).map_err(|e| {
        warn!(error = %e, "Failed to decode release payload");
        HookError::Decode(e)
    })?;
    span.record("release", release.stem().as_str());

    state
        .validator
        .check_repository(&release)
        .inspect_err(|e| warn!(reason = %e, "Request rejected"))?;

    let route = state.router.route(&release);
    span.record("channel", route.channel.as_str());
    info!(destination = %route.destination.display(), "Publishing release");

    let report = state
        .publisher
        .publish(&release, &route)
        .await
        .map_err(|e| {
            warn!(error = %e, "Release publication failed");
            HookError::Publish(e)
        })?;

    if report.is_complete() {
        info!(files = report.published.len(), "Release published");
    } else {
        warn!(
            published = report.published.len(),
            failed = report.failures.len(),
            "Release published with failures"
        );
    }

    if let Some(feed) = state.feed_for(&route) {
        update_feed(feed, release).await;
    }

    Ok(status_response(StatusCode::OK, RELEASE_SUCCESS))
}

/// Feed failures never fail the request.
async fn update_feed(feed: Arc<FeedUpdater>, release: Release) {
    let now = Utc::now().fixed_offset();
    let path = feed.path().to_path_buf();
    match tokio::task::spawn_blocking(move || feed.update(&release, now)).await {
        Ok(Ok(())) => info!(path = %path.display(), "Feed updated"),
        Ok(Err(e)) => warn!(path = %path.display(), error = %e, "Feed update failed"),
        Err(e) => warn!(error = %e, "Feed update task failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::PathBuf;

    use axum::http::HeaderValue;

    use super::*;
    use crate::channel::{Channel, ChannelRoots};
    use crate::feed::FeedConfig;
    use crate::publisher::MirrorMode;

    fn state(source: Option<PathBuf>, feed: bool) -> AppState {
        let roots = ChannelRoots {
            release: PathBuf::from("/srv/release"),
            prerelease: PathBuf::from("/srv/prerelease"),
            draft: PathBuf::from("/srv/draft"),
            source,
        };
        let feed = feed.then(|| {
            FeedUpdater::new(FeedConfig {
                title: String::new(),
                description: String::new(),
                link: String::new(),
                path: PathBuf::from("/srv/rss.xml"),
                count: 10,
                url_prefix: String::new(),
            })
        });
        let validator = RequestValidator::new(
            crate::allow_list::AllowList::new(&[], &[], "https://github.com"),
            ReplayGuard::sqlite("/nonexistent/release.db"),
            "",
        );
        AppState::new(
            validator,
            ChannelRouter::new(roots, HashMap::new()),
            ArtifactPublisher::with_client(reqwest::Client::new(), MirrorMode::Copy),
            feed,
        )
    }

    fn route(channel: Channel, mirror: Option<&str>) -> Route {
        Route {
            channel,
            destination: PathBuf::from("/srv/release/1.2"),
            overwrite: channel.allows_overwrite(),
            mirror: mirror.map(PathBuf::from),
        }
    }

    #[test]
    fn feed_only_for_mirrored_final_releases() {
        let s = state(Some(PathBuf::from("/srv/sources")), true);

        let feed = s.feed_for(&route(Channel::Final, Some("/srv/sources/foo/1.2")));
        assert_eq!(feed.unwrap().path(), PathBuf::from("/srv/rss.xml").as_path());
        assert!(s.feed_for(&route(Channel::Final, None)).is_none());
        assert!(s.feed_for(&route(Channel::PreRelease, None)).is_none());
        assert!(s.feed_for(&route(Channel::Draft, None)).is_none());
    }

    #[test]
    fn no_feed_without_feed_config() {
        let s = state(Some(PathBuf::from("/srv/sources")), false);
        assert!(s.feed_for(&route(Channel::Final, Some("/srv/sources/foo/1.2"))).is_none());
    }

    #[test]
    fn rejection_responses() {
        let cases = [
            (Rejection::OriginNotAllowed, StatusCode::FORBIDDEN, "invalid ip addr."),
            (Rejection::MalformedNonce, StatusCode::BAD_REQUEST, "invalid request."),
            (Rejection::NonceReused, StatusCode::BAD_REQUEST, "invalid request."),
            (Rejection::BadSignature, StatusCode::BAD_REQUEST, "invalid request."),
            (
                Rejection::RepositoryNotAllowed,
                StatusCode::FORBIDDEN,
                "disallow release the software",
            ),
        ];
        for (rejection, status, message) in cases {
            assert_eq!(
                HookError::from(rejection).status_and_message(),
                (status, message),
                "{rejection:?}"
            );
        }
    }

    #[test]
    fn decode_and_publish_errors_are_bad_requests() {
        let decode = serde_json::from_slice::<Release>(b"{").unwrap_err();
        assert_eq!(
            HookError::Decode(decode).status_and_message(),
            (StatusCode::BAD_REQUEST, "can't decode data")
        );
        assert_eq!(
            HookError::Publish(PublishError::UnsafeRelease("..".into())).status_and_message(),
            (StatusCode::BAD_REQUEST, "can't download tarballs.")
        );
    }

    #[tokio::test]
    async fn response_body_is_status_json() {
        let response = HookError::from(Rejection::BadSignature).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("content-type"),
            Some(&HeaderValue::from_static("application/json"))
        );

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value, json!({ "status": "invalid request." }));
    }
}
