//! Concurrent fetches through the authenticated client

use auth_refresh::AuthClient;
use futures_util::future::join_all;
use transport::ApiResponse;

/// Exit code when every fetch succeeded.
pub const EXIT_OK: u8 = 0;
/// Exit code when at least one fetch failed.
pub const EXIT_FAILED: u8 = 1;
/// Exit code when the session could not be refreshed and the user has to sign in again.
pub const EXIT_SESSION_ENDED: u8 = 2;

/// Result of fetching one URL.
#[derive(Debug)]
pub struct FetchReport {
    pub url: String,
    pub outcome: auth_refresh::Result<ApiResponse>,
}

impl FetchReport {
    /// `status url bytes` on success, `status url error: ...` on failure
    /// (`-` when no status was received).
    pub fn line(&self) -> String {
        match &self.outcome {
            Ok(response) => format!("{} {} {}", response.status, self.url, response.body.len()),
            Err(e) => {
                let status = e
                    .status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "-".into());
                format!("{status} {} error: {e}", self.url)
            }
        }
    }
}

/// Issue every URL concurrently; reports come back in input order.
pub async fn fetch_all(client: &AuthClient, urls: &[String]) -> Vec<FetchReport> {
    join_all(urls.iter().map(|url| async move {
        FetchReport {
            url: url.clone(),
            outcome: client.get(url.as_str()).await,
        }
    }))
    .await
}

pub fn exit_code(reports: &[FetchReport], session_ended: bool) -> u8 {
    if session_ended {
        EXIT_SESSION_ENDED
    } else if reports.iter().all(|r| r.outcome.is_ok()) {
        EXIT_OK
    } else {
        EXIT_FAILED
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use auth_refresh::{
        AuthEndpoints, ClientError, FailureEscalation, HttpRefreshEndpoint, RefreshCoordinator,
        RefreshError,
    };
    use axum::Json;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use session::{ChannelNavigator, MemoryTokenStore, SessionTokens, TokenStore};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use transport::{HttpTransport, TransportError};

    #[derive(Clone, Default)]
    struct Backend {
        refreshes: Arc<AtomicUsize>,
    }

    /// Mock API: `at_good` is the only accepted token, `rt_good` the only
    /// accepted refresh token.
    async fn start_backend() -> (String, Backend) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let backend = Backend::default();

        let app = axum::Router::new()
            .route(
                "/api/items",
                axum::routing::get(|headers: HeaderMap| async move {
                    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                        Some("Bearer at_good") => (StatusCode::OK, "[1,2,3]"),
                        _ => (StatusCode::UNAUTHORIZED, r#"{"message":"token expired"}"#),
                    }
                }),
            )
            .route(
                "/api/missing",
                axum::routing::get(|| async { (StatusCode::NOT_FOUND, "no such thing") }),
            )
            .route(
                "/auth/refresh",
                axum::routing::post(
                    |State(backend): State<Backend>, Json(body): Json<serde_json::Value>| async move {
                        backend.refreshes.fetch_add(1, Ordering::SeqCst);
                        if body["refresh_token"] == "rt_good" {
                            (
                                StatusCode::OK,
                                Json(serde_json::json!({"access_token": "at_good"})),
                            )
                        } else {
                            (
                                StatusCode::BAD_REQUEST,
                                Json(serde_json::json!({"error": "invalid_grant"})),
                            )
                        }
                    },
                ),
            )
            .with_state(backend.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{addr}"), backend)
    }

    fn build_client(
        base: &str,
        refresh: &str,
    ) -> (
        AuthClient,
        Arc<MemoryTokenStore>,
        tokio::sync::mpsc::UnboundedReceiver<session::NavigationRequest>,
    ) {
        let store = Arc::new(MemoryTokenStore::with_tokens(
            SessionTokens::new("at_stale").with_refresh(refresh),
        ));
        let (navigator, rx) = ChannelNavigator::new("/login");
        let http = reqwest::Client::new();
        let transport = Arc::new(HttpTransport::new(
            http.clone(),
            base,
            store.clone(),
            Duration::from_secs(5),
        ));
        let endpoint = Arc::new(HttpRefreshEndpoint::new(
            http,
            format!("{base}/auth/refresh"),
            store.clone(),
        ));
        let coordinator = Arc::new(RefreshCoordinator::new(
            endpoint,
            FailureEscalation::new(store.clone(), Arc::new(navigator)),
        ));
        (
            AuthClient::new(transport, coordinator, AuthEndpoints::default()),
            store,
            rx,
        )
    }

    #[test]
    fn report_lines() {
        let ok = FetchReport {
            url: "/api/items".into(),
            outcome: Ok(ApiResponse::new(200, "[1,2,3]")),
        };
        assert_eq!(ok.line(), "200 /api/items 7");

        let failed = FetchReport {
            url: "/api/missing".into(),
            outcome: Err(ClientError::Transport(TransportError::Status {
                status: 404,
                message: "no such thing".into(),
            })),
        };
        assert_eq!(
            failed.line(),
            "404 /api/missing error: request failed with status 404: no such thing"
        );

        let expired = FetchReport {
            url: "/api/items".into(),
            outcome: Err(ClientError::Refresh(RefreshError::MissingRefreshToken)),
        };
        assert!(expired.line().starts_with("- /api/items error:"));
    }

    #[test]
    fn exit_codes() {
        let ok = || FetchReport {
            url: "/a".into(),
            outcome: Ok(ApiResponse::new(200, "")),
        };
        let failed = || FetchReport {
            url: "/b".into(),
            outcome: Err(ClientError::Transport(TransportError::Network("refused".into()))),
        };

        assert_eq!(exit_code(&[ok(), ok()], false), EXIT_OK);
        assert_eq!(exit_code(&[ok(), failed()], false), EXIT_FAILED);
        assert_eq!(exit_code(&[failed()], true), EXIT_SESSION_ENDED);
        assert_eq!(exit_code(&[], false), EXIT_OK);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn stale_session_is_refreshed_for_all_urls() {
        let (base, backend) = start_backend().await;
        let (client, store, mut rx) = build_client(&base, "rt_good");
        let urls: Vec<String> = vec!["/api/items".into(); 4];

        let reports = fetch_all(&client, &urls).await;

        assert_eq!(reports.len(), 4);
        for report in &reports {
            assert_eq!(report.line(), "200 /api/items 7");
        }
        // Every stale request carries the same token, so later 401s can only
        // open a new wave after the previous one finished.
        assert!(backend.refreshes.load(Ordering::SeqCst) >= 1);
        assert_eq!(store.access_token().await.unwrap().expose(), "at_good");
        assert!(rx.try_recv().is_err());
        assert_eq!(exit_code(&reports, false), EXIT_OK);
    }

    #[tokio::test]
    async fn revoked_session_ends_with_navigation() {
        let (base, _backend) = start_backend().await;
        let (client, store, mut rx) = build_client(&base, "rt_revoked");
        let urls = vec!["/api/items".to_string(), "/api/missing".to_string()];

        let reports = fetch_all(&client, &urls).await;

        assert!(matches!(reports[0].outcome, Err(ClientError::Refresh(_))));
        assert_eq!(reports[1].outcome.as_ref().unwrap_err().status(), Some(404));
        assert_eq!(rx.try_recv().unwrap().entry, "/login");
        assert!(store.tokens().await.is_none());
        assert_eq!(exit_code(&reports, true), EXIT_SESSION_ENDED);
    }
}
