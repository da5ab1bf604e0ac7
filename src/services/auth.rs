//! AuthSession: owns the access token and the resolved object-store endpoint.
//!
//! The session is refreshed on demand: when no token is held yet, when the
//! held token is past its expiry, or when the client observes a 401.
//! Concurrent callers may refresh independently; the last writer wins.

use crate::{
    config::FsConfig,
    errors::{FsError, FsResult},
    models::auth::{AccessToken, AuthRequest, AuthResponse, CatalogEntry},
    services::client::send_with_retries,
};
use chrono::Utc;
use reqwest::{Method, StatusCode};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

/// A token together with the endpoint it is valid for.
#[derive(Debug, Clone)]
pub struct Session {
    pub token: AccessToken,
    pub endpoint: Url,
}

pub struct AuthSession {
    http: reqwest::Client,
    auth_url: Url,
    tenant: String,
    username: String,
    password: String,
    region: Option<String>,
    http_port: u16,
    https_port: u16,
    retry_count: u32,
    current: RwLock<Option<Session>>,
}

impl AuthSession {
    pub fn new(http: reqwest::Client, cfg: &FsConfig) -> FsResult<Self> {
        let auth_url = Url::parse(&cfg.auth_url).map_err(|err| {
            FsError::Configuration(format!("invalid auth url `{}`: {err}", cfg.auth_url))
        })?;
        Ok(Self {
            http,
            auth_url,
            tenant: cfg.tenant.clone(),
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            region: cfg.region.clone(),
            http_port: cfg.http_port,
            https_port: cfg.https_port,
            retry_count: cfg.retry_count,
            current: RwLock::new(None),
        })
    }

    /// The session to use for the next request, authenticating if none is held
    /// or the held token has expired.
    pub async fn current(&self) -> FsResult<Session> {
        if let Some(session) = self.current.read().await.as_ref() {
            if !session.token.is_expired(Utc::now()) {
                return Ok(session.clone());
            }
            debug!("access token expired, re-authenticating");
        }
        self.authenticate().await
    }

    /// POST the credentials, pick the endpoint and replace the held session wholesale.
    pub async fn authenticate(&self) -> FsResult<Session> {
        let body = AuthRequest::password(&self.tenant, &self.username, &self.password);
        let uri = self.auth_url.to_string();
        let response = send_with_retries(self.retry_count, &Method::POST, &uri, || {
            Ok(self.http.post(self.auth_url.clone()).json(&body))
        })
        .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FsError::Authentication(format!(
                    "credentials for user `{}` in tenant `{}` were rejected",
                    self.username, self.tenant
                )));
            }
            StatusCode::BAD_REQUEST => return Err(FsError::IllegalLocality { uri }),
            status => {
                return Err(FsError::Connection {
                    status,
                    method: Method::POST,
                    uri,
                });
            }
        }

        let parsed: AuthResponse = response.json().await.map_err(|source| FsError::Transport {
            method: Method::POST,
            uri: uri.clone(),
            source,
        })?;

        let entry = select_endpoint(&parsed.catalog(), self.region.as_deref())?;
        let endpoint = self.resolve_endpoint(&entry.public_url)?;
        let session = Session {
            token: parsed.token(),
            endpoint,
        };
        info!(
            "authenticated tenant `{}` against {} (endpoint {})",
            self.tenant, uri, session.endpoint
        );

        *self.current.write().await = Some(session.clone());
        Ok(session)
    }

    /// Apply the configured port when the catalog URL does not carry one.
    fn resolve_endpoint(&self, public_url: &str) -> FsResult<Url> {
        let mut url = Url::parse(public_url).map_err(|err| {
            FsError::Configuration(format!("catalog endpoint `{public_url}` is not a URL: {err}"))
        })?;
        if url.port().is_none() {
            let port = match url.scheme() {
                "https" => self.https_port,
                _ => self.http_port,
            };
            url.set_port(Some(port)).map_err(|_| {
                FsError::Configuration(format!("cannot set port on endpoint `{public_url}`"))
            })?;
        }
        Ok(url)
    }
}

/// First object-store entry wins; with a region configured only that region matches.
pub fn select_endpoint(catalog: &[CatalogEntry], region: Option<&str>) -> FsResult<CatalogEntry> {
    catalog
        .iter()
        .filter(|entry| entry.is_object_store())
        .find(|entry| match region {
            Some(wanted) => entry.region.as_deref() == Some(wanted),
            None => true,
        })
        .cloned()
        .ok_or_else(|| match region {
            Some(wanted) => FsError::Configuration(format!(
                "no object-store endpoint for region `{wanted}` in the service catalog"
            )),
            None => FsError::Configuration("no object-store endpoint in the service catalog".into()),
        })
}
