//! Access tokens, endpoint catalog entries and the JSON shapes of the
//! authentication exchange.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Service type under which object-store endpoints are published.
pub const OBJECT_STORE_SERVICE_TYPE: &str = "object-store";
/// Service name some deployments use instead of (or besides) the type.
pub const OBJECT_STORE_SERVICE_NAME: &str = "swift";

#[derive(Debug, Clone)]
pub struct AccessToken {
    pub id: String,
    /// `None` when the server sent no (or an unreadable) expiry.
    pub expires_at: Option<DateTime<Utc>>,
    pub tenant_id: String,
}

impl AccessToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub service_name: String,
    pub service_type: String,
    pub region: Option<String>,
    pub public_url: String,
}

impl CatalogEntry {
    pub fn is_object_store(&self) -> bool {
        self.service_type.eq_ignore_ascii_case(OBJECT_STORE_SERVICE_TYPE)
            || self.service_name.eq_ignore_ascii_case(OBJECT_STORE_SERVICE_NAME)
    }
}

// --- request DTOs ---

#[derive(Debug, Serialize)]
pub struct AuthRequest<'a> {
    pub auth: AuthBody<'a>,
}

#[derive(Debug, Serialize)]
pub struct AuthBody<'a> {
    #[serde(rename = "tenantName")]
    pub tenant_name: &'a str,
    #[serde(rename = "passwordCredentials")]
    pub password_credentials: PasswordCredentials<'a>,
}

#[derive(Debug, Serialize)]
pub struct PasswordCredentials<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

impl<'a> AuthRequest<'a> {
    pub fn password(tenant: &'a str, username: &'a str, password: &'a str) -> Self {
        Self {
            auth: AuthBody {
                tenant_name: tenant,
                password_credentials: PasswordCredentials { username, password },
            },
        }
    }
}

// --- response DTOs ---

#[derive(Debug, Deserialize)]
pub struct AuthResponse {
    pub access: Access,
}

#[derive(Debug, Deserialize)]
pub struct Access {
    #[serde(rename = "serviceCatalog", default)]
    pub service_catalog: Vec<CatalogService>,
    pub token: TokenDto,
}

#[derive(Debug, Deserialize)]
pub struct CatalogService {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub service_type: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointDto>,
}

#[derive(Debug, Deserialize)]
pub struct EndpointDto {
    #[serde(default)]
    pub region: Option<String>,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenDto {
    pub id: String,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub tenant: Option<TenantDto>,
}

#[derive(Debug, Deserialize)]
pub struct TenantDto {
    pub id: String,
}

impl AuthResponse {
    pub fn token(&self) -> AccessToken {
        let token = &self.access.token;
        AccessToken {
            id: token.id.clone(),
            expires_at: token
                .expires
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            tenant_id: token
                .tenant
                .as_ref()
                .map(|t| t.id.clone())
                .unwrap_or_default(),
        }
    }

    /// Flatten the catalog into one entry per endpoint, in response order.
    pub fn catalog(&self) -> Vec<CatalogEntry> {
        self.access
            .service_catalog
            .iter()
            .flat_map(|service| {
                service.endpoints.iter().map(|endpoint| CatalogEntry {
                    service_name: service.name.clone(),
                    service_type: service.service_type.clone(),
                    region: endpoint.region.clone(),
                    public_url: endpoint.public_url.clone(),
                })
            })
            .collect()
    }
}
