//! PocketBase REST client implementing [`RecordStore`].

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::{Filter, ListPage, ListQuery, Record, RecordStore, Sort, StoreError};

#[derive(Debug, Clone)]
pub struct PocketBaseConfig {
    pub base_url: String,
    pub admin_email: String,
    pub admin_password: String,
    pub timeout: Duration,
}

impl Default for PocketBaseConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8090".to_string(),
            admin_email: String::new(),
            admin_password: String::new(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl PocketBaseConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("POCKETBASE_URL").unwrap_or(defaults.base_url),
            admin_email: std::env::var("POCKETBASE_ADMIN_EMAIL").unwrap_or_default(),
            admin_password: std::env::var("POCKETBASE_ADMIN_PASSWORD").unwrap_or_default(),
            timeout: defaults.timeout,
        }
    }
}

#[derive(Debug)]
pub struct PocketBaseStore {
    client: reqwest::Client,
    config: PocketBaseConfig,
    token: RwLock<Option<String>>,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
}

// Superuser endpoint first, legacy admin endpoint second.
const AUTH_PATHS: &[&str] = &[
    "/api/collections/_superusers/auth-with-password",
    "/api/admins/auth-with-password",
];

impl PocketBaseStore {
    pub fn new(config: PocketBaseConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("building pocketbase client")?;
        Ok(Self {
            client,
            config: PocketBaseConfig {
                base_url: config.base_url.trim_end_matches('/').to_string(),
                ..config
            },
            token: RwLock::new(None),
        })
    }

    /// Authenticate as admin. Failure leaves the client unauthenticated;
    /// requests are still sent and the store's own rules decide.
    pub async fn authenticate(&self) -> bool {
        if self.config.admin_email.is_empty() {
            return false;
        }
        let body = serde_json::json!({
            "identity": self.config.admin_email,
            "password": self.config.admin_password,
        });
        for path in AUTH_PATHS {
            let url = format!("{}{}", self.config.base_url, path);
            match self.client.post(&url).json(&body).send().await {
                Ok(resp) if resp.status().is_success() => match resp.json::<AuthResponse>().await {
                    Ok(auth) => {
                        *self.token.write().await = Some(auth.token);
                        info!(path, "authenticated with record store");
                        return true;
                    }
                    Err(err) => warn!(path, error = %err, "unreadable auth response"),
                },
                Ok(resp) => warn!(path, status = resp.status().as_u16(), "record store auth rejected"),
                Err(err) => warn!(path, error = %err, "record store unreachable during auth"),
            }
        }
        false
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.config.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, StoreError> {
        let request = match self.token.read().await.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        Ok(request.send().await?)
    }

    async fn checked(
        resp: Response,
        collection: &str,
        id: Option<&str>,
    ) -> Result<Response, StoreError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        if status == StatusCode::NOT_FOUND {
            if let Some(id) = id {
                return Err(StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.to_string(),
                });
            }
        }
        let url = resp.url().to_string();
        let body = resp.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            url,
            body,
        })
    }
}

fn list_params(query: &ListQuery) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("page", query.page.max(1).to_string()),
        ("perPage", query.per_page.max(1).to_string()),
    ];
    if !query.sort.is_empty() {
        params.push(("sort", Sort::render_all(&query.sort)));
    }
    if let Some(filter) = query.filter.as_ref().map(Filter::render) {
        if !filter.is_empty() {
            params.push(("filter", filter));
        }
    }
    params
}

#[async_trait]
impl RecordStore for PocketBaseStore {
    async fn list(&self, collection: &str, query: &ListQuery) -> Result<ListPage, StoreError> {
        let request = self
            .client
            .get(self.records_url(collection))
            .query(&list_params(query));
        let resp = Self::checked(self.send(request).await?, collection, None).await?;
        Ok(resp.json::<ListPage>().await?)
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Record, StoreError> {
        let request = self
            .client
            .get(format!("{}/{id}", self.records_url(collection)));
        let resp = Self::checked(self.send(request).await?, collection, Some(id)).await?;
        Ok(resp.json::<Record>().await?)
    }

    async fn create(&self, collection: &str, record: Record) -> Result<Record, StoreError> {
        let request = self.client.post(self.records_url(collection)).json(&record);
        let resp = Self::checked(self.send(request).await?, collection, None).await?;
        Ok(resp.json::<Record>().await?)
    }

    async fn update(&self, collection: &str, id: &str, patch: Record) -> Result<Record, StoreError> {
        let request = self
            .client
            .patch(format!("{}/{id}", self.records_url(collection)))
            .json(&patch);
        let resp = Self::checked(self.send(request).await?, collection, Some(id)).await?;
        Ok(resp.json::<Record>().await?)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let request = self
            .client
            .delete(format!("{}/{id}", self.records_url(collection)));
        Self::checked(self.send(request).await?, collection, Some(id)).await?;
        Ok(())
    }
}
