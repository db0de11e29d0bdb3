// src/fetch/resolve.rs
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use crate::error::{LookupError, Result};

/// Maps a dataset identifier to the URL its content can be fetched from.
#[async_trait]
pub trait LocationResolver: Send + Sync {
    async fn resolve(&self, dataset_id: &str) -> Result<Url>;
}

/// Builds the location by substituting the id into a fixed URL template,
/// e.g. `https://drive.google.com/uc?export=download&id={id}`.
#[derive(Debug, Clone)]
pub struct TemplateResolver {
    template: String,
}

impl TemplateResolver {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }
}

#[async_trait]
impl LocationResolver for TemplateResolver {
    async fn resolve(&self, dataset_id: &str) -> Result<Url> {
        if dataset_id.trim().is_empty() {
            return Err(LookupError::resolution(dataset_id, "empty dataset id"));
        }
        let raw = self.template.replace("{id}", dataset_id);
        Url::parse(&raw).map_err(|e| LookupError::resolution(dataset_id, e))
    }
}

/// Resolves a package on a CKAN-style open data catalog to the download URL
/// of one of its resources.
#[derive(Debug, Clone)]
pub struct CatalogResolver {
    client: Client,
    base: Url,
    resource_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PackageShow {
    success: bool,
    #[serde(default)]
    result: Option<Package>,
}

#[derive(Debug, Deserialize)]
pub struct Package {
    #[serde(default)]
    pub resources: Vec<Resource>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Resource {
    pub id: String,
    pub url: String,
    #[serde(default)]
    pub format: Option<String>,
}

impl CatalogResolver {
    pub fn new(client: Client, base: &str, resource_id: Option<String>) -> Result<Self> {
        let mut base = Url::parse(base)
            .map_err(|e| LookupError::Config(format!("invalid catalog url {}: {}", base, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client,
            base,
            resource_id,
        })
    }

    fn endpoint(&self, dataset_id: &str) -> Result<Url> {
        let mut url = self
            .base
            .join("api/3/action/package_show")
            .map_err(|e| LookupError::resolution(dataset_id, e))?;
        url.query_pairs_mut().append_pair("id", dataset_id);
        Ok(url)
    }
}

/// With a resource id, that exact resource; otherwise the first CSV one.
pub fn pick_resource<'a>(package: &'a Package, resource_id: Option<&str>) -> Option<&'a Resource> {
    match resource_id {
        Some(id) => package.resources.iter().find(|r| r.id == id),
        None => package.resources.iter().find(|r| {
            r.format
                .as_deref()
                .map(|f| f.trim().eq_ignore_ascii_case("csv"))
                .unwrap_or(false)
                || r.url.to_lowercase().ends_with(".csv")
        }),
    }
}

#[async_trait]
impl LocationResolver for CatalogResolver {
    #[instrument(level = "debug", skip(self))]
    async fn resolve(&self, dataset_id: &str) -> Result<Url> {
        let endpoint = self.endpoint(dataset_id)?;
        debug!(%endpoint, "querying catalog");

        let body: PackageShow = self
            .client
            .get(endpoint.clone())
            .send()
            .await
            .map_err(|e| LookupError::resolution(dataset_id, format!("GET {}: {}", endpoint, e)))?
            .error_for_status()
            .map_err(|e| LookupError::resolution(dataset_id, e))?
            .json()
            .await
            .map_err(|e| LookupError::resolution(dataset_id, format!("metadata body: {}", e)))?;

        let package = match (body.success, body.result) {
            (true, Some(p)) => p,
            _ => return Err(LookupError::resolution(dataset_id, "unknown catalog entry")),
        };
        let resource = pick_resource(&package, self.resource_id.as_deref()).ok_or_else(|| {
            LookupError::resolution(
                dataset_id,
                match &self.resource_id {
                    Some(id) => format!("resource {} not in package", id),
                    None => "package has no CSV resource".to_string(),
                },
            )
        })?;

        Url::parse(&resource.url).map_err(|e| LookupError::resolution(dataset_id, e))
    }
}
