// src/fetch/transfer.rs
use async_trait::async_trait;
use futures::{
    stream::{self, BoxStream},
    StreamExt,
};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{header::CONTENT_TYPE, Client};
use scraper::{Html, Selector};
use std::io;
use tracing::debug;
use url::Url;

use crate::error::{LookupError, Result};

/// Response body, delivered in whatever chunk sizes the transport produces.
pub type BodyStream = BoxStream<'static, io::Result<Vec<u8>>>;

/// What a single GET produced.
pub struct Fetched {
    /// Set when the response was an interstitial asking for confirmation.
    pub confirmation: Option<Confirmation>,
    pub body: BodyStream,
}

impl Fetched {
    pub fn content(body: BodyStream) -> Self {
        Self {
            confirmation: None,
            body,
        }
    }

    pub fn interstitial(confirmation: Confirmation) -> Self {
        Self {
            confirmation: Some(confirmation),
            body: stream::empty().boxed(),
        }
    }
}

/// Token (plus any extra form fields) that must be replayed on a second GET
/// to obtain the real content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub token: String,
    /// Form action, when the interstitial posts somewhere else.
    pub action: Option<Url>,
    pub params: Vec<(String, String)>,
}

impl Confirmation {
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            action: None,
            params: Vec::new(),
        }
    }

    /// URL of the confirmed request: the form action (or the original URL)
    /// with the form fields and `confirm=<token>` in its query.
    pub fn apply(&self, original: &Url) -> Url {
        let mut url = self.action.clone().unwrap_or_else(|| original.clone());
        let mut pairs: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| k != "confirm" && !self.params.iter().any(|(p, _)| p == k))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        pairs.extend(self.params.iter().cloned());
        pairs.push(("confirm".to_string(), self.token.clone()));
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url
    }
}

/// A single HTTP GET.
#[async_trait]
pub trait Transfer: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Fetched>;
}

/// GET `url`, replaying the confirmation token once if the host asks for it.
pub async fn open_stream(transfer: &dyn Transfer, url: &Url) -> Result<BodyStream> {
    let first = transfer.get(url).await?;
    match first.confirmation {
        Some(confirmation) => {
            let confirmed = confirmation.apply(url);
            debug!(%confirmed, "replaying confirmation token");
            Ok(transfer.get(&confirmed).await?.body)
        }
        None => Ok(first.body),
    }
}

/// reqwest-backed transfer. The client keeps a cookie store so the
/// confirmation cookie is sent back on the second request.
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .cookie_store(true)
            .build()
            .map_err(|e| LookupError::Config(format!("building HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn get(&self, url: &Url) -> Result<Fetched> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| LookupError::Download(format!("GET {}: {}", url, e)))?
            .error_for_status()
            .map_err(|e| LookupError::Download(e.to_string()))?;

        if let Some(token) = resp
            .cookies()
            .find(|c| c.name().starts_with("download_warning"))
            .map(|c| c.value().to_string())
        {
            debug!(%url, "confirmation token in cookie");
            return Ok(Fetched::interstitial(Confirmation::token(token)));
        }

        let is_html = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/html"))
            .unwrap_or(false);

        if is_html {
            let text = resp
                .text()
                .await
                .map_err(|e| LookupError::Download(format!("reading {}: {}", url, e)))?;
            if let Some(confirmation) = confirmation_from_html(&text, url) {
                debug!(%url, "confirmation token in interstitial page");
                return Ok(Fetched::interstitial(confirmation));
            }
            // No token: the page itself is the content.
            let bytes = text.into_bytes();
            return Ok(Fetched::content(stream::once(async move { Ok(bytes) }).boxed()));
        }

        let body = resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|b| b.to_vec())
                    .map_err(|e| io::Error::new(io::ErrorKind::Other, e))
            })
            .boxed();
        Ok(Fetched::content(body))
    }
}

static FORM: Lazy<Selector> = Lazy::new(|| Selector::parse("form").expect("selector should parse"));
static CONFIRM_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[name="confirm"]"#).expect("selector should parse"));
static HIDDEN_INPUT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"input[type="hidden"]"#).expect("selector should parse"));
static CONFIRM_PARAM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"confirm=([0-9A-Za-z_\-]+)").expect("regex should compile"));

/// Looks for a confirmation token in an interstitial page: first a form with
/// a `confirm` input, then any `confirm=` link parameter.
pub fn confirmation_from_html(html: &str, base: &Url) -> Option<Confirmation> {
    let doc = Html::parse_document(html);

    for form in doc.select(&FORM) {
        let token = form
            .select(&CONFIRM_INPUT)
            .filter_map(|input| input.value().attr("value"))
            .find(|v| !v.is_empty());
        let Some(token) = token else { continue };

        let action = form
            .value()
            .attr("action")
            .and_then(|href| base.join(href).ok());
        let params = form
            .select(&HIDDEN_INPUT)
            .filter_map(|input| {
                let name = input.value().attr("name")?;
                let value = input.value().attr("value").unwrap_or("");
                (name != "confirm").then(|| (name.to_string(), value.to_string()))
            })
            .collect();
        return Some(Confirmation {
            token: token.to_string(),
            action,
            params,
        });
    }

    CONFIRM_PARAM
        .captures(html)
        .map(|caps| Confirmation::token(&caps[1]))
}
