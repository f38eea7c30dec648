//! App Store Connect REST client
//!
//! Authenticates with an ES256 JWT, speaks JSON:API, retries rate-limited
//! requests and follows `links.next` for collections.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::api::AppStoreApi;
use crate::config::{ConnectConfig, Credentials};
use crate::error::{ConnectError, Result};
use crate::transfer::execute_upload_operations;
use crate::types::*;

/// Maximum number of retries for rate-limited requests.
const MAX_RETRIES: u32 = 3;

/// Wait used when a 429 response has no `Retry-After` header.
const DEFAULT_RETRY_SECS: u64 = 2;

const PAGE_LIMIT: u32 = 200;

/// JWT claims for App Store Connect API
#[derive(Debug, Serialize)]
struct Claims {
    iss: String,
    iat: i64,
    exp: i64,
    aud: String,
}

struct JwtCache {
    token: String,
    expires_at: DateTime<Utc>,
}

// JSON:API envelopes

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct Page<T> {
    data: Vec<T>,
    #[serde(default)]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "A: Deserialize<'de> + Default"))]
struct Resource<A> {
    id: String,
    #[serde(default)]
    attributes: A,
}

#[derive(Debug, Default, Deserialize)]
struct VersionLocalizationWire {
    #[serde(default)]
    locale: String,
    #[serde(flatten)]
    fields: VersionLocalizationAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct AppInfoLocalizationWire {
    #[serde(default)]
    locale: String,
    #[serde(flatten)]
    fields: AppInfoLocalizationAttributes,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppWire {
    bundle_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppStoreVersionWire {
    version_string: String,
    platform: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppInfoWire {
    state: Option<String>,
    app_store_state: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotSetWire {
    screenshot_display_type: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScreenshotWire {
    file_name: Option<String>,
    file_size: Option<u64>,
    upload_operations: Option<Vec<UploadOperation>>,
    asset_delivery_state: Option<AssetDeliveryState>,
}

impl From<Resource<VersionLocalizationWire>> for VersionLocalization {
    fn from(r: Resource<VersionLocalizationWire>) -> Self {
        Self {
            id: r.id,
            locale: r.attributes.locale,
            attributes: r.attributes.fields,
        }
    }
}

impl From<Resource<AppInfoLocalizationWire>> for AppInfoLocalization {
    fn from(r: Resource<AppInfoLocalizationWire>) -> Self {
        Self {
            id: r.id,
            locale: r.attributes.locale,
            attributes: r.attributes.fields,
        }
    }
}

impl From<Resource<AppInfoWire>> for AppInfo {
    fn from(r: Resource<AppInfoWire>) -> Self {
        Self {
            id: r.id,
            state: r.attributes.state.or(r.attributes.app_store_state),
        }
    }
}

impl From<Resource<ReviewDetailAttributes>> for ReviewDetail {
    fn from(r: Resource<ReviewDetailAttributes>) -> Self {
        Self {
            id: r.id,
            attributes: r.attributes,
        }
    }
}

impl From<Resource<ScreenshotSetWire>> for ScreenshotSet {
    fn from(r: Resource<ScreenshotSetWire>) -> Self {
        Self {
            id: r.id,
            display_type: r.attributes.screenshot_display_type,
        }
    }
}

impl From<Resource<ScreenshotWire>> for Screenshot {
    fn from(r: Resource<ScreenshotWire>) -> Self {
        let a = r.attributes;
        Self {
            id: r.id,
            file_name: a.file_name.unwrap_or_default(),
            file_size: a.file_size.unwrap_or_default(),
            upload_operations: a.upload_operations.unwrap_or_default(),
            delivery_state: a.asset_delivery_state,
        }
    }
}

/// Serializes `attributes` and adds extra keys to the resulting object.
fn attributes_with<T: Serialize>(attributes: &T, extra: &[(&str, Value)]) -> Result<Value> {
    let mut value = serde_json::to_value(attributes)?;
    if let Value::Object(map) = &mut value {
        for (key, v) in extra {
            map.insert((*key).to_string(), v.clone());
        }
    }
    Ok(value)
}

fn relationship(name: &str, kind: &str, id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(
        name.to_string(),
        json!({ "data": { "type": kind, "id": id } }),
    );
    Value::Object(map)
}

/// App Store Connect API client
pub struct ConnectClient {
    credentials: Credentials,
    base_url: String,
    /// Client for API calls, bounded by the request timeout
    http: Client,
    /// Client for asset transfers, bounded by the upload timeout
    transfer_http: Client,
    jwt_cache: Mutex<Option<JwtCache>>,
}

impl ConnectClient {
    /// Create a client from resolved configuration. Fails early if the
    /// credentials are missing or the key cannot be parsed.
    pub fn new(config: &ConnectConfig) -> Result<Self> {
        let credentials = config.credentials()?;
        EncodingKey::from_ec_pem(credentials.private_key.as_bytes())
            .map_err(|e| ConnectError::InvalidCredentials(format!("Invalid API key: {}", e)))?;

        let http = Client::builder().timeout(config.request_timeout).build()?;
        let transfer_http = Client::builder().timeout(config.upload.timeout).build()?;

        Ok(Self {
            credentials,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            transfer_http,
            jwt_cache: Mutex::new(None),
        })
    }

    /// Generate a JWT token for API authentication, reusing the cached one
    /// until five minutes before it expires.
    fn generate_jwt(&self) -> Result<String> {
        let mut cache = self.jwt_cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = cache.as_ref() {
            if Utc::now() < cached.expires_at - Duration::minutes(5) {
                return Ok(cached.token.clone());
            }
        }

        let now = Utc::now();
        let exp = now + Duration::minutes(20);

        let claims = Claims {
            iss: self.credentials.issuer_id.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            aud: "appstoreconnect-v1".to_string(),
        };

        let encoding_key = EncodingKey::from_ec_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| ConnectError::InvalidCredentials(format!("Invalid API key: {}", e)))?;

        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.credentials.key_id.clone());

        let token = encode(&header, &claims, &encoding_key)?;
        *cache = Some(JwtCache {
            token: token.clone(),
            expires_at: exp,
        });

        Ok(token)
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            endpoint.to_string()
        } else {
            format!("{}{}", self.base_url, endpoint)
        }
    }

    /// Sends a request, retrying on 429, and returns the response body.
    async fn send(&self, method: Method, endpoint: &str, body: Option<&Value>) -> Result<String> {
        let url = self.url(endpoint);
        let mut retries = 0;

        loop {
            let token = self.generate_jwt()?;
            debug!(method = %method, url = %url, "API request");

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header("Authorization", format!("Bearer {}", token))
                .header("Content-Type", "application/json");
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get("Retry-After")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.trim().parse::<u64>().ok());

                if retries >= MAX_RETRIES {
                    return Err(ConnectError::RateLimited { retry_after });
                }

                let wait = retry_after.unwrap_or(DEFAULT_RETRY_SECS);
                warn!(
                    "Rate limited, waiting {} seconds before retry ({}/{})",
                    wait,
                    retries + 1,
                    MAX_RETRIES
                );
                sleep(StdDuration::from_secs(wait)).await;
                retries += 1;
                continue;
            }

            let text = response.text().await.unwrap_or_default();
            if !status.is_success() {
                return Err(ConnectError::Api {
                    status: status.as_u16(),
                    message: text,
                });
            }
            return Ok(text);
        }
    }

    async fn api_request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
    ) -> Result<T> {
        let text = self.send(method, endpoint, body.as_ref()).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Fetches every page of a collection.
    async fn get_all<A>(&self, endpoint: &str) -> Result<Vec<Resource<A>>>
    where
        A: DeserializeOwned + Default,
    {
        let separator = if endpoint.contains('?') { '&' } else { '?' };
        let mut next = Some(format!("{}{}limit={}", endpoint, separator, PAGE_LIMIT));
        let mut items = Vec::new();

        while let Some(endpoint) = next.take() {
            let page: Page<Resource<A>> = self.api_request(Method::GET, &endpoint, None).await?;
            items.extend(page.data);
            next = page.links.and_then(|l| l.next);
        }

        Ok(items)
    }

    async fn get_one<A>(&self, endpoint: &str) -> Result<Resource<A>>
    where
        A: DeserializeOwned + Default,
    {
        let doc: Document<Resource<A>> = self.api_request(Method::GET, endpoint, None).await?;
        Ok(doc.data)
    }

    async fn post<A>(&self, endpoint: &str, body: Value) -> Result<Resource<A>>
    where
        A: DeserializeOwned + Default,
    {
        let doc: Document<Resource<A>> = self.api_request(Method::POST, endpoint, Some(body)).await?;
        Ok(doc.data)
    }

    async fn patch<A>(&self, endpoint: &str, body: Value) -> Result<Resource<A>>
    where
        A: DeserializeOwned + Default,
    {
        let doc: Document<Resource<A>> = self.api_request(Method::PATCH, endpoint, Some(body)).await?;
        Ok(doc.data)
    }
}

#[async_trait]
impl AppStoreApi for ConnectClient {
    async fn list_version_localizations(&self, version_id: &str) -> Result<Vec<VersionLocalization>> {
        let endpoint = format!("/v1/appStoreVersions/{}/appStoreVersionLocalizations", version_id);
        let items = self.get_all::<VersionLocalizationWire>(&endpoint).await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    async fn create_version_localization(
        &self,
        version_id: &str,
        locale: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization> {
        let body = json!({
            "data": {
                "type": "appStoreVersionLocalizations",
                "attributes": attributes_with(attributes, &[("locale", json!(locale))])?,
                "relationships": relationship("appStoreVersion", "appStoreVersions", version_id),
            }
        });
        let created = self
            .post::<VersionLocalizationWire>("/v1/appStoreVersionLocalizations", body)
            .await?;
        Ok(created.into())
    }

    async fn update_version_localization(
        &self,
        localization_id: &str,
        attributes: &VersionLocalizationAttributes,
    ) -> Result<VersionLocalization> {
        let body = json!({
            "data": {
                "type": "appStoreVersionLocalizations",
                "id": localization_id,
                "attributes": attributes,
            }
        });
        let endpoint = format!("/v1/appStoreVersionLocalizations/{}", localization_id);
        let updated = self.patch::<VersionLocalizationWire>(&endpoint, body).await?;
        Ok(updated.into())
    }

    async fn find_app_id(&self, bundle_id: &str) -> Result<Option<String>> {
        let endpoint = format!("/v1/apps?filter[bundleId]={}", bundle_id);
        let items = self.get_all::<AppWire>(&endpoint).await?;
        Ok(items
            .into_iter()
            .find(|r| r.attributes.bundle_id == bundle_id)
            .map(|r| r.id))
    }

    async fn find_version_id(
        &self,
        app_id: &str,
        version_string: &str,
        platform: Option<&str>,
    ) -> Result<Option<String>> {
        let mut endpoint = format!(
            "/v1/apps/{}/appStoreVersions?filter[versionString]={}",
            app_id, version_string
        );
        if let Some(platform) = platform {
            endpoint.push_str(&format!("&filter[platform]={}", platform));
        }
        let items = self.get_all::<AppStoreVersionWire>(&endpoint).await?;
        Ok(items
            .into_iter()
            .find(|r| {
                r.attributes.version_string == version_string
                    && platform.map_or(true, |p| r.attributes.platform.as_deref() == Some(p))
            })
            .map(|r| r.id))
    }

    async fn list_app_infos(&self, app_id: &str) -> Result<Vec<AppInfo>> {
        let endpoint = format!("/v1/apps/{}/appInfos", app_id);
        let items = self.get_all::<AppInfoWire>(&endpoint).await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    async fn list_app_info_localizations(&self, app_info_id: &str) -> Result<Vec<AppInfoLocalization>> {
        let endpoint = format!("/v1/appInfos/{}/appInfoLocalizations", app_info_id);
        let items = self.get_all::<AppInfoLocalizationWire>(&endpoint).await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    async fn create_app_info_localization(
        &self,
        app_info_id: &str,
        locale: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization> {
        let body = json!({
            "data": {
                "type": "appInfoLocalizations",
                "attributes": attributes_with(attributes, &[("locale", json!(locale))])?,
                "relationships": relationship("appInfo", "appInfos", app_info_id),
            }
        });
        let created = self
            .post::<AppInfoLocalizationWire>("/v1/appInfoLocalizations", body)
            .await?;
        Ok(created.into())
    }

    async fn update_app_info_localization(
        &self,
        localization_id: &str,
        attributes: &AppInfoLocalizationAttributes,
    ) -> Result<AppInfoLocalization> {
        let body = json!({
            "data": {
                "type": "appInfoLocalizations",
                "id": localization_id,
                "attributes": attributes,
            }
        });
        let endpoint = format!("/v1/appInfoLocalizations/{}", localization_id);
        let updated = self.patch::<AppInfoLocalizationWire>(&endpoint, body).await?;
        Ok(updated.into())
    }

    async fn get_review_detail(&self, version_id: &str) -> Result<Option<ReviewDetail>> {
        let endpoint = format!("/v1/appStoreVersions/{}/appStoreReviewDetail", version_id);
        let result: Result<Document<Option<Resource<ReviewDetailAttributes>>>> =
            self.api_request(Method::GET, &endpoint, None).await;

        match result {
            Ok(doc) => Ok(doc.data.map(Into::into)),
            Err(ConnectError::Api { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_review_detail(
        &self,
        version_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail> {
        let body = json!({
            "data": {
                "type": "appStoreReviewDetails",
                "attributes": attributes,
                "relationships": relationship("appStoreVersion", "appStoreVersions", version_id),
            }
        });
        let created = self
            .post::<ReviewDetailAttributes>("/v1/appStoreReviewDetails", body)
            .await?;
        Ok(created.into())
    }

    async fn update_review_detail(
        &self,
        review_detail_id: &str,
        attributes: &ReviewDetailAttributes,
    ) -> Result<ReviewDetail> {
        let body = json!({
            "data": {
                "type": "appStoreReviewDetails",
                "id": review_detail_id,
                "attributes": attributes,
            }
        });
        let endpoint = format!("/v1/appStoreReviewDetails/{}", review_detail_id);
        let updated = self.patch::<ReviewDetailAttributes>(&endpoint, body).await?;
        Ok(updated.into())
    }

    async fn list_screenshot_sets(&self, localization_id: &str) -> Result<Vec<ScreenshotSet>> {
        let endpoint = format!(
            "/v1/appStoreVersionLocalizations/{}/appScreenshotSets",
            localization_id
        );
        let items = self.get_all::<ScreenshotSetWire>(&endpoint).await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    async fn create_screenshot_set(
        &self,
        localization_id: &str,
        display_type: &str,
    ) -> Result<ScreenshotSet> {
        let body = json!({
            "data": {
                "type": "appScreenshotSets",
                "attributes": { "screenshotDisplayType": display_type },
                "relationships": relationship(
                    "appStoreVersionLocalization",
                    "appStoreVersionLocalizations",
                    localization_id,
                ),
            }
        });
        let created = self.post::<ScreenshotSetWire>("/v1/appScreenshotSets", body).await?;
        Ok(created.into())
    }

    async fn list_screenshots(&self, set_id: &str) -> Result<Vec<Screenshot>> {
        let endpoint = format!("/v1/appScreenshotSets/{}/appScreenshots", set_id);
        let items = self.get_all::<ScreenshotWire>(&endpoint).await?;
        Ok(items.into_iter().map(Into::into).collect())
    }

    async fn reserve_screenshot(
        &self,
        set_id: &str,
        file_name: &str,
        file_size: u64,
    ) -> Result<Screenshot> {
        let body = json!({
            "data": {
                "type": "appScreenshots",
                "attributes": { "fileName": file_name, "fileSize": file_size },
                "relationships": relationship("appScreenshotSet", "appScreenshotSets", set_id),
            }
        });
        let reserved = self.post::<ScreenshotWire>("/v1/appScreenshots", body).await?;
        Ok(reserved.into())
    }

    async fn commit_screenshot(&self, screenshot_id: &str, checksum: &str) -> Result<Screenshot> {
        let body = json!({
            "data": {
                "type": "appScreenshots",
                "id": screenshot_id,
                "attributes": { "uploaded": true, "sourceFileChecksum": checksum },
            }
        });
        let endpoint = format!("/v1/appScreenshots/{}", screenshot_id);
        let committed = self.patch::<ScreenshotWire>(&endpoint, body).await?;
        Ok(committed.into())
    }

    async fn get_screenshot(&self, screenshot_id: &str) -> Result<Screenshot> {
        let endpoint = format!("/v1/appScreenshots/{}", screenshot_id);
        Ok(self.get_one::<ScreenshotWire>(&endpoint).await?.into())
    }

    async fn upload_asset(&self, operations: &[UploadOperation], path: &Path) -> Result<()> {
        execute_upload_operations(&self.transfer_http, operations, path).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_store_version_page_parses() {
        let json = r#"{
            "data": [{
                "type": "appStoreVersions",
                "id": "ver-9",
                "attributes": {"versionString": "2.1.0", "platform": "IOS", "appStoreState": "PREPARE_FOR_SUBMISSION"}
            }],
            "links": {"self": "https://api.appstoreconnect.apple.com/v1/apps/1/appStoreVersions"}
        }"#;
        let page: Page<Resource<AppStoreVersionWire>> = serde_json::from_str(json).unwrap();
        assert_eq!(page.data[0].id, "ver-9");
        assert_eq!(page.data[0].attributes.version_string, "2.1.0");
        assert_eq!(page.data[0].attributes.platform.as_deref(), Some("IOS"));
        assert!(page.links.and_then(|l| l.next).is_none());
    }

    #[test]
    fn test_screenshot_resource_parses() {
        let json = r#"{
            "data": {
                "type": "appScreenshots",
                "id": "shot-1",
                "attributes": {
                    "fileName": "01.png",
                    "fileSize": 2048,
                    "uploadOperations": [{
                        "method": "PUT",
                        "url": "https://upload.example/1",
                        "offset": 0,
                        "length": 2048,
                        "requestHeaders": [{"name": "Content-Type", "value": "image/png"}]
                    }],
                    "assetDeliveryState": {"state": "AWAITING_UPLOAD", "errors": []}
                }
            }
        }"#;
        let doc: Document<Resource<ScreenshotWire>> = serde_json::from_str(json).unwrap();
        let shot: Screenshot = doc.data.into();
        assert_eq!(shot.file_name, "01.png");
        assert_eq!(shot.upload_operations.len(), 1);
        assert_eq!(shot.upload_operations[0].request_headers[0].value, "image/png");
        assert_eq!(shot.delivery_state.unwrap().state, "AWAITING_UPLOAD");
    }

    #[test]
    fn test_page_with_next_link() {
        let json = r#"{
            "data": [
                {"type": "appStoreVersionLocalizations", "id": "l1",
                 "attributes": {"locale": "en-US", "description": "Hello", "whatsNew": null}}
            ],
            "links": {"self": "x", "next": "https://api.example/v1/next?cursor=abc"}
        }"#;
        let page: Page<Resource<VersionLocalizationWire>> = serde_json::from_str(json).unwrap();
        assert_eq!(
            page.links.and_then(|l| l.next).as_deref(),
            Some("https://api.example/v1/next?cursor=abc")
        );
        let loc: VersionLocalization = page.data.into_iter().next().unwrap().into();
        assert_eq!(loc.locale, "en-US");
        assert_eq!(loc.attributes.description.as_deref(), Some("Hello"));
        assert_eq!(loc.attributes.whats_new, None);
    }

    #[test]
    fn test_missing_review_detail_is_null() {
        let doc: Document<Option<Resource<ReviewDetailAttributes>>> =
            serde_json::from_str(r#"{"data": null}"#).unwrap();
        assert!(doc.data.is_none());
    }

    #[test]
    fn test_app_info_prefers_state() {
        let json = r#"{"id": "ai", "attributes": {"appStoreState": "READY_FOR_SALE", "state": "READY_FOR_DISTRIBUTION"}}"#;
        let res: Resource<AppInfoWire> = serde_json::from_str(json).unwrap();
        let info: AppInfo = res.into();
        assert_eq!(info.state.as_deref(), Some("READY_FOR_DISTRIBUTION"));
    }

    #[test]
    fn test_create_body_merges_locale() {
        let attrs = VersionLocalizationAttributes {
            description: Some("Desc".to_string()),
            ..Default::default()
        };
        let value = attributes_with(&attrs, &[("locale", json!("de-DE"))]).unwrap();
        assert_eq!(value["locale"], "de-DE");
        assert_eq!(value["description"], "Desc");
        assert!(value.get("keywords").is_none());
    }

    #[test]
    fn test_new_requires_credentials() {
        let err = ConnectClient::new(&ConnectConfig::default()).err().unwrap();
        assert!(matches!(err, ConnectError::Configuration(_)));
    }
}
