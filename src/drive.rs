//! Google Drive document source.
//!
//! Authenticates as a service account: a short-lived RS256 assertion signed
//! with the account's private key is exchanged for an OAuth access token,
//! which is cached until shortly before it expires.
//!
//! # Content extraction
//!
//! | MIME type | Download |
//! |-----------|----------|
//! | `application/vnd.google-apps.document` | export as `text/plain` |
//! | `application/vnd.google-apps.spreadsheet` | export as `text/csv` |
//! | `application/vnd.google-apps.presentation` | export as `text/plain` |
//! | anything else | raw bytes (`alt=media`), which must be valid UTF-8 |

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use uuid::Uuid;

const DRIVE_API: &str = "https://www.googleapis.com/drive/v3";
const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const DOCUMENT_MIME: &str = "application/vnd.google-apps.document";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";
const PRESENTATION_MIME: &str = "application/vnd.google-apps.presentation";

/// Longest channel lifetime Drive accepts.
const WATCH_TTL_DAYS: i64 = 7;

/// File metadata as returned by `files.list`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub web_view_link: Option<String>,
    #[serde(default)]
    pub modified_time: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

/// Canonical browser link for a Drive file.
pub fn file_url(file_id: &str) -> String {
    format!("https://drive.google.com/file/d/{}/view", file_id)
}

/// Where documents to index come from.
#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Non-trashed files directly inside `folder_id`.
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>>;

    /// The file's content as text.
    async fn file_content(&self, file: &DriveFile) -> Result<String>;

    /// Link stored with each chunk: the file's `webViewLink` when present.
    fn file_url(&self, file: &DriveFile) -> String {
        file.web_view_link
            .clone()
            .filter(|link| !link.is_empty())
            .unwrap_or_else(|| file_url(&file.id))
    }
}

/// Fields of a service-account key file that we use.
#[derive(Debug, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default)]
    token_uri: Option<String>,
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

/// A registered change-notification channel.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchChannel {
    pub id: String,
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Milliseconds since the epoch, as a decimal string.
    #[serde(default)]
    pub expiration: Option<String>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct DriveClient {
    client: reqwest::Client,
    client_email: String,
    encoding_key: EncodingKey,
    token_uri: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    /// Build a client from a service-account JSON key file.
    pub fn from_service_account_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| {
            format!("Failed to read service account file: {}", path.display())
        })?;
        let key: ServiceAccountKey =
            serde_json::from_str(&raw).context("Failed to parse service account file")?;
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("Invalid service account private key")?;

        Ok(Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(60))
                .build()?,
            client_email: key.client_email,
            encoding_key,
            token_uri: key
                .token_uri
                .unwrap_or_else(|| DEFAULT_TOKEN_URI.to_string()),
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.value.clone());
            }
        }

        let now = Utc::now();
        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: DRIVE_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: (now + ChronoDuration::hours(1)).timestamp(),
        };
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow!("Failed to sign service account assertion: {}", e))?;

        let resp = self
            .client
            .post(&self.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("Google token request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Google token exchange failed with {}: {}", status, body);
        }
        let token: TokenResponse = resp.json().await?;

        // Refresh a minute early.
        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token.access_token)
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<reqwest::Response> {
        let token = self.access_token().await?;
        let resp = self
            .client
            .get(url)
            .bearer_auth(token)
            .query(query)
            .send()
            .await
            .with_context(|| format!("Drive request failed: {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Drive API error {}: {}", status, body);
        }
        Ok(resp)
    }

    /// Register a web-hook channel for changes under `folder_id`.
    pub async fn watch_folder(&self, folder_id: &str, callback_url: &str) -> Result<WatchChannel> {
        validate_callback_url(callback_url)?;

        let expiration = (Utc::now() + ChronoDuration::days(WATCH_TTL_DAYS)).timestamp_millis();
        let body = serde_json::json!({
            "id": channel_id(),
            "type": "web_hook",
            "address": callback_url,
            "expiration": expiration,
        });

        let token = self.access_token().await?;
        let resp = self
            .client
            .post(format!("{}/files/{}/watch", DRIVE_API, folder_id))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await
            .context("Drive watch request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("Drive watch failed with {}: {}", status, body);
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl DocumentSource for DriveClient {
    async fn list_files(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let q = format!("'{}' in parents and trashed = false", folder_id);
        let url = format!("{}/files", DRIVE_API);
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: FileList = {
                let mut query = vec![
                    ("q", q.as_str()),
                    ("pageSize", "100"),
                    (
                        "fields",
                        "nextPageToken, files(id, name, mimeType, webViewLink, modifiedTime)",
                    ),
                ];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                self.get(&url, &query).await?.json().await?
            };
            files.extend(page.files);

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        tracing::info!(folder_id, count = files.len(), "listed drive files");
        Ok(files)
    }

    async fn file_content(&self, file: &DriveFile) -> Result<String> {
        let resp = match export_mime(&file.mime_type) {
            Some(mime) => {
                self.get(
                    &format!("{}/files/{}/export", DRIVE_API, file.id),
                    &[("mimeType", mime)],
                )
                .await?
            }
            None => {
                self.get(
                    &format!("{}/files/{}", DRIVE_API, file.id),
                    &[("alt", "media")],
                )
                .await?
            }
        };
        let bytes = resp.bytes().await?;
        let content = decode_text(&bytes)
            .with_context(|| format!("{} is not a text file ({})", file.name, file.mime_type))?;
        tracing::debug!(file = %file.name, chars = content.len(), "downloaded file");
        Ok(content)
    }
}

/// Strict UTF-8 decode. Binary downloads (PDF, images, Office files) fail
/// here and the indexer skips them.
pub fn decode_text(bytes: &[u8]) -> Result<String> {
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Export format for Google-native files; `None` means download raw.
pub fn export_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        DOCUMENT_MIME | PRESENTATION_MIME => Some("text/plain"),
        SPREADSHEET_MIME => Some("text/csv"),
        _ => None,
    }
}

/// Drive only delivers notifications to HTTPS endpoints.
pub fn validate_callback_url(url: &str) -> Result<()> {
    if !url.starts_with("https://") {
        bail!("Callback URL must use HTTPS: {}", url);
    }
    Ok(())
}

fn channel_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("nerdsiq-{}", &hex[..8])
}
