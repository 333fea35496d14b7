use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::{AssetStore, StoreError, StoredAsset};

pub const DEFAULT_API_BASE: &str = "https://api.cloudinary.com/v1_1";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Credentials and endpoint for a Cloudinary account.
///
/// Built once at startup and never mutated; the client owns its copy.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CloudinaryConfig {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
    pub api_base: String,
    /// Whole-request timeout for every API call.
    pub request_timeout_secs: u64,
}

impl Default for CloudinaryConfig {
    fn default() -> Self {
        Self {
            cloud_name: String::new(),
            api_key: String::new(),
            api_secret: String::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl fmt::Debug for CloudinaryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryConfig")
            .field("cloud_name", &self.cloud_name)
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("api_base", &self.api_base)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    public_id: String,
    secure_url: String,
}

#[derive(Debug, Deserialize)]
struct DestroyResponse {
    result: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

/// [`AssetStore`] backed by the Cloudinary upload API, using signed requests.
#[derive(Debug, Clone)]
pub struct CloudinaryStore {
    config: CloudinaryConfig,
    http: reqwest::Client,
}

impl CloudinaryStore {
    pub fn new(config: CloudinaryConfig) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("dominant-color/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/{}/image/{action}",
            self.config.api_base.trim_end_matches('/'),
            self.config.cloud_name
        )
    }

    /// Signed form fields shared by every request: the caller's params plus
    /// `timestamp`, `api_key` and the signature over them.
    fn signed_form(&self, params: BTreeMap<&'static str, String>) -> Form {
        let mut params = params;
        params.insert("timestamp", unix_timestamp().to_string());
        let signature = sign(&params, &self.config.api_secret);

        let mut form = Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        form.text("api_key", self.config.api_key.clone())
            .text("signature", signature)
            .text("signature_algorithm", "sha256")
    }

    async fn send<T: serde::de::DeserializeOwned>(&self, action: &str, form: Form) -> Result<T, StoreError> {
        let response = self
            .http
            .post(self.endpoint(action))
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.error.message)
                .unwrap_or(text);
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))
    }
}

#[async_trait::async_trait]
impl AssetStore for CloudinaryStore {
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn store(&self, bytes: &[u8], folder: &str) -> Result<StoredAsset, StoreError> {
        let mut params = BTreeMap::new();
        params.insert("folder", folder.to_string());
        let form = self
            .signed_form(params)
            .part("file", Part::bytes(bytes.to_vec()).file_name("upload"));

        let uploaded: UploadResponse = self.send("upload", form).await?;
        tracing::debug!(public_id = %uploaded.public_id, "stored asset");
        Ok(StoredAsset {
            id: uploaded.public_id,
            url: uploaded.secure_url,
        })
    }

    #[tracing::instrument(skip(self))]
    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut params = BTreeMap::new();
        params.insert("public_id", id.to_string());
        let destroyed: DestroyResponse = self.send("destroy", self.signed_form(params)).await?;
        match destroyed.result.as_str() {
            "ok" | "not found" => Ok(()),
            other => Err(StoreError::InvalidResponse(format!("destroy returned {other:?}"))),
        }
    }
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// `hex(sha256("k1=v1&k2=v2..." + secret))` with keys in lexical order.
fn sign(params: &BTreeMap<&'static str, String>, secret: &str) -> String {
    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&");
    let mut hasher = Sha256::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_sorts_params_and_appends_secret() {
        let mut params = BTreeMap::new();
        params.insert("timestamp", "1315060510".to_string());
        params.insert("folder", "temp_uploads".to_string());

        let expected = {
            let mut h = Sha256::new();
            h.update(b"folder=temp_uploads&timestamp=1315060510abcd");
            hex::encode(h.finalize())
        };
        assert_eq!(sign(&params, "abcd"), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn endpoint_tolerates_trailing_slash() {
        let store = CloudinaryStore::new(CloudinaryConfig {
            cloud_name: "demo".into(),
            api_base: "https://example.test/v1_1/".into(),
            ..CloudinaryConfig::default()
        })
        .unwrap();
        assert_eq!(store.endpoint("destroy"), "https://example.test/v1_1/demo/image/destroy");
    }

    #[test]
    fn debug_hides_secret() {
        let config = CloudinaryConfig {
            api_secret: "hunter2".into(),
            ..CloudinaryConfig::default()
        };
        assert!(!format!("{config:?}").contains("hunter2"));
    }
}
