//! HTTP transport for the drive's JSON API

use crate::{
    transport::Transport,
    types::*,
    ClientError, Config, Result,
};
use async_trait::async_trait;
use reqwest::{header, Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use stratus_crypto::PublicKey;
use tracing::{debug, instrument};
use uuid::Uuid;

#[derive(Serialize)]
struct UuidBody {
    uuid: Uuid,
}

#[derive(Serialize)]
struct EmailBody<'a> {
    email: &'a str,
}

#[derive(Serialize)]
struct SearchBody {
    items: Vec<SearchIndexItem>,
}

#[derive(Deserialize)]
struct RecipientsData {
    users: Vec<ShareRecipient>,
}

#[derive(Deserialize)]
struct LinksData {
    links: Vec<ItemLink>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublicKeyData {
    public_key: String,
}

/// Sends engine requests to the drive API over HTTP
pub struct HttpTransport {
    config: Config,
    http: Client,
}

impl HttpTransport {
    /// Create a new transport with the given configuration
    pub fn new(config: Config) -> Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ClientError::Config(format!("invalid user agent: {}", config.user_agent)))?,
        );

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self { config, http })
    }

    /// Create with endpoint URL
    pub fn with_endpoint(endpoint: &str) -> Result<Self> {
        Self::new(Config::new(endpoint))
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    // ==================== Helper Methods ====================

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.config.base_url(), path);
        debug!("Sending POST request to {}", url);
        let req = self.authorize(self.http.post(&url)).json(body);
        Self::parse(req.send().await?).await
    }

    /// POST whose response carries no data worth decoding
    async fn post_unit<B>(&self, path: &str, body: &B) -> Result<()>
    where
        B: Serialize + ?Sized,
    {
        self.post::<B, serde_json::Value>(path, body).await.map(drop)
    }

    async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClientError::from_api_body(&text, status.as_u16()));
        }

        let envelope: ApiResponse<T> = serde_json::from_str(&text)
            .map_err(|e| ClientError::InvalidResponse(format!("{}: {}", e, text)))?;
        if !envelope.status {
            return Err(ClientError::Api {
                code: envelope.code,
                message: envelope.message,
            });
        }
        // Unit-like responses may omit data
        match envelope.data {
            Some(data) => Ok(data),
            None => serde_json::from_value(serde_json::Value::Null)
                .map_err(|_| ClientError::InvalidResponse("response has no data".into())),
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self, chunk), fields(uuid = %chunk.uuid, index = chunk.index))]
    async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<StorageLocation> {
        let url = format!("{}/v3/upload", self.config.ingest_url());
        let query = [
            ("uuid", chunk.uuid.to_string()),
            ("index", chunk.index.to_string()),
            ("parent", chunk.parent.to_string()),
            ("uploadKey", chunk.upload_key),
        ];
        debug!("Sending POST request to {}", url);
        let req = self
            .authorize(self.http.post(&url))
            .query(&query)
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk.data);
        Self::parse(req.send().await?).await
    }

    #[instrument(skip(self, done), fields(uuid = %done.uuid))]
    async fn complete_upload(&self, done: UploadDone) -> Result<()> {
        self.post_unit("/v3/upload/done", &done).await
    }

    #[instrument(skip(self, done), fields(uuid = %done.uuid))]
    async fn complete_empty_upload(&self, done: EmptyUploadDone) -> Result<()> {
        self.post_unit("/v3/upload/empty", &done).await
    }

    #[instrument(skip(self))]
    async fn share_recipients(&self, uuid: Uuid) -> Result<Vec<ShareRecipient>> {
        let data: RecipientsData = self.post("/v3/item/shared", &UuidBody { uuid }).await?;
        Ok(data.users)
    }

    #[instrument(skip(self))]
    async fn item_links(&self, uuid: Uuid) -> Result<Vec<ItemLink>> {
        let data: LinksData = self.post("/v3/item/linked", &UuidBody { uuid }).await?;
        Ok(data.links)
    }

    #[instrument(skip(self))]
    async fn recipient_public_key(&self, email: &str) -> Result<PublicKey> {
        let data: PublicKeyData = self.post("/v3/user/publicKey", &EmailBody { email }).await?;
        PublicKey::from_base64(&data.public_key)
            .map_err(|e| ClientError::InvalidResponse(format!("public key for {}: {}", email, e)))
    }

    #[instrument(skip(self))]
    async fn list_subtree(&self, uuid: Uuid) -> Result<DirectoryListing> {
        self.post("/v3/dir/download", &UuidBody { uuid }).await
    }

    #[instrument(skip(self, request), fields(uuid = %request.uuid))]
    async fn share_item(&self, request: ShareRequest) -> Result<()> {
        self.post_unit("/v3/item/share", &request).await
    }

    #[instrument(skip(self, update), fields(uuid = %update.uuid))]
    async fn update_shared_item(&self, update: SharedItemUpdate) -> Result<()> {
        self.post_unit("/v3/item/shared/rename", &update).await
    }

    #[instrument(skip(self, request), fields(uuid = %request.uuid))]
    async fn add_link_item(&self, request: LinkAddRequest) -> Result<()> {
        self.post_unit("/v3/dir/link/add", &request).await
    }

    #[instrument(skip(self, update), fields(uuid = %update.uuid))]
    async fn update_link_item(&self, update: LinkItemUpdate) -> Result<()> {
        self.post_unit("/v3/item/linked/rename", &update).await
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    async fn submit_search_index(&self, items: Vec<SearchIndexItem>) -> Result<()> {
        self.post_unit("/v3/search/add", &SearchBody { items }).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_user_agent_is_config_error() {
        let mut config = Config::default();
        config.user_agent = "bad\nagent".into();
        assert!(matches!(HttpTransport::new(config), Err(ClientError::Config(_))));
    }
}
