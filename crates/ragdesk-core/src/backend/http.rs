//! REST transport for the document QA service.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{
    BackendFuture, DeleteAck, DeleteRequest, KbBackend, KbDocumentEntry, UploadReceipt,
    UploadRequest,
};
use crate::CoreError;

pub const DEFAULT_API_URL: &str = "http://localhost:5050/api/";

/// [`KbBackend`] over the service's JSON API.
///
/// No timeout is applied unless one is configured; a hung request then hangs
/// the caller.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    client: reqwest::Client,
    timeout: Option<Duration>,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(2)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            base_url,
            client,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Service root: the API base with its trailing `api/` segment removed.
    fn service_root(&self) -> String {
        match self.base_url.strip_suffix("api/") {
            Some(root) => root.to_string(),
            None => self.base_url.clone(),
        }
    }

    fn timed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.timeout {
            Some(t) => builder.timeout(t),
            None => builder,
        }
    }

    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>, CoreError> {
        let resp = self
            .timed(self.client.get(self.endpoint("collections")))
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, CoreError> {
        let resp = self
            .timed(self.client.get(self.endpoint("models")))
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn chat(&self, request: &ChatRequest) -> Result<ChatAnswer, CoreError> {
        let resp = self
            .timed(self.client.post(self.endpoint("chat")).json(request))
            .send()
            .await?;
        read_json(resp).await
    }

    pub async fn health(&self) -> Result<ServiceHealth, CoreError> {
        let resp = self
            .timed(self.client.get(self.service_root()))
            .send()
            .await?;
        read_json(resp).await
    }
}

impl KbBackend for HttpBackend {
    fn upload<'a>(&'a self, request: UploadRequest) -> BackendFuture<'a, UploadReceipt> {
        Box::pin(async move {
            let part = Part::bytes(request.payload)
                .file_name(request.filename.clone())
                .mime_str("application/pdf")?;
            let form = Form::new()
                .part("file", part)
                .text("collection", request.collection)
                .text("kb_name", request.kb_name)
                .text("do_ocr", request.ocr.to_string())
                .text("do_image_summary", request.image_summary.to_string());

            tracing::debug!(filename = %request.filename, "POST upload");
            let resp = self
                .timed(self.client.post(self.endpoint("upload")).multipart(form))
                .send()
                .await?;
            let body: UploadResponse = read_json(resp).await?;
            body.into_receipt()
        })
    }

    fn list_knowledge_bases<'a>(&'a self, collection: &'a str) -> BackendFuture<'a, Vec<String>> {
        Box::pin(async move {
            let url = self.endpoint(&format!(
                "knowledgeBases/{}",
                urlencoding::encode(collection)
            ));
            let resp = self.timed(self.client.get(&url)).send().await?;
            let body: KnowledgeBaseList = read_json(resp).await?;
            Ok(body.knowledge_bases)
        })
    }

    fn list_documents<'a>(
        &'a self,
        collection: &'a str,
        kb_id: &'a str,
    ) -> BackendFuture<'a, Vec<KbDocumentEntry>> {
        Box::pin(async move {
            let resp = self
                .timed(
                    self.client
                        .post(self.endpoint("knowledgeBasesDoc"))
                        .json(&serde_json::json!({ "collection": collection, "kb_name": kb_id })),
                )
                .send()
                .await?;
            let rows: Vec<DocumentRow> = read_json(resp).await?;
            Ok(rows.into_iter().map(DocumentRow::into_entry).collect())
        })
    }

    fn delete_document<'a>(&'a self, request: &'a DeleteRequest) -> BackendFuture<'a, DeleteAck> {
        Box::pin(async move {
            let resp = self
                .timed(
                    self.client.post(self.endpoint("delete")).json(&serde_json::json!({
                        "document_id": request.document_id,
                        "filename": request.filename,
                        "kb_name": request.kb_name,
                        "collection": request.collection,
                    })),
                )
                .send()
                .await?;
            let body: DeleteResponse = read_json(resp).await?;
            body.into_ack()
        })
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, CoreError> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(CoreError::Transport(server_error_message(
            status.as_u16(),
            &body,
        )));
    }
    decode_body(&body)
}

fn decode_body<T: DeserializeOwned>(body: &str) -> Result<T, CoreError> {
    serde_json::from_str(body)
        .map_err(|e| CoreError::Transport(format!("unexpected response from server: {e}")))
}

/// The `error` field of a JSON error body, or `HTTP <status>`.
pub fn server_error_message(status: u16, body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .filter(|msg| !msg.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"))
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    file_id: Option<String>,
    #[serde(default)]
    filename: Option<String>,
    #[serde(default)]
    kb_name: Option<String>,
}

impl UploadResponse {
    fn into_receipt(self) -> Result<UploadReceipt, CoreError> {
        if self.success == Some(false) {
            return Err(CoreError::Transport(
                self.error.unwrap_or_else(|| "upload failed".to_string()),
            ));
        }
        let document_id = self
            .file_id
            .ok_or_else(|| CoreError::Transport("upload response has no file_id".to_string()))?;
        let kb_server_id = self
            .kb_name
            .ok_or_else(|| CoreError::Transport("upload response has no kb_name".to_string()))?;
        Ok(UploadReceipt {
            document_id,
            kb_server_id,
            filename: self.filename,
        })
    }
}

#[derive(Debug, Deserialize)]
struct KnowledgeBaseList {
    #[serde(default)]
    knowledge_bases: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DocumentRow {
    filename: String,
    file_id: String,
    kb_name: String,
}

impl DocumentRow {
    fn into_entry(self) -> KbDocumentEntry {
        KbDocumentEntry {
            filename: self.filename,
            document_id: self.file_id,
            kb_id: self.kb_name,
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl DeleteResponse {
    fn into_ack(self) -> Result<DeleteAck, CoreError> {
        if !self.success {
            return Err(CoreError::Transport(
                self.error
                    .or(self.message)
                    .unwrap_or_else(|| "delete failed".to_string()),
            ));
        }
        Ok(DeleteAck {
            message: self.message.unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CollectionInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "vectorCount", default)]
    pub vector_count: u64,
    #[serde(rename = "vectorDimension", default)]
    pub vector_dimension: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub size: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub loaded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub query: String,
    pub model: String,
    pub collection: String,
    #[serde(rename = "kbName", skip_serializing_if = "Option::is_none")]
    pub kb_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatAnswer {
    pub answer: String,
    #[serde(default)]
    pub sources: Vec<ChatSource>,
}

/// A retrieved passage cited by a chat answer. `page` and the figure/table
/// references vary in shape between ingestion runs, so they stay as raw JSON.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatSource {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub score: f64,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub page: Option<serde_json::Value>,
    #[serde(default)]
    pub image_ref: Option<serde_json::Value>,
    #[serde(default)]
    pub table_ref: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServiceHealth {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub version: String,
}
