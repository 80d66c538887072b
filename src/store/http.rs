//! REST client for the remote note service.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{NoteError, NoteResult};
use crate::models::{Config, Folder, Note, NoteDraft, NoteUpdate};
use crate::query::{QueryDescriptor, ViewKind};
use crate::session::Session;
use crate::store::NoteStore;

pub struct HttpNoteStore {
    base_url: String,
    client: reqwest::Client,
}

// ── Wire types ──────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FolderContents {
    #[serde(default)]
    folders: Vec<Folder>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateFolderBody<'a> {
    parent_path: &'a str,
    name: &'a str,
}

#[derive(Debug, Serialize)]
struct RenameFolderBody<'a> {
    name: &'a str,
}

/// Pulls the payload out of a `{ success, data, message }` envelope.
/// Bodies without an envelope are taken as the payload itself.
fn unwrap_envelope<T: DeserializeOwned>(body: Value) -> NoteResult<T> {
    let payload = match body {
        Value::Object(mut map) => {
            if map.get("success").and_then(Value::as_bool) == Some(false) {
                let message = map
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("Operation failed");
                return Err(NoteError::Remote(message.to_string()));
            }
            match map.remove("data") {
                Some(data) => data,
                None => Value::Object(map),
            }
        }
        other => other,
    };
    serde_json::from_value(payload)
        .map_err(|e| NoteError::Remote(format!("Invalid response from server: {}", e)))
}

/// Maps a failed HTTP status onto the error taxonomy.
fn status_error(status: StatusCode, body: &str) -> NoteError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "Something went wrong".to_string());

    match status {
        StatusCode::UNAUTHORIZED => NoteError::Auth("Session expired - please login again".to_string()),
        StatusCode::NOT_FOUND => NoteError::NotFound(message),
        StatusCode::CONFLICT => NoteError::Conflict(message),
        _ => NoteError::Remote(message),
    }
}

fn encode_path(path: &str) -> String {
    urlencoding::encode(path).into_owned()
}

// ── Client impl ─────────────────────────────────────

impl HttpNoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> NoteResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| NoteError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> NoteResult<Self> {
        Self::new(&config.api_base_url, config.request_timeout())
    }

    fn request(&self, session: &Session, method: Method, route: &str) -> RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.base_url, route))
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        match session.bearer_token() {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, session: &Session, builder: RequestBuilder) -> NoteResult<Response> {
        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let err = status_error(status, &body);
        if err.is_auth() {
            session.report_rejected();
        }
        log::debug!("Remote store answered {}: {}", status, err);
        Err(err)
    }

    async fn fetch<T: DeserializeOwned>(&self, session: &Session, builder: RequestBuilder) -> NoteResult<T> {
        let response = self.send(session, builder).await?;
        let body: Value = response.json().await?;
        unwrap_envelope(body)
    }

    /// Route selecting the view kind; filters travel as query parameters.
    fn list_route(query: &QueryDescriptor) -> String {
        match query.view_kind() {
            ViewKind::All => "/notes".to_string(),
            ViewKind::Favorites => "/notes/favorites".to_string(),
            ViewKind::Archived => "/notes/archived".to_string(),
            ViewKind::ByCategory => format!(
                "/notes/category/{}",
                encode_path(query.category().unwrap_or_default())
            ),
            ViewKind::ByFolder => format!(
                "/notes/folder/{}",
                encode_path(query.folder_path().unwrap_or(crate::paths::ROOT))
            ),
        }
    }
}

#[async_trait]
impl NoteStore for HttpNoteStore {
    async fn list_notes(&self, session: &Session, query: &QueryDescriptor) -> NoteResult<Vec<Note>> {
        let builder = self
            .request(session, Method::GET, &Self::list_route(query))
            .query(&query.query_params());
        self.fetch(session, builder).await
    }

    async fn get_note(&self, session: &Session, id: &str) -> NoteResult<Note> {
        let route = format!("/notes/{}", encode_path(id));
        self.fetch(session, self.request(session, Method::GET, &route)).await
    }

    async fn create_note(&self, session: &Session, draft: &NoteDraft) -> NoteResult<Note> {
        let builder = self.request(session, Method::POST, "/notes").json(draft);
        self.fetch(session, builder).await
    }

    async fn update_note(&self, session: &Session, id: &str, update: &NoteUpdate) -> NoteResult<Note> {
        let route = format!("/notes/{}", encode_path(id));
        let builder = self.request(session, Method::PUT, &route).json(update);
        self.fetch(session, builder).await
    }

    async fn delete_note(&self, session: &Session, id: &str) -> NoteResult<()> {
        let route = format!("/notes/{}", encode_path(id));
        self.send(session, self.request(session, Method::DELETE, &route))
            .await
            .map(|_| ())
    }

    async fn list_folder_contents(&self, session: &Session, path: &str) -> NoteResult<Vec<Folder>> {
        let route = format!("/folders/{}/contents", encode_path(path));
        let contents: FolderContents = self
            .fetch(session, self.request(session, Method::GET, &route))
            .await?;
        Ok(contents.folders)
    }

    async fn create_folder(&self, session: &Session, parent_path: &str, name: &str) -> NoteResult<Folder> {
        let body = CreateFolderBody { parent_path, name };
        let builder = self.request(session, Method::POST, "/folders").json(&body);
        self.fetch(session, builder).await
    }

    async fn rename_folder(&self, session: &Session, path: &str, new_name: &str) -> NoteResult<Folder> {
        let route = format!("/folders/{}", encode_path(path));
        let body = RenameFolderBody { name: new_name };
        let builder = self.request(session, Method::PUT, &route).json(&body);
        self.fetch(session, builder).await
    }

    async fn delete_folder(&self, session: &Session, path: &str) -> NoteResult<()> {
        let route = format!("/folders/{}", encode_path(path));
        self.send(session, self.request(session, Method::DELETE, &route))
            .await
            .map(|_| ())
    }

    async fn list_tags(&self, session: &Session) -> NoteResult<BTreeSet<String>> {
        self.fetch(session, self.request(session, Method::GET, "/notes/tags"))
            .await
    }

    async fn list_categories(&self, session: &Session) -> NoteResult<BTreeSet<String>> {
        self.fetch(session, self.request(session, Method::GET, "/notes/categories"))
            .await
    }
}
