use std::{net::SocketAddr, sync::Arc};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};

use crate::chat::{Attachment, ChatRecord, Message};
use crate::error::StoreError;
use crate::storage::{ChatStore, FsChatStore};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<FsChatStore>,
}

/// Store failures mapped onto HTTP statuses: validation is the caller's
/// fault, `NotFound` only surfaces where the contract says it should.
struct ApiError(StoreError);

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            StoreError::Validation(_) => StatusCode::BAD_REQUEST,
            StoreError::NotFound => StatusCode::NOT_FOUND,
            StoreError::Io(_) | StoreError::Corrupt(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(error = %self.0, "store failure");
        }
        (status, self.0.to_string()).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatBody {
    pub chat_id: Option<String>,
    pub name: Option<String>,
    pub messages: Option<Vec<Message>>,
}

async fn save_chat(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(body): Json<SaveChatBody>,
) -> Result<&'static str, ApiError> {
    // The browser client always sends all three fields; anything else is a
    // malformed request, not a partial update.
    let (Some(chat_id), Some(name), Some(messages)) = (body.chat_id, body.name, body.messages)
    else {
        return Err(StoreError::Validation(
            "chatId, name, and messages are required".into(),
        )
        .into());
    };
    state.store.save_chat(&chat_id, Some(&name), Some(&messages)).await?;
    Ok("Chat saved successfully")
}

async fn load_chat(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    Ok(Json(state.store.load_chat(&id).await?))
}

async fn load_chats(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<Vec<ChatRecord>>, ApiError> {
    Ok(Json(state.store.list_chats().await?))
}

async fn delete_chat(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(id): axum::extract::Path<String>,
) -> Result<&'static str, ApiError> {
    state.store.delete_chat(&id).await?;
    Ok("Chat deleted successfully")
}

#[derive(Debug, Deserialize)]
pub struct SaveFilesBody {
    pub files: Vec<Attachment>,
}

async fn save_files(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(chat_id): axum::extract::Path<String>,
    Json(body): Json<SaveFilesBody>,
) -> Result<&'static str, ApiError> {
    state.store.save_attachments(&chat_id, &body.files).await?;
    Ok("Files saved successfully")
}

async fn load_files(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(chat_id): axum::extract::Path<String>,
) -> Result<Json<Vec<Attachment>>, ApiError> {
    Ok(Json(state.store.load_attachments(&chat_id).await?))
}

async fn delete_file(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path((chat_id, file_name)): axum::extract::Path<(String, String)>,
) -> Result<&'static str, ApiError> {
    state.store.delete_attachment(&chat_id, &file_name).await?;
    Ok("File deleted successfully")
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPromptBody {
    pub system_prompt: String,
}

async fn load_system_prompt(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<SystemPromptBody>, ApiError> {
    let system_prompt = state.store.load_system_prompt().await?;
    Ok(Json(SystemPromptBody { system_prompt }))
}

async fn save_system_prompt(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(body): Json<SystemPromptBody>,
) -> Result<&'static str, ApiError> {
    state.store.save_system_prompt(&body.system_prompt).await?;
    Ok("System prompt saved successfully")
}

pub fn router(state: AppState) -> Router {
    // The front end is a browser app on another origin; this is a local
    // single-user tool, so CORS is wide open.
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);
    Router::new()
        .route("/save-chat", post(save_chat))
        .route("/load-chat/:id", get(load_chat))
        .route("/load-chats", get(load_chats))
        .route("/delete-chat/:id", delete(delete_chat))
        .route("/save-files/:chat_id", post(save_files))
        .route("/load-files/:chat_id", get(load_files))
        .route("/delete-file/:chat_id/:file_name", delete(delete_file))
        .route("/load-system-prompt", get(load_system_prompt))
        .route("/save-system-prompt", post(save_system_prompt))
        .layer(cors)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "persistence server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn spawn_server() -> (String, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(FsChatStore::open(dir.path()).unwrap());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState { store });
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), dir)
    }

    #[tokio::test]
    async fn save_then_load_chat_roundtrip() {
        let (base, _dir) = spawn_server().await;
        let client = reqwest::Client::new();

        let resp = client
            .post(format!("{base}/save-chat"))
            .json(&json!({
                "chatId": "100",
                "name": "first",
                "messages": [{"role": "user", "content": "hello"}]
            }))
            .send()
            .await
            .unwrap();
        assert!(resp.status().is_success());

        let messages: Vec<Message> = client
            .get(format!("{base}/load-chat/100"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(messages, vec![Message::user("hello")]);

        let chats: Vec<ChatRecord> = client
            .get(format!("{base}/load-chats"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(chats.len(), 1);
        assert_eq!(chats[0].name, "first");
    }

    #[tokio::test]
    async fn load_unknown_chat_returns_empty_array_with_success() {
        let (base, _dir) = spawn_server().await;
        let resp = reqwest::get(format!("{base}/load-chat/nope")).await.unwrap();
        assert!(resp.status().is_success());
        let messages: Vec<Message> = resp.json().await.unwrap();
        assert!(messages.is_empty());
    }

    #[tokio::test]
    async fn save_chat_missing_fields_is_bad_request() {
        let (base, _dir) = spawn_server().await;
        let resp = reqwest::Client::new()
            .post(format!("{base}/save-chat"))
            .json(&json!({"chatId": "1"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_chat_is_idempotent_and_removes_files() {
        let (base, _dir) = spawn_server().await;
        let client = reqwest::Client::new();
        client
            .post(format!("{base}/save-chat"))
            .json(&json!({"chatId": "1", "name": "n", "messages": []}))
            .send()
            .await
            .unwrap();
        client
            .post(format!("{base}/save-files/1"))
            .json(&json!({"files": [{"name": "a.txt", "content": "X"}]}))
            .send()
            .await
            .unwrap();

        let resp = client.delete(format!("{base}/delete-chat/1")).send().await.unwrap();
        assert!(resp.status().is_success());
        // Second delete of the same id still succeeds.
        let resp = client.delete(format!("{base}/delete-chat/1")).send().await.unwrap();
        assert!(resp.status().is_success());

        let files: Vec<Attachment> = client
            .get(format!("{base}/load-files/1"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn save_files_replaces_set_and_delete_file_404s_when_absent() {
        let (base, _dir) = spawn_server().await;
        let client = reqwest::Client::new();
        client
            .post(format!("{base}/save-files/7"))
            .json(&json!({"files": [{"name": "a.txt", "content": "X"}, {"name": "b.txt", "content": "Y"}]}))
            .send()
            .await
            .unwrap();
        client
            .post(format!("{base}/save-files/7"))
            .json(&json!({"files": [{"name": "a.txt", "content": "Z"}]}))
            .send()
            .await
            .unwrap();

        let files: Vec<Attachment> = client
            .get(format!("{base}/load-files/7"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(files, vec![Attachment { name: "a.txt".into(), content: "Z".into() }]);

        let resp = client.delete(format!("{base}/delete-file/7/a.txt")).send().await.unwrap();
        assert!(resp.status().is_success());
        let resp = client.delete(format!("{base}/delete-file/7/a.txt")).send().await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn system_prompt_roundtrip() {
        let (base, _dir) = spawn_server().await;
        let client = reqwest::Client::new();

        let body: SystemPromptBody = client
            .get(format!("{base}/load-system-prompt"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.system_prompt, "");

        client
            .post(format!("{base}/save-system-prompt"))
            .json(&json!({"systemPrompt": "be terse"}))
            .send()
            .await
            .unwrap();
        let body: SystemPromptBody = client
            .get(format!("{base}/load-system-prompt"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body.system_prompt, "be terse");
    }

    #[tokio::test]
    async fn traversal_attempts_are_rejected() {
        let (base, _dir) = spawn_server().await;
        let client = reqwest::Client::new();
        let resp = client
            .post(format!("{base}/save-chat"))
            .json(&json!({"chatId": "..", "name": "n", "messages": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

        let resp = client
            .post(format!("{base}/save-files/1"))
            .json(&json!({"files": [{"name": "chat.json", "content": "x"}]}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
