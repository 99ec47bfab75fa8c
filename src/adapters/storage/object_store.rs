//! Remote object-store session storage over HTTP.
//!
//! Sessions live at `{base_url}/sessions/{session_id}` as JSON documents:
//! `GET` returns 200 with the document or 404, `PUT` replaces it, `DELETE`
//! removes it (404 is fine). Reachability is a `HEAD` on the base URL.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::domain::errors::StorageError;
use crate::domain::models::SessionState;
use crate::domain::ports::StorageBackend;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stores sessions in an HTTP object store.
#[derive(Debug, Clone)]
pub struct ObjectStoreStorage {
    client: Client,
    base_url: String,
}

impl ObjectStoreStorage {
    pub fn new(base_url: impl Into<String>) -> Result<Self, StorageError> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StorageError::Connection(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn object_url(&self, session_id: &str) -> String {
        format!("{}/sessions/{}", self.base_url, session_id)
    }
}

fn unexpected(operation: &str, status: StatusCode) -> StorageError {
    StorageError::Connection(format!("Object store {operation} returned {status}"))
}

#[async_trait]
impl StorageBackend for ObjectStoreStorage {
    fn name(&self) -> &'static str {
        "object_store"
    }

    async fn load(&self, session_id: &str) -> Result<Option<SessionState>, StorageError> {
        let response = self.client.get(self.object_url(session_id)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let bytes = response.bytes().await?;
                Ok(Some(serde_json::from_slice(&bytes)?))
            }
            status => Err(unexpected("GET", status)),
        }
    }

    async fn save(&self, session_id: &str, state: &SessionState) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.object_url(session_id))
            .json(state)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(unexpected("PUT", response.status()))
        }
    }

    async fn delete(&self, session_id: &str) -> Result<(), StorageError> {
        let response = self.client.delete(self.object_url(session_id)).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(unexpected("DELETE", status)),
        }
    }

    async fn ping(&self) -> Result<(), StorageError> {
        let response = self.client.head(&self.base_url).send().await?;

        if response.status().is_server_error() {
            Err(unexpected("HEAD", response.status()))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    fn state_body(session_id: &str) -> String {
        let mut state = SessionState::empty(session_id);
        state.push_exchange("q", "a");
        serde_json::to_string(&state).unwrap()
    }

    #[tokio::test]
    async fn test_load_found_and_missing() {
        let mut server = Server::new_async().await;
        let found = server
            .mock("GET", "/sessions/s1")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(state_body("s1"))
            .create_async()
            .await;
        let missing = server
            .mock("GET", "/sessions/s2")
            .with_status(404)
            .create_async()
            .await;

        let storage = ObjectStoreStorage::new(format!("{}/", server.url())).unwrap();
        let state = storage.load("s1").await.unwrap().unwrap();
        assert_eq!(state.turns.len(), 2);
        assert!(storage.load("s2").await.unwrap().is_none());

        found.assert_async().await;
        missing.assert_async().await;
    }

    #[tokio::test]
    async fn test_save_puts_json() {
        let mut server = Server::new_async().await;
        let put = server
            .mock("PUT", "/sessions/s1")
            .match_header("content-type", "application/json")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"session_id":"s1"}"#.to_string(),
            ))
            .with_status(204)
            .create_async()
            .await;

        let storage = ObjectStoreStorage::new(server.url()).unwrap();
        storage.save("s1", &SessionState::empty("s1")).await.unwrap();
        put.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_tolerates_missing() {
        let mut server = Server::new_async().await;
        server
            .mock("DELETE", "/sessions/gone")
            .with_status(404)
            .create_async()
            .await;

        let storage = ObjectStoreStorage::new(server.url()).unwrap();
        assert!(storage.delete("gone").await.is_ok());
    }

    #[tokio::test]
    async fn test_server_errors_surface_as_connection_errors() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/sessions/s1")
            .with_status(503)
            .create_async()
            .await;
        server.mock("HEAD", "/").with_status(500).create_async().await;

        let storage = ObjectStoreStorage::new(server.url()).unwrap();
        assert!(matches!(
            storage.load("s1").await,
            Err(StorageError::Connection(_))
        ));
        assert!(storage.ping().await.is_err());
    }
}
