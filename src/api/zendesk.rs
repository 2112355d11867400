use crate::config::Settings;
use crate::errors::{ArchiveError, Result};
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

const USER_AGENT: &str = concat!("zendesk-archiver/", env!("CARGO_PKG_VERSION"));

pub struct ZendeskClient {
    client: Client,
    base_url: String,
    username: String,
    api_token: String,
}

#[derive(Debug, Deserialize)]
struct UserEnvelope {
    user: UserRecord,
}

#[derive(Debug, Deserialize)]
struct UserRecord {
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    results: Vec<Value>,
}

impl ZendeskClient {
    /// `base_url` is the API root, e.g. `https://acme.zendesk.com/api/v2`.
    pub fn new(base_url: String, email: &str, api_token: String) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ArchiveError::Network(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            username: format!("{}/token", email),
            api_token,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        Self::new(
            settings.api_base_url(),
            &settings.email,
            settings.api_token.clone(),
        )
    }

    /// Search query for closed tickets last updated before the cutoff date.
    pub fn search_query(cutoff: DateTime<Utc>) -> String {
        format!(
            "type:ticket status:closed updated<{}",
            cutoff.format("%Y-%m-%d")
        )
    }

    /// Returns the raw records of the first result page, oldest first.
    pub async fn search_closed_tickets_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Value>> {
        let url = format!("{}/search.json", self.base_url);
        let query = Self::search_query(cutoff);
        tracing::debug!(%query, "Searching tickets");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .query(&[
                ("query", query.as_str()),
                ("sort_by", "updated_at"),
                ("sort_order", "asc"),
            ])
            .send()
            .await?;

        let page = ensure_success(response)
            .await?
            .json::<SearchPage>()
            .await?;

        Ok(page.results)
    }

    /// Email of the given user. A user without an email yields an empty string.
    pub async fn get_user_email(&self, user_id: u64) -> Result<String> {
        let url = format!("{}/users/{}", self.base_url, user_id);
        tracing::debug!(user_id, "Fetching requester");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?;

        let envelope = ensure_success(response)
            .await?
            .json::<UserEnvelope>()
            .await?;

        Ok(envelope.user.email.unwrap_or_default())
    }

    /// Raw comments response, inline images included as attachments.
    pub async fn get_ticket_comments(&self, ticket_id: u64) -> Result<Value> {
        let url = format!("{}/tickets/{}/comments", self.base_url, ticket_id);
        tracing::debug!(ticket_id, "Fetching comments");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .query(&[("include_inline_images", "true")])
            .send()
            .await?;

        let comments = ensure_success(response).await?.json::<Value>().await?;
        Ok(comments)
    }

    pub async fn download_attachment(&self, url: &str) -> Result<Vec<u8>> {
        tracing::debug!(url, "Downloading attachment");

        let response = self
            .client
            .get(url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?;

        let bytes = ensure_success(response).await?.bytes().await?;
        Ok(bytes.to_vec())
    }

    /// Deletes the ticket remotely. Only `204 No Content` counts as success.
    pub async fn delete_ticket(&self, ticket_id: u64) -> Result<()> {
        let url = format!("{}/tickets/{}", self.base_url, ticket_id);

        let response = self
            .client
            .delete(&url)
            .basic_auth(&self.username, Some(&self.api_token))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::NO_CONTENT {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(ticket_id, status = status.as_u16(), %body, "Ticket deletion refused");
            return Err(ArchiveError::DeleteFailed {
                ticket_id,
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(ticket_id, "Ticket deleted from Zendesk");
        Ok(())
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = response.url().to_string();
    let body = response.text().await.unwrap_or_default();
    Err(ArchiveError::ApiStatus {
        status: status.as_u16(),
        url,
        body,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::errors::ErrorKind;
    use chrono::TimeZone;
    use mockito::Matcher;

    /// `agent@example.com/token:secret-token`, base64 encoded.
    pub(crate) const AUTH_HEADER: &str = "Basic YWdlbnRAZXhhbXBsZS5jb20vdG9rZW46c2VjcmV0LXRva2Vu";

    pub(crate) fn test_client(server: &mockito::ServerGuard) -> ZendeskClient {
        ZendeskClient::new(
            server.url(),
            "agent@example.com",
            "secret-token".to_string(),
        )
        .unwrap()
    }

    #[test]
    fn test_search_query() {
        let cutoff = Utc.with_ymd_and_hms(2021, 1, 1, 8, 30, 0).unwrap();
        assert_eq!(
            ZendeskClient::search_query(cutoff),
            "type:ticket status:closed updated<2021-01-01"
        );
    }

    #[tokio::test]
    async fn test_search_sends_query_and_sort() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search.json")
            .match_header("authorization", AUTH_HEADER)
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded(
                    "query".into(),
                    "type:ticket status:closed updated<2021-01-01".into(),
                ),
                Matcher::UrlEncoded("sort_by".into(), "updated_at".into()),
                Matcher::UrlEncoded("sort_order".into(), "asc".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"results": [{"id": 1}, {"id": 2}], "count": 2}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let cutoff = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
        let results = client.search_closed_tickets_older_than(cutoff).await.unwrap();

        mock.assert_async().await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1]["id"], 2);
    }

    #[tokio::test]
    async fn test_search_without_results_key() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search.json")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error": "nope"}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client
            .search_closed_tickets_older_than(Utc::now())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::PersistentApi);
    }

    #[tokio::test]
    async fn test_get_user_email() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/7")
            .match_header("authorization", AUTH_HEADER)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user": {"id": 7, "email": "customer@example.com"}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let email = client.get_user_email(7).await.unwrap();
        assert_eq!(email, "customer@example.com");
    }

    #[tokio::test]
    async fn test_get_user_without_email() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/8")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"user": {"id": 8, "email": null}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        assert_eq!(client.get_user_email(8).await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/9")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client.get_user_email(9).await.unwrap_err();

        match &err {
            ArchiveError::ApiStatus { status, body, .. } => {
                assert_eq!(*status, 500);
                assert_eq!(body, "boom");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::TransientNetwork);
    }

    #[tokio::test]
    async fn test_get_ticket_comments_includes_inline_images() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/tickets/42/comments")
            .match_header("authorization", AUTH_HEADER)
            .match_query(Matcher::UrlEncoded(
                "include_inline_images".into(),
                "true".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"comments": [{"id": 1, "attachments": []}]}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let comments = client.get_ticket_comments(42).await.unwrap();

        mock.assert_async().await;
        assert_eq!(comments["comments"][0]["id"], 1);
    }

    #[tokio::test]
    async fn test_download_attachment() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/attachments/report.pdf")
            .match_header("authorization", AUTH_HEADER)
            .with_status(200)
            .with_body(b"%PDF-1.4 fake")
            .create_async()
            .await;

        let client = test_client(&server);
        let url = format!("{}/attachments/report.pdf", server.url());
        let bytes = client.download_attachment(&url).await.unwrap();
        assert_eq!(bytes, b"%PDF-1.4 fake");
    }

    #[tokio::test]
    async fn test_delete_ticket_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("DELETE", "/tickets/42")
            .match_header("authorization", AUTH_HEADER)
            .with_status(204)
            .create_async()
            .await;

        let client = test_client(&server);
        client.delete_ticket(42).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_delete_ticket_requires_no_content() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("DELETE", "/tickets/42")
            .with_status(200)
            .with_body(r#"{"ticket": {"id": 42}}"#)
            .create_async()
            .await;

        let client = test_client(&server);
        let err = client.delete_ticket(42).await.unwrap_err();

        match err {
            ArchiveError::DeleteFailed {
                ticket_id,
                status,
                body,
            } => {
                assert_eq!(ticket_id, 42);
                assert_eq!(status, 200);
                assert!(body.contains("ticket"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
