//! HTTP implementation of [`ReadStatusApi`] against the collaboration
//! service's REST API.
//!
//! | Query                              | Request                                           |
//! |------------------------------------|---------------------------------------------------|
//! | `current_user`                     | `GET {api}/people/me`                             |
//! | `list_spaces_with_read_status`     | `GET {api}/rooms?readStatus=true[&max=N]`         |
//! | `get_space`                        | `GET {api}/rooms/{id}`                            |
//! | `get_space_with_read_status`       | `GET {api}/rooms/{id}?readStatus=true`            |
//! | `list_members_with_read_status`    | `GET {api}/memberships?roomId={id}&readStatus=true` |
//! | `update_last_seen`                 | `GET {api}/memberships?roomId={id}&personId={me}`, then `PUT {api}/memberships/{membershipId}` |
//!
//! List responses are wrapped as `{ "items": [...] }`. Path segments taken
//! from ids are percent-encoded.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::api::ReadStatusApi;
use crate::error::{ReadStatusError, Result};
use crate::model::{MemberSnapshot, Person, SpaceSnapshot, Timestamp};

#[derive(Debug, Clone)]
pub struct HttpApiConfig {
    /// Base URL of the REST API, without a trailing slash.
    pub base_url: String,
    pub access_token: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl HttpApiConfig {
    /// Defaults: 3 s connect timeout, 10 s request timeout.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// `{ "items": [...] }` list envelope.
#[derive(Deserialize)]
struct Items<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

/// Room as the service returns it. The plain room lookup reports
/// `lastActivity` while the read-status variants report `lastActivityDate`.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoomRecord {
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    last_activity_date: Option<Timestamp>,
    #[serde(default)]
    last_activity: Option<Timestamp>,
    #[serde(default)]
    last_seen_activity_date: Option<Timestamp>,
    #[serde(default)]
    created: Option<Timestamp>,
}

impl RoomRecord {
    fn into_snapshot(self) -> Result<SpaceSnapshot> {
        let last_activity = self
            .last_activity_date
            .or(self.last_activity)
            .or(self.created)
            .ok_or_else(|| ReadStatusError::fetch(format!("room {}", self.id), "no activity timestamp"))?;
        Ok(SpaceSnapshot {
            id: self.id,
            title: self.title,
            last_activity,
            last_seen_activity: self.last_seen_activity_date,
        })
    }
}

/// Only the id of a membership is needed to update it.
#[derive(Deserialize)]
struct MembershipRecord {
    id: String,
}

/// reqwest-backed client. Use [`HttpReadStatusApi::builder`] to construct.
pub struct HttpReadStatusApi {
    config: HttpApiConfig,
    base: Url,
    client: reqwest::Client,
    /// Person id of the token's owner, learned from `people/me`.
    me: OnceCell<String>,
}

impl HttpReadStatusApi {
    pub fn builder(base_url: impl Into<String>) -> HttpReadStatusApiBuilder {
        HttpReadStatusApiBuilder::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// The base URL with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| ReadStatusError::Config(format!("{} cannot be a base url", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Send `request` with the bearer token.
    ///
    /// 401 and 403 become [`ReadStatusError::Auth`]; every other failure is
    /// a [`ReadStatusError::Fetch`] naming `what`.
    async fn send(&self, what: &str, request: RequestBuilder) -> Result<Response> {
        let resp = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| ReadStatusError::fetch(what, e))?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ReadStatusError::Auth(format!("HTTP {} from {}", status.as_u16(), resp.url())));
        }
        if !status.is_success() {
            return Err(ReadStatusError::fetch(
                what,
                format!("HTTP {} from {}", status.as_u16(), resp.url()),
            ));
        }
        Ok(resp)
    }

    /// `GET` `url` with `query`, decoding the JSON body as `T`.
    async fn get_json<T: DeserializeOwned>(&self, what: &str, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!(url = %url, ?query, "GET");
        let resp = self.send(what, self.client.get(url).query(query)).await?;
        let bytes = resp.bytes().await.map_err(|e| ReadStatusError::fetch(what, e))?;
        serde_json::from_slice(&bytes).map_err(|e| ReadStatusError::fetch(what, e))
    }

    async fn room(&self, id: &str, read_status: bool) -> Result<SpaceSnapshot> {
        let query = if read_status {
            vec![("readStatus", "true".to_string())]
        } else {
            Vec::new()
        };
        let url = self.endpoint(&["rooms", id])?;
        let record: RoomRecord = self.get_json(&format!("room {id}"), url, &query).await?;
        record.into_snapshot()
    }

    async fn me_id(&self) -> Result<&str> {
        let id = self
            .me
            .get_or_try_init(|| async { self.current_user().await.map(|p| p.id) })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait]
impl ReadStatusApi for HttpReadStatusApi {
    async fn current_user(&self) -> Result<Person> {
        let url = self.endpoint(&["people", "me"])?;
        let person: Person = self
            .get_json("current user", url, &[])
            .await
            .map_err(|e| match e {
                ReadStatusError::Auth(_) => e,
                other => ReadStatusError::Auth(other.to_string()),
            })?;
        let _ = self.me.set(person.id.clone());
        Ok(person)
    }

    async fn list_spaces_with_read_status(&self, limit: Option<usize>) -> Result<Vec<SpaceSnapshot>> {
        let mut query = vec![("readStatus", "true".to_string())];
        if let Some(max) = limit {
            query.push(("max", max.to_string()));
        }
        let url = self.endpoint(&["rooms"])?;
        let list: Items<RoomRecord> = self.get_json("spaces", url, &query).await?;
        list.items.into_iter().map(RoomRecord::into_snapshot).collect()
    }

    async fn get_space(&self, id: &str) -> Result<SpaceSnapshot> {
        self.room(id, false).await
    }

    async fn get_space_with_read_status(&self, id: &str) -> Result<SpaceSnapshot> {
        self.room(id, true).await
    }

    async fn list_members_with_read_status(&self, space_id: &str) -> Result<Vec<MemberSnapshot>> {
        let query = [
            ("roomId", space_id.to_string()),
            ("readStatus", "true".to_string()),
        ];
        let url = self.endpoint(&["memberships"])?;
        let list: Items<MemberSnapshot> = self
            .get_json(&format!("members of {space_id}"), url, &query)
            .await?;
        Ok(list.items)
    }

    async fn update_last_seen(&self, space_id: &str, message_id: &str) -> Result<()> {
        let what = format!("membership in {space_id}");
        let query = [
            ("roomId", space_id.to_string()),
            ("personId", self.me_id().await?.to_string()),
        ];
        let list: Items<MembershipRecord> = self
            .get_json(&what, self.endpoint(&["memberships"])?, &query)
            .await?;
        let membership = list
            .items
            .into_iter()
            .next()
            .ok_or_else(|| ReadStatusError::fetch(what.as_str(), "not a member"))?;

        let url = self.endpoint(&["memberships", membership.id.as_str()])?;
        debug!(url = %url, message_id, "PUT last seen");
        let body = serde_json::json!({ "lastSeenId": message_id });
        self.send(&what, self.client.put(url).json(&body)).await?;
        Ok(())
    }
}

/// Builder for [`HttpReadStatusApi`].
pub struct HttpReadStatusApiBuilder {
    base_url: String,
    access_token: Option<String>,
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
}

impl HttpReadStatusApiBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: None,
            connect_timeout: None,
            request_timeout: None,
        }
    }

    /// Bearer token sent with every request. Required.
    pub fn access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// # Errors
    /// [`ReadStatusError::Config`] when no access token was given or the
    /// base URL is empty or not a usable URL.
    pub fn build(self) -> Result<HttpReadStatusApi> {
        let token = self
            .access_token
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ReadStatusError::Config("an access token is required".into()))?;
        if self.base_url.trim().is_empty() {
            return Err(ReadStatusError::Config("api url is empty".into()));
        }

        let mut config = HttpApiConfig::new(self.base_url, token);
        let base = Url::parse(&config.base_url)
            .map_err(|e| ReadStatusError::Config(format!("api url {}: {e}", config.base_url)))?;
        if base.cannot_be_a_base() {
            return Err(ReadStatusError::Config(format!("api url {} cannot be a base", config.base_url)));
        }
        if let Some(t) = self.connect_timeout {
            config.connect_timeout = t;
        }
        if let Some(t) = self.request_timeout {
            config.request_timeout = t;
        }

        // Falls back to a default client rather than panicking.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        Ok(HttpReadStatusApi {
            config,
            base,
            client,
            me: OnceCell::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_token() {
        let err = HttpReadStatusApi::builder("https://api.example.com").build().err();
        assert!(matches!(err, Some(ReadStatusError::Config(_))));
        let err = HttpReadStatusApi::builder("https://api.example.com")
            .access_token("  ")
            .build()
            .err();
        assert!(matches!(err, Some(ReadStatusError::Config(_))));
    }

    #[test]
    fn builder_trims_trailing_slash() {
        let api = HttpReadStatusApi::builder("https://api.example.com/v1/")
            .access_token("t")
            .request_timeout(Duration::from_secs(2))
            .build()
            .unwrap();
        assert_eq!(api.base_url(), "https://api.example.com/v1");
        assert_eq!(
            api.endpoint(&["people", "me"]).unwrap().as_str(),
            "https://api.example.com/v1/people/me"
        );
        assert_eq!(api.config.request_timeout, Duration::from_secs(2));
    }

    #[test]
    fn ids_are_encoded_as_single_segments() {
        let api = HttpReadStatusApi::builder("https://api.example.com/v1")
            .access_token("t")
            .build()
            .unwrap();
        let url = api.endpoint(&["rooms", "a/b?c#d"]).unwrap();
        assert_eq!(url.as_str(), "https://api.example.com/v1/rooms/a%2Fb%3Fc%23d");
        assert_eq!(url.query(), None);
        assert_eq!(url.path_segments().unwrap().count(), 3);
    }

    #[test]
    fn builder_rejects_unparseable_url() {
        let err = HttpReadStatusApi::builder("not a url").access_token("t").build().err();
        assert!(matches!(err, Some(ReadStatusError::Config(_))));
        let err = HttpReadStatusApi::builder("mailto:ops@example.com")
            .access_token("t")
            .build()
            .err();
        assert!(matches!(err, Some(ReadStatusError::Config(_))));
    }

    #[test]
    fn membership_list_yields_ids() {
        let json = r#"{"items":[{"id":"ms-1","roomId":"r1","personId":"me","isModerator":false}]}"#;
        let list: Items<MembershipRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(list.items[0].id, "ms-1");
    }

    #[test]
    fn room_list_envelope_decodes() {
        let json = r#"{"items":[
            {"id":"r1","title":"Design","lastActivityDate":"2024-01-02T03:04:05Z",
             "lastSeenActivityDate":"2024-01-02T03:04:05Z"},
            {"id":"r2","lastActivityDate":"2024-01-01T00:00:00Z"}
        ]}"#;
        let list: Items<RoomRecord> = serde_json::from_str(json).unwrap();
        let snaps: Vec<SpaceSnapshot> = list
            .items
            .into_iter()
            .map(RoomRecord::into_snapshot)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(snaps.len(), 2);
        assert!(snaps[0].last_seen_activity.is_some());
        assert_eq!(snaps[1].title, None);
    }

    #[test]
    fn plain_room_uses_last_activity() {
        let json = r#"{"id":"r1","title":"Design","lastActivity":"2024-01-02T03:04:05Z"}"#;
        let snap = serde_json::from_str::<RoomRecord>(json).unwrap().into_snapshot().unwrap();
        assert_eq!(snap.title.as_deref(), Some("Design"));
        assert_eq!(snap.last_seen_activity, None);
    }

    #[test]
    fn room_without_any_timestamp_is_fetch_error() {
        let record: RoomRecord = serde_json::from_str(r#"{"id":"r1"}"#).unwrap();
        assert!(matches!(record.into_snapshot(), Err(ReadStatusError::Fetch { .. })));
    }

    #[test]
    fn empty_envelope_is_empty_list() {
        let list: Items<MemberSnapshot> = serde_json::from_str("{}").unwrap();
        assert!(list.items.is_empty());
    }
}
