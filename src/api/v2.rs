use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use reqwest::{Method, StatusCode};

use super::error::ApiError;
use super::http::HttpClient;
use super::json::{
    ChangeFeed, CreateFeedResponse, FeedEnvelope, ItemState, ItemsUpload, Status, SyncResponse,
};
use super::{Api, ApiLevel, Credentials, HttpConfig};
use crate::preferences::{Preference, PreferenceStore};
use crate::storage::{
    Database, Feed, Folder, Item, SyncSnapshot, SyncSummary, UploadedState, User,
};
use crate::sync::{SyncRequest, SyncType};

/// Nextcloud News API v2.
///
/// Synchronization is ETag based: without a cached ETag the client asks
/// for everything (`GET sync`); with one it uploads the local state of
/// every dirty item and asks for what changed since (`POST sync` with
/// `If-None-Match`).
pub struct ApiV2 {
    http: HttpClient,
    db: Database,
    prefs: Arc<PreferenceStore>,
}

impl ApiV2 {
    pub fn new(
        credentials: Credentials,
        http: &HttpConfig,
        db: Database,
        prefs: Arc<PreferenceStore>,
    ) -> Result<Self, ApiError> {
        let base = ApiLevel::V2.base_url(&credentials.root_url)?;
        Ok(Self {
            http: HttpClient::new(base, credentials, http)?,
            db,
            prefs,
        })
    }

    /// Send the sync request. Also returns the item states uploaded with it,
    /// `None` for a plain fetch.
    async fn fetch_sync(
        &self,
        etag: Option<String>,
    ) -> Result<(reqwest::Response, Option<Vec<UploadedState>>), ApiError> {
        match etag {
            None => {
                tracing::debug!(base = %self.http.base(), "Full sync, no cached ETag");
                let response = self
                    .http
                    .execute(self.http.request(Method::GET, "sync")?)
                    .await?;
                Ok((response, None))
            }
            Some(etag) => {
                let dirty = self
                    .db
                    .get_changed_items()
                    .await
                    .map_err(ApiError::database)?;
                tracing::debug!(
                    base = %self.http.base(),
                    dirty_items = dirty.len(),
                    "Incremental sync"
                );

                let body = ItemsUpload {
                    items: dirty.iter().map(ItemState::from).collect(),
                };
                let request = self
                    .http
                    .request(Method::POST, "sync")?
                    .header(IF_NONE_MATCH, etag)
                    .json(&body);
                let response = self.http.execute(request).await?;
                Ok((response, Some(dirty.iter().map(UploadedState::from).collect())))
            }
        }
    }
}

#[async_trait]
impl Api for ApiV2 {
    fn level(&self) -> ApiLevel {
        ApiLevel::V2
    }

    async fn metadata(&self) -> Result<Status, ApiError> {
        let response = self
            .http
            .execute(self.http.request(Method::GET, "./")?)
            .await?;
        self.http.read_json(response).await
    }

    async fn user(&self) -> Result<User, ApiError> {
        let status = self.metadata().await?;
        let user = User::from(
            status
                .user
                .ok_or_else(|| ApiError::Parse("Metadata response has no user".to_string()))?,
        );
        self.db.upsert_user(&user).await.map_err(ApiError::database)?;
        Ok(user)
    }

    async fn sync(&self, request: SyncRequest) -> Result<SyncSummary, ApiError> {
        if request.initial {
            self.prefs.remove(Preference::Etag).await?;
        }

        if request.sync_type == SyncType::LoadMore {
            return Err(ApiError::Unsupported("load more is not available in API v2"));
        }

        let (response, uploaded) = self
            .fetch_sync(self.prefs.string(Preference::Etag))
            .await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            tracing::info!("Server reports no changes since last sync");
            return Ok(SyncSummary::default());
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let body: SyncResponse = self.http.read_json(response).await?;

        let snapshot = SyncSnapshot {
            etag,
            folders: body.folders.into_iter().map(Folder::from).collect(),
            feeds: body.feeds.into_iter().map(Feed::from).collect(),
            items: body.items.into_iter().map(Item::from).collect(),
            uploaded,
        };

        let summary = self
            .db
            .apply_sync(Preference::Etag.key(), &snapshot)
            .await
            .map_err(ApiError::database)?;
        self.prefs
            .cache_value(Preference::Etag, snapshot.etag.as_deref());

        if summary.skipped_items > 0 {
            tracing::warn!(
                skipped = summary.skipped_items,
                "Items referencing unknown feeds were skipped"
            );
        }

        Ok(summary)
    }

    async fn create_feed(&self, url: &str, folder_id: i64) -> Result<Feed, ApiError> {
        let request = self
            .http
            .request(Method::POST, "feeds")?
            .json(&ChangeFeed { url, folder_id });
        let response = self.http.execute(request).await?;
        let created: CreateFeedResponse = self.http.read_json(response).await?;

        let mut feed = Feed::from(
            created
                .into_first()
                .ok_or_else(|| ApiError::Parse("Server returned no feed".to_string()))?,
        );
        // Items of the new feed arrive with the next sync
        feed.unread_count = 0;

        self.db.insert_feed(&feed).await.map_err(ApiError::database)?;
        tracing::info!(feed_id = feed.id, url = %feed.url, "Feed created");
        Ok(feed)
    }

    async fn move_feed(&self, feed: &Feed, folder_id: i64) -> Result<Feed, ApiError> {
        let path = format!("feeds/{}", feed.id);
        let request = self.http.request(Method::PATCH, &path)?.json(&ChangeFeed {
            url: &feed.url,
            folder_id,
        });
        let response = self.http.execute(request).await?;
        let envelope: FeedEnvelope = self.http.read_json(response).await?;

        let mut moved = Feed::from(envelope.feed);
        // The server does not count unread items; keep the local count
        moved.unread_count = feed.unread_count;

        self.db.insert_feed(&moved).await.map_err(ApiError::database)?;
        tracing::info!(
            feed_id = moved.id,
            from = feed.folder_id,
            to = moved.folder_id,
            "Feed moved"
        );
        Ok(moved)
    }

    async fn delete_feed(&self, feed: &Feed) -> Result<(), ApiError> {
        let path = format!("feeds/{}", feed.id);
        self.http
            .execute(self.http.request(Method::DELETE, &path)?)
            .await?;

        let existed = self.db.delete_feed(feed.id).await.map_err(ApiError::database)?;
        if !existed {
            tracing::debug!(feed_id = feed.id, "Deleted feed was not stored locally");
        }
        tracing::info!(feed_id = feed.id, "Feed deleted");
        Ok(())
    }
}
