//! Story reads and writes over the active data provider.
//!
//! Reads go through the dedup tier, and the story feed additionally through the
//! persistent stale-while-revalidate cache. Writes go straight to the provider
//! and invalidate whatever they made outdated. Polling reads
//! ([`StoryApi::fetch_stories_since`]) bypass both tiers.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::engagement::Engagement;
use super::types::{decode, decode_all, encode, Comment, NewStory, Reaction, Story};
use crate::cache::{
  CacheError, CacheResult, CacheStorage, DedupCache, DedupOptions, FetchOptions, PersistentCache,
  QueryKey,
};
use crate::config::{CacheConfig, ListsConfig};
use crate::event::{emit, Event, EventSender};
use crate::list::cache::list_group;
use crate::list::odata::datetime_literal;
use crate::list::{
  cancellable, DataProvider, ListError, ListItem, ListQuery, ListRequest, ListResult, UploadFile,
  UploadedFile, User,
};

pub struct StoryApi<S: CacheStorage> {
  provider: Arc<dyn DataProvider>,
  dedup: DedupCache,
  cache: PersistentCache<S>,
  lists: ListsConfig,
  max_age: Duration,
  dedup_ttl: Duration,
  events: Option<EventSender>,
}

impl<S: CacheStorage + 'static> StoryApi<S> {
  /// `cache` must already be initialized with the site namespace.
  pub fn new(
    provider: Arc<dyn DataProvider>,
    cache: PersistentCache<S>,
    lists: ListsConfig,
    cache_config: &CacheConfig,
  ) -> Self {
    debug!(provider = provider.name(), "Story API ready");
    Self {
      provider,
      dedup: DedupCache::new(),
      cache,
      lists,
      max_age: cache_config.max_age(),
      dedup_ttl: cache_config.dedup_ttl(),
      events: None,
    }
  }

  /// Publish background refresh results and failures on `events`.
  pub fn with_events(mut self, events: EventSender) -> Self {
    self.events = Some(events);
    self
  }

  pub fn provider(&self) -> &Arc<dyn DataProvider> {
    &self.provider
  }

  pub fn cache(&self) -> &PersistentCache<S> {
    &self.cache
  }

  pub fn lists(&self) -> &ListsConfig {
    &self.lists
  }

  /// Optimistic reaction and comment handlers sharing this API's provider.
  pub fn engagement(&self) -> Engagement {
    Engagement::new(
      Arc::clone(&self.provider),
      self.dedup.clone(),
      &self.lists,
      self.events.clone(),
    )
  }

  /// The published feed, newest first.
  pub fn stories_request(&self) -> ListRequest {
    ListRequest::new(&self.lists.stories).with_query(
      ListQuery::new()
        .filter("Published eq 1")
        .order_by("Created", true),
    )
  }

  /// Deduplicated list read.
  ///
  /// Concurrent identical reads share one provider call. The request's token
  /// only ends this caller's wait; the shared call keeps running for the others.
  pub async fn read_items(&self, request: ListRequest) -> ListResult<Vec<ListItem>> {
    self.read_shared(request, self.dedup_ttl).await
  }

  async fn read_shared(&self, request: ListRequest, ttl: Duration) -> ListResult<Vec<ListItem>> {
    let ListRequest {
      list,
      query,
      cancel,
    } = request;
    let shared_request = ListRequest::new(list).with_query(query);
    let key = shared_request.fingerprint();
    let provider = Arc::clone(&self.provider);

    let shared = self.dedup.deduplicate(
      &key,
      move || async move { provider.get_list_items(&shared_request).await },
      DedupOptions::with_ttl(ttl),
    );
    cancellable(cancel.as_ref(), "getListItems", shared).await
  }

  /// Published stories through the persistent cache.
  ///
  /// A stale result is returned immediately while a refresh runs in the
  /// background; its outcome is published as an event when events are enabled.
  pub async fn get_stories(&self) -> Result<CacheResult<Vec<Story>>, CacheError> {
    self.cached_stories(false).await
  }

  /// Fetch the feed from the provider and overwrite the cached copy.
  ///
  /// Skips the dedup tier too, so a read shared moments ago is not reused.
  pub async fn refresh_stories(&self) -> Result<Vec<Story>, CacheError> {
    Ok(self.cached_stories(true).await?.data)
  }

  async fn cached_stories(&self, skip_cache: bool) -> Result<CacheResult<Vec<Story>>, CacheError> {
    let request = self.stories_request();
    let mut options = FetchOptions::new(request.cache_hash(), self.max_age)
      .group(list_group(&self.lists.stories))
      .skip_cache(skip_cache);

    if let Some(events) = &self.events {
      let updated = events.clone();
      let failed = events.clone();
      options = options
        .on_fresh(move |stories: &Vec<Story>| {
          emit(Some(&updated), Event::StoriesUpdated(stories.clone()))
        })
        .on_background_error(move |e: &CacheError| {
          emit(Some(&failed), Event::Error(format!("Refreshing stories failed: {}", e)))
        });
    }

    // A shared read may not outlive the persistent entry it refreshes.
    let ttl = self.dedup_ttl.min(self.max_age);
    let api = self.clone();
    self
      .cache
      .get_cached_or_fetch(options, move || async move {
        let items = if skip_cache {
          api.provider.get_list_items(&request).await?
        } else {
          api.read_shared(request, ttl).await?
        };
        decode_all(items)
      })
      .await
  }

  pub async fn get_story(&self, id: i64, cancel: Option<CancellationToken>) -> ListResult<Story> {
    let mut request = ListRequest::new(&self.lists.stories)
      .with_query(ListQuery::new().filter(format!("Id eq {}", id)).top(1));
    request.cancel = cancel;

    match self.read_items(request).await?.into_iter().next() {
      Some(item) => decode(item),
      None => Err(ListError::remote(format!("404: Story {} not found", id))),
    }
  }

  /// Published stories created after `since`, oldest first. Never cached.
  pub async fn fetch_stories_since(&self, since: DateTime<Utc>) -> ListResult<Vec<Story>> {
    let request = ListRequest::new(&self.lists.stories).with_query(
      ListQuery::new()
        .filter(format!(
          "Published eq 1 and Created gt {}",
          datetime_literal(since)
        ))
        .order_by("Created", false),
    );
    decode_all(self.provider.get_list_items(&request).await?)
  }

  pub async fn create_story(&self, story: &NewStory) -> ListResult<Story> {
    let created = self
      .provider
      .post_list_item(&self.lists.stories, encode(story)?, None)
      .await;
    self.invalidate_stories();
    decode(created?)
  }

  pub async fn update_story(&self, id: i64, changes: ListItem) -> ListResult<()> {
    let result = self
      .provider
      .update_list_item(&self.lists.stories, id, changes, None)
      .await;
    self.invalidate_stories();
    result
  }

  pub async fn delete_story(&self, id: i64) -> ListResult<()> {
    let result = self
      .provider
      .delete_list_item(&self.lists.stories, id, None)
      .await;
    self.invalidate_stories();
    result
  }

  /// Upload a cover image and point the story at it.
  pub async fn upload_cover(&self, story_id: i64, file: UploadFile) -> ListResult<UploadedFile> {
    let uploaded = self
      .provider
      .read_and_upload_file(
        &self.lists.stories,
        story_id,
        file,
        &self.lists.files_folder,
        None,
      )
      .await?;

    let mut changes = ListItem::new();
    changes.insert("CoverImageUrl".to_string(), uploaded.url.clone().into());
    self.update_story(story_id, changes).await?;
    Ok(uploaded)
  }

  pub async fn get_reactions(&self, story_id: i64) -> ListResult<Vec<Reaction>> {
    let request = ListRequest::new(&self.lists.reactions).with_query(
      ListQuery::new()
        .filter(format!("StoryId eq {}", story_id))
        .order_by("Created", false),
    );
    decode_all(self.read_items(request).await?)
  }

  pub async fn get_comments(&self, story_id: i64) -> ListResult<Vec<Comment>> {
    let request = ListRequest::new(&self.lists.comments).with_query(
      ListQuery::new()
        .filter(format!("StoryId eq {}", story_id))
        .order_by("Created", false),
    );
    decode_all(self.read_items(request).await?)
  }

  /// The signed-in user. Shared for the life of this API once it succeeds.
  pub async fn current_user(&self) -> ListResult<User> {
    let provider = Arc::clone(&self.provider);
    self
      .dedup
      .deduplicate(
        "currentUser",
        move || async move { provider.get_current_user(None).await },
        DedupOptions::default(),
      )
      .await
  }

  /// Drop cached feed reads after a write. Failures only cost a stale read.
  fn invalidate_stories(&self) {
    self
      .dedup
      .invalidate_prefix(&format!("{}?", self.lists.stories));
    if let Err(e) = self
      .cache
      .invalidate_by_group(&list_group(&self.lists.stories))
    {
      warn!(error = %e, "Failed to invalidate cached stories");
    }
  }
}

impl<S: CacheStorage> Clone for StoryApi<S> {
  fn clone(&self) -> Self {
    Self {
      provider: Arc::clone(&self.provider),
      dedup: self.dedup.clone(),
      cache: self.cache.clone(),
      lists: self.lists.clone(),
      max_age: self.max_age,
      dedup_ttl: self.dedup_ttl,
      events: self.events.clone(),
    }
  }
}
