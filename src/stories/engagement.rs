//! Optimistic reaction and comment changes.
//!
//! Every handler computes the next state up front and returns it together
//! with the pending write. Callers show [`Optimistic::state`] right away and
//! later take the settled state from [`Optimistic::commit`]: either the same
//! records with temporary ids replaced by server ids, or the original state
//! when the write failed. A failed write also sends an [`Event::Notice`].

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::types::{decode, encode, Comment, Reaction};
use crate::cache::DedupCache;
use crate::config::ListsConfig;
use crate::event::{emit, Event, EventSender};
use crate::list::{DataProvider, ListError, ListResult};

/// Temporary ids count down from -1 so they never collide with server ids.
static NEXT_TEMP_ID: AtomicI64 = AtomicI64::new(-1);

fn temp_id() -> i64 {
  NEXT_TEMP_ID.fetch_sub(1, Ordering::Relaxed)
}

/// Settled result of an optimistic change.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOutcome<S> {
  Committed(S),
  /// The write failed; `state` is the state from before the change
  Reverted { state: S, error: ListError },
}

impl<S> MutationOutcome<S> {
  pub fn state(&self) -> &S {
    match self {
      MutationOutcome::Committed(state) => state,
      MutationOutcome::Reverted { state, .. } => state,
    }
  }

  pub fn into_state(self) -> S {
    match self {
      MutationOutcome::Committed(state) => state,
      MutationOutcome::Reverted { state, .. } => state,
    }
  }

  pub fn is_committed(&self) -> bool {
    matches!(self, MutationOutcome::Committed(_))
  }
}

/// An applied but not yet confirmed change.
#[must_use = "the write only happens when the change is committed"]
pub struct Optimistic<S> {
  state: S,
  previous: S,
  write: BoxFuture<'static, ListResult<S>>,
  failure_notice: &'static str,
  events: Option<EventSender>,
}

impl<S: Send + 'static> Optimistic<S> {
  /// State to display while the write is pending.
  pub fn state(&self) -> &S {
    &self.state
  }

  /// Run the write and settle the state.
  pub async fn commit(self) -> MutationOutcome<S> {
    match self.write.await {
      Ok(state) => MutationOutcome::Committed(state),
      Err(error) => {
        warn!(%error, "{}, reverting", self.failure_notice);
        emit(
          self.events.as_ref(),
          Event::Notice(format!("{}: {}", self.failure_notice, error)),
        );
        MutationOutcome::Reverted {
          state: self.previous,
          error,
        }
      }
    }
  }
}

trait Record: Clone {
  fn id(&self) -> i64;
}

impl Record for Reaction {
  fn id(&self) -> i64 {
    self.id
  }
}

impl Record for Comment {
  fn id(&self) -> i64 {
    self.id
  }
}

/// Swap the record holding `temp_id` for its saved version.
fn reconcile<T: Record>(state: Vec<T>, temp_id: i64, saved: T) -> Vec<T> {
  state
    .into_iter()
    .map(|record| {
      if record.id() == temp_id {
        saved.clone()
      } else {
        record
      }
    })
    .collect()
}

fn without<T: Record>(current: &[T], id: i64) -> Vec<T> {
  current.iter().filter(|r| r.id() != id).cloned().collect()
}

/// Optimistic handlers for reactions and comments.
#[derive(Clone)]
pub struct Engagement {
  provider: Arc<dyn DataProvider>,
  dedup: DedupCache,
  reactions: String,
  comments: String,
  events: Option<EventSender>,
}

impl Engagement {
  /// `dedup` is the read tier whose reaction and comment reads are dropped after each write.
  pub fn new(
    provider: Arc<dyn DataProvider>,
    dedup: DedupCache,
    lists: &ListsConfig,
    events: Option<EventSender>,
  ) -> Self {
    Self {
      provider,
      dedup,
      reactions: lists.reactions.clone(),
      comments: lists.comments.clone(),
      events,
    }
  }

  fn optimistic<S>(
    &self,
    state: S,
    previous: S,
    failure_notice: &'static str,
    write: impl std::future::Future<Output = ListResult<S>> + Send + 'static,
  ) -> Optimistic<S> {
    Optimistic {
      state,
      previous,
      write: write.boxed(),
      failure_notice,
      events: self.events.clone(),
    }
  }

  fn written(&self, list: &str) {
    let dropped = self.dedup.invalidate_prefix(&format!("{}?", list));
    debug!(list, dropped, "Dropped cached reads after write");
  }

  /// React to a story, replacing the user's earlier reaction to it.
  pub fn add_reaction(
    &self,
    current: &[Reaction],
    story_id: i64,
    user_id: i64,
    reaction: &str,
  ) -> Optimistic<Vec<Reaction>> {
    let mine = |r: &&Reaction| r.story_id == story_id && r.user_id == user_id;
    let replaced = current.iter().find(mine).cloned();

    let pending = Reaction {
      id: temp_id(),
      story_id,
      user_id,
      reaction: reaction.to_string(),
      created: Some(Utc::now()),
    };
    let mut state: Vec<Reaction> = current.iter().filter(|r| !mine(r)).cloned().collect();
    state.push(pending.clone());

    let this = self.clone();
    let next = state.clone();
    let write = async move {
      let result = async {
        if let Some(old) = replaced.filter(|r| r.id > 0) {
          this
            .provider
            .delete_list_item(&this.reactions, old.id, None)
            .await?;
        }
        let body = encode(&json!({
          "StoryId": pending.story_id,
          "UserId": pending.user_id,
          "Reaction": pending.reaction,
        }))?;
        decode::<Reaction>(this.provider.post_list_item(&this.reactions, body, None).await?)
      }
      .await;
      this.written(&this.reactions);
      result.map(|saved| reconcile(next, pending.id, saved))
    };

    self.optimistic(state, current.to_vec(), "Couldn't save reaction", write)
  }

  pub fn remove_reaction(&self, current: &[Reaction], reaction_id: i64) -> Optimistic<Vec<Reaction>> {
    let state = without(current, reaction_id);
    let this = self.clone();
    let next = state.clone();
    let write = async move {
      // Temporary records were never saved
      if reaction_id < 0 {
        return Ok(next);
      }
      let result = this
        .provider
        .delete_list_item(&this.reactions, reaction_id, None)
        .await;
      this.written(&this.reactions);
      result.map(|_| next)
    };

    self.optimistic(state, current.to_vec(), "Couldn't remove reaction", write)
  }

  pub fn add_comment(
    &self,
    current: &[Comment],
    story_id: i64,
    author_id: i64,
    body: &str,
  ) -> Optimistic<Vec<Comment>> {
    let pending = Comment {
      id: temp_id(),
      story_id,
      author_id,
      body: body.to_string(),
      created: Some(Utc::now()),
    };
    let mut state = current.to_vec();
    state.push(pending.clone());

    let this = self.clone();
    let next = state.clone();
    let write = async move {
      let result = async {
        let body = encode(&json!({
          "StoryId": pending.story_id,
          "AuthorId": pending.author_id,
          "Body": pending.body,
        }))?;
        decode::<Comment>(this.provider.post_list_item(&this.comments, body, None).await?)
      }
      .await;
      this.written(&this.comments);
      result.map(|saved| reconcile(next, pending.id, saved))
    };

    self.optimistic(state, current.to_vec(), "Couldn't add comment", write)
  }

  pub fn remove_comment(&self, current: &[Comment], comment_id: i64) -> Optimistic<Vec<Comment>> {
    let state = without(current, comment_id);
    let this = self.clone();
    let next = state.clone();
    let write = async move {
      if comment_id < 0 {
        return Ok(next);
      }
      let result = this
        .provider
        .delete_list_item(&this.comments, comment_id, None)
        .await;
      this.written(&this.comments);
      result.map(|_| next)
    };

    self.optimistic(state, current.to_vec(), "Couldn't remove comment", write)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::event::EventHandler;
  use crate::list::{fixtures, ListQuery, ListRequest, MockLatency, MockProvider};
  use crate::stories::types::decode_all;
  use std::time::Duration;

  fn mock() -> Arc<MockProvider> {
    Arc::new(MockProvider::new(&ListsConfig::default()).with_latency(MockLatency::none()))
  }

  fn engagement(provider: Arc<MockProvider>, events: Option<EventSender>) -> Engagement {
    Engagement::new(provider, DedupCache::new(), &ListsConfig::default(), events)
  }

  fn story_reactions(story_id: i64) -> Vec<Reaction> {
    decode_all::<Reaction>(fixtures::reactions())
      .unwrap()
      .into_iter()
      .filter(|r| r.story_id == story_id)
      .collect()
  }

  async fn saved(provider: &MockProvider, list: &str, filter: &str) -> Vec<serde_json::Value> {
    provider
      .get_list_items(&ListRequest::new(list).with_query(ListQuery::new().filter(filter)))
      .await
      .unwrap()
      .into_iter()
      .map(serde_json::Value::Object)
      .collect()
  }

  #[tokio::test]
  async fn test_add_reaction_replaces_previous_one() {
    let provider = mock();
    let handlers = engagement(provider.clone(), None);
    let current = story_reactions(1);

    let change = handlers.add_reaction(&current, 1, 2, "love");
    let mine: Vec<_> = change.state().iter().filter(|r| r.user_id == 2).collect();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].reaction, "love");
    assert!(mine[0].id < 0);
    assert_eq!(change.state().len(), current.len());

    let outcome = change.commit().await;
    assert!(outcome.is_committed());
    let mine: Vec<_> = outcome.state().iter().filter(|r| r.user_id == 2).collect();
    assert_eq!(mine.len(), 1);
    assert!(mine[0].id >= 1000);

    let stored = saved(&provider, "StoryReactions", "StoryId eq 1 and UserId eq 2").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["Reaction"], "love");
  }

  #[tokio::test]
  async fn test_first_reaction_is_added() {
    let provider = mock();
    let handlers = engagement(provider.clone(), None);

    let outcome = handlers.add_reaction(&[], 3, 1, "like").commit().await;
    let state = outcome.into_state();
    assert_eq!(state.len(), 1);
    assert_eq!(state[0].story_id, 3);
    assert!(state[0].id > 0);
  }

  #[tokio::test]
  async fn test_failed_write_reverts_and_notifies() {
    let provider = Arc::new(MockProvider::empty(MockLatency::none()));
    let mut events = EventHandler::new();
    let handlers = engagement(provider, Some(events.sender()));

    let change = handlers.add_comment(&[], 1, 1, "First!");
    assert_eq!(change.state().len(), 1);

    match change.commit().await {
      MutationOutcome::Reverted { state, error } => {
        assert!(state.is_empty());
        assert!(!error.message.is_empty());
      }
      other => panic!("expected revert, got {:?}", other),
    }

    match events.next().await {
      Some(Event::Notice(message)) => assert!(message.starts_with("Couldn't add comment")),
      other => panic!("unexpected event {:?}", other),
    }
  }

  #[tokio::test]
  async fn test_failed_reaction_restores_previous_reaction() {
    let provider = Arc::new(MockProvider::empty(MockLatency::none()));
    let handlers = engagement(provider, None);
    let current = story_reactions(1);

    let outcome = handlers.add_reaction(&current, 1, 2, "love").commit().await;
    assert!(!outcome.is_committed());
    assert_eq!(outcome.state(), &current);
  }

  #[tokio::test]
  async fn test_comment_round_trip() {
    let provider = mock();
    let handlers = engagement(provider.clone(), None);
    let current: Vec<Comment> = decode_all(fixtures::comments()).unwrap();

    let added = handlers
      .add_comment(&current, 1, 3, "Nice work")
      .commit()
      .await
      .into_state();
    assert_eq!(added.len(), 3);
    let new_id = added[2].id;
    assert!(new_id > 0);
    assert_eq!(added[2].body, "Nice work");

    let removed = handlers.remove_comment(&added, 1).commit().await;
    assert!(removed.is_committed());
    assert_eq!(removed.state().len(), 2);

    let stored = saved(&provider, "StoryComments", "StoryId eq 1").await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0]["Id"], new_id);
  }

  #[tokio::test]
  async fn test_removing_unsaved_record_skips_the_write() {
    let provider = Arc::new(MockProvider::empty(MockLatency::none()));
    let handlers = engagement(provider, None);
    let pending = Reaction {
      id: -42,
      story_id: 1,
      user_id: 1,
      reaction: "like".to_string(),
      created: None,
    };

    let outcome = handlers.remove_reaction(&[pending], -42).commit().await;
    assert_eq!(outcome, MutationOutcome::Committed(Vec::new()));
  }

  #[tokio::test]
  async fn test_remove_missing_reaction_reverts() {
    let provider = mock();
    let handlers = engagement(provider, None);
    let ghost = Reaction {
      id: 77,
      story_id: 1,
      user_id: 1,
      reaction: "like".to_string(),
      created: None,
    };

    let outcome = handlers.remove_reaction(&[ghost.clone()], 77).commit().await;
    assert_eq!(outcome.state(), &vec![ghost]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_state_is_available_before_the_write_settles() {
    let provider = Arc::new(
      MockProvider::new(&ListsConfig::default()).with_latency(MockLatency::fixed(Duration::from_secs(2))),
    );
    let handlers = engagement(provider, None);

    let change = handlers.add_comment(&[], 4, 2, "Draft looks good");
    assert_eq!(change.state()[0].body, "Draft looks good");

    let commit = tokio::spawn(change.commit());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!commit.is_finished());

    let outcome = commit.await.unwrap();
    assert!(outcome.is_committed());
  }

  #[test]
  fn test_temporary_ids_are_unique_and_negative() {
    let a = temp_id();
    let b = temp_id();
    assert!(a < 0 && b < 0);
    assert_ne!(a, b);
  }
}
