use tokio::sync::mpsc;

use crate::stories::Story;

/// Application events
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// Stories created since the last poll
  NewStories(Vec<Story>),
  /// Fresh story feed data is available (fetched, served fresh, or refreshed in the background)
  StoriesUpdated(Vec<Story>),
  /// Short user-facing message, e.g. a reverted optimistic change
  Notice(String),
  /// A background operation failed
  Error(String),
}

pub type EventSender = mpsc::UnboundedSender<Event>;

/// Channel collecting events from background tasks for the foreground loop
pub struct EventHandler {
  tx: EventSender,
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new() -> Self {
    let (tx, rx) = mpsc::unbounded_channel();
    Self { tx, rx }
  }

  /// Sender handed to background producers
  pub fn sender(&self) -> EventSender {
    self.tx.clone()
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }

  /// Next event if one is already queued
  pub fn try_next(&mut self) -> Option<Event> {
    self.rx.try_recv().ok()
  }
}

impl Default for EventHandler {
  fn default() -> Self {
    Self::new()
  }
}

/// Send `event` if there is a receiver. A closed channel is not an error for producers.
pub fn emit(sender: Option<&EventSender>, event: Event) {
  if let Some(sender) = sender {
    let _ = sender.send(event);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_events_arrive_in_order() {
    let mut events = EventHandler::new();
    let tx = events.sender();
    emit(Some(&tx), Event::Notice("one".to_string()));
    emit(Some(&tx), Event::Error("two".to_string()));

    assert_eq!(events.next().await, Some(Event::Notice("one".to_string())));
    assert_eq!(events.try_next(), Some(Event::Error("two".to_string())));
    assert_eq!(events.try_next(), None);
  }

  #[test]
  fn test_emit_without_receiver_is_silent() {
    let events = EventHandler::new();
    let tx = events.sender();
    drop(events);
    emit(Some(&tx), Event::Notice("dropped".to_string()));
    emit(None, Event::Notice("nowhere".to_string()));
  }
}
