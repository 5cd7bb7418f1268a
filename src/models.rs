use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serenity::model::id::{ChannelId, GuildId};
use serenity::prelude::TypeMapKey;
use songbird::tracks::TrackHandle;
use tokio::task::JoinHandle;

use crate::config::Config;

pub const UNKNOWN_TRACK_TITLE: &str = "Unknown track";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Song {
    pub title: String,
    pub url: String,
}

/// Per-guild playback state. Lives in the store for as long as the guild has
/// an active or recently-active voice session.
pub struct QueueRecord {
    pub voice_channel_id: ChannelId,
    pub notify_channel_id: ChannelId,
    pub pending: VecDeque<Song>,
    pub now_playing: Option<Song>,
    pub track_handle: Option<TrackHandle>,
    pub idle_timer: Option<JoinHandle<()>>,
    pub consecutive_failures: u32,
}

impl QueueRecord {
    pub fn new(voice_channel_id: ChannelId, notify_channel_id: ChannelId) -> Self {
        QueueRecord {
            voice_channel_id,
            notify_channel_id,
            pending: VecDeque::new(),
            now_playing: None,
            track_handle: None,
            idle_timer: None,
            consecutive_failures: 0,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.now_playing.is_none() && self.pending.is_empty()
    }

    /// At most one pending timer per guild: replacing aborts the old one.
    pub fn set_idle_timer(&mut self, timer: JoinHandle<()>) {
        if let Some(old) = self.idle_timer.replace(timer) {
            old.abort();
        }
    }

    pub fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    pub fn register_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Bumps the failure streak. When the cap is reached the rest of the
    /// queue is dropped; returns how many songs were dropped. A cap of zero
    /// never drains.
    pub fn register_failure(&mut self, cap: u32) -> usize {
        self.consecutive_failures += 1;

        if cap > 0 && self.consecutive_failures >= cap {
            let dropped = self.pending.len();
            self.pending.clear();
            dropped
        } else {
            0
        }
    }
}

pub struct QueueStore {
    records: HashMap<GuildId, QueueRecord>,
}

impl QueueStore {
    pub fn new() -> Self {
        QueueStore {
            records: HashMap::new(),
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<&QueueRecord> {
        self.records.get(&guild_id)
    }

    pub fn get_mut(&mut self, guild_id: GuildId) -> Option<&mut QueueRecord> {
        self.records.get_mut(&guild_id)
    }

    pub fn insert(&mut self, guild_id: GuildId, record: QueueRecord) {
        self.records.insert(guild_id, record);
    }

    pub fn remove(&mut self, guild_id: GuildId) -> Option<QueueRecord> {
        self.records.remove(&guild_id)
    }
}

pub struct QueueStoreKey;

impl TypeMapKey for QueueStoreKey {
    type Value = QueueStore;
}

pub struct HttpKey;

impl TypeMapKey for HttpKey {
    type Value = reqwest::Client;
}

pub struct ConfigKey;

impl TypeMapKey for ConfigKey {
    type Value = Arc<Config>;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;

    fn song(title: &str) -> Song {
        Song {
            title: title.to_string(),
            url: format!("https://youtu.be/{title}"),
        }
    }

    fn record() -> QueueRecord {
        QueueRecord::new(ChannelId::new(1), ChannelId::new(2))
    }

    #[test]
    fn queue_preserves_insertion_order() {
        let mut record = record();
        record.pending.push_back(song("a"));
        record.pending.push_back(song("b"));
        record.pending.push_back(song("c"));

        assert_eq!(record.pending.pop_front(), Some(song("a")));
        assert_eq!(record.pending.pop_front(), Some(song("b")));
        assert_eq!(record.pending.pop_front(), Some(song("c")));
        assert_eq!(record.pending.pop_front(), None);
    }

    #[test]
    fn one_record_per_guild() {
        let guild_id = GuildId::new(7);
        let mut store = QueueStore::new();

        store.insert(guild_id, record());
        let mut replacement = record();
        replacement.notify_channel_id = ChannelId::new(42);
        store.insert(guild_id, replacement);

        let current = store.get(guild_id).expect("record should exist");
        assert_eq!(current.notify_channel_id, ChannelId::new(42));
    }

    #[test]
    fn remove_forgets_the_guild() {
        let guild_id = GuildId::new(7);
        let mut store = QueueStore::new();
        store.insert(guild_id, record());

        assert!(store.remove(guild_id).is_some());
        assert!(store.get(guild_id).is_none());
        assert!(store.remove(guild_id).is_none());
    }

    #[test]
    fn idle_means_nothing_playing_and_nothing_pending() {
        let mut record = record();
        assert!(record.is_idle());

        record.pending.push_back(song("a"));
        assert!(!record.is_idle());

        record.now_playing = record.pending.pop_front();
        assert!(!record.is_idle());

        record.now_playing = None;
        assert!(record.is_idle());
    }

    #[test]
    fn failure_cap_drains_pending() {
        let mut record = record();
        record.pending.push_back(song("a"));
        record.pending.push_back(song("b"));

        assert_eq!(record.register_failure(3), 0);
        assert_eq!(record.register_failure(3), 0);
        assert_eq!(record.pending.len(), 2);

        assert_eq!(record.register_failure(3), 2);
        assert!(record.pending.is_empty());
    }

    #[test]
    fn failure_cap_zero_never_drains() {
        let mut record = record();
        record.pending.push_back(song("a"));

        for _ in 0..100 {
            assert_eq!(record.register_failure(0), 0);
        }
        assert_eq!(record.pending.len(), 1);
    }

    #[test]
    fn finishing_a_track_resets_the_streak() {
        let mut record = record();
        record.pending.push_back(song("a"));

        record.register_failure(3);
        record.register_failure(3);
        record.register_success();
        assert_eq!(record.consecutive_failures, 0);

        assert_eq!(record.register_failure(3), 0);
        assert_eq!(record.pending.len(), 1);
    }

    #[tokio::test]
    async fn rearming_aborts_the_previous_timer() {
        let fired = Arc::new(AtomicBool::new(false));
        let mut record = record();

        let flag = fired.clone();
        record.set_idle_timer(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        }));
        record.set_idle_timer(tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }));

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!fired.load(Ordering::SeqCst));

        record.cancel_idle_timer();
        assert!(record.idle_timer.is_none());
    }
}
