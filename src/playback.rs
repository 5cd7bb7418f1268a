use serenity::async_trait;
use serenity::client::Context;
use serenity::model::id::GuildId;
use songbird::input::YoutubeDl;
use songbird::tracks::{TrackHandle, TrackState};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, TrackEvent};
use tracing::{debug, error, info, warn};

use crate::commands::check_msg;
use crate::models::{ConfigKey, HttpKey, QueueStoreKey};
use crate::reaper;

/// Re-entry point of the queue state machine. Pops the next song and starts
/// it, or arms the idle reaper when the queue is drained. Invoked after a
/// session is opened, after a song is queued into an idle session, and from
/// the track end/error notifiers.
pub async fn advance(ctx: &Context, guild_id: GuildId) {
    let manager = songbird::get(ctx)
        .await
        .expect("Songbird Voice client placed in at initialisation.")
        .clone();

    let Some(call_lock) = manager.get(guild_id) else {
        debug!("No voice connection for guild {guild_id}, nothing to advance");
        return;
    };

    let next = {
        let mut data = ctx.data.write().await;
        let Some(record) = data
            .get_mut::<QueueStoreKey>()
            .and_then(|store| store.get_mut(guild_id))
        else {
            return;
        };

        match record.pending.pop_front() {
            Some(song) => {
                record.cancel_idle_timer();
                Some((song, record.notify_channel_id))
            }
            None => {
                record.now_playing = None;
                record.track_handle = None;
                None
            }
        }
    };

    let Some((song, notify_channel_id)) = next else {
        reaper::arm(ctx, guild_id).await;
        return;
    };

    let http = {
        let data = ctx.data.read().await;
        data.get::<HttpKey>()
            .cloned()
            .expect("HTTP client placed in at initialisation.")
    };

    // The input is lazy; a dead link surfaces through the error notifier.
    let source = YoutubeDl::new(http, song.url.clone());
    let track_handle = {
        let mut call = call_lock.lock().await;
        call.play_only_input(source.into())
    };

    if let Err(why) = track_handle.add_event(
        Event::Track(TrackEvent::End),
        TrackEndNotifier {
            ctx: ctx.clone(),
            guild_id,
            title: song.title.clone(),
        },
    ) {
        error!("Failed to register end notifier for guild {guild_id}: {why:?}");
    }

    if let Err(why) = track_handle.add_event(
        Event::Track(TrackEvent::Error),
        TrackErrorNotifier {
            ctx: ctx.clone(),
            guild_id,
            title: song.title.clone(),
        },
    ) {
        error!("Failed to register error notifier for guild {guild_id}: {why:?}");
    }

    {
        let mut data = ctx.data.write().await;
        if let Some(record) = data
            .get_mut::<QueueStoreKey>()
            .and_then(|store| store.get_mut(guild_id))
        {
            record.now_playing = Some(song.clone());
            record.track_handle = Some(track_handle);
        }
    }

    info!("Now playing {} in guild {guild_id}", song.title);
    check_msg(
        notify_channel_id
            .say(&ctx.http, format!("Now playing: **{}**", song.title))
            .await,
    );
}

/// Removes the guild's record and leaves the voice channel, best-effort.
pub async fn teardown(ctx: &Context, guild_id: GuildId) {
    let removed = {
        let mut data = ctx.data.write().await;
        data.get_mut::<QueueStoreKey>()
            .and_then(|store| store.remove(guild_id))
    };

    if let Some(mut record) = removed {
        record.cancel_idle_timer();
        info!(
            "Dropped queue for guild {guild_id} (voice channel {})",
            record.voice_channel_id
        );
    }

    let manager = songbird::get(ctx)
        .await
        .expect("Songbird Voice client placed in at initialisation.")
        .clone();

    if manager.get(guild_id).is_some() {
        if let Err(why) = manager.remove(guild_id).await {
            info!("Failed to leave voice channel in guild {guild_id}: {why:?}");
        }
    }
}

/// True when the fired event belongs to the track the record considers
/// current. Guards against a track announcing itself twice, or an error and
/// an end event for the same track advancing the queue twice.
async fn fired_for_current_track(
    ctx: &Context,
    guild_id: GuildId,
    track_list: &[(&TrackState, &TrackHandle)],
) -> bool {
    let Some((_, fired_handle)) = track_list.first() else {
        return false;
    };
    let fired = fired_handle.uuid();

    let data = ctx.data.read().await;
    data.get::<QueueStoreKey>()
        .and_then(|store| store.get(guild_id))
        .and_then(|record| record.track_handle.as_ref())
        .map(|current| current.uuid() == fired)
        .unwrap_or(false)
}

pub struct TrackEndNotifier {
    pub ctx: Context,
    pub guild_id: GuildId,
    pub title: String,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, event: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = event {
            if !fired_for_current_track(&self.ctx, self.guild_id, track_list).await {
                debug!("Stale end event for {} in guild {}", self.title, self.guild_id);
                return None;
            }

            info!("Finished playing {} in guild {}", self.title, self.guild_id);

            {
                let mut data = self.ctx.data.write().await;
                if let Some(record) = data
                    .get_mut::<QueueStoreKey>()
                    .and_then(|store| store.get_mut(self.guild_id))
                {
                    record.register_success();
                    record.now_playing = None;
                    record.track_handle = None;
                }
            }

            advance(&self.ctx, self.guild_id).await;
        }

        None
    }
}

pub struct TrackErrorNotifier {
    pub ctx: Context,
    pub guild_id: GuildId,
    pub title: String,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorNotifier {
    async fn act(&self, event: &EventContext<'_>) -> Option<Event> {
        if let EventContext::Track(track_list) = event {
            if let Some((state, _)) = track_list.first() {
                error!(
                    "Error playing {} in guild {}: {:?}",
                    self.title, self.guild_id, state.playing
                );
            }

            if !fired_for_current_track(&self.ctx, self.guild_id, track_list).await {
                return None;
            }

            let cap = {
                let data = self.ctx.data.read().await;
                data.get::<ConfigKey>()
                    .expect("Config placed in at initialisation.")
                    .max_consecutive_failures
            };

            {
                let mut data = self.ctx.data.write().await;
                if let Some(record) = data
                    .get_mut::<QueueStoreKey>()
                    .and_then(|store| store.get_mut(self.guild_id))
                {
                    record.now_playing = None;
                    record.track_handle = None;

                    let dropped = record.register_failure(cap);
                    if dropped > 0 {
                        warn!(
                            "{} consecutive failures in guild {}, dropping {} queued songs",
                            record.consecutive_failures, self.guild_id, dropped
                        );
                    }
                }
            }

            advance(&self.ctx, self.guild_id).await;
        }

        None
    }
}
