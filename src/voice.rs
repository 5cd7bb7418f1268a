use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serenity::async_trait;
use serenity::client::Context;
use serenity::model::id::{ChannelId, GuildId};
use songbird::error::JoinError;
use songbird::{CoreEvent, Event, EventContext, EventHandler as VoiceEventHandler};
use tracing::{info, warn};

use crate::models::ConfigKey;
use crate::playback;

/// Joins the caller's voice channel, deafens the bot, and registers the
/// reconnection watchers on the fresh call.
pub async fn join_and_watch(
    ctx: &Context,
    guild_id: GuildId,
    voice_channel_id: ChannelId,
) -> Result<(), JoinError> {
    let manager = songbird::get(ctx)
        .await
        .expect("Songbird Voice client placed in at initialisation.")
        .clone();

    let call_lock = manager.join(guild_id, voice_channel_id).await?;

    let grace = {
        let data = ctx.data.read().await;
        data.get::<ConfigKey>()
            .expect("Config placed in at initialisation.")
            .reconnect_grace
    };

    let mut call = call_lock.lock().await;

    if let Err(why) = call.deafen(true).await {
        info!("Deafen failed for guild {guild_id}: {why:?}");
    }

    let reconnected = Arc::new(AtomicBool::new(false));

    call.add_global_event(
        Event::Core(CoreEvent::DriverDisconnect),
        DisconnectWatcher {
            ctx: ctx.clone(),
            guild_id,
            reconnected: reconnected.clone(),
            grace,
        },
    );

    call.add_global_event(
        Event::Core(CoreEvent::DriverReconnect),
        ReconnectWatcher {
            guild_id,
            reconnected,
        },
    );

    info!("Joined voice channel {voice_channel_id} in guild {guild_id}");

    Ok(())
}

/// Starts the bounded reconnection grace when the driver drops. If the
/// driver has not come back when the grace expires, the session is torn down.
pub struct DisconnectWatcher {
    pub ctx: Context,
    pub guild_id: GuildId,
    pub reconnected: Arc<AtomicBool>,
    pub grace: Duration,
}

#[async_trait]
impl VoiceEventHandler for DisconnectWatcher {
    async fn act(&self, event: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverDisconnect(_) = event {
            warn!(
                "Voice connection lost for guild {}, waiting {:?} for recovery",
                self.guild_id, self.grace
            );

            self.reconnected.store(false, Ordering::SeqCst);

            let ctx = self.ctx.clone();
            let guild_id = self.guild_id;
            let reconnected = self.reconnected.clone();
            let grace = self.grace;

            // The grace check runs in its own task so a reconnect event is
            // not blocked behind this handler.
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;

                if reconnected.load(Ordering::SeqCst) {
                    return;
                }

                warn!("Guild {guild_id} did not reconnect within {grace:?}, tearing down");
                playback::teardown(&ctx, guild_id).await;
            });
        }

        None
    }
}

pub struct ReconnectWatcher {
    pub guild_id: GuildId,
    pub reconnected: Arc<AtomicBool>,
}

#[async_trait]
impl VoiceEventHandler for ReconnectWatcher {
    async fn act(&self, event: &EventContext<'_>) -> Option<Event> {
        if let EventContext::DriverReconnect(_) = event {
            info!("Voice connection recovered for guild {}", self.guild_id);
            self.reconnected.store(true, Ordering::SeqCst);
        }

        None
    }
}
