use std::time::Duration;

use serenity::client::Context;
use serenity::model::id::GuildId;
use tracing::{debug, info};

use crate::models::{ConfigKey, QueueStoreKey};
use crate::playback;

/// Schedules the idle disconnect for a guild, superseding any timer already
/// pending. A timer only ever fires against a record that is still idle.
pub async fn arm(ctx: &Context, guild_id: GuildId) {
    let idle_timeout = {
        let data = ctx.data.read().await;
        data.get::<ConfigKey>()
            .expect("Config placed in at initialisation.")
            .idle_timeout
    };

    let timer = tokio::spawn(reap_after(ctx.clone(), guild_id, idle_timeout));

    let mut data = ctx.data.write().await;
    match data
        .get_mut::<QueueStoreKey>()
        .and_then(|store| store.get_mut(guild_id))
    {
        Some(record) => {
            record.set_idle_timer(timer);
            debug!("Armed idle timer ({idle_timeout:?}) for guild {guild_id}");
        }
        None => timer.abort(),
    }
}

async fn reap_after(ctx: Context, guild_id: GuildId, idle_timeout: Duration) {
    tokio::time::sleep(idle_timeout).await;

    {
        let mut data = ctx.data.write().await;
        let Some(record) = data
            .get_mut::<QueueStoreKey>()
            .and_then(|store| store.get_mut(guild_id))
        else {
            return;
        };

        if !record.is_idle() {
            return;
        }

        // Detach our own handle so the teardown below cannot abort this task.
        let _ = record.idle_timer.take();
    }

    info!("Guild {guild_id} idle for {idle_timeout:?}, leaving voice channel");
    playback::teardown(&ctx, guild_id).await;
}
