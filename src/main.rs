use std::sync::Arc;

use dotenvy::dotenv;
use serenity::{
    async_trait,
    client::{Client, Context, EventHandler},
    model::{channel::Message, gateway::Ready},
    prelude::GatewayIntents,
};
use songbird::SerenityInit;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use crate::commands::Command;
use crate::config::Config;
use crate::models::{ConfigKey, HttpKey, QueueStore, QueueStoreKey};

mod commands;
mod config;
mod models;
mod playback;
mod reaper;
mod voice;

struct Handler;

#[async_trait]
impl EventHandler for Handler {
    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        let Some(guild_id) = msg.guild_id else {
            return;
        };

        let prefix = {
            let data = ctx.data.read().await;
            data.get::<ConfigKey>()
                .expect("Config placed in at initialisation.")
                .command_prefix
                .clone()
        };

        match Command::parse(&msg.content, &prefix) {
            Some(Command::Play { url }) => {
                debug!("Play command from {} in guild {guild_id}", msg.author.name);
                commands::play(&ctx, &msg, guild_id, url.as_deref()).await;
            }
            Some(Command::Skip) => {
                debug!("Skip command from {} in guild {guild_id}", msg.author.name);
                commands::skip(&ctx, &msg, guild_id).await;
            }
            None => {}
        }
    }

    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(Handler)
        .register_songbird()
        .await?;

    {
        let mut data = client.data.write().await;
        data.insert::<QueueStoreKey>(QueueStore::new());
        data.insert::<HttpKey>(reqwest::Client::new());
        data.insert::<ConfigKey>(Arc::new(config));
    }

    tokio::spawn(async move {
        let _ = client
            .start()
            .await
            .map_err(|why| error!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c().await?;

    info!("Received Ctrl-C, shutting down.");

    Ok(())
}
