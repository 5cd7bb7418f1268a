use regex::Regex;
use serenity::client::Context;
use serenity::model::channel::Message;
use serenity::model::id::GuildId;
use serenity::Result as SerenityResult;
use songbird::error::JoinError;
use songbird::input::{AudioStreamError, Compose, YoutubeDl};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::models::{HttpKey, QueueRecord, QueueStoreKey, Song, UNKNOWN_TRACK_TITLE};
use crate::{playback, voice};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Play { url: Option<String> },
    Skip,
}

impl Command {
    /// Recognizes the command vocabulary by the leading token; anything else
    /// is plain chatter and returns `None`.
    pub fn parse(content: &str, prefix: &str) -> Option<Command> {
        let mut tokens = content.split_whitespace();
        let name = tokens.next()?.strip_prefix(prefix)?;

        match name {
            "play" => Some(Command::Play {
                url: tokens.next().map(str::to_owned),
            }),
            "skip" => Some(Command::Skip),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Please provide a valid YouTube link!")]
    InvalidUrl,
    #[error("You need to be in a voice channel to play music!")]
    NotInVoice,
    #[error("Couldn't look that video up, try another link.")]
    Metadata(#[from] AudioStreamError),
    #[error("Error connecting to the voice channel.")]
    Join(#[from] JoinError),
    #[error("There are no songs to skip!")]
    NothingToSkip,
}

pub fn is_video_url(url: &str) -> bool {
    let youtube_regex = Regex::new(
        r"^(https?://)?(www\.)?(youtube\.com/(watch\?v=|embed/|v/)|youtu\.be/|music\.youtube\.com/)",
    )
    .unwrap();

    youtube_regex.is_match(url)
}

enum Enqueue {
    NewSession,
    Queued { resume: bool },
}

pub async fn play(ctx: &Context, msg: &Message, guild_id: GuildId, url: Option<&str>) {
    if let Err(why) = try_play(ctx, msg, guild_id, url).await {
        debug!("Play command rejected in guild {guild_id}: {why:?}");
        check_msg(msg.reply(&ctx.http, why.to_string()).await);
    }
}

async fn try_play(
    ctx: &Context,
    msg: &Message,
    guild_id: GuildId,
    url: Option<&str>,
) -> Result<(), CommandError> {
    let url = url.filter(|u| is_video_url(u)).ok_or(CommandError::InvalidUrl)?;

    let voice_channel_id = ctx
        .cache
        .guild(guild_id)
        .and_then(|guild| guild.voice_states.get(&msg.author.id).cloned())
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(CommandError::NotInVoice)?;

    let http = {
        let data = ctx.data.read().await;
        data.get::<HttpKey>()
            .cloned()
            .expect("HTTP client placed in at initialisation.")
    };

    let mut source = YoutubeDl::new(http, url.to_string());
    let metadata = source.aux_metadata().await?;
    let song = Song {
        title: metadata
            .title
            .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        url: url.to_string(),
    };

    info!("Queueing {} ({}) for guild {guild_id}", song.title, song.url);

    let enqueue = {
        let mut data = ctx.data.write().await;
        let store = data
            .get_mut::<QueueStoreKey>()
            .expect("Queue store placed in at initialisation.");

        match store.get_mut(guild_id) {
            Some(record) => {
                let resume = record.is_idle();
                record.pending.push_back(song.clone());
                Enqueue::Queued { resume }
            }
            None => {
                let mut record = QueueRecord::new(voice_channel_id, msg.channel_id);
                record.pending.push_back(song.clone());
                store.insert(guild_id, record);
                Enqueue::NewSession
            }
        }
    };

    match enqueue {
        Enqueue::NewSession => {
            if let Err(why) = voice::join_and_watch(ctx, guild_id, voice_channel_id).await {
                let mut data = ctx.data.write().await;
                if let Some(store) = data.get_mut::<QueueStoreKey>() {
                    if let Some(mut record) = store.remove(guild_id) {
                        record.cancel_idle_timer();
                    }
                }

                return Err(CommandError::Join(why));
            }

            playback::advance(ctx, guild_id).await;
        }
        Enqueue::Queued { resume } => {
            check_msg(
                msg.reply(
                    &ctx.http,
                    format!("**{}** has been added to the queue!", song.title),
                )
                .await,
            );

            // A song queued while the idle timer ticks resumes the session.
            if resume {
                playback::advance(ctx, guild_id).await;
            }
        }
    }

    Ok(())
}

pub async fn skip(ctx: &Context, msg: &Message, guild_id: GuildId) {
    let skippable = {
        let data = ctx.data.read().await;

        match data.get::<QueueStoreKey>().and_then(|store| store.get(guild_id)) {
            None => Err(CommandError::NothingToSkip),
            Some(record) if record.pending.is_empty() => Err(CommandError::NothingToSkip),
            Some(record) => {
                let title = record
                    .now_playing
                    .as_ref()
                    .or_else(|| record.pending.front())
                    .map(|song| song.title.clone())
                    .unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string());

                Ok((title, record.track_handle.clone()))
            }
        }
    };

    match skippable {
        Err(why) => check_msg(msg.reply(&ctx.http, why.to_string()).await),
        Ok((title, track_handle)) => {
            info!("Skipping {title} in guild {guild_id}");
            check_msg(msg.reply(&ctx.http, format!("Skipping **{title}**")).await);

            // Stopping the current track fires the end notifier, which
            // advances the queue.
            if let Some(track_handle) = track_handle {
                if let Err(why) = track_handle.stop() {
                    error!("Failed to stop current track in guild {guild_id}: {why:?}");
                }
            }
        }
    }
}

/// Checks that a message successfully sent; if not, then logs why.
pub fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn parses_play_with_a_link() {
        assert_eq!(
            Command::parse("!play https://youtu.be/dQw4w9WgXcQ", "!"),
            Some(Command::Play {
                url: Some("https://youtu.be/dQw4w9WgXcQ".to_string()),
            })
        );
    }

    #[test]
    fn parses_play_without_a_link() {
        assert_eq!(
            Command::parse("!play", "!"),
            Some(Command::Play { url: None })
        );
    }

    #[test]
    fn parses_skip_and_ignores_trailing_tokens() {
        assert_eq!(Command::parse("!skip", "!"), Some(Command::Skip));
        assert_eq!(Command::parse("!skip this one", "!"), Some(Command::Skip));
    }

    #[test]
    fn ignores_unknown_commands_and_chatter() {
        assert_eq!(Command::parse("!shuffle", "!"), None);
        assert_eq!(Command::parse("play something", "!"), None);
        assert_eq!(Command::parse("hello there", "!"), None);
        assert_eq!(Command::parse("", "!"), None);
    }

    #[test]
    fn honours_the_configured_prefix() {
        assert_eq!(Command::parse("~skip", "~"), Some(Command::Skip));
        assert_eq!(Command::parse("!skip", "~"), None);
    }

    #[test]
    fn accepts_youtube_urls() {
        assert!(is_video_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_video_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_video_url("https://music.youtube.com/watch?v=test"));
        assert!(is_video_url("youtube.com/watch?v=dQw4w9WgXcQ"));
    }

    #[test]
    fn rejects_everything_else() {
        assert!(!is_video_url("https://example.com/video"));
        assert!(!is_video_url("https://soundcloud.com/some/track"));
        assert!(!is_video_url("not a url at all"));
        assert!(!is_video_url(""));
    }
}
