//! Discord gateway layer.
//!
//! [`RadioBot`] translates gateway events into station-session calls and
//! routes chat commands. Presence drives the radio: a voice channel whose
//! name matches a configured station is joined while members are in it and
//! left once the last member is gone.

use std::sync::Arc;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use serenity::{
    all::{ChannelType, Context, EventHandler, Guild, Message, Ready, VoiceState},
    async_trait,
    model::id::{ChannelId, GuildId, UserId},
};
use tracing::{error, info};

pub mod commands;

use crate::media::MediaClient;
use crate::radio::voice::ChannelRef;
use crate::radio::{Station, StationSet};
use commands::CommandRouter;

static IMDB_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:https?://)?(?:www\.)?imdb\.com/title/(tt[^/\s]+)").expect("valid regex")
});

pub struct RadioBot {
    stations: Arc<StationSet>,
    media: MediaClient,
    router: CommandRouter,
}

impl RadioBot {
    pub fn new(stations: Arc<StationSet>, media: MediaClient) -> Result<Self> {
        Ok(Self {
            stations,
            media,
            router: CommandRouter::new()?,
        })
    }

    pub fn version(&self) -> String {
        format!(
            "{} v{} beep boop",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Produces the reply for one incoming message, from either Discord or
    /// the local console. Empty replies are suppressed (Discord rejects
    /// empty messages); errors become a plain text `ERROR:` reply.
    pub async fn process_message(&self, content: &str) -> Option<String> {
        match self.reply_for(content).await {
            Ok(reply) => reply.filter(|reply| !reply.is_empty()),
            Err(e) => {
                error!("💬 Message handling failed: {e:#}");
                Some(format!("ERROR: {e}"))
            }
        }
    }

    async fn reply_for(&self, content: &str) -> Result<Option<String>> {
        if let Some(command_line) = content.strip_prefix('!') {
            let mut parts = command_line.split_whitespace();
            let Some(name) = parts.next() else {
                return Ok(None);
            };
            let name = name.to_lowercase();
            let args: Vec<&str> = parts.collect();
            return self.router.dispatch(self, &name, &args).await;
        }

        // Pasting an IMDB title URL adds the movie to the wanted list.
        if let Some(identifier) = imdb_identifier(content) {
            let response = self.media.add(identifier).await?;
            if response.success {
                if let Some(movie) = response.movie {
                    let mut reply = format!("Added {}", movie.title);
                    if let Some(tagline) = movie
                        .info
                        .and_then(|info| info.tagline)
                        .filter(|tagline| !tagline.is_empty())
                    {
                        reply.push_str(&format!("\n\"{tagline}\""));
                    }
                    return Ok(Some(reply));
                }
            }
        }

        Ok(None)
    }

    async fn cmd_help(&self) -> Result<Option<String>> {
        let mut lines = vec![String::from("Help")];
        lines.extend(self.router.help_lines());
        Ok(Some(lines.join("\n")))
    }

    async fn cmd_ping(&self) -> Result<Option<String>> {
        Ok(Some(String::from("pong")))
    }

    async fn cmd_radio(&self) -> Result<Option<String>> {
        let lines: Vec<String> = self
            .stations
            .iter()
            .map(|(name, station)| format!("{name}: {}", station.status()))
            .collect();
        Ok(Some(lines.join("\n")))
    }

    async fn cmd_search(&self, args: &[&str]) -> Result<Option<String>> {
        if args.is_empty() {
            return Ok(None);
        }

        let movies = self.media.search(&args.join(" ")).await?;
        let mut titles: Vec<String> = movies.iter().map(|movie| movie.display_line()).collect();
        titles.sort();
        titles.dedup();
        Ok(Some(titles.join("\n")))
    }

    async fn cmd_version(&self) -> Result<Option<String>> {
        Ok(Some(self.version()))
    }

    /// Join-or-leave decisions for every station channel of a guild, taken
    /// under the cache guard so they can run after it is released.
    fn station_sync_actions(
        &self,
        guild: &Guild,
        bot_id: UserId,
    ) -> Vec<(Arc<Station>, ChannelRef, bool)> {
        let mut actions = Vec::new();
        for (channel_id, channel) in &guild.channels {
            if channel.kind != ChannelType::Voice {
                continue;
            }
            let Some(station) = self.stations.get(&channel.name) else {
                continue;
            };
            let channel_ref = ChannelRef {
                guild: guild.id,
                channel: *channel_id,
            };
            let occupied = channel_occupied(guild, *channel_id, bot_id);
            actions.push((Arc::clone(station), channel_ref, occupied));
        }
        actions
    }

    fn station_for_channel(
        &self,
        guild: &Guild,
        channel_id: ChannelId,
    ) -> Option<Arc<Station>> {
        let channel = guild.channels.get(&channel_id)?;
        self.stations.get(&channel.name).cloned()
    }
}

/// Whether anyone besides the bot itself is in the voice channel.
fn channel_occupied(guild: &Guild, channel_id: ChannelId, bot_id: UserId) -> bool {
    guild
        .voice_states
        .values()
        .any(|state| state.channel_id == Some(channel_id) && state.user_id != bot_id)
}

fn imdb_identifier(content: &str) -> Option<&str> {
    IMDB_TITLE
        .captures(content)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str())
}

#[async_trait]
impl EventHandler for RadioBot {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("🤖 Logged in as {}", ready.user.name);
    }

    /// Initial sync: every channel matching a station name is joined or
    /// left according to its current occupancy.
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        info!("📊 Cache ready for {} guilds", guilds.len());
        let bot_id = ctx.cache.current_user().id;

        for guild_id in guilds {
            let actions = match ctx.cache.guild(guild_id) {
                Some(guild) => self.station_sync_actions(&guild, bot_id),
                None => continue,
            };
            for (station, channel, occupied) in actions {
                if occupied {
                    station.join_channel(channel);
                } else {
                    station.leave_channel(channel).await;
                }
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.bot {
            return;
        }

        if let Some(reply) = self.process_message(&msg.content).await {
            if let Err(e) = msg.reply(&ctx, reply).await {
                error!("💬 Failed to reply: {e}");
            }
        }
    }

    /// Presence triggers: a member entering a station channel starts the
    /// stream, the last member leaving stops it.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new
            .guild_id
            .or_else(|| old.as_ref().and_then(|state| state.guild_id))
        else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id {
            // The bot's own movement is not a presence trigger.
            return;
        }

        let mut joins = Vec::new();
        let mut leaves = Vec::new();
        {
            let Some(guild) = ctx.cache.guild(guild_id) else {
                return;
            };

            if let Some(channel_id) = new.channel_id {
                if let Some(station) = self.station_for_channel(&guild, channel_id) {
                    joins.push((
                        station,
                        ChannelRef {
                            guild: guild_id,
                            channel: channel_id,
                        },
                    ));
                }
            }

            let old_channel = old.as_ref().and_then(|state| state.channel_id);
            if let Some(channel_id) = old_channel.filter(|id| Some(*id) != new.channel_id) {
                if let Some(station) = self.station_for_channel(&guild, channel_id) {
                    if !channel_occupied(&guild, channel_id, bot_id) {
                        leaves.push((
                            station,
                            ChannelRef {
                                guild: guild_id,
                                channel: channel_id,
                            },
                        ));
                    }
                }
            }
        }

        for (station, channel) in joins {
            station.join_channel(channel);
        }
        for (station, channel) in leaves {
            station.leave_channel(channel).await;
        }
    }
}
