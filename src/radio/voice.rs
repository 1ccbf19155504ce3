//! Voice bridge: the seam between station sessions and the Discord voice
//! stack. Stations talk to the [`VoiceBridge`] trait; production uses the
//! songbird-backed implementation, tests use a mock.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serenity::model::id::{ChannelId, GuildId};
use songbird::error::JoinError;
use songbird::input::{AudioStream, Input, LiveInput};
use songbird::{Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use symphonia::core::io::MediaSource;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tracing::info;

use crate::error::StationError;
use crate::radio::icy::IcyAudio;

/// Guild-qualified voice channel reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelRef {
    pub guild: GuildId,
    pub channel: ChannelId,
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.guild, self.channel)
    }
}

/// Terminal playback signals surfaced by the voice driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    Ended,
    Errored(String),
}

/// Joins and leaves voice channels and plays an audio stream into them.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceBridge: Send + Sync {
    async fn join(&self, channel: ChannelRef) -> Result<(), StationError>;

    async fn leave(&self, channel: ChannelRef) -> Result<(), StationError>;

    /// Starts playback and returns the terminal-event feed for this stream.
    async fn play(
        &self,
        channel: ChannelRef,
        audio: IcyAudio,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackEvent>, StationError>;
}

/// Production bridge over the songbird voice manager.
pub struct SongbirdBridge {
    manager: Arc<Songbird>,
}

impl SongbirdBridge {
    pub fn new(manager: Arc<Songbird>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl VoiceBridge for SongbirdBridge {
    async fn join(&self, channel: ChannelRef) -> Result<(), StationError> {
        self.manager
            .join(channel.guild, channel.channel)
            .await
            .map_err(StationError::bridge)?;
        info!("🔊 Joined voice channel {channel}");
        Ok(())
    }

    async fn leave(&self, channel: ChannelRef) -> Result<(), StationError> {
        match self.manager.remove(channel.guild).await {
            Ok(()) => {
                info!("👋 Left voice channel {channel}");
                Ok(())
            }
            // Nothing to leave counts as left.
            Err(JoinError::NoCall) => Ok(()),
            Err(e) => Err(StationError::bridge(e)),
        }
    }

    async fn play(
        &self,
        channel: ChannelRef,
        audio: IcyAudio,
    ) -> Result<mpsc::UnboundedReceiver<PlaybackEvent>, StationError> {
        let call = self
            .manager
            .get(channel.guild)
            .ok_or_else(|| StationError::bridge(format!("no voice connection for {channel}")))?;

        let mut hint = Hint::new();
        hint.mime_type("audio/mpeg");
        let stream = AudioStream {
            input: Box::new(audio) as Box<dyn MediaSource>,
            hint: Some(hint),
        };
        let input = Input::Live(LiveInput::Raw(stream), None);

        let (tx, rx) = mpsc::unbounded_channel();
        let mut call = call.lock().await;
        let track = call.play_input(input);
        track
            .add_event(
                Event::Track(TrackEvent::End),
                PlaybackSignal {
                    tx: tx.clone(),
                    kind: SignalKind::Ended,
                },
            )
            .map_err(StationError::bridge)?;
        track
            .add_event(
                Event::Track(TrackEvent::Error),
                PlaybackSignal {
                    tx,
                    kind: SignalKind::Errored,
                },
            )
            .map_err(StationError::bridge)?;

        Ok(rx)
    }
}

#[derive(Clone, Copy)]
enum SignalKind {
    Ended,
    Errored,
}

/// Forwards driver track events onto the station's playback feed.
struct PlaybackSignal {
    tx: mpsc::UnboundedSender<PlaybackEvent>,
    kind: SignalKind,
}

#[async_trait]
impl VoiceEventHandler for PlaybackSignal {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let event = match self.kind {
            SignalKind::Ended => PlaybackEvent::Ended,
            SignalKind::Errored => {
                let detail = if let EventContext::Track(tracks) = ctx {
                    tracks
                        .iter()
                        .map(|(state, _)| format!("{:?}", state.playing))
                        .collect::<Vec<_>>()
                        .join(", ")
                } else {
                    String::from("unknown driver error")
                };
                PlaybackEvent::Errored(detail)
            }
        };
        let _ = self.tx.send(event);
        None
    }
}
