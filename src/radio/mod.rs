//! Radio stations: per-channel streaming sessions over internet radio.
//!
//! A [`Station`] owns the lifecycle of its streams: a channel join resolves
//! the station playlist, opens the ICY connection, and pipes the audio into
//! the voice bridge; metadata updates the displayed title; a leave tears
//! the transport down. One stream per channel, tracked through an explicit
//! `Pending | Active` state so concurrent joins cannot race.

pub mod icy;
pub mod playlist;
pub mod voice;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serenity::model::id::ChannelId;
use tracing::{debug, info, warn};

use crate::error::StationError;
use crate::radio::icy::{IcyConnection, StreamHandle};
use crate::radio::voice::{ChannelRef, PlaybackEvent, VoiceBridge};

/// Resolves a station source URL into a live ICY connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Tuner: Send + Sync {
    async fn tune(&self, source_url: &str) -> Result<IcyConnection, StationError>;
}

/// Production tuner: playlist resolution followed by an ICY connect.
pub struct RadioTuner {
    http: reqwest::Client,
}

impl RadioTuner {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl Tuner for RadioTuner {
    async fn tune(&self, source_url: &str) -> Result<IcyConnection, StationError> {
        let stream_url = playlist::resolve(&self.http, source_url).await?;
        icy::connect(&self.http, &stream_url).await
    }
}

/// Per-channel stream lifecycle state.
enum StreamState {
    /// Join accepted; the async chain is still resolving. Blocks a second
    /// concurrent join for the same channel.
    Pending,
    /// Live connection whose transport the handle can terminate.
    Active(StreamHandle),
}

/// The two display fields ever read from a stream.
#[derive(Debug, Clone, Default)]
struct NowPlaying {
    title: Option<String>,
    station_name: Option<String>,
}

/// One configured radio station and its currently joined channels.
pub struct Station {
    name: String,
    source_url: String,
    tuner: Arc<dyn Tuner>,
    bridge: Arc<dyn VoiceBridge>,
    streams: DashMap<ChannelId, StreamState>,
    now_playing: RwLock<NowPlaying>,
}

impl Station {
    pub fn new(
        name: impl Into<String>,
        source_url: impl Into<String>,
        tuner: Arc<dyn Tuner>,
        bridge: Arc<dyn VoiceBridge>,
    ) -> Self {
        Self {
            name: name.into(),
            source_url: source_url.into(),
            tuner,
            bridge,
            streams: DashMap::new(),
            now_playing: RwLock::new(NowPlaying::default()),
        }
    }

    #[allow(dead_code)]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Starts streaming into `channel` unless a stream is already present
    /// or being set up there.
    ///
    /// The placeholder entry is recorded before any asynchronous work, so a
    /// concurrent join for the same channel is a no-op. Failures anywhere
    /// in the chain are logged and the placeholder is dropped; there is no
    /// retry.
    pub fn join_channel(self: &Arc<Self>, channel: ChannelRef) {
        match self.streams.entry(channel.channel) {
            Entry::Occupied(_) => {
                debug!("📻 Station '{}' already streaming in {channel}", self.name);
                return;
            }
            Entry::Vacant(slot) => {
                slot.insert(StreamState::Pending);
            }
        }

        let station = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = station.start_stream(channel).await {
                warn!(
                    "📻 Station '{}' failed to start in {channel}: {e}",
                    station.name
                );
                if let Some((_, StreamState::Active(handle))) =
                    station.streams.remove(&channel.channel)
                {
                    handle.shutdown();
                }
            }
        });
    }

    async fn start_stream(self: &Arc<Self>, channel: ChannelRef) -> Result<(), StationError> {
        self.bridge.join(channel).await?;
        info!("📻 Starting station '{}' in {channel}", self.name);

        let IcyConnection {
            headers,
            audio,
            mut metadata,
            handle,
        } = self.tuner.tune(&self.source_url).await?;

        info!(
            "📻 Station '{}' on air in {channel} (genre: {})",
            self.name,
            headers.genre.as_deref().unwrap_or("unknown")
        );

        *self.now_playing.write() = NowPlaying {
            title: None,
            station_name: headers.name,
        };

        // Title updates flow in for as long as the demux task lives.
        let station = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(update) = metadata.recv().await {
                debug!("🎶 Station '{}': {:?}", station.name, update.title);
                station.now_playing.write().title = update.title;
            }
        });

        self.streams
            .insert(channel.channel, StreamState::Active(handle));

        let mut playback = self.bridge.play(channel, audio).await?;
        let station = Arc::clone(self);
        tokio::spawn(async move {
            match playback.recv().await {
                Some(PlaybackEvent::Errored(e)) => {
                    warn!("📻 Station '{}' error in {channel}: {e}", station.name);
                }
                Some(PlaybackEvent::Ended) | None => {
                    info!("📻 Station '{}' ended in {channel}", station.name);
                }
            }
            station.streams.remove(&channel.channel);
        });

        Ok(())
    }

    /// Stops the channel's stream if one is live, then always releases the
    /// voice connection. Transport teardown is best-effort; the entry
    /// itself is removed when the driver signals the end of playback.
    pub async fn leave_channel(&self, channel: ChannelRef) {
        if let Some(entry) = self.streams.get(&channel.channel) {
            if let StreamState::Active(handle) = entry.value() {
                info!("📻 Stopping station '{}' in {channel}", self.name);
                handle.shutdown();
            }
        }

        if let Err(e) = self.bridge.leave(channel).await {
            warn!(
                "📻 Station '{}' could not leave {channel}: {e}",
                self.name
            );
        }
    }

    /// Display status: "Stopped" when no channel carries this station,
    /// otherwise the latest title, falling back to the ICY station name,
    /// falling back to an empty string.
    pub fn status(&self) -> String {
        if self.streams.is_empty() {
            return String::from("Stopped");
        }

        let now_playing = self.now_playing.read();
        now_playing
            .title
            .clone()
            .or_else(|| now_playing.station_name.clone())
            .unwrap_or_default()
    }
}

/// All configured stations, keyed by the voice-channel name they serve.
pub struct StationSet {
    stations: BTreeMap<String, Arc<Station>>,
}

impl StationSet {
    pub fn new(
        config: &BTreeMap<String, String>,
        tuner: Arc<dyn Tuner>,
        bridge: Arc<dyn VoiceBridge>,
    ) -> Self {
        let stations = config
            .iter()
            .map(|(name, source_url)| {
                let station = Station::new(
                    name.clone(),
                    source_url.clone(),
                    Arc::clone(&tuner),
                    Arc::clone(&bridge),
                );
                (name.clone(), Arc::new(station))
            })
            .collect();

        Self { stations }
    }

    pub fn get(&self, channel_name: &str) -> Option<&Arc<Station>> {
        self.stations.get(channel_name)
    }

    /// Stations in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<Station>)> {
        self.stations.iter()
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }
}
