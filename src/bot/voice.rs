//! Implementaciones de Songbird y Serenity para la conexión de voz, los avisos
//! de la sesión y el aviso de restauración.

use anyhow::Context as _;
use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::{
    builder::CreateMessage,
    cache::Cache,
    http::Http,
    model::{
        channel::ChannelType,
        id::{ChannelId, GuildId, MessageId},
    },
    prelude::Context,
};
use songbird::{
    input::{HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, Songbird, TrackEvent,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::events::{TrackEndHandler, TrackErrorHandler};
use crate::{
    audio::{
        queue::{Requester, Track},
        session::{AudioSource, Notice, Notifier, TrackDone, VoiceHandle},
    },
    error::PlaybackError,
    storage::{RestoreNotice, RestoreSink},
    ui::embeds::{create_notice_embed, create_restore_embed},
};

/// Audio de un track listo para Songbird
pub struct SongbirdSource {
    input: Option<Input>,
    handle: Option<TrackHandle>,
}

impl AudioSource for SongbirdSource {
    fn cleanup(&mut self) {
        if let Some(handle) = self.handle.take() {
            // El track pudo haber terminado ya
            let _ = handle.stop();
        }
        self.input = None;
    }
}

/// Conexión de voz de una guild a través del manager de Songbird
pub struct SongbirdHandle {
    guild_id: GuildId,
    manager: Arc<Songbird>,
    cache: Arc<Cache>,
    http_client: reqwest::Client,
    channel_id: Mutex<ChannelId>,
    current: Mutex<Option<TrackHandle>>,
}

impl SongbirdHandle {
    /// Entra al canal de voz y devuelve el handle de la conexión
    pub async fn connect(
        ctx: &Context,
        guild_id: GuildId,
        channel_id: ChannelId,
        http_client: reqwest::Client,
    ) -> Result<Self, PlaybackError> {
        let manager = songbird::get(ctx)
            .await
            .ok_or_else(|| PlaybackError::Connection("Songbird no inicializado".to_string()))?;

        manager
            .join(guild_id, channel_id)
            .await
            .map_err(|e| PlaybackError::Connection(e.to_string()))?;

        info!("🔊 Conectado al canal de voz {} en guild {}", channel_id, guild_id);

        Ok(Self {
            guild_id,
            manager,
            cache: Arc::clone(&ctx.cache),
            http_client,
            channel_id: Mutex::new(channel_id),
            current: Mutex::new(None),
        })
    }

    /// Canal de voz en el que está el bot según Songbird
    pub async fn current_channel(&self) -> Option<ChannelId> {
        let call = self.manager.get(self.guild_id)?;
        let channel = call.lock().await.current_channel()?;
        Some(ChannelId::from(channel.0))
    }

    fn requester_channel(&self, requester: &Requester) -> Option<ChannelId> {
        let guild = self.guild_id.to_guild_cached(&self.cache)?;
        guild
            .voice_states
            .get(&requester.id)
            .and_then(|state| state.channel_id)
    }
}

#[async_trait]
impl VoiceHandle for SongbirdHandle {
    type Source = SongbirdSource;

    async fn open_source(&self, track: &Track) -> Result<Self::Source, PlaybackError> {
        if track.stream_url.is_empty() {
            return Err(PlaybackError::Source("el track no tiene URL de stream".to_string()));
        }

        debug!("🔗 Creando input HTTP para: {}", track.title);
        let request = HttpRequest::new(self.http_client.clone(), track.stream_url.clone());
        Ok(SongbirdSource {
            input: Some(Input::from(request)),
            handle: None,
        })
    }

    async fn play(&self, source: &mut Self::Source, done: TrackDone) -> Result<(), PlaybackError> {
        let input = source
            .input
            .take()
            .ok_or_else(|| PlaybackError::Player("el audio ya fue utilizado".to_string()))?;

        let call = self
            .manager
            .get(self.guild_id)
            .ok_or_else(|| PlaybackError::Connection("sin conexión de voz".to_string()))?;

        let handle = {
            let mut call = call.lock().await;
            call.stop();
            call.play_input(input)
        };

        handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndHandler {
                    guild_id: self.guild_id,
                    done: done.clone(),
                },
            )
            .map_err(|e| PlaybackError::Player(e.to_string()))?;
        handle
            .add_event(
                Event::Track(TrackEvent::Error),
                TrackErrorHandler {
                    guild_id: self.guild_id,
                    done,
                },
            )
            .map_err(|e| PlaybackError::Player(e.to_string()))?;

        *self.current.lock() = Some(handle.clone());
        source.handle = Some(handle);
        Ok(())
    }

    async fn stop(&self) {
        if let Some(call) = self.manager.get(self.guild_id) {
            call.lock().await.stop();
        }
        self.current.lock().take();
    }

    async fn disconnect(&self) {
        self.current.lock().take();
        match self.manager.remove(self.guild_id).await {
            Ok(()) => info!("👋 Desconectado del canal de voz en guild {}", self.guild_id),
            Err(e) => debug!("Desconexión de guild {}: {}", self.guild_id, e),
        }
    }

    async fn is_playing(&self) -> bool {
        let handle = self.current.lock().clone();
        match handle {
            Some(handle) => matches!(
                handle.get_info().await.map(|state| state.playing),
                Ok(PlayMode::Play)
            ),
            None => false,
        }
    }

    async fn is_connected(&self) -> bool {
        match self.manager.get(self.guild_id) {
            Some(call) => call.lock().await.current_connection().is_some(),
            None => false,
        }
    }

    async fn human_member_count(&self) -> Option<usize> {
        let channel_id = self.current_channel().await?;
        let guild = self.guild_id.to_guild_cached(&self.cache)?;

        let humans = guild
            .voice_states
            .values()
            .filter(|state| state.channel_id == Some(channel_id))
            .filter(|state| {
                let is_bot = state
                    .member
                    .as_ref()
                    .map(|member| member.user.bot)
                    .or_else(|| guild.members.get(&state.user_id).map(|member| member.user.bot))
                    .unwrap_or(false);
                !is_bot
            })
            .count();
        Some(humans)
    }

    async fn reconnect(&self, requester: &Requester) -> Result<(), PlaybackError> {
        let channel_id = self
            .requester_channel(requester)
            .unwrap_or_else(|| *self.channel_id.lock());

        info!("🔄 Reconectando al canal {} en guild {}", channel_id, self.guild_id);
        self.manager
            .join(self.guild_id, channel_id)
            .await
            .map_err(|e| PlaybackError::Connection(e.to_string()))?;

        *self.channel_id.lock() = channel_id;
        Ok(())
    }
}

/// Publica los avisos de una sesión en el canal de texto del comando
pub struct ChannelNotifier {
    http: Arc<Http>,
    channel_id: ChannelId,
}

impl ChannelNotifier {
    pub fn new(http: Arc<Http>, channel_id: ChannelId) -> Self {
        Self { http, channel_id }
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn notify(&self, notice: Notice) -> anyhow::Result<MessageId> {
        let message = self
            .channel_id
            .send_message(&*self.http, CreateMessage::new().embed(create_notice_embed(&notice)))
            .await?;
        Ok(message.id)
    }

    async fn delete(&self, message: MessageId) -> anyhow::Result<()> {
        self.channel_id.delete_message(&self.http, message).await?;
        Ok(())
    }
}

/// Envía el aviso de restauración al canal de sistema o al primer canal de texto
pub struct GuildRestoreSink {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl GuildRestoreSink {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    fn announcement_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        let guild = guild_id.to_guild_cached(&self.cache)?;
        guild.system_channel_id.or_else(|| {
            guild
                .channels
                .values()
                .filter(|channel| channel.kind == ChannelType::Text)
                .min_by_key(|channel| channel.position)
                .map(|channel| channel.id)
        })
    }
}

#[async_trait]
impl RestoreSink for GuildRestoreSink {
    async fn notify_restore(&self, guild_id: GuildId, notice: &RestoreNotice) -> anyhow::Result<()> {
        let channel_id = self
            .announcement_channel(guild_id)
            .with_context(|| format!("sin canal de texto disponible en {}", notice.guild_name))?;

        if let Err(e) = channel_id
            .send_message(&*self.http, CreateMessage::new().embed(create_restore_embed(notice)))
            .await
        {
            warn!("No se pudo avisar la restauración en {}: {}", notice.guild_name, e);
            return Err(e.into());
        }
        Ok(())
    }
}
