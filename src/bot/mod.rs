//! # Bot Module
//!
//! Discord front end of the music bot.
//!
//! This module contains:
//! - Slash command registration ([`commands`]) and dispatch ([`handlers`])
//! - Songbird/Serenity adapters for the session traits ([`voice`], [`events`])
//! - Per-command cooldowns and query validation
//! - Event handling (ready, cache ready, interactions, voice state updates)
//! - Background maintenance tasks
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`]. It holds the
//! [`SessionRegistry`] explicitly; command handlers reach sessions and queues
//! only through it.

use serenity::{
    all::{Context, EventHandler, GuildId, Interaction, Ready, VoiceState},
    async_trait,
};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::{debug, error, info, warn};

pub mod commands;
pub mod cooldown;
pub mod events;
pub mod handlers;
pub mod validation;
pub mod voice;

use crate::{
    audio::registry::SessionRegistry, config::Config, sources::MediaResolver,
    storage::QueuePersistence,
};
use cooldown::CooldownManager;
use voice::{GuildRestoreSink, SongbirdHandle};

const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(3600);

/// Manejador de eventos de Discord del bot de música.
///
/// ## Fields
///
/// - `config`: configuración cargada del entorno
/// - `registry`: sesiones de voz y colas por guild
/// - `resolver`: resolución de búsquedas y URLs
/// - `persistence`: guardado de colas, `None` si está desactivado
/// - `cooldowns`: límites de uso por comando
pub struct MusicBot {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: Arc<SessionRegistry<SongbirdHandle>>,
    pub(crate) resolver: Arc<MediaResolver>,
    pub(crate) persistence: Option<Arc<QueuePersistence>>,
    pub(crate) cooldowns: Arc<CooldownManager>,
    pub(crate) http_client: reqwest::Client,
    maintenance_started: AtomicBool,
    restored: AtomicBool,
}

impl MusicBot {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<SessionRegistry<SongbirdHandle>>,
        resolver: Arc<MediaResolver>,
        persistence: Option<Arc<QueuePersistence>>,
        http_client: reqwest::Client,
    ) -> Self {
        Self {
            config,
            registry,
            resolver,
            persistence,
            cooldowns: Arc::new(CooldownManager::new()),
            http_client,
            maintenance_started: AtomicBool::new(false),
            restored: AtomicBool::new(false),
        }
    }

    /// Registra los comandos por guild autorizada, o globalmente si no hay lista
    async fn register_commands(&self, ctx: &Context) {
        if self.config.authorized_guilds.is_empty() {
            match commands::register_global_commands(ctx).await {
                Ok(()) => info!("✅ Comandos globales registrados"),
                Err(e) => error!("Error al registrar comandos globales: {:?}", e),
            }
            return;
        }

        for guild_id in &self.config.authorized_guilds {
            match commands::register_guild_commands(ctx, *guild_id).await {
                Ok(()) => info!("✅ Comandos registrados en guild {}", guild_id),
                Err(e) => error!("Error al registrar comandos en guild {}: {:?}", guild_id, e),
            }
        }
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} está en línea!", ready.user.name);
        info!("📊 Conectado a {} servidores", ready.guilds.len());

        self.register_commands(&ctx).await;

        // ready se repite en cada reconexión del gateway
        if !self.maintenance_started.swap(true, Ordering::SeqCst) {
            let resolver = Arc::clone(&self.resolver);
            let cooldowns = Arc::clone(&self.cooldowns);
            let registry = Arc::clone(&self.registry);
            tokio::spawn(async move {
                maintenance_tasks(resolver, cooldowns, registry).await;
            });
        }
    }

    /// Con las guilds en caché ya se pueden elegir canales para el aviso de restauración
    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        debug!("📦 Caché lista con {} guilds", guilds.len());

        let Some(persistence) = self.persistence.as_ref() else {
            return;
        };
        if self.restored.swap(true, Ordering::SeqCst) {
            return;
        }

        let sink = GuildRestoreSink::new(Arc::clone(&ctx.http), Arc::clone(&ctx.cache));
        match persistence.restore_on_startup(&sink).await {
            Ok(0) => debug!("Sin colas que restaurar"),
            Ok(notified) => info!("🔄 Aviso de restauración enviado a {} servidores", notified),
            Err(e) => warn!("⚠️ No se pudo restaurar el estado de las colas: {:?}", e),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error manejando comando: {:?}", e);
            }
        }
    }

    /// - **Bot desconectado**: detiene la sesión de la guild
    /// - **Usuario entra al canal del bot**: cancela la salida por canal vacío
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };
        let current_user_id = ctx.cache.current_user().id;

        if new.user_id == current_user_id {
            if old.is_some() && new.channel_id.is_none() {
                info!("🔌 Bot desconectado en guild {}", guild_id);
                // El registro reemplaza las sesiones detenidas en el próximo /play
                if let Some(session) = self.registry.get(guild_id).await {
                    session.stop().await;
                }
            }
            return;
        }

        let Some(channel_id) = new.channel_id else {
            return;
        };
        let was_here = old.as_ref().and_then(|state| state.channel_id) == Some(channel_id);
        let is_bot = new.member.as_ref().is_some_and(|member| member.user.bot);
        if was_here || is_bot {
            return;
        }

        if let Some(session) = self.registry.get(guild_id).await {
            if session.voice().current_channel().await == Some(channel_id) {
                session.note_member_joined();
            }
        }
    }
}

/// Tareas periódicas: limpieza del caché de resoluciones y de los cooldowns
async fn maintenance_tasks(
    resolver: Arc<MediaResolver>,
    cooldowns: Arc<CooldownManager>,
    registry: Arc<SessionRegistry<SongbirdHandle>>,
) {
    let mut interval = tokio::time::interval(MAINTENANCE_INTERVAL);
    // El primer tick es inmediato
    interval.tick().await;

    loop {
        interval.tick().await;

        if let Some(cache) = resolver.cache() {
            cache.cleanup_old_entries();
        }
        cooldowns.prune(Duration::from_secs(60));

        info!(
            "🧹 Tareas de mantenimiento completadas ({} sesiones activas)",
            registry.active_sessions().await
        );
    }
}
