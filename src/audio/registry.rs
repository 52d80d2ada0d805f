use dashmap::DashMap;
use futures::future::join_all;
use serenity::model::id::GuildId;
use std::{future::Future, sync::Arc};
use tokio::sync::{Mutex, Notify};
use tracing::{error, info};

use super::{
    queue::{QueueEntry, QueueHandle, Track, TrackQueue},
    session::{GuildSession, SessionParts, SessionSettings, VoiceHandle},
};
use crate::error::{PlaybackError, QueueError};

type SessionSlot<V> = Arc<Mutex<Option<Arc<GuildSession<V>>>>>;

/// Estado de una guild para la persistencia de colas
#[derive(Debug, Clone, PartialEq)]
pub struct GuildQueueState {
    pub guild_id: GuildId,
    pub guild_name: String,
    pub current: Option<QueueEntry>,
    pub queued: Vec<QueueEntry>,
}

/// Crea, encuentra y destruye una [`GuildSession`] por guild, y es dueño de
/// las colas de cada guild.
///
/// La creación de sesiones se serializa por guild: dos `/play` simultáneos en
/// la misma guild comparten la misma sesión, mientras que guilds distintas no
/// se bloquean entre sí.
pub struct SessionRegistry<V: VoiceHandle> {
    sessions: DashMap<GuildId, SessionSlot<V>>,
    queues: DashMap<GuildId, QueueHandle>,
    settings: SessionSettings,
    max_queue_size: usize,
    user_queue_limit: usize,
    save_signal: Arc<Notify>,
}

impl<V: VoiceHandle> SessionRegistry<V> {
    pub fn new(settings: SessionSettings, max_queue_size: usize, user_queue_limit: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            queues: DashMap::new(),
            settings,
            max_queue_size,
            user_queue_limit,
            save_signal: Arc::new(Notify::new()),
        }
    }

    /// Señal que dispara un guardado de colas (coalescido)
    pub fn save_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.save_signal)
    }

    pub fn request_save(&self) {
        self.save_signal.notify_one();
    }

    /// Cola de la guild, creada con los límites configurados si no existe
    pub fn queue(&self, guild_id: GuildId) -> QueueHandle {
        self.queues
            .entry(guild_id)
            .or_insert_with(|| {
                QueueHandle::new(TrackQueue::new(self.max_queue_size, self.user_queue_limit))
            })
            .clone()
    }

    /// Encola y despierta a la sesión de la guild
    pub fn enqueue(&self, guild_id: GuildId, track: Track) -> Result<usize, QueueError> {
        let position = self.queue(guild_id).push(track)?;
        self.request_save();
        Ok(position)
    }

    fn slot(&self, guild_id: GuildId) -> SessionSlot<V> {
        self.sessions
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Devuelve la sesión activa o crea una nueva con `connect`.
    ///
    /// Una sesión detenida o desconectada se detiene por completo antes de
    /// crear su reemplazo.
    pub async fn get_or_create<F, Fut>(
        &self,
        guild_id: GuildId,
        connect: F,
    ) -> Result<Arc<GuildSession<V>>, PlaybackError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SessionParts<V>, PlaybackError>>,
    {
        let slot = self.slot(guild_id);
        let mut current = slot.lock().await;

        if let Some(existing) = current.as_ref() {
            if existing.is_alive().await {
                return Ok(Arc::clone(existing));
            }
        }

        if let Some(stale) = current.take() {
            info!("♻️ Reemplazando sesión inactiva en {}", stale.guild_name());
            stale.stop().await;
        }

        let parts = connect().await?;
        let session = GuildSession::start(
            guild_id,
            parts,
            self.queue(guild_id),
            self.settings.clone(),
            self.save_signal(),
        );
        *current = Some(Arc::clone(&session));

        Ok(session)
    }

    /// Sesión en curso de la guild, si existe y no está detenida
    pub async fn get(&self, guild_id: GuildId) -> Option<Arc<GuildSession<V>>> {
        let slot = self.sessions.get(&guild_id).map(|slot| Arc::clone(slot.value()))?;
        let current = slot.lock().await.clone();
        current.filter(|session| !session.is_stopped())
    }

    /// Quita la sesión del registro sin detenerla
    pub async fn remove(&self, guild_id: GuildId) -> Option<Arc<GuildSession<V>>> {
        let slot = self.sessions.get(&guild_id).map(|slot| Arc::clone(slot.value()))?;
        let removed = slot.lock().await.take();
        removed
    }

    /// Detiene todas las sesiones en paralelo y espera a que terminen
    pub async fn stop_all(&self) {
        let slots: Vec<SessionSlot<V>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut sessions = Vec::new();
        for slot in slots {
            if let Some(session) = slot.lock().await.take() {
                sessions.push(session);
            }
        }

        if sessions.is_empty() {
            return;
        }

        info!("⏹️ Deteniendo {} sesiones de voz", sessions.len());
        let handles = sessions.into_iter().map(|session| {
            tokio::spawn(async move {
                session.stop().await;
            })
        });

        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("❌ Error deteniendo una sesión: {}", e);
            }
        }
    }

    pub async fn active_sessions(&self) -> usize {
        let slots: Vec<SessionSlot<V>> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut active = 0;
        for slot in slots {
            if slot
                .lock()
                .await
                .as_ref()
                .is_some_and(|session| !session.is_stopped())
            {
                active += 1;
            }
        }
        active
    }

    /// Estado de cada guild con algo sonando o encolado
    pub async fn guild_states(&self) -> Vec<GuildQueueState> {
        let queues: Vec<(GuildId, QueueHandle)> = self
            .queues
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut states = Vec::new();
        for (guild_id, queue) in queues {
            let session = self.get(guild_id).await;
            let current = session
                .as_ref()
                .and_then(|session| session.now_playing())
                .map(|track| QueueEntry::from(&track));
            let queued = queue.snapshot().entries;

            if current.is_none() && queued.is_empty() {
                continue;
            }

            states.push(GuildQueueState {
                guild_id,
                guild_name: session
                    .map(|session| session.guild_name().to_string())
                    .unwrap_or_else(|| "Desconocido".to_string()),
                current,
                queued,
            });
        }

        states.sort_by_key(|state| state.guild_id);
        states
    }
}
