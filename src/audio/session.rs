//! Per-guild playback session.
//!
//! A [`GuildSession`] owns one voice connection and runs two tasks:
//!
//! - the **player loop**, which pops the next track, materializes it, plays it
//!   and waits for it to finish before looping;
//! - the **monitor**, which periodically checks for an empty voice channel or
//!   prolonged inactivity and tears the session down.
//!
//! Both tasks observe the same [`CancellationToken`]. Teardown (stop audio,
//! disconnect, delete the now-playing message) runs exactly once, at the end
//! of the player task, whether the loop ended by cancellation or by a panic.

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serenity::model::id::{GuildId, MessageId};
use std::{
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::{
    sync::{watch, Notify},
    task::JoinHandle,
    time::{timeout, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::queue::{QueueHandle, Requester, Track};
use crate::{config::Config, error::PlaybackError};

tokio::task_local! {
    static IN_MONITOR: bool;
}

/// Audio materializado para un track. `cleanup` se invoca exactamente una vez.
pub trait AudioSource: Send + 'static {
    fn cleanup(&mut self);
}

/// Conexión de voz de una guild, abstraída sobre Songbird.
#[async_trait]
pub trait VoiceHandle: Send + Sync + 'static {
    type Source: AudioSource;

    async fn open_source(&self, track: &Track) -> Result<Self::Source, PlaybackError>;

    /// Inicia la reproducción. `done` debe marcarse al terminar o fallar el track.
    async fn play(&self, source: &mut Self::Source, done: TrackDone) -> Result<(), PlaybackError>;

    async fn stop(&self);

    async fn disconnect(&self);

    async fn is_playing(&self) -> bool;

    async fn is_connected(&self) -> bool;

    /// Miembros humanos en el canal del bot. `None` si no se puede determinar.
    async fn human_member_count(&self) -> Option<usize>;

    async fn reconnect(&self, requester: &Requester) -> Result<(), PlaybackError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeaveReason {
    Inactivity(Duration),
    EmptyChannel,
}

/// Mensajes que la sesión publica en el canal de texto
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    NowPlaying(Track),
    TrackFailed { title: String, reason: String },
    ReconnectFailed { title: String },
    Leaving(LeaveReason),
}

#[async_trait]
pub trait Notifier: Send + Sync + 'static {
    async fn notify(&self, notice: Notice) -> anyhow::Result<MessageId>;

    async fn delete(&self, message: MessageId) -> anyhow::Result<()>;
}

/// Señal de "track terminado" de un solo uso, con el error de reproducción si lo hubo.
#[derive(Clone)]
pub struct TrackDone {
    finished: Arc<watch::Sender<bool>>,
    error: Arc<Mutex<Option<String>>>,
}

impl TrackDone {
    pub fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            finished: Arc::new(finished),
            error: Arc::new(Mutex::new(None)),
        }
    }

    pub fn finish(&self) {
        self.finished.send_replace(true);
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.error.lock().get_or_insert_with(|| reason.into());
        self.finish();
    }

    pub fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    pub async fn wait(&self) {
        let mut rx = self.finished.subscribe();
        // El emisor vive en self, wait_for no puede fallar por cierre
        let _ = rx.wait_for(|finished| *finished).await;
    }

    fn take_error(&self) -> Option<String> {
        self.error.lock().take()
    }
}

impl Default for TrackDone {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Loading,
    Playing,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub inactivity_timeout: Duration,
    pub monitor_interval: Duration,
    pub auto_leave_empty: bool,
    pub empty_channel_delay: Duration,
    pub source_timeout: Duration,
    pub play_timeout: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(180),
            monitor_interval: Duration::from_secs(30),
            auto_leave_empty: true,
            empty_channel_delay: Duration::from_secs(10),
            source_timeout: Duration::from_secs(30),
            play_timeout: Duration::from_secs(15),
        }
    }
}

impl From<&Config> for SessionSettings {
    fn from(config: &Config) -> Self {
        Self {
            inactivity_timeout: config.inactivity_timeout,
            monitor_interval: config.monitor_interval,
            auto_leave_empty: config.auto_leave_empty_channel,
            empty_channel_delay: config.empty_channel_leave_delay,
            ..Self::default()
        }
    }
}

/// Colaboradores externos de una sesión nueva
pub struct SessionParts<V: VoiceHandle> {
    pub guild_name: String,
    pub voice: Arc<V>,
    pub notifier: Arc<dyn Notifier>,
}

pub struct GuildSession<V: VoiceHandle> {
    guild_id: GuildId,
    guild_name: String,
    voice: Arc<V>,
    notifier: Arc<dyn Notifier>,
    queue: QueueHandle,
    save_signal: Arc<Notify>,
    settings: SessionSettings,

    cancel: CancellationToken,
    stopping: AtomicBool,
    terminated: watch::Sender<bool>,

    state: RwLock<SessionState>,
    // Solo el ciclo de reproducción escribe estos campos
    current: RwLock<Option<Track>>,
    current_done: Mutex<Option<TrackDone>>,
    now_playing_message: Mutex<Option<MessageId>>,

    last_activity: Mutex<Instant>,
    empty_since: Mutex<Option<Instant>>,

    player_task: Mutex<Option<JoinHandle<()>>>,
    monitor_task: Mutex<Option<JoinHandle<()>>>,
}

impl<V: VoiceHandle> GuildSession<V> {
    /// Crea la sesión y lanza el ciclo de reproducción y el monitor.
    pub fn start(
        guild_id: GuildId,
        parts: SessionParts<V>,
        queue: QueueHandle,
        settings: SessionSettings,
        save_signal: Arc<Notify>,
    ) -> Arc<Self> {
        let (terminated, _) = watch::channel(false);
        let session = Arc::new(Self {
            guild_id,
            guild_name: parts.guild_name,
            voice: parts.voice,
            notifier: parts.notifier,
            queue,
            save_signal,
            settings,
            cancel: CancellationToken::new(),
            stopping: AtomicBool::new(false),
            terminated,
            state: RwLock::new(SessionState::Idle),
            current: RwLock::new(None),
            current_done: Mutex::new(None),
            now_playing_message: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
            empty_since: Mutex::new(None),
            player_task: Mutex::new(None),
            monitor_task: Mutex::new(None),
        });

        let player = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(session.run_player()).catch_unwind().await;
                if outcome.is_err() {
                    error!(
                        "💥 El ciclo de reproducción de {} terminó por pánico",
                        session.guild_name
                    );
                }
                session.teardown().await;
            })
        };

        let monitor = {
            let session = Arc::clone(&session);
            tokio::spawn(IN_MONITOR.scope(true, async move {
                session.run_monitor().await;
            }))
        };

        *session.player_task.lock() = Some(player);
        *session.monitor_task.lock() = Some(monitor);

        info!("🎧 Sesión de voz iniciada en {} ({})", session.guild_name, guild_id);
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn guild_name(&self) -> &str {
        &self.guild_name
    }

    pub fn voice(&self) -> &Arc<V> {
        &self.voice
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn now_playing(&self) -> Option<Track> {
        self.current.read().clone()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopping.load(Ordering::SeqCst) || self.cancel.is_cancelled()
    }

    /// Sesión utilizable: no detenida y con la conexión de voz activa
    pub async fn is_alive(&self) -> bool {
        !self.is_stopped() && self.voice.is_connected().await
    }

    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    /// Un humano entró al canal del bot
    pub fn note_member_joined(&self) {
        if self.empty_since.lock().take().is_some() {
            info!("👥 Alguien volvió al canal en {}, se cancela la salida", self.guild_name);
        }
        self.touch();
    }

    /// Detiene el track actual, o el que se está cargando, para que el ciclo avance al siguiente.
    pub async fn skip(&self) -> bool {
        let done = self.current_done.lock().clone();
        match done {
            Some(done) => {
                self.voice.stop().await;
                done.finish();
                info!("⏭️ Track saltado en {}", self.guild_name);
                true
            }
            None => false,
        }
    }

    /// Detiene la sesión y espera a que termine el desmontaje. Idempotente.
    pub async fn stop(&self) {
        if !self.stopping.swap(true, Ordering::SeqCst) {
            info!("⏹️ Deteniendo sesión de voz en {}", self.guild_name);
        }
        self.cancel.cancel();

        let player = self.player_task.lock().take();
        if let Some(handle) = player {
            if let Err(e) = handle.await {
                error!("Error esperando el ciclo de reproducción de {}: {}", self.guild_name, e);
            }
        }

        let mut terminated = self.terminated.subscribe();
        let _ = terminated.wait_for(|done| *done).await;

        // El monitor puede llamar a stop(); no debe esperarse a sí mismo
        let in_monitor = IN_MONITOR.try_with(|flag| *flag).unwrap_or(false);
        if !in_monitor {
            let monitor = self.monitor_task.lock().take();
            if let Some(handle) = monitor {
                if let Err(e) = handle.await {
                    error!("Error esperando el monitor de {}: {}", self.guild_name, e);
                }
            }
        }
    }

    fn set_state(&self, state: SessionState) {
        *self.state.write() = state;
    }

    async fn run_player(&self) {
        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            let next = self.queue.pop_front();
            let track = match next {
                Some(track) => track,
                None => {
                    self.set_state(SessionState::Idle);
                    self.clear_now_playing_message().await;
                    self.touch();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = self.queue.ready().notified() => continue,
                    }
                }
            };

            let done = TrackDone::new();
            *self.current.write() = Some(track.clone());
            *self.current_done.lock() = Some(done.clone());

            self.set_state(SessionState::Loading);
            debug!("⏳ Preparando '{}' en {}", track.title, self.guild_name);

            let opened = tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = done.wait() => {
                    info!("⏭️ '{}' saltado mientras cargaba en {}", track.title, self.guild_name);
                    self.clear_current();
                    continue;
                }
                res = timeout(self.settings.source_timeout, self.voice.open_source(&track)) => {
                    res.unwrap_or(Err(PlaybackError::Timeout("preparar el audio")))
                }
            };
            let mut source = match opened {
                Ok(source) => source,
                Err(e) => {
                    warn!("⚠️ No se pudo preparar '{}' en {}: {}", track.title, self.guild_name, e);
                    self.report_failure(&track, &e.to_string()).await;
                    self.clear_current();
                    continue;
                }
            };

            if !self.voice.is_connected().await {
                warn!("🔌 Conexión de voz perdida en {}, reintentando", self.guild_name);
                if let Err(e) = self.voice.reconnect(&track.requester).await {
                    warn!("❌ Reconexión fallida en {}: {}", self.guild_name, e);
                    self.send_notice(Notice::ReconnectFailed {
                        title: track.title.clone(),
                    })
                    .await;
                    self.finish_track(&mut source);
                    continue;
                }
                info!("🔄 Reconectado al canal de voz en {}", self.guild_name);
            }

            if done.is_finished() {
                info!("⏭️ '{}' saltado mientras cargaba en {}", track.title, self.guild_name);
                self.finish_track(&mut source);
                continue;
            }

            let started = tokio::select! {
                _ = self.cancel.cancelled() => None,
                res = timeout(self.settings.play_timeout, self.voice.play(&mut source, done.clone())) => {
                    Some(res.unwrap_or(Err(PlaybackError::Timeout("iniciar la reproducción"))))
                }
            };
            let Some(started) = started else {
                self.finish_track(&mut source);
                break;
            };
            if let Err(e) = started {
                warn!("⚠️ No se pudo reproducir '{}' en {}: {}", track.title, self.guild_name, e);
                self.report_failure(&track, &e.to_string()).await;
                self.finish_track(&mut source);
                continue;
            }

            self.set_state(SessionState::Playing);
            self.touch();
            info!("▶️ Reproduciendo '{}' en {}", track.title, self.guild_name);
            self.replace_now_playing_message(track.clone()).await;

            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.finish_track(&mut source);
                    break;
                }
                _ = done.wait() => {}
            }

            if let Some(reason) = done.take_error() {
                warn!("❌ Error durante '{}' en {}: {}", track.title, self.guild_name, reason);
                self.report_failure(&track, &reason).await;
            }

            self.finish_track(&mut source);
            self.save_signal.notify_one();
        }
    }

    fn finish_track(&self, source: &mut V::Source) {
        source.cleanup();
        self.clear_current();
    }

    fn clear_current(&self) {
        *self.current.write() = None;
        *self.current_done.lock() = None;
        self.touch();
    }

    async fn teardown(&self) {
        self.cancel.cancel();
        self.set_state(SessionState::Stopped);

        if let Some(done) = self.current_done.lock().take() {
            done.finish();
        }
        *self.current.write() = None;

        self.clear_now_playing_message().await;
        self.voice.stop().await;
        self.voice.disconnect().await;

        self.terminated.send_replace(true);
        self.save_signal.notify_one();
        info!("👋 Sesión de voz finalizada en {}", self.guild_name);
    }

    async fn run_monitor(&self) {
        let mut interval = tokio::time::interval(self.settings.monitor_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            if let Some(reason) = self.check_leave_conditions().await {
                match &reason {
                    LeaveReason::EmptyChannel => {
                        info!("🚪 Canal de voz vacío en {}, saliendo", self.guild_name)
                    }
                    LeaveReason::Inactivity(limit) => info!(
                        "💤 Sin actividad en {} durante {}, saliendo",
                        self.guild_name,
                        humantime::format_duration(*limit)
                    ),
                }
                self.send_notice(Notice::Leaving(reason)).await;
                self.stop().await;
                break;
            }
        }
        debug!("Monitor finalizado en {}", self.guild_name);
    }

    async fn check_leave_conditions(&self) -> Option<LeaveReason> {
        let now = Instant::now();

        if self.settings.auto_leave_empty {
            match self.voice.human_member_count().await {
                Some(0) => {
                    let mut since = self.empty_since.lock();
                    match *since {
                        None => {
                            *since = Some(now);
                            info!(
                                "🕳️ Canal vacío detectado en {}, saliendo en {}",
                                self.guild_name,
                                humantime::format_duration(self.settings.empty_channel_delay)
                            );
                        }
                        Some(started) if now.duration_since(started) >= self.settings.empty_channel_delay => {
                            return Some(LeaveReason::EmptyChannel);
                        }
                        Some(_) => {}
                    }
                }
                Some(_) => {
                    if self.empty_since.lock().take().is_some() {
                        debug!("👥 Canal ya no está vacío en {}", self.guild_name);
                    }
                }
                None => {}
            }
        }

        let idle_for = now.duration_since(*self.last_activity.lock());
        if idle_for < self.settings.inactivity_timeout {
            return None;
        }

        let queue_empty = self.queue.is_empty();
        let nothing_current = self.current.read().is_none();
        if queue_empty && nothing_current && !self.voice.is_playing().await {
            return Some(LeaveReason::Inactivity(self.settings.inactivity_timeout));
        }

        None
    }

    async fn send_notice(&self, notice: Notice) -> Option<MessageId> {
        match self.notifier.notify(notice).await {
            Ok(message) => Some(message),
            Err(e) => {
                warn!("No se pudo enviar mensaje al canal de {}: {:?}", self.guild_name, e);
                None
            }
        }
    }

    async fn report_failure(&self, track: &Track, reason: &str) {
        self.send_notice(Notice::TrackFailed {
            title: track.title.clone(),
            reason: reason.to_string(),
        })
        .await;
    }

    async fn replace_now_playing_message(&self, track: Track) {
        self.clear_now_playing_message().await;
        if let Some(message) = self.send_notice(Notice::NowPlaying(track)).await {
            *self.now_playing_message.lock() = Some(message);
        }
    }

    async fn clear_now_playing_message(&self) {
        let message = self.now_playing_message.lock().take();
        if let Some(message) = message {
            if let Err(e) = self.notifier.delete(message).await {
                debug!("No se pudo borrar el mensaje de reproducción en {}: {:?}", self.guild_name, e);
            }
        }
    }
}
