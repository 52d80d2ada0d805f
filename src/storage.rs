use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serenity::model::id::GuildId;
use std::{collections::BTreeMap, future::Future, path::PathBuf, sync::Arc, time::Duration};
use tokio::{
    fs,
    sync::{watch, Notify},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    audio::{queue::QueueEntry, registry::GuildQueueState},
    config::Config,
};

/// Metadata guardada de una canción
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedTrack {
    pub title: String,
    pub requester_id: u64,
    pub requester_name: String,
}

impl From<&QueueEntry> for SavedTrack {
    fn from(entry: &QueueEntry) -> Self {
        Self {
            title: entry.title.clone(),
            requester_id: entry.requester.id.get(),
            requester_name: entry.requester.name.clone(),
        }
    }
}

/// Estado guardado de una guild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedGuild {
    pub guild_name: String,
    pub current_song: Option<SavedTrack>,
    #[serde(default)]
    pub queue: Vec<SavedTrack>,
    pub saved_at: i64,
}

/// Contenido del archivo: ID de guild → estado guardado
pub type Snapshot = BTreeMap<String, SavedGuild>;

/// Aviso de restauración para una guild
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreNotice {
    pub guild_name: String,
    pub queued: usize,
    pub was_playing: Option<String>,
}

/// Destino de los avisos de restauración (un canal de texto de la guild)
#[async_trait]
pub trait RestoreSink: Send + Sync {
    async fn notify_restore(&self, guild_id: GuildId, notice: &RestoreNotice) -> Result<()>;
}

/// Persistencia de colas en JSON.
///
/// Solo guarda metadata (títulos y solicitantes). Al reiniciar, las guilds con
/// un estado reciente reciben un aviso; nada se vuelve a encolar. Los guardados
/// esperan a que la restauración haya leído el archivo anterior.
pub struct QueuePersistence {
    path: PathBuf,
    max_age: Duration,
    restored: watch::Sender<bool>,
}

impl QueuePersistence {
    pub fn new(path: impl Into<PathBuf>, max_age: Duration) -> Self {
        let (restored, _) = watch::channel(false);
        Self {
            path: path.into(),
            max_age,
            restored,
        }
    }

    /// `None` cuando la persistencia está desactivada
    pub fn from_config(config: &Config) -> Option<Self> {
        if !config.enable_queue_persistence {
            info!("💾 Persistencia de colas desactivada");
            return None;
        }
        info!(
            "💾 Persistencia de colas en {}",
            config.queue_persistence_file.display()
        );
        Some(Self::new(
            config.queue_persistence_file.clone(),
            config.persistence_max_age(),
        ))
    }

    /// Guarda el estado de las guilds con contenido. Escritura atómica.
    pub async fn save(&self, states: &[GuildQueueState]) -> Result<usize> {
        let saved_at = Utc::now().timestamp();
        let snapshot: Snapshot = states
            .iter()
            .filter(|state| state.current.is_some() || !state.queued.is_empty())
            .map(|state| {
                (
                    state.guild_id.get().to_string(),
                    SavedGuild {
                        guild_name: state.guild_name.clone(),
                        current_song: state.current.as_ref().map(SavedTrack::from),
                        queue: state.queued.iter().map(SavedTrack::from).collect(),
                        saved_at,
                    },
                )
            })
            .collect();

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, content)
            .await
            .with_context(|| format!("No se pudo escribir {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .await
            .with_context(|| format!("No se pudo reemplazar {}", self.path.display()))?;

        debug!("💾 Estado de colas guardado ({} guilds)", snapshot.len());
        Ok(snapshot.len())
    }

    /// Lee el archivo. Ausente, vacío o corrupto se trata como vacío.
    pub async fn load(&self) -> Snapshot {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Snapshot::new(),
            Err(e) => {
                warn!("⚠️ No se pudo leer {}: {}", self.path.display(), e);
                return Snapshot::new();
            }
        };

        if content.trim().is_empty() {
            return Snapshot::new();
        }

        match serde_json::from_str(&content) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(
                    "⚠️ Archivo de colas inválido {}, se ignora: {}",
                    self.path.display(),
                    e
                );
                Snapshot::new()
            }
        }
    }

    pub async fn clear(&self) -> Result<()> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// El archivo anterior ya se leyó y se puede sobrescribir
    pub fn is_restored(&self) -> bool {
        *self.restored.borrow()
    }

    /// Avisa a cada guild con un estado reciente y borra el archivo.
    ///
    /// Devuelve la cantidad de avisos enviados. Habilita los guardados aunque falle.
    pub async fn restore_on_startup(&self, sink: &dyn RestoreSink) -> Result<usize> {
        let result = self.notify_saved_guilds(sink).await;
        self.restored.send_replace(true);
        result
    }

    async fn notify_saved_guilds(&self, sink: &dyn RestoreSink) -> Result<usize> {
        let snapshot = self.load().await;
        if snapshot.is_empty() {
            return Ok(0);
        }

        let now = Utc::now().timestamp();
        let max_age_secs = i64::try_from(self.max_age.as_secs()).unwrap_or(i64::MAX);
        let mut notified = 0;

        for (guild_key, saved) in &snapshot {
            let Ok(raw_id) = guild_key.parse::<u64>() else {
                warn!("⚠️ ID de guild inválido en el archivo de colas: {}", guild_key);
                continue;
            };
            if raw_id == 0 {
                continue;
            }

            let age_secs = now.saturating_sub(saved.saved_at).max(0);
            if age_secs > max_age_secs {
                info!(
                    "⏳ Estado de {} tiene {:.1}h, no se restaura",
                    saved.guild_name,
                    age_secs as f64 / 3600.0
                );
                continue;
            }

            let notice = RestoreNotice {
                guild_name: saved.guild_name.clone(),
                queued: saved.queue.len(),
                was_playing: saved.current_song.as_ref().map(|song| song.title.clone()),
            };

            match sink.notify_restore(GuildId::new(raw_id), &notice).await {
                Ok(()) => {
                    notified += 1;
                    info!("🔄 Aviso de restauración enviado a {}", saved.guild_name);
                }
                Err(e) => warn!(
                    "⚠️ No se pudo avisar la restauración en {}: {:?}",
                    saved.guild_name, e
                ),
            }
        }

        self.clear().await?;
        info!("🔄 Restauración completada: {} guilds avisadas", notified);
        Ok(notified)
    }

    /// Guarda cada `interval` y cada vez que se dispara `save_signal`, hasta
    /// que se cancela `shutdown`. Empieza después de `restore_on_startup`. El
    /// guardado final lo hace quien apaga el bot.
    ///
    /// `collect` produce el estado actual de las colas.
    pub async fn run_periodic<F, Fut>(
        self: Arc<Self>,
        interval: Duration,
        save_signal: Arc<Notify>,
        shutdown: CancellationToken,
        collect: F,
    ) where
        F: Fn() -> Fut + Send,
        Fut: Future<Output = Vec<GuildQueueState>> + Send,
    {
        let mut restored = self.restored.subscribe();
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Guardado periódico cancelado antes de restaurar");
                return;
            }
            _ = restored.wait_for(|done| *done) => {}
        }

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = save_signal.notified() => {}
            }

            let states = collect().await;
            match self.save(&states).await {
                Ok(count) => debug!("💾 Guardado periódico completado ({} colas activas)", count),
                Err(e) => error!("❌ Error en guardado periódico: {:?}", e),
            }
        }
        debug!("Guardado periódico finalizado");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::{Platform, Requester};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use serenity::model::id::UserId;

    #[derive(Default)]
    struct RecordingSink {
        notices: Mutex<Vec<(GuildId, RestoreNotice)>>,
        fail_for: Option<GuildId>,
    }

    #[async_trait]
    impl RestoreSink for RecordingSink {
        async fn notify_restore(&self, guild_id: GuildId, notice: &RestoreNotice) -> Result<()> {
            if self.fail_for == Some(guild_id) {
                anyhow::bail!("sin canal de texto");
            }
            self.notices.lock().push((guild_id, notice.clone()));
            Ok(())
        }
    }

    fn entry(title: &str, user: u64) -> QueueEntry {
        QueueEntry {
            title: title.to_string(),
            requester: Requester::new(UserId::new(user), format!("user{}", user)),
            platform: Platform::YouTube,
        }
    }

    fn state(guild: u64, current: Option<&str>, queued: &[&str]) -> GuildQueueState {
        GuildQueueState {
            guild_id: GuildId::new(guild),
            guild_name: format!("guild{}", guild),
            current: current.map(|title| entry(title, 1)),
            queued: queued.iter().map(|title| entry(title, 2)).collect(),
        }
    }

    fn persistence(dir: &tempfile::TempDir) -> QueuePersistence {
        QueuePersistence::new(
            dir.path().join("data").join("queue_state.json"),
            Duration::from_secs(24 * 3600),
        )
    }

    #[tokio::test]
    async fn test_save_writes_expected_format() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);

        let saved = store
            .save(&[state(1, Some("Now"), &["Next"]), state(2, None, &[])])
            .await
            .unwrap();
        assert_eq!(saved, 1);

        let raw = std::fs::read_to_string(dir.path().join("data/queue_state.json")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["1"]["guild_name"], "guild1");
        assert_eq!(value["1"]["current_song"]["title"], "Now");
        assert_eq!(value["1"]["current_song"]["requester_id"], 1);
        assert_eq!(value["1"]["queue"][0]["requester_name"], "user2");
        assert!(value["1"]["saved_at"].is_i64());
        assert!(value.get("2").is_none());
        assert!(!dir.path().join("data/queue_state.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_round_trip_notifies_fresh_guilds() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);
        store
            .save(&[state(1, Some("Now"), &["a", "b"]), state(2, None, &["c"])])
            .await
            .unwrap();

        let sink = RecordingSink::default();
        assert_eq!(store.restore_on_startup(&sink).await.unwrap(), 2);

        let notices = sink.notices.lock().clone();
        assert_eq!(
            notices,
            vec![
                (
                    GuildId::new(1),
                    RestoreNotice {
                        guild_name: "guild1".to_string(),
                        queued: 2,
                        was_playing: Some("Now".to_string()),
                    }
                ),
                (
                    GuildId::new(2),
                    RestoreNotice {
                        guild_name: "guild2".to_string(),
                        queued: 1,
                        was_playing: None,
                    }
                ),
            ]
        );

        // El archivo se limpia tras restaurar
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn test_old_entries_are_skipped_silently() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);
        let now = Utc::now().timestamp();

        let mut snapshot = Snapshot::new();
        for (id, age_hours) in [(1u64, 1i64), (2, 2), (3, 30)] {
            snapshot.insert(
                id.to_string(),
                SavedGuild {
                    guild_name: format!("guild{}", id),
                    current_song: None,
                    queue: vec![SavedTrack {
                        title: "x".to_string(),
                        requester_id: 5,
                        requester_name: "u".to_string(),
                    }],
                    saved_at: now - age_hours * 3600,
                },
            );
        }
        std::fs::create_dir_all(dir.path().join("data")).unwrap();
        std::fs::write(
            dir.path().join("data/queue_state.json"),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        let sink = RecordingSink::default();
        assert_eq!(store.restore_on_startup(&sink).await.unwrap(), 2);
        let guilds: Vec<GuildId> = sink.notices.lock().iter().map(|(id, _)| *id).collect();
        assert_eq!(guilds, vec![GuildId::new(1), GuildId::new(2)]);
    }

    #[tokio::test]
    async fn test_sink_failure_is_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);
        store
            .save(&[state(1, None, &["a"]), state(2, None, &["b"])])
            .await
            .unwrap();

        let sink = RecordingSink {
            fail_for: Some(GuildId::new(1)),
            ..RecordingSink::default()
        };
        assert_eq!(store.restore_on_startup(&sink).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_load_tolerates_missing_empty_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);
        let path = dir.path().join("data/queue_state.json");

        assert!(store.load().await.is_empty());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "   ").unwrap();
        assert!(store.load().await.is_empty());

        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load().await.is_empty());

        let sink = RecordingSink::default();
        assert_eq!(store.restore_on_startup(&sink).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_periodic_saves_on_signal_and_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(persistence(&dir));
        let signal = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(Arc::clone(&store).run_periodic(
            Duration::from_secs(300),
            Arc::clone(&signal),
            shutdown.clone(),
            || async { vec![state(4, None, &["queued"])] },
        ));

        store
            .restore_on_startup(&RecordingSink::default())
            .await
            .unwrap();
        signal.notify_one();
        let mut saved = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.load().await.contains_key("4") {
                saved = true;
                break;
            }
        }
        assert!(saved);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_saves_wait_for_restore() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(persistence(&dir));
        store.save(&[state(7, Some("Before restart"), &[])]).await.unwrap();

        let signal = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&store).run_periodic(
            Duration::from_secs(300),
            Arc::clone(&signal),
            shutdown.clone(),
            || async { vec![state(8, None, &["fresh"])] },
        ));

        // Sin restaurar, la señal no pisa el archivo anterior
        signal.notify_one();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!store.is_restored());
        let pending = store.load().await;
        assert!(pending.contains_key("7"));
        assert!(!pending.contains_key("8"));

        let sink = RecordingSink::default();
        assert_eq!(store.restore_on_startup(&sink).await.unwrap(), 1);
        assert_eq!(sink.notices.lock()[0].1.was_playing, Some("Before restart".to_string()));

        let mut saved = false;
        for _ in 0..200 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.load().await.contains_key("8") {
                saved = true;
                break;
            }
        }
        assert!(saved);

        shutdown.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unreadable_file_still_enables_saves() {
        let dir = tempfile::tempdir().unwrap();
        let store = persistence(&dir);
        // Un directorio en lugar del archivo no se puede leer
        std::fs::create_dir_all(dir.path().join("data/queue_state.json")).unwrap();

        assert!(!store.is_restored());
        assert_eq!(store.restore_on_startup(&RecordingSink::default()).await.unwrap(), 0);
        assert!(store.is_restored());
    }
}
