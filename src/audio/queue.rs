use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serenity::model::id::UserId;
use std::{
    collections::{HashMap, VecDeque},
    fmt,
    sync::Arc,
};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::QueueError;

/// Identidad de quien pidió una canción
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Requester {
    pub id: UserId,
    pub name: String,
}

impl Requester {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    YouTube,
    SoundCloud,
    Other(String),
}

impl Platform {
    /// Deriva la plataforma a partir del extractor reportado por yt-dlp
    pub fn from_extractor(extractor: &str) -> Self {
        let lower = extractor.to_lowercase();
        if lower.contains("youtube") {
            Platform::YouTube
        } else if lower.contains("soundcloud") {
            Platform::SoundCloud
        } else {
            Platform::Other(extractor.to_string())
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::YouTube => f.write_str("YouTube"),
            Platform::SoundCloud => f.write_str("SoundCloud"),
            Platform::Other(name) => f.write_str(name),
        }
    }
}

/// Canción lista para reproducirse. Inmutable una vez encolada.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub stream_url: String,
    pub title: String,
    pub platform: Platform,
    pub requester: Requester,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        stream_url: impl Into<String>,
        title: impl Into<String>,
        platform: Platform,
        requester: Requester,
    ) -> Self {
        Self {
            stream_url: stream_url.into(),
            title: title.into(),
            platform,
            requester,
            added_at: Utc::now(),
        }
    }
}

/// Metadata visible de una canción encolada
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub title: String,
    pub requester: Requester,
    pub platform: Platform,
}

impl From<&Track> for QueueEntry {
    fn from(track: &Track) -> Self {
        Self {
            title: track.title.clone(),
            requester: track.requester.clone(),
            platform: track.platform.clone(),
        }
    }
}

/// Cola FIFO de una guild con límites global y por usuario.
#[derive(Debug)]
pub struct TrackQueue {
    items: VecDeque<Track>,
    max_size: usize,
    user_limit: usize,
}

impl TrackQueue {
    pub fn new(max_size: usize, user_limit: usize) -> Self {
        Self {
            items: VecDeque::new(),
            max_size,
            user_limit,
        }
    }

    /// Agrega un track al final y devuelve su posición (1-based).
    ///
    /// Ningún error modifica la cola.
    pub fn add(&mut self, track: Track) -> Result<usize, QueueError> {
        if self.items.len() >= self.max_size {
            return Err(QueueError::QueueFull { max: self.max_size });
        }

        let current = self.user_count(track.requester.id);
        if current >= self.user_limit {
            return Err(QueueError::UserLimitExceeded {
                limit: self.user_limit,
                current,
            });
        }

        info!(
            "➕ Agregado a la cola: '{}' por {} (posición {})",
            track.title,
            track.requester.name,
            self.items.len() + 1
        );
        self.items.push_back(track);

        Ok(self.items.len())
    }

    /// Siguiente track en orden FIFO
    pub fn pop_front(&mut self) -> Option<Track> {
        let next = self.items.pop_front();
        if let Some(track) = &next {
            debug!("➡️ Siguiente en cola: {}", track.title);
        }
        next
    }

    /// Elimina el track en `position` (1-based). El resto conserva su orden.
    pub fn remove_at(&mut self, position: usize) -> Result<Track, QueueError> {
        let len = self.items.len();
        if position == 0 || position > len {
            return Err(QueueError::InvalidPosition { position, len });
        }

        let removed = self
            .items
            .remove(position - 1)
            .ok_or(QueueError::InvalidPosition { position, len })?;
        debug!("❌ Track eliminado en posición {}: {}", position, removed.title);
        Ok(removed)
    }

    pub fn clear(&mut self) -> usize {
        let removed = self.items.len();
        self.items.clear();
        if removed > 0 {
            info!("🗑️ Cola limpiada ({} canciones)", removed);
        }
        removed
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        let mut per_user: HashMap<UserId, usize> = HashMap::new();
        for track in &self.items {
            *per_user.entry(track.requester.id).or_default() += 1;
        }

        QueueSnapshot {
            entries: self.items.iter().map(QueueEntry::from).collect(),
            per_user,
        }
    }

    pub fn user_count(&self, user: UserId) -> usize {
        self.items
            .iter()
            .filter(|track| track.requester.id == user)
            .count()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn user_limit(&self) -> usize {
        self.user_limit
    }
}

/// Vista de solo lectura de una cola
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    pub entries: Vec<QueueEntry>,
    pub per_user: HashMap<UserId, usize>,
}

impl QueueSnapshot {
    pub fn total_items(&self) -> usize {
        self.entries.len()
    }

    /// Obtiene una página específica de la cola
    pub fn get_page(&self, page: usize, items_per_page: usize) -> QueuePage {
        let items_per_page = items_per_page.max(1);
        let total_pages = if self.entries.is_empty() {
            1
        } else {
            self.entries.len().div_ceil(items_per_page)
        };
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * items_per_page;
        let end = (start + items_per_page).min(self.entries.len());

        QueuePage {
            items: self.entries[start..end].to_vec(),
            first_position: start + 1,
            current_page,
            total_pages,
            total_items: self.entries.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueuePage {
    pub items: Vec<QueueEntry>,
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
    pub total_items: usize,
}

/// Cola compartida de una guild junto con la señal de "cola no vacía".
///
/// Los comandos encolan a través de [`QueueHandle::push`], que despierta al
/// ciclo de reproducción de la sesión si está esperando.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    tracks: Arc<Mutex<TrackQueue>>,
    ready: Arc<Notify>,
}

impl QueueHandle {
    pub fn new(queue: TrackQueue) -> Self {
        Self {
            tracks: Arc::new(Mutex::new(queue)),
            ready: Arc::new(Notify::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TrackQueue> {
        self.tracks.lock()
    }

    pub fn push(&self, track: Track) -> Result<usize, QueueError> {
        let position = self.tracks.lock().add(track)?;
        self.ready.notify_one();
        Ok(position)
    }

    pub fn pop_front(&self) -> Option<Track> {
        self.tracks.lock().pop_front()
    }

    pub fn snapshot(&self) -> QueueSnapshot {
        self.tracks.lock().snapshot()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.lock().is_empty()
    }

    pub(crate) fn ready(&self) -> &Notify {
        &self.ready
    }
}

#[cfg(test)]
pub(crate) fn test_track(title: &str, user: u64) -> Track {
    Track::new(
        format!("https://cdn.example/{}", title),
        title,
        Platform::YouTube,
        Requester::new(UserId::new(user), format!("user{}", user)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn titles(queue: &TrackQueue) -> Vec<String> {
        queue
            .snapshot()
            .entries
            .into_iter()
            .map(|entry| entry.title)
            .collect()
    }

    #[test]
    fn test_add_returns_positions_in_order() {
        let mut queue = TrackQueue::new(10, 10);
        assert_eq!(queue.add(test_track("a", 1)).unwrap(), 1);
        assert_eq!(queue.add(test_track("b", 2)).unwrap(), 2);
        assert_eq!(queue.add(test_track("c", 1)).unwrap(), 3);
        assert_eq!(titles(&queue), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_limits_scenario() {
        let mut queue = TrackQueue::new(2, 1);

        assert_eq!(queue.add(test_track("Song1", 1)), Ok(1));
        assert_eq!(
            queue.add(test_track("Song2", 1)),
            Err(QueueError::UserLimitExceeded { limit: 1, current: 1 })
        );
        assert_eq!(queue.add(test_track("Song3", 2)), Ok(2));
        assert_eq!(
            queue.add(test_track("Song4", 2)),
            Err(QueueError::QueueFull { max: 2 })
        );

        let snapshot = queue.snapshot();
        let entries: Vec<(String, UserId)> = snapshot
            .entries
            .iter()
            .map(|entry| (entry.title.clone(), entry.requester.id))
            .collect();
        assert_eq!(
            entries,
            vec![
                ("Song1".to_string(), UserId::new(1)),
                ("Song3".to_string(), UserId::new(2)),
            ]
        );
        assert_eq!(snapshot.per_user.get(&UserId::new(1)), Some(&1));
        assert_eq!(snapshot.per_user.get(&UserId::new(2)), Some(&1));
    }

    #[test]
    fn test_full_queue_does_not_mutate() {
        let mut queue = TrackQueue::new(1, 5);
        queue.add(test_track("a", 1)).unwrap();
        let before = queue.snapshot();

        assert!(queue.add(test_track("b", 2)).is_err());
        assert_eq!(queue.snapshot(), before);
    }

    #[test]
    fn test_user_limit_does_not_affect_others() {
        let mut queue = TrackQueue::new(10, 2);
        queue.add(test_track("a1", 1)).unwrap();
        queue.add(test_track("a2", 1)).unwrap();
        assert!(matches!(
            queue.add(test_track("a3", 1)),
            Err(QueueError::UserLimitExceeded { .. })
        ));
        assert_eq!(queue.add(test_track("b1", 2)), Ok(3));
    }

    #[test]
    fn test_user_limit_counts_current_contents() {
        let mut queue = TrackQueue::new(10, 1);
        queue.add(test_track("a1", 1)).unwrap();
        queue.remove_at(1).unwrap();
        assert_eq!(queue.add(test_track("a2", 1)), Ok(1));

        queue.pop_front().unwrap();
        assert_eq!(queue.add(test_track("a3", 1)), Ok(1));
    }

    #[test]
    fn test_remove_first_drains_fifo() {
        let mut queue = TrackQueue::new(10, 10);
        for title in ["a", "b", "c"] {
            queue.add(test_track(title, 1)).unwrap();
        }

        let drained: Vec<String> = (0..3)
            .map(|_| queue.remove_at(1).unwrap().title)
            .collect();
        assert_eq!(drained, vec!["a", "b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_remove_middle_keeps_order() {
        let mut queue = TrackQueue::new(10, 10);
        for title in ["a", "b", "c", "d"] {
            queue.add(test_track(title, 1)).unwrap();
        }

        assert_eq!(queue.remove_at(2).unwrap().title, "b");
        assert_eq!(titles(&queue), vec!["a", "c", "d"]);
    }

    #[test]
    fn test_remove_out_of_range() {
        let mut queue = TrackQueue::new(10, 10);
        queue.add(test_track("a", 1)).unwrap();

        assert_eq!(
            queue.remove_at(0),
            Err(QueueError::InvalidPosition { position: 0, len: 1 })
        );
        assert_eq!(
            queue.remove_at(2),
            Err(QueueError::InvalidPosition { position: 2, len: 1 })
        );
        assert_eq!(titles(&queue), vec!["a"]);
    }

    #[test]
    fn test_pop_and_clear() {
        let mut queue = TrackQueue::new(10, 10);
        assert!(queue.pop_front().is_none());

        queue.add(test_track("a", 1)).unwrap();
        queue.add(test_track("b", 1)).unwrap();
        assert_eq!(queue.pop_front().unwrap().title, "a");
        assert_eq!(queue.clear(), 1);
        assert_eq!(queue.clear(), 0);
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn test_snapshot_length_tracks_adds_and_removes() {
        let mut queue = TrackQueue::new(50, 50);
        let mut expected = 0usize;
        for i in 0..20u64 {
            queue.add(test_track(&format!("t{}", i), i % 4 + 1)).unwrap();
            expected += 1;
            if i % 3 == 0 {
                queue.remove_at(1).unwrap();
                expected -= 1;
            }
        }
        assert_eq!(queue.snapshot().total_items(), expected);
    }

    #[test]
    fn test_pagination() {
        let mut queue = TrackQueue::new(50, 50);
        for i in 0..25 {
            queue.add(test_track(&format!("t{}", i), 1)).unwrap();
        }
        let snapshot = queue.snapshot();

        let page = snapshot.get_page(3, 10);
        assert_eq!(page.items.len(), 5);
        assert_eq!(page.first_position, 21);
        assert_eq!(page.total_pages, 3);

        // Páginas fuera de rango se ajustan
        assert_eq!(snapshot.get_page(0, 10).current_page, 1);
        assert_eq!(snapshot.get_page(9, 10).current_page, 3);

        let empty = QueueSnapshot::default().get_page(1, 10);
        assert_eq!(empty.total_pages, 1);
        assert!(empty.items.is_empty());
    }

    #[test]
    fn test_platform_from_extractor() {
        assert_eq!(Platform::from_extractor("Youtube"), Platform::YouTube);
        assert_eq!(Platform::from_extractor("soundcloud"), Platform::SoundCloud);
        assert_eq!(
            Platform::from_extractor("Bandcamp"),
            Platform::Other("Bandcamp".to_string())
        );
    }

    #[tokio::test]
    async fn test_push_wakes_waiter() {
        let handle = QueueHandle::new(TrackQueue::new(5, 5));
        let waiter = {
            let handle = handle.clone();
            tokio::spawn(async move {
                handle.ready().notified().await;
                handle.pop_front().map(|track| track.title)
            })
        };

        tokio::task::yield_now().await;
        handle.push(test_track("wake", 1)).unwrap();
        assert_eq!(waiter.await.unwrap(), Some("wake".to_string()));
    }
}
