//! Conversión de consultas y URLs en streams reproducibles.
//!
//! [`MediaResolver`] aplica las cadenas de respaldo, límites de concurrencia,
//! timeouts y el cache de resultados sobre un [`Extractor`] (yt-dlp en
//! producción, ver [`ytdlp`]).

pub mod ytdlp;

pub use ytdlp::YtDlpExtractor;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use regex::Regex;
use serde::Deserialize;
use std::{
    future::Future,
    sync::{Arc, LazyLock},
    time::Duration,
};
use thiserror::Error;
use tokio::{sync::Semaphore, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    audio::queue::{Platform, Requester, Track},
    cache::{cache_key, CacheLookup, MusicCache},
    config::Config,
    error::ResolveError,
};

const PLAYLIST_TIMEOUT: Duration = Duration::from_secs(300);
const UNKNOWN_TITLE: &str = "Título desconocido";
const PREFERRED_EXTENSIONS: [&str; 3] = ["opus", "m4a", "mp3"];

static URL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)^https?://(www\.)?(youtube\.com|youtu\.be)/",
        r"(?i)^https?://(www\.)?soundcloud\.com/",
    ])
});

static PLAYLIST_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)^https?://(www\.)?youtube\.com/playlist\?list=",
        r"(?i)^https?://(www\.)?youtube\.com/watch\?.*[&?]list=",
        r"(?i)^https?://(www\.)?soundcloud\.com/.+/sets/",
        r"(?i)^https?://(www\.)?soundcloud\.com/.+/likes/?$",
    ])
});

static VIDEO_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:v=|/)([0-9A-Za-z_-]{11})").expect("regex de video ID"));

// yt-dlp: "ERROR: [youtube] <id>: <motivo>"
static ERROR_VIDEO_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\]\s*([0-9A-Za-z_-]{11}):").expect("regex de video ID en errores")
});

static TITLE_NOISE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile_all(&[
        r"(?i)\(Official Video\)",
        r"(?i)\(Official Music Video\)",
        r"(?i)\(Official Audio\)",
        r"(?i)\(Lyrics\)",
        r"(?i)\(Lyric Video\)",
        r"(?i)\(Audio\)",
        r"\[.*?\]",
        r"(?i)\bft\..*$",
        r"(?i)\bfeat\..*$",
        r"(?i)\bHD\b",
        r"(?i)\bHQ\b",
        r"(?i)\b4K\b",
        r"(?i)VEVO",
    ])
});

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("regex de espacios"));

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|pattern| Regex::new(pattern).expect("patrón constante válido"))
        .collect()
}

/// Salida JSON de yt-dlp (solo los campos que se usan)
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ExtractedMedia {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub webpage_url: Option<String>,
    #[serde(default, rename = "extractor_key")]
    pub extractor: Option<String>,
    #[serde(default, rename = "_type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub formats: Option<Vec<Option<MediaFormat>>>,
    #[serde(default)]
    pub entries: Option<Vec<Option<ExtractedMedia>>>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MediaFormat {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub ext: Option<String>,
}

impl ExtractedMedia {
    /// Primera entrada no nula de un resultado de búsqueda o playlist
    pub fn first_entry(self) -> Option<ExtractedMedia> {
        self.entries?.into_iter().flatten().next()
    }

    /// Entrada sin resolver de una extracción plana
    fn is_flat_reference(&self) -> bool {
        self.kind.as_deref() == Some("url")
    }
}

/// Fallo reportado por el extractor
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractionFailure {
    /// Restricción de edad, inicio de sesión, privado o bloqueo regional
    #[error("contenido restringido: {0}")]
    Restricted(String),

    #[error("contenido no disponible: {0}")]
    Unavailable(String),

    #[error("tiempo agotado tras {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

impl ExtractionFailure {
    /// Clasifica la salida de error de yt-dlp
    pub fn classify(stderr: &str) -> Self {
        const RESTRICTED: [&str; 9] = [
            "age-restricted",
            "age restricted",
            "confirm your age",
            "sign in",
            "private",
            "not available in your country",
            "blocked it in your country",
            "geo restricted",
            "geo-restricted",
        ];
        const UNAVAILABLE: [&str; 4] = [
            "video unavailable",
            "has been removed",
            "does not exist",
            "404",
        ];

        let lower = stderr.to_lowercase();
        let summary = summarize_stderr(stderr);

        if RESTRICTED.iter().any(|keyword| lower.contains(keyword)) {
            ExtractionFailure::Restricted(summary)
        } else if UNAVAILABLE.iter().any(|keyword| lower.contains(keyword)) {
            ExtractionFailure::Unavailable(summary)
        } else {
            ExtractionFailure::Failed(summary)
        }
    }
}

impl From<ExtractionFailure> for ResolveError {
    fn from(failure: ExtractionFailure) -> Self {
        match failure {
            ExtractionFailure::Restricted(_) => ResolveError::AgeRestricted { music_url: None },
            ExtractionFailure::Unavailable(detail) => ResolveError::Unavailable(detail),
            ExtractionFailure::Timeout(limit) => ResolveError::Timeout(limit),
            ExtractionFailure::Failed(detail) => ResolveError::Failed(detail),
        }
    }
}

/// Última línea de error de yt-dlp, recortada
fn summarize_stderr(stderr: &str) -> String {
    let line = stderr
        .lines()
        .rev()
        .find(|line| line.contains("ERROR"))
        .or_else(|| stderr.lines().rev().find(|line| !line.trim().is_empty()))
        .unwrap_or("error desconocido")
        .trim();
    line.chars().take(300).collect()
}

/// Interfaz con la librería de extracción
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extracción completa de una URL o búsqueda (`ytsearch:`, `scsearch:`)
    async fn extract(&self, reference: &str) -> Result<ExtractedMedia, ExtractionFailure>;

    /// Listado plano de una playlist, hasta `limit` entradas
    async fn extract_flat(
        &self,
        reference: &str,
        limit: usize,
    ) -> Result<ExtractedMedia, ExtractionFailure>;

    /// Título de un video de YouTube aunque no se pueda reproducir
    async fn lookup_title(&self, video_id: &str) -> Option<String>;
}

/// Resultado de resolver una consulta
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTrack {
    pub stream_url: String,
    pub title: String,
    pub platform: Platform,
}

impl ResolvedTrack {
    pub fn into_track(self, requester: Requester) -> Track {
        Track::new(self.stream_url, self.title, self.platform, requester)
    }
}

/// Canciones obtenidas de una playlist
#[derive(Debug, Clone, PartialEq)]
pub struct PlaylistResolution {
    pub title: Option<String>,
    pub tracks: Vec<ResolvedTrack>,
    pub failed: usize,
}

pub fn is_url(text: &str) -> bool {
    URL_PATTERNS.iter().any(|pattern| pattern.is_match(text))
}

pub fn is_playlist_url(text: &str) -> bool {
    PLAYLIST_PATTERNS.iter().any(|pattern| pattern.is_match(text))
}

fn is_youtube_url(text: &str) -> bool {
    URL_PATTERNS[0].is_match(text)
}

pub fn extract_video_id(url: &str) -> Option<String> {
    VIDEO_ID
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}

/// Video ID del mensaje de error de yt-dlp, o de una URL contenida en él
fn video_id_from_error(detail: &str) -> Option<String> {
    ERROR_VIDEO_ID
        .captures(detail)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
        .or_else(|| extract_video_id(detail))
}

/// Limpia un título de YouTube para buscarlo en SoundCloud
pub fn clean_title_for_search(title: &str) -> String {
    let cleaned = TITLE_NOISE
        .iter()
        .fold(title.to_string(), |text, pattern| {
            pattern.replace_all(&text, "").into_owned()
        });
    WHITESPACE.replace_all(&cleaned, " ").trim().to_string()
}

fn platform_for_url(url: &str) -> Platform {
    let lower = url.to_lowercase();
    if lower.contains("youtube.com") || lower.contains("youtu.be") {
        Platform::YouTube
    } else if lower.contains("soundcloud.com") {
        Platform::SoundCloud
    } else {
        Platform::Other("Desconocida".to_string())
    }
}

/// URL reproducible: `url` directo, luego un formato preferido, luego el primero
pub fn pick_stream(media: &ExtractedMedia) -> Option<String> {
    if let Some(url) = media.url.as_ref().filter(|url| !url.is_empty()) {
        return Some(url.clone());
    }

    let formats: Vec<&MediaFormat> = media
        .formats
        .as_ref()
        .map(|formats| formats.iter().flatten().collect())
        .unwrap_or_default();

    formats
        .iter()
        .find(|format| {
            format.url.is_some()
                && format
                    .ext
                    .as_deref()
                    .is_some_and(|ext| PREFERRED_EXTENSIONS.contains(&ext))
        })
        .or_else(|| formats.first())
        .and_then(|format| format.url.clone())
}

fn to_track(media: ExtractedMedia, platform: Platform) -> Result<ResolvedTrack, ResolveError> {
    let stream_url = pick_stream(&media).ok_or(ResolveError::NoStream)?;
    Ok(ResolvedTrack {
        stream_url,
        title: media
            .title
            .filter(|title| !title.trim().is_empty())
            .unwrap_or_else(|| UNKNOWN_TITLE.to_string()),
        platform,
    })
}

/// Resolución de consultas con cache, respaldos y límites
pub struct MediaResolver {
    extractor: Arc<dyn Extractor>,
    cache: Option<MusicCache>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    extraction_timeout: Duration,
    max_playlist_size: usize,
}

impl MediaResolver {
    pub fn new(extractor: Arc<dyn Extractor>, config: &Config) -> Self {
        Self::with_limits(
            extractor,
            MusicCache::from_config(config),
            config.max_concurrent_extractions,
            config.extraction_timeout,
            config.max_playlist_size,
        )
    }

    pub fn with_limits(
        extractor: Arc<dyn Extractor>,
        cache: Option<MusicCache>,
        max_concurrent: usize,
        extraction_timeout: Duration,
        max_playlist_size: usize,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            extractor,
            cache,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            extraction_timeout,
            max_playlist_size,
        }
    }

    pub fn cache(&self) -> Option<&MusicCache> {
        self.cache.as_ref()
    }

    /// Resuelve una URL o búsqueda, usando el cache cuando está activo.
    ///
    /// Una entrada vieja se intenta refrescar; solo se devuelve si la nueva
    /// resolución falla.
    pub async fn resolve(&self, query: &str) -> Result<ResolvedTrack, ResolveError> {
        let key = cache_key(query);
        let stale = match self.cache.as_ref().map(|cache| cache.get(&key)) {
            Some(CacheLookup::Fresh(track)) => {
                debug!("📦 Cache hit: {}", query);
                return Ok(track);
            }
            Some(CacheLookup::Stale(track)) => Some(track),
            Some(CacheLookup::Miss) | None => None,
        };

        match self.resolve_uncached(query).await {
            Ok(track) => {
                if let Some(cache) = &self.cache {
                    cache.insert(key, track.clone());
                }
                Ok(track)
            }
            Err(e) => match stale {
                Some(track) => {
                    warn!("⚠️ Usando resultado en cache para '{}' tras error: {}", query, e);
                    Ok(track)
                }
                None => Err(e),
            },
        }
    }

    async fn resolve_uncached(&self, query: &str) -> Result<ResolvedTrack, ResolveError> {
        if is_url(query) {
            self.resolve_url(query).await
        } else {
            self.resolve_search(query).await
        }
    }

    async fn resolve_url(&self, url: &str) -> Result<ResolvedTrack, ResolveError> {
        debug!("🔗 Extrayendo: {}", url);
        match self.extract(url).await {
            Ok(media) => {
                let platform = media
                    .extractor
                    .as_deref()
                    .map(Platform::from_extractor)
                    .unwrap_or_else(|| platform_for_url(url));
                to_track(media, platform)
            }
            Err(ExtractionFailure::Restricted(detail)) => {
                self.restricted_fallback(url, &detail).await
            }
            Err(failure) => Err(failure.into()),
        }
    }

    /// YouTube Music, luego SoundCloud por título, luego error con sugerencia
    async fn restricted_fallback(
        &self,
        url: &str,
        detail: &str,
    ) -> Result<ResolvedTrack, ResolveError> {
        warn!("🔞 Contenido restringido ({}): {}", detail, url);

        let video_id = if is_youtube_url(url) {
            extract_video_id(url)
        } else {
            None
        };
        let Some(video_id) = video_id else {
            return Err(ResolveError::Unavailable(detail.to_string()));
        };

        let music_url = format!("https://music.youtube.com/watch?v={}", video_id);
        info!("🎵 Intentando YouTube Music: {}", music_url);
        match self.extract(&music_url).await {
            Ok(media) => match to_track(media, Platform::Other("YouTube Music".to_string())) {
                Ok(track) => return Ok(track),
                Err(e) => debug!("YouTube Music sin stream: {}", e),
            },
            Err(e) => debug!("YouTube Music falló: {}", e),
        }

        if let Some(title) = self.lookup_title(&video_id).await {
            match self.soundcloud_by_title(&title).await {
                Ok(track) => return Ok(track),
                Err(e) => debug!("Respaldo en SoundCloud falló: {}", e),
            }
        }

        Err(ResolveError::AgeRestricted {
            music_url: Some(music_url),
        })
    }

    async fn soundcloud_by_title(&self, title: &str) -> Result<ResolvedTrack, ResolveError> {
        let search = clean_title_for_search(title);
        if search.is_empty() {
            return Err(ResolveError::NoResults(title.to_string()));
        }

        info!("☁️ Buscando en SoundCloud: {}", search);
        let media = self.extract(&format!("scsearch1:{}", search)).await?;
        let entry = media
            .first_entry()
            .ok_or_else(|| ResolveError::NoResults(search.clone()))?;
        to_track(entry, Platform::SoundCloud)
    }

    /// YouTube primero, SoundCloud después
    async fn resolve_search(&self, query: &str) -> Result<ResolvedTrack, ResolveError> {
        info!("🔍 Buscando: {}", query);
        let mut timed_out = None;

        match self.extract(&format!("ytsearch:{}", query)).await {
            Ok(media) => match media.first_entry().map(|entry| to_track(entry, Platform::YouTube)) {
                Some(Ok(track)) => return Ok(track),
                Some(Err(e)) => warn!("⚠️ Resultado de YouTube sin stream: {}", e),
                None => debug!("YouTube sin resultados para '{}'", query),
            },
            Err(ExtractionFailure::Restricted(detail)) => {
                if let Some(track) = self.restricted_search_fallback(&detail).await {
                    return Ok(track);
                }
            }
            Err(ExtractionFailure::Timeout(limit)) => {
                warn!("⏰ Búsqueda en YouTube agotó el tiempo");
                timed_out = Some(limit);
            }
            Err(e) => warn!("⚠️ Búsqueda en YouTube falló: {}", e),
        }

        match self.extract(&format!("scsearch:{}", query)).await {
            Ok(media) => {
                if let Some(entry) = media.first_entry() {
                    return to_track(entry, Platform::SoundCloud);
                }
            }
            Err(ExtractionFailure::Timeout(limit)) => {
                warn!("⏰ Búsqueda en SoundCloud agotó el tiempo");
                timed_out = Some(limit);
            }
            Err(e) => warn!("⚠️ Búsqueda en SoundCloud falló: {}", e),
        }

        match timed_out {
            Some(limit) => Err(ResolveError::Timeout(limit)),
            None => Err(ResolveError::NoResults(query.to_string())),
        }
    }

    /// El primer resultado de YouTube está restringido: se busca su título en SoundCloud
    async fn restricted_search_fallback(&self, detail: &str) -> Option<ResolvedTrack> {
        let video_id = video_id_from_error(detail)?;
        let title = self.lookup_title(&video_id).await?;
        self.soundcloud_by_title(&title).await.ok()
    }

    /// Resuelve todas las canciones de una playlist en paralelo.
    ///
    /// Las canciones que fallan se cuentan pero no abortan la playlist. Los
    /// resultados no pasan por el cache.
    pub async fn resolve_playlist(&self, url: &str) -> Result<PlaylistResolution, ResolveError> {
        match timeout(PLAYLIST_TIMEOUT, self.resolve_playlist_entries(url)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("⏰ Playlist agotó el tiempo: {}", url);
                Err(ResolveError::Timeout(PLAYLIST_TIMEOUT))
            }
        }
    }

    async fn resolve_playlist_entries(&self, url: &str) -> Result<PlaylistResolution, ResolveError> {
        info!("📋 Procesando playlist: {}", url);
        let listing = self
            .bounded(self.extractor.extract_flat(url, self.max_playlist_size))
            .await
            .map_err(|failure| match failure {
                ExtractionFailure::Restricted(detail) => ResolveError::Unavailable(detail),
                other => other.into(),
            })?;

        let playlist_title = listing.title.clone();
        let platform = platform_for_url(url);
        let entries: Vec<ExtractedMedia> = listing
            .entries
            .unwrap_or_default()
            .into_iter()
            .flatten()
            .take(self.max_playlist_size)
            .collect();
        let total = entries.len();

        if total == 0 {
            return Err(ResolveError::NoResults(url.to_string()));
        }

        let mut results: Vec<(usize, Result<ResolvedTrack, ResolveError>)> =
            stream::iter(entries.into_iter().enumerate())
                .map(|(index, entry)| {
                    let platform = platform.clone();
                    async move { (index, self.resolve_entry(entry, platform).await) }
                })
                .buffer_unordered(self.max_concurrent)
                .collect()
                .await;
        results.sort_by_key(|(index, _)| *index);

        let mut tracks = Vec::with_capacity(total);
        let mut failed = 0;
        for (index, result) in results {
            match result {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    failed += 1;
                    debug!("Canción {} de la playlist falló: {}", index + 1, e);
                }
            }
        }

        if tracks.is_empty() {
            return Err(ResolveError::NoResults(url.to_string()));
        }

        info!(
            "✅ Playlist procesada: {}/{} canciones ({} fallidas)",
            tracks.len(),
            total,
            failed
        );

        Ok(PlaylistResolution {
            title: playlist_title,
            tracks,
            failed,
        })
    }

    async fn resolve_entry(
        &self,
        entry: ExtractedMedia,
        platform: Platform,
    ) -> Result<ResolvedTrack, ResolveError> {
        if !entry.is_flat_reference() && pick_stream(&entry).is_some() {
            return to_track(entry, platform);
        }

        let reference = entry
            .url
            .clone()
            .or(entry.webpage_url.clone())
            .ok_or(ResolveError::NoStream)?;
        self.resolve_url(&reference).await
    }

    async fn extract(&self, reference: &str) -> Result<ExtractedMedia, ExtractionFailure> {
        self.bounded(self.extractor.extract(reference)).await
    }

    async fn lookup_title(&self, video_id: &str) -> Option<String> {
        let _permit = self.permits.acquire().await.ok()?;
        timeout(self.extraction_timeout, self.extractor.lookup_title(video_id))
            .await
            .ok()
            .flatten()
    }

    /// Una llamada al extractor con permiso del semáforo y límite de tiempo
    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, ExtractionFailure>>,
    ) -> Result<T, ExtractionFailure> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| ExtractionFailure::Failed("extractor cerrado".to_string()))?;

        match timeout(self.extraction_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ExtractionFailure::Timeout(self.extraction_timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const TIMEOUT: Duration = Duration::from_secs(120);

    fn media(title: &str, url: &str, extractor: &str) -> ExtractedMedia {
        ExtractedMedia {
            title: Some(title.to_string()),
            url: Some(url.to_string()),
            extractor: Some(extractor.to_string()),
            ..ExtractedMedia::default()
        }
    }

    fn search_result(entries: Vec<ExtractedMedia>) -> ExtractedMedia {
        ExtractedMedia {
            kind: Some("playlist".to_string()),
            entries: Some(entries.into_iter().map(Some).collect()),
            ..ExtractedMedia::default()
        }
    }

    fn resolver(mock: MockExtractor) -> MediaResolver {
        MediaResolver::with_limits(Arc::new(mock), None, 5, TIMEOUT, 50)
    }

    fn restricted() -> ExtractionFailure {
        ExtractionFailure::classify("ERROR: [youtube] abc: Sign in to confirm your age")
    }

    #[test]
    fn test_url_detection() {
        assert!(is_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(is_url("https://youtu.be/dQw4w9WgXcQ"));
        assert!(is_url("HTTPS://SoundCloud.com/artist/track"));
        assert!(!is_url("never gonna give you up"));
        assert!(!is_url("https://example.com/song.mp3"));
    }

    #[test]
    fn test_playlist_detection() {
        assert!(is_playlist_url("https://www.youtube.com/playlist?list=PL123"));
        assert!(is_playlist_url("https://youtube.com/watch?v=dQw4w9WgXcQ&list=PL123"));
        assert!(is_playlist_url("https://soundcloud.com/artist/sets/album"));
        assert!(is_playlist_url("https://soundcloud.com/artist/likes"));
        assert!(!is_playlist_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"));
        assert!(!is_playlist_url("https://soundcloud.com/artist/track"));
    }

    #[test]
    fn test_video_id_extraction() {
        assert_eq!(
            extract_video_id("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            extract_video_id("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(extract_video_id("https://youtube.com/"), None);
    }

    #[test]
    fn test_video_id_from_yt_dlp_error() {
        assert_eq!(
            video_id_from_error(
                "ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm your age. This video may be inappropriate"
            ),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(
            video_id_from_error("ERROR: blocked https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
        assert_eq!(video_id_from_error("ERROR: Sign in to confirm your age"), None);
    }

    #[test]
    fn test_clean_title_for_search() {
        assert_eq!(
            clean_title_for_search("Artist - Song (Official Music Video) [Remastered] HD"),
            "Artist - Song"
        );
        assert_eq!(clean_title_for_search("Song (Lyrics) feat. Someone"), "Song");
        assert_eq!(clean_title_for_search("Shadow   of   VEVO"), "Shadow of");
    }

    #[test]
    fn test_classify_failures() {
        assert!(matches!(restricted(), ExtractionFailure::Restricted(_)));
        assert!(matches!(
            ExtractionFailure::classify("ERROR: Private video"),
            ExtractionFailure::Restricted(_)
        ));
        assert!(matches!(
            ExtractionFailure::classify("ERROR: [youtube] x: Video unavailable"),
            ExtractionFailure::Unavailable(_)
        ));
        assert_eq!(
            ExtractionFailure::classify("WARNING: slow\nERROR: boom\n"),
            ExtractionFailure::Failed("ERROR: boom".to_string())
        );
    }

    #[test]
    fn test_pick_stream_preference() {
        let format = |ext: &str, url: Option<&str>| {
            Some(MediaFormat {
                ext: Some(ext.to_string()),
                url: url.map(str::to_string),
            })
        };

        let direct = media("t", "https://direct", "Youtube");
        assert_eq!(pick_stream(&direct), Some("https://direct".to_string()));

        let with_formats = ExtractedMedia {
            formats: Some(vec![
                format("webm", Some("https://webm")),
                None,
                format("m4a", Some("https://m4a")),
            ]),
            ..ExtractedMedia::default()
        };
        assert_eq!(pick_stream(&with_formats), Some("https://m4a".to_string()));

        let fallback = ExtractedMedia {
            formats: Some(vec![format("webm", Some("https://webm"))]),
            ..ExtractedMedia::default()
        };
        assert_eq!(pick_stream(&fallback), Some("https://webm".to_string()));

        assert_eq!(pick_stream(&ExtractedMedia::default()), None);
    }

    #[test]
    fn test_yt_dlp_json_shape() {
        let json = r#"{
            "id": "dQw4w9WgXcQ",
            "title": "Song",
            "extractor": "youtube",
            "extractor_key": "Youtube",
            "formats": [null, {"ext": "m4a", "url": "https://m4a", "abr": 128}],
            "entries": null
        }"#;
        let parsed: ExtractedMedia = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.extractor.as_deref(), Some("Youtube"));
        assert_eq!(pick_stream(&parsed), Some("https://m4a".to_string()));
    }

    #[tokio::test]
    async fn test_search_prefers_youtube() {
        let mut mock = MockExtractor::new();
        mock.expect_extract()
            .times(1)
            .returning(|reference| {
                assert_eq!(reference, "ytsearch:never gonna");
                Ok(search_result(vec![media("Never Gonna", "https://yt", "Youtube")]))
            });

        let track = resolver(mock).resolve("never gonna").await.unwrap();
        assert_eq!(
            track,
            ResolvedTrack {
                stream_url: "https://yt".to_string(),
                title: "Never Gonna".to_string(),
                platform: Platform::YouTube,
            }
        );
    }

    #[tokio::test]
    async fn test_search_falls_back_to_soundcloud() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|reference| {
            if reference.starts_with("ytsearch:") {
                Err(ExtractionFailure::Failed("ERROR: network".to_string()))
            } else {
                assert_eq!(reference, "scsearch:song");
                Ok(search_result(vec![media("SC Song", "https://sc", "Soundcloud")]))
            }
        });

        let track = resolver(mock).resolve("song").await.unwrap();
        assert_eq!(track.platform, Platform::SoundCloud);
        assert_eq!(track.stream_url, "https://sc");
    }

    #[tokio::test]
    async fn test_restricted_search_hit_uses_soundcloud_title_search() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|reference| {
            if reference.starts_with("ytsearch:") {
                Err(ExtractionFailure::classify(
                    "ERROR: [youtube] dQw4w9WgXcQ: Sign in to confirm your age. \
                     This video may be inappropriate for some users.",
                ))
            } else {
                assert_eq!(reference, "scsearch1:Artist - Song");
                Ok(search_result(vec![media("SC Song", "https://sc1", "Soundcloud")]))
            }
        });
        mock.expect_lookup_title()
            .times(1)
            .returning(|video_id| {
                assert_eq!(video_id, "dQw4w9WgXcQ");
                Some("Artist - Song (Official Video)".to_string())
            });

        let track = resolver(mock).resolve("artist song").await.unwrap();
        assert_eq!(track.platform, Platform::SoundCloud);
        assert_eq!(track.stream_url, "https://sc1");
    }

    #[tokio::test]
    async fn test_search_without_results() {
        let mut mock = MockExtractor::new();
        mock.expect_extract()
            .times(2)
            .returning(|_| Ok(search_result(Vec::new())));

        let err = resolver(mock).resolve("nothing here").await.unwrap_err();
        assert_eq!(err, ResolveError::NoResults("nothing here".to_string()));
    }

    #[tokio::test]
    async fn test_restricted_url_uses_youtube_music() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|reference| {
            if reference.starts_with("https://music.youtube.com/") {
                assert_eq!(reference, "https://music.youtube.com/watch?v=dQw4w9WgXcQ");
                Ok(media("Song", "https://ytm", "Youtube"))
            } else {
                Err(restricted())
            }
        });

        let track = resolver(mock)
            .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap();
        assert_eq!(track.platform, Platform::Other("YouTube Music".to_string()));
        assert_eq!(track.stream_url, "https://ytm");
    }

    #[tokio::test]
    async fn test_restricted_url_falls_back_to_soundcloud_title_search() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|reference| {
            if reference.starts_with("scsearch1:") {
                assert_eq!(reference, "scsearch1:Artist - Song");
                Ok(search_result(vec![media("Song", "https://sc", "Soundcloud")]))
            } else {
                Err(restricted())
            }
        });
        mock.expect_lookup_title()
            .times(1)
            .returning(|_| Some("Artist - Song (Official Video) [4K]".to_string()));

        let track = resolver(mock)
            .resolve("https://youtu.be/dQw4w9WgXcQ")
            .await
            .unwrap();
        assert_eq!(track.platform, Platform::SoundCloud);
        assert_eq!(track.stream_url, "https://sc");
    }

    #[tokio::test]
    async fn test_restricted_url_suggests_youtube_music_when_all_fail() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|_| Err(restricted()));
        mock.expect_lookup_title().returning(|_| None);

        let err = resolver(mock)
            .resolve("https://www.youtube.com/watch?v=dQw4w9WgXcQ")
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ResolveError::AgeRestricted {
                music_url: Some("https://music.youtube.com/watch?v=dQw4w9WgXcQ".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_url_without_stream() {
        let mut mock = MockExtractor::new();
        mock.expect_extract().returning(|_| {
            Ok(ExtractedMedia {
                title: Some("Song".to_string()),
                ..ExtractedMedia::default()
            })
        });

        let err = resolver(mock)
            .resolve("https://soundcloud.com/artist/track")
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::NoStream);
    }

    struct SlowExtractor;

    #[async_trait]
    impl Extractor for SlowExtractor {
        async fn extract(&self, _reference: &str) -> Result<ExtractedMedia, ExtractionFailure> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(ExtractedMedia::default())
        }

        async fn extract_flat(
            &self,
            _reference: &str,
            _limit: usize,
        ) -> Result<ExtractedMedia, ExtractionFailure> {
            tokio::time::sleep(Duration::from_secs(600)).await;
            Ok(ExtractedMedia::default())
        }

        async fn lookup_title(&self, _video_id: &str) -> Option<String> {
            None
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_extraction_timeout_is_typed() {
        let resolver = MediaResolver::with_limits(Arc::new(SlowExtractor), None, 5, TIMEOUT, 50);
        let err = resolver
            .resolve("https://soundcloud.com/artist/track")
            .await
            .unwrap_err();
        assert_eq!(err, ResolveError::Timeout(TIMEOUT));

        let err = resolver.resolve("slow search").await.unwrap_err();
        assert_eq!(err, ResolveError::Timeout(TIMEOUT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_fresh_hit_and_stale_fallback() {
        const HOUR: Duration = Duration::from_secs(3600);
        let mut mock = MockExtractor::new();
        let mut calls = 0;
        mock.expect_extract().times(3).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(search_result(vec![media("Song", "https://yt", "Youtube")]))
            } else {
                Err(ExtractionFailure::Failed("ERROR: offline".to_string()))
            }
        });

        let cache = MusicCache::new(10, 24 * HOUR, 6 * HOUR);
        let resolver = MediaResolver::with_limits(Arc::new(mock), Some(cache), 5, TIMEOUT, 50);

        let first = resolver.resolve("Song").await.unwrap();
        // Misma consulta normalizada: servida desde el cache sin extraer
        let cached = resolver.resolve("  song ").await.unwrap();
        assert_eq!(first, cached);

        tokio::time::advance(7 * HOUR).await;
        // Entrada vieja: YouTube y SoundCloud fallan al refrescar
        let stale = resolver.resolve("song").await.unwrap();
        assert_eq!(stale, first);
    }

    #[tokio::test]
    async fn test_playlist_counts_failures_and_keeps_order() {
        let mut mock = MockExtractor::new();
        mock.expect_extract_flat().times(1).returning(|_, limit| {
            assert_eq!(limit, 50);
            let flat = |id: &str| ExtractedMedia {
                kind: Some("url".to_string()),
                url: Some(format!("https://www.youtube.com/watch?v={}", id)),
                ..ExtractedMedia::default()
            };
            Ok(ExtractedMedia {
                title: Some("Mix".to_string()),
                entries: Some(vec![
                    Some(flat("aaaaaaaaaaa")),
                    None,
                    Some(flat("bbbbbbbbbbb")),
                    Some(flat("ccccccccccc")),
                ]),
                ..ExtractedMedia::default()
            })
        });
        mock.expect_extract().returning(|reference| {
            if reference.ends_with("bbbbbbbbbbb") {
                Err(ExtractionFailure::Unavailable("ERROR: Video unavailable".to_string()))
            } else {
                let id = &reference[reference.len() - 11..];
                Ok(media(id, &format!("https://stream/{}", id), "Youtube"))
            }
        });

        let playlist = resolver(mock)
            .resolve_playlist("https://www.youtube.com/playlist?list=PL1")
            .await
            .unwrap();

        let titles: Vec<&str> = playlist.tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(titles, vec!["aaaaaaaaaaa", "ccccccccccc"]);
        assert_eq!(playlist.failed, 1);
        assert_eq!(playlist.title.as_deref(), Some("Mix"));
    }

    #[tokio::test]
    async fn test_empty_playlist_is_an_error() {
        let mut mock = MockExtractor::new();
        mock.expect_extract_flat()
            .returning(|_, _| Ok(ExtractedMedia::default()));

        let err = resolver(mock)
            .resolve_playlist("https://soundcloud.com/artist/sets/empty")
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::NoResults(_)));
    }
}
