use anyhow::{Context, Result};
use serenity::model::id::GuildId;
use std::{path::PathBuf, time::Duration};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub authorized_guilds: Vec<GuildId>,

    // Cola
    pub max_queue_size: usize,
    pub user_queue_limit: usize,

    // Persistencia
    pub enable_queue_persistence: bool,
    pub queue_persistence_file: PathBuf,
    pub queue_persistence_max_age_hours: u64,
    pub queue_save_interval_minutes: u64,

    // Sesiones de voz
    pub inactivity_timeout: Duration,
    pub monitor_interval: Duration,
    pub auto_leave_empty_channel: bool,
    pub empty_channel_leave_delay: Duration,

    // Extracción
    pub youtube_cookie_file: Option<PathBuf>,
    pub audio_format: String,
    pub max_concurrent_extractions: usize,
    pub extraction_timeout: Duration,
    pub max_playlist_size: usize,

    // Caché de resultados
    pub enable_performance_cache: bool,
    pub cache_max_size: usize,
    pub cache_max_age_hours: u64,
    pub cache_stale_hours: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            // Discord
            discord_token: std::env::var("DISCORD_TOKEN")
                .context("DISCORD_TOKEN no está definido")?,
            authorized_guilds: parse_guild_list(
                &std::env::var("AUTHORIZED_GUILD_IDS").unwrap_or_default(),
            )?,

            // Cola
            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            user_queue_limit: std::env::var("USER_QUEUE_LIMIT")
                .unwrap_or_else(|_| "20".to_string())
                .parse()?,

            // Persistencia
            enable_queue_persistence: parse_bool(
                &std::env::var("ENABLE_QUEUE_PERSISTENCE").unwrap_or_else(|_| "true".to_string()),
            )?,
            queue_persistence_file: std::env::var("QUEUE_PERSISTENCE_FILE")
                .unwrap_or_else(|_| "data/queue_state.json".to_string())
                .into(),
            queue_persistence_max_age_hours: std::env::var("QUEUE_PERSISTENCE_MAX_AGE_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            queue_save_interval_minutes: std::env::var("QUEUE_SAVE_INTERVAL_MINUTES")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,

            // Sesiones de voz
            inactivity_timeout: Duration::from_secs(
                std::env::var("INACTIVITY_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "180".to_string())
                    .parse()?,
            ),
            monitor_interval: Duration::from_secs(
                std::env::var("MONITOR_INTERVAL_SECS")
                    .unwrap_or_else(|_| "30".to_string())
                    .parse()?,
            ),
            auto_leave_empty_channel: parse_bool(
                &std::env::var("AUTO_LEAVE_EMPTY_CHANNEL").unwrap_or_else(|_| "true".to_string()),
            )?,
            empty_channel_leave_delay: Duration::from_secs(
                std::env::var("EMPTY_CHANNEL_LEAVE_DELAY")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            ),

            // Extracción
            youtube_cookie_file: std::env::var("YOUTUBE_COOKIE_FILE")
                .ok()
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            audio_format: std::env::var("AUDIO_FORMAT")
                .unwrap_or_else(|_| "bestaudio/best".to_string()),
            max_concurrent_extractions: std::env::var("MAX_CONCURRENT_EXTRACTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            extraction_timeout: Duration::from_secs(
                std::env::var("EXTRACTION_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "120".to_string())
                    .parse()?,
            ),
            max_playlist_size: std::env::var("MAX_PLAYLIST_SIZE")
                .unwrap_or_else(|_| "50".to_string())
                .parse()?,

            // Caché
            enable_performance_cache: parse_bool(
                &std::env::var("ENABLE_PERFORMANCE_CACHE").unwrap_or_else(|_| "true".to_string()),
            )?,
            cache_max_size: std::env::var("MAX_CACHE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            cache_max_age_hours: std::env::var("CACHE_MAX_AGE_HOURS")
                .unwrap_or_else(|_| "24".to_string())
                .parse()?,
            cache_stale_hours: std::env::var("CACHE_STALE_HOURS")
                .unwrap_or_else(|_| "6".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Queue size must be between 1 and 1000
    /// - Per-user limit must be between 1 and 100 (warns when it exceeds the queue size)
    /// - Persistence max age must be between 1 and 168 hours
    /// - Save interval must be between 1 and 60 minutes
    /// - Extraction concurrency and timeouts must be non-zero
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("DISCORD_TOKEN no puede estar vacío");
        }

        if !(1..=1000).contains(&self.max_queue_size) {
            anyhow::bail!(
                "MAX_QUEUE_SIZE debe estar entre 1 y 1000, recibido: {}",
                self.max_queue_size
            );
        }

        if !(1..=100).contains(&self.user_queue_limit) {
            anyhow::bail!(
                "USER_QUEUE_LIMIT debe estar entre 1 y 100, recibido: {}",
                self.user_queue_limit
            );
        }

        if self.user_queue_limit > self.max_queue_size {
            warn!(
                "⚠️ USER_QUEUE_LIMIT ({}) es mayor que MAX_QUEUE_SIZE ({})",
                self.user_queue_limit, self.max_queue_size
            );
        }

        if self.enable_queue_persistence {
            if !(1..=168).contains(&self.queue_persistence_max_age_hours) {
                anyhow::bail!(
                    "QUEUE_PERSISTENCE_MAX_AGE_HOURS debe estar entre 1 y 168, recibido: {}",
                    self.queue_persistence_max_age_hours
                );
            }

            if !(1..=60).contains(&self.queue_save_interval_minutes) {
                anyhow::bail!(
                    "QUEUE_SAVE_INTERVAL_MINUTES debe estar entre 1 y 60, recibido: {}",
                    self.queue_save_interval_minutes
                );
            }
        }

        if self.monitor_interval.is_zero() {
            anyhow::bail!("MONITOR_INTERVAL_SECS debe ser mayor que 0");
        }

        if self.max_concurrent_extractions == 0 {
            anyhow::bail!("MAX_CONCURRENT_EXTRACTIONS debe ser mayor que 0");
        }

        if self.extraction_timeout.is_zero() {
            anyhow::bail!("EXTRACTION_TIMEOUT_SECS debe ser mayor que 0");
        }

        if self.enable_performance_cache {
            if self.cache_max_size == 0 {
                anyhow::bail!("MAX_CACHE_SIZE debe ser mayor que 0");
            }
            if self.cache_stale_hours > self.cache_max_age_hours {
                anyhow::bail!(
                    "CACHE_STALE_HOURS ({}) no puede superar CACHE_MAX_AGE_HOURS ({})",
                    self.cache_stale_hours,
                    self.cache_max_age_hours
                );
            }
        }

        if let Some(cookies) = &self.youtube_cookie_file {
            if !cookies.exists() {
                warn!("🍪 Archivo de cookies no encontrado: {}", cookies.display());
            }
        }

        Ok(())
    }

    pub fn is_guild_authorized(&self, guild_id: GuildId) -> bool {
        self.authorized_guilds.is_empty() || self.authorized_guilds.contains(&guild_id)
    }

    pub fn persistence_max_age(&self) -> Duration {
        Duration::from_secs(self.queue_persistence_max_age_hours * 3600)
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.queue_save_interval_minutes * 60)
    }

    /// Returns a summary of the current configuration for logging.
    ///
    /// The Discord token is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: {} servidores autorizados\n  \
            Queue: {} max, {} por usuario\n  \
            Persistence: {} ({}, {}h max, cada {}min)\n  \
            Voice: inactividad {}, canal vacío {} (auto-leave={})\n  \
            Extraction: {} concurrentes, timeout {}, playlists de hasta {}\n  \
            Cache: {} ({} entradas, {}h TTL, {}h stale)",
            if self.authorized_guilds.is_empty() {
                "todos".to_string()
            } else {
                self.authorized_guilds.len().to_string()
            },
            self.max_queue_size,
            self.user_queue_limit,
            self.enable_queue_persistence,
            self.queue_persistence_file.display(),
            self.queue_persistence_max_age_hours,
            self.queue_save_interval_minutes,
            humantime::format_duration(self.inactivity_timeout),
            humantime::format_duration(self.empty_channel_leave_delay),
            self.auto_leave_empty_channel,
            self.max_concurrent_extractions,
            humantime::format_duration(self.extraction_timeout),
            self.max_playlist_size,
            self.enable_performance_cache,
            self.cache_max_size,
            self.cache_max_age_hours,
            self.cache_stale_hours,
        )
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            authorized_guilds: Vec::new(),

            max_queue_size: 100,
            user_queue_limit: 20,

            enable_queue_persistence: true,
            queue_persistence_file: "data/queue_state.json".into(),
            queue_persistence_max_age_hours: 24,
            queue_save_interval_minutes: 5,

            inactivity_timeout: Duration::from_secs(180),
            monitor_interval: Duration::from_secs(30),
            auto_leave_empty_channel: true,
            empty_channel_leave_delay: Duration::from_secs(10),

            youtube_cookie_file: None,
            audio_format: "bestaudio/best".to_string(),
            max_concurrent_extractions: 5,
            extraction_timeout: Duration::from_secs(120),
            max_playlist_size: 50,

            enable_performance_cache: true,
            cache_max_size: 1000,
            cache_max_age_hours: 24,
            cache_stale_hours: 6,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        other => anyhow::bail!("Valor booleano inválido: '{}'", other),
    }
}

fn parse_guild_list(value: &str) -> Result<Vec<GuildId>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            let raw: u64 = id
                .parse()
                .with_context(|| format!("ID de servidor inválido: '{}'", id))?;
            if raw == 0 {
                anyhow::bail!("ID de servidor inválido: '{}'", id);
            }
            Ok(GuildId::new(raw))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn valid() -> Config {
        Config {
            discord_token: "token".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_queue_size_bounds() {
        let mut config = valid();
        config.max_queue_size = 0;
        assert!(config.validate().is_err());

        config.max_queue_size = 1001;
        assert!(config.validate().is_err());

        config.max_queue_size = 1000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_user_limit_bounds() {
        let mut config = valid();
        config.user_queue_limit = 101;
        assert!(config.validate().is_err());

        // Mayor que la cola solo genera advertencia
        config.user_queue_limit = 50;
        config.max_queue_size = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_persistence_bounds_only_checked_when_enabled() {
        let mut config = valid();
        config.queue_persistence_max_age_hours = 200;
        assert!(config.validate().is_err());

        config.enable_queue_persistence = false;
        assert!(config.validate().is_ok());

        config.enable_queue_persistence = true;
        config.queue_persistence_max_age_hours = 24;
        config.queue_save_interval_minutes = 61;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_token_rejected() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_bool_variants() {
        for value in ["true", "1", "YES", "on", "enabled"] {
            assert!(parse_bool(value).unwrap());
        }
        for value in ["false", "0", "No", "off", "disabled"] {
            assert!(!parse_bool(value).unwrap());
        }
        assert!(parse_bool("maybe").is_err());
    }

    #[test]
    fn test_parse_guild_list() {
        assert_eq!(
            parse_guild_list(" 123, 456 ,,").unwrap(),
            vec![GuildId::new(123), GuildId::new(456)]
        );
        assert!(parse_guild_list("").unwrap().is_empty());
        assert!(parse_guild_list("abc").is_err());
        assert!(parse_guild_list("0").is_err());
    }

    #[test]
    fn test_guild_authorization() {
        let mut config = valid();
        assert!(config.is_guild_authorized(GuildId::new(1)));

        config.authorized_guilds = vec![GuildId::new(7)];
        assert!(config.is_guild_authorized(GuildId::new(7)));
        assert!(!config.is_guild_authorized(GuildId::new(1)));
    }

    #[test]
    fn test_summary_hides_token() {
        let mut config = valid();
        config.discord_token = "super-secret".to_string();
        assert!(!config.summary().contains("super-secret"));
    }
}
