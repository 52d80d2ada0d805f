//! Typed errors for queue, extraction and playback failures, plus the
//! translation of command failures into user-facing messages.

use chrono::Utc;
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{error, info, warn};

/// Errores de mutación de la cola de una guild.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueueError {
    #[error("La cola está llena (máximo {max} canciones)")]
    QueueFull { max: usize },

    #[error("Alcanzaste tu límite personal de {limit} canciones en la cola")]
    UserLimitExceeded { limit: usize, current: usize },

    #[error("Posición inválida {position}. La cola tiene {len} canciones")]
    InvalidPosition { position: usize, len: usize },
}

/// Fallos al convertir una consulta en un stream reproducible.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("El contenido tiene restricción de edad o requiere iniciar sesión")]
    AgeRestricted { music_url: Option<String> },

    #[error("Contenido privado o no disponible: {0}")]
    Unavailable(String),

    #[error("No se encontraron resultados para '{0}'")]
    NoResults(String),

    #[error("No se encontró un formato de audio reproducible")]
    NoStream,

    #[error("La extracción superó el tiempo límite de {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Error de extracción: {0}")]
    Failed(String),
}

/// Fallos locales del ciclo de reproducción. Nunca terminan la sesión.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackError {
    #[error("No se pudo preparar el audio: {0}")]
    Source(String),

    #[error("Error de conexión de voz: {0}")]
    Connection(String),

    #[error("Error del reproductor: {0}")]
    Player(String),

    #[error("Tiempo de espera agotado al {0}")]
    Timeout(&'static str),
}

/// Error de un comando antes de traducirlo a mensaje para el usuario.
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Playback(#[from] PlaybackError),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Debes estar en un canal de voz")]
    NotInVoice,

    #[error("No estoy conectado a ningún canal de voz")]
    NotConnected,

    #[error("La cola está vacía")]
    EmptyQueue,

    #[error("Este servidor no está autorizado para usar el bot")]
    Unauthorized,

    #[error("/{command} está en enfriamiento, intenta de nuevo en {retry_after:.1}s")]
    Cooldown { command: String, retry_after: f64 },

    #[error("Error de Discord: {0}")]
    Discord(#[from] serenity::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    UserInput,
    ResourceLimit,
    Extraction,
    Connection,
    System,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserInput => "user_input",
            ErrorCategory::ResourceLimit => "resource_limit",
            ErrorCategory::Extraction => "extraction",
            ErrorCategory::Connection => "connection",
            ErrorCategory::System => "system",
        }
    }

    fn emoji(&self) -> &'static str {
        match self {
            ErrorCategory::UserInput => "⚠️",
            ErrorCategory::ResourceLimit => "📊",
            ErrorCategory::Extraction => "🎵",
            ErrorCategory::Connection => "🔌",
            ErrorCategory::System => "❌",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ErrorCategory::UserInput => "Entrada inválida",
            ErrorCategory::ResourceLimit => "Límite alcanzado",
            ErrorCategory::Extraction => "No se pudo obtener el audio",
            ErrorCategory::Connection => "Problema de conexión",
            ErrorCategory::System => "Error inesperado",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resultado de traducir un [`BotError`]: identificador, categoría y mensaje final.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub error_id: String,
    pub category: ErrorCategory,
    pub message: String,
}

impl BotError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BotError::Queue(QueueError::InvalidPosition { .. })
            | BotError::InvalidInput(_)
            | BotError::NotInVoice
            | BotError::NotConnected
            | BotError::EmptyQueue
            | BotError::Unauthorized => ErrorCategory::UserInput,
            BotError::Queue(_) | BotError::Cooldown { .. } => ErrorCategory::ResourceLimit,
            BotError::Resolve(_) => ErrorCategory::Extraction,
            BotError::Playback(PlaybackError::Source(_)) => ErrorCategory::Extraction,
            BotError::Playback(_) | BotError::Discord(_) => ErrorCategory::Connection,
            BotError::Internal(_) => ErrorCategory::System,
        }
    }

    fn suggestion(&self) -> String {
        match self {
            BotError::Queue(QueueError::QueueFull { .. }) => {
                "Espera a que terminen algunas canciones o usa /clear".to_string()
            }
            BotError::Queue(QueueError::UserLimitExceeded { .. }) => {
                "Espera a que se reproduzcan tus canciones antes de agregar más".to_string()
            }
            BotError::Queue(QueueError::InvalidPosition { .. }) => {
                "Usa /queue para ver las posiciones válidas".to_string()
            }
            BotError::Resolve(ResolveError::AgeRestricted {
                music_url: Some(url),
            }) => format!("Prueba con el enlace de YouTube Music: {}", url),
            BotError::Resolve(ResolveError::AgeRestricted { music_url: None }) => {
                "Prueba con otra versión de la canción".to_string()
            }
            BotError::Resolve(ResolveError::NoResults(_)) => {
                "Revisa la ortografía o usa un enlace directo".to_string()
            }
            BotError::Resolve(ResolveError::Timeout(_)) => {
                "El servicio está lento, intenta de nuevo en unos segundos".to_string()
            }
            BotError::Resolve(_) | BotError::Playback(PlaybackError::Source(_)) => {
                "Prueba con otro enlace o término de búsqueda".to_string()
            }
            BotError::NotInVoice => "Únete a un canal de voz y vuelve a intentarlo".to_string(),
            BotError::NotConnected => "Usa /join o /play para conectarme".to_string(),
            BotError::EmptyQueue => "Usa /play para agregar música".to_string(),
            BotError::Unauthorized => "Contacta al administrador del bot".to_string(),
            BotError::Cooldown { .. } => "Espera un momento antes de repetir el comando".to_string(),
            BotError::InvalidInput(_) => "Revisa el texto ingresado".to_string(),
            BotError::Playback(_) | BotError::Discord(_) => {
                "Verifica mis permisos de conexión y habla en el canal".to_string()
            }
            BotError::Internal(_) => {
                "Intenta de nuevo; si persiste, reporta el identificador".to_string()
            }
        }
    }

    /// Registra el error con el nivel adecuado y construye el mensaje para el usuario.
    pub fn report(&self, context: &str) -> ErrorReport {
        let category = self.category();
        let error_id = error_id(category);

        match category {
            ErrorCategory::UserInput | ErrorCategory::ResourceLimit => {
                info!("⚠️ [{}] {}: {}", error_id, context, self)
            }
            ErrorCategory::Extraction | ErrorCategory::Connection => {
                warn!("⚠️ [{}] {}: {}", error_id, context, self)
            }
            ErrorCategory::System => error!("❌ [{}] {}: {:?}", error_id, context, self),
        }

        let description = match category {
            ErrorCategory::System => "Ocurrió un error interno al procesar el comando".to_string(),
            _ => self.to_string(),
        };

        let mut message = format!(
            "{} **{}**\n{}\n💡 **Sugerencia:** {}",
            category.emoji(),
            category.title(),
            description,
            self.suggestion()
        );

        if matches!(category, ErrorCategory::Extraction | ErrorCategory::Connection) {
            message.push_str(&format!("\n🔧 **Detalle:** `{}`", truncate(&self.to_string(), 180)));
        }
        message.push_str(&format!("\n🆔 `{}`", error_id));

        ErrorReport {
            error_id,
            category,
            message,
        }
    }
}

/// Identificador corto para correlacionar el mensaje del usuario con los logs.
pub fn error_id(category: ErrorCategory) -> String {
    format!("{}_{}", category.as_str(), Utc::now().timestamp_millis() % 1_000_000)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            BotError::from(QueueError::QueueFull { max: 10 }).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            BotError::from(QueueError::InvalidPosition { position: 3, len: 1 }).category(),
            ErrorCategory::UserInput
        );
        assert_eq!(
            BotError::from(ResolveError::NoStream).category(),
            ErrorCategory::Extraction
        );
        assert_eq!(
            BotError::from(PlaybackError::Connection("gone".into())).category(),
            ErrorCategory::Connection
        );
        assert_eq!(
            BotError::from(anyhow::anyhow!("boom")).category(),
            ErrorCategory::System
        );
    }

    #[test]
    fn test_error_id_format() {
        let id = error_id(ErrorCategory::Extraction);
        let (prefix, number) = id.rsplit_once('_').unwrap();
        assert_eq!(prefix, "extraction");
        assert!(number.parse::<u64>().unwrap() < 1_000_000);
    }

    #[test]
    fn test_system_report_hides_details() {
        let report = BotError::from(anyhow::anyhow!("secret stack detail")).report("test");
        assert_eq!(report.category, ErrorCategory::System);
        assert!(!report.message.contains("secret stack detail"));
        assert!(report.message.contains(&report.error_id));
    }

    #[test]
    fn test_age_restricted_report_suggests_music_link() {
        let report = BotError::from(ResolveError::AgeRestricted {
            music_url: Some("https://music.youtube.com/watch?v=abcdefghijk".to_string()),
        })
        .report("play");
        assert!(report
            .message
            .contains("https://music.youtube.com/watch?v=abcdefghijk"));
        assert!(report.message.contains("Detalle"));
    }

    #[test]
    fn test_resource_limit_report_includes_counts() {
        let report = BotError::from(QueueError::UserLimitExceeded { limit: 3, current: 3 })
            .report("play");
        assert!(report.message.contains('3'));
        assert!(!report.message.contains("Detalle"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abc", 5), "abc");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
