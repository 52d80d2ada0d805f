use serenity::{
    all::Timestamp,
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{
        queue::{QueueEntry, QueuePage, QueueSnapshot, Track},
        session::{LeaveReason, Notice},
    },
    error::ErrorReport,
    storage::RestoreNotice,
};

/// Paleta de colores estandarizada para el bot
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::from_rgb(67, 181, 129);
    pub const ERROR_RED: Colour = Colour::from_rgb(220, 53, 69);
    pub const WARNING_ORANGE: Colour = Colour::from_rgb(255, 193, 7);
    pub const INFO_BLUE: Colour = Colour::from_rgb(52, 144, 220);
    pub const MUSIC_PURPLE: Colour = Colour::from_rgb(138, 43, 226);
    pub const NEUTRAL_GRAY: Colour = Colour::from_rgb(108, 117, 125);
}

/// Footer estandarizado para todos los embeds
const STANDARD_FOOTER: &str = "🎵 Open Music Bot";

pub const QUEUE_PAGE_SIZE: usize = 10;

/// Crea un embed para mostrar la canción actual
pub fn create_now_playing_embed(track: &Track) -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Reproduciendo Ahora")
        .description(format!("**{}**", track.title))
        .color(colors::SUCCESS_GREEN)
        .field("👤 Solicitado por", format!("<@{}>", track.requester.id), true)
        .field("🔗 Fuente", track.platform.to_string(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed para mostrar que se agregó una canción
pub fn create_track_added_embed(track: &Track, position: usize) -> CreateEmbed {
    CreateEmbed::default()
        .title("✅ Canción Agregada")
        .description(format!(
            "**{}** se ha agregado a la cola de reproducción",
            track.title
        ))
        .color(colors::SUCCESS_GREEN)
        .field("📍 Posición", position.to_string(), true)
        .field("👤 Solicitado por", format!("<@{}>", track.requester.id), true)
        .field("🔗 Fuente", track.platform.to_string(), true)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(
            "🎵 Se reproducirá automáticamente si no hay música sonando",
        ))
}

/// Resultado de encolar una playlist
pub struct PlaylistSummary<'a> {
    pub title: Option<&'a str>,
    pub added: usize,
    pub failed: usize,
    pub rejected: usize,
}

/// Crea un embed para mostrar que una playlist fue agregada
pub fn create_playlist_added_embed(summary: &PlaylistSummary<'_>) -> CreateEmbed {
    let description = if summary.added == 1 {
        "Se agregó **1 canción** de la playlist a la cola de reproducción".to_string()
    } else {
        format!(
            "Se agregaron **{} canciones** de la playlist a la cola de reproducción",
            summary.added
        )
    };

    let mut embed = CreateEmbed::default()
        .title(format!(
            "📋 {}",
            summary.title.unwrap_or("Playlist Agregada")
        ))
        .description(description)
        .color(colors::MUSIC_PURPLE)
        .field("📊 Canciones agregadas", summary.added.to_string(), true);

    if summary.failed > 0 {
        embed = embed.field("⚠️ No disponibles", summary.failed.to_string(), true);
    }
    // Límite de cola alcanzado a mitad de la playlist
    if summary.rejected > 0 {
        embed = embed.field("🚫 Sin espacio en la cola", summary.rejected.to_string(), true);
    }

    embed
        .footer(CreateEmbedFooter::new(
            "🎵 La reproducción comenzará automáticamente • Usa /queue para ver todas las canciones",
        ))
        .timestamp(Timestamp::now())
}

/// Líneas numeradas de una página de la cola
pub fn format_queue_lines(page: &QueuePage) -> String {
    page.items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            format!(
                "**{}**. {} • <@{}>\n",
                page.first_position + i,
                item.title,
                item.requester.id
            )
        })
        .collect()
}

/// Crea un embed para mostrar la cola de reproducción
pub fn create_queue_embed(
    current: Option<&QueueEntry>,
    snapshot: &QueueSnapshot,
    page: usize,
) -> CreateEmbed {
    let mut embed = CreateEmbed::default()
        .title("📋 Cola de Reproducción")
        .color(colors::INFO_BLUE);

    if current.is_none() && snapshot.total_items() == 0 {
        return embed
            .description("😴 **La cola está vacía**\n\n💡 Usa `/play <canción>` para agregar música")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now());
    }

    if let Some(current) = current {
        embed = embed.field(
            "▶️ Reproduciendo",
            format!("**{}** • <@{}>", current.title, current.requester.id),
            false,
        );
    }

    let queue_page = snapshot.get_page(page, QUEUE_PAGE_SIZE);
    if !queue_page.items.is_empty() {
        embed = embed.field("Próximas canciones", format_queue_lines(&queue_page), false);
    }

    embed = embed.field(
        "Información",
        format!("**Total:** {} canciones en cola", queue_page.total_items),
        false,
    );

    if queue_page.total_pages > 1 {
        embed = embed.footer(CreateEmbedFooter::new(format!(
            "Página {} de {} • Open Music Bot",
            queue_page.current_page, queue_page.total_pages
        )));
    } else {
        embed = embed.footer(CreateEmbedFooter::new(STANDARD_FOOTER));
    }

    embed.timestamp(Timestamp::now())
}

/// Crea un embed de ayuda general
pub fn create_help_embed() -> CreateEmbed {
    CreateEmbed::default()
        .title("🎵 Open Music Bot - Guía")
        .color(colors::INFO_BLUE)
        .description("Bot de música con cola por servidor para YouTube y SoundCloud")
        .field(
            "🎵 Reproducción",
            "• `/play <canción>` - Reproduce una canción, URL o playlist\n\
            • `/skip` - Salta la canción actual\n\
            • `/nowplaying` - Muestra la canción actual",
            false,
        )
        .field(
            "📜 Cola",
            "• `/queue [página]` - Muestra la cola\n\
            • `/remove <posición>` - Quita una canción de la cola\n\
            • `/clear` - Limpia la cola",
            false,
        )
        .field(
            "🔊 Conexión",
            "• `/join` - Conecta al canal de voz\n\
            • `/leave` - Desconecta y limpia la cola",
            false,
        )
        .field(
            "🎵 Fuentes Soportadas",
            "• YouTube / YouTube Music\n\
            • SoundCloud\n\
            • Búsquedas de texto",
            false,
        )
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Embed de los avisos que publica una sesión
pub fn create_notice_embed(notice: &Notice) -> CreateEmbed {
    match notice {
        Notice::NowPlaying(track) => create_now_playing_embed(track),
        Notice::TrackFailed { title, reason } => create_error_embed(
            "No se pudo reproducir",
            &format!("**{}** se saltó.\n🔧 `{}`", title, reason),
        ),
        Notice::ReconnectFailed { title } => create_error_embed(
            "Conexión de voz perdida",
            &format!(
                "No pude reconectarme para reproducir **{}**. Usa /join para volver a conectarme.",
                title
            ),
        ),
        Notice::Leaving(LeaveReason::Inactivity(idle)) => CreateEmbed::default()
            .title("👋 Desconectado por inactividad")
            .description(format!(
                "Nadie usó el bot en {}. ¡Usa /play para volver a llamarme!",
                humantime::format_duration(*idle)
            ))
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now()),
        Notice::Leaving(LeaveReason::EmptyChannel) => CreateEmbed::default()
            .title("👋 Canal vacío")
            .description("Me quedé solo en el canal de voz, así que me desconecté.")
            .color(colors::NEUTRAL_GRAY)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
            .timestamp(Timestamp::now()),
    }
}

/// Texto del aviso de restauración tras un reinicio
pub fn format_restore_description(notice: &RestoreNotice) -> String {
    let mut description = String::from("El bot se reinició y la cola de este servidor se perdió.\n");
    if let Some(title) = &notice.was_playing {
        description.push_str(&format!("\n▶️ Estaba sonando: **{}**", title));
    }
    if notice.queued > 0 {
        description.push_str(&format!("\n📋 Canciones en cola: **{}**", notice.queued));
    }
    description.push_str("\n\n💡 Usa `/play` para volver a agregarlas.");
    description
}

pub fn create_restore_embed(notice: &RestoreNotice) -> CreateEmbed {
    CreateEmbed::default()
        .title("🔄 Bot Reiniciado")
        .description(format_restore_description(notice))
        .color(colors::WARNING_ORANGE)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Embed con el mensaje de un error de comando
pub fn create_report_embed(report: &ErrorReport) -> CreateEmbed {
    CreateEmbed::default()
        .description(&report.message)
        .color(colors::ERROR_RED)
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
        .timestamp(Timestamp::now())
}

/// Crea un embed de error
pub fn create_error_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("❌ {}", title))
        .description(description)
        .color(colors::ERROR_RED)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de éxito
pub fn create_success_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("✅ {}", title))
        .description(description)
        .color(colors::SUCCESS_GREEN)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

/// Crea un embed de información
pub fn create_info_embed(title: &str, description: &str) -> CreateEmbed {
    CreateEmbed::default()
        .title(format!("ℹ️ {}", title))
        .description(description)
        .color(colors::INFO_BLUE)
        .timestamp(Timestamp::now())
        .footer(CreateEmbedFooter::new(STANDARD_FOOTER))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::queue::{test_track, TrackQueue};
    use pretty_assertions::assert_eq;

    #[test]
    fn test_queue_lines_continue_numbering_across_pages() {
        let mut queue = TrackQueue::new(100, 100);
        for i in 0..12 {
            queue.add(test_track(&format!("Song{}", i), 7)).unwrap();
        }

        let page = queue.snapshot().get_page(2, QUEUE_PAGE_SIZE);
        assert_eq!(
            format_queue_lines(&page),
            "**11**. Song10 • <@7>\n**12**. Song11 • <@7>\n"
        );
    }

    #[test]
    fn test_restore_description() {
        let notice = RestoreNotice {
            guild_name: "Guild".to_string(),
            queued: 3,
            was_playing: Some("Song".to_string()),
        };
        let description = format_restore_description(&notice);
        assert!(description.contains("Estaba sonando: **Song**"));
        assert!(description.contains("Canciones en cola: **3**"));

        let empty = RestoreNotice {
            queued: 0,
            was_playing: None,
            ..notice
        };
        assert!(!format_restore_description(&empty).contains("Canciones en cola"));
    }
}
