use anyhow::Result;
use serenity::{
    builder::{CreateEmbed, EditInteractionResponse},
    model::{
        application::CommandInteraction,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use std::sync::Arc;
use tracing::{info, warn};

use super::{
    cooldown::{rate_for, Bucket},
    validation::sanitize_query,
    voice::{ChannelNotifier, SongbirdHandle},
    MusicBot,
};
use crate::{
    audio::{
        queue::{QueueEntry, Requester},
        session::{GuildSession, SessionParts},
    },
    error::BotError,
    sources::is_playlist_url,
    ui::embeds::{self, PlaylistSummary},
};

type Session = Arc<GuildSession<SongbirdHandle>>;

/// Maneja comandos slash
pub async fn handle_command(
    ctx: &Context,
    command: CommandInteraction,
    bot: &MusicBot,
) -> Result<()> {
    let guild_id = command
        .guild_id
        .ok_or_else(|| anyhow::anyhow!("Comando usado fuera de un servidor"))?;

    info!(
        "📝 Comando /{} usado por {} en guild {}",
        command.data.name, command.user.name, guild_id
    );

    // /play y /join pueden tardar más que el límite de respuesta de Discord
    command.defer(&ctx.http).await?;

    let embed = match dispatch(ctx, &command, guild_id, bot).await {
        Ok(embed) => embed,
        Err(e) => {
            let report = e.report(&format!("/{} en guild {}", command.data.name, guild_id));
            embeds::create_report_embed(&report)
        }
    };

    command
        .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
        .await?;

    Ok(())
}

async fn dispatch(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> Result<CreateEmbed, BotError> {
    if !bot.config.is_guild_authorized(guild_id) {
        warn!("🚫 Comando rechazado en guild no autorizada {}", guild_id);
        return Err(BotError::Unauthorized);
    }

    let name = command.data.name.as_str();
    check_cooldown(bot, name, guild_id, command.user.id)?;

    match name {
        "play" => handle_play(ctx, command, guild_id, bot).await,
        "skip" => handle_skip(guild_id, bot).await,
        "nowplaying" => handle_nowplaying(guild_id, bot).await,
        "queue" => handle_queue(command, guild_id, bot).await,
        "remove" => handle_remove(command, guild_id, bot),
        "clear" => handle_clear(guild_id, bot),
        "join" => handle_join(ctx, command, guild_id, bot).await,
        "leave" => handle_leave(guild_id, bot).await,
        "help" => Ok(embeds::create_help_embed()),
        other => Err(BotError::InvalidInput(format!("Comando no reconocido: /{}", other))),
    }
}

fn check_cooldown(
    bot: &MusicBot,
    command: &str,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<(), BotError> {
    let Some(rate) = rate_for(command) else {
        return Ok(());
    };

    let key = match rate.bucket {
        Bucket::User => user_id.get(),
        Bucket::Guild => guild_id.get(),
    };

    bot.cooldowns
        .check(command, rate, key)
        .map_err(|retry_after| BotError::Cooldown {
            command: command.to_string(),
            retry_after,
        })
}

async fn handle_play(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> Result<CreateEmbed, BotError> {
    let raw = string_option(command, "query")
        .ok_or_else(|| BotError::InvalidInput("Debes indicar una canción o URL".to_string()))?;
    let query = sanitize_query(raw)?;

    let voice_channel = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    let requester = Requester::new(command.user.id, command.user.name.clone());

    if is_playlist_url(&query) {
        let playlist = bot.resolver.resolve_playlist(&query).await?;
        let session = connect_session(ctx, bot, guild_id, voice_channel, command.channel_id).await?;
        session.touch();

        let total = playlist.tracks.len();
        let mut added = 0;
        for resolved in playlist.tracks {
            match bot
                .registry
                .enqueue(guild_id, resolved.into_track(requester.clone()))
            {
                Ok(_) => added += 1,
                Err(e) if added == 0 => return Err(e.into()),
                Err(e) => {
                    info!("📋 Playlist cortada en {} de {}: {}", added, total, e);
                    break;
                }
            }
        }

        info!(
            "📋 Playlist en guild {}: {} agregadas, {} fallidas",
            guild_id, added, playlist.failed
        );

        return Ok(embeds::create_playlist_added_embed(&PlaylistSummary {
            title: playlist.title.as_deref(),
            added,
            failed: playlist.failed,
            rejected: total - added,
        }));
    }

    let resolved = bot.resolver.resolve(&query).await?;
    let session = connect_session(ctx, bot, guild_id, voice_channel, command.channel_id).await?;
    session.touch();

    let track = resolved.into_track(requester);
    let position = bot.registry.enqueue(guild_id, track.clone())?;
    info!("➕ {} agregada en posición {} (guild {})", track.title, position, guild_id);

    Ok(embeds::create_track_added_embed(&track, position))
}

async fn handle_skip(guild_id: GuildId, bot: &MusicBot) -> Result<CreateEmbed, BotError> {
    let session = bot.registry.get(guild_id).await.ok_or(BotError::NotConnected)?;
    let current = session.now_playing();

    if !session.skip().await {
        return Err(BotError::EmptyQueue);
    }
    session.touch();

    let title = current.map(|track| track.title).unwrap_or_default();
    Ok(embeds::create_success_embed(
        "Canción saltada",
        &format!("⏭️ **{}**", title),
    ))
}

async fn handle_nowplaying(guild_id: GuildId, bot: &MusicBot) -> Result<CreateEmbed, BotError> {
    let session = bot.registry.get(guild_id).await.ok_or(BotError::NotConnected)?;
    let track = session.now_playing().ok_or(BotError::EmptyQueue)?;
    Ok(embeds::create_now_playing_embed(&track))
}

async fn handle_queue(
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> Result<CreateEmbed, BotError> {
    let page = integer_option(command, "page")
        .and_then(|page| usize::try_from(page).ok())
        .unwrap_or(1);

    let current = bot
        .registry
        .get(guild_id)
        .await
        .and_then(|session| session.now_playing())
        .map(|track| QueueEntry::from(&track));
    let snapshot = bot.registry.queue(guild_id).snapshot();

    Ok(embeds::create_queue_embed(current.as_ref(), &snapshot, page))
}

fn handle_remove(
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> Result<CreateEmbed, BotError> {
    let position = integer_option(command, "position")
        .ok_or_else(|| BotError::InvalidInput("Debes indicar una posición".to_string()))?;
    let position = usize::try_from(position)
        .map_err(|_| BotError::InvalidInput(format!("Posición inválida: {}", position)))?;

    let removed = bot.registry.queue(guild_id).lock().remove_at(position)?;
    bot.registry.request_save();
    info!("🗑️ {} quitada de la cola (guild {})", removed.title, guild_id);

    Ok(embeds::create_success_embed(
        "Canción quitada",
        &format!("**{}** (posición {})", removed.title, position),
    ))
}

fn handle_clear(guild_id: GuildId, bot: &MusicBot) -> Result<CreateEmbed, BotError> {
    let removed = bot.registry.queue(guild_id).lock().clear();
    if removed == 0 {
        return Err(BotError::EmptyQueue);
    }
    bot.registry.request_save();

    Ok(embeds::create_success_embed(
        "Cola limpiada",
        &format!("Se quitaron **{}** canciones de la cola", removed),
    ))
}

async fn handle_join(
    ctx: &Context,
    command: &CommandInteraction,
    guild_id: GuildId,
    bot: &MusicBot,
) -> Result<CreateEmbed, BotError> {
    let voice_channel = get_user_voice_channel(ctx, guild_id, command.user.id)?;
    let session = connect_session(ctx, bot, guild_id, voice_channel, command.channel_id).await?;
    session.touch();

    Ok(embeds::create_success_embed(
        "Conectado",
        &format!("🔊 Conectado a <#{}>", voice_channel),
    ))
}

async fn handle_leave(guild_id: GuildId, bot: &MusicBot) -> Result<CreateEmbed, BotError> {
    let session = bot.registry.remove(guild_id).await.ok_or(BotError::NotConnected)?;
    session.stop().await;

    let cleared = bot.registry.queue(guild_id).lock().clear();
    bot.registry.request_save();

    Ok(embeds::create_info_embed(
        "Desconectado",
        &format!("👋 Salí del canal de voz y quité {} canciones de la cola", cleared),
    ))
}

// Funciones auxiliares

/// Sesión activa de la guild, o una nueva conectada al canal del usuario
async fn connect_session(
    ctx: &Context,
    bot: &MusicBot,
    guild_id: GuildId,
    voice_channel: ChannelId,
    text_channel: ChannelId,
) -> Result<Session, BotError> {
    let guild_name = guild_id
        .to_guild_cached(&ctx.cache)
        .map(|guild| guild.name.clone())
        .unwrap_or_else(|| guild_id.to_string());
    let http_client = bot.http_client.clone();

    let session = bot
        .registry
        .get_or_create(guild_id, move || async move {
            let voice = SongbirdHandle::connect(ctx, guild_id, voice_channel, http_client).await?;
            Ok(SessionParts {
                guild_name,
                voice: Arc::new(voice),
                notifier: Arc::new(ChannelNotifier::new(Arc::clone(&ctx.http), text_channel)),
            })
        })
        .await?;

    Ok(session)
}

fn get_user_voice_channel(
    ctx: &Context,
    guild_id: GuildId,
    user_id: UserId,
) -> Result<ChannelId, BotError> {
    let guild = guild_id
        .to_guild_cached(&ctx.cache)
        .ok_or_else(|| BotError::Internal(anyhow::anyhow!("Guild no encontrada en caché")))?;

    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
        .ok_or(BotError::NotInVoice)
}

fn string_option<'a>(command: &'a CommandInteraction, name: &str) -> Option<&'a str> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_str())
}

fn integer_option(command: &CommandInteraction, name: &str) -> Option<i64> {
    command
        .data
        .options
        .iter()
        .find(|opt| opt.name == name)
        .and_then(|opt| opt.value.as_i64())
}
