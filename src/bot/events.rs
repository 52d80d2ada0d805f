use serenity::{async_trait, model::id::GuildId};
use songbird::{
    tracks::PlayMode, Event as VoiceEvent, EventContext, EventHandler as VoiceEventHandler,
};
use tracing::{debug, error};

use crate::audio::session::TrackDone;

/// Marca el track como terminado cuando Songbird lo finaliza
pub struct TrackEndHandler {
    pub guild_id: GuildId,
    pub done: TrackDone,
}

#[async_trait]
impl VoiceEventHandler for TrackEndHandler {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        debug!("🎵 Track terminó en guild {}", self.guild_id);
        self.done.finish();
        None
    }
}

/// Registra el error de reproducción y libera el ciclo de la sesión
pub struct TrackErrorHandler {
    pub guild_id: GuildId,
    pub done: TrackDone,
}

#[async_trait]
impl VoiceEventHandler for TrackErrorHandler {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<VoiceEvent> {
        let mut reason = None;
        if let EventContext::Track(track_list) = ctx {
            for (state, _handle) in *track_list {
                error!(
                    "❌ Error en track para guild {}: {:?}",
                    self.guild_id, state.playing
                );
                if let PlayMode::Errored(e) = &state.playing {
                    reason.get_or_insert_with(|| format!("{:?}", e));
                }
            }
        }

        self.done
            .fail(reason.unwrap_or_else(|| "error de reproducción".to_string()));
        None
    }
}
