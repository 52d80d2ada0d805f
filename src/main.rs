use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::SerenityInit;
use std::{sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

mod audio;
mod bot;
mod cache;
mod config;
mod error;
mod sources;
mod storage;
mod ui;

use crate::audio::{registry::SessionRegistry, session::SessionSettings};
use crate::bot::MusicBot;
use crate::config::Config;
use crate::sources::{MediaResolver, YtDlpExtractor};
use crate::storage::QueuePersistence;

const SHUTDOWN_SAVE_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializar logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("open_music_queue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Iniciando Open Music Bot v{}", env!("CARGO_PKG_VERSION"));

    // Cargar configuración
    let config = Arc::new(Config::load()?);
    info!("{}", config.summary());

    let extractor = YtDlpExtractor::new(&config)?;

    // Manejar health check si es necesario
    if std::env::args().any(|arg| arg == "--health-check") {
        extractor.verify().await?;
        println!("OK");
        return Ok(());
    }

    if let Err(e) = extractor.verify().await {
        warn!("⚠️ {:?}. Las búsquedas fallarán hasta instalar yt-dlp", e);
    }

    let resolver = Arc::new(MediaResolver::new(Arc::new(extractor), &config));
    let registry = Arc::new(SessionRegistry::new(
        SessionSettings::from(config.as_ref()),
        config.max_queue_size,
        config.user_queue_limit,
    ));
    let persistence = QueuePersistence::from_config(&config).map(Arc::new);
    let shutdown = CancellationToken::new();

    // Guardado periódico de colas, empieza tras la restauración en cache_ready
    if let Some(persistence) = &persistence {
        let collect_from = Arc::clone(&registry);
        tokio::spawn(Arc::clone(persistence).run_periodic(
            config.save_interval(),
            registry.save_signal(),
            shutdown.clone(),
            move || {
                let registry = Arc::clone(&collect_from);
                async move { registry.guild_states().await }
            },
        ));
    }

    // Configurar intents mínimos necesarios
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_VOICE_STATES;

    // Crear handler del bot
    let handler = MusicBot::new(
        Arc::clone(&config),
        Arc::clone(&registry),
        resolver,
        persistence.clone(),
        reqwest::Client::new(),
    );

    // Construir cliente
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird()
        .await?;

    // Manejar shutdown graceful
    let shard_manager = Arc::clone(&client.shard_manager);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Error al registrar Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Señal de shutdown recibida, cerrando...");
        shutdown.cancel();

        if let Some(persistence) = persistence.as_ref().filter(|p| p.is_restored()) {
            let final_save = async {
                let states = registry.guild_states().await;
                persistence.save(&states).await
            };
            match tokio::time::timeout(SHUTDOWN_SAVE_TIMEOUT, final_save).await {
                Ok(Ok(count)) => info!("💾 Estado final guardado ({} colas)", count),
                Ok(Err(e)) => error!("❌ Error guardando el estado final: {:?}", e),
                Err(_) => warn!(
                    "⏰ El guardado final superó {}",
                    humantime::format_duration(SHUTDOWN_SAVE_TIMEOUT)
                ),
            }
        }

        registry.stop_all().await;
        shard_manager.shutdown_all().await;
    });

    // Iniciar bot
    info!("🚀 Bot iniciado exitosamente");
    if let Err(why) = client.start().await {
        error!("Error al ejecutar cliente: {:?}", why);
    }

    info!("👋 Open Music Bot detenido");
    Ok(())
}
