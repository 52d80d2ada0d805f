use anyhow::{Context, Result};
use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::{path::PathBuf, time::Duration};
use tracing::{debug, info, warn};

use super::{ExtractedMedia, ExtractionFailure, Extractor};
use crate::config::Config;

/// Respuesta del endpoint oEmbed de YouTube
#[derive(Debug, Deserialize)]
struct OEmbed {
    title: Option<String>,
}

/// Extractor basado en el ejecutable `yt-dlp`
pub struct YtDlpExtractor {
    binary: String,
    audio_format: String,
    cookie_file: Option<PathBuf>,
    http: reqwest::Client,
}

impl YtDlpExtractor {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .context("No se pudo crear el cliente HTTP")?;

        let cookie_file = config.youtube_cookie_file.clone().filter(|path| {
            let exists = path.exists();
            if exists {
                info!("🍪 Cookies encontradas en: {}", path.display());
            } else {
                warn!("🍪 Archivo de cookies no encontrado: {}", path.display());
            }
            exists
        });

        Ok(Self {
            binary: "yt-dlp".to_string(),
            audio_format: config.audio_format.clone(),
            cookie_file,
            http,
        })
    }

    /// Verifica que yt-dlp pueda ejecutarse y devuelve su versión
    pub async fn verify(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .output()
            .await
            .context("yt-dlp no está instalado o no está en PATH")?;

        if !output.status.success() {
            anyhow::bail!("yt-dlp no puede ejecutarse correctamente");
        }

        let version = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!("✅ yt-dlp versión: {}", version);
        Ok(version)
    }

    fn base_command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(["--dump-single-json", "--no-warnings", "--skip-download"])
            .kill_on_drop(true);
        if let Some(cookies) = &self.cookie_file {
            cmd.arg("--cookies").arg(cookies);
        }
        cmd
    }

    async fn run_json(&self, mut cmd: Command) -> Result<ExtractedMedia, ExtractionFailure> {
        let output = cmd
            .output()
            .await
            .map_err(|e| ExtractionFailure::Failed(format!("no se pudo ejecutar yt-dlp: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ExtractionFailure::classify(&stderr));
        }

        // El JSON de una playlist puede ser grande
        tokio::task::spawn_blocking(move || serde_json::from_slice::<ExtractedMedia>(&output.stdout))
            .await
            .map_err(|e| ExtractionFailure::Failed(format!("tarea de parseo falló: {}", e)))?
            .map_err(|e| ExtractionFailure::Failed(format!("JSON inválido de yt-dlp: {}", e)))
    }

    async fn oembed_title(&self, video_id: &str) -> Option<String> {
        let watch_url = format!("https://www.youtube.com/watch?v={}", video_id);
        let endpoint = format!(
            "https://www.youtube.com/oembed?url={}&format=json",
            urlencoding::encode(&watch_url)
        );

        let response = self.http.get(&endpoint).send().await.ok()?;
        if !response.status().is_success() {
            debug!("oEmbed respondió {} para {}", response.status(), video_id);
            return None;
        }
        response.json::<OEmbed>().await.ok()?.title
    }
}

#[async_trait]
impl Extractor for YtDlpExtractor {
    async fn extract(&self, reference: &str) -> Result<ExtractedMedia, ExtractionFailure> {
        debug!("📊 yt-dlp: {}", reference);
        let mut cmd = self.base_command();
        cmd.args(["--no-playlist", "-f", self.audio_format.as_str(), reference]);
        self.run_json(cmd).await
    }

    async fn extract_flat(
        &self,
        reference: &str,
        limit: usize,
    ) -> Result<ExtractedMedia, ExtractionFailure> {
        debug!("📋 yt-dlp (plano, máx {}): {}", limit, reference);
        let mut cmd = self.base_command();
        cmd.args(["--flat-playlist", "--playlist-end", &limit.to_string(), reference]);
        self.run_json(cmd).await
    }

    async fn lookup_title(&self, video_id: &str) -> Option<String> {
        let watch_url = format!("https://www.youtube.com/watch?v={}", video_id);
        let mut cmd = self.base_command();
        cmd.args(["--flat-playlist", "--no-playlist", watch_url.as_str()]);

        match self.run_json(cmd).await {
            Ok(media) if media.title.is_some() => media.title,
            Ok(_) => self.oembed_title(video_id).await,
            Err(e) => {
                debug!("Título vía yt-dlp falló ({}), probando oEmbed", e);
                self.oembed_title(video_id).await
            }
        }
    }
}
