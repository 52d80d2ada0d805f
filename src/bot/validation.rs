use regex::Regex;
use std::sync::LazyLock;

use crate::{error::BotError, sources::is_url};

const MAX_URL_LENGTH: usize = 2000;
const MAX_SEARCH_LENGTH: usize = 500;

static DANGEROUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<script|javascript:|data:|vbscript:|onload\s*=|onerror\s*=")
        .expect("patrón de validación inválido")
});

/// Normaliza y valida la consulta de `/play`
pub fn sanitize_query(raw: &str) -> Result<String, BotError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BotError::InvalidInput("La búsqueda no puede estar vacía".to_string()));
    }

    if DANGEROUS.is_match(trimmed) {
        return Err(BotError::InvalidInput(
            "La búsqueda contiene contenido no permitido".to_string(),
        ));
    }

    let cleaned = trimmed
        .chars()
        .filter(|c| !c.is_control() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        return Err(BotError::InvalidInput("La búsqueda no puede estar vacía".to_string()));
    }

    let length = cleaned.chars().count();
    if is_url(&cleaned) {
        if length > MAX_URL_LENGTH {
            return Err(BotError::InvalidInput(format!(
                "La URL es demasiado larga (máximo {} caracteres)",
                MAX_URL_LENGTH
            )));
        }
    } else if length > MAX_SEARCH_LENGTH {
        return Err(BotError::InvalidInput(format!(
            "La búsqueda es demasiado larga (máximo {} caracteres)",
            MAX_SEARCH_LENGTH
        )));
    }

    Ok(cleaned)
}
