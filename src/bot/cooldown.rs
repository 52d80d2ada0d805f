use dashmap::DashMap;
use std::{collections::VecDeque, time::Duration};
use tokio::time::Instant;

/// Ámbito de un límite de uso
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    User,
    Guild,
}

#[derive(Debug, Clone, Copy)]
pub struct Rate {
    pub uses: usize,
    pub per: Duration,
    pub bucket: Bucket,
}

impl Rate {
    const fn new(uses: usize, per_secs: u64, bucket: Bucket) -> Self {
        Self {
            uses,
            per: Duration::from_secs(per_secs),
            bucket,
        }
    }
}

/// Límites por comando. Los comandos sin entrada no tienen enfriamiento.
pub fn rate_for(command: &str) -> Option<Rate> {
    match command {
        "play" => Some(Rate::new(3, 10, Bucket::User)),
        "skip" => Some(Rate::new(5, 10, Bucket::Guild)),
        "clear" => Some(Rate::new(2, 30, Bucket::Guild)),
        "remove" => Some(Rate::new(3, 5, Bucket::User)),
        _ => None,
    }
}

/// Ventana deslizante de usos por (comando, usuario o guild)
#[derive(Default)]
pub struct CooldownManager {
    windows: DashMap<(String, u64), VecDeque<Instant>>,
}

impl CooldownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registra un uso. `Err` con los segundos restantes si se excede el límite.
    pub fn check(&self, command: &str, rate: Rate, key: u64) -> Result<(), f64> {
        let now = Instant::now();
        let mut window = self.windows.entry((command.to_string(), key)).or_default();

        while window
            .front()
            .is_some_and(|used| now.duration_since(*used) >= rate.per)
        {
            window.pop_front();
        }

        if window.len() >= rate.uses {
            let oldest = window.front().copied().unwrap_or(now);
            let retry_after = rate.per.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.as_secs_f64());
        }

        window.push_back(now);
        Ok(())
    }

    /// Descarta ventanas sin usos recientes
    pub fn prune(&self, max_window: Duration) {
        let now = Instant::now();
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|last| now.duration_since(*last) < max_window)
        });
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}
