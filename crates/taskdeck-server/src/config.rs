use std::{env, error::Error, str::FromStr, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use taskdeck_core::constants::{DEFAULT_ALLOWED_ORIGINS, DEFAULT_PORT};
use taskdeck_core::remote::SupabaseConfig;
use tracing::{info, warn};

/// Which task table the server fronts.
#[derive(Debug, Clone)]
pub enum Backend {
    /// In-process table, scoped by bearer token. Lost on restart.
    Memory,
    Supabase(SupabaseConfig),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub backend: Backend,
    pub allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup, so tests need not touch the process env.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = match lookup("TASKDECK_PORT").or_else(|| lookup("PORT")) {
            Some(raw) => parse("TASKDECK_PORT", &raw)?,
            None => {
                info!("TASKDECK_PORT not set, using default: {DEFAULT_PORT}");
                DEFAULT_PORT
            }
        };

        let backend = match lookup("TASKDECK_BACKEND").as_deref() {
            None if lookup("SUPABASE_URL").is_some() => Backend::Supabase(supabase(&lookup)?),
            None => {
                info!("TASKDECK_BACKEND not set, using in-memory store");
                Backend::Memory
            }
            Some("memory") => Backend::Memory,
            Some("supabase") => Backend::Supabase(supabase(&lookup)?),
            Some(other) => bail!("Invalid TASKDECK_BACKEND value: {other} (expected memory or supabase)"),
        };

        let allowed_origins = match lookup("ALLOWED_ORIGINS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect(),
            None => {
                info!("ALLOWED_ORIGINS not set, using defaults");
                DEFAULT_ALLOWED_ORIGINS.iter().map(|o| o.to_string()).collect()
            }
        };

        Ok(Self {
            port,
            backend,
            allowed_origins,
        })
    }
}

fn supabase(lookup: &impl Fn(&str) -> Option<String>) -> Result<SupabaseConfig> {
    let url = lookup("SUPABASE_URL").ok_or_else(|| anyhow!("SUPABASE_URL is required for the supabase backend"))?;
    let key = lookup("SUPABASE_KEY")
        .or_else(|| lookup("SUPABASE_ANON_KEY"))
        .ok_or_else(|| anyhow!("SUPABASE_KEY is required for the supabase backend"))?;
    let timeout = match lookup("SUPABASE_TIMEOUT_SECS") {
        Some(raw) => Some(Duration::from_secs(parse("SUPABASE_TIMEOUT_SECS", &raw)?)),
        None => None,
    };
    if url.starts_with("http://") {
        warn!("SUPABASE_URL is not https");
    }
    Ok(SupabaseConfig { url, key, timeout })
}

fn parse<T: FromStr>(key: &str, raw: &str) -> Result<T>
where
    T::Err: Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("Invalid {key} value: {raw}"))
}
