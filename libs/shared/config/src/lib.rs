use std::env;
use tracing::warn;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: String,
    /// Shared secret the data store's database webhooks send in `x-webhook-secret`.
    pub supabase_webhook_secret: String,
    /// Outbound endpoint used to ask a patient to reschedule.
    pub reschedule_webhook_url: String,
    pub port: u16,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_JWT_SECRET not set, using empty value");
                    String::new()
                }),
            supabase_webhook_secret: env::var("SUPABASE_WEBHOOK_SECRET")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_WEBHOOK_SECRET not set, change ingestion disabled");
                    String::new()
                }),
            reschedule_webhook_url: env::var("RESCHEDULE_WEBHOOK_URL")
                .unwrap_or_else(|_| {
                    warn!("RESCHEDULE_WEBHOOK_URL not set, reschedule requests disabled");
                    String::new()
                }),
            port: env::var("PORT")
                .ok()
                .and_then(|value| match value.parse() {
                    Ok(port) => Some(port),
                    Err(_) => {
                        warn!("PORT is not a valid port number: {}, using default", value);
                        None
                    }
                })
                .unwrap_or(DEFAULT_PORT),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.supabase_url.is_empty()
            && !self.supabase_anon_key.is_empty()
            && !self.supabase_jwt_secret.is_empty()
    }

    pub fn is_reschedule_webhook_configured(&self) -> bool {
        !self.reschedule_webhook_url.is_empty()
    }

    pub fn is_change_ingestion_configured(&self) -> bool {
        !self.supabase_webhook_secret.is_empty()
    }
}
