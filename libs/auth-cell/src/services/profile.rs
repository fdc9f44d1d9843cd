use reqwest::Method;
use serde_json::Value;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;
use shared_models::error::AppError;
use shared_models::staff::{Position, UserProfile};

/// Resolves the staff profile that drives what a caller may do.
pub struct ProfileService {
    supabase: SupabaseClient,
}

impl ProfileService {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    pub async fn get_profile(&self, user_id: &str, auth_token: &str) -> Result<UserProfile, AppError> {
        debug!("Resolving staff profile for user {}", user_id);

        let path = format!("/rest/v1/user_profiles?id=eq.{}&limit=1", urlencoding::encode(user_id));
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppError::Database(e.to_string()))?;

        let row = result.into_iter().next().ok_or_else(|| {
            warn!("No staff profile for user {}", user_id);
            AppError::Forbidden("No staff profile is linked to this account".to_string())
        })?;

        let profile: UserProfile = serde_json::from_value(row)
            .map_err(|e| AppError::Database(format!("Failed to parse user profile: {}", e)))?;

        if profile.position == Position::Doctor && profile.doctor_id.is_none() {
            warn!("Doctor profile {} has no doctor_id", profile.id);
            return Err(AppError::Forbidden("Doctor profile is not linked to a doctor".to_string()));
        }

        Ok(profile)
    }

    /// Same as `get_profile`, but only nurses pass.
    pub async fn require_nurse(&self, user_id: &str, auth_token: &str) -> Result<UserProfile, AppError> {
        let profile = self.get_profile(user_id, auth_token).await?;
        if !profile.is_nurse() {
            warn!("User {} ({}) attempted a nurse-only action", user_id, profile.position);
            return Err(AppError::Forbidden("Only nurses can perform this action".to_string()));
        }
        Ok(profile)
    }
}

