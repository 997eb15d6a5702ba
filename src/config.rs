//! Environment-driven configuration.
//!
//! Every subsystem gets its own config struct; `Config::from_env` assembles
//! them all. Secrets are held as [`SecretString`] so they never end up in
//! debug output or logs.

use std::collections::HashSet;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default TTL for cached tool results (matches the upstream agents' 120h).
const DEFAULT_CACHE_TTL_SECS: u64 = 60 * 60 * 120;

/// Default TTL for inbound-delivery dedup markers.
const DEFAULT_DEDUP_TTL_SECS: u64 = 60 * 60;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub approvals: ApprovalConfig,
    pub tracker: TrackerConfig,
    pub deploys: DeployConfig,
    pub forge: ForgeConfig,
    /// Optional: mailing-list operations are disabled when unset.
    pub mailing: Option<MailingConfig>,
    pub store: StoreConfig,
    pub cache: CacheConfig,
    pub dedup: DedupConfig,
    pub inbound: InboundConfig,
}

/// Webhook server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Svix-style signing secret for inbound webhooks.
    pub webhook_secret: Option<SecretString>,
    /// Skip signature verification entirely (local debugging only).
    pub disable_webhook_verification: bool,
}

/// Planner / summarizer LLM settings.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    /// Model used for squashing tool output; defaults to `model`.
    pub squash_model: String,
}

/// Human-approval transport settings.
#[derive(Debug, Clone)]
pub struct ApprovalConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

/// Issue tracker settings.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

/// Deployment platform settings.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    pub base_url: String,
    pub token: SecretString,
    pub team_id: String,
    pub project_id: String,
}

/// Git forge settings (tags, commits, workflow dispatch).
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    pub base_url: String,
    pub token: SecretString,
    pub owner: String,
    pub repo: String,
    /// Workflow file dispatched when a deployment promotion is approved.
    pub promote_workflow: String,
}

/// Mailing list settings.
#[derive(Debug, Clone)]
pub struct MailingConfig {
    pub base_url: String,
    pub api_key: SecretString,
}

/// Persistence settings. Without a database URL the agent falls back to an
/// in-memory store, which loses suspended threads on restart.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub database_url: Option<SecretString>,
    pub pool_size: usize,
    /// Optional expiry for persisted thread snapshots. `None` keeps
    /// suspended threads indefinitely.
    pub snapshot_ttl: Option<Duration>,
}

/// Result cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
}

/// Dedup guard settings.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub ttl: Duration,
}

/// Inbound message filtering and prefill behavior.
#[derive(Debug, Clone)]
pub struct InboundConfig {
    /// Senders allowed to open email threads; empty set allows everyone.
    pub allowed_source_emails: HashSet<String>,
    /// Addresses the agent accepts mail for; empty set allows all targets.
    pub allowed_target_emails: HashSet<String>,
    /// Run the read-only context prefill before the first planning pass of a
    /// new email thread.
    pub prefill_context: bool,
}

impl Config {
    /// Load the full configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig {
                host: optional("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parsed_or("PORT", 8000)?,
                webhook_secret: optional("WEBHOOK_SIGNING_SECRET").map(SecretString::from),
                disable_webhook_verification: flag("DEBUG_DISABLE_WEBHOOK_VERIFICATION"),
            },
            llm: LlmConfig::from_env()?,
            approvals: ApprovalConfig {
                base_url: optional("APPROVALS_API_BASE")
                    .unwrap_or_else(|| "https://api.humanlayer.dev/humanlayer/v1".to_string()),
                api_key: SecretString::from(required("APPROVALS_API_KEY")?),
            },
            tracker: TrackerConfig {
                base_url: optional("TRACKER_API_BASE")
                    .unwrap_or_else(|| "https://api.tracker.example.com/v1".to_string()),
                api_key: SecretString::from(required("TRACKER_API_KEY")?),
            },
            deploys: DeployConfig {
                base_url: optional("DEPLOY_API_BASE")
                    .unwrap_or_else(|| "https://api.vercel.com".to_string()),
                token: SecretString::from(required("DEPLOY_BEARER_TOKEN")?),
                team_id: required("DEPLOY_TEAM_ID")?,
                project_id: required("DEPLOY_PROJECT_ID")?,
            },
            forge: ForgeConfig {
                base_url: optional("FORGE_API_BASE")
                    .unwrap_or_else(|| "https://api.github.com".to_string()),
                token: SecretString::from(required("FORGE_TOKEN")?),
                owner: required("FORGE_OWNER")?,
                repo: required("FORGE_REPO")?,
                promote_workflow: optional("FORGE_PROMOTE_WORKFLOW")
                    .unwrap_or_else(|| "promote-to-prod.yaml".to_string()),
            },
            mailing: optional("MAILING_API_KEY").map(|key| MailingConfig {
                base_url: optional("MAILING_API_BASE")
                    .unwrap_or_else(|| "https://app.loops.so/api/v1".to_string()),
                api_key: SecretString::from(key),
            }),
            store: StoreConfig {
                database_url: optional("DATABASE_URL").map(SecretString::from),
                pool_size: parsed_or("DATABASE_POOL_SIZE", 8)?,
                snapshot_ttl: optional_secs("SNAPSHOT_TTL_SECS")?,
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(parsed_or("CACHE_TTL_SECS", DEFAULT_CACHE_TTL_SECS)?),
            },
            dedup: DedupConfig {
                ttl: Duration::from_secs(parsed_or("DEDUP_TTL_SECS", DEFAULT_DEDUP_TTL_SECS)?),
            },
            inbound: InboundConfig {
                allowed_source_emails: email_set("ALLOWED_SOURCE_EMAILS"),
                allowed_target_emails: email_set("ALLOWED_TARGET_EMAILS"),
                prefill_context: flag("PREFILL_CONTEXT"),
            },
        })
    }
}

impl LlmConfig {
    fn from_env() -> Result<Self, ConfigError> {
        let model =
            optional("LLM_MODEL").unwrap_or_else(|| "gpt-4o".to_string());
        Ok(Self {
            base_url: optional("LLM_API_BASE")
                .unwrap_or_else(|| "https://api.openai.com".to_string()),
            api_key: SecretString::from(required("LLM_API_KEY")?),
            squash_model: optional("LLM_SQUASH_MODEL").unwrap_or_else(|| model.clone()),
            model,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingVar { name })
}

fn optional(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn flag(name: &str) -> bool {
    matches!(
        optional(name).as_deref(),
        Some("1") | Some("true") | Some("yes")
    )
}

fn parsed_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(name) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn optional_secs(name: &'static str) -> Result<Option<Duration>, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|e| ConfigError::InvalidVar {
                name,
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Parse a comma-separated allowlist into a set of bare addresses.
fn email_set(name: &str) -> HashSet<String> {
    optional(name)
        .map(|raw| {
            raw.split(',')
                .map(|addr| addr.trim().to_string())
                .filter(|addr| !addr.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::email_set;

    #[test]
    fn email_set_trims_and_drops_empties() {
        // Env-var helpers are exercised through a temp var to avoid clobbering
        // anything the test runner set.
        unsafe { std::env::set_var("GREENLIGHT_TEST_EMAILS", "a@x.com, b@y.com,,  ") };
        let set = email_set("GREENLIGHT_TEST_EMAILS");
        assert_eq!(set.len(), 2);
        assert!(set.contains("a@x.com"));
        assert!(set.contains("b@y.com"));
        unsafe { std::env::remove_var("GREENLIGHT_TEST_EMAILS") };
    }
}
