//! Configuration loading and root folder resolution
//!
//! Every setting resolves in priority order:
//! 1. Command-line argument (highest priority, root folder and bind address only)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default (fallback)
//!
//! A missing or malformed TOML file is never fatal: a warning is logged and
//! the remaining tiers are used.

use crate::money::BPS_DENOMINATOR;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directory name used under the platform config/data directories
pub const APP_DIR_NAME: &str = "basis-pulse";

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "pulse.db";

/// Public Razorpay API endpoint
pub const DEFAULT_RAZORPAY_BASE_URL: &str = "https://api.razorpay.com";

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub root_folder: PathBuf,
    pub bind: String,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let root_folder = dirs::data_local_dir()
            .map(|d| d.join(APP_DIR_NAME))
            .unwrap_or_else(|| PathBuf::from("./pulse_data"));

        Self {
            root_folder,
            bind: "127.0.0.1:5780".to_string(),
            log_level: "info".to_string(),
        }
    }
}

// ========================================
// TOML file schema
// ========================================

/// On-disk TOML configuration; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub logging: LoggingConfig,
    pub razorpay: RazorpayToml,
    pub fees: FeesToml,
    pub booking: BookingToml,
    pub auth: AuthToml,
}

/// `[logging]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: Option<String>,
}

/// `[razorpay]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RazorpayToml {
    pub key_id: Option<String>,
    pub key_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub base_url: Option<String>,
    pub payout_account_number: Option<String>,
}

/// `[fees]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeesToml {
    pub platform_fee_bps: Option<i64>,
    pub gateway_fee_bps: Option<i64>,
}

/// `[booking]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BookingToml {
    pub hold_minutes: Option<i64>,
    pub min_slot_minutes: Option<i64>,
    pub max_slot_minutes: Option<i64>,
    pub sweep_interval_secs: Option<u64>,
}

/// `[auth]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthToml {
    pub session_ttl_hours: Option<i64>,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

// ========================================
// Resolved configuration
// ========================================

/// Payment gateway credentials
#[derive(Debug, Clone)]
pub struct RazorpaySettings {
    pub key_id: String,
    pub key_secret: String,
    pub webhook_secret: String,
    pub base_url: String,
    /// RazorpayX account payouts are drawn from
    pub payout_account_number: String,
}

impl RazorpaySettings {
    /// Both API credentials are present
    pub fn is_configured(&self) -> bool {
        !self.key_id.trim().is_empty() && !self.key_secret.trim().is_empty()
    }
}

/// Fee rates in basis points
#[derive(Debug, Clone, Copy)]
pub struct FeeSettings {
    pub platform_fee_bps: i64,
    pub gateway_fee_bps: i64,
}

/// Slot and hold limits
#[derive(Debug, Clone, Copy)]
pub struct BookingSettings {
    pub hold_minutes: i64,
    pub min_slot_minutes: i64,
    pub max_slot_minutes: i64,
    pub sweep_interval_secs: u64,
}

/// Session lifetime and bootstrap administrator
#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub session_ttl_hours: i64,
    pub admin_email: Option<String>,
    pub admin_password: Option<String>,
}

/// Fully resolved service configuration
#[derive(Debug, Clone)]
pub struct PulseConfig {
    pub root_folder: PathBuf,
    pub bind: String,
    pub log_level: String,
    pub razorpay: RazorpaySettings,
    pub fees: FeeSettings,
    pub booking: BookingSettings,
    pub auth: AuthSettings,
}

impl Default for PulseConfig {
    fn default() -> Self {
        let defaults = CompiledDefaults::for_current_platform();
        Self {
            root_folder: defaults.root_folder,
            bind: defaults.bind,
            log_level: defaults.log_level,
            razorpay: RazorpaySettings {
                key_id: String::new(),
                key_secret: String::new(),
                webhook_secret: String::new(),
                base_url: DEFAULT_RAZORPAY_BASE_URL.to_string(),
                payout_account_number: String::new(),
            },
            fees: FeeSettings {
                platform_fee_bps: 2000,
                gateway_fee_bps: 200,
            },
            booking: BookingSettings {
                hold_minutes: 15,
                min_slot_minutes: 30,
                max_slot_minutes: 240,
                sweep_interval_secs: 60,
            },
            auth: AuthSettings {
                session_ttl_hours: 24 * 7,
                admin_email: None,
                admin_password: None,
            },
        }
    }
}

impl PulseConfig {
    /// Reject settings that would break fee or booking invariants
    pub fn validate(&self) -> Result<()> {
        let fees = &self.fees;
        if fees.platform_fee_bps < 0
            || fees.gateway_fee_bps < 0
            || fees.platform_fee_bps + fees.gateway_fee_bps > BPS_DENOMINATOR
        {
            return Err(Error::Config(format!(
                "fees: platform_fee_bps ({}) + gateway_fee_bps ({}) must be within 0..={}",
                fees.platform_fee_bps, fees.gateway_fee_bps, BPS_DENOMINATOR
            )));
        }

        let booking = &self.booking;
        if booking.hold_minutes <= 0 {
            return Err(Error::Config("booking.hold_minutes must be positive".to_string()));
        }
        if booking.min_slot_minutes <= 0 || booking.min_slot_minutes > booking.max_slot_minutes {
            return Err(Error::Config(format!(
                "booking: min_slot_minutes ({}) must be positive and <= max_slot_minutes ({})",
                booking.min_slot_minutes, booking.max_slot_minutes
            )));
        }
        if booking.sweep_interval_secs == 0 {
            return Err(Error::Config(
                "booking.sweep_interval_secs must be positive".to_string(),
            ));
        }

        if self.auth.session_ttl_hours <= 0 {
            return Err(Error::Config("auth.session_ttl_hours must be positive".to_string()));
        }

        Ok(())
    }

    /// Path of the SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }
}

// ========================================
// Resolution
// ========================================

/// Command-line overrides (tier 1)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub root_folder: Option<PathBuf>,
    pub bind: Option<String>,
    pub config_path: Option<PathBuf>,
}

/// Resolves `PulseConfig` across CLI, environment, TOML and defaults
pub struct ConfigResolver {
    overrides: CliOverrides,
}

impl ConfigResolver {
    pub fn new(overrides: CliOverrides) -> Self {
        Self { overrides }
    }

    /// Resolve configuration; only validation failures are errors
    pub fn resolve(&self) -> Result<PulseConfig> {
        let toml_config = self.load_toml();
        let defaults = PulseConfig::default();

        let root_folder = self
            .overrides
            .root_folder
            .clone()
            .or_else(|| env_string("PULSE_ROOT_FOLDER").map(PathBuf::from))
            .or_else(|| toml_config.root_folder.clone())
            .unwrap_or(defaults.root_folder);

        let bind = self
            .overrides
            .bind
            .clone()
            .or_else(|| env_string("PULSE_BIND"))
            .or_else(|| toml_config.bind.clone())
            .unwrap_or(defaults.bind);

        let log_level = env_string("PULSE_LOG_LEVEL")
            .or_else(|| toml_config.logging.level.clone())
            .unwrap_or(defaults.log_level);

        let rp = &toml_config.razorpay;
        let razorpay = RazorpaySettings {
            key_id: env_string("PULSE_RAZORPAY_KEY_ID")
                .or_else(|| rp.key_id.clone())
                .unwrap_or(defaults.razorpay.key_id),
            key_secret: env_string("PULSE_RAZORPAY_KEY_SECRET")
                .or_else(|| rp.key_secret.clone())
                .unwrap_or(defaults.razorpay.key_secret),
            webhook_secret: env_string("PULSE_RAZORPAY_WEBHOOK_SECRET")
                .or_else(|| rp.webhook_secret.clone())
                .unwrap_or(defaults.razorpay.webhook_secret),
            base_url: env_string("PULSE_RAZORPAY_BASE_URL")
                .or_else(|| rp.base_url.clone())
                .unwrap_or(defaults.razorpay.base_url),
            payout_account_number: env_string("PULSE_RAZORPAY_PAYOUT_ACCOUNT")
                .or_else(|| rp.payout_account_number.clone())
                .unwrap_or(defaults.razorpay.payout_account_number),
        };

        let fees = FeeSettings {
            platform_fee_bps: env_parsed("PULSE_PLATFORM_FEE_BPS")
                .or(toml_config.fees.platform_fee_bps)
                .unwrap_or(defaults.fees.platform_fee_bps),
            gateway_fee_bps: env_parsed("PULSE_GATEWAY_FEE_BPS")
                .or(toml_config.fees.gateway_fee_bps)
                .unwrap_or(defaults.fees.gateway_fee_bps),
        };

        let bk = &toml_config.booking;
        let booking = BookingSettings {
            hold_minutes: bk.hold_minutes.unwrap_or(defaults.booking.hold_minutes),
            min_slot_minutes: bk
                .min_slot_minutes
                .unwrap_or(defaults.booking.min_slot_minutes),
            max_slot_minutes: bk
                .max_slot_minutes
                .unwrap_or(defaults.booking.max_slot_minutes),
            sweep_interval_secs: bk
                .sweep_interval_secs
                .unwrap_or(defaults.booking.sweep_interval_secs),
        };

        let auth = AuthSettings {
            session_ttl_hours: toml_config
                .auth
                .session_ttl_hours
                .unwrap_or(defaults.auth.session_ttl_hours),
            admin_email: env_string("PULSE_ADMIN_EMAIL")
                .or_else(|| toml_config.auth.admin_email.clone()),
            admin_password: env_string("PULSE_ADMIN_PASSWORD")
                .or_else(|| toml_config.auth.admin_password.clone()),
        };

        let config = PulseConfig {
            root_folder,
            bind,
            log_level,
            razorpay,
            fees,
            booking,
            auth,
        };
        config.validate()?;

        if !config.razorpay.is_configured() {
            warn!("Razorpay credentials not configured; order checkout will fail");
        }

        Ok(config)
    }

    /// Locate and parse the TOML file (graceful degradation)
    fn load_toml(&self) -> TomlConfig {
        let path = match self.overrides.config_path.clone().or_else(default_config_path) {
            Some(path) => path,
            None => {
                info!("No config file found, using environment and defaults");
                return TomlConfig::default();
            }
        };

        match load_toml_config(&path) {
            Ok(config) => {
                info!("Loaded config file: {}", path.display());
                config
            }
            Err(e) => {
                warn!("Ignoring config file {}: {}", path.display(), e);
                TomlConfig::default()
            }
        }
    }
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    toml::from_str(&content).map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))
}

/// Default config file: user config dir first, then /etc
fn default_config_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    let system_config = PathBuf::from("/etc").join(APP_DIR_NAME).join("config.toml");
    if system_config.exists() {
        return Some(system_config);
    }

    None
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = env_string(key)?;
    match raw.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Invalid {} value '{}', ignoring", key, raw);
            None
        }
    }
}

/// Creates the root folder on first run
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            info!("Created root folder: {}", self.root_folder.display());
        }
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join(DATABASE_FILE_NAME)
    }

    pub fn database_exists(&self) -> bool {
        self.database_path().exists()
    }
}
