// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Gate Configuration Types
//
// Kubernetes-style manifest (apiVersion/kind/metadata/spec) describing:
// - Token verification (algorithm, key material, expected issuer/audience)
// - Rate limiter tunables (window, penalty, block threshold, decay)
// - The static route requirement table

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::domain::capability::Capability;
use crate::domain::route::{RouteKey, RouteLimit, RouteRequirement, RouteTable};

pub const API_VERSION: &str = "bulwark.dev/v1";
pub const KIND: &str = "GateConfig";

/// Upper bound for `window` and `decay_interval`.
pub const MAX_RATE_LIMIT_PERIOD: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Top-level gate configuration manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    /// API version (must be "bulwark.dev/v1")
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// Resource kind (must be "GateConfig")
    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: GateConfigSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Deployment name, used only for log context
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub labels: Option<HashMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfigSpec {
    #[serde(default)]
    pub token: TokenSettings,

    #[serde(default)]
    pub rate_limit: RateLimitSettings,

    /// Route requirement table. Omitted → built-in metrics/users table.
    #[serde(default = "default_routes")]
    pub routes: Vec<RouteEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSettings {
    /// JWT algorithm: HS256, HS384, HS512 or RS256
    #[serde(default = "default_algorithm")]
    pub algorithm: String,

    /// Shared secret for HS* algorithms (supports "env:VAR_NAME")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,

    /// PEM-encoded public key file for RS256
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_path: Option<PathBuf>,

    #[serde(default = "default_issuer")]
    pub issuer: String,

    #[serde(default = "default_audience")]
    pub audience: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitSettings {
    /// Sliding window length
    #[serde(default = "default_window", with = "humantime_serde")]
    pub window: Duration,

    /// Upper bound applied to every route's base + burst
    #[serde(default = "default_global_cap")]
    pub global_cap: u32,

    /// Multiplier applied per malformed event
    #[serde(default = "default_penalty_factor")]
    pub penalty_factor: f64,

    /// Floor for the penalty multiplier
    #[serde(default = "default_min_multiplier")]
    pub min_multiplier: f64,

    /// Malformed events at which the identity is blocked
    #[serde(default = "default_block_threshold")]
    pub block_threshold: u32,

    /// Quiet time before one decay step is applied
    #[serde(default = "default_decay_interval", with = "humantime_serde")]
    pub decay_interval: Duration,

    /// Multiplier recovered per decay step
    #[serde(default = "default_decay_step")]
    pub decay_step: f64,

    /// Identities tracked before least-recently-seen eviction kicks in
    #[serde(default = "default_max_tracked_identities")]
    pub max_tracked_identities: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub method: String,
    pub path: String,
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_base_quota")]
    pub base_quota: u32,
    #[serde(default = "default_burst")]
    pub burst: u32,
}

fn default_algorithm() -> String {
    "HS256".to_string()
}

fn default_issuer() -> String {
    "security-aware-api".to_string()
}

fn default_audience() -> String {
    "internal-services".to_string()
}

fn default_window() -> Duration {
    Duration::from_secs(60)
}

fn default_global_cap() -> u32 {
    100
}

fn default_penalty_factor() -> f64 {
    0.5
}

fn default_min_multiplier() -> f64 {
    0.1
}

fn default_block_threshold() -> u32 {
    5
}

fn default_decay_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_decay_step() -> f64 {
    0.25
}

fn default_max_tracked_identities() -> usize {
    100_000
}

fn default_base_quota() -> u32 {
    RouteLimit::default().base_quota
}

fn default_burst() -> u32 {
    RouteLimit::default().burst
}

fn default_routes() -> Vec<RouteEntry> {
    RouteTable::builtin()
        .entries()
        .into_iter()
        .map(|(key, requirement)| RouteEntry {
            method: key.method.clone(),
            path: key.path.clone(),
            capabilities: requirement.capabilities.iter().collect(),
            base_quota: requirement.limit.base_quota,
            burst: requirement.limit.burst,
        })
        .collect()
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            algorithm: default_algorithm(),
            secret: Some("env:BULWARK_JWT_SECRET".to_string()),
            public_key_path: None,
            issuer: default_issuer(),
            audience: default_audience(),
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            window: default_window(),
            global_cap: default_global_cap(),
            penalty_factor: default_penalty_factor(),
            min_multiplier: default_min_multiplier(),
            block_threshold: default_block_threshold(),
            decay_interval: default_decay_interval(),
            decay_step: default_decay_step(),
            max_tracked_identities: default_max_tracked_identities(),
        }
    }
}

impl Default for GateConfigSpec {
    fn default() -> Self {
        Self {
            token: TokenSettings::default(),
            rate_limit: RateLimitSettings::default(),
            routes: default_routes(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            api_version: API_VERSION.to_string(),
            kind: KIND.to_string(),
            metadata: ManifestMetadata {
                name: "bulwark".to_string(),
                version: Some("1.0.0".to_string()),
                labels: None,
            },
            spec: GateConfigSpec::default(),
        }
    }
}

impl TokenSettings {
    /// Resolve the HMAC secret, following an "env:VAR_NAME" indirection.
    pub fn resolve_secret(&self) -> anyhow::Result<String> {
        let raw = self
            .secret
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("spec.token.secret is required for {}", self.algorithm))?;
        let secret = match raw.strip_prefix("env:") {
            Some(var) => std::env::var(var)
                .map_err(|_| anyhow::anyhow!("environment variable {} referenced by spec.token.secret is not set", var))?,
            None => raw.to_string(),
        };
        if secret.is_empty() {
            anyhow::bail!("spec.token.secret resolved to an empty value");
        }
        Ok(secret)
    }

    pub fn is_hmac(&self) -> bool {
        matches!(self.algorithm.as_str(), "HS256" | "HS384" | "HS512")
    }
}

impl GateConfig {
    /// Load configuration from YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml_str(yaml: &str) -> anyhow::Result<Self> {
        let config = serde_yaml::from_str(yaml)?;
        Ok(config)
    }

    pub fn to_yaml_string(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Discover configuration file using precedence order
    /// 1. BULWARK_CONFIG_PATH environment variable
    /// 2. ./bulwark.yaml (working directory)
    /// 3. ~/.bulwark/config.yaml (user home)
    /// 4. /etc/bulwark/config.yaml (system, Unix)
    pub fn discover_config() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("BULWARK_CONFIG_PATH") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        let cwd = PathBuf::from("./bulwark.yaml");
        if cwd.exists() {
            return Some(cwd);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".bulwark").join("config.yaml");
            if user_config.exists() {
                return Some(user_config);
            }
        }

        #[cfg(unix)]
        {
            let system_config = PathBuf::from("/etc/bulwark/config.yaml");
            if system_config.exists() {
                return Some(system_config);
            }
        }

        None
    }

    /// Load configuration with discovery, fallback to default
    pub fn load_or_default(cli_path: Option<PathBuf>) -> anyhow::Result<Self> {
        // Explicit path: fail if missing or invalid
        if let Some(path) = cli_path {
            tracing::info!("Loading gate configuration from explicit path: {:?}", path);
            let mut config = Self::from_yaml_file(&path)
                .map_err(|e| anyhow::anyhow!("Failed to load config at {:?}: {}", path, e))?;
            config.apply_env_overrides();
            return Ok(config);
        }

        if let Some(config_path) = Self::discover_config() {
            tracing::info!("Loading gate configuration from discovered path: {:?}", config_path);
            let mut config = Self::from_yaml_file(config_path)?;
            config.apply_env_overrides();
            Ok(config)
        } else {
            tracing::warn!("No gate configuration file found in standard locations. Using defaults.");
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("BULWARK_JWT_SECRET") {
            if !val.is_empty() {
                tracing::info!("Environment override: BULWARK_JWT_SECRET=<redacted>");
                self.spec.token.secret = Some(val);
            }
        }
        if let Ok(val) = std::env::var("BULWARK_JWT_ALGORITHM") {
            tracing::info!("Environment override: BULWARK_JWT_ALGORITHM={}", val);
            self.spec.token.algorithm = val.to_ascii_uppercase();
        }
        if let Ok(val) = std::env::var("BULWARK_JWT_ISSUER") {
            tracing::info!("Environment override: BULWARK_JWT_ISSUER={}", val);
            self.spec.token.issuer = val;
        }
        if let Ok(val) = std::env::var("BULWARK_JWT_AUDIENCE") {
            tracing::info!("Environment override: BULWARK_JWT_AUDIENCE={}", val);
            self.spec.token.audience = val;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_version != API_VERSION {
            anyhow::bail!("Invalid apiVersion: '{}'. Must be '{}'", self.api_version, API_VERSION);
        }

        if self.kind != KIND {
            anyhow::bail!("Invalid kind: '{}'. Must be '{}'", self.kind, KIND);
        }

        if self.metadata.name.is_empty() {
            anyhow::bail!("metadata.name cannot be empty");
        }

        let token = &self.spec.token;
        if token.issuer.is_empty() {
            anyhow::bail!("spec.token.issuer cannot be empty");
        }
        if token.audience.is_empty() {
            anyhow::bail!("spec.token.audience cannot be empty");
        }
        match token.algorithm.as_str() {
            "HS256" | "HS384" | "HS512" => {
                if token.secret.as_deref().map_or(true, str::is_empty) {
                    anyhow::bail!("spec.token.secret is required for {}", token.algorithm);
                }
            }
            "RS256" => {
                if token.public_key_path.is_none() {
                    anyhow::bail!("spec.token.public_key_path is required for RS256");
                }
            }
            other => anyhow::bail!("Unsupported token algorithm: '{}'", other),
        }

        let limits = &self.spec.rate_limit;
        if limits.window.is_zero() {
            anyhow::bail!("spec.rate_limit.window must be greater than zero");
        }
        if limits.window > MAX_RATE_LIMIT_PERIOD {
            anyhow::bail!("spec.rate_limit.window must not exceed 7 days");
        }
        if limits.global_cap == 0 {
            anyhow::bail!("spec.rate_limit.global_cap must be at least 1");
        }
        if !(limits.min_multiplier > 0.0 && limits.min_multiplier <= 1.0) {
            anyhow::bail!("spec.rate_limit.min_multiplier must be in (0, 1]");
        }
        if !(limits.penalty_factor > 0.0 && limits.penalty_factor < 1.0) {
            anyhow::bail!("spec.rate_limit.penalty_factor must be in (0, 1)");
        }
        if !(limits.decay_step > 0.0 && limits.decay_step <= 1.0) {
            anyhow::bail!("spec.rate_limit.decay_step must be in (0, 1]");
        }
        if limits.block_threshold == 0 {
            anyhow::bail!("spec.rate_limit.block_threshold must be at least 1");
        }
        if limits.decay_interval.is_zero() {
            anyhow::bail!("spec.rate_limit.decay_interval must be greater than zero");
        }
        if limits.decay_interval > MAX_RATE_LIMIT_PERIOD {
            anyhow::bail!("spec.rate_limit.decay_interval must not exceed 7 days");
        }
        if limits.max_tracked_identities == 0 {
            anyhow::bail!("spec.rate_limit.max_tracked_identities must be at least 1");
        }

        let mut seen = HashSet::new();
        for route in &self.spec.routes {
            if !route.path.starts_with('/') {
                anyhow::bail!("Route path must start with '/': '{}'", route.path);
            }
            if route.method.is_empty() {
                anyhow::bail!("Route method cannot be empty for path: {}", route.path);
            }
            if route.capabilities.is_empty() {
                anyhow::bail!("Route {} {} must require at least one capability", route.method, route.path);
            }
            if route.base_quota == 0 {
                anyhow::bail!("Route {} {} must have a base_quota of at least 1", route.method, route.path);
            }
            let key = RouteKey::new(&route.method, &route.path);
            if !seen.insert(key.clone()) {
                anyhow::bail!("Duplicate route entry: {}", key);
            }
        }

        Ok(())
    }

    /// Build the route requirement table from `spec.routes`.
    pub fn route_table(&self) -> RouteTable {
        let mut table = RouteTable::new();
        for route in &self.spec.routes {
            table.insert(
                RouteKey::new(&route.method, &route.path),
                RouteRequirement {
                    capabilities: route.capabilities.iter().copied().collect(),
                    limit: RouteLimit::new(route.base_quota, route.burst),
                },
            );
        }
        table
    }
}
