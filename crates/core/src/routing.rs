//! Cost-aware model selection, failover ordering and per-model cooldowns.

use crate::classifier::Classification;
use crate::types::Tier;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Model used when no credentialed provider exists at all.
pub const FALLBACK_MODEL: &str = "claude-sonnet-4-5";

/// Upstream providers the gateway can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Anthropic,
    OpenAi,
    Google,
    DeepSeek,
}

/// Preference order used for built-in defaults and tie-breaks.
pub const PROVIDER_PREFERENCE: [Provider; 4] = [
    Provider::Anthropic,
    Provider::OpenAi,
    Provider::Google,
    Provider::DeepSeek,
];

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Anthropic => "anthropic",
            Provider::OpenAi => "openai",
            Provider::Google => "google",
            Provider::DeepSeek => "deepseek",
        }
    }

    pub fn parse(name: &str) -> Option<Provider> {
        match name.trim().to_ascii_lowercase().as_str() {
            "anthropic" | "claude" => Some(Provider::Anthropic),
            "openai" => Some(Provider::OpenAi),
            "google" | "gemini" => Some(Provider::Google),
            "deepseek" => Some(Provider::DeepSeek),
            _ => None,
        }
    }

    /// Environment variable holding this provider's API key.
    pub fn env_key(self) -> &'static str {
        match self {
            Provider::Anthropic => "ANTHROPIC_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Google => "GEMINI_API_KEY",
            Provider::DeepSeek => "DEEPSEEK_API_KEY",
        }
    }

    /// Provider owning a model id. Accepts an explicit `provider/model` prefix.
    pub fn of_model(model: &str) -> Option<Provider> {
        if let Some((prefix, _)) = model.split_once('/') {
            if let Some(provider) = Provider::parse(prefix) {
                return Some(provider);
            }
        }
        let id = model.to_ascii_lowercase();
        if id.starts_with("claude") {
            Some(Provider::Anthropic)
        } else if id.starts_with("gpt") || id.starts_with("o1") || id.starts_with("o3") || id.starts_with("o4") {
            Some(Provider::OpenAi)
        } else if id.starts_with("gemini") {
            Some(Provider::Google)
        } else if id.starts_with("deepseek") {
            Some(Provider::DeepSeek)
        } else {
            None
        }
    }
}

/// Strip an explicit `provider/` prefix from a model id.
pub fn bare_model_id(model: &str) -> &str {
    match model.split_once('/') {
        Some((prefix, rest)) if Provider::parse(prefix).is_some() => rest,
        _ => model,
    }
}

/// One entry of the built-in model catalog.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    pub id: &'static str,
    pub provider: Provider,
    pub strength: Tier,
    /// USD per million input tokens.
    pub input_price: f64,
    /// USD per million output tokens.
    pub output_price: f64,
}

impl ModelSpec {
    fn blended_price(&self) -> f64 {
        self.input_price + self.output_price
    }

    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_price + output_tokens as f64 * self.output_price) / 1_000_000.0
    }
}

pub const CATALOG: &[ModelSpec] = &[
    ModelSpec { id: "claude-haiku-4-5", provider: Provider::Anthropic, strength: Tier::Simple, input_price: 1.0, output_price: 5.0 },
    ModelSpec { id: "claude-sonnet-4-5", provider: Provider::Anthropic, strength: Tier::Moderate, input_price: 3.0, output_price: 15.0 },
    ModelSpec { id: "claude-opus-4-1", provider: Provider::Anthropic, strength: Tier::Complex, input_price: 15.0, output_price: 75.0 },
    ModelSpec { id: "gpt-4.1-mini", provider: Provider::OpenAi, strength: Tier::Simple, input_price: 0.4, output_price: 1.6 },
    ModelSpec { id: "gpt-4.1", provider: Provider::OpenAi, strength: Tier::Moderate, input_price: 2.0, output_price: 8.0 },
    ModelSpec { id: "o3", provider: Provider::OpenAi, strength: Tier::Complex, input_price: 2.0, output_price: 8.0 },
    ModelSpec { id: "gemini-2.5-flash-lite", provider: Provider::Google, strength: Tier::Simple, input_price: 0.1, output_price: 0.4 },
    ModelSpec { id: "gemini-2.5-flash", provider: Provider::Google, strength: Tier::Moderate, input_price: 0.3, output_price: 2.5 },
    ModelSpec { id: "gemini-2.5-pro", provider: Provider::Google, strength: Tier::Complex, input_price: 1.25, output_price: 10.0 },
    ModelSpec { id: "deepseek-chat", provider: Provider::DeepSeek, strength: Tier::Moderate, input_price: 0.27, output_price: 1.1 },
    ModelSpec { id: "deepseek-reasoner", provider: Provider::DeepSeek, strength: Tier::Complex, input_price: 0.55, output_price: 2.19 },
];

pub fn model_spec(model: &str) -> Option<&'static ModelSpec> {
    let id = bare_model_id(model);
    CATALOG.iter().find(|m| m.id == id)
}

/// Cheapest catalog model any credentialed provider can serve.
pub fn cheapest_model(credentials: &Credentials) -> Option<&'static ModelSpec> {
    CATALOG
        .iter()
        .filter(|m| credentials.has(m.provider))
        .min_by(|a, b| a.blended_price().total_cmp(&b.blended_price()))
}

/// Three-slot routing table keyed by tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingTable {
    pub simple: Option<String>,
    pub moderate: Option<String>,
    pub complex: Option<String>,
}

impl RoutingTable {
    pub fn slot(&self, tier: Tier) -> Option<&str> {
        match tier {
            Tier::Simple => self.simple.as_deref(),
            Tier::Moderate => self.moderate.as_deref(),
            Tier::Complex => self.complex.as_deref(),
        }
    }

    fn slot_mut(&mut self, tier: Tier) -> &mut Option<String> {
        match tier {
            Tier::Simple => &mut self.simple,
            Tier::Moderate => &mut self.moderate,
            Tier::Complex => &mut self.complex,
        }
    }

    /// Built-in defaults for one provider.
    pub fn provider_defaults(provider: Provider) -> RoutingTable {
        let mut table = RoutingTable::default();
        for tier in [Tier::Simple, Tier::Moderate, Tier::Complex] {
            *table.slot_mut(tier) = provider_model_for(provider, tier).map(|m| m.id.to_string());
        }
        table
    }
}

/// Providers with a configured API key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    providers: HashSet<Provider>,
}

impl Credentials {
    pub fn new<I: IntoIterator<Item = Provider>>(providers: I) -> Self {
        Self {
            providers: providers.into_iter().collect(),
        }
    }

    /// Read keys through `lookup` (normally `std::env::var`).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::new(
            PROVIDER_PREFERENCE
                .into_iter()
                .filter(|p| lookup(p.env_key()).is_some_and(|v| !v.trim().is_empty())),
        )
    }

    pub fn has(&self, provider: Provider) -> bool {
        self.providers.contains(&provider)
    }

    pub fn covers(&self, model: &str) -> bool {
        Provider::of_model(model).is_some_and(|p| self.has(p))
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Credentialed providers in preference order.
    pub fn ordered(&self) -> Vec<Provider> {
        PROVIDER_PREFERENCE.into_iter().filter(|p| self.has(*p)).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CooldownState {
    failures: u32,
    until: Instant,
}

/// Snapshot row for operator display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownInfo {
    pub model: String,
    pub failures: u32,
    pub remaining: Duration,
}

/// Longest cooldown window regardless of configuration.
pub const COOLDOWN_CEILING: Duration = Duration::from_secs(7 * 24 * 3600);

/// Per-model failure cooldowns. Cleared by success or operator reset only.
#[derive(Debug)]
pub struct CooldownTracker {
    entries: Mutex<HashMap<String, CooldownState>>,
    base: Duration,
    max: Duration,
}

impl CooldownTracker {
    pub fn new(base: Duration, max: Duration) -> Self {
        let base = base.min(COOLDOWN_CEILING);
        Self {
            entries: Mutex::new(HashMap::new()),
            base,
            max: max.max(base).min(COOLDOWN_CEILING),
        }
    }

    pub fn record_failure(&self, model: &str) -> Duration {
        self.record_failure_at(model, Instant::now())
    }

    /// Register a hard failure; the window doubles per consecutive failure up
    /// to the cap and never moves earlier.
    pub fn record_failure_at(&self, model: &str, now: Instant) -> Duration {
        let mut entries = self.entries.lock();
        let state = entries.entry(model.to_string()).or_insert(CooldownState {
            failures: 0,
            until: now,
        });
        state.failures = state.failures.saturating_add(1);
        let exponent = state.failures.saturating_sub(1).min(16);
        let window = self.base.saturating_mul(1u32 << exponent).min(self.max);
        let until = now
            .checked_add(window)
            .or_else(|| now.checked_add(self.base))
            .unwrap_or(now);
        state.until = state.until.max(until);
        warn!(
            "Model {} cooling down for {:?} after {} failure(s)",
            model, window, state.failures
        );
        window
    }

    pub fn record_success(&self, model: &str) {
        if self.entries.lock().remove(model).is_some() {
            debug!("Cooldown cleared for {} after success", model);
        }
    }

    pub fn is_cooling(&self, model: &str) -> bool {
        self.is_cooling_at(model, Instant::now())
    }

    pub fn is_cooling_at(&self, model: &str, now: Instant) -> bool {
        self.entries
            .lock()
            .get(model)
            .is_some_and(|state| state.until > now)
    }

    pub fn failures(&self, model: &str) -> u32 {
        self.entries.lock().get(model).map(|s| s.failures).unwrap_or(0)
    }

    pub fn reset(&self, model: &str) -> bool {
        let removed = self.entries.lock().remove(model).is_some();
        if removed {
            info!("Cooldown reset for {}", model);
        }
        removed
    }

    pub fn reset_all(&self) -> usize {
        let mut entries = self.entries.lock();
        let count = entries.len();
        entries.clear();
        info!("All cooldowns reset ({} entries)", count);
        count
    }

    pub fn snapshot(&self) -> Vec<CooldownInfo> {
        let now = Instant::now();
        let mut rows: Vec<CooldownInfo> = self
            .entries
            .lock()
            .iter()
            .map(|(model, state)| CooldownInfo {
                model: model.clone(),
                failures: state.failures,
                remaining: state.until.saturating_duration_since(now),
            })
            .collect();
        rows.sort_by(|a, b| a.model.cmp(&b.model));
        rows
    }
}

impl Default for CooldownTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(3600))
    }
}

/// Chosen model for one turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub model: String,
    pub tier: Tier,
    /// Session override picked the model.
    pub manual: bool,
    /// Set when selection had to fall back to [`FALLBACK_MODEL`].
    pub warning: Option<String>,
}

/// Primary selection plus the ordered models to try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePlan {
    pub selection: Selection,
    pub candidates: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// User routing table; empty slots use built-in provider defaults.
    pub table: RoutingTable,
    pub cooldown_base_secs: u64,
    pub cooldown_max_secs: u64,
    pub fallback_model: String,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            table: RoutingTable::default(),
            cooldown_base_secs: 60,
            cooldown_max_secs: 3600,
            fallback_model: FALLBACK_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelector {
    config: RoutingConfig,
}

impl ModelSelector {
    pub fn new(config: RoutingConfig) -> Self {
        Self { config }
    }

    /// Routing table after stripping slots without credentials and filling
    /// holes from the first credentialed provider's defaults.
    pub fn effective_table(&self, credentials: &Credentials) -> RoutingTable {
        let defaults = credentials
            .ordered()
            .first()
            .map(|p| RoutingTable::provider_defaults(*p))
            .unwrap_or_default();
        let mut table = RoutingTable::default();
        for tier in [Tier::Simple, Tier::Moderate, Tier::Complex] {
            let user = self
                .config
                .table
                .slot(tier)
                .filter(|model| credentials.covers(model));
            let chosen = user
                .or_else(|| defaults.slot(tier).filter(|model| credentials.covers(model)))
                .map(str::to_string);
            *table.slot_mut(tier) = chosen;
        }
        table
    }

    pub fn select(
        &self,
        classification: &Classification,
        session_override: Option<&str>,
        credentials: &Credentials,
    ) -> Selection {
        if let Some(model) = session_override.map(str::trim).filter(|m| is_manual_override(m)) {
            debug!("Session override selects {}", model);
            return Selection {
                model: model.to_string(),
                tier: classification.tier,
                manual: true,
                warning: None,
            };
        }

        let table = self.effective_table(credentials);
        for tier in search_order(classification.tier) {
            if let Some(model) = table.slot(tier) {
                return Selection {
                    model: model.to_string(),
                    tier: classification.tier,
                    manual: false,
                    warning: None,
                };
            }
        }

        let warning = format!(
            "No credentialed model available; falling back to {}",
            self.config.fallback_model
        );
        warn!("{}", warning);
        Selection {
            model: self.config.fallback_model.clone(),
            tier: classification.tier,
            manual: false,
            warning: Some(warning),
        }
    }

    /// Failover order for a tier: at most one model per credentialed
    /// provider, skipping models in cooldown.
    pub fn failover_candidates(
        &self,
        tier: Tier,
        credentials: &Credentials,
        cooldowns: &CooldownTracker,
        now: Instant,
    ) -> Vec<String> {
        let mut picks: Vec<&'static ModelSpec> = credentials
            .ordered()
            .into_iter()
            .filter_map(|p| provider_model_for(p, tier))
            .collect();

        match tier {
            Tier::Simple => picks.sort_by(|a, b| a.blended_price().total_cmp(&b.blended_price())),
            Tier::Moderate => picks.sort_by(|a, b| {
                strength_distance(a.strength, Tier::Moderate)
                    .cmp(&strength_distance(b.strength, Tier::Moderate))
                    .then(a.blended_price().total_cmp(&b.blended_price()))
            }),
            Tier::Complex => picks.sort_by(|a, b| {
                b.strength
                    .cmp(&a.strength)
                    .then(b.blended_price().total_cmp(&a.blended_price()))
            }),
        }

        picks
            .into_iter()
            .filter(|m| !cooldowns.is_cooling_at(m.id, now))
            .map(|m| m.id.to_string())
            .collect()
    }

    /// Primary selection followed by failover candidates. A cooling primary
    /// moves behind the healthy candidates; a manual override never fails over.
    pub fn plan(
        &self,
        classification: &Classification,
        session_override: Option<&str>,
        credentials: &Credentials,
        cooldowns: &CooldownTracker,
    ) -> RoutePlan {
        let now = Instant::now();
        let selection = self.select(classification, session_override, credentials);
        if selection.manual || selection.warning.is_some() {
            return RoutePlan {
                candidates: vec![selection.model.clone()],
                selection,
            };
        }

        let mut candidates = Vec::new();
        let primary_cooling = cooldowns.is_cooling_at(&selection.model, now);
        if !primary_cooling {
            candidates.push(selection.model.clone());
        }
        for model in self.failover_candidates(classification.tier, credentials, cooldowns, now) {
            if !candidates.contains(&model) && model != selection.model {
                candidates.push(model);
            }
        }
        if primary_cooling {
            candidates.push(selection.model.clone());
        }
        RoutePlan {
            selection,
            candidates,
        }
    }
}

fn is_manual_override(model: &str) -> bool {
    !model.is_empty() && !model.eq_ignore_ascii_case("auto")
}

/// Exact tier first, then stronger, then weaker.
fn search_order(tier: Tier) -> [Tier; 3] {
    match tier {
        Tier::Simple => [Tier::Simple, Tier::Moderate, Tier::Complex],
        Tier::Moderate => [Tier::Moderate, Tier::Complex, Tier::Simple],
        Tier::Complex => [Tier::Complex, Tier::Moderate, Tier::Simple],
    }
}

fn strength_distance(strength: Tier, target: Tier) -> u8 {
    strength.as_u8().abs_diff(target.as_u8())
}

/// The model a provider contributes for a tier: its cheapest for simple
/// work, its moderate model (or nearest) for moderate, its strongest for
/// complex.
fn provider_model_for(provider: Provider, tier: Tier) -> Option<&'static ModelSpec> {
    let models = CATALOG.iter().filter(|m| m.provider == provider);
    match tier {
        Tier::Simple => models.min_by(|a, b| a.blended_price().total_cmp(&b.blended_price())),
        Tier::Moderate => models.min_by(|a, b| {
            strength_distance(a.strength, Tier::Moderate)
                .cmp(&strength_distance(b.strength, Tier::Moderate))
                .then(b.strength.cmp(&a.strength))
        }),
        Tier::Complex => models.max_by(|a, b| {
            a.strength
                .cmp(&b.strength)
                .then(a.blended_price().total_cmp(&b.blended_price()))
        }),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;

    fn classification(tier: Tier) -> Classification {
        let mut c = Classifier::default().classify("hi", 0);
        c.tier = tier;
        c
    }

    #[test]
    fn test_provider_of_model() {
        assert_eq!(Provider::of_model("claude-opus-4-1"), Some(Provider::Anthropic));
        assert_eq!(Provider::of_model("o3"), Some(Provider::OpenAi));
        assert_eq!(Provider::of_model("openai/custom-model"), Some(Provider::OpenAi));
        assert_eq!(Provider::of_model("mystery"), None);
        assert_eq!(bare_model_id("google/gemini-2.5-pro"), "gemini-2.5-pro");
    }

    #[test]
    fn test_override_wins() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic]);
        let sel = selector.select(&classification(Tier::Complex), Some("gpt-4.1-mini"), &creds);
        assert_eq!(sel.model, "gpt-4.1-mini");
        assert!(sel.manual);
    }

    #[test]
    fn test_auto_override_is_ignored() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic]);
        let sel = selector.select(&classification(Tier::Simple), Some("auto"), &creds);
        assert_eq!(sel.model, "claude-haiku-4-5");
        assert!(!sel.manual);
    }

    #[test]
    fn test_tier_picks_slot() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic]);
        assert_eq!(selector.select(&classification(Tier::Simple), None, &creds).model, "claude-haiku-4-5");
        assert_eq!(selector.select(&classification(Tier::Moderate), None, &creds).model, "claude-sonnet-4-5");
        assert_eq!(selector.select(&classification(Tier::Complex), None, &creds).model, "claude-opus-4-1");
    }

    #[test]
    fn test_uncredentialed_user_slot_is_stripped() {
        let config = RoutingConfig {
            table: RoutingTable {
                simple: Some("gpt-4.1-mini".to_string()),
                moderate: Some("gemini-2.5-flash".to_string()),
                complex: None,
            },
            ..RoutingConfig::default()
        };
        let selector = ModelSelector::new(config);
        let creds = Credentials::new([Provider::Google]);
        let table = selector.effective_table(&creds);
        assert_eq!(table.simple.as_deref(), Some("gemini-2.5-flash-lite"));
        assert_eq!(table.moderate.as_deref(), Some("gemini-2.5-flash"));
        assert_eq!(table.complex.as_deref(), Some("gemini-2.5-pro"));
    }

    #[test]
    fn test_no_credentials_falls_back_with_warning() {
        let selector = ModelSelector::default();
        let sel = selector.select(&classification(Tier::Moderate), None, &Credentials::default());
        assert_eq!(sel.model, FALLBACK_MODEL);
        assert!(sel.warning.is_some());
    }

    #[test]
    fn test_failover_order_per_tier() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic, Provider::OpenAi, Provider::Google]);
        let cooldowns = CooldownTracker::default();
        let now = Instant::now();

        let simple = selector.failover_candidates(Tier::Simple, &creds, &cooldowns, now);
        assert_eq!(simple, vec!["gemini-2.5-flash-lite", "gpt-4.1-mini", "claude-haiku-4-5"]);

        let complex = selector.failover_candidates(Tier::Complex, &creds, &cooldowns, now);
        assert_eq!(complex[0], "claude-opus-4-1");
        assert_eq!(complex.len(), 3);

        // one model per provider, never a weaker sibling
        assert!(!complex.contains(&"claude-sonnet-4-5".to_string()));
    }

    #[test]
    fn test_cooling_model_skipped() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic, Provider::OpenAi]);
        let cooldowns = CooldownTracker::default();
        let now = Instant::now();
        cooldowns.record_failure_at("claude-opus-4-1", now);

        let complex = selector.failover_candidates(Tier::Complex, &creds, &cooldowns, now);
        assert_eq!(complex, vec!["o3"]);
    }

    #[test]
    fn test_plan_moves_cooling_primary_last() {
        let selector = ModelSelector::default();
        let creds = Credentials::new([Provider::Anthropic, Provider::OpenAi]);
        let cooldowns = CooldownTracker::default();
        cooldowns.record_failure("claude-sonnet-4-5");

        let plan = selector.plan(&classification(Tier::Moderate), None, &creds, &cooldowns);
        assert_eq!(plan.selection.model, "claude-sonnet-4-5");
        assert_eq!(plan.candidates, vec!["gpt-4.1", "claude-sonnet-4-5"]);
    }

    #[test]
    fn test_cooldown_grows_and_resets() {
        let cooldowns = CooldownTracker::new(Duration::from_secs(10), Duration::from_secs(25));
        let now = Instant::now();
        assert_eq!(cooldowns.record_failure_at("m", now), Duration::from_secs(10));
        assert_eq!(cooldowns.record_failure_at("m", now), Duration::from_secs(20));
        assert_eq!(cooldowns.record_failure_at("m", now), Duration::from_secs(25));
        assert_eq!(cooldowns.failures("m"), 3);
        assert!(cooldowns.is_cooling_at("m", now + Duration::from_secs(24)));
        assert!(!cooldowns.is_cooling_at("m", now + Duration::from_secs(26)));

        assert!(cooldowns.reset("m"));
        assert_eq!(cooldowns.failures("m"), 0);
        assert!(!cooldowns.reset("m"));
    }

    #[test]
    fn test_huge_cooldown_config_is_capped() {
        let cooldowns = CooldownTracker::new(Duration::from_secs(60), Duration::from_secs(u64::MAX));
        let now = Instant::now();
        let mut window = Duration::ZERO;
        for _ in 0..40 {
            window = cooldowns.record_failure_at("m", now);
        }
        assert_eq!(window, COOLDOWN_CEILING);
        assert!(cooldowns.is_cooling_at("m", now + COOLDOWN_CEILING - Duration::from_secs(1)));

        let extreme = CooldownTracker::new(Duration::from_secs(u64::MAX), Duration::from_secs(u64::MAX));
        assert_eq!(extreme.record_failure_at("m", now), COOLDOWN_CEILING);
        assert!(extreme.is_cooling_at("m", now));
    }

    #[test]
    fn test_success_clears_cooldown() {
        let cooldowns = CooldownTracker::default();
        cooldowns.record_failure("m");
        assert!(cooldowns.is_cooling("m"));
        cooldowns.record_success("m");
        assert!(!cooldowns.is_cooling("m"));
    }

    #[test]
    fn test_credentials_from_lookup() {
        let creds = Credentials::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            "GEMINI_API_KEY" => Some("  ".to_string()),
            _ => None,
        });
        assert!(creds.has(Provider::OpenAi));
        assert!(!creds.has(Provider::Google));
        assert_eq!(creds.ordered(), vec![Provider::OpenAi]);
    }

    #[test]
    fn test_model_cost() {
        let spec = model_spec("claude-haiku-4-5").unwrap();
        let cost = spec.cost(1_000_000, 1_000_000);
        assert!((cost - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_cheapest_model_respects_credentials() {
        let creds = Credentials::new([Provider::Anthropic, Provider::OpenAi]);
        assert_eq!(cheapest_model(&creds).unwrap().id, "gpt-4.1-mini");
        assert!(cheapest_model(&Credentials::default()).is_none());
    }
}
