//! Write-through cache of timers and blocks, plus the last compiled rules.
//!
//! Every mutation goes to the store first and then reloads the affected
//! table, so the cache never serves a value older than the last local write.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use tracing::{debug, info};

use webtime_core::{
    compile_rules, normalize_pattern, BlockedWebsite, Domain, PolicySnapshot, RuleSet,
    WebsiteActivity, WebsiteTimer,
};

use super::commands::EngineError;
use crate::store::{Store, StoreResult};

pub struct PolicyCache {
    timers: Vec<WebsiteTimer>,
    blocked: Vec<BlockedWebsite>,
    rules: RuleSet,
    redirect_target: String,
}

impl PolicyCache {
    /// Loads timers and blocks from storage. Rules start empty until the
    /// first compilation.
    pub fn load(store: &dyn Store, redirect_target: impl Into<String>) -> StoreResult<Self> {
        let cache = Self {
            timers: store.timers()?,
            blocked: store.blocked_websites()?,
            rules: RuleSet::default(),
            redirect_target: redirect_target.into(),
        };
        info!(
            timers = cache.timers.len(),
            blocked = cache.blocked.len(),
            "Policy cache loaded"
        );
        Ok(cache)
    }

    /// Reloads both tables.
    pub fn refresh(&mut self, store: &dyn Store) -> StoreResult<()> {
        self.timers = store.timers()?;
        self.blocked = store.blocked_websites()?;
        Ok(())
    }

    pub fn timers(&self) -> &[WebsiteTimer] {
        &self.timers
    }

    pub fn blocked(&self) -> &[BlockedWebsite] {
        &self.blocked
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn timer_for(&self, domain: &Domain) -> Option<&WebsiteTimer> {
        self.timers.iter().find(|timer| &timer.domain == domain)
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    pub fn upsert_timer(
        &mut self,
        store: &mut dyn Store,
        domain: &str,
        time_limit: i64,
        enabled: bool,
    ) -> Result<WebsiteTimer, EngineError> {
        let domain = Domain::parse(domain)?;
        let timer = WebsiteTimer::new(domain, time_limit, enabled)?;
        store.upsert_timer(&timer)?;
        self.timers = store.timers()?;
        info!(
            domain = %timer.domain,
            time_limit = timer.time_limit,
            enabled = timer.enabled,
            "Timer saved"
        );
        Ok(timer)
    }

    pub fn delete_timer(&mut self, store: &mut dyn Store, domain: &str) -> Result<bool, EngineError> {
        let domain = Domain::parse(domain)?;
        let removed = store.delete_timer(&domain)?;
        self.timers = store.timers()?;
        debug!(domain = %domain, removed, "Timer delete");
        Ok(removed)
    }

    pub fn add_block(
        &mut self,
        store: &mut dyn Store,
        url_pattern: &str,
        now: NaiveDateTime,
    ) -> Result<BlockedWebsite, EngineError> {
        let pattern = normalize_pattern(url_pattern)?;
        let block = store.insert_blocked_website(&pattern, now)?;
        self.blocked = store.blocked_websites()?;
        info!(id = block.id, pattern = %block.url_pattern, "Block added");
        Ok(block)
    }

    pub fn remove_block(&mut self, store: &mut dyn Store, id: i64) -> Result<bool, EngineError> {
        let removed = store.delete_blocked_website(id)?;
        self.blocked = store.blocked_websites()?;
        debug!(id, removed, "Block delete");
        Ok(removed)
    }

    // ========================================================================
    // Compilation
    // ========================================================================

    /// Compiles against today's usage and remembers the result.
    pub fn recompile(&mut self, today: &[WebsiteActivity]) -> &RuleSet {
        let usage: HashMap<Domain, u64> = today
            .iter()
            .map(|row| (row.domain.clone(), row.time_spent))
            .collect();
        self.rules = compile_rules(
            PolicySnapshot {
                timers: &self.timers,
                blocked: &self.blocked,
                usage: &usage,
            },
            &self.redirect_target,
        );
        debug!(rules = self.rules.len(), "Rules compiled");
        &self.rules
    }
}
