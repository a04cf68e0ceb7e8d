//! Wiring shared by every command: settings, policy, registry, sources.

use anyhow::Context;
use custodian_core::action::ActionRegistry;
use custodian_core::builtin;
use custodian_core::config::Settings;
use custodian_core::paths::CONFIG_FILE;
use custodian_core::policy::ProtectedTargetPolicy;
use custodian_core::trigger::feed::{FeedFile, FeedSource};
use custodian_core::trigger::{CandidateSource, TicketSource, TriggerValidator};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub struct App {
    pub settings: Arc<Settings>,
}

impl App {
    /// Settings from `config` (or `<root>/custodian.yaml`), env overrides
    /// applied, relative paths anchored at `root`.
    pub fn load(root: &Path, config: Option<&Path>) -> anyhow::Result<Self> {
        let config_path: Option<PathBuf> = match config {
            Some(p) => Some(p.to_path_buf()),
            None => {
                let default = root.join(CONFIG_FILE);
                default.is_file().then_some(default)
            }
        };
        let settings = Settings::load(config_path.as_deref())
            .context("failed to load settings")?
            .rooted(root);
        tracing::debug!(root = %root.display(), config = ?config_path, "settings loaded");
        Ok(Self {
            settings: Arc::new(settings),
        })
    }

    pub fn policy(&self) -> anyhow::Result<Arc<ProtectedTargetPolicy>> {
        let policy = ProtectedTargetPolicy::load(&self.settings)
            .context("failed to load protected target policy")?;
        Ok(Arc::new(policy))
    }

    /// Built-in actions only; vendor adapters register alongside them.
    pub fn registry(&self, policy: Arc<ProtectedTargetPolicy>) -> Arc<ActionRegistry> {
        let mut registry = ActionRegistry::new();
        builtin::register_builtins(&mut registry, policy, &self.settings.corporate_domains);
        Arc::new(registry)
    }

    /// Trigger sources backed by the feed file, re-read on every tick. No
    /// feed configured means no trigger ever validates.
    pub fn validator(&self) -> anyhow::Result<TriggerValidator> {
        let (candidates, tickets): (Arc<dyn CandidateSource>, Arc<dyn TicketSource>) =
            match &self.settings.feed_file {
                Some(path) => {
                    if !path.exists() {
                        tracing::warn!(path = %path.display(), "feed file missing; no triggers will validate until it appears");
                    }
                    let feed = Arc::new(FeedSource::new(path));
                    let candidates: Arc<dyn CandidateSource> = feed.clone();
                    let tickets: Arc<dyn TicketSource> = feed;
                    (candidates, tickets)
                }
                None => {
                    let feed = Arc::new(FeedFile::default());
                    let candidates: Arc<dyn CandidateSource> = feed.clone();
                    let tickets: Arc<dyn TicketSource> = feed;
                    (candidates, tickets)
                }
            };
        TriggerValidator::new(candidates, tickets, &self.settings)
            .context("invalid trigger configuration")
    }
}
