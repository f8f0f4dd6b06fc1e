//! Static scraper registry and per-request selection.
//!
//! The set of scrapers is closed: one [`ScraperKind`] variant per concrete
//! scraper, dispatching to a static instance. The registry is built once at
//! startup from configuration and never mutated afterwards.

use crate::config::ScrapersConfig;

use super::Scraper;
use super::broker_status::BrokerStatus;
use super::spacedb::SpaceDb;
use super::statdump::Statdump;

static BROKER_STATUS: BrokerStatus = BrokerStatus;
static SPACEDB: SpaceDb = SpaceDb;
static STATDUMP: Statdump = Statdump;

/// Tag for one registered scraper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScraperKind {
    /// Per-broker counters from `show brokers`.
    BrokerStatus,
    /// Volume usage from `show spacedb`.
    SpaceDb,
    /// Server statistics from `show statdump`.
    Statdump,
}

impl ScraperKind {
    /// Every registered scraper, in registration order.
    pub const ALL: [ScraperKind; 3] = [
        ScraperKind::BrokerStatus,
        ScraperKind::SpaceDb,
        ScraperKind::Statdump,
    ];

    /// The scraper implementation behind this tag.
    pub fn scraper(self) -> &'static dyn Scraper {
        match self {
            ScraperKind::BrokerStatus => &BROKER_STATUS,
            ScraperKind::SpaceDb => &SPACEDB,
            ScraperKind::Statdump => &STATDUMP,
        }
    }

    /// Unique scraper name, as used in `collect[]` selection.
    pub fn name(self) -> &'static str {
        self.scraper().name()
    }
}

#[derive(Debug, Clone, Copy)]
struct ScraperEntry {
    kind: ScraperKind,
    default_on: bool,
}

/// Fixed table of registered scrapers with their default-enabled flags.
#[derive(Debug, Clone)]
pub struct ScraperSet {
    entries: Vec<ScraperEntry>,
}

impl ScraperSet {
    /// Build the registry from the configured enable flags.
    pub fn from_config(config: &ScrapersConfig) -> Self {
        let entries = ScraperKind::ALL
            .into_iter()
            .map(|kind| ScraperEntry {
                kind,
                default_on: match kind {
                    ScraperKind::BrokerStatus => config.broker_status,
                    ScraperKind::SpaceDb => config.spacedb,
                    ScraperKind::Statdump => config.statdump,
                },
            })
            .collect();
        Self { entries }
    }

    /// All registered scrapers, regardless of enable flags.
    pub fn registered(&self) -> impl Iterator<Item = ScraperKind> + '_ {
        self.entries.iter().map(|e| e.kind)
    }

    /// The default-enabled subset.
    pub fn default_enabled(&self) -> Vec<ScraperKind> {
        self.entries
            .iter()
            .filter(|e| e.default_on)
            .map(|e| e.kind)
            .collect()
    }

    /// Resolve a request-level selection.
    ///
    /// A non-empty request runs `requested ∩ registered`; names matching no
    /// registered scraper are silently ignored. An empty request falls back
    /// to the default-enabled subset.
    pub fn select(&self, requested: &[String]) -> Vec<ScraperKind> {
        if requested.is_empty() {
            return self.default_enabled();
        }
        self.entries
            .iter()
            .filter(|e| requested.iter().any(|name| name == e.kind.name()))
            .map(|e| e.kind)
            .collect()
    }
}

impl Default for ScraperSet {
    fn default() -> Self {
        Self::from_config(&ScrapersConfig::default())
    }
}
