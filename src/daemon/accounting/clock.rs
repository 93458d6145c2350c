use chrono::{DateTime, Local};

use crate::daemon::{collection::events::TabId, storage::entities::DomainKey};

/// Measurements shorter than this are left pending. They are not lost: the start of
/// attribution stays where it was and they accumulate into the next measurement.
pub const MIN_ATTRIBUTION_MS: u64 = 1000;

/// The tab the engine believes is in front, whether or not its time is being counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabContext {
    pub tab_id: TabId,
    pub url: Option<String>,
    pub domain: Option<DomainKey>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tracking {
    pub key: DomainKey,
    pub since: DateTime<Local>,
}

/// Time measured for the active domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Elapsed {
    pub key: DomainKey,
    pub duration_ms: u64,
}

/// Which domain is being timed and since when. Keeping the domain and its start in one
/// `Option` makes "timing a domain without a start" unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttributionState {
    tab: Option<TabContext>,
    tracking: Option<Tracking>,
}

impl AttributionState {
    pub fn active_key(&self) -> Option<&DomainKey> {
        self.tracking.as_ref().map(|v| &v.key)
    }

    pub fn active_since(&self) -> Option<DateTime<Local>> {
        self.tracking.as_ref().map(|v| v.since)
    }

    pub fn tab(&self) -> Option<&TabContext> {
        self.tab.as_ref()
    }

    pub fn tab_id(&self) -> Option<TabId> {
        self.tab.as_ref().map(|v| v.tab_id)
    }

    /// Measures time spent on the active domain up to `now`. Never mutates anything: when a
    /// measurement is returned the caller must [restart](Self::restart) the clock so the same
    /// time is not attributed twice.
    pub fn elapse_since(&self, now: DateTime<Local>) -> Option<Elapsed> {
        let tracking = self.tracking.as_ref()?;
        let delta = (now - tracking.since).num_milliseconds();
        let duration_ms = u64::try_from(delta).ok()?;
        (duration_ms >= MIN_ATTRIBUTION_MS).then(|| Elapsed {
            key: tracking.key.clone(),
            duration_ms,
        })
    }

    /// Moves the start of attribution to `now`, keeping the active domain.
    pub fn restart(&mut self, now: DateTime<Local>) {
        if let Some(tracking) = self.tracking.as_mut() {
            tracking.since = now;
        }
    }

    /// Starts timing `key` from `now`, or stops timing when `key` is `None`.
    pub fn track(&mut self, key: Option<DomainKey>, now: DateTime<Local>) {
        self.tracking = key.map(|key| Tracking { key, since: now });
    }

    pub fn stop(&mut self) {
        self.tracking = None;
    }

    pub fn is_tracking(&self) -> bool {
        self.tracking.is_some()
    }

    pub fn set_tab(&mut self, tab: TabContext) {
        self.tab = Some(tab);
    }

    pub fn set_url(&mut self, url: Option<String>) {
        if let Some(tab) = self.tab.as_mut() {
            tab.url = url;
        }
    }
}
