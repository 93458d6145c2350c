//! State machine translating browser events into attribution.
//!
//! Every transition first settles the time measured for the active domain, then moves the
//! state. Nothing here touches storage, transitions only describe what should happen as a list
//! of [Effect]s.

use chrono::{DateTime, Local, NaiveDate};
use tracing::debug;

use crate::{
    daemon::{
        collection::{
            domain::extract_opt,
            events::{EngineEvent, IdleState, TabId, TabInfo},
        },
        storage::entities::DomainKey,
    },
    utils::time::epoch_millis,
};

use super::clock::{AttributionState, TabContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Interval,
    FocusLost,
    Idle,
    Suspend,
    Request,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Add `duration_ms` to `key`, bucketed under `day`.
    Attribute {
        key: DomainKey,
        day: NaiveDate,
        duration_ms: u64,
        at: u64,
    },
    Visit {
        key: DomainKey,
        at: u64,
    },
    Flush(FlushReason),
}

pub struct Reconciler {
    state: AttributionState,
    focused: bool,
    idle: bool,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reconciler {
    pub fn new() -> Self {
        Self {
            state: AttributionState::default(),
            focused: true,
            idle: false,
        }
    }

    pub fn state(&self) -> &AttributionState {
        &self.state
    }

    pub fn reconcile(&mut self, event: EngineEvent, now: DateTime<Local>) -> Vec<Effect> {
        let mut effects = Vec::new();
        match event {
            EngineEvent::TabActivated { tab_id, url } => {
                self.settle(now, &mut effects);
                // An activation is treated as proof that the user is in front of the browser.
                self.focused = true;
                self.idle = false;
                let domain = self.switch_tab(tab_id, url, now);
                if let Some(key) = domain {
                    effects.push(visit(key, now));
                }
            }
            EngineEvent::NavigationCompleted { tab_id, url } => {
                if self.state.tab_id() != Some(tab_id) {
                    debug!("Ignoring navigation of background tab {tab_id}");
                    return effects;
                }
                let domain = extract_opt(url.as_deref());
                if self.state.tab().and_then(|v| v.domain.as_ref()) == domain.as_ref() {
                    // Same site, time keeps accruing from the original start.
                    self.state.set_url(url);
                    return effects;
                }

                self.settle(now, &mut effects);
                self.state.set_tab(TabContext {
                    tab_id,
                    url,
                    domain: domain.clone(),
                });
                let tracked = domain.clone().filter(|_| self.present());
                self.state.track(tracked, now);
                if let Some(key) = domain {
                    effects.push(visit(key, now));
                }
            }
            EngineEvent::FocusLost => {
                self.settle(now, &mut effects);
                self.focused = false;
                self.state.stop();
                effects.push(Effect::Flush(FlushReason::FocusLost));
            }
            EngineEvent::FocusGained { active_tab } | EngineEvent::Startup { active_tab } => {
                self.settle(now, &mut effects);
                self.focused = true;
                self.idle = false;
                self.resume(active_tab, now);
            }
            EngineEvent::IdleChanged(IdleState::Idle | IdleState::Locked) => {
                self.settle(now, &mut effects);
                self.idle = true;
                self.state.stop();
                effects.push(Effect::Flush(FlushReason::Idle));
            }
            EngineEvent::IdleChanged(IdleState::Active) => {
                self.settle(now, &mut effects);
                self.idle = false;
                if !self.state.is_tracking() && self.focused {
                    let domain = self.state.tab().and_then(|v| v.domain.clone());
                    self.state.track(domain, now);
                }
            }
            EngineEvent::Tick => {
                self.settle(now, &mut effects);
            }
            EngineEvent::Suspend => {
                self.settle(now, &mut effects);
                effects.push(Effect::Flush(FlushReason::Suspend));
            }
        }
        effects
    }

    fn present(&self) -> bool {
        self.focused && !self.idle
    }

    /// Attributes measured time to the active domain and restarts its clock.
    fn settle(&mut self, now: DateTime<Local>, effects: &mut Vec<Effect>) {
        if let Some(elapsed) = self.state.elapse_since(now) {
            effects.push(Effect::Attribute {
                key: elapsed.key,
                day: now.date_naive(),
                duration_ms: elapsed.duration_ms,
                at: epoch_millis(&now),
            });
            self.state.restart(now);
        }
    }

    fn switch_tab(
        &mut self,
        tab_id: TabId,
        url: Option<String>,
        now: DateTime<Local>,
    ) -> Option<DomainKey> {
        let domain = extract_opt(url.as_deref());
        self.state.set_tab(TabContext {
            tab_id,
            url,
            domain: domain.clone(),
        });
        self.state.track(domain.clone(), now);
        domain
    }

    /// Re-enters tracking without counting a visit. Without fresh tab data the last known tab
    /// is resumed.
    fn resume(&mut self, active_tab: Option<TabInfo>, now: DateTime<Local>) {
        match active_tab {
            Some(TabInfo { tab_id, url }) => {
                self.switch_tab(tab_id, url, now);
            }
            None => {
                let domain = self.state.tab().and_then(|v| v.domain.clone());
                self.state.track(domain, now);
            }
        }
    }
}

fn visit(key: DomainKey, now: DateTime<Local>) -> Effect {
    Effect::Visit {
        key,
        at: epoch_millis(&now),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Local, NaiveDate, TimeZone};

    use super::*;
    use crate::daemon::storage::entities::AggregateStore;

    const TEST_DATE: NaiveDate = NaiveDate::from_ymd_opt(2024, 3, 14).unwrap();

    fn at(seconds: i64) -> DateTime<Local> {
        at_ms(seconds * 1000)
    }

    fn at_ms(millis: i64) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 14, 8, 0, 0).unwrap() + Duration::milliseconds(millis)
    }

    fn activated(tab_id: TabId, url: &str) -> EngineEvent {
        EngineEvent::TabActivated {
            tab_id,
            url: Some(url.into()),
        }
    }

    fn navigated(tab_id: TabId, url: &str) -> EngineEvent {
        EngineEvent::NavigationCompleted {
            tab_id,
            url: Some(url.into()),
        }
    }

    /// Replays events and applies their effects the way the processing module does.
    fn replay(events: impl IntoIterator<Item = (EngineEvent, DateTime<Local>)>) -> AggregateStore {
        let mut reconciler = Reconciler::new();
        let mut store = AggregateStore::new();
        for (event, now) in events {
            for effect in reconciler.reconcile(event, now) {
                match effect {
                    Effect::Attribute {
                        key,
                        day,
                        duration_ms,
                        at,
                    } => store.attribute(&key, day, duration_ms, at),
                    Effect::Visit { key, at } => store.record_visit(&key, at),
                    Effect::Flush(_) => {}
                }
                for (_, record) in store.iter() {
                    assert!(record.is_consistent());
                }
            }
        }
        store
    }

    #[test]
    fn tab_switch_then_focus_loss() {
        let store = replay([
            (activated(1, "https://example.com/"), at(0)),
            (activated(2, "https://other.org/page"), at(5)),
            (EngineEvent::FocusLost, at(8)),
        ]);

        let example = store.get("example.com").unwrap();
        assert_eq!(example.total_time(), 5000);
        assert_eq!(example.visits(), 1);
        assert_eq!(example.daily().len(), 1);
        assert_eq!(example.time_on(TEST_DATE), 5000);

        let other = store.get("other.org").unwrap();
        assert_eq!(other.total_time(), 3000);
        assert_eq!(other.visits(), 1);
        assert_eq!(other.daily().len(), 1);
        assert_eq!(other.time_on(TEST_DATE), 3000);
    }

    #[test]
    fn recorded_time_equals_sum_of_gaps() {
        let domains = ["a.com", "b.com", "c.com"];
        let gaps_ms = [1000, 2500, 1001, 60_000, 3333, 1000, 7777];
        let mut now = 0;
        let mut events = vec![];
        for (index, gap) in gaps_ms.iter().enumerate() {
            let url = format!("https://{}/", domains[index % domains.len()]);
            events.push((activated(index as TabId, &url), at_ms(now)));
            now += gap;
        }
        events.push((EngineEvent::FocusLost, at_ms(now)));

        let store = replay(events);
        let recorded: u64 = store.iter().map(|(_, v)| v.total_time()).sum();
        assert_eq!(recorded, gaps_ms.iter().sum::<i64>() as u64);
    }

    #[test]
    fn sub_second_attribution_is_dropped_on_switch() {
        let store = replay([
            (activated(1, "https://short.com"), at_ms(0)),
            (activated(2, "https://long.com"), at_ms(999)),
            (activated(3, "chrome://newtab"), at_ms(1999)),
        ]);
        assert_eq!(store.get("short.com").unwrap().total_time(), 0);
        assert_eq!(store.get("short.com").unwrap().visits(), 1);
        assert_eq!(store.get("long.com").unwrap().total_time(), 1000);
    }

    #[test]
    fn pending_time_accumulates_across_ticks() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at_ms(0));

        assert!(reconciler.reconcile(EngineEvent::Tick, at_ms(600)).is_empty());
        let effects = reconciler.reconcile(EngineEvent::Tick, at_ms(1200));
        assert_eq!(
            effects,
            vec![Effect::Attribute {
                key: DomainKey::new("a.com"),
                day: TEST_DATE,
                duration_ms: 1200,
                at: epoch_millis(&at_ms(1200)),
            }]
        );
        assert_eq!(reconciler.state().active_since(), Some(at_ms(1200)));
    }

    #[test]
    fn every_activation_counts_as_a_visit() {
        let store = replay([
            (activated(1, "https://a.com"), at(0)),
            (activated(2, "https://a.com/other"), at(2)),
            (activated(1, "https://a.com"), at(4)),
            (EngineEvent::Suspend, at(6)),
        ]);
        let record = store.get("a.com").unwrap();
        assert_eq!(record.visits(), 3);
        assert_eq!(record.total_time(), 6000);
    }

    #[test]
    fn unresolvable_activation_stops_tracking() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));
        let effects = reconciler.reconcile(activated(2, "about:blank"), at(3));

        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Attribute { duration_ms: 3000, .. }));
        assert_eq!(reconciler.state().active_key(), None);
        assert_eq!(reconciler.state().tab_id(), Some(2));
    }

    #[test]
    fn navigation_of_background_tab_is_ignored() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));
        let effects = reconciler.reconcile(navigated(7, "https://b.com"), at(2));

        assert!(effects.is_empty());
        assert_eq!(reconciler.state().active_key(), Some(&DomainKey::new("a.com")));
        assert_eq!(reconciler.state().active_since(), Some(at(0)));
    }

    #[test]
    fn same_domain_navigation_keeps_start() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com/one"), at(0));
        let effects = reconciler.reconcile(navigated(1, "https://a.com/two"), at(5));

        assert!(effects.is_empty());
        assert_eq!(reconciler.state().active_since(), Some(at(0)));
        assert_eq!(
            reconciler.state().tab().unwrap().url.as_deref(),
            Some("https://a.com/two")
        );
    }

    #[test]
    fn cross_domain_navigation_counts_a_visit() {
        let store = replay([
            (activated(1, "https://a.com"), at(0)),
            (navigated(1, "https://b.com"), at(4)),
            (navigated(1, "https://b.com/deeper"), at(6)),
            (EngineEvent::FocusLost, at(10)),
        ]);
        assert_eq!(store.get("a.com").unwrap().total_time(), 4000);
        assert_eq!(store.get("b.com").unwrap().total_time(), 6000);
        assert_eq!(store.get("b.com").unwrap().visits(), 1);
    }

    #[test]
    fn focus_round_trip_is_not_a_visit() {
        let store = replay([
            (activated(1, "https://a.com"), at(0)),
            (EngineEvent::FocusLost, at(2)),
            (
                EngineEvent::FocusGained {
                    active_tab: Some(TabInfo {
                        tab_id: 1,
                        url: Some("https://a.com".into()),
                    }),
                },
                at(100),
            ),
            (EngineEvent::FocusLost, at(103)),
        ]);
        let record = store.get("a.com").unwrap();
        assert_eq!(record.visits(), 1);
        assert_eq!(record.total_time(), 5000);
    }

    #[test]
    fn unfocused_time_is_not_attributed() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));
        reconciler.reconcile(EngineEvent::FocusLost, at(1));
        assert_eq!(reconciler.state().active_key(), None);

        let effects = reconciler.reconcile(EngineEvent::Tick, at(50));
        assert!(effects.is_empty());

        // Background navigation while unfocused counts the visit but does not start timing.
        let effects = reconciler.reconcile(navigated(1, "https://b.com"), at(60));
        assert_eq!(effects.len(), 1);
        assert!(matches!(&effects[0], Effect::Visit { .. }));
        assert_eq!(reconciler.state().active_key(), None);
    }

    #[test]
    fn idle_pauses_and_active_resumes_known_domain() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));

        let effects = reconciler.reconcile(EngineEvent::IdleChanged(IdleState::Idle), at(30));
        assert!(matches!(&effects[0], Effect::Attribute { duration_ms: 30_000, .. }));
        assert_eq!(effects[1], Effect::Flush(FlushReason::Idle));
        assert_eq!(reconciler.state().active_key(), None);

        let effects = reconciler.reconcile(EngineEvent::IdleChanged(IdleState::Active), at(300));
        assert!(effects.is_empty());
        assert_eq!(reconciler.state().active_key(), Some(&DomainKey::new("a.com")));
        assert_eq!(reconciler.state().active_since(), Some(at(300)));
    }

    #[test]
    fn active_while_unfocused_stays_idle() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));
        reconciler.reconcile(EngineEvent::FocusLost, at(1));
        reconciler.reconcile(EngineEvent::IdleChanged(IdleState::Locked), at(2));
        reconciler.reconcile(EngineEvent::IdleChanged(IdleState::Active), at(3));
        assert_eq!(reconciler.state().active_key(), None);
    }

    #[test]
    fn active_while_tracking_keeps_pending_time() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at_ms(0));
        reconciler.reconcile(EngineEvent::IdleChanged(IdleState::Active), at_ms(500));
        assert_eq!(reconciler.state().active_since(), Some(at_ms(0)));
    }

    #[test]
    fn startup_tracks_without_visit() {
        let mut reconciler = Reconciler::new();
        let effects = reconciler.reconcile(
            EngineEvent::Startup {
                active_tab: Some(TabInfo {
                    tab_id: 3,
                    url: Some("https://A.com/x".into()),
                }),
            },
            at(0),
        );
        assert!(effects.is_empty());
        assert_eq!(reconciler.state().active_key(), Some(&DomainKey::new("a.com")));
        assert_eq!(reconciler.state().tab_id(), Some(3));
    }

    #[test]
    fn suspend_flushes_pending_time_without_state_change() {
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(activated(1, "https://a.com"), at(0));
        let effects = reconciler.reconcile(EngineEvent::Suspend, at(4));
        assert!(matches!(&effects[0], Effect::Attribute { duration_ms: 4000, .. }));
        assert_eq!(effects[1], Effect::Flush(FlushReason::Suspend));
        assert_eq!(reconciler.state().active_key(), Some(&DomainKey::new("a.com")));
        assert_eq!(reconciler.state().active_since(), Some(at(4)));
    }
}
