use crate::config::ScanConfig;
use crate::event::Event;
use crate::target::ScopeList;

/// Distance thresholds plus the whitelist/blacklist matchers.
pub struct ScopeClassifier {
    whitelist: ScopeList,
    blacklist: ScopeList,
    search_distance: i32,
    report_distance: i32,
    dns_search_distance: i32,
}

impl ScopeClassifier {
    pub fn new(whitelist: ScopeList, blacklist: ScopeList, cfg: &ScanConfig) -> Self {
        Self {
            whitelist,
            blacklist,
            search_distance: cfg.scope_search_distance,
            report_distance: cfg.scope_report_distance,
            dns_search_distance: cfg.dns_search_distance,
        }
    }

    pub fn whitelist(&self) -> &ScopeList {
        &self.whitelist
    }

    pub fn blacklist(&self) -> &ScopeList {
        &self.blacklist
    }

    pub fn whitelisted(&self, event: &Event) -> bool {
        self.whitelist.matches_event(event)
    }

    pub fn blacklisted(&self, event: &Event) -> bool {
        self.blacklist.matches_event(event)
    }

    pub fn report_distance(&self) -> i32 {
        self.report_distance
    }

    pub fn in_search_distance(&self, distance: i32) -> bool {
        distance >= 0 && distance <= self.search_distance
    }

    pub fn in_report_distance(&self, distance: i32) -> bool {
        distance >= 0 && distance <= self.report_distance
    }

    /// Whether DNS children are speculated from an event at `distance`.
    pub fn spawns_dns_children(&self, distance: i32) -> bool {
        distance >= 0 && distance < self.dns_search_distance
    }

    /// Distance of a child whose parent sits at `parent`. Unset stays unset.
    pub fn child_distance(parent: i32) -> i32 {
        if parent < 0 {
            -1
        } else {
            parent + 1
        }
    }

    /// Final in-scope / internal classification of a resolved event.
    pub fn shepherd(&self, event: &Event, whitelisted: bool, is_duplicate: bool) {
        let distance = event.scope_distance();
        if event.host().is_none() {
            tracing::debug!("Making {} in-scope because it does not have identifying scope information", event);
            event.make_in_scope(0);
            return;
        }
        let target_distance = if whitelisted { 0 } else { distance };
        if (whitelisted || self.in_report_distance(distance)) && !is_duplicate {
            if target_distance == 0 {
                tracing::debug!("Making {} in-scope", event);
            }
            event.make_in_scope(target_distance);
        } else if distance > self.report_distance {
            tracing::debug!(
                "Making {} internal because its scope_distance ({}) > scope_report_distance ({})",
                event,
                distance,
                self.report_distance
            );
            event.make_internal();
        }
    }
}
