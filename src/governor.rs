use serde::{Deserialize, Serialize};

/// Configurable thresholds beyond which the run aborts rather than limping
/// to completion with an unusably incomplete export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureThresholds {
    /// Zero-tolerance gate: if `false`, the very first terminal page
    /// failure aborts the run regardless of `max_page_failures`. Set to
    /// `true` to let the threshold/ratio checks below govern instead.
    pub allow_failures: bool,
    pub max_page_failures: Option<u32>,
    pub max_attachment_failures: Option<u32>,
    /// Percentage (0-100) of discovered attachments allowed to fail before
    /// the run aborts; `None` disables the ratio check.
    pub max_attachment_failure_percent: Option<f64>,
    /// Whether hitting a permission-restricted page is tolerated at all.
    pub restricted_pages_allowed: bool,
}

impl Default for FailureThresholds {
    fn default() -> Self {
        FailureThresholds {
            allow_failures: false,
            max_page_failures: Some(50),
            max_attachment_failures: Some(100),
            max_attachment_failure_percent: Some(50.0),
            restricted_pages_allowed: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FailureTally {
    pub page_failures: u32,
    pub attachment_failures: u32,
    pub restricted_pages: u32,
    pub total_discovered: u32,
    pub total_attachments: u32,
}

/// Tracks failures over a run and decides whether the configured
/// thresholds have been crossed. A crossed threshold means the scheduler
/// should stop submitting new work and the CLI should exit with the
/// abort-threshold exit code.
///
/// Only terminal (give-up) failures are recorded here — a worker failure
/// that is still going to be retried is never reported to the governor,
/// matching the scheduler's "otherwise markFailed(id) and notify C9"
/// control flow.
#[derive(Debug, Clone)]
pub struct FailureGovernor {
    thresholds: FailureThresholds,
    tally: FailureTally,
}

impl FailureGovernor {
    pub fn new(thresholds: FailureThresholds) -> Self {
        FailureGovernor {
            thresholds,
            tally: FailureTally::default(),
        }
    }

    pub fn record_page_failure(&mut self) {
        self.tally.page_failures += 1;
    }

    pub fn record_attachment_failure(&mut self) {
        self.tally.attachment_failures += 1;
    }

    pub fn record_restricted_page(&mut self) {
        self.tally.restricted_pages += 1;
    }

    pub fn record_discovered(&mut self, count: u32) {
        self.tally.total_discovered += count;
    }

    pub fn record_total_attachments(&mut self, count: u32) {
        self.tally.total_attachments += count;
    }

    pub fn tally(&self) -> &FailureTally {
        &self.tally
    }

    /// Returns `Some(reason)` the first time any of the four predicates is
    /// crossed, evaluated in the order the design lists them.
    pub fn should_abort(&self) -> Option<String> {
        if !self.thresholds.allow_failures && self.tally.page_failures > 0 {
            return Some(format!(
                "page failure recorded ({}) and allowFailures is disabled",
                self.tally.page_failures
            ));
        }
        if let Some(max) = self.thresholds.max_page_failures {
            if self.tally.page_failures > max {
                return Some(format!(
                    "page failures {} exceeded threshold {}",
                    self.tally.page_failures, max
                ));
            }
        }
        if let Some(max) = self.thresholds.max_attachment_failures {
            if self.tally.attachment_failures > max {
                return Some(format!(
                    "attachment failures {} exceeded threshold {}",
                    self.tally.attachment_failures, max
                ));
            }
        }
        if let Some(percent) = self.thresholds.max_attachment_failure_percent {
            if self.tally.total_attachments > 0 {
                let observed =
                    self.tally.attachment_failures as f64 / self.tally.total_attachments as f64 * 100.0;
                if observed > percent {
                    return Some(format!(
                        "attachment failure rate {observed:.1}% exceeded threshold {percent:.1}%"
                    ));
                }
            }
        }
        if self.tally.restricted_pages > 0 && !self.thresholds.restricted_pages_allowed {
            return Some(format!(
                "{} restricted page(s) encountered and restrictedPagesAllowed is disabled",
                self.tally.restricted_pages
            ));
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_abort_below_thresholds() {
        let governor = FailureGovernor::new(FailureThresholds::default());
        assert!(governor.should_abort().is_none());
    }

    #[test]
    fn default_allow_failures_false_aborts_on_first_page_failure() {
        let mut governor = FailureGovernor::new(FailureThresholds::default());
        governor.record_page_failure();
        assert!(governor.should_abort().is_some());
    }

    #[test]
    fn allow_failures_true_lets_the_page_threshold_govern_instead() {
        let mut governor = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: Some(2),
            ..FailureThresholds::default()
        });
        governor.record_page_failure();
        governor.record_page_failure();
        assert!(governor.should_abort().is_none());
        governor.record_page_failure();
        assert!(governor.should_abort().is_some());
    }

    #[test]
    fn aborts_on_attachment_failure_percent() {
        let mut governor = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: None,
            max_attachment_failures: None,
            max_attachment_failure_percent: Some(10.0),
            restricted_pages_allowed: true,
        });
        governor.record_total_attachments(10);
        governor.record_attachment_failure();
        governor.record_attachment_failure();
        assert!(governor.should_abort().is_some());
    }

    #[test]
    fn attachment_failure_percent_ignores_unrelated_page_failures() {
        let mut governor = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: None,
            max_attachment_failures: None,
            max_attachment_failure_percent: Some(10.0),
            restricted_pages_allowed: true,
        });
        governor.record_discovered(100);
        governor.record_total_attachments(10);
        governor.record_attachment_failure();
        // One attachment failure out of ten discovered pages would have
        // tripped the old (wrong) page-ratio math; it must not here.
        assert!(governor.should_abort().is_none());
    }

    #[test]
    fn restricted_page_aborts_only_when_disallowed() {
        let mut allowed = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: None,
            max_attachment_failures: None,
            max_attachment_failure_percent: None,
            restricted_pages_allowed: true,
        });
        allowed.record_restricted_page();
        assert!(allowed.should_abort().is_none());

        let mut disallowed = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: None,
            max_attachment_failures: None,
            max_attachment_failure_percent: None,
            restricted_pages_allowed: false,
        });
        disallowed.record_restricted_page();
        assert!(disallowed.should_abort().is_some());
    }

    #[test]
    fn disabled_thresholds_are_ignored() {
        let mut governor = FailureGovernor::new(FailureThresholds {
            allow_failures: true,
            max_page_failures: None,
            max_attachment_failures: None,
            max_attachment_failure_percent: None,
            restricted_pages_allowed: true,
        });
        for _ in 0..1000 {
            governor.record_page_failure();
        }
        assert!(governor.should_abort().is_none());
    }
}
