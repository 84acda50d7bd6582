//! Checkout reconciliation state machine
//!
//! `processing -> success | timeout`. The run future owns every timer, so
//! dropping it (the caller unmounting) cancels the interval, the elapsed
//! ticker and the deadline together.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, sleep, sleep_until, timeout_at, Instant};
use uuid::Uuid;

use crate::api::StatusApi;

/// Interval between status polls.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Hard deadline after which reconciliation gives up.
pub const RECONCILE_TIMEOUT: Duration = Duration::from_secs(60);
/// Pause between confirming success and handing back the navigation target,
/// so the UI can show the confirmation before the page changes.
pub const NAVIGATE_DELAY: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileState {
    Processing,
    Success,
    Timeout,
}

/// Terminal result of a reconciliation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Membership confirmed; the caller should navigate to `target`.
    Navigate { target: String },
    /// Deadline hit without confirmation. Not an error: the user is told to
    /// check back later, never locked out.
    TimedOut,
    /// A run was already started on this reconciler.
    AlreadyStarted,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconcileParams {
    /// Present only on the checkout-success redirect.
    pub success: bool,
    pub course_id: Option<Uuid>,
}

pub struct CheckoutReconciler {
    api: Arc<dyn StatusApi>,
    started: AtomicBool,
    state_tx: watch::Sender<ReconcileState>,
    elapsed_tx: watch::Sender<u64>,
}

impl CheckoutReconciler {
    pub fn new(api: Arc<dyn StatusApi>) -> Self {
        let (state_tx, _) = watch::channel(ReconcileState::Processing);
        let (elapsed_tx, _) = watch::channel(0);
        Self {
            api,
            started: AtomicBool::new(false),
            state_tx,
            elapsed_tx,
        }
    }

    /// Observe state transitions.
    pub fn state(&self) -> watch::Receiver<ReconcileState> {
        self.state_tx.subscribe()
    }

    /// Observe elapsed whole seconds, for progress display.
    pub fn elapsed(&self) -> watch::Receiver<u64> {
        self.elapsed_tx.subscribe()
    }

    /// Run the reconciliation loop to a terminal state.
    ///
    /// Without the success marker this navigates straight to the dashboard
    /// with zero polls. The guard makes a second call a no-op even if the
    /// caller's trigger fires twice.
    pub async fn run(&self, params: ReconcileParams) -> Outcome {
        if self.started.swap(true, Ordering::SeqCst) {
            return Outcome::AlreadyStarted;
        }

        if !params.success {
            return Outcome::Navigate {
                target: "/dashboard".to_string(),
            };
        }

        let poll_deadline = Instant::now() + RECONCILE_TIMEOUT;
        let deadline = sleep_until(poll_deadline);
        tokio::pin!(deadline);
        let mut poll_timer = interval(POLL_INTERVAL);
        let mut elapsed_timer = interval(Duration::from_secs(1));
        let mut elapsed: u64 = 0;

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => {
                    tracing::warn!(course_id = ?params.course_id, "Checkout reconciliation timed out");
                    self.state_tx.send_replace(ReconcileState::Timeout);
                    return Outcome::TimedOut;
                }

                _ = elapsed_timer.tick() => {
                    self.elapsed_tx.send_replace(elapsed);
                    elapsed += 1;
                }

                _ = poll_timer.tick() => {
                    // The deadline must fire even while a poll request is in
                    // flight, so the round is capped by the time remaining.
                    match timeout_at(poll_deadline, self.ready(params.course_id)).await {
                        Err(_) => {
                            tracing::warn!(course_id = ?params.course_id, "Checkout reconciliation timed out mid-poll");
                            self.state_tx.send_replace(ReconcileState::Timeout);
                            return Outcome::TimedOut;
                        }
                        Ok(false) => {}
                        Ok(true) => {
                            self.state_tx.send_replace(ReconcileState::Success);
                            if let Err(e) = self.api.refresh_session().await {
                                tracing::warn!(error = %e, "Session refresh after reconciliation failed");
                            }
                            sleep(NAVIGATE_DELAY).await;
                            let target = match params.course_id {
                                Some(course) => format!("/learning/{course}"),
                                None => "/dashboard".to_string(),
                            };
                            return Outcome::Navigate { target };
                        }
                    }
                }
            }
        }
    }

    /// One poll round: active membership, then the dependent enrollment
    /// check. Transport errors count as not-ready and the loop keeps going.
    async fn ready(&self, course_id: Option<Uuid>) -> bool {
        let active = match self.api.membership_status().await {
            Ok(Some(status)) => status.active,
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Status poll failed, will retry");
                false
            }
        };
        if !active {
            return false;
        }

        let Some(course) = course_id else {
            return true;
        };
        match self.api.enrollment_exists(course).await {
            Ok(enrolled) => enrolled,
            Err(e) => {
                tracing::warn!(error = %e, course_id = %course, "Enrollment poll failed, will retry");
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::api::{ClientError, ClientResult, MembershipStatus};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    /// Scripted poll responses; once the script runs out the last entry repeats.
    struct ScriptedApi {
        statuses: Mutex<VecDeque<Option<bool>>>,
        enrollments: Mutex<VecDeque<bool>>,
        status_calls: AtomicUsize,
        enrollment_calls: AtomicUsize,
        refresh_calls: AtomicUsize,
    }

    impl ScriptedApi {
        fn new(statuses: Vec<Option<bool>>, enrollments: Vec<bool>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into_iter().collect()),
                enrollments: Mutex::new(enrollments.into_iter().collect()),
                status_calls: AtomicUsize::new(0),
                enrollment_calls: AtomicUsize::new(0),
                refresh_calls: AtomicUsize::new(0),
            }
        }

        fn next<T: Copy>(queue: &Mutex<VecDeque<T>>, fallback: T) -> T {
            let mut queue = queue.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue.front().copied().unwrap_or(fallback)
            }
        }
    }

    #[async_trait]
    impl StatusApi for ScriptedApi {
        async fn membership_status(&self) -> ClientResult<Option<MembershipStatus>> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Self::next(&self.statuses, None).map(|active| MembershipStatus {
                active,
                tier: if active { "pro" } else { "free" }.to_string(),
                cancel_at_period_end: false,
                current_period_end: None,
            }))
        }

        async fn enrollment_exists(&self, _course_id: Uuid) -> ClientResult<bool> {
            self.enrollment_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Self::next(&self.enrollments, false))
        }

        async fn refresh_session(&self) -> ClientResult<()> {
            self.refresh_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_until_membership_and_enrollment_materialize() {
        let course = Uuid::new_v4();
        // Poll 1: no record yet. Poll 2: active but webhook has not enrolled.
        // Poll 3: both visible.
        let api = Arc::new(ScriptedApi::new(
            vec![None, Some(true), Some(true)],
            vec![false, true],
        ));
        let reconciler = CheckoutReconciler::new(api.clone());

        let outcome = reconciler
            .run(ReconcileParams {
                success: true,
                course_id: Some(course),
            })
            .await;

        assert_eq!(
            outcome,
            Outcome::Navigate {
                target: format!("/learning/{course}")
            }
        );
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 3);
        assert_eq!(api.enrollment_calls.load(Ordering::SeqCst), 2);
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 1);
        assert_eq!(*reconciler.state().borrow(), ReconcileState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_confirmation() {
        let api = Arc::new(ScriptedApi::new(vec![None], vec![]));
        let reconciler = CheckoutReconciler::new(api.clone());

        let outcome = reconciler
            .run(ReconcileParams {
                success: true,
                course_id: None,
            })
            .await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(*reconciler.state().borrow(), ReconcileState::Timeout);
        // No navigation, no session refresh.
        assert_eq!(api.refresh_calls.load(Ordering::SeqCst), 0);
        // Immediate poll plus one per interval up to the deadline.
        assert!(api.status_calls.load(Ordering::SeqCst) >= 2);
        assert!(*reconciler.elapsed().borrow() >= 59);
    }

    /// Status API that never answers, as when the network blackholes.
    struct HangingApi;

    #[async_trait]
    impl StatusApi for HangingApi {
        async fn membership_status(&self) -> ClientResult<Option<MembershipStatus>> {
            std::future::pending().await
        }

        async fn enrollment_exists(&self, _course_id: Uuid) -> ClientResult<bool> {
            std::future::pending().await
        }

        async fn refresh_session(&self) -> ClientResult<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_while_poll_is_in_flight() {
        let reconciler = CheckoutReconciler::new(Arc::new(HangingApi));

        let outcome = reconciler
            .run(ReconcileParams {
                success: true,
                course_id: None,
            })
            .await;

        assert_eq!(outcome, Outcome::TimedOut);
        assert_eq!(*reconciler.state().borrow(), ReconcileState::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_subscriber_observes_terminal_state() {
        let api = Arc::new(ScriptedApi::new(vec![Some(true)], vec![]));
        let reconciler = CheckoutReconciler::new(api);

        // No watch receiver exists while the run executes.
        reconciler
            .run(ReconcileParams {
                success: true,
                course_id: None,
            })
            .await;

        assert_eq!(*reconciler.state().borrow(), ReconcileState::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_success_marker_redirects_immediately() {
        let api = Arc::new(ScriptedApi::new(vec![Some(true)], vec![true]));
        let reconciler = CheckoutReconciler::new(api.clone());

        let outcome = reconciler
            .run(ReconcileParams {
                success: false,
                course_id: Some(Uuid::new_v4()),
            })
            .await;

        assert_eq!(
            outcome,
            Outcome::Navigate {
                target: "/dashboard".to_string()
            }
        );
        assert_eq!(api.status_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_at_most_once() {
        let api = Arc::new(ScriptedApi::new(vec![Some(true)], vec![]));
        let reconciler = CheckoutReconciler::new(api.clone());

        let params = ReconcileParams {
            success: true,
            course_id: None,
        };
        let first = reconciler.run(params).await;
        assert!(matches!(first, Outcome::Navigate { .. }));
        let calls_after_first = api.status_calls.load(Ordering::SeqCst);

        let second = reconciler.run(params).await;
        assert_eq!(second, Outcome::AlreadyStarted);
        assert_eq!(api.status_calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_membership_without_course_skips_enrollment_check() {
        let api = Arc::new(ScriptedApi::new(vec![Some(true)], vec![]));
        let reconciler = CheckoutReconciler::new(api.clone());

        let outcome = reconciler
            .run(ReconcileParams {
                success: true,
                course_id: None,
            })
            .await;

        assert_eq!(
            outcome,
            Outcome::Navigate {
                target: "/dashboard".to_string()
            }
        );
        assert_eq!(api.enrollment_calls.load(Ordering::SeqCst), 0);
    }
}
