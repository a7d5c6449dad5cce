//! Identification session state machine.
//!
//! A session owns the observable [`IdentificationOutcome`] and runs at most
//! one identification at a time:
//!
//! ```text
//! Idle ──submit──▶ InFlight ──ok, candidates──▶ Succeeded
//!                     │
//!                     └──error / no candidates──▶ Failed ──retry──▶ InFlight
//!
//! any state ──reset──▶ Idle
//! ```
//!
//! Submitting from a settled state (`Succeeded` or `Failed`) starts a fresh
//! attempt with the new frame. Submitting or retrying while `InFlight` is a
//! no-op. A request leaves `InFlight` through its own completion or through
//! `reset`, which aborts the outstanding task. Dropping the task releases its
//! payload, and any completion that still races the abort is discarded.
//!
//! The current state lives in a `tokio::sync::watch` channel so readers
//! always see a whole transition. Observers that need every transition in
//! order, rather than just the latest state, use [`IdentificationSession::transitions`].

use crate::capture::CaptureSource;
use crate::error::{FailureKind, IdentifyError};
use crate::pipeline::Identifier;
use crate::types::{CapturedImage, IdentificationResult, SpeciesCandidate};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

const TRANSITION_BUFFER: usize = 32;

/// Why the last attempt failed, as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&IdentifyError> for Failure {
    fn from(err: &IdentifyError) -> Self {
        Failure {
            kind: err.kind(),
            message: err.user_message(),
        }
    }
}

/// Observable state of a session.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum IdentificationOutcome {
    /// No attempt made, or the session was reset
    #[default]
    Idle,
    /// A request is outstanding
    InFlight,
    /// The service returned at least one candidate
    Succeeded(IdentificationResult),
    Failed(Failure),
}

impl IdentificationOutcome {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, IdentificationOutcome::InFlight)
    }

    /// Candidates of a successful attempt, empty in every other state.
    pub fn candidates(&self) -> &[SpeciesCandidate] {
        match self {
            IdentificationOutcome::Succeeded(result) => &result.candidates,
            _ => &[],
        }
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            IdentificationOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            IdentificationOutcome::Idle => "Idle",
            IdentificationOutcome::InFlight => "InFlight",
            IdentificationOutcome::Succeeded(_) => "Succeeded",
            IdentificationOutcome::Failed(_) => "Failed",
        }
    }
}

/// Bookkeeping for the current attempt, guarded together with transitions.
#[derive(Debug, Default)]
struct Attempt {
    /// Bumped on every new attempt and on reset
    generation: u64,
    /// Frame of the latest attempt, kept for retry
    image: Option<Arc<CapturedImage>>,
    /// Task running the latest attempt
    task: Option<AbortHandle>,
}

struct Shared {
    attempt: Mutex<Attempt>,
    state: watch::Sender<IdentificationOutcome>,
    transitions: broadcast::Sender<IdentificationOutcome>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Attempt> {
        self.attempt.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `next` atomically; `None` leaves the state untouched.
    ///
    /// Callers hold the attempt lock so transitions are published in the
    /// order they were decided.
    fn transition<F>(&self, next: F) -> bool
    where
        F: FnOnce(&IdentificationOutcome) -> Option<IdentificationOutcome>,
    {
        let mut applied = None;
        self.state.send_if_modified(|state| match next(state) {
            Some(new_state) => {
                debug!("Session state {} -> {}", state.name(), new_state.name());
                *state = new_state.clone();
                applied = Some(new_state);
                true
            }
            None => false,
        });

        match applied {
            Some(new_state) => {
                // No subscribers is fine
                let _ = self.transitions.send(new_state);
                true
            }
            None => false,
        }
    }

    fn complete(&self, generation: u64, outcome: Result<IdentificationResult, IdentifyError>) {
        let mut attempt = self.lock();
        if attempt.generation != generation {
            debug!(
                "Discarding completion of attempt {} (current is {})",
                generation, attempt.generation
            );
            return;
        }
        attempt.task = None;

        let next = match outcome {
            Ok(result) if !result.is_empty() => {
                info!("Identification succeeded with {} candidates", result.len());
                attempt.image = None;
                IdentificationOutcome::Succeeded(result)
            }
            Ok(_) => {
                warn!("Identification returned no candidates");
                IdentificationOutcome::Failed(Failure::from(&IdentifyError::NoMatch))
            }
            Err(err) => {
                warn!("Identification failed: {}", err);
                IdentificationOutcome::Failed(Failure::from(&err))
            }
        };

        self.transition(|state| state.is_in_flight().then_some(next));
    }
}

/// Drives identifications for one UI session.
///
/// Cloning a session yields another handle to the same state.
#[derive(Clone)]
pub struct IdentificationSession {
    identifier: Arc<dyn Identifier>,
    runtime: Handle,
    shared: Arc<Shared>,
}

impl IdentificationSession {
    /// Creates a session that runs requests on the current Tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime; use
    /// [`IdentificationSession::with_runtime`] in that case.
    pub fn new<I: Identifier + 'static>(identifier: I) -> Self {
        Self::with_runtime(identifier, Handle::current())
    }

    pub fn with_runtime<I: Identifier + 'static>(identifier: I, runtime: Handle) -> Self {
        let (state, _) = watch::channel(IdentificationOutcome::Idle);
        let (transitions, _) = broadcast::channel(TRANSITION_BUFFER);
        Self {
            identifier: Arc::new(identifier),
            runtime,
            shared: Arc::new(Shared {
                attempt: Mutex::new(Attempt::default()),
                state,
                transitions,
            }),
        }
    }

    /// Starts identifying `image`.
    ///
    /// Returns `false`, and does nothing, while another request is in flight.
    pub fn submit(&self, image: CapturedImage) -> bool {
        self.start(Some(Arc::new(image)))
    }

    /// Re-runs the whole pipeline on the frame of the failed attempt.
    ///
    /// Only valid from `Failed` with a retained frame; returns `false` otherwise.
    pub fn retry(&self) -> bool {
        self.start(None)
    }

    /// Captures a frame from `source` and submits it.
    ///
    /// Nothing is captured while a request is in flight. A capture error is
    /// returned to the caller and leaves the session untouched, so the frame
    /// of a failed attempt can still be retried.
    pub fn capture_and_submit<S: CaptureSource>(
        &self,
        source: &mut S,
    ) -> Result<bool, IdentifyError> {
        if self.outcome().is_in_flight() {
            debug!("Ignoring capture while a request is in flight");
            return Ok(false);
        }

        let image = source.capture_frame().map_err(|err| {
            warn!("Capture failed: {}", err);
            err
        })?;
        Ok(self.submit(image))
    }

    /// Returns to `Idle` from any state, dropping results and the retained
    /// frame and aborting the outstanding request, if any.
    pub fn reset(&self) {
        let mut attempt = self.shared.lock();
        attempt.generation += 1;
        attempt.image = None;
        if let Some(task) = attempt.task.take() {
            debug!("Aborting outstanding identification attempt");
            task.abort();
        }
        self.shared.transition(|state| {
            (*state != IdentificationOutcome::Idle).then_some(IdentificationOutcome::Idle)
        });
    }

    /// Snapshot of the current state.
    pub fn outcome(&self) -> IdentificationOutcome {
        self.shared.state.borrow().clone()
    }

    /// Candidates of the current state, empty unless `Succeeded`.
    pub fn results(&self) -> Vec<SpeciesCandidate> {
        self.shared.state.borrow().candidates().to_vec()
    }

    /// Receiver that always holds the latest state.
    pub fn subscribe(&self) -> watch::Receiver<IdentificationOutcome> {
        self.shared.state.subscribe()
    }

    /// Receiver of every transition from now on, in order.
    pub fn transitions(&self) -> broadcast::Receiver<IdentificationOutcome> {
        self.shared.transitions.subscribe()
    }

    /// Waits until no request is in flight and returns the settled state.
    pub async fn wait_settled(&self) -> IdentificationOutcome {
        let mut receiver = self.subscribe();
        let settled = receiver
            .wait_for(|state| !state.is_in_flight())
            .await
            .map(|state| state.clone());
        settled.unwrap_or_else(|_| self.outcome())
    }

    fn start(&self, image: Option<Arc<CapturedImage>>) -> bool {
        let mut attempt = self.shared.lock();
        let retrying = image.is_none();
        let Some(image) = image.or_else(|| attempt.image.clone()) else {
            debug!("Nothing to retry");
            return false;
        };

        let started = self.shared.transition(|state| {
            let allowed = match state {
                IdentificationOutcome::InFlight => false,
                IdentificationOutcome::Failed(_) => true,
                IdentificationOutcome::Idle | IdentificationOutcome::Succeeded(_) => !retrying,
            };
            allowed.then_some(IdentificationOutcome::InFlight)
        });
        if !started {
            debug!("Ignoring {} in current state", if retrying { "retry" } else { "submit" });
            return false;
        }

        attempt.generation += 1;
        attempt.image = Some(Arc::clone(&image));
        let generation = attempt.generation;

        info!("Starting identification attempt {}", generation);
        let identifier = Arc::clone(&self.identifier);
        let shared = Arc::clone(&self.shared);
        let task = self.runtime.spawn(async move {
            let outcome = identifier.identify(image).await;
            shared.complete(generation, outcome);
        });
        attempt.task = Some(task.abort_handle());
        true
    }
}

impl std::fmt::Debug for IdentificationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentificationSession")
            .field("identifier", &"<identifier>")
            .field("outcome", &self.shared.state.borrow().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NO_MATCH_MESSAGE, SPECIES_NOT_FOUND_MESSAGE};
    use crate::types::{PixelFormat, Rotation};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Semaphore;

    /// Identifier that replays canned outcomes, one per call.
    ///
    /// Each call waits for a permit on `gate`, which lets tests hold a
    /// request in flight.
    struct Script {
        responses: Mutex<VecDeque<Result<IdentificationResult, IdentifyError>>>,
        calls: AtomicUsize,
        seen: Mutex<Vec<Arc<CapturedImage>>>,
        gate: Semaphore,
    }

    #[derive(Clone)]
    struct Scripted(Arc<Script>);

    impl Scripted {
        fn with_permits(permits: usize) -> Self {
            Scripted(Arc::new(Script {
                responses: Mutex::new(VecDeque::new()),
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                gate: Semaphore::new(permits),
            }))
        }

        /// Calls complete as soon as they are made.
        fn open() -> Self {
            Self::with_permits(1000)
        }

        /// Calls stay in flight until `release` is called.
        fn gated() -> Self {
            Self::with_permits(0)
        }

        fn respond(&self, response: Result<IdentificationResult, IdentifyError>) -> &Self {
            self.0.responses.lock().unwrap().push_back(response);
            self
        }

        fn release(&self) {
            self.0.gate.add_permits(1);
        }

        fn calls(&self) -> usize {
            self.0.calls.load(Ordering::SeqCst)
        }

        fn seen(&self) -> Vec<Arc<CapturedImage>> {
            self.0.seen.lock().unwrap().clone()
        }

        /// Gate permits not yet taken by a call.
        fn unused_permits(&self) -> usize {
            self.0.gate.available_permits()
        }
    }

    #[async_trait]
    impl Identifier for Scripted {
        async fn identify(
            &self,
            image: Arc<CapturedImage>,
        ) -> Result<IdentificationResult, IdentifyError> {
            self.0.calls.fetch_add(1, Ordering::SeqCst);
            self.0.seen.lock().unwrap().push(image);
            self.0.gate.acquire().await.unwrap().forget();
            let next = self.0.responses.lock().unwrap().pop_front();
            next.unwrap_or(Err(IdentifyError::NoMatch))
        }
    }

    fn frame(shade: u8) -> CapturedImage {
        CapturedImage::new(vec![shade; 4 * 4 * 3], 4, 4, PixelFormat::Rgb8, Rotation::None)
    }

    fn rose() -> IdentificationResult {
        IdentificationResult::parse(
            r#"{"results":[{"score":0.85,
                "species":{"scientificNameWithoutAuthor":"Rosa gallica",
                    "family":{"scientificNameWithoutAuthor":"Rosaceae"},
                    "genus":{"scientificNameWithoutAuthor":"Rosa"},
                    "commonNames":["French rose"]}}],
                "remainingIdentificationRequests":42}"#,
        )
        .unwrap()
    }

    struct FailingCamera;

    impl CaptureSource for FailingCamera {
        fn capture_frame(&mut self) -> Result<CapturedImage, IdentifyError> {
            Err(IdentifyError::Capture("camera unavailable".to_string()))
        }
    }

    struct FixedCamera(CapturedImage);

    impl CaptureSource for FixedCamera {
        fn capture_frame(&mut self) -> Result<CapturedImage, IdentifyError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_initial_state_is_idle() {
        let session = IdentificationSession::new(Scripted::open());
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);
        assert!(session.results().is_empty());
        assert!(!session.retry());
    }

    #[tokio::test]
    async fn test_successful_identification() {
        let scripted = Scripted::open();
        scripted.respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());

        assert!(session.submit(frame(1)));
        assert_eq!(session.outcome(), IdentificationOutcome::InFlight);

        let settled = session.wait_settled().await;
        let candidates = settled.candidates();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].scientific_name, "Rosa gallica");
        assert_eq!(candidates[0].score, 0.85);
        assert_eq!(candidates[0].common_names, vec!["French rose"]);
        assert_eq!(session.results(), candidates.to_vec());
    }

    #[tokio::test]
    async fn test_submit_while_in_flight_is_noop() {
        let scripted = Scripted::gated();
        scripted.respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());

        assert!(session.submit(frame(1)));
        for _ in 0..5 {
            assert!(!session.submit(frame(2)));
            assert!(!session.retry());
            tokio::task::yield_now().await;
        }
        assert_eq!(scripted.calls(), 1);
        assert!(session.outcome().is_in_flight());

        scripted.release();
        assert!(matches!(
            session.wait_settled().await,
            IdentificationOutcome::Succeeded(_)
        ));
        assert_eq!(scripted.calls(), 1);
        assert_eq!(*scripted.seen()[0], frame(1));
    }

    #[tokio::test]
    async fn test_empty_result_is_failure() {
        let scripted = Scripted::open();
        scripted.respond(Ok(IdentificationResult::default()));
        let session = IdentificationSession::new(scripted);

        session.submit(frame(1));
        let failure = session.wait_settled().await.failure().cloned().unwrap();
        assert_eq!(failure.kind, FailureKind::NoMatch);
        assert_eq!(failure.message, NO_MATCH_MESSAGE);
    }

    #[tokio::test]
    async fn test_not_found_message_is_distinct() {
        let scripted = Scripted::open();
        scripted
            .respond(Err(IdentifyError::SpeciesNotFound))
            .respond(Err(IdentifyError::Service {
                status_code: 503,
                message: "unavailable".to_string(),
            }));
        let session = IdentificationSession::new(scripted);

        session.submit(frame(1));
        let not_found = session.wait_settled().await.failure().cloned().unwrap();
        assert_eq!(not_found.kind, FailureKind::SpeciesNotFound);
        assert_eq!(not_found.message, SPECIES_NOT_FOUND_MESSAGE);

        assert!(session.retry());
        let service = session.wait_settled().await.failure().cloned().unwrap();
        assert_eq!(service.kind, FailureKind::Service { status_code: 503 });
        assert_ne!(service.message, not_found.message);
        assert!(service.message.contains("unavailable"));
    }

    #[tokio::test]
    async fn test_retry_reuses_original_frame() {
        let scripted = Scripted::open();
        scripted
            .respond(Err(IdentifyError::Service {
                status_code: 500,
                message: "boom".to_string(),
            }))
            .respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());
        let mut transitions = session.transitions();

        session.submit(frame(7));
        assert!(session.wait_settled().await.failure().is_some());

        assert!(session.retry());
        assert_eq!(session.outcome(), IdentificationOutcome::InFlight);
        let settled = session.wait_settled().await;
        assert_eq!(settled, IdentificationOutcome::Succeeded(rose()));

        let seen = scripted.seen();
        assert_eq!(seen.len(), 2);
        assert!(Arc::ptr_eq(&seen[0], &seen[1]));
        assert_eq!(*seen[1], frame(7));

        // Retry is only valid after a failure
        assert!(!session.retry());

        let mut names = Vec::new();
        while let Ok(state) = transitions.try_recv() {
            names.push(state.name());
        }
        assert_eq!(names, vec!["InFlight", "Failed", "InFlight", "Succeeded"]);
    }

    #[tokio::test]
    async fn test_submit_from_settled_state_starts_new_attempt() {
        let scripted = Scripted::open();
        scripted
            .respond(Ok(rose()))
            .respond(Err(IdentifyError::SpeciesNotFound));
        let session = IdentificationSession::new(scripted.clone());

        session.submit(frame(1));
        session.wait_settled().await;
        assert!(session.submit(frame(2)));
        assert!(session.wait_settled().await.failure().is_some());
        assert_eq!(*scripted.seen()[1], frame(2));
    }

    #[tokio::test]
    async fn test_reset_from_every_state() {
        let scripted = Scripted::open();
        scripted
            .respond(Ok(rose()))
            .respond(Err(IdentifyError::NoMatch));
        let session = IdentificationSession::new(scripted);

        session.reset();
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);

        session.submit(frame(1));
        session.wait_settled().await;
        assert!(!session.results().is_empty());
        session.reset();
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);
        assert!(session.results().is_empty());

        session.submit(frame(1));
        session.wait_settled().await;
        session.reset();
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);
        // The retained frame is gone too
        assert!(!session.retry());
    }

    #[tokio::test]
    async fn test_reset_while_in_flight_discards_late_completion() {
        let scripted = Scripted::gated();
        scripted.respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());

        session.submit(frame(1));
        tokio::task::yield_now().await;
        session.reset();
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);

        scripted.release();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);
        assert!(session.results().is_empty());
    }

    #[tokio::test]
    async fn test_reset_aborts_outstanding_request() {
        let scripted = Scripted::gated();
        scripted.respond(Ok(rose())).respond(Err(IdentifyError::NoMatch));
        let session = IdentificationSession::new(scripted.clone());

        session.submit(frame(1));
        tokio::task::yield_now().await;
        assert_eq!(scripted.calls(), 1);
        session.reset();

        // The aborted call never wakes up to take the permit
        scripted.release();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(scripted.unused_permits(), 1);
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);

        // A fresh attempt gets the permit and the first scripted response
        assert!(session.submit(frame(2)));
        assert_eq!(
            session.wait_settled().await,
            IdentificationOutcome::Succeeded(rose())
        );
        assert_eq!(scripted.calls(), 2);
    }

    #[tokio::test]
    async fn test_capture_and_submit() {
        let scripted = Scripted::open();
        scripted.respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());

        assert!(session.capture_and_submit(&mut FixedCamera(frame(3))).unwrap());
        assert!(matches!(
            session.wait_settled().await,
            IdentificationOutcome::Succeeded(_)
        ));
        assert_eq!(*scripted.seen()[0], frame(3));
    }

    #[tokio::test]
    async fn test_capture_error_leaves_session_untouched() {
        let scripted = Scripted::gated();
        scripted
            .respond(Err(IdentifyError::SpeciesNotFound))
            .respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());
        let mut transitions = session.transitions();

        let err = session.capture_and_submit(&mut FailingCamera).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Capture);
        assert!(err.user_message().contains("camera unavailable"));
        assert_eq!(session.outcome(), IdentificationOutcome::Idle);
        assert!(transitions.try_recv().is_err());

        scripted.release();
        session.submit(frame(5));
        assert!(session.wait_settled().await.failure().is_some());

        // A failed capture after a failed attempt keeps the frame for retry
        assert!(session.capture_and_submit(&mut FailingCamera).is_err());
        assert_eq!(
            session.outcome().failure().map(|f| f.kind),
            Some(FailureKind::SpeciesNotFound)
        );
        scripted.release();
        assert!(session.retry());
        assert!(matches!(
            session.wait_settled().await,
            IdentificationOutcome::Succeeded(_)
        ));
        let seen = scripted.seen();
        assert_eq!(seen.len(), 2);
        assert_eq!(*seen[1], frame(5));

        // Nothing is captured while a request is in flight
        assert!(session.submit(frame(6)));
        assert!(!session.capture_and_submit(&mut FailingCamera).unwrap());
    }

    #[tokio::test]
    async fn test_observers_see_latest_state() {
        let scripted = Scripted::gated();
        scripted.respond(Ok(rose()));
        let session = IdentificationSession::new(scripted.clone());
        let mut receiver = session.subscribe();

        session.submit(frame(1));
        receiver.changed().await.unwrap();
        assert!(receiver.borrow_and_update().is_in_flight());

        scripted.release();
        receiver.changed().await.unwrap();
        assert_eq!(receiver.borrow().candidates().len(), 1);
    }
}
