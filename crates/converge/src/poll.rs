//! Convergence poller: wait for a predicate, a target phase, or a phase change.

use std::future::Future;
use std::time::Duration;

use metrics::counter;
use regex::Regex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use ferry_core::config::PollSettings;
use ferry_core::{FerryError, Phase, VersionedObject};
use ferry_kubehub::ClientContext;

/// One probe reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub satisfied: bool,
    pub phase: Option<Phase>,
}

impl Observation {
    pub fn done(phase: Option<Phase>) -> Self { Self { satisfied: true, phase } }
    pub fn waiting(phase: Option<Phase>) -> Self { Self { satisfied: false, phase } }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    pub satisfied: bool,
    pub last_observed_phase: Option<Phase>,
    pub elapsed: Duration,
    pub ticks: u32,
}

#[async_trait::async_trait]
pub trait Probe: Send {
    /// An `Err` stops the poll immediately and is returned to the caller.
    async fn observe(&mut self) -> Result<Observation, FerryError>;
}

/// Adapts a closure returning a future into a [`Probe`].
pub struct FnProbe<F>(pub F);

#[async_trait::async_trait]
impl<F, Fut> Probe for FnProbe<F>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Observation, FerryError>> + Send,
{
    async fn observe(&mut self) -> Result<Observation, FerryError> { (self.0)().await }
}

/// Probe until satisfied or the deadline passes. The deadline is fixed at call
/// time and checked after every reading, before sleeping.
pub async fn poll_probe<P: Probe + ?Sized>(what: &str, settings: PollSettings, probe: &mut P) -> Result<PollOutcome, FerryError> {
    let start = Instant::now();
    let deadline = start + settings.timeout;
    let mut last_phase: Option<Phase> = None;
    let mut ticks = 0u32;
    loop {
        ticks += 1;
        counter!("poll_ticks_total", 1u64);
        let obs = probe.observe().await?;
        if obs.phase.is_some() {
            last_phase = obs.phase;
        }
        if obs.satisfied {
            let elapsed = start.elapsed();
            info!(what, ticks, took_ms = %elapsed.as_millis(), phase = ?last_phase, "condition met");
            return Ok(PollOutcome { satisfied: true, last_observed_phase: last_phase, elapsed, ticks });
        }
        let now = Instant::now();
        if now >= deadline {
            counter!("poll_timeouts_total", 1u64);
            warn!(what, ticks, timeout = ?settings.timeout, phase = ?last_phase, "timed out");
            return Err(FerryError::PollTimeout {
                what: what.to_string(),
                timeout: settings.timeout,
                last_phase: last_phase.map(|p| p.to_string()),
            });
        }
        debug!(what, ticks, phase = ?last_phase, "waiting");
        tokio::time::sleep(settings.interval.min(deadline - now)).await;
    }
}

/// Poll a closure until it reports satisfied.
pub async fn poll_until<F, Fut>(what: &str, settings: PollSettings, predicate: F) -> Result<PollOutcome, FerryError>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<Observation, FerryError>> + Send,
{
    poll_probe(what, settings, &mut FnProbe(predicate)).await
}

/// Options for phase waits.
#[derive(Debug, Clone)]
pub struct PhaseWait {
    pub settings: PollSettings,
    /// Must also match `status.message`, anchored at its start, when the target phase is reached.
    pub message: Option<Regex>,
    /// Never fail fast on a terminal phase.
    pub ignore_errors: bool,
    /// Message fragments that make a terminal phase count as transient.
    pub tolerated: Vec<String>,
}

impl Default for PhaseWait {
    fn default() -> Self { Self { settings: PollSettings::from_env(), message: None, ignore_errors: false, tolerated: Vec::new() } }
}

impl PhaseWait {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings = self.settings.with_timeout(timeout);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.settings = self.settings.with_interval(interval);
        self
    }

    pub fn with_message(mut self, re: Regex) -> Self {
        self.message = Some(re);
        self
    }

    pub fn ignore_errors(mut self) -> Self {
        self.ignore_errors = true;
        self
    }

    pub fn tolerate(mut self, fragment: &str) -> Self {
        self.tolerated.push(fragment.to_string());
        self
    }
}

/// Whether `obj` sits in `target`. Readings taken before the controller
/// observed the latest generation never count. A terminal error phase other
/// than `target` is an error unless ignored or tolerated by message.
pub fn in_desired_state(obj: &VersionedObject, target: &Phase, wait: &PhaseWait) -> Result<bool, FerryError> {
    let Some(phase) = obj.phase() else { return Ok(false) };
    if let (Some(generation), Some(observed)) = (obj.generation(), obj.observed_generation()) {
        if generation != observed {
            return Ok(false);
        }
    }
    if phase.is_terminal_error() && phase != *target && !wait.ignore_errors {
        let msg = obj.message().unwrap_or_default();
        if !wait.tolerated.iter().any(|t| msg.contains(t.as_str())) {
            counter!("poll_fail_fast_total", 1u64);
            return Err(FerryError::TerminalPhaseObserved {
                phase: phase.to_string(),
                target: target.to_string(),
                message: obj.message().map(|s| s.to_string()),
            });
        }
        debug!(phase = %phase, message = %msg, "tolerated transient failure");
    }
    let mut reached = phase == *target;
    if let Some(re) = &wait.message {
        reached = reached && obj.message().map_or(false, |m| matches_at_start(re, m));
    }
    Ok(reached)
}

// The pattern must match at the start of the message, not merely somewhere in it.
fn matches_at_start(re: &Regex, message: &str) -> bool { re.find(message).map_or(false, |m| m.start() == 0) }

type ObjectPredicate<'a> = Box<dyn FnMut(&VersionedObject) -> Result<bool, FerryError> + Send + 'a>;

/// Reloads the object on every tick, then evaluates a predicate on it.
struct ObjectProbe<'a> {
    ctx: &'a ClientContext,
    obj: &'a mut VersionedObject,
    predicate: ObjectPredicate<'a>,
}

#[async_trait::async_trait]
impl Probe for ObjectProbe<'_> {
    async fn observe(&mut self) -> Result<Observation, FerryError> {
        match self.ctx.reload(self.obj).await {
            Ok(()) => {}
            Err(e @ FerryError::Locator(_)) => return Err(e),
            Err(e) => {
                warn!(target_ref = %self.obj.reference(), error = %e, "reload failed while waiting");
                return Ok(Observation::waiting(self.obj.phase()));
            }
        }
        let satisfied = (self.predicate)(&*self.obj)?;
        Ok(Observation { satisfied, phase: self.obj.phase() })
    }
}

/// Reload `obj` until `predicate` holds. `obj` ends with the last reading.
pub async fn wait_for<F>(ctx: &ClientContext, obj: &mut VersionedObject, settings: PollSettings, predicate: F) -> Result<PollOutcome, FerryError>
where
    F: FnMut(&VersionedObject) -> Result<bool, FerryError> + Send,
{
    let what = obj.reference().to_string();
    let mut probe = ObjectProbe { ctx, obj, predicate: Box::new(predicate) };
    poll_probe(&what, settings, &mut probe).await
}

/// Wait until `status.phase == target`, failing fast on a terminal error phase.
pub async fn reaches_phase(ctx: &ClientContext, obj: &mut VersionedObject, target: Phase, wait: &PhaseWait) -> Result<PollOutcome, FerryError> {
    let what = format!("{} to reach {}", obj.reference(), target);
    let mut probe = ObjectProbe { ctx, obj, predicate: Box::new(move |o: &VersionedObject| in_desired_state(o, &target, wait)) };
    poll_probe(&what, wait.settings, &mut probe).await
}

/// Wait until `status.phase` is anything other than `current`.
pub async fn abandons_phase(ctx: &ClientContext, obj: &mut VersionedObject, current: Phase, settings: PollSettings) -> Result<PollOutcome, FerryError> {
    let what = format!("{} to leave {}", obj.reference(), current);
    let mut probe = ObjectProbe { ctx, obj, predicate: Box::new(move |o: &VersionedObject| Ok(o.phase().as_ref() != Some(&current))) };
    poll_probe(&what, settings, &mut probe).await
}
