//! One-shot interruption workflow
//!
//! Eligibility and membership are checked once at startup. The controller
//! then polls for an interruption notice until one appears or a stop is
//! requested. A notice leads to exactly one drain followed by exactly one
//! event; returning from [`Controller::run`] is what guarantees that the
//! sequence never repeats.

use crate::error::{Error, Result};
use crate::events::{self, EventSink};
use crate::metadata::{self, MetadataSource};
use crate::scheduler::{self, NodeScheduler};
use crate::shutdown::StopSignal;
use crate::types::{ClusterNode, InterruptionNotice, PollOutcome};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Terminal, non-fatal result of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Node drained and event sent
    Drained,
    /// Not a spot instance
    Ineligible,
    /// Not registered with the scheduler
    Unregistered,
    /// Stopped by an operator signal before any notice
    Interrupted,
}

impl Outcome {
    pub fn describe(&self) -> &'static str {
        match self {
            Outcome::Drained => "Node drained and termination event sent. Job's done",
            Outcome::Ineligible => "This is not a spot instance. Spotdrain will not run",
            Outcome::Unregistered => {
                "This instance is not registered on Nomad. Spotdrain will not run"
            }
            Outcome::Interrupted => "Stopped by operator signal",
        }
    }
}

/// Process exit status for every terminal outcome
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Drained,
    Ineligible,
    Unregistered,
    Fatal,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Drained => 0,
            ExitStatus::Ineligible => 0,
            ExitStatus::Unregistered => 1,
            ExitStatus::Fatal => 2,
            ExitStatus::Interrupted => 155,
        }
    }
}

impl From<Outcome> for ExitStatus {
    fn from(outcome: Outcome) -> Self {
        match outcome {
            Outcome::Drained => ExitStatus::Drained,
            Outcome::Ineligible => ExitStatus::Ineligible,
            Outcome::Unregistered => ExitStatus::Unregistered,
            Outcome::Interrupted => ExitStatus::Interrupted,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Init,
    CheckingEligibility,
    ResolvingMembership,
    Polling,
    Draining,
    Notifying,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Init => "init",
            State::CheckingEligibility => "checking-eligibility",
            State::ResolvingMembership => "resolving-membership",
            State::Polling => "polling",
            State::Draining => "draining",
            State::Notifying => "notifying",
        };
        f.write_str(name)
    }
}

fn enter(state: &mut State, next: State) {
    debug!(from = %state, to = %next, "Lifecycle transition");
    *state = next;
}

#[derive(Clone, Debug)]
pub struct ControllerSettings {
    pub poll_interval: Duration,
    /// Environment tag for the event, if configured
    pub env: Option<String>,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            env: None,
        }
    }
}

pub struct Controller {
    metadata: Arc<dyn MetadataSource>,
    scheduler: Arc<dyn NodeScheduler>,
    events: Arc<dyn EventSink>,
    settings: ControllerSettings,
}

impl Controller {
    pub fn new(
        metadata: Arc<dyn MetadataSource>,
        scheduler: Arc<dyn NodeScheduler>,
        events: Arc<dyn EventSink>,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            metadata,
            scheduler,
            events,
            settings,
        }
    }

    /// Run the workflow to a terminal outcome. Any collaborator error ends
    /// the run immediately.
    pub async fn run(&self, stop: &StopSignal) -> Result<Outcome> {
        let mut state = State::Init;

        enter(&mut state, State::CheckingEligibility);
        if !metadata::is_preemptible(self.metadata.as_ref()).await? {
            return Ok(Outcome::Ineligible);
        }

        enter(&mut state, State::ResolvingMembership);
        let identity = metadata::instance_identity(self.metadata.as_ref()).await?;
        let node = match scheduler::resolve_node(self.scheduler.as_ref(), &identity).await? {
            Some(node) => node,
            None => return Ok(Outcome::Unregistered),
        };

        enter(&mut state, State::Polling);
        let notice = match self.poll_until_marked(&node, stop).await? {
            Some(notice) => notice,
            None => return Ok(Outcome::Interrupted),
        };
        debug!(action = %notice.action, time = %notice.time, "Acting on interruption notice");

        enter(&mut state, State::Draining);
        scheduler::drain(self.scheduler.as_ref(), &node).await?;

        enter(&mut state, State::Notifying);
        events::notify(
            self.events.as_ref(),
            &identity,
            self.settings.env.as_deref(),
        )
        .await?;

        Ok(Outcome::Drained)
    }

    /// Poll every interval until a notice is seen (`Some`) or `stop` fires (`None`)
    async fn poll_until_marked(
        &self,
        node: &ClusterNode,
        stop: &StopSignal,
    ) -> Result<Option<InterruptionNotice>> {
        let period = self.settings.poll_interval;
        let start = Instant::now().checked_add(period).ok_or_else(|| {
            Error::ConfigError(format!("poll interval {period:?} is out of range"))
        })?;
        let mut ticker = interval_at(start, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            "Watching for interruption notice every {:?} (node {})",
            period, node.node_id
        );

        loop {
            tokio::select! {
                biased;
                _ = stop.stopped() => {
                    info!("Stopping poll loop");
                    return Ok(None);
                }
                _ = ticker.tick() => {
                    debug!("Waking up and executing check");
                    if let PollOutcome::Marked(notice) =
                        metadata::poll_interruption(self.metadata.as_ref()).await?
                    {
                        return Ok(Some(notice));
                    }
                }
            }
        }
    }
}

/// Run the controller, bounding how long it may continue after `stop` fires.
///
/// Once stop is requested the controller gets `grace` to finish an in-flight
/// check. A run that completes in that window keeps its own outcome.
pub async fn supervise(
    controller: &Controller,
    stop: &StopSignal,
    grace: Duration,
) -> Result<Outcome> {
    let run = controller.run(stop);
    tokio::pin!(run);

    tokio::select! {
        result = &mut run => result,
        _ = stop.stopped() => {
            debug!("Stop requested, allowing {:?} for in-flight work", grace);
            match tokio::time::timeout(grace, &mut run).await {
                Ok(result) => result,
                Err(_) => {
                    warn!("In-flight work did not finish within {:?}, abandoning it", grace);
                    Ok(Outcome::Interrupted)
                }
            }
        }
    }
}
