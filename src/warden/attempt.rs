//! Remediation attempt tracking
//!
//! One attempt per instance per pass. The phase machine only records how
//! far the cycle got; the Warden drives the actual calls.

use std::fmt;

use state_machines::state_machine;
use tracing::warn;

use crate::error::{Error, WaitPhase};
use crate::fleet::ManagedInstance;

state_machine! {
    name: RemediationMachine,
    dynamic: true,
    initial: Probing,
    states: [Probing, Healthy, Stopping, Starting, Resolving, Publishing, Recovered, Failed],
    events {
        pass {
            transition: { from: Probing, to: Healthy }
        }
        down {
            transition: { from: Probing, to: Stopping }
        }
        halted {
            transition: { from: Stopping, to: Starting }
        }
        booted {
            transition: { from: Starting, to: Resolving }
        }
        readdressed {
            transition: { from: Resolving, to: Publishing }
        }
        published {
            transition: { from: Publishing, to: Recovered }
        }
        fail {
            transition: { from: [Probing, Stopping, Starting, Resolving, Publishing], to: Failed }
        }
    }
}

/// Phase of a remediation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Probing,
    Healthy,
    Stopping,
    Starting,
    Resolving,
    Publishing,
    Recovered,
    Failed,
}

impl Phase {
    fn from_state(s: &str) -> Self {
        match s {
            "Healthy" => Phase::Healthy,
            "Stopping" => Phase::Stopping,
            "Starting" => Phase::Starting,
            "Resolving" => Phase::Resolving,
            "Publishing" => Phase::Publishing,
            "Recovered" => Phase::Recovered,
            "Failed" => Phase::Failed,
            _ => Phase::Probing,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Probing => "probing",
            Phase::Healthy => "healthy",
            Phase::Stopping => "stopping",
            Phase::Starting => "starting",
            Phase::Resolving => "resolving",
            Phase::Publishing => "publishing",
            Phase::Recovered => "recovered",
            Phase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Probe succeeded, nothing done
    Reachable,
    /// Restarted and republished
    Recovered,
    /// A run-state wait ran out
    TimedOut(WaitPhase),
    /// The provider kept the old address
    AddressUnchanged,
    /// Anything else
    Failed,
}

impl Error {
    /// Attempt outcome for a failure
    pub fn outcome(&self) -> Outcome {
        match self {
            Error::RemediationTimeout { phase, .. } => Outcome::TimedOut(*phase),
            Error::AddressUnchanged { .. } => Outcome::AddressUnchanged,
            _ => Outcome::Failed,
        }
    }
}

/// One instance's pass through probe and remediation
pub struct RemediationAttempt {
    machine: DynamicRemediationMachine<()>,
    pub instance: String,
    pub old_address: Option<String>,
    pub new_address: Option<String>,
    /// Phase in which the attempt failed
    pub failed_in: Option<Phase>,
    outcome: Option<Outcome>,
}

impl RemediationAttempt {
    pub fn new(instance: &ManagedInstance) -> Self {
        Self {
            machine: RemediationMachine::new(()).into_dynamic(),
            instance: instance.display_name.clone(),
            old_address: instance.address().map(str::to_string),
            new_address: None,
            failed_in: None,
            outcome: None,
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from_state(self.machine.current_state())
    }

    fn fire(&mut self, event: RemediationMachineEvent) {
        if self.machine.handle(event).is_err() {
            warn!(
                instance = %self.instance,
                phase = %self.phase(),
                "ignored out-of-order remediation event"
            );
        }
    }

    pub fn pass(&mut self) {
        self.fire(RemediationMachineEvent::Pass);
        self.outcome = Some(Outcome::Reachable);
    }

    pub fn down(&mut self) {
        self.fire(RemediationMachineEvent::Down);
    }

    pub fn halted(&mut self) {
        self.fire(RemediationMachineEvent::Halted);
    }

    pub fn booted(&mut self) {
        self.fire(RemediationMachineEvent::Booted);
    }

    pub fn readdressed(&mut self, address: &str) {
        self.new_address = Some(address.to_string());
        self.fire(RemediationMachineEvent::Readdressed);
    }

    pub fn published(&mut self) {
        self.fire(RemediationMachineEvent::Published);
        self.outcome = Some(Outcome::Recovered);
    }

    pub fn fail(&mut self, error: &Error) {
        self.failed_in = Some(self.phase());
        self.fire(RemediationMachineEvent::Fail);
        self.outcome = Some(error.outcome());
    }

    /// Final outcome; an attempt that never finished counts as failed
    pub fn outcome(&self) -> Outcome {
        self.outcome.unwrap_or(Outcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{DOMAIN_TAG, PORT_TAG};
    use crate::provider::{InstanceRecord, RunState};
    use std::time::Duration;

    fn attempt() -> RemediationAttempt {
        let record = InstanceRecord::new("web1", RunState::Running)
            .address("1.2.3.4")
            .tag(DOMAIN_TAG, "web1.example.com")
            .tag(PORT_TAG, "443");
        RemediationAttempt::new(&ManagedInstance::from_record(record).unwrap().unwrap())
    }

    #[test]
    fn test_initial_phase() {
        let machine = RemediationMachine::new(()).into_dynamic();
        assert_eq!(machine.current_state(), "Probing");

        let attempt = attempt();
        assert_eq!(attempt.phase(), Phase::Probing);
        assert_eq!(attempt.old_address.as_deref(), Some("1.2.3.4"));
    }

    #[test]
    fn test_healthy_attempt() {
        let mut attempt = attempt();
        attempt.pass();
        assert_eq!(attempt.phase(), Phase::Healthy);
        assert_eq!(attempt.outcome(), Outcome::Reachable);
    }

    #[test]
    fn test_full_recovery() {
        let mut attempt = attempt();
        attempt.down();
        assert_eq!(attempt.phase(), Phase::Stopping);
        attempt.halted();
        assert_eq!(attempt.phase(), Phase::Starting);
        attempt.booted();
        attempt.readdressed("5.6.7.8");
        assert_eq!(attempt.phase(), Phase::Publishing);
        attempt.published();

        assert_eq!(attempt.phase(), Phase::Recovered);
        assert_eq!(attempt.outcome(), Outcome::Recovered);
        assert_eq!(attempt.new_address.as_deref(), Some("5.6.7.8"));
    }

    #[test]
    fn test_failure_records_phase() {
        let mut attempt = attempt();
        attempt.down();
        attempt.halted();
        attempt.fail(&Error::RemediationTimeout {
            instance: "web1".into(),
            phase: WaitPhase::Start,
            timeout: Duration::from_secs(300),
        });

        assert_eq!(attempt.phase(), Phase::Failed);
        assert_eq!(attempt.failed_in, Some(Phase::Starting));
        assert_eq!(attempt.outcome(), Outcome::TimedOut(WaitPhase::Start));
    }

    #[test]
    fn test_out_of_order_event_is_ignored() {
        let mut machine = RemediationMachine::new(()).into_dynamic();
        assert!(machine.handle(RemediationMachineEvent::Published).is_err());

        let mut attempt = attempt();
        attempt.booted();
        assert_eq!(attempt.phase(), Phase::Probing);
    }

    #[test]
    fn test_error_outcomes() {
        let unchanged = Error::AddressUnchanged {
            instance: "web1".into(),
            address: "1.2.3.4".into(),
            waited: Duration::from_secs(600),
        };
        assert_eq!(unchanged.outcome(), Outcome::AddressUnchanged);
        assert_eq!(Error::AddressUnavailable("web1".into()).outcome(), Outcome::Failed);
        assert_eq!(Error::Http("reset".into()).outcome(), Outcome::Failed);
    }
}
