//! Pure state machine for sync-progress subscriptions
//!
//! `transition(state, event, policy) -> (state, actions)` does no I/O and
//! never panics. Every connection attempt gets a fresh generation; events
//! carry the generation they were produced for, and anything from an older
//! attempt is reported as `IgnoreStale` instead of touching state.

use std::time::Duration;
use strand_core::SubscriptionConfig;

/// Connection state for the tracked job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// No job tracked. `generation` is the last one issued.
    Idle { generation: u64 },
    /// Opening a stream; `attempt` counts retries since the last update
    Connecting {
        job_id: String,
        generation: u64,
        attempt: u32,
    },
    /// Stream open
    Connected {
        job_id: String,
        generation: u64,
        attempt: u32,
    },
    /// Job cleared; waiting for the old stream to be torn down
    Closing { job_id: String, generation: u64 },
    /// Server finished the stream after the job reached a final state
    Closed { job_id: String, generation: u64 },
    /// Gave up connecting
    Failed {
        job_id: String,
        generation: u64,
        reason: String,
    },
}

impl ConnectionState {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Idle { generation }
            | Self::Connecting { generation, .. }
            | Self::Connected { generation, .. }
            | Self::Closing { generation, .. }
            | Self::Closed { generation, .. }
            | Self::Failed { generation, .. } => *generation,
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Idle { .. } => None,
            Self::Connecting { job_id, .. }
            | Self::Connected { job_id, .. }
            | Self::Closing { job_id, .. }
            | Self::Closed { job_id, .. }
            | Self::Failed { job_id, .. } => Some(job_id),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Whether a stream may be open or opening
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Connected { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::Idle { generation: 0 }
    }
}

/// Inputs to the machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The tracked job id was set or cleared
    JobChanged { job_id: Option<String> },
    /// The stream for `generation` opened
    Opened { generation: u64 },
    /// Opening the stream for `generation` failed
    ConnectFailed {
        generation: u64,
        reason: String,
        retryable: bool,
    },
    /// An update arrived on the stream for `generation`
    UpdateReceived { generation: u64 },
    /// The stream for `generation` ended
    StreamEnded { generation: u64, job_finished: bool },
    /// The stream for `generation` has been dropped after a disconnect
    TeardownComplete { generation: u64 },
}

/// Side effects for the driver to perform
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open a stream for `job_id` after `delay`
    Connect {
        job_id: String,
        generation: u64,
        delay: Duration,
    },
    /// Abort the stream for `generation`
    Disconnect { generation: u64 },
    /// Report `TeardownComplete` once the aborted stream is gone
    AwaitTeardown { generation: u64 },
    /// Clear the accumulated updates
    ResetUpdates,
    /// Append the update that came with the event
    AppendUpdate,
    /// The event belonged to an older attempt or does not apply
    IgnoreStale { generation: u64 },
}

/// Reconnection policy with capped exponential backoff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl ReconnectPolicy {
    /// Never reconnect
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&SubscriptionConfig::default())
    }
}

impl From<&SubscriptionConfig> for ReconnectPolicy {
    fn from(config: &SubscriptionConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

/// Pure state transition function
///
/// Takes current state and event, returns new state and actions to execute.
pub fn transition(
    state: ConnectionState,
    event: Event,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<Action>) {
    match event {
        Event::JobChanged { job_id: None } => clear_job(state),
        Event::JobChanged {
            job_id: Some(job_id),
        } => set_job(state, job_id),

        Event::Opened { generation } => match state {
            ConnectionState::Connecting {
                job_id,
                generation: current,
                attempt,
            } if current == generation => (
                ConnectionState::Connected {
                    job_id,
                    generation,
                    attempt,
                },
                vec![],
            ),
            state => stale(state, generation),
        },

        Event::ConnectFailed {
            generation,
            reason,
            retryable,
        } => match state {
            ConnectionState::Connecting {
                job_id,
                generation: current,
                attempt,
            } if current == generation => {
                if retryable && attempt < policy.max_attempts {
                    retry(job_id, generation, attempt, policy)
                } else {
                    (
                        ConnectionState::Failed {
                            job_id,
                            generation,
                            reason,
                        },
                        vec![],
                    )
                }
            }
            state => stale(state, generation),
        },

        Event::UpdateReceived { generation } => match state {
            ConnectionState::Connected {
                job_id,
                generation: current,
                ..
            } if current == generation => (
                // A delivered update proves the connection healthy again
                ConnectionState::Connected {
                    job_id,
                    generation,
                    attempt: 0,
                },
                vec![Action::AppendUpdate],
            ),
            state => stale(state, generation),
        },

        Event::StreamEnded {
            generation,
            job_finished,
        } => match state {
            ConnectionState::Connected {
                job_id,
                generation: current,
                attempt,
            } if current == generation => {
                if job_finished {
                    (ConnectionState::Closed { job_id, generation }, vec![])
                } else if attempt < policy.max_attempts {
                    retry(job_id, generation, attempt, policy)
                } else {
                    (
                        ConnectionState::Failed {
                            job_id,
                            generation,
                            reason: "event stream closed before the job finished".to_string(),
                        },
                        vec![],
                    )
                }
            }
            state => stale(state, generation),
        },

        Event::TeardownComplete { generation } => match state {
            ConnectionState::Closing {
                generation: current,
                ..
            } if current == generation => (ConnectionState::Idle { generation }, vec![]),
            state => stale(state, generation),
        },
    }
}

fn clear_job(state: ConnectionState) -> (ConnectionState, Vec<Action>) {
    match state {
        ConnectionState::Connecting {
            job_id, generation, ..
        }
        | ConnectionState::Connected {
            job_id, generation, ..
        } => (
            ConnectionState::Closing { job_id, generation },
            vec![
                Action::Disconnect { generation },
                Action::AwaitTeardown { generation },
            ],
        ),
        ConnectionState::Closed { generation, .. } | ConnectionState::Failed { generation, .. } => {
            (ConnectionState::Idle { generation }, vec![])
        }
        state @ (ConnectionState::Idle { .. } | ConnectionState::Closing { .. }) => (state, vec![]),
    }
}

fn set_job(state: ConnectionState, job_id: String) -> (ConnectionState, Vec<Action>) {
    match state {
        // Already connected or connection in progress for this job
        ConnectionState::Connected { job_id: ref current, .. }
        | ConnectionState::Connecting { job_id: ref current, .. }
            if *current == job_id =>
        {
            (state, vec![])
        }

        // Retry a finished or failed subscription without losing its history
        ConnectionState::Closed {
            job_id: ref current,
            generation,
        }
        | ConnectionState::Failed {
            job_id: ref current,
            generation,
            ..
        } if *current == job_id => {
            let next = generation + 1;
            (
                ConnectionState::Connecting {
                    job_id: job_id.clone(),
                    generation: next,
                    attempt: 0,
                },
                vec![Action::Connect {
                    job_id,
                    generation: next,
                    delay: Duration::ZERO,
                }],
            )
        }

        state => {
            let generation = state.generation();
            let next = generation + 1;
            let mut actions = Vec::with_capacity(3);
            if state.is_live() {
                actions.push(Action::Disconnect { generation });
            }
            actions.push(Action::ResetUpdates);
            actions.push(Action::Connect {
                job_id: job_id.clone(),
                generation: next,
                delay: Duration::ZERO,
            });
            (
                ConnectionState::Connecting {
                    job_id,
                    generation: next,
                    attempt: 0,
                },
                actions,
            )
        }
    }
}

fn retry(
    job_id: String,
    generation: u64,
    attempt: u32,
    policy: &ReconnectPolicy,
) -> (ConnectionState, Vec<Action>) {
    let next = generation + 1;
    (
        ConnectionState::Connecting {
            job_id: job_id.clone(),
            generation: next,
            attempt: attempt + 1,
        },
        vec![Action::Connect {
            job_id,
            generation: next,
            delay: policy.backoff(attempt),
        }],
    )
}

fn stale(state: ConnectionState, generation: u64) -> (ConnectionState, Vec<Action>) {
    (state, vec![Action::IgnoreStale { generation }])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: 2,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
        }
    }

    fn job(id: &str) -> Event {
        Event::JobChanged {
            job_id: Some(id.to_string()),
        }
    }

    fn connected(job_id: &str, generation: u64) -> ConnectionState {
        ConnectionState::Connected {
            job_id: job_id.to_string(),
            generation,
            attempt: 0,
        }
    }

    #[test]
    fn test_first_job_connects() {
        let (state, actions) = transition(ConnectionState::default(), job("A"), &policy());
        assert_eq!(
            state,
            ConnectionState::Connecting {
                job_id: "A".to_string(),
                generation: 1,
                attempt: 0
            }
        );
        assert_eq!(
            actions,
            vec![
                Action::ResetUpdates,
                Action::Connect {
                    job_id: "A".to_string(),
                    generation: 1,
                    delay: Duration::ZERO
                }
            ]
        );
    }

    #[test]
    fn test_same_job_while_connecting_is_noop() {
        let (state, _) = transition(ConnectionState::default(), job("A"), &policy());
        let (again, actions) = transition(state.clone(), job("A"), &policy());
        assert_eq!(again, state);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_same_job_while_connected_is_noop() {
        let (state, actions) = transition(connected("A", 3), job("A"), &policy());
        assert_eq!(state, connected("A", 3));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_switching_jobs_disconnects_resets_then_connects() {
        let (state, actions) = transition(connected("A", 3), job("B"), &policy());
        assert_eq!(state.job_id(), Some("B"));
        assert_eq!(state.generation(), 4);
        assert_eq!(
            actions,
            vec![
                Action::Disconnect { generation: 3 },
                Action::ResetUpdates,
                Action::Connect {
                    job_id: "B".to_string(),
                    generation: 4,
                    delay: Duration::ZERO
                }
            ]
        );
    }

    #[test]
    fn test_clearing_job_tears_down() {
        let (state, actions) = transition(
            connected("A", 2),
            Event::JobChanged { job_id: None },
            &policy(),
        );
        assert!(matches!(state, ConnectionState::Closing { generation: 2, .. }));
        assert_eq!(
            actions,
            vec![
                Action::Disconnect { generation: 2 },
                Action::AwaitTeardown { generation: 2 }
            ]
        );

        let (state, actions) =
            transition(state, Event::TeardownComplete { generation: 2 }, &policy());
        assert_eq!(state, ConnectionState::Idle { generation: 2 });
        assert!(actions.is_empty());
    }

    #[test]
    fn test_clearing_when_idle_is_noop() {
        let (state, actions) = transition(
            ConnectionState::default(),
            Event::JobChanged { job_id: None },
            &policy(),
        );
        assert_eq!(state, ConnectionState::default());
        assert!(actions.is_empty());
    }

    #[test]
    fn test_stale_events_are_ignored() {
        let state = connected("B", 4);

        for event in [
            Event::Opened { generation: 3 },
            Event::UpdateReceived { generation: 3 },
            Event::StreamEnded {
                generation: 3,
                job_finished: true,
            },
            Event::ConnectFailed {
                generation: 3,
                reason: "late".to_string(),
                retryable: true,
            },
        ] {
            let (next, actions) = transition(state.clone(), event, &policy());
            assert_eq!(next, state);
            assert_eq!(actions, vec![Action::IgnoreStale { generation: 3 }]);
        }
    }

    #[test]
    fn test_events_after_clear_are_stale() {
        let (state, _) = transition(
            connected("A", 1),
            Event::JobChanged { job_id: None },
            &policy(),
        );
        let (state, actions) =
            transition(state, Event::UpdateReceived { generation: 1 }, &policy());
        assert!(matches!(state, ConnectionState::Closing { .. }));
        assert_eq!(actions, vec![Action::IgnoreStale { generation: 1 }]);
    }

    #[test]
    fn test_open_then_updates_append() {
        let (state, _) = transition(ConnectionState::default(), job("A"), &policy());
        let (state, _) = transition(state, Event::Opened { generation: 1 }, &policy());
        assert!(state.is_connected());

        let (_, actions) = transition(state, Event::UpdateReceived { generation: 1 }, &policy());
        assert_eq!(actions, vec![Action::AppendUpdate]);
    }

    #[test]
    fn test_retryable_failure_backs_off_then_fails() {
        let (state, _) = transition(ConnectionState::default(), job("A"), &policy());

        let fail = |generation| Event::ConnectFailed {
            generation,
            reason: "HTTP 401".to_string(),
            retryable: true,
        };

        let (state, actions) = transition(state, fail(1), &policy());
        assert_eq!(
            actions,
            vec![Action::Connect {
                job_id: "A".to_string(),
                generation: 2,
                delay: Duration::from_millis(100)
            }]
        );

        let (state, actions) = transition(state, fail(2), &policy());
        assert_eq!(
            actions,
            vec![Action::Connect {
                job_id: "A".to_string(),
                generation: 3,
                delay: Duration::from_millis(200)
            }]
        );

        let (state, actions) = transition(state, fail(3), &policy());
        assert!(actions.is_empty());
        match state {
            ConnectionState::Failed { reason, .. } => assert_eq!(reason, "HTTP 401"),
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[test]
    fn test_non_retryable_failure_fails_immediately() {
        let (state, _) = transition(ConnectionState::default(), job("A"), &policy());
        let (state, _) = transition(
            state,
            Event::ConnectFailed {
                generation: 1,
                reason: "HTTP 404".to_string(),
                retryable: false,
            },
            &policy(),
        );
        assert!(matches!(state, ConnectionState::Failed { .. }));
    }

    #[test]
    fn test_finished_stream_closes() {
        let (state, actions) = transition(
            connected("A", 1),
            Event::StreamEnded {
                generation: 1,
                job_finished: true,
            },
            &policy(),
        );
        assert!(matches!(state, ConnectionState::Closed { .. }));
        assert!(actions.is_empty());
    }

    #[test]
    fn test_dropped_stream_reconnects_without_reset() {
        let (state, actions) = transition(
            connected("A", 1),
            Event::StreamEnded {
                generation: 1,
                job_finished: false,
            },
            &policy(),
        );
        assert!(matches!(state, ConnectionState::Connecting { attempt: 1, .. }));
        assert!(!actions.contains(&Action::ResetUpdates));
        assert!(matches!(actions[0], Action::Connect { generation: 2, .. }));
    }

    #[test]
    fn test_dropped_stream_without_policy_fails() {
        let (state, _) = transition(
            connected("A", 1),
            Event::StreamEnded {
                generation: 1,
                job_finished: false,
            },
            &ReconnectPolicy::none(),
        );
        assert!(matches!(state, ConnectionState::Failed { .. }));
    }

    #[test]
    fn test_reselecting_closed_job_keeps_history() {
        let closed = ConnectionState::Closed {
            job_id: "A".to_string(),
            generation: 5,
        };
        let (state, actions) = transition(closed, job("A"), &policy());
        assert_eq!(state.generation(), 6);
        assert_eq!(
            actions,
            vec![Action::Connect {
                job_id: "A".to_string(),
                generation: 6,
                delay: Duration::ZERO
            }]
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = policy();
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(2), Duration::from_millis(250));
        assert_eq!(policy.backoff(40), Duration::from_millis(250));
    }

    #[test]
    fn test_generations_stay_monotonic_across_idle() {
        let (state, _) = transition(connected("A", 7), Event::JobChanged { job_id: None }, &policy());
        let (state, _) = transition(state, Event::TeardownComplete { generation: 7 }, &policy());
        let (state, _) = transition(state, job("A"), &policy());
        assert_eq!(state.generation(), 8);
    }
}
