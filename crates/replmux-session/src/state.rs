//! Mode machine for the remote interpreter.
//!
//! [`step`] is pure: it maps the current state and an observed event to the
//! next state and the action the session has to perform. The session does
//! the I/O and feeds the outcome back as the next event, which keeps the
//! recovery ladder testable without a device or a clock.

use std::time::Duration;

use crate::config::SessionConfig;
use crate::control::{INTERRUPT, PROMPT, RAW_ENTER, RAW_EXIT, RAW_PROMPT};

/// Last known mode of the remote interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Nothing is known; the ladder has to find a prompt.
    Unknown,
    /// The interactive prompt is showing.
    Interactive,
    /// Raw mode is waiting for a code buffer.
    RawEval,
    /// Submitted code is running.
    Executing,
    /// The transport has been released.
    Detached,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Mode::Unknown => "unknown",
            Mode::Interactive => "interactive",
            Mode::RawEval => "raw-eval",
            Mode::Executing => "executing",
            Mode::Detached => "detached",
        };
        f.write_str(name)
    }
}

/// A mode the session can be asked to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    Interactive,
    RawEval,
}

/// A step of the acquisition ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rung {
    /// Passive look for a prompt already in the input.
    Probe,
    /// Interrupt sent from an unknown state.
    Interrupt,
    /// Raw-mode exit sent from an unknown state.
    RawExit,
    /// Raw-mode exit sent from a known raw mode.
    LeaveRaw,
    /// Raw-mode entry sent from the interactive prompt.
    EnterRaw,
}

/// State of the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Settled in a mode.
    At(Mode),
    /// Working toward `goal`, currently waiting on `rung`.
    Climbing { goal: Goal, rung: Rung },
}

impl State {
    /// Mode as seen from outside; a half-finished climb counts as unknown.
    pub fn mode(self) -> Mode {
        match self {
            State::At(mode) => mode,
            State::Climbing { .. } => Mode::Unknown,
        }
    }
}

/// Something the session observed or was asked to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Reach a mode.
    Want(Goal),
    /// The marker of the current rung arrived.
    MarkerSeen,
    /// The wait of the current rung expired.
    Timeout,
    /// Raw mode acknowledged a code buffer.
    AckSeen,
    /// A raw-mode execution finished.
    CompletionSeen,
    /// The interpreter was rebooted.
    Reset,
    /// The transport was released.
    Closed,
}

/// Text the session waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Prompt,
    RawPrompt,
}

impl Marker {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Marker::Prompt => PROMPT,
            Marker::RawPrompt => RAW_PROMPT,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Marker::Prompt => "interactive prompt",
            Marker::RawPrompt => "raw prompt",
        }
    }
}

/// Work the session has to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Wait for `marker` without writing anything.
    Probe { marker: Marker, timeout: Duration },
    /// Write `byte`, then wait for `marker`.
    Send {
        byte: u8,
        marker: Marker,
        timeout: Duration,
    },
    /// Nothing left to do.
    Done,
    /// The ladder is exhausted.
    GiveUp { waiting_for: Marker, after: Duration },
    /// The session is closed.
    Refuse,
}

/// Advance the machine.
///
/// Events that do not apply to the current state leave it unchanged.
pub fn step(state: State, event: Event, config: &SessionConfig) -> (State, Action) {
    match (state, event) {
        (State::At(Mode::Detached), Event::Closed) => (state, Action::Done),
        (State::At(Mode::Detached), _) => (state, Action::Refuse),
        (_, Event::Closed) => (State::At(Mode::Detached), Action::Done),
        (State::At(_), Event::Reset) => (State::At(Mode::Unknown), Action::Done),

        (State::At(mode), Event::Want(goal)) => begin(mode, goal, config),

        (State::Climbing { goal, rung }, Event::MarkerSeen) => match (rung, goal) {
            (Rung::EnterRaw, _) => (State::At(Mode::RawEval), Action::Done),
            (_, Goal::Interactive) => (State::At(Mode::Interactive), Action::Done),
            (_, Goal::RawEval) => enter_raw(config),
        },

        (State::Climbing { goal, rung }, Event::Timeout) => match rung {
            Rung::Probe => (
                State::Climbing {
                    goal,
                    rung: Rung::Interrupt,
                },
                Action::Send {
                    byte: INTERRUPT,
                    marker: Marker::Prompt,
                    timeout: config.interrupt_timeout,
                },
            ),
            Rung::Interrupt => (
                State::Climbing {
                    goal,
                    rung: Rung::RawExit,
                },
                Action::Send {
                    byte: RAW_EXIT,
                    marker: Marker::Prompt,
                    timeout: config.raw_exit_timeout,
                },
            ),
            Rung::RawExit => (
                State::At(Mode::Unknown),
                Action::GiveUp {
                    waiting_for: Marker::Prompt,
                    after: config.raw_exit_timeout,
                },
            ),
            Rung::LeaveRaw => (
                State::At(Mode::RawEval),
                Action::GiveUp {
                    waiting_for: Marker::Prompt,
                    after: config.leave_raw_timeout,
                },
            ),
            Rung::EnterRaw => (
                State::At(Mode::Interactive),
                Action::GiveUp {
                    waiting_for: Marker::RawPrompt,
                    after: config.raw_enter_timeout,
                },
            ),
        },

        (State::At(Mode::RawEval), Event::AckSeen) => (State::At(Mode::Executing), Action::Done),
        (State::At(Mode::Executing), Event::CompletionSeen) => {
            (State::At(Mode::RawEval), Action::Done)
        }

        _ => (state, Action::Done),
    }
}

fn begin(mode: Mode, goal: Goal, config: &SessionConfig) -> (State, Action) {
    match (mode, goal) {
        (Mode::Interactive, Goal::Interactive) | (Mode::RawEval, Goal::RawEval) => {
            (State::At(mode), Action::Done)
        }
        (Mode::Interactive, Goal::RawEval) => enter_raw(config),
        (Mode::RawEval, Goal::Interactive) => (
            State::Climbing {
                goal,
                rung: Rung::LeaveRaw,
            },
            Action::Send {
                byte: RAW_EXIT,
                marker: Marker::Prompt,
                timeout: config.leave_raw_timeout,
            },
        ),
        // A previous run that never completed leaves the board in an unknown state.
        (Mode::Unknown | Mode::Executing, _) => (
            State::Climbing {
                goal,
                rung: Rung::Probe,
            },
            Action::Probe {
                marker: Marker::Prompt,
                timeout: config.probe_timeout,
            },
        ),
        (Mode::Detached, _) => (State::At(Mode::Detached), Action::Refuse),
    }
}

fn enter_raw(config: &SessionConfig) -> (State, Action) {
    (
        State::Climbing {
            goal: Goal::RawEval,
            rung: Rung::EnterRaw,
        },
        Action::Send {
            byte: RAW_ENTER,
            marker: Marker::RawPrompt,
            timeout: config.raw_enter_timeout,
        },
    )
}
