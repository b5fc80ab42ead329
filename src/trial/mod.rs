//! # Trial State Machine
//!
//! ```text
//!            Confirm              Select(label)
//!   Intro ───────────▶ Grid ─────────────────▶ Content
//!                       ▲                        │
//!                       └──── Confirm ───────────┘
//!                        (next grid once complete)
//!
//!   Grid/Content ──sequence exhausted──▶ End
//!   any ──fail()──▶ Error          any ──Quit──▶ stopped
//! ```
//!
//! The machine owns all per-session state: the sequence, the cursor, the
//! active grid, the pending selection and the summary row. It never touches
//! a file or a screen. Every transition returns the [`Effect`]s the session
//! has to carry out (announcements, log writes), in order.
//!
//! Invariants:
//! - each `Grid → Content` transition creates exactly one `SelectionEvent`
//!   and folds it into the summary exactly once;
//! - a label is taken from its grid at most once;
//! - a new grid is drawn only after every label of the current one has
//!   been selected.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::grid::{Draw, GridSampler, GridSubset};
use crate::model::SelectionEvent;
use crate::pool::PresentationSequence;
use crate::prompts::PromptKey;
use crate::summary::{SummaryAggregator, SummaryRow};
use crate::{Error, Result};

// ============================================================================
// States, actions, effects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialState {
    Intro,
    Grid,
    Content,
    End,
    Error,
}

impl fmt::Display for TrialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrialState::Intro => "intro",
            TrialState::Grid => "grid",
            TrialState::Content => "content",
            TrialState::End => "end",
            TrialState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Participant input, already mapped from raw pointer/keyboard events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// The screen's button: Start, Continue, or Exit.
    Confirm,
    /// A click on a grid label.
    Select(String),
    /// Window closed or Escape pressed.
    Quit,
}

impl Action {
    fn name(&self) -> &'static str {
        match self {
            Action::Confirm => "confirm",
            Action::Select(_) => "select",
            Action::Quit => "quit",
        }
    }
}

/// Work the session performs after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Show a prompt for the alert duration, blocking input.
    Announce(PromptKey),
    /// A new selection: append it to the raw log and persist the row.
    Selected {
        event: SelectionEvent,
        row: Box<SummaryRow>,
    },
    /// The reveal latency of a logged selection is now known.
    Revealed(SelectionEvent),
    /// The sequence is exhausted; flush whatever is pending.
    Finished,
}

// ============================================================================
// TrialStateMachine
// ============================================================================

/// Everything a session needs before the participant presses Start.
#[derive(Debug, Clone)]
pub struct TrialPlan {
    pub sequence: PresentationSequence,
    pub sampler: GridSampler,
    pub aggregator: SummaryAggregator,
}

#[derive(Debug)]
pub struct TrialStateMachine {
    state: TrialState,
    /// `None` only for a machine that failed before it was set up.
    plan: Option<TrialPlan>,
    cursor: usize,
    grids_presented: usize,
    grid: Option<GridSubset>,
    grid_shown_at: Option<Instant>,
    content_shown_at: Option<Instant>,
    pending: Option<SelectionEvent>,
    next_seq: u64,
    error: Option<String>,
    stopped: bool,
}

impl TrialStateMachine {
    pub fn new(plan: TrialPlan) -> Self {
        Self::with_plan(Some(plan))
    }

    /// A machine that starts in the error state, for sessions whose
    /// configuration could not be loaded.
    pub fn failed(message: impl Into<String>) -> Self {
        let mut machine = Self::with_plan(None);
        machine.fail(message);
        machine
    }

    fn with_plan(plan: Option<TrialPlan>) -> Self {
        Self {
            state: TrialState::Intro,
            plan,
            cursor: 0,
            grids_presented: 0,
            grid: None,
            grid_shown_at: None,
            content_shown_at: None,
            pending: None,
            next_seq: 1,
            error: None,
            stopped: false,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn state(&self) -> TrialState {
        self.state
    }

    /// False once the participant quit, or confirmed the end/error screen.
    pub fn is_running(&self) -> bool {
        !self.stopped
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn grid(&self) -> Option<&GridSubset> {
        self.grid.as_ref()
    }

    /// The selection whose content is on screen.
    pub fn pending(&self) -> Option<&SelectionEvent> {
        self.pending.as_ref()
    }

    pub fn summary(&self) -> Option<&SummaryRow> {
        self.plan.as_ref().map(|p| p.aggregator.row())
    }

    pub fn sequence(&self) -> Option<&PresentationSequence> {
        self.plan.as_ref().map(|p| &p.sequence)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn grids_presented(&self) -> usize {
        self.grids_presented
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// Dispatch one participant action.
    pub fn handle(&mut self, action: Action, now: Instant) -> Result<Vec<Effect>> {
        match (self.state, action) {
            (_, Action::Quit) => {
                self.quit();
                Ok(Vec::new())
            }
            (TrialState::Intro, Action::Confirm) => self.start(now),
            (TrialState::Grid, Action::Select(label)) => self.select(&label, now),
            (TrialState::Content, Action::Confirm) => self.dismiss(now),
            (TrialState::End | TrialState::Error, Action::Confirm) => {
                self.quit();
                Ok(Vec::new())
            }
            (state, action) => Err(Error::InvalidTransition { state, action: action.name() }),
        }
    }

    /// Record when the current grid is first on screen. Later calls for the
    /// same grid are ignored.
    pub fn mark_displayed(&mut self, now: Instant) {
        if self.state == TrialState::Grid && self.grid_shown_at.is_none() {
            self.grid_shown_at = Some(now);
        }
    }

    /// `Intro → Grid`, or straight to `End` for an empty sequence.
    pub fn start(&mut self, _now: Instant) -> Result<Vec<Effect>> {
        self.require_state(TrialState::Intro, "confirm")?;
        self.cursor = 0;
        self.grids_presented = 0;
        info!("task started");
        Ok(self.refill())
    }

    /// `Grid → Content` on a click of an unselected label.
    pub fn select(&mut self, label: &str, now: Instant) -> Result<Vec<Effect>> {
        self.require_state(TrialState::Grid, "select")?;
        let (Some(plan), Some(grid)) = (self.plan.as_mut(), self.grid.as_mut()) else {
            return Err(Error::InvalidTransition { state: self.state, action: "select" });
        };

        let stimulus = grid
            .unselected()
            .find(|c| c.stimulus.label == label)
            .map(|c| c.stimulus.clone())
            .ok_or_else(|| Error::LabelUnavailable(label.to_string()))?;

        let shown_at = self.grid_shown_at.unwrap_or(now);
        let event = SelectionEvent {
            seq: self.next_seq,
            grid: grid.index,
            category: stimulus.category,
            label: stimulus.label,
            content: stimulus.content,
            selection_latency_ms: millis_between(shown_at, now),
            reveal_latency_ms: None,
        };
        let row = plan.aggregator.apply(&event)?.clone();
        grid.take(label);

        self.next_seq += 1;
        self.state = TrialState::Content;
        self.content_shown_at = Some(now);
        self.pending = Some(event.clone());
        debug!(
            seq = event.seq,
            grid = event.grid,
            category = %event.category,
            label = %event.label,
            latency_ms = event.selection_latency_ms,
            "label selected"
        );
        Ok(vec![Effect::Selected { event, row: Box::new(row) }])
    }

    /// `Content → Grid` (or `End`) when the content screen is dismissed.
    pub fn dismiss(&mut self, now: Instant) -> Result<Vec<Effect>> {
        self.require_state(TrialState::Content, "confirm")?;
        let Some(pending) = self.pending.take() else {
            return Err(Error::InvalidTransition { state: self.state, action: "confirm" });
        };
        let reveal = millis_between(self.content_shown_at.take().unwrap_or(now), now);
        let event = pending.with_reveal(reveal);
        debug!(seq = event.seq, latency_ms = reveal, "content dismissed");

        let mut effects = vec![Effect::Revealed(event)];
        if self.grid.as_ref().is_none_or(GridSubset::is_complete) {
            effects.extend(self.refill());
        } else {
            self.state = TrialState::Grid;
        }
        Ok(effects)
    }

    /// Enter the error state from anywhere. The summary is frozen.
    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(from = %self.state, %message, "session halted");
        self.state = TrialState::Error;
        self.grid = None;
        self.pending = None;
        self.error = Some(message);
    }

    /// Stop the loop. Nothing further is written.
    pub fn quit(&mut self) {
        if !self.stopped {
            info!(state = %self.state, "session stopped");
        }
        self.stopped = true;
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_state(&self, state: TrialState, action: &'static str) -> Result<()> {
        if self.state == state {
            Ok(())
        } else {
            Err(Error::InvalidTransition { state: self.state, action })
        }
    }

    /// Draw the next grid, or end the session when the sequence is spent.
    fn refill(&mut self) -> Vec<Effect> {
        let draw = match &self.plan {
            Some(plan) => plan.sampler.next(&plan.sequence, self.cursor),
            None => Draw::Exhausted,
        };
        match draw {
            Draw::Grid { subset, cursor } => {
                self.cursor = cursor;
                self.grids_presented += 1;
                info!(grid = subset.index, labels = subset.len(), "grid drawn");
                self.grid = Some(subset);
                self.grid_shown_at = None;
                self.state = TrialState::Grid;
                vec![Effect::Announce(PromptKey::GridAlert)]
            }
            Draw::Exhausted => {
                info!(grids = self.grids_presented, "sequence exhausted");
                self.grid = None;
                self.grid_shown_at = None;
                self.state = TrialState::End;
                vec![Effect::Announce(PromptKey::EndAlert), Effect::Finished]
            }
        }
    }
}

fn millis_between(from: Instant, to: Instant) -> u64 {
    to.saturating_duration_since(from).as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GridLayout;
    use crate::model::{CategoryId, ParticipantId, SessionStamp, Stimulus};
    use crate::summary::BiasIndex;
    use chrono::{NaiveDate, NaiveTime};
    use std::time::Duration;

    fn machine(n: usize, grid_size: usize) -> TrialStateMachine {
        let items: Vec<Stimulus> = (0..n)
            .map(|i| Stimulus::new((i % 2 + 1) as u32, format!("L{i}"), format!("C{i}")))
            .collect();
        let sequence = PresentationSequence::new(items);
        let grids = sequence.grid_count(grid_size);
        let row = SummaryRow::new(
            ParticipantId(100_001),
            SessionStamp {
                date: NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
                time: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            },
            grids,
            &[CategoryId(1), CategoryId(2)],
            CategoryId(1),
        )
        .unwrap();
        TrialStateMachine::new(TrialPlan {
            sequence,
            sampler: GridSampler::new(grid_size, GridLayout::default()).unwrap(),
            aggregator: SummaryAggregator::new(row),
        })
    }

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    #[test]
    fn test_start_draws_first_grid() {
        let t0 = Instant::now();
        let mut m = machine(8, 4);
        let effects = m.handle(Action::Confirm, t0).unwrap();
        assert_eq!(effects, vec![Effect::Announce(PromptKey::GridAlert)]);
        assert_eq!(m.state(), TrialState::Grid);
        assert_eq!(m.grid().unwrap().index, 1);
        assert_eq!(m.grids_presented(), 1);
        assert_eq!(m.cursor(), 4);
    }

    #[test]
    fn test_empty_sequence_ends_immediately() {
        let mut m = machine(0, 4);
        let effects = m.handle(Action::Confirm, Instant::now()).unwrap();
        assert_eq!(effects, vec![Effect::Announce(PromptKey::EndAlert), Effect::Finished]);
        assert_eq!(m.state(), TrialState::End);
    }

    #[test]
    fn test_select_records_latencies() {
        let t0 = Instant::now();
        let mut m = machine(4, 4);
        m.handle(Action::Confirm, t0).unwrap();
        m.mark_displayed(ms(t0, 2500));
        m.mark_displayed(ms(t0, 2600));

        let effects = m.handle(Action::Select("L1".into()), ms(t0, 3700)).unwrap();
        match &effects[..] {
            [Effect::Selected { event, row }] => {
                assert_eq!(event.seq, 1);
                assert_eq!(event.grid, 1);
                assert_eq!(event.category, CategoryId(2));
                assert_eq!(event.content, "C1");
                assert_eq!(event.selection_latency_ms, 1200);
                assert!(event.is_pending());
                assert_eq!(row.grid_bias(1), BiasIndex::Ratio(0.0));
            }
            other => panic!("unexpected effects: {other:?}"),
        }
        assert_eq!(m.state(), TrialState::Content);

        let effects = m.handle(Action::Confirm, ms(t0, 5700)).unwrap();
        match &effects[..] {
            [Effect::Revealed(event)] => assert_eq!(event.reveal_latency_ms, Some(2000)),
            other => panic!("unexpected effects: {other:?}"),
        }
        assert_eq!(m.state(), TrialState::Grid);
        assert_eq!(m.grid().unwrap().remaining(), 3);
    }

    #[test]
    fn test_same_label_cannot_be_selected_twice() {
        let t0 = Instant::now();
        let mut m = machine(4, 4);
        m.handle(Action::Confirm, t0).unwrap();
        m.handle(Action::Select("L0".into()), t0).unwrap();
        m.handle(Action::Confirm, t0).unwrap();

        let err = m.handle(Action::Select("L0".into()), t0).unwrap_err();
        assert!(matches!(err, Error::LabelUnavailable(_)));
        assert_eq!(m.state(), TrialState::Grid);
        assert_eq!(m.summary().unwrap().selections(), 1);
    }

    #[test]
    fn test_wrong_actions_rejected() {
        let t0 = Instant::now();
        let mut m = machine(4, 4);
        assert!(matches!(
            m.handle(Action::Select("L0".into()), t0),
            Err(Error::InvalidTransition { state: TrialState::Intro, .. })
        ));
        m.handle(Action::Confirm, t0).unwrap();
        assert!(m.handle(Action::Confirm, t0).is_err());
        m.handle(Action::Select("L0".into()), t0).unwrap();
        assert!(m.handle(Action::Select("L1".into()), t0).is_err());
    }

    #[test]
    fn test_grid_advances_only_when_complete() {
        let t0 = Instant::now();
        let mut m = machine(6, 4);
        m.handle(Action::Confirm, t0).unwrap();
        for label in ["L0", "L1", "L2"] {
            m.handle(Action::Select(label.into()), t0).unwrap();
            let effects = m.handle(Action::Confirm, t0).unwrap();
            assert_eq!(effects.len(), 1);
            assert_eq!(m.grid().unwrap().index, 1);
        }
        m.handle(Action::Select("L3".into()), t0).unwrap();
        let effects = m.handle(Action::Confirm, t0).unwrap();
        assert_eq!(effects.len(), 2);
        assert_eq!(effects[1], Effect::Announce(PromptKey::GridAlert));
        assert_eq!(m.grid().unwrap().index, 2);
        assert_eq!(m.grid().unwrap().len(), 2);

        for label in ["L4", "L5"] {
            m.handle(Action::Select(label.into()), t0).unwrap();
            m.handle(Action::Confirm, t0).unwrap();
        }
        assert_eq!(m.state(), TrialState::End);
        assert_eq!(m.summary().unwrap().selections(), 6);
    }

    #[test]
    fn test_fail_freezes_summary() {
        let t0 = Instant::now();
        let mut m = machine(4, 4);
        m.handle(Action::Confirm, t0).unwrap();
        m.handle(Action::Select("L0".into()), t0).unwrap();
        m.fail("stimulus file vanished");
        assert_eq!(m.state(), TrialState::Error);
        assert_eq!(m.error_message(), Some("stimulus file vanished"));
        assert!(m.handle(Action::Confirm, t0).unwrap().is_empty());
        assert!(!m.is_running());
        assert_eq!(m.summary().unwrap().selections(), 1);
    }

    #[test]
    fn test_failed_machine() {
        let mut m = TrialStateMachine::failed("missing prompts");
        assert_eq!(m.state(), TrialState::Error);
        assert!(m.summary().is_none());
        assert!(m.handle(Action::Select("x".into()), Instant::now()).is_err());
        m.handle(Action::Quit, Instant::now()).unwrap();
        assert!(!m.is_running());
    }

    #[test]
    fn test_quit_from_any_state() {
        let t0 = Instant::now();
        let mut m = machine(4, 4);
        m.handle(Action::Confirm, t0).unwrap();
        m.handle(Action::Select("L2".into()), t0).unwrap();
        assert!(m.handle(Action::Quit, t0).unwrap().is_empty());
        assert!(!m.is_running());
        assert!(m.pending().is_some());
    }
}
