//! # select-int-task: Selective Interrogation Assessment Task
//!
//! A participant sees grids of short labels drawn from two or more content
//! categories and chooses which ones to open. The task records which labels
//! were chosen and how fast, and keeps a running bias index (the share of
//! selections that fell on the target category) per grid and overall.
//!
//! ## Design Principles
//!
//! 1. **One owner**: `TrialStateMachine` owns the sequence, cursor, active
//!    grid and summary row; nothing is global
//! 2. **Effects out, not I/O in**: transitions return `Effect`s; the session
//!    turns them into log writes and announcements
//! 3. **Store-agnostic**: `SummaryStore` and `RawLog` are the contract with
//!    persistence, with memory and CSV backends
//! 4. **Never crash mid-session**: write failures are queued and retried;
//!    only missing configuration stops a session, via the Error screen
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use select_int_task::{Session, TaskConfig};
//! use select_int_task::storage::{CsvRawLog, CsvSummaryStore};
//!
//! # fn example(surface: &mut impl select_int_task::Surface) -> select_int_task::Result<()> {
//! let config = TaskConfig::from_env()?;
//! let summary = CsvSummaryStore::new(&config.summary_path);
//! let raw = CsvRawLog::new(&config.raw_log_path);
//!
//! let mut session = Session::open(config, summary, raw);
//! session.run(surface)?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod model;
pub mod pool;
pub mod grid;
pub mod trial;
pub mod summary;
pub mod storage;
pub mod prompts;
pub mod config;
pub mod surface;

use std::path::PathBuf;
use std::time::Instant;

use rand::Rng;
use tracing::{debug, info, warn};

// ============================================================================
// Re-exports
// ============================================================================

pub use model::{CategoryId, ParticipantId, SelectionEvent, SessionStamp, Stimulus};
pub use pool::{PresentationSequence, StimulusPool};
pub use grid::{Draw, GridCell, GridLayout, GridSampler, GridSubset, Position};
pub use trial::{Action, Effect, TrialPlan, TrialState, TrialStateMachine};
pub use summary::{BiasIndex, SummaryAggregator, SummaryRow};
pub use storage::{Persistence, RawLog, RawRecord, SummaryStore};
pub use prompts::{PromptKey, PromptText};
pub use config::TaskConfig;
pub use surface::{Screen, Surface};

// ============================================================================
// Session
// ============================================================================

/// One participant's run of the task: configuration, prompts, the state
/// machine, and the stores it writes to.
pub struct Session<S: SummaryStore, L: RawLog> {
    config: TaskConfig,
    prompts: PromptText,
    stamp: SessionStamp,
    participant: Option<ParticipantId>,
    machine: TrialStateMachine,
    persistence: Persistence<S, L>,
}

impl<S: SummaryStore, L: RawLog> Session<S, L> {
    /// Load prompts and stimuli, assign a participant identifier, and build
    /// the presentation sequence.
    ///
    /// Never fails: a configuration problem puts the session straight into
    /// the Error state, so the surface can show it.
    pub fn open(config: TaskConfig, summary: S, raw: L) -> Self {
        Self::open_with_rng(config, summary, raw, &mut rand::rng())
    }

    pub fn open_with_rng<R: Rng + ?Sized>(
        config: TaskConfig,
        summary: S,
        raw: L,
        rng: &mut R,
    ) -> Self {
        let stamp = SessionStamp::now();
        let persistence = Persistence::new(summary, raw);
        let mut prompts = PromptText::default();

        let setup = PromptText::load(&config.prompts_path).and_then(|p| {
            prompts = p;
            Self::plan(&config, &persistence, stamp, rng)
        });

        let (machine, participant) = match setup {
            Ok((plan, participant)) => {
                info!(%participant, grids = plan.aggregator.row().grid_count(), "session ready");
                (TrialStateMachine::new(plan), Some(participant))
            }
            Err(e) => (TrialStateMachine::failed(e.to_string()), None),
        };

        Self { config, prompts, stamp, participant, machine, persistence }
    }

    fn plan<R: Rng + ?Sized>(
        config: &TaskConfig,
        persistence: &Persistence<S, L>,
        stamp: SessionStamp,
        rng: &mut R,
    ) -> Result<(TrialPlan, ParticipantId)> {
        config.validate()?;
        let pool = StimulusPool::load(&config.stimuli_path)?;
        let category_count = config.category_count.unwrap_or_else(|| pool.category_count());
        let sequence = pool.build(config.grid_size, category_count, rng);

        // Grids are cut on batch boundaries so each one stays balanced.
        let grid_size = match StimulusPool::balanced_grid_size(config.grid_size, category_count) {
            0 => config.grid_size,
            balanced => balanced,
        };
        if grid_size != config.grid_size {
            info!(
                configured = config.grid_size,
                grid_size,
                "grid size rounded down to whole batches"
            );
        }
        let sampler = GridSampler::new(grid_size, config.layout.clone())?;
        if sequence.is_empty() {
            warn!("no usable stimuli; the task will end as soon as it starts");
        }

        let mut categories = pool.categories();
        let target = match config.target_category {
            Some(target) => target,
            None => categories.first().copied().unwrap_or(CategoryId(1)),
        };
        if categories.is_empty() {
            categories.push(target);
        }

        let participant = ParticipantId::assign(&persistence.existing_participants(), rng)?;
        info!(%participant, "participant assigned");

        let row = SummaryRow::new(
            participant,
            stamp,
            sequence.grid_count(grid_size),
            &categories,
            target,
        )?;
        let plan = TrialPlan {
            sequence,
            sampler,
            aggregator: SummaryAggregator::new(row),
        };
        Ok((plan, participant))
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    pub fn participant(&self) -> Option<ParticipantId> {
        self.participant
    }

    pub fn stamp(&self) -> SessionStamp {
        self.stamp
    }

    pub fn state(&self) -> TrialState {
        self.machine.state()
    }

    pub fn machine(&self) -> &TrialStateMachine {
        &self.machine
    }

    pub fn persistence(&self) -> &Persistence<S, L> {
        &self.persistence
    }

    pub fn summary(&self) -> Option<&SummaryRow> {
        self.machine.summary()
    }

    // ========================================================================
    // Driving
    // ========================================================================

    /// The screen for the current state.
    pub fn screen(&self) -> Result<Screen<'_>> {
        let p = &self.prompts;
        Ok(match self.machine.state() {
            TrialState::Intro => Screen::Intro {
                title: p.get(PromptKey::InstructionsTitle)?,
                body: p.get(PromptKey::InstructionsBody)?,
                button: p.get(PromptKey::StartButton)?,
            },
            TrialState::Grid => match self.machine.grid() {
                Some(grid) => Screen::Grid {
                    prompt: p.get(PromptKey::GridPrompt)?,
                    grid,
                    layout: &self.config.layout,
                },
                None => Screen::End,
            },
            TrialState::Content => Screen::Content {
                content: self.machine.pending().map_or("", |e| e.content.as_str()),
                button: p.get(PromptKey::ContinueButton)?,
            },
            TrialState::Error => Screen::Error {
                message: self.machine.error_message().unwrap_or("unknown error"),
                button: p.get(PromptKey::ExitButton)?,
            },
            TrialState::End => Screen::End,
        })
    }

    /// Apply one action and carry out its persistence effects.
    ///
    /// Rejected actions (a click on an already opened label, a stray click
    /// on the wrong screen) are logged and ignored. The returned effects
    /// include the announcements the caller still has to show.
    pub fn handle(&mut self, action: Action, now: Instant) -> Vec<Effect> {
        let effects = match self.machine.handle(action, now) {
            Ok(effects) => effects,
            Err(e) => {
                debug!(error = %e, state = %self.machine.state(), "action ignored");
                return Vec::new();
            }
        };

        let participant = self.participant;
        for effect in &effects {
            match (effect, participant) {
                (Effect::Selected { event, row }, Some(participant)) => {
                    let record = RawRecord { stamp: self.stamp, participant, event: event.clone() };
                    self.persistence.record_selection(record, row);
                }
                (Effect::Revealed(event), Some(participant)) => {
                    let record = RawRecord { stamp: self.stamp, participant, event: event.clone() };
                    self.persistence.record_reveal(record);
                }
                (Effect::Finished, _) => {
                    if !self.persistence.flush() {
                        warn!(
                            pending = self.persistence.pending(),
                            "session ended with unsaved writes"
                        );
                    }
                    info!(participant = ?self.participant, "task complete");
                }
                _ => {}
            }
        }
        effects
    }

    /// Run the cooperative loop until the participant quits or the task
    /// ends: render, wait for input, transition, announce.
    pub fn run<U: Surface>(&mut self, surface: &mut U) -> Result<()> {
        while self.machine.is_running() {
            let screen = match self.screen() {
                Ok(screen) => screen,
                Err(e) => {
                    self.machine.fail(e.to_string());
                    continue;
                }
            };
            surface.render(&screen)?;
            if self.machine.state() == TrialState::Grid {
                self.machine.mark_displayed(Instant::now());
            }

            let Some(action) = surface.next_action() else {
                self.machine.quit();
                break;
            };

            for effect in self.handle(action, Instant::now()) {
                if let Effect::Announce(key) = effect {
                    match self.prompts.get(key) {
                        Ok(text) => surface.announce(text, self.config.alert())?,
                        Err(e) => self.machine.fail(e.to_string()),
                    }
                }
            }

            if self.machine.state() == TrialState::End {
                self.machine.quit();
            }
        }
        Ok(())
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(
        "{resource} not found at {}; make sure the file is saved next to the task",
        path.display()
    )]
    ConfigurationMissing { resource: String, path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Prompt text is missing the required key '{0}'")]
    MissingPrompt(String),

    #[error("Malformed table at line {line}: {message}")]
    Table { line: usize, message: String },

    #[error("Action '{action}' is not valid in the {state} state")]
    InvalidTransition { state: TrialState, action: &'static str },

    #[error("Label not available: {0}")]
    LabelUnavailable(String),

    #[error("Invalid selection event: {0}")]
    InvalidEvent(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Every participant identifier is already in use")]
    IdentityExhausted,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
