//! The rendering and input collaborator.
//!
//! A `Surface` draws whatever [`Screen`] the session hands it and turns raw
//! pointer/keyboard input into [`Action`]s. Window management, fonts, text
//! wrapping and hit-testing all live behind this trait.

use std::time::Duration;

use crate::grid::{GridLayout, GridSubset};
use crate::trial::Action;
use crate::Result;

/// What should be on screen right now.
#[derive(Debug, Clone, Copy)]
pub enum Screen<'a> {
    Intro {
        title: &'a str,
        body: &'a str,
        button: &'a str,
    },
    /// Only unselected cells are drawn; selected ones leave a gap.
    Grid {
        prompt: &'a str,
        grid: &'a GridSubset,
        layout: &'a GridLayout,
    },
    Content {
        content: &'a str,
        button: &'a str,
    },
    Error {
        message: &'a str,
        button: &'a str,
    },
    /// Nothing left to show.
    End,
}

pub trait Surface {
    /// Draw `screen`, replacing whatever was shown before.
    fn render(&mut self, screen: &Screen<'_>) -> Result<()>;

    /// Block until the participant does something. `None` means the input
    /// source is gone and the session should stop.
    fn next_action(&mut self) -> Option<Action>;

    /// Show `text` alone for `duration`. Blocks; input is not read.
    fn announce(&mut self, text: &str, duration: Duration) -> Result<()>;
}
