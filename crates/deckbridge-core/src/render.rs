//! Coalescing render queue.
//!
//! At most one job is pending per target. Pushing a job for a target that
//! already has one hands the superseded job back to the caller, which must
//! release its payload.

use std::collections::BTreeMap;
use std::fmt;

use crate::protocol::{ButtonIndex, Message, PanelIndex, PayloadRef, Rgb};

/// What a job draws onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RenderTarget {
    Deck { panel: PanelIndex },
    Button { panel: PanelIndex, button: ButtonIndex },
}

impl RenderTarget {
    pub fn panel(&self) -> PanelIndex {
        match *self {
            RenderTarget::Deck { panel } | RenderTarget::Button { panel, .. } => panel,
        }
    }
}

impl fmt::Display for RenderTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderTarget::Deck { panel } => write!(f, "panel {panel}"),
            RenderTarget::Button { panel, button } => write!(f, "panel {panel} button {button}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobContent {
    Color(Rgb),
    Image(PayloadRef),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub target: RenderTarget,
    pub content: JobContent,
}

impl RenderJob {
    pub fn color(target: RenderTarget, color: Rgb) -> Self {
        Self {
            target,
            content: JobContent::Color(color),
        }
    }

    pub fn image(target: RenderTarget, payload: PayloadRef) -> Self {
        Self {
            target,
            content: JobContent::Image(payload),
        }
    }

    /// Build the job a render command asks for. Other messages yield `None`.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let job = match msg {
            Message::SetButtonColor {
                panel,
                button,
                color,
            } => Self::color(
                RenderTarget::Button {
                    panel: *panel,
                    button: *button,
                },
                *color,
            ),
            Message::SetButtonImage {
                panel,
                button,
                payload,
            } => Self::image(
                RenderTarget::Button {
                    panel: *panel,
                    button: *button,
                },
                payload.clone(),
            ),
            Message::SetDeckColor { panel, color } => {
                Self::color(RenderTarget::Deck { panel: *panel }, *color)
            }
            Message::SetDeckImage { panel, payload } => {
                Self::image(RenderTarget::Deck { panel: *panel }, payload.clone())
            }
            _ => return None,
        };
        Some(job)
    }

    pub fn payload(&self) -> Option<&PayloadRef> {
        match &self.content {
            JobContent::Image(payload) => Some(payload),
            JobContent::Color(_) => None,
        }
    }
}

/// Pending jobs, one per target, split into deck and button maps.
#[derive(Debug, Default)]
pub struct RenderQueue {
    decks: BTreeMap<PanelIndex, RenderJob>,
    buttons: BTreeMap<(PanelIndex, ButtonIndex), RenderJob>,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `job`, returning the job it replaced.
    pub fn push(&mut self, job: RenderJob) -> Option<RenderJob> {
        match job.target {
            RenderTarget::Deck { panel } => self.decks.insert(panel, job),
            RenderTarget::Button { panel, button } => self.buttons.insert((panel, button), job),
        }
    }

    pub fn take_decks(&mut self) -> Vec<RenderJob> {
        std::mem::take(&mut self.decks).into_values().collect()
    }

    pub fn take_buttons(&mut self) -> Vec<RenderJob> {
        std::mem::take(&mut self.buttons).into_values().collect()
    }

    /// Remove every pending job, decks first.
    pub fn take_all(&mut self) -> Vec<RenderJob> {
        let mut jobs = self.take_decks();
        jobs.extend(self.take_buttons());
        jobs
    }

    pub fn len(&self) -> usize {
        self.decks.len() + self.buttons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
