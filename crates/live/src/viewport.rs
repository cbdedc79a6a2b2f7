//! Follow-vs-paused scroll state and keyboard turn focus.
//!
//! Pure state machine: inputs describe what happened (content grew, the user
//! scrolled, a key was pressed) and the returned [`ScrollAction`] tells the
//! renderer where to go.

use serde::Serialize;

/// Keyboard turn navigation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Navigation {
    Next,
    Prev,
    First,
    Last,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewportInput {
    /// Events were added at the end of the transcript. They may open new
    /// turns or stream into the open one.
    ContentAppended {
        turn_count: usize,
        events_added: usize,
    },
    /// The transcript was rebuilt. `focus_hint` is where the previously
    /// focused turn now lives, if it still exists.
    ContentReplaced {
        turn_count: usize,
        focus_hint: Option<usize>,
    },
    /// The user scrolled; distance from the bottom in rows.
    Scrolled { rows_from_bottom: usize },
    /// Explicit "jump to latest".
    Resume,
    Navigate(Navigation),
}

impl ViewportInput {
    /// Map a key name to an input. Unbound keys yield `None`.
    pub fn from_key(key: &str) -> Option<Self> {
        let input = match key {
            "j" | "Down" => Self::Navigate(Navigation::Next),
            "k" | "Up" => Self::Navigate(Navigation::Prev),
            "g" | "Home" => Self::Navigate(Navigation::First),
            "G" | "End" => Self::Navigate(Navigation::Last),
            "f" | "Enter" => Self::Resume,
            _ => return None,
        };
        Some(input)
    }
}

/// What the renderer should do after an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollAction {
    Stay,
    JumpToLatest,
    JumpToTurn(usize),
}

/// Read-only view handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportState {
    pub follow_mode: bool,
    pub focused_turn_index: Option<usize>,
    /// Turns appended while paused.
    pub unseen_turns: usize,
    /// Events appended while paused, including those that only grew the
    /// open turn.
    pub unseen_events: usize,
    pub turn_count: usize,
}

impl ViewportState {
    /// Whether the "N new" resume affordance should be shown.
    pub fn new_items_available(&self) -> bool {
        !self.follow_mode && (self.unseen_turns > 0 || self.unseen_events > 0)
    }
}

#[derive(Debug, Clone)]
pub struct Viewport {
    follow_mode: bool,
    detached_by_user: bool,
    auto_follow_threshold_rows: usize,
    focused_turn_index: Option<usize>,
    turn_count: usize,
    unseen_turns: usize,
    unseen_events: usize,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(2)
    }
}

impl Viewport {
    pub fn new(auto_follow_threshold_rows: usize) -> Self {
        Self {
            follow_mode: true,
            detached_by_user: false,
            auto_follow_threshold_rows,
            focused_turn_index: None,
            turn_count: 0,
            unseen_turns: 0,
            unseen_events: 0,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.auto_follow_threshold_rows);
    }

    pub fn is_following(&self) -> bool {
        self.follow_mode
    }

    pub fn detached_by_user(&self) -> bool {
        self.detached_by_user
    }

    pub fn focused_turn_index(&self) -> Option<usize> {
        self.focused_turn_index
    }

    pub fn state(&self) -> ViewportState {
        ViewportState {
            follow_mode: self.follow_mode,
            focused_turn_index: self.focused_turn_index,
            unseen_turns: self.unseen_turns,
            unseen_events: self.unseen_events,
            turn_count: self.turn_count,
        }
    }

    pub fn apply(&mut self, input: ViewportInput) -> ScrollAction {
        match input {
            ViewportInput::ContentAppended {
                turn_count,
                events_added,
            } => {
                let added = turn_count.saturating_sub(self.turn_count);
                self.turn_count = turn_count;
                self.clamp_focus();
                if self.follow_mode {
                    self.unseen_turns = 0;
                    self.unseen_events = 0;
                    ScrollAction::JumpToLatest
                } else {
                    self.unseen_turns = (self.unseen_turns + added).min(turn_count);
                    self.unseen_events += events_added;
                    ScrollAction::Stay
                }
            }
            ViewportInput::ContentReplaced {
                turn_count,
                focus_hint,
            } => {
                self.turn_count = turn_count;
                if self.focused_turn_index.is_some() {
                    self.focused_turn_index = focus_hint;
                }
                self.clamp_focus();
                self.unseen_turns = self.unseen_turns.min(turn_count);
                if self.follow_mode {
                    ScrollAction::JumpToLatest
                } else {
                    ScrollAction::Stay
                }
            }
            ViewportInput::Scrolled { rows_from_bottom } => {
                if rows_from_bottom > self.auto_follow_threshold_rows {
                    self.detach();
                } else if !self.follow_mode {
                    self.reattach();
                }
                ScrollAction::Stay
            }
            ViewportInput::Resume => {
                self.reattach();
                ScrollAction::JumpToLatest
            }
            ViewportInput::Navigate(nav) => match self.navigate(nav) {
                Some(index) => ScrollAction::JumpToTurn(index),
                None => ScrollAction::Stay,
            },
        }
    }

    fn detach(&mut self) {
        if self.follow_mode {
            tracing::trace!("Viewport paused");
        }
        self.follow_mode = false;
        self.detached_by_user = true;
    }

    fn reattach(&mut self) {
        self.follow_mode = true;
        self.detached_by_user = false;
        self.unseen_turns = 0;
        self.unseen_events = 0;
    }

    fn navigate(&mut self, nav: Navigation) -> Option<usize> {
        let last = self.turn_count.checked_sub(1)?;
        let next = match (nav, self.focused_turn_index) {
            (Navigation::First, _) | (Navigation::Next, None) => 0,
            (Navigation::Last, _) | (Navigation::Prev, None) => last,
            (Navigation::Next, Some(index)) => (index + 1).min(last),
            (Navigation::Prev, Some(index)) => index.saturating_sub(1).min(last),
        };
        self.focused_turn_index = Some(next);
        Some(next)
    }

    fn clamp_focus(&mut self) {
        self.focused_turn_index = match (self.focused_turn_index, self.turn_count) {
            (_, 0) => None,
            (Some(index), count) => Some(index.min(count - 1)),
            (None, _) => None,
        };
    }
}
