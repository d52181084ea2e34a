//! Edge-triggered button state.
//!
//! Panels report level transitions whenever they happen. The host wants to
//! ask once per frame "was this pressed this frame?", so each tick first ages
//! the previous result and then applies the transitions received since:
//!
//! ```text
//! age:   Up -> NoInput, Down -> Held, Held/NoInput unchanged
//! down:  NoInput -> Down, anything else -> Held
//! up:    anything -> Up
//! ```

use std::fmt;

use tracing::warn;

use crate::driver::KeyEvent;
use crate::protocol::{ButtonIndex, ButtonPos, PanelGeometry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    NoInput,
    /// Pressed this tick.
    Down,
    /// Still pressed after the tick it went down.
    Held,
    /// Released this tick.
    Up,
}

impl ButtonState {
    /// State carried into the next tick before any new events apply.
    pub fn aged(self) -> Self {
        match self {
            ButtonState::Up => ButtonState::NoInput,
            ButtonState::Down => ButtonState::Held,
            other => other,
        }
    }

    /// Apply one raw transition.
    pub fn apply(self, is_down: bool) -> Self {
        match (is_down, self) {
            (true, ButtonState::NoInput) => ButtonState::Down,
            (true, _) => ButtonState::Held,
            (false, _) => ButtonState::Up,
        }
    }
}

impl fmt::Display for ButtonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonState::NoInput => write!(f, "no input"),
            ButtonState::Down => write!(f, "down"),
            ButtonState::Held => write!(f, "held"),
            ButtonState::Up => write!(f, "up"),
        }
    }
}

/// States of every button on one panel.
#[derive(Debug, Clone)]
pub struct ButtonGrid {
    geometry: PanelGeometry,
    states: Vec<ButtonState>,
}

impl ButtonGrid {
    pub fn new(geometry: PanelGeometry) -> Self {
        Self {
            geometry,
            states: vec![ButtonState::NoInput; geometry.button_count()],
        }
    }

    pub fn geometry(&self) -> PanelGeometry {
        self.geometry
    }

    /// Advance one tick: age every button, then apply `events` in order.
    /// Events for buttons outside the grid are dropped.
    pub fn tick<I>(&mut self, events: I)
    where
        I: IntoIterator<Item = KeyEvent>,
    {
        for state in &mut self.states {
            *state = state.aged();
        }
        for event in events {
            match self.states.get_mut(event.button as usize) {
                Some(state) => *state = state.apply(event.is_down),
                None => warn!(
                    button = event.button,
                    count = self.states.len(),
                    "Dropping key event for unknown button"
                ),
            }
        }
    }

    pub fn state(&self, button: ButtonIndex) -> ButtonState {
        self.states
            .get(button as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn state_at(&self, pos: ButtonPos) -> ButtonState {
        self.geometry
            .index_of(pos)
            .map(|index| self.state(index))
            .unwrap_or_default()
    }

    pub fn is_down(&self, button: ButtonIndex) -> bool {
        self.state(button) == ButtonState::Down
    }

    pub fn is_held(&self, button: ButtonIndex) -> bool {
        self.state(button) == ButtonState::Held
    }

    pub fn is_up(&self, button: ButtonIndex) -> bool {
        self.state(button) == ButtonState::Up
    }

    /// Buttons whose state is not `NoInput`, in index order.
    pub fn active(&self) -> impl Iterator<Item = (ButtonIndex, ButtonState)> + '_ {
        self.states
            .iter()
            .enumerate()
            .filter(|(_, s)| **s != ButtonState::NoInput)
            .map(|(i, s)| (i as ButtonIndex, *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use ButtonState::*;

    fn grid() -> ButtonGrid {
        ButtonGrid::new(PanelGeometry::default())
    }

    #[test]
    fn test_aging() {
        assert_eq!(Up.aged(), NoInput);
        assert_eq!(Down.aged(), Held);
        assert_eq!(Held.aged(), Held);
        assert_eq!(NoInput.aged(), NoInput);
    }

    #[test]
    fn test_apply() {
        assert_eq!(NoInput.apply(true), Down);
        assert_eq!(Down.apply(true), Held);
        assert_eq!(Held.apply(true), Held);
        assert_eq!(Up.apply(true), Held);
        for s in [NoInput, Down, Held, Up] {
            assert_eq!(s.apply(false), Up);
        }
    }

    #[test]
    fn test_press_and_release_in_one_tick() {
        let geometry = PanelGeometry::default();
        let button = geometry.index_of(ButtonPos::new(3, 2)).unwrap();
        let mut grid = grid();

        grid.tick([KeyEvent::down(button), KeyEvent::up(button)]);
        assert_eq!(grid.state(button), Up);
        assert!(grid.is_up(button));
        assert!(!grid.is_down(button));

        grid.tick([]);
        assert_eq!(grid.state_at(ButtonPos::new(3, 2)), NoInput);
    }

    #[test]
    fn test_held_lifecycle() {
        let mut grid = grid();
        grid.tick([KeyEvent::down(5)]);
        assert!(grid.is_down(5));
        grid.tick([]);
        assert!(grid.is_held(5));
        grid.tick([]);
        assert!(grid.is_held(5));
        grid.tick([KeyEvent::up(5)]);
        assert!(grid.is_up(5));
        grid.tick([]);
        assert_eq!(grid.state(5), NoInput);
    }

    #[test]
    fn test_release_then_press_same_tick_is_held() {
        let mut grid = grid();
        grid.tick([KeyEvent::down(0)]);
        grid.tick([KeyEvent::up(0), KeyEvent::down(0)]);
        assert!(grid.is_held(0));
    }

    #[test]
    fn test_unknown_button_is_ignored() {
        let mut grid = grid();
        grid.tick([KeyEvent::down(999), KeyEvent::down(1)]);
        assert!(grid.is_down(1));
        assert_eq!(grid.state(999), NoInput);
        assert_eq!(grid.active().count(), 1);
    }

    /// Walk every sequence of up to six steps, each step being a tick
    /// carrying zero, one or two transitions, and check the edge guarantees
    /// against the physical key level.
    #[test]
    fn test_all_interleavings_fire_edges_once() {
        let step_choices: Vec<Vec<bool>> = vec![
            vec![],
            vec![true],
            vec![false],
            vec![true, false],
            vec![false, true],
        ];

        fn walk(choices: &[Vec<bool>], depth: usize, history: &mut Vec<usize>) {
            if depth == 0 {
                check(choices, history);
                return;
            }
            for i in 0..choices.len() {
                history.push(i);
                walk(choices, depth - 1, history);
                history.pop();
            }
        }

        fn check(choices: &[Vec<bool>], history: &[usize]) {
            let mut grid = ButtonGrid::new(PanelGeometry::default());
            let mut prev = NoInput;
            for &step in history {
                let events = &choices[step];
                grid.tick(events.iter().map(|&d| KeyEvent {
                    button: 0,
                    is_down: d,
                }));
                let now = grid.state(0);

                // Down only right after a press from rest.
                if now == Down {
                    assert_eq!(prev.aged(), NoInput, "{history:?}");
                    assert_eq!(events.last(), Some(&true), "{history:?}");
                }
                // Up only in a tick that carried a release as its last event.
                if now == Up {
                    assert_eq!(events.last(), Some(&false), "{history:?}");
                }
                // Edges never persist into an idle tick.
                if events.is_empty() {
                    assert!(now != Down && now != Up, "{history:?}");
                }
                // A final press leaves the key down or held; a final release
                // leaves it up.
                match events.last() {
                    Some(true) => assert!(now == Down || now == Held, "{history:?}"),
                    Some(false) => assert_eq!(now, Up, "{history:?}"),
                    None => {}
                }
                prev = now;
            }
        }

        walk(&step_choices, 6, &mut Vec::new());
    }
}
