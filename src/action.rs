use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EnvError;

/// Discrete commands accepted by the simulator, in wire order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Up,
    Down,
    Left,
    Right,
    RotateCounterclockwise,
    RotateClockwise,
    ZoomIn,
    ZoomOut,
    NextShape,
    #[serde(rename = "select_same_shape")]
    SelectSame,
    #[serde(rename = "select_different_shape")]
    SelectDifferent,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::Up,
        Action::Down,
        Action::Left,
        Action::Right,
        Action::RotateCounterclockwise,
        Action::RotateClockwise,
        Action::ZoomIn,
        Action::ZoomOut,
        Action::NextShape,
        Action::SelectSame,
        Action::SelectDifferent,
    ];

    pub const COUNT: usize = Self::ALL.len();

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Result<Self, EnvError> {
        Self::ALL.get(index).copied().ok_or(EnvError::InvalidAction {
            index,
            count: Self::COUNT,
        })
    }

    pub fn wire_name(self) -> &'static str {
        match self {
            Action::Up => "up",
            Action::Down => "down",
            Action::Left => "left",
            Action::Right => "right",
            Action::RotateCounterclockwise => "rotate_counterclockwise",
            Action::RotateClockwise => "rotate_clockwise",
            Action::ZoomIn => "zoom_in",
            Action::ZoomOut => "zoom_out",
            Action::NextShape => "next_shape",
            Action::SelectSame => "select_same_shape",
            Action::SelectDifferent => "select_different_shape",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|action| action.wire_name() == name)
    }

    /// Keyboard shortcut used by the interactive client.
    pub fn key(self) -> char {
        match self {
            Action::Up => 'W',
            Action::Down => 'S',
            Action::Left => 'A',
            Action::Right => 'D',
            Action::RotateCounterclockwise => 'Q',
            Action::RotateClockwise => 'E',
            Action::ZoomIn => '+',
            Action::ZoomOut => '-',
            Action::NextShape => 'N',
            Action::SelectSame => '1',
            Action::SelectDifferent => '0',
        }
    }

    pub fn from_key(key: char) -> Option<Self> {
        let key = key.to_ascii_uppercase();
        Self::ALL.iter().copied().find(|action| action.key() == key)
    }

    pub fn is_selection(self) -> bool {
        matches!(self, Action::SelectSame | Action::SelectDifferent)
    }

    /// The `same` verdict a selection asserts, `None` for non-selections.
    pub fn selected_same(self) -> Option<bool> {
        match self {
            Action::SelectSame => Some(true),
            Action::SelectDifferent => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl TryFrom<usize> for Action {
    type Error = EnvError;

    fn try_from(index: usize) -> Result<Self, Self::Error> {
        Self::from_index(index)
    }
}

#[cfg(test)]
mod tests {
    use super::Action;

    #[test]
    fn indices_follow_wire_order() {
        for (index, action) in Action::ALL.iter().enumerate() {
            assert_eq!(action.index(), index);
            assert_eq!(Action::from_index(index).expect("index in range"), *action);
        }
        assert_eq!(Action::NextShape.index(), 8);
        assert_eq!(Action::SelectDifferent.index(), 10);
    }

    #[test]
    fn out_of_range_index_is_rejected() {
        assert!(Action::from_index(11).is_err());
    }

    #[test]
    fn wire_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_wire_name(action.wire_name()), Some(action));
        }
        assert_eq!(Action::SelectSame.wire_name(), "select_same_shape");
    }

    #[test]
    fn serde_uses_wire_names() {
        for action in Action::ALL {
            let encoded = serde_json::to_value(action).expect("action should serialize");
            assert_eq!(encoded, serde_json::json!(action.wire_name()));
        }
    }

    #[test]
    fn keys_are_case_insensitive() {
        assert_eq!(Action::from_key('w'), Some(Action::Up));
        assert_eq!(Action::from_key('n'), Some(Action::NextShape));
        assert_eq!(Action::from_key('x'), None);
    }

    #[test]
    fn selections_report_their_verdict() {
        assert_eq!(Action::SelectSame.selected_same(), Some(true));
        assert_eq!(Action::SelectDifferent.selected_same(), Some(false));
        assert_eq!(Action::ZoomIn.selected_same(), None);
        assert!(!Action::NextShape.is_selection());
    }
}
