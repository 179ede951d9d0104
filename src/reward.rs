use serde::{Deserialize, Serialize};

use crate::action::Action;

/// Everything the reward depends on. Built before progress is advanced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RewardContext {
    pub action: Action,
    pub answered: bool,
    pub last_action_was_selection: bool,
    pub ground_truth_same: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewardTable {
    pub correct_selection: f32,
    pub wrong_selection: f32,
    pub repeated_selection: f32,
    pub skip_unanswered: f32,
    pub advance_answered: f32,
    pub step_cost: f32,
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            correct_selection: 1.0,
            wrong_selection: -1.0,
            repeated_selection: -0.1,
            skip_unanswered: -0.5,
            advance_answered: -0.01,
            step_cost: -0.01,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionOnlyTable {
    pub correct_selection: f32,
    pub wrong_selection: f32,
}

impl Default for SelectionOnlyTable {
    fn default() -> Self {
        Self {
            correct_selection: 1.0,
            wrong_selection: -1.0,
        }
    }
}

/// Reward strategy chosen at construction time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum RewardPolicy {
    /// Penalizes repeated answers, skipping, and idle steps.
    Canonical(RewardTable),
    /// Scores selections only; everything else is free.
    SelectionOnly(SelectionOnlyTable),
}

impl Default for RewardPolicy {
    fn default() -> Self {
        RewardPolicy::Canonical(RewardTable::default())
    }
}

impl RewardPolicy {
    pub fn calculate(&self, ctx: &RewardContext) -> f32 {
        match self {
            RewardPolicy::Canonical(table) => canonical_reward(table, ctx),
            RewardPolicy::SelectionOnly(table) => match ctx.action.selected_same() {
                Some(selected) if selected == ctx.ground_truth_same => table.correct_selection,
                Some(_) => table.wrong_selection,
                None => 0.0,
            },
        }
    }
}

fn canonical_reward(table: &RewardTable, ctx: &RewardContext) -> f32 {
    match (ctx.action.selected_same(), ctx.action) {
        (Some(_), _) if ctx.answered => table.repeated_selection,
        (Some(selected), _) if selected == ctx.ground_truth_same => table.correct_selection,
        (Some(_), _) => table.wrong_selection,
        (None, Action::NextShape) if ctx.answered => table.advance_answered,
        (None, Action::NextShape) => table.skip_unanswered,
        (None, _) => table.step_cost,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EpisodeProgress {
    pub current_timestep: u64,
    pub current_problem: u32,
    pub answered: bool,
    pub last_action_was_selection: bool,
}

impl EpisodeProgress {
    pub fn reward_context(&self, action: Action, ground_truth_same: bool) -> RewardContext {
        RewardContext {
            action,
            answered: self.answered,
            last_action_was_selection: self.last_action_was_selection,
            ground_truth_same,
        }
    }

    /// Progress after `action`; `self` is left untouched.
    pub fn advanced(&self, action: Action) -> Self {
        let mut next = *self;
        next.current_timestep += 1;
        if action.is_selection() {
            next.answered = true;
        } else if action == Action::NextShape {
            next.answered = false;
            next.current_problem += 1;
        }
        next.last_action_was_selection = action.is_selection();
        next
    }
}

/// Episode caps; each is optional and `null` disables it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EpisodeLimits {
    pub max_problems: Option<u32>,
    pub max_timesteps: Option<u64>,
}

impl Default for EpisodeLimits {
    fn default() -> Self {
        Self {
            max_problems: Some(50),
            max_timesteps: None,
        }
    }
}

impl EpisodeLimits {
    pub fn terminated(&self, progress: &EpisodeProgress) -> bool {
        self.max_problems
            .is_some_and(|max| progress.current_problem >= max)
    }

    pub fn truncated(&self, progress: &EpisodeProgress) -> bool {
        self.max_timesteps
            .is_some_and(|max| progress.current_timestep >= max)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        EpisodeLimits, EpisodeProgress, RewardContext, RewardPolicy, RewardTable,
        SelectionOnlyTable,
    };
    use crate::action::Action;

    fn ctx(action: Action, answered: bool, same: bool) -> RewardContext {
        RewardContext {
            action,
            answered,
            last_action_was_selection: false,
            ground_truth_same: same,
        }
    }

    #[test]
    fn canonical_table_covers_every_row() {
        let table = RewardTable::default();
        let policy = RewardPolicy::Canonical(table);

        let cases = [
            (ctx(Action::SelectSame, true, true), table.repeated_selection),
            (ctx(Action::SelectSame, false, true), table.correct_selection),
            (ctx(Action::SelectDifferent, false, false), table.correct_selection),
            (ctx(Action::SelectDifferent, false, true), table.wrong_selection),
            (ctx(Action::NextShape, false, true), table.skip_unanswered),
            (ctx(Action::NextShape, true, true), table.advance_answered),
            (ctx(Action::ZoomIn, false, true), table.step_cost),
        ];
        for (context, expected) in cases {
            assert_eq!(policy.calculate(&context), expected, "{context:?}");
        }
    }

    #[test]
    fn default_magnitudes_keep_their_ordering() {
        let table = RewardTable::default();
        assert!(table.correct_selection > 0.0);
        assert!(table.wrong_selection.abs() > table.repeated_selection.abs());
        assert!(table.skip_unanswered < table.advance_answered);
        assert!(table.step_cost < 0.0);
    }

    #[test]
    fn selection_only_ignores_non_selections() {
        let policy = RewardPolicy::SelectionOnly(SelectionOnlyTable::default());
        assert_eq!(policy.calculate(&ctx(Action::SelectSame, true, true)), 1.0);
        assert_eq!(policy.calculate(&ctx(Action::SelectSame, false, false)), -1.0);
        assert_eq!(policy.calculate(&ctx(Action::NextShape, false, true)), 0.0);
        assert_eq!(policy.calculate(&ctx(Action::Up, false, true)), 0.0);
    }

    #[test]
    fn calculation_is_pure() {
        let policy = RewardPolicy::default();
        for action in Action::ALL {
            for answered in [false, true] {
                for same in [false, true] {
                    let context = RewardContext {
                        action,
                        answered,
                        last_action_was_selection: answered,
                        ground_truth_same: same,
                    };
                    assert_eq!(policy.calculate(&context), policy.calculate(&context));
                }
            }
        }
    }

    #[test]
    fn progress_transitions_follow_actions() {
        let start = EpisodeProgress::default();
        let selected = start.advanced(Action::SelectSame);
        assert!(selected.answered);
        assert!(selected.last_action_was_selection);
        assert_eq!(selected.current_problem, 0);

        let moved = selected.advanced(Action::Left);
        assert!(moved.answered);
        assert!(!moved.last_action_was_selection);

        let advanced = moved.advanced(Action::NextShape);
        assert!(!advanced.answered);
        assert_eq!(advanced.current_problem, 1);
        assert_eq!(advanced.current_timestep, 3);
        assert_eq!(start, EpisodeProgress::default());
    }

    #[test]
    fn limits_are_independent() {
        let progress = EpisodeProgress {
            current_timestep: 10,
            current_problem: 2,
            ..Default::default()
        };
        let problems_only = EpisodeLimits {
            max_problems: Some(2),
            max_timesteps: None,
        };
        assert!(problems_only.terminated(&progress));
        assert!(!problems_only.truncated(&progress));

        let timesteps_only = EpisodeLimits {
            max_problems: None,
            max_timesteps: Some(10),
        };
        assert!(!timesteps_only.terminated(&progress));
        assert!(timesteps_only.truncated(&progress));
    }

    #[test]
    fn policy_deserializes_by_variant() {
        let policy: RewardPolicy = serde_json::from_value(serde_json::json!({
            "variant": "canonical",
            "skip_unanswered": -2.0
        }))
        .expect("canonical policy should deserialize");
        let RewardPolicy::Canonical(table) = policy else {
            panic!("expected canonical policy");
        };
        assert_eq!(table.skip_unanswered, -2.0);
        assert_eq!(table.correct_selection, 1.0);

        let policy: RewardPolicy =
            serde_json::from_value(serde_json::json!({"variant": "selection_only"}))
                .expect("selection-only policy should deserialize");
        assert!(matches!(policy, RewardPolicy::SelectionOnly(_)));
    }
}
