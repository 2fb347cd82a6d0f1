//! Aggregated search results and their text rendering.

use arbor_core::{ActionMask, Game, ValueVec};

/// Everything a caller needs from one completed search.
#[derive(Debug, Clone)]
pub struct SearchResults {
    /// Legal actions at the root (empty for a terminal root).
    pub valid_actions: ActionMask,

    /// Per-action visit weight, indexed by global action id. Usually raw
    /// edge visit counts; proven outcomes and target pruning reshape them.
    pub counts: Vec<f32>,

    /// The root's policy prior, scattered to global action ids.
    pub policy_prior: Vec<f32>,

    /// The root's aggregated value (win probability per player).
    pub win_rates: ValueVec,

    /// The root's raw network value before any search.
    pub value_prior: ValueVec,

    /// Per-seat proven bits at the root.
    pub provably_winning: u8,
    pub provably_losing: u8,
}

impl SearchResults {
    pub fn counts_sum(&self) -> f32 {
        self.counts.iter().sum()
    }

    /// Visit counts normalized into a policy target; uniform over valid
    /// actions when the counts are degenerate.
    pub fn policy_target(&self) -> Vec<f32> {
        let sum = self.counts_sum();
        if sum > 0.0 && sum.is_finite() {
            return self.counts.iter().map(|&c| c / sum).collect();
        }
        let mut target = vec![0.0; self.counts.len()];
        let n = self.valid_actions.count();
        if n > 0 {
            let u = 1.0 / n as f32;
            for action in self.valid_actions.iter() {
                target[action as usize] = u;
            }
        }
        target
    }

    /// Highest-count action; exact ties break toward the lowest action id.
    pub fn best_action(&self) -> Option<u16> {
        let mut best: Option<(u16, f32)> = None;
        for action in self.valid_actions.iter() {
            let count = self.counts[action as usize];
            match best {
                Some((_, best_count)) if count <= best_count => {}
                _ => best = Some((action, count)),
            }
        }
        best.map(|(action, _)| action)
    }

    /// Text table of the search outcome: win-rate header plus one row per
    /// valid action (network prior, visit count, normalized posterior),
    /// highest counts first.
    pub fn render<G: Game>(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "P0: {:6.3}% -> {:6.3}%\n",
            100.0 * self.value_prior.get(0),
            100.0 * self.win_rates.get(0)
        ));
        out.push_str(&format!(
            "P1: {:6.3}% -> {:6.3}%\n\n",
            100.0 * self.value_prior.get(1),
            100.0 * self.win_rates.get(1)
        ));

        let target = self.policy_target();
        let mut rows: Vec<(u16, f32, f32, f32)> = self
            .valid_actions
            .iter()
            .map(|a| {
                (
                    a,
                    self.policy_prior[a as usize],
                    self.counts[a as usize],
                    target[a as usize],
                )
            })
            .collect();
        rows.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        out.push_str(&format!(
            "{:>6} {:>8} {:>8} {:>8}\n",
            "Move", "Net", "Count", "MCTS"
        ));
        for (action, net, count, posterior) in rows {
            out.push_str(&format!(
                "{:>6} {:>8.3} {:>8.1} {:>8.3}\n",
                G::action_to_str(action),
                net,
                count,
                posterior
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use games_connect4::Connect4;

    fn sample() -> SearchResults {
        let valid: ActionMask = (0..7u16).collect();
        let mut counts = vec![0.0; 7];
        counts[3] = 60.0;
        counts[2] = 25.0;
        counts[4] = 15.0;
        SearchResults {
            valid_actions: valid,
            counts,
            policy_prior: vec![1.0 / 7.0; 7],
            win_rates: ValueVec::new([0.6, 0.4]),
            value_prior: ValueVec::DRAW,
            provably_winning: 0,
            provably_losing: 0,
        }
    }

    #[test]
    fn test_policy_target_normalizes() {
        let results = sample();
        let target = results.policy_target();
        assert!((target.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        assert!((target[3] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_policy_target_degenerate_counts() {
        let mut results = sample();
        results.counts = vec![0.0; 7];
        let target = results.policy_target();
        assert!((target[0] - 1.0 / 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_best_action() {
        assert_eq!(sample().best_action(), Some(3));
    }

    #[test]
    fn test_best_action_tie_breaks_low() {
        let mut results = sample();
        results.counts = vec![5.0; 7];
        assert_eq!(results.best_action(), Some(0));
    }

    #[test]
    fn test_render_lists_moves_by_count() {
        let results = sample();
        let text = results.render::<Connect4>();
        assert!(text.contains("Move"));
        let d_pos = text.find("     d").unwrap_or(usize::MAX);
        let c_pos = text.find("     c").unwrap_or(0);
        assert!(d_pos < c_pos, "column d should be listed before column c");
    }
}
