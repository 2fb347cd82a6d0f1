//! End-to-end search scenarios over the reference games, driven through the
//! batching evaluator service with a uniform model and fixed seeds.

use std::sync::Arc;

use arbor_core::Game;
use arbor_mcts::{
    EvaluatorService, InstanceIds, SearchManager, SearchOptions, SearchParams, UniformEvaluator,
};
use games_connect4::Connect4;
use games_othello::Othello;
use games_tictactoe::TicTacToe;

fn uniform_manager<G: Game>(seed: u64) -> SearchManager<G> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let options = SearchOptions::for_testing().with_seed(seed);
    let service = EvaluatorService::<G>::new(Box::new(UniformEvaluator::new()), &options);
    let mut manager =
        SearchManager::new(options, Some(service), &InstanceIds::new()).expect("valid options");
    manager.start();
    manager
}

#[test]
fn tictactoe_uniform_search_spreads_visits() {
    let mut manager = uniform_manager::<TicTacToe>(7);
    let results = manager
        .search(&games_tictactoe::State::new(), &SearchParams::deterministic(100))
        .unwrap();

    assert_eq!(results.valid_actions.count(), 9);
    assert!((results.counts_sum() - 100.0).abs() < 1e-3);

    let counts: Vec<f32> = (0..9).map(|a| results.counts[a]).collect();
    let max = counts.iter().cloned().fold(0.0f32, f32::max);
    let min = counts.iter().cloned().fold(f32::INFINITY, f32::min);
    // Under a uniform model no action may be starved or hoarded.
    assert!(min >= 1.0, "every action visited at least once: {counts:?}");
    assert!(
        max - min <= (100.0f32 / 9.0).ceil(),
        "visit spread too wide: {counts:?}"
    );

    manager.check_tree_integrity().unwrap();
    manager.end_session();
}

#[test]
fn connect4_uniform_search_gives_center_its_share() {
    let mut manager = uniform_manager::<Connect4>(11);
    let results = manager
        .search(&games_connect4::State::new(), &SearchParams::deterministic(400))
        .unwrap();

    assert_eq!(results.valid_actions.count(), 7);
    assert!((results.counts_sum() - 400.0).abs() < 1e-3);
    // Near-uniform spread under a uniform model: the center gets close to a
    // fair share and no column drifts far from the rest.
    assert!(results.counts[3] >= 50.0, "center starved: {:?}", results.counts);
    let max = results.counts.iter().cloned().fold(0.0f32, f32::max);
    let min = results.counts.iter().cloned().fold(f32::INFINITY, f32::min);
    assert!(min > 0.0);
    assert!(max - min <= 12.0, "visit spread too wide: {:?}", results.counts);

    manager.check_tree_integrity().unwrap();
    manager.end_session();
}

#[test]
fn connect4_finds_immediate_win() {
    // Red holds a1-c1; dropping on column d wins on the spot.
    let mut state = games_connect4::State::new();
    for col in 0..3u8 {
        state.drop_piece(col); // Red
        state.drop_piece(col); // Yellow above
    }

    let mut manager = uniform_manager::<Connect4>(3);
    let results = manager
        .search(&state, &SearchParams::deterministic(200))
        .unwrap();

    // The winning column dominates the reported counts outright.
    for col in 0..7usize {
        if col != 3 {
            assert!(
                results.counts[3] > results.counts[col],
                "column d must dominate: {:?}",
                results.counts
            );
        }
    }
    assert!(results.win_rates.get(0) > 0.5);
    assert_ne!(results.provably_winning & 0b01, 0, "win should be proven");

    manager.check_tree_integrity().unwrap();
    manager.end_session();
}

#[test]
fn othello_opening_moves() {
    let mut manager = uniform_manager::<Othello>(5);
    let results = manager
        .search(&games_othello::State::new(), &SearchParams::deterministic(100))
        .unwrap();

    let legal: Vec<u16> = results.valid_actions.iter().collect();
    assert_eq!(legal, vec![19, 26, 37, 44]);

    let total: f32 = legal.iter().map(|&a| results.counts[a as usize]).sum();
    assert!((total - 100.0).abs() < 1e-3);
    for &a in &legal {
        assert!(results.counts[a as usize] > 0.0);
    }

    manager.check_tree_integrity().unwrap();
    manager.end_session();
}

#[test]
fn single_action_position_takes_all_visits() {
    // Eight plies of a known drawn line; only cell 8 remains.
    let mut state = games_tictactoe::State::new();
    for &cell in &[0u8, 1, 2, 4, 3, 5, 7, 6] {
        state.make_move(cell);
    }

    let mut manager = uniform_manager::<TicTacToe>(1);
    let results = manager
        .search(&state, &SearchParams::deterministic(10))
        .unwrap();

    assert_eq!(results.valid_actions.count(), 1);
    assert!(results.valid_actions.contains(8));
    let target = results.policy_target();
    assert!((target[8] - 1.0).abs() < 1e-6);
    assert_eq!(results.best_action(), Some(8));

    manager.end_session();
}

#[test]
fn repeated_seeded_searches_are_identical() {
    let mut manager = uniform_manager::<TicTacToe>(42);
    let state = games_tictactoe::State::new();

    let first = manager
        .search(&state, &SearchParams::deterministic(120))
        .unwrap();
    manager.clear();
    let second = manager
        .search(&state, &SearchParams::deterministic(120))
        .unwrap();
    assert_eq!(first.counts, second.counts);
    assert_eq!(first.policy_prior, second.policy_prior);
    manager.end_session();

    // A fresh manager with the same seed reproduces the run as well.
    let mut other = uniform_manager::<TicTacToe>(42);
    let third = other
        .search(&state, &SearchParams::deterministic(120))
        .unwrap();
    assert_eq!(first.counts, third.counts);
    other.end_session();
}

#[test]
fn root_advance_reuses_subtree_consistently() {
    let initial = games_connect4::State::new();
    let mut after = initial;
    after.drop_piece(3);

    // Search the opening, advance the root through the center move, then
    // search the resulting position on the reused subtree.
    let mut reusing = uniform_manager::<Connect4>(9);
    reusing
        .search(&initial, &SearchParams::deterministic(400))
        .unwrap();
    reusing.receive_state_change(0, &after, 3);
    let reused = reusing
        .search(&after, &SearchParams::deterministic(400))
        .unwrap();
    reusing.check_tree_integrity().unwrap();

    // A fresh manager searches the same position from scratch.
    let mut fresh = uniform_manager::<Connect4>(9);
    let scratch = fresh
        .search(&after, &SearchParams::deterministic(400))
        .unwrap();

    assert_eq!(reused.valid_actions, scratch.valid_actions);
    assert!((reused.counts_sum() - scratch.counts_sum()).abs() < 1e-3);
    for col in 0..7usize {
        let diff = (reused.counts[col] - scratch.counts[col]).abs();
        assert!(
            diff <= 12.0,
            "column {col} diverged: reused {} vs scratch {}",
            reused.counts[col],
            scratch.counts[col]
        );
    }

    reusing.end_session();
    fresh.end_session();
}

/// Deterministic connect-four evaluator whose policy depends only on
/// per-column content, making it exactly equivariant under the horizontal
/// mirror: `f(mirror(s))[c] == f(s)[6-c]`.
struct ColumnProfileEvaluator;

impl arbor_mcts::Evaluator for ColumnProfileEvaluator {
    fn predict(
        &self,
        batch: &arbor_mcts::InputBatch<'_>,
        num_actions: usize,
    ) -> Result<arbor_mcts::BatchOutput, arbor_mcts::EvaluatorError> {
        const CELLS: usize = 42;
        let mut values = vec![0.0f32; batch.rows * 2];
        let mut policy = vec![0.0f32; batch.rows * num_actions];
        for row in 0..batch.rows {
            let input = &batch.data[row * batch.row_len..(row + 1) * batch.row_len];
            for col in 0..7usize {
                let mut red = 0.0f32;
                let mut yellow = 0.0f32;
                for r in 0..6usize {
                    red += input[r * 7 + col];
                    yellow += input[CELLS + r * 7 + col];
                }
                policy[row * num_actions + col] = 0.37 * (red + yellow) + 0.11 * red - 0.05 * yellow;
            }
            values[row * 2] = 0.0;
            values[row * 2 + 1] = 0.0;
        }
        Ok(arbor_mcts::BatchOutput {
            values,
            policy_logits: policy,
        })
    }
}

#[test]
fn mirrored_position_searches_to_mirrored_counts() {
    let run = |moves: &[u8]| {
        let options = SearchOptions::for_testing().with_seed(19);
        let service = EvaluatorService::<Connect4>::new(Box::new(ColumnProfileEvaluator), &options);
        let mut manager =
            SearchManager::new(options, Some(service), &InstanceIds::new()).unwrap();
        manager.start();
        let mut state = games_connect4::State::new();
        for &col in moves {
            state.drop_piece(col);
        }
        let results = manager
            .search(&state, &SearchParams::deterministic(200))
            .unwrap();
        manager.end_session();
        results
    };

    let plain = run(&[2, 2, 4]);
    let mirrored = run(&[4, 4, 2]);

    for col in 0..7usize {
        let diff = (plain.counts[col] - mirrored.counts[6 - col]).abs();
        assert!(
            diff <= 3.0,
            "column {col}: {} vs mirrored {}",
            plain.counts[col],
            mirrored.counts[6 - col]
        );
    }
}

#[test]
fn all_moves_proven_lost_keeps_counts() {
    // X to move against two open O threats (cells 5 and 7): every reply is
    // a proven loss.
    let mut state = games_tictactoe::State::new();
    for &cell in &[0u8, 1, 2, 4, 6, 3] {
        state.make_move(cell);
    }

    let mut manager = uniform_manager::<TicTacToe>(13);
    let results = manager
        .search(&state, &SearchParams::deterministic(100))
        .unwrap();

    assert_ne!(
        results.provably_losing & 0b01,
        0,
        "the position must be proven lost for the mover"
    );
    // The loss filter stands down when everything is lost: the raw visit
    // counts are reported unchanged.
    assert!(results.counts_sum() > 0.0);

    manager.end_session();
}
