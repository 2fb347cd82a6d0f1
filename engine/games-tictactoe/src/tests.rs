use super::*;

#[test]
fn test_initial_state() {
    let state = State::new();
    assert_eq!(*state.board(), [0; 9]);
    assert_eq!(state.current(), 0);
    assert!(!state.is_done());
    assert_eq!(state.legal_mask().count(), 9);
}

#[test]
fn test_make_move_alternates_seats() {
    let mut state = State::new();
    state.make_move(4);
    assert_eq!(state.board()[4], 1);
    assert_eq!(state.current(), 1);

    state.make_move(0);
    assert_eq!(state.board()[0], 2);
    assert_eq!(state.current(), 0);
    assert_eq!(state.legal_mask().count(), 7);
}

#[test]
fn test_winning_game() {
    let mut state = State::new();

    // X takes the top row.
    for &cell in &[0u8, 3, 1, 4, 2] {
        state.make_move(cell);
    }

    assert!(state.is_done());
    assert_eq!(
        TicTacToe::outcome(&state),
        ActionOutcome::Terminal(ValueVec::win_for(0))
    );
    assert!(state.legal_mask().is_empty());
}

#[test]
fn test_draw() {
    let mut state = State::new();
    // X O X / X O O / O X X
    for &cell in &[0u8, 1, 2, 4, 3, 5, 7, 6, 8] {
        state.make_move(cell);
    }

    assert!(state.is_done());
    assert_eq!(
        TicTacToe::outcome(&state),
        ActionOutcome::Terminal(ValueVec::DRAW)
    );
}

#[test]
fn test_apply_reports_outcome() {
    let mut state = State::new();
    assert_eq!(TicTacToe::apply(&mut state, 0), ActionOutcome::Continue);
    assert_eq!(TicTacToe::apply(&mut state, 3), ActionOutcome::Continue);
    assert_eq!(TicTacToe::apply(&mut state, 1), ActionOutcome::Continue);
    assert_eq!(TicTacToe::apply(&mut state, 4), ActionOutcome::Continue);
    assert_eq!(
        TicTacToe::apply(&mut state, 2),
        ActionOutcome::Terminal(ValueVec::win_for(0))
    );
}

#[test]
fn test_move_number() {
    let mut state = State::new();
    assert_eq!(TicTacToe::move_number(&state), 0);
    state.make_move(4);
    state.make_move(0);
    assert_eq!(TicTacToe::move_number(&state), 2);
}

#[test]
fn test_transform_cell_identity() {
    for cell in 0..9 {
        assert_eq!(transform_cell(cell, 0), cell);
    }
}

#[test]
fn test_transform_cell_rotation() {
    // One clockwise quarter turn: top-left corner goes to top-right.
    assert_eq!(transform_cell(0, 1), 2);
    assert_eq!(transform_cell(2, 1), 8);
    assert_eq!(transform_cell(8, 1), 6);
    assert_eq!(transform_cell(6, 1), 0);
    // Center is fixed by every symmetry.
    for sym in 0..8 {
        assert_eq!(transform_cell(4, sym), 4);
    }
}

#[test]
fn test_symmetries_are_permutations() {
    for sym in 0..8u8 {
        let mut seen = [false; 9];
        for cell in 0..9u8 {
            let t = transform_cell(cell, sym) as usize;
            assert!(!seen[t], "symmetry {sym} maps two cells to {t}");
            seen[t] = true;
        }
    }
}

#[test]
fn test_inverse_symmetry_round_trips() {
    for sym in 0..8u8 {
        let inv = inverse_sym(sym);
        for cell in 0..9u8 {
            assert_eq!(
                transform_cell(transform_cell(cell, sym), inv),
                cell,
                "sym {sym} inverse {inv} cell {cell}"
            );
        }
    }
}

#[test]
fn test_state_policy_transform_consistency() {
    // Reading a policy off a transformed state must match transforming the
    // policy read off the original state.
    let mut state = State::new();
    state.make_move(0);
    state.make_move(4);
    state.make_move(2);

    for sym in 0..8u8 {
        let mut transformed = state;
        TicTacToe::transform_state(&mut transformed, sym);

        let mut policy: Vec<f32> = (0..9).map(|i| i as f32 * 0.1).collect();
        TicTacToe::transform_policy(&mut policy, sym);

        for cell in 0..9u8 {
            let t = transform_cell(cell, sym);
            assert_eq!(state.board()[cell as usize], transformed.board()[t as usize]);
            assert_eq!(policy[t as usize], cell as f32 * 0.1);
        }
    }
}

#[test]
fn test_key_distinguishes_players() {
    let mut a = State::new();
    a.make_move(0);
    a.make_move(1);

    let mut b = State::new();
    b.make_move(1);
    b.make_move(0);

    assert_ne!(TicTacToe::key(&a), TicTacToe::key(&b));
}

#[test]
fn test_canonical_symmetry_merges_rotations() {
    // A corner opening; all four corner openings share a canonical form.
    let mut keys = Vec::new();
    for corner in [0u8, 2, 6, 8] {
        let mut state = State::new();
        state.make_move(corner);
        let sym = TicTacToe::canonical_symmetry(&state);
        let mut canonical = state;
        TicTacToe::transform_state(&mut canonical, sym);
        keys.push(TicTacToe::key(&canonical));
    }
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_tensorize_layout() {
    let mut state = State::new();
    state.make_move(4); // X center
    state.make_move(0); // O corner

    let mut input = vec![0.0; TicTacToe::INPUT_LEN];
    TicTacToe::tensorize(&state, &mut input);

    assert_eq!(input[4], 1.0); // X plane
    assert_eq!(input[9], 1.0); // O plane
    assert_eq!(input[18], 1.0); // X to move again
    assert_eq!(input.iter().filter(|&&v| v != 0.0).count(), 3);
}

#[test]
fn test_action_to_str() {
    assert_eq!(TicTacToe::action_to_str(0), "a1");
    assert_eq!(TicTacToe::action_to_str(4), "b2");
    assert_eq!(TicTacToe::action_to_str(8), "c3");
}

#[test]
fn test_render() {
    let mut state = State::new();
    state.make_move(4);
    let s = TicTacToe::render(&state);
    assert!(s.contains('X'));
    assert_eq!(s.lines().count(), 3);
}
