use super::*;

#[test]
fn test_initial_state() {
    let state = State::new();
    assert_eq!(state.current(), 0);
    assert!(!state.is_done());
    assert_eq!(state.legal_mask().count(), COLS);
    assert_eq!(Connect4::move_number(&state), 0);
}

#[test]
fn test_drop_piece_stacks() {
    let mut state = State::new();
    state.drop_piece(3);
    state.drop_piece(3);
    state.drop_piece(3);

    assert_eq!(state.board()[3], 1); // Red at bottom
    assert_eq!(state.board()[10], 2); // Yellow on top
    assert_eq!(state.board()[17], 1);
    assert_eq!(Connect4::move_number(&state), 3);
}

#[test]
fn test_full_column_becomes_illegal() {
    let mut state = State::new();
    for _ in 0..ROWS {
        state.drop_piece(0);
    }
    assert!(!state.legal_mask().contains(0));
    assert_eq!(state.legal_mask().count(), COLS - 1);
}

#[test]
fn test_vertical_win() {
    let mut state = State::new();
    // Red stacks column 2, Yellow follows in column 5.
    for _ in 0..3 {
        state.drop_piece(2);
        state.drop_piece(5);
    }
    let outcome = Connect4::apply(&mut state, 2);
    assert_eq!(outcome, ActionOutcome::Terminal(ValueVec::win_for(0)));
    assert!(state.legal_mask().is_empty());
}

#[test]
fn test_horizontal_win() {
    let mut state = State::new();
    for col in 0..3 {
        state.drop_piece(col); // Red on the bottom row
        state.drop_piece(col); // Yellow above
    }
    let outcome = Connect4::apply(&mut state, 3);
    assert_eq!(outcome, ActionOutcome::Terminal(ValueVec::win_for(0)));
}

#[test]
fn test_diagonal_win() {
    let mut state = State::new();
    // Builds a / diagonal for Red through (0,0), (1,1), (2,2), (3,3).
    let moves: [u8; 10] = [0, 1, 1, 2, 2, 3, 2, 3, 3, 5];
    for &col in &moves {
        state.drop_piece(col);
    }
    let outcome = Connect4::apply(&mut state, 3);
    assert_eq!(outcome, ActionOutcome::Terminal(ValueVec::win_for(0)));
}

#[test]
fn test_mirror_transform() {
    let mut state = State::new();
    state.drop_piece(0);
    state.drop_piece(2);

    let mut mirrored = state;
    Connect4::transform_state(&mut mirrored, 1);

    assert_eq!(mirrored.board()[6], 1);
    assert_eq!(mirrored.board()[4], 2);

    // Mirroring twice is the identity.
    let mut twice = mirrored;
    Connect4::transform_state(&mut twice, 1);
    assert_eq!(twice, state);
}

#[test]
fn test_policy_transform_matches_action_transform() {
    let mut policy: Vec<f32> = (0..COLS).map(|c| c as f32).collect();
    Connect4::transform_policy(&mut policy, 1);
    for col in 0..COLS as u16 {
        assert_eq!(policy[Connect4::transform_action(col, 1) as usize], col as f32);
    }
}

#[test]
fn test_key_distinguishes_players() {
    let mut a = State::new();
    a.drop_piece(0);
    a.drop_piece(1);

    let mut b = State::new();
    b.drop_piece(1);
    b.drop_piece(0);

    assert_ne!(Connect4::key(&a), Connect4::key(&b));
}

#[test]
fn test_canonical_symmetry_merges_mirrors() {
    let mut left = State::new();
    left.drop_piece(0);
    let mut right = State::new();
    right.drop_piece(6);

    let mut canon_left = left;
    Connect4::transform_state(&mut canon_left, Connect4::canonical_symmetry(&left));
    let mut canon_right = right;
    Connect4::transform_state(&mut canon_right, Connect4::canonical_symmetry(&right));

    assert_eq!(Connect4::key(&canon_left), Connect4::key(&canon_right));
}

#[test]
fn test_tensorize_layout() {
    let mut state = State::new();
    state.drop_piece(3);

    let mut input = vec![0.0; Connect4::INPUT_LEN];
    Connect4::tensorize(&state, &mut input);

    assert_eq!(input[3], 1.0); // Red plane, bottom center
    assert_eq!(input[2 * BOARD_SIZE + 1], 1.0); // Yellow to move
    assert_eq!(input.iter().filter(|&&v| v != 0.0).count(), 2);
}

#[test]
fn test_render_contains_column_labels() {
    let state = State::new();
    let s = Connect4::render(&state);
    assert!(s.contains("a b c d e f g"));
}
