use super::*;

#[test]
fn test_initial_position() {
    let state = State::new();
    assert_eq!(state.current(), 0);
    assert!(!state.is_done());
    assert_eq!(state.disc_counts(), (2, 2));

    // Black's four opening moves: d3, c4, f5, e6.
    let legal: Vec<u16> = state.legal_mask().iter().collect();
    assert_eq!(legal, vec![19, 26, 37, 44]);
}

#[test]
fn test_opening_move_flips() {
    let mut state = State::new();
    state.play(19); // d3

    let (black, white) = state.disc_counts();
    assert_eq!((black, white), (4, 1));
    assert_eq!(state.current(), 1);

    // White's standard replies to d3: c3, e3, c5.
    let legal: Vec<u16> = state.legal_mask().iter().collect();
    assert_eq!(legal, vec![18, 20, 34]);
}

#[test]
fn test_pass_only_when_no_moves() {
    let state = State::new();
    assert!(!state.legal_mask().contains(PASS));

    // A lone corner disc each: neither side can flip anything.
    let stuck = State::from_masks(1, 1 << 63, 0);
    let legal: Vec<u16> = stuck.legal_mask().iter().collect();
    assert_eq!(legal, vec![PASS]);
}

#[test]
fn test_two_passes_end_the_game() {
    let mut state = State::from_masks(0b11, 1 << 63, 0);
    assert!(!state.is_done());

    state.play(PASS);
    assert!(!state.is_done());
    state.play(PASS);
    assert!(state.is_done());

    // Seat 0 holds two discs to seat 1's one.
    assert_eq!(
        Othello::outcome(&state),
        ActionOutcome::Terminal(ValueVec::win_for(0))
    );
    assert!(state.legal_mask().is_empty());
}

#[test]
fn test_equal_split_is_a_draw() {
    let mut state = State::from_masks(1, 1 << 63, 0);
    state.play(PASS);
    state.play(PASS);
    assert_eq!(
        Othello::outcome(&state),
        ActionOutcome::Terminal(ValueVec::DRAW)
    );
}

#[test]
fn test_full_board_is_terminal() {
    // Seat 1 to move holding the majority of a full board.
    let cur = 0xffff_ffff_ffff_ff00u64;
    let opp = 0x0000_0000_0000_00ffu64;
    let state = State::from_masks(cur, opp, 1);
    assert!(state.is_done());
    assert_eq!(
        Othello::outcome(&state),
        ActionOutcome::Terminal(ValueVec::win_for(1))
    );
}

#[test]
fn test_move_number_counts_passes() {
    let mut state = State::from_masks(0b11, 1 << 63, 0);
    assert_eq!(Othello::move_number(&state), 0);
    state.play(PASS);
    assert_eq!(Othello::move_number(&state), 1);
}

#[test]
fn test_get_moves_matches_flips() {
    // Every reported move flips at least one disc; every empty non-move
    // square flips nothing.
    let cur = (1u64 << 28) | (1 << 35);
    let opp = (1u64 << 27) | (1 << 36);
    let moves = get_moves(cur, opp);
    for sq in 0..64u32 {
        let f = flips(sq, cur, opp);
        let occupied = ((cur | opp) >> sq) & 1 == 1;
        if (moves >> sq) & 1 == 1 {
            assert_ne!(f, 0, "square {sq} reported legal but flips nothing");
        } else if !occupied {
            assert_eq!(f, 0, "square {sq} flips discs but is not a move");
        }
    }
}

#[test]
fn test_symmetries_are_permutations() {
    for sym in 0..8u8 {
        let mut seen = [false; 64];
        for sq in 0..64u8 {
            let t = transform_square(sq, sym) as usize;
            assert!(!seen[t], "symmetry {sym} maps two squares to {t}");
            seen[t] = true;
        }
    }
}

#[test]
fn test_inverse_symmetry_round_trips() {
    for sym in 0..8u8 {
        let inv = inverse_sym(sym);
        for sq in 0..64u8 {
            assert_eq!(transform_square(transform_square(sq, sym), inv), sq);
        }
    }
}

#[test]
fn test_policy_transform_fixes_pass() {
    let mut policy = vec![0.0f32; Othello::NUM_ACTIONS];
    policy[19] = 0.7;
    policy[PASS as usize] = 0.3;

    for sym in 0..8u8 {
        let mut p = policy.clone();
        Othello::transform_policy(&mut p, sym);
        assert_eq!(p[PASS as usize], 0.3);
        assert_eq!(p[Othello::transform_action(19, sym) as usize], 0.7);
    }
}

#[test]
fn test_canonical_symmetry_merges_openings() {
    // The four opening moves are all images of one another; their canonical
    // forms coincide.
    let mut keys = Vec::new();
    for opening in [19u16, 26, 37, 44] {
        let mut state = State::new();
        state.play(opening);
        let mut base = Othello::base_state(&state);
        let sym = Othello::canonical_symmetry(&base);
        Othello::transform_state(&mut base, sym);
        keys.push(Othello::key(&base));
    }
    assert!(keys.windows(2).all(|w| w[0] == w[1]));
}

#[test]
fn test_tensorize_layout() {
    let state = State::new();
    let base = Othello::base_state(&state);
    let mut input = vec![0.0; Othello::INPUT_LEN];
    Othello::tensorize(&base, &mut input);

    assert_eq!(input[28], 1.0); // mover's disc on e4
    assert_eq!(input[NUM_SQUARES + 27], 1.0); // opponent's disc on d4
    assert_eq!(input[2 * NUM_SQUARES], 1.0); // seat 0 to move
    assert_eq!(input.iter().filter(|&&v| v != 0.0).count(), 5);
}

#[test]
fn test_action_to_str() {
    assert_eq!(Othello::action_to_str(0), "A1");
    assert_eq!(Othello::action_to_str(19), "D3");
    assert_eq!(Othello::action_to_str(63), "H8");
    assert_eq!(Othello::action_to_str(PASS), "PA");
}

#[test]
fn test_render_shows_discs() {
    let state = State::new();
    let s = Othello::render(&Othello::base_state(&state));
    assert!(s.contains('*'));
    assert!(s.contains('O'));
    assert_eq!(s.lines().count(), 9);
}
