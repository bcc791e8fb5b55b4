use super::*;

use proptest::prelude::*;

fn slot_set_strategy() -> impl Strategy<Value = SlotSet> {
    prop_oneof![
        60 => prop::collection::vec(0usize..SLOTS_PER_PAGE, 0..=48)
            .prop_map(|slots| slots.into_iter().collect::<SlotSet>()),
        30 => (0usize..SLOTS_PER_PAGE, 0usize..=SLOTS_PER_PAGE)
            .prop_map(|(a, b)| SlotSet::from_range(a.min(b)..a.max(b))),
        10 => any::<[u64; 8]>().prop_map(SlotSet::from_words),
    ]
}

fn input_strategy() -> impl Strategy<Value = Vec<(u8, SlotSet)>> {
    prop::collection::vec((any::<u8>(), slot_set_strategy()), 0..=160)
}

/// Squeeze `input`, skipping repeated logical pages. Returns the mapping and
/// the requirement of every accepted logical page.
fn run(input: &[(u8, SlotSet)]) -> (SqueezedMapping, Vec<Option<SlotSet>>) {
    let mut sq = PageSqueezer::new();
    let mut accepted = vec![None; LOGICAL_PAGES];
    for (prefix, required) in input {
        let logical = (prefix >> 1) as usize;
        match sq.squeeze(*prefix, required) {
            Ok(_) => {
                assert!(accepted[logical].is_none());
                accepted[logical] = Some(*required);
            }
            Err(RewireError::DuplicateLogicalPage { page }) => {
                assert_eq!(page as usize, logical);
                assert!(accepted[logical].is_some());
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    (sq.finish(), accepted)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_pages_bounded_by_logical_pages(input in input_strategy()) {
        let (m, accepted) = run(&input);
        let distinct = accepted.iter().filter(|r| r.is_some()).count();
        prop_assert!(m.num_pages() <= distinct);
    }

    #[test]
    fn prop_mapping_targets_opened_pages(input in input_strategy()) {
        let (m, accepted) = run(&input);
        let opened: Vec<u8> = m.occupancy().iter().map(|e| e.physical).collect();
        for (logical, required) in accepted.iter().enumerate() {
            match (required, m.physical_of(logical as u8)) {
                (Some(_), Some(p)) => prop_assert!(opened.contains(&p)),
                (None, None) => {}
                (r, p) => prop_assert!(false, "logical {logical}: {r:?} -> {p:?}"),
            }
        }
        // A page is opened by, and named after, its first logical page.
        for p in &opened {
            prop_assert_eq!(m.physical_of(*p), Some(*p));
        }
    }

    #[test]
    fn prop_no_slot_double_booked(input in input_strategy()) {
        // Every placement claims exactly |required| fresh slots: either no
        // overlap, or the overlapping slots move to free neighbors.
        let (m, accepted) = run(&input);
        for entry in m.occupancy() {
            let mut claimed = 0;
            let mut union = SlotSet::new();
            for (logical, required) in accepted.iter().enumerate() {
                if let Some(required) = required {
                    if m.physical_of(logical as u8) == Some(entry.physical) {
                        claimed += required.len();
                        union |= *required;
                    }
                }
            }
            prop_assert_eq!(entry.occupancy.len(), claimed);
            prop_assert_eq!(entry.occupancy & union, union);
        }
    }

    #[test]
    fn prop_slot_mappings_cover_assigned_pages(input in input_strategy()) {
        let (m, accepted) = run(&input);
        let mappings = m.slot_mappings();
        prop_assert_eq!(mappings.len(), accepted.iter().filter(|r| r.is_some()).count());
        for s in &mappings {
            prop_assert!(s.physical_slot < m.num_pages());
            prop_assert!(accepted[s.virtual_slot].is_some());
        }
    }

    #[test]
    fn prop_rotate_moves_every_slot(set in slot_set_strategy(), n in 0usize..2048) {
        let rotated = set.rotate_left(n);
        prop_assert_eq!(rotated.len(), set.len());
        for slot in set.iter() {
            prop_assert!(rotated.contains((slot + n) % SLOTS_PER_PAGE));
        }
    }

    #[test]
    fn prop_rotate_composes(set in slot_set_strategy(), a in 0usize..600, b in 0usize..600) {
        prop_assert_eq!(set.rotate_left(a).rotate_left(b), set.rotate_left(a + b));
        prop_assert_eq!(set.rotate_left(SLOTS_PER_PAGE), set);
    }
}
