//! Property tests for the occupancy index and stage area checks.

use std::collections::HashMap;

use stage_core::prelude::*;
use stage_test_utils::determinism::strategies::{
    arb_footprint, arb_index_ops, arb_square, IndexOp,
};
use stage_test_utils::proptest::prelude::*;

fn apply(
    index: &mut OccupancyIndex,
    model: &mut HashMap<EntityId, Placement>,
    op: IndexOp,
) {
    match op {
        IndexOp::Register(id, anchor, footprint) => {
            let fresh = !model.contains_key(&id);
            assert_eq!(index.register(id, anchor, footprint), fresh);
            model.entry(id).or_insert(Placement { anchor, footprint });
        }
        IndexOp::Update(id, anchor, footprint) => {
            index.update(id, anchor, footprint);
            if let Some(placement) = model.get_mut(&id) {
                *placement = Placement { anchor, footprint };
            }
        }
        IndexOp::UpdateAnchor(id, anchor) => {
            index.update_anchor(id, anchor);
            if let Some(placement) = model.get_mut(&id) {
                placement.anchor = anchor;
            }
        }
        IndexOp::Unregister(id) => {
            index.unregister(id);
            model.remove(&id);
        }
    }
}

proptest! {
    #[test]
    fn prop_index_stays_consistent(ops in arb_index_ops(40)) {
        let mut index = OccupancyIndex::new();
        let mut model = HashMap::new();

        for op in ops {
            apply(&mut index, &mut model, op);
            prop_assert!(index.is_consistent(), "inconsistent after {:?}", op);
            prop_assert_eq!(index.len(), model.len());
            for (id, placement) in &model {
                prop_assert_eq!(index.placement(*id), Some(*placement));
                for cell in placement.footprint.cells(placement.anchor) {
                    prop_assert!(index.occupants(cell).contains(id));
                }
            }
        }
    }

    #[test]
    fn prop_unchanged_update_is_noop(ops in arb_index_ops(20)) {
        let mut index = OccupancyIndex::new();
        let mut model = HashMap::new();
        for op in ops {
            apply(&mut index, &mut model, op);
        }

        for (id, placement) in &model {
            let before = index.clone();
            index.update(*id, placement.anchor, placement.footprint);
            prop_assert_eq!(&before, &index);
            index.update_anchor(*id, placement.anchor);
            prop_assert_eq!(&before, &index);
        }
    }

    #[test]
    fn prop_register_then_unregister_restores(
        ops in arb_index_ops(20),
        anchor in arb_square(12, 12),
        footprint in arb_footprint(4),
    ) {
        let mut index = OccupancyIndex::new();
        let mut model = HashMap::new();
        for op in ops {
            apply(&mut index, &mut model, op);
        }

        let before = index.clone();
        let id = 1_000;
        prop_assert!(index.register(id, anchor, footprint));
        index.unregister(id);
        prop_assert_eq!(before, index);
    }

    #[test]
    fn prop_area_breaks_when_any_cell_removed(
        anchor in arb_square(8, 8),
        footprint in arb_footprint(4),
        pick in any::<usize>(),
    ) {
        let mut stage = StageData::rectangle(12, 12);
        prop_assert!(stage.check_area_intact(anchor, footprint));

        let cells: Vec<Square> = footprint.cells(anchor).collect();
        let removed = cells[pick % cells.len()];
        stage.remove_tile(removed);
        prop_assert!(!stage.check_area_intact(anchor, footprint));
    }

    #[test]
    fn prop_square_sid_round_trips(x in -500i32..500, y in -500i32..500) {
        let square = Square::new(x, y);
        prop_assert_eq!(Square::from_sid(&square.sid()), Some(square));
    }
}

#[test]
fn test_footprint_cells_cover_every_offset() {
    let cells: Vec<Square> = Footprint::new(2, 3).cells(Square::new(5, 5)).collect();
    assert_eq!(cells.len(), 6);
    for dy in 0..3 {
        for dx in 0..2 {
            assert!(cells.contains(&Square::new(5 + dx, 5 + dy)));
        }
    }
}
