//! Request-based grid path finding using A*.
//!
//! Callers build a [`PathRequest`] carrying their own walkability predicate,
//! distance metric and completion callback, and hand it to
//! [`PathFinder::request_for_path`]. The finder runs queued requests during
//! [`PathFinder::process`], which the simulation calls once per tick with a
//! [`StageView`] of the live stage. Predicates therefore see the occupancy at
//! execution time, not at request time.
//!
//! Search is deterministic: the same stage, occupancy and request always give
//! the same path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::entity_index::{EntityId, StageEntityData};
use crate::square::{Footprint, Square, NEIGHBOR_OFFSETS};
use crate::stage::StageData;

/// Identifier handed out by [`PathFinder::request_for_path`].
pub type RequestId = u64;

/// Read-only view of the live stage handed to walkability predicates.
#[derive(Debug, Clone, Copy)]
pub struct StageView<'a> {
    /// Tile set.
    pub stage: &'a StageData,
    /// Occupancy of all entity categories.
    pub entities: &'a StageEntityData,
}

/// `(view, requester, candidate_anchor, footprint) -> walkable`.
pub type WalkablePredicate = Box<dyn Fn(&StageView<'_>, EntityId, Square, Footprint) -> bool>;

/// `(a, b) -> cost`; used for both step cost and heuristic.
pub type DistanceMetric = Box<dyn Fn(Square, Square) -> i32>;

/// One-shot completion callback receiving the waypoints.
pub type PathCallback = Box<dyn FnOnce(Vec<Square>)>;

/// Lifecycle of a path request as seen by its requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PathState {
    /// Not issued yet, or queued and waiting for its turn.
    #[default]
    Wait,
    /// Being searched; the callback has not fired yet.
    Finding,
    /// Callback fired.
    Done,
}

/// Chebyshev distance metric; diagonal steps cost 1.
#[must_use]
pub fn chebyshev_distance(a: Square, b: Square) -> i32 {
    Square::distance(a, b)
}

/// Taxicab distance metric; diagonal steps cost 2.
#[must_use]
pub fn manhattan_distance(a: Square, b: Square) -> i32 {
    (b - a).mlength()
}

/// Named distance metric for configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MetricKind {
    /// [`chebyshev_distance`].
    #[default]
    Chebyshev,
    /// [`manhattan_distance`].
    Manhattan,
}

impl MetricKind {
    /// Distance between `a` and `b` under this metric.
    #[must_use]
    pub fn distance(self, a: Square, b: Square) -> i32 {
        match self {
            Self::Chebyshev => chebyshev_distance(a, b),
            Self::Manhattan => manhattan_distance(a, b),
        }
    }
}

/// Default walkability: every footprint cell has a tile, and no other pawn
/// and no facility covers any of them.
#[must_use]
pub fn stage_walkable(
    view: &StageView<'_>,
    requester: EntityId,
    anchor: Square,
    footprint: Footprint,
) -> bool {
    view.stage.check_area_intact(anchor, footprint)
        && view.entities.area_free_for(requester, anchor, footprint)
}

/// A single path query.
pub struct PathRequest {
    requester: EntityId,
    source: Square,
    destination: Square,
    footprint: Footprint,
    walkable: WalkablePredicate,
    distance: DistanceMetric,
    on_complete: PathCallback,
}

impl std::fmt::Debug for PathRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathRequest")
            .field("requester", &self.requester)
            .field("source", &self.source)
            .field("destination", &self.destination)
            .field("footprint", &self.footprint)
            .finish_non_exhaustive()
    }
}

impl PathRequest {
    /// Request using [`stage_walkable`] and [`chebyshev_distance`].
    pub fn new(
        requester: EntityId,
        source: Square,
        destination: Square,
        footprint: Footprint,
        on_complete: impl FnOnce(Vec<Square>) + 'static,
    ) -> Self {
        Self {
            requester,
            source,
            destination,
            footprint,
            walkable: Box::new(stage_walkable),
            distance: Box::new(chebyshev_distance),
            on_complete: Box::new(on_complete),
        }
    }

    /// Replace the walkability predicate.
    #[must_use]
    pub fn with_walkable(
        mut self,
        walkable: impl Fn(&StageView<'_>, EntityId, Square, Footprint) -> bool + 'static,
    ) -> Self {
        self.walkable = Box::new(walkable);
        self
    }

    /// Replace the distance metric.
    #[must_use]
    pub fn with_distance(mut self, distance: impl Fn(Square, Square) -> i32 + 'static) -> Self {
        self.distance = Box::new(distance);
        self
    }

    /// Requesting entity.
    #[must_use]
    pub fn requester(&self) -> EntityId {
        self.requester
    }

    /// Start anchor.
    #[must_use]
    pub fn source(&self) -> Square {
        self.source
    }

    /// Goal anchor.
    #[must_use]
    pub fn destination(&self) -> Square {
        self.destination
    }

    /// Requester footprint.
    #[must_use]
    pub fn footprint(&self) -> Footprint {
        self.footprint
    }

    fn is_walkable(&self, view: &StageView<'_>, anchor: Square) -> bool {
        (self.walkable)(view, self.requester, anchor, self.footprint)
    }
}

/// Path finder tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathFinderConfig {
    /// Requests resolved per [`PathFinder::process`] call (0 = all queued).
    pub requests_per_tick: usize,
    /// Nodes expanded before a search gives up with an empty path.
    pub max_expanded_nodes: usize,
    /// Allow diagonal steps past a blocked cardinal neighbour.
    pub allow_corner_cutting: bool,
}

impl Default for PathFinderConfig {
    fn default() -> Self {
        Self {
            requests_per_tick: 8,
            max_expanded_nodes: 16_384,
            allow_corner_cutting: false,
        }
    }
}

/// Queue of path requests resolved once per tick.
#[derive(Debug)]
pub struct PathFinder {
    config: PathFinderConfig,
    queue: VecDeque<(RequestId, PathRequest)>,
    finding: Option<RequestId>,
    next_id: RequestId,
}

impl Default for PathFinder {
    fn default() -> Self {
        Self::new(PathFinderConfig::default())
    }
}

impl PathFinder {
    /// Create a finder with the given tuning.
    #[must_use]
    pub fn new(config: PathFinderConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            finding: None,
            next_id: 1,
        }
    }

    /// Finder tuning.
    #[must_use]
    pub fn config(&self) -> &PathFinderConfig {
        &self.config
    }

    /// Build a request with every parameter spelled out.
    pub fn create_request(
        requester: EntityId,
        source: Square,
        destination: Square,
        footprint: Footprint,
        walkable: impl Fn(&StageView<'_>, EntityId, Square, Footprint) -> bool + 'static,
        distance: impl Fn(Square, Square) -> i32 + 'static,
        on_complete: impl FnOnce(Vec<Square>) + 'static,
    ) -> PathRequest {
        PathRequest::new(requester, source, destination, footprint, on_complete)
            .with_walkable(walkable)
            .with_distance(distance)
    }

    /// Queue a request.
    ///
    /// A still-queued request from the same requester is superseded: it is
    /// removed and its callback fires with an empty path.
    pub fn request_for_path(&mut self, request: PathRequest) -> RequestId {
        let requester = request.requester;
        let mut index = 0;
        while index < self.queue.len() {
            if self.queue[index].1.requester == requester {
                if let Some((old_id, old)) = self.queue.remove(index) {
                    tracing::debug!(requester, request = old_id, "Path request superseded");
                    (old.on_complete)(Vec::new());
                }
            } else {
                index += 1;
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        tracing::trace!(
            requester,
            request = id,
            source = %request.source,
            destination = %request.destination,
            "Path requested"
        );
        self.queue.push_back((id, request));
        id
    }

    /// Drop every queued request from `requester` without firing callbacks.
    pub fn cancel_requests_for(&mut self, requester: EntityId) -> usize {
        let before = self.queue.len();
        self.queue.retain(|(_, r)| r.requester != requester);
        before - self.queue.len()
    }

    /// State of an issued request, `None` for ids never handed out.
    #[must_use]
    pub fn state(&self, id: RequestId) -> Option<PathState> {
        if self.finding == Some(id) {
            Some(PathState::Finding)
        } else if self.queue.iter().any(|(queued, _)| *queued == id) {
            Some(PathState::Wait)
        } else if id > 0 && id < self.next_id {
            Some(PathState::Done)
        } else {
            None
        }
    }

    /// Number of queued requests.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Resolve queued requests against the live stage. Returns how many ran.
    pub fn process(&mut self, view: &StageView<'_>) -> usize {
        let budget = match self.config.requests_per_tick {
            0 => self.queue.len(),
            n => n.min(self.queue.len()),
        };

        for _ in 0..budget {
            let Some((id, request)) = self.queue.pop_front() else {
                break;
            };
            self.finding = Some(id);
            let path = find_path(view, &request, &self.config);
            tracing::debug!(
                requester = request.requester,
                request = id,
                waypoints = path.len(),
                "Path resolved"
            );
            self.finding = None;
            (request.on_complete)(path);
        }

        budget
    }
}

/// A node in the A* open set priority queue.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
struct AStarNode {
    square: Square,
    f_score: i64,
    h_score: i64,
}

impl Ord for AStarNode {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: reverse every key for min-heap behaviour.
        other
            .f_score
            .cmp(&self.f_score)
            .then_with(|| other.h_score.cmp(&self.h_score))
            .then_with(|| other.square.cmp(&self.square))
    }
}

impl PartialOrd for AStarNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Walkability lookups memoised for the duration of one search.
struct WalkCache<'r, 'v> {
    request: &'r PathRequest,
    view: &'r StageView<'v>,
    known: HashMap<Square, bool>,
}

impl WalkCache<'_, '_> {
    fn check(&mut self, anchor: Square) -> bool {
        if let Some(known) = self.known.get(&anchor) {
            return *known;
        }
        let walkable = self.request.is_walkable(self.view, anchor);
        self.known.insert(anchor, walkable);
        walkable
    }
}

/// Resolve a request synchronously.
///
/// Returns the waypoints from source to destination, both included, or an
/// empty path when the destination is not walkable, no path exists, or the
/// expansion cap is hit. The source itself is never checked: the requester
/// already stands there.
#[must_use]
pub fn find_path(
    view: &StageView<'_>,
    request: &PathRequest,
    config: &PathFinderConfig,
) -> Vec<Square> {
    let source = request.source;
    let goal = request.destination;
    let mut walk = WalkCache {
        request,
        view,
        known: HashMap::new(),
    };

    if source == goal {
        return vec![source];
    }
    if !walk.check(goal) {
        return Vec::new();
    }

    let heuristic = |square: Square| i64::from((request.distance)(square, goal).max(0));

    let mut open_set = BinaryHeap::new();
    let mut closed: HashSet<Square> = HashSet::new();
    let mut came_from: HashMap<Square, Square> = HashMap::new();
    let mut g_score: HashMap<Square, i64> = HashMap::new();

    g_score.insert(source, 0);
    let h = heuristic(source);
    open_set.push(AStarNode {
        square: source,
        f_score: h,
        h_score: h,
    });

    let mut expanded = 0usize;

    while let Some(current) = open_set.pop() {
        if current.square == goal {
            return reconstruct_path(&came_from, goal);
        }
        if !closed.insert(current.square) {
            continue;
        }

        expanded += 1;
        if expanded > config.max_expanded_nodes {
            tracing::debug!(
                requester = request.requester,
                expanded,
                "Path search hit expansion cap"
            );
            return Vec::new();
        }

        let current_g = g_score.get(&current.square).copied().unwrap_or(i64::MAX);

        for offset in NEIGHBOR_OFFSETS {
            let next = current.square + offset;
            if closed.contains(&next) || !walk.check(next) {
                continue;
            }

            let diagonal = offset.x != 0 && offset.y != 0;
            if diagonal && !config.allow_corner_cutting {
                let side_a = current.square + Square::new(offset.x, 0);
                let side_b = current.square + Square::new(0, offset.y);
                if !walk.check(side_a) || !walk.check(side_b) {
                    continue;
                }
            }

            let step = i64::from((request.distance)(current.square, next).max(0));
            let tentative_g = current_g.saturating_add(step);
            let known_g = g_score.get(&next).copied().unwrap_or(i64::MAX);

            if tentative_g < known_g {
                came_from.insert(next, current.square);
                g_score.insert(next, tentative_g);
                let h = heuristic(next);
                open_set.push(AStarNode {
                    square: next,
                    f_score: tentative_g.saturating_add(h),
                    h_score: h,
                });
            }
        }
    }

    Vec::new()
}

/// Reconstruct path from came_from map.
fn reconstruct_path(came_from: &HashMap<Square, Square>, goal: Square) -> Vec<Square> {
    let mut path = vec![goal];
    let mut current = goal;
    while let Some(&prev) = came_from.get(&current) {
        path.push(prev);
        current = prev;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::entity_index::EntityCategory;

    fn sq(x: i32, y: i32) -> Square {
        Square::new(x, y)
    }

    fn solve(stage: &StageData, entities: &StageEntityData, request: &PathRequest) -> Vec<Square> {
        let view = StageView { stage, entities };
        find_path(&view, request, &PathFinderConfig::default())
    }

    fn request(source: Square, destination: Square) -> PathRequest {
        PathRequest::new(1, source, destination, Footprint::UNIT, |_| {})
    }

    fn assert_connected(path: &[Square]) {
        for pair in path.windows(2) {
            assert_eq!(Square::distance(pair[0], pair[1]), 1, "{pair:?} not adjacent");
        }
    }

    #[test]
    fn test_straight_path_on_open_grid() {
        let stage = StageData::rectangle(10, 10);
        let path = solve(&stage, &StageEntityData::new(), &request(sq(0, 0), sq(3, 0)));

        assert_eq!(path.len(), 4);
        assert_eq!(path.first(), Some(&sq(0, 0)));
        assert_eq!(path.last(), Some(&sq(3, 0)));
        assert_connected(&path);
    }

    #[test]
    fn test_diagonal_moves_are_first_class() {
        let stage = StageData::rectangle(10, 10);
        let path = solve(&stage, &StageEntityData::new(), &request(sq(0, 0), sq(5, 5)));
        assert_eq!(path.len(), 6);
        assert_connected(&path);
    }

    #[test]
    fn test_path_to_same_cell() {
        let stage = StageData::rectangle(3, 3);
        let path = solve(&stage, &StageEntityData::new(), &request(sq(1, 1), sq(1, 1)));
        assert_eq!(path, vec![sq(1, 1)]);
    }

    #[test]
    fn test_path_around_facility_wall() {
        let stage = StageData::rectangle(10, 10);
        let mut entities = StageEntityData::new();
        entities.register(EntityCategory::Facility, 100, sq(5, 1), Footprint::new(1, 8));

        let path = solve(&stage, &entities, &request(sq(2, 5), sq(8, 5)));
        assert!(!path.is_empty());
        assert_connected(&path);
        for waypoint in &path {
            assert!(!entities.facilities.is_occupied(*waypoint), "{waypoint} is blocked");
        }
    }

    #[test]
    fn test_no_path_across_hole_row() {
        let mut stage = StageData::rectangle(10, 10);
        for y in 0..10 {
            stage.remove_tile(sq(5, y));
        }
        let path = solve(&stage, &StageEntityData::new(), &request(sq(2, 5), sq(8, 5)));
        assert!(path.is_empty());
    }

    #[test]
    fn test_blocked_goal_yields_empty_path() {
        let stage = StageData::rectangle(10, 10);
        let mut entities = StageEntityData::new();
        entities.register(EntityCategory::Pawn, 2, sq(4, 4), Footprint::UNIT);
        let path = solve(&stage, &entities, &request(sq(0, 0), sq(4, 4)));
        assert!(path.is_empty());
    }

    #[test]
    fn test_requester_does_not_block_itself() {
        let stage = StageData::rectangle(6, 1);
        let mut entities = StageEntityData::new();
        entities.register(EntityCategory::Pawn, 1, sq(0, 0), Footprint::new(2, 1));
        let path = solve(
            &stage,
            &entities,
            &PathRequest::new(1, sq(0, 0), sq(1, 0), Footprint::new(2, 1), |_| {}),
        );
        assert_eq!(path, vec![sq(0, 0), sq(1, 0)]);
    }

    #[test]
    fn test_large_footprint_needs_wide_gap() {
        // Wall at x = 4 with a one-cell gap at y = 4.
        let mut stage = StageData::rectangle(9, 9);
        for y in 0..9 {
            if y != 4 {
                stage.remove_tile(sq(4, y));
            }
        }
        let entities = StageEntityData::new();

        let unit = solve(&stage, &entities, &request(sq(1, 4), sq(7, 4)));
        assert!(!unit.is_empty());

        let wide = PathRequest::new(1, sq(1, 4), sq(6, 4), Footprint::new(2, 2), |_| {});
        assert!(solve(&stage, &entities, &wide).is_empty());

        stage.insert_tile(crate::stage::SquareTile::plain(sq(4, 5)));
        assert!(!solve(&stage, &entities, &wide).is_empty());
    }

    #[test]
    fn test_no_corner_cutting_past_blocked_cells() {
        let mut stage = StageData::rectangle(2, 2);
        stage.remove_tile(sq(1, 0));
        stage.remove_tile(sq(0, 1));
        let path = solve(&stage, &StageEntityData::new(), &request(sq(0, 0), sq(1, 1)));
        assert!(path.is_empty());

        let config = PathFinderConfig {
            allow_corner_cutting: true,
            ..Default::default()
        };
        let view = StageView {
            stage: &stage,
            entities: &StageEntityData::new(),
        };
        let cut = find_path(&view, &request(sq(0, 0), sq(1, 1)), &config);
        assert_eq!(cut, vec![sq(0, 0), sq(1, 1)]);
    }

    #[test]
    fn test_custom_metric_sets_cost() {
        let stage = StageData::rectangle(8, 8);
        let req = request(sq(0, 0), sq(3, 3)).with_distance(manhattan_distance);
        let path = solve(&stage, &StageEntityData::new(), &req);
        let cost: i32 = path.windows(2).map(|p| manhattan_distance(p[0], p[1])).sum();
        assert_eq!(cost, 6);
        assert_connected(&path);
    }

    #[test]
    fn test_expansion_cap_gives_up() {
        let stage = StageData::rectangle(50, 50);
        let config = PathFinderConfig {
            max_expanded_nodes: 3,
            ..Default::default()
        };
        let entities = StageEntityData::new();
        let view = StageView {
            stage: &stage,
            entities: &entities,
        };
        assert!(find_path(&view, &request(sq(0, 0), sq(40, 40)), &config).is_empty());
    }

    #[test]
    fn test_deterministic() {
        let stage = StageData::rectangle(20, 20);
        let mut entities = StageEntityData::new();
        entities.register(EntityCategory::Facility, 9, sq(10, 5), Footprint::new(1, 10));
        let a = solve(&stage, &entities, &request(sq(5, 10), sq(15, 10)));
        let b = solve(&stage, &entities, &request(sq(5, 10), sq(15, 10)));
        assert_eq!(a, b);
    }

    #[test]
    fn test_predicate_sees_occupancy_at_execution_time() {
        let stage = StageData::rectangle(5, 1);
        let mut entities = StageEntityData::new();
        let mut finder = PathFinder::new(PathFinderConfig::default());
        let result = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&result);

        finder.request_for_path(PathRequest::new(1, sq(0, 0), sq(4, 0), Footprint::UNIT, move |p| {
            *sink.borrow_mut() = Some(p);
        }));

        // Blocks the only corridor after the request was created.
        entities.register(EntityCategory::Pawn, 2, sq(2, 0), Footprint::UNIT);
        finder.process(&StageView {
            stage: &stage,
            entities: &entities,
        });

        assert_eq!(result.borrow().as_deref(), Some(&[][..]));
    }

    #[test]
    fn test_request_lifecycle_states() {
        let stage = StageData::rectangle(4, 4);
        let entities = StageEntityData::new();
        let mut finder = PathFinder::new(PathFinderConfig::default());
        let id = finder.request_for_path(request(sq(0, 0), sq(3, 3)));

        assert_eq!(finder.state(id), Some(PathState::Wait));
        assert_eq!(finder.state(id + 1), None);
        finder.process(&StageView {
            stage: &stage,
            entities: &entities,
        });
        assert_eq!(finder.state(id), Some(PathState::Done));
        assert_eq!(finder.pending(), 0);
    }

    #[test]
    fn test_second_request_supersedes_first() {
        let stage = StageData::rectangle(4, 4);
        let entities = StageEntityData::new();
        let mut finder = PathFinder::new(PathFinderConfig::default());
        let first = Rc::new(RefCell::new(None));
        let second = Rc::new(RefCell::new(None));
        let (a, b) = (Rc::clone(&first), Rc::clone(&second));

        finder.request_for_path(PathRequest::new(1, sq(0, 0), sq(3, 0), Footprint::UNIT, move |p| {
            *a.borrow_mut() = Some(p);
        }));
        finder.request_for_path(PathRequest::new(1, sq(0, 0), sq(0, 3), Footprint::UNIT, move |p| {
            *b.borrow_mut() = Some(p);
        }));

        assert_eq!(first.borrow().as_ref().map(Vec::len), Some(0));
        assert_eq!(finder.pending(), 1);

        finder.process(&StageView {
            stage: &stage,
            entities: &entities,
        });
        assert_eq!(second.borrow().as_ref().and_then(|p| p.last().copied()), Some(sq(0, 3)));
    }

    #[test]
    fn test_process_respects_budget_and_cancel() {
        let stage = StageData::rectangle(4, 4);
        let entities = StageEntityData::new();
        let mut finder = PathFinder::new(PathFinderConfig {
            requests_per_tick: 1,
            ..Default::default()
        });
        for requester in 1..=3 {
            finder.request_for_path(PathRequest::new(
                requester,
                sq(0, 0),
                sq(3, 3),
                Footprint::UNIT,
                |_| {},
            ));
        }
        let view = StageView {
            stage: &stage,
            entities: &entities,
        };
        assert_eq!(finder.process(&view), 1);
        assert_eq!(finder.pending(), 2);
        assert_eq!(finder.cancel_requests_for(3), 1);
        assert_eq!(finder.process(&view), 1);
        assert_eq!(finder.pending(), 0);
    }
}
