//! The deterministic game world. A pure step function —
//! no networking, no roles, just the toroidal grid, snake motion, food,
//! and collision resolution. Owned exclusively by the host; followers hold
//! a read-only mirror populated from the replicated state stream (see
//! `Field::load_snapshot`).

use std::collections::{HashMap, HashSet};

use multimap::MultiMap;
use rand::Rng;

use crate::proto::{Direction, SnakeState, WireSnake};

pub type Cell = (i64, i64);

/// Events a tick can produce for a given player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Score,
    Death,
}

#[derive(Debug, Clone)]
pub struct Snake {
    pub player_id: i32,
    pub head: Cell,
    /// Ordered head-adjacent -> tip. Always non-empty.
    pub tail: Vec<Cell>,
    pub heading: Direction,
    pub pending_heading: Option<Direction>,
    pub state: SnakeState,
}

impl Snake {
    fn new(player_id: i32, head: Cell, heading: Direction, state: SnakeState) -> Self {
        let (dx, dy) = heading.vector();
        let tail = vec![(head.0 - dx, head.1 - dy)];
        Snake {
            player_id,
            head,
            tail,
            heading,
            pending_heading: None,
            state,
        }
    }

    /// Advances this snake one step, returning the cell that fell off the
    /// tail (provisionally — the caller reinstates it on a food hit).
    fn advance(&mut self) -> Cell {
        if let Some(pending) = self.pending_heading.take() {
            self.heading = pending;
        }
        let (dx, dy) = self.heading.vector();
        let new_head = (self.head.0 + dx, self.head.1 + dy);
        let popped = *self.tail.last().expect("tail is never empty");
        self.tail.pop();
        self.tail.insert(0, self.head);
        self.head = new_head;
        popped
    }

    fn grow_back(&mut self, cell: Cell) {
        self.tail.push(cell);
    }
}

pub struct Field {
    pub width: u32,
    pub height: u32,
    pub food_static: u32,
    snakes: HashMap<i32, Snake>,
    food: HashSet<(i64, i64)>,
}

/// Returned by `request_pos_for_new_snake` when no free cell could be found
/// in the allotted attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NoSpace;

impl Field {
    pub fn new(width: u32, height: u32, food_static: u32) -> Self {
        Field {
            width,
            height,
            food_static,
            snakes: HashMap::new(),
            food: HashSet::new(),
        }
    }

    fn wrap(&self, cell: Cell) -> Cell {
        (
            cell.0.rem_euclid(self.width as i64),
            cell.1.rem_euclid(self.height as i64),
        )
    }

    pub fn snakes(&self) -> impl Iterator<Item = &Snake> {
        self.snakes.values()
    }

    pub fn snake(&self, player_id: i32) -> Option<&Snake> {
        self.snakes.get(&player_id)
    }

    pub fn food(&self) -> &HashSet<(i64, i64)> {
        &self.food
    }

    pub fn snake_count(&self) -> usize {
        self.snakes.len()
    }

    fn occupied_cells(&self) -> HashSet<Cell> {
        let mut occupied: HashSet<Cell> = self.food.clone();
        for snake in self.snakes.values() {
            occupied.insert(self.wrap(snake.head));
            for cell in &snake.tail {
                occupied.insert(self.wrap(*cell));
            }
        }
        occupied
    }

    /// A length-2 snake at `(x, y)` with a random
    /// heading; the tail cell sits opposite the heading.
    pub fn spawn_snake(&mut self, x: i64, y: i64, player_id: i32) {
        const HEADINGS: [Direction; 4] = [
            Direction::Up,
            Direction::Down,
            Direction::Left,
            Direction::Right,
        ];
        let heading = HEADINGS[rand::thread_rng().gen_range(0..HEADINGS.len())];
        self.snakes.insert(
            player_id,
            Snake::new(player_id, (x, y), heading, SnakeState::Alive),
        );
    }

    /// Marks `player_id`'s snake as a zombie (keeps moving, scores nothing,
    /// cannot turn). No-op if the player has no snake.
    pub fn zombify(&mut self, player_id: i32) {
        if let Some(snake) = self.snakes.get_mut(&player_id) {
            snake.state = SnakeState::Zombie;
        }
    }

    pub fn remove_snake(&mut self, player_id: i32) {
        self.snakes.remove(&player_id);
    }

    /// Up to 30 random candidates, each
    /// requiring an empty toroidal 5x5 neighborhood. `Err(NoSpace)` if none
    /// found.
    pub fn request_pos_for_new_snake(&self) -> Result<(i64, i64), NoSpace> {
        let occupied = self.occupied_cells();
        let mut rng = rand::thread_rng();
        for _ in 0..30 {
            let x = rng.gen_range(0..self.width as i64);
            let y = rng.gen_range(0..self.height as i64);
            let mut blocked = false;
            'neighborhood: for dx in -2i64..=2 {
                for dy in -2i64..=2 {
                    if occupied.contains(&self.wrap((x + dx, y + dy))) {
                        blocked = true;
                        break 'neighborhood;
                    }
                }
            }
            if !blocked {
                return Ok((x, y));
            }
        }
        Err(NoSpace)
    }

    /// Records `pending_heading` unless `direction` is the
    /// 180-degree reversal of the current heading, in which case the input
    /// is silently dropped. Returns whether a snake for `player_id` exists
    /// at all (used by callers to decide whether to ack).
    pub fn turn(&mut self, player_id: i32, direction: Direction) -> bool {
        match self.snakes.get_mut(&player_id) {
            Some(snake) => {
                if !direction.is_opposite(snake.heading) {
                    snake.pending_heading = Some(direction);
                }
                true
            }
            None => false,
        }
    }

    /// Motion + eating, then collision resolution, then
    /// replenishment. Returns the set of per-player events produced.
    pub fn tick(&mut self) -> Vec<(i32, Event)> {
        let mut events = Vec::new();
        self.tick_motion_and_eating(&mut events);
        self.tick_collisions(&mut events);
        self.replenish_food();
        events
    }

    fn tick_motion_and_eating(&mut self, events: &mut Vec<(i32, Event)>) {
        let (width, height) = (self.width as i64, self.height as i64);
        let ids: Vec<i32> = self.snakes.keys().copied().collect();
        let mut eaten = Vec::new();
        for id in ids {
            let snake = self.snakes.get_mut(&id).expect("id came from snakes map");
            let popped = snake.advance();
            let head = snake.head;
            let head_cell = (head.0.rem_euclid(width), head.1.rem_euclid(height));
            if self.food.contains(&head_cell) {
                snake.grow_back(popped);
                eaten.push(head_cell);
                events.push((id, Event::Score));
            }
        }
        for cell in eaten {
            self.food.remove(&cell);
        }
    }

    /// Builds a head-occupancy and a body-occupancy map, then for each
    /// snake decides death and, separately, which other players' snakes it
    /// grants a SCORE to — only when the collision was into another
    /// snake's *head* cell; tail collisions and self-collision never grant
    /// score. See DESIGN.md for why this departs from the original
    /// implementation's scoring.
    fn tick_collisions(&mut self, events: &mut Vec<(i32, Event)>) {
        let mut heads_at: MultiMap<Cell, i32> = MultiMap::new();
        let mut bodies_at: MultiMap<Cell, i32> = MultiMap::new();
        for snake in self.snakes.values() {
            heads_at.insert(self.wrap(snake.head), snake.player_id);
            for cell in &snake.tail {
                bodies_at.insert(self.wrap(*cell), snake.player_id);
            }
        }

        let mut dead: Vec<i32> = Vec::new();
        for snake in self.snakes.values() {
            let head_cell = self.wrap(snake.head);
            let other_heads_here: Vec<i32> = heads_at
                .get_vec(&head_cell)
                .into_iter()
                .flatten()
                .copied()
                .filter(|&id| id != snake.player_id)
                .collect();
            let other_bodies_here = bodies_at
                .get_vec(&head_cell)
                .map(|ids| ids.iter().any(|&id| id != snake.player_id))
                .unwrap_or(false);
            let self_body_here = bodies_at
                .get_vec(&head_cell)
                .map(|ids| ids.iter().any(|&id| id == snake.player_id))
                .unwrap_or(false);

            if other_heads_here.is_empty() && !other_bodies_here && !self_body_here {
                continue;
            }

            dead.push(snake.player_id);
            events.push((snake.player_id, Event::Death));
            for killer in other_heads_here {
                events.push((killer, Event::Score));
            }
        }

        for id in dead {
            if let Some(snake) = self.snakes.remove(&id) {
                self.scatter_food_from(&snake);
            }
        }
    }

    /// Each body cell of a dying snake independently becomes food with
    /// probability 1/2; the head cell is never scattered.
    fn scatter_food_from(&mut self, snake: &Snake) {
        let mut rng = rand::thread_rng();
        for cell in &snake.tail {
            if rng.gen_bool(0.5) {
                self.food.insert(self.wrap(*cell));
            }
        }
    }

    fn replenish_food(&mut self) {
        let target = self.food_static as usize + self.snakes.len();
        if self.food.len() >= target {
            return;
        }
        let capacity = (self.width as usize) * (self.height as usize);
        let mut occupied = self.occupied_cells();
        let mut rng = rand::thread_rng();
        while self.food.len() < target && occupied.len() < capacity {
            let x = rng.gen_range(0..self.width as i64);
            let y = rng.gen_range(0..self.height as i64);
            if occupied.insert((x, y)) {
                self.food.insert((x, y));
            }
        }
    }

    /// Encodes a snake to the head-absolute/tail-delta wire points, all
    /// modulo field size.
    pub fn snake_to_wire(&self, snake: &Snake) -> WireSnake {
        let mut points = Vec::with_capacity(snake.tail.len() + 1);
        let head = self.wrap(snake.head);
        points.push((head.0 as i32, head.1 as i32));
        let mut prev = head;
        for cell in &snake.tail {
            let wrapped = self.wrap(*cell);
            let dx = wrapped.0 - prev.0;
            let dy = wrapped.1 - prev.1;
            points.push((dx as i32, dy as i32));
            prev = wrapped;
        }
        WireSnake {
            player_id: snake.player_id,
            points,
            head_direction: snake.heading,
            state: snake.state,
        }
    }

    pub fn food_to_wire(&self) -> Vec<(i32, i32)> {
        self.food.iter().map(|(x, y)| (*x as i32, *y as i32)).collect()
    }

    /// Replaces the food set and snake set wholesale from a replicated
    /// snapshot, replacing the local food set and snake set wholesale.
    /// Decodes the head-absolute/tail-delta wire encoding back into
    /// absolute cells.
    pub fn load_snapshot(&mut self, foods: &[(i32, i32)], snakes: &[WireSnake]) {
        self.food = foods.iter().map(|(x, y)| (*x as i64, *y as i64)).collect();
        self.snakes = snakes
            .iter()
            .map(|wire| (wire.player_id, snake_from_wire(wire)))
            .collect();
    }
}

fn snake_from_wire(wire: &WireSnake) -> Snake {
    let mut points = wire.points.iter();
    let head = points.next().copied().unwrap_or((0, 0));
    let mut tail = Vec::with_capacity(wire.points.len().saturating_sub(1));
    let mut prev = (head.0 as i64, head.1 as i64);
    for (dx, dy) in points {
        let cell = (prev.0 + *dx as i64, prev.1 + *dy as i64);
        tail.push(cell);
        prev = cell;
    }
    if tail.is_empty() {
        // A decoded snapshot should always carry >= 2 points; this only
        // guards against a degenerate/malicious snapshot.
        tail.push((head.0 as i64 - 1, head.1 as i64));
    }
    Snake {
        player_id: wire.player_id,
        head: (head.0 as i64, head.1 as i64),
        tail,
        heading: wire.head_direction,
        pending_heading: None,
        state: wire.state,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_field() -> Field {
        Field::new(5, 5, 1)
    }

    #[test]
    fn host_boot_produces_one_snake_and_enough_food() {
        let mut field = small_field();
        let (x, y) = field.request_pos_for_new_snake().unwrap();
        field.spawn_snake(x, y, 0);
        field.tick();
        assert_eq!(field.snake_count(), 1);
        assert!(field.food().len() >= 2);
    }

    #[test]
    fn food_eaten_grows_snake_and_scores() {
        let mut field = small_field();
        field.spawn_snake(2, 2, 0);
        field.turn(0, Direction::Up);
        let ahead = (2, 1);
        // clear any food the constructor implicitly created, then place
        // food directly ahead of the snake.
        field.food.clear();
        field.food.insert(ahead);
        let before_len = field.snake(0).unwrap().tail.len();
        let events = field.tick();
        assert!(events.contains(&(0, Event::Score)));
        assert!(!field.food().contains(&ahead));
        assert_eq!(field.snake(0).unwrap().tail.len(), before_len + 1);
    }

    #[test]
    fn steer_moves_head_west() {
        let mut field = small_field();
        field.spawn_snake(2, 2, 0);
        // Force a known heading, then turn left.
        field.snakes.get_mut(&0).unwrap().heading = Direction::Up;
        field.turn(0, Direction::Left);
        field.tick();
        let head = field.snake(0).unwrap().head;
        assert_eq!(field.wrap(head).0, 1);
    }

    #[test]
    fn opposite_turn_is_a_no_op() {
        let mut field = small_field();
        field.spawn_snake(2, 2, 0);
        field.snakes.get_mut(&0).unwrap().heading = Direction::Up;
        field.turn(0, Direction::Down);
        field.tick();
        assert_eq!(field.snake(0).unwrap().heading, Direction::Up);
    }

    #[test]
    fn head_on_head_collision_kills_both_and_awards_mutual_score() {
        let mut field = Field::new(10, 10, 0);
        field.spawn_snake(2, 2, 0);
        field.spawn_snake(4, 2, 1);
        field.snakes.get_mut(&0).unwrap().heading = Direction::Right;
        field.snakes.get_mut(&1).unwrap().heading = Direction::Left;
        // Pre-position heads one step apart so they meet this tick.
        field.snakes.get_mut(&0).unwrap().head = (3, 2);
        field.snakes.get_mut(&1).unwrap().head = (4, 2);
        field.food.clear();
        let events = field.tick();
        assert!(events.contains(&(0, Event::Death)));
        assert!(events.contains(&(1, Event::Death)));
        assert!(events.contains(&(0, Event::Score)));
        assert!(events.contains(&(1, Event::Score)));
        assert_eq!(field.snake_count(), 0);
    }

    #[test]
    fn tail_collision_kills_without_scoring_the_other_player() {
        let mut field = Field::new(10, 10, 0);
        field.spawn_snake(5, 5, 0);
        field.snakes.get_mut(&0).unwrap().heading = Direction::Up;
        field.snakes.get_mut(&0).unwrap().tail = vec![(5, 6), (5, 7)];
        field.spawn_snake(4, 6, 1);
        field.snakes.get_mut(&1).unwrap().heading = Direction::Right;
        field.snakes.get_mut(&1).unwrap().head = (4, 6);
        field.food.clear();
        let events = field.tick();
        assert!(events.contains(&(1, Event::Death)));
        assert!(!events.contains(&(0, Event::Score)));
        assert!(field.snake(0).is_some());
    }

    #[test]
    fn wire_round_trip_preserves_head_and_tail() {
        let mut field = Field::new(20, 20, 2);
        field.spawn_snake(10, 10, 0);
        field.snakes.get_mut(&0).unwrap().tail = vec![(10, 11), (10, 12), (11, 12)];
        let snake = field.snake(0).unwrap().clone();
        let wire = field.snake_to_wire(&snake);
        let decoded = snake_from_wire(&wire);
        assert_eq!(field.wrap(decoded.head), field.wrap(snake.head));
        let expected: Vec<Cell> = snake.tail.iter().map(|c| field.wrap(*c)).collect();
        let actual: Vec<Cell> = decoded.tail.iter().map(|c| field.wrap(*c)).collect();
        assert_eq!(actual, expected);
    }
}
