/// Queues of values indexed by the absolute simulation second at which they are due. Unlike a
/// priority queue, adding and popping are O(1), at the price of one (mostly empty) slot per second
/// of the simulated horizon.
///
/// Slot `t` is popped exactly once, at second `t`. Values scheduled after the end of the horizon
/// are kept aside, so that they can be reported after the run.
#[derive(Debug)]
pub struct TimeWheel<T> {
    start: u32,
    slots: Vec<Vec<T>>,
    beyond_horizon: Vec<T>,
    next_slot: u32,
    len: usize,
}

impl<T> TimeWheel<T> {
    /// Creates a wheel with one slot per second in `[start, end]`.
    pub fn new(start: u32, end: u32) -> Self {
        assert!(start <= end, "Start time {start} must not be after end time {end}");
        let mut slots = Vec::new();
        slots.resize_with((end - start) as usize + 1, Vec::new);
        TimeWheel {
            start,
            slots,
            beyond_horizon: Vec::new(),
            next_slot: start,
            len: 0,
        }
    }

    pub fn add(&mut self, value: T, time: u32) {
        assert!(
            time >= self.next_slot,
            "Can't schedule for second {time}. Slots before second {} were already visited.",
            self.next_slot
        );
        match self.slots.get_mut((time - self.start) as usize) {
            Some(slot) => {
                slot.push(value);
                self.len += 1;
            }
            None => self.beyond_horizon.push(value),
        }
    }

    /// Takes all values due at `now`, in the order they were added.
    pub fn pop(&mut self, now: u32) -> Vec<T> {
        assert_eq!(
            self.next_slot, now,
            "Slots must be visited once per second in order"
        );
        self.next_slot += 1;
        match self.slots.get_mut((now - self.start) as usize) {
            Some(slot) => {
                let values = std::mem::take(slot);
                self.len -= values.len();
                values
            }
            None => Vec::new(),
        }
    }

    /// Number of values due within the horizon.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn beyond_horizon(&self) -> &[T] {
        &self.beyond_horizon
    }

    /// Iterates over all pending values together with the second they are due.
    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        let start = self.start;
        self.slots
            .iter()
            .enumerate()
            .flat_map(move |(i, slot)| slot.iter().map(move |v| (start + i as u32, v)))
    }
}
