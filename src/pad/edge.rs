use super::{ButtonState, Direction};

/// A single press or release of one panel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub direction: Direction,
    pub pressed: bool,
}

impl Edge {
    pub fn press(direction: Direction) -> Self {
        Self { direction, pressed: true }
    }

    pub fn release(direction: Direction) -> Self {
        Self { direction, pressed: false }
    }
}

/// Tracks the last decoded state of one pad and reports what changed
#[derive(Debug, Clone, Default)]
pub struct EdgeDetector {
    previous: ButtonState,
}

impl EdgeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn previous(&self) -> ButtonState {
        self.previous
    }

    /// Presses for `next - previous`, releases for `previous - next`.
    /// Feeding the same state twice yields nothing the second time.
    pub fn update(&mut self, next: ButtonState) -> Vec<Edge> {
        let downs = next.difference(&self.previous);
        let ups = self.previous.difference(&next);
        self.previous = next;

        downs
            .iter()
            .map(Edge::press)
            .chain(ups.iter().map(Edge::release))
            .collect()
    }

    /// Releases for everything still held, used when a pad goes away
    pub fn release_all(&mut self) -> Vec<Edge> {
        if self.previous.is_empty() {
            return Vec::new();
        }
        self.update(ButtonState::EMPTY)
    }
}
