use tracing::debug;

/// Outcome of seeding the navigator: the validated index, and whether the
/// requested one had to be repaired (the caller propagates the correction
/// into the canonical address).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitOutcome {
    pub index: usize,
    pub corrected: bool,
}

/// Owner of the ordered episode-URL list and the current index.
///
/// The canonical sequence is insertion order (broadcast order); the
/// `reversed` flag only changes presentation order. The navigator is the
/// sole writer of the canonical index.
#[derive(Debug, Clone, Default)]
pub struct EpisodeNavigator {
    episodes: Vec<String>,
    current: usize,
    reversed: bool,
}

impl EpisodeNavigator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the list and clamp the requested index into `[0, len)`:
    /// negative → 0, past the end → last episode, anything on an empty
    /// list → 0.
    pub fn init(&mut self, episodes: Vec<String>, requested: i64) -> InitOutcome {
        self.episodes = episodes;
        let len = self.episodes.len();
        let clamped = if len == 0 {
            0
        } else if requested < 0 {
            0
        } else if requested as usize >= len {
            len - 1
        } else {
            requested as usize
        };
        let corrected = clamped as i64 != requested;
        if corrected {
            debug!(requested, clamped, len, "Repaired out-of-range episode index");
        }
        self.current = clamped;
        InitOutcome {
            index: clamped,
            corrected,
        }
    }

    pub fn len(&self) -> usize {
        self.episodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.episodes.is_empty()
    }

    pub fn episodes(&self) -> &[String] {
        &self.episodes
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_url(&self) -> Option<&str> {
        self.episodes.get(self.current).map(String::as_str)
    }

    pub fn url_at(&self, index: usize) -> Option<&str> {
        self.episodes.get(index).map(String::as_str)
    }

    pub fn is_valid(&self, index: usize) -> bool {
        index < self.episodes.len()
    }

    pub fn has_next(&self) -> bool {
        self.current + 1 < self.episodes.len()
    }

    pub fn has_previous(&self) -> bool {
        self.current > 0 && !self.episodes.is_empty()
    }

    pub fn next_index(&self) -> Option<usize> {
        self.has_next().then(|| self.current + 1)
    }

    pub fn previous_index(&self) -> Option<usize> {
        self.has_previous().then(|| self.current - 1)
    }

    /// Move to a validated index and return the target URL. `None` means the
    /// jump was rejected and nothing changed.
    pub fn jump(&mut self, index: usize) -> Option<&str> {
        if !self.is_valid(index) {
            return None;
        }
        self.current = index;
        self.current_url()
    }

    pub fn reversed(&self) -> bool {
        self.reversed
    }

    pub fn set_reversed(&mut self, reversed: bool) {
        self.reversed = reversed;
    }

    pub fn toggle_reversed(&mut self) -> bool {
        self.reversed = !self.reversed;
        self.reversed
    }

    /// Canonical indices in presentation order.
    pub fn display_order(&self) -> Vec<usize> {
        let indices: Vec<usize> = (0..self.episodes.len()).collect();
        if self.reversed {
            indices.into_iter().rev().collect()
        } else {
            indices
        }
    }
}
