use std::ops::Range;

/// Zero-based day of the year. The only time type inside the engine.
pub type Day = u16;

/// Numeric user id supplied by `login`. Zero is reserved for "nobody".
pub type UserId = u32;

/// Row-major index of an umbrella in the grid.
pub type ResourceId = usize;

/// Closed interval `[start, end]` of days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: Day,
    pub end: Day,
}

impl Span {
    pub fn new(start: Day, end: Day) -> Self {
        Self { start, end }
    }

    pub fn single(day: Day) -> Self {
        Self { start: day, end: day }
    }

    pub fn is_ordered(&self) -> bool {
        self.start <= self.end
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// A committed booking on one umbrella.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub owner: UserId,
    pub span: Span,
}

/// Outstanding provisional claim taken by the first phase of a reserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Claim {
    pub holder: UserId,
    pub day: Day,
}

/// Season parameters, immutable after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Season {
    pub rows: u32,
    pub cols: u32,
    pub year: i32,
    pub start: Day,
    pub end: Day,
}

impl Season {
    pub fn resource_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    /// Resource ids of one grid row, or `None` if the row does not exist.
    pub fn row(&self, row: u32) -> Option<Range<ResourceId>> {
        if row >= self.rows {
            return None;
        }
        let cols = self.cols as usize;
        let first = row as usize * cols;
        Some(first..first + cols)
    }

    pub fn all(&self) -> Range<ResourceId> {
        0..self.resource_count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceState {
    /// Sorted by `span.start`; consecutive entries satisfy `a.end < b.start`.
    pub reservations: Vec<Reservation>,
    pub claim: Option<Claim>,
}

impl ResourceState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Position at which `span` would be inserted, or `None` if it overlaps.
    ///
    /// Finds the first reservation ending on or after `span.start`; the span
    /// fits only if that reservation also starts after `span.end`. Ends are
    /// sorted along with starts because the sequence is non-overlapping.
    pub fn slot_for(&self, span: &Span) -> Option<usize> {
        let pos = self
            .reservations
            .partition_point(|r| r.span.end < span.start);
        match self.reservations.get(pos) {
            Some(next) if next.span.start <= span.end => None,
            _ => Some(pos),
        }
    }

    pub fn overlaps(&self, span: &Span) -> bool {
        self.slot_for(span).is_none()
    }

    /// Insert a reservation at its sorted position. A committed booking
    /// supersedes any pending claim, so the claim is cleared on success.
    pub fn insert(&mut self, owner: UserId, span: Span) -> Result<(), Span> {
        let pos = self.slot_for(&span).ok_or(span)?;
        if self.reservations.len() == self.reservations.capacity() {
            // double, minimum +1
            self.reservations.reserve_exact(self.reservations.capacity() + 1);
        }
        self.reservations.insert(pos, Reservation { owner, span });
        self.claim = None;
        Ok(())
    }

    /// Drop every reservation held by `owner`. Returns how many were removed.
    pub fn remove_by_owner(&mut self, owner: UserId) -> usize {
        let before = self.reservations.len();
        self.reservations.retain(|r| r.owner != owner);
        before - self.reservations.len()
    }

    /// Take the provisional claim for `user`. Granted when nobody holds it,
    /// when `user` already holds it, or when the holder took it on an
    /// earlier day.
    pub fn try_claim(&mut self, user: UserId, today: Day) -> bool {
        let granted = match self.claim {
            None => true,
            Some(c) => c.holder == user || c.day < today,
        };
        if granted {
            self.claim = Some(Claim { holder: user, day: today });
        }
        granted
    }

    pub fn release_claim(&mut self) {
        self.claim = None;
    }

    /// Checks the ordering invariant; used when loading untrusted state.
    pub fn is_well_formed(&self) -> bool {
        self.reservations.iter().all(|r| r.span.is_ordered())
            && self
                .reservations
                .windows(2)
                .all(|w| w[0].span.end < w[1].span.start)
    }
}
