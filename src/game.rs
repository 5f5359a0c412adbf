use std::time::{Duration, Instant};

use crate::session::SessionId;

/// How long the prompted seat has to move before forfeiting.
pub const TURN_TIMEOUT: Duration = Duration::from_secs(10);

/// One of the two seats in a match. Seat A always opens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seat {
    A,
    B,
}

impl Seat {
    pub fn other(self) -> Seat {
        match self {
            Seat::A => Seat::B,
            Seat::B => Seat::A,
        }
    }

    fn index(self) -> usize {
        match self {
            Seat::A => 0,
            Seat::B => 1,
        }
    }
}

/// Ordered outbound lines, addressed by session id.
///
/// Games and pools queue here instead of touching sockets; the arbiter loop
/// drains the queue at the end of every turn and writes in queue order, so
/// per-connection ordering is exactly emission order.
#[derive(Debug, Default)]
pub struct Outbox {
    lines: Vec<(SessionId, String)>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn line(&mut self, to: SessionId, line: impl Into<String>) {
        self.lines.push((to, line.into()));
    }

    pub fn take(&mut self) -> Vec<(SessionId, String)> {
        std::mem::take(&mut self.lines)
    }

    pub fn lines(&self) -> &[(SessionId, String)] {
        &self.lines
    }
}

/// The part of a match every game shares: who sits where, whose clock is
/// running, and how it ended.
///
/// While the game is live at most one seat has a running clock (the one the
/// last `BMP` went to). Both clocks stop at completion.
pub struct MatchCore {
    kind: String,
    ids: [SessionId; 2],
    names: [String; 2],
    prompted: [Option<Instant>; 2],
    finished: bool,
    winner: Option<Seat>,
}

impl MatchCore {
    pub fn new(kind: &str, a: (SessionId, String), b: (SessionId, String)) -> Self {
        Self {
            kind: kind.to_string(),
            ids: [a.0, b.0],
            names: [a.1, b.1],
            prompted: [None, None],
            finished: false,
            winner: None,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id_of(&self, seat: Seat) -> SessionId {
        self.ids[seat.index()]
    }

    pub fn name_of(&self, seat: Seat) -> &str {
        &self.names[seat.index()]
    }

    pub fn seat_of(&self, id: SessionId) -> Option<Seat> {
        if id == self.ids[0] {
            Some(Seat::A)
        } else if id == self.ids[1] {
            Some(Seat::B)
        } else {
            None
        }
    }

    pub fn finished(&self) -> bool {
        self.finished
    }

    /// `None` while live, and on a draw once finished.
    pub fn winner(&self) -> Option<Seat> {
        self.winner
    }

    pub fn is_prompted(&self, seat: Seat) -> bool {
        self.prompted[seat.index()].is_some()
    }

    /// Send `DAT <kind> BMP` to `seat` and start its clock.
    pub fn prompt(&mut self, seat: Seat, now: Instant, out: &mut Outbox) {
        out.line(self.id_of(seat), format!("DAT {} BMP", self.kind));
        self.prompted = [None, None];
        self.prompted[seat.index()] = Some(now);
    }

    /// End the game; `winner` of `None` is a draw. Stops both clocks.
    pub fn finish(&mut self, winner: Option<Seat>) {
        self.finished = true;
        self.winner = winner;
        self.prompted = [None, None];
    }

    /// `loser`'s opponent wins. No-op once finished.
    pub fn forfeit(&mut self, loser: Seat) {
        if !self.finished {
            self.finish(Some(loser.other()));
        }
    }

    /// The seat whose clock has run out. If both clocks are somehow live,
    /// the older prompt loses.
    pub fn timed_out(&self, now: Instant) -> Option<Seat> {
        let mut expired: Option<(Seat, Instant)> = None;
        for seat in [Seat::A, Seat::B] {
            if let Some(since) = self.prompted[seat.index()]
                && now.duration_since(since) > TURN_TIMEOUT
                && expired.is_none_or(|(_, oldest)| since < oldest)
            {
                expired = Some((seat, since));
            }
        }
        expired.map(|(seat, _)| seat)
    }
}

/// A refereed two-player match, driven by the pool through this interface.
pub trait Game: Send {
    fn core(&self) -> &MatchCore;
    fn core_mut(&mut self) -> &mut MatchCore;

    /// One `DAT <kind> …` payload from `seat` (tokens after the kind).
    /// An `Err` is a rule violation: the text goes back to the offender as
    /// an `ERR` line and the pool forfeits the game against them.
    fn handle(
        &mut self,
        seat: Seat,
        args: &[&str],
        now: Instant,
        out: &mut Outbox,
    ) -> Result<(), &'static str>;

    /// Advance the turn clock. The default enforces [`TURN_TIMEOUT`].
    fn tick(&mut self, now: Instant) {
        if self.core().finished() {
            return;
        }
        if let Some(loser) = self.core().timed_out(now) {
            self.core_mut().forfeit(loser);
        }
    }
}

/// Constructor a pool is parameterised by. Implementations announce the
/// opening turn (prompt plus clock) before returning.
pub type GameCtor = fn(MatchCore, Instant, &mut Outbox) -> Box<dyn Game>;
