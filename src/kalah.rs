use std::ops::Range;
use std::time::Instant;

use crate::game::{Game, MatchCore, Outbox, Seat};

const SLOTS: usize = 14;
const PITS: usize = 6;
const A_STORE: usize = 6;
const B_STORE: usize = 13;
const STARTING_SEEDS: u32 = 3;

/// Authoritative Kalah referee.
///
/// Board layout is absolute: pits 0–5 and store 6 belong to seat A, pits
/// 7–12 and store 13 to seat B. Each player speaks in their own frame
/// (their row is 0–5); seat B's frame is the absolute ring rotated by
/// half, so `(i + 7) % 14` converts in either direction. The seed total is
/// constant at 36 from the first sow to the last.
pub struct Kalah {
    core: MatchCore,
    board: [u32; SLOTS],
}

impl Kalah {
    /// Constructor handed to the pool. Seat A opens and is on the clock.
    pub fn create(core: MatchCore, now: Instant, out: &mut Outbox) -> Box<dyn Game> {
        let mut board = [STARTING_SEEDS; SLOTS];
        board[A_STORE] = 0;
        board[B_STORE] = 0;
        let mut game = Box::new(Kalah { core, board });
        game.core.prompt(Seat::A, now, out);
        game
    }

    fn store(seat: Seat) -> usize {
        match seat {
            Seat::A => A_STORE,
            Seat::B => B_STORE,
        }
    }

    fn pits(seat: Seat) -> Range<usize> {
        match seat {
            Seat::A => 0..PITS,
            Seat::B => A_STORE + 1..B_STORE,
        }
    }

    /// Frame translation, valid in both directions: seat B's indices are
    /// the absolute ones rotated by half the ring.
    fn translate(seat: Seat, index: usize) -> usize {
        match seat {
            Seat::A => index % SLOTS,
            Seat::B => (index + SLOTS / 2) % SLOTS,
        }
    }

    fn side_total(&self, seat: Seat) -> u32 {
        let pits: u32 = Self::pits(seat).map(|i| self.board[i]).sum();
        pits + self.board[Self::store(seat)]
    }

    fn side_empty(&self, seat: Seat) -> bool {
        Self::pits(seat).all(|i| self.board[i] == 0)
    }

    /// Three lines of board as `seat` sees it: opponent's row reversed on
    /// top, the stores in the middle (own store on the right), own row at
    /// the bottom.
    pub fn render_for(&self, seat: Seat) -> [String; 3] {
        let opponent = seat.other();
        let cell = |i: usize| format!("{:>2}", self.board[i]);
        let their_row: Vec<String> = Self::pits(opponent).rev().map(cell).collect();
        let own_row: Vec<String> = Self::pits(seat).map(cell).collect();
        [
            format!("   {}", their_row.join(" ")),
            format!(
                "{:>2}{:18}{:>2}",
                self.board[Self::store(opponent)],
                "",
                self.board[Self::store(seat)]
            ),
            format!("   {}", own_row.join(" ")),
        ]
    }

    fn broadcast_board(&self, out: &mut Outbox) {
        for seat in [Seat::A, Seat::B] {
            for line in self.render_for(seat) {
                out.line(self.core.id_of(seat), line);
            }
        }
    }
}

impl Game for Kalah {
    fn core(&self) -> &MatchCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut MatchCore {
        &mut self.core
    }

    fn handle(
        &mut self,
        seat: Seat,
        args: &[&str],
        now: Instant,
        out: &mut Outbox,
    ) -> Result<(), &'static str> {
        let ["MOV", pos] = args else {
            return Err("Malformed move");
        };
        if !self.core.is_prompted(seat) {
            return Err("Not your turn");
        }
        let Ok(rel) = pos.parse::<usize>() else {
            return Err("Malformed move");
        };
        let pos = Self::translate(seat, rel);
        if !Self::pits(seat).contains(&pos) {
            return Err("Move out of range");
        }
        if self.board[pos] == 0 {
            return Err("Cannot move from an empty pit");
        }

        // Sow counter-clockwise, skipping the opponent's store.
        let mut seeds = self.board[pos];
        self.board[pos] = 0;
        let skip = Self::store(seat.other());
        let mut last = pos;
        while seeds > 0 {
            last = (last + 1) % SLOTS;
            if last == skip {
                continue;
            }
            self.board[last] += 1;
            seeds -= 1;
        }

        // A lone seed landing in an own pit sweeps the opposite pit too.
        let own_store = Self::store(seat);
        if Self::pits(seat).contains(&last) && self.board[last] == 1 {
            let opposite = 2 * PITS - last;
            if self.board[opposite] > 0 {
                self.board[own_store] += self.board[opposite] + 1;
                self.board[last] = 0;
                self.board[opposite] = 0;
            }
        }

        self.broadcast_board(out);

        if self.side_empty(Seat::A) || self.side_empty(Seat::B) {
            let a = self.side_total(Seat::A);
            let b = self.side_total(Seat::B);
            let winner = match a.cmp(&b) {
                std::cmp::Ordering::Greater => Some(Seat::A),
                std::cmp::Ordering::Less => Some(Seat::B),
                std::cmp::Ordering::Equal => None,
            };
            self.core.finish(winner);
            return Ok(());
        }

        if last == own_store {
            // Landing in the own store earns another turn.
            self.core.prompt(seat, now, out);
        } else {
            let opponent = seat.other();
            out.line(
                self.core.id_of(opponent),
                format!(
                    "DAT {} MOV {}",
                    self.core.kind(),
                    Self::translate(opponent, pos)
                ),
            );
            self.core.prompt(opponent, now, out);
        }
        Ok(())
    }
}
