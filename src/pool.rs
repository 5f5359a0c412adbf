use std::collections::HashMap;
use std::time::Instant;

use rand::seq::IteratorRandom;
use thiserror::Error;

use crate::game::{Game, GameCtor, MatchCore, Outbox, Seat};
use crate::logger::Logger;
use crate::session::SessionId;
use crate::store::{ScoreField, UserStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct MatchId(u64);

/// Pool failures. As with auth, the `Display` text is the `ERR` payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Already lfg")]
    AlreadyQueued,
    #[error("Client not in game")]
    NotInGame,
    #[error("{0}")]
    Rule(&'static str),
}

/// Matchmaking and refereeing for one game kind.
///
/// Sessions move from the waiting set into a match when two are available;
/// the pair is drawn uniformly at random. Finished matches are reaped:
/// score records are updated in the store and the result lines go out,
/// after which nothing more is ever sent for that match.
pub struct GamePool {
    kind: String,
    ctor: GameCtor,
    waiting: HashMap<SessionId, String>,
    games: HashMap<MatchId, Box<dyn Game>>,
    seat_of: HashMap<SessionId, MatchId>,
    next_match: u64,
}

impl GamePool {
    pub fn new(kind: &str, ctor: GameCtor) -> Self {
        Self {
            kind: kind.to_string(),
            ctor,
            waiting: HashMap::new(),
            games: HashMap::new(),
            seat_of: HashMap::new(),
            next_match: 0,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    fn contains(&self, id: SessionId) -> bool {
        self.waiting.contains_key(&id) || self.seat_of.contains_key(&id)
    }

    /// `LFG`: join the waiting set; pairs off as soon as two are waiting.
    pub fn enqueue(
        &mut self,
        id: SessionId,
        name: &str,
        now: Instant,
        out: &mut Outbox,
    ) -> Result<(), PoolError> {
        if self.contains(id) {
            return Err(PoolError::AlreadyQueued);
        }
        self.waiting.insert(id, name.to_string());
        self.pair(now, out);
        Ok(())
    }

    fn pair(&mut self, now: Instant, out: &mut Outbox) {
        if self.waiting.len() < 2 {
            return;
        }
        let picked = self
            .waiting
            .keys()
            .copied()
            .choose_multiple(&mut rand::rng(), 2);
        let [a, b] = picked[..] else {
            return;
        };
        let (Some(a_name), Some(b_name)) = (self.waiting.remove(&a), self.waiting.remove(&b))
        else {
            return;
        };
        out.line(a, format!("SRT {} {}", self.kind, b_name));
        out.line(b, format!("SRT {} {}", self.kind, a_name));

        let core = MatchCore::new(&self.kind, (a, a_name), (b, b_name));
        let game = (self.ctor)(core, now, out);
        let id = MatchId(self.next_match);
        self.next_match += 1;
        self.seat_of.insert(a, id);
        self.seat_of.insert(b, id);
        self.games.insert(id, game);
    }

    /// Route a `DAT` payload to the sender's match. A rule violation has
    /// already forfeited the game when this returns `Err`; the caller
    /// queues the `ERR` line and then reaps.
    pub fn deliver(
        &mut self,
        id: SessionId,
        args: &[&str],
        now: Instant,
        store: &mut UserStore,
        out: &mut Outbox,
        log: &Logger,
    ) -> Result<(), PoolError> {
        let Some(match_id) = self.seat_of.get(&id).copied() else {
            return Err(PoolError::NotInGame);
        };
        let Some(game) = self.games.get_mut(&match_id) else {
            return Err(PoolError::NotInGame);
        };
        let Some(seat) = game.core().seat_of(id) else {
            return Err(PoolError::NotInGame);
        };
        match game.handle(seat, args, now, out) {
            Ok(()) => {
                self.reap(store, out, log);
                Ok(())
            }
            Err(text) => {
                game.core_mut().forfeit(seat);
                Err(PoolError::Rule(text))
            }
        }
    }

    /// Disconnect: forfeit a live match (opponent wins on the spot) and
    /// leave matchmaking silently.
    pub fn remove(
        &mut self,
        id: SessionId,
        store: &mut UserStore,
        out: &mut Outbox,
        log: &Logger,
    ) {
        if let Some(match_id) = self.seat_of.get(&id).copied() {
            if let Some(game) = self.games.get_mut(&match_id)
                && let Some(seat) = game.core().seat_of(id)
            {
                game.core_mut().forfeit(seat);
            }
            self.reap(store, out, log);
        }
        self.waiting.remove(&id);
    }

    /// Advance every match's clock, then reap.
    pub fn tick(&mut self, now: Instant, store: &mut UserStore, out: &mut Outbox, log: &Logger) {
        for game in self.games.values_mut() {
            game.tick(now);
        }
        self.reap(store, out, log);
    }

    /// Settle every finished match: record both results in the store, emit
    /// the per-game `DAT` result and the closing `FIN`, drop the match.
    pub fn reap(&mut self, store: &mut UserStore, out: &mut Outbox, log: &Logger) {
        let finished: Vec<MatchId> = self
            .games
            .iter()
            .filter(|(_, game)| game.core().finished())
            .map(|(id, _)| *id)
            .collect();

        for match_id in finished {
            let Some(game) = self.games.remove(&match_id) else {
                continue;
            };
            let core = game.core();
            log.verbose(format!(
                "[{}] {} vs {} settled",
                self.kind,
                core.name_of(Seat::A),
                core.name_of(Seat::B),
            ));

            store.ensure_score(&[core.name_of(Seat::A), core.name_of(Seat::B)], &self.kind);
            match core.winner() {
                Some(winner) => {
                    store.increment(core.name_of(winner), &self.kind, ScoreField::Wins);
                    store.increment(core.name_of(winner.other()), &self.kind, ScoreField::Losses);
                }
                None => {
                    store.increment(core.name_of(Seat::A), &self.kind, ScoreField::Draws);
                    store.increment(core.name_of(Seat::B), &self.kind, ScoreField::Draws);
                }
            }

            for seat in [Seat::A, Seat::B] {
                let token = match core.winner() {
                    None => "DRW",
                    Some(winner) if winner == seat => "WIN",
                    Some(_) => "LSE",
                };
                out.line(core.id_of(seat), format!("DAT {} {}", self.kind, token));
                out.line(core.id_of(seat), format!("FIN {} {}", self.kind, token));
            }

            self.seat_of.remove(&core.id_of(Seat::A));
            self.seat_of.remove(&core.id_of(Seat::B));
        }
    }

    /// `BRD`: the ranked table, one queued line per row, closed by the
    /// literal `BRD FIN`. An empty board is just the terminator.
    pub fn scoreboard(&self, store: &UserStore, to: SessionId, out: &mut Outbox) {
        let mut rows = store.scoreboard(&self.kind);
        rows.sort_by(|left, right| {
            (right.1, right.2, right.3, &right.0).cmp(&(left.1, left.2, left.3, &left.0))
        });
        if !rows.is_empty() {
            let name_width = rows
                .iter()
                .map(|(name, ..)| name.len())
                .max()
                .unwrap_or(0)
                .max("NAME".len());
            out.line(
                to,
                format!("{:>name_width$}  {:>3}  {:>3}  {:>3}", "NAME", "WIN", "DRW", "LSE"),
            );
            for (name, wins, draws, losses) in rows {
                out.line(
                    to,
                    format!("{name:>name_width$}  {wins:>3}  {draws:>3}  {losses:>3}"),
                );
            }
        }
        out.line(to, "BRD FIN");
    }

    /// `IFO`: the requesting user's own record.
    pub fn stats(&self, store: &UserStore, name: &str, to: SessionId, out: &mut Outbox) {
        let (wins, draws, losses) = store.user_score(name, &self.kind);
        out.line(to, format!("{wins} wins, {draws} draws, {losses} losses"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalah::Kalah;

    const S1: SessionId = SessionId(1);
    const S2: SessionId = SessionId(2);
    const S3: SessionId = SessionId(3);

    /// Minimal second `Game` impl: `END`/`DRAW` finish, anything else is a
    /// violation. Exercises the pool without Kalah's rules in the way.
    struct Scripted {
        core: MatchCore,
    }

    fn scripted(core: MatchCore, now: Instant, out: &mut Outbox) -> Box<dyn Game> {
        let mut game = Box::new(Scripted { core });
        game.core.prompt(Seat::A, now, out);
        game
    }

    impl Game for Scripted {
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
            _now: Instant,
            _out: &mut Outbox,
        ) -> Result<(), &'static str> {
            match args.first() {
                Some(&"END") => {
                    self.core.finish(Some(seat));
                    Ok(())
                }
                Some(&"DRAW") => {
                    self.core.finish(None);
                    Ok(())
                }
                _ => Err("Bad token"),
            }
        }
    }

    fn fixture(ctor: GameCtor) -> (GamePool, UserStore, Logger, Outbox, Instant) {
        let mut store = UserStore::in_memory();
        for name in ["alice", "bob"] {
            crate::auth::register(&mut store, "127.0.0.1".parse().unwrap(), name, "pw").unwrap();
        }
        (
            GamePool::new("KLH", ctor),
            store,
            Logger::new(0),
            Outbox::new(),
            Instant::now(),
        )
    }

    fn pair_up(pool: &mut GamePool, out: &mut Outbox, now: Instant) {
        pool.enqueue(S1, "alice", now, out).unwrap();
        pool.enqueue(S2, "bob", now, out).unwrap();
    }

    fn lines_to(out: &Outbox, to: SessionId) -> Vec<String> {
        out.lines()
            .iter()
            .filter(|(id, _)| *id == to)
            .map(|(_, line)| line.clone())
            .collect()
    }

    /// The session the opening `BMP` went to (seat A of the only match).
    fn mover(out: &Outbox) -> SessionId {
        out.lines()
            .iter()
            .find(|(_, line)| line.ends_with("BMP"))
            .map(|(id, _)| *id)
            .unwrap()
    }

    #[test]
    fn two_waiters_get_paired() {
        let (mut pool, _, _, mut out, now) = fixture(scripted);
        pool.enqueue(S1, "alice", now, &mut out).unwrap();
        assert!(out.lines().is_empty());
        pool.enqueue(S2, "bob", now, &mut out).unwrap();
        assert_eq!(lines_to(&out, S1).first().map(String::as_str), Some("SRT KLH bob"));
        assert_eq!(lines_to(&out, S2).first().map(String::as_str), Some("SRT KLH alice"));
        assert_eq!(out.lines().len(), 3, "two SRT lines and one opening BMP");
    }

    #[test]
    fn queueing_twice_is_rejected() {
        let (mut pool, _, _, mut out, now) = fixture(scripted);
        pool.enqueue(S1, "alice", now, &mut out).unwrap();
        assert_eq!(
            pool.enqueue(S1, "alice", now, &mut out),
            Err(PoolError::AlreadyQueued)
        );
        // Still rejected once inside a match.
        pool.enqueue(S2, "bob", now, &mut out).unwrap();
        assert_eq!(
            pool.enqueue(S2, "bob", now, &mut out),
            Err(PoolError::AlreadyQueued)
        );
    }

    #[test]
    fn dat_from_outsiders_is_rejected() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        assert_eq!(
            pool.deliver(S3, &["END"], now, &mut store, &mut out, &log),
            Err(PoolError::NotInGame)
        );
        pair_up(&mut pool, &mut out, now);
        // Waiting for a match is not being in one.
        pool.enqueue(S3, "carol", now, &mut out).unwrap();
        assert_eq!(
            pool.deliver(S3, &["END"], now, &mut store, &mut out, &log),
            Err(PoolError::NotInGame)
        );
    }

    #[test]
    fn winning_updates_both_records_and_closes_with_fin() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        pair_up(&mut pool, &mut out, now);
        let winner = mover(&out);
        let loser = if winner == S1 { S2 } else { S1 };
        let (winner_name, loser_name) = if winner == S1 {
            ("alice", "bob")
        } else {
            ("bob", "alice")
        };
        out.take();

        pool.deliver(winner, &["END"], now, &mut store, &mut out, &log)
            .unwrap();
        assert_eq!(
            lines_to(&out, winner),
            vec!["DAT KLH WIN".to_string(), "FIN KLH WIN".to_string()]
        );
        assert_eq!(
            lines_to(&out, loser),
            vec!["DAT KLH LSE".to_string(), "FIN KLH LSE".to_string()]
        );
        assert_eq!(store.user_score(winner_name, "KLH"), (1, 0, 0));
        assert_eq!(store.user_score(loser_name, "KLH"), (0, 0, 1));
        // Settled matches release their seats.
        assert!(!pool.contains(S1));
        assert!(!pool.contains(S2));
    }

    #[test]
    fn draws_credit_both_sides() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        pair_up(&mut pool, &mut out, now);
        let first = mover(&out);
        out.take();
        pool.deliver(first, &["DRAW"], now, &mut store, &mut out, &log)
            .unwrap();
        assert_eq!(store.user_score("alice", "KLH"), (0, 1, 0));
        assert_eq!(store.user_score("bob", "KLH"), (0, 1, 0));
        assert!(lines_to(&out, first).contains(&"FIN KLH DRW".to_string()));
    }

    #[test]
    fn rule_violation_forfeits_after_the_caller_reaps() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        pair_up(&mut pool, &mut out, now);
        let offender = mover(&out);
        let opponent = if offender == S1 { S2 } else { S1 };
        out.take();

        assert_eq!(
            pool.deliver(offender, &["GIBBERISH"], now, &mut store, &mut out, &log),
            Err(PoolError::Rule("Bad token"))
        );
        // The dispatcher queues the ERR, then asks for the reap.
        pool.reap(&mut store, &mut out, &log);
        assert_eq!(
            lines_to(&out, opponent),
            vec!["DAT KLH WIN".to_string(), "FIN KLH WIN".to_string()]
        );
        assert!(lines_to(&out, offender).contains(&"FIN KLH LSE".to_string()));
    }

    #[test]
    fn disconnect_forfeits_the_live_match() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        pair_up(&mut pool, &mut out, now);
        out.take();
        pool.remove(S1, &mut store, &mut out, &log);
        assert_eq!(
            lines_to(&out, S2),
            vec!["DAT KLH WIN".to_string(), "FIN KLH WIN".to_string()]
        );
        assert!(!pool.contains(S2));
        let bob = store.user_score("bob", "KLH");
        let alice = store.user_score("alice", "KLH");
        assert_eq!(bob.0 + alice.0, 1, "exactly one win recorded");
        assert_eq!(bob.2 + alice.2, 1, "exactly one loss recorded");
    }

    #[test]
    fn waiting_clients_leave_silently() {
        let (mut pool, mut store, log, mut out, now) = fixture(scripted);
        pool.enqueue(S1, "alice", now, &mut out).unwrap();
        pool.remove(S1, &mut store, &mut out, &log);
        assert!(out.lines().is_empty());
        assert!(!pool.contains(S1));
    }

    #[test]
    fn tick_fires_the_turn_timeout() {
        let (mut pool, mut store, log, mut out, now) = fixture(Kalah::create);
        pair_up(&mut pool, &mut out, now);
        let idle = mover(&out);
        let opponent = if idle == S1 { S2 } else { S1 };
        out.take();

        pool.tick(now + crate::game::TURN_TIMEOUT, &mut store, &mut out, &log);
        assert!(out.lines().is_empty(), "clock has not expired yet");

        let late = now + crate::game::TURN_TIMEOUT + std::time::Duration::from_millis(1);
        pool.tick(late, &mut store, &mut out, &log);
        assert_eq!(
            lines_to(&out, opponent),
            vec!["DAT KLH WIN".to_string(), "FIN KLH WIN".to_string()]
        );
        assert!(lines_to(&out, idle).contains(&"DAT KLH LSE".to_string()));
    }

    #[test]
    fn scoreboard_ranks_and_terminates() {
        let (pool, mut store, _log, mut out, _now) = fixture(scripted);
        crate::auth::register(&mut store, "127.0.0.1".parse().unwrap(), "carol", "pw").unwrap();
        store.ensure_score(&["alice", "bob", "carol"], "KLH");
        store.increment("bob", "KLH", ScoreField::Wins);
        store.increment("carol", "KLH", ScoreField::Draws);

        pool.scoreboard(&store, S1, &mut out);
        let lines = lines_to(&out, S1);
        assert_eq!(lines.len(), 5, "header, three rows, terminator");
        assert_eq!(lines[0].split_whitespace().collect::<Vec<_>>(), ["NAME", "WIN", "DRW", "LSE"]);
        assert_eq!(lines[1].split_whitespace().next(), Some("bob"));
        assert_eq!(lines[2].split_whitespace().next(), Some("carol"));
        assert_eq!(lines[3].split_whitespace().next(), Some("alice"));
        assert_eq!(lines[4], "BRD FIN");
    }

    #[test]
    fn empty_scoreboard_is_only_the_terminator() {
        let (pool, store, _, mut out, _) = fixture(scripted);
        pool.scoreboard(&store, S1, &mut out);
        assert_eq!(lines_to(&out, S1), vec!["BRD FIN".to_string()]);
    }

    #[test]
    fn stats_line_reports_own_record() {
        let (pool, mut store, _, mut out, _) = fixture(scripted);
        store.ensure_score(&["alice"], "KLH");
        store.increment("alice", "KLH", ScoreField::Wins);
        store.increment("alice", "KLH", ScoreField::Losses);
        pool.stats(&store, "alice", S1, &mut out);
        pool.stats(&store, "ghost", S2, &mut out);
        assert_eq!(lines_to(&out, S1), vec!["1 wins, 0 draws, 1 losses".to_string()]);
        assert_eq!(lines_to(&out, S2), vec!["0 wins, 0 draws, 0 losses".to_string()]);
    }
}
