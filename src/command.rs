use std::collections::HashMap;
use std::time::Instant;

use thiserror::Error;

use crate::auth::{self, AuthError};
use crate::game::Outbox;
use crate::logger::Logger;
use crate::pool::{GamePool, PoolError};
use crate::session::Session;
use crate::store::UserStore;

/// Everything a command can be refused for. The `Display` text of each
/// variant is what goes over the wire after `ERR `.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Wrong number of arguments for command")]
    Arity,
    #[error("Unrecognised command")]
    UnknownVerb,
    #[error("Unrecognised game type")]
    UnknownKind,
    #[error("Client not authed")]
    NotAuthed,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// The verb table: spelling, argument arity, auth requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verb {
    Reg,
    Ath,
    Lfg,
    Dat,
    Ifo,
    Brd,
}

impl Verb {
    fn parse(token: &str) -> Option<Verb> {
        match token {
            "REG" => Some(Verb::Reg),
            "ATH" => Some(Verb::Ath),
            "LFG" => Some(Verb::Lfg),
            "DAT" => Some(Verb::Dat),
            "IFO" => Some(Verb::Ifo),
            "BRD" => Some(Verb::Brd),
            _ => None,
        }
    }

    /// `(minimum argument count, exact?)`. `DAT` carries an open-ended
    /// payload after the kind; every other verb is fixed-arity.
    fn arity(self) -> (usize, bool) {
        match self {
            Verb::Reg | Verb::Ath => (2, true),
            Verb::Lfg | Verb::Ifo | Verb::Brd => (1, true),
            Verb::Dat => (1, false),
        }
    }

    fn needs_auth(self) -> bool {
        matches!(self, Verb::Lfg | Verb::Dat | Verb::Ifo)
    }
}

/// Dispatch one inbound message for `session`.
///
/// Success is silent on the wire (replies, if any, are queued by the
/// handlers themselves); failure is returned for the loop to report as a
/// single `ERR` line. No failure here closes the connection.
pub fn dispatch(
    session: &mut Session,
    pools: &mut HashMap<String, GamePool>,
    store: &mut UserStore,
    raw: &str,
    now: Instant,
    out: &mut Outbox,
    log: &Logger,
) -> Result<(), CommandError> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let Some((&verb_token, args)) = tokens.split_first() else {
        return Err(CommandError::Empty);
    };
    let Some(verb) = Verb::parse(verb_token) else {
        return Err(CommandError::UnknownVerb);
    };

    let (min, exact) = verb.arity();
    if args.len() < min || (exact && args.len() > min) {
        return Err(CommandError::Arity);
    }
    if verb.needs_auth() && session.name.is_none() {
        return Err(CommandError::NotAuthed);
    }

    match verb {
        Verb::Reg => {
            auth::register(store, session.ip, args[0], args[1])?;
            Ok(())
        }
        Verb::Ath => {
            if session.name.is_some() {
                return Err(AuthError::AlreadyAuthed.into());
            }
            auth::auth(store, args[0], args[1])?;
            session.name = Some(args[0].to_string());
            Ok(())
        }
        Verb::Lfg => {
            let pool = pools
                .get_mut(args[0])
                .ok_or(CommandError::UnknownKind)?;
            let name = session.name.clone().ok_or(CommandError::NotAuthed)?;
            pool.enqueue(session.id, &name, now, out)?;
            Ok(())
        }
        Verb::Dat => {
            let pool = pools
                .get_mut(args[0])
                .ok_or(CommandError::UnknownKind)?;
            pool.deliver(session.id, &args[1..], now, store, out, log)?;
            Ok(())
        }
        Verb::Ifo => {
            let pool = pools.get(args[0]).ok_or(CommandError::UnknownKind)?;
            let name = session.name.clone().ok_or(CommandError::NotAuthed)?;
            pool.stats(store, &name, session.id, out);
            Ok(())
        }
        Verb::Brd => {
            let pool = pools.get(args[0]).ok_or(CommandError::UnknownKind)?;
            pool.scoreboard(store, session.id, out);
            Ok(())
        }
    }
}
