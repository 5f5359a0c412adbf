use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::net::IpAddr;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One user's running record for a single game kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameScore {
    pub game: String,
    pub wins: u32,
    pub draws: u32,
    pub losses: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub password_digest: String,
    pub ip_address: String,
    pub scores: Vec<GameScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreField {
    Wins,
    Draws,
    Losses,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username already taken")]
    DuplicateUsername,
    #[error("users file: {0}")]
    Io(#[from] std::io::Error),
    #[error("users file: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("users file: {0}")]
    Encode(#[from] ron::Error),
}

/// Persistent username → user mapping.
///
/// Mutations apply to the in-memory map and raise a dirty flag; the arbiter
/// loop calls [`UserStore::persist`] after each event batch, so a finished
/// game's score updates reach the file together. A store opened with
/// [`UserStore::in_memory`] never touches the filesystem (used by tests and
/// the server's `--ephemeral` flag).
pub struct UserStore {
    path: Option<PathBuf>,
    users: BTreeMap<String, User>,
    dirty: bool,
}

impl UserStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            users: BTreeMap::new(),
            dirty: false,
        }
    }

    /// Load the users file, starting empty when it does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let users = match std::fs::read_to_string(&path) {
            Ok(text) => ron::from_str(&text)?,
            Err(err) if err.kind() == ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path: Some(path),
            users,
            dirty: false,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Atomic insert keyed by username.
    pub fn register(&mut self, user: User) -> Result<(), StoreError> {
        if self.users.contains_key(&user.username) {
            return Err(StoreError::DuplicateUsername);
        }
        self.users.insert(user.username.clone(), user);
        self.dirty = true;
        Ok(())
    }

    pub fn lookup(&self, username: &str) -> Option<&User> {
        self.users.get(username)
    }

    /// Whether any user registered from `ip`.
    pub fn ip_registered(&self, ip: IpAddr) -> bool {
        let ip = ip.to_string();
        self.users.values().any(|user| user.ip_address == ip)
    }

    /// Idempotently give each named user a zeroed record for `game`.
    pub fn ensure_score(&mut self, usernames: &[&str], game: &str) {
        for name in usernames {
            let Some(user) = self.users.get_mut(*name) else {
                continue;
            };
            if user.scores.iter().all(|score| score.game != game) {
                user.scores.push(GameScore {
                    game: game.to_string(),
                    ..GameScore::default()
                });
                self.dirty = true;
            }
        }
    }

    /// `+1` on one field of one user's record for `game`.
    pub fn increment(&mut self, username: &str, game: &str, field: ScoreField) {
        let Some(user) = self.users.get_mut(username) else {
            return;
        };
        let Some(score) = user.scores.iter_mut().find(|score| score.game == game) else {
            return;
        };
        match field {
            ScoreField::Wins => score.wins += 1,
            ScoreField::Draws => score.draws += 1,
            ScoreField::Losses => score.losses += 1,
        }
        self.dirty = true;
    }

    /// Every user holding a record for `game`, unordered.
    pub fn scoreboard(&self, game: &str) -> Vec<(String, u32, u32, u32)> {
        self.users
            .values()
            .filter_map(|user| {
                user.scores
                    .iter()
                    .find(|score| score.game == game)
                    .map(|score| (user.username.clone(), score.wins, score.draws, score.losses))
            })
            .collect()
    }

    /// `(wins, draws, losses)` for one user, zeroes when absent.
    pub fn user_score(&self, username: &str, game: &str) -> (u32, u32, u32) {
        self.users
            .get(username)
            .and_then(|user| user.scores.iter().find(|score| score.game == game))
            .map_or((0, 0, 0), |score| (score.wins, score.draws, score.losses))
    }

    pub fn dirty(&self) -> bool {
        self.dirty
    }

    /// Rewrite the users file if anything changed since the last save.
    pub fn persist(&mut self) -> Result<(), StoreError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            let text = ron::ser::to_string_pretty(&self.users, ron::ser::PrettyConfig::default())?;
            std::fs::write(path, text)?;
        }
        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(name: &str, ip: &str) -> User {
        User {
            username: name.to_string(),
            password_digest: "digest".to_string(),
            ip_address: ip.to_string(),
            scores: Vec::new(),
        }
    }

    #[test]
    fn register_rejects_duplicate_username() {
        let mut store = UserStore::in_memory();
        store.register(user("alice", "10.0.0.1")).unwrap();
        assert!(matches!(
            store.register(user("alice", "10.0.0.2")),
            Err(StoreError::DuplicateUsername)
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn ip_lookup_matches_registration_address() {
        let mut store = UserStore::in_memory();
        store.register(user("alice", "10.0.0.1")).unwrap();
        assert!(store.ip_registered("10.0.0.1".parse().unwrap()));
        assert!(!store.ip_registered("10.0.0.2".parse().unwrap()));
    }

    #[test]
    fn ensure_score_is_idempotent() {
        let mut store = UserStore::in_memory();
        store.register(user("alice", "10.0.0.1")).unwrap();
        store.ensure_score(&["alice", "ghost"], "KLH");
        store.ensure_score(&["alice"], "KLH");
        assert_eq!(store.lookup("alice").unwrap().scores.len(), 1);
        assert_eq!(store.user_score("alice", "KLH"), (0, 0, 0));
    }

    #[test]
    fn increment_touches_exactly_one_field() {
        let mut store = UserStore::in_memory();
        store.register(user("alice", "10.0.0.1")).unwrap();
        store.ensure_score(&["alice"], "KLH");
        store.increment("alice", "KLH", ScoreField::Wins);
        store.increment("alice", "KLH", ScoreField::Losses);
        store.increment("alice", "KLH", ScoreField::Wins);
        assert_eq!(store.user_score("alice", "KLH"), (2, 0, 1));
    }

    #[test]
    fn missing_records_read_as_zero() {
        let store = UserStore::in_memory();
        assert_eq!(store.user_score("nobody", "KLH"), (0, 0, 0));
        assert!(store.scoreboard("KLH").is_empty());
    }

    #[test]
    fn scoreboard_lists_only_the_requested_game() {
        let mut store = UserStore::in_memory();
        store.register(user("alice", "10.0.0.1")).unwrap();
        store.register(user("bob", "10.0.0.2")).unwrap();
        store.ensure_score(&["alice", "bob"], "KLH");
        store.ensure_score(&["alice"], "CH4");
        store.increment("bob", "KLH", ScoreField::Draws);
        let board = store.scoreboard("KLH");
        assert_eq!(board.len(), 2);
        assert!(board.contains(&("alice".to_string(), 0, 0, 0)));
        assert!(board.contains(&("bob".to_string(), 0, 1, 0)));
        assert_eq!(store.scoreboard("CH4").len(), 1);
    }

    #[test]
    fn persists_and_reloads() {
        let path = std::env::temp_dir().join(format!("kalah-arena-store-{}.ron", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let mut store = UserStore::open(path.clone()).unwrap();
        assert!(store.is_empty());
        store.register(user("alice", "10.0.0.1")).unwrap();
        store.ensure_score(&["alice"], "KLH");
        store.increment("alice", "KLH", ScoreField::Wins);
        assert!(store.dirty());
        store.persist().unwrap();
        assert!(!store.dirty());

        let reloaded = UserStore::open(path.clone()).unwrap();
        assert_eq!(reloaded.user_score("alice", "KLH"), (1, 0, 0));
        assert_eq!(reloaded.lookup("alice").unwrap().ip_address, "10.0.0.1");

        std::fs::remove_file(&path).unwrap();
    }
}
