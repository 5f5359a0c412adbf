use std::net::IpAddr;

use sha2::{Digest, Sha512};
use thiserror::Error;

use crate::store::{User, UserStore};

/// Usernames longer than this are refused at registration.
pub const MAX_NAME_LEN: usize = 20;

/// Authentication failures. Each variant's `Display` text is sent to the
/// client verbatim as the `ERR` payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Only one registration per ip")]
    IpAlreadyUsed,
    #[error("Names must be no more than 20 characters")]
    NameTooLong,
    #[error("Already registered")]
    AlreadyRegistered,
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Already authed")]
    AlreadyAuthed,
}

/// Lowercase hex SHA-512 of the ASCII password. Only digests are stored.
pub fn password_digest(password: &str) -> String {
    Sha512::digest(password.as_bytes())
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

/// Handle `REG`: one account per remote IP, with loopback exempt so local
/// testing can mint as many users as it needs. Usernames are globally
/// unique and capped at [`MAX_NAME_LEN`] bytes.
pub fn register(
    store: &mut UserStore,
    ip: IpAddr,
    name: &str,
    password: &str,
) -> Result<(), AuthError> {
    if store.ip_registered(ip) && !ip.is_loopback() {
        return Err(AuthError::IpAlreadyUsed);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(AuthError::NameTooLong);
    }
    let user = User {
        username: name.to_string(),
        password_digest: password_digest(password),
        ip_address: ip.to_string(),
        scores: Vec::new(),
    };
    store.register(user).map_err(|_| AuthError::AlreadyRegistered)
}

/// Handle `ATH`: verify the stored digest. Binding the name to the session
/// is the dispatcher's move; a missing user and a wrong password are
/// indistinguishable on the wire.
pub fn auth(store: &UserStore, name: &str, password: &str) -> Result<(), AuthError> {
    let user = store.lookup(name).ok_or(AuthError::InvalidCredentials)?;
    if user.password_digest != password_digest(password) {
        return Err(AuthError::InvalidCredentials);
    }
    Ok(())
}
