//! Accounts, passwords and sessions.

use crate::db::{Connection, Credentials, Db, SessionRecord};
use crate::error::{ensure_valid, Error, Result};
use crate::schema::{Address, AddressInput, Id, Role, User};
use async_std::task::spawn_blocking;
use base64::prelude::*;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use uuid::Uuid;

/// Number of hash rounds used to stretch passwords.
const HASH_ROUNDS: usize = 10_000;
const MIN_PASSWORD_LEN: usize = 8;

/// Session options.
#[derive(Clone, Debug, Args)]
pub struct Options {
    /// How long a login session stays valid.
    #[clap(long, env = "GROCER_SESSION_TTL_HOURS", default_value = "72")]
    pub session_ttl_hours: i64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            session_ttl_hours: 72,
        }
    }
}

/// Details supplied when creating an account.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Registration {
    pub name: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// A logged-in session, returned to the client on login.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Session {
    /// Bearer token identifying the session.
    pub token: String,
    pub user: User,
    pub expires_at: DateTime<Utc>,
}

/// Editable profile fields. Absent fields are left unchanged.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub phone: Option<String>,
}

/// Create a customer account.
pub async fn register(conn: &Connection, reg: Registration) -> Result<User> {
    let (user, password) = new_user(reg, Role::Customer)?;
    let credentials = hash_new_password(password).await;
    conn.write(move |db| {
        if db.user_by_email(&user.email).is_some() {
            return Err(Error::conflict(format!(
                "an account with email {} already exists",
                user.email
            )));
        }
        db.credentials.insert(user.id, credentials);
        db.users.insert(user.id, user.clone());
        tracing::info!("registered user {} ({})", user.id, user.email);
        Ok(user)
    })
    .await
}

/// Create an administrator, or promote an existing account to administrator.
///
/// If an account with `email` already exists, its password is reset to `password`. This is
/// idempotent, so it is safe to run every time the server starts.
pub async fn ensure_admin(
    conn: &Connection,
    name: &str,
    email: &str,
    password: &str,
) -> Result<User> {
    let (user, password) = new_user(
        Registration {
            name: name.into(),
            email: email.into(),
            password: password.into(),
            phone: None,
        },
        Role::Admin,
    )?;
    let credentials = hash_new_password(password).await;
    conn.write(move |db| {
        let id = match db.user_by_email(&user.email).map(|existing| existing.id) {
            Some(id) => id,
            None => {
                db.users.insert(user.id, user.clone());
                user.id
            }
        };
        db.credentials.insert(id, credentials);
        let admin = db
            .users
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("user", id))?;
        admin.role = Role::Admin;
        admin.blocked = false;
        tracing::info!("ensured administrator {}", admin.email);
        Ok(admin.clone())
    })
    .await
}

/// Start a session for the user with the given email and password.
///
/// The password is checked without holding the store lock; the session is only created if
/// the account is unchanged by the time the check finishes.
pub async fn login(
    conn: &Connection,
    opt: &Options,
    email: &str,
    password: &str,
) -> Result<Session> {
    let email = email.trim().to_lowercase();
    let ttl = Duration::hours(opt.session_ttl_hours);
    let bad_credentials = || Error::unauthenticated("invalid email or password");

    let (user, credentials) = conn
        .read(|db| {
            let user = db.user_by_email(&email)?;
            let credentials = db.credentials.get(&user.id)?;
            Some((user.id, credentials.clone()))
        })
        .await
        .ok_or_else(bad_credentials)?;
    if !verify_password(credentials.clone(), password.to_string()).await {
        tracing::warn!("failed login for {email}");
        return Err(bad_credentials());
    }

    conn.write(move |db| {
        let now = Utc::now();
        db.sessions.retain(|_, session| session.expires_at > now);

        if db.credentials.get(&user) != Some(&credentials) {
            return Err(bad_credentials());
        }
        let user = db.users.get(&user).cloned().ok_or_else(bad_credentials)?;
        if user.blocked {
            return Err(Error::forbidden("this account has been blocked"));
        }

        let token = BASE64_URL_SAFE_NO_PAD.encode(rand::random::<[u8; 32]>());
        let expires_at = now + ttl;
        db.sessions.insert(
            token_digest(&token),
            SessionRecord {
                user: user.id,
                expires_at,
            },
        );
        tracing::info!("user {} logged in", user.id);
        Ok(Session {
            token,
            user,
            expires_at,
        })
    })
    .await
}

/// End the session identified by `token`.
pub async fn logout(conn: &Connection, token: &str) -> Result<()> {
    let digest = token_digest(token);
    conn.write(move |db| {
        db.sessions.remove(&digest);
        Ok(())
    })
    .await
}

/// Find the user owning the session identified by `token`.
pub async fn authenticate(conn: &Connection, token: &str) -> Result<User> {
    let digest = token_digest(token);
    conn.read(|db| {
        let session = db
            .sessions
            .get(&digest)
            .filter(|session| session.expires_at > Utc::now())
            .ok_or_else(|| Error::unauthenticated("session is invalid or has expired"))?;
        let user = db
            .users
            .get(&session.user)
            .ok_or_else(|| Error::unauthenticated("session is invalid or has expired"))?;
        if user.blocked {
            return Err(Error::forbidden("this account has been blocked"));
        }
        Ok(user.clone())
    })
    .await
}

/// Update a user's name or phone number.
pub async fn update_profile(conn: &Connection, user: Id, patch: ProfilePatch) -> Result<User> {
    conn.write(move |db| {
        if let Some(name) = &patch.name {
            ensure_valid!(!name.trim().is_empty(), "name must not be empty");
        }
        let user = user_mut(db, user)?;
        if let Some(name) = patch.name {
            user.name = name.trim().into();
        }
        if let Some(phone) = patch.phone {
            user.phone = Some(phone).filter(|phone| !phone.trim().is_empty());
        }
        Ok(user.clone())
    })
    .await
}

/// Change a user's password.
///
/// All of the user's sessions except the one identified by `current_token` are ended.
pub async fn change_password(
    conn: &Connection,
    user: Id,
    current_token: &str,
    current_password: &str,
    new_password: &str,
) -> Result<()> {
    ensure_valid!(
        new_password.chars().count() >= MIN_PASSWORD_LEN,
        "password must be at least {MIN_PASSWORD_LEN} characters"
    );
    let keep = token_digest(current_token);
    let existing = conn
        .read(|db| db.credentials.get(&user).cloned())
        .await
        .ok_or_else(|| Error::not_found("user", user))?;
    if !verify_password(existing.clone(), current_password.to_string()).await {
        return Err(Error::forbidden("current password is incorrect"));
    }
    let credentials = hash_new_password(new_password.to_string()).await;
    conn.write(move |db| {
        if db.credentials.get(&user) != Some(&existing) {
            return Err(Error::conflict("the password was changed by another request"));
        }
        db.credentials.insert(user, credentials);
        revoke_sessions(db, user, Some(&keep));
        tracing::info!("user {user} changed password");
        Ok(())
    })
    .await
}

/// Save a new delivery address on a user's profile.
pub async fn add_address(conn: &Connection, user: Id, input: AddressInput) -> Result<Address> {
    ensure_valid!(!input.line1.trim().is_empty(), "address line 1 must not be empty");
    ensure_valid!(!input.city.trim().is_empty(), "city must not be empty");
    ensure_valid!(!input.postal_code.trim().is_empty(), "postal code must not be empty");
    let address = Address {
        id: Uuid::new_v4(),
        label: if input.label.trim().is_empty() {
            "Home".into()
        } else {
            input.label.trim().into()
        },
        line1: input.line1.trim().into(),
        line2: input.line2.trim().into(),
        city: input.city.trim().into(),
        postal_code: input.postal_code.trim().into(),
        phone: input.phone,
    };
    conn.write(move |db| {
        user_mut(db, user)?.addresses.push(address.clone());
        Ok(address)
    })
    .await
}

/// Delete a saved address.
pub async fn remove_address(conn: &Connection, user: Id, address: Id) -> Result<()> {
    conn.write(move |db| {
        let user = user_mut(db, user)?;
        let before = user.addresses.len();
        user.addresses.retain(|addr| addr.id != address);
        if user.addresses.len() == before {
            return Err(Error::not_found("address", address));
        }
        Ok(())
    })
    .await
}

/// End all of `user`'s sessions, except the one whose token digest is `except`.
pub(crate) fn revoke_sessions(db: &mut Db, user: Id, except: Option<&str>) {
    db.sessions
        .retain(|digest, session| session.user != user || Some(digest.as_str()) == except);
}

fn user_mut(db: &mut Db, id: Id) -> Result<&mut User> {
    db.users
        .get_mut(&id)
        .ok_or_else(|| Error::not_found("user", id))
}

/// Validate a registration and build the user it describes.
///
/// Returns the new user along with the password to set for them.
fn new_user(reg: Registration, role: Role) -> Result<(User, String)> {
    let name = reg.name.trim();
    let email = reg.email.trim().to_lowercase();
    ensure_valid!(!name.is_empty(), "name must not be empty");
    ensure_valid!(
        email.len() >= 3 && email.contains('@') && !email.starts_with('@') && !email.ends_with('@'),
        "{email} is not a valid email address"
    );
    ensure_valid!(
        reg.password.chars().count() >= MIN_PASSWORD_LEN,
        "password must be at least {MIN_PASSWORD_LEN} characters"
    );
    Ok((
        User {
            id: Uuid::new_v4(),
            name: name.into(),
            email,
            phone: reg.phone.filter(|phone| !phone.trim().is_empty()),
            role,
            blocked: false,
            addresses: vec![],
            created_at: Utc::now(),
        },
        reg.password,
    ))
}

/// Salt and hash a password, off the async executor.
async fn hash_new_password(password: String) -> Credentials {
    spawn_blocking(move || {
        let salt = BASE64_STANDARD.encode(rand::random::<[u8; 16]>());
        let digest = hash_password(&salt, &password);
        Credentials { salt, digest }
    })
    .await
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut digest = Sha256::new()
        .chain_update(salt.as_bytes())
        .chain_update(password.as_bytes())
        .finalize();
    for _ in 1..HASH_ROUNDS {
        digest = Sha256::new()
            .chain_update(digest)
            .chain_update(salt.as_bytes())
            .finalize();
    }
    BASE64_STANDARD.encode(digest)
}

/// Check a password against stored credentials, off the async executor.
async fn verify_password(credentials: Credentials, password: String) -> bool {
    spawn_blocking(move || {
        let digest = hash_password(&credentials.salt, &password);
        digest.as_bytes().ct_eq(credentials.digest.as_bytes()).into()
    })
    .await
}

fn token_digest(token: &str) -> String {
    BASE64_STANDARD.encode(Sha256::digest(token.as_bytes()))
}
