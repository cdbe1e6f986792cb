// Token-based authentication session
//
// Login is a two-step challenge over HTTP (getkey2, then getjwt). Refresh and
// channel authentication hash the current token under a fresh one-time key
// and send the result over the push channel. The session owns the only live
// token; everything else reads it through `token()`.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::Error;
use crate::hashing::{self, DigestAlgorithm};
use crate::transport::{ChannelTransport, HttpTransport};

/// Refresh when the token has this much lifetime left, or less.
pub const DEFAULT_REFRESH_WINDOW: Duration = Duration::from_secs(30);

/// Client description sent with the token request.
pub const DEFAULT_CLIENT_INFO: &str = "loxwire";

// ── Clock ────────────────────────────────────────────────────────────

/// Source of "now" in unix seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

// ── Permission ───────────────────────────────────────────────────────

/// Token lifetime class requested at login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Permission {
    /// Short-lived web token.
    Web,
    /// Long-lived app token.
    #[default]
    App,
}

impl Permission {
    pub fn code(self) -> u8 {
        match self {
            Self::Web => 2,
            Self::App => 4,
        }
    }
}

impl FromStr for Permission {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" | "2" => Ok(Self::Web),
            "app" | "4" => Ok(Self::App),
            other => Err(Error::protocol(format!("unknown permission: {other}"))),
        }
    }
}

// ── Key material and token ───────────────────────────────────────────

/// One-time challenge material from `getkey2`.
pub struct KeyMaterial {
    pub key: Vec<u8>,
    pub salt: String,
    pub algorithm: DigestAlgorithm,
}

impl KeyMaterial {
    fn from_envelope(env: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            key: hashing::decode_key(env.field_str("key")?)?,
            salt: env.field_str("salt")?.to_owned(),
            algorithm: env.field_str("hashAlg")?.parse()?,
        })
    }
}

/// The bearer token issued by `getjwt` and replaced by every refresh.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub token: String,
    /// Expiry, unix seconds.
    pub valid_until: i64,
    /// Permission bitmask granted by the server.
    pub rights: u32,
    /// Server flag: the password is considered unsecure.
    pub unsecured: bool,
    pub refresh_key: String,
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("token", &"<redacted>")
            .field("valid_until", &self.valid_until)
            .field("rights", &self.rights)
            .field("unsecured", &self.unsecured)
            .finish_non_exhaustive()
    }
}

impl SessionToken {
    /// `true` when `valid_until - now <= window`.
    pub fn needs_refresh(&self, now: i64, window: Duration) -> bool {
        let window = i64::try_from(window.as_secs()).unwrap_or(i64::MAX);
        self.valid_until.saturating_sub(now) <= window
    }

    fn from_login(env: &Envelope) -> Result<Self, Error> {
        Ok(Self {
            token: env.field_str("token")?.to_owned(),
            valid_until: env.field_i64("validUntil")?,
            rights: rights_from(env.field_i64("tokenRights")?)?,
            unsecured: env.field_bool("unsecurePass")?,
            refresh_key: env.field_str("key")?.to_owned(),
        })
    }

    /// Build the replacement token from a refresh acknowledgement. Rights and
    /// key carry over when the server omits them.
    fn refreshed(&self, env: &Envelope) -> Result<Self, Error> {
        let rights = match env.optional_field("tokenRights") {
            Some(v) => rights_from(
                v.as_i64()
                    .ok_or_else(|| Error::protocol("field 'tokenRights' is not an integer"))?,
            )?,
            None => self.rights,
        };
        let refresh_key = match env.optional_field("key") {
            Some(v) => v
                .as_str()
                .ok_or_else(|| Error::protocol("field 'key' is not a string"))?
                .to_owned(),
            None => self.refresh_key.clone(),
        };

        Ok(Self {
            token: env.field_str("token")?.to_owned(),
            valid_until: env.field_i64("validUntil")?,
            rights,
            unsecured: env.field_bool("unsecurePass")?,
            refresh_key,
        })
    }
}

fn rights_from(raw: i64) -> Result<u32, Error> {
    u32::try_from(raw).map_err(|_| Error::protocol(format!("tokenRights out of range: {raw}")))
}

// ── SessionState ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    KeyObtained,
    TokenIssued,
    Refreshing,
    Closed,
}

// ── AuthSession ──────────────────────────────────────────────────────

/// Owns the current token and performs login, refresh and channel
/// authentication.
pub struct AuthSession {
    http: Arc<dyn HttpTransport>,
    clock: Arc<dyn Clock>,
    user: ArcSwapOption<String>,
    token: ArcSwapOption<SessionToken>,
    state: watch::Sender<SessionState>,
    refresh_lock: Mutex<()>,
    refresh_count: AtomicU64,
}

impl AuthSession {
    pub fn new(http: Arc<dyn HttpTransport>) -> Self {
        Self::with_clock(http, Arc::new(SystemClock))
    }

    pub fn with_clock(http: Arc<dyn HttpTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            clock,
            user: ArcSwapOption::empty(),
            token: ArcSwapOption::empty(),
            state: watch::Sender::new(SessionState::Unauthenticated),
            refresh_lock: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    /// The current token, if logged in.
    pub fn token(&self) -> Option<Arc<SessionToken>> {
        self.token.load_full()
    }

    /// The user the current token belongs to.
    pub fn user(&self) -> Option<Arc<String>> {
        self.user.load_full()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Subscribe to session state transitions.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Number of successful refreshes since construction.
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::Relaxed)
    }

    // ── Login ────────────────────────────────────────────────────────

    /// Run the key exchange and obtain a token.
    ///
    /// On failure the previous token, if any, stays in place.
    pub async fn login(
        &self,
        user: &str,
        password: &SecretString,
        permission: Permission,
        client_info: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<SessionToken>, Error> {
        let result = self
            .request_token(user, password, permission, client_info, cancel)
            .await;

        match result {
            Ok(token) => {
                let token = Arc::new(token);
                self.user.store(Some(Arc::new(user.to_owned())));
                self.token.store(Some(Arc::clone(&token)));
                self.state.send_replace(SessionState::TokenIssued);
                info!(
                    user,
                    valid_until = token.valid_until,
                    rights = token.rights,
                    "Logged in"
                );
                if token.unsecured {
                    warn!(user, "Miniserver flags this password as unsecure");
                }
                Ok(token)
            }
            Err(e) => {
                self.settle_state();
                Err(e)
            }
        }
    }

    async fn request_token(
        &self,
        user: &str,
        password: &SecretString,
        permission: Permission,
        client_info: &str,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, Error> {
        let encoded_user = urlencoding::encode(user);

        let challenge = self
            .http
            .get_envelope(&format!("jdev/sys/getkey2/{encoded_user}"), cancel)
            .await?
            .into_auth_success()?;
        let material = KeyMaterial::from_envelope(&challenge)?;
        self.state.send_replace(SessionState::KeyObtained);
        debug!(algorithm = %material.algorithm, "Key exchange complete");

        let user_hash = hashing::user_digest(
            material.algorithm,
            &material.key,
            &material.salt,
            user,
            password.expose_secret(),
        )?;
        drop(material);

        let request_id = uuid::Uuid::new_v4().simple();
        let path = format!(
            "jdev/sys/getjwt/{user_hash}/{encoded_user}/{}/{request_id}/{}",
            permission.code(),
            urlencoding::encode(client_info),
        );

        let issued = self
            .http
            .get_envelope(&path, cancel)
            .await?
            .into_auth_success()?;
        SessionToken::from_login(&issued)
    }

    // ── Refresh ──────────────────────────────────────────────────────

    /// Return a token with more than `window` of lifetime left, refreshing
    /// over `channel` if needed.
    ///
    /// Concurrent callers share one refresh. A failed or cancelled refresh
    /// leaves the previous token in place.
    pub async fn ensure_valid(
        &self,
        window: Duration,
        channel: &dyn ChannelTransport,
        cancel: &CancellationToken,
    ) -> Result<Arc<SessionToken>, Error> {
        let current = self.token.load_full().ok_or(Error::NotLoggedIn)?;
        if !current.needs_refresh(self.clock.now(), window) {
            return Ok(current);
        }

        let _guard = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            guard = self.refresh_lock.lock() => guard,
        };

        // Another caller may have refreshed while we waited.
        let current = self.token.load_full().ok_or(Error::NotLoggedIn)?;
        if !current.needs_refresh(self.clock.now(), window) {
            return Ok(current);
        }

        self.state.send_replace(SessionState::Refreshing);
        let result = self.refresh(&current, channel, cancel).await;

        match result {
            Ok(next) => {
                let still_current = self
                    .token
                    .load()
                    .as_ref()
                    .is_some_and(|t| Arc::ptr_eq(t, &current));
                if !still_current {
                    self.settle_state();
                    return self.token.load_full().ok_or(Error::NotLoggedIn);
                }

                let next = Arc::new(next);
                self.token.store(Some(Arc::clone(&next)));
                self.refresh_count.fetch_add(1, Ordering::Relaxed);
                self.state.send_replace(SessionState::TokenIssued);
                info!(valid_until = next.valid_until, "Token refreshed");
                Ok(next)
            }
            Err(e) => {
                warn!(error = %e, "Token refresh failed");
                self.settle_state();
                Err(e)
            }
        }
    }

    async fn refresh(
        &self,
        current: &SessionToken,
        channel: &dyn ChannelTransport,
        cancel: &CancellationToken,
    ) -> Result<SessionToken, Error> {
        let hash = self.token_hash(current, cancel).await?;
        let user = self.user.load_full().ok_or(Error::NotLoggedIn)?;

        let ack = channel
            .command(
                &format!("refreshjwt/{hash}/{}", urlencoding::encode(&user)),
                cancel,
            )
            .await?
            .into_auth_success()?;
        current.refreshed(&ack)
    }

    // ── Channel authentication ───────────────────────────────────────

    /// Authenticate a freshly opened push channel with the current token.
    pub async fn authenticate_channel(
        &self,
        channel: &dyn ChannelTransport,
        cancel: &CancellationToken,
    ) -> Result<Envelope, Error> {
        let current = self.token.load_full().ok_or(Error::NotLoggedIn)?;
        let user = self.user.load_full().ok_or(Error::NotLoggedIn)?;
        let hash = self.token_hash(&current, cancel).await?;

        let ack = channel
            .command(
                &format!("authwithtoken/{hash}/{}", urlencoding::encode(&user)),
                cancel,
            )
            .await?
            .into_auth_success()?;
        info!(user = %user, "Push channel authenticated");
        Ok(ack)
    }

    /// Fetch a one-time key and hash the token under it.
    async fn token_hash(
        &self,
        current: &SessionToken,
        cancel: &CancellationToken,
    ) -> Result<String, Error> {
        let key_env = self
            .http
            .get_envelope("jdev/sys/getkey", cancel)
            .await?
            .into_auth_success()?;
        let key = hashing::decode_key(key_env.value_str()?)?;
        hashing::token_digest(&key, &current.token)
    }

    // ── Close ────────────────────────────────────────────────────────

    /// Drop the token. Further token-requiring calls fail with
    /// `NotLoggedIn` until the next login.
    pub fn close(&self) {
        self.token.store(None);
        self.user.store(None);
        self.state.send_replace(SessionState::Closed);
        debug!("Session closed");
    }

    fn settle_state(&self) {
        let next = if self.token.load().is_some() {
            SessionState::TokenIssued
        } else if self.state() == SessionState::Closed {
            SessionState::Closed
        } else {
            SessionState::Unauthenticated
        };
        self.state.send_replace(next);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn token(valid_until: i64) -> SessionToken {
        SessionToken {
            token: "tok".into(),
            valid_until,
            rights: 4,
            unsecured: false,
            refresh_key: "k".into(),
        }
    }

    #[test]
    fn refresh_boundary_is_inclusive() {
        let t = token(1_030);
        assert!(t.needs_refresh(1_000, Duration::from_secs(30)));
        assert!(!t.needs_refresh(999, Duration::from_secs(30)));
        assert!(t.needs_refresh(2_000, Duration::from_secs(30)));
    }

    #[test]
    fn debug_hides_token() {
        let rendered = format!("{:?}", token(1));
        assert!(!rendered.contains("tok\""));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn refreshed_keeps_rights_and_key_when_omitted() {
        let prior = SessionToken {
            rights: 0x0c,
            refresh_key: "old-key".into(),
            ..token(10)
        };
        let env = Envelope::parse(
            r#"{"LL":{"Code":"200","value":{"token":"new","validUntil":99,"unsecurePass":true}}}"#,
        )
        .unwrap();

        let next = prior.refreshed(&env).unwrap();
        assert_eq!(next.token, "new");
        assert_eq!(next.valid_until, 99);
        assert!(next.unsecured);
        assert_eq!(next.rights, 0x0c);
        assert_eq!(next.refresh_key, "old-key");
    }

    #[test]
    fn refreshed_takes_supplied_rights_and_key() {
        let env = Envelope::parse(
            r#"{"LL":{"Code":"200","value":{"token":"n","validUntil":1,"unsecurePass":false,"tokenRights":2,"key":"fresh"}}}"#,
        )
        .unwrap();
        let next = token(0).refreshed(&env).unwrap();
        assert_eq!(next.rights, 2);
        assert_eq!(next.refresh_key, "fresh");
    }

    #[test]
    fn login_token_requires_every_field() {
        let env = Envelope::parse(
            r#"{"LL":{"Code":"200","value":{"token":"t","validUntil":1,"unsecurePass":false,"key":"k"}}}"#,
        )
        .unwrap();
        assert!(matches!(
            SessionToken::from_login(&env),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn permission_codes() {
        assert_eq!(Permission::default().code(), 4);
        assert_eq!("web".parse::<Permission>().unwrap(), Permission::Web);
        assert_eq!("4".parse::<Permission>().unwrap(), Permission::App);
    }
}
