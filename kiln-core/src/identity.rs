//! Path-prefix permissions and cookie sessions.

use crate::request::RequestInfo;
use crate::theme;
use dashmap::DashMap;
use parking_lot::RwLock;
use rand::Rng;
use sha2::{Digest, Sha256};

pub const USER_COOKIE: &str = "user";

/// Authentication and per-request rejection, as consumed by the dispatch pipeline.
pub trait IdentityStore: Send + Sync {
    /// Whether the request must be turned away.
    fn rejected(&self, req: &RequestInfo) -> bool;

    /// The logged-in user behind a request, if any.
    fn username(&self, req: &RequestInfo) -> Option<String>;
}

#[derive(Debug, Clone, Default)]
struct UserRecord {
    admin: bool,
    logged_in: bool,
}

/// In-memory store guarding admin and user path prefixes.
pub struct PrefixPermissions {
    admin_prefixes: RwLock<Vec<String>>,
    user_prefixes: RwLock<Vec<String>>,
    users: DashMap<String, UserRecord>,
    cookie_secret: RwLock<String>,
}

impl Default for PrefixPermissions {
    fn default() -> Self {
        Self::new("")
    }
}

impl PrefixPermissions {
    /// A store with the default prefixes. An empty secret is replaced with a random one.
    pub fn new(cookie_secret: &str) -> Self {
        let secret = if cookie_secret.is_empty() {
            random_secret()
        } else {
            cookie_secret.to_string()
        };
        Self {
            admin_prefixes: RwLock::new(vec!["/admin".to_string()]),
            user_prefixes: RwLock::new(vec!["/repo".to_string(), "/data".to_string()]),
            users: DashMap::new(),
            cookie_secret: RwLock::new(secret),
        }
    }

    /// Make every path public.
    pub fn clear(&self) {
        self.admin_prefixes.write().clear();
        self.user_prefixes.write().clear();
    }

    pub fn add_admin_prefix(&self, prefix: &str) {
        self.admin_prefixes.write().push(prefix.to_string());
    }

    pub fn add_user_prefix(&self, prefix: &str) {
        self.user_prefixes.write().push(prefix.to_string());
    }

    pub fn admin_prefixes(&self) -> Vec<String> {
        self.admin_prefixes.read().clone()
    }

    pub fn user_prefixes(&self) -> Vec<String> {
        self.user_prefixes.read().clone()
    }

    pub fn cookie_secret(&self) -> String {
        self.cookie_secret.read().clone()
    }

    pub fn set_cookie_secret(&self, secret: &str) {
        *self.cookie_secret.write() = secret.to_string();
    }

    pub fn add_user(&self, username: &str, admin: bool) {
        self.users.insert(
            username.to_string(),
            UserRecord {
                admin,
                logged_in: false,
            },
        );
    }

    pub fn set_logged_in(&self, username: &str, logged_in: bool) {
        if let Some(mut user) = self.users.get_mut(username) {
            user.logged_in = logged_in;
        }
    }

    /// Cookie value identifying `username`, signed with the cookie secret.
    pub fn session_cookie(&self, username: &str) -> String {
        format!("{username}|{}", self.sign(username))
    }

    fn sign(&self, value: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.cookie_secret.read().as_bytes());
        hasher.update(b"|");
        hasher.update(value.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    fn verified_user(&self, req: &RequestInfo) -> Option<String> {
        let cookie = req.cookie(USER_COOKIE)?;
        let (name, signature) = cookie.rsplit_once('|')?;
        if self.sign(name) != signature {
            return None;
        }
        Some(name.to_string())
    }

    fn is_logged_in(&self, username: &str) -> bool {
        self.users
            .get(username)
            .map(|u| u.logged_in)
            .unwrap_or(false)
    }

    fn is_admin(&self, username: &str) -> bool {
        self.users
            .get(username)
            .map(|u| u.logged_in && u.admin)
            .unwrap_or(false)
    }
}

impl IdentityStore for PrefixPermissions {
    fn rejected(&self, req: &RequestInfo) -> bool {
        let path = req.path();
        let user = self.verified_user(req);

        let admin_path = self
            .admin_prefixes
            .read()
            .iter()
            .any(|p| path.starts_with(p.as_str()));
        if admin_path {
            return !user.as_deref().map(|u| self.is_admin(u)).unwrap_or(false);
        }

        let user_path = self
            .user_prefixes
            .read()
            .iter()
            .any(|p| path.starts_with(p.as_str()));
        if user_path {
            return !user.as_deref().map(|u| self.is_logged_in(u)).unwrap_or(false);
        }

        false
    }

    fn username(&self, req: &RequestInfo) -> Option<String> {
        self.verified_user(req).filter(|u| self.is_logged_in(u))
    }
}

/// The page served when no custom deny handler is installed.
pub fn permission_denied_page(theme_name: &str) -> Vec<u8> {
    theme::message_page(
        "Permission denied",
        "<div style='color:red'>You do not have the rights to view this page.</div>",
        theme::page_theme(theme_name),
    )
}

fn random_secret() -> String {
    rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_cookie(path: &str, cookie: &str) -> RequestInfo {
        RequestInfo::get(path).with_header("cookie", &format!("{USER_COOKIE}={cookie}"))
    }

    #[test]
    fn default_prefixes_guard_admin_and_user_paths() {
        let perm = PrefixPermissions::new("secret");
        assert!(perm.rejected(&RequestInfo::get("/admin/panel")));
        assert!(perm.rejected(&RequestInfo::get("/data/x")));
        assert!(!perm.rejected(&RequestInfo::get("/index.html")));
    }

    #[test]
    fn logged_in_users_reach_user_paths_but_not_admin_paths() {
        let perm = PrefixPermissions::new("secret");
        perm.add_user("bob", false);
        perm.set_logged_in("bob", true);
        let cookie = perm.session_cookie("bob");

        assert!(!perm.rejected(&with_cookie("/repo/a", &cookie)));
        assert!(perm.rejected(&with_cookie("/admin", &cookie)));
        assert_eq!(perm.username(&with_cookie("/", &cookie)).as_deref(), Some("bob"));
    }

    #[test]
    fn forged_cookies_are_ignored() {
        let perm = PrefixPermissions::new("secret");
        perm.add_user("root", true);
        perm.set_logged_in("root", true);

        assert!(perm.rejected(&with_cookie("/admin", "root|deadbeef")));
        assert_eq!(perm.username(&with_cookie("/", "root|deadbeef")), None);
    }

    #[test]
    fn clear_makes_everything_public() {
        let perm = PrefixPermissions::new("");
        assert_eq!(perm.cookie_secret().len(), 32);
        perm.clear();
        assert!(!perm.rejected(&RequestInfo::get("/admin")));
        perm.add_admin_prefix("/secret");
        assert!(perm.rejected(&RequestInfo::get("/secret/x")));
    }
}
