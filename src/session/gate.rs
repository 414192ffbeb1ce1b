//! Route gating.
//!
//! Protected views admit only a session believed to be valid; public views
//! (login, register) bounce such a session to the dashboard. Gating reads
//! the state and nothing else: it never triggers a check.

use super::controller::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Dashboard,
    Login,
    Register,
}

impl View {
    /// Where authenticated visitors of a public view are sent.
    pub const DEFAULT_PROTECTED: View = View::Dashboard;

    pub fn path(self) -> &'static str {
        match self {
            View::Dashboard => "/",
            View::Login => "/login",
            View::Register => "/register",
        }
    }

    /// Parse a route path. A trailing slash is tolerated.
    pub fn from_path(path: &str) -> Option<View> {
        if !path.starts_with('/') {
            return None;
        }
        match path.trim_end_matches('/') {
            "" => Some(View::Dashboard),
            "/login" => Some(View::Login),
            "/register" => Some(View::Register),
            _ => None,
        }
    }

    pub fn is_protected(self) -> bool {
        matches!(self, View::Dashboard)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admit,
    Redirect(View),
}

impl std::fmt::Display for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Admission::Admit => write!(f, "admit"),
            Admission::Redirect(view) => write!(f, "redirect {}", view.path()),
        }
    }
}

/// Decide whether `view` may render in `state`.
///
/// `Refreshing` counts as signed in: the session is still believed valid
/// until the refresh says otherwise.
pub fn admit(state: SessionState, view: View) -> Admission {
    let signed_in = state != SessionState::Unauthenticated;

    match (view.is_protected(), signed_in) {
        (true, true) | (false, false) => Admission::Admit,
        (true, false) => Admission::Redirect(View::Login),
        (false, true) => Admission::Redirect(View::DEFAULT_PROTECTED),
    }
}
