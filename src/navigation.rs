use serde::Serialize;

use crate::session::SessionState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Root,
    Login,
    SignUp,
    Chat,
    Profile,
}

impl Route {
    pub fn parse(path: &str) -> Option<Self> {
        match path.trim_end_matches('/') {
            "" => Some(Route::Root),
            "/login" => Some(Route::Login),
            "/signup" => Some(Route::SignUp),
            "/chat" => Some(Route::Chat),
            "/profile" => Some(Route::Profile),
            _ => None,
        }
    }

    pub fn path(self) -> &'static str {
        match self {
            Route::Root => "/",
            Route::Login => "/login",
            Route::SignUp => "/signup",
            Route::Chat => "/chat",
            Route::Profile => "/profile",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The first auth check has not resolved yet.
    Loading,
    Redirect(Route),
    Render(Route),
}

/// Decide what a visit to `route` shows for the given session.
pub fn resolve(route: Route, session: &SessionState) -> Resolution {
    let signed_in = session.user.is_some();
    match route {
        Route::Login | Route::SignUp => Resolution::Render(route),
        _ if session.loading => Resolution::Loading,
        Route::Root if signed_in => Resolution::Redirect(Route::Chat),
        Route::Root => Resolution::Redirect(Route::Login),
        Route::Chat | Route::Profile if signed_in => Resolution::Render(route),
        Route::Chat | Route::Profile => Resolution::Redirect(Route::Login),
    }
}
