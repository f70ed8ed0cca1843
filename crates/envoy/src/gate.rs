// Redirect decision applied before any view is shown.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum View {
    Root,
    Login,
    Register,
    Chat,
}

impl View {
    pub fn is_protected(self) -> bool {
        matches!(self, View::Chat)
    }

    pub fn path(self) -> &'static str {
        match self {
            View::Root => "/",
            View::Login => "/login",
            View::Register => "/register",
            View::Chat => "/chat",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Render(View),
    Redirect(View),
}

impl Route {
    /// Where the user ends up, whether rendered directly or redirected.
    pub fn target(self) -> View {
        match self {
            Route::Render(view) | Route::Redirect(view) => view,
        }
    }
}

pub fn decide(is_authenticated: bool, requested: View) -> Route {
    match requested {
        View::Root if is_authenticated => Route::Redirect(View::Chat),
        View::Root => Route::Redirect(View::Login),
        view if view.is_protected() && !is_authenticated => Route::Redirect(View::Login),
        view => Route::Render(view),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_follows_the_session() {
        assert_eq!(decide(true, View::Root), Route::Redirect(View::Chat));
        assert_eq!(decide(false, View::Root), Route::Redirect(View::Login));
    }

    #[test]
    fn chat_requires_a_session() {
        assert_eq!(decide(false, View::Chat), Route::Redirect(View::Login));
        assert_eq!(decide(true, View::Chat), Route::Render(View::Chat));
    }

    #[test]
    fn public_views_render_unchanged() {
        for authed in [true, false] {
            assert_eq!(decide(authed, View::Login), Route::Render(View::Login));
            assert_eq!(decide(authed, View::Register), Route::Render(View::Register));
        }
    }

    #[test]
    fn redirect_targets_always_render() {
        for authed in [true, false] {
            for view in [View::Root, View::Login, View::Register, View::Chat] {
                let target = decide(authed, view).target();
                assert_eq!(decide(authed, target), Route::Render(target));
            }
        }
    }
}
