use tower_cookies::{cookie::SameSite, Cookie, Cookies};

use super::services::TokenPair;

pub const ACCESS_COOKIE: &str = "accessToken";
pub const REFRESH_COOKIE: &str = "refreshToken";

fn token_cookie(name: &'static str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name, value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

pub fn set_token_cookies(cookies: &Cookies, pair: &TokenPair, secure: bool) {
    cookies.add(token_cookie(ACCESS_COOKIE, pair.access_token.clone(), secure));
    cookies.add(token_cookie(REFRESH_COOKIE, pair.refresh_token.clone(), secure));
}

/// Emits expired cookies, whether or not the client sent them.
pub fn clear_token_cookies(cookies: &Cookies, secure: bool) {
    for name in [ACCESS_COOKIE, REFRESH_COOKIE] {
        let mut cookie = token_cookie(name, String::new(), secure);
        cookie.make_removal();
        cookies.add(cookie);
    }
}
