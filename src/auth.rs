use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;
use http::HeaderMap;

use crate::error::ApiError;
use crate::models::{Cid, Identity};
use crate::roster::Roster;
use crate::settings::Settings;

/// Header naming the member the calling site acts on behalf of.
pub const ACTOR_HEADER: &str = "x-actor-cid";

pub fn verify_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    let provided_token = auth
        .map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()));
    match provided_token {
        Some(token) if token == settings.auth_token => Ok(()),
        _ => Err(ApiError::Unauthorized(
            "Invalid authentication token".into(),
        )),
    }
}

pub fn actor_cid(headers: &HeaderMap) -> Result<Cid, ApiError> {
    let value = headers
        .get(ACTOR_HEADER)
        .ok_or_else(|| ApiError::Unauthorized(format!("Missing {ACTOR_HEADER} header")))?;
    value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<Cid>().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid {ACTOR_HEADER} header")))
}

pub async fn resolve_actor(roster: &dyn Roster, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let cid = actor_cid(headers)?;
    roster
        .member(cid)
        .await
        .ok_or_else(|| ApiError::Unauthorized(format!("Unknown member {cid}")))
}

#[cfg(test)]
mod tests {
    use http::HeaderValue;

    use super::*;
    use crate::roster::StaticRoster;

    fn settings() -> Settings {
        Settings {
            debug: false,
            auth_token: "secret".to_string(),
            enable_swagger: true,
            port: 8080,
            lookahead_weeks: 6,
            notify_webhook_url: None,
            roster_path: None,
            calendar_name: "Training Sessions".to_string(),
        }
    }

    #[test]
    fn test_verify_token_header() {
        let auth = Authorization::bearer("secret").unwrap();
        assert!(verify_token(&settings(), Some(auth), None).is_ok());
    }

    #[test]
    fn test_verify_token_query() {
        assert!(verify_token(&settings(), None, Some("secret")).is_ok());
        assert!(verify_token(&settings(), None, Some("bad")).is_err());
    }

    #[tokio::test]
    async fn test_resolve_actor() {
        let roster = StaticRoster::new(vec![Identity {
            cid: 1000000,
            first_name: "Tina".into(),
            last_name: "Trainer".into(),
            operating_initials: "TT".into(),
            roles: vec![],
        }]);

        let mut headers = HeaderMap::new();
        assert!(matches!(
            resolve_actor(&roster, &headers).await,
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("abc"));
        assert!(matches!(
            resolve_actor(&roster, &headers).await,
            Err(ApiError::BadRequest(_))
        ));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("42"));
        assert!(matches!(
            resolve_actor(&roster, &headers).await,
            Err(ApiError::Unauthorized(_))
        ));

        headers.insert(ACTOR_HEADER, HeaderValue::from_static("1000000"));
        let actor = resolve_actor(&roster, &headers).await.unwrap();
        assert_eq!(actor.first_name, "Tina");
    }
}
