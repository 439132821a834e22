use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{extract::OriginalUri, http::Request, middleware::Next};
use kidbiz_shared::auth::Role;
use kidbiz_shared::jwt::JwtClaims;

/// Role gate for `/api/v1/{admin,parent,child}/*`. Ownership of individual
/// rows (a parent's children, a child's company) is checked in handlers.
pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    if let Err(err) = decide(&segs, claims) {
        tracing::warn!(
            method = %method,
            path = %path,
            subject = %claims.sub,
            role = ?claims.role,
            token_child = ?claims.child_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn decide(segs: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    match segs {
        ["api", "v1", "auth", "logout"] => Ok(()),
        ["api", "v1", "child-session", "validate"] => require_child(claims),
        ["api", "v1", scope, ..] => {
            let needed = Role::parse(scope).ok_or_else(AppError::forbidden)?;
            if claims.role != needed {
                return Err(AppError::forbidden());
            }
            if needed == Role::Child {
                require_child(claims)?;
            }
            Ok(())
        }
        _ => Err(AppError::forbidden()),
    }
}

fn require_child(claims: &JwtClaims) -> Result<(), AppError> {
    match (claims.role, claims.child_id.as_deref()) {
        (Role::Child, Some(id)) if !id.is_empty() => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: Role, child_id: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: child_id.unwrap_or("u1").to_string(),
            jti: "j".into(),
            exp: 0,
            role,
            child_id: child_id.map(str::to_string),
        }
    }

    #[test]
    fn roles_are_confined_to_their_scope() {
        let admin = claims(Role::Admin, None);
        let parent = claims(Role::Parent, None);
        let child = claims(Role::Child, Some("c1"));
        let p = |s: &'static str| segmented(s);

        assert!(decide(&p("/api/v1/admin/modules"), &admin).is_ok());
        assert!(decide(&p("/api/v1/admin/modules"), &parent).is_err());
        assert!(decide(&p("/api/v1/parent/children"), &parent).is_ok());
        assert!(decide(&p("/api/v1/parent/children"), &child).is_err());
        assert!(decide(&p("/api/v1/child/profile"), &child).is_ok());
        assert!(decide(&p("/api/v1/child/profile"), &admin).is_err());
        assert!(decide(&p("/api/v1/unknown/x"), &admin).is_err());
    }

    #[test]
    fn shared_routes() {
        let parent = claims(Role::Parent, None);
        let child = claims(Role::Child, Some("c1"));
        let bare_child = claims(Role::Child, None);
        assert!(decide(&segmented("/api/v1/auth/logout"), &parent).is_ok());
        assert!(decide(&segmented("/api/v1/child-session/validate"), &child).is_ok());
        assert!(decide(&segmented("/api/v1/child-session/validate"), &parent).is_err());
        assert!(decide(&segmented("/api/v1/child/modules"), &bare_child).is_err());
    }
}
