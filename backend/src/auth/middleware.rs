use super::jwt::JwtService;
use super::models::{Role, SessionIdentity};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    error::InternalError,
    Error, HttpMessage, HttpResponse,
};
use actix_web::{FromRequest, HttpRequest};
use futures::future::{ok, ready, Ready};
use shared::MessageResponse;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Attaches a [`SessionIdentity`] to every request carrying a valid bearer token and
/// answers 401 for protected paths that have none. Role checks are left to the
/// [`AuthenticatedDoctor`] and [`AuthenticatedPatient`] extractors.
#[derive(Clone)]
pub struct AuthMiddleware {
    jwt_service: Arc<JwtService>,
    protected: Arc<Vec<String>>,
}

impl AuthMiddleware {
    pub fn new(jwt_service: JwtService) -> Self {
        Self {
            jwt_service: Arc::new(jwt_service),
            protected: Arc::new(Vec::new()),
        }
    }

    pub fn require_auth_for<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.protected = Arc::new(paths.into_iter().map(Into::into).collect());
        self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AuthMiddleware
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Transform = AuthMiddlewareService<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ok(AuthMiddlewareService {
            service: Arc::new(service),
            jwt_service: self.jwt_service.clone(),
            protected: self.protected.clone(),
        })
    }
}

pub struct AuthMiddlewareService<S> {
    service: Arc<S>,
    jwt_service: Arc<JwtService>,
    protected: Arc<Vec<String>>,
}

#[derive(Debug)]
enum AuthError {
    NoAuthHeader,
    InvalidHeaderFormat,
    NotBearerToken,
    VerificationFailed(String),
}

impl AuthError {
    fn log_message(&self, path: &str) -> String {
        match self {
            AuthError::NoAuthHeader => format!("No Authorization header found for path: {}", path),
            AuthError::InvalidHeaderFormat => format!("Invalid Authorization header format (non-UTF-8) for path: {}", path),
            AuthError::NotBearerToken => format!("Authorization header for path {} doesn't start with 'Bearer '", path),
            AuthError::VerificationFailed(e) => format!("JWT token verification failed for path {}: {}", path, e),
        }
    }
}

fn validate_request_token(
    req: &ServiceRequest,
    jwt_service: &JwtService,
) -> Result<SessionIdentity, AuthError> {
    let auth_header = req.headers().get("Authorization").ok_or(AuthError::NoAuthHeader)?;
    let auth_str = auth_header.to_str().map_err(|_| AuthError::InvalidHeaderFormat)?;
    let token = auth_str.strip_prefix("Bearer ").ok_or(AuthError::NotBearerToken)?;

    log::debug!("Found Bearer token, verifying...");
    let identity = jwt_service
        .identify(token.trim())
        .map_err(|e| AuthError::VerificationFailed(e.to_string()))?;

    log::debug!("JWT token verified for {} {}", identity.role, identity.account_id);
    Ok(identity)
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(MessageResponse::failure("Unauthorized"))
}

impl<S, B> Service<ServiceRequest> for AuthMiddlewareService<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<actix_web::body::EitherBody<B>>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = self.service.clone();
        let jwt_service = self.jwt_service.clone();
        let protected = self.protected.clone();

        Box::pin(async move {
            let path_str = req.path().to_string();
            let required = protected.iter().any(|p| p == &path_str);
            log::debug!("Auth middleware processing path: {}", &path_str);

            match validate_request_token(&req, &jwt_service) {
                Ok(identity) => {
                    req.extensions_mut().insert(identity);
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
                Err(auth_error) if required => {
                    log::warn!("{}", auth_error.log_message(&path_str));

                    let (http_req, _payload) = req.into_parts();
                    let response = unauthorized().map_into_right_body();
                    Ok(ServiceResponse::new(http_req, response))
                }
                Err(auth_error) => {
                    if !matches!(auth_error, AuthError::NoAuthHeader) {
                        log::debug!("{}", auth_error.log_message(&path_str));
                    }
                    let res = service.call(req).await?;
                    Ok(res.map_into_left_body())
                }
            }
        })
    }
}

fn identity_with_role(req: &HttpRequest, role: Role) -> Result<SessionIdentity, Error> {
    match req.extensions().get::<SessionIdentity>() {
        Some(identity) if identity.role == role => Ok(identity.clone()),
        Some(identity) => {
            log::warn!(
                "{} {} tried to access {} route {}",
                identity.role,
                identity.account_id,
                role,
                req.path()
            );
            Err(InternalError::from_response("Unauthorized", unauthorized()).into())
        }
        None => Err(InternalError::from_response("Unauthorized", unauthorized()).into()),
    }
}

pub struct AuthenticatedDoctor(pub SessionIdentity);

impl FromRequest for AuthenticatedDoctor {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(identity_with_role(req, Role::Doctor).map(AuthenticatedDoctor))
    }
}

pub struct AuthenticatedPatient(pub SessionIdentity);

impl FromRequest for AuthenticatedPatient {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ready(identity_with_role(req, Role::Patient).map(AuthenticatedPatient))
    }
}

/// The session, if the request carried a valid one.
pub struct MaybeIdentity(pub Option<SessionIdentity>);

impl FromRequest for MaybeIdentity {
    type Error = Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut actix_web::dev::Payload) -> Self::Future {
        ok(MaybeIdentity(req.extensions().get::<SessionIdentity>().cloned()))
    }
}
