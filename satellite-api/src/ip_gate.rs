//! Actix middleware that denies every request whose remote address falls
//! outside the configured management CIDR, answering with the same 404 the
//! dispatcher gives an unmatched route -- the existence of the management
//! API must not be observable from outside the allowed range (spec §4.10).

use std::future::{ready, Ready};
use std::net::IpAddr;
use std::rc::Rc;

use actix_web::body::EitherBody;
use actix_web::dev::{self, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{Error, HttpResponse};
use futures_util::future::LocalBoxFuture;
use satellite_core::ip::IpRangeEntry;

#[derive(Clone)]
pub struct ManagementIpGate {
    allowed: Rc<IpRangeEntry>,
}

impl ManagementIpGate {
    pub fn new(allowed: IpRangeEntry) -> Self {
        ManagementIpGate {
            allowed: Rc::new(allowed),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for ManagementIpGate
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = ManagementIpGateMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ManagementIpGateMiddleware {
            service: Rc::new(service),
            allowed: self.allowed.clone(),
        }))
    }
}

pub struct ManagementIpGateMiddleware<S> {
    service: Rc<S>,
    allowed: Rc<IpRangeEntry>,
}

impl<S, B> Service<ServiceRequest> for ManagementIpGateMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    dev::forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let client_ip = req
            .connection_info()
            .realip_remote_addr()
            .and_then(|s| s.parse::<IpAddr>().ok());

        let allowed = matches!(client_ip, Some(ip) if self.allowed.contains(&ip));

        if allowed {
            let srv = self.service.clone();
            Box::pin(async move {
                let res = srv.call(req).await?;
                Ok(res.map_into_left_body())
            })
        } else {
            let (req, _) = req.into_parts();
            Box::pin(async move {
                let res = HttpResponse::NotFound().finish().map_into_right_body();
                Ok(ServiceResponse::new(req, res))
            })
        }
    }
}
