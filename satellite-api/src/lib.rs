//! Optional management API (C10): mounted at `management.path`, gated by
//! `management.ip` on every request. Denied requests get the same 404 an
//! unmatched route does so the API's existence leaks nothing.

pub mod handlers;
pub mod ip_gate;

use actix_web::web;
use satellite_core::ip::IpRangeEntry;

use handlers::ManagementState;
use ip_gate::ManagementIpGate;

/// Builds the management scope to be `.service()`d into an actix `App`.
/// `allowed` is the parsed `management.ip` CIDR/address; `prefix` is
/// `management.path`.
pub fn management_scope(
    prefix: &str,
    allowed: IpRangeEntry,
    state: web::Data<ManagementState>,
) -> actix_web::Scope {
    web::scope(prefix)
        .wrap(ManagementIpGate::new(allowed))
        .app_data(state)
        .service(handlers::list_routes)
        .service(handlers::reset_counter)
        .service(handlers::new_route)
}
