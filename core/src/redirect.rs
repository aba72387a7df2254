/*
    music-roast | Rust CLI tool that roasts your Spotify listening habits.
    Copyright (C) 2025  Israel Alberto Roldan Vega

    This program is free software: you can redistribute it and/or modify
    it under the terms of the GNU Affero General Public License as published
    by the Free Software Foundation, either version 3 of the License, or
    (at your option) any later version.

    This program is distributed in the hope that it will be useful,
    but WITHOUT ANY WARRANTY; without even the implied warranty of
    MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
    GNU Affero General Public License for more details.

    You should have received a copy of the GNU Affero General Public License
    along with this program.  If not, see <https://www.gnu.org/licenses/>.
*/

use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener};

use log::{debug, info};
use url::{Host, Url};

use crate::error::AuthError;
use crate::session::Session;

/// Returns the address to bind for a loopback redirect, or `None` for public hosts.
pub fn loopback_ip(uri: &Url) -> Option<IpAddr> {
    match uri.host()? {
        Host::Domain(domain) if domain.eq_ignore_ascii_case("localhost") => {
            Some(IpAddr::V4(Ipv4Addr::LOCALHOST))
        }
        Host::Ipv4(ip) if ip.is_loopback() => Some(IpAddr::V4(ip)),
        Host::Ipv6(ip) if ip.is_loopback() => Some(IpAddr::V6(ip)),
        _ => None,
    }
}

pub fn is_loopback(uri: &Url) -> bool {
    loopback_ip(uri).is_some()
}

/// Picks the redirect URI for this session.
///
/// Public hosts are returned untouched. For loopback hosts the configured port
/// is kept when it can be bound, otherwise an OS-assigned port replaces it.
/// The result is stored in the session, so every later call returns the same URI.
pub fn resolve_redirect(configured: &Url, session: &mut Session) -> Result<Url, AuthError> {
    if let Some(chosen) = session.chosen_redirect() {
        return Ok(chosen.clone());
    }

    let resolved = match loopback_ip(configured) {
        None => configured.clone(),
        Some(ip) => match configured.port() {
            Some(port) if port_is_free(ip, port) => configured.clone(),
            configured_port => {
                let port = ephemeral_port(ip)?;
                info!(
                    "Redirect port {:?} unavailable on {}, using {} instead",
                    configured_port, ip, port
                );
                let mut uri = configured.clone();
                uri.set_port(Some(port)).map_err(|_| {
                    AuthError::Configuration(format!("Redirect URI {} cannot carry a port", configured))
                })?;
                uri
            }
        },
    };

    debug!("Resolved redirect URI: {}", resolved);
    session.chosen_redirect = Some(resolved.clone());
    Ok(resolved)
}

fn port_is_free(ip: IpAddr, port: u16) -> bool {
    TcpListener::bind(SocketAddr::new(ip, port)).is_ok()
}

fn ephemeral_port(ip: IpAddr) -> Result<u16, AuthError> {
    let listener = TcpListener::bind(SocketAddr::new(ip, 0))?;
    let port = listener.local_addr()?.port();
    Ok(port)
}
