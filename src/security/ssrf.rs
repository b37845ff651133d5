//! SSRF protection: block IPv4-mapped IPv6 literals and private IP ranges.
//!
//! When the gateway proxies requests on behalf of tools, we must prevent
//! Server-Side Request Forgery (SSRF) attacks where a malicious tool
//! target resolves to internal infrastructure.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::{Error, Result};

/// Check whether an IP address is a private/loopback/link-local address
/// that should be blocked for outbound requests.
fn is_private_or_reserved(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V4(ipv4) => is_private_ipv4(ipv4),
        IpAddr::V6(ipv6) => is_private_ipv6(ipv6),
    }
}

/// Check if an IPv4 address is private, loopback, or link-local.
fn is_private_ipv4(addr: Ipv4Addr) -> bool {
    addr.is_loopback()          // 127.0.0.0/8
    || addr.is_private()        // 10.0.0.0/8, 172.16.0.0/12, 192.168.0.0/16
    || addr.is_link_local()     // 169.254.0.0/16
    || addr.is_broadcast()      // 255.255.255.255
    || addr.is_unspecified()    // 0.0.0.0
    || is_shared_address(addr)  // 100.64.0.0/10 (CGN)
    || is_documentation(addr)   // 192.0.2.0/24, 198.51.100.0/24, 203.0.113.0/24
}

/// Check 100.64.0.0/10 (Carrier-Grade NAT / shared address space).
fn is_shared_address(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Check documentation ranges (TEST-NET-1/2/3).
fn is_documentation(addr: Ipv4Addr) -> bool {
    let octets = addr.octets();
    // 192.0.2.0/24
    (octets[0] == 192 && octets[1] == 0 && octets[2] == 2)
    // 198.51.100.0/24
    || (octets[0] == 198 && octets[1] == 51 && octets[2] == 100)
    // 203.0.113.0/24
    || (octets[0] == 203 && octets[1] == 0 && octets[2] == 113)
}

/// Check if an IPv6 address is private, loopback, link-local, or an
/// IPv4-mapped address pointing to a private range.
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn is_private_ipv6(addr: Ipv6Addr) -> bool {
    // Loopback (::1)
    if addr.is_loopback() {
        return true;
    }
    // Unspecified (::)
    if addr.is_unspecified() {
        return true;
    }

    let segments = addr.segments();

    // Link-local (fe80::/10)
    if segments[0] & 0xFFC0 == 0xFE80 {
        return true;
    }

    // Unique Local Address (fc00::/7)
    if segments[0] & 0xFE00 == 0xFC00 {
        return true;
    }

    // IPv4-mapped IPv6 (`::ffff:x.x.x.x`) -- the key SSRF bypass vector
    if let Some(ipv4) = extract_ipv4_mapped(&addr) {
        return is_private_ipv4(ipv4);
    }

    // IPv4-compatible IPv6 (deprecated but still parseable: `::x.x.x.x`)
    if let Some(ipv4) = extract_ipv4_compatible(&addr) {
        return is_private_ipv4(ipv4);
    }

    // 6to4 (2002::/16) — can embed private IPv4
    if segments[0] == 0x2002 {
        let embedded = Ipv4Addr::new(
            (segments[1] >> 8) as u8,
            segments[1] as u8,
            (segments[2] >> 8) as u8,
            segments[2] as u8,
        );
        return is_private_ipv4(embedded);
    }

    // Teredo (2001:0000::/32) — can embed private IPv4
    if segments[0] == 0x2001 && segments[1] == 0x0000 {
        // Teredo server and client IPv4 are obfuscated (XOR with 0xFFFF)
        let client_ipv4 = Ipv4Addr::new(
            (segments[6] >> 8) as u8 ^ 0xFF,
            segments[6] as u8 ^ 0xFF,
            (segments[7] >> 8) as u8 ^ 0xFF,
            segments[7] as u8 ^ 0xFF,
        );
        return is_private_ipv4(client_ipv4);
    }

    false
}

/// Extract IPv4 address from IPv4-mapped IPv6 (`::ffff:x.x.x.x`).
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn extract_ipv4_mapped(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = addr.segments();
    // ::ffff:x.x.x.x has segments [0,0,0,0,0,0xFFFF, hi, lo]
    if segments[0] == 0
        && segments[1] == 0
        && segments[2] == 0
        && segments[3] == 0
        && segments[4] == 0
        && segments[5] == 0xFFFF
    {
        Some(Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        ))
    } else {
        None
    }
}

/// Extract IPv4 address from IPv4-compatible IPv6 (`::x.x.x.x`, deprecated).
#[allow(clippy::cast_possible_truncation)] // Extracting u8 octets from u16 IPv6 segments is intentional
fn extract_ipv4_compatible(addr: &Ipv6Addr) -> Option<Ipv4Addr> {
    let segments = addr.segments();
    // All zero prefix with non-zero last two segments (and not ::1 or ::)
    if segments[0] == 0
        && segments[1] == 0
        && segments[2] == 0
        && segments[3] == 0
        && segments[4] == 0
        && segments[5] == 0
        && (segments[6] != 0 || segments[7] > 1) // exclude :: and ::1
    {
        Some(Ipv4Addr::new(
            (segments[6] >> 8) as u8,
            segments[6] as u8,
            (segments[7] >> 8) as u8,
            segments[7] as u8,
        ))
    } else {
        None
    }
}

/// Why a candidate IP address was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedClass {
    /// 127.0.0.0/8, ::1, or an IPv4-mapped/compatible/6to4/Teredo loopback.
    Loopback,
    /// RFC 1918, CGN, documentation ranges, ULA, or an embedded private IPv4.
    Private,
    /// 169.254.0.0/16 or fe80::/10.
    LinkLocal,
    /// Multicast range.
    Multicast,
    /// 0.0.0.0 or ::.
    Unspecified,
}

/// Classify `addr`, returning the reason it would be blocked under the default
/// (most restrictive) policy, or `None` if it is a routable public address.
#[must_use]
pub fn classify(addr: IpAddr) -> Option<BlockedClass> {
    match addr {
        IpAddr::V4(v4) => classify_ipv4(v4),
        IpAddr::V6(v6) => classify_ipv6(v6),
    }
}

fn classify_ipv4(addr: Ipv4Addr) -> Option<BlockedClass> {
    if addr.is_loopback() {
        Some(BlockedClass::Loopback)
    } else if addr.is_unspecified() {
        Some(BlockedClass::Unspecified)
    } else if addr.is_link_local() {
        Some(BlockedClass::LinkLocal)
    } else if addr.is_multicast() || addr.is_broadcast() {
        Some(BlockedClass::Multicast)
    } else if addr.is_private() || is_shared_address(addr) || is_documentation(addr) {
        Some(BlockedClass::Private)
    } else {
        None
    }
}

#[allow(clippy::cast_possible_truncation)]
fn classify_ipv6(addr: Ipv6Addr) -> Option<BlockedClass> {
    if addr.is_loopback() {
        return Some(BlockedClass::Loopback);
    }
    if addr.is_unspecified() {
        return Some(BlockedClass::Unspecified);
    }
    if addr.is_multicast() {
        return Some(BlockedClass::Multicast);
    }
    let segments = addr.segments();
    if segments[0] & 0xFFC0 == 0xFE80 {
        return Some(BlockedClass::LinkLocal);
    }
    if segments[0] & 0xFE00 == 0xFC00 {
        return Some(BlockedClass::Private);
    }
    if let Some(ipv4) = extract_ipv4_mapped(&addr).or_else(|| extract_ipv4_compatible(&addr)) {
        return classify_ipv4(ipv4);
    }
    if segments[0] == 0x2002 {
        let embedded = Ipv4Addr::new(
            (segments[1] >> 8) as u8,
            segments[1] as u8,
            (segments[2] >> 8) as u8,
            segments[2] as u8,
        );
        return classify_ipv4(embedded);
    }
    if segments[0] == 0x2001 && segments[1] == 0x0000 {
        let client_ipv4 = Ipv4Addr::new(
            (segments[6] >> 8) as u8 ^ 0xFF,
            segments[6] as u8 ^ 0xFF,
            (segments[7] >> 8) as u8 ^ 0xFF,
            segments[7] as u8 ^ 0xFF,
        );
        return classify_ipv4(client_ipv4);
    }
    None
}

/// Environment flags that widen the default-deny SSRF policy. Read once at
/// [`SafeDialer`] construction; flags set after that are not observed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SsrfPolicy {
    /// `MCPANY_DANGEROUS_ALLOW_LOCAL_IPS`: permits both loopback and private ranges.
    pub allow_local_ips: bool,
    /// `MCPANY_ALLOW_LOOPBACK_RESOURCES`: permits loopback only.
    pub allow_loopback: bool,
    /// `MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES`: permits private ranges only.
    pub allow_private_network: bool,
}

impl SsrfPolicy {
    /// Read the three flags from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            allow_local_ips: env_flag_set("MCPANY_DANGEROUS_ALLOW_LOCAL_IPS"),
            allow_loopback: env_flag_set("MCPANY_ALLOW_LOOPBACK_RESOURCES"),
            allow_private_network: env_flag_set("MCPANY_ALLOW_PRIVATE_NETWORK_RESOURCES"),
        }
    }

    /// Whether `class` is permitted under this policy. Link-local, multicast, and
    /// unspecified addresses are never permitted by any flag.
    #[must_use]
    pub fn permits(&self, class: BlockedClass) -> bool {
        match class {
            BlockedClass::Loopback => self.allow_local_ips || self.allow_loopback,
            BlockedClass::Private => self.allow_local_ips || self.allow_private_network,
            BlockedClass::LinkLocal | BlockedClass::Multicast | BlockedClass::Unspecified => false,
        }
    }
}

fn env_flag_set(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

/// Resolves a host and refuses to hand back an address the active [`SsrfPolicy`] blocks.
///
/// Every connection-pool factory for an HTTP/GraphQL upstream runs candidate addresses
/// (and, per §4.4, redirect targets) through this before dialing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeDialer {
    policy: SsrfPolicy,
}

impl SafeDialer {
    /// Build a dialer from the current environment's policy flags.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            policy: SsrfPolicy::from_env(),
        }
    }

    /// Build a dialer with an explicit policy (used by tests and by callers that have
    /// already parsed the environment once).
    #[must_use]
    pub fn new(policy: SsrfPolicy) -> Self {
        Self { policy }
    }

    /// Resolve `host:port` and return the resolved addresses, refusing to resolve at all
    /// if every candidate is blocked, and filtering out individually blocked candidates
    /// otherwise so callers only ever dial a permitted address.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SsrfBlocked`] if DNS resolution fails or no candidate survives
    /// the policy.
    pub async fn resolve(&self, host: &str, port: u16) -> Result<Vec<std::net::SocketAddr>> {
        let candidates = if let Ok(ip) = host.trim_start_matches('[').trim_end_matches(']').parse::<IpAddr>() {
            vec![std::net::SocketAddr::new(ip, port)]
        } else {
            tokio::net::lookup_host((host, port))
                .await
                .map_err(|_| Error::SsrfBlocked)?
                .collect()
        };

        let allowed: Vec<_> = candidates
            .into_iter()
            .filter(|addr| self.check_ip(addr.ip()).is_ok())
            .collect();

        if allowed.is_empty() {
            return Err(Error::SsrfBlocked);
        }
        Ok(allowed)
    }

    /// Check one IP address against the active policy without doing DNS resolution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SsrfBlocked`] if `addr` falls in a blocked class.
    pub fn check_ip(&self, addr: IpAddr) -> Result<()> {
        match classify(addr) {
            Some(class) if !self.policy.permits(class) => Err(Error::SsrfBlocked),
            _ => Ok(()),
        }
    }
}

/// A [`reqwest::dns::Resolve`] that runs every candidate address through a [`SafeDialer`]
/// before handing it back, so the policy is enforced on every dial a pooled client makes —
/// not just the one-time probe at registration — including addresses reached only via a
/// redirect to a new host and addresses a rebinding DNS server swaps in after registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SafeResolve {
    dialer: SafeDialer,
}

impl SafeResolve {
    /// Wrap `dialer` as a `reqwest` DNS resolver.
    #[must_use]
    pub fn new(dialer: SafeDialer) -> Self {
        Self { dialer }
    }
}

impl reqwest::dns::Resolve for SafeResolve {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let dialer = self.dialer;
        Box::pin(async move {
            let addrs = dialer
                .resolve(name.as_str(), 0)
                .await
                .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)?;
            Ok(Box::new(addrs.into_iter()) as reqwest::dns::Addrs)
        })
    }
}

/// Validate that a URL does not target a private/internal IP address.
///
/// Parses the host from the URL and checks it against known private ranges,
/// including IPv4-mapped IPv6 addresses used to bypass naive SSRF filters.
///
/// # Errors
///
/// Returns `Error::Protocol` if the URL targets a private IP address.
pub fn validate_url_not_ssrf(url_str: &str) -> Result<()> {
    let parsed = url::Url::parse(url_str).map_err(|e| {
        Error::Protocol(format!("Invalid URL: {e}"))
    })?;

    let Some(host) = parsed.host_str() else {
        return Err(Error::Protocol("URL has no host".to_string()));
    };

    // Try to parse host as IP address directly
    if let Ok(addr) = host.parse::<IpAddr>() {
        if is_private_or_reserved(addr) {
            return Err(Error::Protocol(format!(
                "SSRF blocked: URL targets private/reserved IP address {addr}"
            )));
        }
    }

    // Handle bracket-enclosed IPv6 literals like [::ffff:127.0.0.1]
    let trimmed = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(addr) = trimmed.parse::<IpAddr>() {
        if is_private_or_reserved(addr) {
            return Err(Error::Protocol(format!(
                "SSRF blocked: URL targets private/reserved IP address {addr}"
            )));
        }
    }

    Ok(())
}
