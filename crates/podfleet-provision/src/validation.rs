//! Validators for every tenant-influenced value that can end up on a
//! remote command line.
//!
//! Each validator runs two independent checks: an explicit shell
//! metacharacter scan, then a strict format check. A value has to pass
//! both. Remote shells join argv with spaces, so whitespace counts as a
//! metacharacter too.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::error::ProvisionError;

const MAX_HOSTNAME_LEN: usize = 253;

static HOSTNAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    )
    .unwrap()
});

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,63}$").unwrap()
});

static PLAN_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9-]{0,31}$").unwrap());

static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9]{1,10}$").unwrap());

static IPV4_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:[0-9]{1,3}\.){3}[0-9]{1,3}$").unwrap());

static STORAGE_TARGET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]{0,63}$").unwrap());

/// Characters with meaning to a POSIX shell.
const SHELL_METACHARACTERS: &[char] = &[
    ';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '\'', '"', '*', '?', '[', ']', '{', '}',
    '~', '!', '#', '%', '^', '=',
];

/// Why a value was refused. Rendered into audit metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    UnsafeCharacters,
    NotInWhitelist,
    InvalidFormat,
    OutOfRange,
}

impl RejectionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionReason::UnsafeCharacters => "unsafe_characters",
            RejectionReason::NotInWhitelist => "not_in_whitelist",
            RejectionReason::InvalidFormat => "invalid_format",
            RejectionReason::OutOfRange => "out_of_range",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused value: which field, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub field: &'static str,
    pub reason: RejectionReason,
}

impl Rejection {
    fn new(field: &'static str, reason: RejectionReason) -> Self {
        Self { field, reason }
    }
}

impl From<Rejection> for ProvisionError {
    fn from(r: Rejection) -> Self {
        ProvisionError::rejected(r.field, r.reason)
    }
}

pub type Validated<T> = Result<T, Rejection>;

/// True when `value` contains a shell metacharacter, whitespace or a
/// control character.
pub fn has_unsafe_characters(value: &str) -> bool {
    value
        .chars()
        .any(|c| c.is_whitespace() || c.is_control() || SHELL_METACHARACTERS.contains(&c))
}

fn reject_unsafe(field: &'static str, value: &str) -> Validated<()> {
    if value.is_empty() {
        return Err(Rejection::new(field, RejectionReason::InvalidFormat));
    }
    if has_unsafe_characters(value) {
        return Err(Rejection::new(field, RejectionReason::UnsafeCharacters));
    }
    Ok(())
}

fn matches(field: &'static str, re: &Regex, value: &str) -> Validated<()> {
    if re.is_match(value) {
        Ok(())
    } else {
        Err(Rejection::new(field, RejectionReason::InvalidFormat))
    }
}

pub fn hostname(value: &str) -> Validated<String> {
    reject_unsafe("hostname", value)?;
    if value.len() > MAX_HOSTNAME_LEN {
        return Err(Rejection::new("hostname", RejectionReason::InvalidFormat));
    }
    matches("hostname", &HOSTNAME_RE, value)?;
    Ok(value.to_ascii_lowercase())
}

/// A registrable domain name, lower-cased. Requires a dot and an
/// alphabetic TLD.
pub fn domain(value: &str) -> Validated<String> {
    reject_unsafe("domain", value)?;
    let normalized = value.trim_end_matches('.').to_ascii_lowercase();
    if normalized.len() > MAX_HOSTNAME_LEN {
        return Err(Rejection::new("domain", RejectionReason::InvalidFormat));
    }
    matches("domain", &DOMAIN_RE, &normalized)?;
    Ok(normalized)
}

pub fn pod_id(value: &str) -> Validated<Uuid> {
    reject_unsafe("pod_id", value)?;
    Uuid::parse_str(value).map_err(|_| Rejection::new("pod_id", RejectionReason::InvalidFormat))
}

pub fn tenant_id(value: &str) -> Validated<Uuid> {
    reject_unsafe("tenant_id", value)?;
    Uuid::parse_str(value).map_err(|_| Rejection::new("tenant_id", RejectionReason::InvalidFormat))
}

pub fn plan_code(value: &str) -> Validated<String> {
    reject_unsafe("plan_code", value)?;
    matches("plan_code", &PLAN_CODE_RE, value)?;
    Ok(value.to_string())
}

/// Digits only, within `min..=max`.
pub fn instance_id(value: &str, min: u32, max: u32) -> Validated<u32> {
    reject_unsafe("instance_id", value)?;
    matches("instance_id", &DIGITS_RE, value)?;
    let id: u64 = value
        .parse()
        .map_err(|_| Rejection::new("instance_id", RejectionReason::InvalidFormat))?;
    if id < u64::from(min) || id > u64::from(max) {
        return Err(Rejection::new("instance_id", RejectionReason::OutOfRange));
    }
    Ok(id as u32)
}

pub fn ipv4(value: &str) -> Validated<Ipv4Addr> {
    reject_unsafe("ipv4", value)?;
    matches("ipv4", &IPV4_RE, value)?;
    value
        .parse()
        .map_err(|_| Rejection::new("ipv4", RejectionReason::OutOfRange))
}

pub fn storage_target(value: &str) -> Validated<String> {
    reject_unsafe("storage_target", value)?;
    matches("storage_target", &STORAGE_TARGET_RE, value)?;
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn injection_in_hostname_is_unsafe() {
        let err = hostname("web01; rm -rf /").unwrap_err();
        assert_eq!(err.reason, RejectionReason::UnsafeCharacters);
        assert_eq!(err.field, "hostname");

        for bad in ["a$(id)", "a`id`", "a|b", "a&&b", "a\nb", "a b", "a>b"] {
            assert_eq!(
                hostname(bad).unwrap_err().reason,
                RejectionReason::UnsafeCharacters,
                "{bad:?} should be unsafe"
            );
        }
    }

    #[test]
    fn hostnames_follow_rfc_shape() {
        assert_eq!(hostname("Pod-100").unwrap(), "pod-100");
        assert_eq!(hostname("www.example.test").unwrap(), "www.example.test");
        assert_eq!(
            hostname("-leading").unwrap_err().reason,
            RejectionReason::InvalidFormat
        );
        assert_eq!(
            hostname("a..b").unwrap_err().reason,
            RejectionReason::InvalidFormat
        );
        assert!(hostname(&"a".repeat(64)).is_err());
        assert!(hostname("").is_err());
    }

    #[test]
    fn domains_need_a_tld() {
        assert_eq!(domain("Example.Test.").unwrap(), "example.test");
        assert_eq!(domain("localhost").unwrap_err().reason, RejectionReason::InvalidFormat);
        assert_eq!(domain("example.123").unwrap_err().reason, RejectionReason::InvalidFormat);
        assert_eq!(
            domain("example.test;reboot").unwrap_err().reason,
            RejectionReason::UnsafeCharacters
        );
    }

    #[test]
    fn instance_ids_are_bounded_digits() {
        assert_eq!(instance_id("106", 100, 999_999_999).unwrap(), 106);
        assert_eq!(
            instance_id("99", 100, 999_999_999).unwrap_err().reason,
            RejectionReason::OutOfRange
        );
        assert_eq!(
            instance_id("1e3", 100, 999_999_999).unwrap_err().reason,
            RejectionReason::InvalidFormat
        );
        assert_eq!(
            instance_id("-5", 100, 999_999_999).unwrap_err().reason,
            RejectionReason::InvalidFormat
        );
        assert_eq!(
            instance_id("9999999999", 100, 999_999_999).unwrap_err().reason,
            RejectionReason::OutOfRange
        );
    }

    #[test]
    fn ipv4_must_be_dotted_quad() {
        assert_eq!(ipv4("10.0.0.5").unwrap(), Ipv4Addr::new(10, 0, 0, 5));
        assert_eq!(ipv4("10.0.0").unwrap_err().reason, RejectionReason::InvalidFormat);
        assert_eq!(ipv4("10.0.0.256").unwrap_err().reason, RejectionReason::OutOfRange);
        assert_eq!(ipv4("::1").unwrap_err().reason, RejectionReason::InvalidFormat);
    }

    #[test]
    fn ids_and_codes() {
        assert!(pod_id(&Uuid::new_v4().to_string()).is_ok());
        assert_eq!(pod_id("not-a-uuid").unwrap_err().reason, RejectionReason::InvalidFormat);
        assert!(tenant_id(&Uuid::new_v4().to_string()).is_ok());
        assert_eq!(plan_code("pod-basic").unwrap(), "pod-basic");
        assert_eq!(plan_code("Pod_Basic").unwrap_err().reason, RejectionReason::InvalidFormat);
        assert_eq!(storage_target("local-lvm").unwrap(), "local-lvm");
        assert_eq!(
            storage_target("../etc").unwrap_err().reason,
            RejectionReason::InvalidFormat
        );
    }
}
