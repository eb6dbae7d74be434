//! Process setup around hardware access: detaching and dropping root.

use crate::{Error, Result};
use std::ffi::CString;
use tracing::{info, warn};

/// Account used when no user or group is configured.
const DEFAULT_ACCOUNT: &str = "daemon";

/// Detaches the process from the terminal, keeping the working directory.
///
/// A failure is logged and the process continues in the foreground.
pub fn daemonize() {
    if unsafe { libc::daemon(1, 0) } != 0 {
        warn!(
            "Failed to become daemon: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Switches to an unprivileged user and group.
///
/// Names are resolved through the user database unless they are numeric
/// ids. Does nothing when the process is not running as root.
pub fn drop_privileges(user: &str, group: &str) -> Result<()> {
    if unsafe { libc::geteuid() } != 0 {
        return Ok(());
    }

    let user = if user.is_empty() { DEFAULT_ACCOUNT } else { user };
    let group = if group.is_empty() { DEFAULT_ACCOUNT } else { group };

    let gid = lookup_gid(group)?;
    if unsafe { libc::setresgid(gid, gid, gid) } != 0 {
        return Err(Error::Privileges(format!(
            "setresgid({}): {}",
            gid,
            std::io::Error::last_os_error()
        )));
    }

    let uid = lookup_uid(user)?;
    if unsafe { libc::setresuid(uid, uid, uid) } != 0 {
        return Err(Error::Privileges(format!(
            "setresuid({}): {}",
            uid,
            std::io::Error::last_os_error()
        )));
    }

    info!("Dropped privileges to {}:{}", user, group);
    Ok(())
}

fn lookup_gid(group: &str) -> Result<libc::gid_t> {
    if let Some(gid) = parse_id(group) {
        return Ok(gid);
    }
    let name = c_name(group)?;
    let entry = unsafe { libc::getgrnam(name.as_ptr()) };
    if entry.is_null() {
        return Err(Error::Privileges(format!("unknown group '{}'", group)));
    }
    Ok(unsafe { (*entry).gr_gid })
}

fn lookup_uid(user: &str) -> Result<libc::uid_t> {
    if let Some(uid) = parse_id(user) {
        return Ok(uid);
    }
    let name = c_name(user)?;
    let entry = unsafe { libc::getpwnam(name.as_ptr()) };
    if entry.is_null() {
        return Err(Error::Privileges(format!("unknown user '{}'", user)));
    }
    Ok(unsafe { (*entry).pw_uid })
}

/// Numeric ids other than 0 are taken as-is.
fn parse_id(value: &str) -> Option<u32> {
    value.parse::<u32>().ok().filter(|&id| id != 0)
}

fn c_name(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::Privileges(format!("invalid name '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id() {
        assert_eq!(parse_id("1000"), Some(1000));
        assert_eq!(parse_id("0"), None);
        assert_eq!(parse_id("daemon"), None);
        assert_eq!(parse_id("-1"), None);
    }

    #[test]
    fn test_lookup_numeric_ids() {
        assert_eq!(lookup_uid("42").unwrap(), 42);
        assert_eq!(lookup_gid("42").unwrap(), 42);
    }

    #[test]
    fn test_lookup_rejects_embedded_nul() {
        assert!(matches!(lookup_uid("da\0emon"), Err(Error::Privileges(_))));
    }

    #[test]
    fn test_unprivileged_drop_is_noop() {
        if unsafe { libc::geteuid() } == 0 {
            return;
        }
        assert!(drop_privileges("nobody-such-user", "nobody-such-group").is_ok());
    }
}
