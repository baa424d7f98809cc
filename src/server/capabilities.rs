//! Backend capability probing.
//!
//! The "probe with different SQL" branches collapse to a capability record;
//! a variant over `{Normal, BinlogRouter, Unknown}` selects the query set
//! (`SHOW ALL SLAVES STATUS` vs `SHOW SLAVE STATUS`) rather than a class
//! hierarchy.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerType {
    #[default]
    Unknown,
    Normal,
    BinlogRouter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub basic_support: bool,
    pub gtid: bool,
    pub max_statement_time: bool,
}

/// Decode a `SELECT VERSION()` string into capability bits. MariaDB added
/// GTIDs in 10.0 and `max_statement_time` in 10.1.1.
pub fn decode_version(version: &str) -> Capabilities {
    let Some((major, minor, patch)) = parse_mariadb_version(version) else {
        return Capabilities::default();
    };

    let at_least = |maj: u32, min: u32, pat: u32| {
        (major, minor, patch) >= (maj, min, pat)
    };

    Capabilities {
        basic_support: true,
        gtid: at_least(10, 0, 0),
        max_statement_time: at_least(10, 1, 1),
    }
}

fn parse_mariadb_version(version: &str) -> Option<(u32, u32, u32)> {
    // e.g. "10.6.15-MariaDB" or "10.11.2-MariaDB-log"
    let head = version.split(|c: char| !c.is_ascii_digit() && c != '.').next()?;
    let mut parts = head.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().unwrap_or("0").parse().unwrap_or(0);
    let patch = parts.next().unwrap_or("0").parse().unwrap_or(0);
    Some((major, minor, patch))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_modern_mariadb() {
        let caps = decode_version("10.6.15-MariaDB-log");
        assert!(caps.basic_support);
        assert!(caps.gtid);
        assert!(caps.max_statement_time);
    }

    #[test]
    fn decodes_pre_gtid_mysql_like_string() {
        let caps = decode_version("5.5.62-MariaDB");
        assert!(caps.basic_support);
        assert!(!caps.gtid);
        assert!(!caps.max_statement_time);
    }

    #[test]
    fn unparseable_version_yields_default_capabilities() {
        let caps = decode_version("garbage");
        assert_eq!(caps, Capabilities::default());
    }
}
