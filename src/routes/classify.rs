// Classification of kernel route-add failures

use std::fmt;

/// Why a single route could not be installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteErrorKind {
    AlreadyExists,
    NetworkUnreachable,
    NoSuchDevice,
    OperationNotPermitted,
    InvalidArgument,
    NoRouteToHost,
    Unknown,
}

/// Result of one route installation attempt.
pub type Outcome = Result<(), RouteErrorKind>;

impl RouteErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteErrorKind::AlreadyExists => "already_exists",
            RouteErrorKind::NetworkUnreachable => "network_unreachable",
            RouteErrorKind::NoSuchDevice => "no_such_device",
            RouteErrorKind::OperationNotPermitted => "operation_not_permitted",
            RouteErrorKind::InvalidArgument => "invalid_argument",
            RouteErrorKind::NoRouteToHost => "no_route_to_host",
            RouteErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RouteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// First match wins.
const PATTERNS: &[(&str, RouteErrorKind)] = &[
    ("file exists", RouteErrorKind::AlreadyExists),
    ("network is unreachable", RouteErrorKind::NetworkUnreachable),
    ("no such device", RouteErrorKind::NoSuchDevice),
    ("operation not permitted", RouteErrorKind::OperationNotPermitted),
    ("invalid argument", RouteErrorKind::InvalidArgument),
    ("no route to host", RouteErrorKind::NoRouteToHost),
];

/// Map an operating-system error to its category by its message text.
///
/// Never fails: anything unrecognised is `Unknown`.
pub fn classify(err: &dyn fmt::Display) -> RouteErrorKind {
    let message = err.to_string().to_lowercase();

    PATTERNS
        .iter()
        .find(|(needle, _)| message.contains(needle))
        .map(|(_, kind)| *kind)
        .unwrap_or(RouteErrorKind::Unknown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_classify_errno() {
        // Linux errno values as returned in netlink error replies
        let cases = [
            (17, RouteErrorKind::AlreadyExists),
            (101, RouteErrorKind::NetworkUnreachable),
            (19, RouteErrorKind::NoSuchDevice),
            (1, RouteErrorKind::OperationNotPermitted),
            (22, RouteErrorKind::InvalidArgument),
            (113, RouteErrorKind::NoRouteToHost),
            (12, RouteErrorKind::Unknown),
        ];

        for (errno, expected) in cases {
            let err = io::Error::from_raw_os_error(errno);
            assert_eq!(classify(&err), expected, "errno {}", errno);
        }
    }

    #[test]
    fn test_classify_wrapped_message() {
        let err = io::Error::other("error adding route 1.2.3.0/24: File exists (os error 17)");
        assert_eq!(classify(&err), RouteErrorKind::AlreadyExists);
    }

    #[test]
    fn test_classify_precedence() {
        let err = io::Error::other("no such device; invalid argument");
        assert_eq!(classify(&err), RouteErrorKind::NoSuchDevice);
    }

    #[test]
    fn test_classify_unrecognised() {
        assert_eq!(classify(&"something odd"), RouteErrorKind::Unknown);
        assert_eq!(classify(&""), RouteErrorKind::Unknown);
    }
}
