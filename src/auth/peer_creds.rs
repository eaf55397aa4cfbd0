//! Peer credential verification using SO_PEERCRED.
//!
//! Verifies that the connecting process is running as an allowed UID.

use crate::error::{AuthErrorKind, DaemonError};

/// Information about the connected peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub uid: u32,
    pub gid: u32,
    pub pid: i32,
}

/// Accept `peer` only if its UID is listed. An empty list rejects everyone.
pub fn authorize(peer: PeerInfo, allowed_uids: &[u32]) -> Result<PeerInfo, DaemonError> {
    if allowed_uids.contains(&peer.uid) {
        Ok(peer)
    } else {
        Err(DaemonError::Auth {
            kind: AuthErrorKind::UnauthorizedPeer { uid: peer.uid },
        })
    }
}

/// Read the peer's credentials from the socket and authorize them.
#[cfg(target_os = "linux")]
pub fn verify_peer<S: std::os::fd::AsFd>(
    stream: &S,
    allowed_uids: &[u32],
) -> Result<PeerInfo, DaemonError> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    let creds = getsockopt(stream, PeerCredentials).map_err(|e| DaemonError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    authorize(
        PeerInfo {
            uid: creds.uid(),
            gid: creds.gid(),
            pid: creds.pid(),
        },
        allowed_uids,
    )
}

/// Peer credentials are only read on Linux; elsewhere every peer is refused.
#[cfg(not(target_os = "linux"))]
pub fn verify_peer<S: std::os::fd::AsFd>(
    _stream: &S,
    _allowed_uids: &[u32],
) -> Result<PeerInfo, DaemonError> {
    Err(DaemonError::Socket {
        message: "Peer credential checks are only supported on Linux".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(uid: u32) -> PeerInfo {
        PeerInfo {
            uid,
            gid: uid,
            pid: 4242,
        }
    }

    #[test]
    fn test_allowed_uid() {
        assert_eq!(authorize(peer(0), &[0, 1000]).unwrap().uid, 0);
    }

    #[test]
    fn test_unlisted_uid_rejected() {
        let err = authorize(peer(1001), &[0, 1000]).unwrap_err();
        assert_eq!(err.code(), "AUTH_ERROR");
    }

    #[test]
    fn test_empty_list_fails_closed() {
        assert!(authorize(peer(0), &[]).is_err());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_verify_socketpair_peer() {
        use std::os::unix::net::UnixStream;

        let (a, _b) = UnixStream::pair().unwrap();
        let uid = nix::unistd::getuid().as_raw();

        assert_eq!(verify_peer(&a, &[uid]).unwrap().uid, uid);
        assert!(verify_peer(&a, &[uid.wrapping_add(1)]).is_err());
    }
}
