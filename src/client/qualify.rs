use super::peer_session::{self, Timeouts};
use crate::data_structures::ID;
use crate::error::{Error, Result};
use futures::future::join_all;
use std::net::SocketAddr;
use tracing::{debug, instrument, warn};

/// Keeps the candidates that answer the probe and then accept a handshake
/// for `content_id`, in their original order. The availability check on the
/// handshaken connection confirms the peer is serving pieces for it.
#[instrument(skip_all, fields(%content_id, candidates = candidates.len()))]
pub async fn qualify_peers(
    candidates: &[SocketAddr],
    content_id: &ID,
    timeouts: &Timeouts,
) -> Result<Vec<SocketAddr>> {
    let checks = candidates.iter().map(|addr| async move {
        peer_session::probe(*addr, timeouts.probe).await?;
        let mut session = peer_session::open(*addr, content_id, timeouts.handshake).await?;
        session.check_pieces_within(timeouts.handshake).await?;
        Ok::<_, Error>(*addr)
    });

    let mut qualified = Vec::with_capacity(candidates.len());

    for (addr, outcome) in candidates.iter().zip(join_all(checks).await) {
        match outcome {
            Ok(addr) => qualified.push(addr),
            Err(e) => warn!(%addr, ?e, "peer dropped"),
        }
    }

    if qualified.is_empty() {
        return Err(Error::NoPeersAvailable);
    }

    debug!(?qualified);

    Ok(qualified)
}

#[cfg(test)]
mod tests {
    use super::qualify_peers;
    use crate::client::peer_session::Timeouts;
    use crate::data_structures::ID;
    use crate::error::Error;
    use crate::protocol::{Request, Response};
    use crate::test_util::{random_file, scratch_dir, scripted_peer, seeding_server};
    use std::net::SocketAddr;
    use std::time::Duration;
    use tokio::fs::remove_dir_all;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    fn short_timeouts() -> Timeouts {
        Timeouts {
            probe: Duration::from_millis(500),
            handshake: Duration::from_millis(500),
            piece_transfer: Duration::from_secs(2),
        }
    }

    async fn dead_addr() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    #[tokio::test]
    async fn keeps_only_working_peers() {
        let dir = scratch_dir("qualify_mixed").await;
        let (path, _) = random_file(&dir, "file.bin", 500).await;
        let seeder = seeding_server(&dir, &path, 128).await;

        let other_dir = scratch_dir("qualify_mixed_other").await;
        let (other_path, _) = random_file(&other_dir, "other.bin", 500).await;
        let other = seeding_server(&other_dir, &other_path, 128).await;

        let candidates = [dead_addr().await, other.addr, seeder.addr];
        let qualified = qualify_peers(&candidates, &seeder.content_id, &short_timeouts())
            .await
            .unwrap();

        assert_eq!(vec![seeder.addr], qualified);

        seeder.stop().await;
        other.stop().await;
        remove_dir_all(dir).await.unwrap();
        remove_dir_all(other_dir).await.unwrap();
    }

    #[tokio::test]
    async fn no_peers_left() {
        let candidates = [dead_addr().await, dead_addr().await];

        assert!(matches!(
            qualify_peers(&candidates, &ID::digest(b"x"), &short_timeouts()).await,
            Err(Error::NoPeersAvailable)
        ));
        assert!(matches!(
            qualify_peers(&[], &ID::digest(b"x"), &short_timeouts()).await,
            Err(Error::NoPeersAvailable)
        ));
    }

    // answers the probe and the handshake, then never confirms it has pieces
    async fn stalls_after_handshake() -> SocketAddr {
        scripted_peer(|request| match request {
            Request::Probe | Request::Handshake(_) => Some(Response::Ok.into_bytes()),
            _ => None,
        })
        .await
    }

    #[tokio::test]
    async fn peer_silent_on_availability_check() {
        let dir = scratch_dir("qualify_silent_check").await;
        let (path, _) = random_file(&dir, "file.bin", 500).await;
        let seeder = seeding_server(&dir, &path, 128).await;

        let timeouts = Timeouts {
            probe: Duration::from_millis(200),
            handshake: Duration::from_millis(200),
            piece_transfer: Duration::from_millis(200),
        };
        let stalling = stalls_after_handshake().await;

        let qualified = timeout(
            Duration::from_secs(3),
            qualify_peers(&[stalling, seeder.addr], &seeder.content_id, &timeouts),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(vec![seeder.addr], qualified);

        assert!(matches!(
            timeout(
                Duration::from_secs(3),
                qualify_peers(&[stalling], &seeder.content_id, &timeouts),
            )
            .await
            .unwrap(),
            Err(Error::NoPeersAvailable)
        ));

        seeder.stop().await;
        remove_dir_all(dir).await.unwrap();
    }
}
