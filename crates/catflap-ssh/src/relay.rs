use bytes::BytesMut;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

/// Relay bytes between an accepted local socket and a forwarded channel.
///
/// The channel-open handshake is asynchronous, so bytes arriving on the
/// local side before `channel` resolves are held in order and flushed, in
/// order, once it does. Either side closing tears the relay down.
pub async fn run_relay<L, C, F>(
    mut local: L,
    channel: F,
    cancel: CancellationToken,
) -> std::io::Result<()>
where
    L: AsyncRead + AsyncWrite + Unpin,
    C: AsyncRead + AsyncWrite + Unpin,
    F: Future<Output = std::io::Result<C>>,
{
    let mut pending = BytesMut::new();
    let mut buf = [0u8; 8192];
    let mut local_eof = false;
    tokio::pin!(channel);

    let mut remote = loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            res = &mut channel => break res?,
            read = local.read(&mut buf), if !local_eof => {
                let n = read?;
                if n == 0 {
                    local_eof = true;
                } else {
                    pending.extend_from_slice(&buf[..n]);
                }
            }
        }
    };

    if !pending.is_empty() {
        remote.write_all(&pending).await?;
        remote.flush().await?;
    }

    if local_eof {
        let _ = remote.shutdown().await;
        return Ok(());
    }

    tokio::select! {
        _ = cancel.cancelled() => {}
        res = tokio::io::copy_bidirectional(&mut local, &mut remote) => {
            res?;
        }
    }

    let _ = remote.shutdown().await;
    let _ = local.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    fn dropped() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::Other, "channel open aborted")
    }

    #[tokio::test]
    async fn bytes_written_before_channel_opens_arrive_in_order() {
        let (local, mut app) = tokio::io::duplex(1024);
        let (channel_end, mut far) = tokio::io::duplex(1024);
        let (open_tx, open_rx) = oneshot::channel::<()>();
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run_relay(
            local,
            async move {
                open_rx.await.map_err(|_| dropped())?;
                Ok(channel_end)
            },
            cancel.clone(),
        ));

        app.write_all(b"first ").await.unwrap();
        app.write_all(b"second ").await.unwrap();
        tokio::task::yield_now().await;

        open_tx.send(()).unwrap();
        app.write_all(b"third").await.unwrap();

        let mut got = vec![0u8; "first second third".len()];
        far.read_exact(&mut got).await.unwrap();
        assert_eq!(got, b"first second third");

        drop(app);
        drop(far);
        let _ = relay.await.unwrap();
    }

    #[tokio::test]
    async fn local_close_before_channel_still_flushes() {
        let (local, mut app) = tokio::io::duplex(1024);
        let (channel_end, mut far) = tokio::io::duplex(1024);
        let (open_tx, open_rx) = oneshot::channel::<()>();
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run_relay(
            local,
            async move {
                open_rx.await.map_err(|_| dropped())?;
                Ok(channel_end)
            },
            cancel,
        ));

        app.write_all(b"parting words").await.unwrap();
        app.shutdown().await.unwrap();
        drop(app);
        tokio::task::yield_now().await;
        open_tx.send(()).unwrap();

        let mut got = Vec::new();
        far.read_to_end(&mut got).await.unwrap();
        assert_eq!(got, b"parting words");
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn cancellation_stops_a_waiting_relay() {
        let (local, _app) = tokio::io::duplex(1024);
        let (_never_tx, never_rx) = oneshot::channel::<()>();
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run_relay(
            local,
            async move {
                never_rx.await.map_err(|_| dropped())?;
                Ok(tokio::io::duplex(8).0)
            },
            cancel.clone(),
        ));

        cancel.cancel();
        relay.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn relays_bidirectionally_after_open() {
        let (local, mut app) = tokio::io::duplex(1024);
        let (channel_end, mut far) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run_relay(
            local,
            async move { Ok(channel_end) },
            cancel.clone(),
        ));

        app.write_all(b"ping").await.unwrap();
        let mut got = [0u8; 4];
        far.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"ping");

        far.write_all(b"pong").await.unwrap();
        app.read_exact(&mut got).await.unwrap();
        assert_eq!(&got, b"pong");

        drop(app);
        drop(far);
        let _ = relay.await.unwrap();
    }
}
