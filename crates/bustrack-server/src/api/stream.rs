//! WebSocket binding of the distribution hub
//!
//! `GET /bus/stream?type=driver|client&token=..&busId=..&experimental=..&experimentalId=..`
//!
//! The socket is upgraded first; a rejected handshake is reported with an
//! `error` frame followed by a policy close. Every server message is sent as
//! one JSON text frame.

use std::future::Future;
use std::time::Duration;

use actix_web::{HttpRequest, HttpResponse, Scope, get, web};
use actix_ws::{CloseCode, CloseReason, Message, MessageStream, Session};
use bustrack_core::{
    DistributionHub, Handshake, HubError, ServerMessage, SessionEnd, SessionQuery,
    TransportError,
};
use futures::{Stream, stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::AppState;

/// How long frames queued by a finished session may take to reach the peer
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);
/// Upper bound for writing the final error and close frames
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[get("/stream")]
async fn bus_stream(
    req: HttpRequest,
    body: web::Payload,
    query: web::Query<SessionQuery>,
    data: web::Data<AppState>,
) -> actix_web::Result<HttpResponse> {
    let (response, session, messages) = actix_ws::handle(&req, body)?;

    let peer = req.peer_addr().map(|addr| addr.to_string());
    let handshake = query
        .into_inner()
        .into_handshake(peer, data.configuration.hub_experimental());

    actix_web::rt::spawn(serve(data.hub.clone(), handshake, session, messages));

    Ok(response)
}

async fn serve(
    hub: DistributionHub,
    handshake: Result<Handshake, HubError>,
    session: Session,
    messages: MessageStream,
) {
    let (outbound, pending) = mpsc::channel(hub.config().outbound_buffer);
    let inbound = inbound_frames(messages, session.clone());

    let outcome = match handshake {
        Ok(Handshake::Producer(handshake)) => match hub.connect_producer(handshake).await {
            Ok(producer) => {
                info!(
                    session_id = producer.session_id(),
                    bus_id = producer.bus().id,
                    "Producer stream attached"
                );
                attach(producer.run(inbound, outbound), &session, pending).await
            }
            Err(e) => Err(e),
        },
        Ok(Handshake::Consumer(handshake)) => {
            let consumer = hub.connect_consumer(handshake);
            info!(session_id = consumer.session_id(), "Consumer stream attached");
            attach(consumer.run(inbound, outbound), &session, pending).await
        }
        Err(e) => Err(e),
    };

    close(session, outcome).await;
}

/// Drive a hub session while a separate task writes its outbound queue to
/// the socket
async fn attach<F>(
    run: F,
    session: &Session,
    pending: mpsc::Receiver<ServerMessage>,
) -> Result<SessionEnd, HubError>
where
    F: Future<Output = Result<SessionEnd, HubError>>,
{
    let pump = actix_web::rt::spawn(pump(session.clone(), pending));
    let outcome = run.await;
    settle_outbound(pump, &outcome, DRAIN_TIMEOUT).await;
    outcome
}

/// Wait up to `drain` for the pump to flush what the finished session queued,
/// then stop it. A slow consumer's pump is blocked on the peer and is stopped
/// right away.
async fn settle_outbound(
    mut pump: JoinHandle<()>,
    outcome: &Result<SessionEnd, HubError>,
    drain: Duration,
) {
    if !matches!(outcome, Err(HubError::SlowConsumer)) {
        if tokio::time::timeout(drain, &mut pump).await.is_ok() {
            return;
        }
        warn!(drain_ms = drain.as_millis() as u64, "Outbound frames not drained in time");
    }
    pump.abort();
}

/// Adapt the socket into a stream of text frames. Pings are answered here;
/// a close frame ends the stream.
fn inbound_frames(
    messages: MessageStream,
    session: Session,
) -> impl Stream<Item = Result<String, TransportError>> + Unpin {
    Box::pin(stream::unfold(
        (messages, session),
        |(mut messages, mut session)| async move {
            loop {
                let frame = match messages.recv().await? {
                    Ok(Message::Text(text)) => Ok(text.to_string()),
                    // Binary frames are treated as text and fail validation if
                    // they are not a location update
                    Ok(Message::Binary(bytes)) => {
                        Ok(String::from_utf8_lossy(&bytes).into_owned())
                    }
                    Ok(Message::Ping(bytes)) => {
                        if session.pong(&bytes).await.is_err() {
                            return None;
                        }
                        continue;
                    }
                    Ok(Message::Close(reason)) => {
                        debug!(reason = ?reason, "Peer closed the stream");
                        return None;
                    }
                    Ok(Message::Continuation(_)) => {
                        debug!("Ignoring continuation frame");
                        continue;
                    }
                    Ok(Message::Pong(_)) | Ok(Message::Nop) => continue,
                    Err(e) => Err(TransportError::Protocol(e.to_string())),
                };

                return Some((frame, (messages, session)));
            }
        },
    ))
}

/// Forward queued server messages to the socket until the session side
/// drops its sender or the peer goes away
async fn pump(mut session: Session, mut pending: mpsc::Receiver<ServerMessage>) {
    while let Some(message) = pending.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to encode server message");
                continue;
            }
        };

        if session.text(text).await.is_err() {
            debug!("Peer went away, stopping outbound pump");
            break;
        }
    }
}

async fn close(mut session: Session, outcome: Result<SessionEnd, HubError>) {
    match &outcome {
        Ok(end) => debug!(end = ?end, "Stream finished"),
        Err(e) if e.is_rejection() => {
            warn!(error = %e, "Stream rejected");
            if let Some(frame) = error_frame(e)
                && tokio::time::timeout(CLOSE_TIMEOUT, session.text(frame)).await.is_err()
            {
                debug!("Peer not reading, rejection frame dropped");
            }
        }
        Err(e) => warn!(error = %e, "Stream ended with error"),
    }

    if tokio::time::timeout(CLOSE_TIMEOUT, session.close(close_reason(&outcome)))
        .await
        .is_err()
    {
        debug!("Peer not reading, close frame dropped");
    }
}

fn error_frame(err: &HubError) -> Option<String> {
    serde_json::to_string(&ServerMessage::from_hub_error(err)).ok()
}

/// WebSocket close frame for a finished session
pub fn close_reason(outcome: &Result<SessionEnd, HubError>) -> Option<CloseReason> {
    let (code, description) = match outcome {
        Ok(SessionEnd::IdleTimeout) => (CloseCode::Policy, Some("idle timeout".to_string())),
        Ok(SessionEnd::Shutdown) => (CloseCode::Away, Some("server shutting down".to_string())),
        Ok(_) => (CloseCode::Normal, None),
        Err(e @ HubError::Store(_)) => {
            (CloseCode::Error, Some(e.error_code().message.to_string()))
        }
        Err(HubError::Transport(_)) => (CloseCode::Protocol, None),
        Err(e) => (CloseCode::Policy, Some(e.error_code().message.to_string())),
    };

    Some(CloseReason { code, description })
}

pub fn routes() -> Scope {
    web::scope("/bus").service(bus_stream)
}

#[cfg(test)]
mod tests {
    use bustrack_common::BusKey;
    use bustrack_core::BusFilter;

    use super::*;

    #[test]
    fn test_query_parsing() {
        let query = web::Query::<SessionQuery>::from_query(
            "type=driver&token=abc&busId=12&experimental=true",
        )
        .unwrap()
        .into_inner();

        match query.into_handshake(None, false).unwrap() {
            Handshake::Producer(handshake) => {
                assert_eq!(handshake.bus, BusKey::Id(12));
                assert_eq!(handshake.credential, "abc");
            }
            other => panic!("expected producer handshake, got {:?}", other),
        }

        let query = web::Query::<SessionQuery>::from_query("experimentalId=sim-1")
            .unwrap()
            .into_inner();
        match query.into_handshake(None, true).unwrap() {
            Handshake::Consumer(handshake) => {
                assert_eq!(handshake.filter, BusFilter::All);
                assert!(handshake.experimental);
                assert_eq!(
                    handshake.experimental_id,
                    Some(BusKey::Username("sim-1".to_string()))
                );
            }
            other => panic!("expected consumer handshake, got {:?}", other),
        }
    }

    #[test]
    fn test_close_reasons() {
        let normal = close_reason(&Ok(SessionEnd::PeerClosed)).unwrap();
        assert_eq!(normal.code, CloseCode::Normal);

        let idle = close_reason(&Ok(SessionEnd::IdleTimeout)).unwrap();
        assert_eq!(idle.code, CloseCode::Policy);

        let rejected = close_reason(&Err(HubError::Unauthorized(BusKey::Id(1)))).unwrap();
        assert_eq!(rejected.code, CloseCode::Policy);
        assert_eq!(rejected.description.as_deref(), Some("access denied"));

        let store = close_reason(&Err(HubError::Store(anyhow::anyhow!("down")))).unwrap();
        assert_eq!(store.code, CloseCode::Error);

        let slow = close_reason(&Err(HubError::SlowConsumer)).unwrap();
        assert_eq!(slow.code, CloseCode::Policy);

        let shutdown = close_reason(&Ok(SessionEnd::Shutdown)).unwrap();
        assert_eq!(shutdown.code, CloseCode::Away);
    }

    #[tokio::test]
    async fn test_blocked_pump_is_stopped_for_slow_consumer() {
        let (alive, gone) = tokio::sync::oneshot::channel::<()>();
        let pump = tokio::spawn(async move {
            let _alive = alive;
            std::future::pending::<()>().await;
        });

        tokio::time::timeout(
            Duration::from_millis(200),
            settle_outbound(pump, &Err(HubError::SlowConsumer), Duration::from_secs(60)),
        )
        .await
        .expect("slow consumer teardown waited on the pump");

        // The aborted task dropped its end of the channel
        assert!(gone.await.is_err());
    }

    #[tokio::test]
    async fn test_pump_is_drained_after_normal_end() {
        let (done, flushed) = tokio::sync::oneshot::channel();
        let pump = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let _ = done.send(());
        });

        settle_outbound(pump, &Ok(SessionEnd::PeerClosed), Duration::from_secs(5)).await;
        assert!(flushed.await.is_ok());
    }

    #[tokio::test]
    async fn test_stuck_pump_is_abandoned_after_drain_timeout() {
        let pump = tokio::spawn(std::future::pending::<()>());

        tokio::time::timeout(
            Duration::from_secs(1),
            settle_outbound(pump, &Ok(SessionEnd::IdleTimeout), Duration::from_millis(20)),
        )
        .await
        .unwrap();
    }

    #[test]
    fn test_error_frame() {
        let unknown = HubError::UnknownBus(BusKey::Username("B9".to_string()));
        let frame = error_frame(&unknown).unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], 21003);
        assert_eq!(json["message"], "bus 'B9' not found");
    }
}
