use crate::events::{ClientEvent, ServerEvent};
use crate::hub::Hub;
use rocket::futures::{Sink, SinkExt, StreamExt};
use rocket_ws as ws;
use std::sync::Arc;

/// Per-client duplex loop bridging a WebSocket to the hub. Joins the hub
/// on entry, then multiplexes inbound client events (→ dispatch) with
/// delivery-queue events (→ transport) until the socket errors, the
/// client closes, or the queue is closed by a forced disconnect. The hub
/// is always left on exit.
pub async fn run(
    stream: ws::stream::DuplexStream,
    hub: Arc<Hub>,
    user_id: String,
) -> ws::result::Result<()> {
    let mut queue = hub.join(&user_id);
    let (mut sink, mut source) = stream.split();

    loop {
        tokio::select! {
            frame = source.next() => {
                match frame {
                    Some(Ok(ws::Message::Text(text))) => {
                        let reply = handle_frame(&hub, &user_id, &text);
                        if let Some(event) = reply
                            && send_event(&mut sink, &event).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(ws::Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // ping/pong and binary frames are ignored
                    Some(Err(_)) => break,
                }
            }
            event = queue.recv() => {
                match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            break;
                        }
                    }
                    // Queue closed: the hub displaced or disconnected us.
                    None => break,
                }
            }
        }
    }

    hub.leave(&user_id);
    let _ = sink.close().await;
    Ok(())
}

/// Parse and dispatch one inbound frame. A malformed frame or a rejected
/// event yields an error reply for this client only.
fn handle_frame(hub: &Hub, user_id: &str, text: &str) -> Option<ServerEvent> {
    match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => match hub.dispatch(user_id, event) {
            Ok(()) => None,
            Err(e) => Some(ServerEvent::Error {
                message: e.to_string(),
            }),
        },
        Err(_) => Some(ServerEvent::Error {
            message: "Malformed event".to_string(),
        }),
    }
}

async fn send_event(
    sink: &mut (impl Sink<ws::Message, Error = ws::result::Error> + Unpin),
    event: &ServerEvent,
) -> Result<(), ws::result::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sink.send(ws::Message::Text(text)).await
}
