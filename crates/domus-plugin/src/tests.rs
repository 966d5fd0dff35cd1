use std::io;

use super::*;

#[derive(Debug)]
enum Message {
    Echo(ResultSender<String, io::Error>, String),
    Fail(ResultSender<(), io::Error>),
}

fn spawn_echo_loop() -> MessageSender<Message> {
    let (message_tx, mut message_rx) = message_channel();
    tokio::spawn(async move {
        while let Some(message) = message_rx.recv().await {
            match message {
                Message::Echo(reply_tx, text) => send_reply(reply_tx, Ok::<_, io::Error>(text)),
                Message::Fail(reply_tx) => {
                    send_reply(
                        reply_tx,
                        Err::<(), _>(io::Error::new(io::ErrorKind::Other, "failed")),
                    );
                }
            }
        }
    });
    message_tx
}

#[tokio::test]
async fn receive_result_from_message_loop() -> anyhow::Result<()> {
    let message_tx = spawn_echo_loop();

    let (reply_tx, reply_rx) = reply_channel();
    let echo = send_message_receive_result(
        Message::Echo(reply_tx, "hello".to_owned()),
        &message_tx,
        reply_rx,
    )
    .await?;
    assert_eq!("hello", echo);

    let (reply_tx, reply_rx) = reply_channel();
    let result = send_message_receive_result(Message::Fail(reply_tx), &message_tx, reply_rx).await;
    assert!(matches!(result, Err(PluginError::Internal(_))));
    Ok(())
}

#[tokio::test]
async fn communication_error_after_message_loop_exited() {
    let (message_tx, message_rx) = message_channel::<Message>();
    drop(message_rx);
    let (reply_tx, reply_rx) = reply_channel();
    let result = send_message_receive_result(
        Message::Echo(reply_tx, "hello".to_owned()),
        &message_tx,
        reply_rx,
    )
    .await;
    assert!(matches!(result, Err(PluginError::<io::Error>::Communication)));
}

#[tokio::test]
async fn communication_error_if_reply_has_been_dropped() {
    let (reply_tx, reply_rx) = reply_channel::<Result<(), io::Error>>();
    drop(reply_tx);
    let result = receive_result(reply_rx).await;
    assert!(matches!(result, Err(PluginError::Communication)));
}

#[tokio::test]
async fn publish_events_to_all_subscribers() -> anyhow::Result<()> {
    let publisher_index = EventPublisherIndex::from_value(7);
    let (event_pubsub, event_subscriber) = EventPubSub::<u32>::new(publisher_index, 8);
    let mut first_rx = event_subscriber.subscribe();
    let mut second_rx = event_subscriber.subscribe();

    event_pubsub.publish_event(1);
    event_pubsub.publish_event(2);

    for event_rx in [&mut first_rx, &mut second_rx] {
        let first = event_rx.recv().await?;
        assert_eq!(publisher_index, first.published.who);
        assert_eq!(1, first.payload);
        let second = event_rx.recv().await?;
        assert_eq!(2, second.payload);
        assert!(first.published.when <= second.published.when);
    }
    Ok(())
}

#[test]
fn publish_without_subscribers() {
    let (event_pubsub, event_subscriber) =
        EventPubSub::<&'static str>::new(EventPublisherIndex::from_value(0), 1);
    drop(event_subscriber);
    // Must not fail
    event_pubsub.publish_event("nobody is listening");
}
