mod testsupport;

use std::time::Duration;

use bytes::Bytes;
use franz::prelude::{
    ClientConfig, DeliveryReport, Error, Header, KafkaCode, Offset, PartitionId, ProducerBuilder,
    ProducerRecord,
};
use testsupport::MockProducerTransport;

const TOPIC: &str = "audit";

fn record(value: &'static str) -> ProducerRecord {
    ProducerRecord::to(TOPIC).value(Bytes::from_static(value.as_bytes()))
}

#[tokio::test]
async fn it_reports_the_partition_and_offset_picked_by_the_broker() -> Result<(), Box<Error>> {
    testsupport::init_tracing();
    let transport = MockProducerTransport::new()
        .default_partition(3)
        .start_offset(100);
    let producer = ProducerBuilder::new(transport.clone())
        .linger_ms(1)
        .max_batch_size(2)
        .build()
        .await;

    let sent = record("login").key(Bytes::from_static(b"user-1"));
    let report = producer.send(sent.clone()).await;

    assert_eq!(
        report,
        DeliveryReport::Success {
            record: sent,
            partition: PartitionId::new(3)?,
            offset: Offset::new(100)?
        }
    );
    assert_eq!(transport.produced().len(), 1);
    assert_eq!(producer.close(Duration::from_secs(1)).await, 0);

    Ok(())
}

#[tokio::test]
async fn it_resolves_reports_of_a_partition_in_send_order() -> Result<(), Box<Error>> {
    let producer = ProducerBuilder::new(MockProducerTransport::new())
        .linger_ms(5)
        .max_batch_size(3)
        .build()
        .await;

    let mut futures = vec![];
    for i in 0..10 {
        futures.push(
            producer.send(
                ProducerRecord::to(TOPIC)
                    .partition(PartitionId::new(i % 2)?)
                    .value(Bytes::from(format!("event-{i}"))),
            ),
        );
    }

    let mut offsets = vec![vec![], vec![]];
    for report in futures::future::join_all(futures).await {
        match report {
            DeliveryReport::Success {
                partition, offset, ..
            } => offsets[partition.id() as usize].push(offset.value()),
            report => panic!("unexpected report {report:?}"),
        }
    }
    assert_eq!(offsets, vec![vec![0, 1, 2, 3, 4], vec![0, 1, 2, 3, 4]]);

    producer.flush(Duration::from_secs(1)).await?;
    assert_eq!(producer.in_flight(), 0);

    Ok(())
}

#[tokio::test]
async fn it_hands_back_rejected_records() {
    let producer = ProducerBuilder::new(MockProducerTransport::new().reject_topic(TOPIC))
        .build()
        .await;

    let sent = record("too big").header(Header::new("trace-id", "abc"));
    assert_eq!(
        producer.send(sent.clone()).await,
        DeliveryReport::Failure {
            record: sent,
            error: Error::DeliveryFailure(KafkaCode::MessageSizeTooLarge)
        }
    );
}

#[tokio::test]
async fn it_reports_a_full_queue_without_a_record() {
    let producer = ProducerBuilder::new(
        MockProducerTransport::new().delay(Duration::from_millis(50)),
    )
    .queue_max_messages(1)
    .max_batch_size(1)
    .build()
    .await;

    // No await between sends, so the worker cannot drain the queue.
    let accepted = producer.send(record("first"));
    let rejected = producer.send(record("second"));

    assert_eq!(
        rejected.await,
        DeliveryReport::NoMessageError(Error::QueueFull)
    );
    assert!(accepted.await.is_success());
}

#[tokio::test]
async fn it_fails_pending_sends_when_closed_without_waiting() {
    let producer = ProducerBuilder::new(
        MockProducerTransport::new().delay(Duration::from_secs(3600)),
    )
    .max_batch_size(1)
    .build()
    .await;

    let pending: Vec<_> = ["a", "b", "c"]
        .into_iter()
        .map(|value| producer.send(record(value)))
        .collect();
    assert_eq!(producer.in_flight(), 3);

    let closed = tokio::time::timeout(Duration::from_secs(1), producer.close(Duration::ZERO))
        .await
        .expect("close must not block");
    assert_eq!(closed, 3);

    for report in futures::future::join_all(pending).await {
        assert!(matches!(
            report,
            DeliveryReport::Failure {
                error: Error::ProducerClosed,
                ..
            }
        ));
    }

    // Sends after close fail right away.
    assert!(matches!(
        producer.send(record("late")).await,
        DeliveryReport::Failure {
            error: Error::ProducerClosed,
            ..
        }
    ));
}

#[tokio::test]
async fn it_times_out_flushing_slow_sends() {
    let producer = ProducerBuilder::new(
        MockProducerTransport::new().delay(Duration::from_secs(3600)),
    )
    .build()
    .await;

    let _pending = producer.send(record("slow"));
    assert_eq!(
        producer.flush(Duration::from_millis(20)).await,
        Err(Error::FlushTimeout(Duration::from_millis(20)))
    );
}

#[tokio::test]
async fn it_builds_from_client_config() -> Result<(), Box<Error>> {
    let config: ClientConfig = [
        ("client.id", "auditor"),
        ("queue.buffering.max.messages", "10"),
        ("batch.num.messages", "4"),
        ("linger.ms", "0"),
    ]
    .into_iter()
    .collect();

    let producer = ProducerBuilder::from_config(MockProducerTransport::new(), &config)?
        .build()
        .await;
    assert!(producer.send(record("configured")).await.is_success());

    Ok(())
}
