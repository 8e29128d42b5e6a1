use cornerstone_domain::ports::BoxFuture;
use cornerstone_domain::ports::log::{Checkpoint, LogError, LogMessage, MessageSource};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::{Offset, TopicPartitionList};

use crate::config::AppConfig;

/// One consumer-group subscription to a single CDC topic.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaSource {
    pub fn subscribe(config: &AppConfig, topic: &str) -> Result<Self, LogError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.kafka_brokers)
            .set("group.id", &config.kafka_group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "latest")
            .set("session.timeout.ms", "10000")
            .create()
            .map_err(|err| LogError::Unavailable(format!("consumer for {topic}: {err}")))?;
        consumer
            .subscribe(&[topic])
            .map_err(|err| LogError::Unavailable(format!("subscribe {topic}: {err}")))?;
        tracing::info!(topic, group = %config.kafka_group_id, "subscribed");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }
}

/// Kafka commits name the next offset to read, one past the last processed.
fn commit_list(topic: &str, checkpoints: &[Checkpoint]) -> Result<TopicPartitionList, LogError> {
    let mut list = TopicPartitionList::new();
    for checkpoint in checkpoints {
        list.add_partition_offset(topic, checkpoint.partition, Offset::Offset(checkpoint.offset + 1))
            .map_err(|err| LogError::Commit(err.to_string()))?;
    }
    Ok(list)
}

impl MessageSource for KafkaSource {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn next_message(&mut self) -> BoxFuture<'_, Result<Option<LogMessage>, LogError>> {
        Box::pin(async move {
            let message = self
                .consumer
                .recv()
                .await
                .map_err(|err| LogError::Unavailable(err.to_string()))?;
            Ok(Some(LogMessage {
                topic: message.topic().to_string(),
                partition: message.partition(),
                offset: message.offset(),
                key: message
                    .key()
                    .map(|key| String::from_utf8_lossy(key).into_owned()),
                payload: message.payload().unwrap_or_default().to_vec(),
            }))
        })
    }

    fn commit(&mut self, checkpoints: Vec<Checkpoint>) -> BoxFuture<'_, Result<(), LogError>> {
        Box::pin(async move {
            if checkpoints.is_empty() {
                return Ok(());
            }
            let list = commit_list(&self.topic, &checkpoints)?;
            self.consumer
                .commit(&list, CommitMode::Async)
                .map_err(|err| LogError::Commit(err.to_string()))
        })
    }
}
