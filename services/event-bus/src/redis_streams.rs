// /shop-platform/services/event-bus/src/redis_streams.rs

use async_trait::async_trait;
use redis::{
    aio::ConnectionManager,
    streams::{StreamId, StreamReadOptions, StreamReadReply},
    AsyncCommands, Client,
};
use std::{collections::HashMap, time::Duration};

use crate::{
    error::BusError,
    partition::partition_for_key,
    transport::{BusRecord, EventConsumer, EventProducer},
};

const MAX_BLOCK: Duration = Duration::from_millis(250);

/// Deliveries of one pending entry before it is parked
pub const MAX_PENDING_DELIVERIES: u32 = 10;

/// One Redis stream per partition: `{topic}:{partition}`
pub fn stream_name(topic: &str, partition: u32) -> String {
    format!("{}:{}", topic, partition)
}

/// Partitioned log on top of Redis Streams consumer groups
#[derive(Clone)]
pub struct RedisStreamBus {
    client: Client,
    conn: ConnectionManager,
    partitions: u32,
    publish_timeout: Duration,
}

impl RedisStreamBus {
    /// Connect to the first reachable broker in `urls`
    pub async fn connect(
        urls: &[String],
        partitions: u32,
        publish_timeout: Duration,
    ) -> Result<Self, BusError> {
        let mut last_error = String::from("no broker configured");

        for url in urls {
            let client = match Client::open(url.as_str()) {
                Ok(client) => client,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };
            match ConnectionManager::new(client.clone()).await {
                Ok(conn) => {
                    tracing::info!("✅ Connected to event bus at {}", url);
                    return Ok(Self {
                        client,
                        conn,
                        partitions: partitions.max(1),
                        publish_timeout,
                    });
                }
                Err(e) => {
                    tracing::warn!("Event bus broker {} unreachable: {}", url, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(BusError::Unavailable(last_error))
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Join `group` as `consumer_name`. `assigned` restricts the member to a
    /// subset of partitions; `None` means every partition.
    pub async fn subscribe(
        &self,
        topic: &str,
        group: &str,
        consumer_name: &str,
        assigned: Option<Vec<u32>>,
    ) -> Result<RedisStreamConsumer, BusError> {
        let partitions: Vec<u32> = assigned
            .unwrap_or_else(|| (0..self.partitions).collect())
            .into_iter()
            .filter(|p| *p < self.partitions)
            .collect();

        // Blocking reads get their own connection so publishes are not stalled
        let mut conn = ConnectionManager::new(self.client.clone()).await?;

        for partition in &partitions {
            let stream = stream_name(topic, *partition);
            let created: redis::RedisResult<()> = redis::cmd("XGROUP")
                .arg("CREATE")
                .arg(&stream)
                .arg(group)
                .arg("0")
                .arg("MKSTREAM")
                .query_async(&mut conn)
                .await;

            match created {
                Ok(()) => tracing::debug!(%stream, %group, "Consumer group created"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            %topic,
            %group,
            consumer = %consumer_name,
            partitions = ?partitions,
            "Joined stream consumer group"
        );

        Ok(RedisStreamConsumer {
            conn,
            topic: topic.to_string(),
            group: group.to_string(),
            consumer_name: consumer_name.to_string(),
            partitions,
            pending: PendingTracker::new(MAX_PENDING_DELIVERIES),
        })
    }
}

#[async_trait]
impl EventProducer for RedisStreamBus {
    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), BusError> {
        let partition = partition_for_key(key.as_bytes(), self.partitions);
        let stream = stream_name(topic, partition);
        let mut conn = self.conn.clone();

        let fields: [(&str, &[u8]); 2] = [("key", key.as_bytes()), ("value", value)];
        let added = tokio::time::timeout(
            self.publish_timeout,
            conn.xadd::<_, _, _, _, String>(&stream, "*", &fields),
        )
        .await
        .map_err(|_| BusError::Timeout(self.publish_timeout))??;

        tracing::debug!(%stream, entry_id = %added, "Record appended");
        Ok(())
    }
}

/// Redelivery bookkeeping for this member's pending entries list.
///
/// Pending entries are re-read from a per-partition cursor. An entry that has
/// been handed out `max_deliveries` times without a commit is parked: the
/// cursor moves past it so later entries flow again, and the entry stays in
/// the group's PEL for operators to inspect or claim. Counts are per process.
#[derive(Debug)]
pub struct PendingTracker {
    max_deliveries: u32,
    deliveries: HashMap<String, u32>,
    cursors: HashMap<u32, String>,
}

impl PendingTracker {
    pub fn new(max_deliveries: u32) -> Self {
        Self {
            max_deliveries: max_deliveries.max(1),
            deliveries: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    /// Id to scan the partition's pending entries after
    pub fn cursor(&self, partition: u32) -> &str {
        self.cursors.get(&partition).map(String::as_str).unwrap_or("0")
    }

    /// Count a delivery of a pending entry. `false` means the entry was parked
    /// and must not be handed out.
    pub fn admit(&mut self, partition: u32, entry_id: &str) -> bool {
        let count = self.deliveries.entry(entry_id.to_string()).or_insert(0);
        *count += 1;
        if *count <= self.max_deliveries {
            return true;
        }
        self.deliveries.remove(entry_id);
        self.cursors.insert(partition, entry_id.to_string());
        false
    }

    pub fn committed(&mut self, entry_id: &str) {
        self.deliveries.remove(entry_id);
    }
}

pub struct RedisStreamConsumer {
    conn: ConnectionManager,
    topic: String,
    group: String,
    consumer_name: String,
    partitions: Vec<u32>,
    pending: PendingTracker,
}

impl RedisStreamConsumer {
    /// Next pending entry that has not been parked
    async fn read_pending(&mut self) -> Result<Option<BusRecord>, BusError> {
        loop {
            let ids: Vec<String> = self
                .partitions
                .iter()
                .map(|p| self.pending.cursor(*p).to_string())
                .collect();
            let Some(record) = self.read(&ids, None).await? else {
                return Ok(None);
            };
            if self.pending.admit(record.partition, &record.offset) {
                return Ok(Some(record));
            }
            tracing::error!(
                topic = %self.topic,
                group = %self.group,
                partition = record.partition,
                entry_id = %record.offset,
                "Parking stream entry after {} deliveries without commit",
                MAX_PENDING_DELIVERIES
            );
        }
    }

    async fn read(&mut self, start_ids: &[String], block: Option<Duration>) -> Result<Option<BusRecord>, BusError> {
        if self.partitions.is_empty() {
            return Ok(None);
        }

        let streams: Vec<String> = self
            .partitions
            .iter()
            .map(|p| stream_name(&self.topic, *p))
            .collect();
        let ids: Vec<&str> = start_ids.iter().map(String::as_str).collect();

        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer_name)
            .count(1);
        if let Some(block) = block {
            options = options.block(block.as_millis() as usize);
        }

        let reply: Option<StreamReadReply> = self.conn.xread_options(&streams, &ids, &options).await?;
        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream in reply.keys {
            let Some(entry) = stream.ids.into_iter().next() else {
                continue;
            };
            let partition = self
                .partitions
                .iter()
                .copied()
                .find(|p| stream_name(&self.topic, *p) == stream.key)
                .ok_or_else(|| BusError::InvalidPosition(stream.key.clone()))?;
            return Ok(Some(self.to_record(partition, entry)));
        }

        Ok(None)
    }

    fn to_record(&self, partition: u32, entry: StreamId) -> BusRecord {
        BusRecord {
            topic: self.topic.clone(),
            partition,
            key: entry.get::<Vec<u8>>("key").unwrap_or_default(),
            value: entry.get::<Vec<u8>>("value").unwrap_or_default(),
            offset: entry.id,
        }
    }
}

#[async_trait]
impl EventConsumer for RedisStreamConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn group(&self) -> &str {
        &self.group
    }

    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusRecord>, BusError> {
        // Delivered but unacknowledged entries come first
        if let Some(record) = self.read_pending().await? {
            return Ok(Some(record));
        }
        let fresh = vec![">".to_string(); self.partitions.len()];
        self.read(&fresh, Some(wait.min(MAX_BLOCK))).await
    }

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError> {
        let stream = stream_name(&record.topic, record.partition);
        let _: i64 = self.conn.xack(&stream, &self.group, &[&record.offset]).await?;
        self.pending.committed(&record.offset);
        Ok(())
    }
}
