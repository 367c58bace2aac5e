// /shop-platform/services/event-bus/src/memory.rs

use async_trait::async_trait;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};
use tokio::sync::Notify;

use crate::{
    error::BusError,
    partition::partition_for_key,
    transport::{BusRecord, EventConsumer, EventProducer},
};

// ========================= STATE =========================

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Vec<u8>,
    value: Vec<u8>,
}

#[derive(Debug, Default)]
struct GroupState {
    /// partition -> next offset to deliver
    committed: HashMap<u32, u64>,
    /// member ids in join order
    members: Vec<u64>,
}

#[derive(Debug, Default)]
struct BusState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    groups: HashMap<(String, String), GroupState>,
}

/// In-process partitioned log with consumer groups.
///
/// Behaves like a broker for a single process: records are appended to the
/// partition chosen by [`partition_for_key`], every group keeps its own
/// committed offsets, and partitions are split across the live members of a
/// group.
#[derive(Clone)]
pub struct MemoryBus {
    partitions: u32,
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
    next_member: Arc<AtomicU64>,
}

impl MemoryBus {
    pub fn new(partitions: u32) -> Self {
        Self {
            partitions: partitions.max(1),
            state: Arc::new(Mutex::new(BusState::default())),
            notify: Arc::new(Notify::new()),
            next_member: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    /// Join `group` on `topic`. Leaving happens when the consumer is dropped.
    pub fn subscribe(&self, topic: &str, group: &str) -> MemoryConsumer {
        let member_id = self.next_member.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.lock();
            state
                .groups
                .entry((topic.to_string(), group.to_string()))
                .or_default()
                .members
                .push(member_id);
        }

        tracing::debug!(%topic, %group, member_id, "Memory consumer joined group");

        MemoryConsumer {
            bus: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            member_id,
            cursor: 0,
        }
    }

    /// Total number of records ever appended to `topic`
    pub fn topic_len(&self, topic: &str) -> usize {
        self.lock()
            .topics
            .get(topic)
            .map(|parts| parts.iter().map(Vec::len).sum())
            .unwrap_or(0)
    }

    fn lock(&self) -> MutexGuard<'_, BusState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl EventProducer for MemoryBus {
    async fn publish(&self, topic: &str, key: &str, value: &[u8]) -> Result<(), BusError> {
        let partition = partition_for_key(key.as_bytes(), self.partitions);
        {
            let mut state = self.lock();
            let parts = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); self.partitions as usize]);
            parts[partition as usize].push(StoredRecord {
                key: key.as_bytes().to_vec(),
                value: value.to_vec(),
            });
        }
        self.notify.notify_waiters();
        Ok(())
    }
}

// ========================= CONSUMER =========================

pub struct MemoryConsumer {
    bus: MemoryBus,
    topic: String,
    group: String,
    member_id: u64,
    cursor: u32,
}

impl MemoryConsumer {
    fn owned_partitions(&self, group: &GroupState) -> Vec<u32> {
        let members = group.members.len().max(1) as u32;
        let index = group
            .members
            .iter()
            .position(|m| *m == self.member_id)
            .unwrap_or(0) as u32;
        (0..self.bus.partitions)
            .filter(|p| p % members == index)
            .collect()
    }

    fn try_take(&mut self) -> Option<BusRecord> {
        let state = self.bus.lock();
        let key = (self.topic.clone(), self.group.clone());
        let group = state.groups.get(&key)?;
        let parts = state.topics.get(&self.topic)?;
        let owned = self.owned_partitions(group);
        if owned.is_empty() {
            return None;
        }

        for step in 0..owned.len() {
            let partition = owned[(self.cursor as usize + step) % owned.len()];
            let offset = group.committed.get(&partition).copied().unwrap_or(0);
            if let Some(stored) = parts[partition as usize].get(offset as usize) {
                self.cursor = ((self.cursor as usize + step + 1) % owned.len()) as u32;
                return Some(BusRecord {
                    topic: self.topic.clone(),
                    partition,
                    offset: offset.to_string(),
                    key: stored.key.clone(),
                    value: stored.value.clone(),
                });
            }
        }
        None
    }
}

#[async_trait]
impl EventConsumer for MemoryConsumer {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn group(&self) -> &str {
        &self.group
    }

    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusRecord>, BusError> {
        let deadline = tokio::time::Instant::now() + wait;
        let notify = self.bus.notify.clone();

        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(record) = self.try_take() {
                return Ok(Some(record));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(self.try_take()),
            }
        }
    }

    async fn commit(&mut self, record: &BusRecord) -> Result<(), BusError> {
        let offset: u64 = record
            .offset
            .parse()
            .map_err(|_| BusError::InvalidPosition(record.offset.clone()))?;

        let mut state = self.bus.lock();
        let group = state
            .groups
            .entry((self.topic.clone(), self.group.clone()))
            .or_default();
        let next = group.committed.entry(record.partition).or_insert(0);
        *next = (*next).max(offset + 1);
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        let mut state = self.bus.lock();
        if let Some(group) = state.groups.get_mut(&(self.topic.clone(), self.group.clone())) {
            group.members.retain(|m| *m != self.member_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const WAIT: Duration = Duration::from_millis(10);

    async fn drain(consumer: &mut MemoryConsumer) -> Vec<BusRecord> {
        let mut out = Vec::new();
        while let Some(record) = consumer.fetch(WAIT).await.unwrap() {
            consumer.commit(&record).await.unwrap();
            out.push(record);
        }
        out
    }

    #[tokio::test]
    async fn test_uncommitted_record_is_fetched_again() {
        let bus = MemoryBus::new(1);
        bus.publish("t", "k", b"first").await.unwrap();
        bus.publish("t", "k", b"second").await.unwrap();

        let mut consumer = bus.subscribe("t", "g");
        let a = consumer.fetch(WAIT).await.unwrap().unwrap();
        let b = consumer.fetch(WAIT).await.unwrap().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.value, b"first");

        consumer.commit(&a).await.unwrap();
        let c = consumer.fetch(WAIT).await.unwrap().unwrap();
        assert_eq!(c.value, b"second");
    }

    #[tokio::test]
    async fn test_same_key_preserves_order() {
        let bus = MemoryBus::new(4);
        for i in 0..5 {
            bus.publish("t", "order-1", format!("a{}", i).as_bytes()).await.unwrap();
            bus.publish("t", &format!("other-{}", i), b"x").await.unwrap();
        }

        let mut consumer = bus.subscribe("t", "g");
        let values: Vec<String> = drain(&mut consumer)
            .await
            .into_iter()
            .filter(|r| r.key == b"order-1")
            .map(|r| String::from_utf8(r.value).unwrap())
            .collect();

        assert_eq!(values, vec!["a0", "a1", "a2", "a3", "a4"]);
    }

    #[tokio::test]
    async fn test_group_members_split_partitions() {
        let bus = MemoryBus::new(4);
        for i in 0..40 {
            bus.publish("t", &format!("order-{}", i), b"v").await.unwrap();
        }

        let mut first = bus.subscribe("t", "g");
        let mut second = bus.subscribe("t", "g");
        let a = drain(&mut first).await;
        let b = drain(&mut second).await;

        let parts_a: HashSet<u32> = a.iter().map(|r| r.partition).collect();
        let parts_b: HashSet<u32> = b.iter().map(|r| r.partition).collect();
        assert!(parts_a.is_disjoint(&parts_b));
        assert_eq!(a.len() + b.len(), 40);
    }

    #[tokio::test]
    async fn test_groups_consume_independently() {
        let bus = MemoryBus::new(2);
        bus.publish("t", "k", b"v").await.unwrap();

        let mut g1 = bus.subscribe("t", "g1");
        let mut g2 = bus.subscribe("t", "g2");
        assert_eq!(drain(&mut g1).await.len(), 1);
        assert_eq!(drain(&mut g2).await.len(), 1);
        assert_eq!(bus.topic_len("t"), 1);
    }

    #[tokio::test]
    async fn test_fetch_wakes_on_publish() {
        let bus = MemoryBus::new(1);
        let mut consumer = bus.subscribe("t", "g");

        let producer = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.publish("t", "k", b"late").await.unwrap();
        });

        let record = consumer.fetch(Duration::from_secs(2)).await.unwrap().unwrap();
        assert_eq!(record.value, b"late");
    }

    #[tokio::test]
    async fn test_dropped_member_releases_partitions() {
        let bus = MemoryBus::new(2);
        for i in 0..20 {
            bus.publish("t", &format!("k{}", i), b"v").await.unwrap();
        }

        let mut survivor = bus.subscribe("t", "g");
        {
            let _leaving = bus.subscribe("t", "g");
        }
        assert_eq!(drain(&mut survivor).await.len(), 20);
    }
}
