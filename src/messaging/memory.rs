use async_trait::async_trait;
use futures_util::future;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

use super::broker::{
    BrokerError, ConsumerRecord, DeliveryFuture, DeliveryReport, EventSink, OutboundRecord,
    RecordSource, SourceFactory,
};

// ============================================================================
// In-Memory Partitioned Log
// ============================================================================
//
// Keyed partitioning, per-partition offsets, per-group committed positions
// and redelivery from the last commit. Used by the `demo --in-memory` mode
// and by the pipeline tests.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitEntry {
    pub group: String,
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
}

struct LogState {
    partitions: usize,
    topics: HashMap<String, Vec<Vec<ConsumerRecord>>>,
    committed: HashMap<(String, String, i32), i64>,
    commit_log: Vec<CommitEntry>,
    failing_topics: HashSet<String>,
}

impl LogState {
    fn partitions_of(&mut self, topic: &str) -> &mut Vec<Vec<ConsumerRecord>> {
        let count = self.partitions;
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| vec![Vec::new(); count])
    }
}

#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<LogState>>,
    appended: Arc<Notify>,
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(LogState {
                partitions: partitions.max(1),
                topics: HashMap::new(),
                committed: HashMap::new(),
                commit_log: Vec::new(),
                failing_topics: HashSet::new(),
            })),
            appended: Arc::new(Notify::new()),
        }
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn partition_count(&self) -> usize {
        self.state().partitions
    }

    pub fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partition_count() as u64) as i32
    }

    /// Every record on `topic`, partition by partition, in offset order.
    pub fn records(&self, topic: &str) -> Vec<ConsumerRecord> {
        self.state()
            .topics
            .get(topic)
            .map(|partitions| partitions.iter().flatten().cloned().collect())
            .unwrap_or_default()
    }

    /// Next offset the group will read on `partition`, if it ever committed.
    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    pub fn commit_log(&self) -> Vec<CommitEntry> {
        self.state().commit_log.clone()
    }

    /// Make every send to `topic` fail, as if retries were exhausted.
    pub fn fail_sends_to(&self, topic: &str) {
        self.state().failing_topics.insert(topic.to_string());
    }

    pub fn restore_sends_to(&self, topic: &str) {
        self.state().failing_topics.remove(topic);
    }

    /// Group member owning the partitions `p` with `p % members == member`.
    pub fn source(&self, group: &str, topic: &str, member: usize, members: usize) -> InMemorySource {
        let members = members.max(1);
        let state = self.state();
        let assigned: Vec<i32> = (0..state.partitions)
            .filter(|p| p % members == member)
            .map(|p| p as i32)
            .collect();
        let positions = assigned
            .iter()
            .map(|&p| {
                let committed = state
                    .committed
                    .get(&(group.to_string(), topic.to_string(), p))
                    .copied()
                    .unwrap_or(0);
                (p, committed)
            })
            .collect();
        drop(state);

        InMemorySource {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            assigned,
            positions,
        }
    }

    pub fn source_factory(&self, group: &str, topic: &str, members: usize) -> InMemorySourceFactory {
        InMemorySourceFactory {
            broker: self.clone(),
            group: group.to_string(),
            topic: topic.to_string(),
            members: members.max(1),
        }
    }

    fn append(&self, record: OutboundRecord) -> Result<DeliveryReport, BrokerError> {
        let partition = self.partition_for(&record.key);
        let mut state = self.state();
        if state.failing_topics.contains(&record.topic) {
            return Err(BrokerError::Send(format!(
                "topic {} is not accepting writes",
                record.topic
            )));
        }

        let log = &mut state.partitions_of(&record.topic)[partition as usize];
        let offset = log.len() as i64;
        log.push(ConsumerRecord {
            topic: record.topic,
            partition,
            offset,
            key: Some(record.key),
            payload: record.payload,
            headers: record.headers,
        });
        drop(state);

        self.appended.notify_waiters();
        Ok(DeliveryReport { partition, offset })
    }
}

impl EventSink for InMemoryBroker {
    fn enqueue(&self, record: OutboundRecord) -> Result<DeliveryFuture, BrokerError> {
        let result = self.append(record);
        Ok(Box::pin(future::ready(result)))
    }
}

pub struct InMemorySource {
    broker: InMemoryBroker,
    group: String,
    topic: String,
    assigned: Vec<i32>,
    positions: HashMap<i32, i64>,
}

impl InMemorySource {
    pub fn assigned_partitions(&self) -> &[i32] {
        &self.assigned
    }

    fn owns(&self, partition: i32) -> bool {
        self.assigned.contains(&partition)
    }

    fn take_available(&mut self, max_records: usize) -> Vec<ConsumerRecord> {
        let mut batch = Vec::new();
        let mut state = self.broker.state();
        let partitions = state.partitions_of(&self.topic);

        for &partition in &self.assigned {
            let log = &partitions[partition as usize];
            let position = self.positions.entry(partition).or_insert(0);
            while batch.len() < max_records && (*position as usize) < log.len() {
                batch.push(log[*position as usize].clone());
                *position += 1;
            }
        }

        batch
    }
}

#[async_trait]
impl RecordSource for InMemorySource {
    async fn fetch(&mut self, max_records: usize) -> Result<Vec<ConsumerRecord>, BrokerError> {
        let appended = self.broker.appended.clone();
        loop {
            let notified = appended.notified();
            let batch = self.take_available(max_records.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }
            notified.await;
        }
    }

    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError> {
        if !self.owns(partition) {
            return Err(BrokerError::Commit {
                partition,
                offset,
                reason: "partition is not assigned to this member".to_string(),
            });
        }

        let mut state = self.broker.state();
        state
            .committed
            .insert((self.group.clone(), self.topic.clone(), partition), offset + 1);
        state.commit_log.push(CommitEntry {
            group: self.group.clone(),
            topic: self.topic.clone(),
            partition,
            offset,
        });
        Ok(())
    }

    async fn rewind(&mut self, partition: i32, offset: i64) -> Result<(), BrokerError> {
        if !self.owns(partition) {
            return Err(BrokerError::Seek {
                partition,
                offset,
                reason: "partition is not assigned to this member".to_string(),
            });
        }
        self.positions.insert(partition, offset);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.positions.clear();
        Ok(())
    }
}

pub struct InMemorySourceFactory {
    broker: InMemoryBroker,
    group: String,
    topic: String,
    members: usize,
}

#[async_trait]
impl SourceFactory for InMemorySourceFactory {
    async fn new_source(&self, worker_id: usize) -> Result<Box<dyn RecordSource>, BrokerError> {
        let source = self.broker.source(&self.group, &self.topic, worker_id, self.members);
        Ok(Box::new(source))
    }
}
